use actix_web::{web, HttpResponse};
use error_handling::ServiceError;
use event_schema::{validate_batch, Event, EventBatch};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::error::ApiError;
use crate::state::AppState;

/// `POST /publish` accepts either a single event or a batch wrapper; the
/// façade never writes to the store, it only republishes to the bus.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PublishRequest {
    Batch(EventBatch),
    Single(Event),
}

impl PublishRequest {
    fn into_events(self) -> Vec<Event> {
        match self {
            PublishRequest::Batch(b) => b.events,
            PublishRequest::Single(e) => vec![e],
        }
    }
}

#[derive(Serialize)]
struct PublishResponse {
    status: &'static str,
    accepted: usize,
    message: String,
}

pub async fn index() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "service": "aggregator-query-api",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
    }))
}

pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let database_ok = durable_store::health_check(&state.pool).await;
    let redis_ok = state.publisher.ping().await;

    let body = json!({
        "status": if database_ok && redis_ok { "ok" } else { "degraded" },
        "database": if database_ok { "ok" } else { "unreachable" },
        "redis": if redis_ok { "ok" } else { "unreachable" },
    });

    if database_ok && redis_ok {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

pub async fn publish(
    state: web::Data<AppState>,
    channel: web::Data<String>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let parsed: PublishRequest = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::ValidationError(format!("malformed request body: {e}")))?;

    let events = validate_batch(parsed.into_events())
        .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

    for event in &events {
        let payload = serde_json::to_string(event)
            .map_err(|e| ServiceError::InternalError(format!("failed to encode event: {e}")))?;
        state.publisher.publish(&channel, &payload).await.map_err(|e| {
            warn!(error = %e, "failed to publish event to bus");
            ServiceError::ServiceUnavailable
        })?;
    }

    Ok(HttpResponse::Ok().json(PublishResponse {
        status: "accepted",
        accepted: events.len(),
        message: format!("{} event(s) accepted for publishing", events.len()),
    }))
}

#[derive(Deserialize)]
pub struct EventsQuery {
    topic: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    100
}

pub async fn list_events(
    state: web::Data<AppState>,
    query: web::Query<EventsQuery>,
) -> Result<HttpResponse, ApiError> {
    let rows = durable_store::list_processed_events(
        &state.pool,
        query.topic.as_deref(),
        query.limit,
        query.offset,
    )
    .await?;
    Ok(HttpResponse::Ok().json(rows))
}

pub async fn stats(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let stats = durable_store::read_stats(&state.pool).await?;
    let topic_count = durable_store::count_distinct_topics(&state.pool).await?;

    Ok(HttpResponse::Ok().json(json!({
        "received": stats.received,
        "unique_processed": stats.unique_processed,
        "duplicate_dropped": stats.duplicate_dropped,
        "errored": stats.errored,
        "distinct_topics": topic_count,
        "last_updated": stats.last_updated,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    })))
}

pub async fn topics(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let topics = durable_store::list_distinct_topics(&state.pool).await?;
    Ok(HttpResponse::Ok().json(json!({ "topics": topics })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn index_reports_service_banner() {
        let app = test::init_service(App::new().route("/", web::get().to(index))).await;
        let req = test::TestRequest::get().uri("/").to_request();
        let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["service"], "aggregator-query-api");
        assert_eq!(resp["status"], "ok");
    }

    #[test]
    fn publish_request_accepts_single_event() {
        let body = json!({
            "topic": "user.login",
            "event_id": "evt_A",
            "timestamp": "2025-12-02T10:30:00Z",
            "source": "s",
            "payload": {},
        });
        let parsed: PublishRequest = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.into_events().len(), 1);
    }

    #[test]
    fn publish_request_accepts_batch() {
        let body = json!({
            "events": [
                {"topic": "a", "event_id": "1", "timestamp": "2025-12-02T10:30:00Z", "source": "s", "payload": {}},
                {"topic": "b", "event_id": "2", "timestamp": "2025-12-02T10:30:00Z", "source": "s", "payload": {}},
            ]
        });
        let parsed: PublishRequest = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.into_events().len(), 2);
    }

    #[test]
    fn events_query_defaults_limit_to_100() {
        let query: EventsQuery = serde_json::from_value(json!({})).unwrap();
        assert_eq!(query.limit, 100);
        assert_eq!(query.offset, 0);
    }

    #[test]
    fn validation_failure_maps_to_422() {
        use actix_web::ResponseError;
        let err: ApiError = ServiceError::ValidationError("bad topic".into()).into();
        assert_eq!(err.status_code(), actix_web::http::StatusCode::UNPROCESSABLE_ENTITY);
    }
}
