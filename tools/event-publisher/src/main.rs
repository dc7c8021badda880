//! Synthetic load generator for the ingest pipeline. Not part of the core
//! contract: a fixture for exercising the dedup protocol under a known
//! duplication rate, mirroring the workload the original Python publisher
//! produced.

use std::time::{Duration, Instant};

use event_bus::Publisher;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const TOPICS: &[&str] = &[
    "user.login",
    "user.logout",
    "user.register",
    "order.created",
    "order.completed",
    "order.cancelled",
    "payment.processed",
    "payment.failed",
    "inventory.updated",
    "notification.sent",
];

struct GeneratedEvent {
    topic: String,
    event_id: String,
}

fn generate_payload(topic: &str, rng: &mut impl Rng) -> Value {
    if topic.starts_with("user.") {
        json!({
            "user_id": format!("user_{}", rng.gen_range(1000..10000)),
            "ip_address": format!("192.168.{}.{}", rng.gen_range(1..256), rng.gen_range(1..256)),
            "user_agent": "Mozilla/5.0",
        })
    } else if topic.starts_with("order.") {
        json!({
            "order_id": format!("ord_{}", short_uuid()),
            "user_id": format!("user_{}", rng.gen_range(1000..10000)),
            "amount": (rng.gen_range(1000..100000) as f64) / 100.0,
            "items": rng.gen_range(1..11),
        })
    } else if topic.starts_with("payment.") {
        let methods = ["credit_card", "debit_card", "paypal", "bank_transfer"];
        json!({
            "payment_id": format!("pay_{}", short_uuid()),
            "order_id": format!("ord_{}", short_uuid()),
            "amount": (rng.gen_range(1000..100000) as f64) / 100.0,
            "method": methods.choose(rng).unwrap(),
        })
    } else if topic.starts_with("inventory.") {
        json!({
            "product_id": format!("prod_{}", rng.gen_range(100..1000)),
            "quantity": rng.gen_range(-50..101),
            "warehouse": format!("WH-{}", rng.gen_range(1..6)),
        })
    } else {
        let priorities = ["low", "medium", "high"];
        json!({
            "message": format!("Event data for {topic}"),
            "priority": priorities.choose(rng).unwrap(),
        })
    }
}

fn short_uuid() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

fn generate_event(
    event_id: Option<&str>,
    topic_override: Option<&str>,
    rng: &mut impl Rng,
) -> (GeneratedEvent, Value) {
    let topic = topic_override
        .map(str::to_string)
        .unwrap_or_else(|| TOPICS.choose(rng).unwrap().to_string());
    let event_id = event_id.map(str::to_string).unwrap_or_else(|| {
        format!("evt_{}", &Uuid::new_v4().simple().to_string()[..16])
    });

    let payload = generate_payload(&topic, rng);
    let body = json!({
        "topic": topic.clone(),
        "event_id": event_id.clone(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "source": format!("publisher-{}", rng.gen_range(1..6)),
        "payload": payload,
    });

    (GeneratedEvent { topic, event_id }, body)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let channel = std::env::var("REDIS_CHANNEL").unwrap_or_else(|_| "events".to_string());
    let total_events: usize = std::env::var("TOTAL_EVENTS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(25_000);
    let duplication_rate: f64 = std::env::var("DUPLICATION_RATE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.35);
    let batch_size: usize = std::env::var("BATCH_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(100);

    tracing::info!(total_events, duplication_rate, batch_size, "starting publisher");

    let publisher = Publisher::connect(&redis_url).await?;
    let mut rng = rand::thread_rng();
    let mut generated: Vec<GeneratedEvent> = Vec::new();

    let start = Instant::now();
    let target_unique = (total_events as f64 / (1.0 + duplication_rate)) as usize;

    tracing::info!("generating unique events");
    for i in 0..target_unique {
        let (ev, body) = generate_event(None, None, &mut rng);
        publisher.publish(&channel, &body.to_string()).await?;
        generated.push(ev);

        if (i + 1) % batch_size == 0 {
            tracing::info!(progress = i + 1, target = target_unique, "unique events published");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
    tracing::info!(count = generated.len(), "unique events published");

    tracing::info!("generating duplicate events");
    let target_duplicates = total_events.saturating_sub(target_unique);
    for i in 0..target_duplicates {
        let original = generated.choose(&mut rng).expect("at least one unique event generated");
        let (_, body) = generate_event(Some(&original.event_id), Some(&original.topic), &mut rng);
        publisher.publish(&channel, &body.to_string()).await?;

        if (i + 1) % batch_size == 0 {
            tracing::info!(progress = i + 1, target = target_duplicates, "duplicate events published");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    let elapsed = start.elapsed();
    let published = target_unique + target_duplicates;
    tracing::info!(
        published,
        unique = target_unique,
        duplicates = target_duplicates,
        elapsed_secs = elapsed.as_secs_f64(),
        throughput = published as f64 / elapsed.as_secs_f64().max(0.001),
        "publishing complete"
    );

    Ok(())
}
