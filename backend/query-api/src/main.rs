mod config;
mod error;
mod handlers;
mod state;

use std::time::Instant;

use actix_web::{web, App, HttpServer};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use event_bus::Publisher;
use state::AppState;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting query-api");

    let config = Config::from_env();
    config.db.log_config();

    let pool = durable_store::create_pool(config.db.clone()).await?;
    durable_store::migrate(&pool).await?;

    let publisher = Publisher::connect(&config.redis_url).await?;

    let state = AppState {
        pool,
        publisher,
        started_at: Instant::now(),
    };
    let channel = config.redis_channel.clone();
    let bind = (config.host.clone(), config.port);

    tracing::info!(host = %bind.0, port = bind.1, "binding query-api");

    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .app_data(web::Data::new(channel.clone()))
            .route("/", web::get().to(handlers::index))
            .route("/health", web::get().to(handlers::health))
            .route("/publish", web::post().to(handlers::publish))
            .route("/events", web::get().to(handlers::list_events))
            .route("/stats", web::get().to(handlers::stats))
            .route("/topics", web::get().to(handlers::topics))
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}
