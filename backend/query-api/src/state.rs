use std::time::Instant;

use event_bus::Publisher;
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub publisher: Publisher,
    pub started_at: Instant,
}
