use durable_store::{parse_env_with_default, DbConfig};

pub struct Config {
    pub host: String,
    pub port: u16,
    pub redis_url: String,
    pub redis_channel: String,
    pub db: DbConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_env_with_default("API_PORT", 8000),
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            redis_channel: std::env::var("REDIS_CHANNEL").unwrap_or_else(|_| "events".to_string()),
            db: DbConfig::from_env(),
        }
    }
}
