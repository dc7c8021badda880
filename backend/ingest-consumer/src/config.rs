use durable_store::{parse_env_with_default, DbConfig, IsolationLevel};
use std::str::FromStr;

/// Consumer-side configuration, loaded once at startup and never
/// re-read. Anything malformed here is a fail-fast error, not a default.
pub struct Config {
    pub redis_url: String,
    pub redis_channel: String,
    pub num_workers: usize,
    pub db: DbConfig,
    pub isolation: IsolationLevel,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let redis_channel =
            std::env::var("REDIS_CHANNEL").unwrap_or_else(|_| "events".to_string());

        let num_workers: usize = parse_env_with_default("NUM_WORKERS", 3);
        if num_workers == 0 {
            anyhow::bail!("NUM_WORKERS must be positive, got 0");
        }

        let isolation = std::env::var("DB_ISOLATION_LEVEL")
            .ok()
            .map(|raw| IsolationLevel::from_str(&raw))
            .transpose()
            .map_err(|e| anyhow::anyhow!(e))?
            .unwrap_or_default();

        Ok(Self {
            redis_url,
            redis_channel,
            num_workers,
            db: DbConfig::from_env(),
            isolation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn zero_workers_is_rejected() {
        std::env::set_var("NUM_WORKERS", "0");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("NUM_WORKERS"));
        std::env::remove_var("NUM_WORKERS");
    }

    #[test]
    #[serial_test::serial]
    fn defaults_num_workers_to_three() {
        std::env::remove_var("NUM_WORKERS");
        let config = Config::from_env().unwrap();
        assert_eq!(config.num_workers, 3);
    }

    #[test]
    #[serial_test::serial]
    fn rejects_invalid_isolation_level() {
        std::env::set_var("DB_ISOLATION_LEVEL", "not-a-level");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("DB_ISOLATION_LEVEL"));
        std::env::remove_var("DB_ISOLATION_LEVEL");
    }
}
