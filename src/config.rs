use std::env;

/// Runtime settings, read from the environment with local-dev defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Redis connection URL shared by the config and data databases.
    pub redis_url: String,
    /// Logical db index holding the analytics registry.
    pub config_db: i64,
    /// Logical db index for aggregates when a definition omits `data_db`.
    pub default_data_db: i64,
    /// HTTP listen port for the front door.
    pub port: u16,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            redis_url: env::var("FACET_REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            config_db: env_or("FACET_CONFIG_DB", 0),
            default_data_db: env_or("FACET_DATA_DB", 1),
            port: env_or("FACET_PORT", 5000),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
