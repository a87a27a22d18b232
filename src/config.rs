use std::time::Duration;

/// Store and server settings derived from env.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub database_url: Option<String>,
    pub bind: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            acquire_timeout: Duration::from_secs(30),
            database_url: None,
            bind: "0.0.0.0:5000".into(),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        fn u32_env(name: &str, default: u32) -> u32 { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
        fn dur_env(name: &str, default: u64) -> Duration { Duration::from_secs(std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)) }
        let defaults = Self::default();
        Self {
            // a zero-sized pool would never admit anything
            max_connections: u32_env("FORUMDB_MAX_CONNECTIONS", defaults.max_connections).max(1),
            acquire_timeout: dur_env("FORUMDB_ACQUIRE_TIMEOUT_SECS", defaults.acquire_timeout.as_secs()),
            database_url: std::env::var("DATABASE_URL").ok(),
            bind: std::env::var("FORUMDB_BIND").unwrap_or(defaults.bind),
        }
    }
}
