use std::time::Duration;

/// SQLite connection settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_path: String,
    pub max_connections: u32,
    /// How long SQLite waits on a locked database before giving up
    pub busy_timeout: Duration,
}

impl StoreConfig {
    pub fn new(database_path: impl Into<String>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Self::default()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: "bankops.db".to_string(),
            max_connections: 8,
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

/// Posting behaviour of the ledger service.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Upper bound on waiting for an account lock
    pub lock_timeout: Duration,
    /// Re-reads after losing an optimistic version check
    pub max_conflict_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(5000),
            max_conflict_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Some(LogFormat::Text),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Everything the binary needs to start, gathered from flags and environment.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub store: StoreConfig,
    pub ledger: LedgerConfig,
    pub log_format: LogFormat,
}
