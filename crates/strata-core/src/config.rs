use serde::Deserialize;
use std::time::Duration;

///
/// DatabaseConfig
///
/// Runtime knobs for the persistence facade. Deserializable so hosts can
/// load it from their own config files; every field has a working default.
///

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Whole-table deletes are destructive and off unless a host opts in.
    pub allow_delete_all: bool,

    /// Delay between delayed-flush sweeps, in milliseconds.
    pub flush_interval_ms: u64,

    /// Maximum queued actions applied per flush transaction.
    pub flush_chunk_size: usize,

    /// Rows per page for windowed reads and paged relation iteration.
    pub page_size: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            allow_delete_all: false,
            flush_interval_ms: 250,
            flush_chunk_size: 1000,
            page_size: 256,
        }
    }
}

impl DatabaseConfig {
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let config = DatabaseConfig::default();
        assert!(!config.allow_delete_all);
        assert_eq!(config.flush_chunk_size, 1000);
    }

    #[test]
    fn partial_config_deserializes_over_defaults() {
        let config: DatabaseConfig =
            serde_json::from_str(r#"{ "allow_delete_all": true, "page_size": 64 }"#).unwrap();

        assert!(config.allow_delete_all);
        assert_eq!(config.page_size, 64);
        assert_eq!(config.flush_interval_ms, 250);
    }
}
