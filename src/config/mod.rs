//! Configuration loading: parse, then validate as a separate pass
//! (spec.md §6), mirroring the teacher's own config module split.

pub mod defaults;
pub mod types;
pub mod validation;

pub use types::{
    Config, ControllerConfig, LogFormat, ObservabilityConfig, PeerConfig, PeerEndpoint,
    SchedulerConfig, StoreConfig, SyncConfig,
};
pub use validation::ConfigValidationError;

use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config validation failed:\n{}", .0.iter().map(|e| format!("  - {e}")).collect::<Vec<_>>().join("\n"))]
    Invalid(Vec<ConfigValidationError>),
}

impl Config {
    /// Reads and parses the TOML file at `path`, then validates it.
    /// Returns the first `ConfigError` that applies; validation errors are
    /// collected and returned together rather than one at a time.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        validation::validate(&config).map_err(ConfigError::Invalid)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_minimal_config() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
            [peer]
            peer_id = "p1"
            peer_secret = "s3cr3t"
            "#
        )
        .unwrap();
        let config = Config::load(f.path()).unwrap();
        assert_eq!(config.peer.peer_id, "p1");
        assert_eq!(config.sync.sync_delta_secs, defaults::DEFAULT_SYNC_DELTA_SECS);
    }

    #[test]
    fn rejects_invalid_config() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
            [peer]
            peer_id = "p1"
            peer_secret = ""
            "#
        )
        .unwrap();
        let err = Config::load(f.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Config::load(Path::new("/nonexistent/latticed.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
