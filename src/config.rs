//! Server Configuration
//!
//! Everything is read from environment variables with defaults:
//!
//! | Variable                  | Default        |
//! |---------------------------|----------------|
//! | `DUELS_BIND`              | `0.0.0.0:8080` |
//! | `DUELS_MAX_CONNECTIONS`   | `1000`         |
//! | `DUELS_GRACE_SECS`        | `30`           |
//! | `DUELS_IDLE_TIMEOUT_SECS` | `600`          |
//! | `DUELS_DELTA_RING`        | `256`          |
//! | `DUELS_RULESET`           | built-in       |

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::game::rules::{Ruleset, RulesetError};
use crate::network::server::ServerConfig;
use crate::network::session::SessionConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable could not be parsed.
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
    },

    /// Ruleset file could not be read.
    #[error("failed to read ruleset {}: {source}", .path.display())]
    RulesetRead {
        /// File path
        path: PathBuf,
        /// Cause
        source: std::io::Error,
    },

    /// Ruleset file is invalid.
    #[error("invalid ruleset: {0}")]
    Ruleset(#[from] RulesetError),
}

/// Full application configuration.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// WebSocket server settings.
    pub server: ServerConfig,
    /// Per-match session settings.
    pub session: SessionConfig,
    /// Optional ruleset file.
    pub ruleset_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load using `lookup` in place of the environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = parse::<SocketAddr>(&lookup, "DUELS_BIND")? {
            config.server.bind_addr = addr;
        }
        if let Some(max) = parse::<usize>(&lookup, "DUELS_MAX_CONNECTIONS")? {
            config.server.max_connections = max;
        }
        if let Some(secs) = parse::<u64>(&lookup, "DUELS_GRACE_SECS")? {
            config.session.grace_period = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&lookup, "DUELS_IDLE_TIMEOUT_SECS")? {
            config.session.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(capacity) = parse::<usize>(&lookup, "DUELS_DELTA_RING")? {
            if capacity == 0 {
                return Err(ConfigError::InvalidValue {
                    var: "DUELS_DELTA_RING",
                    value: capacity.to_string(),
                });
            }
            config.session.delta_ring_capacity = capacity;
        }
        config.ruleset_path = lookup("DUELS_RULESET")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        Ok(config)
    }

    /// Load the configured ruleset, or the built-in one.
    pub fn load_ruleset(&self) -> Result<Ruleset, ConfigError> {
        match &self.ruleset_path {
            Some(path) => load_ruleset_file(path),
            None => Ok(Ruleset::builtin()),
        }
    }
}

/// Read and validate a ruleset file.
pub fn load_ruleset_file(path: &Path) -> Result<Ruleset, ConfigError> {
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::RulesetRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Ruleset::from_json(&json)?)
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    match value.trim().parse() {
        Ok(parsed) => Ok(Some(parsed)),
        Err(_) => Err(ConfigError::InvalidValue { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.server.bind_addr.port(), 8080);
        assert_eq!(config.session.grace_period, Duration::from_secs(30));
        assert_eq!(config.session.delta_ring_capacity, 256);
        assert!(config.ruleset_path.is_none());
        assert!(config.load_ruleset().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DUELS_BIND", "127.0.0.1:9000"),
            ("DUELS_MAX_CONNECTIONS", "10"),
            ("DUELS_GRACE_SECS", " 5 "),
            ("DUELS_IDLE_TIMEOUT_SECS", "120"),
            ("DUELS_DELTA_RING", "32"),
            ("DUELS_RULESET", "rules.json"),
        ]))
        .unwrap();

        assert_eq!(config.server.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.server.max_connections, 10);
        assert_eq!(config.session.grace_period, Duration::from_secs(5));
        assert_eq!(config.session.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.session.delta_ring_capacity, 32);
        assert_eq!(config.ruleset_path, Some(PathBuf::from("rules.json")));
    }

    #[test]
    fn test_invalid_values() {
        let err = AppConfig::from_lookup(lookup_from(&[("DUELS_GRACE_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "DUELS_GRACE_SECS", .. }));

        let err = AppConfig::from_lookup(lookup_from(&[("DUELS_DELTA_RING", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "DUELS_DELTA_RING", .. }));

        let err = AppConfig::from_lookup(lookup_from(&[("DUELS_BIND", "nowhere")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "DUELS_BIND", .. }));
    }

    #[test]
    fn test_missing_ruleset_file() {
        let config = AppConfig::from_lookup(lookup_from(&[(
            "DUELS_RULESET",
            "/nonexistent/duels-ruleset.json",
        )]))
        .unwrap();
        assert!(matches!(config.load_ruleset(), Err(ConfigError::RulesetRead { .. })));
    }

    #[test]
    fn test_ruleset_file_roundtrip() {
        let path = std::env::temp_dir().join(format!("duels-ruleset-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"cards": [
            {"id": 1, "name": "Sentry", "class": "defender", "attack": 1, "defense": 4, "speed": 2}
        ]}"#)
        .unwrap();

        let ruleset = load_ruleset_file(&path).unwrap();
        assert_eq!(ruleset.catalog.len(), 1);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_ruleset_file(&path), Err(ConfigError::Ruleset(_))));

        let _ = std::fs::remove_file(&path);
    }
}
