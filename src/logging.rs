//! Structured logging setup
//!
//! The engine only emits `tracing` events; installing a subscriber is up to
//! the host. [`init_logging`] is a convenience for hosts without their own.
//! `RUST_LOG` takes precedence over the configured levels.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Subscriber settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default level for every target
    pub level: String,
    /// Per-module overrides, e.g. `maestro::agent = "debug"`
    pub module_levels: BTreeMap<String, String>,
    /// One JSON object per line instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            module_levels: BTreeMap::new(),
            json: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_module_level(
        mut self,
        module: impl Into<String>,
        level: impl Into<String>,
    ) -> Self {
        self.module_levels.insert(module.into(), level.into());
        self
    }

    /// `EnvFilter` directives for this configuration
    pub fn filter_directives(&self) -> String {
        let mut directives = vec![self.level.clone()];
        directives.extend(
            self.module_levels
                .iter()
                .map(|(module, level)| format!("{module}={level}")),
        );
        directives.join(",")
    }
}

/// Install a global subscriber writing to stderr.
///
/// Returns false when a subscriber was already installed; the call is then a
/// no-op.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.json {
        builder.json().try_init().is_ok()
    } else {
        builder.compact().try_init().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives() {
        let config = LoggingConfig::default()
            .with_module_level("maestro::orchestrator", "trace")
            .with_module_level("maestro::agent", "debug");
        assert_eq!(
            config.filter_directives(),
            "info,maestro::agent=debug,maestro::orchestrator=trace"
        );
    }

    #[test]
    fn test_parse_config() {
        let config: LoggingConfig =
            serde_json::from_str(r#"{"level": "warn", "json": true}"#).unwrap();
        assert_eq!(config.level, "warn");
        assert!(config.json);
        assert!(config.module_levels.is_empty());

        assert!(serde_json::from_str::<LoggingConfig>(r#"{"colour": true}"#).is_err());
    }

    #[test]
    fn test_init_twice_is_noop() {
        init_logging(&LoggingConfig::default());
        assert!(!init_logging(&LoggingConfig::default()));
    }
}
