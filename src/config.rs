//! Configuration management for pacer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{PacerError, Result};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "PACER";

/// Largest interval accepted for a lane. Anything longer is a typo.
const MAX_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

/// Main configuration for pacer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacerConfig {
    /// Lane used when a caller does not name one
    #[serde(default = "default_lane_name")]
    pub default_lane: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Throttle configuration per lane
    #[serde(default)]
    pub lanes: HashMap<String, ThrottleConfig>,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            default_lane: default_lane_name(),
            logging: LoggingConfig::default(),
            lanes: HashMap::new(),
        }
    }
}

fn default_lane_name() -> String {
    "default".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Which instant the throttle records as the last request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalAnchor {
    /// Stamp after the operation finishes, so slow operations push the next
    /// start back by their own duration.
    #[default]
    Completion,
    /// Stamp when the operation starts, spacing starts exactly one interval apart.
    Start,
}

/// Configuration for a single throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Minimum time between consecutive task starts, in milliseconds
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Instant used as the reference for the interval
    #[serde(default)]
    pub anchor: IntervalAnchor,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            anchor: IntervalAnchor::default(),
        }
    }
}

fn default_min_interval_ms() -> u64 {
    1000
}

impl ThrottleConfig {
    /// Create a completion-anchored configuration with the given interval.
    pub fn with_interval(min_interval: Duration) -> Self {
        Self {
            min_interval_ms: u64::try_from(min_interval.as_millis()).unwrap_or(u64::MAX),
            anchor: IntervalAnchor::Completion,
        }
    }

    /// Set the interval anchor.
    pub fn anchor(mut self, anchor: IntervalAnchor) -> Self {
        self.anchor = anchor;
        self
    }

    /// The minimum interval as a `Duration`.
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Reject intervals that cannot be intended.
    pub fn validate(&self) -> Result<()> {
        if self.min_interval_ms > MAX_INTERVAL_MS {
            return Err(PacerError::Config(format!(
                "min_interval_ms {} exceeds the maximum of {} (one day)",
                self.min_interval_ms, MAX_INTERVAL_MS
            )));
        }
        Ok(())
    }
}

impl PacerConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading pacer configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PacerConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file, then apply
    /// `PACER__*` environment overrides on top.
    ///
    /// Nested keys are separated by a double underscore, e.g.
    /// `PACER__LANES__DEFAULT__MIN_INTERVAL_MS=250`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading pacer configuration");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: PacerConfig = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every lane and the lane names.
    pub fn validate(&self) -> Result<()> {
        if self.default_lane.trim().is_empty() {
            return Err(PacerError::Config("default_lane must not be empty".to_string()));
        }

        for (name, lane) in &self.lanes {
            if name.trim().is_empty() {
                return Err(PacerError::Config("lane names must not be empty".to_string()));
            }
            lane.validate()
                .map_err(|e| PacerError::Config(format!("lane '{}': {}", name, e)))?;
        }

        Ok(())
    }

    /// Configuration for a lane, falling back to the defaults.
    pub fn lane(&self, name: &str) -> ThrottleConfig {
        self.lanes.get(name).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PacerConfig::default();

        assert_eq!(config.default_lane, "default");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.lanes.is_empty());

        let lane = config.lane("anything");
        assert_eq!(lane.min_interval(), Duration::from_millis(1000));
        assert_eq!(lane.anchor, IntervalAnchor::Completion);
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
default_lane: gemini
logging:
  format: json
lanes:
  gemini:
    min_interval_ms: 4000
    anchor: start
  suppliers:
    min_interval_ms: 250
"#;

        let config = PacerConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.default_lane, "gemini");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");

        let gemini = config.lane("gemini");
        assert_eq!(gemini.min_interval_ms, 4000);
        assert_eq!(gemini.anchor, IntervalAnchor::Start);

        let suppliers = config.lane("suppliers");
        assert_eq!(suppliers.min_interval_ms, 250);
        assert_eq!(suppliers.anchor, IntervalAnchor::Completion);
    }

    #[test]
    fn test_zero_interval_is_valid() {
        let config = ThrottleConfig::with_interval(Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_interval_saturates_instead_of_wrapping() {
        // 2^64 ms wraps to 0 under a plain cast.
        let config = ThrottleConfig::with_interval(
            Duration::from_millis(u64::MAX) + Duration::from_millis(1),
        );

        assert_eq!(config.min_interval_ms, u64::MAX);
        assert!(matches!(config.validate(), Err(PacerError::Config(_))));
        assert!(ThrottleConfig::with_interval(Duration::MAX).validate().is_err());
    }

    #[test]
    fn test_rejects_huge_interval() {
        let yaml = r#"
lanes:
  slow:
    min_interval_ms: 90000000
"#;

        let err = PacerConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, PacerError::Config(_)));
        assert!(err.to_string().contains("slow"));
    }

    #[test]
    fn test_rejects_empty_default_lane() {
        let err = PacerConfig::from_yaml("default_lane: \"\"").unwrap_err();
        assert!(matches!(err, PacerError::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_anchor() {
        let yaml = r#"
lanes:
  default:
    anchor: sometimes
"#;

        assert!(matches!(
            PacerConfig::from_yaml(yaml),
            Err(PacerError::Yaml(_))
        ));
    }

    #[test]
    fn test_load_applies_env_overrides() {
        std::env::set_var("PACER__LANES__ENVLANE__MIN_INTERVAL_MS", "125");

        let config = PacerConfig::load(None).unwrap();
        std::env::remove_var("PACER__LANES__ENVLANE__MIN_INTERVAL_MS");

        assert_eq!(config.lane("envlane").min_interval_ms, 125);
        assert_eq!(config.lane("envlane").anchor, IntervalAnchor::Completion);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = PacerConfig::load(Some(Path::new("/nonexistent/pacer.yaml")));
        assert!(matches!(result, Err(PacerError::ConfigSource(_))));
    }
}
