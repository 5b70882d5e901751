//! Evaluator configuration.
//!
//! Configuration is plain data. It can be built in code, parsed from JSON,
//! and adjusted from the environment:
//!
//! ```rust
//! use skyframe_core::config::EvaluatorConfig;
//!
//! let config = EvaluatorConfig::from_json(r#"{ "parallelism": 4 }"#).unwrap();
//! assert_eq!(config.parallelism, 4);
//! assert!(!config.keep_going);
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Environment variable overriding [`EvaluatorConfig::parallelism`].
pub const PARALLELISM_ENV: &str = "SKYFRAME_PARALLELISM";

/// Environment variable overriding [`EvaluatorConfig::keep_going`].
pub const KEEP_GOING_ENV: &str = "SKYFRAME_KEEP_GOING";

/// Root configuration of an [`Evaluator`](crate::evaluator::Evaluator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Maximum number of functions running at once.
    pub parallelism: usize,

    /// Default for [`EvaluationOptions::keep_going`](crate::evaluator::EvaluationOptions).
    pub keep_going: bool,

    /// Lost-input recovery settings.
    pub rewinding: RewindConfig,

    /// Suggested capacity for the side caches of registered functions.
    pub side_cache_capacity: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            keep_going: false,
            rewinding: RewindConfig::default(),
            side_cache_capacity: 1024,
        }
    }
}

/// Lost-input recovery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewindConfig {
    /// Whether lost inputs are recovered by rewinding at all.
    pub enabled: bool,

    /// How many times one node may lose the same input before it fails.
    pub max_repeated_lost_inputs: usize,
}

impl Default for RewindConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_repeated_lost_inputs: 20,
        }
    }
}

impl EvaluatorConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SKYFRAME_PARALLELISM` and `SKYFRAME_KEEP_GOING` from the process
    /// environment.
    pub fn with_env_overrides(self) -> ConfigResult<Self> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(value) = lookup(PARALLELISM_ENV) {
            self.parallelism = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: PARALLELISM_ENV,
                value: value.clone(),
            })?;
            debug!(parallelism = self.parallelism, "parallelism overridden from environment");
        }

        if let Some(value) = lookup(KEEP_GOING_ENV) {
            self.keep_going = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        var: KEEP_GOING_ENV,
                        value,
                    })
                }
            };
            debug!(keep_going = self.keep_going, "keep_going overridden from environment");
        }

        self.validate()?;
        Ok(self)
    }

    /// Check field values.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.parallelism == 0 {
            return Err(ConfigError::Invalid {
                message: "parallelism must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let vars: HashMap<&'static str, String> =
            pairs.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn json_fills_in_defaults() {
        let config = EvaluatorConfig::from_json(r#"{ "keep_going": true }"#).unwrap();
        assert!(config.keep_going);
        assert!(config.parallelism >= 1);
        assert_eq!(config.rewinding, RewindConfig::default());
        assert_eq!(config.side_cache_capacity, 1024);
    }

    #[test]
    fn nested_rewind_section() {
        let config = EvaluatorConfig::from_json(
            r#"{ "parallelism": 2, "rewinding": { "max_repeated_lost_inputs": 3 } }"#,
        )
        .unwrap();
        assert!(config.rewinding.enabled);
        assert_eq!(config.rewinding.max_repeated_lost_inputs, 3);
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let err = EvaluatorConfig::from_json(r#"{ "parallelism": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = EvaluatorConfig::from_json("{ parallelism: }").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn environment_overrides() {
        let config = EvaluatorConfig::default()
            .with_overrides(env(&[(PARALLELISM_ENV, "3"), (KEEP_GOING_ENV, "yes")]))
            .unwrap();
        assert_eq!(config.parallelism, 3);
        assert!(config.keep_going);
    }

    #[test]
    fn bad_environment_values() {
        let err = EvaluatorConfig::default()
            .with_overrides(env(&[(KEEP_GOING_ENV, "sometimes")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: KEEP_GOING_ENV, .. }));

        let err = EvaluatorConfig::default()
            .with_overrides(env(&[(PARALLELISM_ENV, "-1")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: PARALLELISM_ENV, .. }));
    }
}
