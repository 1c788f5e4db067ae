//! Router configuration

use crate::binding::{ModelBinding, ModelOverrides, DEFAULT_WARM_LANGUAGE};
use polysent_core::{Error, LanguageTag, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What to do when a model's engine cannot be loaded or fails mid-call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Fail the whole call, naming the model and affected positions
    #[default]
    Abort,
    /// Mark the failed group's messages with the error sentinel and continue
    Fallback,
}

/// Optional per-call timeouts, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Timeout for one detector call
    #[serde(default)]
    pub detect_ms: Option<u64>,

    /// Timeout for constructing an engine
    #[serde(default)]
    pub load_ms: Option<u64>,

    /// Timeout for one batch classification call
    #[serde(default)]
    pub classify_ms: Option<u64>,
}

impl TimeoutConfig {
    pub fn detect(&self) -> Option<Duration> {
        self.detect_ms.map(Duration::from_millis)
    }

    pub fn load(&self) -> Option<Duration> {
        self.load_ms.map(Duration::from_millis)
    }

    pub fn classify(&self) -> Option<Duration> {
        self.classify_ms.map(Duration::from_millis)
    }
}

/// Configuration for a [`BatchSentimentRouter`](crate::BatchSentimentRouter)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Model overrides merged over the base table
    #[serde(default)]
    pub models: ModelOverrides,

    /// Replacement for the built-in default table
    #[serde(default)]
    pub base_models: Option<ModelOverrides>,

    /// Engine failure handling
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Maximum number of per-group engines loaded at once
    #[serde(default = "default_max_concurrent_engines")]
    pub max_concurrent_engines: usize,

    /// Language whose model is kept loaded across calls
    #[serde(default = "default_warm_language")]
    pub warm_language: Option<LanguageTag>,

    /// External call timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            models: ModelOverrides::new(),
            base_models: None,
            failure_policy: FailurePolicy::default(),
            max_concurrent_engines: default_max_concurrent_engines(),
            warm_language: default_warm_language(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Load from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::config(format!(
                "Failed to read router config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_engines == 0 {
            return Err(Error::config("max_concurrent_engines must be at least 1"));
        }

        let timeouts = [
            ("detect_ms", self.timeouts.detect_ms),
            ("load_ms", self.timeouts.load_ms),
            ("classify_ms", self.timeouts.classify_ms),
        ];
        for (name, value) in timeouts {
            if value == Some(0) {
                return Err(Error::config(format!("timeouts.{} must be greater than 0", name)));
            }
        }

        Ok(())
    }

    /// Base binding: `base_models` (or the defaults) with `models` merged over it
    pub fn base_binding(&self) -> ModelBinding {
        let base = match &self.base_models {
            Some(models) => ModelBinding::from(models.clone()),
            None => ModelBinding::defaults(),
        };
        base.merge(&self.models)
    }
}

fn default_max_concurrent_engines() -> usize {
    1
}

fn default_warm_language() -> Option<LanguageTag> {
    Some(DEFAULT_WARM_LANGUAGE)
}
