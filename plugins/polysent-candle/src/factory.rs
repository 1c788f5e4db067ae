//! Engine factory backed by the Hugging Face hub

use crate::config::CandleEngineConfig;
use crate::engine::CandleEngine;
use crate::files;
use async_trait::async_trait;
use polysent_core::{EngineFailureKind, ModelId, Result};
use polysent_router::{run_blocking, Engine, EngineFactory};
use std::sync::Arc;
use tracing::info;

/// Loads [`CandleEngine`]s from hub repositories or local directories.
///
/// A model identifier naming an existing directory is loaded from disk;
/// any other identifier is a hub repository id such as
/// `fergusq/finbert-finnsentiment`.
#[derive(Debug, Clone, Default)]
pub struct HfEngineFactory {
    config: Arc<CandleEngineConfig>,
}

impl HfEngineFactory {
    /// Create a factory with the default configuration (CPU, 512 tokens)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory with a validated configuration
    pub fn with_config(config: CandleEngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &CandleEngineConfig {
        &self.config
    }

    /// Resolve and load a model on the current thread
    pub fn load_blocking(&self, model: &ModelId) -> Result<CandleEngine> {
        let files = files::resolve(model, &self.config)?;
        CandleEngine::load(model.as_str(), &files, &self.config)
    }
}

#[async_trait]
impl EngineFactory for HfEngineFactory {
    async fn load(&self, model: &ModelId) -> Result<Box<dyn Engine>> {
        info!(model = %model, device = %self.config.device, "Loading candle engine");

        let factory = self.clone();
        let model = model.clone();
        let engine = run_blocking(EngineFailureKind::Load, move || factory.load_blocking(&model)).await?;

        Ok(Box::new(engine))
    }
}
