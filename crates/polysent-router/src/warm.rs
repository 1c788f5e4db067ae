//! Shared warm engine for one designated model

use crate::engine::{Engine, EngineFactory};
use polysent_core::{Error, ModelId, Result};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

/// Holds at most one long-lived engine, shared read-only across calls.
///
/// The engine is constructed on first use or by an explicit warm-up, and is
/// never released by dispatch. Clones share the same cell.
#[derive(Clone, Default)]
pub struct WarmPool {
    model: Option<ModelId>,
    cell: Arc<OnceCell<Arc<dyn Engine>>>,
}

impl WarmPool {
    /// Create a pool serving `model`
    pub fn new(model: impl Into<ModelId>) -> Self {
        Self {
            model: Some(model.into()),
            cell: Arc::new(OnceCell::new()),
        }
    }

    /// Create a pool that serves no model
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Model served by this pool
    pub fn model(&self) -> Option<&ModelId> {
        self.model.as_ref()
    }

    /// Whether requests for `model` are served from this pool
    pub fn serves(&self, model: &ModelId) -> bool {
        self.model.as_ref() == Some(model)
    }

    /// Whether the warm engine has been constructed
    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    /// Get the warm engine, loading it through `factory` on first use.
    ///
    /// Concurrent callers wait for a single load. A failed load leaves the
    /// pool empty so a later call can retry.
    pub async fn get_or_load(&self, factory: &dyn EngineFactory) -> Result<Arc<dyn Engine>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| Error::config("warm pool has no model configured"))?;

        let engine = self
            .cell
            .get_or_try_init(|| async {
                info!(model = %model, "Loading warm engine");
                factory.load(model).await.map(Arc::<dyn Engine>::from)
            })
            .await?;

        Ok(Arc::clone(engine))
    }
}

impl std::fmt::Debug for WarmPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmPool")
            .field("model", &self.model)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
