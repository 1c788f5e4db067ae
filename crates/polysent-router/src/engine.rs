//! Classification engine and engine factory traits

use async_trait::async_trait;
use polysent_core::{EngineFailureKind, Error, ModelId, Result, SentimentResult};

/// A loaded sentiment classification model.
///
/// Engines may hold large weights in memory. The router drops a per-group
/// engine as soon as its group has been classified, which releases them.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Classify a batch of texts.
    ///
    /// Must return exactly one result per input, in input order.
    async fn classify(&self, texts: &[String]) -> Result<Vec<SentimentResult>>;

    /// Get the engine name
    fn name(&self) -> &str;
}

/// Pluggable backend that constructs engines by model identifier.
///
/// Implement this trait in external crates to provide inference backends
/// (for example Candle or ONNX) without coupling the router to them.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Load the engine for a model. May be expensive.
    async fn load(&self, model: &ModelId) -> Result<Box<dyn Engine>>;
}

/// Run CPU-bound engine work on the blocking thread pool.
///
/// Engines whose inference or loading never yields must go through this for
/// load and classify time limits to fire. A panic in `work` is reported as a
/// failure of `kind`.
pub async fn run_blocking<T, F>(kind: EngineFailureKind, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::engine(kind, format!("engine task failed: {}", e)))?
}
