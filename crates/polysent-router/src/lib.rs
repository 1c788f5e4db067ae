//! Polysent Router
//!
//! Batches short messages by detected language, routes each language's batch
//! to its sentiment model, and reassembles results in input order.
//!
//! Processing runs in three steps:
//! - Language assignment: one detector call per message, failures become `Unknown`
//! - Grouping: messages are partitioned by the model bound to their language
//! - Dispatch: each model's engine is loaded once, classifies its whole group in
//!   one call, and is released before the next group starts
//!
//! Language detection and sentiment classification are pluggable through the
//! [`LanguageDetector`] and [`EngineFactory`] traits.

pub mod binding;
pub mod config;
pub mod detector;
pub mod dispatch;
pub mod engine;
pub mod grouping;
pub mod telemetry;
pub mod router;
mod timeout;
pub mod warm;

pub use binding::{bind, merge, ModelBinding, ModelOverrides, DEFAULT_MODELS};
pub use config::{FailurePolicy, RouterConfig, TimeoutConfig};
pub use detector::{resolve, FnDetector, LanguageDetector};
pub use dispatch::{assemble, BatchReport, Dispatcher, EngineSource, GroupFailure, GroupOutcome};
pub use engine::{run_blocking, Engine, EngineFactory};
pub use grouping::{group, Grouping, WorkGroup, WorkItem};
pub use router::{BatchOutcome, BatchSentimentRouter, RouterBuilder};
pub use warm::WarmPool;

pub use polysent_core::{EngineFailureKind, Error, LanguageTag, ModelId, Result, SentimentResult};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::binding::{ModelBinding, ModelOverrides};
    pub use crate::config::{FailurePolicy, RouterConfig};
    pub use crate::detector::{FnDetector, LanguageDetector};
    pub use crate::engine::{Engine, EngineFactory};
    pub use crate::router::{BatchOutcome, BatchSentimentRouter};
    pub use polysent_core::prelude::*;
}
