//! Polysent Core
//!
//! Core types and error handling shared across polysent components.
//!
//! This crate provides:
//! - Language tags and model identifiers used to route messages
//! - The sentiment result type returned by classification engines
//! - Error types and result handling

pub mod error;
pub mod types;

pub use error::{EngineFailureKind, Error, Result};
pub use types::{LanguageTag, ModelId, SentimentResult};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{EngineFailureKind, Error, Result};
    pub use crate::types::{LanguageTag, ModelId, SentimentResult};
}
