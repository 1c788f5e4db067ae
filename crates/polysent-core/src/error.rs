//! Error types for polysent

use crate::types::ModelId;
use std::fmt;

/// Result type alias using polysent's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Stage at which a classification engine failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineFailureKind {
    /// The engine could not be constructed
    Load,
    /// The engine failed while classifying a batch
    Invocation,
    /// Loading or classifying exceeded the configured timeout
    Timeout,
}

impl EngineFailureKind {
    /// Short lowercase name, used as a metrics label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Invocation => "invocation",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for EngineFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error type for polysent operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Language detection failed for a single message
    #[error("detection error: {0}")]
    Detection(String),

    /// A classification engine failed for one model's group
    #[error("engine {kind} failure for model '{model}' ({} messages): {message}", indices.len())]
    Engine {
        /// Model whose group failed
        model: ModelId,
        /// Original positions of the messages in the failed group
        indices: Vec<usize>,
        /// Stage of the failure
        kind: EngineFailureKind,
        /// Underlying failure description
        message: String,
    },

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new detection error
    pub fn detection(msg: impl Into<String>) -> Self {
        Self::Detection(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an engine error with no group attribution yet.
    ///
    /// Engines and factories return these; the dispatcher fills in the model
    /// and indices with [`Error::attribute`].
    pub fn engine(kind: EngineFailureKind, msg: impl Into<String>) -> Self {
        Self::Engine {
            model: ModelId::default(),
            indices: Vec::new(),
            kind,
            message: msg.into(),
        }
    }

    /// Create an engine load error
    pub fn engine_load(msg: impl Into<String>) -> Self {
        Self::engine(EngineFailureKind::Load, msg)
    }

    /// Create an engine invocation error
    pub fn engine_invocation(msg: impl Into<String>) -> Self {
        Self::engine(EngineFailureKind::Invocation, msg)
    }

    /// Attribute this error to a model group.
    ///
    /// Engine errors keep their kind; any other error becomes a failure of
    /// `default_kind`.
    pub fn attribute(self, model: &ModelId, indices: &[usize], default_kind: EngineFailureKind) -> Self {
        let (kind, message) = self.into_failure(default_kind);
        Self::Engine {
            model: model.clone(),
            indices: indices.to_vec(),
            kind,
            message,
        }
    }

    /// Split into a failure kind and message.
    ///
    /// Engine errors keep their kind; any other error is reported as
    /// `default_kind` with its display text.
    pub fn into_failure(self, default_kind: EngineFailureKind) -> (EngineFailureKind, String) {
        match self {
            Self::Engine { kind, message, .. } => (kind, message),
            other => (default_kind, other.to_string()),
        }
    }

    /// Failure kind, if this is an engine error
    pub fn engine_kind(&self) -> Option<EngineFailureKind> {
        match self {
            Self::Engine { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Original positions affected by this error, if it is an engine error
    pub fn affected_indices(&self) -> &[usize] {
        match self {
            Self::Engine { indices, .. } => indices,
            _ => &[],
        }
    }
}
