//! Language resolution

use crate::timeout::with_timeout;
use async_trait::async_trait;
use polysent_core::{Error, LanguageTag, Result};
use std::time::Duration;
use tracing::{debug, warn};

/// External language detector
#[async_trait]
pub trait LanguageDetector: Send + Sync {
    /// Detect the language of a single message
    async fn detect(&self, text: &str) -> Result<LanguageTag>;
}

/// Adapter turning a synchronous closure into a [`LanguageDetector`]
pub struct FnDetector<F> {
    detect: F,
}

impl<F> FnDetector<F>
where
    F: Fn(&str) -> Result<LanguageTag> + Send + Sync,
{
    /// Wrap a detection closure
    pub fn new(detect: F) -> Self {
        Self { detect }
    }
}

#[async_trait]
impl<F> LanguageDetector for FnDetector<F>
where
    F: Fn(&str) -> Result<LanguageTag> + Send + Sync,
{
    async fn detect(&self, text: &str) -> Result<LanguageTag> {
        (self.detect)(text)
    }
}

/// Pair every message with its detected language, in input order.
///
/// A detector error or timeout for one message tags that message `Unknown`;
/// it never fails the batch.
pub async fn resolve<S>(
    detector: &dyn LanguageDetector,
    messages: &[S],
    timeout: Option<Duration>,
) -> Vec<(String, LanguageTag)>
where
    S: AsRef<str> + Sync,
{
    let mut pairs = Vec::with_capacity(messages.len());
    let mut failures = 0usize;

    for (index, message) in messages.iter().enumerate() {
        let text = message.as_ref();
        let detected = with_timeout(timeout, detector.detect(text), |limit| {
            Error::detection(format!("timed out after {:?}", limit))
        })
        .await;

        let tag = match detected {
            Ok(tag) => tag,
            Err(e) => {
                failures += 1;
                warn!(index, error = %e, "Language detection failed, treating message as unknown");
                LanguageTag::Unknown
            }
        };

        pairs.push((text.to_string(), tag));
    }

    debug!(messages = messages.len(), failures, "Resolved message languages");
    pairs
}
