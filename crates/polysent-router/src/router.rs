//! Batch sentiment router: detect, bind, group, dispatch, reassemble

use crate::binding::{ModelBinding, ModelOverrides};
use crate::config::{FailurePolicy, RouterConfig};
use crate::detector::{resolve, LanguageDetector};
use crate::dispatch::{assemble, BatchReport, Dispatched, Dispatcher};
use crate::engine::EngineFactory;
use crate::grouping::group;
use crate::telemetry;
use crate::warm::WarmPool;
use polysent_core::{Error, LanguageTag, Result, SentimentResult};
use std::sync::Arc;
use tracing::{debug, info};

/// Results of one batch call, with the dispatch report
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// One result per input message, in input order
    pub results: Vec<SentimentResult>,

    /// What the dispatcher did
    pub report: BatchReport,
}

/// Routes messages to per-language sentiment models.
///
/// Cloning is cheap; clones share the factory, detector and warm engine.
/// Per-group engines are scoped to a single call and never shared.
#[derive(Clone)]
pub struct BatchSentimentRouter {
    detector: Option<Arc<dyn LanguageDetector>>,
    base: ModelBinding,
    dispatcher: Dispatcher,
    config: RouterConfig,
}

impl BatchSentimentRouter {
    /// Create a new router builder
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Router configuration
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Base binding before per-call overrides
    pub fn base_binding(&self) -> &ModelBinding {
        &self.base
    }

    /// Effective binding for a call with `overrides`
    pub fn binding(&self, overrides: Option<&ModelOverrides>) -> ModelBinding {
        match overrides {
            Some(overrides) => self.base.merge(overrides),
            None => self.base.clone(),
        }
    }

    /// Shared warm engine pool
    pub fn warm_pool(&self) -> &WarmPool {
        self.dispatcher.warm_pool()
    }

    /// Load the warm engine now instead of on first use.
    ///
    /// Returns `false` when no warm language is configured.
    pub async fn warm_up(&self) -> Result<bool> {
        let warm = self.dispatcher.warm_pool();
        if warm.model().is_none() {
            return Ok(false);
        }
        warm.get_or_load(self.dispatcher.factory().as_ref()).await?;
        Ok(true)
    }

    /// Estimate the sentiment of each message, detecting languages first
    pub async fn sentiment<S>(
        &self,
        messages: &[S],
        overrides: Option<&ModelOverrides>,
    ) -> Result<Vec<SentimentResult>>
    where
        S: AsRef<str> + Sync,
    {
        Ok(self.sentiment_with_report(messages, overrides).await?.results)
    }

    /// Like [`sentiment`](Self::sentiment), also returning the dispatch report
    pub async fn sentiment_with_report<S>(
        &self,
        messages: &[S],
        overrides: Option<&ModelOverrides>,
    ) -> Result<BatchOutcome>
    where
        S: AsRef<str> + Sync,
    {
        let detector = self
            .detector
            .as_ref()
            .ok_or_else(|| Error::config("no language detector configured"))?;

        let pairs = resolve(detector.as_ref(), messages, self.config.timeouts.detect()).await;
        self.process_batches_with_report(&pairs, overrides).await
    }

    /// Classify messages whose languages are already known
    pub async fn process_batches(
        &self,
        messages_with_languages: &[(String, LanguageTag)],
        overrides: Option<&ModelOverrides>,
    ) -> Result<Vec<SentimentResult>> {
        Ok(self
            .process_batches_with_report(messages_with_languages, overrides)
            .await?
            .results)
    }

    /// Like [`process_batches`](Self::process_batches), also returning the report
    pub async fn process_batches_with_report(
        &self,
        messages_with_languages: &[(String, LanguageTag)],
        overrides: Option<&ModelOverrides>,
    ) -> Result<BatchOutcome> {
        let total = messages_with_languages.len();
        let binding = self.binding(overrides);
        let grouping = group(messages_with_languages, &binding);

        if grouping.total() != total {
            return Err(Error::internal(format!(
                "grouping covered {} of {} messages",
                grouping.total(),
                total
            )));
        }
        telemetry::record_batch(total, grouping.unclassifiable.len());

        let Dispatched { placed, report } = self.dispatcher.dispatch(grouping).await?;
        let results = assemble(total, placed)?;

        debug!(
            messages = total,
            groups = report.groups.len(),
            failures = report.failures.len(),
            "Batch processed"
        );

        Ok(BatchOutcome { results, report })
    }
}

impl std::fmt::Debug for BatchSentimentRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchSentimentRouter")
            .field("has_detector", &self.detector.is_some())
            .field("base", &self.base)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

/// Builder for [`BatchSentimentRouter`]
pub struct RouterBuilder {
    config: RouterConfig,
    detector: Option<Arc<dyn LanguageDetector>>,
    factory: Option<Arc<dyn EngineFactory>>,
    base: Option<ModelBinding>,
}

impl RouterBuilder {
    /// Create a new builder with the default configuration
    pub fn new() -> Self {
        Self {
            config: RouterConfig::default(),
            detector: None,
            factory: None,
            base: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the language detector used by `sentiment`
    pub fn detector(mut self, detector: Arc<dyn LanguageDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Set the engine factory
    pub fn engine_factory(mut self, factory: Arc<dyn EngineFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Use `binding` as the base instead of the configured table
    pub fn base_binding(mut self, binding: ModelBinding) -> Self {
        self.base = Some(binding);
        self
    }

    /// Add an override to the configured models
    pub fn model(mut self, tag: LanguageTag, model: impl Into<polysent_core::ModelId>) -> Self {
        self.config.models.insert(tag, model.into());
        self
    }

    /// Set the failure policy
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    /// Set how many per-group engines may be loaded at once
    pub fn max_concurrent_engines(mut self, max: usize) -> Self {
        self.config.max_concurrent_engines = max;
        self
    }

    /// Set the warm language, or `None` to disable the warm engine
    pub fn warm_language(mut self, tag: Option<LanguageTag>) -> Self {
        self.config.warm_language = tag;
        self
    }

    /// Build the router
    pub fn build(self) -> Result<BatchSentimentRouter> {
        self.config.validate()?;

        let factory = self
            .factory
            .ok_or_else(|| Error::config("an engine factory is required"))?;

        let base = match self.base {
            Some(base) => base.merge(&self.config.models),
            None => self.config.base_binding(),
        };

        let warm = match self.config.warm_language.and_then(|tag| base.get(tag)) {
            Some(model) => {
                info!(model = %model, "Warm engine enabled");
                WarmPool::new(model.clone())
            }
            None => WarmPool::disabled(),
        };

        let dispatcher = Dispatcher::new(factory)
            .with_warm_pool(warm)
            .with_policy(self.config.failure_policy)
            .with_timeouts(self.config.timeouts.clone())
            .with_max_concurrent_engines(self.config.max_concurrent_engines);

        Ok(BatchSentimentRouter {
            detector: self.detector,
            base,
            dispatcher,
            config: self.config,
        })
    }
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
