//! Group dispatch, engine lifecycle and result reassembly
//!
//! Each group's engine is acquired, used for exactly one `classify` call and
//! dropped before the dispatcher moves on. With `max_concurrent_engines = K`
//! at most K groups are in flight, so at most K per-group engines are alive.
//! Results are placed by original index, never by group completion order.

use crate::config::{FailurePolicy, TimeoutConfig};
use crate::engine::{Engine, EngineFactory};
use crate::grouping::{Grouping, WorkGroup};
use crate::telemetry;
use crate::timeout::with_timeout;
use crate::warm::WarmPool;
use futures::stream::{self, StreamExt};
use polysent_core::{EngineFailureKind, Error, ModelId, Result, SentimentResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where a group's engine came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineSource {
    /// Constructed for this group and released afterwards
    Loaded,
    /// Shared warm engine
    Warm,
}

/// A successfully classified group
#[derive(Debug, Clone)]
pub struct GroupOutcome {
    /// Model that classified the group
    pub model: ModelId,
    /// Original positions of the group's messages
    pub indices: Vec<usize>,
    /// Whether the engine was loaded for this group or taken from the warm pool
    pub source: EngineSource,
    /// Time from acquisition to results
    pub latency: Duration,
}

/// A group whose engine failed under the fallback policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupFailure {
    /// Model whose engine failed
    pub model: ModelId,
    /// Original positions of the group's messages
    pub indices: Vec<usize>,
    /// Stage that failed
    pub kind: EngineFailureKind,
    /// Underlying error text
    pub message: String,
}

impl GroupFailure {
    fn from_error(err: Error, model: &ModelId, indices: &[usize], default_kind: EngineFailureKind) -> Self {
        let (kind, message) = err.into_failure(default_kind);
        Self {
            model: model.clone(),
            indices: indices.to_vec(),
            kind,
            message,
        }
    }

    /// Convert back into the error surfaced under the abort policy
    pub fn into_error(self) -> Error {
        Error::Engine {
            model: self.model,
            indices: self.indices,
            kind: self.kind,
            message: self.message,
        }
    }
}

/// Per-call record of what the dispatcher did
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Successfully classified groups, in completion order
    pub groups: Vec<GroupOutcome>,

    /// Failed groups (fallback policy only)
    pub failures: Vec<GroupFailure>,

    /// Number of messages with no bound model
    pub unclassifiable: usize,

    /// Number of successful engine acquisitions
    pub acquisitions: usize,
}

impl BatchReport {
    /// Whether every group was classified
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of engines constructed for this call
    pub fn engine_loads(&self) -> usize {
        self.groups
            .iter()
            .filter(|group| group.source == EngineSource::Loaded)
            .count()
    }
}

/// Results placed by index, plus the report
#[derive(Debug, Clone, Default)]
pub struct Dispatched {
    /// Result for each original position, in no particular order
    pub placed: Vec<(usize, SentimentResult)>,
    /// What the dispatcher did
    pub report: BatchReport,
}

enum GroupRun {
    Classified {
        outcome: GroupOutcome,
        placed: Vec<(usize, SentimentResult)>,
    },
    Failed {
        failure: GroupFailure,
        acquired: bool,
    },
}

/// Runs work groups against their engines
#[derive(Clone)]
pub struct Dispatcher {
    factory: Arc<dyn EngineFactory>,
    warm: WarmPool,
    policy: FailurePolicy,
    timeouts: TimeoutConfig,
    max_concurrent_engines: usize,
}

impl Dispatcher {
    /// Create a dispatcher that runs one group at a time and aborts on failure
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            warm: WarmPool::disabled(),
            policy: FailurePolicy::Abort,
            timeouts: TimeoutConfig::default(),
            max_concurrent_engines: 1,
        }
    }

    /// Serve the warm pool's model from `warm` instead of loading it
    pub fn with_warm_pool(mut self, warm: WarmPool) -> Self {
        self.warm = warm;
        self
    }

    /// Set how a failing group affects the call
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set load and classify time limits
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the number of groups processed concurrently (minimum 1)
    pub fn with_max_concurrent_engines(mut self, max: usize) -> Self {
        self.max_concurrent_engines = max.max(1);
        self
    }

    pub fn warm_pool(&self) -> &WarmPool {
        &self.warm
    }

    pub fn factory(&self) -> &Arc<dyn EngineFactory> {
        &self.factory
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Classify every group and assign sentinels to unclassifiable positions.
    ///
    /// Under [`FailurePolicy::Abort`] the first failing group fails the call
    /// and groups still in flight are dropped along with their engines.
    pub async fn dispatch(&self, grouping: Grouping) -> Result<Dispatched> {
        let Grouping {
            groups,
            unclassifiable,
        } = grouping;

        let mut out = Dispatched::default();
        out.report.unclassifiable = unclassifiable.len();
        out.placed.extend(
            unclassifiable
                .into_iter()
                .map(|index| (index, SentimentResult::none())),
        );

        let mut runs = stream::iter(groups.into_iter().filter(|group| !group.is_empty()))
            .map(|group| self.run_group(group))
            .buffer_unordered(self.max_concurrent_engines);

        while let Some(run) = runs.next().await {
            match run {
                GroupRun::Classified { outcome, placed } => {
                    out.report.acquisitions += 1;
                    out.placed.extend(placed);
                    out.report.groups.push(outcome);
                }
                GroupRun::Failed { failure, acquired } => {
                    telemetry::record_engine_failure(&failure.model, failure.kind);
                    if self.policy == FailurePolicy::Abort {
                        return Err(failure.into_error());
                    }

                    warn!(
                        model = %failure.model,
                        kind = %failure.kind,
                        items = failure.indices.len(),
                        error = %failure.message,
                        "Engine failed, marking group with error sentinel"
                    );
                    if acquired {
                        out.report.acquisitions += 1;
                    }
                    out.placed.extend(
                        failure
                            .indices
                            .iter()
                            .map(|&index| (index, SentimentResult::error())),
                    );
                    out.report.failures.push(failure);
                }
            }
        }

        Ok(out)
    }

    async fn acquire(&self, model: &ModelId) -> Result<(Arc<dyn Engine>, EngineSource)> {
        if self.warm.serves(model) {
            let warm = with_timeout(
                self.timeouts.load(),
                self.warm.get_or_load(self.factory.as_ref()),
                load_timeout,
            )
            .await?;
            return Ok((warm, EngineSource::Warm));
        }

        info!(model = %model, "Loading engine");
        let engine = with_timeout(self.timeouts.load(), self.factory.load(model), load_timeout).await?;
        telemetry::record_engine_load(model);
        Ok((Arc::from(engine), EngineSource::Loaded))
    }

    async fn run_group(&self, group: WorkGroup) -> GroupRun {
        let start = Instant::now();
        let model = group.model().clone();
        let indices = group.indices();
        let texts = group.texts();

        let (engine, source) = match self.acquire(&model).await {
            Ok(acquired) => acquired,
            Err(e) => {
                return GroupRun::Failed {
                    failure: GroupFailure::from_error(e, &model, &indices, EngineFailureKind::Load),
                    acquired: false,
                };
            }
        };

        debug!(model = %model, engine = engine.name(), items = texts.len(), "Classifying group");
        let classified = with_timeout(self.timeouts.classify(), engine.classify(&texts), |limit| {
            Error::engine(
                EngineFailureKind::Timeout,
                format!("classification timed out after {:?}", limit),
            )
        })
        .await;

        drop(engine);
        if source == EngineSource::Loaded {
            info!(model = %model, "Released engine");
        }

        let results = match classified.and_then(|results| check_len(results, texts.len())) {
            Ok(results) => results,
            Err(e) => {
                return GroupRun::Failed {
                    failure: GroupFailure::from_error(e, &model, &indices, EngineFailureKind::Invocation),
                    acquired: true,
                };
            }
        };

        let latency = start.elapsed();
        telemetry::record_group_latency(&model, latency);

        let placed = indices.iter().copied().zip(results).collect();
        GroupRun::Classified {
            outcome: GroupOutcome {
                model,
                indices,
                source,
                latency,
            },
            placed,
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("warm", &self.warm)
            .field("policy", &self.policy)
            .field("timeouts", &self.timeouts)
            .field("max_concurrent_engines", &self.max_concurrent_engines)
            .finish()
    }
}

fn load_timeout(limit: Duration) -> Error {
    Error::engine(
        EngineFailureKind::Timeout,
        format!("engine load timed out after {:?}", limit),
    )
}

fn check_len(results: Vec<SentimentResult>, expected: usize) -> Result<Vec<SentimentResult>> {
    if results.len() != expected {
        return Err(Error::engine_invocation(format!(
            "engine returned {} results for {} texts",
            results.len(),
            expected
        )));
    }
    Ok(results)
}

/// Place results by original index into a sequence of length `len`.
///
/// Every position must receive exactly one result. Labels are lowercased.
pub fn assemble(len: usize, placed: Vec<(usize, SentimentResult)>) -> Result<Vec<SentimentResult>> {
    let mut slots: Vec<Option<SentimentResult>> = vec![None; len];

    for (index, result) in placed {
        let slot = slots
            .get_mut(index)
            .ok_or_else(|| Error::internal(format!("result index {} out of range {}", index, len)))?;
        if slot.is_some() {
            return Err(Error::internal(format!("duplicate result for message {}", index)));
        }
        *slot = Some(result.normalized());
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| slot.ok_or_else(|| Error::internal(format!("no result for message {}", index))))
        .collect()
}
