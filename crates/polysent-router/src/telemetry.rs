//! Metric names and recording helpers
//!
//! Recording is a no-op unless the application installs a `metrics` recorder.

use polysent_core::{EngineFailureKind, ModelId};
use std::time::Duration;

pub const MESSAGES_TOTAL: &str = "polysent_messages_total";
pub const UNCLASSIFIABLE_TOTAL: &str = "polysent_unclassifiable_total";
pub const ENGINE_LOADS_TOTAL: &str = "polysent_engine_loads_total";
pub const ENGINE_FAILURES_TOTAL: &str = "polysent_engine_failures_total";
pub const GROUP_LATENCY_SECONDS: &str = "polysent_group_latency_seconds";

pub(crate) fn record_batch(messages: usize, unclassifiable: usize) {
    ::metrics::counter!(MESSAGES_TOTAL).increment(messages as u64);
    ::metrics::counter!(UNCLASSIFIABLE_TOTAL).increment(unclassifiable as u64);
}

pub(crate) fn record_engine_load(model: &ModelId) {
    ::metrics::counter!(ENGINE_LOADS_TOTAL, "model" => model.to_string()).increment(1);
}

pub(crate) fn record_engine_failure(model: &ModelId, kind: EngineFailureKind) {
    ::metrics::counter!(
        ENGINE_FAILURES_TOTAL,
        "model" => model.to_string(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

pub(crate) fn record_group_latency(model: &ModelId, latency: Duration) {
    ::metrics::histogram!(GROUP_LATENCY_SECONDS, "model" => model.to_string())
        .record(latency.as_secs_f64());
}
