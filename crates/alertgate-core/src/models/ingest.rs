//! Events delivered by the monitoring pipeline

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SubjectId;

/// Counter key carrying accumulated GC time
pub const GC_TIME_COUNTER: &str = "GcTime";

/// A subject announced itself (first connect or heartbeat)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectLifecycle {
    /// Subject id
    pub subject_id: SubjectId,
    /// Display name announced by the subject
    pub subject_name: String,
    /// Category announced by the subject
    #[serde(default)]
    pub subject_type: Option<String>,
    /// Subject reported a wake-up marker (restart after sleep)
    #[serde(default)]
    pub has_wake_marker: bool,
    /// Liveness the registry held before this announcement; `None` when unknown
    #[serde(default)]
    pub was_alive_before: Option<bool>,
    /// Liveness after this announcement
    #[serde(default = "default_true")]
    pub is_alive_now: bool,
}

fn default_true() -> bool {
    true
}

/// A finished transaction trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceCompleted {
    /// Subject that executed the transaction
    pub subject_id: SubjectId,
    /// Elapsed time in milliseconds
    pub elapsed_ms: u64,
    /// When the transaction ended
    pub end_time: DateTime<Utc>,
    /// Service (endpoint) text id
    pub service_id: i32,
    /// Error text id, 0 when the transaction succeeded
    #[serde(default)]
    pub error_code: i32,
}

/// A periodic performance counter sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterSample {
    /// Name of the sampled subject
    pub subject_name: String,
    /// Realtime sample (as opposed to an aggregated one)
    #[serde(default)]
    pub is_realtime: bool,
    /// Counter values by key
    #[serde(default)]
    pub counters: HashMap<String, f64>,
}

impl CounterSample {
    /// Counter value by key
    pub fn counter(&self, key: &str) -> Option<f64> {
        self.counters.get(key).copied()
    }
}
