//! Interfaces to the systems around the alert engine
//!
//! The engine only consumes these; populating the registry, storing text
//! dictionaries and talking to agents happen elsewhere. [`memory`] holds
//! in-process implementations used by the CLI and tests.

pub mod memory;

use chrono::NaiveDate;

use crate::error::Result;
use crate::models::SubjectId;

pub use memory::{MemoryRegistry, MemoryRemoteCall, MemoryTextResolver};

/// Directory of monitored subjects
pub trait AgentRegistry: Send + Sync {
    /// Category (object type) of a subject
    fn resolve_subject_type(&self, subject_id: SubjectId) -> Option<String>;

    /// Display name of a subject
    fn resolve_subject_name(&self, subject_id: SubjectId) -> Option<String>;

    /// Family an object type belongs to (e.g. `javaee`)
    fn resolve_family(&self, subject_type: &str) -> Option<String>;

    /// Whether the subject is currently connected
    fn is_active(&self, subject_id: SubjectId) -> bool;
}

/// Dictionary lookups for ids carried by traces
pub trait TextResolver: Send + Sync {
    /// Service (endpoint) name recorded on `date`
    fn resolve_service_name(&self, date: NaiveDate, service_id: i32) -> Option<String>;

    /// Error text recorded on `date`
    fn resolve_error_text(&self, date: NaiveDate, error_code: i32) -> Option<String>;
}

/// Calls into a running subject
#[async_trait::async_trait]
pub trait RemoteCallClient: Send + Sync {
    /// Names of the subject's live threads
    async fn fetch_thread_list(&self, subject_id: SubjectId) -> Result<Vec<String>>;
}
