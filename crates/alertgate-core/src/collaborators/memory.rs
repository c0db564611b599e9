//! In-process collaborator implementations

use chrono::NaiveDate;
use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::models::{ObjectLifecycle, SubjectId};

use super::{AgentRegistry, RemoteCallClient, TextResolver};

#[derive(Debug, Clone)]
struct SubjectRecord {
    name: String,
    subject_type: Option<String>,
    alive: bool,
}

/// Registry kept in memory
#[derive(Default)]
pub struct MemoryRegistry {
    subjects: DashMap<SubjectId, SubjectRecord>,
    families: DashMap<String, String>,
}

impl MemoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Map an object type to its family
    pub fn set_family(&self, subject_type: impl Into<String>, family: impl Into<String>) {
        self.families.insert(subject_type.into(), family.into());
    }

    /// Insert or replace a subject
    pub fn upsert(
        &self,
        subject_id: SubjectId,
        name: impl Into<String>,
        subject_type: Option<String>,
        alive: bool,
    ) {
        self.subjects.insert(
            subject_id,
            SubjectRecord {
                name: name.into(),
                subject_type,
                alive,
            },
        );
    }

    /// Update a subject's liveness. Unknown subjects are ignored.
    pub fn set_active(&self, subject_id: SubjectId, alive: bool) {
        if let Some(mut record) = self.subjects.get_mut(&subject_id) {
            record.alive = alive;
        }
    }

    /// Record an announcement and return the liveness held before it
    pub fn observe(&self, event: &ObjectLifecycle) -> Option<bool> {
        let previous = self.subjects.get(&event.subject_id).map(|r| r.alive);
        let subject_type = event.subject_type.clone().or_else(|| {
            self.subjects
                .get(&event.subject_id)
                .and_then(|r| r.subject_type.clone())
        });
        self.upsert(
            event.subject_id,
            event.subject_name.clone(),
            subject_type,
            event.is_alive_now,
        );
        previous
    }
}

impl AgentRegistry for MemoryRegistry {
    fn resolve_subject_type(&self, subject_id: SubjectId) -> Option<String> {
        self.subjects
            .get(&subject_id)
            .and_then(|r| r.subject_type.clone())
    }

    fn resolve_subject_name(&self, subject_id: SubjectId) -> Option<String> {
        self.subjects.get(&subject_id).map(|r| r.name.clone())
    }

    fn resolve_family(&self, subject_type: &str) -> Option<String> {
        self.families.get(subject_type).map(|f| f.clone())
    }

    fn is_active(&self, subject_id: SubjectId) -> bool {
        self.subjects.get(&subject_id).is_some_and(|r| r.alive)
    }
}

/// Text dictionary kept in memory. Dates are ignored.
#[derive(Default)]
pub struct MemoryTextResolver {
    services: DashMap<i32, String>,
    errors: DashMap<i32, String>,
}

impl MemoryTextResolver {
    /// Create an empty dictionary
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service name
    pub fn insert_service(&self, service_id: i32, name: impl Into<String>) {
        self.services.insert(service_id, name.into());
    }

    /// Register an error text
    pub fn insert_error(&self, error_code: i32, text: impl Into<String>) {
        self.errors.insert(error_code, text.into());
    }
}

impl TextResolver for MemoryTextResolver {
    fn resolve_service_name(&self, _date: NaiveDate, service_id: i32) -> Option<String> {
        self.services.get(&service_id).map(|s| s.clone())
    }

    fn resolve_error_text(&self, _date: NaiveDate, error_code: i32) -> Option<String> {
        self.errors.get(&error_code).map(|s| s.clone())
    }
}

/// Thread lists pushed in ahead of time instead of fetched live
#[derive(Default)]
pub struct MemoryRemoteCall {
    threads: DashMap<SubjectId, Vec<String>>,
}

impl MemoryRemoteCall {
    /// Create an empty client
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest thread list for a subject
    pub fn set_threads(&self, subject_id: SubjectId, threads: Vec<String>) {
        self.threads.insert(subject_id, threads);
    }
}

#[async_trait::async_trait]
impl RemoteCallClient for MemoryRemoteCall {
    async fn fetch_thread_list(&self, subject_id: SubjectId) -> Result<Vec<String>> {
        self.threads
            .get(&subject_id)
            .map(|t| t.clone())
            .ok_or_else(|| Error::remote_call(subject_id, "no thread list available"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announce(id: i32, alive: bool) -> ObjectLifecycle {
        ObjectLifecycle {
            subject_id: SubjectId(id),
            subject_name: format!("/host/app-{id}"),
            subject_type: Some("tomcat".to_string()),
            has_wake_marker: false,
            was_alive_before: None,
            is_alive_now: alive,
        }
    }

    #[test]
    fn test_observe_returns_previous_liveness() {
        let registry = MemoryRegistry::new();

        assert_eq!(registry.observe(&announce(1, true)), None);
        registry.set_active(SubjectId(1), false);
        assert_eq!(registry.observe(&announce(1, true)), Some(false));
        assert_eq!(registry.observe(&announce(1, true)), Some(true));
        assert!(registry.is_active(SubjectId(1)));
        assert_eq!(
            registry.resolve_subject_type(SubjectId(1)).as_deref(),
            Some("tomcat")
        );
    }

    #[test]
    fn test_family_lookup() {
        let registry = MemoryRegistry::new();
        registry.set_family("tomcat", "javaee");
        assert_eq!(registry.resolve_family("tomcat").as_deref(), Some("javaee"));
        assert_eq!(registry.resolve_family("nginx"), None);
    }

    #[test]
    fn test_remote_call_missing_subject_is_an_error() {
        let client = MemoryRemoteCall::new();
        client.set_threads(SubjectId(7), vec!["main".to_string()]);

        let found = tokio_test::block_on(client.fetch_thread_list(SubjectId(7))).unwrap();
        assert_eq!(found.len(), 1);
        let missing = tokio_test::block_on(client.fetch_thread_list(SubjectId(8)));
        assert!(matches!(missing, Err(Error::RemoteCall { .. })));
    }
}
