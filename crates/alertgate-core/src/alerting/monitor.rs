//! Periodic live thread count checks for managed-runtime subjects

use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::collaborators::{AgentRegistry, RemoteCallClient};
use crate::config::{AlertingConfig, ConfigProvider};
use crate::error::{Error, Result};
use crate::models::{AlertEvent, SubjectId};

use super::dispatcher::NotificationDispatcher;
use super::rules::{thread_count_alert, UNKNOWN};

/// Subjects eligible for thread count polling.
///
/// Only grows; subjects that go inactive stay listed and are skipped at poll
/// time.
#[derive(Debug, Default)]
pub struct ManagedObjectRegistry {
    subjects: DashSet<SubjectId>,
}

impl ManagedObjectRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subject. Returns `true` if it was not yet registered.
    pub fn register(&self, subject_id: SubjectId) -> bool {
        self.subjects.insert(subject_id)
    }

    /// Whether a subject is registered
    pub fn contains(&self, subject_id: SubjectId) -> bool {
        self.subjects.contains(&subject_id)
    }

    /// Number of registered subjects
    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// Registered subjects, sorted
    pub fn snapshot(&self) -> Vec<SubjectId> {
        let mut ids: Vec<_> = self.subjects.iter().map(|id| *id).collect();
        ids.sort_unstable();
        ids
    }
}

/// Polls managed-runtime subjects for their live thread count
pub struct ThreadCountMonitor {
    config: Arc<dyn ConfigProvider>,
    registry: Arc<dyn AgentRegistry>,
    remote: Arc<dyn RemoteCallClient>,
    managed: Arc<ManagedObjectRegistry>,
    dispatcher: NotificationDispatcher,
}

impl ThreadCountMonitor {
    /// Create a monitor
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        registry: Arc<dyn AgentRegistry>,
        remote: Arc<dyn RemoteCallClient>,
        managed: Arc<ManagedObjectRegistry>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            config,
            registry,
            remote,
            managed,
            dispatcher,
        }
    }

    /// Run the polling loop until `shutdown` changes
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let period = self.config.current().alerting.thread_poll_interval;

        tokio::spawn(async move {
            info!(?period, "Starting thread count monitor");

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.poll_once().await;
                    }
                    _ = shutdown.changed() => {
                        break;
                    }
                }
            }

            info!("Thread count monitor stopped");
        })
    }

    /// Check every registered, active subject once. Returns the alerts raised
    /// (already handed to the dispatcher).
    pub async fn poll_once(&self) -> Vec<AlertEvent> {
        let config = self.config.current();
        if config.alerting.thread_count_threshold == 0 {
            return Vec::new();
        }

        let subjects = self.managed.snapshot();
        debug!(count = subjects.len(), "Polling thread counts");

        let mut raised = Vec::new();
        for subject_id in subjects {
            if !self.registry.is_active(subject_id) {
                continue;
            }

            match self.poll_subject(subject_id, &config.alerting).await {
                Ok(Some(alert)) => {
                    metrics::counter!("alertgate_alerts_candidates_total").increment(1);
                    self.dispatcher.dispatch(alert.clone());
                    raised.push(alert);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(%subject_id, error = %e, "Thread count check failed");
                }
            }
        }

        raised
    }

    async fn poll_subject(
        &self,
        subject_id: SubjectId,
        config: &AlertingConfig,
    ) -> Result<Option<AlertEvent>> {
        let timeout = config.remote_call_timeout;
        let threads = tokio::time::timeout(timeout, self.remote.fetch_thread_list(subject_id))
            .await
            .map_err(|_| Error::Timeout(timeout))??;

        let name = self
            .registry
            .resolve_subject_name(subject_id)
            .unwrap_or_else(|| UNKNOWN.to_string());

        Ok(
            thread_count_alert(subject_id, &name, threads.len(), config.thread_count_threshold)
                .map(|a| a.with_subject_type(self.registry.resolve_subject_type(subject_id))),
        )
    }
}
