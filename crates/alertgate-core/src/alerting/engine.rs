//! Event intake and wiring of rules, suppression and delivery

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::collaborators::{AgentRegistry, RemoteCallClient, TextResolver};
use crate::config::ConfigProvider;
use crate::error::{Error, Result};
use crate::models::{AlertEvent, CounterSample, ObjectLifecycle, TraceCompleted};
use crate::transport::Transport;

use super::dispatcher::NotificationDispatcher;
use super::monitor::{ManagedObjectRegistry, ThreadCountMonitor};
use super::rules;
use super::suppression::SuppressionFilter;

static PROCESS_STATE: Lazy<SharedAlertState> = Lazy::new(SharedAlertState::new);

/// State shared by every engine built from it: the duplicate history, the
/// managed-runtime subject list, and the claim on the thread count poller.
#[derive(Clone, Default)]
pub struct SharedAlertState {
    filter: SuppressionFilter,
    managed: Arc<ManagedObjectRegistry>,
    monitor_claimed: Arc<AtomicBool>,
}

impl SharedAlertState {
    /// Fresh, unshared state
    pub fn new() -> Self {
        Self::default()
    }

    /// The state used by [`AlertEngine::new`], one per process
    pub fn process() -> Self {
        PROCESS_STATE.clone()
    }

    /// Suppression filter and its history
    pub fn filter(&self) -> &SuppressionFilter {
        &self.filter
    }

    /// Subjects watched by the thread count monitor
    pub fn managed_objects(&self) -> &Arc<ManagedObjectRegistry> {
        &self.managed
    }

    /// Whether a started engine currently owns the thread count poller
    pub fn monitor_running(&self) -> bool {
        self.monitor_claimed.load(Ordering::Acquire)
    }

    fn claim_monitor(&self) -> bool {
        self.monitor_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Entry point for monitoring events.
///
/// The `on_*` methods are synchronous and safe to call from many threads at
/// once; they evaluate rules in place and hand candidates to the dispatcher
/// queue without waiting on I/O. Background work (delivery loop and thread
/// count monitor) runs only between [`AlertEngine::start`] and
/// [`EngineHandle::shutdown`].
///
/// Engines built from the same [`SharedAlertState`] suppress each other's
/// duplicates, and only one of them runs the thread count poller at a time.
pub struct AlertEngine {
    config: Arc<dyn ConfigProvider>,
    registry: Arc<dyn AgentRegistry>,
    texts: Arc<dyn TextResolver>,
    state: SharedAlertState,
    dispatcher: NotificationDispatcher,
    monitor: Arc<ThreadCountMonitor>,
    started: Mutex<bool>,
}

impl AlertEngine {
    /// Wire an engine from its collaborators, on the process-wide state
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        registry: Arc<dyn AgentRegistry>,
        texts: Arc<dyn TextResolver>,
        remote: Arc<dyn RemoteCallClient>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::with_state(
            config,
            registry,
            texts,
            remote,
            transport,
            SharedAlertState::process(),
        )
    }

    /// Wire an engine on explicitly provided shared state
    pub fn with_state(
        config: Arc<dyn ConfigProvider>,
        registry: Arc<dyn AgentRegistry>,
        texts: Arc<dyn TextResolver>,
        remote: Arc<dyn RemoteCallClient>,
        transport: Arc<dyn Transport>,
        state: SharedAlertState,
    ) -> Self {
        let dispatcher = NotificationDispatcher::new(
            config.clone(),
            registry.clone(),
            transport,
            state.filter.clone(),
        );
        let monitor = Arc::new(ThreadCountMonitor::new(
            config.clone(),
            registry.clone(),
            remote,
            state.managed.clone(),
            dispatcher.clone(),
        ));

        Self {
            config,
            registry,
            texts,
            state,
            dispatcher,
            monitor,
            started: Mutex::new(false),
        }
    }

    /// Start the delivery loop, and the thread count monitor unless another
    /// engine on the same state already runs it. Must be called from within
    /// a tokio runtime, and only once.
    pub fn start(&self) -> Result<EngineHandle> {
        let mut started = self.started.lock();
        if *started {
            return Err(Error::internal("alert engine already started"));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = self
            .dispatcher
            .start(shutdown_rx.clone())
            .ok_or_else(|| Error::internal("dispatcher already started"))?;
        let mut tasks = vec![dispatcher];

        let monitor_claim = if self.state.claim_monitor() {
            tasks.push(Arc::clone(&self.monitor).start(shutdown_rx));
            Some(Arc::clone(&self.state.monitor_claimed))
        } else {
            warn!("Thread count monitor already running, not starting another");
            None
        };

        *started = true;
        info!("Alert engine started");

        Ok(EngineHandle {
            shutdown: shutdown_tx,
            tasks,
            monitor_claim,
        })
    }

    /// A subject connected or announced itself
    pub fn on_object_lifecycle(&self, event: &ObjectLifecycle) {
        let Some(mut alert) = rules::lifecycle_alert(event) else {
            return;
        };
        if alert.subject_type.is_none() {
            alert.subject_type = self.registry.resolve_subject_type(event.subject_id);
        }
        self.submit(alert);
    }

    /// A transaction finished
    pub fn on_trace_completed(&self, trace: &TraceCompleted) {
        let config = self.config.current();
        let alerts = rules::evaluate_trace(
            trace,
            &config.alerting,
            self.registry.as_ref(),
            self.texts.as_ref(),
        );
        for alert in alerts {
            self.submit(alert);
        }
    }

    /// A performance counter sample arrived
    pub fn on_counter_sample(&self, sample: &CounterSample) {
        let config = self.config.current();
        if let Some(alert) = rules::evaluate_counter(
            sample,
            &config.alerting,
            self.registry.as_ref(),
            &self.state.managed,
        ) {
            self.submit(alert);
        }
    }

    /// An alert raised elsewhere (e.g. the registry reporting `INACTIVE_OBJECT`)
    pub fn on_external_alert(&self, alert: AlertEvent) {
        self.submit(alert);
    }

    /// Subjects watched by the thread count monitor
    pub fn managed_objects(&self) -> &Arc<ManagedObjectRegistry> {
        &self.state.managed
    }

    /// Dispatcher shared by all intake paths
    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    fn submit(&self, alert: AlertEvent) {
        metrics::counter!("alertgate_alerts_candidates_total").increment(1);
        debug!(
            alert_id = %alert.id,
            subject_id = %alert.subject_id,
            level = %alert.level,
            title = %alert.title,
            "Alert candidate"
        );
        self.dispatcher.dispatch(alert);
    }
}

/// Running background tasks of a started engine
pub struct EngineHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    monitor_claim: Option<Arc<AtomicBool>>,
}

impl EngineHandle {
    /// Stop the monitor and the delivery loop. Alerts already queued are
    /// still delivered before this returns.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task ended abnormally");
            }
        }
        if let Some(claim) = self.monitor_claim {
            claim.store(false, Ordering::Release);
        }
        info!("Alert engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{MemoryRegistry, MemoryRemoteCall, MemoryTextResolver};
    use crate::config::{Config, LiveConfig};
    use crate::models::{AlertLevel, SubjectId, GC_TIME_COUNTER};
    use crate::transport::testing::RecordingTransport;
    use crate::transport::Notification;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        engine: Arc<AlertEngine>,
        registry: Arc<MemoryRegistry>,
        texts: Arc<MemoryTextResolver>,
        transport: Arc<RecordingTransport>,
        sent: mpsc::UnboundedReceiver<Notification>,
    }

    fn fixture(configure: impl FnOnce(&mut Config)) -> Fixture {
        fixture_on(SharedAlertState::new(), configure)
    }

    fn fixture_on(state: SharedAlertState, configure: impl FnOnce(&mut Config)) -> Fixture {
        let mut config = Config::default();
        config.alerting.email_alert_enabled = true;
        config.email.to_address = Some("ops@example.com".to_string());
        configure(&mut config);

        let registry = Arc::new(MemoryRegistry::new());
        let texts = Arc::new(MemoryTextResolver::new());
        let (transport, sent) = RecordingTransport::new(false);
        let transport = Arc::new(transport);

        let engine = Arc::new(AlertEngine::with_state(
            Arc::new(LiveConfig::new(config)),
            registry.clone(),
            texts.clone(),
            Arc::new(MemoryRemoteCall::new()),
            transport.clone(),
            state,
        ));

        Fixture {
            engine,
            registry,
            texts,
            transport,
            sent,
        }
    }

    async fn next_sent(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Option<Notification> {
        tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .ok()
            .flatten()
    }

    fn new_subject(id: i32) -> ObjectLifecycle {
        ObjectLifecycle {
            subject_id: SubjectId(id),
            subject_name: "/host/tomcat1".to_string(),
            subject_type: None,
            has_wake_marker: false,
            was_alive_before: None,
            is_alive_now: true,
        }
    }

    #[tokio::test]
    async fn test_start_twice_is_refused() {
        let f = fixture(|_| {});
        let handle = f.engine.start().unwrap();
        assert!(f.engine.start().is_err());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_new_subject_is_announced_once() {
        let mut f = fixture(|_| {});
        let handle = f.engine.start().unwrap();

        f.engine.on_object_lifecycle(&new_subject(1));
        let sent = next_sent(&mut f.sent).await.unwrap();
        assert_eq!(sent.title, rules::ACTIVATED_TITLE);
        assert_eq!(sent.level, AlertLevel::Info);
        // name recovered from the message, type falls back
        assert_eq!(sent.subject, "[INFO] UNKNOWN(/host/tomcat1) : An object has been activated.");

        let again = ObjectLifecycle {
            was_alive_before: Some(true),
            ..new_subject(1)
        };
        f.engine.on_object_lifecycle(&again);
        assert!(next_sent(&mut f.sent).await.is_none());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_gc_sample_flows_to_transport_and_watch_list() {
        let mut f = fixture(|c| c.alerting.gc_time_threshold_ms = 3000);
        let name = "/host/tomcat1";
        let id = SubjectId::from_name(name);
        f.registry.upsert(id, name, Some("tomcat".to_string()), true);
        f.registry.set_family("tomcat", "javaee");
        let handle = f.engine.start().unwrap();

        f.engine.on_counter_sample(&CounterSample {
            subject_name: name.to_string(),
            is_realtime: true,
            counters: HashMap::from([(GC_TIME_COUNTER.to_string(), 5000.0)]),
        });

        let sent = next_sent(&mut f.sent).await.unwrap();
        assert_eq!(sent.level, AlertLevel::Warn);
        assert!(sent.title.contains("5000") && sent.title.contains("3000"));
        assert!(sent.subject.starts_with("[WARN] TOMCAT(/host/tomcat1)"));
        assert!(f.engine.managed_objects().contains(id));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_ignored_trace_errors_are_not_sent() {
        let mut f = fixture(|c| {
            c.alerting.ignore_title_patterns = "xlog*".to_string();
            c.alerting.elapsed_time_threshold_ms = 1000;
        });
        f.texts.insert_service(77, "/orders");
        let handle = f.engine.start().unwrap();

        f.engine.on_trace_completed(&TraceCompleted {
            subject_id: SubjectId(1),
            elapsed_ms: 2000,
            end_time: Utc::now(),
            service_id: 77,
            error_code: 42,
        });

        // only the latency warning survives
        let sent = next_sent(&mut f.sent).await.unwrap();
        assert_eq!(sent.level, AlertLevel::Warn);
        assert!(next_sent(&mut f.sent).await.is_none());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_inactive_notice_is_rewritten_before_sending() {
        let mut f = fixture(|_| {});
        f.registry.upsert(SubjectId(5), "/host/tomcat5", Some("tomcat".to_string()), false);
        let handle = f.engine.start().unwrap();

        f.engine.on_external_alert(AlertEvent::new(
            AlertLevel::Fatal,
            SubjectId(5),
            crate::alerting::INACTIVE_OBJECT_TITLE,
            "/host/tomcat5 is not running. OBJECT",
        ));

        let sent = next_sent(&mut f.sent).await.unwrap();
        assert_eq!(
            sent.subject,
            "[FATAL] TOMCAT(/host/tomcat5) : An object has been inactivated."
        );
        assert_eq!(sent.message, "/host/tomcat5 is not running.");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_delivers_queued_alerts() {
        let f = fixture(|_| {});
        let handle = f.engine.start().unwrap();

        for id in 0..20 {
            f.engine.on_external_alert(AlertEvent::new(
                AlertLevel::Warn,
                SubjectId(id),
                "Queue depth",
                "backlog growing",
            ));
        }
        handle.shutdown().await;

        assert_eq!(f.transport.sent().len(), 20);
    }

    #[tokio::test]
    async fn test_engines_on_shared_state_suppress_each_others_duplicates() {
        let state = SharedAlertState::new();
        let dedup = |c: &mut Config| c.alerting.ignore_continuous_duplicates = true;
        let mut first = fixture_on(state.clone(), dedup);
        let mut second = fixture_on(state.clone(), dedup);

        let first_handle = first.engine.start().unwrap();
        let second_handle = second.engine.start().unwrap();
        // one poller for both engines
        assert_eq!(first_handle.tasks.len(), 2);
        assert_eq!(second_handle.tasks.len(), 1);
        assert!(state.monitor_running());

        let alert = || AlertEvent::new(AlertLevel::Warn, SubjectId(3), "GC", "slow");
        first.engine.on_external_alert(alert());
        assert!(next_sent(&mut first.sent).await.is_some());

        second.engine.on_external_alert(alert());
        assert!(next_sent(&mut second.sent).await.is_none());
        assert_eq!(state.filter().state().last_sent().unwrap().subject_id, SubjectId(3));

        second_handle.shutdown().await;
        assert!(state.monitor_running());
        first_handle.shutdown().await;
        assert!(!state.monitor_running());
    }

    #[test]
    fn test_process_state_is_shared() {
        let a = SharedAlertState::process();
        let b = SharedAlertState::process();
        assert!(Arc::ptr_eq(a.filter().state(), b.filter().state()));
        assert!(Arc::ptr_eq(a.managed_objects(), b.managed_objects()));
        assert!(!Arc::ptr_eq(
            SharedAlertState::new().filter().state(),
            a.filter().state()
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicates_are_sent_once() {
        let mut f = fixture(|c| {
            c.alerting.ignore_continuous_duplicates = true;
            c.alerting.elapsed_time_threshold_ms = 10;
        });
        let handle = f.engine.start().unwrap();

        let threads: Vec<_> = (0..16)
            .map(|_| {
                let engine = Arc::clone(&f.engine);
                std::thread::spawn(move || {
                    engine.on_trace_completed(&TraceCompleted {
                        subject_id: SubjectId(9),
                        elapsed_ms: 500,
                        end_time: Utc::now(),
                        service_id: 1,
                        error_code: 0,
                    });
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert!(next_sent(&mut f.sent).await.is_some());
        assert!(next_sent(&mut f.sent).await.is_none());
        assert_eq!(f.transport.sent().len(), 1);

        handle.shutdown().await;
    }
}
