//! Asynchronous, best-effort alert delivery
//!
//! [`NotificationDispatcher::dispatch`] only enqueues, so callers never wait on
//! I/O. A single loop drains the queue and runs each delivery on its own task,
//! bounded by `dispatch.max_concurrent_sends`. Deliveries are attempted once:
//! failures are logged and dropped.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::collaborators::AgentRegistry;
use crate::config::{Config, ConfigProvider};
use crate::error::Error;
use crate::models::AlertEvent;
use crate::transport::{Notification, Transport};

use super::rules::UNKNOWN;
use super::suppression::{Suppressed, SuppressionFilter};

/// System title marking a subject that stopped reporting
pub const INACTIVE_OBJECT_TITLE: &str = "INACTIVE_OBJECT";

/// Display title replacing [`INACTIVE_OBJECT_TITLE`]
pub const INACTIVATED_TITLE: &str = "An object has been inactivated.";

/// Upper bound for `dispatch.max_concurrent_sends`; every permit must fit
/// one `acquire_many` call at shutdown
const MAX_WORKERS: usize = if Semaphore::MAX_PERMITS < u32::MAX as usize {
    Semaphore::MAX_PERMITS
} else {
    u32::MAX as usize
};

/// Alert with its display fields resolved
#[derive(Debug, Clone)]
pub struct PreparedAlert {
    /// Original alert
    pub event: AlertEvent,
    /// Subject display name
    pub name: String,
    /// Subject type
    pub subject_type: String,
    /// Display title
    pub title: String,
    /// Display message
    pub message: String,
}

/// What happened to one alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered and recorded
    Sent,
    /// `email_alert_enabled` is off
    Disabled,
    /// Level below `min_alert_level`
    BelowMinLevel,
    /// Dropped by a suppression filter
    Suppressed(Suppressed),
    /// Delivery failed; nothing recorded
    Failed(String),
}

/// Extract a subject name from a lifecycle message.
///
/// Messages are `"<name> is connected."` or `"<name> is reconnected."`. The
/// name is the text before `connected`, minus the 4-byte `" is "` or the
/// 6-byte `" is re"`. This relies on the exact message shape; if the name
/// itself contains `connected` the cut lands in the wrong place.
pub fn lifecycle_message_name(message: &str) -> Option<&str> {
    if !message.ends_with("connected.") {
        return None;
    }

    let idx = message.find("connected")?;
    let cut = if message.contains("reconnected") {
        idx.checked_sub(6)?
    } else {
        idx.checked_sub(4)?
    };

    message.get(..cut)
}

/// Replace the system title of inactive-subject alerts and drop the trailing
/// `OBJECT` token from their message
pub fn rewrite_inactive(title: &str, message: &str) -> (String, String) {
    if title != INACTIVE_OBJECT_TITLE {
        return (title.to_string(), message.to_string());
    }

    let shortened = message
        .find("OBJECT")
        .and_then(|idx| idx.checked_sub(1))
        .and_then(|cut| message.get(..cut))
        .unwrap_or(message);

    (INACTIVATED_TITLE.to_string(), shortened.to_string())
}

/// Resolve display name and type, and apply the inactive rewrite
pub fn prepare(event: AlertEvent, registry: &dyn AgentRegistry) -> PreparedAlert {
    let name = registry
        .resolve_subject_name(event.subject_id)
        .or_else(|| lifecycle_message_name(&event.message).map(String::from))
        .unwrap_or_else(|| UNKNOWN.to_string());

    let subject_type = event
        .subject_type
        .clone()
        .or_else(|| registry.resolve_subject_type(event.subject_id))
        .unwrap_or_else(|| UNKNOWN.to_string());

    let (title, message) = rewrite_inactive(&event.title, &event.message);

    PreparedAlert {
        event,
        name,
        subject_type,
        title,
        message,
    }
}

/// Render the subject line and body and address the notification
pub fn render_notification(alert: &PreparedAlert, config: &Config) -> Notification {
    let level = alert.event.level;
    let subject_type = alert.subject_type.to_uppercase();

    let subject = format!("[{level}] {subject_type}({}) : {}", alert.name, alert.title);
    let body = format!(
        "[Type] : {subject_type}\n\
         [Name] : {}\n\
         [Level] : {level}\n\
         [Title] : {}\n\
         [Message] : {}",
        alert.name, alert.title, alert.message
    );

    Notification {
        alert_id: alert.event.id,
        level,
        subject_id: alert.event.subject_id,
        subject_type: alert.subject_type.clone(),
        name: alert.name.clone(),
        title: alert.title.clone(),
        message: alert.message.clone(),
        triggered_at: alert.event.timestamp,
        subject,
        body,
        recipients: config.email.recipients(),
        cc_recipients: config.email.cc_recipients(),
    }
}

fn send_blocked(event: &AlertEvent, config: &Config) -> Option<DispatchOutcome> {
    if !config.alerting.email_alert_enabled {
        return Some(DispatchOutcome::Disabled);
    }
    if event.level < config.alerting.min_level() {
        return Some(DispatchOutcome::BelowMinLevel);
    }
    None
}

struct DispatchContext {
    config: Arc<dyn ConfigProvider>,
    registry: Arc<dyn AgentRegistry>,
    transport: Arc<dyn Transport>,
    filter: SuppressionFilter,
}

impl DispatchContext {
    async fn deliver(&self, event: AlertEvent) -> DispatchOutcome {
        let config = self.config.current();

        if let Some(outcome) = send_blocked(&event, &config) {
            return outcome;
        }

        let alert = prepare(event, self.registry.as_ref());

        let reservation = match self.filter.admit(&alert, &config.alerting, Utc::now()) {
            Ok(reservation) => reservation,
            Err(reason) => {
                metrics::counter!("alertgate_alerts_suppressed_total", "reason" => reason.as_str())
                    .increment(1);
                debug!(
                    alert_id = %alert.event.id,
                    subject_id = %alert.event.subject_id,
                    title = %alert.event.title,
                    %reason,
                    "Alert suppressed"
                );
                return DispatchOutcome::Suppressed(reason);
            }
        };

        let notification = render_notification(&alert, &config);
        let timeout = config.email.send_timeout;

        let result = match tokio::time::timeout(
            timeout,
            self.transport.send(&config, &notification),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(timeout)),
        };

        match result {
            Ok(()) => {
                reservation.commit(Utc::now());
                metrics::counter!("alertgate_alerts_dispatched_total").increment(1);
                if config.alerting.debug_logging {
                    info!(
                        alert_id = %alert.event.id,
                        recipients = ?notification.recipients,
                        "Alert sent"
                    );
                } else {
                    debug!(
                        alert_id = %alert.event.id,
                        recipients = ?notification.recipients,
                        "Alert sent"
                    );
                }
                DispatchOutcome::Sent
            }
            Err(e) => {
                drop(reservation);
                metrics::counter!("alertgate_alerts_failed_total").increment(1);
                warn!(
                    alert_id = %alert.event.id,
                    transport = self.transport.name(),
                    error = %e,
                    "Alert delivery failed"
                );
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Queue-backed dispatcher shared by the engine and the thread monitor
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<AlertEvent>,
    rx: Arc<Mutex<Option<mpsc::Receiver<AlertEvent>>>>,
    ctx: Arc<DispatchContext>,
}

impl NotificationDispatcher {
    /// Create a dispatcher. Queue capacity is fixed from the config at creation.
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        registry: Arc<dyn AgentRegistry>,
        transport: Arc<dyn Transport>,
        filter: SuppressionFilter,
    ) -> Self {
        let capacity = config.current().dispatch.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);

        Self {
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
            ctx: Arc::new(DispatchContext {
                config,
                registry,
                transport,
                filter,
            }),
        }
    }

    /// Suppression filter (and its history) used by this dispatcher
    pub fn filter(&self) -> &SuppressionFilter {
        &self.ctx.filter
    }

    /// Queue an alert for delivery. Never blocks; drops the alert when
    /// sending is off, the level is too low, or the queue is full.
    pub fn dispatch(&self, event: AlertEvent) {
        let config = self.ctx.config.current();
        if send_blocked(&event, &config).is_some() {
            return;
        }

        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                metrics::counter!("alertgate_alerts_dropped_total").increment(1);
                warn!(
                    alert_id = %event.id,
                    title = %event.title,
                    "Dispatch queue full, dropping alert"
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!(alert_id = %event.id, "Dispatcher stopped, dropping alert");
            }
        }
    }

    /// Deliver one alert now, bypassing the queue
    pub async fn deliver(&self, event: AlertEvent) -> DispatchOutcome {
        self.ctx.deliver(event).await
    }

    /// Start the delivery loop. Returns `None` if already started.
    ///
    /// On shutdown the queue is closed to new alerts, whatever is already
    /// queued is still delivered, and the task ends once every send finished.
    pub fn start(&self, mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        let mut rx = self.rx.lock().take()?;

        let workers = self
            .ctx
            .config
            .current()
            .dispatch
            .max_concurrent_sends
            .clamp(1, MAX_WORKERS);
        let permits = Arc::new(Semaphore::new(workers));
        let ctx = Arc::clone(&self.ctx);

        info!(workers, "Dispatcher started");

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        spawn_delivery(&ctx, &permits, event).await;
                    }
                    _ = shutdown.changed() => {
                        rx.close();
                        let mut drained = 0usize;
                        while let Some(event) = rx.recv().await {
                            spawn_delivery(&ctx, &permits, event).await;
                            drained += 1;
                        }
                        if drained > 0 {
                            info!(drained, "Delivering alerts queued before shutdown");
                        }
                        break;
                    }
                }
            }

            // each in-flight send is bounded by the send timeout
            let _ = permits
                .acquire_many(u32::try_from(workers).unwrap_or(u32::MAX))
                .await;
            info!("Dispatcher stopped");
        }))
    }
}

async fn spawn_delivery(ctx: &Arc<DispatchContext>, permits: &Arc<Semaphore>, event: AlertEvent) {
    let Ok(permit) = Arc::clone(permits).acquire_owned().await else {
        return;
    };
    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        ctx.deliver(event).await;
        drop(permit);
    });
}
