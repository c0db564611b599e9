//! Alerting system for Alertgate
//!
//! Threshold rules turn monitoring events into candidate alerts, the
//! suppression filter drops noise and repeats, and the dispatcher delivers the
//! rest through a notification transport.

mod dispatcher;
mod engine;
mod monitor;
pub mod rules;
mod suppression;

pub use dispatcher::{
    lifecycle_message_name, prepare, render_notification, DispatchOutcome,
    NotificationDispatcher, PreparedAlert, INACTIVATED_TITLE, INACTIVE_OBJECT_TITLE,
};
pub use engine::{AlertEngine, EngineHandle, SharedAlertState};
pub use monitor::{ManagedObjectRegistry, ThreadCountMonitor};
pub use suppression::{
    compile_ignore_pattern, matches_ignore_list, Reservation, SentRecord, Suppressed,
    SuppressionFilter, SuppressionState,
};
