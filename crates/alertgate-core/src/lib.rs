//! # Alertgate
//!
//! Threshold alerting for application performance monitoring events.
//!
//! Alertgate receives object lifecycle announcements, finished transaction
//! traces and performance counter samples, decides which of them deserve a
//! human's attention, filters out noise and repeats, and delivers the rest by
//! email (or webhook).
//!
//! ## Architecture
//!
//! - **Rules**: pure threshold checks producing candidate alerts
//! - **Suppression**: ignore lists and continuous-duplicate suppression
//! - **Dispatcher**: bounded, non-blocking, at-most-once delivery
//! - **Monitor**: periodic live thread count checks for managed runtimes
//! - **Engine**: the intake API wiring everything together
//!
//! ## Quick Start
//!
//! ```bash
//! # Feed NDJSON events on stdin
//! alertgate --config alertgate.toml serve < events.ndjson
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod alerting;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod models;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{AlertEngine, EngineHandle, NotificationDispatcher, SharedAlertState};
    pub use crate::collaborators::{AgentRegistry, RemoteCallClient, TextResolver};
    pub use crate::config::{Config, ConfigProvider, LiveConfig};
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
    pub use crate::transport::{ConfiguredTransport, Notification, Transport};
}
