//! Data models for Alertgate

mod alert;
mod ingest;

pub use alert::*;
pub use ingest::*;
