//! Alert data models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Alert severity level, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    /// Informational
    #[default]
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
    /// Fatal
    Fatal,
}

impl AlertLevel {
    /// Map a numeric level (0: INFO .. 3: FATAL). Values above 3 saturate to FATAL.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Info,
            1 => Self::Warn,
            2 => Self::Error,
            _ => Self::Fatal,
        }
    }

    /// Numeric level
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Upper-case display name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque identifier of a monitored subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub i32);

impl SubjectId {
    /// Derive a stable id from a subject name.
    ///
    /// Counter samples only carry the subject name, so the registry must key
    /// subjects the same way for those samples to be attributed.
    pub fn from_name(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        Self(i32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]))
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for SubjectId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

/// A candidate or dispatched alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Unique identifier
    pub id: Uuid,

    /// Severity level
    pub level: AlertLevel,

    /// Subject that raised the alert
    pub subject_id: SubjectId,

    /// Category of the subject, resolved at dispatch when absent
    pub subject_type: Option<String>,

    /// Short label, also the duplicate-suppression key
    pub title: String,

    /// Human-readable message
    pub message: String,

    /// When the alert was created
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    /// Create an alert stamped with the current time
    pub fn new(
        level: AlertLevel,
        subject_id: SubjectId,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            level,
            subject_id,
            subject_type: None,
            title: title.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Set the subject type
    #[must_use]
    pub fn with_subject_type(mut self, subject_type: Option<String>) -> Self {
        self.subject_type = subject_type;
        self
    }

    /// Epoch milliseconds of creation
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        assert!(AlertLevel::Info < AlertLevel::Warn);
        assert!(AlertLevel::Warn < AlertLevel::Error);
        assert!(AlertLevel::Error < AlertLevel::Fatal);
    }

    #[test]
    fn test_level_codes() {
        for code in 0..=3u8 {
            assert_eq!(AlertLevel::from_code(code).code(), code);
        }
        assert_eq!(AlertLevel::from_code(9), AlertLevel::Fatal);
        assert_eq!(AlertLevel::Warn.to_string(), "WARN");
    }

    #[test]
    fn test_subject_id_from_name_is_stable() {
        let a = SubjectId::from_name("/host-1/tomcat");
        let b = SubjectId::from_name("/host-1/tomcat");
        let c = SubjectId::from_name("/host-2/tomcat");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
