//! Suppression of noise and repeated alerts
//!
//! Ignore lists are comma-separated patterns where `*` matches any sequence
//! and the pattern must match the whole text. The duplicate check and the
//! reservation of a send slot happen under one lock, so two concurrent sends of
//! the same alert cannot both pass.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use tracing::warn;

use crate::config::AlertingConfig;
use crate::error::{Error, Result};
use crate::models::SubjectId;

use super::dispatcher::PreparedAlert;

/// Why a candidate was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppressed {
    /// Subject name matched `ignore_name_patterns`
    IgnoredName,
    /// Title matched `ignore_title_patterns`
    IgnoredTitle,
    /// Message matched `ignore_message_patterns`
    IgnoredMessage,
    /// Same alert was sent within the duplicate window, or is being sent
    Duplicate,
}

impl Suppressed {
    /// Metric label
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IgnoredName => "ignored_name",
            Self::IgnoredTitle => "ignored_title",
            Self::IgnoredMessage => "ignored_message",
            Self::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for Suppressed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compile one ignore pattern into an anchored regex.
///
/// `*` becomes `.*`. With `literal_brackets`, parentheses and square brackets
/// are escaped first so messages like `Foo(bar)` can be matched verbatim.
pub fn compile_ignore_pattern(pattern: &str, literal_brackets: bool) -> Result<Regex> {
    let mut translated = String::with_capacity(pattern.len() + 8);
    for c in pattern.chars() {
        match c {
            '*' => translated.push_str(".*"),
            '(' | ')' | '[' | ']' if literal_brackets => {
                translated.push('\\');
                translated.push(c);
            }
            _ => translated.push(c),
        }
    }

    Regex::new(&format!("^(?:{translated})$")).map_err(|source| Error::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Whether `text` matches any pattern in the comma-separated `list`.
/// Malformed patterns are logged and skipped.
pub fn matches_ignore_list(list: &str, text: &str, literal_brackets: bool) -> bool {
    list.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .any(|pattern| match compile_ignore_pattern(pattern, literal_brackets) {
            Ok(re) => re.is_match(text),
            Err(e) => {
                warn!(error = %e, "Skipping ignore pattern");
                false
            }
        })
}

/// Last alert that was actually delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    /// Subject of the delivered alert
    pub subject_id: SubjectId,
    /// Title of the delivered alert
    pub title: String,
    /// When delivery completed
    pub sent_at: DateTime<Utc>,
}

type AlertKey = (SubjectId, String);

#[derive(Default)]
struct StateInner {
    last_sent: Option<SentRecord>,
    in_flight: HashMap<AlertKey, usize>,
}

/// Process-wide suppression history
#[derive(Default)]
pub struct SuppressionState {
    inner: Mutex<StateInner>,
}

impl SuppressionState {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Last delivered alert
    pub fn last_sent(&self) -> Option<SentRecord> {
        self.inner.lock().last_sent.clone()
    }

    /// When the last alert was delivered
    pub fn last_sent_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_sent.as_ref().map(|r| r.sent_at)
    }

    /// Check for a duplicate and, if none, claim a send slot.
    ///
    /// `window` is `None` when duplicate suppression is off; the slot is
    /// still claimed so a successful send updates the history.
    fn reserve(
        self: &Arc<Self>,
        subject_id: SubjectId,
        title: &str,
        now: DateTime<Utc>,
        window: Option<Duration>,
    ) -> Option<Reservation> {
        let key = (subject_id, title.to_string());
        let mut inner = self.inner.lock();

        if let Some(window) = window {
            let recently_sent = inner.last_sent.as_ref().is_some_and(|last| {
                last.subject_id == subject_id
                    && last.title == title
                    // a send stamped in the future counts as recent
                    && (now - last.sent_at).to_std().map_or(true, |gap| gap < window)
            });
            if recently_sent || inner.in_flight.contains_key(&key) {
                return None;
            }
        }

        *inner.in_flight.entry(key.clone()).or_insert(0) += 1;

        Some(Reservation {
            state: Arc::clone(self),
            key,
            committed: false,
        })
    }

    fn release(&self, key: &AlertKey, sent_at: Option<DateTime<Utc>>) {
        let mut inner = self.inner.lock();

        if let Some(count) = inner.in_flight.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                inner.in_flight.remove(key);
            }
        }

        if let Some(sent_at) = sent_at {
            inner.last_sent = Some(SentRecord {
                subject_id: key.0,
                title: key.1.clone(),
                sent_at,
            });
        }
    }
}

/// Claim on a send slot. Commit after a successful send; dropping it
/// uncommitted leaves the history untouched.
pub struct Reservation {
    state: Arc<SuppressionState>,
    key: AlertKey,
    committed: bool,
}

impl Reservation {
    /// Record the alert as delivered at `sent_at`
    pub fn commit(mut self, sent_at: DateTime<Utc>) {
        self.committed = true;
        self.state.release(&self.key, Some(sent_at));
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.committed {
            self.state.release(&self.key, None);
        }
    }
}

/// Ordered ignore and duplicate filters
#[derive(Clone, Default)]
pub struct SuppressionFilter {
    state: Arc<SuppressionState>,
}

impl SuppressionFilter {
    /// Create a filter over fresh history
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared history
    pub fn state(&self) -> &Arc<SuppressionState> {
        &self.state
    }

    /// Run the filters in order; the first match drops the alert.
    ///
    /// Ignore lists see the display name and the rewritten title and message.
    /// The duplicate check keys on the subject and the original title.
    pub fn admit(
        &self,
        alert: &PreparedAlert,
        config: &AlertingConfig,
        now: DateTime<Utc>,
    ) -> std::result::Result<Reservation, Suppressed> {
        if matches_ignore_list(&config.ignore_name_patterns, &alert.name, false) {
            return Err(Suppressed::IgnoredName);
        }
        if matches_ignore_list(&config.ignore_title_patterns, &alert.title, false) {
            return Err(Suppressed::IgnoredTitle);
        }
        if matches_ignore_list(&config.ignore_message_patterns, &alert.message, true) {
            return Err(Suppressed::IgnoredMessage);
        }

        let window = config
            .ignore_continuous_duplicates
            .then_some(config.duplicate_window);

        self.state
            .reserve(alert.event.subject_id, &alert.event.title, now, window)
            .ok_or(Suppressed::Duplicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertEvent, AlertLevel};
    use proptest::prelude::*;
    use rstest::rstest;

    fn prepared(subject: i32, title: &str, message: &str) -> PreparedAlert {
        PreparedAlert {
            event: AlertEvent::new(AlertLevel::Warn, SubjectId(subject), title, message),
            name: "/host/tomcat1".to_string(),
            subject_type: "tomcat".to_string(),
            title: title.to_string(),
            message: message.to_string(),
        }
    }

    fn dedup_config() -> AlertingConfig {
        AlertingConfig {
            ignore_continuous_duplicates: true,
            ..AlertingConfig::default()
        }
    }

    #[rstest]
    #[case("xlog*", "xlog Error", false, true)]
    #[case("xlog*", "Slow xlog", false, false)]
    #[case("*tomcat*", "/host/tomcat1", false, true)]
    #[case("a,b*, c", "c", false, true)]
    #[case("", "anything", false, false)]
    #[case("Foo(bar)*", "Foo(bar) failed", true, true)]
    #[case("[err]*", "[err] boom", true, true)]
    #[case("[err]*", "e", true, false)]
    fn test_ignore_list_matching(
        #[case] list: &str,
        #[case] text: &str,
        #[case] literal: bool,
        #[case] expected: bool,
    ) {
        assert_eq!(matches_ignore_list(list, text, literal), expected);
    }

    #[test]
    fn test_malformed_pattern_is_non_matching() {
        assert!(compile_ignore_pattern("Foo(bar", false).is_err());
        assert!(!matches_ignore_list("Foo(bar", "Foo(bar", false));
        // the remaining patterns still apply
        assert!(matches_ignore_list("Foo(bar,Foo*", "Foo(bar", false));
    }

    #[test]
    fn test_title_ignore_list_rejects() {
        let filter = SuppressionFilter::new();
        let config = AlertingConfig {
            ignore_title_patterns: "xlog*".to_string(),
            ..AlertingConfig::default()
        };

        let result = filter.admit(&prepared(1, "xlog Error", "boom"), &config, Utc::now());
        assert_eq!(result.err(), Some(Suppressed::IgnoredTitle));
    }

    #[test]
    fn test_filters_apply_in_order() {
        let filter = SuppressionFilter::new();
        let config = AlertingConfig {
            ignore_name_patterns: "/host/*".to_string(),
            ignore_title_patterns: "*".to_string(),
            ..AlertingConfig::default()
        };

        let result = filter.admit(&prepared(1, "t", "m"), &config, Utc::now());
        assert_eq!(result.err(), Some(Suppressed::IgnoredName));
    }

    #[rstest]
    #[case(59 * 60, false)]
    #[case(60 * 60, true)]
    #[case(2 * 60 * 60, true)]
    fn test_duplicate_window(#[case] gap_secs: i64, #[case] admitted: bool) {
        let filter = SuppressionFilter::new();
        let config = dedup_config();
        let sent_at = Utc::now();

        filter
            .admit(&prepared(1, "GC", "m"), &config, sent_at)
            .unwrap()
            .commit(sent_at);

        let later = sent_at + chrono::Duration::seconds(gap_secs);
        let result = filter.admit(&prepared(1, "GC", "m"), &config, later);
        assert_eq!(result.is_ok(), admitted);
    }

    #[test]
    fn test_duplicate_needs_same_subject_and_title() {
        let filter = SuppressionFilter::new();
        let config = dedup_config();
        let now = Utc::now();

        filter.admit(&prepared(1, "GC", "m"), &config, now).unwrap().commit(now);

        assert!(filter.admit(&prepared(2, "GC", "m"), &config, now).is_ok());
        assert!(filter.admit(&prepared(1, "Threads", "m"), &config, now).is_ok());
    }

    #[test]
    fn test_duplicates_pass_when_disabled() {
        let filter = SuppressionFilter::new();
        let config = AlertingConfig::default();
        let now = Utc::now();

        filter.admit(&prepared(1, "GC", "m"), &config, now).unwrap().commit(now);
        assert!(filter.admit(&prepared(1, "GC", "m"), &config, now).is_ok());
    }

    #[test]
    fn test_in_flight_duplicate_is_rejected_until_released() {
        let filter = SuppressionFilter::new();
        let config = dedup_config();
        let now = Utc::now();

        let first = filter.admit(&prepared(1, "GC", "m"), &config, now).unwrap();
        assert_eq!(
            filter.admit(&prepared(1, "GC", "m"), &config, now).err(),
            Some(Suppressed::Duplicate)
        );

        // failed send: nothing recorded, slot freed
        drop(first);
        assert!(filter.state().last_sent().is_none());
        assert!(filter.admit(&prepared(1, "GC", "m"), &config, now).is_ok());
    }

    #[test]
    fn test_commit_records_last_sent() {
        let filter = SuppressionFilter::new();
        let now = Utc::now();

        filter
            .admit(&prepared(4, "GC", "m"), &AlertingConfig::default(), now)
            .unwrap()
            .commit(now);

        let last = filter.state().last_sent().unwrap();
        assert_eq!(last.subject_id, SubjectId(4));
        assert_eq!(last.title, "GC");
        assert_eq!(filter.state().last_sent_at(), Some(now));
    }

    proptest! {
        #[test]
        fn prop_prefix_glob_matches_exactly_prefixed_text(
            prefix in "[a-z]{1,8}",
            rest in "[a-zA-Z0-9 ]{0,16}",
            other in "[A-Z]{1,8}",
        ) {
            let pattern = format!("{prefix}*");
            let matching = format!("{prefix}{rest}");
            prop_assert!(matches_ignore_list(&pattern, &matching, false));
            prop_assert!(!matches_ignore_list(&pattern, &other, false));
        }
    }
}
