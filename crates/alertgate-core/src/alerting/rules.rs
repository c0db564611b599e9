//! Threshold rules turning monitoring events into candidate alerts
//!
//! Every rule is a plain function of its inputs. A threshold of `0` disables
//! its rule, and all comparisons are strict `>`.

use tracing::debug;

use crate::collaborators::{AgentRegistry, TextResolver};
use crate::config::AlertingConfig;
use crate::models::{
    AlertEvent, AlertLevel, CounterSample, ObjectLifecycle, SubjectId, TraceCompleted,
    GC_TIME_COUNTER,
};

use super::monitor::ManagedObjectRegistry;

/// Placeholder used when a name or type cannot be resolved
pub const UNKNOWN: &str = "unknown";

/// Title of alerts for newly connected subjects
pub const ACTIVATED_TITLE: &str = "An object has been activated.";

/// Title of alerts for subjects that came back
pub const REACTIVATED_TITLE: &str = "An object has been reactivated.";

/// Title of alerts for failed transactions
pub const TRACE_ERROR_TITLE: &str = "xlog Error";

/// Alert for a subject that connected or came back.
///
/// A subject unknown to the registry that did not wake from sleep is new. A
/// known subject moving from not-alive to alive has reconnected. Going
/// inactive is reported by the registry itself, not derived here.
pub fn lifecycle_alert(event: &ObjectLifecycle) -> Option<AlertEvent> {
    let (title, message) = match event.was_alive_before {
        None if !event.has_wake_marker => (
            ACTIVATED_TITLE,
            format!("{} is connected.", event.subject_name),
        ),
        Some(false) if event.is_alive_now => (
            REACTIVATED_TITLE,
            format!("{} is reconnected.", event.subject_name),
        ),
        _ => return None,
    };

    Some(
        AlertEvent::new(AlertLevel::Info, event.subject_id, title, message)
            .with_subject_type(event.subject_type.clone()),
    )
}

/// WARN when a transaction took longer than `threshold_ms`
pub fn latency_alert(
    trace: &TraceCompleted,
    threshold_ms: u64,
    agent_name: &str,
    service_name: &str,
) -> Option<AlertEvent> {
    if threshold_ms == 0 || trace.elapsed_ms <= threshold_ms {
        return None;
    }

    let title = format!(
        "Service elapsed time ({} ms) exceeded the threshold ({} ms).",
        trace.elapsed_ms, threshold_ms
    );
    let message = format!(
        "Agent: [{agent_name}]\nService: {}({service_name})\nElapsed time ({} ms) exceeded the threshold ({} ms).",
        trace.service_id, trace.elapsed_ms, threshold_ms
    );

    Some(AlertEvent::new(
        AlertLevel::Warn,
        trace.subject_id,
        title,
        message,
    ))
}

/// ERROR for any transaction that carries an error code
pub fn trace_error_alert(
    trace: &TraceCompleted,
    service_name: &str,
    error_text: &str,
) -> Option<AlertEvent> {
    if trace.error_code == 0 {
        return None;
    }

    let message = format!(
        "Service error: {}({service_name})\n{error_text}",
        trace.service_id
    );

    Some(AlertEvent::new(
        AlertLevel::Error,
        trace.subject_id,
        TRACE_ERROR_TITLE,
        message,
    ))
}

/// Run both trace rules. Latency and error alerts are independent; a slow
/// failing transaction yields both.
pub fn evaluate_trace(
    trace: &TraceCompleted,
    config: &AlertingConfig,
    registry: &dyn AgentRegistry,
    texts: &dyn TextResolver,
) -> Vec<AlertEvent> {
    let threshold = config.elapsed_time_threshold_ms;
    let slow = threshold != 0 && trace.elapsed_ms > threshold;
    let failed = trace.error_code != 0;
    if !slow && !failed {
        return Vec::new();
    }

    let date = trace.end_time.date_naive();
    let service_name = texts
        .resolve_service_name(date, trace.service_id)
        .unwrap_or_else(|| UNKNOWN.to_string());
    let subject_type = registry.resolve_subject_type(trace.subject_id);

    let mut alerts = Vec::with_capacity(2);

    if slow {
        let agent_name = registry
            .resolve_subject_name(trace.subject_id)
            .unwrap_or_else(|| UNKNOWN.to_string());
        alerts.extend(latency_alert(trace, threshold, &agent_name, &service_name));
    }

    if failed {
        let error_text = texts
            .resolve_error_text(date, trace.error_code)
            .unwrap_or_else(|| format!("error #{}", trace.error_code));
        alerts.extend(trace_error_alert(trace, &service_name, &error_text));
    }

    alerts
        .into_iter()
        .map(|a| a.with_subject_type(subject_type.clone()))
        .collect()
}

/// WARN when a realtime GC time sample is above `threshold`
pub fn gc_time_alert(
    sample: &CounterSample,
    subject_id: SubjectId,
    threshold: u64,
) -> Option<AlertEvent> {
    if threshold == 0 || !sample.is_realtime {
        return None;
    }

    let gc_time = sample.counter(GC_TIME_COUNTER)?;
    if gc_time <= threshold as f64 {
        return None;
    }

    let title = format!("GC time ({gc_time}) exceeded the threshold ({threshold}).");
    let message = format!(
        "{}'s GC time ({gc_time}) exceeded the threshold ({threshold}).",
        sample.subject_name
    );

    Some(AlertEvent::new(AlertLevel::Warn, subject_id, title, message))
}

/// Classify the sampled subject and apply the GC time rule.
///
/// Subjects of the managed-runtime family are added to `managed` so the
/// thread count monitor starts polling them, whether or not an alert fires.
pub fn evaluate_counter(
    sample: &CounterSample,
    config: &AlertingConfig,
    registry: &dyn AgentRegistry,
    managed: &ManagedObjectRegistry,
) -> Option<AlertEvent> {
    let subject_id = SubjectId::from_name(&sample.subject_name);
    let subject_type = registry.resolve_subject_type(subject_id)?;
    let family = registry.resolve_family(&subject_type)?;

    if family != config.managed_runtime_family {
        return None;
    }

    if managed.register(subject_id) {
        debug!(%subject_id, subject = %sample.subject_name, "Watching managed runtime");
    }

    gc_time_alert(sample, subject_id, config.gc_time_threshold_ms)
        .map(|a| a.with_subject_type(Some(subject_type)))
}

/// WARN when a subject runs more than `threshold` threads
pub fn thread_count_alert(
    subject_id: SubjectId,
    subject_name: &str,
    thread_count: usize,
    threshold: u64,
) -> Option<AlertEvent> {
    if threshold == 0 || thread_count as u64 <= threshold {
        return None;
    }

    let title = format!("Thread count ({thread_count}) exceeded the threshold ({threshold}).");
    let message = format!(
        "{subject_name}'s thread count ({thread_count}) exceeded the threshold ({threshold})."
    );

    Some(AlertEvent::new(AlertLevel::Warn, subject_id, title, message))
}
