//! Prometheus metrics for forum-service
//!
//! Tracks attitude transitions, conflict retries and content operations.

use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

lazy_static::lazy_static! {
    /// Attitude transitions by item kind, requested attitude and outcome
    static ref ATTITUDE_TRANSITIONS: IntCounterVec = register_int_counter_vec!(
        "forum_attitude_transitions_total",
        "Attitude transitions applied to content items",
        &["kind", "target", "outcome"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Units of work retried after losing a write race
    static ref ATTITUDE_CONFLICT_RETRIES: IntCounterVec = register_int_counter_vec!(
        "forum_attitude_conflict_retries_total",
        "Attitude units of work retried after a conflict",
        &["operation"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Content operations by outcome
    static ref CONTENT_OPERATIONS: IntCounterVec = register_int_counter_vec!(
        "forum_content_operations_total",
        "Content create/delete operations",
        &["operation", "result"]
    ).expect("Prometheus metrics registration should succeed at startup");
}

pub(crate) fn record_transition(kind: &str, target: &str, changed: bool) {
    let outcome = if changed { "changed" } else { "noop" };
    ATTITUDE_TRANSITIONS
        .with_label_values(&[kind, target, outcome])
        .inc();
}

pub(crate) fn record_conflict_retry(operation: &str) {
    ATTITUDE_CONFLICT_RETRIES
        .with_label_values(&[operation])
        .inc();
}

pub(crate) fn record_content_operation(operation: &str, result: &str) {
    CONTENT_OPERATIONS
        .with_label_values(&[operation, result])
        .inc();
}

/// Render the default registry in the Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_series() {
        record_transition("comment", "like", true);
        record_conflict_retry("like");

        let text = render().unwrap();
        assert!(text.contains("forum_attitude_transitions_total"));
        assert!(text.contains("forum_attitude_conflict_retries_total"));
    }
}
