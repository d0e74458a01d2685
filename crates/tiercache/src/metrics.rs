//! Prometheus metrics for cache monitoring.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the cache engine.
pub mod names {
    /// Reads answered by a tier.
    pub const HITS_TOTAL: &str = "tiercache_hits_total";
    /// Reads a tier could not answer.
    pub const MISSES_TOTAL: &str = "tiercache_misses_total";
    /// Reads rejected by the type registry.
    pub const TYPE_MISMATCHES_TOTAL: &str = "tiercache_type_mismatches_total";
    /// Writes by level.
    pub const WRITES_TOTAL: &str = "tiercache_writes_total";
    /// Notifications replayed into the local store.
    pub const NOTIFICATIONS_APPLIED_TOTAL: &str = "tiercache_notifications_applied_total";
    /// Notifications that failed to apply.
    pub const NOTIFICATIONS_FAILED_TOTAL: &str = "tiercache_notifications_failed_total";
    /// Keys with an active change subscription.
    pub const SUBSCRIPTIONS_ACTIVE: &str = "tiercache_subscriptions_active";
    /// Remote operation duration in seconds.
    pub const REMOTE_OPERATION_DURATION: &str = "tiercache_remote_operation_duration_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::HITS_TOTAL, "Total number of cache hits per tier");
    describe_counter!(names::MISSES_TOTAL, "Total number of cache misses per tier");
    describe_counter!(
        names::TYPE_MISMATCHES_TOTAL,
        "Total number of reads rejected because of a value type mismatch"
    );
    describe_counter!(names::WRITES_TOTAL, "Total number of cache writes per level");
    describe_counter!(
        names::NOTIFICATIONS_APPLIED_TOTAL,
        "Total number of change notifications applied to the local store"
    );
    describe_counter!(
        names::NOTIFICATIONS_FAILED_TOTAL,
        "Total number of change notifications that failed to apply"
    );
    describe_gauge!(
        names::SUBSCRIPTIONS_ACTIVE,
        "Current number of keys synchronized with the remote store"
    );
    describe_histogram!(
        names::REMOTE_OPERATION_DURATION,
        "Remote store operation duration in seconds"
    );
}

/// Cache metrics recorder.
#[derive(Clone)]
pub struct CacheMetrics;

impl CacheMetrics {
    pub fn hit(tier: &'static str) {
        counter!(names::HITS_TOTAL, "tier" => tier).increment(1);
    }

    pub fn miss(tier: &'static str) {
        counter!(names::MISSES_TOTAL, "tier" => tier).increment(1);
    }

    pub fn type_mismatch() {
        counter!(names::TYPE_MISMATCHES_TOTAL).increment(1);
    }

    pub fn write(level: &str) {
        counter!(names::WRITES_TOTAL, "level" => level.to_string()).increment(1);
    }

    pub fn notification_applied(event: &str) {
        counter!(
            names::NOTIFICATIONS_APPLIED_TOTAL,
            "event" => event.to_string()
        )
        .increment(1);
    }

    pub fn notification_failed() {
        counter!(names::NOTIFICATIONS_FAILED_TOTAL).increment(1);
    }

    pub fn subscriptions_active(count: usize) {
        gauge!(names::SUBSCRIPTIONS_ACTIVE).set(count as f64);
    }

    /// Record remote operation duration.
    pub fn remote_operation(operation: &'static str, duration: Duration) {
        histogram!(
            names::REMOTE_OPERATION_DURATION,
            "operation" => operation
        )
        .record(duration.as_secs_f64());
    }
}
