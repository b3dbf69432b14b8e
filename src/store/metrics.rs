//! Shared metrics recording for store operations.

use std::time::Instant;

/// Records operation metrics for a store call.
///
/// Two metrics per operation:
/// 1. `memory_store_operations_total` - counter by operation and status
/// 2. `memory_store_operation_duration_ms` - latency histogram
pub fn record_operation(operation: &'static str, start: Instant, status: &'static str) {
    metrics::counter!(
        "memory_store_operations_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "memory_store_operation_duration_ms",
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}

/// Counts recoveries from a poisoned connection mutex.
pub fn record_poison_recovery() {
    metrics::counter!("memory_store_mutex_poison_recovery_total").increment(1);
}
