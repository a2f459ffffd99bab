//! Kernel-layer metrics.
//!
//! Every helper reports through the `metrics` facade and mirrors the value
//! into the process-wide `MetricsStore`.

use std::sync::OnceLock;

use metrics::{counter, histogram};

use super::store::MetricsStore;

static STORE: OnceLock<MetricsStore> = OnceLock::new();

/// Process-wide mirror of everything recorded here.
pub fn global_store() -> &'static MetricsStore {
    STORE.get_or_init(MetricsStore::new)
}

pub fn record_kernel_launch(kernel: &str) {
    counter!("gg_accel_kernel_launches_total", "kernel" => kernel.to_string()).increment(1);
    global_store().increment_counter(&format!("gg_accel_kernel_launches_total{{kernel={}}}", kernel), 1);
}

pub fn record_device_error(kernel: &str, code: i32) {
    counter!(
        "gg_accel_device_errors_total",
        "kernel" => kernel.to_string(),
        "code" => code.to_string()
    )
    .increment(1);
    global_store().increment_counter(
        &format!("gg_accel_device_errors_total{{kernel={},code={}}}", kernel, code),
        1,
    );
}

pub fn record_completion(kernel: &str) {
    counter!("gg_accel_completions_total", "kernel" => kernel.to_string()).increment(1);
    global_store().increment_counter(&format!("gg_accel_completions_total{{kernel={}}}", kernel), 1);
}

pub fn record_deferred_release(bytes: usize) {
    counter!("gg_accel_deferred_releases_total").increment(1);
    histogram!("gg_accel_deferred_release_bytes").record(bytes as f64);
    let store = global_store();
    store.increment_counter("gg_accel_deferred_releases_total", 1);
    store.record_histogram("gg_accel_deferred_release_bytes", bytes as u64);
}

pub fn record_scratch_allocation(tier: &str, bytes: usize) {
    counter!("gg_accel_scratch_allocations_total", "tier" => tier.to_string()).increment(1);
    histogram!("gg_accel_scratch_bytes", "tier" => tier.to_string()).record(bytes as f64);
    let store = global_store();
    store.increment_counter(&format!("gg_accel_scratch_allocations_total{{tier={}}}", tier), 1);
    store.record_histogram(&format!("gg_accel_scratch_bytes{{tier={}}}", tier), bytes as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    // The store is shared by every test in the process, so only check
    // deltas on keys unique to each test.

    #[test]
    fn launches_are_counted_per_kernel() {
        let key = "gg_accel_kernel_launches_total{kernel=metrics_test_launch}";
        let before = global_store().counter(key);
        record_kernel_launch("metrics_test_launch");
        record_kernel_launch("metrics_test_launch");
        assert_eq!(global_store().counter(key) - before, 2);
    }

    #[test]
    fn device_errors_carry_code() {
        record_device_error("metrics_test_err", 719);
        assert!(
            global_store().counter("gg_accel_device_errors_total{kernel=metrics_test_err,code=719}")
                >= 1
        );
    }
}
