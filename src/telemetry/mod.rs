//! Telemetry for the kernel layer.
//!
//! Structured logging setup, the per-invocation kernel span and metrics.
//! Metrics go to the `metrics` facade and are mirrored into an in-process
//! store that can be snapshotted without an exporter.

mod logging;
mod metrics;
mod spans;
mod store;

pub use self::logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    global_store, record_completion, record_deferred_release, record_device_error,
    record_kernel_launch, record_scratch_allocation,
};
pub use self::spans::{KernelSpan, SpanExt};
pub use self::store::{HistogramSummary, MetricsSnapshot, MetricsStore};
