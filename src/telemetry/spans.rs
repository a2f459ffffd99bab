//! Span utilities for kernel execution tracing.

use tracing::{info_span, Span};

use crate::device::StreamHandle;

/// Extension trait for recording outcomes on spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for the span wrapping one `execute_async` call.
pub struct KernelSpan;

impl KernelSpan {
    /// Fields:
    /// - `kernel`: kernel name
    /// - `stream`: stream the call enqueues on
    /// - `status`, `error.message`: filled in by `SpanExt::record_result`
    pub fn new(kernel: &str, stream: StreamHandle) -> Span {
        info_span!(
            "kernel_execute",
            kernel = %kernel,
            stream = %stream,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    }
}
