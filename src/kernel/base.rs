// Copyright 2024-2026 GG-ACCEL Contributors
// Licensed under the Apache License, Version 2.0

//! Asynchronous kernel base.
//!
//! Every device kernel is asynchronous: `compute` does host-side setup and
//! enqueues device work, then `execute_async` checks the device's last error
//! and enqueues the caller's completion continuation on the same stream. The
//! stream is bound per call through `KernelCall`, so concurrent invocations
//! of one kernel instance never share mutable state.

use std::sync::Arc;

use super::context::{DeviceTensor, OpContext};
use super::done::{completion, enqueue_done, Completion, DoneCallback};
use super::error::KernelError;
use crate::device::{
    DevicePtr, DeviceProperties, DeviceProvider, DeviceStream, LaunchConfig, MathHandle,
    MathLibrary, StreamHandle,
};
use crate::telemetry::{self, KernelSpan, SpanExt};

/// The kernel-specific compute routine.
pub trait AsyncKernel: Send + Sync {
    /// Validate inputs, do bounded host work and enqueue device work on
    /// `call.stream()`. Must never wait for the device.
    fn compute(&self, call: &KernelCall<'_>) -> Result<(), KernelError>;
}

/// Interface the dispatch engine drives.
pub trait OpKernel: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `execute_async` is the supported entry point.
    fn is_async(&self) -> bool;

    /// Blocking entry point.
    fn execute(&self, ctx: &OpContext) -> Result<(), KernelError>;

    /// Enqueue the kernel's work and arrange for `done` to run once it has
    /// all finished. On error `done` is dropped without running.
    fn execute_async(&self, ctx: &OpContext, done: DoneCallback) -> Result<(), KernelError>;
}

/// Identity and device services shared by every call of one kernel.
pub struct KernelBase {
    name: String,
    provider: Arc<dyn DeviceProvider>,
}

impl KernelBase {
    pub fn new(name: impl Into<String>, provider: Arc<dyn DeviceProvider>) -> Self {
        Self {
            name: name.into(),
            provider,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> &Arc<dyn DeviceProvider> {
        &self.provider
    }
}

/// One invocation's view of the kernel: its context, its stream and the
/// device services.
pub struct KernelCall<'a> {
    base: &'a KernelBase,
    ctx: &'a OpContext,
    stream: &'a dyn DeviceStream,
}

impl<'a> KernelCall<'a> {
    pub fn new(base: &'a KernelBase, ctx: &'a OpContext) -> Self {
        Self {
            base,
            ctx,
            stream: ctx.compute_stream().as_ref(),
        }
    }

    pub fn kernel_name(&self) -> &str {
        self.base.name()
    }

    pub fn context(&self) -> &OpContext {
        self.ctx
    }

    /// The stream all work of this call is enqueued on.
    pub fn stream(&self) -> &dyn DeviceStream {
        self.stream
    }

    pub fn stream_handle(&self) -> StreamHandle {
        self.stream.handle()
    }

    pub(crate) fn provider(&self) -> &dyn DeviceProvider {
        self.base.provider.as_ref()
    }

    pub fn device_id(&self) -> usize {
        self.provider().device_id()
    }

    pub fn device_properties(&self) -> &DeviceProperties {
        self.base.provider.device_properties()
    }

    pub fn math_handle(&self, library: MathLibrary) -> MathHandle {
        self.provider().math_handle(library)
    }

    pub fn blas_handle(&self) -> MathHandle {
        self.math_handle(MathLibrary::Blas)
    }

    pub fn dnn_handle(&self) -> MathHandle {
        self.math_handle(MathLibrary::Dnn)
    }

    /// Enqueue a named kernel on this call's stream.
    pub fn launch(
        &self,
        kernel: &str,
        config: LaunchConfig,
        args: &[DevicePtr],
    ) -> Result<(), KernelError> {
        self.stream.launch(kernel, config, args)?;
        telemetry::record_kernel_launch(kernel);
        Ok(())
    }

    /// Enqueue a copy of `src` into `dst` on this call's stream. Both
    /// tensors must have the same byte size.
    pub fn copy_tensor(&self, src: &DeviceTensor, dst: &DeviceTensor) -> Result<(), KernelError> {
        let bytes = match (src.byte_size(), dst.byte_size()) {
            (Some(s), Some(d)) if s == d => s,
            (Some(s), Some(d)) => {
                return Err(KernelError::InvalidArgument(format!(
                    "tensor copy size mismatch: {} bytes into {} bytes",
                    s, d
                )))
            }
            _ => {
                return Err(KernelError::InvalidArgument(
                    "tensor byte size overflows".to_string(),
                ))
            }
        };
        if bytes == 0 || src.ptr == dst.ptr {
            return Ok(());
        }
        self.stream.memcpy_dtod_async(dst.ptr, src.ptr, bytes)?;
        Ok(())
    }
}

/// A kernel implementing the asynchronous execution protocol.
pub struct DeviceKernel<K> {
    base: KernelBase,
    kernel: K,
}

impl<K: AsyncKernel> DeviceKernel<K> {
    pub fn new(name: impl Into<String>, provider: Arc<dyn DeviceProvider>, kernel: K) -> Self {
        Self {
            base: KernelBase::new(name, provider),
            kernel,
        }
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn base(&self) -> &KernelBase {
        &self.base
    }

    fn run(&self, call: &KernelCall<'_>, done: DoneCallback) -> Result<(), KernelError> {
        self.kernel.compute(call)?;

        // A fault from earlier asynchronous work surfaces here.
        if let Some(status) = self.base.provider.take_last_error() {
            return Err(status.into());
        }

        enqueue_done(call.stream(), self.base.name(), done)?;
        Ok(())
    }
}

impl<K: AsyncKernel> OpKernel for DeviceKernel<K> {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn is_async(&self) -> bool {
        true
    }

    fn execute(&self, _ctx: &OpContext) -> Result<(), KernelError> {
        Err(KernelError::NotImplemented(format!("{}::execute", self.base.name())))
    }

    fn execute_async(&self, ctx: &OpContext, done: DoneCallback) -> Result<(), KernelError> {
        let call = KernelCall::new(&self.base, ctx);
        let span = KernelSpan::new(self.base.name(), call.stream_handle());
        let _enter = span.enter();

        let result = self.run(&call, done);
        span.record_result(&result);

        if let Err(e) = &result {
            if let Some(code) = e.device_code() {
                telemetry::record_device_error(self.base.name(), code);
            }
            if e.is_fatal() {
                tracing::error!(kernel = %self.base.name(), error = %e, "unrecoverable kernel failure");
            } else {
                tracing::warn!(kernel = %self.base.name(), error = %e, "kernel execution failed");
            }
        }
        result
    }
}

/// Run `kernel` asynchronously and return a future for its completion.
pub fn submit(kernel: &dyn OpKernel, ctx: &OpContext) -> Result<Completion, KernelError> {
    let (done, finished) = completion();
    kernel.execute_async(ctx, done)?;
    Ok(finished)
}

#[cfg(test)]
#[path = "base_tests.rs"]
mod tests;
