//! GG-ACCEL
//!
//! Asynchronous base for accelerator kernels. A kernel implements a single
//! `compute` step that enqueues device work; the base turns that into the
//! dispatch engine's asynchronous protocol, checking the device's last
//! error and scheduling the caller's completion continuation on the same
//! stream.
//!
//! # Components
//!
//! - `kernel`: the execution protocol, per-call scratch memory and
//!   host-to-device staging buffers
//! - `device`: stream, allocator and provider interfaces, plus an emulated
//!   device that implements all of them
//! - `config`: `GG_ACCEL_*` environment configuration
//! - `telemetry`: logging, kernel spans and metrics

pub mod config;
pub mod device;
pub mod kernel;
pub mod telemetry;

use std::sync::Arc;

use config::AccelConfig;
use device::{DeviceContext, DeviceProvider, DeviceStatus, GpuError, MockDevice, MockStream};
use kernel::{AsyncKernel, DeviceKernel};

/// An emulated device with its provider, ready to build kernels and streams.
pub struct Accelerator {
    config: AccelConfig,
    device: Arc<MockDevice>,
    context: Arc<DeviceContext>,
}

impl Accelerator {
    pub fn new(config: AccelConfig) -> Self {
        let device = MockDevice::new(config.device_memory, config.device_id);
        let context = Arc::new(DeviceContext::emulated(&device, &config));
        tracing::info!(
            device = config.device_id,
            device_memory = config.device_memory,
            pinned_memory = config.pinned_memory,
            "accelerator initialized"
        );
        Self {
            config,
            device,
            context,
        }
    }

    /// Build from `GG_ACCEL_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(config::load())
    }

    pub fn config(&self) -> &AccelConfig {
        &self.config
    }

    pub fn device(&self) -> &Arc<MockDevice> {
        &self.device
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.context
    }

    pub fn provider(&self) -> Arc<dyn DeviceProvider> {
        self.context.clone()
    }

    pub fn create_stream(&self) -> Result<Arc<MockStream>, GpuError> {
        self.device.create_stream()
    }

    /// Wrap `compute` in the asynchronous protocol on this device.
    pub fn kernel<K: AsyncKernel>(&self, name: impl Into<String>, compute: K) -> DeviceKernel<K> {
        DeviceKernel::new(name, self.provider(), compute)
    }

    /// Hand deferred pinned releases to `stream` at the end of a run.
    pub fn end_run(&self, stream: &MockStream) -> Result<usize, DeviceStatus> {
        self.context.on_run_end(stream)
    }
}
