//! Kernel execution outcomes.
//!
//! Device errors fail the single invocation and are never retried here.
//! Allocation failures are reported the same way but flagged fatal: the
//! caller should stop issuing work rather than continue with partially
//! staged buffers.

use thiserror::Error;

use crate::device::{DeviceStatus, GpuError};

/// Errors that can occur while executing a kernel.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Device error {name} ({code}): {message}")]
    Device {
        code: i32,
        name: String,
        message: String,
    },

    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    #[error("{0} is not implemented")]
    NotImplemented(String),

    #[error("Compute failed: {0}")]
    Compute(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Completion dropped before it fired")]
    Abandoned,
}

impl KernelError {
    /// Returns true if the process should not keep issuing device work.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AllocationFailed(_))
    }

    pub fn is_device_error(&self) -> bool {
        matches!(self, Self::Device { .. })
    }

    /// Vendor code of a device error.
    pub fn device_code(&self) -> Option<i32> {
        match self {
            Self::Device { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<DeviceStatus> for KernelError {
    fn from(status: DeviceStatus) -> Self {
        KernelError::Device {
            code: status.code,
            name: status.name,
            message: status.message,
        }
    }
}

impl From<GpuError> for KernelError {
    fn from(err: GpuError) -> Self {
        match err {
            GpuError::Device(status) => status.into(),
            GpuError::NoDevicesAvailable => KernelError::Device {
                code: 100,
                name: "cudaErrorNoDevice".to_string(),
                message: err.to_string(),
            },
            other => KernelError::AllocationFailed(other.to_string()),
        }
    }
}
