// Copyright 2024-2026 GG-ACCEL Contributors
// Licensed under the Apache License, Version 2.0

//! Device status codes and the sticky last-error cell.

use std::fmt;

use parking_lot::Mutex;
use thiserror::Error;

/// Vendor status reported by the device runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub code: i32,
    pub name: String,
    pub message: String,
}

impl DeviceStatus {
    pub fn new(code: i32, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::new(1, "cudaErrorInvalidValue", message)
    }

    pub fn memory_allocation(message: impl Into<String>) -> Self {
        Self::new(2, "cudaErrorMemoryAllocation", message)
    }

    pub fn illegal_address(message: impl Into<String>) -> Self {
        Self::new(700, "cudaErrorIllegalAddress", message)
    }

    pub fn launch_failure(message: impl Into<String>) -> Self {
        Self::new(719, "cudaErrorLaunchFailure", message)
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::new(600, "cudaErrorNotReady", message)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name, self.code, self.message)
    }
}

/// Last-error slot shared between a device runtime and whoever polls it.
///
/// Only the first error is kept until it is taken, matching the way device
/// runtimes surface a fault from an earlier launch on a later call.
#[derive(Debug, Default)]
pub struct ErrorState {
    last: Mutex<Option<DeviceStatus>>,
}

impl ErrorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, status: DeviceStatus) {
        let mut last = self.last.lock();
        if last.is_none() {
            *last = Some(status);
        }
    }

    /// Get-and-clear.
    pub fn take(&self) -> Option<DeviceStatus> {
        self.last.lock().take()
    }

    pub fn peek(&self) -> Option<DeviceStatus> {
        self.last.lock().clone()
    }
}

/// Allocator and device level errors.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("No device available")]
    NoDevicesAvailable,

    #[error("Out of device memory: required {required} bytes, available {available} bytes")]
    OutOfMemory { required: u64, available: u64 },

    #[error("Out of pinned host memory: required {required} bytes, available {available} bytes")]
    PinnedOutOfMemory { required: u64, available: u64 },

    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    #[error("Device error: {0}")]
    Device(DeviceStatus),
}

impl From<DeviceStatus> for GpuError {
    fn from(status: DeviceStatus) -> Self {
        GpuError::Device(status)
    }
}
