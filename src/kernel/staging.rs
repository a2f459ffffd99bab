// Copyright 2024-2026 GG-ACCEL Contributors
// Licensed under the Apache License, Version 2.0

//! Staging of host parameter data into device memory.
//!
//! The host copy lives in pinned memory so the transfer can run
//! asynchronously. `copy_to_device` enqueues the transfer on the call's
//! stream and hands the pinned region to the provider's deferred-release
//! pool; it is freed only after the device has executed the copy.

use super::base::KernelCall;
use super::error::KernelError;
use super::scratch::ScratchBuffer;
use crate::device::{DevicePtr, DeviceRepr, PinnedBuffer};

/// Host data staged for device consumption.
pub struct StagingBuffer<'c, T: DeviceRepr> {
    call: &'c KernelCall<'c>,
    host: Option<PinnedBuffer<T>>,
    device: Option<ScratchBuffer<T>>,
    count: usize,
}

impl<'c, T: DeviceRepr> StagingBuffer<'c, T> {
    /// Empty buffer with no host copy.
    pub fn new(call: &'c KernelCall<'c>) -> Self {
        Self {
            call,
            host: None,
            device: None,
            count: 0,
        }
    }

    /// Zeroed host copy of `count` elements.
    pub fn with_len(call: &'c KernelCall<'c>, count: usize) -> Result<Self, KernelError> {
        let mut buf = Self::new(call);
        buf.alloc_host(count)?;
        Ok(buf)
    }

    /// Host copy with `value` in each of `count` slots.
    pub fn filled(call: &'c KernelCall<'c>, value: T, count: usize) -> Result<Self, KernelError> {
        let mut buf = Self::with_len(call, count)?;
        if let Some(host) = buf.host_slice_mut() {
            host.fill(value);
        }
        Ok(buf)
    }

    /// Host copy of `values`.
    pub fn from_slice(call: &'c KernelCall<'c>, values: &[T]) -> Result<Self, KernelError> {
        let mut buf = Self::with_len(call, values.len())?;
        if let Some(host) = buf.host_slice_mut() {
            host.copy_from_slice(values);
        }
        Ok(buf)
    }

    /// Allocate a fresh zeroed host copy of `count` elements, replacing any
    /// existing one.
    pub fn alloc_host(&mut self, count: usize) -> Result<(), KernelError> {
        let host = self.call.pinned_buffer::<T>(count)?;
        self.host = Some(host);
        self.count = count;
        Ok(())
    }

    /// Enqueue the host-to-device transfer on the call's stream. No-op
    /// without a host copy.
    ///
    /// On success the host copy is gone from this buffer: it belongs to the
    /// deferred-release pool until the device has read it.
    pub fn copy_to_device(&mut self) -> Result<(), KernelError> {
        let Some(host) = self.host.take() else {
            return Ok(());
        };

        let device = match self.call.scratch_buffer::<T>(self.count) {
            Ok(device) => device,
            Err(e) => {
                self.host = Some(host);
                return Err(e);
            }
        };

        // The pinned region stays alive in the deferred pool until the copy
        // has executed.
        let enqueued = unsafe {
            self.call.stream().memcpy_htod_async(
                device.ptr(),
                host.as_ptr().cast::<u8>(),
                device.size_in_bytes(),
            )
        };
        if let Err(status) = enqueued {
            self.host = Some(host);
            return Err(status.into());
        }

        self.call.provider().add_deferred_release(host.into_block());
        self.device = Some(device);
        tracing::trace!(
            kernel = %self.call.kernel_name(),
            stream = %self.call.stream_handle(),
            count = self.count,
            "staging copy enqueued"
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Host copy, if it has not been handed off yet.
    pub fn host_slice(&self) -> Option<&[T]> {
        self.host.as_ref().map(PinnedBuffer::as_slice)
    }

    pub fn host_slice_mut(&mut self) -> Option<&mut [T]> {
        self.host.as_mut().map(PinnedBuffer::as_mut_slice)
    }

    pub fn host_ptr(&self) -> *const T {
        self.host
            .as_ref()
            .map(PinnedBuffer::as_ptr)
            .unwrap_or(std::ptr::null())
    }

    /// Device copy address, null before `copy_to_device`. Never dereference
    /// on the host.
    pub fn device_ptr(&self) -> DevicePtr {
        self.device
            .as_ref()
            .map(ScratchBuffer::ptr)
            .unwrap_or(DevicePtr::NULL)
    }

    /// Whether a transfer has been enqueued.
    pub fn is_on_device(&self) -> bool {
        self.device.is_some()
    }
}

#[cfg(test)]
#[path = "staging_tests.rs"]
mod tests;
