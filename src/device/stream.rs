// Copyright 2024-2026 GG-ACCEL Contributors
// Licensed under the Apache License, Version 2.0

//! Device stream abstraction.
//!
//! A stream is an ordered command queue: work enqueued on one stream executes
//! in issue order, and a callback added to a stream runs only after every
//! operation enqueued before it. Nothing here orders work across streams.

use std::fmt;

use super::error::DeviceStatus;
use super::memory::DevicePtr;

/// Opaque identifier of a device stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamHandle(pub u64);

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// Host function run by the device runtime once prior stream work is done.
pub type StreamCallback = Box<dyn FnOnce() + Send + 'static>;

/// Grid and block dimensions for a kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid_dim: (u32, u32, u32),
    pub block_dim: (u32, u32, u32),
    pub shared_mem_bytes: u32,
}

impl LaunchConfig {
    const THREADS_PER_BLOCK: u32 = 1024;

    /// One thread per element, 1024 threads per block.
    pub fn for_num_elems(n: u32) -> Self {
        let blocks = n.div_ceil(Self::THREADS_PER_BLOCK).max(1);
        Self {
            grid_dim: (blocks, 1, 1),
            block_dim: (Self::THREADS_PER_BLOCK, 1, 1),
            shared_mem_bytes: 0,
        }
    }

    pub fn total_threads(&self) -> u64 {
        let (gx, gy, gz) = self.grid_dim;
        let (bx, by, bz) = self.block_dim;
        gx as u64 * gy as u64 * gz as u64 * bx as u64 * by as u64 * bz as u64
    }
}

/// An ordered device command queue.
pub trait DeviceStream: Send + Sync {
    fn handle(&self) -> StreamHandle;

    /// Enqueue an asynchronous host-to-device copy of `bytes` bytes.
    ///
    /// # Safety
    ///
    /// `src` must point to at least `bytes` readable bytes of pinned host
    /// memory that stays allocated until the copy has executed on the
    /// stream, which may be long after this call returns.
    unsafe fn memcpy_htod_async(
        &self,
        dst: DevicePtr,
        src: *const u8,
        bytes: usize,
    ) -> Result<(), DeviceStatus>;

    /// Enqueue a device-to-device copy of `bytes` bytes. Both ranges must
    /// stay allocated until the copy has executed.
    fn memcpy_dtod_async(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        bytes: usize,
    ) -> Result<(), DeviceStatus>;

    /// Enqueue a named kernel.
    fn launch(
        &self,
        kernel: &str,
        config: LaunchConfig,
        args: &[DevicePtr],
    ) -> Result<(), DeviceStatus>;

    /// Enqueue a host callback after all work currently on the stream.
    ///
    /// The callback runs exactly once on a runtime-owned thread. If
    /// registration fails the callback is dropped without running.
    fn add_callback(&self, callback: StreamCallback) -> Result<(), DeviceStatus>;

    /// Block until all enqueued work has executed.
    fn synchronize(&self) -> Result<(), DeviceStatus>;
}
