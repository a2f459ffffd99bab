// Copyright 2024-2026 GG-ACCEL Contributors
// Licensed under the Apache License, Version 2.0

//! Deferred release of pinned host memory.
//!
//! A pinned block that backs an in-flight asynchronous copy must not be
//! freed until the copy has executed. Kernels hand such blocks to this pool;
//! the owner of the pool later calls `release_after` with the stream the
//! copies were issued on, which enqueues the frees behind all prior work.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::DeviceStatus;
use super::host::{HostAllocator, PinnedBlock};
use super::stream::DeviceStream;
use crate::telemetry;

pub struct DeferredReleasePool {
    allocator: Arc<dyn HostAllocator>,
    pending: Mutex<Vec<PinnedBlock>>,
    handed_off: AtomicU64,
}

impl DeferredReleasePool {
    pub fn new(allocator: Arc<dyn HostAllocator>) -> Self {
        Self {
            allocator,
            pending: Mutex::new(Vec::new()),
            handed_off: AtomicU64::new(0),
        }
    }

    /// Take ownership of a block whose memory may still be read by the device.
    pub fn add(&self, block: PinnedBlock) {
        telemetry::record_deferred_release(block.len());
        self.handed_off.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().push(block);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.lock().iter().map(PinnedBlock::len).sum()
    }

    /// Blocks ever handed to the pool.
    pub fn handed_off(&self) -> u64 {
        self.handed_off.load(Ordering::Relaxed)
    }

    /// Free every pending block once all work currently enqueued on `stream`
    /// has finished. Returns the number of blocks scheduled.
    ///
    /// If the callback cannot be registered the blocks go back to the pool.
    pub fn release_after(&self, stream: &dyn DeviceStream) -> Result<usize, DeviceStatus> {
        let blocks = std::mem::take(&mut *self.pending.lock());
        let count = blocks.len();
        if count == 0 {
            return Ok(0);
        }

        let batch = Arc::new(Mutex::new(Some(blocks)));
        let slot = batch.clone();
        let allocator = self.allocator.clone();
        let registered = stream.add_callback(Box::new(move || {
            if let Some(blocks) = slot.lock().take() {
                for block in blocks {
                    allocator.free_pinned(block);
                }
            }
        }));

        if let Err(status) = registered {
            if let Some(blocks) = batch.lock().take() {
                self.pending.lock().extend(blocks);
            }
            return Err(status);
        }
        tracing::debug!(stream = %stream.handle(), count, "deferred pinned release scheduled");
        Ok(count)
    }

    /// Free every pending block now. The caller asserts the device no longer
    /// reads any of them.
    pub fn drain(&self) -> usize {
        let blocks = std::mem::take(&mut *self.pending.lock());
        let count = blocks.len();
        for block in blocks {
            self.allocator.free_pinned(block);
        }
        count
    }
}

impl Drop for DeferredReleasePool {
    fn drop(&mut self) {
        let count = self.drain();
        if count > 0 {
            tracing::debug!(count, "deferred pinned blocks released at teardown");
        }
    }
}
