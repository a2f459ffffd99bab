// Copyright 2024-2026 GG-ACCEL Contributors
// Licensed under the Apache License, Version 2.0

//! Device handle provider: the shared services every kernel on a device
//! reaches through a non-owning reference.

use std::any::TypeId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use serde::Serialize;

use super::allocator::{DeviceBlock, GpuAllocator};
use super::arena::ArenaAllocator;
use super::deferred::DeferredReleasePool;
use super::error::{DeviceStatus, ErrorState, GpuError};
use super::host::{HostAllocator, PinnedBlock};
use super::memory::DevicePtr;
use super::mock::{MockDevice, MockPinnedAllocator};
use super::stream::{DeviceStream, StreamHandle};
use crate::config::AccelConfig;

/// Static device capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceProperties {
    pub name: String,
    pub total_memory: u64,
    pub compute_capability: (u32, u32),
    pub multiprocessor_count: u32,
    pub max_threads_per_block: u32,
    pub warp_size: u32,
}

impl DeviceProperties {
    pub fn emulated(total_memory: u64) -> Self {
        Self {
            name: "GG-ACCEL emulated device".to_string(),
            total_memory,
            compute_capability: (8, 0),
            multiprocessor_count: 1,
            max_threads_per_block: 1024,
            warp_size: 32,
        }
    }
}

/// Vendor math libraries that keep per-thread handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MathLibrary {
    Blas,
    Dnn,
}

/// Opaque math library handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MathHandle {
    pub library: MathLibrary,
    pub id: u64,
}

/// Services a kernel consumes from its device.
pub trait DeviceProvider: Send + Sync {
    fn device_id(&self) -> usize;

    fn device_properties(&self) -> &DeviceProperties;

    /// Allocator for pinned host memory, if the device has one.
    fn host_allocator(&self) -> Option<Arc<dyn HostAllocator>>;

    /// Pooled scratch memory for use on `stream`.
    fn scratch_buffer(&self, bytes: usize, stream: StreamHandle) -> Result<DeviceBlock, GpuError>;

    /// Scratch memory that bypasses pooling.
    fn transient_scratch_buffer(&self, bytes: usize) -> Result<DeviceBlock, GpuError>;

    /// Take ownership of a pinned block that an in-flight copy may still read.
    fn add_deferred_release(&self, block: PinnedBlock);

    /// Device buffer holding at least `count` copies of `one`, the byte
    /// image of one element of type `elem`. The fill is enqueued on
    /// `stream`, so the buffer is only valid for work on that stream.
    fn const_ones(
        &self,
        elem: TypeId,
        one: &[u8],
        count: usize,
        stream: &dyn DeviceStream,
    ) -> Result<DevicePtr, GpuError>;

    /// Handle for `library` owned by the calling thread.
    fn math_handle(&self, library: MathLibrary) -> MathHandle;

    /// Get-and-clear the device runtime's last error.
    fn take_last_error(&self) -> Option<DeviceStatus>;
}

/// Cached buffer of ones, grown to the largest count requested.
struct ConstOnes {
    block: DeviceBlock,
    count: usize,
}

/// Stock provider composing an arena over a device allocator, a pinned
/// host allocator and the deferred-release pool.
pub struct DeviceContext {
    device_id: usize,
    properties: DeviceProperties,
    arena: Arc<ArenaAllocator>,
    host_allocator: Arc<dyn HostAllocator>,
    // Dropped before `deferred`: freeing device memory waits for the
    // streams, so the fills have read their host copies by then.
    const_ones: DashMap<(StreamHandle, TypeId), ConstOnes>,
    deferred: DeferredReleasePool,
    math_handles: DashMap<(ThreadId, MathLibrary), MathHandle>,
    next_handle: AtomicU64,
    errors: Arc<ErrorState>,
}

impl DeviceContext {
    pub fn new(
        device_id: usize,
        properties: DeviceProperties,
        device_allocator: Arc<dyn GpuAllocator>,
        host_allocator: Arc<dyn HostAllocator>,
        errors: Arc<ErrorState>,
        arena_max_cached: usize,
    ) -> Self {
        Self {
            device_id,
            properties,
            arena: Arc::new(ArenaAllocator::new(device_allocator, arena_max_cached)),
            deferred: DeferredReleasePool::new(host_allocator.clone()),
            host_allocator,
            const_ones: DashMap::new(),
            math_handles: DashMap::new(),
            next_handle: AtomicU64::new(1),
            errors,
        }
    }

    /// Provider over an emulated device, sized from configuration.
    pub fn emulated(device: &Arc<MockDevice>, config: &AccelConfig) -> Self {
        let host: Arc<dyn HostAllocator> = Arc::new(MockPinnedAllocator::new(config.pinned_memory));
        Self::new(
            device.device_index(),
            DeviceProperties::emulated(device.capacity() as u64),
            device.clone(),
            host,
            device.error_state(),
            config.arena_max_cached,
        )
    }

    pub fn arena(&self) -> &Arc<ArenaAllocator> {
        &self.arena
    }

    pub fn deferred(&self) -> &DeferredReleasePool {
        &self.deferred
    }

    /// End of a run on `stream`: schedule every deferred pinned block to be
    /// freed behind the work already on that stream.
    pub fn on_run_end(&self, stream: &dyn DeviceStream) -> Result<usize, DeviceStatus> {
        self.deferred.release_after(stream)
    }

    /// Upload `count` copies of `one` into a fresh bypass block on `stream`.
    fn fill_ones(
        &self,
        one: &[u8],
        count: usize,
        stream: &dyn DeviceStream,
    ) -> Result<DeviceBlock, GpuError> {
        let bytes = one.len().checked_mul(count).ok_or_else(|| {
            GpuError::AllocationFailed(format!("size overflow: {} elements", count))
        })?;

        let mut host = self.host_allocator.allocate_pinned(bytes)?;
        // The block is at least `bytes` long and exclusively ours.
        let image = unsafe { std::slice::from_raw_parts_mut(host.as_mut_ptr(), bytes) };
        for chunk in image.chunks_exact_mut(one.len()) {
            chunk.copy_from_slice(one);
        }

        let block = match self.arena.reserve(bytes) {
            Ok(allocation) => DeviceBlock::new(allocation, self.arena.clone()),
            Err(e) => {
                self.host_allocator.free_pinned(host);
                return Err(e);
            }
        };
        // The host block goes to the deferred pool, which outlives the copy.
        if let Err(status) = unsafe { stream.memcpy_htod_async(block.ptr(), host.as_ptr(), bytes) } {
            self.host_allocator.free_pinned(host);
            return Err(GpuError::Device(status));
        }
        self.deferred.add(host);
        Ok(block)
    }
}

impl DeviceProvider for DeviceContext {
    fn device_id(&self) -> usize {
        self.device_id
    }

    fn device_properties(&self) -> &DeviceProperties {
        &self.properties
    }

    fn host_allocator(&self) -> Option<Arc<dyn HostAllocator>> {
        Some(self.host_allocator.clone())
    }

    fn scratch_buffer(&self, bytes: usize, stream: StreamHandle) -> Result<DeviceBlock, GpuError> {
        let allocation = self.arena.allocate_on(bytes, Some(stream))?;
        Ok(DeviceBlock::new(allocation, self.arena.clone()))
    }

    fn transient_scratch_buffer(&self, bytes: usize) -> Result<DeviceBlock, GpuError> {
        let allocation = self.arena.reserve(bytes)?;
        Ok(DeviceBlock::new(allocation, self.arena.clone()))
    }

    fn add_deferred_release(&self, block: PinnedBlock) {
        self.deferred.add(block);
    }

    fn const_ones(
        &self,
        elem: TypeId,
        one: &[u8],
        count: usize,
        stream: &dyn DeviceStream,
    ) -> Result<DevicePtr, GpuError> {
        if count == 0 || one.is_empty() {
            return Ok(DevicePtr::NULL);
        }
        let key = (stream.handle(), elem);
        if let Some(cached) = self.const_ones.get(&key) {
            if cached.count >= count {
                return Ok(cached.block.ptr());
            }
        }

        let block = self.fill_ones(one, count, stream)?;
        let ptr = block.ptr();
        tracing::debug!(stream = %stream.handle(), count, "const ones buffer grown");
        // The replaced buffer is freed outside the map's shard lock.
        let replaced = self.const_ones.insert(key, ConstOnes { block, count });
        drop(replaced);
        Ok(ptr)
    }

    fn math_handle(&self, library: MathLibrary) -> MathHandle {
        let key = (thread::current().id(), library);
        *self.math_handles.entry(key).or_insert_with(|| MathHandle {
            library,
            id: self.next_handle.fetch_add(1, Ordering::Relaxed),
        })
    }

    fn take_last_error(&self) -> Option<DeviceStatus> {
        self.errors.take()
    }
}
