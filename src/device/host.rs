// Copyright 2024-2026 GG-ACCEL Contributors
// Licensed under the Apache License, Version 2.0

//! Pinned host memory.
//!
//! Asynchronous host-to-device copies read straight from page-locked host
//! memory, so the source region must outlive the copy. `PinnedBuffer` owns
//! such a region and frees it through its allocator on drop; `into_block`
//! gives the region up without freeing it so it can be handed to a
//! deferred-release pool.

use std::alloc::Layout;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

use super::error::GpuError;
use super::memory::{byte_len, DeviceRepr};

/// Alignment of every pinned region.
pub const PINNED_ALIGN: usize = 256;

/// A raw pinned host region. Dropping it releases the memory immediately.
pub struct PinnedBlock {
    id: u64,
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

// Safety: the block exclusively owns its heap region; raw pointer access is
// gated behind &self / &mut self.
unsafe impl Send for PinnedBlock {}
unsafe impl Sync for PinnedBlock {}

impl PinnedBlock {
    /// Allocate a zeroed region of `len` bytes.
    pub fn alloc_zeroed(id: u64, len: usize) -> Option<Self> {
        let layout = Layout::from_size_align(len.max(1), PINNED_ALIGN).ok()?;
        // Non-zero size is guaranteed by the max(1) above.
        let raw = unsafe { std::alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)?;
        Some(Self {
            id,
            ptr,
            len,
            layout,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl std::fmt::Debug for PinnedBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedBlock")
            .field("id", &self.id)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for PinnedBlock {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// Allocator of page-locked host memory.
pub trait HostAllocator: Send + Sync {
    fn allocate_pinned(&self, bytes: usize) -> Result<PinnedBlock, GpuError>;

    /// Return a block. Taking it by value makes a second release of the
    /// same block unrepresentable.
    fn free_pinned(&self, block: PinnedBlock);

    fn pinned_bytes(&self) -> usize;
}

/// Typed owner of a pinned host region holding `len` values of `T`.
pub struct PinnedBuffer<T: DeviceRepr> {
    block: Option<PinnedBlock>,
    len: usize,
    allocator: Arc<dyn HostAllocator>,
    _marker: PhantomData<T>,
}

impl<T: DeviceRepr> PinnedBuffer<T> {
    pub fn allocate(allocator: Arc<dyn HostAllocator>, len: usize) -> Result<Self, GpuError> {
        let bytes = byte_len::<T>(len)
            .ok_or_else(|| GpuError::AllocationFailed(format!("size overflow: {} elements", len)))?;
        let block = allocator.allocate_pinned(bytes)?;
        Ok(Self {
            block: Some(block),
            len,
            allocator,
            _marker: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const T {
        match &self.block {
            Some(b) => b.as_ptr().cast::<T>(),
            None => std::ptr::null(),
        }
    }

    pub fn as_slice(&self) -> &[T] {
        match &self.block {
            // Zero-initialised, aligned to PINNED_ALIGN, and DeviceRepr
            // accepts every bit pattern.
            Some(b) => unsafe { std::slice::from_raw_parts(b.as_ptr().cast::<T>(), self.len) },
            None => &[],
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        let len = self.len;
        match &mut self.block {
            Some(b) => unsafe { std::slice::from_raw_parts_mut(b.as_mut_ptr().cast::<T>(), len) },
            None => &mut [],
        }
    }

    /// Give up ownership of the region without freeing it.
    pub fn into_block(mut self) -> PinnedBlock {
        match self.block.take() {
            Some(block) => block,
            None => unreachable!("pinned buffer always owns its block until consumed"),
        }
    }
}

impl<T: DeviceRepr> Drop for PinnedBuffer<T> {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            self.allocator.free_pinned(block);
        }
    }
}
