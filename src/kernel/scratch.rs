//! Scratch memory for one kernel invocation.
//!
//! Pooled scratch comes from the device arena and is tagged with the call's
//! stream, so its storage is only recycled behind work on that stream.
//! Transient scratch bypasses the arena for allocations that would thrash
//! it; its storage is freed through the device allocator, which waits for
//! in-flight work before reclaiming.

use std::any::TypeId;
use std::marker::PhantomData;

use super::base::KernelCall;
use super::error::KernelError;
use crate::device::{
    as_bytes, byte_len, ConstOne, DeviceBlock, DevicePtr, DeviceRepr, HostAllocator, PinnedBuffer,
};
use crate::telemetry;

/// Which allocation tier a scratch buffer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScratchTier {
    Pooled,
    Transient,
}

impl ScratchTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScratchTier::Pooled => "pooled",
            ScratchTier::Transient => "transient",
        }
    }
}

/// Exclusively owned device buffer of `len` elements of `T`.
#[derive(Debug)]
pub struct ScratchBuffer<T: DeviceRepr> {
    block: DeviceBlock,
    len: usize,
    tier: ScratchTier,
    _marker: PhantomData<T>,
}

impl<T: DeviceRepr> ScratchBuffer<T> {
    /// Device address. Never dereference on the host.
    pub fn ptr(&self) -> DevicePtr {
        self.block.ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn size_in_bytes(&self) -> usize {
        self.len * std::mem::size_of::<T>()
    }

    /// Bytes actually reserved, at least `size_in_bytes`.
    pub fn capacity_bytes(&self) -> usize {
        self.block.size()
    }

    pub fn tier(&self) -> ScratchTier {
        self.tier
    }
}

fn bytes_for<T: DeviceRepr>(count: usize) -> Result<usize, KernelError> {
    byte_len::<T>(count)
        .ok_or_else(|| KernelError::AllocationFailed(format!("size overflow: {} elements", count)))
}

impl<'a> KernelCall<'a> {
    /// Pooled scratch for `count` elements, recycled only on this call's stream.
    pub fn scratch_buffer<T: DeviceRepr>(&self, count: usize) -> Result<ScratchBuffer<T>, KernelError> {
        let bytes = bytes_for::<T>(count)?;
        let block = self
            .provider()
            .scratch_buffer(bytes, self.stream_handle())?;
        telemetry::record_scratch_allocation(ScratchTier::Pooled.as_str(), bytes);
        Ok(ScratchBuffer {
            block,
            len: count,
            tier: ScratchTier::Pooled,
            _marker: PhantomData,
        })
    }

    /// Scratch for `count` elements that skips the arena.
    pub fn transient_scratch_buffer<T: DeviceRepr>(
        &self,
        count: usize,
    ) -> Result<ScratchBuffer<T>, KernelError> {
        let bytes = bytes_for::<T>(count)?;
        let block = self.provider().transient_scratch_buffer(bytes)?;
        telemetry::record_scratch_allocation(ScratchTier::Transient.as_str(), bytes);
        Ok(ScratchBuffer {
            block,
            len: count,
            tier: ScratchTier::Transient,
            _marker: PhantomData,
        })
    }

    /// Pinned host buffer for `count` elements.
    pub fn pinned_buffer<T: DeviceRepr>(&self, count: usize) -> Result<PinnedBuffer<T>, KernelError> {
        let allocator: std::sync::Arc<dyn HostAllocator> = self
            .provider()
            .host_allocator()
            .ok_or_else(|| KernelError::AllocationFailed("no pinned host allocator".to_string()))?;
        Ok(PinnedBuffer::allocate(allocator, count)?)
    }

    /// Device buffer of at least `count` ones of `T`, shared by every call
    /// on this stream. Null when `count` is zero.
    pub fn const_ones<T: ConstOne>(&self, count: usize) -> Result<DevicePtr, KernelError> {
        let ptr = self
            .provider()
            .const_ones(TypeId::of::<T>(), as_bytes(&[T::ONE]), count, self.stream())?;
        Ok(ptr)
    }
}
