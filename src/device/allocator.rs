// Copyright 2024-2026 GG-ACCEL Contributors
// Licensed under the Apache License, Version 2.0

//! Device allocator trait and the RAII block handle it hands out.

use std::sync::Arc;

use super::error::GpuError;
use super::memory::{DevicePtr, GpuAllocation};

/// Trait abstracting device memory allocation.
pub trait GpuAllocator: Send + Sync {
    fn allocate(&self, size: usize) -> Result<GpuAllocation, GpuError>;

    /// Allocate without going through any pooling logic the implementation
    /// houses in `allocate`. Plain allocators have nothing to bypass.
    fn reserve(&self, size: usize) -> Result<GpuAllocation, GpuError> {
        self.allocate(size)
    }

    fn deallocate(&self, allocation: &GpuAllocation) -> Result<(), GpuError>;

    fn allocated_bytes(&self) -> usize;
}

/// Exclusively owned device memory, returned to its allocator on drop.
pub struct DeviceBlock {
    allocation: Option<GpuAllocation>,
    allocator: Arc<dyn GpuAllocator>,
}

impl DeviceBlock {
    pub fn new(allocation: GpuAllocation, allocator: Arc<dyn GpuAllocator>) -> Self {
        Self {
            allocation: Some(allocation),
            allocator,
        }
    }

    pub fn ptr(&self) -> DevicePtr {
        self.allocation
            .as_ref()
            .map(|a| a.ptr)
            .unwrap_or(DevicePtr::NULL)
    }

    pub fn size(&self) -> usize {
        self.allocation.as_ref().map(|a| a.size).unwrap_or(0)
    }

    pub fn allocation(&self) -> Option<&GpuAllocation> {
        self.allocation.as_ref()
    }
}

impl std::fmt::Debug for DeviceBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBlock")
            .field("allocation", &self.allocation)
            .finish()
    }
}

impl Drop for DeviceBlock {
    fn drop(&mut self) {
        if let Some(alloc) = self.allocation.take() {
            if let Err(e) = self.allocator.deallocate(&alloc) {
                tracing::warn!(id = alloc.id, error = %e, "device block release failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "allocator_tests.rs"]
mod tests;
