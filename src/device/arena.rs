// Copyright 2024-2026 GG-ACCEL Contributors
// Licensed under the Apache License, Version 2.0

//! Pooled device allocator.
//!
//! Requests are rounded up to a power-of-two size class. Released blocks go
//! onto a free list keyed by size class and by the stream they were used on;
//! a block is only handed out again for the same stream, where stream order
//! guarantees the previous user's work runs first. `reserve` skips the free
//! lists entirely and its blocks are physically freed on release.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::allocator::GpuAllocator;
use super::error::GpuError;
use super::memory::GpuAllocation;
use super::stream::StreamHandle;

/// Smallest size class handed out by the arena.
pub const MIN_BLOCK: usize = 256;

#[derive(Debug, Clone, Copy)]
struct InUse {
    class: usize,
    stream: Option<StreamHandle>,
    reserved: bool,
}

#[derive(Default)]
struct ArenaState {
    free: HashMap<(usize, Option<StreamHandle>), Vec<GpuAllocation>>,
    in_use: HashMap<u64, InUse>,
    in_use_bytes: usize,
    cached_bytes: usize,
    hits: u64,
    misses: u64,
}

/// Arena statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaStats {
    pub in_use_bytes: usize,
    pub cached_bytes: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct ArenaAllocator {
    backing: Arc<dyn GpuAllocator>,
    max_cached_bytes: usize,
    state: Mutex<ArenaState>,
}

/// `None` when no power of two can hold `size`.
fn size_class(size: usize) -> Option<usize> {
    size.max(MIN_BLOCK).checked_next_power_of_two()
}

impl ArenaAllocator {
    pub fn new(backing: Arc<dyn GpuAllocator>, max_cached_bytes: usize) -> Self {
        Self {
            backing,
            max_cached_bytes,
            state: Mutex::new(ArenaState::default()),
        }
    }

    /// Allocate a block for use on `stream`.
    pub fn allocate_on(
        &self,
        size: usize,
        stream: Option<StreamHandle>,
    ) -> Result<GpuAllocation, GpuError> {
        let class = size_class(size).ok_or(GpuError::OutOfMemory {
            required: size as u64,
            available: 0,
        })?;
        let mut s = self.state.lock();

        let cached = s.free.get_mut(&(class, stream)).and_then(Vec::pop);
        let allocation = match cached {
            Some(a) => {
                s.cached_bytes -= class;
                s.hits += 1;
                a
            }
            None => {
                s.misses += 1;
                drop(s);
                let a = self.backing.allocate(class)?;
                s = self.state.lock();
                a
            }
        };

        s.in_use.insert(
            allocation.id,
            InUse {
                class,
                stream,
                reserved: false,
            },
        );
        s.in_use_bytes += class;
        Ok(allocation)
    }

    /// Return every cached block to the backing allocator.
    pub fn trim(&self) -> usize {
        let drained: Vec<GpuAllocation> = {
            let mut s = self.state.lock();
            s.cached_bytes = 0;
            s.free.drain().flat_map(|(_, v)| v).collect()
        };
        let mut freed = 0;
        for a in &drained {
            match self.backing.deallocate(a) {
                Ok(()) => freed += a.size,
                Err(e) => tracing::warn!(id = a.id, error = %e, "arena trim failed"),
            }
        }
        freed
    }

    pub fn stats(&self) -> ArenaStats {
        let s = self.state.lock();
        ArenaStats {
            in_use_bytes: s.in_use_bytes,
            cached_bytes: s.cached_bytes,
            hits: s.hits,
            misses: s.misses,
        }
    }
}

impl GpuAllocator for ArenaAllocator {
    fn allocate(&self, size: usize) -> Result<GpuAllocation, GpuError> {
        self.allocate_on(size, None)
    }

    fn reserve(&self, size: usize) -> Result<GpuAllocation, GpuError> {
        let allocation = self.backing.reserve(size)?;
        let mut s = self.state.lock();
        s.in_use.insert(
            allocation.id,
            InUse {
                class: allocation.size,
                stream: None,
                reserved: true,
            },
        );
        s.in_use_bytes += allocation.size;
        Ok(allocation)
    }

    fn deallocate(&self, allocation: &GpuAllocation) -> Result<(), GpuError> {
        let mut s = self.state.lock();
        let entry = s.in_use.remove(&allocation.id).ok_or_else(|| {
            GpuError::AllocationFailed(format!(
                "double-free or unknown allocation id={}",
                allocation.id
            ))
        })?;
        s.in_use_bytes -= entry.class;

        if entry.reserved || s.cached_bytes + entry.class > self.max_cached_bytes {
            drop(s);
            return self.backing.deallocate(allocation);
        }

        s.cached_bytes += entry.class;
        s.free
            .entry((entry.class, entry.stream))
            .or_default()
            .push(allocation.clone());
        Ok(())
    }

    fn allocated_bytes(&self) -> usize {
        self.state.lock().in_use_bytes
    }
}

impl Drop for ArenaAllocator {
    fn drop(&mut self) {
        self.trim();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDevice;

    const S1: Option<StreamHandle> = Some(StreamHandle(1));
    const S2: Option<StreamHandle> = Some(StreamHandle(2));

    fn arena(max_cached: usize) -> (Arc<MockDevice>, ArenaAllocator) {
        let device = MockDevice::new(1 << 20, 0);
        let arena = ArenaAllocator::new(device.clone(), max_cached);
        (device, arena)
    }

    #[test]
    fn rounds_to_size_class() {
        assert_eq!(size_class(1), Some(MIN_BLOCK));
        assert_eq!(size_class(300), Some(512));
        assert_eq!(size_class(1024), Some(1024));
        assert_eq!(size_class(1 << 63), Some(1 << 63));
        assert_eq!(size_class((1 << 63) + 1), None);
    }

    #[test]
    fn unroundable_request_is_out_of_memory() {
        let (device, arena) = arena(1 << 16);
        let err = arena.allocate_on((1 << 63) + 1, S1).unwrap_err();
        assert!(matches!(err, GpuError::OutOfMemory { .. }));
        assert_eq!(arena.stats(), ArenaStats::default());
        assert_eq!(device.leak_count(), 0);
    }

    #[test]
    fn released_block_is_reused_on_same_stream() {
        let (device, arena) = arena(1 << 16);
        let a = arena.allocate_on(300, S1).unwrap();
        arena.deallocate(&a).unwrap();
        let b = arena.allocate_on(400, S1).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(arena.stats().hits, 1);
        assert_eq!(device.leak_count(), 1);
    }

    #[test]
    fn released_block_is_not_shared_across_streams() {
        let (device, arena) = arena(1 << 16);
        let a = arena.allocate_on(300, S1).unwrap();
        arena.deallocate(&a).unwrap();
        let b = arena.allocate_on(300, S2).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(device.leak_count(), 2);
    }

    #[test]
    fn reserve_bypasses_free_lists() {
        let (device, arena) = arena(1 << 16);
        let r = arena.reserve(300).unwrap();
        assert_eq!(r.size, 300);
        arena.deallocate(&r).unwrap();
        assert_eq!(arena.stats().cached_bytes, 0);
        assert_eq!(device.leak_count(), 0);
    }

    #[test]
    fn cache_limit_frees_overflow() {
        let (device, arena) = arena(512);
        let a = arena.allocate_on(512, S1).unwrap();
        let b = arena.allocate_on(512, S1).unwrap();
        arena.deallocate(&a).unwrap();
        arena.deallocate(&b).unwrap();
        assert_eq!(arena.stats().cached_bytes, 512);
        assert_eq!(device.leak_count(), 1);
    }

    #[test]
    fn double_release_is_detected() {
        let (_device, arena) = arena(1 << 16);
        let a = arena.allocate_on(64, S1).unwrap();
        arena.deallocate(&a).unwrap();
        assert!(matches!(
            arena.deallocate(&a),
            Err(GpuError::AllocationFailed(_))
        ));
    }

    #[test]
    fn trim_returns_cached_blocks() {
        let (device, arena) = arena(1 << 16);
        let a = arena.allocate_on(1000, S1).unwrap();
        arena.deallocate(&a).unwrap();
        assert_eq!(arena.trim(), 1024);
        assert_eq!(device.allocated_bytes(), 0);
    }
}
