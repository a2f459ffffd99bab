// Copyright 2024-2026 GG-ACCEL Contributors
// Licensed under the Apache License, Version 2.0

//! Emulated accelerator: device memory, in-order streams and a pinned host
//! allocator, all in software.
//!
//! Each `MockStream` owns a worker thread that drains its command queue in
//! issue order, so copies, launches and callbacks observe the same ordering
//! rules a hardware stream gives. Streams can be held to keep enqueued work
//! pending while a test inspects state.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};

use super::allocator::GpuAllocator;
use super::error::{DeviceStatus, ErrorState, GpuError};
use super::host::{HostAllocator, PinnedBlock};
use super::memory::{byte_len, DevicePtr, DeviceRepr, GpuAllocation};
use super::stream::{DeviceStream, LaunchConfig, StreamCallback, StreamHandle};

const DEVICE_ALIGN: u64 = 256;
const BASE_ADDRESS: u64 = 0x7f00_0000_0000;

// -- Device memory ------------------------------------------------------------

struct Region {
    id: u64,
    data: Vec<u8>,
}

struct DeviceState {
    regions: BTreeMap<u64, Region>,
    next_addr: u64,
    total: usize,
}

impl DeviceState {
    /// Base address and offset of a `len`-byte range starting at `ptr`.
    fn locate(&self, ptr: DevicePtr, len: usize) -> Option<(u64, usize)> {
        let (base, region) = self.regions.range(..=ptr.0).next_back()?;
        let offset = (ptr.0 - base) as usize;
        if offset.checked_add(len)? <= region.data.len() {
            Some((*base, offset))
        } else {
            None
        }
    }
}

/// Software device with addressable memory and a sticky last-error cell.
pub struct MockDevice {
    device_index: usize,
    capacity: usize,
    next_id: AtomicU64,
    next_stream: AtomicU64,
    state: Mutex<DeviceState>,
    errors: Arc<ErrorState>,
    failing_launches: Mutex<HashSet<String>>,
    streams: Mutex<Vec<Weak<MockStream>>>,
}

impl MockDevice {
    pub fn new(capacity: usize, device_index: usize) -> Arc<Self> {
        Arc::new(Self {
            device_index,
            capacity,
            next_id: AtomicU64::new(1),
            next_stream: AtomicU64::new(1),
            state: Mutex::new(DeviceState {
                regions: BTreeMap::new(),
                next_addr: BASE_ADDRESS,
                total: 0,
            }),
            errors: Arc::new(ErrorState::new()),
            failing_launches: Mutex::new(HashSet::new()),
            streams: Mutex::new(Vec::new()),
        })
    }

    pub fn device_index(&self) -> usize {
        self.device_index
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn error_state(&self) -> Arc<ErrorState> {
        self.errors.clone()
    }

    /// Spawn a new stream with its own worker thread.
    pub fn create_stream(self: &Arc<Self>) -> Result<Arc<MockStream>, GpuError> {
        let handle = StreamHandle(self.next_stream.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel();
        let gate = Arc::new(Gate::default());
        let events = Arc::new(Mutex::new(Vec::new()));

        let worker = {
            let device = self.clone();
            let gate = gate.clone();
            let events = events.clone();
            thread::Builder::new()
                .name(format!("gg-accel-{}", handle))
                .spawn(move || run_stream(device, receiver, gate, events))
                .map_err(|e| GpuError::AllocationFailed(format!("stream worker spawn: {}", e)))?
        };

        let stream = Arc::new(MockStream {
            handle,
            worker_id: worker.thread().id(),
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            gate,
            events,
            enqueued: AtomicU64::new(0),
            device: self.clone(),
        });

        let mut streams = self.streams.lock();
        streams.retain(|s| s.strong_count() > 0);
        streams.push(Arc::downgrade(&stream));
        tracing::debug!(stream = %handle, device = self.device_index, "stream created");
        Ok(stream)
    }

    /// Make the next launch of `kernel` report a launch failure through the
    /// last-error cell, the way a bad launch configuration surfaces.
    pub fn fail_next_launch(&self, kernel: &str) {
        self.failing_launches.lock().insert(kernel.to_string());
    }

    /// Record an error as if an earlier asynchronous operation had faulted.
    pub fn inject_error(&self, status: DeviceStatus) {
        self.errors.record(status);
    }

    /// Count of live (un-freed) allocations.
    pub fn leak_count(&self) -> usize {
        self.state.lock().regions.len()
    }

    pub fn write(&self, ptr: DevicePtr, bytes: &[u8]) -> Result<(), DeviceStatus> {
        let mut state = self.state.lock();
        let (base, offset) = state.locate(ptr, bytes.len()).ok_or_else(|| {
            DeviceStatus::illegal_address(format!("write of {} bytes at {}", bytes.len(), ptr))
        })?;
        if let Some(region) = state.regions.get_mut(&base) {
            region.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
        Ok(())
    }

    /// Read device memory back to the host. Synchronize the writing stream
    /// first; this does not wait for pending work.
    pub fn read(&self, ptr: DevicePtr, len: usize) -> Result<Vec<u8>, DeviceStatus> {
        let state = self.state.lock();
        let (base, offset) = state.locate(ptr, len).ok_or_else(|| {
            DeviceStatus::illegal_address(format!("read of {} bytes at {}", len, ptr))
        })?;
        Ok(state
            .regions
            .get(&base)
            .map(|r| r.data[offset..offset + len].to_vec())
            .unwrap_or_default())
    }

    pub fn read_as<T: DeviceRepr>(&self, ptr: DevicePtr, count: usize) -> Result<Vec<T>, DeviceStatus> {
        let len = byte_len::<T>(count)
            .ok_or_else(|| DeviceStatus::invalid_value(format!("size overflow: {} elements", count)))?;
        let bytes = self.read(ptr, len)?;
        let mut out = Vec::<T>::with_capacity(count);
        // DeviceRepr accepts any bit pattern and `out` has room for `len` bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), out.as_mut_ptr().cast::<u8>(), len);
            out.set_len(count);
        }
        Ok(out)
    }

    fn take_launch_failure(&self, kernel: &str) -> bool {
        self.failing_launches.lock().remove(kernel)
    }

    /// Wait for every live stream, like a device-wide free does.
    fn synchronize_streams(&self) {
        let live: Vec<Arc<MockStream>> = self
            .streams
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for stream in live {
            if let Err(status) = stream.synchronize() {
                tracing::warn!(stream = %stream.handle, %status, "synchronize before free failed");
            }
        }
    }
}

impl GpuAllocator for MockDevice {
    fn allocate(&self, size: usize) -> Result<GpuAllocation, GpuError> {
        let mut s = self.state.lock();
        if size > self.capacity - s.total {
            return Err(GpuError::OutOfMemory {
                required: size as u64,
                available: (self.capacity - s.total) as u64,
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let base = s.next_addr;
        let span = (size.max(1) as u64).div_ceil(DEVICE_ALIGN) * DEVICE_ALIGN;
        s.next_addr += span;
        s.regions.insert(
            base,
            Region {
                id,
                data: vec![0u8; size],
            },
        );
        s.total += size;
        Ok(GpuAllocation {
            id,
            ptr: DevicePtr(base),
            size,
            device_index: self.device_index,
        })
    }

    fn deallocate(&self, allocation: &GpuAllocation) -> Result<(), GpuError> {
        // Physical frees wait for in-flight work so nothing enqueued can
        // touch reclaimed memory.
        self.synchronize_streams();
        let mut s = self.state.lock();
        match s.regions.get(&allocation.ptr.0) {
            Some(region) if region.id == allocation.id => {
                let size = region.data.len();
                s.regions.remove(&allocation.ptr.0);
                s.total -= size;
                Ok(())
            }
            _ => Err(GpuError::AllocationFailed(format!(
                "double-free or unknown allocation id={}",
                allocation.id
            ))),
        }
    }

    fn allocated_bytes(&self) -> usize {
        self.state.lock().total
    }
}

// -- Streams ------------------------------------------------------------------

/// Host source pointer moved onto the worker thread.
struct HostSrc(*const u8);

// Safety: the caller of `memcpy_htod_async` guarantees the region stays
// valid until the copy executes.
unsafe impl Send for HostSrc {}

enum Op {
    Copy {
        dst: DevicePtr,
        src: HostSrc,
        bytes: usize,
    },
    DeviceCopy {
        dst: DevicePtr,
        src: DevicePtr,
        bytes: usize,
    },
    Launch {
        kernel: String,
    },
    Callback(StreamCallback),
    Marker(mpsc::Sender<()>),
}

/// Executed stream operation, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Copy { dst: DevicePtr, bytes: usize },
    DeviceCopy { dst: DevicePtr, src: DevicePtr, bytes: usize },
    Launch { kernel: String },
    Callback,
}

#[derive(Default)]
struct Gate {
    held: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn wait_open(&self) {
        let mut held = self.held.lock();
        while *held {
            self.cv.wait(&mut held);
        }
    }
}

/// Keeps a stream from executing further work until dropped.
pub struct StreamHold {
    gate: Arc<Gate>,
}

impl Drop for StreamHold {
    fn drop(&mut self) {
        *self.gate.held.lock() = false;
        self.gate.cv.notify_all();
    }
}

fn run_stream(
    device: Arc<MockDevice>,
    receiver: mpsc::Receiver<Op>,
    gate: Arc<Gate>,
    events: Arc<Mutex<Vec<StreamEvent>>>,
) {
    while let Ok(op) = receiver.recv() {
        gate.wait_open();
        match op {
            Op::Copy { dst, src, bytes } => {
                if bytes > 0 {
                    let data = unsafe { std::slice::from_raw_parts(src.0, bytes) };
                    if let Err(status) = device.write(dst, data) {
                        device.errors.record(status);
                    }
                }
                events.lock().push(StreamEvent::Copy { dst, bytes });
            }
            Op::DeviceCopy { dst, src, bytes } => {
                if bytes > 0 {
                    if let Err(status) = device.read(src, bytes).and_then(|data| device.write(dst, &data)) {
                        device.errors.record(status);
                    }
                }
                events.lock().push(StreamEvent::DeviceCopy { dst, src, bytes });
            }
            Op::Launch { kernel } => {
                events.lock().push(StreamEvent::Launch { kernel });
            }
            Op::Callback(callback) => {
                events.lock().push(StreamEvent::Callback);
                if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                    tracing::error!("stream callback panicked");
                }
            }
            Op::Marker(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// In-order software stream backed by a worker thread.
pub struct MockStream {
    handle: StreamHandle,
    worker_id: ThreadId,
    sender: Mutex<Option<mpsc::Sender<Op>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    gate: Arc<Gate>,
    events: Arc<Mutex<Vec<StreamEvent>>>,
    enqueued: AtomicU64,
    device: Arc<MockDevice>,
}

impl MockStream {
    /// Stop executing work until the returned guard is dropped. Work
    /// already running finishes; nothing new starts.
    pub fn hold(&self) -> StreamHold {
        *self.gate.held.lock() = true;
        StreamHold {
            gate: self.gate.clone(),
        }
    }

    /// Snapshot of executed operations.
    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().clone()
    }

    pub fn executed(&self) -> usize {
        self.events.lock().len()
    }

    /// Copies, launches and callbacks ever enqueued.
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::SeqCst)
    }

    pub fn device(&self) -> &Arc<MockDevice> {
        &self.device
    }

    fn send(&self, op: Op) -> Result<(), DeviceStatus> {
        let counted = !matches!(op, Op::Marker(_));
        let sender = self.sender.lock();
        let sender = sender
            .as_ref()
            .ok_or_else(|| DeviceStatus::invalid_value(format!("{} destroyed", self.handle)))?;
        sender
            .send(op)
            .map_err(|_| DeviceStatus::invalid_value(format!("{} worker exited", self.handle)))?;
        if counted {
            self.enqueued.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl DeviceStream for MockStream {
    fn handle(&self) -> StreamHandle {
        self.handle
    }

    unsafe fn memcpy_htod_async(
        &self,
        dst: DevicePtr,
        src: *const u8,
        bytes: usize,
    ) -> Result<(), DeviceStatus> {
        if bytes > 0 && src.is_null() {
            return Err(DeviceStatus::invalid_value("null host source"));
        }
        self.send(Op::Copy {
            dst,
            src: HostSrc(src),
            bytes,
        })
    }

    fn memcpy_dtod_async(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        bytes: usize,
    ) -> Result<(), DeviceStatus> {
        self.send(Op::DeviceCopy { dst, src, bytes })
    }

    fn launch(
        &self,
        kernel: &str,
        config: LaunchConfig,
        _args: &[DevicePtr],
    ) -> Result<(), DeviceStatus> {
        if self.device.take_launch_failure(kernel) {
            self.device.errors.record(DeviceStatus::launch_failure(format!(
                "kernel '{}' failed to launch with grid {:?}",
                kernel, config.grid_dim
            )));
            return Ok(());
        }
        self.send(Op::Launch {
            kernel: kernel.to_string(),
        })
    }

    fn add_callback(&self, callback: StreamCallback) -> Result<(), DeviceStatus> {
        self.send(Op::Callback(callback))
    }

    fn synchronize(&self) -> Result<(), DeviceStatus> {
        // A callback waiting on its own stream would never return.
        if thread::current().id() == self.worker_id {
            return Ok(());
        }
        let (tx, rx) = mpsc::channel();
        self.send(Op::Marker(tx))?;
        rx.recv()
            .map_err(|_| DeviceStatus::invalid_value(format!("{} worker exited", self.handle)))
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if thread::current().id() != self.worker_id {
                let _ = worker.join();
            }
        }
    }
}

// -- Pinned host allocator ----------------------------------------------------

struct PinnedState {
    live: HashMap<u64, usize>,
    total: usize,
}

/// Pinned host allocator with a capacity limit and a release log.
pub struct MockPinnedAllocator {
    capacity: usize,
    next_id: AtomicU64,
    state: Mutex<PinnedState>,
    released: Mutex<Vec<u64>>,
}

impl MockPinnedAllocator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_id: AtomicU64::new(1),
            state: Mutex::new(PinnedState {
                live: HashMap::new(),
                total: 0,
            }),
            released: Mutex::new(Vec::new()),
        }
    }

    /// Ids of released blocks, in release order.
    pub fn release_log(&self) -> Vec<u64> {
        self.released.lock().clone()
    }

    pub fn release_count(&self, id: u64) -> usize {
        self.released.lock().iter().filter(|r| **r == id).count()
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }
}

impl HostAllocator for MockPinnedAllocator {
    fn allocate_pinned(&self, bytes: usize) -> Result<PinnedBlock, GpuError> {
        let mut s = self.state.lock();
        if bytes > self.capacity - s.total {
            return Err(GpuError::PinnedOutOfMemory {
                required: bytes as u64,
                available: (self.capacity - s.total) as u64,
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let block = PinnedBlock::alloc_zeroed(id, bytes)
            .ok_or_else(|| GpuError::AllocationFailed(format!("host allocation of {} bytes", bytes)))?;
        s.live.insert(id, bytes);
        s.total += bytes;
        Ok(block)
    }

    fn free_pinned(&self, block: PinnedBlock) {
        let mut s = self.state.lock();
        match s.live.remove(&block.id()) {
            Some(size) => s.total -= size,
            None => tracing::error!(id = block.id(), "release of unknown pinned block"),
        }
        self.released.lock().push(block.id());
    }

    fn pinned_bytes(&self) -> usize {
        self.state.lock().total
    }
}

#[cfg(test)]
#[path = "mock_tests.rs"]
mod tests;
