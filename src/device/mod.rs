//! Device-side collaborators consumed by the kernel layer.
//!
//! Streams, device and pinned host allocators, the deferred-release pool and
//! the provider that bundles them for one device. `mock` supplies a software
//! device implementing every trait here.

pub mod allocator;
pub mod arena;
pub mod deferred;
pub mod error;
pub mod host;
pub mod memory;
pub mod mock;
pub mod provider;
pub mod stream;

pub use allocator::{DeviceBlock, GpuAllocator};
pub use arena::{ArenaAllocator, ArenaStats};
pub use deferred::DeferredReleasePool;
pub use error::{DeviceStatus, ErrorState, GpuError};
pub use host::{HostAllocator, PinnedBlock, PinnedBuffer};
pub use memory::{as_bytes, byte_len, ConstOne, DevicePtr, DeviceRepr, GpuAllocation};
pub use mock::{MockDevice, MockPinnedAllocator, MockStream, StreamEvent, StreamHold};
pub use provider::{DeviceContext, DeviceProperties, DeviceProvider, MathHandle, MathLibrary};
pub use stream::{DeviceStream, LaunchConfig, StreamCallback, StreamHandle};
