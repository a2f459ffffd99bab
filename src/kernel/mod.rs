//! Asynchronous kernel layer.
//!
//! Provides the kernel base that implements the asynchronous execution
//! protocol, per-call scratch allocation and host-to-device staging buffers.

mod base;
mod context;
mod done;
pub mod error;
mod scratch;
mod staging;

pub use base::{submit, AsyncKernel, DeviceKernel, KernelBase, KernelCall, OpKernel};
pub use context::{DeviceTensor, OpContext};
pub use done::{completion, Completion, DoneCallback};
pub use error::KernelError;
pub use scratch::{ScratchBuffer, ScratchTier};
pub use staging::StagingBuffer;
