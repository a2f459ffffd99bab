//! Completion continuations.
//!
//! A `DoneCallback` is boxed and handed to the stream as a host callback;
//! the stream runs it once after all earlier work and the box is freed when
//! the call returns. `Completion` adapts the callback into a future for
//! dispatch engines running on tokio.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::error::KernelError;
use crate::device::{DeviceStatus, DeviceStream};
use crate::telemetry;

/// Single-shot "this operator's device work is done" notification.
pub type DoneCallback = Box<dyn FnOnce() + Send + 'static>;

/// Enqueue `done` on `stream` behind everything already issued to it.
pub(crate) fn enqueue_done(
    stream: &dyn DeviceStream,
    kernel: &str,
    done: DoneCallback,
) -> Result<(), DeviceStatus> {
    let kernel = kernel.to_string();
    let handle = stream.handle();
    stream.add_callback(Box::new(move || {
        tracing::trace!(kernel = %kernel, stream = %handle, "kernel completion fired");
        telemetry::record_completion(&kernel);
        done();
    }))
}

/// Future resolved when the paired `DoneCallback` runs.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<()>,
}

/// Create a continuation and the future that observes it.
pub fn completion() -> (DoneCallback, Completion) {
    let (tx, rx) = oneshot::channel();
    let done: DoneCallback = Box::new(move || {
        let _ = tx.send(());
    });
    (done, Completion { rx })
}

impl Completion {
    /// Block the current thread until the continuation fires. Must not be
    /// called from inside an async runtime.
    pub fn blocking_wait(self) -> Result<(), KernelError> {
        self.rx.blocking_recv().map_err(|_| KernelError::Abandoned)
    }

    /// Non-blocking check. `Ok(true)` once fired.
    pub fn try_fired(&mut self) -> Result<bool, KernelError> {
        match self.rx.try_recv() {
            Ok(()) => Ok(true),
            Err(oneshot::error::TryRecvError::Empty) => Ok(false),
            Err(oneshot::error::TryRecvError::Closed) => Err(KernelError::Abandoned),
        }
    }
}

impl Future for Completion {
    type Output = Result<(), KernelError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.map_err(|_| KernelError::Abandoned))
    }
}
