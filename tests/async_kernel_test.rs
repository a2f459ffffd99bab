//! Integration tests for asynchronous kernel execution on the emulated device.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use gg_accel::config::AccelConfig;
use gg_accel::device::{DeviceStatus, DeviceStream, LaunchConfig, StreamEvent};
use gg_accel::kernel::{
    submit, AsyncKernel, KernelCall, KernelError, OpContext, OpKernel, StagingBuffer,
};
use gg_accel::Accelerator;

fn small_config() -> AccelConfig {
    AccelConfig {
        device_memory: 4 * 1024 * 1024,
        pinned_memory: 1024 * 1024,
        ..AccelConfig::default()
    }
}

/// Stages `alpha` as a one-element parameter block and launches `scale`.
struct Scale {
    alpha: f32,
    len: u32,
}

impl AsyncKernel for Scale {
    fn compute(&self, call: &KernelCall<'_>) -> Result<(), KernelError> {
        if self.len == 0 {
            return Err(KernelError::InvalidArgument("empty input".to_string()));
        }
        let mut params = StagingBuffer::filled(call, self.alpha, 1)?;
        params.copy_to_device()?;
        let workspace = call.scratch_buffer::<f32>(self.len as usize)?;
        call.launch(
            "scale",
            LaunchConfig::for_num_elems(self.len),
            &[params.device_ptr(), workspace.ptr()],
        )
    }
}

// === Completion ===

#[tokio::test]
async fn completion_resolves_after_device_work() {
    let acc = Accelerator::new(small_config());
    let stream = acc.create_stream().unwrap();
    let kernel = acc.kernel("scale", Scale { alpha: 2.0, len: 1024 });
    let ctx = OpContext::new(stream.clone());

    let completion = submit(&kernel, &ctx).unwrap();
    completion.await.unwrap();

    let events = stream.events();
    assert_eq!(events.last(), Some(&StreamEvent::Callback));
    assert!(events.contains(&StreamEvent::Launch {
        kernel: "scale".to_string()
    }));
}

#[tokio::test]
async fn pipelined_calls_complete_in_issue_order() {
    let acc = Accelerator::new(small_config());
    let stream = acc.create_stream().unwrap();
    let kernel = acc.kernel("scale", Scale { alpha: 0.5, len: 64 });
    let ctx = OpContext::new(stream.clone());

    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    for i in 0..8 {
        let order = order.clone();
        kernel
            .execute_async(&ctx, Box::new(move || order.lock().push(i)))
            .unwrap();
    }
    stream.synchronize().unwrap();

    assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());
    assert_eq!(acc.end_run(&stream).unwrap(), 8);
}

#[tokio::test]
async fn invalid_argument_fails_without_completion() {
    let acc = Accelerator::new(small_config());
    let stream = acc.create_stream().unwrap();
    let kernel = acc.kernel("scale", Scale { alpha: 1.0, len: 0 });
    let ctx = OpContext::new(stream.clone());

    let err = submit(&kernel, &ctx).unwrap_err();
    assert!(matches!(err, KernelError::InvalidArgument(_)));
    assert!(!err.is_fatal());
    assert_eq!(stream.enqueued(), 0);
}

#[tokio::test]
async fn device_fault_is_reported_once() {
    let acc = Accelerator::new(small_config());
    let stream = acc.create_stream().unwrap();
    let kernel = acc.kernel("scale", Scale { alpha: 1.0, len: 16 });
    let ctx = OpContext::new(stream.clone());

    acc.device()
        .inject_error(DeviceStatus::illegal_address("previous operator"));
    let err = submit(&kernel, &ctx).unwrap_err();
    assert_eq!(err.device_code(), Some(700));
    assert!(err.is_device_error());

    submit(&kernel, &ctx).unwrap().await.unwrap();
}

#[tokio::test]
async fn dropped_continuation_reports_abandoned() {
    let (done, completion) = gg_accel::kernel::completion();
    drop(done);
    assert!(matches!(completion.await, Err(KernelError::Abandoned)));
}

// === Concurrency ===

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_kernel_serves_many_streams() {
    let acc = Arc::new(Accelerator::new(small_config()));
    let kernel = Arc::new(acc.kernel("scale", Scale { alpha: 3.0, len: 256 }));
    let completions = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let acc = acc.clone();
        let kernel = kernel.clone();
        let completions = completions.clone();
        tasks.push(tokio::spawn(async move {
            let stream = acc.create_stream().unwrap();
            let ctx = OpContext::new(stream.clone());
            for _ in 0..10 {
                let completion = submit(kernel.as_ref(), &ctx).unwrap();
                completion.await.unwrap();
                completions.fetch_add(1, Ordering::SeqCst);
            }
            acc.end_run(&stream).unwrap();
            stream.synchronize().unwrap();
            stream.handle()
        }));
    }

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }
    handles.sort();
    handles.dedup();
    assert_eq!(handles.len(), 4);
    assert_eq!(completions.load(Ordering::SeqCst), 40);
}

#[test]
fn blocking_entry_point_is_rejected() {
    let acc = Accelerator::new(small_config());
    let stream = acc.create_stream().unwrap();
    let kernel = acc.kernel("scale", Scale { alpha: 1.0, len: 4 });

    assert!(kernel.is_async());
    let err = kernel.execute(&OpContext::new(stream.clone())).unwrap_err();
    assert_eq!(err.to_string(), "scale::execute is not implemented");
    assert_eq!(stream.enqueued(), 0);
}
