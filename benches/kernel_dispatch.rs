//! Kernel dispatch benchmarks.
//!
//! Measures the host-side cost of the asynchronous protocol and of staging
//! parameter data on the emulated device.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use gg_accel::config::AccelConfig;
use gg_accel::device::{DeviceStream, LaunchConfig};
use gg_accel::kernel::{AsyncKernel, KernelCall, KernelError, OpContext, OpKernel, StagingBuffer};
use gg_accel::Accelerator;

struct LaunchOnly;

impl AsyncKernel for LaunchOnly {
    fn compute(&self, call: &KernelCall<'_>) -> Result<(), KernelError> {
        call.launch("noop", LaunchConfig::for_num_elems(1), &[])
    }
}

struct Stage {
    values: Vec<f32>,
}

impl AsyncKernel for Stage {
    fn compute(&self, call: &KernelCall<'_>) -> Result<(), KernelError> {
        let mut staged = StagingBuffer::from_slice(call, &self.values)?;
        staged.copy_to_device()?;
        call.launch(
            "consume",
            LaunchConfig::for_num_elems(self.values.len() as u32),
            &[staged.device_ptr()],
        )
    }
}

fn bench_execute_async(c: &mut Criterion) {
    let mut group = c.benchmark_group("execute_async");

    let acc = Accelerator::new(AccelConfig::default());
    let stream = acc.create_stream().unwrap();
    let ctx = OpContext::new(stream.clone());
    let kernel = acc.kernel("launch_only", LaunchOnly);

    group.throughput(Throughput::Elements(1));
    group.bench_function("launch_and_done", |b| {
        b.iter(|| {
            kernel.execute_async(&ctx, Box::new(|| {})).unwrap();
        });
        stream.synchronize().unwrap();
    });

    group.finish();
}

fn bench_staging(c: &mut Criterion) {
    let mut group = c.benchmark_group("staging_copy");

    for (name, count) in [("1k", 1024usize), ("64k", 64 * 1024), ("1m", 1024 * 1024)] {
        let acc = Accelerator::new(AccelConfig::default());
        let stream = acc.create_stream().unwrap();
        let ctx = OpContext::new(stream.clone());
        let kernel = acc.kernel(
            "stage",
            Stage {
                values: vec![1.0; count],
            },
        );

        group.throughput(Throughput::Bytes((count * 4) as u64));
        group.bench_function(BenchmarkId::new("stage", name), |b| {
            b.iter(|| {
                kernel.execute_async(&ctx, Box::new(|| {})).unwrap();
                // Keep pinned usage bounded across iterations.
                acc.end_run(&stream).unwrap();
            });
            stream.synchronize().unwrap();
        });
    }

    group.finish();
}

fn bench_math_handles(c: &mut Criterion) {
    let acc = Accelerator::new(AccelConfig::default());
    let stream = acc.create_stream().unwrap();
    let ctx = OpContext::new(stream);
    let base = gg_accel::kernel::KernelBase::new("handles", acc.provider());

    c.bench_function("blas_handle_lookup", |b| {
        b.iter(|| {
            let call = KernelCall::new(&base, &ctx);
            black_box(call.blas_handle())
        })
    });
}

criterion_group!(benches, bench_execute_async, bench_staging, bench_math_handles);
criterion_main!(benches);
