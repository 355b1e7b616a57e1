//! Dispatch pipeline benchmarks using criterion.
//!
//! Run with: cargo bench --bench pipeline_bench
//!
//! Everything runs on the simulated runtime, so numbers measure host-side
//! dispatch overhead plus the configured simulated latency.

use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use accelpipe_device::{SimNetwork, SimulatedRuntime, SimulatorConfig};
use accelpipe_pipeline::{DispatchPipeline, PipelineConfig};
use accelpipe_source::{synthetic_frame, MemoryFrameSource};

const FRAME: usize = 4096;
const FRAMES: u64 = 60;

fn runtime(eve: usize, latency_us: u64) -> SimulatedRuntime {
    SimulatedRuntime::new(SimulatorConfig {
        eve_count: eve,
        dsp_count: 0,
        eve_latency_us: latency_us,
        dsp_latency_us: latency_us,
        frame_size: FRAME,
        ..SimulatorConfig::default()
    })
}

fn source() -> MemoryFrameSource {
    let frame = synthetic_frame(0, FRAME);
    let reference = SimNetwork::reference(&frame);
    MemoryFrameSource::new(vec![frame], reference).cycle(true)
}

fn run_once(config: &PipelineConfig, rt: &SimulatedRuntime) {
    let pipeline = DispatchPipeline::build(config.clone(), rt).unwrap();
    let result = pipeline.run(&mut source()).unwrap();
    assert!(result.passed);
}

/// Host overhead only: devices finish instantly.
fn bench_dispatch_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_overhead");
    group.throughput(Throughput::Elements(FRAMES));

    for &devices in &[1usize, 2, 4, 8] {
        let rt = runtime(devices, 0);
        let config = PipelineConfig {
            num_frames: FRAMES,
            ..PipelineConfig::one_slot_per_device()
        };
        group.bench_with_input(BenchmarkId::new("slots", devices), &devices, |b, _| {
            b.iter(|| run_once(&config, &rt));
        });
    }
    group.finish();
}

/// Deeper buffering hides device latency behind host work.
fn bench_buffering_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffering_depth");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(FRAMES));

    let rt = runtime(4, 500);
    for &depth in &[1usize, 2, 3] {
        let config = PipelineConfig {
            num_frames: FRAMES,
            buffering_depth: depth,
            ..PipelineConfig::two_device_chain()
        };
        group.bench_with_input(BenchmarkId::new("two_device_chain", depth), &depth, |b, _| {
            b.iter(|| run_once(&config, &rt));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_dispatch_overhead, bench_buffering_depth);
criterion_main!(benches);
