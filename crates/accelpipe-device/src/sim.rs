//! In-process stand-in for the accelerator runtime.
//!
//! Every opened device gets a worker thread that executes jobs in the order
//! they were submitted. The "network" is a cheap deterministic byte
//! transform so reference outputs can be computed on the host. Like a real
//! network split into layer groups, running it whole on one device or
//! spread over a chain gives the same output.

use std::ops::Range;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use accelpipe_core::{DeviceCategory, DeviceId, DispatchError, Result, StageTiming};

use crate::engine::{AcceleratorRuntime, Completion, EngineJob, ExecutionEngine};

/// Configuration for the simulated accelerator runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Number of simulated EVE devices.
    pub eve_count: usize,
    /// Number of simulated DSP devices.
    pub dsp_count: usize,
    /// Per-job compute time on an EVE, in microseconds.
    pub eve_latency_us: u64,
    /// Per-job compute time on a DSP, in microseconds.
    pub dsp_latency_us: u64,
    /// Bytes in and out of every simulated layer group.
    pub frame_size: usize,
    /// Make the job for this frame fail with an accelerator fault.
    pub fail_on_frame: Option<u64>,
    /// Flip the first output byte of this frame.
    pub corrupt_frame: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            eve_count: 4,
            dsp_count: 2,
            eve_latency_us: 2_000,
            dsp_latency_us: 3_000,
            frame_size: 768 * 320 * 3 / 8,
            fail_on_frame: None,
            corrupt_frame: None,
        }
    }
}

/// Deterministic layered transform standing in for the deployed network.
pub struct SimNetwork;

impl SimNetwork {
    /// Layer groups in the network.
    pub const LAYERS: usize = 4;

    const SALTS: [u8; Self::LAYERS] = [0x11, 0x5a, 0xc3, 0x2e];

    /// Layers run by stage `stage` of a `stages`-long chain.
    ///
    /// Stages cover the layers in order without overlap. Chains longer than
    /// the network leave some stages with nothing to do.
    pub fn layers(stage: usize, stages: usize) -> Range<usize> {
        let stages = stages.max(1);
        (stage * Self::LAYERS / stages)..((stage + 1) * Self::LAYERS / stages)
    }

    /// Run `layers` in place.
    pub fn apply(layers: Range<usize>, bytes: &mut [u8]) {
        for layer in layers {
            let salt = Self::SALTS[layer];
            for (i, b) in bytes.iter_mut().enumerate() {
                *b = b.wrapping_mul(3).wrapping_add(salt ^ (i as u8));
            }
        }
    }

    /// Expected network output for `frame`.
    pub fn reference(frame: &[u8]) -> Vec<u8> {
        let mut out = frame.to_vec();
        Self::apply(0..Self::LAYERS, &mut out);
        out
    }
}

/// Simulated runtime exposing `eve_count` EVE and `dsp_count` DSP devices.
pub struct SimulatedRuntime {
    config: SimulatorConfig,
}

impl SimulatedRuntime {
    pub fn new(config: SimulatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    fn latency(&self, category: DeviceCategory) -> Duration {
        match category {
            DeviceCategory::Eve => Duration::from_micros(self.config.eve_latency_us),
            DeviceCategory::Dsp => Duration::from_micros(self.config.dsp_latency_us),
        }
    }
}

impl AcceleratorRuntime for SimulatedRuntime {
    fn count_available(&self, category: DeviceCategory) -> usize {
        match category {
            DeviceCategory::Eve => self.config.eve_count,
            DeviceCategory::Dsp => self.config.dsp_count,
        }
    }

    fn open_engines(
        &self,
        category: DeviceCategory,
        count: usize,
    ) -> Result<Vec<Arc<dyn ExecutionEngine>>> {
        let available = self.count_available(category);
        if count > available {
            return Err(DispatchError::Config(format!(
                "requested {count} {category} devices, only {available} present"
            )));
        }

        (0..count)
            .map(|i| {
                let engine = SimEngine::spawn(
                    DeviceId::new(category, i as u32),
                    self.config.frame_size,
                    self.latency(category),
                    self.config.fail_on_frame,
                    self.config.corrupt_frame,
                )?;
                Ok(Arc::new(engine) as Arc<dyn ExecutionEngine>)
            })
            .collect()
    }
}

type Outcome = Result<Vec<StageTiming>>;

struct Work {
    job: EngineJob,
    queued_at: Instant,
    done: Sender<Outcome>,
}

/// One simulated device backed by a worker thread.
pub struct SimEngine {
    device: DeviceId,
    frame_size: usize,
    queue: Mutex<Option<Sender<Work>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimEngine {
    pub fn spawn(
        device: DeviceId,
        frame_size: usize,
        latency: Duration,
        fail_on_frame: Option<u64>,
        corrupt_frame: Option<u64>,
    ) -> Result<Self> {
        let (tx, rx) = channel::<Work>();
        let worker = thread::Builder::new()
            .name(format!("sim-{device}"))
            .spawn(move || worker_loop(device, latency, fail_on_frame, corrupt_frame, rx))
            .map_err(|e| DispatchError::runtime(device.to_string(), format!("spawn failed: {e}")))?;

        tracing::debug!(%device, frame_size, latency_us = latency.as_micros() as u64, "simulated device opened");

        Ok(Self {
            device,
            frame_size,
            queue: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }
}

impl ExecutionEngine for SimEngine {
    fn device(&self) -> DeviceId {
        self.device
    }

    fn input_size(&self) -> usize {
        self.frame_size
    }

    fn output_size(&self) -> usize {
        self.frame_size
    }

    fn submit(&self, job: EngineJob) -> Result<Box<dyn Completion>> {
        let (done, rx) = channel();
        let queue = self.queue.lock();
        let tx = queue
            .as_ref()
            .ok_or_else(|| DispatchError::runtime(self.device.to_string(), "device closed"))?;
        tx.send(Work {
            job,
            queued_at: Instant::now(),
            done,
        })
        .map_err(|_| DispatchError::runtime(self.device.to_string(), "worker exited"))?;

        Ok(Box::new(SimCompletion {
            device: self.device,
            rx,
        }))
    }
}

impl Drop for SimEngine {
    fn drop(&mut self) {
        // Closing the queue ends the worker loop.
        self.queue.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!(device = %self.device, "simulated device worker panicked");
            }
        }
    }
}

struct SimCompletion {
    device: DeviceId,
    rx: Receiver<Outcome>,
}

impl Completion for SimCompletion {
    fn wait(self: Box<Self>) -> Result<Vec<StageTiming>> {
        self.rx.recv().map_err(|_| {
            DispatchError::runtime(self.device.to_string(), "job dropped before completion")
        })?
    }
}

fn worker_loop(
    device: DeviceId,
    latency: Duration,
    fail_on_frame: Option<u64>,
    corrupt_frame: Option<u64>,
    rx: Receiver<Work>,
) {
    while let Ok(work) = rx.recv() {
        let Work {
            job,
            queued_at,
            done,
        } = work;

        let mut stages = match job.after {
            Some(upstream) => match upstream.wait() {
                Ok(stages) => stages,
                Err(e) => {
                    let _ = done.send(Err(e));
                    continue;
                }
            },
            None => Vec::new(),
        };

        let started = Instant::now();
        let queued_ms = started.duration_since(queued_at).as_secs_f32() * 1000.0;

        if fail_on_frame == Some(job.frame_index) {
            let _ = done.send(Err(DispatchError::runtime(
                device.to_string(),
                format!("injected fault on frame {}", job.frame_index),
            )));
            continue;
        }

        let outcome = job
            .input
            .to_vec()
            .and_then(|mut bytes| {
                thread::sleep(latency);
                SimNetwork::apply(SimNetwork::layers(job.stage, job.stages), &mut bytes);
                if corrupt_frame == Some(job.frame_index) {
                    if let Some(b) = bytes.first_mut() {
                        *b ^= 0xff;
                    }
                }
                job.output.with_mut(|dst| {
                    let n = dst.len().min(bytes.len());
                    dst[..n].copy_from_slice(&bytes[..n]);
                })
            })
            .map(|()| {
                stages.push(StageTiming {
                    device,
                    queued_ms,
                    compute_ms: started.elapsed().as_secs_f32() * 1000.0,
                });
                stages
            });

        // The waiter may have gone away on an aborted run.
        let _ = done.send(outcome);
    }

    tracing::trace!(%device, "simulated device worker stopped");
}
