use std::path::Path;
use std::time::Instant;

use accelpipe_core::{DispatchError, FrameSource, ProcessingSlot, Result, RunResult};
use accelpipe_device::{AcceleratorRuntime, BufferArena, SlotPool, SlotPoolBuilder};

use crate::config::{PipelineConfig, SlotGroupConfig};
use crate::scheduler::FrameScheduler;
use crate::timestamps::TimestampLog;

/// A slot pool with its host buffers bound, ready to stream frames.
///
/// Built once, run once. Buffers are released when the run ends, whatever
/// the outcome, and again (harmlessly) on drop.
pub struct DispatchPipeline {
    pool: SlotPool,
    arena: BufferArena,
    config: PipelineConfig,
}

impl DispatchPipeline {
    /// Build the slot pool from configuration and bind its buffers.
    ///
    /// Fails before any frame I/O when the pool would be empty, a required
    /// category has no devices, or the buffers do not fit the host heap.
    pub fn build(config: PipelineConfig, runtime: &dyn AcceleratorRuntime) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            groups = config.slot_groups.len(),
            depth = config.buffering_depth,
            "building dispatch pipeline"
        );

        let mut builder = SlotPoolBuilder::new(runtime).depth(config.buffering_depth);
        let mut pool = SlotPool::empty();
        for group in &config.slot_groups {
            let part = match group {
                SlotGroupConfig::Category {
                    category,
                    grouping,
                    required,
                } => {
                    let part = builder.build(*category, grouping)?;
                    if part.is_empty() && *required {
                        return Err(DispatchError::NoDevices {
                            category: *category,
                        });
                    }
                    part
                }
                SlotGroupConfig::Chains { chains } => builder.build_chains(chains)?,
            };
            pool.extend(part);
        }

        if pool.is_empty() {
            return Err(DispatchError::NoDevices {
                category: config.primary_category(),
            });
        }

        let mut arena = match config.host_heap_limit {
            Some(limit) => BufferArena::new().with_limit(limit),
            None => BufferArena::new(),
        };
        arena.bind_all(pool.slots_mut())?;

        tracing::info!(
            slots = pool.len(),
            labels = ?pool.labels(),
            host_kb = arena.total_allocated() / 1024,
            "dispatch pipeline ready"
        );

        Ok(Self {
            pool,
            arena,
            config,
        })
    }

    pub fn pool(&self) -> &SlotPool {
        &self.pool
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    pub fn arena(&self) -> &BufferArena {
        &self.arena
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Bytes per frame: the configured size, else the smallest slot input.
    pub fn frame_size(&self) -> usize {
        if let Some(size) = self.config.frame_size {
            return size;
        }
        let sizes = self.pool.slots().iter().map(|s| s.input_size());
        let min = sizes.clone().min().unwrap_or(0);
        if sizes.max() != Some(min) {
            tracing::warn!(
                frame_size = min,
                "slots differ in input size, frames sized for the smallest"
            );
        }
        min
    }

    /// Stream `num_frames` frames from `source` through the pool.
    ///
    /// A reference mismatch is reported on the result. A runtime fault is
    /// returned as an error after outstanding jobs have been waited out.
    pub fn run(mut self, source: &mut dyn FrameSource) -> Result<RunResult> {
        let started = Instant::now();

        let mut timestamps = match &self.config.timestamp_log {
            Some(path) => Some(TimestampLog::create(Path::new(path))?),
            None => None,
        };

        let mut scheduler =
            FrameScheduler::new(self.config.num_frames).retain_timings(self.config.retain_timings);
        let outcome = scheduler.run(self.pool.slots_mut(), source, timestamps.as_mut());

        if let Err(e) = &outcome {
            tracing::error!(error = %e, "frame dispatch aborted");
            self.quiesce();
        }
        let freed = self.arena.release_all(self.pool.slots_mut());
        tracing::debug!(freed, "slot buffers released");

        if let Some(log) = timestamps {
            if let Err(e) = log.finish() {
                tracing::warn!(error = %e, "timestamp log not flushed");
            }
        }

        let result = outcome?;
        tracing::info!(
            passed = result.passed,
            frames = result.frames_completed,
            mean_host_ms = result.mean_host_ms(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "run complete"
        );
        Ok(result)
    }

    /// Wait out every slot still holding a job. Errors are logged only.
    fn quiesce(&mut self) {
        for slot in self.pool.slots_mut() {
            if !slot.is_busy() {
                continue;
            }
            if let Err(e) = slot.wait() {
                tracing::warn!(slot = slot.label(), error = %e, "outstanding job failed during teardown");
            }
        }
    }
}

impl std::fmt::Debug for DispatchPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchPipeline")
            .field("slots", &self.pool.labels())
            .field("host_bytes", &self.arena.total_allocated())
            .field("num_frames", &self.config.num_frames)
            .finish()
    }
}

impl Drop for DispatchPipeline {
    fn drop(&mut self) {
        self.arena.release_all(self.pool.slots_mut());
    }
}
