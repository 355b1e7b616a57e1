use std::sync::Arc;

use accelpipe_core::{BufferRef, DeviceCategory, DeviceId, Result, StageTiming};

/// Device enumeration capability of the accelerator runtime.
///
/// Obtained once at startup and passed to the slot pool builder.
pub trait AcceleratorRuntime: Send + Sync {
    /// Number of devices of `category` usable by this process.
    fn count_available(&self, category: DeviceCategory) -> usize;

    /// Open execution engines for devices `0..count` of `category`.
    fn open_engines(
        &self,
        category: DeviceCategory,
        count: usize,
    ) -> Result<Vec<Arc<dyn ExecutionEngine>>>;
}

/// A device with a loaded network, able to run jobs asynchronously.
///
/// Engines may be shared by several slots; jobs submitted to one engine
/// run in submission order.
pub trait ExecutionEngine: Send + Sync {
    fn device(&self) -> DeviceId;

    /// Bytes this engine's network layer group consumes.
    fn input_size(&self) -> usize;

    /// Bytes this engine's network layer group produces.
    fn output_size(&self) -> usize;

    /// Queue a job. Must not block on device work.
    fn submit(&self, job: EngineJob) -> Result<Box<dyn Completion>>;
}

/// Pending result of a submitted job.
pub trait Completion: Send {
    /// Block until the job finishes. Returns the timings of every stage the
    /// job (and the jobs it depended on) passed through.
    fn wait(self: Box<Self>) -> Result<Vec<StageTiming>>;
}

/// One stage of work for an engine.
pub struct EngineJob {
    pub frame_index: u64,
    pub input: BufferRef,
    pub output: BufferRef,
    /// Position of this stage in its chain, and the chain length.
    pub stage: usize,
    pub stages: usize,
    /// Upstream stage that must complete before this one starts.
    pub after: Option<Box<dyn Completion>>,
}

impl EngineJob {
    pub fn new(frame_index: u64, input: BufferRef, output: BufferRef) -> Self {
        Self {
            frame_index,
            input,
            output,
            stage: 0,
            stages: 1,
            after: None,
        }
    }

    /// Mark this job as stage `index` of a `count`-stage chain.
    pub fn stage(mut self, index: usize, count: usize) -> Self {
        self.stage = index;
        self.stages = count;
        self
    }

    pub fn after(mut self, upstream: Box<dyn Completion>) -> Self {
        self.after = Some(upstream);
        self
    }
}
