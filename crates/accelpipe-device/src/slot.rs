use std::sync::Arc;
use std::time::Instant;

use accelpipe_core::{
    BufferRef, DispatchError, HostBuffer, JobReport, ProcessingSlot, Result,
};

use crate::engine::{Completion, EngineJob, ExecutionEngine};

/// Devices backing a slot.
enum SlotKind {
    /// One engine runs the whole network.
    Single(Arc<dyn ExecutionEngine>),
    /// Engines run consecutive layer groups; `links[k]` carries stage k's
    /// output into stage k+1.
    Chained {
        stages: Vec<Arc<dyn ExecutionEngine>>,
        links: Vec<HostBuffer>,
    },
}

struct PendingJob {
    frame_index: u64,
    issued_at: Instant,
    completion: Box<dyn Completion>,
}

/// A processing slot over one engine or a chain of engines.
///
/// Input and output memory is bound from outside (the buffer arena); the
/// intermediate buffers of a chain belong to the slot itself.
pub struct EngineSlot {
    label: String,
    kind: SlotKind,
    input: Option<BufferRef>,
    output: Option<BufferRef>,
    pending: Option<PendingJob>,
}

impl EngineSlot {
    /// Build a slot from an ordered list of engines.
    ///
    /// One engine gives a single-device slot; more give a chain where each
    /// stage's output size must equal the next stage's input size.
    pub fn new(engines: Vec<Arc<dyn ExecutionEngine>>) -> Result<Self> {
        let label = engines
            .iter()
            .map(|e| e.device().to_string())
            .collect::<Vec<_>>()
            .join("+");

        let kind = match engines.len() {
            0 => {
                return Err(DispatchError::Config(
                    "a slot needs at least one engine".into(),
                ))
            }
            1 => SlotKind::Single(engines[0].clone()),
            _ => {
                let mut links = Vec::with_capacity(engines.len() - 1);
                for pair in engines.windows(2) {
                    let (up, down) = (&pair[0], &pair[1]);
                    if up.output_size() != down.input_size() {
                        return Err(DispatchError::Config(format!(
                            "chain {label}: {} produces {} bytes but {} expects {}",
                            up.device(),
                            up.output_size(),
                            down.device(),
                            down.input_size()
                        )));
                    }
                    links.push(HostBuffer::alloc(up.output_size())?);
                }
                SlotKind::Chained {
                    stages: engines,
                    links,
                }
            }
        };

        Ok(Self {
            label,
            kind,
            input: None,
            output: None,
            pending: None,
        })
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Number of devices the slot chains together.
    pub fn depth(&self) -> usize {
        match &self.kind {
            SlotKind::Single(_) => 1,
            SlotKind::Chained { stages, .. } => stages.len(),
        }
    }

    pub fn engines(&self) -> Vec<Arc<dyn ExecutionEngine>> {
        match &self.kind {
            SlotKind::Single(engine) => vec![engine.clone()],
            SlotKind::Chained { stages, .. } => stages.clone(),
        }
    }

    fn first(&self) -> &Arc<dyn ExecutionEngine> {
        match &self.kind {
            SlotKind::Single(engine) => engine,
            SlotKind::Chained { stages, .. } => &stages[0],
        }
    }

    fn last(&self) -> &Arc<dyn ExecutionEngine> {
        match &self.kind {
            SlotKind::Single(engine) => engine,
            SlotKind::Chained { stages, .. } => &stages[stages.len() - 1],
        }
    }
}

impl ProcessingSlot for EngineSlot {
    fn label(&self) -> &str {
        &self.label
    }

    fn input_size(&self) -> usize {
        self.first().input_size()
    }

    fn output_size(&self) -> usize {
        self.last().output_size()
    }

    fn bind_buffers(&mut self, input: BufferRef, output: BufferRef) -> Result<()> {
        if self.pending.is_some() {
            return Err(DispatchError::SlotBusy {
                slot: self.label.clone(),
            });
        }
        if input.len() < self.input_size() || output.len() < self.output_size() {
            return Err(DispatchError::Config(format!(
                "slot {}: buffers {}/{} bytes smaller than required {}/{}",
                self.label,
                input.len(),
                output.len(),
                self.input_size(),
                self.output_size()
            )));
        }
        self.input = Some(input);
        self.output = Some(output);
        Ok(())
    }

    fn unbind_buffers(&mut self) {
        self.input = None;
        self.output = None;
    }

    fn input(&self) -> Option<&BufferRef> {
        self.input.as_ref()
    }

    fn output(&self) -> Option<&BufferRef> {
        self.output.as_ref()
    }

    fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    fn issue_async(&mut self, frame_index: u64) -> Result<()> {
        if self.pending.is_some() {
            return Err(DispatchError::SlotBusy {
                slot: self.label.clone(),
            });
        }
        let (input, output) = match (&self.input, &self.output) {
            (Some(i), Some(o)) => (i.clone(), o.clone()),
            _ => {
                return Err(DispatchError::Unbound {
                    slot: self.label.clone(),
                })
            }
        };

        let issued_at = Instant::now();
        let completion = match &self.kind {
            SlotKind::Single(engine) => {
                engine.submit(EngineJob::new(frame_index, input, output))?
            }
            SlotKind::Chained { stages, links } => {
                let mut upstream: Option<Box<dyn Completion>> = None;
                for (k, engine) in stages.iter().enumerate() {
                    let src = if k == 0 {
                        input.clone()
                    } else {
                        links[k - 1].downgrade()
                    };
                    let dst = if k + 1 == stages.len() {
                        output.clone()
                    } else {
                        links[k].downgrade()
                    };
                    let mut job = EngineJob::new(frame_index, src, dst).stage(k, stages.len());
                    if let Some(prev) = upstream.take() {
                        job = job.after(prev);
                    }
                    upstream = Some(engine.submit(job)?);
                }
                upstream.ok_or_else(|| DispatchError::Unbound {
                    slot: self.label.clone(),
                })?
            }
        };

        tracing::trace!(slot = %self.label, frame = frame_index, "issued");

        self.pending = Some(PendingJob {
            frame_index,
            issued_at,
            completion,
        });
        Ok(())
    }

    fn wait(&mut self) -> Result<Option<JobReport>> {
        let Some(job) = self.pending.take() else {
            return Ok(None);
        };
        let stages = job.completion.wait()?;
        let host_ms = job.issued_at.elapsed().as_secs_f32() * 1000.0;

        tracing::trace!(slot = %self.label, frame = job.frame_index, host_ms, "completed");

        Ok(Some(JobReport {
            frame_index: job.frame_index,
            host_ms,
            stages,
        }))
    }
}

impl std::fmt::Debug for EngineSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSlot")
            .field("label", &self.label)
            .field("depth", &self.depth())
            .field("busy", &self.is_busy())
            .finish()
    }
}
