use std::fmt;

use serde::{Deserialize, Serialize};

/// Class of accelerator core a device handle belongs to.
///
/// Devices of one category share a runtime executor; slots may chain
/// devices across categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceCategory {
    /// Embedded vision engine.
    Eve,
    /// Digital signal processor core.
    Dsp,
}

impl DeviceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceCategory::Eve => "EVE",
            DeviceCategory::Dsp => "DSP",
        }
    }
}

impl fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single accelerator device: category plus ordinal within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId {
    pub category: DeviceCategory,
    pub index: u32,
}

impl DeviceId {
    pub fn new(category: DeviceCategory, index: u32) -> Self {
        Self { category, index }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.category, self.index)
    }
}

/// Scheduler-side view of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    /// No outstanding job.
    #[default]
    Idle,
    /// A job carrying `frame_index` was issued and not yet waited on.
    Issued { frame_index: u64 },
}

impl SlotState {
    pub fn is_idle(&self) -> bool {
        matches!(self, SlotState::Idle)
    }
}

/// Device-side timing of one stage of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub device: DeviceId,
    /// Time the job spent queued behind other work on this device.
    pub queued_ms: f32,
    /// Time the device spent computing.
    pub compute_ms: f32,
}

/// Completion record for one job, returned by a successful wait.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub frame_index: u64,
    /// Wall time from issue to the end of the wait, as seen by the host.
    pub host_ms: f32,
    /// One entry per device the job passed through, in chain order.
    pub stages: Vec<StageTiming>,
}

/// Per-frame timing record, as written to the timestamp log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameTiming {
    pub frame_index: u64,
    pub slot_index: usize,
    pub slot: String,
    pub host_ms: f32,
    pub stages: Vec<StageTiming>,
}

/// Outcome of comparing a slot's first output against the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub slot_index: usize,
    pub frame_index: u64,
    pub matched: bool,
}

/// Loop counters collected by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleStats {
    pub iterations: u64,
    pub waits: u64,
    pub issues: u64,
    /// Iterations past the last frame that only drain in-flight work.
    pub drain_iterations: u64,
    /// Frames the source declined to provide (end of stream).
    pub frames_skipped: u64,
}

/// Aggregate result of one run over the frame stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub passed: bool,
    pub pool_size: usize,
    pub frames_issued: u64,
    pub frames_completed: u64,
    pub validations: Vec<Validation>,
    /// Per-frame records. May be left empty for long streams that are
    /// logged elsewhere.
    pub timings: Vec<FrameTiming>,
    /// Sum of host latency over all completed frames.
    pub host_ms_total: f64,
    pub stats: ScheduleStats,
}

impl RunResult {
    pub fn new(pool_size: usize) -> Self {
        Self {
            passed: true,
            pool_size,
            frames_issued: 0,
            frames_completed: 0,
            validations: Vec::new(),
            timings: Vec::new(),
            host_ms_total: 0.0,
            stats: ScheduleStats::default(),
        }
    }

    pub fn failed(&self) -> bool {
        !self.passed
    }

    /// Slot indices whose first-pass output disagreed with the reference.
    pub fn mismatched_slots(&self) -> Vec<usize> {
        self.validations
            .iter()
            .filter(|v| !v.matched)
            .map(|v| v.slot_index)
            .collect()
    }

    /// Mean host-observed latency over all completed frames.
    pub fn mean_host_ms(&self) -> f32 {
        if self.frames_completed == 0 {
            0.0
        } else {
            (self.host_ms_total / self.frames_completed as f64) as f32
        }
    }
}
