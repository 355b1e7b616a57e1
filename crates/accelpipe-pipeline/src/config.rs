use std::path::Path;

use serde::{Deserialize, Serialize};

use accelpipe_core::{DeviceCategory, DeviceId, DispatchError, Result};
use accelpipe_device::GroupingPolicy;

/// One contribution to the slot pool.
///
/// Groups are built in configuration order and their slots concatenated, so
/// the order here is the round-robin order of the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SlotGroupConfig {
    /// Slots over the devices of one category.
    Category {
        category: DeviceCategory,
        #[serde(default)]
        grouping: GroupingPolicy,
        /// Fail the build when the category has no devices, instead of
        /// contributing nothing.
        #[serde(default)]
        required: bool,
    },
    /// Explicit device chains, possibly mixing categories.
    Chains { chains: Vec<Vec<DeviceId>> },
}

impl SlotGroupConfig {
    pub fn category(category: DeviceCategory) -> Self {
        SlotGroupConfig::Category {
            category,
            grouping: GroupingPolicy::Single,
            required: false,
        }
    }

    /// Category this group draws from, if it is a single one.
    pub fn primary_category(&self) -> Option<DeviceCategory> {
        match self {
            SlotGroupConfig::Category { category, .. } => Some(*category),
            SlotGroupConfig::Chains { chains } => {
                chains.first().and_then(|c| c.first()).map(|d| d.category)
            }
        }
    }
}

/// Runtime configuration for a dispatch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frames to push through the pool.
    pub num_frames: u64,
    /// Slot copies per device group. 2 gives classic double buffering.
    pub buffering_depth: usize,
    /// Pool composition, in round-robin order.
    pub slot_groups: Vec<SlotGroupConfig>,

    /// Raw frame file, frames stored back to back.
    pub input_path: String,
    /// Expected output for the first frame.
    pub reference_path: String,
    /// JSON-lines timing log, one record per completed frame.
    pub timestamp_log: Option<String>,
    /// Keep per-frame timings on the run result as well as in the log.
    pub retain_timings: bool,

    /// Bytes per frame. None = the smallest slot input size.
    pub frame_size: Option<usize>,
    /// Rewind the input file when it runs out before `num_frames`.
    pub wrap_input: bool,
    /// Upper bound on host memory bound into slots, in bytes.
    pub host_heap_limit: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_frames: 30,
            buffering_depth: 1,
            slot_groups: vec![
                SlotGroupConfig::category(DeviceCategory::Eve),
                SlotGroupConfig::category(DeviceCategory::Dsp),
            ],
            input_path: "frames.bin".to_string(),
            reference_path: "reference.bin".to_string(),
            timestamp_log: None,
            retain_timings: true,
            frame_size: None,
            wrap_input: true,
            host_heap_limit: None,
        }
    }
}

/// Named pool layouts.
impl PipelineConfig {
    /// Every EVE and every DSP as its own slot, EVEs first.
    ///
    /// A missing category is tolerated as long as the other one has
    /// devices. Pool size equals the total device count.
    pub fn one_slot_per_device() -> Self {
        Self::default()
    }

    /// EVE pairs chained into one slot, double-buffered.
    ///
    /// Stage one runs on EVE 2g, stage two on EVE 2g+1, and each pair is
    /// instantiated twice so the host can fill one copy while the other is
    /// in flight. With 4 EVEs the pool is `{EVE0+EVE1}` x2, `{EVE2+EVE3}` x2.
    pub fn two_device_chain() -> Self {
        Self {
            buffering_depth: 2,
            slot_groups: vec![SlotGroupConfig::Category {
                category: DeviceCategory::Eve,
                grouping: GroupingPolicy::Contiguous {
                    devices_per_slot: 2,
                },
                required: true,
            }],
            ..Self::default()
        }
    }

    /// Look up a preset by its CLI name.
    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "one-slot-per-device" | "one_slot_per_device" => Ok(Self::one_slot_per_device()),
            "two-device-chain" | "two_device_chain" => Ok(Self::two_device_chain()),
            other => Err(DispatchError::Config(format!("unknown preset {other:?}"))),
        }
    }

    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DispatchError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            DispatchError::Config(format!("invalid config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject layouts that could never produce a pool.
    pub fn validate(&self) -> Result<()> {
        if self.buffering_depth == 0 {
            return Err(DispatchError::Config(
                "buffering depth must be at least 1".into(),
            ));
        }
        if self.slot_groups.is_empty() {
            return Err(DispatchError::Config("no slot groups configured".into()));
        }
        if self.frame_size == Some(0) {
            return Err(DispatchError::Config("frame size must be non-zero".into()));
        }
        for group in &self.slot_groups {
            if let SlotGroupConfig::Chains { chains } = group {
                if let Some(g) = chains.iter().position(Vec::is_empty) {
                    return Err(DispatchError::EmptyGroup { group: g });
                }
            }
        }
        Ok(())
    }

    /// Category reported when the pool comes out empty.
    pub fn primary_category(&self) -> DeviceCategory {
        self.slot_groups
            .iter()
            .find_map(SlotGroupConfig::primary_category)
            .unwrap_or(DeviceCategory::Eve)
    }
}
