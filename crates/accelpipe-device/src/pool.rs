use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use accelpipe_core::{DeviceCategory, DeviceId, DispatchError, ProcessingSlot, Result};

use crate::engine::{AcceleratorRuntime, ExecutionEngine};
use crate::slot::EngineSlot;

/// How the devices of one category are grouped into slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupingPolicy {
    /// One slot per device.
    #[default]
    Single,
    /// Consecutive devices form a chain: `{0,1}`, `{2,3}`, ...
    /// Devices left over after the last full group stay unused.
    Contiguous { devices_per_slot: usize },
    /// Devices are dealt out across groups: with 4 devices and 2 per slot,
    /// `{0,2}`, `{1,3}`.
    Striped { devices_per_slot: usize },
    /// Caller-chosen device indices per group, in chain order.
    Explicit { groups: Vec<Vec<usize>> },
}

impl GroupingPolicy {
    /// Device indices of each logical group for `device_count` devices.
    ///
    /// The result depends only on the policy and the device count. No
    /// device appears twice in one group.
    pub fn groups(&self, device_count: usize) -> Result<Vec<Vec<usize>>> {
        match self {
            GroupingPolicy::Single => Ok((0..device_count).map(|i| vec![i]).collect()),
            GroupingPolicy::Contiguous { devices_per_slot } => {
                let k = Self::check_width(*devices_per_slot)?;
                Ok((0..device_count / k)
                    .map(|g| (g * k..g * k + k).collect())
                    .collect())
            }
            GroupingPolicy::Striped { devices_per_slot } => {
                let k = Self::check_width(*devices_per_slot)?;
                let groups = device_count / k;
                Ok((0..groups)
                    .map(|g| (0..k).map(|j| g + j * groups).collect())
                    .collect())
            }
            GroupingPolicy::Explicit { groups } => {
                for (g, members) in groups.iter().enumerate() {
                    if members.is_empty() {
                        return Err(DispatchError::EmptyGroup { group: g });
                    }
                    for (pos, &d) in members.iter().enumerate() {
                        if d >= device_count {
                            return Err(DispatchError::Config(format!(
                                "group {g} names device {d}, only {device_count} present"
                            )));
                        }
                        if members[..pos].contains(&d) {
                            return Err(DispatchError::Config(format!(
                                "group {g} lists device {d} twice"
                            )));
                        }
                    }
                }
                Ok(groups.clone())
            }
        }
    }

    /// Devices each slot built under this policy chains together, if fixed.
    pub fn devices_per_slot(&self) -> Option<usize> {
        match self {
            GroupingPolicy::Single => Some(1),
            GroupingPolicy::Contiguous { devices_per_slot }
            | GroupingPolicy::Striped { devices_per_slot } => Some(*devices_per_slot),
            GroupingPolicy::Explicit { .. } => None,
        }
    }

    fn check_width(devices_per_slot: usize) -> Result<usize> {
        if devices_per_slot == 0 {
            return Err(DispatchError::EmptyGroup { group: 0 });
        }
        Ok(devices_per_slot)
    }
}

/// Ordered, fixed set of slots frames are dispatched over.
#[derive(Debug, Default)]
pub struct SlotPool {
    slots: Vec<EngineSlot>,
}

impl SlotPool {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[EngineSlot] {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut [EngineSlot] {
        &mut self.slots
    }

    /// Append another pool's slots after this pool's.
    pub fn extend(&mut self, other: SlotPool) {
        self.slots.extend(other.slots);
    }

    pub fn labels(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.label().to_string()).collect()
    }
}

/// Builds slot pools from the devices the runtime exposes.
///
/// Each logical group is instantiated `depth` times so one copy can compute
/// while the next is being filled. Engines are opened once per category and
/// shared between all slots that use the same device.
pub struct SlotPoolBuilder<'r> {
    runtime: &'r dyn AcceleratorRuntime,
    depth: usize,
    engines: BTreeMap<DeviceCategory, Vec<Arc<dyn ExecutionEngine>>>,
}

impl<'r> SlotPoolBuilder<'r> {
    pub fn new(runtime: &'r dyn AcceleratorRuntime) -> Self {
        Self {
            runtime,
            depth: 1,
            engines: BTreeMap::new(),
        }
    }

    /// Slot copies per logical group (2 = double buffering).
    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Build slots over the devices of one category.
    ///
    /// With no devices of `category` present the pool is empty; callers may
    /// combine it with pools of other categories.
    pub fn build(&mut self, category: DeviceCategory, policy: &GroupingPolicy) -> Result<SlotPool> {
        self.check_depth()?;

        let count = self.runtime.count_available(category);
        if count == 0 {
            tracing::warn!(%category, "no devices available, slot pool is empty");
            return Ok(SlotPool::empty());
        }

        let groups = policy.groups(count)?;
        if groups.is_empty() {
            return Err(DispatchError::Config(format!(
                "{count} {category} devices cannot form a single group under {policy:?}"
            )));
        }

        let used: usize = groups.iter().map(Vec::len).sum();
        if matches!(
            policy,
            GroupingPolicy::Contiguous { .. } | GroupingPolicy::Striped { .. }
        ) && used < count
        {
            tracing::warn!(
                %category,
                count,
                unused = count - used,
                "devices left over after grouping"
            );
        }

        let engines = self.engines_for(category)?.to_vec();
        let chains: Vec<Vec<Arc<dyn ExecutionEngine>>> = groups
            .iter()
            .map(|members| members.iter().map(|&d| engines[d].clone()).collect())
            .collect();

        self.instantiate(chains)
    }

    /// Build slots from explicit device chains that may span categories,
    /// e.g. `[[EVE0, DSP0], [EVE1, DSP1]]`.
    pub fn build_chains(&mut self, chains: &[Vec<DeviceId>]) -> Result<SlotPool> {
        self.check_depth()?;

        let mut resolved = Vec::with_capacity(chains.len());
        for (g, chain) in chains.iter().enumerate() {
            if chain.is_empty() {
                return Err(DispatchError::EmptyGroup { group: g });
            }
            let mut stages = Vec::with_capacity(chain.len());
            for (pos, device) in chain.iter().enumerate() {
                if chain[..pos].contains(device) {
                    return Err(DispatchError::Config(format!(
                        "chain {g} lists device {device} twice"
                    )));
                }
                let engines = self.engines_for(device.category)?;
                let engine = engines.get(device.index as usize).ok_or_else(|| {
                    DispatchError::Config(format!("chain {g} names missing device {device}"))
                })?;
                stages.push(engine.clone());
            }
            resolved.push(stages);
        }

        self.instantiate(resolved)
    }

    fn check_depth(&self) -> Result<()> {
        if self.depth == 0 {
            return Err(DispatchError::Config("buffering depth must be at least 1".into()));
        }
        Ok(())
    }

    fn engines_for(&mut self, category: DeviceCategory) -> Result<&[Arc<dyn ExecutionEngine>]> {
        if !self.engines.contains_key(&category) {
            let count = self.runtime.count_available(category);
            let opened = self.runtime.open_engines(category, count)?;
            tracing::info!(%category, devices = opened.len(), "opened execution engines");
            self.engines.insert(category, opened);
        }
        Ok(self.engines.get(&category).map(Vec::as_slice).unwrap_or_default())
    }

    /// Group-major instantiation: group0 copy0, group0 copy1, group1 copy0, ...
    fn instantiate(&self, chains: Vec<Vec<Arc<dyn ExecutionEngine>>>) -> Result<SlotPool> {
        let mut slots = Vec::with_capacity(chains.len() * self.depth);
        for chain in chains {
            for copy in 0..self.depth {
                let slot = EngineSlot::new(chain.clone())?;
                let label = if self.depth > 1 {
                    format!("{}#{copy}", slot.label())
                } else {
                    slot.label().to_string()
                };
                slots.push(slot.with_label(label));
            }
        }

        tracing::debug!(slots = slots.len(), depth = self.depth, "slot pool built");
        Ok(SlotPool { slots })
    }
}
