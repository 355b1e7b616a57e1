pub mod arena;
pub mod engine;
pub mod pool;
pub mod sim;
pub mod slot;

pub use arena::{BufferArena, SlotBuffers};
pub use engine::{AcceleratorRuntime, Completion, EngineJob, ExecutionEngine};
pub use pool::{GroupingPolicy, SlotPool, SlotPoolBuilder};
pub use sim::{SimNetwork, SimulatedRuntime, SimulatorConfig};
pub use slot::EngineSlot;
