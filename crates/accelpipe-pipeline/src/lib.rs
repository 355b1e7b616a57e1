pub mod config;
pub mod pipeline;
pub mod scheduler;
pub mod timestamps;

pub use config::{PipelineConfig, SlotGroupConfig};
pub use pipeline::DispatchPipeline;
pub use scheduler::{epilogue_iterations, total_iterations, FrameScheduler};
pub use timestamps::TimestampLog;
