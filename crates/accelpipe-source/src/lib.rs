pub mod file;
pub mod memory;

pub use file::{load_reference, RawFrameFile};
pub use memory::{synthetic_frame, MemoryFrameSource};
