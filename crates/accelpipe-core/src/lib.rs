pub mod buffer;
pub mod error;
pub mod traits;
pub mod types;

pub use buffer::{BufferRef, HostBuffer};
pub use error::{DispatchError, Result};
pub use traits::{FrameSource, ProcessingSlot};
pub use types::*;
