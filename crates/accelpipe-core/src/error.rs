use thiserror::Error;

use crate::types::DeviceCategory;

/// Top-level error type for the accelpipe dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no {category} devices available")]
    NoDevices { category: DeviceCategory },

    #[error("slot group {group} has no devices")]
    EmptyGroup { group: usize },

    #[error("host memory allocation failed: requested {requested} bytes, available {available} bytes")]
    HostOutOfMemory { requested: usize, available: usize },

    #[error("accelerator fault on {device}: {message}")]
    Runtime { device: String, message: String },

    #[error("slot {slot} already has an outstanding job")]
    SlotBusy { slot: String },

    #[error("slot {slot} has no bound buffers")]
    Unbound { slot: String },

    #[error("host buffer {id} was released while still in use")]
    BufferReleased { id: u64 },

    #[error("frame source error: {0}")]
    FrameSource(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    /// Errors raised by the accelerator while a job is issued or awaited.
    pub fn is_runtime_fault(&self) -> bool {
        matches!(
            self,
            DispatchError::Runtime { .. }
                | DispatchError::SlotBusy { .. }
                | DispatchError::Unbound { .. }
                | DispatchError::BufferReleased { .. }
        )
    }

    /// Errors that abort a run before any frame is processed.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DispatchError::Config(_)
                | DispatchError::NoDevices { .. }
                | DispatchError::EmptyGroup { .. }
                | DispatchError::HostOutOfMemory { .. }
        )
    }

    pub fn runtime(device: impl Into<String>, message: impl Into<String>) -> Self {
        DispatchError::Runtime {
            device: device.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
