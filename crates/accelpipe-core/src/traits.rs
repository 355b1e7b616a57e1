use crate::buffer::BufferRef;
use crate::error::Result;
use crate::types::JobReport;

/// One unit of accelerator work capacity that frames are dispatched to.
///
/// A slot may front a single device or a chain of devices; the scheduler
/// only sees this interface. A slot holds at most one outstanding job.
pub trait ProcessingSlot: Send {
    /// Human-readable name for tracing and the timestamp log.
    fn label(&self) -> &str;

    /// Bytes the slot reads per frame.
    fn input_size(&self) -> usize;

    /// Bytes the slot writes per frame.
    fn output_size(&self) -> usize;

    /// Attach host memory. Both buffers must be at least the required size.
    fn bind_buffers(&mut self, input: BufferRef, output: BufferRef) -> Result<()>;

    /// Detach host memory. A no-op on an unbound slot.
    fn unbind_buffers(&mut self);

    fn input(&self) -> Option<&BufferRef>;

    fn output(&self) -> Option<&BufferRef>;

    /// Whether a job has been issued and not yet waited on.
    fn is_busy(&self) -> bool;

    /// Start processing the frame currently in the input buffer.
    ///
    /// Returns immediately. Fails with `SlotBusy` if the previous job has
    /// not been waited on.
    fn issue_async(&mut self, frame_index: u64) -> Result<()>;

    /// Block until the outstanding job finishes.
    ///
    /// `Ok(None)` means there was nothing to wait on.
    fn wait(&mut self) -> Result<Option<JobReport>>;
}

/// Supplies input frames and the reference output used for validation.
pub trait FrameSource {
    /// Copy frame `frame_index` into `input`.
    ///
    /// Returns `false` at end of stream, leaving `input` untouched.
    fn read_next(&mut self, frame_index: u64, input: &BufferRef) -> Result<bool>;

    /// Expected output for the reference frame.
    fn reference_output(&self) -> &[u8];
}

impl<S: ProcessingSlot + ?Sized> ProcessingSlot for Box<S> {
    fn label(&self) -> &str {
        (**self).label()
    }

    fn input_size(&self) -> usize {
        (**self).input_size()
    }

    fn output_size(&self) -> usize {
        (**self).output_size()
    }

    fn bind_buffers(&mut self, input: BufferRef, output: BufferRef) -> Result<()> {
        (**self).bind_buffers(input, output)
    }

    fn unbind_buffers(&mut self) {
        (**self).unbind_buffers()
    }

    fn input(&self) -> Option<&BufferRef> {
        (**self).input()
    }

    fn output(&self) -> Option<&BufferRef> {
        (**self).output()
    }

    fn is_busy(&self) -> bool {
        (**self).is_busy()
    }

    fn issue_async(&mut self, frame_index: u64) -> Result<()> {
        (**self).issue_async(frame_index)
    }

    fn wait(&mut self) -> Result<Option<JobReport>> {
        (**self).wait()
    }
}
