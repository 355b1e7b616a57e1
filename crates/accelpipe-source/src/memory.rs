use accelpipe_core::{BufferRef, DispatchError, FrameSource, Result};

/// Deterministic test pattern for frame `index`.
pub fn synthetic_frame(index: u64, size: usize) -> Vec<u8> {
    let seed = index.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    (0..size)
        .map(|i| (seed.rotate_left((i % 64) as u32) as u8) ^ (i as u8))
        .collect()
}

/// Frames held in memory, served in order.
///
/// Used by tests and benchmarks, and whenever frames are produced by the
/// caller rather than read from disk.
pub struct MemoryFrameSource {
    frames: Vec<Vec<u8>>,
    reference: Vec<u8>,
    cycle: bool,
    served: Vec<u64>,
}

impl MemoryFrameSource {
    pub fn new(frames: Vec<Vec<u8>>, reference: Vec<u8>) -> Self {
        Self {
            frames,
            reference,
            cycle: false,
            served: Vec::new(),
        }
    }

    /// `count` synthetic frames of `size` bytes.
    pub fn synthetic(count: usize, size: usize, reference: Vec<u8>) -> Self {
        Self::new(
            (0..count as u64).map(|i| synthetic_frame(i, size)).collect(),
            reference,
        )
    }

    /// Serve frame `i mod len` instead of ending after the last frame.
    pub fn cycle(mut self, enabled: bool) -> Self {
        self.cycle = enabled;
        self
    }

    /// Frame indices handed out so far, in request order.
    pub fn served(&self) -> &[u64] {
        &self.served
    }
}

impl FrameSource for MemoryFrameSource {
    fn read_next(&mut self, frame_index: u64, input: &BufferRef) -> Result<bool> {
        let slot = if self.cycle && !self.frames.is_empty() {
            Some(frame_index as usize % self.frames.len())
        } else {
            usize::try_from(frame_index).ok()
        };
        let Some(frame) = slot.and_then(|i| self.frames.get(i)) else {
            return Ok(false);
        };
        if frame.len() > input.len() {
            return Err(DispatchError::FrameSource(format!(
                "frame {frame_index} has {} bytes, input buffer holds {}",
                frame.len(),
                input.len()
            )));
        }

        input.with_mut(|dst| dst[..frame.len()].copy_from_slice(frame))?;
        self.served.push(frame_index);
        Ok(true)
    }

    fn reference_output(&self) -> &[u8] {
        &self.reference
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accelpipe_core::HostBuffer;

    #[test]
    fn synthetic_frames_differ() {
        assert_eq!(synthetic_frame(3, 32), synthetic_frame(3, 32));
        assert_ne!(synthetic_frame(0, 32), synthetic_frame(1, 32));
    }

    #[test]
    fn ends_after_last_frame() {
        let mut src = MemoryFrameSource::new(vec![vec![1], vec![2]], vec![]);
        let buf = HostBuffer::alloc(1).unwrap();
        assert!(src.read_next(0, &buf.downgrade()).unwrap());
        assert!(src.read_next(1, &buf.downgrade()).unwrap());
        assert!(!src.read_next(2, &buf.downgrade()).unwrap());
        assert_eq!(src.served(), &[0, 1]);
    }

    #[test]
    fn cycling_repeats_frames() {
        let mut src = MemoryFrameSource::new(vec![vec![1], vec![2]], vec![]).cycle(true);
        let buf = HostBuffer::alloc(1).unwrap();
        assert!(src.read_next(5, &buf.downgrade()).unwrap());
        assert_eq!(buf.to_vec(), vec![2]);
    }
}
