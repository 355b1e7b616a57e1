use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use accelpipe_core::{BufferRef, DispatchError, FrameSource, Result};

/// Load the precomputed output for the reference frame.
pub fn load_reference(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(DispatchError::Config(format!(
            "reference output not found: {}",
            path.display()
        )));
    }
    let data = std::fs::read(path)?;
    tracing::info!(path = %path.display(), bytes = data.len(), "loaded reference output");
    Ok(data)
}

/// Frames stored back to back, `frame_size` bytes each, in one binary file.
///
/// Frames are read strictly in order. With wrap-around enabled, reaching the
/// end of the file after a complete frame rewinds to the first frame, so a
/// short clip can feed an arbitrarily long run.
#[derive(Debug)]
pub struct RawFrameFile {
    path: PathBuf,
    reader: BufReader<File>,
    frame_size: usize,
    num_frames: u64,
    wrap_around: bool,
    reference: Vec<u8>,
    frames_read: u64,
    scratch: Vec<u8>,
}

impl RawFrameFile {
    /// Open `path` for reading `num_frames` frames of `frame_size` bytes.
    pub fn open(path: &Path, frame_size: usize, num_frames: u64) -> Result<Self> {
        if frame_size == 0 {
            return Err(DispatchError::Config("frame size must be non-zero".into()));
        }
        let file = File::open(path).map_err(|e| {
            DispatchError::Config(format!("cannot open input {}: {e}", path.display()))
        })?;

        tracing::info!(path = %path.display(), frame_size, num_frames, "opened frame file");

        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            frame_size,
            num_frames,
            wrap_around: true,
            reference: Vec::new(),
            frames_read: 0,
            scratch: vec![0; frame_size],
        })
    }

    pub fn with_reference(mut self, reference: Vec<u8>) -> Self {
        self.reference = reference;
        self
    }

    pub fn with_reference_file(self, path: &Path) -> Result<Self> {
        Ok(self.with_reference(load_reference(path)?))
    }

    pub fn wrap_around(mut self, enabled: bool) -> Self {
        self.wrap_around = enabled;
        self
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fill `scratch` as far as the file allows; returns bytes read.
    fn fill_scratch(&mut self) -> Result<usize> {
        let mut filled = 0;
        while filled < self.frame_size {
            match self.reader.read(&mut self.scratch[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn at_eof(&mut self) -> Result<bool> {
        Ok(self.reader.fill_buf()?.is_empty())
    }
}

impl FrameSource for RawFrameFile {
    fn read_next(&mut self, frame_index: u64, input: &BufferRef) -> Result<bool> {
        if frame_index >= self.num_frames {
            return Ok(false);
        }
        if input.len() < self.frame_size {
            return Err(DispatchError::FrameSource(format!(
                "frame of {} bytes does not fit input buffer of {}",
                self.frame_size,
                input.len()
            )));
        }

        let got = self.fill_scratch()?;
        if got < self.frame_size {
            if got > 0 {
                tracing::warn!(
                    path = %self.path.display(),
                    frame = frame_index,
                    bytes = got,
                    "trailing partial frame ignored"
                );
            }
            return Ok(false);
        }

        let frame = &self.scratch;
        input.with_mut(|dst| dst[..frame.len()].copy_from_slice(frame))?;
        self.frames_read += 1;

        if self.wrap_around && self.at_eof()? {
            self.reader.seek(SeekFrom::Start(0))?;
            tracing::trace!(frame = frame_index, "frame file rewound");
        }

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
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(bytes: &[u8]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn reads_frames_in_order() {
        let f = file_with(&[1, 1, 2, 2, 3, 3]);
        let mut src = RawFrameFile::open(f.path(), 2, 3).unwrap().wrap_around(false);
        let buf = HostBuffer::alloc(2).unwrap();

        for expected in 1..=3u8 {
            assert!(src.read_next(expected as u64 - 1, &buf.downgrade()).unwrap());
            assert_eq!(buf.to_vec(), vec![expected, expected]);
        }
        assert_eq!(src.frames_read(), 3);
    }

    #[test]
    fn stops_at_frame_count() {
        let f = file_with(&[9; 8]);
        let mut src = RawFrameFile::open(f.path(), 2, 1).unwrap();
        let buf = HostBuffer::alloc(2).unwrap();
        assert!(src.read_next(0, &buf.downgrade()).unwrap());
        assert!(!src.read_next(1, &buf.downgrade()).unwrap());
    }

    #[test]
    fn end_of_file_without_wrap() {
        let f = file_with(&[1, 2, 3]);
        let mut src = RawFrameFile::open(f.path(), 2, 10).unwrap().wrap_around(false);
        let buf = HostBuffer::alloc(2).unwrap();
        assert!(src.read_next(0, &buf.downgrade()).unwrap());
        // One byte left: partial frame is end of stream.
        assert!(!src.read_next(1, &buf.downgrade()).unwrap());
        assert_eq!(buf.to_vec(), vec![1, 2]);
    }

    #[test]
    fn wraps_to_first_frame() {
        let f = file_with(&[5, 5, 6, 6]);
        let mut src = RawFrameFile::open(f.path(), 2, 5).unwrap();
        let buf = HostBuffer::alloc(2).unwrap();
        let seen: Vec<u8> = (0..5)
            .map(|i| {
                assert!(src.read_next(i, &buf.downgrade()).unwrap());
                buf.to_vec()[0]
            })
            .collect();
        assert_eq!(seen, vec![5, 6, 5, 6, 5]);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let f = file_with(&[0; 8]);
        let mut src = RawFrameFile::open(f.path(), 8, 1).unwrap();
        let buf = HostBuffer::alloc(4).unwrap();
        assert!(matches!(
            src.read_next(0, &buf.downgrade()),
            Err(DispatchError::FrameSource(_))
        ));
    }

    #[test]
    fn missing_reference_is_config_error() {
        let err = load_reference(Path::new("/nonexistent/reference.bin")).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn missing_input_is_config_error() {
        assert!(RawFrameFile::open(Path::new("/nonexistent/frames.bin"), 4, 1)
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn reference_file_round_trip() {
        let reff = file_with(&[0xaa, 0xbb]);
        let frames = file_with(&[0; 4]);
        let src = RawFrameFile::open(frames.path(), 2, 2)
            .unwrap()
            .with_reference_file(reff.path())
            .unwrap();
        assert_eq!(src.reference_output(), &[0xaa, 0xbb]);
    }
}
