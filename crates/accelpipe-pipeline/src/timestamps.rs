use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use accelpipe_core::{DispatchError, FrameTiming, Result};

/// JSON-lines log of per-frame timings.
///
/// One object per completed frame, in completion order.
#[derive(Debug)]
pub struct TimestampLog {
    path: PathBuf,
    writer: BufWriter<File>,
    records: u64,
}

impl TimestampLog {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            DispatchError::Config(format!("cannot create timestamp log {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), "timestamp log opened");
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            records: 0,
        })
    }

    pub fn record(&mut self, timing: &FrameTiming) -> Result<()> {
        serde_json::to_writer(&mut self.writer, timing).map_err(std::io::Error::from)?;
        self.writer.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close. Returns the number of records written.
    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush()?;
        tracing::info!(path = %self.path.display(), records = self.records, "timestamp log closed");
        Ok(self.records)
    }
}
