use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use accelpipe_core::{Result, RunResult};
use accelpipe_device::{SimNetwork, SimulatedRuntime, SimulatorConfig};
use accelpipe_pipeline::{DispatchPipeline, PipelineConfig};
use accelpipe_source::{synthetic_frame, RawFrameFile};

#[derive(Parser)]
#[command(name = "accelpipe", about = "Round-robin frame dispatch over accelerator slot pools")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to pipeline config file (JSON).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Command {
    /// Stream frames through a slot pool on the simulated runtime.
    Run {
        /// Frames to process.
        #[arg(long)]
        frames: Option<u64>,
        /// Raw frame file.
        #[arg(long)]
        input: Option<PathBuf>,
        /// Reference output for the first frame.
        #[arg(long)]
        reference: Option<PathBuf>,
        /// Write per-frame timings as JSON lines.
        #[arg(long)]
        timestamps: Option<PathBuf>,
        /// Pool layout, when no config file is given.
        #[arg(long, default_value = "one-slot-per-device")]
        preset: Preset,
        /// Slot copies per device group.
        #[arg(long)]
        depth: Option<usize>,
        /// Bytes per frame.
        #[arg(long)]
        frame_size: Option<usize>,
        /// Simulated EVE devices.
        #[arg(long, default_value = "4")]
        eve: usize,
        /// Simulated DSP devices.
        #[arg(long, default_value = "2")]
        dsp: usize,
        /// Simulated compute time per job, in microseconds.
        #[arg(long)]
        latency_us: Option<u64>,
        /// Inject a device fault on this frame.
        #[arg(long)]
        fail_on_frame: Option<u64>,
        /// Corrupt the output of this frame.
        #[arg(long)]
        corrupt_frame: Option<u64>,
    },
    /// Write a synthetic still clip and its reference output.
    Synth {
        /// Bytes per frame.
        #[arg(long, default_value = "92160")]
        frame_size: usize,
        /// Frames in the clip.
        #[arg(long, default_value = "1")]
        frames: u64,
        /// Output directory for frames.bin and reference.bin.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum Preset {
    OneSlotPerDevice,
    TwoDeviceChain,
}

impl Preset {
    pub fn config(self) -> PipelineConfig {
        match self {
            Preset::OneSlotPerDevice => PipelineConfig::one_slot_per_device(),
            Preset::TwoDeviceChain => PipelineConfig::two_device_chain(),
        }
    }
}

/// Simulator flags of the `run` command.
pub struct SimFlags {
    pub eve: usize,
    pub dsp: usize,
    pub latency_us: Option<u64>,
    pub fail_on_frame: Option<u64>,
    pub corrupt_frame: Option<u64>,
}

impl SimFlags {
    pub fn simulator(&self, frame_size: Option<usize>) -> SimulatorConfig {
        let defaults = SimulatorConfig::default();
        SimulatorConfig {
            eve_count: self.eve,
            dsp_count: self.dsp,
            eve_latency_us: self.latency_us.unwrap_or(defaults.eve_latency_us),
            dsp_latency_us: self.latency_us.unwrap_or(defaults.dsp_latency_us),
            frame_size: frame_size.unwrap_or(defaults.frame_size),
            fail_on_frame: self.fail_on_frame,
            corrupt_frame: self.corrupt_frame,
        }
    }
}

/// Build the pool, stream the input file through it and report.
pub fn run_pipeline(config: PipelineConfig, sim: &SimFlags) -> Result<RunResult> {
    let runtime = SimulatedRuntime::new(sim.simulator(config.frame_size));
    let input = PathBuf::from(&config.input_path);
    let reference = PathBuf::from(&config.reference_path);
    let num_frames = config.num_frames;
    let wrap = config.wrap_input;

    let pipeline = DispatchPipeline::build(config, &runtime)?;
    let mut source = RawFrameFile::open(&input, pipeline.frame_size(), num_frames)?
        .wrap_around(wrap)
        .with_reference_file(&reference)?;

    let result = pipeline.run(&mut source)?;

    eprintln!(
        "[{} frames on {} slots | mean {:.2}ms/frame | {} validated, {} mismatched]",
        result.frames_completed,
        result.pool_size,
        result.mean_host_ms(),
        result.validations.len(),
        result.mismatched_slots().len(),
    );
    Ok(result)
}

/// Final line printed by `run`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed,
}

impl Verdict {
    /// A run passes only when it completed and every first-pass frame
    /// matched the reference. An aborted run is a failure.
    pub fn of(outcome: &Result<RunResult>) -> Self {
        match outcome {
            Ok(result) if result.passed => Verdict::Passed,
            _ => Verdict::Failed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Passed => "PASSED",
            Verdict::Failed => "FAILED",
        }
    }

    pub fn exit_code(self) -> ExitCode {
        match self {
            Verdict::Passed => ExitCode::SUCCESS,
            Verdict::Failed => ExitCode::FAILURE,
        }
    }
}

/// Write `frames` copies of one synthetic frame and its network output.
pub fn synth_frames(frame_size: usize, frames: u64, out_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(out_dir)?;
    let frame = synthetic_frame(0, frame_size);

    let clip: Vec<u8> = (0..frames).flat_map(|_| frame.iter().copied()).collect();
    let frames_path = out_dir.join("frames.bin");
    std::fs::write(&frames_path, &clip)?;

    let reference_path = out_dir.join("reference.bin");
    std::fs::write(&reference_path, SimNetwork::reference(&frame))?;

    tracing::info!(
        frames = %frames_path.display(),
        reference = %reference_path.display(),
        frame_size,
        count = frames,
        "synthetic clip written"
    );
    Ok(())
}
