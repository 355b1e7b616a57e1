use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use accelpipe_pipeline::PipelineConfig;

mod cli;

use cli::{Cli, Command, SimFlags, Verdict};

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("accelpipe v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run {
            frames,
            input,
            reference,
            timestamps,
            preset,
            depth,
            frame_size,
            eve,
            dsp,
            latency_us,
            fail_on_frame,
            corrupt_frame,
        } => {
            let mut config = match &cli.config {
                Some(path) => PipelineConfig::from_json_file(path)?,
                None => preset.config(),
            };

            if let Some(n) = frames {
                config.num_frames = n;
            }
            if let Some(path) = input {
                config.input_path = path.to_string_lossy().into_owned();
            }
            if let Some(path) = reference {
                config.reference_path = path.to_string_lossy().into_owned();
            }
            if let Some(path) = timestamps {
                config.timestamp_log = Some(path.to_string_lossy().into_owned());
            }
            if let Some(d) = depth {
                config.buffering_depth = d;
            }
            if frame_size.is_some() {
                config.frame_size = frame_size;
            }

            let sim = SimFlags {
                eve,
                dsp,
                latency_us,
                fail_on_frame,
                corrupt_frame,
            };
            // Configuration failures exit through anyhow without a verdict.
            let outcome = match cli::run_pipeline(config, &sim) {
                Err(e) if e.is_configuration() => return Err(e.into()),
                other => other,
            };
            if let Err(e) = &outcome {
                tracing::error!(error = %e, "run aborted");
            }

            let verdict = Verdict::of(&outcome);
            println!("{}", verdict.as_str());
            Ok(verdict.exit_code())
        }
        Command::Synth {
            frame_size,
            frames,
            out_dir,
        } => {
            cli::synth_frames(frame_size, frames, &out_dir)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
