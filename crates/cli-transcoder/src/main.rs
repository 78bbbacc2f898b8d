use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use transcoder::{
    storage, EncodeParams, ExecutionError, MergeRequest, RunResult, ServiceError, Service,
    Settings, TranscodeRequest,
};

/// Staged files older than this are considered crash leftovers
const ORPHAN_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Media transcoding service front end
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the encoders usable on this host
    Encoders {
        /// Emit the full catalog as JSON
        #[arg(long)]
        json: bool,
    },
    /// Report the media kind of a file
    MediaType { file: PathBuf },
    /// Report the codec of each track in a file
    Codec { file: PathBuf },
    /// Report the resolution of a video file
    Resolution { file: PathBuf },
    /// Report per-track bitrates of a file
    Bitrate { file: PathBuf },
    /// Transcode one media file
    Transcode {
        /// Input file (must live under the storage directory)
        input: PathBuf,
        /// Output file (must not exist yet)
        output: PathBuf,
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Merge an audio file and a video file into one multimedia file
    Merge {
        /// Video-bearing input file
        video: PathBuf,
        /// Audio-bearing input file
        audio: PathBuf,
        /// Output file (must not exist yet)
        output: PathBuf,
        #[command(flatten)]
        params: ParamArgs,
    },
}

#[derive(clap::Args, Debug)]
struct ParamArgs {
    /// Video codec to encode with (default: stream copy)
    #[arg(long)]
    video_codec: Option<String>,
    /// Audio codec to encode with (default: stream copy)
    #[arg(long)]
    audio_codec: Option<String>,
    /// Video bitrate in kbps
    #[arg(long)]
    video_bitrate: Option<u32>,
    /// Audio bitrate in kbps
    #[arg(long)]
    audio_bitrate: Option<u32>,
    /// Horizontal resolution in pixels; the vertical dimension follows the
    /// aspect ratio when omitted
    #[arg(long)]
    horizontal: Option<u32>,
    /// Vertical resolution in pixels; the horizontal dimension follows the
    /// aspect ratio when omitted
    #[arg(long)]
    vertical: Option<u32>,
}

impl From<ParamArgs> for EncodeParams {
    fn from(args: ParamArgs) -> Self {
        EncodeParams {
            video_codec: args.video_codec,
            audio_codec: args.audio_codec,
            video_bitrate_kbps: args.video_bitrate,
            audio_bitrate_kbps: args.audio_bitrate,
            horizontal_resolution: args.horizontal,
            vertical_resolution: args.vertical,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger - use RUST_LOG env var or default to info level
    env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .init();

    let args = Args::parse();

    let settings = Settings::from_environment(args.config.as_deref())
        .context("Failed to load configuration")?;

    info!("Transcoder starting");
    info!("  Storage path: {}", settings.storage_path.display());
    info!("  Accelerator: {}", settings.accelerator);
    info!("  Docker image: {}", settings.config.docker_image);
    info!("  Max concurrent jobs: {}", settings.config.max_concurrent_jobs);

    match storage::sweep_orphans(&settings.storage_path, ORPHAN_MAX_AGE) {
        Ok(0) => {}
        Ok(removed) => info!("Startup sweep removed {} orphaned staged file(s)", removed),
        Err(e) => warn!("Startup sweep failed: {}", e),
    }

    // Startup phase: encoder discovery gates readiness
    let service = Service::new(settings)
        .await
        .context("Failed to start the transcoding service")?;

    match args.command {
        Command::Encoders { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(service.catalog())?);
            } else {
                for encoder in service.catalog().encoders() {
                    println!(
                        "{:<9} {:<24} {}",
                        encoder.kind, encoder.name, encoder.description
                    );
                }
            }
        }
        Command::MediaType { file } => {
            println!("{}", service.media_kind(&file).await);
        }
        Command::Codec { file } => {
            let codecs = service.codecs(&file).await?;
            println!("{}", serde_json::to_string_pretty(&codecs)?);
        }
        Command::Resolution { file } => {
            let resolution = service.resolution(&file).await?;
            println!("{}", serde_json::to_string_pretty(&resolution)?);
        }
        Command::Bitrate { file } => {
            let bitrates = service.bitrate_kbps(&file).await?;
            println!("{}", serde_json::to_string_pretty(&bitrates)?);
        }
        Command::Transcode {
            input,
            output,
            params,
        } => {
            let request = TranscodeRequest {
                input,
                output: output.clone(),
                params: params.into(),
            };
            let result = service.transcode(&request).await;
            report_run(result, &output)?;
        }
        Command::Merge {
            video,
            audio,
            output,
            params,
        } => {
            let request = MergeRequest {
                video_input: video,
                audio_input: audio,
                output: output.clone(),
                params: params.into(),
            };
            let result = service.merge(&request).await;
            report_run(result, &output)?;
        }
    }

    Ok(())
}

/// Print the outcome of an encoder run, surfacing the captured log on failure
fn report_run(result: Result<RunResult, ServiceError>, output: &std::path::Path) -> Result<()> {
    match result {
        Ok(run) => {
            info!(
                "✅ Encode complete in {}s",
                (run.finished_at - run.started_at).num_seconds()
            );
            println!("{}", output.display());
            Ok(())
        }
        Err(ServiceError::Execution(ExecutionError::ExitFailure { code, log })) => {
            for line in &log {
                eprintln!("{line}");
            }
            anyhow::bail!("encoder exited with code {code}");
        }
        Err(e) => Err(e.into()),
    }
}
