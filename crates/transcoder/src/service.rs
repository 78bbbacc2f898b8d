use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info};
use tokio::sync::Semaphore;

use crate::command::{self, MergeRequest, TranscodeRequest};
use crate::config::Settings;
use crate::encoders::EncoderCatalog;
use crate::error::ServiceError;
use crate::harness::{self, RunResult};
use crate::probe::{self, MediaKind, Resolution, TrackBitrates, TrackCodecs};
use crate::storage;
use crate::validate;

/// Request-handling front of the crate. Construction is the startup phase:
/// the encoder catalog is discovered before the value exists, so no request
/// can ever be validated against an unpopulated catalog.
pub struct Service {
    settings: Settings,
    catalog: Arc<EncoderCatalog>,
    jobs: Arc<Semaphore>,
}

impl Service {
    /// Discover the encoder catalog and become ready to serve requests.
    /// Fails loudly when the listing cannot be obtained or parsed.
    pub async fn new(settings: Settings) -> Result<Self> {
        let catalog = EncoderCatalog::discover(&settings)
            .await
            .context("Encoder discovery failed")?;

        let permits = settings.config.max_concurrent_jobs.max(1);
        info!("Service ready: up to {} concurrent encoder runs", permits);

        Ok(Self {
            settings,
            catalog: Arc::new(catalog),
            jobs: Arc::new(Semaphore::new(permits)),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn catalog(&self) -> &EncoderCatalog {
        &self.catalog
    }

    /// Transcode one media file according to the request
    pub async fn transcode(&self, request: &TranscodeRequest) -> Result<RunResult, ServiceError> {
        let kind = validate::validate_transcode(&self.settings, &self.catalog, request).await?;
        debug!(
            "transcoding {} ({}) -> {}",
            request.input.display(),
            kind,
            request.output.display()
        );

        let input = storage::container_path(&self.settings.storage_path, &request.input)?;
        let output = storage::container_path(&self.settings.storage_path, &request.output)?;
        let ffmpeg_args =
            command::transcode_command(&input, &output, &request.params, self.settings.accelerator);

        self.run(ffmpeg_args).await
    }

    /// Merge an audio-bearing and a video-bearing input into one multimedia file
    pub async fn merge(&self, request: &MergeRequest) -> Result<RunResult, ServiceError> {
        let (video_kind, audio_kind) =
            validate::validate_merge(&self.settings, &self.catalog, request).await?;
        debug!(
            "merging {} ({}) + {} ({}) -> {}",
            request.video_input.display(),
            video_kind,
            request.audio_input.display(),
            audio_kind,
            request.output.display()
        );

        let video_input = storage::container_path(&self.settings.storage_path, &request.video_input)?;
        let audio_input = storage::container_path(&self.settings.storage_path, &request.audio_input)?;
        let output = storage::container_path(&self.settings.storage_path, &request.output)?;
        let ffmpeg_args = command::merge_command(
            &video_input,
            &audio_input,
            &output,
            &request.params,
            self.settings.accelerator,
        );

        self.run(ffmpeg_args).await
    }

    async fn run(&self, ffmpeg_args: Vec<String>) -> Result<RunResult, ServiceError> {
        // Bounded pool: excess requests wait here instead of piling an
        // arbitrary number of encoder containers onto the host.
        let _permit = self.jobs.acquire().await.expect("job semaphore closed");

        let result = harness::run_encoder(&self.settings, &ffmpeg_args).await?;
        info!(
            "encoder run finished: exit code {}, {} output lines, {}s",
            result.exit_code,
            result.lines.len(),
            (result.finished_at - result.started_at).num_seconds()
        );
        for line in &result.lines {
            debug!("ffmpeg: {}", line);
        }
        Ok(result)
    }

    /// Media kind of a file; probe failure reads as Unknown
    pub async fn media_kind(&self, path: &Path) -> MediaKind {
        probe::classify(&self.settings, path).await
    }

    /// Codec of the first stream of each kind in a file
    pub async fn codecs(&self, path: &Path) -> Result<TrackCodecs, ServiceError> {
        Ok(probe::codecs(&self.settings, path).await?)
    }

    /// Resolution of a video or multimedia file
    pub async fn resolution(&self, path: &Path) -> Result<Resolution, ServiceError> {
        Ok(probe::resolution(&self.settings, path).await?)
    }

    /// Per-track bitrates of a file
    pub async fn bitrate_kbps(&self, path: &Path) -> Result<TrackBitrates, ServiceError> {
        Ok(probe::bitrate_kbps(&self.settings, path).await?)
    }
}
