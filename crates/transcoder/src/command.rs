use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

use crate::config::Accelerator;

/// Token selecting stream passthrough instead of re-encoding
pub const COPY_CODEC: &str = "copy";

/// Render node the VAAPI device binding points at
pub const VAAPI_RENDER_DEVICE: &str = "/dev/dri/renderD128";

/// Fixed filter chain uploading frames to the VAAPI device; replaces any
/// scale filter when VAAPI is active.
pub const VAAPI_UPLOAD_FILTER: &str = "format=nv12|vaapi,hwupload";

/// One axis of the scale filter: an explicit pixel count, or Auto to
/// preserve the aspect ratio (rendered as the tool's `-1` token).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Auto,
    Pixels(u32),
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Auto => f.write_str("-1"),
            Dimension::Pixels(n) => write!(f, "{n}"),
        }
    }
}

/// Optional encoding knobs shared by transcode and merge requests
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EncodeParams {
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub video_bitrate_kbps: Option<u32>,
    pub audio_bitrate_kbps: Option<u32>,
    pub horizontal_resolution: Option<u32>,
    pub vertical_resolution: Option<u32>,
}

impl EncodeParams {
    /// Resolve the requested scaling. None when neither dimension was
    /// supplied (scaling untouched); otherwise a missing dimension becomes
    /// Auto so the aspect ratio is preserved.
    pub fn scale(&self) -> Option<(Dimension, Dimension)> {
        match (self.horizontal_resolution, self.vertical_resolution) {
            (None, None) => None,
            (h, v) => Some((
                h.map_or(Dimension::Auto, Dimension::Pixels),
                v.map_or(Dimension::Auto, Dimension::Pixels),
            )),
        }
    }
}

/// Single-input transcode request. The output path must not pre-exist.
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub params: EncodeParams,
}

/// Dual-input merge request: a video-bearing primary input and an
/// audio-bearing secondary input, combined into one multimedia output.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub video_input: PathBuf,
    pub audio_input: PathBuf,
    pub output: PathBuf,
    pub params: EncodeParams,
}

/// Build the argument vector for a single-input transcode
pub fn transcode_command(
    input: &str,
    output: &str,
    params: &EncodeParams,
    accelerator: Accelerator,
) -> Vec<String> {
    assemble(&[input], output, params, accelerator)
}

/// Build the argument vector for an audio/video merge. The video-bearing
/// input is declared first.
pub fn merge_command(
    video_input: &str,
    audio_input: &str,
    output: &str,
    params: &EncodeParams,
    accelerator: Accelerator,
) -> Vec<String> {
    assemble(&[video_input, audio_input], output, params, accelerator)
}

/// Assemble the command vector. Token order is load-bearing: flags must
/// immediately precede their values, and the device binding must appear
/// before the first input flag or the accelerator is never engaged.
fn assemble(
    inputs: &[&str],
    output: &str,
    params: &EncodeParams,
    accelerator: Accelerator,
) -> Vec<String> {
    let mut command = Vec::new();

    if accelerator == Accelerator::Vaapi {
        command.push("-vaapi_device".to_string());
        command.push(VAAPI_RENDER_DEVICE.to_string());
    }

    for input in inputs {
        command.push("-i".to_string());
        command.push((*input).to_string());
    }

    // Video codec, or passthrough when none was requested
    command.push("-c:v".to_string());
    command.push(
        params
            .video_codec
            .clone()
            .unwrap_or_else(|| COPY_CODEC.to_string()),
    );

    if let Some(kbps) = params.video_bitrate_kbps {
        command.push("-b:v".to_string());
        command.push(format!("{kbps}k"));
    }
    if let Some(kbps) = params.audio_bitrate_kbps {
        command.push("-b:a".to_string());
        command.push(format!("{kbps}k"));
    }

    // VAAPI needs its pixel-format upload chain instead of any scaling
    if accelerator == Accelerator::Vaapi {
        command.push("-vf".to_string());
        command.push(VAAPI_UPLOAD_FILTER.to_string());
    } else if let Some((horizontal, vertical)) = params.scale() {
        command.push("-vf".to_string());
        command.push(format!("scale={horizontal}:{vertical}"));
    }

    // Audio codec, or passthrough
    command.push("-c:a".to_string());
    command.push(
        params
            .audio_codec
            .clone()
            .unwrap_or_else(|| COPY_CODEC.to_string()),
    );

    command.push(output.to_string());
    command
}
