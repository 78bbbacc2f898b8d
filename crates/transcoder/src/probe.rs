use std::fmt;
use std::path::Path;
use std::process::Stdio;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::config::Settings;
use crate::error::ProbeError;
use crate::storage::CONTAINER_STORAGE_ROOT;

/// Classification of a file's stream composition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Audio,
    Video,
    Multimedia,
    Unknown,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MediaKind::Audio => "Audio",
            MediaKind::Video => "Video",
            MediaKind::Multimedia => "Multimedia",
            MediaKind::Unknown => "Unknown",
        };
        f.pad(name)
    }
}

impl MediaKind {
    /// Whether the file carries a video stream
    pub fn has_video(&self) -> bool {
        matches!(self, MediaKind::Video | MediaKind::Multimedia)
    }
}

/// Complete ffprobe output structure
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    pub streams: Vec<FFProbeStream>,
    pub format: FFProbeFormat,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeFormat {
    pub format_name: String,
    pub bit_rate: Option<String>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeStream {
    pub index: i32,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bit_rate: Option<String>,
}

/// Pixel dimensions of the first video stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub horizontal: u32,
    pub vertical: u32,
}

/// Codec name of the first stream of each kind, absent when that kind is
/// not present in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackCodecs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
}

/// Per-track bitrate in kbps. The outer Option is "stream of that kind
/// present"; the inner is "stream reports a bitrate". Some containers
/// omit the bitrate, which serializes as null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackBitrates {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<Option<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Option<u64>>,
}

/// Run ffprobe via Docker and parse the JSON output
pub async fn probe_file(settings: &Settings, file_path: &Path) -> Result<FFProbeData, ProbeError> {
    // The file's parent directory is mounted read-only; the container sees
    // the file under the storage root target.
    let parent_dir = file_path.parent().ok_or_else(|| ProbeError::Malformed {
        path: file_path.to_path_buf(),
        message: "file path has no parent directory".to_string(),
    })?;
    let basename = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ProbeError::Malformed {
            path: file_path.to_path_buf(),
            message: "file path has no basename".to_string(),
        })?;

    let container_path = format!("{CONTAINER_STORAGE_ROOT}/{basename}");

    debug!(
        "ffprobe: mounting {} to {}, probing {}",
        parent_dir.display(),
        CONTAINER_STORAGE_ROOT,
        container_path
    );

    let mut cmd = Command::new(&settings.config.docker_bin);
    cmd.arg("run")
        .arg("--rm")
        .arg("--entrypoint")
        .arg("ffprobe")
        .arg("-v")
        .arg(format!(
            "{}:{}:ro",
            parent_dir.display(),
            CONTAINER_STORAGE_ROOT
        ))
        .arg(&settings.config.docker_image)
        .arg("-v")
        .arg("error")
        .arg("-print_format")
        .arg("json")
        .arg("-show_streams")
        .arg("-show_format")
        .arg(&container_path)
        .stdin(Stdio::null());

    let output = cmd.output().await.map_err(ProbeError::Launch)?;

    if !output.status.success() {
        return Err(ProbeError::Failed {
            path: file_path.to_path_buf(),
            exit_code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let json_str = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&json_str).map_err(|e| ProbeError::Malformed {
        path: file_path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Classify parsed probe output by the set of stream kinds present
pub fn classify_streams(data: &FFProbeData) -> MediaKind {
    let has_video = data
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("video"));
    let has_audio = data
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    match (has_video, has_audio) {
        (true, true) => MediaKind::Multimedia,
        (true, false) => MediaKind::Video,
        (false, true) => MediaKind::Audio,
        (false, false) => MediaKind::Unknown,
    }
}

/// Classify a file's media kind. Probe failure (unreadable or non-media
/// file) degrades to Unknown so the validator can reject cleanly instead
/// of crashing.
pub async fn classify(settings: &Settings, file_path: &Path) -> MediaKind {
    match probe_file(settings, file_path).await {
        Ok(data) => classify_streams(&data),
        Err(e) => {
            warn!("probe failed for {}: {}", file_path.display(), e);
            MediaKind::Unknown
        }
    }
}

fn first_stream<'a>(data: &'a FFProbeData, kind: &str) -> Option<&'a FFProbeStream> {
    data.streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some(kind))
}

pub(crate) fn codecs_from(data: &FFProbeData) -> TrackCodecs {
    TrackCodecs {
        video: first_stream(data, "video").and_then(|s| s.codec_name.clone()),
        audio: first_stream(data, "audio").and_then(|s| s.codec_name.clone()),
    }
}

pub(crate) fn resolution_from(
    data: &FFProbeData,
    file_path: &Path,
) -> Result<Resolution, ProbeError> {
    if !classify_streams(data).has_video() {
        return Err(ProbeError::NotAVideo(file_path.to_path_buf()));
    }

    let stream = first_stream(data, "video").ok_or_else(|| ProbeError::NotAVideo(file_path.to_path_buf()))?;
    match (stream.width, stream.height) {
        (Some(horizontal), Some(vertical)) => Ok(Resolution {
            horizontal,
            vertical,
        }),
        _ => Err(ProbeError::Malformed {
            path: file_path.to_path_buf(),
            message: "video stream reports no dimensions".to_string(),
        }),
    }
}

pub(crate) fn bitrates_from(data: &FFProbeData) -> TrackBitrates {
    let kbps = |stream: &FFProbeStream| {
        stream
            .bit_rate
            .as_deref()
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(|bps| bps / 1000)
    };

    TrackBitrates {
        video: first_stream(data, "video").map(kbps),
        audio: first_stream(data, "audio").map(kbps),
    }
}

/// Codec name of the first stream of each kind present in the file
pub async fn codecs(settings: &Settings, file_path: &Path) -> Result<TrackCodecs, ProbeError> {
    let data = probe_file(settings, file_path).await?;
    Ok(codecs_from(&data))
}

/// Resolution of the first video stream. Fails with NotAVideo when the
/// file carries no video stream; callers translate this into a 400-class
/// response.
pub async fn resolution(settings: &Settings, file_path: &Path) -> Result<Resolution, ProbeError> {
    let data = probe_file(settings, file_path).await?;
    resolution_from(&data, file_path)
}

/// Per-track bitrates in kbps. A stream without a reported bitrate yields
/// an explicit null; this is a normal outcome, not an error.
pub async fn bitrate_kbps(
    settings: &Settings,
    file_path: &Path,
) -> Result<TrackBitrates, ProbeError> {
    let data = probe_file(settings, file_path).await?;
    Ok(bitrates_from(&data))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(kind: &str, codec: &str) -> FFProbeStream {
        FFProbeStream {
            index: 0,
            codec_type: Some(kind.to_string()),
            codec_name: Some(codec.to_string()),
            width: None,
            height: None,
            bit_rate: None,
        }
    }

    fn video_stream(codec: &str, width: u32, height: u32) -> FFProbeStream {
        FFProbeStream {
            width: Some(width),
            height: Some(height),
            ..stream("video", codec)
        }
    }

    fn data(streams: Vec<FFProbeStream>) -> FFProbeData {
        FFProbeData {
            streams,
            format: FFProbeFormat {
                format_name: "matroska,webm".to_string(),
                bit_rate: None,
            },
        }
    }

    #[test]
    fn classify_covers_all_stream_combinations() {
        assert_eq!(
            classify_streams(&data(vec![
                video_stream("h264", 1920, 1080),
                stream("audio", "aac")
            ])),
            MediaKind::Multimedia
        );
        assert_eq!(
            classify_streams(&data(vec![video_stream("h264", 1920, 1080)])),
            MediaKind::Video
        );
        assert_eq!(
            classify_streams(&data(vec![stream("audio", "opus")])),
            MediaKind::Audio
        );
        assert_eq!(
            classify_streams(&data(vec![stream("subtitle", "subrip")])),
            MediaKind::Unknown
        );
        assert_eq!(classify_streams(&data(vec![])), MediaKind::Unknown);
    }

    #[test]
    fn codecs_reports_first_stream_of_each_kind() {
        let probed = data(vec![
            video_stream("hevc", 3840, 2160),
            stream("audio", "aac"),
            stream("audio", "ac3"),
        ]);
        let codecs = codecs_from(&probed);
        assert_eq!(codecs.video.as_deref(), Some("hevc"));
        assert_eq!(codecs.audio.as_deref(), Some("aac"));

        let audio_only = codecs_from(&data(vec![stream("audio", "flac")]));
        assert_eq!(audio_only.video, None);
        assert_eq!(audio_only.audio.as_deref(), Some("flac"));
    }

    #[test]
    fn resolution_requires_a_video_stream() {
        let path = Path::new("song.flac");
        let err = resolution_from(&data(vec![stream("audio", "flac")]), path)
            .expect_err("audio-only file has no resolution");
        assert!(matches!(err, ProbeError::NotAVideo(_)));

        let probed = data(vec![video_stream("av1", 1280, 720), stream("audio", "opus")]);
        let res = resolution_from(&probed, Path::new("clip.mkv")).expect("video resolution");
        assert_eq!(
            res,
            Resolution {
                horizontal: 1280,
                vertical: 720
            }
        );
    }

    #[test]
    fn bitrates_distinguish_absent_stream_from_unreported_bitrate() {
        let mut with_rate = video_stream("h264", 1920, 1080);
        with_rate.bit_rate = Some("5000000".to_string());
        let probed = data(vec![with_rate, stream("audio", "aac")]);

        let rates = bitrates_from(&probed);
        assert_eq!(rates.video, Some(Some(5000)));
        // Audio stream present but reports no bitrate: explicit null.
        assert_eq!(rates.audio, Some(None));

        let no_audio = bitrates_from(&data(vec![video_stream("h264", 640, 480)]));
        assert_eq!(no_audio.audio, None);
    }

    #[test]
    fn bitrate_report_serializes_null_and_omits_absent() {
        let rates = TrackBitrates {
            video: Some(None),
            audio: None,
        };
        let json = serde_json::to_string(&rates).expect("serialize");
        assert_eq!(json, r#"{"video":null}"#);
    }
}
