use std::path::Path;

use log::debug;

use crate::command::{EncodeParams, MergeRequest, TranscodeRequest};
use crate::config::Settings;
use crate::encoders::{EncoderCatalog, EncoderKind};
use crate::error::{ServiceError, ValidationError};
use crate::probe::{self, MediaKind};

/// Validate a single-input request. Checks run in a fixed order and
/// short-circuit on the first failure; the filesystem checks come before
/// any probe so no process is ever launched for a request that is wrong on
/// its face.
pub async fn validate_transcode(
    settings: &Settings,
    catalog: &EncoderCatalog,
    request: &TranscodeRequest,
) -> Result<MediaKind, ServiceError> {
    check_input_file(&request.input)?;
    check_output_free(&request.output)?;

    let kind = probe::classify(settings, &request.input).await;
    debug!("{} classified as {}", request.input.display(), kind);

    check_parameters_for_kind(&request.params, kind)?;
    check_codecs_available(&request.params, catalog)?;
    check_resolution(&request.params)?;
    Ok(kind)
}

/// Validate a merge request. The two inputs must probe to different media
/// kinds; the parameter/kind compatibility rule does not apply since both
/// stream classes are in play by construction.
pub async fn validate_merge(
    settings: &Settings,
    catalog: &EncoderCatalog,
    request: &MergeRequest,
) -> Result<(MediaKind, MediaKind), ServiceError> {
    check_input_file(&request.video_input)?;
    check_input_file(&request.audio_input)?;
    check_output_free(&request.output)?;

    let video_kind = probe::classify(settings, &request.video_input).await;
    let audio_kind = probe::classify(settings, &request.audio_input).await;
    debug!(
        "merge inputs classified as {} and {}",
        video_kind, audio_kind
    );

    check_merge_kinds(video_kind, audio_kind)?;
    check_codecs_available(&request.params, catalog)?;
    check_resolution(&request.params)?;
    Ok((video_kind, audio_kind))
}

/// The input must exist and be a regular file, not a directory
pub fn check_input_file(path: &Path) -> Result<(), ValidationError> {
    if !path.exists() {
        return Err(ValidationError::FileNotFound(path.to_path_buf()));
    }
    if !path.is_file() {
        return Err(ValidationError::NotAFile(path.to_path_buf()));
    }
    Ok(())
}

/// The output path must not already exist; nothing is ever overwritten
pub fn check_output_free(path: &Path) -> Result<(), ValidationError> {
    if path.exists() {
        return Err(ValidationError::OutputConflict(path.to_path_buf()));
    }
    Ok(())
}

/// Merge inputs must differ in media kind
pub fn check_merge_kinds(first: MediaKind, second: MediaKind) -> Result<(), ValidationError> {
    if first == second {
        return Err(ValidationError::IncompatibleMergeInputs(first));
    }
    Ok(())
}

/// Parameters that cannot apply to the file's stream composition are
/// rejected rather than silently ignored: video knobs for an audio-only
/// file, audio knobs for a video-only file.
pub fn check_parameters_for_kind(
    params: &EncodeParams,
    kind: MediaKind,
) -> Result<(), ValidationError> {
    let irrelevant = |parameter| ValidationError::IrrelevantParameter { parameter, kind };

    match kind {
        MediaKind::Audio => {
            if params.video_codec.is_some() {
                return Err(irrelevant("video_codec"));
            }
            if params.video_bitrate_kbps.is_some() {
                return Err(irrelevant("video_bitrate"));
            }
            if params.horizontal_resolution.is_some() || params.vertical_resolution.is_some() {
                return Err(irrelevant("resolution"));
            }
        }
        MediaKind::Video => {
            if params.audio_codec.is_some() {
                return Err(irrelevant("audio_codec"));
            }
            if params.audio_bitrate_kbps.is_some() {
                return Err(irrelevant("audio_bitrate"));
            }
        }
        MediaKind::Multimedia | MediaKind::Unknown => {}
    }
    Ok(())
}

/// Requested codecs must appear in the filtered catalog under the matching
/// kind, regardless of what the unfiltered tool would support.
pub fn check_codecs_available(
    params: &EncodeParams,
    catalog: &EncoderCatalog,
) -> Result<(), ValidationError> {
    if let Some(name) = &params.video_codec {
        if !catalog.contains(EncoderKind::Video, name) {
            return Err(ValidationError::UnavailableCodec {
                kind: EncoderKind::Video,
                name: name.clone(),
            });
        }
    }
    if let Some(name) = &params.audio_codec {
        if !catalog.contains(EncoderKind::Audio, name) {
            return Err(ValidationError::UnavailableCodec {
                kind: EncoderKind::Audio,
                name: name.clone(),
            });
        }
    }
    Ok(())
}

/// Resolution fields, when present, must be positive
pub fn check_resolution(params: &EncodeParams) -> Result<(), ValidationError> {
    for value in [params.horizontal_resolution, params.vertical_resolution]
        .into_iter()
        .flatten()
    {
        if value == 0 {
            return Err(ValidationError::InvalidResolution(value));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Accelerator, ServiceConfig};
    use std::path::PathBuf;

    fn test_catalog() -> EncoderCatalog {
        let lines: Vec<String> = [
            " ------",
            " V..... libx264              libx264 H.264 / AVC / MPEG-4 AVC",
            " V..... libsvtav1            SVT-AV1 encoder",
            " A....D aac                  AAC (Advanced Audio Coding)",
            " A....D libopus              libopus Opus",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        EncoderCatalog::parse(
            &lines,
            &ServiceConfig::default_config().hardware_encoders,
            Accelerator::Nvenc,
        )
        .expect("test catalog")
    }

    fn test_settings(storage: &Path) -> Settings {
        Settings {
            config: ServiceConfig {
                // A docker binary that cannot exist; validation paths under
                // test must never reach it.
                docker_bin: PathBuf::from("/nonexistent/docker"),
                ..ServiceConfig::default_config()
            },
            storage_path: storage.to_path_buf(),
            accelerator: Accelerator::Nvenc,
        }
    }

    #[test]
    fn video_parameters_rejected_for_audio_input() {
        for params in [
            EncodeParams {
                video_codec: Some("libx264".to_string()),
                ..Default::default()
            },
            EncodeParams {
                video_bitrate_kbps: Some(2000),
                ..Default::default()
            },
            EncodeParams {
                horizontal_resolution: Some(640),
                ..Default::default()
            },
            EncodeParams {
                vertical_resolution: Some(480),
                ..Default::default()
            },
        ] {
            let err = check_parameters_for_kind(&params, MediaKind::Audio)
                .expect_err("video parameter on audio input");
            assert!(matches!(
                err,
                ValidationError::IrrelevantParameter {
                    kind: MediaKind::Audio,
                    ..
                }
            ));
        }
    }

    #[test]
    fn audio_parameters_rejected_for_video_input() {
        for params in [
            EncodeParams {
                audio_codec: Some("aac".to_string()),
                ..Default::default()
            },
            EncodeParams {
                audio_bitrate_kbps: Some(128),
                ..Default::default()
            },
        ] {
            let err = check_parameters_for_kind(&params, MediaKind::Video)
                .expect_err("audio parameter on video input");
            assert!(matches!(
                err,
                ValidationError::IrrelevantParameter {
                    kind: MediaKind::Video,
                    ..
                }
            ));
        }
    }

    #[test]
    fn multimedia_accepts_any_valid_codec_pair() {
        let catalog = test_catalog();
        for video in ["libx264", "libsvtav1"] {
            for audio in ["aac", "libopus"] {
                let params = EncodeParams {
                    video_codec: Some(video.to_string()),
                    audio_codec: Some(audio.to_string()),
                    ..Default::default()
                };
                check_parameters_for_kind(&params, MediaKind::Multimedia)
                    .expect("multimedia takes both stream kinds");
                check_codecs_available(&params, &catalog).expect("codecs are in the catalog");
            }
        }
    }

    #[test]
    fn unavailable_codec_is_rejected() {
        let catalog = test_catalog();
        let params = EncodeParams {
            // Filtered out of the catalog on a non-NVENC host even though
            // the tool itself may support it.
            video_codec: Some("h264_qsv".to_string()),
            ..Default::default()
        };
        let err = check_codecs_available(&params, &catalog).expect_err("codec not in catalog");
        assert!(matches!(
            err,
            ValidationError::UnavailableCodec {
                kind: EncoderKind::Video,
                ..
            }
        ));
    }

    #[test]
    fn merge_kinds_must_differ() {
        let err = check_merge_kinds(MediaKind::Audio, MediaKind::Audio)
            .expect_err("two audio files cannot merge");
        assert!(matches!(
            err,
            ValidationError::IncompatibleMergeInputs(MediaKind::Audio)
        ));

        check_merge_kinds(MediaKind::Video, MediaKind::Audio).expect("video + audio merges");
        check_merge_kinds(MediaKind::Multimedia, MediaKind::Audio)
            .expect("multimedia + audio merges");
    }

    #[test]
    fn zero_resolution_is_invalid() {
        let params = EncodeParams {
            horizontal_resolution: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            check_resolution(&params),
            Err(ValidationError::InvalidResolution(0))
        ));

        let params = EncodeParams {
            horizontal_resolution: Some(1920),
            vertical_resolution: Some(1080),
            ..Default::default()
        };
        check_resolution(&params).expect("positive resolutions pass");
    }

    #[test]
    fn missing_input_and_directory_input_are_distinct() {
        let dir = tempfile::tempdir().expect("tempdir");

        let missing = dir.path().join("missing.mkv");
        assert!(matches!(
            check_input_file(&missing),
            Err(ValidationError::FileNotFound(_))
        ));

        assert!(matches!(
            check_input_file(dir.path()),
            Err(ValidationError::NotAFile(_))
        ));

        let file = dir.path().join("input.mkv");
        std::fs::write(&file, b"not really media").expect("write");
        check_input_file(&file).expect("regular file passes");
    }

    #[tokio::test]
    async fn output_collision_fails_before_any_probe() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("input.mkv");
        let output = dir.path().join("output.mkv");
        std::fs::write(&input, b"input").expect("write input");
        std::fs::write(&output, b"already here").expect("write output");

        let request = TranscodeRequest {
            input,
            output,
            params: EncodeParams::default(),
        };

        // The settings point at a docker binary that does not exist. If the
        // probe ran before the output check, classification would degrade to
        // Unknown and the bare request would validate, failing expect_err.
        let err = validate_transcode(&test_settings(dir.path()), &test_catalog(), &request)
            .await
            .expect_err("existing output must be rejected");
        assert!(matches!(
            err,
            ServiceError::Validation(ValidationError::OutputConflict(_))
        ));
    }
}
