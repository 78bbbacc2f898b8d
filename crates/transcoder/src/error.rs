use std::path::PathBuf;
use thiserror::Error;

use crate::encoders::EncoderKind;
use crate::probe::MediaKind;

/// Request precondition failures. All of these are client faults detected
/// before any encoder process is launched.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("input file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("input path is not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("{0} already exists and cannot be overwritten")]
    OutputConflict(PathBuf),

    #[error("both inputs are {0} files and cannot be merged")]
    IncompatibleMergeInputs(MediaKind),

    #[error("parameter '{parameter}' may not be used for {kind} input")]
    IrrelevantParameter {
        parameter: &'static str,
        kind: MediaKind,
    },

    #[error("the requested {kind} codec, {name}, is not available")]
    UnavailableCodec { kind: EncoderKind, name: String },

    #[error("resolution must be a positive integer, got {0}")]
    InvalidResolution(u32),

    #[error("path is outside the shared storage directory: {0}")]
    OutsideStorage(PathBuf),
}

/// Failures while inspecting a file with ffprobe.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("the file {0} does not contain any video stream")]
    NotAVideo(PathBuf),

    #[error("failed to launch ffprobe: {0}")]
    Launch(#[source] std::io::Error),

    #[error("ffprobe failed for {path} (exit code {exit_code}): {stderr}")]
    Failed {
        path: PathBuf,
        exit_code: i32,
        stderr: String,
    },

    #[error("ffprobe output for {path} could not be parsed: {message}")]
    Malformed { path: PathBuf, message: String },
}

/// Failures while parsing the encoder listing. The tool's output format is
/// assumed stable, so any of these is fatal at startup.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("encoder listing contains no header separator line")]
    MissingSeparator,

    #[error("malformed encoder row: {0}")]
    MalformedRow(String),

    #[error("unrecognized encoder kind tag {tag:?} in row: {row}")]
    UnknownKindTag { tag: char, row: String },
}

/// Failures while running the encoder container.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to launch encoder container: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("I/O failure while running the encoder: {0}")]
    Io(#[source] std::io::Error),

    #[error("encoder run exceeded the {0}s deadline")]
    Timeout(u64),

    #[error("encoder exited with code {code}")]
    ExitFailure { code: i32, log: Vec<String> },
}

/// Unified error surface for request handlers.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl ServiceError {
    /// Whether this error is the client's fault (a 400-class condition for
    /// the routing layer above) rather than a host-side failure.
    pub fn is_client_fault(&self) -> bool {
        match self {
            ServiceError::Validation(_) => true,
            ServiceError::Probe(err) => matches!(err, ProbeError::NotAVideo(_)),
            ServiceError::Execution(_) => false,
        }
    }
}
