pub mod command;
pub mod config;
pub mod encoders;
pub mod error;
pub mod harness;
pub mod probe;
pub mod service;
pub mod storage;
pub mod validate;

pub use command::{EncodeParams, MergeRequest, TranscodeRequest};
pub use config::{Accelerator, ServiceConfig, Settings};
pub use encoders::{EncoderCatalog, EncoderDescriptor, EncoderKind};
pub use error::{CatalogError, ExecutionError, ProbeError, ServiceError, ValidationError};
pub use harness::RunResult;
pub use probe::{MediaKind, Resolution, TrackBitrates, TrackCodecs};
pub use service::Service;
