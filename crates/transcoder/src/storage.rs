use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::ValidationError;

/// Mount target of the shared storage directory inside the encoder container
pub const CONTAINER_STORAGE_ROOT: &str = "/storage";

/// Collision-free name for a staged input file
pub fn staged_input_name(extension: &str) -> String {
    format!("{}-input.{}", Uuid::new_v4().simple(), extension)
}

/// Collision-free name for a staged output file
pub fn staged_output_name(extension: &str) -> String {
    format!("{}.{}", Uuid::new_v4().simple(), extension)
}

/// Rebase a host path under the storage root to its in-container path
pub fn container_path(storage_root: &Path, path: &Path) -> Result<String, ValidationError> {
    let relative = path
        .strip_prefix(storage_root)
        .map_err(|_| ValidationError::OutsideStorage(path.to_path_buf()))?;
    Ok(format!("{}/{}", CONTAINER_STORAGE_ROOT, relative.display()))
}

/// A staged file that is deleted when the guard drops, unless the caller
/// keeps it. This holds on every exit path: success, validation failure,
/// and encoder failure alike.
#[derive(Debug)]
pub struct ScopedFile {
    path: PathBuf,
    armed: bool,
}

impl ScopedFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Disarm the guard and hand the path to the caller
    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        self.path.clone()
    }
}

impl Drop for ScopedFile {
    fn drop(&mut self) {
        if self.armed && self.path.exists() {
            match fs::remove_file(&self.path) {
                Ok(()) => debug!("removed staged file: {}", self.path.display()),
                Err(e) => warn!(
                    "failed to remove staged file {}: {}",
                    self.path.display(),
                    e
                ),
            }
        }
    }
}

/// Whether a file name matches the staged naming scheme
fn is_staged_name(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or("");
    let id = stem.strip_suffix("-input").unwrap_or(stem);
    id.len() == 32 && id.chars().all(|c| c.is_ascii_hexdigit())
}

/// Delete staged files left behind by an earlier crash. Only files matching
/// the staged naming scheme and older than the cutoff are touched; anything
/// else in the storage directory is left alone. Returns the number of files
/// removed.
pub fn sweep_orphans(storage_root: &Path, older_than: Duration) -> Result<usize> {
    if !storage_root.exists() {
        warn!(
            "storage directory does not exist: {}",
            storage_root.display()
        );
        return Ok(0);
    }

    let cutoff = SystemTime::now()
        .checked_sub(older_than)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = 0;

    for entry in WalkDir::new(storage_root)
        .max_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !is_staged_name(name) {
            continue;
        }

        let modified = fs::metadata(path)
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to stat staged file: {}", path.display()))?;
        if modified > cutoff {
            continue;
        }

        fs::remove_file(path)
            .with_context(|| format!("Failed to delete orphaned file: {}", path.display()))?;
        info!("🗑️  Deleted orphaned staged file: {}", path.display());
        removed += 1;
    }

    Ok(removed)
}
