use std::fmt;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::{Accelerator, Settings};
use crate::error::CatalogError;
use crate::harness;

/// Class of streams an encoder produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    Video,
    Audio,
    Subtitle,
}

impl fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EncoderKind::Video => "video",
            EncoderKind::Audio => "audio",
            EncoderKind::Subtitle => "subtitle",
        };
        f.pad(name)
    }
}

/// One row of the encoder listing, parsed into a capability record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncoderDescriptor {
    pub name: String,
    pub description: String,
    pub kind: EncoderKind,
    pub frame_threading: bool,
    pub slice_threading: bool,
    pub experimental: bool,
    pub draw_horiz_band: bool,
    pub direct_rendering: bool,
}

/// The encoders this host can actually run: the tool's self-reported
/// listing minus hardware variants for accelerators other than the one
/// configured. Populated once during startup and read-only afterwards;
/// a configuration change requires a restart.
#[derive(Debug, Clone, Serialize)]
pub struct EncoderCatalog {
    encoders: Vec<EncoderDescriptor>,
}

impl EncoderCatalog {
    /// Run the tool's encoder listing through the execution harness and
    /// parse it. Any parse failure is fatal: a format change in the listing
    /// should fail loudly at startup, not silently misclassify.
    pub async fn discover(settings: &Settings) -> Result<Self> {
        let args = vec!["-hide_banner".to_string(), "-encoders".to_string()];
        let run = harness::run_encoder(settings, &args)
            .await
            .context("Failed to run the encoder listing")?;

        let catalog = Self::parse(
            &run.lines,
            &settings.config.hardware_encoders,
            settings.accelerator,
        )
        .context("Failed to parse the encoder listing")?;

        info!(
            "Encoder catalog ready: {} encoders usable with {}",
            catalog.len(),
            settings.accelerator
        );
        Ok(catalog)
    }

    /// Parse the tabular listing. Everything after the dash-run separator
    /// line is an encoder row: a fixed-width property string, the encoder
    /// name, then the description.
    pub fn parse(
        lines: &[String],
        recognized_accelerators: &[String],
        selected: Accelerator,
    ) -> Result<Self, CatalogError> {
        let separator = lines
            .iter()
            .position(|line| {
                let trimmed = line.trim();
                !trimmed.is_empty() && trimmed.chars().all(|c| c == '-')
            })
            .ok_or(CatalogError::MissingSeparator)?;

        let mut encoders = Vec::new();
        for row in &lines[separator + 1..] {
            if row.trim().is_empty() {
                continue;
            }
            if let Some(descriptor) = parse_row(row)? {
                if retained(&descriptor.name, recognized_accelerators, selected) {
                    encoders.push(descriptor);
                } else {
                    debug!("dropping encoder {} (foreign accelerator)", descriptor.name);
                }
            }
        }

        Ok(Self { encoders })
    }

    pub fn encoders(&self) -> &[EncoderDescriptor] {
        &self.encoders
    }

    pub fn len(&self) -> usize {
        self.encoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoders.is_empty()
    }

    /// Whether an encoder with this name exists among entries of this kind
    pub fn contains(&self, kind: EncoderKind, name: &str) -> bool {
        self.encoders
            .iter()
            .any(|e| e.kind == kind && e.name == name)
    }

    pub fn of_kind(&self, kind: EncoderKind) -> impl Iterator<Item = &EncoderDescriptor> {
        self.encoders.iter().filter(move |e| e.kind == kind)
    }
}

/// Parse one encoder row. Returns Ok(None) for rows that carry no encoder
/// (defensive; the listing does not normally produce them).
fn parse_row(row: &str) -> Result<Option<EncoderDescriptor>, CatalogError> {
    let mut tokens = row.split_whitespace();
    let Some(flags) = tokens.next() else {
        return Ok(None);
    };
    let name = tokens
        .next()
        .ok_or_else(|| CatalogError::MalformedRow(row.trim().to_string()))?;
    let description = tokens.collect::<Vec<_>>().join(" ");

    let flag_at = |index: usize, marker: char| flags.chars().nth(index) == Some(marker);

    let kind = match flags.chars().next() {
        Some('V') => EncoderKind::Video,
        Some('A') => EncoderKind::Audio,
        Some('S') => EncoderKind::Subtitle,
        other => {
            return Err(CatalogError::UnknownKindTag {
                tag: other.unwrap_or(' '),
                row: row.trim().to_string(),
            })
        }
    };

    Ok(Some(EncoderDescriptor {
        name: name.to_string(),
        description,
        kind,
        frame_threading: flag_at(1, 'F'),
        slice_threading: flag_at(2, 'S'),
        experimental: flag_at(3, 'X'),
        draw_horiz_band: flag_at(4, 'B'),
        direct_rendering: flag_at(5, 'D'),
    }))
}

/// A row survives filtering unless its name contains a recognized
/// accelerator tag other than the selected one. This keeps the catalog from
/// offering codecs the host cannot actually run.
fn retained(name: &str, recognized_accelerators: &[String], selected: Accelerator) -> bool {
    !recognized_accelerators
        .iter()
        .any(|tag| tag != selected.tag() && name.contains(tag.as_str()))
}
