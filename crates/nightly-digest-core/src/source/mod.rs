//! Record-producing adapters and the per-file time filter.
//!
//! Each input mode reads its files through the same [`RecordSource`]
//! capability; per-file problems come back as a [`FileOutcome`] value so
//! the batch keeps going.

pub mod image;
pub mod session_log;

use crate::config::{AppConfig, InputMode};
use crate::error::Error;
use crate::model::Extraction;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

pub use image::ImageSource;
pub use session_log::SessionLogSource;

#[derive(Error, Debug)]
pub enum TimestampError {
    #[error("cannot read header: {0}")]
    Unreadable(String),

    #[error("timestamp field {0} is missing")]
    Missing(&'static str),

    #[error("malformed timestamp '{0}'")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("cannot open file: {0}")]
    Open(String),

    #[error("cannot read file: {0}")]
    Read(String),

    #[error("image has no pixel data")]
    EmptyImage,

    #[error("no sources detected")]
    NoSources,

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

#[derive(Error, Debug)]
pub enum FileFailure {
    #[error("timestamp: {0}")]
    Timestamp(#[from] TimestampError),

    #[error("extraction: {0}")]
    Extraction(#[from] ExtractionError),
}

#[derive(Debug)]
pub enum FileOutcome {
    Extracted(Extraction),
    /// Valid timestamp (or modification time) older than the cutoff.
    OutOfWindow(DateTime<Utc>),
    Failed(FileFailure),
}

/// The recency window `[now - hours, now]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub now: DateTime<Utc>,
    pub cutoff: DateTime<Utc>,
}

impl TimeWindow {
    /// Fails when the cutoff falls before the earliest representable time.
    pub fn ending_at(now: DateTime<Utc>, hours: u32) -> Result<Self, Error> {
        let cutoff = Duration::try_hours(i64::from(hours))
            .and_then(|span| now.checked_sub_signed(span))
            .ok_or_else(|| {
                Error::InvalidConfig(format!("a {} hour window before {} is out of range", hours, now))
            })?;
        Ok(Self { now, cutoff })
    }

    /// Strictly older than the cutoff is outside.
    pub fn admits(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.cutoff
    }

    /// Modification time when it already proves the file is too old.
    fn stale_modification_time(&self, path: &Path) -> Option<DateTime<Utc>> {
        let modified: DateTime<Utc> = fs::metadata(path).ok()?.modified().ok()?.into();
        (!self.admits(modified)).then_some(modified)
    }
}

/// One strategy for turning input files into session records.
pub trait RecordSource {
    fn name(&self) -> &'static str;

    /// Extensions this source reads when none are configured.
    fn default_extensions(&self) -> &'static [&'static str];

    /// The designated "when was this captured" field of the file.
    fn read_timestamp(&self, path: &Path) -> Result<DateTime<Utc>, TimestampError>;

    fn extract(&self, path: &Path) -> Result<Extraction, ExtractionError>;
}

pub fn default_extensions(mode: InputMode) -> &'static [&'static str] {
    match mode {
        InputMode::SessionLog => session_log::EXTENSIONS,
        InputMode::Image => image::EXTENSIONS,
    }
}

pub fn build_source(config: &AppConfig) -> Box<dyn RecordSource> {
    match config.input_mode {
        InputMode::SessionLog => Box::new(SessionLogSource::new()),
        InputMode::Image => Box::new(ImageSource::new(config.detection_threshold)),
    }
}

/// Run one file through the time filter and the extractor.
pub fn process_file(source: &dyn RecordSource, path: &Path, window: &TimeWindow) -> FileOutcome {
    if let Some(modified) = window.stale_modification_time(path) {
        debug!(
            "Skipping {}: modification time {} < cutoff {}",
            path.display(),
            modified,
            window.cutoff
        );
        return FileOutcome::OutOfWindow(modified);
    }

    let timestamp = match source.read_timestamp(path) {
        Ok(timestamp) => timestamp,
        Err(err) => return FileOutcome::Failed(err.into()),
    };
    if !window.admits(timestamp) {
        debug!(
            "Skipping {}: timestamp {} < cutoff {}",
            path.display(),
            timestamp,
            window.cutoff
        );
        return FileOutcome::OutOfWindow(timestamp);
    }

    match source.extract(path) {
        Ok(mut extraction) => {
            extraction.retain_since(window.cutoff);
            FileOutcome::Extracted(extraction)
        }
        Err(err) => FileOutcome::Failed(err.into()),
    }
}

/// Parse an ISO-8601 style timestamp. Values without an offset are UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, TimestampError> {
    let value = raw.trim().trim_matches('\'').trim();
    if value.is_empty() {
        return Err(TimestampError::Malformed(raw.to_string()));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let naive = value.trim_end_matches('Z');
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(naive, format).ok())
        .map(|dt| dt.and_utc())
        .ok_or_else(|| TimestampError::Malformed(raw.to_string()))
}
