//! Ekos `.analyze` session logs.
//!
//! A log is a chronological stream of comma-separated event records.
//! Times are seconds relative to the `AnalyzeStartTime` record.

use super::{parse_timestamp, ExtractionError, RecordSource, TimestampError};
use crate::detection::ECCENTRICITY_CEILING;
use crate::model::{
    offset_by_seconds, AlignmentResult, AutofocusRun, CaptureStatus, Extraction, GuideSample,
    Metrics, SessionRecord, TemperatureSample,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, warn};

pub const EXTENSIONS: &[&str] = &["analyze"];

/// Guide corrections above this many arcseconds are treated as spurious.
pub const GUIDE_OUTLIER_ARCSEC: f64 = 10.0;

/// Event offsets and exposures past this many seconds are corrupt.
pub const MAX_OFFSET_SECS: f64 = 366.0 * 24.0 * 3600.0;

#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    CaptureStarting {
        t: f64,
        exposure: f64,
        filter: String,
    },
    CaptureComplete {
        t: f64,
        exposure: f64,
        filter: String,
        hfr: Option<f64>,
        stars: Option<f64>,
        eccentricity: Option<f64>,
    },
    CaptureAborted {
        t: f64,
        exposure: Option<f64>,
    },
    GuideStats {
        t: f64,
        dx: f64,
        dy: f64,
        rms: Option<f64>,
    },
    Temperature {
        t: f64,
        celsius: f64,
    },
    AutofocusComplete {
        t: f64,
        temperature: Option<f64>,
    },
    SchedulerJobStart {
        t: f64,
        name: String,
    },
    SchedulerJobEnd {
        t: f64,
    },
    AlignState {
        t: f64,
        state: String,
    },
}

impl LogEvent {
    pub fn offset(&self) -> f64 {
        match self {
            LogEvent::CaptureStarting { t, .. }
            | LogEvent::CaptureComplete { t, .. }
            | LogEvent::CaptureAborted { t, .. }
            | LogEvent::GuideStats { t, .. }
            | LogEvent::Temperature { t, .. }
            | LogEvent::AutofocusComplete { t, .. }
            | LogEvent::SchedulerJobStart { t, .. }
            | LogEvent::SchedulerJobEnd { t }
            | LogEvent::AlignState { t, .. } => *t,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionLog {
    pub start: Option<DateTime<Utc>>,
    pub kstars_version: Option<String>,
    pub events: Vec<LogEvent>,
}

pub struct SessionLogSource;

impl SessionLogSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SessionLogSource {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordSource for SessionLogSource {
    fn name(&self) -> &'static str {
        "session-log"
    }

    fn default_extensions(&self) -> &'static [&'static str] {
        EXTENSIONS
    }

    fn read_timestamp(&self, path: &Path) -> Result<DateTime<Utc>, TimestampError> {
        let file = File::open(path).map_err(|e| TimestampError::Unreadable(e.to_string()))?;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| TimestampError::Unreadable(e.to_string()))?;
            if let Some(raw) = start_time_field(&line) {
                return parse_timestamp(raw);
            }
        }
        timestamp_from_file_name(path).ok_or(TimestampError::Missing("AnalyzeStartTime"))
    }

    fn extract(&self, path: &Path) -> Result<Extraction, ExtractionError> {
        let file = File::open(path).map_err(|e| ExtractionError::Open(e.to_string()))?;
        let log = parse_session_log(BufReader::new(file))?;
        let start = log
            .start
            .or_else(|| timestamp_from_file_name(path))
            .ok_or_else(|| ExtractionError::Parse {
                line: 0,
                reason: "no AnalyzeStartTime record".to_string(),
            })?;
        if let Some(version) = &log.kstars_version {
            debug!("{} written by KStars {}", path.display(), version);
        }
        log.into_extraction(start)
    }
}

fn start_time_field(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix("AnalyzeStartTime,")
        .map(|rest| rest.split(',').next().unwrap_or(rest))
}

/// `ekos-2026-10-16T21-04-55.analyze`
pub fn timestamp_from_file_name(path: &Path) -> Option<DateTime<Utc>> {
    let stem = path.file_stem()?.to_str()?;
    let raw = stem.strip_prefix("ekos-")?;
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H-%M-%S")
        .ok()
        .map(|dt| dt.and_utc())
}

/// Parse the event stream. Unknown record kinds, short records and events
/// stamped before `AnalyzeStartTime` are skipped. A malformed or
/// out-of-range number in a known record fails the whole log.
pub fn parse_session_log<R: BufRead>(reader: R) -> Result<SessionLog, ExtractionError> {
    let mut log = SessionLog::default();

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|e| ExtractionError::Parse {
            line: line_no,
            reason: e.to_string(),
        })?;
        let line = line.trim();

        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            if let Some(rest) = comment.strip_prefix("KStars version ") {
                log.kstars_version = rest
                    .split(|c: char| !(c.is_ascii_digit() || c == '.'))
                    .next()
                    .map(|v| v.trim_end_matches('.').to_string());
            }
            continue;
        }

        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 2 {
            continue;
        }

        if parts[0] == "AnalyzeStartTime" {
            log.start = Some(parse_timestamp(parts[1]).map_err(|e| ExtractionError::Parse {
                line: line_no,
                reason: e.to_string(),
            })?);
            continue;
        }

        match parse_event(&parts, line_no)? {
            Some(event) if event.offset() < 0.0 => {
                debug!("line {}: {} precedes the session start, skipping", line_no, parts[0]);
            }
            Some(event) => log.events.push(event),
            None => {}
        }
    }

    Ok(log)
}

fn parse_event(parts: &[&str], line: usize) -> Result<Option<LogEvent>, ExtractionError> {
    let number = |idx: usize| -> Result<f64, ExtractionError> {
        parts[idx]
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ExtractionError::Parse {
                line,
                reason: format!("{}: field {} is not a number: '{}'", parts[0], idx, parts[idx]),
            })
    };
    // Offsets and exposures, in seconds.
    let seconds = |idx: usize| -> Result<f64, ExtractionError> {
        let value = number(idx)?;
        if value.abs() > MAX_OFFSET_SECS {
            return Err(ExtractionError::Parse {
                line,
                reason: format!("{}: field {} out of range: {}", parts[0], idx, value),
            });
        }
        Ok(value)
    };
    // Ekos writes -1 for "not measured".
    let measured = |idx: usize| -> Result<Option<f64>, ExtractionError> {
        match parts.get(idx) {
            None => Ok(None),
            Some(raw) if raw.is_empty() => Ok(None),
            Some(_) => number(idx).map(|v| (v >= 0.0).then_some(v)),
        }
    };

    let event = match (parts[0], parts.len()) {
        ("CaptureStarting", n) if n >= 4 => LogEvent::CaptureStarting {
            t: seconds(1)?,
            exposure: seconds(2)?,
            filter: parts[3].to_string(),
        },
        ("CaptureComplete", n) if n >= 5 => LogEvent::CaptureComplete {
            t: seconds(1)?,
            exposure: seconds(2)?,
            filter: parts[3].to_string(),
            hfr: measured(4)?,
            stars: measured(6)?,
            eccentricity: measured(8)?,
        },
        ("CaptureAborted", _) => LogEvent::CaptureAborted {
            t: seconds(1)?,
            exposure: match measured(2)? {
                Some(_) => Some(seconds(2)?),
                None => None,
            },
        },
        ("GuideStats", n) if n >= 7 => LogEvent::GuideStats {
            t: seconds(1)?,
            dx: number(2)?,
            dy: number(3)?,
            rms: measured(7)?.filter(|rms| *rms > 0.0),
        },
        ("Temperature", n) if n >= 3 => LogEvent::Temperature {
            t: seconds(1)?,
            celsius: number(2)?,
        },
        ("AutofocusComplete", n) if n >= 3 => {
            let temperature = number(2)?;
            LogEvent::AutofocusComplete {
                t: seconds(1)?,
                // Ekos writes a large negative sentinel when no sensor is attached.
                temperature: (temperature > -999.0).then_some(temperature),
            }
        }
        ("SchedulerJobStart", n) if n >= 3 => LogEvent::SchedulerJobStart {
            t: seconds(1)?,
            name: parts[2].to_string(),
        },
        ("SchedulerJobEnd", _) => LogEvent::SchedulerJobEnd { t: seconds(1)? },
        ("AlignState", n) if n >= 3 => LogEvent::AlignState {
            t: seconds(1)?,
            state: parts[2].to_string(),
        },
        _ => return Ok(None),
    };
    Ok(Some(event))
}

struct PendingCapture {
    t: f64,
    filter: String,
    target: Option<String>,
}

struct CaptureSpan {
    start: f64,
    end: f64,
    filter: String,
    target: Option<String>,
    status: CaptureStatus,
    exposure: Option<f64>,
    hfr: Option<f64>,
    stars: Option<f64>,
    eccentricity: Option<f64>,
}

impl SessionLog {
    /// Turn the event stream into session records and time series,
    /// anchored at `start`. Fails when an offset lands outside the
    /// representable calendar.
    pub fn into_extraction(self, start: DateTime<Utc>) -> Result<Extraction, ExtractionError> {
        let at = |t: f64| {
            offset_by_seconds(start, t).ok_or_else(|| ExtractionError::Parse {
                line: 0,
                reason: format!("offset {}s from {} is out of range", t, start),
            })
        };
        let fallback_target = self
            .events
            .iter()
            .rev()
            .find_map(|event| match event {
                LogEvent::SchedulerJobStart { name, .. } => Some(name.clone()),
                _ => None,
            })
            .unwrap_or_else(|| format!("Session_{}", start.format("%Y-%m-%d")));

        let mut extraction = Extraction::default();
        let mut guide: Vec<(f64, f64)> = Vec::new();
        let mut temperatures: Vec<(f64, f64)> = Vec::new();
        let mut spans: Vec<CaptureSpan> = Vec::new();
        let mut current_job: Option<String> = None;
        let mut pending: Option<PendingCapture> = None;

        for event in self.events {
            match event {
                LogEvent::SchedulerJobStart { name, .. } => current_job = Some(name),
                LogEvent::SchedulerJobEnd { .. } => current_job = None,
                LogEvent::CaptureStarting { t, filter, .. } => {
                    pending = Some(PendingCapture {
                        t,
                        filter,
                        target: current_job.clone(),
                    });
                }
                LogEvent::CaptureComplete {
                    t,
                    exposure,
                    filter,
                    hfr,
                    stars,
                    eccentricity,
                } => {
                    let (begin, target) = match pending.take() {
                        Some(p) => (p.t, p.target),
                        None => ((t - exposure).max(0.0), current_job.clone()),
                    };
                    spans.push(CaptureSpan {
                        start: begin,
                        end: t,
                        filter,
                        target,
                        status: CaptureStatus::Completed,
                        exposure: Some(exposure),
                        hfr,
                        stars,
                        eccentricity,
                    });
                }
                LogEvent::CaptureAborted { t, exposure } => {
                    // Exposure of an aborted capture is the time it ran before the abort.
                    let (begin, filter, target, exposure) = match pending.take() {
                        Some(p) => (p.t, p.filter, p.target, Some((t - p.t).max(0.0))),
                        None => (t, "Unknown".to_string(), current_job.clone(), exposure),
                    };
                    spans.push(CaptureSpan {
                        start: begin,
                        end: t,
                        filter,
                        target,
                        status: CaptureStatus::Aborted,
                        exposure,
                        hfr: None,
                        stars: None,
                        eccentricity: None,
                    });
                }
                LogEvent::GuideStats { t, dx, dy, rms } => {
                    extraction.guide_samples.push(GuideSample {
                        time: at(t)?,
                        dx,
                        dy,
                        rms,
                    });
                    guide.push((t, (dx * dx + dy * dy).sqrt()));
                }
                LogEvent::Temperature { t, celsius } => {
                    extraction.temperature_samples.push(TemperatureSample {
                        time: at(t)?,
                        celsius,
                    });
                    temperatures.push((t, celsius));
                }
                LogEvent::AutofocusComplete { t, temperature } => {
                    extraction.autofocus_runs.push(AutofocusRun {
                        time: at(t)?,
                        temperature,
                    });
                }
                LogEvent::AlignState { t, state } => {
                    // Only verdicts count as attempts; progress states are dropped.
                    let succeeded = match state.as_str() {
                        "Successful" => true,
                        "Failed" => false,
                        _ => continue,
                    };
                    extraction.alignments.push(AlignmentResult {
                        time: at(t)?,
                        succeeded,
                    });
                }
            }
        }

        for span in spans {
            let mut metrics = Metrics {
                exposure: span.exposure,
                ..Metrics::default()
            };
            if span.status == CaptureStatus::Completed {
                metrics.hfr = span.hfr;
                metrics.star_count = span.stars;
                metrics.eccentricity = span.eccentricity.map(|e| {
                    if e >= 1.0 {
                        warn!("Eccentricity {:.3} outside [0, 1), clamping", e);
                        extraction.clamped_frames += 1;
                        ECCENTRICITY_CEILING
                    } else {
                        e
                    }
                });
                metrics.guiding_error = mean_guide_error(&guide, span.start, span.end);
                metrics.temperature = temperatures
                    .iter()
                    .rev()
                    .find(|(t, _)| *t <= span.end)
                    .map(|(_, celsius)| *celsius);
            }

            extraction.records.push(SessionRecord {
                target: span.target.unwrap_or_else(|| fallback_target.clone()),
                filter: span.filter,
                timestamp: at(span.start)?,
                status: span.status,
                metrics,
            });
        }

        Ok(extraction)
    }
}

fn mean_guide_error(samples: &[(f64, f64)], start: f64, end: f64) -> Option<f64> {
    let inside: Vec<f64> = samples
        .iter()
        .filter(|(t, d)| *t >= start && *t <= end && *d <= GUIDE_OUTLIER_ARCSEC)
        .map(|(_, d)| *d)
        .collect();
    if inside.is_empty() {
        None
    } else {
        Some(inside.iter().sum::<f64>() / inside.len() as f64)
    }
}
