use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// `secs` as a millisecond-precision span. `None` when the value is not
/// finite or does not fit a [`Duration`].
pub fn seconds_span(secs: f64) -> Option<Duration> {
    let millis = (secs * 1000.0).round();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return None;
    }
    Duration::try_milliseconds(millis as i64)
}

/// `start` shifted by `secs` seconds, when representable.
pub fn offset_by_seconds(start: DateTime<Utc>, secs: f64) -> Option<DateTime<Utc>> {
    start.checked_add_signed(seconds_span(secs)?)
}

/// Bucket key for aggregation. Equality is an exact string match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub target: String,
    pub filter: String,
}

impl GroupKey {
    pub fn new(target: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            filter: filter.into(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.target, self.filter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Completed,
    /// Terminated before completion; counted as an issue, never averaged.
    Aborted,
}

/// Scalar quality metrics tracked per capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    StarCount,
    Hfr,
    Eccentricity,
    GuidingError,
    Temperature,
    Exposure,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::StarCount,
        Metric::Hfr,
        Metric::Eccentricity,
        Metric::GuidingError,
        Metric::Temperature,
        Metric::Exposure,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Metric::StarCount => "Stars",
            Metric::Hfr => "HFR",
            Metric::Eccentricity => "Eccentricity",
            Metric::GuidingError => "Guiding",
            Metric::Temperature => "Temperature",
            Metric::Exposure => "Exposure",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Metrics {
    pub star_count: Option<f64>,
    pub hfr: Option<f64>,
    pub eccentricity: Option<f64>,
    /// Mean guide error during the exposure, arcseconds.
    pub guiding_error: Option<f64>,
    /// Celsius.
    pub temperature: Option<f64>,
    /// Seconds.
    pub exposure: Option<f64>,
}

impl Metrics {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::StarCount => self.star_count,
            Metric::Hfr => self.hfr,
            Metric::Eccentricity => self.eccentricity,
            Metric::GuidingError => self.guiding_error,
            Metric::Temperature => self.temperature,
            Metric::Exposure => self.exposure,
        }
    }
}

/// One processed capture: a FITS frame, or one capture event from a
/// session log.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub target: String,
    pub filter: String,
    /// Exposure start.
    pub timestamp: DateTime<Utc>,
    pub status: CaptureStatus,
    pub metrics: Metrics,
}

impl SessionRecord {
    pub fn key(&self) -> GroupKey {
        GroupKey::new(self.target.clone(), self.filter.clone())
    }

    pub fn is_completed(&self) -> bool {
        self.status == CaptureStatus::Completed
    }

    /// Exposure start plus exposure length, when known and representable.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.metrics
            .exposure
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| offset_by_seconds(self.timestamp, secs))
            .unwrap_or(self.timestamp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuideSample {
    pub time: DateTime<Utc>,
    /// RA error, arcseconds.
    pub dx: f64,
    /// DEC error, arcseconds.
    pub dy: f64,
    pub rms: Option<f64>,
}

impl GuideSample {
    pub fn distance(&self) -> f64 {
        (self.dx * self.dx + self.dy * self.dy).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureSample {
    pub time: DateTime<Utc>,
    pub celsius: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutofocusRun {
    pub time: DateTime<Utc>,
    pub temperature: Option<f64>,
}

/// A plate-solve attempt that reached a verdict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentResult {
    pub time: DateTime<Utc>,
    pub succeeded: bool,
}

/// Everything one input file contributes to the run.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub records: Vec<SessionRecord>,
    pub guide_samples: Vec<GuideSample>,
    pub temperature_samples: Vec<TemperatureSample>,
    pub autofocus_runs: Vec<AutofocusRun>,
    pub alignments: Vec<AlignmentResult>,
    /// Frames whose eccentricity needed clamping into [0, 1).
    pub clamped_frames: usize,
}

impl Extraction {
    /// Drop everything that happened before `cutoff`. A file is admitted on
    /// its own timestamp, so this only trims sources whose samples can
    /// predate it, such as a log that spans several nights.
    pub fn retain_since(&mut self, cutoff: DateTime<Utc>) {
        self.records.retain(|r| r.timestamp >= cutoff);
        self.guide_samples.retain(|s| s.time >= cutoff);
        self.temperature_samples.retain(|s| s.time >= cutoff);
        self.autofocus_runs.retain(|a| a.time >= cutoff);
        self.alignments.retain(|a| a.time >= cutoff);
    }

    pub fn merge(&mut self, other: Extraction) {
        self.records.extend(other.records);
        self.guide_samples.extend(other.guide_samples);
        self.temperature_samples.extend(other.temperature_samples);
        self.autofocus_runs.extend(other.autofocus_runs);
        self.alignments.extend(other.alignments);
        self.clamped_frames += other.clamped_frames;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 21, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn record(minute: i64, exposure: Option<f64>) -> SessionRecord {
        SessionRecord {
            target: "M31".into(),
            filter: "L".into(),
            timestamp: at(minute),
            status: CaptureStatus::Completed,
            metrics: Metrics {
                exposure,
                ..Metrics::default()
            },
        }
    }

    #[test]
    fn test_retain_since_drops_everything_before_cutoff() {
        let mut extraction = Extraction {
            records: vec![record(0, Some(60.0)), record(30, Some(60.0))],
            guide_samples: vec![
                GuideSample {
                    time: at(5),
                    dx: 0.1,
                    dy: 0.1,
                    rms: None,
                },
                GuideSample {
                    time: at(35),
                    dx: 0.2,
                    dy: 0.2,
                    rms: None,
                },
            ],
            temperature_samples: vec![TemperatureSample {
                time: at(1),
                celsius: 8.0,
            }],
            autofocus_runs: vec![AutofocusRun {
                time: at(30),
                temperature: Some(7.5),
            }],
            alignments: vec![
                AlignmentResult {
                    time: at(2),
                    succeeded: false,
                },
                AlignmentResult {
                    time: at(31),
                    succeeded: true,
                },
            ],
            clamped_frames: 1,
        };

        extraction.retain_since(at(30));

        assert_eq!(extraction.records.len(), 1);
        assert_eq!(extraction.records[0].timestamp, at(30));
        assert_eq!(extraction.guide_samples.len(), 1);
        assert!(extraction.temperature_samples.is_empty());
        // the boundary itself is inside
        assert_eq!(extraction.autofocus_runs.len(), 1);
        assert_eq!(extraction.alignments.len(), 1);
        assert!(extraction.alignments[0].succeeded);
        assert_eq!(extraction.clamped_frames, 1);
    }

    #[test]
    fn test_end_time_adds_exposure() {
        assert_eq!(record(0, Some(90.5)).end_time(), at(0) + Duration::milliseconds(90_500));
        assert_eq!(record(0, None).end_time(), at(0));
        assert_eq!(record(0, Some(-5.0)).end_time(), at(0));
    }

    #[test]
    fn test_end_time_survives_unrepresentable_exposure() {
        assert_eq!(record(0, Some(1e300)).end_time(), at(0));
        assert_eq!(record(0, Some(f64::INFINITY)).end_time(), at(0));
        assert_eq!(record(0, Some(1e13)).end_time(), at(0));
    }

    #[test]
    fn test_offset_by_seconds() {
        assert_eq!(offset_by_seconds(at(0), 60.0), Some(at(1)));
        assert_eq!(offset_by_seconds(at(0), f64::NAN), None);
        assert_eq!(offset_by_seconds(DateTime::<Utc>::MAX_UTC, 1.0), None);
        assert!(seconds_span(1e13).is_some());
        assert_eq!(seconds_span(1e17), None);
    }
}
