//! Run-wide derived values: totals, conditions, guiding and focus.

use super::aggregate::MetricStats;
use crate::model::{Extraction, Metrics, SessionRecord};
use crate::source::session_log::GUIDE_OUTLIER_ARCSEC;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use std::fmt;

/// Autofocus temperatures at or below this are "not measured".
const TEMPERATURE_SENTINEL: f64 = -999.0;

/// Least-squares HFR slope needs more than this many captures.
const TREND_MIN_POINTS: usize = 3;

/// Efficiency ratios divide by at least this much wall time, seconds.
const MIN_SESSION_SECS: f64 = 360.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuideQuality {
    Excellent,
    Good,
    Average,
    Poor,
    Unknown,
}

impl GuideQuality {
    pub fn from_mean_error(arcsec: Option<f64>) -> Self {
        match arcsec {
            None => GuideQuality::Unknown,
            Some(e) if e < 1.0 => GuideQuality::Excellent,
            Some(e) if e < 2.0 => GuideQuality::Good,
            Some(e) if e < 3.0 => GuideQuality::Average,
            Some(_) => GuideQuality::Poor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureStability {
    Stable,
    Moderate,
    Variable,
}

impl TemperatureStability {
    pub fn from_range(range: f64) -> Self {
        if range > 5.0 {
            TemperatureStability::Variable
        } else if range > 2.0 {
            TemperatureStability::Moderate
        } else {
            TemperatureStability::Stable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seeing {
    Excellent,
    Good,
    Average,
    Poor,
}

impl Seeing {
    pub fn from_mean_hfr(hfr: f64) -> Self {
        if hfr < 2.0 {
            Seeing::Excellent
        } else if hfr < 3.0 {
            Seeing::Good
        } else if hfr < 4.0 {
            Seeing::Average
        } else {
            Seeing::Poor
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusStability {
    Excellent,
    Good,
    FrequentAdjustments,
}

impl FocusStability {
    pub fn from_runs(runs: usize) -> Self {
        match runs {
            0..=2 => FocusStability::Excellent,
            3..=5 => FocusStability::Good,
            _ => FocusStability::FrequentAdjustments,
        }
    }
}

macro_rules! label_display {
    ($ty:ty { $($variant:ident => $text:expr),+ $(,)? }) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(match self {
                    $(Self::$variant => $text),+
                })
            }
        }
    };
}

label_display!(GuideQuality {
    Excellent => "Excellent",
    Good => "Good",
    Average => "Average",
    Poor => "Poor",
    Unknown => "Unknown",
});
label_display!(TemperatureStability {
    Stable => "Stable",
    Moderate => "Moderate",
    Variable => "Variable",
});
label_display!(Seeing {
    Excellent => "Excellent",
    Good => "Good",
    Average => "Average",
    Poor => "Poor",
});
label_display!(FocusStability {
    Excellent => "Excellent",
    Good => "Good",
    FrequentAdjustments => "Frequent adjustments",
});

/// Guide error over the whole run, after dropping samples beyond the
/// outlier cut.
#[derive(Debug, Clone, PartialEq)]
pub struct GuidingSummary {
    pub samples: usize,
    pub mean_error: Option<f64>,
    pub max_error: Option<f64>,
    pub mean_ra: Option<f64>,
    pub mean_dec: Option<f64>,
    pub mean_rms: Option<f64>,
    pub quality: GuideQuality,
}

impl GuidingSummary {
    fn from_extraction(extraction: &Extraction) -> Self {
        let kept: Vec<_> = extraction
            .guide_samples
            .iter()
            .filter(|s| s.distance() <= GUIDE_OUTLIER_ARCSEC)
            .collect();
        let distances: Vec<f64> = kept.iter().map(|s| s.distance()).collect();
        let ra: Vec<f64> = kept.iter().map(|s| s.dx.abs()).collect();
        let dec: Vec<f64> = kept.iter().map(|s| s.dy.abs()).collect();
        let rms: Vec<f64> = kept.iter().filter_map(|s| s.rms).collect();

        let stats = MetricStats::from_values(&distances);
        let mean_error = stats.map(|s| s.mean);
        GuidingSummary {
            samples: kept.len(),
            mean_error,
            max_error: stats.map(|s| s.max),
            mean_ra: mean(&ra),
            mean_dec: mean(&dec),
            mean_rms: mean(&rms),
            quality: GuideQuality::from_mean_error(mean_error),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutofocusSummary {
    pub runs: usize,
    pub mean_temperature: Option<f64>,
}

impl AutofocusSummary {
    pub fn stability(&self) -> FocusStability {
        FocusStability::from_runs(self.runs)
    }
}

/// Plate-solve verdicts over the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlignmentSummary {
    pub attempts: usize,
    pub successes: usize,
}

impl AlignmentSummary {
    pub fn success_rate(&self) -> Option<f64> {
        (self.attempts > 0).then(|| self.successes as f64 / self.attempts as f64)
    }
}

/// Shutter-open time against session wall time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionEfficiency {
    pub session_secs: f64,
    /// Summed exposure of completed captures.
    pub imaging_secs: f64,
    pub frames: usize,
}

impl SessionEfficiency {
    pub fn imaging_ratio(&self) -> f64 {
        self.imaging_secs / self.session_secs.max(MIN_SESSION_SECS)
    }

    pub fn downtime_secs(&self) -> f64 {
        (self.session_secs - self.imaging_secs).max(0.0)
    }

    pub fn downtime_percent(&self) -> f64 {
        self.downtime_secs() / self.session_secs.max(MIN_SESSION_SECS) * 100.0
    }

    /// Wall time per completed frame.
    pub fn secs_per_frame(&self) -> f64 {
        self.session_secs / self.frames.max(1) as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub completed: usize,
    pub aborted: usize,
    /// Earliest exposure start.
    pub start: Option<DateTime<Utc>>,
    /// Latest exposure end.
    pub end: Option<DateTime<Utc>>,
    pub temperature: Option<MetricStats>,
    pub guiding: GuidingSummary,
    pub autofocus: AutofocusSummary,
    /// Sorted, distinct.
    pub targets: Vec<String>,
    /// Sorted, distinct.
    pub filters: Vec<String>,
    pub total_stars: f64,
    pub mean_hfr: Option<f64>,
    /// HFR weighted by each capture's star count.
    pub weighted_hfr: Option<f64>,
    /// Eccentricity weighted the same way.
    pub weighted_eccentricity: Option<f64>,
    /// Pixels per capture, completed captures in time order.
    pub hfr_trend: Option<f64>,
    /// `1 - std/mean` of per-capture star counts.
    pub star_consistency: Option<f64>,
    pub alignment: AlignmentSummary,
    /// `None` without a session span or completed exposures.
    pub efficiency: Option<SessionEfficiency>,
}

impl SessionSummary {
    /// Summarize everything that survived the time window. Record order
    /// does not matter.
    pub fn from_extraction(extraction: &Extraction) -> Self {
        let records = &extraction.records;
        let mut completed: Vec<&SessionRecord> =
            records.iter().filter(|r| r.is_completed()).collect();
        completed.sort_by_key(|r| r.timestamp);

        let start = records.iter().map(|r| r.timestamp).min();
        let end = records.iter().map(|r| r.end_time()).max();

        let temperature = {
            let sampled: Vec<f64> = extraction
                .temperature_samples
                .iter()
                .map(|s| s.celsius)
                .collect();
            if sampled.is_empty() {
                let from_records: Vec<f64> =
                    completed.iter().filter_map(|r| r.metrics.temperature).collect();
                MetricStats::from_values(&from_records)
            } else {
                MetricStats::from_values(&sampled)
            }
        };

        let focus_temperatures: Vec<f64> = extraction
            .autofocus_runs
            .iter()
            .filter_map(|a| a.temperature)
            .filter(|t| *t > TEMPERATURE_SENTINEL)
            .collect();

        let targets: BTreeSet<&str> = records.iter().map(|r| r.target.as_str()).collect();
        let filters: BTreeSet<&str> = records.iter().map(|r| r.filter.as_str()).collect();

        let hfrs: Vec<f64> = completed.iter().filter_map(|r| r.metrics.hfr).collect();
        let stars: Vec<f64> = completed
            .iter()
            .filter_map(|r| r.metrics.star_count)
            .collect();

        let exposures: Vec<f64> = completed.iter().filter_map(|r| r.metrics.exposure).collect();
        let efficiency = match (start, end) {
            (Some(start), Some(end)) if end > start && !exposures.is_empty() => {
                Some(SessionEfficiency {
                    session_secs: (end - start).num_milliseconds() as f64 / 1000.0,
                    imaging_secs: exposures.iter().sum(),
                    frames: completed.len(),
                })
            }
            _ => None,
        };

        let successes = extraction.alignments.iter().filter(|a| a.succeeded).count();

        SessionSummary {
            completed: completed.len(),
            aborted: records.len() - completed.len(),
            start,
            end,
            temperature,
            guiding: GuidingSummary::from_extraction(extraction),
            autofocus: AutofocusSummary {
                runs: extraction.autofocus_runs.len(),
                mean_temperature: mean(&focus_temperatures),
            },
            targets: targets.into_iter().map(String::from).collect(),
            filters: filters.into_iter().map(String::from).collect(),
            total_stars: stars.iter().sum(),
            mean_hfr: mean(&hfrs),
            weighted_hfr: star_weighted(&completed, |m| m.hfr),
            weighted_eccentricity: star_weighted(&completed, |m| m.eccentricity),
            hfr_trend: slope(&hfrs),
            star_consistency: MetricStats::from_values(&stars)
                .map(|s| 1.0 - s.std_dev / s.mean.max(1.0)),
            alignment: AlignmentSummary {
                attempts: extraction.alignments.len(),
                successes,
            },
            efficiency,
        }
    }

    pub fn total_captures(&self) -> usize {
        self.completed + self.aborted
    }

    pub fn is_empty(&self) -> bool {
        self.total_captures() == 0
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }

    /// Completed over all captures; `None` when nothing was captured.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.total_captures();
        (total > 0).then(|| self.completed as f64 / total as f64)
    }

    pub fn temperature_stability(&self) -> Option<TemperatureStability> {
        self.temperature
            .map(|t| TemperatureStability::from_range(t.range()))
    }

    pub fn seeing(&self) -> Option<Seeing> {
        self.mean_hfr.map(Seeing::from_mean_hfr)
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    MetricStats::from_values(values).map(|s| s.mean)
}

/// Mean of one metric, weighted by each capture's star count.
fn star_weighted(records: &[&SessionRecord], metric: fn(&Metrics) -> Option<f64>) -> Option<f64> {
    let (weighted, weight) = records
        .iter()
        .filter_map(|r| Some((metric(&r.metrics)?, r.metrics.star_count?)))
        .filter(|(_, stars)| *stars > 0.0)
        .fold((0.0, 0.0), |(w, total), (value, stars)| {
            (w + value * stars, total + stars)
        });
    (weight > 0.0).then(|| weighted / weight)
}

/// Least-squares slope of `values` against their index.
fn slope(values: &[f64]) -> Option<f64> {
    if values.len() <= TREND_MIN_POINTS {
        return None;
    }
    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;
    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, y)| {
            let dx = i as f64 - mean_x;
            (num + dx * (y - mean_y), den + dx * dx)
        });
    (den > 0.0).then(|| num / den)
}
