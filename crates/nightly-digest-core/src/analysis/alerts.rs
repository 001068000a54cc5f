use super::aggregate::GroupStatistics;
use super::summary::SessionSummary;
use crate::config::AlertThresholds;
use crate::model::{GroupKey, Metric};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub severity: Severity,
    pub message: String,
}

impl Alert {
    fn warning(message: String) -> Self {
        Self {
            severity: Severity::Warning,
            message,
        }
    }

    fn error(message: String) -> Self {
        Self {
            severity: Severity::Error,
            message,
        }
    }
}

/// Threshold checks over the finished run, errors first.
pub fn evaluate_alerts(
    summary: &SessionSummary,
    groups: &[(GroupKey, GroupStatistics)],
    clamped_frames: usize,
    thresholds: &AlertThresholds,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    let max_hfr = groups
        .iter()
        .filter_map(|(_, stats)| stats.metric(Metric::Hfr))
        .map(|s| s.max)
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
    if let Some(max_hfr) = max_hfr.filter(|v| *v > thresholds.hfr_warning) {
        let message = format!("High HFR detected: {:.2} px, consider refocusing", max_hfr);
        alerts.push(if max_hfr >= thresholds.hfr_error {
            Alert::error(message)
        } else {
            Alert::warning(message)
        });
    }

    if let Some(slope) = summary
        .hfr_trend
        .filter(|s| *s > thresholds.hfr_drift_warning)
    {
        alerts.push(Alert::warning(format!(
            "HFR degrading over the session: {:+.3} px per frame",
            slope
        )));
    }

    if let Some(range) = summary
        .temperature
        .map(|t| t.range())
        .filter(|r| *r > thresholds.temperature_swing_warning)
    {
        alerts.push(Alert::warning(format!(
            "Large temperature swing: {:.1}°C",
            range
        )));
    }

    if let Some(rate) = summary
        .success_rate()
        .filter(|r| *r < thresholds.success_rate_warning)
    {
        alerts.push(Alert::error(format!(
            "Low capture success rate: {:.0}% ({} of {} completed)",
            rate * 100.0,
            summary.completed,
            summary.total_captures()
        )));
    }

    if clamped_frames > 0 {
        alerts.push(Alert::warning(format!(
            "{} frame(s) reported eccentricity outside [0, 1); values were clamped",
            clamped_frames
        )));
    }

    alerts.sort_by(|a, b| b.severity.cmp(&a.severity));
    alerts
}
