//! Plain-text rendering of a finished run. Nothing here does I/O.

pub mod format;

use crate::analysis::{Alert, GroupStatistics, SessionEfficiency, SessionSummary, Severity};
use crate::config::ReportLevel;
use crate::engine::RunTally;
use crate::model::{seconds_span, GroupKey, Metric};
use chrono::{DateTime, Duration, Utc};
use std::fmt::Write;

pub use format::{format_duration, format_metric, format_temperature};

/// Errors shown by the minimal report.
const MINIMAL_ALERT_LIMIT: usize = 3;

/// Metrics listed per group; exposure is reported as integration time.
const GROUP_METRICS: [Metric; 5] = [
    Metric::StarCount,
    Metric::Hfr,
    Metric::Eccentricity,
    Metric::GuidingError,
    Metric::Temperature,
];

/// Everything a report is rendered from.
#[derive(Debug, Clone, Copy)]
pub struct ReportContext<'a> {
    pub summary: &'a SessionSummary,
    pub groups: &'a [(GroupKey, GroupStatistics)],
    pub tally: &'a RunTally,
    pub alerts: &'a [Alert],
    pub hours: u32,
    pub generated_at: DateTime<Utc>,
}

pub fn render(level: ReportLevel, ctx: &ReportContext<'_>) -> String {
    let mut out = String::new();
    if ctx.summary.is_empty() {
        render_empty(&mut out, ctx);
    } else if level == ReportLevel::Minimal {
        render_minimal(&mut out, ctx);
    } else {
        render_full(&mut out, ctx, level == ReportLevel::Detailed);
    }
    out.trim_end().to_string()
}

fn render_empty(out: &mut String, ctx: &ReportContext<'_>) {
    let _ = writeln!(
        out,
        "**🌙 Nightly digest {}**",
        ctx.generated_at.format("%Y-%m-%d")
    );
    let _ = writeln!(out, "No captures in the last {} hours.", ctx.hours);
    tally_line(out, ctx.tally);
}

fn render_minimal(out: &mut String, ctx: &ReportContext<'_>) {
    let summary = ctx.summary;
    let _ = writeln!(
        out,
        "**🌙 Nightly digest {}**",
        ctx.generated_at.format("%Y-%m-%d")
    );
    let _ = writeln!(
        out,
        "📸 {} captures in {}",
        summary.completed,
        duration_text(summary.duration())
    );
    if summary.aborted > 0 {
        let _ = writeln!(out, "⚠️ {} aborted", summary.aborted);
    }
    let _ = writeln!(out, "🎯 Guiding: {}", summary.guiding.quality);
    for alert in ctx
        .alerts
        .iter()
        .filter(|a| a.severity == Severity::Error)
        .take(MINIMAL_ALERT_LIMIT)
    {
        let _ = writeln!(out, "❌ {}", alert.message);
    }
    tally_line(out, ctx.tally);
}

fn render_full(out: &mut String, ctx: &ReportContext<'_>, detailed: bool) {
    let summary = ctx.summary;
    let _ = writeln!(
        out,
        "**🌙 Nightly digest {}** (last {}h)",
        ctx.generated_at.format("%Y-%m-%d %H:%M UTC"),
        ctx.hours
    );
    out.push('\n');

    let _ = writeln!(out, "**📊 Overview**");
    let _ = writeln!(
        out,
        "Captures: {} completed, {} aborted",
        summary.completed, summary.aborted
    );
    if let (Some(start), Some(end)) = (summary.start, summary.end) {
        let _ = writeln!(
            out,
            "Session: {} → {} UTC ({})",
            start.format("%H:%M"),
            end.format("%H:%M"),
            duration_text(summary.duration())
        );
    }
    let _ = writeln!(out, "Targets: {}", list_or_none(&summary.targets));
    let _ = writeln!(out, "Filters: {}", list_or_none(&summary.filters));
    if detailed {
        let _ = writeln!(out, "Total stars: {:.0}", summary.total_stars);
    }
    if let Some(rate) = summary.alignment.success_rate() {
        let _ = writeln!(
            out,
            "Alignment: {}/{} solved ({:.0}%)",
            summary.alignment.successes,
            summary.alignment.attempts,
            rate * 100.0
        );
    }
    out.push('\n');

    if let Some(efficiency) = summary.efficiency {
        efficiency_block(out, &efficiency, detailed);
    }

    let _ = writeln!(out, "**🌡️ Conditions**");
    match summary.temperature {
        Some(t) => {
            let _ = writeln!(
                out,
                "Temperature: {} → {} (avg {})",
                format_temperature(t.min),
                format_temperature(t.max),
                format_temperature(t.mean)
            );
            if let Some(stability) = summary.temperature_stability() {
                let _ = writeln!(
                    out,
                    "Stability: {} (Δ{:.1}°C)",
                    stability,
                    t.range()
                );
            }
        }
        None => {
            let _ = writeln!(out, "Temperature: not recorded");
        }
    }
    if detailed {
        if let Some(seeing) = summary.seeing() {
            let _ = writeln!(out, "Seeing: {}", seeing);
        }
    }
    out.push('\n');

    let guiding = &summary.guiding;
    let _ = writeln!(out, "**🎯 Guiding**");
    match (guiding.mean_error, guiding.max_error) {
        (Some(mean), Some(max)) => {
            let _ = writeln!(
                out,
                "Quality: {} (avg {:.2}\", max {:.2}\", {} samples)",
                guiding.quality, mean, max, guiding.samples
            );
            if detailed {
                if let (Some(ra), Some(dec)) = (guiding.mean_ra, guiding.mean_dec) {
                    let _ = writeln!(out, "RA {:.2}\" / DEC {:.2}\"", ra, dec);
                }
                if let Some(rms) = guiding.mean_rms {
                    let _ = writeln!(out, "RMS {:.2}\"", rms);
                }
            }
        }
        _ => {
            let _ = writeln!(out, "Quality: {}", guiding.quality);
        }
    }
    out.push('\n');

    if !ctx.groups.is_empty() {
        let _ = writeln!(out, "**🔭 Targets**");
        for (key, stats) in ctx.groups {
            group_block(out, key, stats, detailed);
        }
        if detailed {
            if let Some(weighted) = summary.weighted_hfr {
                let _ = writeln!(out, "Star-weighted HFR: {:.2}", weighted);
            }
            if let Some(weighted) = summary.weighted_eccentricity {
                let _ = writeln!(out, "Star-weighted eccentricity: {:.2}", weighted);
            }
            if let Some(trend) = summary.hfr_trend {
                let _ = writeln!(out, "HFR trend: {} ({:+.4}/frame)", trend_label(trend), trend);
            }
            if let Some(consistency) = summary.star_consistency {
                let _ = writeln!(out, "Star count consistency: {:.2}", consistency);
            }
        }
        out.push('\n');
    }

    if summary.autofocus.runs > 0 {
        let _ = write!(
            out,
            "**🔍 Autofocus**: {} runs, {}",
            summary.autofocus.runs,
            summary.autofocus.stability()
        );
        if let Some(t) = summary.autofocus.mean_temperature {
            let _ = write!(out, " (avg {})", format_temperature(t));
        }
        out.push_str("\n\n");
    }

    issues_block(out, ctx);
    tally_line(out, ctx.tally);
}

fn group_block(out: &mut String, key: &GroupKey, stats: &GroupStatistics, detailed: bool) {
    let _ = write!(out, "**{}**: {} frames", key, stats.count);
    let integration = seconds_span(stats.integration_secs()).filter(|d| *d > Duration::zero());
    if let Some(integration) = integration {
        let _ = write!(out, ", {} integration", format_duration(integration));
    }
    if stats.aborted > 0 {
        let _ = write!(out, ", {} aborted", stats.aborted);
    }
    out.push('\n');

    for metric in GROUP_METRICS {
        let Some(s) = stats.metric(metric) else {
            continue;
        };
        let _ = write!(
            out,
            "  {}: {} → {} (avg {})",
            metric.label(),
            format_metric(metric, s.min),
            format_metric(metric, s.max),
            format_metric(metric, s.mean)
        );
        if detailed && s.count > 1 {
            let _ = write!(out, " σ {}", format_metric(metric, s.std_dev));
        }
        out.push('\n');
    }
    if detailed {
        if let Some(stars) = stats.metric(Metric::StarCount).filter(|s| s.count > 1) {
            let _ = writeln!(
                out,
                "  Star consistency: {:.2}",
                1.0 - stars.std_dev / stars.mean.max(1.0)
            );
        }
    }
}

fn efficiency_block(out: &mut String, efficiency: &SessionEfficiency, detailed: bool) {
    let _ = writeln!(out, "**⚡ Efficiency**");
    let _ = writeln!(out, "Imaging: {:.1}%", efficiency.imaging_ratio() * 100.0);
    if detailed {
        let _ = writeln!(
            out,
            "Imaging time: {}",
            duration_text(seconds_span(efficiency.imaging_secs))
        );
        let _ = writeln!(
            out,
            "Downtime: {} ({:.1}%)",
            duration_text(seconds_span(efficiency.downtime_secs())),
            efficiency.downtime_percent()
        );
        let _ = writeln!(out, "Avg time per frame: {:.0}s", efficiency.secs_per_frame());
    }
    out.push('\n');
}

fn issues_block(out: &mut String, ctx: &ReportContext<'_>) {
    let aborted: Vec<String> = ctx
        .groups
        .iter()
        .filter(|(_, s)| s.aborted > 0)
        .map(|(k, s)| format!("{}: {}", k, s.aborted))
        .collect();
    if aborted.is_empty() && ctx.alerts.is_empty() {
        return;
    }

    let _ = writeln!(out, "**⚠️ Issues & alerts**");
    if !aborted.is_empty() {
        let _ = writeln!(
            out,
            "• {} aborted captures ({})",
            ctx.summary.aborted,
            aborted.join(", ")
        );
    }
    for alert in ctx.alerts {
        let icon = match alert.severity {
            Severity::Error => "❌",
            Severity::Warning => "⚠️",
        };
        let _ = writeln!(out, "• {} {}", icon, alert.message);
    }
    out.push('\n');
}

fn tally_line(out: &mut String, tally: &RunTally) {
    let _ = writeln!(
        out,
        "📁 Files: {} found, {} processed, {} outside window, {} failed",
        tally.discovered, tally.processed, tally.skipped, tally.failed
    );
}

fn duration_text(duration: Option<Duration>) -> String {
    duration.map_or_else(|| "n/a".to_string(), format_duration)
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

fn trend_label(slope: f64) -> &'static str {
    if slope < -0.01 {
        "improving"
    } else if slope > 0.01 {
        "degrading"
    } else {
        "stable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{aggregate, evaluate_alerts};
    use crate::config::AlertThresholds;
    use crate::model::{
        AlignmentResult, CaptureStatus, Extraction, GuideSample, Metrics, SessionRecord,
    };
    use chrono::TimeZone;

    fn extraction() -> Extraction {
        let start = Utc.with_ymd_and_hms(2024, 9, 14, 21, 0, 0).unwrap();
        let mut records = Vec::new();
        for (i, hfr) in [3.60, 4.30, 5.62].iter().enumerate() {
            records.push(SessionRecord {
                target: "NGC 7380".into(),
                filter: "Ha".into(),
                timestamp: start + Duration::minutes(i as i64 * 10),
                status: CaptureStatus::Completed,
                metrics: Metrics {
                    star_count: Some(300.0 + i as f64 * 10.0),
                    hfr: Some(*hfr),
                    eccentricity: Some(0.4),
                    guiding_error: Some(0.8),
                    temperature: Some(-10.0),
                    exposure: Some(600.0),
                },
            });
        }
        records.push(SessionRecord {
            target: "NGC 7380".into(),
            filter: "Ha".into(),
            timestamp: start + Duration::minutes(40),
            status: CaptureStatus::Aborted,
            metrics: Metrics::default(),
        });
        Extraction {
            records,
            guide_samples: vec![GuideSample {
                time: start,
                dx: 0.6,
                dy: 0.8,
                rms: None,
            }],
            alignments: vec![
                AlignmentResult {
                    time: start,
                    succeeded: false,
                },
                AlignmentResult {
                    time: start + Duration::minutes(1),
                    succeeded: true,
                },
            ],
            ..Extraction::default()
        }
    }

    fn render_with(level: ReportLevel, extraction: &Extraction, tally: &RunTally) -> String {
        let groups = aggregate(&extraction.records);
        let summary = SessionSummary::from_extraction(extraction);
        let alerts = evaluate_alerts(&summary, &groups, 0, &AlertThresholds::default());
        render(
            level,
            &ReportContext {
                summary: &summary,
                groups: &groups,
                tally,
                alerts: &alerts,
                hours: 24,
                generated_at: Utc.with_ymd_and_hms(2024, 9, 15, 7, 0, 0).unwrap(),
            },
        )
    }

    fn tally() -> RunTally {
        RunTally {
            discovered: 3,
            processed: 2,
            skipped: 1,
            ..RunTally::default()
        }
    }

    #[test]
    fn test_standard_report_lists_groups_and_issues() {
        let text = render_with(ReportLevel::Standard, &extraction(), &tally());
        assert!(text.starts_with("**🌙 Nightly digest 2024-09-15 07:00 UTC**"));
        assert!(text.contains("Captures: 3 completed, 1 aborted"));
        assert!(text.contains("**NGC 7380 - Ha**: 3 frames, 30m integration, 1 aborted"));
        assert!(text.contains("  HFR: 3.60 → 5.62 (avg 4.51)"));
        assert!(text.contains("  Stars: 300.0 → 320.0 (avg 310.0)"));
        assert!(text.contains("  Temperature: -10.0°C → -10.0°C (avg -10.0°C)"));
        assert!(text.contains("Quality: Good (avg 1.00\", max 1.00\", 1 samples)"));
        assert!(text.contains("• 1 aborted captures (NGC 7380 - Ha: 1)"));
        assert!(text.contains("High HFR detected: 5.62"));
        assert!(text.ends_with("📁 Files: 3 found, 2 processed, 1 outside window, 0 failed"));
        assert!(text.contains("Alignment: 1/2 solved (50%)"));
        assert!(text.contains("**⚡ Efficiency**\nImaging: 75.0%\n"));
        assert!(!text.contains("Downtime"));
        assert!(!text.contains("σ"));
    }

    #[test]
    fn test_detailed_adds_spread_and_trend() {
        let text = render_with(ReportLevel::Detailed, &extraction(), &tally());
        assert!(text.contains("σ"));
        assert!(text.contains("Star-weighted HFR:"));
        assert!(text.contains("Star-weighted eccentricity: 0.40"));
        assert!(text.contains("Imaging time: 30m"));
        assert!(text.contains("Downtime: 10m (25.0%)"));
        assert!(text.contains("Avg time per frame: 800s"));
        assert!(text.contains("Seeing: Poor"));
        assert!(text.contains("RA 0.60\" / DEC 0.80\""));
        // three completed captures are not enough for a trend
        assert!(!text.contains("HFR trend"));
    }

    #[test]
    fn test_minimal_report_is_short() {
        let text = render_with(ReportLevel::Minimal, &extraction(), &tally());
        assert!(text.contains("📸 3 captures in 40m"));
        assert!(text.contains("⚠️ 1 aborted"));
        assert!(text.contains("🎯 Guiding: Good"));
        assert!(text.contains("❌ High HFR detected"));
        assert!(!text.contains("NGC 7380"));
        assert!(text.lines().count() <= 8);
    }

    #[test]
    fn test_empty_run_renders_notice() {
        let text = render_with(ReportLevel::Standard, &Extraction::default(), &RunTally::default());
        assert!(text.contains("No captures in the last 24 hours."));
        assert!(text.contains("0 found"));
    }

    #[test]
    fn test_unrepresentable_integration_is_left_out() {
        let mut extraction = extraction();
        extraction.records[0].metrics.exposure = Some(1e300);
        let text = render_with(ReportLevel::Standard, &extraction, &tally());
        assert!(text.contains("**NGC 7380 - Ha**: 3 frames, 1 aborted"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let extraction = extraction();
        let a = render_with(ReportLevel::Detailed, &extraction, &tally());
        let b = render_with(ReportLevel::Detailed, &extraction, &tally());
        assert_eq!(a, b);
    }
}
