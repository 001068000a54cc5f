use crate::analysis::{aggregate, evaluate_alerts, Alert, GroupStatistics, SessionSummary};
use crate::config::AppConfig;
use crate::delivery::{deliver, split_message, Notifier, MESSAGE_LIMIT};
use crate::error::Error;
use crate::model::{Extraction, GroupKey};
use crate::progress::ProgressReporter;
use crate::report::{self, ReportContext};
use crate::scanner;
use crate::source::{self, FileFailure, FileOutcome, TimeWindow};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Per-file bookkeeping for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTally {
    /// Files matching the extension allow-list.
    pub discovered: usize,
    /// Files that passed the time filter and were extracted.
    pub processed: usize,
    /// Files outside the time window.
    pub skipped: usize,
    /// Timestamp and extraction failures together.
    pub failed: usize,
    pub timestamp_failures: usize,
    pub extraction_failures: usize,
    /// Frames with eccentricity clamped into [0, 1).
    pub clamped_frames: usize,
}

#[derive(Debug)]
pub struct DigestResult {
    pub generated_at: DateTime<Utc>,
    pub groups: Vec<(GroupKey, GroupStatistics)>,
    pub summary: SessionSummary,
    pub tally: RunTally,
    pub alerts: Vec<Alert>,
    pub locate_duration: Duration,
    pub extract_duration: Duration,
}

impl DigestResult {
    pub fn is_empty(&self) -> bool {
        self.summary.is_empty()
    }
}

pub struct DigestEngine {
    config: AppConfig,
}

impl DigestEngine {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn run(&self, reporter: &dyn ProgressReporter) -> Result<DigestResult, Error> {
        self.run_at(Utc::now(), reporter)
    }

    /// Locate, filter, extract and summarize everything in the window
    /// ending at `now`. Per-file problems are tallied; only a missing root
    /// fails the run.
    pub fn run_at(
        &self,
        now: DateTime<Utc>,
        reporter: &dyn ProgressReporter,
    ) -> Result<DigestResult, Error> {
        let window = TimeWindow::ending_at(now, self.config.hours)?;
        let reader = source::build_source(&self.config);
        info!(
            "Collecting {} files under {} since {}",
            reader.name(),
            self.config.root_dir.display(),
            window.cutoff
        );

        // Phase 1: Locate
        reporter.on_locate_start();
        let locate_start = Instant::now();
        let files: Vec<_> = scanner::locate_session_files(
            &self.config.root_dir,
            &self.config.effective_extensions(),
            &self.config.ignore_patterns,
        )?
        .collect();
        let locate_duration = locate_start.elapsed();
        reporter.on_locate_complete(files.len(), locate_duration.as_secs_f64());
        debug!(
            "Located {} candidate files in {:.2}s",
            files.len(),
            locate_duration.as_secs_f64()
        );

        // Phase 2: Filter and extract
        reporter.on_extract_start(files.len());
        let extract_start = Instant::now();
        let mut tally = RunTally {
            discovered: files.len(),
            ..RunTally::default()
        };
        let mut extraction = Extraction::default();
        for (i, path) in files.iter().enumerate() {
            match source::process_file(reader.as_ref(), path, &window) {
                FileOutcome::Extracted(found) => {
                    debug!("{}: {} records", path.display(), found.records.len());
                    tally.processed += 1;
                    extraction.merge(found);
                }
                FileOutcome::OutOfWindow(_) => tally.skipped += 1,
                FileOutcome::Failed(failure) => {
                    warn!("Skipping {}: {}", path.display(), failure);
                    tally.failed += 1;
                    match failure {
                        FileFailure::Timestamp(_) => tally.timestamp_failures += 1,
                        FileFailure::Extraction(_) => tally.extraction_failures += 1,
                    }
                }
            }
            reporter.on_file_processed(i + 1, files.len(), &path.to_string_lossy());
        }
        tally.clamped_frames = extraction.clamped_frames;
        let extract_duration = extract_start.elapsed();
        reporter.on_extract_complete(extraction.records.len(), extract_duration.as_secs_f64());

        // Phase 3: Aggregate
        let groups = aggregate(&extraction.records);
        let summary = SessionSummary::from_extraction(&extraction);
        let alerts = evaluate_alerts(
            &summary,
            &groups,
            tally.clamped_frames,
            &self.config.alert_thresholds,
        );
        info!(
            "{} captures in {} groups; files: {} processed, {} skipped, {} failed",
            summary.total_captures(),
            groups.len(),
            tally.processed,
            tally.skipped,
            tally.failed
        );

        Ok(DigestResult {
            generated_at: now,
            groups,
            summary,
            tally,
            alerts,
            locate_duration,
            extract_duration,
        })
    }

    /// Render `result` at the configured report level.
    pub fn render(&self, result: &DigestResult) -> String {
        report::render(
            self.config.report_level,
            &ReportContext {
                summary: &result.summary,
                groups: &result.groups,
                tally: &result.tally,
                alerts: &result.alerts,
                hours: self.config.hours,
                generated_at: result.generated_at,
            },
        )
    }

    /// Split and send the rendered report. Returns the number of messages
    /// posted; an empty run posts nothing unless `notify_when_empty` is set.
    pub fn publish(
        &self,
        result: &DigestResult,
        notifier: &dyn Notifier,
        reporter: &dyn ProgressReporter,
    ) -> Result<usize, Error> {
        if result.is_empty() && !self.config.notify_when_empty {
            info!("No captures in window; nothing to post");
            return Ok(0);
        }
        let chunks = split_message(&self.render(result), MESSAGE_LIMIT);
        reporter.on_delivery_start(chunks.len());
        let start = Instant::now();
        deliver(notifier, &chunks)?;
        reporter.on_delivery_complete(start.elapsed().as_secs_f64());
        info!("Posted report in {} message(s)", chunks.len());
        Ok(chunks.len())
    }
}
