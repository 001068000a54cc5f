use chrono::{DateTime, Duration, Utc};
use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;

use nightly_digest_core::delivery::Notifier;
use nightly_digest_core::model::Metric;
use nightly_digest_core::{
    AppConfig, DigestEngine, Error, InputMode, ProgressReporter, ReportLevel, SilentReporter,
};

const WEBHOOK: &str = "https://example.com/api/webhooks/1/abc";

fn ago(hours: i64) -> DateTime<Utc> {
    Utc::now() - Duration::hours(hours)
}

/// One Ekos session that started `started` and ran two jobs.
fn session_log(started: DateTime<Utc>) -> String {
    format!(
        "\
#KStars version 3.7.4. Analyze log version 1.0.

AnalyzeStartTime,{},UTC
SchedulerJobStart,5.000,NGC 7380
Temperature,10.000,4.5
AlignState,12.000,In Progress
AlignState,15.000,Successful
CaptureStarting,20.000,300.000,Ha
GuideStats,60.000,0.300,0.400,120,80,0.500,0.61,22.0
CaptureComplete,320.000,300.000,Ha,3.600,/data/a.fits,240,1180,0.420
CaptureStarting,330.000,300.000,Ha
GuideStats,400.000,0.600,0.800,150,90,1.000,0.70,21.0
CaptureComplete,630.000,300.000,Ha,4.300,/data/b.fits,260,1200,0.380
CaptureStarting,640.000,300.000,Ha
CaptureAborted,700.000,300.000
SchedulerJobEnd,900.000,NGC 7380,Complete
SchedulerJobStart,950.000,M 31
Temperature,960.000,2.0
CaptureStarting,1000.000,120.000,L
CaptureComplete,1120.000,120.000,L,2.100,/data/c.fits,900,1500,0.300
",
        started.format("%Y-%m-%d %H:%M:%S%.3f")
    )
}

/// Layout:
///   root/
///     2026/ekos-recent.analyze   in window, 3 completed + 1 aborted
///     2026/ekos-old.analyze      started 40h ago
///     broken.analyze             bad number in a capture record
///     nostart.analyze            no AnalyzeStartTime, no dated file name
///     notes.txt                  not a session log
fn create_session_tree(root: &Path) {
    let nested = root.join("2026");
    fs::create_dir_all(&nested).unwrap();
    fs::write(nested.join("ekos-recent.analyze"), session_log(ago(3))).unwrap();
    fs::write(nested.join("ekos-old.analyze"), session_log(ago(40))).unwrap();
    fs::write(
        root.join("broken.analyze"),
        format!(
            "AnalyzeStartTime,{},UTC\nCaptureComplete,abc,300,Ha,3.1,x.fits,10,10,0.4\n",
            ago(2).format("%Y-%m-%d %H:%M:%S%.3f")
        ),
    )
    .unwrap();
    fs::write(root.join("nostart.analyze"), "Temperature,10.000,4.5\n").unwrap();
    fs::write(root.join("notes.txt"), "clear skies").unwrap();
}

#[derive(Default)]
struct CountingReporter {
    located: AtomicUsize,
    processed: AtomicUsize,
    records: AtomicUsize,
}

impl ProgressReporter for CountingReporter {
    fn on_locate_complete(&self, files_found: usize, _duration_secs: f64) {
        self.located.store(files_found, Ordering::SeqCst);
    }

    fn on_file_processed(&self, _files_done: usize, _total_files: usize, _current_path: &str) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_extract_complete(&self, records: usize, _duration_secs: f64) {
        self.records.store(records, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: RefCell<Vec<String>>,
}

impl Notifier for RecordingNotifier {
    fn send(&self, message: &str) -> Result<(), Error> {
        self.sent.borrow_mut().push(message.to_string());
        Ok(())
    }
}

#[test]
fn test_session_log_pipeline() {
    let tmp = tempdir().unwrap();
    create_session_tree(tmp.path());

    let engine = DigestEngine::new(AppConfig::new(tmp.path(), WEBHOOK));
    let reporter = CountingReporter::default();
    let result = engine.run(&reporter).unwrap();

    let tally = result.tally;
    assert_eq!(tally.discovered, 4);
    assert_eq!(tally.processed, 1);
    assert_eq!(tally.skipped, 1);
    assert_eq!(tally.failed, 2);
    assert_eq!(tally.timestamp_failures, 1);
    assert_eq!(tally.extraction_failures, 1);
    assert_eq!(reporter.located.load(Ordering::SeqCst), 4);
    assert_eq!(reporter.processed.load(Ordering::SeqCst), 4);
    assert_eq!(reporter.records.load(Ordering::SeqCst), 4);

    let keys: Vec<String> = result.groups.iter().map(|(k, _)| k.to_string()).collect();
    assert_eq!(keys, ["NGC 7380 - Ha", "M 31 - L"]);

    let (_, ha) = &result.groups[0];
    assert_eq!(ha.count, 2);
    assert_eq!(ha.aborted, 1);
    let hfr = ha.metric(Metric::Hfr).unwrap();
    assert_eq!(hfr.min, 3.6);
    assert_eq!(hfr.max, 4.3);
    assert!(hfr.min <= hfr.mean && hfr.mean <= hfr.max);
    assert_eq!(ha.integration_secs(), 600.0);

    let summary = &result.summary;
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.aborted, 1);
    assert_eq!(summary.autofocus.runs, 0);
    assert_eq!(summary.targets, ["M 31", "NGC 7380"]);
    let temperature = summary.temperature.unwrap();
    assert_eq!((temperature.min, temperature.max), (2.0, 4.5));
    assert_eq!(summary.alignment.attempts, 1);
    assert_eq!(summary.alignment.success_rate(), Some(1.0));
    let efficiency = summary.efficiency.unwrap();
    assert_eq!(efficiency.imaging_secs, 720.0);
    assert_eq!(efficiency.session_secs, 1100.0);

    let text = engine.render(&result);
    assert!(text.contains("**NGC 7380 - Ha**: 2 frames, 10m integration, 1 aborted"));
    assert!(text.contains("📁 Files: 4 found, 1 processed, 1 outside window, 2 failed"));
}

#[test]
fn test_publish_posts_report() {
    let tmp = tempdir().unwrap();
    create_session_tree(tmp.path());

    let mut config = AppConfig::new(tmp.path(), WEBHOOK);
    config.report_level = ReportLevel::Minimal;
    let engine = DigestEngine::new(config);
    let result = engine.run(&SilentReporter).unwrap();

    let notifier = RecordingNotifier::default();
    let sent = engine.publish(&result, &notifier, &SilentReporter).unwrap();
    assert_eq!(sent, 1);
    let messages = notifier.sent.borrow();
    assert!(messages[0].contains("📸 3 captures"));
    assert!(messages[0].chars().count() <= 1900);
}

#[test]
fn test_empty_root_reports_zero_captures() {
    let tmp = tempdir().unwrap();
    let engine = DigestEngine::new(AppConfig::new(tmp.path(), WEBHOOK));
    let result = engine.run(&SilentReporter).unwrap();

    assert!(result.groups.is_empty());
    assert!(result.is_empty());
    assert_eq!(result.summary.total_captures(), 0);
    assert_eq!(result.tally.discovered, 0);
    assert!(engine.render(&result).contains("No captures in the last 24 hours."));

    let notifier = RecordingNotifier::default();
    assert_eq!(engine.publish(&result, &notifier, &SilentReporter).unwrap(), 0);
    assert!(notifier.sent.borrow().is_empty());
}

#[test]
fn test_empty_run_posts_when_configured() {
    let tmp = tempdir().unwrap();
    let mut config = AppConfig::new(tmp.path(), WEBHOOK);
    config.notify_when_empty = true;
    let engine = DigestEngine::new(config);
    let result = engine.run(&SilentReporter).unwrap();

    let notifier = RecordingNotifier::default();
    assert_eq!(engine.publish(&result, &notifier, &SilentReporter).unwrap(), 1);
}

#[test]
fn test_corrupt_offset_fails_only_that_file() {
    let tmp = tempdir().unwrap();
    fs::write(tmp.path().join("ekos-good.analyze"), session_log(ago(3))).unwrap();
    fs::write(
        tmp.path().join("ekos-corrupt.analyze"),
        format!(
            "AnalyzeStartTime,{},UTC\nTemperature,1e13,4.5\n",
            ago(2).format("%Y-%m-%d %H:%M:%S%.3f")
        ),
    )
    .unwrap();

    let engine = DigestEngine::new(AppConfig::new(tmp.path(), WEBHOOK));
    let result = engine.run(&SilentReporter).unwrap();
    assert_eq!(result.tally.discovered, 2);
    assert_eq!(result.tally.processed, 1);
    assert_eq!(result.tally.extraction_failures, 1);
    assert_eq!(result.summary.completed, 3);
}

#[test]
fn test_window_before_calendar_start_is_invalid_config() {
    let tmp = tempdir().unwrap();
    let mut config = AppConfig::new(tmp.path(), WEBHOOK);
    config.hours = u32::MAX;
    let err = DigestEngine::new(config).run(&SilentReporter).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)), "got {:?}", err);
}

#[test]
fn test_missing_root_is_fatal() {
    let tmp = tempdir().unwrap();
    let engine = DigestEngine::new(AppConfig::new(tmp.path().join("nope"), WEBHOOK));
    let err = engine.run(&SilentReporter).unwrap_err();
    assert!(matches!(err, Error::PathNotFound(_)));
}

mod fits {
    use super::*;
    use fitsio::images::{ImageDescription, ImageType};
    use fitsio::FitsFile;

    const SIZE: usize = 128;

    /// Uniform noise in [level - 10, level + 10) from a fixed LCG.
    fn noise(seed: u64) -> Vec<f32> {
        let mut state = seed;
        (0..SIZE * SIZE)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                let unit = (state >> 40) as f32 / (1u64 << 24) as f32;
                500.0 + (unit - 0.5) * 20.0
            })
            .collect()
    }

    fn add_star(data: &mut [f32], x: f32, y: f32, peak: f32, sigma: f32) {
        for row in 0..SIZE {
            for col in 0..SIZE {
                let dx = col as f32 - x;
                let dy = row as f32 - y;
                let r2 = (dx * dx + dy * dy) / (sigma * sigma);
                if r2 < 50.0 {
                    data[row * SIZE + col] += peak * (-0.5 * r2).exp();
                }
            }
        }
    }

    fn starfield(seed: u64) -> Vec<f32> {
        let mut data = noise(seed);
        for (x, y) in [(30.0, 30.0), (90.0, 35.0), (40.0, 95.0), (100.0, 100.0)] {
            add_star(&mut data, x, y, 2000.0, 2.0);
        }
        data
    }

    fn write_frame(path: &Path, object: &str, filter: &str, date_obs: DateTime<Utc>, data: &[f32]) {
        let description = ImageDescription {
            data_type: ImageType::Float,
            dimensions: &[SIZE, SIZE],
        };
        let mut fptr = FitsFile::create(path)
            .with_custom_primary(&description)
            .open()
            .unwrap();
        let hdu = fptr.primary_hdu().unwrap();
        hdu.write_key(&mut fptr, "OBJECT", object.to_string()).unwrap();
        hdu.write_key(&mut fptr, "FILTER", filter.to_string()).unwrap();
        hdu.write_key(
            &mut fptr,
            "DATE-OBS",
            date_obs.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
        )
        .unwrap();
        hdu.write_key(&mut fptr, "EXPTIME", 120.0f64).unwrap();
        hdu.write_key(&mut fptr, "CCD-TEMP", -10.0f64).unwrap();
        hdu.write_image(&mut fptr, data).unwrap();
    }

    /// Layout:
    ///   root/
    ///     blank.fits         noise only, nothing to detect
    ///     corrupt.fits       not FITS at all
    ///     lights/m31_L_001.fits, m31_L_002.FIT, m42_Ha_001.fits
    ///     old.fits           DATE-OBS 48h ago
    ///     notes.txt
    fn create_fits_tree(root: &Path) {
        let lights = root.join("lights");
        fs::create_dir_all(&lights).unwrap();
        write_frame(&lights.join("m31_L_001.fits"), "M31", "L", ago(3), &starfield(1));
        write_frame(&lights.join("m31_L_002.FIT"), "M31", "L", ago(2), &starfield(2));
        write_frame(&lights.join("m42_Ha_001.fits"), "M42", "Ha", ago(1), &starfield(3));
        write_frame(&root.join("old.fits"), "M31", "L", ago(48), &starfield(4));
        write_frame(&root.join("blank.fits"), "M31", "L", ago(1), &noise(5));
        fs::write(root.join("corrupt.fits"), "SIMPLE = garbage").unwrap();
        fs::write(root.join("notes.txt"), "clear skies").unwrap();
    }

    #[test]
    fn test_image_pipeline() {
        let tmp = tempdir().unwrap();
        create_fits_tree(tmp.path());

        let mut config = AppConfig::new(tmp.path(), WEBHOOK);
        config.input_mode = InputMode::Image;
        let engine = DigestEngine::new(config);
        let result = engine.run(&SilentReporter).unwrap();

        let tally = result.tally;
        assert_eq!(tally.discovered, 6);
        assert_eq!(tally.processed, 3);
        assert_eq!(tally.skipped, 1);
        assert_eq!(tally.failed, 2);
        assert_eq!(tally.timestamp_failures, 1);
        assert_eq!(tally.extraction_failures, 1);

        let keys: Vec<String> = result.groups.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, ["M31 - L", "M42 - Ha"]);

        let (_, m31) = &result.groups[0];
        assert_eq!(m31.count, 2);
        let stars = m31.metric(Metric::StarCount).unwrap();
        assert_eq!((stars.min, stars.max), (4.0, 4.0));
        let hfr = m31.metric(Metric::Hfr).unwrap();
        assert!(hfr.min > 3.5 && hfr.max < 6.0, "HFR {:?}", hfr);
        let eccentricity = m31.metric(Metric::Eccentricity).unwrap();
        assert!(eccentricity.max < 0.3);
        assert_eq!(m31.metric(Metric::Temperature).unwrap().mean, -10.0);
        assert!(m31.metric(Metric::GuidingError).is_none());

        assert_eq!(result.summary.completed, 3);
        assert_eq!(result.summary.total_stars, 12.0);
    }
}
