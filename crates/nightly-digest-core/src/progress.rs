/// Trait for reporting pipeline progress.
///
/// The CLI implements it with indicatif; library callers and tests use
/// [`SilentReporter`]. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_locate_start(&self) {}
    fn on_locate_complete(&self, _files_found: usize, _duration_secs: f64) {}
    fn on_extract_start(&self, _total_files: usize) {}
    fn on_file_processed(&self, _files_done: usize, _total_files: usize, _current_path: &str) {}
    fn on_extract_complete(&self, _records: usize, _duration_secs: f64) {}
    fn on_delivery_start(&self, _messages: usize) {}
    fn on_delivery_complete(&self, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
