pub mod analysis;
pub mod config;
pub mod delivery;
pub mod detection;
pub mod engine;
pub mod error;
pub mod model;
pub mod progress;
pub mod report;
pub mod scanner;
pub mod source;

pub use config::{AppConfig, InputMode, ReportLevel};
pub use engine::{DigestEngine, DigestResult, RunTally};
pub use error::Error;
pub use progress::{ProgressReporter, SilentReporter};
