pub mod aggregate;
pub mod alerts;
pub mod summary;

pub use aggregate::{aggregate, GroupStatistics, MetricStats};
pub use alerts::{evaluate_alerts, Alert, Severity};
pub use summary::{
    AlignmentSummary, FocusStability, GuideQuality, GuidingSummary, Seeing, SessionEfficiency,
    SessionSummary, TemperatureStability,
};
