use crate::model::Metric;
use chrono::Duration;

/// `45m`, `2h 5m`, `3h`, `1d 3h`.
pub fn format_duration(duration: Duration) -> String {
    let minutes = duration.num_minutes().max(0);
    if minutes < 60 {
        format!("{}m", minutes)
    } else if minutes < 24 * 60 {
        let (h, m) = (minutes / 60, minutes % 60);
        if m > 0 {
            format!("{}h {}m", h, m)
        } else {
            format!("{}h", h)
        }
    } else {
        let (d, h) = (minutes / (24 * 60), (minutes / 60) % 24);
        if h > 0 {
            format!("{}d {}h", d, h)
        } else {
            format!("{}d", d)
        }
    }
}

pub fn format_temperature(celsius: f64) -> String {
    format!("{:.1}°C", celsius)
}

/// Render a metric value at its display precision.
pub fn format_metric(metric: Metric, value: f64) -> String {
    match metric {
        Metric::StarCount => format!("{:.1}", value),
        Metric::Hfr | Metric::Eccentricity => format!("{:.2}", value),
        Metric::GuidingError => format!("{:.2}\"", value),
        Metric::Temperature => format_temperature(value),
        Metric::Exposure => format!("{:.0}s", value),
    }
}
