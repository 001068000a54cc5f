//! Point-source detection and per-frame shape statistics.
//!
//! Background is modelled on a coarse mesh and subtracted, sources are
//! 8-connected pixel groups above `threshold_sigma * rms`, and each
//! source gets a flux radius and second-moment ellipse.

pub mod background;
pub mod extract;

use ndarray::Array2;
use tracing::warn;

pub use background::Background;
pub use extract::{extract_sources, flux_radius, Source};

/// Upper bound for reported eccentricity; 1 - b/a can only reach 1 for a
/// degenerate (zero-width) source.
pub const ECCENTRICITY_CEILING: f64 = 0.999;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionParams {
    pub threshold_sigma: f64,
    pub min_area: usize,
    pub mesh_size: usize,
    /// Aperture for the flux radius measurement, pixels.
    pub flux_aperture: f64,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            threshold_sigma: 5.0,
            min_area: 5,
            mesh_size: 64,
            flux_aperture: 6.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameMetrics {
    pub star_count: usize,
    /// Twice the mean flux radius.
    pub hfr: f64,
    /// Mean of `1 - b/a` over all sources.
    pub eccentricity: f64,
    /// Sources whose eccentricity fell outside [0, 1) and were clamped.
    pub clamped_sources: usize,
}

/// Detect sources in `image` and summarize them. `None` when nothing
/// usable was found.
pub fn measure_frame(image: &Array2<f32>, params: &DetectionParams) -> Option<FrameMetrics> {
    let background = Background::estimate(image.view(), params.mesh_size);
    let subtracted = background.subtract(image.view());
    let threshold = params.threshold_sigma as f32 * background.global_rms();
    let sources = extract_sources(&subtracted, threshold, params.min_area);
    if sources.is_empty() {
        return None;
    }

    let radii: Vec<f64> = sources
        .iter()
        .filter_map(|s| flux_radius(&subtracted, s.x, s.y, params.flux_aperture, 0.5))
        .collect();
    if radii.is_empty() {
        return None;
    }

    let mut clamped_sources = 0;
    let eccentricity_sum: f64 = sources
        .iter()
        .map(|s| {
            let e = s.eccentricity();
            if !(0.0..1.0).contains(&e) {
                clamped_sources += 1;
                if e.is_nan() {
                    ECCENTRICITY_CEILING
                } else {
                    e.clamp(0.0, ECCENTRICITY_CEILING)
                }
            } else {
                e
            }
        })
        .sum();
    if clamped_sources > 0 {
        warn!(
            "{} of {} sources had eccentricity outside [0, 1)",
            clamped_sources,
            sources.len()
        );
    }

    Some(FrameMetrics {
        star_count: sources.len(),
        hfr: 2.0 * radii.iter().sum::<f64>() / radii.len() as f64,
        eccentricity: eccentricity_sum / sources.len() as f64,
        clamped_sources,
    })
}
