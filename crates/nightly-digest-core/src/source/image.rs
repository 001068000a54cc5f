//! FITS frames: header metadata plus star detection on the pixel data.

use super::session_log::MAX_OFFSET_SECS;
use super::{parse_timestamp, ExtractionError, RecordSource, TimestampError};
use crate::detection::{measure_frame, DetectionParams};
use crate::model::{CaptureStatus, Extraction, Metrics, SessionRecord, TemperatureSample};
use chrono::{DateTime, Utc};
use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::FitsFile;
use ndarray::Array2;
use std::path::Path;
use tracing::debug;

pub const EXTENSIONS: &[&str] = &["fits", "fit", "fts"];

const UNKNOWN: &str = "Unknown";

pub struct ImageSource {
    params: DetectionParams,
}

impl ImageSource {
    pub fn new(threshold_sigma: f64) -> Self {
        Self::with_params(DetectionParams {
            threshold_sigma,
            ..DetectionParams::default()
        })
    }

    pub fn with_params(params: DetectionParams) -> Self {
        Self { params }
    }
}

impl RecordSource for ImageSource {
    fn name(&self) -> &'static str {
        "image"
    }

    fn default_extensions(&self) -> &'static [&'static str] {
        EXTENSIONS
    }

    fn read_timestamp(&self, path: &Path) -> Result<DateTime<Utc>, TimestampError> {
        let mut fptr =
            FitsFile::open(path).map_err(|e| TimestampError::Unreadable(e.to_string()))?;
        let hdu = fptr
            .primary_hdu()
            .map_err(|e| TimestampError::Unreadable(e.to_string()))?;
        date_obs(&hdu, &mut fptr)
    }

    fn extract(&self, path: &Path) -> Result<Extraction, ExtractionError> {
        let mut fptr = FitsFile::open(path).map_err(|e| ExtractionError::Open(e.to_string()))?;
        let hdu = fptr
            .primary_hdu()
            .map_err(|e| ExtractionError::Open(e.to_string()))?;

        let timestamp =
            date_obs(&hdu, &mut fptr).map_err(|e| ExtractionError::Read(e.to_string()))?;
        let target = read_string(&hdu, &mut fptr, "OBJECT").unwrap_or_else(|| UNKNOWN.to_string());
        let filter = read_string(&hdu, &mut fptr, "FILTER").unwrap_or_else(|| UNKNOWN.to_string());
        let exposure = checked_exposure(
            read_key_optional::<f64>(&hdu, &mut fptr, "EXPTIME")
                .or_else(|| read_key_optional(&hdu, &mut fptr, "EXPOSURE")),
        )?;
        let temperature = read_key_optional::<f64>(&hdu, &mut fptr, "CCD-TEMP")
            .or_else(|| read_key_optional(&hdu, &mut fptr, "CCDTEMP"));

        let image = read_plane(&hdu, &mut fptr)?;
        let frame = measure_frame(&image, &self.params).ok_or(ExtractionError::NoSources)?;
        debug!(
            "{}: {} stars, HFR {:.2}, eccentricity {:.2}",
            path.display(),
            frame.star_count,
            frame.hfr,
            frame.eccentricity
        );

        let mut extraction = Extraction {
            clamped_frames: usize::from(frame.clamped_sources > 0),
            ..Extraction::default()
        };
        if let Some(celsius) = temperature {
            extraction.temperature_samples.push(TemperatureSample {
                time: timestamp,
                celsius,
            });
        }
        extraction.records.push(SessionRecord {
            target,
            filter,
            timestamp,
            status: CaptureStatus::Completed,
            metrics: Metrics {
                star_count: Some(frame.star_count as f64),
                hfr: Some(frame.hfr),
                eccentricity: Some(frame.eccentricity),
                guiding_error: None,
                temperature,
                exposure,
            },
        });
        Ok(extraction)
    }
}

fn date_obs(hdu: &FitsHdu, fptr: &mut FitsFile) -> Result<DateTime<Utc>, TimestampError> {
    let raw = hdu
        .read_key::<String>(fptr, "DATE-OBS")
        .map_err(|_| TimestampError::Missing("DATE-OBS"))?;
    parse_timestamp(&raw)
}

/// Exposure length in seconds. A present but impossible value fails the frame.
fn checked_exposure(raw: Option<f64>) -> Result<Option<f64>, ExtractionError> {
    match raw {
        Some(secs) if !secs.is_finite() || !(0.0..=MAX_OFFSET_SECS).contains(&secs) => Err(
            ExtractionError::Read(format!("EXPTIME out of range: {}", secs)),
        ),
        other => Ok(other),
    }
}

fn read_key_optional<T: fitsio::headers::ReadsKey>(
    hdu: &FitsHdu,
    fptr: &mut FitsFile,
    key: &str,
) -> Option<T> {
    hdu.read_key::<T>(fptr, key).ok()
}

fn read_string(hdu: &FitsHdu, fptr: &mut FitsFile, key: &str) -> Option<String> {
    read_key_optional::<String>(hdu, fptr, key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Primary HDU as a single 2-D plane. Cubes are averaged across planes;
/// non-finite pixels take the median of the finite ones.
fn read_plane(hdu: &FitsHdu, fptr: &mut FitsFile) -> Result<Array2<f32>, ExtractionError> {
    let shape = match &hdu.info {
        HduInfo::ImageInfo { shape, .. } => shape.clone(),
        _ => return Err(ExtractionError::Read("primary HDU is not an image".into())),
    };
    // cfitsio reports the shape slowest axis first: [planes,] height, width
    let (planes, height, width) = match shape.as_slice() {
        [height, width] => (1, *height, *width),
        [planes, height, width] => (*planes, *height, *width),
        [] => return Err(ExtractionError::EmptyImage),
        other => {
            return Err(ExtractionError::Read(format!(
                "unsupported image dimensions {:?}",
                other
            )))
        }
    };
    let plane_size = height * width;
    if plane_size == 0 || planes == 0 {
        return Err(ExtractionError::EmptyImage);
    }

    let pixels: Vec<f32> = hdu
        .read_image(fptr)
        .map_err(|e| ExtractionError::Read(e.to_string()))?;
    if pixels.len() != plane_size * planes {
        return Err(ExtractionError::Read(format!(
            "expected {} pixels, got {}",
            plane_size * planes,
            pixels.len()
        )));
    }

    let mut plane = vec![0.0f32; plane_size];
    for chunk in pixels.chunks_exact(plane_size) {
        for (acc, v) in plane.iter_mut().zip(chunk) {
            *acc += v / planes as f32;
        }
    }

    let mut finite: Vec<f32> = plane.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return Err(ExtractionError::EmptyImage);
    }
    if finite.len() < plane.len() {
        let mid = finite.len() / 2;
        let (_, median, _) = finite.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
        let median = *median;
        plane.iter_mut().filter(|v| !v.is_finite()).for_each(|v| *v = median);
    }

    Array2::from_shape_vec((height, width), plane).map_err(|e| ExtractionError::Read(e.to_string()))
}
