use ndarray::Array2;

/// A detected source with flux-weighted centroid and ellipse semi-axes.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub x: f64,
    pub y: f64,
    pub flux: f64,
    pub peak: f64,
    /// Semi-major axis, pixels.
    pub a: f64,
    /// Semi-minor axis, pixels.
    pub b: f64,
    pub area: usize,
}

impl Source {
    /// `1 - b/a`; NaN for a degenerate source with `a == 0`.
    pub fn eccentricity(&self) -> f64 {
        if self.a > 0.0 {
            1.0 - self.b / self.a
        } else {
            f64::NAN
        }
    }
}

const NEIGHBOURS: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// Find 8-connected groups of pixels above `threshold` in a
/// background-subtracted image. Groups smaller than `min_area` are dropped.
pub fn extract_sources(data: &Array2<f32>, threshold: f32, min_area: usize) -> Vec<Source> {
    let (height, width) = data.dim();
    let mut visited = Array2::<bool>::from_elem((height, width), false);
    let mut sources = Vec::new();
    let mut stack: Vec<(usize, usize)> = Vec::new();
    let mut pixels: Vec<(usize, usize, f64)> = Vec::new();

    for row in 0..height {
        for col in 0..width {
            if visited[[row, col]] || data[[row, col]] <= threshold {
                continue;
            }

            pixels.clear();
            stack.push((row, col));
            visited[[row, col]] = true;

            while let Some((r, c)) = stack.pop() {
                pixels.push((r, c, f64::from(data[[r, c]])));
                for (dr, dc) in NEIGHBOURS {
                    let (Some(nr), Some(nc)) =
                        (r.checked_add_signed(dr), c.checked_add_signed(dc))
                    else {
                        continue;
                    };
                    if nr >= height || nc >= width || visited[[nr, nc]] {
                        continue;
                    }
                    if data[[nr, nc]] > threshold {
                        visited[[nr, nc]] = true;
                        stack.push((nr, nc));
                    }
                }
            }

            if pixels.len() >= min_area {
                if let Some(source) = moments(&pixels) {
                    sources.push(source);
                }
            }
        }
    }

    sources
}

fn moments(pixels: &[(usize, usize, f64)]) -> Option<Source> {
    let flux: f64 = pixels.iter().map(|p| p.2).sum();
    if flux <= 0.0 {
        return None;
    }
    let x = pixels.iter().map(|p| p.1 as f64 * p.2).sum::<f64>() / flux;
    let y = pixels.iter().map(|p| p.0 as f64 * p.2).sum::<f64>() / flux;

    let (mut x2, mut y2, mut xy) = (0.0, 0.0, 0.0);
    for &(r, c, v) in pixels {
        let dx = c as f64 - x;
        let dy = r as f64 - y;
        x2 += v * dx * dx;
        y2 += v * dy * dy;
        xy += v * dx * dy;
    }
    x2 /= flux;
    y2 /= flux;
    xy /= flux;

    let mean = (x2 + y2) / 2.0;
    let spread = (((x2 - y2) / 2.0).powi(2) + xy * xy).sqrt();
    let a = (mean + spread).max(0.0).sqrt();
    let b = (mean - spread).max(0.0).sqrt();

    Some(Source {
        x,
        y,
        flux,
        peak: pixels.iter().map(|p| p.2).fold(f64::MIN, f64::max),
        a,
        b,
        area: pixels.len(),
    })
}

/// Radius around (x, y) enclosing `fraction` of the flux inside a circular
/// aperture of radius `aperture`, interpolated between pixel centres.
pub fn flux_radius(data: &Array2<f32>, x: f64, y: f64, aperture: f64, fraction: f64) -> Option<f64> {
    let (height, width) = data.dim();
    let r_min = (y - aperture).floor().max(0.0) as usize;
    let r_max = ((y + aperture).ceil() as usize).min(height.saturating_sub(1));
    let c_min = (x - aperture).floor().max(0.0) as usize;
    let c_max = ((x + aperture).ceil() as usize).min(width.saturating_sub(1));

    let mut ring: Vec<(f64, f64)> = Vec::new();
    for row in r_min..=r_max {
        for col in c_min..=c_max {
            let distance = ((col as f64 - x).powi(2) + (row as f64 - y).powi(2)).sqrt();
            if distance <= aperture {
                ring.push((distance, f64::from(data[[row, col]])));
            }
        }
    }
    ring.sort_by(|a, b| a.0.total_cmp(&b.0));

    let total: f64 = ring.iter().map(|p| p.1).sum();
    if total <= 0.0 {
        return None;
    }
    let target = fraction * total;

    let mut enclosed = 0.0;
    let mut previous_radius = 0.0;
    for (distance, value) in ring {
        if value > 0.0 && enclosed + value >= target {
            let step = (target - enclosed) / value;
            return Some(previous_radius + step * (distance - previous_radius));
        }
        enclosed += value;
        previous_radius = distance;
    }
    Some(aperture)
}
