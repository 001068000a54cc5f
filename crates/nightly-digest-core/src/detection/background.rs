use ndarray::{s, Array2, ArrayView2};

const CLIP_SIGMA: f32 = 3.0;
const CLIP_ITERATIONS: usize = 3;
const MIN_RMS: f32 = 1e-6;

/// Smooth background model built from sigma-clipped medians on a mesh of
/// `mesh_size` boxes, interpolated bilinearly between box centres.
#[derive(Debug, Clone)]
pub struct Background {
    levels: Array2<f32>,
    mesh_size: usize,
    global_rms: f32,
}

impl Background {
    pub fn estimate(image: ArrayView2<f32>, mesh_size: usize) -> Self {
        let mesh_size = mesh_size.max(1);
        let (height, width) = image.dim();
        let rows = height.div_ceil(mesh_size).max(1);
        let cols = width.div_ceil(mesh_size).max(1);

        let mut levels = Array2::<f32>::zeros((rows, cols));
        let mut rms_values = Vec::with_capacity(rows * cols);

        for row in 0..rows {
            for col in 0..cols {
                let y0 = row * mesh_size;
                let x0 = col * mesh_size;
                let y1 = (y0 + mesh_size).min(height);
                let x1 = (x0 + mesh_size).min(width);
                let mut samples: Vec<f32> = image
                    .slice(s![y0..y1, x0..x1])
                    .iter()
                    .copied()
                    .filter(|v| v.is_finite())
                    .collect();
                let (level, rms) = clipped_stats(&mut samples);
                levels[[row, col]] = level;
                rms_values.push(rms);
            }
        }

        let global_rms = median(&mut rms_values).max(MIN_RMS);
        Self {
            levels,
            mesh_size,
            global_rms,
        }
    }

    pub fn global_rms(&self) -> f32 {
        self.global_rms
    }

    /// Background level at a pixel.
    pub fn level_at(&self, row: usize, col: usize) -> f32 {
        let (rows, cols) = self.levels.dim();
        let (r0, r1, fr) = bracket(row, self.mesh_size, rows);
        let (c0, c1, fc) = bracket(col, self.mesh_size, cols);
        let top = self.levels[[r0, c0]] * (1.0 - fc) + self.levels[[r0, c1]] * fc;
        let bottom = self.levels[[r1, c0]] * (1.0 - fc) + self.levels[[r1, c1]] * fc;
        top * (1.0 - fr) + bottom * fr
    }

    pub fn subtract(&self, image: ArrayView2<f32>) -> Array2<f32> {
        let mut out = image.to_owned();
        for ((row, col), value) in out.indexed_iter_mut() {
            *value -= self.level_at(row, col);
        }
        out
    }
}

/// Neighbouring mesh cells around a pixel coordinate and the weight of the
/// second one.
fn bracket(pixel: usize, mesh_size: usize, cells: usize) -> (usize, usize, f32) {
    let pos = ((pixel as f32 + 0.5) / mesh_size as f32 - 0.5).clamp(0.0, (cells - 1) as f32);
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(cells - 1);
    (lo, hi, pos - lo as f32)
}

/// Iterative sigma clipping around the median. Returns (median, stddev)
/// of the surviving samples.
fn clipped_stats(samples: &mut Vec<f32>) -> (f32, f32) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    for _ in 0..CLIP_ITERATIONS {
        let center = median(samples);
        let sigma = stddev(samples, center);
        if sigma <= 0.0 {
            break;
        }
        let before = samples.len();
        samples.retain(|v| (v - center).abs() <= CLIP_SIGMA * sigma);
        if samples.len() == before || samples.is_empty() {
            break;
        }
    }
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let center = median(samples);
    (center, stddev(samples, center))
}

fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn stddev(values: &[f32], center: f32) -> f32 {
    let n = values.len() as f32;
    (values.iter().map(|v| (v - center).powi(2)).sum::<f32>() / n).sqrt()
}
