//! Moving-window filters over row-major grids.
//!
//! Edges use symmetric reflection that repeats the edge sample
//! (`d c b a | a b c d | d c b a`).

/// Equivalent number of looks assumed for the Lee noise model.
pub const LEE_NOISE_LOOKS: f64 = 4.4;

fn reflect(index: isize, len: usize) -> usize {
    let n = len as isize;
    let period = 2 * n;
    let mut i = index.rem_euclid(period);
    if i >= n {
        i = period - i - 1;
    }
    i as usize
}

/// Box mean over a `size x size` window.
pub fn uniform(data: &[f64], width: usize, height: usize, size: usize) -> Vec<f64> {
    if data.is_empty() || size <= 1 {
        return data.to_vec();
    }
    let radius = (size / 2) as isize;
    let norm = size as f64;

    let mut horizontal = vec![0.0; data.len()];
    for row in 0..height {
        let line = &data[row * width..(row + 1) * width];
        for col in 0..width {
            let sum: f64 = (-radius..=radius)
                .map(|k| line[reflect(col as isize + k, width)])
                .sum();
            horizontal[row * width + col] = sum / norm;
        }
    }

    let mut out = vec![0.0; data.len()];
    for row in 0..height {
        for col in 0..width {
            let sum: f64 = (-radius..=radius)
                .map(|k| horizontal[reflect(row as isize + k, height) * width + col])
                .sum();
            out[row * width + col] = sum / norm;
        }
    }
    out
}

pub fn median(data: &[f32], width: usize, height: usize, size: usize) -> Vec<f32> {
    if data.is_empty() || size <= 1 {
        return data.to_vec();
    }
    let radius = (size / 2) as isize;
    let mut window = Vec::with_capacity(size * size);
    let mut out = Vec::with_capacity(data.len());

    for row in 0..height {
        for col in 0..width {
            window.clear();
            for dy in -radius..=radius {
                let r = reflect(row as isize + dy, height);
                for dx in -radius..=radius {
                    let c = reflect(col as isize + dx, width);
                    window.push(data[r * width + c]);
                }
            }
            let mid = window.len() / 2;
            let (_, value, _) = window.select_nth_unstable_by(mid, f32::total_cmp);
            out.push(*value);
        }
    }
    out
}

/// Lee filter: `mean + k * (x - mean)` with `k = var / (var + mean^2 / looks)`.
pub fn lee(data: &[f32], width: usize, height: usize, size: usize) -> Vec<f32> {
    let img: Vec<f64> = data.iter().map(|v| *v as f64).collect();
    let squared: Vec<f64> = img.iter().map(|v| v * v).collect();

    let mean = uniform(&img, width, height, size);
    let sqr_mean = uniform(&squared, width, height, size);

    img.iter()
        .zip(mean.iter().zip(sqr_mean.iter()))
        .map(|(x, (m, sq))| {
            let variance = sq - m * m;
            let noise_variance = m * m / LEE_NOISE_LOOKS;
            let denominator = variance + noise_variance;
            // flat windows carry no signal, fall back to the mean
            let k = if denominator == 0.0 {
                0.0
            } else {
                variance / denominator
            };
            (m + k * (x - m)) as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reflect_repeats_edges() {
        assert_eq!(reflect(-1, 4), 0);
        assert_eq!(reflect(-2, 4), 1);
        assert_eq!(reflect(4, 4), 3);
        assert_eq!(reflect(5, 4), 2);
        assert_eq!(reflect(2, 4), 2);
        assert_eq!(reflect(-1, 1), 0);
    }

    #[test]
    fn test_uniform_1d_row() {
        // reflect: [1 | 1 2 3 | 3]
        let out = uniform(&[1.0, 2.0, 3.0], 3, 1, 3);
        let expected_rows = [4.0 / 3.0, 2.0, 8.0 / 3.0];
        // vertical pass over a single row reflects onto itself
        for (got, want) in out.iter().zip(expected_rows.iter()) {
            assert!((got - want).abs() < 1e-9);
        }
    }

    #[test]
    fn test_uniform_constant_is_unchanged() {
        let data = vec![7.0; 25];
        let out = uniform(&data, 5, 5, 3);
        assert!(out.iter().all(|v| (v - 7.0).abs() < 1e-12));
    }

    #[test]
    fn test_median_removes_impulse() {
        let mut data = vec![1.0f32; 9];
        data[4] = 100.0;
        let out = median(&data, 3, 3, 3);
        assert_eq!(out[4], 1.0);
        assert_eq!(out.len(), 9);
    }

    #[test]
    fn test_lee_constant_region_is_unchanged() {
        let data = vec![-12.5f32; 16];
        let out = lee(&data, 4, 4, 3);
        assert!(out.iter().all(|v| (v + 12.5).abs() < 1e-5));
    }

    #[test]
    fn test_lee_all_zero_does_not_produce_nan() {
        let out = lee(&[0.0; 9], 3, 3, 3);
        assert!(out.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_lee_smooths_towards_mean() {
        let mut data = vec![10.0f32; 25];
        data[12] = 20.0;
        let out = lee(&data, 5, 5, 3);
        assert!(out[12] < 20.0 && out[12] > 10.0);
    }

    #[test]
    fn test_window_of_one_is_identity() {
        let data = [1.0f32, 5.0, 2.0, 8.0];
        assert_eq!(median(&data, 2, 2, 1), data.to_vec());
        assert_eq!(lee(&data, 2, 2, 1), data.to_vec());
    }
}
