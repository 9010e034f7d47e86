//! Per-texel importance weights for equirectangular environment maps.
//!
//! A texel's weight is its Rec. 709 luminance scaled by `sin(theta)` of its row, so the discrete
//! distribution follows solid angle rather than pixel count.

use crate::config::BuildOptions;
use crate::environment::{row_theta, EnvironmentMap, LUMINANCE_WEIGHTS};
use crate::error::{try_alloc, BuildResult};
use glam::Vec3;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Luminance of a linear RGB color.
#[inline]
pub fn luminance(color: Vec3) -> f32 {
    LUMINANCE_WEIGHTS.dot(color)
}

/// `sin(theta)` at the centre of row `y`: near 0 at the poles, near 1 at the horizon.
#[inline]
pub fn row_correction(y: u32, height: u32) -> f32 {
    row_theta(y, height).sin()
}

/// Weights extracted from one environment snapshot.
pub(crate) struct WeightField {
    pub(crate) weights: Vec<f32>,
    /// Sum of `weights`, accumulated per row in f64 and combined in row order.
    pub(crate) sum: f64,
    /// Texels whose weight was non-finite or negative and was forced to zero.
    pub(crate) clamped_texels: usize,
}

#[derive(Clone, Copy, Default)]
struct RowTotals {
    sum: f64,
    clamped: usize,
}

pub(crate) fn extract_weights(map: &EnvironmentMap<'_>, options: &BuildOptions) -> BuildResult<WeightField> {
    let texel_count = map.texel_count();
    let width = map.width() as usize;
    let mut weights = try_alloc("weight array", texel_count, texel_count, 0.0f32)?;

    let rows: Vec<RowTotals> = if options.use_parallel(texel_count) {
        extract_rows_parallel(map, &mut weights, width)
    } else {
        weights.chunks_mut(width).enumerate().map(|(y, row)| extract_row(map, y as u32, row)).collect()
    };

    let mut sum = 0.0f64;
    let mut clamped_texels = 0usize;
    for totals in &rows {
        sum += totals.sum;
        clamped_texels += totals.clamped;
    }
    if clamped_texels > 0 {
        log::warn!(
            "[ibl] {clamped_texels} texel(s) of {}x{} environment had non-finite or negative luminance; weights set to zero",
            map.width(),
            map.height()
        );
    }
    Ok(WeightField { weights, sum, clamped_texels })
}

#[cfg(feature = "parallel")]
fn extract_rows_parallel(map: &EnvironmentMap<'_>, weights: &mut [f32], width: usize) -> Vec<RowTotals> {
    weights.par_chunks_mut(width).enumerate().map(|(y, row)| extract_row(map, y as u32, row)).collect()
}

#[cfg(not(feature = "parallel"))]
fn extract_rows_parallel(map: &EnvironmentMap<'_>, weights: &mut [f32], width: usize) -> Vec<RowTotals> {
    weights.chunks_mut(width).enumerate().map(|(y, row)| extract_row(map, y as u32, row)).collect()
}

fn extract_row(map: &EnvironmentMap<'_>, y: u32, row: &mut [f32]) -> RowTotals {
    let correction = row_correction(y, map.height());
    let texels = map.texels();
    let base = y as usize * row.len();
    let mut totals = RowTotals::default();
    for (x, weight) in row.iter_mut().enumerate() {
        let value = luminance(texels.color(base + x)) * correction;
        *weight = if value.is_finite() && value > 0.0 {
            value
        } else {
            // NaN and negative inputs land here; a plain black texel is not counted.
            if value != 0.0 {
                totals.clamped += 1;
            }
            0.0
        };
        totals.sum += *weight as f64;
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_1_SQRT_2;

    fn uniform_rgb(width: u32, height: u32, value: f32) -> Vec<f32> {
        vec![value; (width * height * 3) as usize]
    }

    #[test]
    fn luminance_of_white_is_one() {
        assert!((luminance(Vec3::ONE) - 1.0).abs() < 1e-6);
        assert!((luminance(Vec3::new(0.0, 1.0, 0.0)) - 0.7152).abs() < 1e-6);
    }

    #[test]
    fn row_correction_follows_polar_angle() {
        assert!(row_correction(0, 1000) < 0.01, "top row sits at the pole");
        assert!(row_correction(999, 1000) < 0.01, "bottom row sits at the pole");
        assert!((row_correction(500, 1001) - 1.0).abs() < 1e-6, "middle row sits on the horizon");
        assert!((row_correction(1, 8) - (3.0 * std::f32::consts::PI / 16.0).sin()).abs() < 1e-6);
        assert!((row_correction(0, 2) - FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn weights_apply_row_correction() {
        let data = uniform_rgb(4, 4, 2.0);
        let map = EnvironmentMap::rgb32f(4, 4, &data).unwrap();
        let field = extract_weights(&map, &BuildOptions::serial()).unwrap();
        assert_eq!(field.weights.len(), 16);
        for y in 0..4u32 {
            let expected = 2.0 * row_correction(y, 4);
            for x in 0..4usize {
                let w = field.weights[y as usize * 4 + x];
                assert!((w - expected).abs() < 1e-6, "texel ({x},{y}) weight {w} expected {expected}");
            }
        }
        let expected_sum: f64 = field.weights.iter().map(|&w| w as f64).sum();
        assert!((field.sum - expected_sum).abs() < 1e-9);
        assert_eq!(field.clamped_texels, 0);
    }

    #[test]
    fn non_finite_and_negative_texels_are_zeroed() {
        let mut data = uniform_rgb(3, 2, 1.0);
        data[0] = f32::NAN;
        data[4] = f32::INFINITY;
        data[6] = -5.0;
        data[7] = -5.0;
        data[8] = -5.0;
        let map = EnvironmentMap::rgb32f(3, 2, &data).unwrap();
        let field = extract_weights(&map, &BuildOptions::serial()).unwrap();
        assert_eq!(&field.weights[..3], &[0.0, 0.0, 0.0]);
        assert!(field.weights[3..].iter().all(|&w| w > 0.0));
        assert_eq!(field.clamped_texels, 3);
        assert!(field.sum.is_finite());
    }

    #[test]
    fn black_texels_are_not_reported_as_clamped() {
        let data = uniform_rgb(2, 2, 0.0);
        let map = EnvironmentMap::rgb32f(2, 2, &data).unwrap();
        let field = extract_weights(&map, &BuildOptions::serial()).unwrap();
        assert_eq!(field.sum, 0.0);
        assert_eq!(field.clamped_texels, 0);
    }

    #[test]
    fn parallel_and_serial_extraction_agree() {
        let width = 96u32;
        let height = 48u32;
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for i in 0..width * height {
            let v = ((i * 7919) % 1013) as f32 / 97.0;
            data.extend_from_slice(&[v, v * 0.5, v * 0.25]);
        }
        let map = EnvironmentMap::rgb32f(width, height, &data).unwrap();
        let serial = extract_weights(&map, &BuildOptions::serial()).unwrap();
        let parallel =
            extract_weights(&map, &BuildOptions { parallel_min_texels: 0, ..BuildOptions::default() }).unwrap();
        assert_eq!(serial.weights, parallel.weights);
        assert_eq!(serial.sum.to_bits(), parallel.sum.to_bits());
    }
}
