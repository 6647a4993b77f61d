//! Numerical helpers shared by the estimators and QC.

use ndarray::{Array3, ArrayView3, Axis, Zip};

/// `FWHM = 2 * sqrt(2 ln 2) * sigma`.
const FWHM_PER_SIGMA: f64 = 2.354_820_045;

pub fn fwhm_to_sigma(fwhm: f64) -> f64 {
    fwhm / FWHM_PER_SIGMA
}

fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (3.0 * sigma).ceil() as isize;
    let weights: Vec<f64> = (-radius..=radius)
        .map(|x| (-(x * x) as f64 / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

fn convolve_axis(data: &Array3<f64>, kernel: &[f64], axis: usize) -> Array3<f64> {
    let radius = (kernel.len() / 2) as isize;
    let mut out = Array3::zeros(data.raw_dim());
    Zip::from(out.lanes_mut(Axis(axis)))
        .and(data.lanes(Axis(axis)))
        .for_each(|mut dst, src| {
            let n = src.len() as isize;
            for x in 0..n {
                let mut acc = 0.0;
                for (k, w) in kernel.iter().enumerate() {
                    let pos = x + k as isize - radius;
                    if (0..n).contains(&pos) {
                        acc += w * src[pos as usize];
                    }
                }
                dst[x as usize] = acc;
            }
        });
    out
}

/// Gaussian smoothing restricted to `mask`.
///
/// Values outside the mask neither contribute nor receive signal: the result
/// is the normalised convolution `G*(v m) / G*m` inside the mask and zero
/// elsewhere. `sigma_vox` is given per axis in voxels; a non-positive sigma
/// leaves that axis untouched.
pub fn smooth_in_mask(
    values: ArrayView3<'_, f32>,
    mask: &Array3<bool>,
    sigma_vox: [f64; 3],
) -> Array3<f32> {
    let mut weighted = Array3::<f64>::zeros(values.raw_dim());
    let mut support = Array3::<f64>::zeros(values.raw_dim());
    Zip::from(&mut weighted)
        .and(&mut support)
        .and(&values)
        .and(mask)
        .for_each(|w, s, &v, &m| {
            if m {
                *w = v as f64;
                *s = 1.0;
            }
        });

    for (axis, &sigma) in sigma_vox.iter().enumerate() {
        if sigma > 0.0 {
            let kernel = gaussian_kernel(sigma);
            weighted = convolve_axis(&weighted, &kernel, axis);
            support = convolve_axis(&support, &kernel, axis);
        }
    }

    let mut out = Array3::<f32>::zeros(values.raw_dim());
    Zip::from(&mut out)
        .and(&weighted)
        .and(&support)
        .and(mask)
        .for_each(|o, &w, &s, &m| {
            if m && s > f64::EPSILON {
                *o = (w / s) as f32;
            }
        });
    out
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Median absolute deviation around the median.
pub fn mad(values: &[f64]) -> Option<f64> {
    let m = median(values)?;
    let deviations: Vec<f64> = values.iter().map(|v| (v - m).abs()).collect();
    median(&deviations)
}

/// Population variance.
pub fn variance(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    Some(values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64)
}

/// Pearson correlation; `None` when either side has zero variance.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (ma, mb) = (mean(a)?, mean(b)?);
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    if va <= f64::EPSILON || vb <= f64::EPSILON {
        None
    } else {
        Some(cov / (va.sqrt() * vb.sqrt()))
    }
}

/// In-mask voxel values of a 3-D view, in iteration order.
pub fn masked_values(values: ArrayView3<'_, f32>, mask: &Array3<bool>) -> Vec<f64> {
    values
        .iter()
        .zip(mask.iter())
        .filter(|(_, m)| **m)
        .map(|(&v, _)| v as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoothing_preserves_constant_field() {
        let values = Array3::from_elem((6, 6, 6), 3.0f32);
        let mut mask = Array3::from_elem((6, 6, 6), false);
        mask.slice_mut(ndarray::s![1..5, 1..5, 1..5]).fill(true);

        let out = smooth_in_mask(values.view(), &mask, [1.2, 1.2, 1.2]);
        for ((idx, &v), &m) in out.indexed_iter().zip(mask.iter()) {
            if m {
                assert!((v - 3.0).abs() < 1e-5, "voxel {:?} = {}", idx, v);
            } else {
                assert_eq!(v, 0.0);
            }
        }
    }

    #[test]
    fn test_robust_statistics() {
        let v = [1.0, 2.0, 3.0, 4.0, 100.0];
        assert_eq!(median(&v), Some(3.0));
        assert_eq!(mad(&v), Some(1.0));
        assert_eq!(median(&[1.0, 3.0]), Some(2.0));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_pearson() {
        let a = [1.0, 2.0, 3.0];
        assert!((pearson(&a, &[2.0, 4.0, 6.0]).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson(&a, &[3.0, 2.0, 1.0]).unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&a, &[5.0, 5.0, 5.0]), None);
    }
}
