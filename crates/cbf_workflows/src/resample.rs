//! Resampling images into a reference geometry through a transform chain.

use asl_types::{Affine, DataError, Geometry, ImageVolume, TransformChain};
use ndarray::{Array3, ArrayView3};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How values between voxel centres are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Interpolation {
    NearestNeighbor,
    /// Trilinear blending. Only valid for intensity images.
    Linear,
    /// Weighted vote among the eight neighbours; never produces a value
    /// that is not present in the source.
    MultiLabel,
}

impl Interpolation {
    /// Whether every output value is one of the input values.
    pub fn preserves_labels(self) -> bool {
        !matches!(self, Interpolation::Linear)
    }
}

/// Capability to resample `image` onto `reference`.
///
/// `chain` maps points of the image's space into the reference space, so a
/// reference voxel is looked up in the image through the chain's inverse.
pub trait Resampler: Send + Sync {
    fn resample(
        &self,
        image: &ImageVolume,
        reference: &Geometry,
        chain: &TransformChain,
        interpolation: Interpolation,
        default_value: f32,
    ) -> Result<ImageVolume, DataError>;
}

/// In-process resampler for affine transform chains.
#[derive(Debug, Clone, Copy, Default)]
pub struct AffineResampler;

impl AffineResampler {
    /// Reference voxel index -> image voxel index.
    fn index_map(image: &ImageVolume, reference: &Geometry, chain: &TransformChain) -> Result<Affine, DataError> {
        let image_inv = image
            .affine()
            .inverse()
            .ok_or_else(|| DataError::SingularTransform("image affine".to_string()))?;
        let chain_inv = chain.inverse_composite()?;
        Ok(image_inv.compose(&chain_inv).compose(&reference.affine))
    }

    fn resample_frame(
        frame: ArrayView3<'_, f32>,
        reference: &Geometry,
        map: &Affine,
        interpolation: Interpolation,
        default_value: f32,
    ) -> Array3<f32> {
        let [nx, ny, nz] = reference.shape;
        Array3::from_shape_fn((nx, ny, nz), |(i, j, k)| {
            let p = map.apply([i as f64, j as f64, k as f64]);
            match interpolation {
                Interpolation::NearestNeighbor => nearest(frame, p),
                Interpolation::Linear => linear(frame, p),
                Interpolation::MultiLabel => vote(frame, p),
            }
            .unwrap_or(default_value)
        })
    }
}

impl Resampler for AffineResampler {
    fn resample(
        &self,
        image: &ImageVolume,
        reference: &Geometry,
        chain: &TransformChain,
        interpolation: Interpolation,
        default_value: f32,
    ) -> Result<ImageVolume, DataError> {
        let map = Self::index_map(image, reference, chain)?;
        let frames = (0..image.n_frames())
            .map(|t| {
                image
                    .frame(t)
                    .map(|f| Self::resample_frame(f, reference, &map, interpolation, default_value))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if image.is_series() {
            ImageVolume::from_frames(&frames, reference.affine)
        } else {
            let frame = frames.into_iter().next().ok_or(DataError::NoVolumes("frame"))?;
            Ok(ImageVolume::from_3d(frame, reference.affine))
        }
    }
}

const EDGE_TOLERANCE: f64 = 1e-6;

fn inside(frame: &ArrayView3<'_, f32>, p: [f64; 3]) -> bool {
    let (x, y, z) = frame.dim();
    [x, y, z]
        .iter()
        .zip(p.iter())
        .all(|(&n, &c)| c >= -0.5 - EDGE_TOLERANCE && c <= n as f64 - 0.5 + EDGE_TOLERANCE)
}

fn nearest(frame: ArrayView3<'_, f32>, p: [f64; 3]) -> Option<f32> {
    if !inside(&frame, p) {
        return None;
    }
    let (x, y, z) = frame.dim();
    let idx = |c: f64, n: usize| (c.round().max(0.0) as usize).min(n - 1);
    Some(frame[[idx(p[0], x), idx(p[1], y), idx(p[2], z)]])
}

/// Eight neighbours of `p` with trilinear weights; neighbours outside the
/// grid are clamped onto the edge.
fn neighbours(frame: &ArrayView3<'_, f32>, p: [f64; 3]) -> Vec<([usize; 3], f64)> {
    let (x, y, z) = frame.dim();
    let dims = [x, y, z];
    let mut base = [0usize; 3];
    let mut frac = [0.0; 3];
    for a in 0..3 {
        let c = p[a].clamp(0.0, (dims[a] - 1) as f64);
        let f = c.floor();
        base[a] = f as usize;
        frac[a] = c - f;
    }
    let mut out = Vec::with_capacity(8);
    for corner in 0..8 {
        let mut idx = [0usize; 3];
        let mut w = 1.0;
        for a in 0..3 {
            let hi = (corner >> a) & 1 == 1;
            idx[a] = if hi { (base[a] + 1).min(dims[a] - 1) } else { base[a] };
            w *= if hi { frac[a] } else { 1.0 - frac[a] };
        }
        out.push((idx, w));
    }
    out
}

fn linear(frame: ArrayView3<'_, f32>, p: [f64; 3]) -> Option<f32> {
    if !inside(&frame, p) {
        return None;
    }
    let value = neighbours(&frame, p)
        .into_iter()
        .map(|(idx, w)| w * frame[idx] as f64)
        .sum::<f64>();
    Some(value as f32)
}

fn vote(frame: ArrayView3<'_, f32>, p: [f64; 3]) -> Option<f32> {
    if !inside(&frame, p) {
        return None;
    }
    let mut tally: Vec<(f32, f64)> = Vec::with_capacity(8);
    for (idx, w) in neighbours(&frame, p) {
        let label = frame[idx];
        match tally.iter_mut().find(|(l, _)| *l == label) {
            Some((_, total)) => *total += w,
            None => tally.push((label, w)),
        }
    }
    tally
        .into_iter()
        .fold(None, |best: Option<(f32, f64)>, (label, w)| match best {
            Some((_, bw)) if bw >= w => best,
            _ => Some((label, w)),
        })
        .map(|(label, _)| label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use asl_types::Transform;
    use ndarray::Array3;

    fn ramp() -> ImageVolume {
        ImageVolume::from_3d(
            Array3::from_shape_fn((4, 4, 4), |(i, _, _)| i as f32),
            Affine::IDENTITY,
        )
    }

    #[test]
    fn test_identity_resample_is_exact() {
        let image = ramp();
        for interp in [Interpolation::NearestNeighbor, Interpolation::Linear, Interpolation::MultiLabel] {
            let out = AffineResampler
                .resample(&image, &image.geometry(), &TransformChain::identity(), interp, 0.0)
                .unwrap();
            assert_eq!(out, image);
        }
    }

    #[test]
    fn test_translation_shifts_content_and_fills_default() {
        // Image space -> reference space moves everything by +1 voxel in x.
        let chain = TransformChain::single(Transform::new("shift", Affine::translation(1.0, 0.0, 0.0)));
        let image = ramp();
        let out = AffineResampler
            .resample(&image, &image.geometry(), &chain, Interpolation::NearestNeighbor, -1.0)
            .unwrap();
        let v = out.volume3().unwrap();
        assert_eq!(v[[0, 0, 0]], -1.0);
        assert_eq!(v[[1, 0, 0]], 0.0);
        assert_eq!(v[[3, 2, 1]], 2.0);
    }

    #[test]
    fn test_multilabel_never_blends() {
        let labels = ImageVolume::from_3d(
            Array3::from_shape_fn((4, 1, 1), |(i, _, _)| if i < 2 { 3.0 } else { 8.0 }),
            Affine::IDENTITY,
        );
        let chain = TransformChain::single(Transform::new("half", Affine::translation(0.5, 0.0, 0.0)));
        let out = AffineResampler
            .resample(&labels, &labels.geometry(), &chain, Interpolation::MultiLabel, 0.0)
            .unwrap();
        for &v in out.data().iter() {
            assert!(v == 0.0 || v == 3.0 || v == 8.0, "blended value {}", v);
        }
        let linear = AffineResampler
            .resample(&labels, &labels.geometry(), &chain, Interpolation::Linear, 0.0)
            .unwrap();
        assert!(linear.data().iter().any(|&v| v == 5.5));
    }
}
