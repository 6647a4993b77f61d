//! Image volumes, masks and label maps.

use std::collections::BTreeSet;
use std::fmt;

use ndarray::{Array3, ArrayD, ArrayView3, Axis, Ix3, IxDyn, Zip};
use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// Tolerance used when comparing affines of two grids.
const AFFINE_TOLERANCE: f64 = 1e-6;

/// A 4x4 voxel-to-world (or world-to-world) matrix, stored row-major.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine(pub [f64; 16]);

impl Affine {
    pub const IDENTITY: Affine = Affine([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    pub fn from_rows(rows: [[f64; 4]; 4]) -> Self {
        let mut m = [0.0; 16];
        for (r, row) in rows.iter().enumerate() {
            m[r * 4..r * 4 + 4].copy_from_slice(row);
        }
        Affine(m)
    }

    pub fn translation(tx: f64, ty: f64, tz: f64) -> Self {
        let mut m = Self::IDENTITY;
        m.0[3] = tx;
        m.0[7] = ty;
        m.0[11] = tz;
        m
    }

    pub fn scaling(sx: f64, sy: f64, sz: f64) -> Self {
        let mut m = Self::IDENTITY;
        m.0[0] = sx;
        m.0[5] = sy;
        m.0[10] = sz;
        m
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.0[row * 4 + col]
    }

    /// Matrix product `self * other`: the result applies `other` first.
    pub fn compose(&self, other: &Affine) -> Affine {
        let mut out = [0.0; 16];
        for r in 0..4 {
            for c in 0..4 {
                out[r * 4 + c] = (0..4).map(|k| self.get(r, k) * other.get(k, c)).sum();
            }
        }
        Affine(out)
    }

    /// Maps a point through the matrix.
    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (r, o) in out.iter_mut().enumerate() {
            *o = self.get(r, 0) * p[0] + self.get(r, 1) * p[1] + self.get(r, 2) * p[2] + self.get(r, 3);
        }
        out
    }

    /// Inverse of an affine matrix (bottom row assumed `0 0 0 1`).
    pub fn inverse(&self) -> Option<Affine> {
        let a = |r, c| self.get(r, c);
        let det = a(0, 0) * (a(1, 1) * a(2, 2) - a(1, 2) * a(2, 1))
            - a(0, 1) * (a(1, 0) * a(2, 2) - a(1, 2) * a(2, 0))
            + a(0, 2) * (a(1, 0) * a(2, 1) - a(1, 1) * a(2, 0));
        if det.abs() < 1e-12 || !det.is_finite() {
            return None;
        }
        let inv_det = 1.0 / det;
        let m = [
            [
                (a(1, 1) * a(2, 2) - a(1, 2) * a(2, 1)) * inv_det,
                (a(0, 2) * a(2, 1) - a(0, 1) * a(2, 2)) * inv_det,
                (a(0, 1) * a(1, 2) - a(0, 2) * a(1, 1)) * inv_det,
            ],
            [
                (a(1, 2) * a(2, 0) - a(1, 0) * a(2, 2)) * inv_det,
                (a(0, 0) * a(2, 2) - a(0, 2) * a(2, 0)) * inv_det,
                (a(0, 2) * a(1, 0) - a(0, 0) * a(1, 2)) * inv_det,
            ],
            [
                (a(1, 0) * a(2, 1) - a(1, 1) * a(2, 0)) * inv_det,
                (a(0, 1) * a(2, 0) - a(0, 0) * a(2, 1)) * inv_det,
                (a(0, 0) * a(1, 1) - a(0, 1) * a(1, 0)) * inv_det,
            ],
        ];
        let t = [a(0, 3), a(1, 3), a(2, 3)];
        let mut rows = [[0.0; 4]; 4];
        for r in 0..3 {
            rows[r][..3].copy_from_slice(&m[r]);
            rows[r][3] = -(m[r][0] * t[0] + m[r][1] * t[1] + m[r][2] * t[2]);
        }
        rows[3][3] = 1.0;
        Some(Affine::from_rows(rows))
    }

    pub fn approx_eq(&self, other: &Affine, tol: f64) -> bool {
        self.0.iter().zip(other.0.iter()).all(|(a, b)| (a - b).abs() <= tol)
    }
}

impl Default for Affine {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Voxel grid of a volume: 3-D shape plus voxel-to-world affine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub shape: [usize; 3],
    pub affine: Affine,
}

impl Geometry {
    pub fn new(shape: [usize; 3], affine: Affine) -> Self {
        Self { shape, affine }
    }

    pub fn matches(&self, other: &Geometry) -> bool {
        self.shape == other.shape && self.affine.approx_eq(&other.affine, AFFINE_TOLERANCE)
    }

    pub fn voxel_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Returns a `GeometryMismatch` error naming `what` if the grids differ.
    pub fn ensure_matches(&self, other: &Geometry, what: &str) -> Result<(), DataError> {
        if self.matches(other) {
            Ok(())
        } else {
            Err(DataError::GeometryMismatch(format!(
                "{} has grid {} but {} was expected",
                what, other, self
            )))
        }
    }

    /// Voxel size along each axis, taken from the affine column norms.
    pub fn voxel_size(&self) -> [f64; 3] {
        let mut size = [0.0; 3];
        for (c, s) in size.iter_mut().enumerate() {
            *s = (0..3).map(|r| self.affine.get(r, c).powi(2)).sum::<f64>().sqrt();
        }
        size
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.shape[0], self.shape[1], self.shape[2])
    }
}

/// A 3-D or 4-D image with its voxel-to-world affine.
///
/// The fourth axis, when present, is time (one frame per acquisition volume).
#[derive(Debug, Clone, PartialEq)]
pub struct ImageVolume {
    data: ArrayD<f32>,
    affine: Affine,
}

impl ImageVolume {
    pub fn new(data: ArrayD<f32>, affine: Affine) -> Result<Self, DataError> {
        match data.ndim() {
            3 | 4 => Ok(Self { data, affine }),
            n => Err(DataError::Dimensionality { expected: "3 or 4", found: n }),
        }
    }

    pub fn from_3d(data: Array3<f32>, affine: Affine) -> Self {
        Self { data: data.into_dyn(), affine }
    }

    /// Builds a 4-D series from equally shaped frames.
    pub fn from_frames(frames: &[Array3<f32>], affine: Affine) -> Result<Self, DataError> {
        let first = frames.first().ok_or(DataError::NoVolumes("frame"))?;
        let (x, y, z) = first.dim();
        let mut data = ArrayD::<f32>::zeros(IxDyn(&[x, y, z, frames.len()]));
        for (t, frame) in frames.iter().enumerate() {
            if frame.dim() != (x, y, z) {
                return Err(DataError::GeometryMismatch(format!(
                    "frame {} has shape {:?}, expected {:?}",
                    t,
                    frame.dim(),
                    (x, y, z)
                )));
            }
            data.index_axis_mut(Axis(3), t).assign(&frame.view().into_dyn());
        }
        Ok(Self { data, affine })
    }

    /// A 3-D volume of `geometry` filled with `value`.
    pub fn filled(geometry: &Geometry, value: f32) -> Self {
        let [x, y, z] = geometry.shape;
        Self::from_3d(Array3::from_elem((x, y, z), value), geometry.affine)
    }

    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    pub fn geometry(&self) -> Geometry {
        let s = self.data.shape();
        Geometry::new([s[0], s[1], s[2]], self.affine)
    }

    pub fn is_series(&self) -> bool {
        self.data.ndim() == 4
    }

    /// Number of frames; a 3-D volume counts as one frame.
    pub fn n_frames(&self) -> usize {
        if self.is_series() {
            self.data.shape()[3]
        } else {
            1
        }
    }

    /// View of frame `t`. For a 3-D volume only `t == 0` is valid.
    pub fn frame(&self, t: usize) -> Result<ArrayView3<'_, f32>, DataError> {
        let frames = self.n_frames();
        if t >= frames {
            return Err(DataError::FrameOutOfRange { index: t, frames });
        }
        let view = if self.is_series() {
            self.data.index_axis(Axis(3), t)
        } else {
            self.data.view()
        };
        view.into_dimensionality::<Ix3>()
            .map_err(|e| DataError::GeometryMismatch(e.to_string()))
    }

    /// The 3-D volume itself, or an error for a series.
    pub fn volume3(&self) -> Result<ArrayView3<'_, f32>, DataError> {
        if self.is_series() {
            return Err(DataError::Dimensionality { expected: "3", found: 4 });
        }
        self.frame(0)
    }

    /// Temporal mean of a series; a 3-D volume is returned unchanged.
    pub fn mean_over_time(&self) -> ImageVolume {
        if !self.is_series() {
            return self.clone();
        }
        match self.data.mean_axis(Axis(3)) {
            Some(mean) => Self { data: mean, affine: self.affine },
            None => ImageVolume::filled(&self.geometry(), 0.0),
        }
    }
}

/// Binary mask on a voxel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    data: Array3<bool>,
    affine: Affine,
}

impl Mask {
    pub fn new(data: Array3<bool>, affine: Affine) -> Self {
        Self { data, affine }
    }

    /// Binarises a 3-D volume: voxels above 0.5 are inside.
    pub fn from_volume(volume: &ImageVolume) -> Result<Self, DataError> {
        let view = volume.volume3()?;
        Ok(Self {
            data: view.mapv(|v| v > 0.5),
            affine: *volume.affine(),
        })
    }

    pub fn to_volume(&self) -> ImageVolume {
        ImageVolume::from_3d(self.data.mapv(|b| if b { 1.0 } else { 0.0 }), self.affine)
    }

    pub fn data(&self) -> &Array3<bool> {
        &self.data
    }

    pub fn geometry(&self) -> Geometry {
        let (x, y, z) = self.data.dim();
        Geometry::new([x, y, z], self.affine)
    }

    pub fn voxel_count(&self) -> usize {
        self.data.iter().filter(|&&b| b).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.data.iter().any(|&b| b)
    }

    /// Errors with `EmptyMask` naming `what` when no voxel is set.
    pub fn ensure_non_empty(&self, what: &str) -> Result<(), DataError> {
        if self.is_empty() {
            Err(DataError::EmptyMask(what.to_string()))
        } else {
            Ok(())
        }
    }

    pub fn intersect(&self, other: &Mask) -> Result<Mask, DataError> {
        self.combine(other, |a, b| a && b)
    }

    pub fn union(&self, other: &Mask) -> Result<Mask, DataError> {
        self.combine(other, |a, b| a || b)
    }

    fn combine(&self, other: &Mask, op: impl Fn(bool, bool) -> bool) -> Result<Mask, DataError> {
        self.geometry().ensure_matches(&other.geometry(), "mask")?;
        let mut data = self.data.clone();
        Zip::from(&mut data).and(&other.data).for_each(|a, &b| *a = op(*a, b));
        Ok(Mask { data, affine: self.affine })
    }
}

/// Integer label image (atlas parcellation or segmentation).
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMap {
    data: Array3<i32>,
    affine: Affine,
}

impl LabelMap {
    pub fn new(data: Array3<i32>, affine: Affine) -> Self {
        Self { data, affine }
    }

    /// Converts a volume whose values must all be integer labels.
    pub fn from_volume(volume: &ImageVolume) -> Result<Self, DataError> {
        let view = volume.volume3()?;
        if let Some(bad) = view.iter().find(|v| (**v - v.round()).abs() > 1e-3 || !v.is_finite()) {
            return Err(DataError::LabelIdentityLost(*bad));
        }
        Ok(Self {
            data: view.mapv(|v| v.round() as i32),
            affine: *volume.affine(),
        })
    }

    pub fn to_volume(&self) -> ImageVolume {
        ImageVolume::from_3d(self.data.mapv(|v| v as f32), self.affine)
    }

    pub fn data(&self) -> &Array3<i32> {
        &self.data
    }

    pub fn geometry(&self) -> Geometry {
        let (x, y, z) = self.data.dim();
        Geometry::new([x, y, z], self.affine)
    }

    /// Distinct non-zero labels present in the map.
    pub fn labels(&self) -> BTreeSet<i32> {
        self.data.iter().copied().filter(|&v| v != 0).collect()
    }
}
