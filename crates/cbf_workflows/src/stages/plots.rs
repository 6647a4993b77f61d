//! Report figures: CBF slice summaries and the CBF carpet plot.

use std::sync::Arc;

use anyhow::{bail, Result};
use asl_types::{ConfoundsTable, Figure, ImageVolume, LabelMap, OutlierIndex};
use pipeline::{PortSpec, PortType, PortValues, Stage, StageContext, StageError, Value};
use tracing::debug;

use crate::filters::{mean, variance};

/// Draws report figures. Rendering backends live behind this trait.
pub trait FigureRenderer: Send + Sync {
    /// Slice summary of a 3-D CBF map over its reference image.
    fn slice_summary(&self, label: &str, cbf: &ImageVolume, reference: &ImageVolume) -> Result<Figure>;

    /// Voxel-by-frame carpet of a CBF series, ordered by segmentation label.
    fn carpet(
        &self,
        label: &str,
        series: &ImageVolume,
        segmentation: &LabelMap,
        confounds: &ConfoundsTable,
        outliers: Option<&OutlierIndex>,
        repetition_time: f64,
    ) -> Result<Figure>;
}

/// Greyscale renderer producing binary PGM images.
#[derive(Debug, Clone, Copy)]
pub struct PgmRenderer {
    /// Carpet rows are subsampled to at most this many voxels.
    pub max_rows: usize,
}

impl Default for PgmRenderer {
    fn default() -> Self {
        Self { max_rows: 512 }
    }
}

fn to_grey(v: f64, lo: f64, hi: f64) -> u8 {
    if !v.is_finite() || hi <= lo {
        return 0;
    }
    (((v - lo) / (hi - lo)).clamp(0.0, 1.0) * 255.0).round() as u8
}

fn finite_range<'a>(values: impl Iterator<Item = &'a f32>) -> (f64, f64) {
    values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v as f64), hi.max(v as f64)))
}

fn pgm(label: &str, width: usize, height: usize, comment: &str, pixels: Vec<u8>) -> Figure {
    let mut bytes = format!("P5\n# {}\n{} {}\n255\n", comment, width, height).into_bytes();
    bytes.extend(pixels);
    Figure { label: label.to_string(), format: "pgm".to_string(), width, height, bytes }
}

impl FigureRenderer for PgmRenderer {
    /// Three axial slices at a quarter, half and three quarters of the
    /// volume, side by side. Zero CBF shows the reference underneath.
    fn slice_summary(&self, label: &str, cbf: &ImageVolume, reference: &ImageVolume) -> Result<Figure> {
        let cbf = cbf.volume3()?;
        let reference = reference.mean_over_time();
        let reference = reference.volume3()?;
        if cbf.dim() != reference.dim() {
            bail!("CBF grid {:?} differs from reference grid {:?}", cbf.dim(), reference.dim());
        }
        let (nx, ny, nz) = cbf.dim();
        let slices = [nz / 4, nz / 2, (3 * nz) / 4];
        let (lo, hi) = finite_range(cbf.iter());
        let (rlo, rhi) = finite_range(reference.iter());

        let width = nx * slices.len();
        let mut pixels = Vec::with_capacity(width * ny);
        for y in (0..ny).rev() {
            for &z in &slices {
                for x in 0..nx {
                    let v = cbf[[x, y, z]];
                    pixels.push(if v != 0.0 {
                        to_grey(v as f64, lo, hi)
                    } else {
                        to_grey(reference[[x, y, z]] as f64, rlo, rhi) / 2
                    });
                }
            }
        }
        Ok(pgm(label, width, ny, &format!("{} range {:.2}..{:.2}", label, lo, hi), pixels))
    }

    /// First row: framewise displacement. Second row: rejected frames in
    /// white. Remaining rows: z-scored voxel time courses.
    fn carpet(
        &self,
        label: &str,
        series: &ImageVolume,
        segmentation: &LabelMap,
        confounds: &ConfoundsTable,
        outliers: Option<&OutlierIndex>,
        repetition_time: f64,
    ) -> Result<Figure> {
        if repetition_time.is_nan() || repetition_time <= 0.0 {
            bail!("repetition time must be positive, got {}", repetition_time);
        }
        let frames = series.n_frames();
        let mut voxels: Vec<((i32, usize), [usize; 3])> = segmentation
            .data()
            .indexed_iter()
            .filter(|(_, l)| **l > 0)
            .enumerate()
            .map(|(n, ((x, y, z), &l))| ((l, n), [x, y, z]))
            .collect();
        voxels.sort_by_key(|(key, _)| *key);
        let step = (voxels.len() / self.max_rows.max(1)).max(1);
        let voxels: Vec<[usize; 3]> = voxels.into_iter().step_by(step).map(|(_, idx)| idx).collect();

        let frame_views = (0..frames).map(|t| series.frame(t)).collect::<Result<Vec<_>, _>>()?;
        let mut pixels = Vec::with_capacity(frames * (voxels.len() + 2));

        let fd: Vec<f64> = match confounds.column("framewise_displacement") {
            Some(col) => (0..frames).map(|t| col.get(t).copied().unwrap_or(f64::NAN)).collect(),
            None => vec![f64::NAN; frames],
        };
        let fd_max = fd.iter().copied().filter(|v| v.is_finite()).fold(0.0, f64::max);
        pixels.extend(fd.iter().map(|&v| to_grey(v, 0.0, fd_max)));
        pixels.extend((0..frames).map(|t| {
            let rejected = outliers.and_then(|o| o.rejected.get(t).copied()).unwrap_or(false);
            if rejected {
                255
            } else {
                0
            }
        }));

        for idx in &voxels {
            let course: Vec<f64> = frame_views.iter().map(|f| f[*idx] as f64).collect();
            let m = mean(&course).unwrap_or(0.0);
            let sd = variance(&course).unwrap_or(0.0).sqrt();
            pixels.extend(course.iter().map(|&v| {
                let z = if sd > 0.0 { (v - m) / sd } else { 0.0 };
                to_grey(z, -2.0, 2.0)
            }));
        }

        let height = voxels.len() + 2;
        let comment = format!("{} TR={:.3}s duration={:.1}s", label, repetition_time, repetition_time * frames as f64);
        Ok(pgm(label, frames, height, &comment, pixels))
    }
}

/// `cbf`, `ref_vol` -> `out_file`.
pub struct CbfSummary {
    renderer: Arc<dyn FigureRenderer>,
    label: String,
}

impl CbfSummary {
    pub fn new(renderer: Arc<dyn FigureRenderer>, label: impl Into<String>) -> Self {
        Self { renderer, label: label.into() }
    }
}

impl Stage for CbfSummary {
    fn kind(&self) -> &'static str {
        "cbf_summary"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::required("cbf", PortType::Volume),
            PortSpec::required("ref_vol", PortType::Volume),
        ]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::output("out_file", PortType::Figure)]
    }

    fn run(&self, inputs: &PortValues, ctx: &StageContext<'_>) -> Result<PortValues, StageError> {
        let cbf = inputs.volume("cbf")?;
        let reference = inputs.volume("ref_vol")?;
        let figure = self.renderer.slice_summary(&self.label, &cbf, &reference)?;
        debug!("{}: rendered {}x{} {}", ctx.node, figure.width, figure.height, figure.format);
        Ok(PortValues::new().with("out_file", Value::Figure(Arc::new(figure))))
    }
}

/// `cbf_ts`, `seg_file`, `conf_file`, optional `score_file` -> `out_file`.
pub struct CbfTsSummary {
    renderer: Arc<dyn FigureRenderer>,
    repetition_time: f64,
}

impl CbfTsSummary {
    pub fn new(renderer: Arc<dyn FigureRenderer>, repetition_time: f64) -> Self {
        Self { renderer, repetition_time }
    }
}

impl Stage for CbfTsSummary {
    fn kind(&self) -> &'static str {
        "cbf_ts_summary"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::required("cbf_ts", PortType::Volume),
            PortSpec::required("seg_file", PortType::Labels),
            PortSpec::required("conf_file", PortType::Confounds),
            PortSpec::optional("score_file", PortType::Outliers),
        ]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::output("out_file", PortType::Figure)]
    }

    fn run(&self, inputs: &PortValues, ctx: &StageContext<'_>) -> Result<PortValues, StageError> {
        let series = inputs.volume("cbf_ts")?;
        let segmentation = inputs.labels("seg_file")?;
        segmentation.geometry().ensure_matches(&series.geometry(), "cbf_ts")?;
        let confounds = inputs.confounds("conf_file")?;
        let outliers = inputs.opt_outliers("score_file")?;
        let figure = self.renderer.carpet(
            "cbfts",
            &series,
            &segmentation,
            &confounds,
            outliers.as_deref(),
            self.repetition_time,
        )?;
        debug!("{}: carpet of {} rows", ctx.node, figure.height);
        Ok(PortValues::new().with("out_file", Value::Figure(Arc::new(figure))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asl_types::Affine;
    use ndarray::{Array3, Array4};

    #[test]
    fn test_slice_summary_layout() {
        let cbf = ImageVolume::from_3d(Array3::from_shape_fn((4, 3, 8), |(x, _, _)| x as f32), Affine::IDENTITY);
        let reference = ImageVolume::from_3d(Array3::from_elem((4, 3, 8), 1.0), Affine::IDENTITY);
        let fig = PgmRenderer::default().slice_summary("cbf", &cbf, &reference).unwrap();
        assert_eq!((fig.width, fig.height), (12, 3));
        assert!(fig.bytes.starts_with(b"P5\n"));
        assert!(fig.bytes.ends_with(&[255]));

        let other = ImageVolume::from_3d(Array3::zeros((2, 2, 2)), Affine::IDENTITY);
        assert!(PgmRenderer::default().slice_summary("cbf", &cbf, &other).is_err());
    }

    #[test]
    fn test_carpet_marks_rejected_frames() {
        let series = ImageVolume::new(
            Array4::from_shape_fn((2, 2, 1, 4), |(x, _, _, t)| (x + t) as f32).into_dyn(),
            Affine::IDENTITY,
        )
        .unwrap();
        let seg = LabelMap::new(Array3::from_shape_fn((2, 2, 1), |(x, y, _)| (x + y) as i32), Affine::IDENTITY);
        let conf = ConfoundsTable::default().with_column("framewise_displacement", vec![f64::NAN, 0.1, 0.2, 0.4]);
        let outliers = OutlierIndex { rejected: vec![false, false, true, false] };
        let fig = PgmRenderer::default()
            .carpet("cbfts", &series, &seg, &conf, Some(&outliers), 4.0)
            .unwrap();
        assert_eq!((fig.width, fig.height), (4, 5));
        let header_len = fig.bytes.len() - fig.width * fig.height;
        let marker_row = &fig.bytes[header_len + 4..header_len + 8];
        assert_eq!(marker_row, &[0, 0, 255, 0]);
        assert!(PgmRenderer::default().carpet("cbfts", &series, &seg, &conf, None, 0.0).is_err());
    }
}
