//! Splits an ASL series into the perfusion-weighted difference series and
//! the M0 reference.

use asl_types::{AslContext, DataError, ImageVolume, VolumeType};
use ndarray::Array3;
use pipeline::{PortSpec, PortType, PortValues, Stage, StageContext, StageError, Value};
use tracing::{debug, info};

use crate::filters::{fwhm_to_sigma, smooth_in_mask};
use crate::stages::require_series;

/// `in_file` (ASL series), `in_mask`, optional `in_context` ->
/// `out_file` (difference series), `out_avg` (M0 reference).
///
/// Without a context the series is read as control/label pairs starting
/// with control. Both outputs are smoothed inside the mask and are zero
/// outside it.
pub struct ExtractCbf {
    dummy_vols: usize,
    fwhm: f64,
}

impl ExtractCbf {
    pub fn new(dummy_vols: usize, fwhm: f64) -> Self {
        Self { dummy_vols, fwhm }
    }
}

fn mean_of(series: &ImageVolume, frames: &[usize]) -> Result<Array3<f32>, DataError> {
    let first = frames.first().ok_or(DataError::NoVolumes("reference"))?;
    let mut acc = series.frame(*first)?.to_owned();
    for &t in &frames[1..] {
        acc += &series.frame(t)?;
    }
    Ok(acc / frames.len() as f32)
}

impl Stage for ExtractCbf {
    fn kind(&self) -> &'static str {
        "extract_cbf"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::required("in_file", PortType::Volume),
            PortSpec::required("in_mask", PortType::Mask),
            PortSpec::optional("in_context", PortType::Context),
        ]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::output("out_file", PortType::Volume),
            PortSpec::output("out_avg", PortType::Volume),
        ]
    }

    fn run(&self, inputs: &PortValues, ctx: &StageContext<'_>) -> Result<PortValues, StageError> {
        let series = inputs.volume("in_file")?;
        let mask = inputs.mask("in_mask")?;
        require_series(&series)?;
        let geometry = series.geometry();
        geometry.ensure_matches(&mask.geometry(), "in_mask")?;

        let frames = series.n_frames();
        let offset = self.dummy_vols.min(frames);
        // Without a context the kept frames alternate starting with control.
        let kept = match inputs.opt_context("in_context")? {
            Some(c) if c.len() != frames => {
                return Err(DataError::ContextLength { context: c.len(), frames }.into())
            }
            Some(c) => c.skip(self.dummy_vols),
            None => AslContext::alternating(frames - offset),
        };
        let shift = |idx: Vec<usize>| idx.into_iter().map(|i| i + offset).collect::<Vec<_>>();

        let controls = shift(kept.indices(VolumeType::Control));
        let labels = shift(kept.indices(VolumeType::Label));
        let deltams = shift(kept.indices(VolumeType::Deltam));
        let m0scans = shift(kept.indices(VolumeType::M0scan));

        let mut differences = Vec::new();
        for (&c, &l) in controls.iter().zip(&labels) {
            differences.push(&series.frame(c)? - &series.frame(l)?);
        }
        for &d in &deltams {
            differences.push(series.frame(d)?.to_owned());
        }
        if differences.is_empty() {
            return Err(DataError::NoVolumes("control/label").into());
        }

        let m0 = if m0scans.is_empty() {
            mean_of(&series, &controls).map_err(|_| DataError::NoVolumes("M0 or control"))?
        } else {
            mean_of(&series, &m0scans)?
        };

        let voxel = geometry.voxel_size();
        let sigma = [0usize, 1, 2].map(|a| {
            if voxel[a] > 0.0 {
                fwhm_to_sigma(self.fwhm) / voxel[a]
            } else {
                0.0
            }
        });
        let smoothed: Vec<Array3<f32>> = differences
            .iter()
            .map(|d| smooth_in_mask(d.view(), mask.data(), sigma))
            .collect();
        let m0 = smooth_in_mask(m0.view(), mask.data(), sigma);

        info!(
            "{}: {} difference volume(s) from {} frames ({} dummy, {} M0)",
            ctx.node,
            smoothed.len(),
            frames,
            offset,
            m0scans.len()
        );
        debug!("{}: smoothing sigma {:?} voxels", ctx.node, sigma);

        Ok(PortValues::new()
            .with("out_file", Value::volume(ImageVolume::from_frames(&smoothed, *series.affine())?))
            .with("out_avg", Value::volume(ImageVolume::from_3d(m0, *series.affine()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asl_types::{Affine, Mask};
    use ndarray::Array4;
    use uuid::Uuid;

    fn series(frames: usize, value: impl Fn(usize) -> f32) -> ImageVolume {
        let data = Array4::from_shape_fn((3, 3, 3, frames), |(_, _, _, t)| value(t));
        ImageVolume::new(data.into_dyn(), Affine::IDENTITY).unwrap()
    }

    fn full_mask() -> Mask {
        Mask::new(Array3::from_elem((3, 3, 3), true), Affine::IDENTITY)
    }

    fn run(stage: ExtractCbf, inputs: PortValues) -> Result<PortValues, StageError> {
        let ctx = StageContext { node: "extractcbf", run_id: Uuid::new_v4() };
        stage.run(&inputs, &ctx)
    }

    #[test]
    fn test_alternating_pairs_with_dummy_volume() {
        // dummy, control, label, control, label
        let asl = series(5, |t| match t {
            0 => 500.0,
            t if t % 2 == 1 => 100.0,
            _ => 98.0,
        });
        let inputs = PortValues::new()
            .with("in_file", Value::volume(asl))
            .with("in_mask", Value::mask(full_mask()));
        let out = run(ExtractCbf::new(1, 5.0), inputs).unwrap();

        let delta = out.volume("out_file").unwrap();
        assert_eq!(delta.n_frames(), 2);
        assert!(delta.data().iter().all(|v| (v - 2.0).abs() < 1e-4));
        let m0 = out.volume("out_avg").unwrap();
        assert!(m0.volume3().unwrap().iter().all(|v| (v - 100.0).abs() < 1e-3));
    }

    #[test]
    fn test_context_with_m0_scan() {
        let asl = series(3, |t| [1000.0, 60.0, 59.0][t]);
        let context = AslContext::parse("m0scan\ncontrol\nlabel").unwrap();
        let inputs = PortValues::new()
            .with("in_file", Value::volume(asl))
            .with("in_mask", Value::mask(full_mask()))
            .with("in_context", Value::Context(std::sync::Arc::new(context)));
        let out = run(ExtractCbf::new(0, 0.0), inputs).unwrap();
        assert_eq!(out.volume("out_avg").unwrap().volume3().unwrap()[[1, 1, 1]], 1000.0);
    }

    #[test]
    fn test_context_length_must_match() {
        let inputs = PortValues::new()
            .with("in_file", Value::volume(series(4, |_| 1.0)))
            .with("in_mask", Value::mask(full_mask()))
            .with("in_context", Value::Context(std::sync::Arc::new(AslContext::alternating(6))));
        assert!(matches!(
            run(ExtractCbf::new(0, 0.0), inputs),
            Err(StageError::Data(DataError::ContextLength { context: 6, frames: 4 }))
        ));
    }
}
