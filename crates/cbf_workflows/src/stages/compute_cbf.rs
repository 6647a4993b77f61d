//! Basic single-compartment CBF model.

use asl_types::{AcquisitionParams, ImageVolume, LabelingScheme};
use ndarray::{Array3, Zip};
use pipeline::{PortSpec, PortType, PortValues, Stage, StageContext, StageError, Value};
use tracing::info;

use crate::stages::{ensure_geometries, require_series, LAMBDA, T1_BLOOD, UNIT_SCALE};

/// Labeling efficiency of continuous / pseudo-continuous labeling.
const ALPHA_CONTINUOUS: f64 = 0.85;
/// Inversion efficiency of pulsed labeling.
const ALPHA_PULSED: f64 = 0.98;

/// `in_cbf` (difference series), `in_m0file`, `in_mask` -> `out_cbf`
/// (per-frame CBF, ml/100g/min) and `out_mean`.
pub struct ComputeCbf {
    params: AcquisitionParams,
}

impl ComputeCbf {
    pub fn new(params: AcquisitionParams) -> Self {
        Self { params }
    }

    /// Factor turning `dM / M0` into CBF.
    pub fn scale(&self) -> f64 {
        let p = &self.params;
        match p.scheme {
            LabelingScheme::Continuous => {
                let tau = p.labeling_duration;
                UNIT_SCALE * LAMBDA * (p.post_labeling_delay / T1_BLOOD).exp()
                    / (2.0 * ALPHA_CONTINUOUS * T1_BLOOD * (1.0 - (-tau / T1_BLOOD).exp()))
            }
            LabelingScheme::Pulsed => {
                UNIT_SCALE * LAMBDA * (p.post_labeling_delay / T1_BLOOD).exp()
                    / (2.0 * ALPHA_PULSED * p.labeling_duration)
            }
        }
    }
}

impl Stage for ComputeCbf {
    fn kind(&self) -> &'static str {
        "compute_cbf"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::required("in_cbf", PortType::Volume),
            PortSpec::required("in_m0file", PortType::Volume),
            PortSpec::required("in_mask", PortType::Mask),
        ]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::output("out_cbf", PortType::Volume),
            PortSpec::output("out_mean", PortType::Volume),
        ]
    }

    fn run(&self, inputs: &PortValues, ctx: &StageContext<'_>) -> Result<PortValues, StageError> {
        let delta = inputs.volume("in_cbf")?;
        let m0 = inputs.volume("in_m0file")?;
        let mask = inputs.mask("in_mask")?;
        require_series(&delta)?;
        let geometry = mask.geometry();
        ensure_geometries(&geometry, &[("in_cbf", &*delta), ("in_m0file", &*m0)])?;

        let m0 = m0.volume3()?;
        let scale = self.scale();
        let m0_scale = self.params.m0_scale;
        let mut frames = Vec::with_capacity(delta.n_frames());
        for t in 0..delta.n_frames() {
            let mut cbf = Array3::<f32>::zeros(delta.frame(t)?.raw_dim());
            Zip::from(&mut cbf)
                .and(&delta.frame(t)?)
                .and(&m0)
                .and(mask.data())
                .for_each(|out, &dm, &m, &inside| {
                    let m = m as f64 * m0_scale;
                    if inside && m > 0.0 {
                        *out = (scale * dm as f64 / m) as f32;
                    }
                });
            frames.push(cbf);
        }

        let series = ImageVolume::from_frames(&frames, *delta.affine())?;
        let mean = series.mean_over_time();
        info!("{}: {} CBF frame(s), scheme {:?}", ctx.node, frames.len(), self.params.scheme);
        Ok(PortValues::new()
            .with("out_cbf", Value::volume(series))
            .with("out_mean", Value::volume(mean)))
    }
}
