//! Spatially regularised kinetic CBF estimate with partial-volume correction.

use asl_types::{AcquisitionParams, ImageVolume};
use ndarray::{Array3, Zip};
use pipeline::{PortSpec, PortType, PortValues, Stage, StageContext, StageError, Value};
use tracing::{debug, info};

use crate::filters::smooth_in_mask;
use crate::stages::{ensure_geometries, require_series, LAMBDA, T1_BLOOD, UNIT_SCALE};

/// T1 of tissue, used to correct an M0 acquired at a short TR (s).
const T1_TISSUE: f64 = 1.3;
const ALPHA_CONTINUOUS: f64 = 0.85;
const ALPHA_PULSED: f64 = 0.98;
/// Relative perfusion of white matter to grey matter.
const WM_TO_GM_PERFUSION: f64 = 0.4;
/// Partial-volume denominators below this are left uncorrected (zero).
const MIN_PARTIAL_VOLUME: f64 = 0.1;
/// Spatial prior width in voxels.
const PRIOR_SIGMA: f64 = 1.0;

/// Model parameters, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasilParams {
    pub m0scale: f64,
    pub bolus: f64,
    pub m0tr: f64,
    pub tis: f64,
    pub pcasl: bool,
    pub pvc: bool,
}

impl BasilParams {
    /// The bolus is taken from the post-labeling delay and the inversion
    /// time from delay plus labeling duration.
    pub fn from_acquisition(params: &AcquisitionParams) -> Self {
        Self {
            m0scale: params.m0_scale,
            bolus: params.post_labeling_delay,
            m0tr: params.repetition_time,
            tis: params.inversion_time(),
            pcasl: params.scheme.is_continuous(),
            pvc: true,
        }
    }

    fn scale(&self) -> f64 {
        if self.pcasl {
            let delay = (self.tis - self.bolus).max(0.0);
            UNIT_SCALE * LAMBDA * (delay / T1_BLOOD).exp()
                / (2.0 * ALPHA_CONTINUOUS * T1_BLOOD * (1.0 - (-self.bolus / T1_BLOOD).exp()))
        } else {
            UNIT_SCALE * LAMBDA * (self.tis / T1_BLOOD).exp() / (2.0 * ALPHA_PULSED * self.bolus)
        }
    }

    /// Saturation-recovery correction of the M0 reference.
    fn m0_factor(&self) -> f64 {
        self.m0scale / (1.0 - (-self.m0tr / T1_TISSUE).exp())
    }
}

/// `in_file` (difference series), `mzero`, `mask`, `pvgm`, `pvwm`,
/// `out_basename` -> `out_cbfb`, `out_cbfpv`.
pub struct Basil {
    params: BasilParams,
}

impl Basil {
    pub fn new(params: BasilParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &BasilParams {
        &self.params
    }
}

impl Stage for Basil {
    fn kind(&self) -> &'static str {
        "basil"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::required("in_file", PortType::Volume),
            PortSpec::required("mzero", PortType::Volume),
            PortSpec::required("mask", PortType::Mask),
            PortSpec::required("pvgm", PortType::Volume),
            PortSpec::required("pvwm", PortType::Volume),
            PortSpec::required("out_basename", PortType::Path),
        ]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::output("out_cbfb", PortType::Volume),
            PortSpec::output("out_cbfpv", PortType::Volume),
        ]
    }

    fn run(&self, inputs: &PortValues, ctx: &StageContext<'_>) -> Result<PortValues, StageError> {
        let delta = inputs.volume("in_file")?;
        let m0 = inputs.volume("mzero")?;
        let mask = inputs.mask("mask")?;
        let pvgm = inputs.volume("pvgm")?;
        let pvwm = inputs.volume("pvwm")?;
        let basename = inputs.path("out_basename")?;
        require_series(&delta)?;
        ensure_geometries(
            &mask.geometry(),
            &[("in_file", &*delta), ("mzero", &*m0), ("pvgm", &*pvgm), ("pvwm", &*pvwm)],
        )?;
        debug!("{}: output basename {}", ctx.node, basename.display());

        let mean_delta = delta.mean_over_time();
        let scale = self.params.scale();
        let m0_factor = self.params.m0_factor();
        let mut raw = Array3::<f32>::zeros(mask.data().raw_dim());
        Zip::from(&mut raw)
            .and(&mean_delta.volume3()?)
            .and(&m0.volume3()?)
            .and(mask.data())
            .for_each(|out, &dm, &m, &inside| {
                let m = m as f64 * m0_factor;
                if inside && m > 0.0 {
                    *out = (scale * dm as f64 / m) as f32;
                }
            });
        let cbf = smooth_in_mask(raw.view(), mask.data(), [PRIOR_SIGMA; 3]);

        let mut pv = Array3::<f32>::zeros(cbf.raw_dim());
        if self.params.pvc {
            Zip::from(&mut pv)
                .and(&cbf)
                .and(&pvgm.volume3()?)
                .and(&pvwm.volume3()?)
                .for_each(|out, &c, &gm, &wm| {
                    let denom = gm as f64 + WM_TO_GM_PERFUSION * wm as f64;
                    if denom > MIN_PARTIAL_VOLUME {
                        *out = (c as f64 / denom) as f32;
                    }
                });
        } else {
            pv.assign(&cbf);
        }

        info!(
            "{}: kinetic estimate from {} frame(s), pcasl={} pvc={}",
            ctx.node,
            delta.n_frames(),
            self.params.pcasl,
            self.params.pvc
        );
        let affine = *delta.affine();
        Ok(PortValues::new()
            .with("out_cbfb", Value::volume(ImageVolume::from_3d(cbf, affine)))
            .with("out_cbfpv", Value::volume(ImageVolume::from_3d(pv, affine))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asl_types::{Affine, LabelingScheme, Mask};
    use ndarray::Array4;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn acquisition() -> AcquisitionParams {
        AcquisitionParams {
            repetition_time: 4.0,
            post_labeling_delay: 1.5,
            labeling_duration: 1.8,
            scheme: LabelingScheme::Continuous,
            m0_scale: 1.0,
        }
    }

    #[test]
    fn test_parameters_follow_metadata() {
        let p = BasilParams::from_acquisition(&acquisition());
        assert_eq!(p.bolus, 1.5);
        assert_eq!(p.m0tr, 4.0);
        assert!((p.tis - 3.3).abs() < 1e-12);
        assert!(p.pcasl);
        assert!(p.pvc);
    }

    #[test]
    fn test_partial_volume_correction() {
        let shape = (2, 2, 1);
        let delta = Array4::from_elem((2, 2, 1, 2), 1.0f32);
        let pvgm = Array3::from_shape_fn(shape, |(i, j, _)| if i == 0 && j == 0 { 0.0 } else { 0.5 });
        let inputs = PortValues::new()
            .with("in_file", Value::volume(ImageVolume::new(delta.into_dyn(), Affine::IDENTITY).unwrap()))
            .with("mzero", Value::volume(ImageVolume::from_3d(Array3::from_elem(shape, 50.0), Affine::IDENTITY)))
            .with("mask", Value::mask(Mask::new(Array3::from_elem(shape, true), Affine::IDENTITY)))
            .with("pvgm", Value::volume(ImageVolume::from_3d(pvgm, Affine::IDENTITY)))
            .with("pvwm", Value::volume(ImageVolume::from_3d(Array3::zeros(shape), Affine::IDENTITY)))
            .with("out_basename", Value::Path(PathBuf::from("/data/sub-01/perf")));
        let ctx = StageContext { node: "basilcbf", run_id: Uuid::new_v4() };
        let out = Basil::new(BasilParams::from_acquisition(&acquisition())).run(&inputs, &ctx).unwrap();

        let cbf = out.volume("out_cbfb").unwrap();
        let cbf = cbf.volume3().unwrap();
        let pv = out.volume("out_cbfpv").unwrap();
        let pv = pv.volume3().unwrap();
        assert!(cbf[[1, 1, 0]] > 0.0);
        assert_eq!(pv[[0, 0, 0]], 0.0);
        assert!((pv[[1, 1, 0]] - 2.0 * cbf[[1, 1, 0]]).abs() < 1e-3);
    }
}
