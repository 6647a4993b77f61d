//! Outlier-robust CBF: frame rejection followed by a robust voxelwise mean.

use asl_types::{DataError, ImageVolume, OutlierIndex};
use ndarray::{Array3, Zip};
use pipeline::{PortSpec, PortType, PortValues, Stage, StageContext, StageError, Value};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::filters::{mad, mean, median};
use crate::stages::{ensure_geometries, require_series};

/// Frames whose grey-matter mean deviates from the median by more than this
/// many MADs are rejected.
const REJECTION_MADS: f64 = 2.5;
/// MAD to standard deviation under normality.
const MAD_TO_SD: f64 = 1.4826;
const MAX_ITERATIONS: usize = 50;
const TOLERANCE: f64 = 1e-6;

/// Robust weighting function of the reweighted mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WeightFunction {
    #[default]
    Huber,
    Bisquare,
    Cauchy,
}

impl WeightFunction {
    /// Tuning constant giving 95% efficiency under normal errors.
    fn tuning(self) -> f64 {
        match self {
            WeightFunction::Huber => 1.345,
            WeightFunction::Bisquare => 4.685,
            WeightFunction::Cauchy => 2.385,
        }
    }

    /// Weight of a residual already divided by scale and tuning constant.
    pub fn weight(self, u: f64) -> f64 {
        let a = u.abs();
        match self {
            WeightFunction::Huber => {
                if a <= 1.0 {
                    1.0
                } else {
                    1.0 / a
                }
            }
            WeightFunction::Bisquare => {
                if a < 1.0 {
                    (1.0 - a * a).powi(2)
                } else {
                    0.0
                }
            }
            WeightFunction::Cauchy => 1.0 / (1.0 + a * a),
        }
    }

    /// Iteratively reweighted location estimate of `samples`.
    pub fn robust_mean(self, samples: &[f64]) -> Option<f64> {
        let mut mu = median(samples)?;
        let scale = mad(samples)? * MAD_TO_SD;
        if scale <= f64::EPSILON {
            return Some(mu);
        }
        let c = self.tuning() * scale;
        for _ in 0..MAX_ITERATIONS {
            let (mut num, mut den) = (0.0, 0.0);
            for &x in samples {
                let w = self.weight((x - mu) / c);
                num += w * x;
                den += w;
            }
            if den <= f64::EPSILON {
                break;
            }
            let next = num / den;
            let done = (next - mu).abs() < TOLERANCE;
            mu = next;
            if done {
                break;
            }
        }
        Some(mu)
    }
}

/// `in_file` (CBF series), `in_greyM`, `in_whiteM`, `in_csf`, `in_mask` ->
/// `out_score`, `out_avgscore`, `out_scoreindex`, `out_scrub`.
///
/// SCORE rejects frames whose mean grey-matter CBF is an outlier; SCRUB then
/// takes a robust voxelwise mean of the retained frames. Both always run.
pub struct ScoreScrub {
    threshold: f64,
    weight: WeightFunction,
}

impl ScoreScrub {
    pub fn new(threshold: f64, weight: WeightFunction) -> Self {
        Self { threshold, weight }
    }

    fn tissue_mask(&self, prob: &ImageVolume, mask: &Array3<bool>) -> Result<Array3<bool>, DataError> {
        let prob = prob.volume3()?;
        let threshold = self.threshold as f32;
        let mut out = mask.clone();
        Zip::from(&mut out).and(&prob).for_each(|m, &p| *m = *m && p > threshold);
        Ok(out)
    }

    /// Rejection flag per frame.
    fn score(&self, series: &ImageVolume, grey: &Array3<bool>) -> Result<Vec<bool>, DataError> {
        let mut means = Vec::with_capacity(series.n_frames());
        for t in 0..series.n_frames() {
            let frame = series.frame(t)?;
            let values: Vec<f64> = frame
                .iter()
                .zip(grey.iter())
                .filter(|(_, g)| **g)
                .map(|(&v, _)| v as f64)
                .collect();
            means.push(mean(&values).ok_or_else(|| DataError::EmptyMask("grey matter".into()))?);
        }
        let (Some(centre), Some(spread)) = (median(&means), mad(&means)) else {
            return Err(DataError::NoVolumes("CBF"));
        };
        if spread <= f64::EPSILON {
            return Ok(vec![false; means.len()]);
        }
        Ok(means
            .iter()
            .map(|m| (m - centre).abs() > REJECTION_MADS * spread)
            .collect())
    }
}

impl Stage for ScoreScrub {
    fn kind(&self) -> &'static str {
        "score_scrub"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::required("in_file", PortType::Volume),
            PortSpec::required("in_greyM", PortType::Volume),
            PortSpec::required("in_whiteM", PortType::Volume),
            PortSpec::required("in_csf", PortType::Volume),
            PortSpec::required("in_mask", PortType::Mask),
        ]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::output("out_score", PortType::Volume),
            PortSpec::output("out_avgscore", PortType::Volume),
            PortSpec::output("out_scoreindex", PortType::Outliers),
            PortSpec::output("out_scrub", PortType::Volume),
        ]
    }

    fn run(&self, inputs: &PortValues, ctx: &StageContext<'_>) -> Result<PortValues, StageError> {
        let series = inputs.volume("in_file")?;
        let grey = inputs.volume("in_greyM")?;
        let white = inputs.volume("in_whiteM")?;
        let csf = inputs.volume("in_csf")?;
        let mask = inputs.mask("in_mask")?;
        require_series(&series)?;
        ensure_geometries(
            &mask.geometry(),
            &[("in_file", &*series), ("in_greyM", &*grey), ("in_whiteM", &*white), ("in_csf", &*csf)],
        )?;

        let grey_mask = self.tissue_mask(&grey, mask.data())?;
        let white_voxels = self.tissue_mask(&white, mask.data())?.iter().filter(|&&b| b).count();
        let csf_voxels = self.tissue_mask(&csf, mask.data())?.iter().filter(|&&b| b).count();
        if !grey_mask.iter().any(|&b| b) {
            return Err(DataError::EmptyMask(format!("grey matter above {}", self.threshold)).into());
        }

        let rejected = self.score(&series, &grey_mask)?;
        let kept: Vec<usize> = (0..rejected.len()).filter(|&t| !rejected[t]).collect();
        if kept.len() < rejected.len() / 2 {
            warn!("{}: SCORE rejected {} of {} frames", ctx.node, rejected.len() - kept.len(), rejected.len());
        }
        let kept_frames = kept
            .iter()
            .map(|&t| series.frame(t).map(|f| f.to_owned()))
            .collect::<Result<Vec<_>, _>>()?;
        let score = ImageVolume::from_frames(&kept_frames, *series.affine())?;
        let avg_score = score.mean_over_time();

        let avg_view = avg_score.volume3()?;
        let mut scrub = Array3::<f32>::zeros(avg_view.raw_dim());
        let mut samples = vec![0.0; kept_frames.len()];
        for ((idx, out), &inside) in scrub.indexed_iter_mut().zip(mask.data().iter()) {
            if !inside {
                continue;
            }
            for (s, frame) in samples.iter_mut().zip(&kept_frames) {
                *s = frame[idx] as f64;
            }
            if let Some(mu) = self.weight.robust_mean(&samples) {
                *out = mu as f32;
            }
        }

        info!(
            "{}: kept {}/{} frames; tissue voxels gm={} wm={} csf={}",
            ctx.node,
            kept.len(),
            rejected.len(),
            grey_mask.iter().filter(|&&b| b).count(),
            white_voxels,
            csf_voxels
        );

        Ok(PortValues::new()
            .with("out_score", Value::volume(score))
            .with("out_avgscore", Value::volume(avg_score))
            .with("out_scoreindex", Value::Outliers(std::sync::Arc::new(OutlierIndex { rejected })))
            .with("out_scrub", Value::volume(ImageVolume::from_3d(scrub, *series.affine()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asl_types::{Affine, Mask};
    use ndarray::Array4;
    use uuid::Uuid;

    #[test]
    fn test_weight_functions() {
        assert_eq!(WeightFunction::Huber.weight(0.5), 1.0);
        assert_eq!(WeightFunction::Huber.weight(-4.0), 0.25);
        assert_eq!(WeightFunction::Bisquare.weight(1.5), 0.0);
        assert_eq!(WeightFunction::Cauchy.weight(1.0), 0.5);
    }

    #[test]
    fn test_robust_mean_resists_outlier() {
        let samples = [50.0, 51.0, 49.0, 50.5, 49.5, 400.0];
        for w in [WeightFunction::Huber, WeightFunction::Bisquare, WeightFunction::Cauchy] {
            let mu = w.robust_mean(&samples).unwrap();
            assert!((mu - 50.0).abs() < 2.0, "{:?} gave {}", w, mu);
        }
        assert_eq!(WeightFunction::Huber.robust_mean(&[]), None);
    }

    #[test]
    fn test_spike_frame_is_rejected() {
        let frames = 8;
        let series = Array4::from_shape_fn((3, 3, 1, frames), |(i, _, _, t)| {
            let base = 40.0 + i as f32 + (t % 3) as f32 * 0.5;
            if t == 5 {
                base + 300.0
            } else {
                base
            }
        });
        let grey = ImageVolume::from_3d(Array3::from_elem((3, 3, 1), 0.9), Affine::IDENTITY);
        let zero = ImageVolume::from_3d(Array3::zeros((3, 3, 1)), Affine::IDENTITY);
        let inputs = PortValues::new()
            .with("in_file", Value::volume(ImageVolume::new(series.into_dyn(), Affine::IDENTITY).unwrap()))
            .with("in_greyM", Value::volume(grey))
            .with("in_whiteM", Value::volume(zero.clone()))
            .with("in_csf", Value::volume(zero))
            .with("in_mask", Value::mask(Mask::new(Array3::from_elem((3, 3, 1), true), Affine::IDENTITY)));
        let ctx = StageContext { node: "scorescrub", run_id: Uuid::new_v4() };
        let out = ScoreScrub::new(0.7, WeightFunction::Huber).run(&inputs, &ctx).unwrap();

        let index = out.outliers("out_scoreindex").unwrap();
        assert_eq!(index.n_rejected(), 1);
        assert!(index.rejected[5]);
        assert_eq!(out.volume("out_score").unwrap().n_frames(), frames - 1);
        let scrub = out.volume("out_scrub").unwrap();
        assert!(scrub.volume3().unwrap().iter().all(|&v| v < 50.0));
    }

    #[test]
    fn test_no_grey_matter_is_an_empty_mask_error() {
        let series = Array4::from_elem((2, 2, 1, 3), 1.0f32);
        let zero = ImageVolume::from_3d(Array3::zeros((2, 2, 1)), Affine::IDENTITY);
        let inputs = PortValues::new()
            .with("in_file", Value::volume(ImageVolume::new(series.into_dyn(), Affine::IDENTITY).unwrap()))
            .with("in_greyM", Value::volume(zero.clone()))
            .with("in_whiteM", Value::volume(zero.clone()))
            .with("in_csf", Value::volume(zero))
            .with("in_mask", Value::mask(Mask::new(Array3::from_elem((2, 2, 1), true), Affine::IDENTITY)));
        let ctx = StageContext { node: "scorescrub", run_id: Uuid::new_v4() };
        assert!(matches!(
            ScoreScrub::new(0.7, WeightFunction::Huber).run(&inputs, &ctx),
            Err(StageError::Data(DataError::EmptyMask(_)))
        ));
    }
}
