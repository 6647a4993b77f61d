//! Quality-control metrics of one run.

use std::collections::BTreeMap;
use std::sync::Arc;

use asl_types::{
    CbfVariant, ConfoundsTable, DataError, ImageVolume, Mask, MotionSummary, OverlapMetrics,
    QcRecord, RunKey, VariantQuality,
};
use ndarray::{Array3, ArrayView3};
use pipeline::{PortSpec, PortType, PortValues, Stage, StageContext, StageError, Value};
use tracing::{debug, info, warn};

use crate::filters::{fwhm_to_sigma, mean, pearson, smooth_in_mask, variance};
use crate::stages::ensure_geometries;

/// Tissue probability above which a voxel counts as that tissue.
const TISSUE_THRESHOLD: f32 = 0.7;
/// Smoothing applied before the QEI (mm FWHM).
const QEI_FWHM: f64 = 5.0;

/// Parameters of the three QEI component functions.
const QEI_CV: [f64; 2] = [0.054, 0.9272];
const QEI_NEG_GM: [f64; 2] = [2.8478, 0.5196];
const QEI_STRUCTURE: [f64; 2] = [3.0126, 2.4419];

/// Input port carrying each variant's mean map.
pub fn variant_port(variant: CbfVariant) -> &'static str {
    match variant {
        CbfVariant::Cbf => "in_meancbf",
        CbfVariant::Score => "in_avgscore",
        CbfVariant::Scrub => "in_scrub",
        CbfVariant::Basil => "in_basil",
        CbfVariant::Pvc => "in_pvc",
    }
}

fn overlap(a: &Mask, b: &Mask, what: &str) -> Result<OverlapMetrics, DataError> {
    a.geometry().ensure_matches(&b.geometry(), what)?;
    a.ensure_non_empty(what)?;
    b.ensure_non_empty(what)?;
    let (na, nb) = (a.voxel_count() as f64, b.voxel_count() as f64);
    let both = a.intersect(b)?.voxel_count() as f64;
    let either = a.union(b)?.voxel_count() as f64;
    let as_f64 = |m: &Mask| m.data().iter().map(|&v| if v { 1.0 } else { 0.0 }).collect::<Vec<f64>>();
    Ok(OverlapMetrics {
        dice: 2.0 * both / (na + nb),
        jaccard: both / either,
        cross_correlation: pearson(&as_f64(a), &as_f64(b)).unwrap_or(1.0),
        coverage: both / na.min(nb),
    })
}

fn motion(confounds: &ConfoundsTable) -> MotionSummary {
    let column = |name: &str| {
        confounds.finite_mean(name).unwrap_or_else(|| {
            warn!("Confounds have no usable '{}' column", name);
            f64::NAN
        })
    };
    MotionSummary {
        fd: column("framewise_displacement"),
        rmsd: column("rmsd"),
    }
}

fn threshold(prob: ArrayView3<'_, f32>) -> Array3<bool> {
    prob.mapv(|p| p > TISSUE_THRESHOLD)
}

fn values_in(map: &Array3<f32>, region: &Array3<bool>) -> Vec<f64> {
    map.iter()
        .zip(region.iter())
        .filter(|(_, r)| **r)
        .map(|(&v, _)| v as f64)
        .collect()
}

/// Tissue maps of the run in functional space, thresholded once.
struct Tissues {
    grey_prob: Array3<f32>,
    white_prob: Array3<f32>,
    grey: Array3<bool>,
    white: Array3<bool>,
    csf: Array3<bool>,
}

impl Tissues {
    /// Percentage of grey-matter voxels with negative CBF.
    fn negative_gm_percent(&self, cbf: &Array3<f32>) -> f64 {
        let values = values_in(cbf, &self.grey);
        if values.is_empty() {
            return 0.0;
        }
        100.0 * values.iter().filter(|&&v| v < 0.0).count() as f64 / values.len() as f64
    }

    /// Quality evaluation index; `None` when the map has no variance to
    /// compare with the tissue structure.
    fn qei(&self, smoothed: &Array3<f32>) -> Option<f64> {
        let mut pbcf = Vec::new();
        let mut cbf = Vec::new();
        for ((&c, &g), &w) in smoothed.iter().zip(&self.grey_prob).zip(&self.white_prob) {
            let p = 2.5 * g as f64 + w as f64;
            if c != 0.0 && c.is_finite() && p.is_finite() {
                cbf.push(c as f64);
                pbcf.push(p);
            }
        }
        let structure = pearson(&cbf, &pbcf)?.max(0.0);

        let pooled = [&self.grey, &self.white, &self.csf]
            .iter()
            .map(|region| {
                let v = values_in(smoothed, region);
                let n = v.len() as f64;
                ((n - 1.0).max(0.0) * variance(&v).unwrap_or(0.0), n)
            })
            .fold((0.0, 0.0), |(s, n), (sv, nv)| (s + sv, n + nv));
        let dof = pooled.1 - 3.0;
        if dof <= 0.0 {
            return None;
        }
        let grey_values = values_in(smoothed, &self.grey);
        let grey_mean = mean(&grey_values)?;
        let cv = (pooled.0 / dof) / grey_mean.abs();
        let neg = grey_values.iter().filter(|&&v| v < 0.0).count() as f64 / grey_values.len() as f64;

        let decay = |x: [f64; 2], v: f64| (-x[0] * v.powf(x[1])).exp();
        let q = [decay(QEI_CV, cv), decay(QEI_NEG_GM, neg), 1.0 - decay(QEI_STRUCTURE, structure)];
        Some(q.iter().product::<f64>().cbrt())
    }
}

/// Computes the [`QcRecord`] of a run.
///
/// Every CBF variant port is optional: a missing variant leaves its metrics
/// out of the record. Masks, tissue maps and confounds are required.
pub struct ComputeQc {
    key: RunKey,
}

impl ComputeQc {
    pub fn new(key: RunKey) -> Self {
        Self { key }
    }
}

impl Stage for ComputeQc {
    fn kind(&self) -> &'static str {
        "compute_qc"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        let mut ports = vec![
            PortSpec::required("in_boldmask", PortType::Mask),
            PortSpec::required("in_t1mask", PortType::Mask),
            PortSpec::required("in_boldmaskstd", PortType::Mask),
            PortSpec::required("in_templatemask", PortType::Mask),
            PortSpec::required("in_greyM", PortType::Volume),
            PortSpec::required("in_whiteM", PortType::Volume),
            PortSpec::required("in_csf", PortType::Volume),
            PortSpec::required("in_confmat", PortType::Confounds),
        ];
        ports.extend(CbfVariant::ALL.iter().map(|&v| PortSpec::optional(variant_port(v), PortType::Volume)));
        ports
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::output("qc_file", PortType::Qc)]
    }

    fn run(&self, inputs: &PortValues, ctx: &StageContext<'_>) -> Result<PortValues, StageError> {
        let bold_mask = inputs.mask("in_boldmask")?;
        let t1_mask = inputs.mask("in_t1mask")?;
        let std_mask = inputs.mask("in_boldmaskstd")?;
        let template_mask = inputs.mask("in_templatemask")?;
        let grey = inputs.volume("in_greyM")?;
        let white = inputs.volume("in_whiteM")?;
        let csf = inputs.volume("in_csf")?;
        let confounds = inputs.confounds("in_confmat")?;

        let geometry = bold_mask.geometry();
        ensure_geometries(&geometry, &[("in_greyM", &*grey), ("in_whiteM", &*white), ("in_csf", &*csf)])?;
        let coregistration = overlap(&bold_mask, &t1_mask, "coregistration masks")?;
        let normalization = overlap(&std_mask, &template_mask, "normalization masks")?;

        let tissues = Tissues {
            grey_prob: grey.volume3()?.to_owned(),
            white_prob: white.volume3()?.to_owned(),
            grey: threshold(grey.volume3()?),
            white: threshold(white.volume3()?),
            csf: threshold(csf.volume3()?),
        };
        let voxel = geometry.voxel_size();
        let sigma = [0usize, 1, 2].map(|a| if voxel[a] > 0.0 { fwhm_to_sigma(QEI_FWHM) / voxel[a] } else { 0.0 });

        let mut variants = BTreeMap::new();
        for variant in CbfVariant::ALL {
            let Some(map) = inputs.opt_volume(variant_port(variant))? else {
                debug!("{}: {} not available, omitting its metrics", ctx.node, variant);
                continue;
            };
            let map: Arc<ImageVolume> = if map.is_series() { Arc::new(map.mean_over_time()) } else { map };
            if let Err(e) = geometry.ensure_matches(&map.geometry(), variant.label()) {
                warn!("{}: {}, omitting its metrics", ctx.node, e);
                continue;
            }
            let values = map.volume3()?.to_owned();
            let smoothed = smooth_in_mask(values.view(), bold_mask.data(), sigma);
            let qei = tissues.qei(&smoothed);
            if qei.is_none() {
                warn!("{}: {} map has no usable variance, QEI omitted", ctx.node, variant);
            }
            variants.insert(
                variant,
                VariantQuality { qei, negative_gm_percent: tissues.negative_gm_percent(&values) },
            );
        }

        let record = QcRecord {
            key: self.key.clone(),
            motion: motion(&confounds),
            coregistration,
            normalization,
            variants,
        };
        info!(
            "{}: QC for {} with {} variant(s), coreg dice {:.3}",
            ctx.node,
            self.key,
            record.variants.len(),
            record.coregistration.dice
        );
        Ok(PortValues::new().with("qc_file", Value::Qc(Arc::new(record))))
    }
}
