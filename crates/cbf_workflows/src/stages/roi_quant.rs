//! Mean CBF per atlas region.

use std::collections::BTreeMap;
use std::sync::Arc;

use asl_types::{AtlasDefinition, AtlasName, CbfVariant, DataError, ImageVolume, LabelMap, RegionRow, RegionSummary};
use pipeline::{PortSpec, PortType, PortValues, Stage, StageContext, StageError, Value};
use tracing::debug;

use crate::templates::TemplateRegistry;

/// `atlasfile` (atlas projected into functional space), `in_cbf` -> `stats`.
///
/// The region table comes from the registry, so the output always has one
/// row per atlas region. Regions without voxels in the field of view get a
/// NaN mean.
pub struct RoiQuant {
    atlas: AtlasName,
    variant: CbfVariant,
    registry: Arc<TemplateRegistry>,
}

impl RoiQuant {
    pub fn new(atlas: AtlasName, variant: CbfVariant, registry: Arc<TemplateRegistry>) -> Self {
        Self { atlas, variant, registry }
    }
}

/// Reduces `cbf` over every region of `atlas` using the projected `labels`.
pub fn summarize(
    atlas: &AtlasDefinition,
    variant: CbfVariant,
    labels: &LabelMap,
    cbf: &ImageVolume,
) -> Result<RegionSummary, DataError> {
    labels.geometry().ensure_matches(&cbf.geometry(), "CBF map")?;
    let values = cbf.volume3()?;
    let mut sums: BTreeMap<i32, (f64, usize)> = BTreeMap::new();
    for (&label, &v) in labels.data().iter().zip(values.iter()) {
        if label == 0 {
            continue;
        }
        if !atlas.contains_label(label) {
            return Err(DataError::UnknownLabel(label));
        }
        if v.is_finite() {
            let entry = sums.entry(label).or_insert((0.0, 0));
            entry.0 += v as f64;
            entry.1 += 1;
        }
    }
    let rows = atlas
        .regions
        .iter()
        .map(|region| {
            let (sum, voxels) = sums.get(&region.id).copied().unwrap_or((0.0, 0));
            RegionRow {
                id: region.id,
                name: region.name.clone(),
                mean: if voxels == 0 { f64::NAN } else { sum / voxels as f64 },
                voxels,
            }
        })
        .collect();
    Ok(RegionSummary { atlas: atlas.name, variant, rows })
}

impl Stage for RoiQuant {
    fn kind(&self) -> &'static str {
        "roi_quant"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::required("atlasfile", PortType::Labels),
            PortSpec::required("in_cbf", PortType::Volume),
        ]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::output("stats", PortType::Regions)]
    }

    fn run(&self, inputs: &PortValues, ctx: &StageContext<'_>) -> Result<PortValues, StageError> {
        let labels = inputs.labels("atlasfile")?;
        let cbf = inputs.volume("in_cbf")?;
        let atlas = self.registry.atlas(self.atlas)?;
        let summary = summarize(&atlas, self.variant, &labels, &cbf)?;
        debug!(
            "{}: {} regions of {} for {}, {} empty",
            ctx.node,
            summary.rows.len(),
            self.atlas,
            self.variant,
            summary.rows.iter().filter(|r| r.voxels == 0).count()
        );
        Ok(PortValues::new().with("stats", Value::Regions(Arc::new(summary))))
    }
}
