//! Processing stages of the CBF workflows.

pub mod apply_transforms;
pub mod basil;
pub mod compute_cbf;
pub mod datasink;
pub mod extract_cbf;
pub mod plots;
pub mod qc;
pub mod refine_mask;
pub mod roi_quant;
pub mod score_scrub;

pub use apply_transforms::{ApplyTransforms, ImageKind, TemplateImage};
pub use basil::{Basil, BasilParams};
pub use compute_cbf::ComputeCbf;
pub use datasink::{DerivativeSink, DerivativesDataSink, DescriptorTags, MemorySink};
pub use extract_cbf::ExtractCbf;
pub use plots::{CbfSummary, CbfTsSummary, FigureRenderer, PgmRenderer};
pub use qc::ComputeQc;
pub use refine_mask::{MaskPolicy, RefineMask};
pub use roi_quant::RoiQuant;
pub use score_scrub::{ScoreScrub, WeightFunction};

use asl_types::{DataError, Geometry, ImageVolume};

/// Blood-brain partition coefficient (ml/g).
pub(crate) const LAMBDA: f64 = 0.9;
/// Longitudinal relaxation time of arterial blood at 3T (s).
pub(crate) const T1_BLOOD: f64 = 1.65;
/// mL/g/s to mL/100g/min.
pub(crate) const UNIT_SCALE: f64 = 6000.0;

/// Requires `volume` to be a 4-D series.
pub(crate) fn require_series(volume: &ImageVolume) -> Result<(), DataError> {
    if volume.is_series() {
        Ok(())
    } else {
        Err(DataError::Dimensionality { expected: "4", found: 3 })
    }
}

/// Checks every named volume against `geometry`.
pub(crate) fn ensure_geometries(
    geometry: &Geometry,
    volumes: &[(&str, &ImageVolume)],
) -> Result<(), DataError> {
    for (what, volume) in volumes {
        geometry.ensure_matches(&volume.geometry(), what)?;
    }
    Ok(())
}
