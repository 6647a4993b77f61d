//! Reconciles the anatomical brain mask with the functional one.

use std::sync::Arc;

use asl_types::Mask;
use pipeline::{PortSpec, PortType, PortValues, Stage, StageContext, StageError, Value};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::resample::{Interpolation, Resampler};

/// How the projected anatomical mask is combined with the functional mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MaskPolicy {
    #[default]
    Intersection,
    Union,
}

/// `in_t1mask`, `in_boldmask`, `transforms` -> `out_mask`.
pub struct RefineMask {
    resampler: Arc<dyn Resampler>,
    policy: MaskPolicy,
}

impl RefineMask {
    pub fn new(resampler: Arc<dyn Resampler>, policy: MaskPolicy) -> Self {
        Self { resampler, policy }
    }
}

impl Stage for RefineMask {
    fn kind(&self) -> &'static str {
        "refine_mask"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::required("in_t1mask", PortType::Mask),
            PortSpec::required("in_boldmask", PortType::Mask),
            PortSpec::required("transforms", PortType::Transforms),
        ]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::output("out_mask", PortType::Mask)]
    }

    fn run(&self, inputs: &PortValues, ctx: &StageContext<'_>) -> Result<PortValues, StageError> {
        let t1_mask = inputs.mask("in_t1mask")?;
        let bold_mask = inputs.mask("in_boldmask")?;
        let chain = inputs.transforms("transforms")?;

        let projected = self.resampler.resample(
            &t1_mask.to_volume(),
            &bold_mask.geometry(),
            &chain,
            Interpolation::NearestNeighbor,
            0.0,
        )?;
        let projected = Mask::from_volume(&projected)?;
        projected.ensure_non_empty("anatomical mask projected into functional space")?;

        let refined = match self.policy {
            MaskPolicy::Intersection => projected.intersect(&bold_mask)?,
            MaskPolicy::Union => projected.union(&bold_mask)?,
        };
        refined.ensure_non_empty("refined mask")?;
        debug!(
            "{}: refined mask keeps {} of {} functional voxels",
            ctx.node,
            refined.voxel_count(),
            bold_mask.voxel_count()
        );
        Ok(PortValues::new().with("out_mask", Value::mask(refined)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resample::AffineResampler;
    use asl_types::{Affine, DataError, TransformChain};
    use ndarray::Array3;
    use uuid::Uuid;

    fn half(axis_value: impl Fn(usize, usize, usize) -> bool) -> Mask {
        Mask::new(Array3::from_shape_fn((4, 4, 2), |(i, j, k)| axis_value(i, j, k)), Affine::IDENTITY)
    }

    fn run(policy: MaskPolicy, t1: Mask, bold: Mask) -> Result<PortValues, StageError> {
        let inputs = PortValues::new()
            .with("in_t1mask", Value::mask(t1))
            .with("in_boldmask", Value::mask(bold))
            .with("transforms", Value::transforms(TransformChain::identity()));
        let ctx = StageContext { node: "refinemask", run_id: Uuid::new_v4() };
        RefineMask::new(Arc::new(AffineResampler), policy).run(&inputs, &ctx)
    }

    #[test]
    fn test_intersection_and_union() {
        let t1 = half(|i, _, _| i < 2);
        let bold = half(|_, j, _| j < 2);
        let out = run(MaskPolicy::Intersection, t1.clone(), bold.clone()).unwrap();
        assert_eq!(out.mask("out_mask").unwrap().voxel_count(), 8);
        let out = run(MaskPolicy::Union, t1, bold).unwrap();
        assert_eq!(out.mask("out_mask").unwrap().voxel_count(), 24);
    }

    #[test]
    fn test_disjoint_masks_are_an_empty_mask_error() {
        let err = run(MaskPolicy::Intersection, half(|i, _, _| i < 2), half(|i, _, _| i >= 2)).unwrap_err();
        assert!(matches!(err, StageError::Data(DataError::EmptyMask(_))));
    }
}
