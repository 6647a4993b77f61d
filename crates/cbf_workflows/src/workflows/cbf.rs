use asl_types::AslMetadata;
use pipeline::{GraphError, PortSpec, PortType, Selector, Workflow};
use tracing::debug;

use super::{add_tissue_projection, Collaborators};
use crate::config::CbfSettings;
use crate::stages::{Basil, BasilParams, ComputeCbf, ExtractCbf, RefineMask, ScoreScrub};

/// CBF computation: mask refinement, tissue projection and the basic,
/// outlier-robust and Bayesian estimators.
///
/// Fails with [`GraphError::Metadata`] when the acquisition metadata cannot
/// drive the estimators.
pub fn init_cbf_compt_wf(
    metadata: &AslMetadata,
    settings: &CbfSettings,
    collab: &Collaborators,
) -> Result<Workflow, GraphError> {
    let params = metadata.validate()?;
    debug!(
        "cbf_compt_wf: {:?} labeling, PLD {}s, LD {}s",
        params.scheme, params.post_labeling_delay, params.labeling_duration
    );

    let mut wf = Workflow::new(
        "cbf_compt_wf",
        vec![
            PortSpec::required("bold_file", PortType::Path),
            PortSpec::required("bold", PortType::Volume),
            PortSpec::required("bold_mask", PortType::Mask),
            PortSpec::required("t1w_tpms", PortType::Tissues),
            PortSpec::required("t1w_mask", PortType::Mask),
            PortSpec::required("t1_bold_xform", PortType::Transforms),
            PortSpec::optional("asl_context", PortType::Context),
        ],
        vec![
            PortSpec::output("out_cbf", PortType::Volume),
            PortSpec::output("out_mean", PortType::Volume),
            PortSpec::output("out_score", PortType::Volume),
            PortSpec::output("out_avgscore", PortType::Volume),
            PortSpec::output("out_scoreindex", PortType::Outliers),
            PortSpec::output("out_scrub", PortType::Volume),
            PortSpec::output("out_cbfb", PortType::Volume),
            PortSpec::output("out_cbfpv", PortType::Volume),
            PortSpec::output("out_mask", PortType::Mask),
            PortSpec::output("out_avg", PortType::Volume),
        ],
    )?
    .with_description("CBF estimation from an ASL series");
    let (inputnode, outputnode) = (wf.inputnode(), wf.outputnode());

    let refinemask = wf.add_node(
        "refinemask",
        RefineMask::new(collab.resampler.clone(), settings.mask_policy),
    )?;
    wf.connect_many(
        inputnode,
        refinemask,
        &[("t1w_mask", "in_t1mask"), ("bold_mask", "in_boldmask"), ("t1_bold_xform", "transforms")],
    )?;

    let tissues = add_tissue_projection(&mut wf, collab, "t1w_tpms", "bold_mask", "t1_bold_xform")?;

    let extractcbf = wf.add_node("extractcbf", ExtractCbf::new(settings.dummy_vols, settings.smooth_kernel))?;
    wf.connect_many(inputnode, extractcbf, &[("bold", "in_file"), ("asl_context", "in_context")])?;
    wf.connect(refinemask, "out_mask", extractcbf, "in_mask")?;

    let computecbf = wf.add_node("computecbf", ComputeCbf::new(params))?;
    wf.connect_many(extractcbf, computecbf, &[("out_file", "in_cbf"), ("out_avg", "in_m0file")])?;
    wf.connect(refinemask, "out_mask", computecbf, "in_mask")?;

    let scorescrub = wf.add_node(
        "scorescrub",
        ScoreScrub::new(settings.score_threshold, settings.weight_function),
    )?;
    wf.connect(computecbf, "out_cbf", scorescrub, "in_file")?;
    wf.connect(tissues.grey, "output_image", scorescrub, "in_greyM")?;
    wf.connect(tissues.white, "output_image", scorescrub, "in_whiteM")?;
    wf.connect(tissues.csf, "output_image", scorescrub, "in_csf")?;
    wf.connect(refinemask, "out_mask", scorescrub, "in_mask")?;

    let basilcbf = wf.add_node("basilcbf", Basil::new(BasilParams::from_acquisition(&params)))?;
    wf.connect_many(extractcbf, basilcbf, &[("out_file", "in_file"), ("out_avg", "mzero")])?;
    wf.connect(refinemask, "out_mask", basilcbf, "mask")?;
    wf.connect(tissues.grey, "output_image", basilcbf, "pvgm")?;
    wf.connect(tissues.white, "output_image", basilcbf, "pvwm")?;
    wf.connect_with(inputnode, "bold_file", basilcbf, "out_basename", Selector::dirname())?;

    wf.connect_many(computecbf, outputnode, &[("out_cbf", "out_cbf"), ("out_mean", "out_mean")])?;
    wf.connect_many(
        scorescrub,
        outputnode,
        &[
            ("out_score", "out_score"),
            ("out_avgscore", "out_avgscore"),
            ("out_scoreindex", "out_scoreindex"),
            ("out_scrub", "out_scrub"),
        ],
    )?;
    wf.connect_many(basilcbf, outputnode, &[("out_cbfb", "out_cbfb"), ("out_cbfpv", "out_cbfpv")])?;
    wf.connect(refinemask, "out_mask", outputnode, "out_mask")?;
    wf.connect(extractcbf, "out_avg", outputnode, "out_avg")?;

    Ok(wf)
}
