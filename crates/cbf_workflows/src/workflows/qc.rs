use asl_types::{CbfVariant, RunKey, TissueClass};
use pipeline::{GraphError, PortSpec, PortType, Selector, Workflow};

use super::{add_tissue_projection, Collaborators};
use crate::resample::Interpolation;
use crate::stages::qc::variant_port;
use crate::stages::{ApplyTransforms, ComputeQc, ImageKind, TemplateImage};

/// Inputnode port carrying each CBF variant.
fn variant_input(variant: CbfVariant) -> &'static str {
    match variant {
        CbfVariant::Cbf => "meancbf",
        CbfVariant::Score => "avgscore",
        CbfVariant::Scrub => "scrub",
        CbfVariant::Basil => "basil",
        CbfVariant::Pvc => "pvc",
    }
}

/// Quality control of one run.
///
/// The CBF inputs are optional; a variant that never arrives is left out of
/// the record.
pub fn init_cbfqc_compt_wf(key: RunKey, collab: &Collaborators) -> Result<Workflow, GraphError> {
    let mut inputs: Vec<PortSpec> = CbfVariant::ALL
        .iter()
        .map(|&v| PortSpec::optional(variant_input(v), PortType::Volume))
        .collect();
    inputs.extend([
        PortSpec::required("bold_mask", PortType::Mask),
        PortSpec::required("t1w_tpms", PortType::Tissues),
        PortSpec::required("confmat", PortType::Confounds),
        PortSpec::required("bold_mask_std", PortType::MaskList),
        PortSpec::required("t1_bold_xform", PortType::Transforms),
        PortSpec::required("t1w_mask", PortType::Mask),
    ]);
    let mut wf = Workflow::new("cbfqc_compt_wf", inputs, vec![PortSpec::output("qc_file", PortType::Qc)])?
        .with_description("CBF quality control");
    let (inputnode, outputnode) = (wf.inputnode(), wf.outputnode());

    let tissues = add_tissue_projection(&mut wf, collab, "t1w_tpms", "bold_mask", "t1_bold_xform")?;

    let masktonative = wf.add_node(
        "masktonative",
        ApplyTransforms::new(collab.resampler.clone(), ImageKind::Mask, Interpolation::NearestNeighbor)?,
    )?;
    wf.connect_many(
        inputnode,
        masktonative,
        &[("t1w_mask", "input_image"), ("bold_mask", "reference_image"), ("t1_bold_xform", "transforms")],
    )?;

    let resample = wf.add_node(
        "resample",
        ApplyTransforms::template(
            collab.resampler.clone(),
            collab.templates.clone(),
            TemplateImage::BrainMask,
            Interpolation::NearestNeighbor,
        )?
        .identity_chain(),
    )?;
    wf.connect_with(inputnode, "bold_mask_std", resample, "reference_image", Selector::last_mask())?;

    let qccompute = wf.add_node("qccompute", ComputeQc::new(key))?;
    wf.connect_many(inputnode, qccompute, &[("bold_mask", "in_boldmask"), ("confmat", "in_confmat")])?;
    wf.connect_with(inputnode, "bold_mask_std", qccompute, "in_boldmaskstd", Selector::last_mask())?;
    wf.connect(masktonative, "output_image", qccompute, "in_t1mask")?;
    wf.connect(resample, "output_image", qccompute, "in_templatemask")?;
    for (class, port) in [
        (TissueClass::Grey, "in_greyM"),
        (TissueClass::White, "in_whiteM"),
        (TissueClass::Csf, "in_csf"),
    ] {
        wf.connect(tissues.get(class), "output_image", qccompute, port)?;
    }
    for variant in CbfVariant::ALL {
        wf.connect(inputnode, variant_input(variant), qccompute, variant_port(variant))?;
    }
    wf.connect(qccompute, "qc_file", outputnode, "qc_file")?;

    Ok(wf)
}
