use asl_types::{AslMetadata, CbfVariant, RunKey};
use pipeline::stages::Merge;
use pipeline::{GraphError, PortSpec, PortType, Workflow};

use super::Collaborators;
use crate::resample::Interpolation;
use crate::stages::{
    ApplyTransforms, CbfSummary, CbfTsSummary, DerivativesDataSink, DescriptorTags, TemplateImage,
};

/// Inputnode port of the map summarised for `variant`.
fn summary_input(variant: CbfVariant) -> &'static str {
    match variant {
        CbfVariant::Cbf => "cbf",
        CbfVariant::Score => "score",
        CbfVariant::Scrub => "scrub",
        CbfVariant::Basil => "basil",
        CbfVariant::Pvc => "pvc",
    }
}

fn summary_output(variant: CbfVariant) -> String {
    format!("{}_summary_plot", variant.label())
}

/// Report figures: a carpet plot of the CBF series and one slice summary
/// per CBF variant, each published to the derivative sink.
pub fn init_cbfplot_wf(
    metadata: &AslMetadata,
    key: RunKey,
    collab: &Collaborators,
) -> Result<Workflow, GraphError> {
    let params = metadata.validate()?;

    let mut inputs = vec![PortSpec::required("cbf_ts", PortType::Volume)];
    inputs.extend(CbfVariant::ALL.iter().map(|&v| PortSpec::optional(summary_input(v), PortType::Volume)));
    inputs.extend([
        PortSpec::optional("score_outlier_index", PortType::Outliers),
        PortSpec::required("bold_ref", PortType::Volume),
        PortSpec::required("confounds", PortType::Confounds),
        PortSpec::required("bold_mask", PortType::Mask),
        PortSpec::required("t1_bold_xform", PortType::Transforms),
        PortSpec::required("std2anat_xfm", PortType::Transforms),
    ]);
    let mut outputs = vec![PortSpec::output("cbf_carpetplot", PortType::Figure)];
    outputs.extend(CbfVariant::ALL.iter().map(|&v| PortSpec::output(summary_output(v), PortType::Figure)));

    let mut wf = Workflow::new("cbfplot_wf", inputs, outputs)?.with_description("CBF report figures");
    let (inputnode, outputnode) = (wf.inputnode(), wf.outputnode());

    let mrg_xfms = wf.add_node("mrg_xfms", Merge::new(2))?;
    wf.connect_many(inputnode, mrg_xfms, &[("t1_bold_xform", "in1"), ("std2anat_xfm", "in2")])?;

    let resample_parc = wf.add_node(
        "resample_parc",
        ApplyTransforms::template(
            collab.resampler.clone(),
            collab.templates.clone(),
            TemplateImage::CarpetSegmentation,
            Interpolation::MultiLabel,
        )?,
    )?;
    wf.connect(inputnode, "bold_mask", resample_parc, "reference_image")?;
    wf.connect(mrg_xfms, "out", resample_parc, "transforms")?;

    let cbftssummary = wf.add_node(
        "cbftssummary",
        CbfTsSummary::new(collab.renderer.clone(), params.repetition_time),
    )?;
    wf.connect_many(
        inputnode,
        cbftssummary,
        &[("cbf_ts", "cbf_ts"), ("confounds", "conf_file"), ("score_outlier_index", "score_file")],
    )?;
    wf.connect(resample_parc, "output_image", cbftssummary, "seg_file")?;
    wf.connect(cbftssummary, "out_file", outputnode, "cbf_carpetplot")?;

    let ds_cbftsplot = wf.add_node(
        "ds_report_cbftsplot",
        DerivativesDataSink::new(
            collab.sink.clone(),
            DescriptorTags::new(key.clone(), "figures", "cbf").with_desc("cbftsplot"),
            PortType::Figure,
        ),
    )?;
    wf.connect(cbftssummary, "out_file", ds_cbftsplot, "in_file")?;

    for variant in CbfVariant::ALL {
        let label = variant.label();
        let summary = wf.add_node(
            &format!("{}summary", label),
            CbfSummary::new(collab.renderer.clone(), label),
        )?;
        wf.connect(inputnode, summary_input(variant), summary, "cbf")?;
        wf.connect(inputnode, "bold_ref", summary, "ref_vol")?;
        wf.connect(summary, "out_file", outputnode, &summary_output(variant))?;

        let ds = wf.add_node(
            &format!("ds_report_{}plot", label),
            DerivativesDataSink::new(
                collab.sink.clone(),
                DescriptorTags::new(key.clone(), "figures", "cbf").with_desc(format!("{}plot", label)),
                PortType::Figure,
            ),
        )?;
        wf.connect(summary, "out_file", ds, "in_file")?;
    }

    Ok(wf)
}
