use asl_types::{AslMetadata, CbfVariant, RunKey};
use pipeline::{GraphError, PortSpec, PortType, Workflow};
use tracing::info;

use super::{
    init_cbf_compt_wf, init_cbfplot_wf, init_cbfqc_compt_wf, init_cbfroiquant_wf, roi_port, Collaborators,
};
use crate::config::CbfSettings;
use crate::stages::{DerivativesDataSink, DescriptorTags};

/// Port of `cbf_compt_wf` producing the 3-D map of `variant`.
fn estimate_port(variant: CbfVariant) -> &'static str {
    match variant {
        CbfVariant::Cbf => "out_mean",
        CbfVariant::Score => "out_avgscore",
        CbfVariant::Scrub => "out_scrub",
        CbfVariant::Basil => "out_cbfb",
        CbfVariant::Pvc => "out_cbfpv",
    }
}

fn estimate_tags(key: &RunKey, variant: CbfVariant) -> DescriptorTags {
    let tags = DescriptorTags::new(key.clone(), "perf", "cbf");
    match variant {
        CbfVariant::Cbf => tags,
        other => tags.with_desc(other.label()),
    }
}

/// Full CBF workflow of one run: estimation, QC, report figures and
/// regional summaries, with every derivative published to the sink.
///
/// External inputs are the `inputnode` ports: the ASL series and its path,
/// the functional mask and its standard-space counterparts, the anatomical
/// mask and tissue maps, both registrations, the confounds table and an
/// optional ASL context.
pub fn init_asl_cbf_wf(
    key: RunKey,
    metadata: &AslMetadata,
    settings: &CbfSettings,
    collab: &Collaborators,
) -> Result<Workflow, GraphError> {
    let mut outputs = vec![
        PortSpec::output("out_mask", PortType::Mask),
        PortSpec::output("out_scoreindex", PortType::Outliers),
        PortSpec::output("qc_file", PortType::Qc),
    ];
    outputs.extend(CbfVariant::ALL.iter().map(|v| PortSpec::output(v.label(), PortType::Volume)));
    for &atlas in &settings.atlases {
        outputs.extend(CbfVariant::ALL.iter().map(|&v| PortSpec::output(roi_port(v, atlas), PortType::Regions)));
    }
    let mut wf = Workflow::new(
        "asl_cbf_wf",
        vec![
            PortSpec::required("bold_file", PortType::Path),
            PortSpec::required("bold", PortType::Volume),
            PortSpec::required("bold_mask", PortType::Mask),
            PortSpec::required("bold_mask_std", PortType::MaskList),
            PortSpec::required("t1w_tpms", PortType::Tissues),
            PortSpec::required("t1w_mask", PortType::Mask),
            PortSpec::required("t1_bold_xform", PortType::Transforms),
            PortSpec::required("std2anat_xfm", PortType::Transforms),
            PortSpec::required("confounds", PortType::Confounds),
            PortSpec::optional("asl_context", PortType::Context),
        ],
        outputs,
    )?
    .with_description("ASL cerebral blood flow");
    let (inputnode, outputnode) = (wf.inputnode(), wf.outputnode());

    let cbf_wf = wf.add_workflow(init_cbf_compt_wf(metadata, settings, collab)?)?;
    wf.connect_many(
        inputnode,
        cbf_wf,
        &[
            ("bold_file", "bold_file"),
            ("bold", "bold"),
            ("bold_mask", "bold_mask"),
            ("t1w_tpms", "t1w_tpms"),
            ("t1w_mask", "t1w_mask"),
            ("t1_bold_xform", "t1_bold_xform"),
            ("asl_context", "asl_context"),
        ],
    )?;

    let qc_wf = wf.add_workflow(init_cbfqc_compt_wf(key.clone(), collab)?)?;
    wf.connect_many(
        inputnode,
        qc_wf,
        &[
            ("t1w_tpms", "t1w_tpms"),
            ("confounds", "confmat"),
            ("bold_mask_std", "bold_mask_std"),
            ("t1_bold_xform", "t1_bold_xform"),
            ("t1w_mask", "t1w_mask"),
        ],
    )?;
    wf.connect_many(
        cbf_wf,
        qc_wf,
        &[
            ("out_mask", "bold_mask"),
            ("out_mean", "meancbf"),
            ("out_avgscore", "avgscore"),
            ("out_scrub", "scrub"),
            ("out_cbfb", "basil"),
            ("out_cbfpv", "pvc"),
        ],
    )?;

    let plot_wf = wf.add_workflow(init_cbfplot_wf(metadata, key.clone(), collab)?)?;
    wf.connect_many(
        inputnode,
        plot_wf,
        &[("confounds", "confounds"), ("t1_bold_xform", "t1_bold_xform"), ("std2anat_xfm", "std2anat_xfm")],
    )?;
    wf.connect_many(
        cbf_wf,
        plot_wf,
        &[
            ("out_cbf", "cbf_ts"),
            ("out_scoreindex", "score_outlier_index"),
            ("out_avg", "bold_ref"),
            ("out_mask", "bold_mask"),
        ],
    )?;

    let roi_wf = wf.add_workflow(init_cbfroiquant_wf(settings, collab)?)?;
    wf.connect_many(inputnode, roi_wf, &[("t1_bold_xform", "t1_bold_xform"), ("std2anat_xfm", "std2anat_xfm")])?;
    wf.connect(cbf_wf, "out_mask", roi_wf, "boldmask")?;

    for variant in CbfVariant::ALL {
        let label = variant.label();
        let estimate = estimate_port(variant);
        wf.connect(cbf_wf, estimate, plot_wf, label)?;
        wf.connect(cbf_wf, estimate, roi_wf, label)?;
        wf.connect(cbf_wf, estimate, outputnode, label)?;

        let ds = wf.add_node(
            &format!("ds_{}", label),
            DerivativesDataSink::new(collab.sink.clone(), estimate_tags(&key, variant), PortType::Volume),
        )?;
        wf.connect(cbf_wf, estimate, ds, "in_file")?;
    }

    let ds_mask = wf.add_node(
        "ds_mask",
        DerivativesDataSink::new(
            collab.sink.clone(),
            DescriptorTags::new(key.clone(), "perf", "mask").with_desc("brain"),
            PortType::Mask,
        ),
    )?;
    wf.connect(cbf_wf, "out_mask", ds_mask, "in_file")?;
    wf.connect(cbf_wf, "out_mask", outputnode, "out_mask")?;

    let ds_scoreindex = wf.add_node(
        "ds_scoreindex",
        DerivativesDataSink::new(
            collab.sink.clone(),
            DescriptorTags::new(key.clone(), "perf", "outliers").with_desc("score"),
            PortType::Outliers,
        ),
    )?;
    wf.connect(cbf_wf, "out_scoreindex", ds_scoreindex, "in_file")?;
    wf.connect(cbf_wf, "out_scoreindex", outputnode, "out_scoreindex")?;

    let ds_qc = wf.add_node(
        "ds_qc",
        DerivativesDataSink::new(collab.sink.clone(), DescriptorTags::new(key.clone(), "perf", "qc"), PortType::Qc),
    )?;
    wf.connect(qc_wf, "qc_file", ds_qc, "in_file")?;
    wf.connect(qc_wf, "qc_file", outputnode, "qc_file")?;

    for &atlas in &settings.atlases {
        for variant in CbfVariant::ALL {
            let port = roi_port(variant, atlas);
            let ds = wf.add_node(
                &format!("ds_{}", port),
                DerivativesDataSink::new(
                    collab.sink.clone(),
                    DescriptorTags::new(key.clone(), "perf", "regions")
                        .with_desc(format!("{}{}", variant.label(), atlas.suffix())),
                    PortType::Regions,
                ),
            )?;
            wf.connect(roi_wf, &port, ds, "in_file")?;
            wf.connect(roi_wf, &port, outputnode, &port)?;
        }
    }

    info!("asl_cbf_wf for {}: {} nodes", key, wf.node_count());
    Ok(wf)
}
