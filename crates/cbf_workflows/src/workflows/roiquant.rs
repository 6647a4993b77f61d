use asl_types::{AtlasName, CbfVariant};
use pipeline::stages::Merge;
use pipeline::{GraphError, PortSpec, PortType, Workflow};
use tracing::debug;

use super::Collaborators;
use crate::config::CbfSettings;
use crate::resample::Interpolation;
use crate::stages::{ApplyTransforms, RoiQuant, TemplateImage};

/// Output port of the region table for `variant` over `atlas`, e.g.
/// `score_sc207`.
pub fn roi_port(variant: CbfVariant, atlas: AtlasName) -> String {
    format!("{}_{}", variant.label(), atlas.suffix())
}

/// Regional CBF over every configured atlas.
///
/// Each atlas is projected once from standard into functional space and
/// fans out to one reduction per CBF variant. A variant that never arrives
/// only blocks its own tables.
pub fn init_cbfroiquant_wf(settings: &CbfSettings, collab: &Collaborators) -> Result<Workflow, GraphError> {
    let mut inputs: Vec<PortSpec> =
        CbfVariant::ALL.iter().map(|v| PortSpec::optional(v.label(), PortType::Volume)).collect();
    inputs.extend([
        PortSpec::required("boldmask", PortType::Mask),
        PortSpec::required("t1_bold_xform", PortType::Transforms),
        PortSpec::required("std2anat_xfm", PortType::Transforms),
    ]);
    let outputs = settings
        .atlases
        .iter()
        .flat_map(|&atlas| CbfVariant::ALL.iter().map(move |&v| PortSpec::output(roi_port(v, atlas), PortType::Regions)))
        .collect();
    let mut wf = Workflow::new("cbfroiquant_wf", inputs, outputs)?
        .with_description("Regional CBF over brain atlases");
    let (inputnode, outputnode) = (wf.inputnode(), wf.outputnode());

    let mrg_xfms = wf.add_node("mrg_xfms", Merge::new(2))?;
    wf.connect_many(inputnode, mrg_xfms, &[("t1_bold_xform", "in1"), ("std2anat_xfm", "in2")])?;

    for &atlas in &settings.atlases {
        let trans = wf.add_node(
            &format!("trans_{}", atlas.suffix()),
            ApplyTransforms::template(
                collab.resampler.clone(),
                collab.templates.clone(),
                TemplateImage::Atlas(atlas),
                Interpolation::NearestNeighbor,
            )?,
        )?;
        wf.connect(inputnode, "boldmask", trans, "reference_image")?;
        wf.connect(mrg_xfms, "out", trans, "transforms")?;

        for variant in CbfVariant::ALL {
            let port = roi_port(variant, atlas);
            let quant = wf.add_node(&port, RoiQuant::new(atlas, variant, collab.templates.clone()))?;
            wf.connect(trans, "output_image", quant, "atlasfile")?;
            wf.connect(inputnode, variant.label(), quant, "in_cbf")?;
            wf.connect(quant, "stats", outputnode, &port)?;
        }
    }
    debug!(
        "cbfroiquant_wf: {} atlases x {} variants",
        settings.atlases.len(),
        CbfVariant::ALL.len()
    );

    Ok(wf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::MemorySink;
    use crate::templates::{InMemoryTemplates, TemplateRegistry};
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn collab() -> Collaborators {
        Collaborators::new(
            Arc::new(TemplateRegistry::new(InMemoryTemplates::new())),
            Arc::new(MemorySink::new()),
        )
    }

    #[test]
    fn test_outputs_follow_configured_atlases() {
        let collab = collab();
        let settings = CbfSettings {
            atlases: vec![AtlasName::HarvardOxford, AtlasName::Schaefer400x17],
            ..Default::default()
        };
        let wf = init_cbfroiquant_wf(&settings, &collab).unwrap();
        let names: Vec<_> = wf.output_ports().iter().map(|p| p.name.clone()).collect();
        assert_eq!(names.len(), 10);
        assert!(names.contains(&"cbf_hvoxf".to_string()));
        assert!(names.contains(&"pvc_sc417".to_string()));

        let graph = wf.finalize().unwrap();
        assert!(graph.find("trans_sc417").is_some());
        assert!(graph.find("basil_hvoxf").is_some());
        assert!(graph.find("trans_sc207").is_none());
    }

    proptest! {
        #[test]
        fn prop_one_table_per_atlas_and_variant(
            atlases in proptest::sample::subsequence(AtlasName::ALL.to_vec(), 1..=5)
        ) {
            let settings = CbfSettings { atlases: atlases.clone(), ..Default::default() };
            let wf = init_cbfroiquant_wf(&settings, &collab()).unwrap();
            let names: BTreeSet<_> = wf.output_ports().iter().map(|p| p.name.clone()).collect();
            prop_assert_eq!(names.len(), atlases.len() * CbfVariant::ALL.len());
            for &atlas in &atlases {
                for variant in CbfVariant::ALL {
                    prop_assert!(names.contains(&roi_port(variant, atlas)));
                }
            }

            let graph = wf.finalize().unwrap();
            for atlas in AtlasName::ALL {
                let projected = graph.find(&format!("trans_{}", atlas.suffix())).is_some();
                prop_assert_eq!(projected, atlases.contains(&atlas));
            }
        }
    }
}
