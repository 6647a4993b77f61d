//! Synthetic run shared by the integration tests.
//!
//! Everything lives on one 8x8x6 grid with 1 mm voxels and identity
//! registrations, so projections are exact and expected values can be
//! computed by hand.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use asl_types::{
    Affine, AslMetadata, AtlasDefinition, AtlasName, ConfoundsTable, ImageVolume, LabelMap, Mask,
    RegionLabel, RegionSummary, RunKey, TissueMaps, Transform, TransformChain,
};
use cbf_workflows::stages::{DerivativeSink, MemorySink};
use cbf_workflows::{Collaborators, InMemoryTemplates, TemplateRegistry};
use ndarray::{Array3, Array4};
use pipeline::{PortValues, RunReport, Value};

pub const SHAPE: (usize, usize, usize) = (8, 8, 6);
pub const FRAMES: usize = 8;

pub fn key() -> RunKey {
    RunKey::new("01", 1)
}

pub fn metadata() -> AslMetadata {
    AslMetadata {
        repetition_time: Some(4.0),
        post_labeling_delay: Some(1.5),
        labeling_duration: Some(1.8),
        labeling_type: Some("CASL".to_string()),
        m0: Some(1.0),
        ..Default::default()
    }
}

pub fn in_bold_mask(x: usize, y: usize, z: usize) -> bool {
    (1..7).contains(&x) && (1..7).contains(&y) && (1..5).contains(&z)
}

pub fn in_t1_mask(x: usize, y: usize, z: usize) -> bool {
    (2..8).contains(&x) && (1..7).contains(&y) && (1..5).contains(&z)
}

fn mask(f: fn(usize, usize, usize) -> bool) -> Mask {
    Mask::new(Array3::from_shape_fn(SHAPE, |(x, y, z)| f(x, y, z)), Affine::IDENTITY)
}

pub fn bold_mask() -> Mask {
    mask(in_bold_mask)
}

pub fn t1_mask() -> Mask {
    mask(in_t1_mask)
}

/// Control frames at even positions, label frames at odd ones. The
/// perfusion signal varies along y and slightly from pair to pair.
pub fn bold() -> ImageVolume {
    let data = Array4::from_shape_fn((SHAPE.0, SHAPE.1, SHAPE.2, FRAMES), |(x, y, z, t)| {
        if !in_bold_mask(x, y, z) {
            return 0.0;
        }
        let control = 100.0 + x as f32;
        if t % 2 == 0 {
            control
        } else {
            let pair = (t / 2) as f32;
            control - (1.0 + 0.2 * y as f32) * (1.0 + 0.01 * pair)
        }
    });
    ImageVolume::new(data.into_dyn(), Affine::IDENTITY).expect("4-D series")
}

pub fn grey() -> ImageVolume {
    ImageVolume::from_3d(Array3::from_shape_fn(SHAPE, |(x, _, _)| if x < 5 { 0.9 } else { 0.1 }), Affine::IDENTITY)
}

pub fn white() -> ImageVolume {
    ImageVolume::from_3d(Array3::from_shape_fn(SHAPE, |(x, _, _)| if x < 5 { 0.1 } else { 0.9 }), Affine::IDENTITY)
}

pub fn csf() -> ImageVolume {
    ImageVolume::from_3d(Array3::from_elem(SHAPE, 0.05), Affine::IDENTITY)
}

pub fn tissues() -> TissueMaps {
    TissueMaps::new(grey(), white(), csf())
}

pub fn confounds() -> ConfoundsTable {
    ConfoundsTable::default()
        .with_column("framewise_displacement", vec![f64::NAN, 0.1, 0.2, 0.1, 0.3, 0.1, 0.2, 0.1])
        .with_column("rmsd", vec![f64::NAN, 0.05, 0.1, 0.05, 0.1, 0.05, 0.1, 0.05])
}

fn labels(f: impl Fn(usize, usize, usize) -> i32) -> LabelMap {
    LabelMap::new(
        Array3::from_shape_fn(SHAPE, |(x, y, z)| if in_bold_mask(x, y, z) { f(x, y, z) } else { 0 }),
        Affine::IDENTITY,
    )
}

fn regions(names: &[&str]) -> Vec<RegionLabel> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| RegionLabel { id: i as i32 + 1, name: name.to_string() })
        .collect()
}

/// Four quadrants in the xy plane.
pub fn harvard_oxford() -> AtlasDefinition {
    AtlasDefinition {
        name: AtlasName::HarvardOxford,
        template: Arc::new(labels(|x, y, _| 1 + (x / 4) as i32 + 2 * (y / 4) as i32)),
        regions: regions(&["frontal", "parietal", "temporal", "occipital"]),
    }
}

/// Two slabs along z.
pub fn schaefer() -> AtlasDefinition {
    AtlasDefinition {
        name: AtlasName::Schaefer200x7,
        template: Arc::new(labels(|_, _, z| if z < 3 { 1 } else { 2 })),
        regions: regions(&["7Networks_LH_Vis_1", "7Networks_LH_Default_1"]),
    }
}

pub fn templates() -> InMemoryTemplates {
    InMemoryTemplates::new()
        .with_atlas(harvard_oxford())
        .with_atlas(schaefer())
        .with_brain_mask(bold_mask())
        .with_carpet_segmentation(labels(|x, _, _| if x < 5 { 1 } else { 2 }))
}

pub fn identity_xform(name: &str) -> TransformChain {
    TransformChain::single(Transform::identity(name))
}

pub struct Fixture {
    pub sink: Arc<MemorySink>,
    pub collab: Collaborators,
}

impl Fixture {
    pub fn new(templates: InMemoryTemplates) -> Self {
        let sink = Arc::new(MemorySink::new());
        let collab = Collaborators::new(Arc::new(TemplateRegistry::new(templates)), sink.clone());
        Self { sink, collab }
    }

    pub fn with_sink(templates: InMemoryTemplates, sink: Arc<dyn DerivativeSink>) -> Self {
        let collab = Collaborators::new(Arc::new(TemplateRegistry::new(templates)), sink);
        Self { sink: Arc::new(MemorySink::new()), collab }
    }
}

/// External inputs of `asl_cbf_wf`.
pub fn run_inputs() -> PortValues {
    let std_masks = vec![t1_mask(), bold_mask()];
    PortValues::new()
        .with("bold_file", Value::Path(PathBuf::from("/data/sub-01/perf/sub-01_run-01_asl.nii.gz")))
        .with("bold", Value::volume(bold()))
        .with("bold_mask", Value::mask(bold_mask()))
        .with("bold_mask_std", Value::MaskList(Arc::new(std_masks)))
        .with("t1w_tpms", Value::tissues(tissues()))
        .with("t1w_mask", Value::mask(t1_mask()))
        .with("t1_bold_xform", Value::transforms(identity_xform("t1w2bold")))
        .with("std2anat_xfm", Value::transforms(identity_xform("std2t1w")))
        .with("confounds", Value::Confounds(Arc::new(confounds())))
}

pub fn regions_of(report: &RunReport, port: &str) -> Arc<RegionSummary> {
    match report.workflow_output(port) {
        Some(Value::Regions(summary)) => summary.clone(),
        other => panic!("{} carried {:?}", port, other.map(Value::port_type)),
    }
}
