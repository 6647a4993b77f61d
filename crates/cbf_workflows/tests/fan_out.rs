mod common;

use asl_types::{Affine, AtlasName, CbfVariant, ImageVolume};
use cbf_workflows::workflows::roi_port;
use cbf_workflows::{init_asl_cbf_wf, init_cbfroiquant_wf, CbfSettings, InMemoryTemplates};
use ndarray::Array3;
use pipeline::{ExecutionEngine, PortValues, RunReport, SequentialExecutor, ThreadedExecutor, Value};

use common::*;

const ATLASES: [AtlasName; 2] = [AtlasName::HarvardOxford, AtlasName::Schaefer200x7];
const VARIANTS: [CbfVariant; 2] = [CbfVariant::Cbf, CbfVariant::Score];

fn settings(atlases: &[AtlasName]) -> CbfSettings {
    CbfSettings { atlases: atlases.to_vec(), ..Default::default() }
}

fn roi_inputs() -> PortValues {
    let map = |offset: f32| {
        Value::volume(ImageVolume::from_3d(
            Array3::from_shape_fn(SHAPE, |(x, y, z)| offset + (x + 2 * y + 3 * z) as f32),
            Affine::IDENTITY,
        ))
    };
    PortValues::new()
        .with("cbf", map(10.0))
        .with("score", map(20.0))
        .with("boldmask", Value::mask(bold_mask()))
        .with("t1_bold_xform", Value::transforms(identity_xform("t1w2bold")))
        .with("std2anat_xfm", Value::transforms(identity_xform("std2t1w")))
}

fn run(atlases: &[AtlasName], engine: &dyn ExecutionEngine) -> RunReport {
    let fixture = Fixture::new(templates());
    let graph = init_cbfroiquant_wf(&settings(atlases), &fixture.collab)
        .unwrap()
        .finalize()
        .unwrap();
    engine.execute(&graph, roi_inputs()).unwrap()
}

#[test]
fn test_branches_agree_across_engines_and_in_isolation() {
    let sequential = run(&ATLASES, &SequentialExecutor::new());
    let threaded = run(&ATLASES, &ThreadedExecutor::new(4));

    for atlas in ATLASES {
        let isolated = run(&[atlas], &SequentialExecutor::new());
        for variant in VARIANTS {
            let port = roi_port(variant, atlas);
            let reference = regions_of(&sequential, &port);
            assert_eq!(reference, regions_of(&threaded, &port), "{} differs under threads", port);
            assert_eq!(reference, regions_of(&isolated, &port), "{} differs in isolation", port);
            assert!(reference.rows.iter().all(|r| r.voxels > 0 && r.mean.is_finite()));
        }
    }
}

#[test]
fn test_missing_variant_blocks_only_its_reductions() {
    let report = run(&ATLASES, &ThreadedExecutor::new(2));
    for atlas in ATLASES {
        for variant in CbfVariant::ALL {
            let node = roi_port(variant, atlas);
            let outcome = report.outcome(&node).unwrap();
            if VARIANTS.contains(&variant) {
                assert!(outcome.is_completed(), "{} should have run", node);
            } else {
                assert!(outcome.is_blocked(), "{} should be blocked", node);
            }
        }
    }
    assert!(report.failed().is_empty());
}

#[test]
fn test_failed_atlas_projection_spares_siblings() {
    let templates = InMemoryTemplates::new()
        .with_atlas(harvard_oxford())
        .with_brain_mask(bold_mask())
        .with_carpet_segmentation(asl_types::LabelMap::new(Array3::zeros(SHAPE), Affine::IDENTITY));
    let fixture = Fixture::new(templates);
    let wf = init_asl_cbf_wf(key(), &metadata(), &settings(&ATLASES), &fixture.collab).unwrap();
    let report = SequentialExecutor::new()
        .execute(&wf.finalize().unwrap(), run_inputs())
        .unwrap();

    assert_eq!(report.failed(), ["cbfroiquant_wf.trans_sc207"]);
    for variant in CbfVariant::ALL {
        assert!(report.outcome(&format!("cbfroiquant_wf.{}", roi_port(variant, AtlasName::Schaefer200x7)))
            .unwrap()
            .is_blocked());
        assert!(report.workflow_output(&roi_port(variant, AtlasName::HarvardOxford)).is_some());
    }
    assert!(report.workflow_output("qc_file").is_some());
    assert!(report.outcome("ds_qc").unwrap().is_completed());
}
