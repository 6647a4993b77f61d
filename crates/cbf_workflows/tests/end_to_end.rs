mod common;

use asl_types::{AtlasName, CbfVariant};
use cbf_workflows::workflows::roi_port;
use cbf_workflows::{init_asl_cbf_wf, CbfSettings};
use pipeline::{ExecutionEngine, SequentialExecutor, Value};

use common::*;

fn settings() -> CbfSettings {
    CbfSettings {
        atlases: vec![AtlasName::HarvardOxford, AtlasName::Schaefer200x7],
        ..Default::default()
    }
}

#[test]
fn test_full_run_on_synthetic_casl() {
    let fixture = Fixture::new(templates());
    let wf = init_asl_cbf_wf(key(), &metadata(), &settings(), &fixture.collab).unwrap();
    let graph = wf.finalize().unwrap();
    let report = SequentialExecutor::new().execute(&graph, run_inputs()).unwrap();

    assert!(report.is_success(), "failed: {:?}, blocked: {:?}", report.failed(), report.blocked());

    // Two atlases by five variants, one row per atlas region.
    for (atlas, regions) in [(AtlasName::HarvardOxford, 4), (AtlasName::Schaefer200x7, 2)] {
        for variant in CbfVariant::ALL {
            let summary = regions_of(&report, &roi_port(variant, atlas));
            assert_eq!(summary.atlas, atlas);
            assert_eq!(summary.variant, variant);
            assert_eq!(summary.rows.len(), regions);
        }
    }

    let Some(Value::Mask(refined)) = report.workflow_output("out_mask") else {
        panic!("refined mask missing");
    };
    assert_eq!(**refined, bold_mask().intersect(&t1_mask()).unwrap());
    assert!(refined.voxel_count() < bold_mask().voxel_count());

    let Some(Value::Volume(cbf)) = report.workflow_output("cbf") else {
        panic!("mean CBF missing");
    };
    let cbf = cbf.volume3().unwrap();
    assert!(cbf[[3, 3, 2]] > 0.0);
    assert_eq!(cbf[[1, 3, 2]], 0.0, "voxel outside the anatomical mask");

    let Some(Value::Qc(qc)) = report.workflow_output("qc_file") else {
        panic!("QC record missing");
    };
    assert_eq!(qc.key, key());
    for variant in CbfVariant::ALL {
        assert!(qc.has_variant(variant), "{} missing from QC", variant);
        assert!(qc.variants[&variant].qei.is_some(), "{} QEI omitted", variant);
    }
    // Motion, two overlap blocks of four, then QEI and negative GM per variant.
    assert_eq!(qc.columns().len(), 20);
    assert!(qc.coregistration.dice < 1.0);
    assert!((qc.motion.fd - 1.1 / 7.0).abs() < 1e-9);

    let Some(Value::Outliers(index)) = report.workflow_output("out_scoreindex") else {
        panic!("outlier index missing");
    };
    assert_eq!(index.rejected.len(), 4);
}

#[test]
fn test_every_derivative_is_published() {
    let fixture = Fixture::new(templates());
    let wf = init_asl_cbf_wf(key(), &metadata(), &settings(), &fixture.collab).unwrap();
    let report = SequentialExecutor::new()
        .execute(&wf.finalize().unwrap(), run_inputs())
        .unwrap();
    assert!(report.is_success());

    let names = fixture.sink.names();
    for expected in [
        "perf/sub-01_run-01_cbf",
        "perf/sub-01_run-01_desc-score_cbf",
        "perf/sub-01_run-01_desc-pvc_cbf",
        "perf/sub-01_run-01_desc-brain_mask",
        "perf/sub-01_run-01_desc-score_outliers",
        "perf/sub-01_run-01_qc",
        "perf/sub-01_run-01_desc-scrubhvoxf_regions",
        "figures/sub-01_run-01_desc-cbftsplot_cbf",
        "figures/sub-01_run-01_desc-basilplot_cbf",
    ] {
        assert!(names.iter().any(|n| n == expected), "{} not published", expected);
    }
    // 5 maps, mask, outliers, QC, 10 region tables and 6 figures.
    assert_eq!(fixture.sink.len(), 24);

    let Some(Value::Figure(carpet)) = fixture.sink.get("figures/sub-01_run-01_desc-cbftsplot_cbf") else {
        panic!("carpet plot missing");
    };
    assert_eq!(carpet.width, 4);
}
