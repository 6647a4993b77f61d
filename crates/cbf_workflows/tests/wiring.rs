mod common;

use std::sync::Arc;

use asl_types::{MetadataError, TissueClass};
use cbf_workflows::stages::{ApplyTransforms, DerivativeSink, DescriptorTags, ImageKind};
use cbf_workflows::{init_asl_cbf_wf, AffineResampler, CbfSettings, Interpolation};
use pipeline::{
    EngineKind, ExecutionEngine, GraphError, PipelineEvent, SequentialExecutor, ThreadedExecutor, Value,
};

use common::*;

#[test]
fn test_tissue_projections_follow_named_fields() {
    let fixture = Fixture::new(templates());
    let wf = init_asl_cbf_wf(key(), &metadata(), &CbfSettings::default(), &fixture.collab).unwrap();
    let report = SequentialExecutor::new()
        .execute(&wf.finalize().unwrap(), run_inputs())
        .unwrap();

    let maps = tissues();
    for prefix in ["cbf_compt_wf", "cbfqc_compt_wf"] {
        for class in TissueClass::ALL {
            let node = format!("{}.{}_tfm", prefix, class.short_name());
            let Some(Value::Volume(projected)) = report.output(&node, "output_image") else {
                panic!("{} produced nothing", node);
            };
            assert_eq!(projected.data(), maps.get(class).data(), "{} picked the wrong tissue", node);
        }
    }
}

#[test]
fn test_unrecognized_labeling_type_fails_construction() {
    let fixture = Fixture::new(templates());
    let mut meta = metadata();
    meta.labeling_type = Some("FAIR".to_string());
    let err = init_asl_cbf_wf(key(), &meta, &CbfSettings::default(), &fixture.collab).err();
    assert_eq!(
        err,
        Some(GraphError::Metadata(MetadataError::UnrecognizedLabelingType("FAIR".into())))
    );

    meta.labeling_type = Some("PASL".to_string());
    assert!(init_asl_cbf_wf(key(), &meta, &CbfSettings::default(), &fixture.collab).is_ok());
}

#[test]
fn test_blending_interpolation_rejected_for_labels() {
    let resampler = Arc::new(AffineResampler);
    assert!(matches!(
        ApplyTransforms::new(resampler.clone(), ImageKind::Labels, Interpolation::Linear),
        Err(GraphError::InvalidConfiguration(_))
    ));
    assert!(matches!(
        ApplyTransforms::new(resampler.clone(), ImageKind::Mask, Interpolation::Linear),
        Err(GraphError::InvalidConfiguration(_))
    ));
    assert!(ApplyTransforms::new(resampler, ImageKind::Labels, Interpolation::MultiLabel).is_ok());
}

#[test]
fn test_settings_round_trip_and_schema() {
    let yaml = "smooth_kernel: 4.0\nscore_threshold: 0.8\nweight_function: cauchy\n\
                atlases: [HarvardOxford, schaefer400x17]\nexecution:\n  engine: sequential\n";
    let settings = CbfSettings::from_yaml(yaml).unwrap();
    assert_eq!(settings.execution.engine, EngineKind::Sequential);
    assert_eq!(CbfSettings::from_yaml(&settings.to_yaml().unwrap()).unwrap(), settings);

    let json = serde_json::to_string(&settings).unwrap();
    assert_eq!(CbfSettings::from_json(&json).unwrap(), settings);

    let schema = serde_json::to_value(CbfSettings::json_schema()).unwrap();
    let properties = schema["properties"].as_object().unwrap();
    for field in ["smooth_kernel", "dummy_vols", "score_threshold", "weight_function", "mask_policy", "atlases"] {
        assert!(properties.contains_key(field), "schema lacks {}", field);
    }
}

struct FailingSink;

impl DerivativeSink for FailingSink {
    fn publish(&self, _: &Value, tags: &DescriptorTags) -> anyhow::Result<()> {
        anyhow::bail!("read-only output directory for {}", tags)
    }
}

#[test]
fn test_sink_failures_stay_on_sink_nodes() {
    let fixture = Fixture::with_sink(templates(), Arc::new(FailingSink));
    let settings = CbfSettings {
        atlases: vec![asl_types::AtlasName::HarvardOxford],
        ..Default::default()
    };
    let wf = init_asl_cbf_wf(key(), &metadata(), &settings, &fixture.collab).unwrap();
    let report = SequentialExecutor::new()
        .execute(&wf.finalize().unwrap(), run_inputs())
        .unwrap();

    let failed = report.failed();
    // 5 maps, mask, outliers, QC, 5 region tables and 6 figures.
    assert_eq!(failed.len(), 19);
    assert!(failed.iter().all(|n| n.starts_with("ds_") || n.starts_with("cbfplot_wf.ds_report_")));
    assert!(report.blocked().is_empty());
    assert!(report.workflow_output("qc_file").is_some());
    assert!(report.workflow_output("pvc_hvoxf").is_some());
}

#[test]
fn test_engine_built_from_settings_runs_the_workflow() {
    let yaml = "atlases: [HarvardOxford]\nexecution:\n  engine: threaded\n  threads: 2\n";
    let settings = CbfSettings::from_yaml(yaml).unwrap();
    settings.validate().unwrap();

    let fixture = Fixture::new(templates());
    let graph = init_asl_cbf_wf(key(), &metadata(), &settings, &fixture.collab)
        .unwrap()
        .finalize()
        .unwrap();
    let report = settings.execution.build_engine().execute(&graph, run_inputs()).unwrap();
    assert!(report.is_success(), "failed: {:?}", report.failed());

    let reference = SequentialExecutor::new().execute(&graph, run_inputs()).unwrap();
    assert_eq!(report.completed(), reference.completed());
    assert_eq!(regions_of(&report, "scrub_hvoxf"), regions_of(&reference, "scrub_hvoxf"));
}

#[test]
fn test_run_events_cover_every_node() {
    let fixture = Fixture::new(templates());
    let settings = CbfSettings {
        atlases: vec![asl_types::AtlasName::HarvardOxford],
        ..Default::default()
    };
    let graph = init_asl_cbf_wf(key(), &metadata(), &settings, &fixture.collab)
        .unwrap()
        .finalize()
        .unwrap();
    let (tx, rx) = flume::unbounded();
    let report = ThreadedExecutor::new(3)
        .with_events(tx)
        .execute(&graph, run_inputs())
        .unwrap();
    let events: Vec<PipelineEvent> = rx.drain().collect();

    for node in report.completed() {
        assert!(
            events
                .iter()
                .any(|e| matches!(e, PipelineEvent::NodeCompleted { node: n } if n == node)),
            "no completion event for {}",
            node
        );
    }
    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::RunFinished { run_id, failed: 0, blocked: 0, .. } if *run_id == report.run_id
    )));
}
