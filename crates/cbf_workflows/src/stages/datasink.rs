//! Publishing derivatives.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use asl_types::RunKey;
use pipeline::{PortSpec, PortType, PortValues, Stage, StageContext, StageError, Value};
use tracing::info;

/// Entities naming one derivative of a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorTags {
    pub key: RunKey,
    pub desc: Option<String>,
    /// Derivative folder, e.g. `perf` or `figures`.
    pub datatype: String,
    pub suffix: String,
}

impl DescriptorTags {
    pub fn new(key: RunKey, datatype: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self { key, desc: None, datatype: datatype.into(), suffix: suffix.into() }
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }
}

impl fmt::Display for DescriptorTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.datatype, self.key)?;
        if let Some(desc) = &self.desc {
            write!(f, "_desc-{}", desc)?;
        }
        write!(f, "_{}", self.suffix)
    }
}

/// Destination of published derivatives.
///
/// Publishing the same tags twice replaces the earlier artifact. A failure
/// must be reported, never swallowed.
pub trait DerivativeSink: Send + Sync {
    fn publish(&self, artifact: &Value, tags: &DescriptorTags) -> anyhow::Result<()>;
}

/// Sink keeping every artifact in memory, keyed by its rendered tags.
#[derive(Default)]
pub struct MemorySink {
    artifacts: Mutex<BTreeMap<String, Value>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.artifacts.lock().ok()?.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.artifacts
            .lock()
            .map(|a| a.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.artifacts.lock().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DerivativeSink for MemorySink {
    fn publish(&self, artifact: &Value, tags: &DescriptorTags) -> anyhow::Result<()> {
        let mut artifacts = self
            .artifacts
            .lock()
            .map_err(|_| anyhow::anyhow!("derivative store lock poisoned"))?;
        artifacts.insert(tags.to_string(), artifact.clone());
        Ok(())
    }
}

/// Terminal node handing its single `in_file` to a [`DerivativeSink`].
pub struct DerivativesDataSink {
    sink: Arc<dyn DerivativeSink>,
    tags: DescriptorTags,
    ty: PortType,
}

impl DerivativesDataSink {
    pub fn new(sink: Arc<dyn DerivativeSink>, tags: DescriptorTags, ty: PortType) -> Self {
        Self { sink, tags, ty }
    }
}

impl Stage for DerivativesDataSink {
    fn kind(&self) -> &'static str {
        "derivatives_data_sink"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::required("in_file", self.ty)]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        Vec::new()
    }

    fn run(&self, inputs: &PortValues, ctx: &StageContext<'_>) -> Result<PortValues, StageError> {
        let artifact = inputs
            .get("in_file")
            .ok_or_else(|| StageError::MissingInput("in_file".to_string()))?;
        self.sink
            .publish(artifact, &self.tags)
            .map_err(|e| StageError::Sink(format!("{}: {:#}", self.tags, e)))?;
        info!("{}: published {}", ctx.node, self.tags);
        Ok(PortValues::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    struct Broken;

    impl DerivativeSink for Broken {
        fn publish(&self, _: &Value, _: &DescriptorTags) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    fn tags() -> DescriptorTags {
        DescriptorTags::new(RunKey::new("01", 1), "perf", "cbf").with_desc("score")
    }

    #[test]
    fn test_tag_rendering() {
        assert_eq!(tags().to_string(), "perf/sub-01_run-01_desc-score_cbf");
        assert_eq!(DescriptorTags::new(RunKey::new("02", 3), "perf", "qc").to_string(), "perf/sub-02_run-03_qc");
    }

    #[test]
    fn test_publish_is_idempotent() {
        let sink = Arc::new(MemorySink::new());
        let node = DerivativesDataSink::new(sink.clone(), tags(), PortType::Scalar);
        let ctx = StageContext { node: "ds_score", run_id: Uuid::new_v4() };
        let inputs = PortValues::new().with("in_file", Value::Scalar(1.0));
        node.run(&inputs, &ctx).unwrap();
        node.run(&inputs, &ctx).unwrap();
        assert_eq!(sink.names(), vec!["perf/sub-01_run-01_desc-score_cbf".to_string()]);
    }

    #[test]
    fn test_failure_is_a_sink_error() {
        let node = DerivativesDataSink::new(Arc::new(Broken), tags(), PortType::Scalar);
        let ctx = StageContext { node: "ds_score", run_id: Uuid::new_v4() };
        let err = node.run(&PortValues::new().with("in_file", Value::Scalar(1.0)), &ctx).unwrap_err();
        assert!(matches!(err, StageError::Sink(ref m) if m.contains("disk full")));
    }
}
