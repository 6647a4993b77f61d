//! Engine selection configuration

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::executor::{ExecutionEngine, SequentialExecutor, ThreadedExecutor};

/// Which engine runs the finalized graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Sequential,
    #[default]
    Threaded,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub engine: EngineKind,
    /// Worker threads for the threaded engine; defaults to the available
    /// parallelism.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
}

impl ExecutionConfig {
    pub fn build_engine(&self) -> Box<dyn ExecutionEngine> {
        match self.engine {
            EngineKind::Sequential => Box::new(SequentialExecutor::new()),
            EngineKind::Threaded => match self.threads {
                Some(n) => Box::new(ThreadedExecutor::new(n)),
                None => Box::new(ThreadedExecutor::default()),
            },
        }
    }
}
