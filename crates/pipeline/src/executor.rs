//! Execution engines for finalized graphs.
//!
//! Both engines follow the same rules: a node becomes ready once all of its
//! producers are resolved, runs only if every required input arrived, and
//! runs at most once. A failure is recorded against the failing node and
//! only starves consumers that require its outputs.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use flume::Sender;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::data::{PortValues, Value};
use crate::error::{PipelineError, PipelineResult, StageError};
use crate::event::PipelineEvent;
use crate::graph::{FinalizedGraph, GraphNode, NodeId};
use crate::stage::StageContext;

/// Runs a finalized graph once.
pub trait ExecutionEngine: Send + Sync {
    fn execute(&self, graph: &FinalizedGraph, inputs: PortValues) -> PipelineResult<RunReport>;
}

/// What happened to one node.
#[derive(Debug)]
pub enum NodeOutcome {
    Completed,
    Failed(StageError),
    /// Never ran: these required inputs had no value.
    Blocked { missing: Vec<String> },
}

impl NodeOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, NodeOutcome::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, NodeOutcome::Failed(_))
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, NodeOutcome::Blocked { .. })
    }
}

/// Outcome of every node and the values produced by those that completed.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    outcomes: BTreeMap<String, NodeOutcome>,
    outputs: BTreeMap<String, PortValues>,
    output_node: Option<String>,
}

impl RunReport {
    pub fn outcome(&self, node: &str) -> Option<&NodeOutcome> {
        self.outcomes.get(node)
    }

    pub fn outcomes(&self) -> impl Iterator<Item = (&str, &NodeOutcome)> {
        self.outcomes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Values produced by a completed node.
    pub fn outputs_of(&self, node: &str) -> Option<&PortValues> {
        self.outputs.get(node)
    }

    pub fn output(&self, node: &str, port: &str) -> Option<&Value> {
        self.outputs_of(node).and_then(|values| values.get(port))
    }

    /// Everything that reached the top-level `outputnode`.
    pub fn workflow_outputs(&self) -> Option<&PortValues> {
        self.output_node.as_deref().and_then(|n| self.outputs_of(n))
    }

    pub fn workflow_output(&self, port: &str) -> Option<&Value> {
        self.workflow_outputs().and_then(|values| values.get(port))
    }

    pub fn completed(&self) -> Vec<&str> {
        self.filter(NodeOutcome::is_completed)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.filter(NodeOutcome::is_failed)
    }

    pub fn blocked(&self) -> Vec<&str> {
        self.filter(NodeOutcome::is_blocked)
    }

    fn filter(&self, pred: fn(&NodeOutcome) -> bool) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| pred(o))
            .map(|(k, _)| k.as_str())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.values().all(NodeOutcome::is_completed)
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

enum Gathered {
    Ready(PortValues),
    Blocked(Vec<String>),
    Failed(StageError),
}

/// Bookkeeping shared by both engines.
struct RunState<'g> {
    graph: &'g FinalizedGraph,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    events: Option<&'g Sender<PipelineEvent>>,
    results: HashMap<NodeId, PortValues>,
    outcomes: BTreeMap<String, NodeOutcome>,
}

impl<'g> RunState<'g> {
    fn new(graph: &'g FinalizedGraph, events: Option<&'g Sender<PipelineEvent>>) -> Self {
        let run_id = Uuid::new_v4();
        info!("Starting run {} of workflow '{}' ({} nodes)", run_id, graph.name(), graph.node_count());
        Self {
            graph,
            run_id,
            started_at: Utc::now(),
            events,
            results: HashMap::new(),
            outcomes: BTreeMap::new(),
        }
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = self.events {
            let _ = tx.send(event);
        }
    }

    fn name(&self, idx: NodeId) -> &'g str {
        let graph: &'g FinalizedGraph = self.graph;
        &graph.node(idx).name
    }

    /// Collects the inputs of `idx` from already-resolved producers.
    fn prepare(&self, idx: NodeId, external: &PortValues) -> Gathered {
        if Some(idx) == self.graph.external_input() {
            return Gathered::Ready(external.clone());
        }
        let node = self.graph.node(idx);
        let mut values = PortValues::new();
        for (src, conn) in self.graph.incoming(idx) {
            let produced = self
                .results
                .get(&src)
                .and_then(|outputs| outputs.get(&conn.source_port));
            if let Some(value) = produced {
                let value = match &conn.selector {
                    Some(selector) => match selector.apply(value) {
                        Ok(v) => v,
                        Err(e) => return Gathered::Failed(e),
                    },
                    None => value.clone(),
                };
                values.insert(conn.target_port.clone(), value);
            }
        }
        if !node.stage.is_passthrough() {
            let missing: Vec<String> = node
                .inputs
                .iter()
                .filter(|p| p.required && !values.contains(&p.name))
                .map(|p| p.name.clone())
                .collect();
            if !missing.is_empty() {
                return Gathered::Blocked(missing);
            }
        }
        Gathered::Ready(values)
    }

    fn start(&self, idx: NodeId) {
        let node = self.graph.node(idx);
        debug!("Node '{}' ({}) started", node.name, node.stage.kind());
        self.emit(PipelineEvent::NodeStarted { node: node.name.clone() });
    }

    fn finish(&mut self, idx: NodeId, result: Result<PortValues, StageError>) {
        let name = self.name(idx).to_string();
        match result {
            Ok(outputs) => {
                info!("Node '{}' completed", name);
                self.results.insert(idx, outputs);
                self.emit(PipelineEvent::NodeCompleted { node: name.clone() });
                self.outcomes.insert(name, NodeOutcome::Completed);
            }
            Err(e) => {
                error!("Node '{}' failed: {}", name, e);
                self.emit(PipelineEvent::NodeFailed { node: name.clone(), error: e.to_string() });
                self.outcomes.insert(name, NodeOutcome::Failed(e));
            }
        }
    }

    fn block(&mut self, idx: NodeId, missing: Vec<String>) {
        let name = self.name(idx).to_string();
        warn!("Node '{}' skipped, missing required inputs: {}", name, missing.join(", "));
        self.emit(PipelineEvent::NodeBlocked { node: name.clone(), missing: missing.clone() });
        self.outcomes.insert(name, NodeOutcome::Blocked { missing });
    }

    fn context(&self, idx: NodeId) -> StageContext<'g> {
        StageContext { node: self.name(idx), run_id: self.run_id }
    }

    fn into_report(self) -> RunReport {
        let count = |pred: fn(&NodeOutcome) -> bool| self.outcomes.values().filter(|o| pred(o)).count();
        let (completed, failed, blocked) = (
            count(NodeOutcome::is_completed),
            count(NodeOutcome::is_failed),
            count(NodeOutcome::is_blocked),
        );
        info!(
            "Run {} of '{}' finished: {} completed, {} failed, {} blocked",
            self.run_id,
            self.graph.name(),
            completed,
            failed,
            blocked
        );
        self.emit(PipelineEvent::RunFinished { run_id: self.run_id, completed, failed, blocked });

        let outputs = self
            .results
            .into_iter()
            .map(|(idx, values)| (self.graph.node(idx).name.clone(), values))
            .collect();
        RunReport {
            run_id: self.run_id,
            workflow: self.graph.name().to_string(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            outcomes: self.outcomes,
            outputs,
            output_node: self.graph.external_output().map(|idx| self.graph.node(idx).name.clone()),
        }
    }
}

/// Runs one stage, turning panics into failures of that node and checking
/// the declared output types.
fn run_stage(node: &GraphNode, inputs: &PortValues, ctx: StageContext<'_>) -> Result<PortValues, StageError> {
    let outputs = catch_unwind(AssertUnwindSafe(|| node.stage.run(inputs, &ctx)))
        .map_err(|payload| StageError::Panicked(panic_message(payload.as_ref())))??;
    for (port, value) in outputs.iter() {
        let spec = node
            .output(port)
            .ok_or_else(|| StageError::BadConfig(format!("stage produced undeclared output '{}'", port)))?;
        if spec.ty != value.port_type() {
            return Err(StageError::WrongType {
                port: port.clone(),
                expected: spec.ty,
                found: value.port_type(),
            });
        }
    }
    Ok(outputs)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Runs nodes one at a time in topological order. Deterministic; used by
/// tests and small runs.
#[derive(Default)]
pub struct SequentialExecutor {
    events: Option<Sender<PipelineEvent>>,
}

impl SequentialExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(mut self, tx: Sender<PipelineEvent>) -> Self {
        self.events = Some(tx);
        self
    }
}

impl ExecutionEngine for SequentialExecutor {
    fn execute(&self, graph: &FinalizedGraph, inputs: PortValues) -> PipelineResult<RunReport> {
        graph.validate_inputs(&inputs)?;
        let mut state = RunState::new(graph, self.events.as_ref());
        for &idx in graph.order() {
            match state.prepare(idx, &inputs) {
                Gathered::Ready(values) => {
                    state.start(idx);
                    let result = run_stage(graph.node(idx), &values, state.context(idx));
                    state.finish(idx, result);
                }
                Gathered::Blocked(missing) => state.block(idx, missing),
                Gathered::Failed(e) => state.finish(idx, Err(e)),
            }
        }
        Ok(state.into_report())
    }
}

struct Job {
    idx: NodeId,
    inputs: PortValues,
}

struct Done {
    idx: NodeId,
    result: Result<PortValues, StageError>,
}

/// Runs independent nodes concurrently on a fixed pool of worker threads.
///
/// The calling thread coordinates: it hands ready nodes to the workers over
/// a `flume` channel and releases consumers as results come back.
pub struct ThreadedExecutor {
    threads: usize,
    events: Option<Sender<PipelineEvent>>,
}

impl ThreadedExecutor {
    pub fn new(threads: usize) -> Self {
        Self { threads: threads.max(1), events: None }
    }

    pub fn with_events(mut self, tx: Sender<PipelineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}

impl Default for ThreadedExecutor {
    fn default() -> Self {
        let threads = thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self::new(threads)
    }
}

/// Decrements the pending count of every consumer of `idx`.
fn release(
    graph: &FinalizedGraph,
    idx: NodeId,
    pending: &mut HashMap<NodeId, usize>,
    ready: &mut VecDeque<NodeId>,
) {
    for next in graph.downstream(idx) {
        if let Some(count) = pending.get_mut(&next) {
            *count -= 1;
            if *count == 0 {
                ready.push_back(next);
            }
        }
    }
}

impl ExecutionEngine for ThreadedExecutor {
    fn execute(&self, graph: &FinalizedGraph, inputs: PortValues) -> PipelineResult<RunReport> {
        graph.validate_inputs(&inputs)?;
        let mut state = RunState::new(graph, self.events.as_ref());
        let run_id = state.run_id;

        thread::scope(|scope| -> PipelineResult<()> {
            let (job_tx, job_rx) = flume::unbounded::<Job>();
            let (done_tx, done_rx) = flume::unbounded::<Done>();

            for i in 0..self.threads {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                thread::Builder::new()
                    .name(format!("pipeline-worker-{}", i))
                    .spawn_scoped(scope, move || {
                        while let Ok(job) = job_rx.recv() {
                            let node = graph.node(job.idx);
                            let ctx = StageContext { node: &node.name, run_id };
                            let result = run_stage(node, &job.inputs, ctx);
                            if done_tx.send(Done { idx: job.idx, result }).is_err() {
                                break;
                            }
                        }
                    })
                    .map_err(|e| PipelineError::Other(anyhow!("failed to spawn worker thread: {}", e)))?;
            }
            drop(done_tx);
            debug!("Started {} worker threads", self.threads);

            let mut pending: HashMap<NodeId, usize> = graph
                .order()
                .iter()
                .map(|&idx| (idx, graph.upstream(idx).len()))
                .collect();
            let mut ready: VecDeque<NodeId> = graph
                .order()
                .iter()
                .copied()
                .filter(|idx| pending.get(idx) == Some(&0))
                .collect();
            let mut in_flight = 0usize;

            loop {
                while let Some(idx) = ready.pop_front() {
                    match state.prepare(idx, &inputs) {
                        Gathered::Ready(values) => {
                            state.start(idx);
                            job_tx
                                .send(Job { idx, inputs: values })
                                .map_err(|_| PipelineError::Other(anyhow!("worker pool shut down")))?;
                            in_flight += 1;
                        }
                        Gathered::Blocked(missing) => {
                            state.block(idx, missing);
                            release(graph, idx, &mut pending, &mut ready);
                        }
                        Gathered::Failed(e) => {
                            state.finish(idx, Err(e));
                            release(graph, idx, &mut pending, &mut ready);
                        }
                    }
                }
                if in_flight == 0 {
                    break;
                }
                let done = done_rx
                    .recv()
                    .map_err(|_| PipelineError::Other(anyhow!("all worker threads exited")))?;
                in_flight -= 1;
                state.finish(done.idx, done.result);
                release(graph, done.idx, &mut pending, &mut ready);
            }
            Ok(())
        })?;

        Ok(state.into_report())
    }
}
