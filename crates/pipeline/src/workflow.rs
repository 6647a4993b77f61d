//! Named, nestable sub-graphs.
//!
//! A [`Workflow`] owns a [`PortGraph`] with two identity pseudo-nodes,
//! `inputnode` and `outputnode`. Nesting a workflow into a parent absorbs its
//! nodes under the child's name, and the parent only ever talks to the
//! child's identity nodes.

use std::sync::Arc;

use crate::error::GraphError;
use crate::graph::{FinalizedGraph, NodeId, PortGraph};
use crate::selector::Selector;
use crate::stage::{PortSpec, Stage};
use crate::stages::Identity;

pub const INPUT_NODE: &str = "inputnode";
pub const OUTPUT_NODE: &str = "outputnode";

/// Where edges attach to a node. Plain nodes use the same index for both;
/// a nested workflow receives on its `inputnode` and emits from its
/// `outputnode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle {
    pub input: NodeId,
    pub output: NodeId,
}

impl NodeHandle {
    fn single(idx: NodeId) -> Self {
        Self { input: idx, output: idx }
    }
}

pub struct Workflow {
    name: String,
    description: Option<String>,
    graph: PortGraph,
    inputnode: NodeId,
    outputnode: NodeId,
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
}

impl Workflow {
    /// Creates an empty workflow exposing `inputs` and `outputs`.
    ///
    /// Required input ports must be connected by the parent (or supplied by
    /// the caller at the top level); every output port must be wired inside
    /// the workflow.
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<PortSpec>,
        outputs: Vec<PortSpec>,
    ) -> Result<Self, GraphError> {
        let mut graph = PortGraph::new();
        let inputnode = graph.add_node(INPUT_NODE, Arc::new(Identity::new(inputs.clone())))?;
        let outputnode = graph.add_node(OUTPUT_NODE, Arc::new(Identity::new(outputs.clone())))?;
        Ok(Self {
            name: name.into(),
            description: None,
            graph,
            inputnode,
            outputnode,
            inputs,
            outputs,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn input_ports(&self) -> &[PortSpec] {
        &self.inputs
    }

    pub fn output_ports(&self) -> &[PortSpec] {
        &self.outputs
    }

    pub fn inputnode(&self) -> NodeHandle {
        NodeHandle::single(self.inputnode)
    }

    pub fn outputnode(&self) -> NodeHandle {
        NodeHandle::single(self.outputnode)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn add_node<S: Stage + 'static>(
        &mut self,
        name: &str,
        stage: S,
    ) -> Result<NodeHandle, GraphError> {
        self.add_shared(name, Arc::new(stage))
    }

    pub fn add_shared(
        &mut self,
        name: &str,
        stage: Arc<dyn Stage>,
    ) -> Result<NodeHandle, GraphError> {
        self.graph.add_node(name, stage).map(NodeHandle::single)
    }

    /// Nests `child`; its nodes become `child_name.node`.
    pub fn add_workflow(&mut self, child: Workflow) -> Result<NodeHandle, GraphError> {
        let mapping = self.graph.absorb(child.graph, &child.name)?;
        let lookup = |idx: NodeId| {
            mapping
                .get(&idx)
                .copied()
                .ok_or_else(|| GraphError::UnknownNode(format!("{}.#{}", child.name, idx.index())))
        };
        Ok(NodeHandle {
            input: lookup(child.inputnode)?,
            output: lookup(child.outputnode)?,
        })
    }

    pub fn connect(
        &mut self,
        src: NodeHandle,
        src_port: &str,
        dst: NodeHandle,
        dst_port: &str,
    ) -> Result<(), GraphError> {
        self.graph.connect(src.output, src_port, dst.input, dst_port, None)?;
        Ok(())
    }

    pub fn connect_with(
        &mut self,
        src: NodeHandle,
        src_port: &str,
        dst: NodeHandle,
        dst_port: &str,
        selector: Selector,
    ) -> Result<(), GraphError> {
        self.graph.connect(src.output, src_port, dst.input, dst_port, Some(selector))?;
        Ok(())
    }

    /// Connects several `(source port, target port)` pairs between the same
    /// two nodes.
    pub fn connect_many(
        &mut self,
        src: NodeHandle,
        dst: NodeHandle,
        ports: &[(&str, &str)],
    ) -> Result<(), GraphError> {
        for (src_port, dst_port) in ports {
            self.connect(src, src_port, dst, dst_port)?;
        }
        Ok(())
    }

    /// Freezes the workflow as a top-level graph: its `inputnode` ports
    /// become the external inputs of the run.
    pub fn finalize(self) -> Result<FinalizedGraph, GraphError> {
        self.graph
            .finalize(self.name, Some(self.inputnode), Some(self.outputnode))
    }
}
