//! Port graph construction and validation.
//!
//! The graph is built incrementally and every edge is checked as it is
//! added, so an invalid wiring is reported at the call that introduced it.
//! [`PortGraph::finalize`] performs the remaining whole-graph checks and
//! freezes the result into a topologically ordered [`FinalizedGraph`].

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use tracing::debug;

use crate::data::{PortType, PortValues};
use crate::error::GraphError;
use crate::selector::Selector;
use crate::stage::{PortSpec, Stage};

pub type NodeId = NodeIndex;

/// A stage placed in the graph under a unique name.
pub struct GraphNode {
    pub name: String,
    pub stage: Arc<dyn Stage>,
    pub inputs: Vec<PortSpec>,
    pub outputs: Vec<PortSpec>,
}

impl GraphNode {
    pub fn input(&self, port: &str) -> Option<&PortSpec> {
        self.inputs.iter().find(|p| p.name == port)
    }

    pub fn output(&self, port: &str) -> Option<&PortSpec> {
        self.outputs.iter().find(|p| p.name == port)
    }
}

/// Edge payload: which output feeds which input, and how.
#[derive(Debug, Clone)]
pub struct Connection {
    pub source_port: String,
    pub target_port: String,
    pub selector: Option<Selector>,
}

/// Mutable graph under construction.
#[derive(Default)]
pub struct PortGraph {
    graph: DiGraph<GraphNode, Connection>,
    names: HashMap<String, NodeId>,
}

impl PortGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        stage: Arc<dyn Stage>,
    ) -> Result<NodeId, GraphError> {
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(GraphError::DuplicateNode(name));
        }
        let node = GraphNode {
            inputs: stage.inputs(),
            outputs: stage.outputs(),
            name: name.clone(),
            stage,
        };
        let idx = self.graph.add_node(node);
        self.names.insert(name, idx);
        Ok(idx)
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    pub fn node(&self, idx: NodeId) -> Result<&GraphNode, GraphError> {
        self.graph
            .node_weight(idx)
            .ok_or_else(|| GraphError::UnknownNode(format!("#{}", idx.index())))
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Connects `src.src_port` to `dst.dst_port`, optionally through a
    /// selector.
    pub fn connect(
        &mut self,
        src: NodeId,
        src_port: &str,
        dst: NodeId,
        dst_port: &str,
        selector: Option<Selector>,
    ) -> Result<EdgeIndex, GraphError> {
        let producer = self.node(src)?;
        let consumer = self.node(dst)?;
        let edge = match &selector {
            Some(s) => format!("{}.{} -[{}]-> {}.{}", producer.name, src_port, s.name(), consumer.name, dst_port),
            None => format!("{}.{} -> {}.{}", producer.name, src_port, consumer.name, dst_port),
        };

        let produced = producer
            .output(src_port)
            .ok_or_else(|| GraphError::UnknownPort {
                node: producer.name.clone(),
                port: src_port.to_string(),
                direction: "output",
            })?
            .ty;
        let expected = consumer
            .input(dst_port)
            .ok_or_else(|| GraphError::UnknownPort {
                node: consumer.name.clone(),
                port: dst_port.to_string(),
                direction: "input",
            })?
            .ty;

        let delivered = match &selector {
            Some(s) if s.input_type() != produced => {
                return Err(GraphError::PortType { edge, expected: s.input_type(), found: produced });
            }
            Some(s) => s.output_type(),
            None => produced,
        };
        if delivered != expected {
            return Err(GraphError::PortType { edge, expected, found: delivered });
        }

        if let Some(existing) = self.producer_of(dst, dst_port) {
            return Err(GraphError::MultipleProducers {
                node: consumer.name.clone(),
                port: dst_port.to_string(),
                existing,
            });
        }

        if src == dst || has_path_connecting(&self.graph, dst, src, None) {
            return Err(GraphError::Cycle {
                from: producer.name.clone(),
                to: consumer.name.clone(),
            });
        }

        debug!("Wired {}", edge);
        let connection = Connection {
            source_port: src_port.to_string(),
            target_port: dst_port.to_string(),
            selector,
        };
        Ok(self.graph.add_edge(src, dst, connection))
    }

    /// `node.port` description of whatever already feeds `dst.dst_port`.
    fn producer_of(&self, dst: NodeId, dst_port: &str) -> Option<String> {
        self.graph
            .edges_directed(dst, Direction::Incoming)
            .find(|e| e.weight().target_port == dst_port)
            .map(|e| format!("{}.{}", self.graph[e.source()].name, e.weight().source_port))
    }

    /// Moves every node and edge of `other` into this graph, prefixing node
    /// names with `prefix.`. Returns the index mapping.
    pub fn absorb(
        &mut self,
        other: PortGraph,
        prefix: &str,
    ) -> Result<HashMap<NodeId, NodeId>, GraphError> {
        let (nodes, edges) = other.graph.into_nodes_edges();
        let mut mapping = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.into_iter().enumerate() {
            let node = node.weight;
            let name = format!("{}.{}", prefix, node.name);
            if self.names.contains_key(&name) {
                return Err(GraphError::DuplicateNode(name));
            }
            let idx = self.graph.add_node(GraphNode { name: name.clone(), ..node });
            self.names.insert(name, idx);
            mapping.insert(NodeIndex::new(i), idx);
        }
        for edge in edges {
            let (src, dst) = (mapping[&edge.source()], mapping[&edge.target()]);
            self.graph.add_edge(src, dst, edge.weight);
        }
        Ok(mapping)
    }

    /// Checks that every required input is connected and freezes the graph.
    ///
    /// `external_input` is the node whose inputs are supplied by the caller
    /// at run time rather than by edges.
    pub fn finalize(
        self,
        name: impl Into<String>,
        external_input: Option<NodeId>,
        external_output: Option<NodeId>,
    ) -> Result<FinalizedGraph, GraphError> {
        for idx in self.graph.node_indices() {
            if Some(idx) == external_input {
                continue;
            }
            let node = &self.graph[idx];
            for port in node.inputs.iter().filter(|p| p.required) {
                if self.producer_of(idx, &port.name).is_none() {
                    return Err(GraphError::UnresolvedRequiredPort {
                        node: node.name.clone(),
                        port: port.name.clone(),
                    });
                }
            }
        }

        let order = toposort(&self.graph, None).map_err(|cycle| {
            let name = self.graph[cycle.node_id()].name.clone();
            GraphError::Cycle { from: name.clone(), to: name }
        })?;

        Ok(FinalizedGraph {
            name: name.into(),
            graph: self.graph,
            names: self.names,
            order,
            external_input,
            external_output,
        })
    }
}

/// Immutable, topologically ordered graph ready for an execution engine.
pub struct FinalizedGraph {
    name: String,
    graph: DiGraph<GraphNode, Connection>,
    names: HashMap<String, NodeId>,
    order: Vec<NodeId>,
    external_input: Option<NodeId>,
    external_output: Option<NodeId>,
}

impl FinalizedGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Nodes in a valid execution order.
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn node(&self, idx: NodeId) -> &GraphNode {
        &self.graph[idx]
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn external_input(&self) -> Option<NodeId> {
        self.external_input
    }

    pub fn external_output(&self) -> Option<NodeId> {
        self.external_output
    }

    /// Incoming connections of `idx` with their producer.
    pub fn incoming(&self, idx: NodeId) -> impl Iterator<Item = (NodeId, &Connection)> + '_ {
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| (e.source(), e.weight()))
    }

    /// Distinct producer nodes of `idx`.
    pub fn upstream(&self, idx: NodeId) -> Vec<NodeId> {
        let mut nodes: Vec<_> = self.graph.neighbors_directed(idx, Direction::Incoming).collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }

    /// Distinct consumer nodes of `idx`.
    pub fn downstream(&self, idx: NodeId) -> Vec<NodeId> {
        let mut nodes: Vec<_> = self.graph.neighbors_directed(idx, Direction::Outgoing).collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }

    /// Declared external input ports.
    pub fn external_ports(&self) -> &[PortSpec] {
        match self.external_input {
            Some(idx) => &self.graph[idx].inputs,
            None => &[],
        }
    }

    /// Checks caller-supplied values against the external input ports.
    pub fn validate_inputs(&self, values: &PortValues) -> Result<(), GraphError> {
        let ports = self.external_ports();
        for (name, value) in values.iter() {
            let port = ports.iter().find(|p| &p.name == name).ok_or_else(|| GraphError::UnknownPort {
                node: self.external_node_name(),
                port: name.clone(),
                direction: "input",
            })?;
            if value.port_type() != port.ty {
                return Err(GraphError::ExternalInputType {
                    port: name.clone(),
                    expected: port.ty,
                    found: value.port_type(),
                });
            }
        }
        if let Some(missing) = ports.iter().find(|p| p.required && !values.contains(&p.name)) {
            return Err(GraphError::MissingExternalInput(missing.name.clone()));
        }
        Ok(())
    }

    fn external_node_name(&self) -> String {
        self.external_input
            .map(|idx| self.graph[idx].name.clone())
            .unwrap_or_else(|| "inputnode".to_string())
    }

    /// Type of an output port, if the node and port exist.
    pub fn output_type(&self, node: &str, port: &str) -> Option<PortType> {
        self.find(node)
            .and_then(|idx| self.graph[idx].output(port))
            .map(|p| p.ty)
    }
}
