//! Graph interchange form.
//!
//! A [`GraphDef`] lists nodes in forward-topological order: each node appears
//! only after all of its non-control predecessors. Input strings follow the
//! `name`, `name:k`, `^name` grammar, where `^` marks a control-only
//! dependency and `:k` selects output `k` (default 0).

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::graph::{Graph, NodeId};
use crate::library::FunctionLibrary;
use crate::types::AttrMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub name: String,
    pub op: String,
    #[serde(default)]
    pub attrs: AttrMap,
    #[serde(default)]
    pub inputs: Vec<String>,
}

impl NodeDef {
    pub fn new(name: impl Into<String>, op: impl Into<String>) -> Self {
        NodeDef {
            name: name.into(),
            op: op.into(),
            attrs: AttrMap::new(),
            inputs: Vec::new(),
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: crate::types::AttrValue) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.inputs.push(input.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDef {
    pub nodes: Vec<NodeDef>,
}

/// Emits `graph` in forward-topological order using an in-degree count per
/// node and a FIFO ready queue seeded with zero-in-degree nodes.
pub fn to_graph_def(graph: &Graph) -> GraphDef {
    let mut pending = vec![0usize; graph.node_bound()];
    let mut ready = VecDeque::new();
    for id in graph.node_ids() {
        pending[id.0 as usize] = graph.in_edges(id).len();
        if pending[id.0 as usize] == 0 {
            ready.push_back(id);
        }
    }

    let mut def = GraphDef::default();
    while let Some(id) = ready.pop_front() {
        for edge in graph.out_edges(id) {
            let next = edge.dst.0 as usize;
            pending[next] -= 1;
            if pending[next] == 0 {
                ready.push_back(edge.dst);
            }
        }
        let node = graph.node(id);
        if !node.is_op() {
            continue;
        }

        let mut ndef = NodeDef::new(node.name.clone(), node.op.clone());
        ndef.attrs = node.attrs.clone();

        let mut data_inputs: Vec<Option<String>> = vec![None; node.num_inputs()];
        let mut control_inputs = Vec::new();
        for edge in graph.in_edges(id) {
            let src = graph.node(edge.src);
            if !src.is_op() {
                continue;
            }
            if edge.is_control() {
                control_inputs.push(format!("^{}", src.name));
            } else {
                let slot = edge.dst_input();
                if data_inputs[slot].is_some() {
                    tracing::warn!(node = %node.name, slot, "multiple edges into one input slot");
                    continue;
                }
                data_inputs[slot] = Some(if edge.src_output() == 0 {
                    src.name.clone()
                } else {
                    format!("{}:{}", src.name, edge.src_output())
                });
            }
        }
        for input in data_inputs {
            ndef.inputs.push(input.unwrap_or_else(|| "unknown".to_string()));
        }
        ndef.inputs.extend(control_inputs);
        def.nodes.push(ndef);
    }
    def
}

/// Builds a [`Graph`] from interchange form, resolving each node's type
/// signature against the library's op registry.
///
/// Nodes with no inputs are control-attached to the source, and nodes with no
/// outputs to the sink, so reachability-based passes see every node.
pub fn graph_from_def(def: &GraphDef, lib: &FunctionLibrary) -> Result<Graph> {
    let mut graph = Graph::new();
    let mut by_name: HashMap<&str, NodeId> = HashMap::new();

    for ndef in &def.nodes {
        let init = lib.resolve_node(ndef)?;
        if by_name.contains_key(ndef.name.as_str()) {
            return Err(Error::invalid_argument(format!(
                "duplicate node name {}",
                ndef.name
            )));
        }
        let id = graph.add_node(init);
        by_name.insert(ndef.name.as_str(), id);
    }

    for ndef in &def.nodes {
        let dst = by_name[ndef.name.as_str()];
        let mut slot = 0usize;
        for input in &ndef.inputs {
            if let Some(src_name) = input.strip_prefix('^') {
                let src = *by_name.get(src_name).ok_or_else(|| {
                    Error::invalid_argument(format!("unknown control input {src_name}"))
                })?;
                graph.add_control_edge(src, dst);
                continue;
            }
            let (src_name, src_output) = match input.split_once(':') {
                Some((name, index)) => {
                    let index: usize = index.parse().map_err(|_| {
                        Error::invalid_argument(format!("malformed input {input}"))
                    })?;
                    (name, index)
                }
                None => (input.as_str(), 0),
            };
            let src = *by_name
                .get(src_name)
                .ok_or_else(|| Error::invalid_argument(format!("unknown input {src_name}")))?;
            let src_node = graph.node(src);
            if src_output >= src_node.num_outputs() {
                return Err(Error::invalid_argument(format!(
                    "input {input} selects output {src_output} of {src_name}, which has {}",
                    src_node.num_outputs()
                )));
            }
            if graph.node(dst).num_inputs() <= slot {
                return Err(Error::invalid_argument(format!(
                    "too many inputs for node {}",
                    ndef.name
                )));
            }
            let declared = graph.node(dst).input_type(slot);
            let actual = src_node.output_type(src_output);
            // A reference output may feed a value input of the base type.
            if declared != actual && actual.base_type() != declared {
                return Err(Error::invalid_argument(format!(
                    "type mismatch wiring {input} into {}:{slot}: {actual} vs. {declared}",
                    ndef.name
                )));
            }
            graph.add_edge(src, src_output, dst, slot);
            slot += 1;
        }
        if slot != graph.node(dst).num_inputs() {
            return Err(Error::invalid_argument(format!(
                "node {} expects {} inputs, got {slot}",
                ndef.name,
                graph.node(dst).num_inputs()
            )));
        }
    }

    fixup_source_and_sink(&mut graph);
    Ok(graph)
}

/// Control-attaches in-degree-zero op nodes to the source and out-degree-zero
/// op nodes to the sink.
fn fixup_source_and_sink(graph: &mut Graph) {
    let ids: Vec<NodeId> = graph.op_node_ids().collect();
    for id in ids {
        if graph.in_edges(id).is_empty() {
            graph.add_control_edge(graph.source(), id);
        }
        if graph.out_edges(id).is_empty() {
            graph.add_control_edge(id, graph.sink());
        }
    }
}
