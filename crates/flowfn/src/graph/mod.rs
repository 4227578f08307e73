//! Arena-backed dataflow graph.
//!
//! Nodes and edges live in tombstoned arenas keyed by stable integer ids;
//! removing a node invalidates only that id and detaches its incident edges.
//! Every graph owns a distinguished source and sink node. Control edges carry
//! ordering only, no value.

mod def;

pub use def::{graph_from_def, to_graph_def, GraphDef, NodeDef};

use smallvec::SmallVec;

use crate::types::{AttrMap, AttrValue, DataType};

/// Stable node identifier; an index into the owning graph's node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Stable edge identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    Source,
    Sink,
    Op,
}

/// One output of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub node: NodeId,
    pub index: usize,
}

impl Endpoint {
    pub fn new(node: NodeId, index: usize) -> Self {
        Endpoint { node, index }
    }

    /// Display name: `node:index`, or the bare node name for index 0.
    pub fn name(&self, graph: &Graph) -> String {
        let node = graph.node(self.node);
        if self.index == 0 {
            node.name.clone()
        } else {
            format!("{}:{}", node.name, self.index)
        }
    }

    /// Value type, looked up from the producing node's declared outputs.
    pub fn dtype(&self, graph: &Graph) -> DataType {
        graph.node(self.node).output_type(self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Data { src_output: usize, dst_input: usize },
    Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub src: NodeId,
    pub dst: NodeId,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn is_control(&self) -> bool {
        matches!(self.kind, EdgeKind::Control)
    }

    /// Output slot on the producing node. Only meaningful for data edges.
    pub fn src_output(&self) -> usize {
        match self.kind {
            EdgeKind::Data { src_output, .. } => src_output,
            EdgeKind::Control => panic!("control edge has no data slots"),
        }
    }

    /// Input slot on the consuming node. Only meaningful for data edges.
    pub fn dst_input(&self) -> usize {
        match self.kind {
            EdgeKind::Data { dst_input, .. } => dst_input,
            EdgeKind::Control => panic!("control edge has no data slots"),
        }
    }

    pub fn src_endpoint(&self) -> Endpoint {
        Endpoint::new(self.src, self.src_output())
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub op: String,
    pub attrs: AttrMap,
    pub class: NodeClass,
    pub is_stateful: bool,
    pub is_control_flow: bool,
    pub in_types: SmallVec<[DataType; 4]>,
    pub out_types: SmallVec<[DataType; 4]>,
    in_edges: SmallVec<[EdgeId; 4]>,
    out_edges: SmallVec<[EdgeId; 4]>,
}

impl Node {
    pub fn num_inputs(&self) -> usize {
        self.in_types.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.out_types.len()
    }

    pub fn input_type(&self, slot: usize) -> DataType {
        self.in_types[slot]
    }

    pub fn output_type(&self, slot: usize) -> DataType {
        self.out_types[slot]
    }

    pub fn is_source(&self) -> bool {
        self.class == NodeClass::Source
    }

    pub fn is_sink(&self) -> bool {
        self.class == NodeClass::Sink
    }

    /// A regular operation node (neither source nor sink).
    pub fn is_op(&self) -> bool {
        self.class == NodeClass::Op
    }
}

/// Everything needed to materialize a node; types must already be resolved
/// against the op signature.
#[derive(Debug, Clone)]
pub struct NodeInit {
    pub name: String,
    pub op: String,
    pub attrs: AttrMap,
    pub is_stateful: bool,
    pub is_control_flow: bool,
    pub in_types: SmallVec<[DataType; 4]>,
    pub out_types: SmallVec<[DataType; 4]>,
}

impl NodeInit {
    pub fn new(name: impl Into<String>, op: impl Into<String>) -> Self {
        NodeInit {
            name: name.into(),
            op: op.into(),
            attrs: AttrMap::new(),
            is_stateful: false,
            is_control_flow: false,
            in_types: SmallVec::new(),
            out_types: SmallVec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Option<Node>>,
    edges: Vec<Option<Edge>>,
    source: NodeId,
    sink: NodeId,
    name_counter: u32,
}

impl Graph {
    pub fn new() -> Self {
        let mut graph = Graph {
            nodes: Vec::new(),
            edges: Vec::new(),
            source: NodeId(0),
            sink: NodeId(0),
            name_counter: 0,
        };
        graph.source = graph.insert(Node {
            name: "_SOURCE".to_string(),
            op: "_Source".to_string(),
            attrs: AttrMap::new(),
            class: NodeClass::Source,
            is_stateful: false,
            is_control_flow: false,
            in_types: SmallVec::new(),
            out_types: SmallVec::new(),
            in_edges: SmallVec::new(),
            out_edges: SmallVec::new(),
        });
        graph.sink = graph.insert(Node {
            name: "_SINK".to_string(),
            op: "_Sink".to_string(),
            attrs: AttrMap::new(),
            class: NodeClass::Sink,
            is_stateful: false,
            is_control_flow: false,
            in_types: SmallVec::new(),
            out_types: SmallVec::new(),
            in_edges: SmallVec::new(),
            out_edges: SmallVec::new(),
        });
        graph
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    pub fn sink(&self) -> NodeId {
        self.sink
    }

    /// Exclusive upper bound on node ids ever allocated, including removed
    /// ones; sized for id-indexed scratch tables.
    pub fn node_bound(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.iter().filter(|e| e.is_some()).count()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.0 as usize]
            .as_ref()
            .expect("node id must refer to a live node")
    }

    pub fn maybe_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize).and_then(|n| n.as_ref())
    }

    /// Live node ids, source and sink included, in id order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|_| NodeId(i as u32)))
    }

    /// Live op node ids (source and sink excluded).
    pub fn op_node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().enumerate().filter_map(|(i, n)| match n {
            Some(node) if node.is_op() => Some(NodeId(i as u32)),
            _ => None,
        })
    }

    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        self.edges.iter().filter_map(|e| *e)
    }

    /// Snapshot of the edges entering `id`; safe to hold across mutation.
    pub fn in_edges(&self, id: NodeId) -> Vec<Edge> {
        self.node(id)
            .in_edges
            .iter()
            .map(|e| self.edge(*e))
            .collect()
    }

    /// Snapshot of the edges leaving `id`; safe to hold across mutation.
    pub fn out_edges(&self, id: NodeId) -> Vec<Edge> {
        self.node(id)
            .out_edges
            .iter()
            .map(|e| self.edge(*e))
            .collect()
    }

    /// The data edge feeding input slot `slot` of `id`, if present.
    pub fn input_edge(&self, id: NodeId, slot: usize) -> Option<Edge> {
        self.node(id)
            .in_edges
            .iter()
            .map(|e| self.edge(*e))
            .find(|e| !e.is_control() && e.dst_input() == slot)
    }

    pub fn add_node(&mut self, init: NodeInit) -> NodeId {
        self.insert(Node {
            name: init.name,
            op: init.op,
            attrs: init.attrs,
            class: NodeClass::Op,
            is_stateful: init.is_stateful,
            is_control_flow: init.is_control_flow,
            in_types: init.in_types,
            out_types: init.out_types,
            in_edges: SmallVec::new(),
            out_edges: SmallVec::new(),
        })
    }

    pub fn add_edge(
        &mut self,
        src: NodeId,
        src_output: usize,
        dst: NodeId,
        dst_input: usize,
    ) -> EdgeId {
        debug_assert!(src_output < self.node(src).num_outputs());
        debug_assert!(dst_input < self.node(dst).num_inputs());
        self.insert_edge(Edge {
            src,
            dst,
            kind: EdgeKind::Data {
                src_output,
                dst_input,
            },
        })
    }

    pub fn add_control_edge(&mut self, src: NodeId, dst: NodeId) -> EdgeId {
        self.insert_edge(Edge {
            src,
            dst,
            kind: EdgeKind::Control,
        })
    }

    /// Removes a node and detaches every incident edge. The source and sink
    /// are permanent and must not be removed.
    pub fn remove_node(&mut self, id: NodeId) {
        assert!(
            id != self.source && id != self.sink,
            "source and sink nodes cannot be removed"
        );
        let node = self.nodes[id.0 as usize]
            .take()
            .expect("node id must refer to a live node");
        for edge_id in node.in_edges.iter().chain(node.out_edges.iter()) {
            if let Some(edge) = self.edges[edge_id.0 as usize].take() {
                let other = if edge.src == id { edge.dst } else { edge.src };
                if let Some(other_node) = self.nodes[other.0 as usize].as_mut() {
                    other_node.in_edges.retain(|e| e != edge_id);
                    other_node.out_edges.retain(|e| e != edge_id);
                }
            }
        }
    }

    /// Generates a node name that is unique within this graph.
    pub fn new_name(&mut self, prefix: &str) -> String {
        let name = format!("{prefix}/_{}", self.name_counter);
        self.name_counter += 1;
        name
    }

    /// Adds a no-op barrier node used to gather control dependencies.
    pub fn add_no_op(&mut self) -> NodeId {
        let name = self.new_name("Func");
        self.add_node(NodeInit::new(name, "NoOp"))
    }

    /// Adds an identity node fed by `input` and wires the data edge.
    pub fn add_identity(&mut self, input: Endpoint) -> NodeId {
        let dtype = input.dtype(self);
        debug_assert!(!dtype.is_ref(), "identity over a reference output");
        let name = self.new_name("Func");
        let mut init = NodeInit::new(name, "Identity");
        init.attrs.insert("T".to_string(), AttrValue::Type(dtype));
        init.in_types.push(dtype);
        init.out_types.push(dtype);
        let id = self.add_node(init);
        self.add_edge(input.node, input.index, id, 0);
        id
    }

    /// Adds an argument-placeholder node tagged with `index`.
    pub fn add_arg(&mut self, dtype: DataType, index: usize) -> NodeId {
        let name = self.new_name("Func");
        let mut init = NodeInit::new(name, crate::library::ARG_OP);
        init.attrs.insert("T".to_string(), AttrValue::Type(dtype));
        init.attrs
            .insert("index".to_string(), AttrValue::Int(index as i64));
        init.is_stateful = true;
        init.out_types.push(dtype);
        self.add_node(init)
    }

    /// Adds a return-placeholder node tagged with `index`, wired to `input`.
    pub fn add_ret(&mut self, input: Endpoint, index: usize) -> NodeId {
        let dtype = input.dtype(self);
        let name = self.new_name("Func");
        let mut init = NodeInit::new(name, crate::library::RET_OP);
        init.attrs.insert("T".to_string(), AttrValue::Type(dtype));
        init.attrs
            .insert("index".to_string(), AttrValue::Int(index as i64));
        init.is_stateful = true;
        init.in_types.push(dtype);
        let id = self.add_node(init);
        self.add_edge(input.node, input.index, id, 0);
        id
    }

    fn insert(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(node));
        id
    }

    fn insert_edge(&mut self, edge: Edge) -> EdgeId {
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Some(edge));
        self.nodes[edge.src.0 as usize]
            .as_mut()
            .expect("edge source must be live")
            .out_edges
            .push(id);
        self.nodes[edge.dst.0 as usize]
            .as_mut()
            .expect("edge destination must be live")
            .in_edges
            .push(id);
        id
    }

    fn edge(&self, id: EdgeId) -> Edge {
        self.edges[id.0 as usize].expect("edge id must refer to a live edge")
    }
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}
