use std::collections::HashMap;
use std::sync::Arc;

use crate::body::FunctionBody;
use crate::graph::{Endpoint, Graph, Node, NodeId, NodeInit};
use crate::runtime::Runtime;

/// Whether `fbody` can be inlined at `node`: equal input/output arity and
/// matching types on the call node and on the body's placeholder signature.
fn validate_inlining(node: &Node, fbody: &FunctionBody) -> bool {
    if node.num_inputs() != fbody.arg_types.len() || node.num_inputs() != fbody.arg_nodes.len() {
        return false;
    }
    if node.num_outputs() != fbody.ret_types.len() || node.num_outputs() != fbody.ret_nodes.len() {
        return false;
    }
    for (slot, dtype) in fbody.arg_types.iter().enumerate() {
        if node.input_type(slot) != *dtype {
            return false;
        }
    }
    for (slot, dtype) in fbody.ret_types.iter().enumerate() {
        if node.output_type(slot) != *dtype {
            return false;
        }
    }
    true
}

/// Replaces the call node `caller` with a name-qualified copy of the callee
/// graph, preserving the caller's external data and control contract.
///
/// A type-signature mismatch logs a warning and leaves the call node in
/// place: the graph stays correct, the call simply executes through the
/// runtime instead of being inlined.
pub fn inline_function_body(graph: &mut Graph, caller: NodeId, fbody: &FunctionBody) {
    let caller_node = graph.node(caller);
    if !validate_inlining(caller_node, fbody) {
        tracing::warn!(
            caller = %caller_node.name,
            callee = %fbody.fdef.name,
            "inlining mismatch; leaving the call node in place"
        );
        return;
    }
    let caller_name = caller_node.name.clone();
    let num_inputs = caller_node.num_inputs();
    let num_outputs = caller_node.num_outputs();

    // Copy the callee's op nodes, prefixing names with the caller's to avoid
    // collisions, then every edge between two copied nodes.
    let mut node_map: HashMap<NodeId, NodeId> = HashMap::new();
    for id in fbody.graph.op_node_ids() {
        let node = fbody.graph.node(id);
        let mut init = NodeInit::new(format!("{caller_name}/{}", node.name), node.op.clone());
        init.attrs = node.attrs.clone();
        init.is_stateful = node.is_stateful;
        init.is_control_flow = node.is_control_flow;
        init.in_types = node.in_types.clone();
        init.out_types = node.out_types.clone();
        node_map.insert(id, graph.add_node(init));
    }
    for edge in fbody.graph.edges() {
        let (Some(&src), Some(&dst)) = (node_map.get(&edge.src), node_map.get(&edge.dst)) else {
            continue;
        };
        if edge.is_control() {
            graph.add_control_edge(src, dst);
        } else {
            graph.add_edge(src, edge.src_output(), dst, edge.dst_input());
        }
    }

    // Caller inputs: one identity per slot, fed by the caller's actual input.
    // All control-dependency inputs funnel through a single lazily created
    // barrier that each identity depends on.
    let mut inputs: Vec<Option<Endpoint>> = vec![None; num_inputs];
    let mut input_control_node: Option<NodeId> = None;
    for edge in graph.in_edges(caller) {
        if edge.is_control() {
            let barrier = match input_control_node {
                Some(barrier) => barrier,
                None => {
                    let barrier = graph.add_no_op();
                    input_control_node = Some(barrier);
                    barrier
                }
            };
            graph.add_control_edge(edge.src, barrier);
        } else {
            inputs[edge.dst_input()] = Some(edge.src_endpoint());
        }
    }
    for (slot, arg) in fbody.arg_nodes.iter().enumerate() {
        let arg_copy = node_map[arg];
        let endpoint = inputs[slot].expect("validated call node must have every input wired");
        let identity = graph.add_identity(endpoint);
        if let Some(barrier) = input_control_node {
            graph.add_control_edge(barrier, identity);
        }
        for edge in graph.out_edges(arg_copy) {
            if edge.is_control() {
                graph.add_control_edge(identity, edge.dst);
            } else {
                graph.add_edge(identity, 0, edge.dst, edge.dst_input());
            }
        }
        graph.remove_node(arg_copy);
    }

    // Callee returns: one identity per slot fed by the return placeholder's
    // single data predecessor, preserving its control predecessors.
    let mut outputs: Vec<NodeId> = Vec::with_capacity(num_outputs);
    for ret in fbody.ret_nodes.iter() {
        let ret_copy = node_map[ret];
        let in_edges = graph.in_edges(ret_copy);
        let data = in_edges
            .iter()
            .find(|edge| !edge.is_control())
            .expect("return placeholder must have a data input")
            .src_endpoint();
        let identity = graph.add_identity(data);
        for edge in &in_edges {
            if edge.is_control() {
                graph.add_control_edge(edge.src, identity);
            }
        }
        outputs.push(identity);
        graph.remove_node(ret_copy);
    }

    // Caller outputs: data consumers rewire to the per-slot identity; control
    // consumers redirect through a barrier depending on all output identities.
    let mut output_control_node: Option<NodeId> = None;
    for edge in graph.out_edges(caller) {
        if edge.is_control() {
            let barrier = match output_control_node {
                Some(barrier) => barrier,
                None => {
                    let barrier = graph.add_no_op();
                    for output in &outputs {
                        graph.add_control_edge(*output, barrier);
                    }
                    output_control_node = Some(barrier);
                    barrier
                }
            };
            graph.add_control_edge(barrier, edge.dst);
        } else {
            graph.add_edge(outputs[edge.src_output()], 0, edge.dst, edge.dst_input());
        }
    }

    graph.remove_node(caller);
}

/// Inlines every node whose op name instantiates to a known function body.
///
/// Candidates are snapshotted before any mutation, so structural changes made
/// while inlining never affect which nodes were selected. Returns whether
/// anything was inlined; drive to a fixpoint to expand nested calls.
pub fn expand_inline_functions(runtime: &Runtime, graph: &mut Graph) -> bool {
    let mut candidates: Vec<(NodeId, Arc<FunctionBody>)> = Vec::new();
    for id in graph.op_node_ids().collect::<Vec<_>>() {
        let node = graph.node(id);
        match runtime.instantiate(&node.op, &node.attrs) {
            Ok(handle) => candidates.push((id, runtime.function_body(handle))),
            // A primitive op, not a call site.
            Err(err) if err.is_not_found() => {
                tracing::trace!(node = %node.name, %err, "not expanding");
            }
            Err(err) => {
                tracing::warn!(node = %node.name, %err, "failed to instantiate for inlining");
            }
        }
    }
    for (id, fbody) in &candidates {
        inline_function_body(graph, *id, fbody);
    }
    !candidates.is_empty()
}
