use smallvec::SmallVec;

use crate::graph::{Graph, NodeId};
use crate::library::{ARRAY_TO_LIST_OP, LIST_TO_ARRAY_OP};

/// Replaces each list/array pass-through adapter with one identity node per
/// slot, so downstream passes see plain single-value edges.
///
/// Control-dependency inputs of the converter are funneled through one
/// synthetic barrier that every per-slot identity depends on; control
/// consumers are redirected through a second barrier depending on all
/// identities. Both barriers are created lazily, only when such edges exist.
/// An internally inconsistent converter (duplicate data edge into one slot,
/// or an output slot with no identity) aborts the rewrite of that node only,
/// leaving it partially rewritten, and the pass moves on.
pub fn remove_list_array_converters(graph: &mut Graph) -> bool {
    tracing::debug!("removing list/array converters");
    let matches: SmallVec<[NodeId; 8]> = graph
        .op_node_ids()
        .filter(|&id| {
            let op = graph.node(id).op.as_str();
            op == LIST_TO_ARRAY_OP || op == ARRAY_TO_LIST_OP
        })
        .collect();

    let mut removed_any = false;
    'converters: for id in matches {
        let node = graph.node(id);
        if node.num_inputs() != node.num_outputs() {
            // Not expected. Skip.
            continue;
        }
        let arity = node.num_inputs();
        let node_name = node.name.clone();

        let mut identity_nodes: SmallVec<[Option<NodeId>; 8]> = SmallVec::from_elem(None, arity);
        let mut input_control_node: Option<NodeId> = None;
        for edge in graph.in_edges(id) {
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
                let slot = edge.dst_input();
                if identity_nodes[slot].is_some() {
                    tracing::warn!(node = %node_name, slot, "unexpected duplicated input while removing converter");
                    continue 'converters;
                }
                identity_nodes[slot] = Some(graph.add_identity(edge.src_endpoint()));
            }
        }
        if let Some(barrier) = input_control_node {
            for identity in identity_nodes.iter().flatten() {
                graph.add_control_edge(barrier, *identity);
            }
        }

        let mut output_control_node: Option<NodeId> = None;
        for edge in graph.out_edges(id) {
            if edge.is_control() {
                let barrier = match output_control_node {
                    Some(barrier) => barrier,
                    None => {
                        let barrier = graph.add_no_op();
                        output_control_node = Some(barrier);
                        barrier
                    }
                };
                graph.add_control_edge(barrier, edge.dst);
            } else {
                let Some(identity) = identity_nodes[edge.src_output()] else {
                    tracing::warn!(node = %node_name, slot = edge.src_output(), "unexpected missing input while removing converter");
                    continue 'converters;
                };
                graph.add_edge(identity, 0, edge.dst, edge.dst_input());
            }
        }
        if let Some(barrier) = output_control_node {
            for identity in identity_nodes.iter().flatten() {
                graph.add_control_edge(*identity, barrier);
            }
        }

        graph.remove_node(id);
        removed_any = true;
    }
    removed_any
}
