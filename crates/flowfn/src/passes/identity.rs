use smallvec::SmallVec;

use crate::graph::{Edge, Graph, NodeId};

/// If `edges` contains exactly one non-control data edge, returns it.
///
/// Returns `None` when any control edge is present, when there are two or
/// more data edges, or when the single source output carries a reference
/// type (folding would silently de-reference it).
fn the_only_data_edge(graph: &Graph, edges: &[Edge]) -> Option<Edge> {
    let mut ret = None;
    for edge in edges {
        if edge.is_control() || ret.is_some() {
            return None;
        }
        if edge.src_endpoint().dtype(graph).is_ref() {
            return None;
        }
        ret = Some(*edge);
    }
    ret
}

/// Splices out identity nodes with a single data input: every consumer is
/// rewired directly to the identity's source, then the identity is removed.
pub fn remove_identity_nodes(graph: &mut Graph) -> bool {
    tracing::debug!("removing identity nodes");
    let matches: SmallVec<[NodeId; 8]> = graph
        .op_node_ids()
        .filter(|&id| {
            let node = graph.node(id);
            node.op == "Identity" && the_only_data_edge(graph, &graph.in_edges(id)).is_some()
        })
        .collect();

    let mut removed_any = false;
    for id in matches {
        // Earlier splices may have rewired this node's input; re-fetch.
        let Some(input) = the_only_data_edge(graph, &graph.in_edges(id)) else {
            continue;
        };
        for out in graph.out_edges(id) {
            if out.is_control() {
                graph.add_control_edge(input.src, out.dst);
            } else {
                graph.add_edge(input.src, input.src_output(), out.dst, out.dst_input());
            }
        }
        tracing::debug!(node = %graph.node(id).name, "removing identity");
        graph.remove_node(id);
        removed_any = true;
    }
    removed_any
}
