use std::collections::VecDeque;

use crate::graph::{Graph, NodeId};

/// Removes every node with no path to an essential node.
///
/// Essential nodes are the source, the sink, control-flow ops, and stateful
/// ops; reachability is computed backward from them along input edges
/// (control edges included), so anything that cannot influence an externally
/// observable effect is dropped.
pub fn remove_dead_nodes(graph: &mut Graph) -> bool {
    tracing::debug!("removing dead nodes");
    let mut visited = vec![false; graph.node_bound()];
    let mut queue: VecDeque<NodeId> = VecDeque::new();
    for id in graph.node_ids() {
        let node = graph.node(id);
        if node.is_source() || node.is_sink() || node.is_control_flow || node.is_stateful {
            visited[id.0 as usize] = true;
            queue.push_back(id);
        }
    }
    while let Some(id) = queue.pop_front() {
        for edge in graph.in_edges(id) {
            if !visited[edge.src.0 as usize] {
                visited[edge.src.0 as usize] = true;
                queue.push_back(edge.src);
            }
        }
    }

    let mut removed_any = false;
    for index in 0..visited.len() {
        let id = NodeId(index as u32);
        if !visited[index] && graph.maybe_node(id).is_some() {
            graph.remove_node(id);
            removed_any = true;
        }
    }
    removed_any
}
