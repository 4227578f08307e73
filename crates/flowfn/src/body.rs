//! Instantiated function bodies.

use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::graph::{Graph, NodeId};
use crate::instantiate::FunctionDef;
use crate::library::{ARG_OP, RET_OP};
use crate::types::DataType;

/// An instantiated function: its originating definition, a typed graph, and
/// the argument/return placeholder nodes in index order.
///
/// `arg_nodes[i]` / `ret_nodes[i]` is the node of the placeholder op kind
/// tagged with `index = i`. The graph is immutable once cached; rewrite
/// passes always operate on a clone.
#[derive(Debug, Clone)]
pub struct FunctionBody {
    pub fdef: FunctionDef,
    pub graph: Graph,
    pub arg_types: Vec<DataType>,
    pub ret_types: Vec<DataType>,
    pub arg_nodes: SmallVec<[NodeId; 4]>,
    pub ret_nodes: SmallVec<[NodeId; 4]>,
}

impl FunctionBody {
    /// Builds a body by scanning `graph` for placeholder nodes and slotting
    /// them by their `index` attribute. Each index in `0..n` must occur
    /// exactly once per placeholder kind.
    pub fn new(
        fdef: FunctionDef,
        arg_types: Vec<DataType>,
        ret_types: Vec<DataType>,
        graph: Graph,
    ) -> Result<Self> {
        let mut arg_nodes: SmallVec<[Option<NodeId>; 4]> =
            SmallVec::from_elem(None, arg_types.len());
        let mut ret_nodes: SmallVec<[Option<NodeId>; 4]> =
            SmallVec::from_elem(None, ret_types.len());

        for id in graph.op_node_ids() {
            let node = graph.node(id);
            let slots = match node.op.as_str() {
                ARG_OP => &mut arg_nodes,
                RET_OP => &mut ret_nodes,
                _ => continue,
            };
            let index = node
                .attrs
                .get("index")
                .ok_or_else(|| {
                    Error::internal(format!("placeholder node {} has no index attr", node.name))
                })?
                .as_int()? as usize;
            let slot = slots.get_mut(index).ok_or_else(|| {
                Error::internal(format!(
                    "placeholder node {} has out-of-range index {index}",
                    node.name
                ))
            })?;
            if slot.replace(id).is_some() {
                return Err(Error::internal(format!(
                    "placeholder index {index} bound twice in function {}",
                    fdef.name
                )));
            }
        }

        let arg_nodes = collect_slots(&fdef.name, ARG_OP, arg_nodes)?;
        let ret_nodes = collect_slots(&fdef.name, RET_OP, ret_nodes)?;
        Ok(FunctionBody {
            fdef,
            graph,
            arg_types,
            ret_types,
            arg_nodes,
            ret_nodes,
        })
    }
}

fn collect_slots(
    func: &str,
    kind: &str,
    slots: SmallVec<[Option<NodeId>; 4]>,
) -> Result<SmallVec<[NodeId; 4]>> {
    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| {
                Error::internal(format!("function {func} has no {kind} node for index {index}"))
            })
        })
        .collect()
}
