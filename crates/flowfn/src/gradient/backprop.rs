//! Reverse-mode autodiff over an instantiated graph.
//!
//! The builder walks backward from the seeded return values. Each node whose
//! consumers have all contributed a gradient is expanded into a
//! `SymbolicGradient` call node whose inputs are the forward inputs followed
//! by the output gradients, and whose outputs are the input gradients; the
//! actual per-op math is resolved later through the gradient-rule registry
//! when that call node is instantiated. Multiple contributions to one
//! endpoint are summed with `AddN`; endpoints the walk never reaches get a
//! `ZerosLike` gradient.

use std::collections::{HashMap, VecDeque};

use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::graph::{Endpoint, Graph, NodeId, NodeInit};
use crate::library::{ARG_OP, GRADIENT_OP};
use crate::types::{AttrValue, DataType};

/// Adds gradient nodes to `graph` and returns, for each endpoint in
/// `x_endpoints`, the endpoint producing its gradient.
///
/// `y_nodes` are the return placeholders of the forward function and
/// `y_grads[i]` is the seed gradient flowing into `y_nodes[i]`'s input.
pub(crate) fn add_symbolic_gradients(
    graph: &mut Graph,
    y_nodes: &[NodeId],
    x_endpoints: &[Endpoint],
    y_grads: &[Endpoint],
) -> Result<Vec<Endpoint>> {
    SymbolicGradientBuilder {
        graph,
        backprops: HashMap::new(),
        pending: Vec::new(),
        ready: VecDeque::new(),
    }
    .compute(y_nodes, x_endpoints, y_grads)
}

struct SymbolicGradientBuilder<'a> {
    graph: &'a mut Graph,
    /// Accumulated gradient contributions per forward endpoint.
    backprops: HashMap<Endpoint, Vec<Endpoint>>,
    /// Outstanding contribution count per node id; a node is processed once
    /// every reachable consumer has backpropagated into it.
    pending: Vec<usize>,
    ready: VecDeque<NodeId>,
}

impl SymbolicGradientBuilder<'_> {
    fn compute(
        mut self,
        y_nodes: &[NodeId],
        x_endpoints: &[Endpoint],
        y_grads: &[Endpoint],
    ) -> Result<Vec<Endpoint>> {
        self.init(y_nodes, y_grads)?;

        while let Some(id) = self.ready.pop_front() {
            let node = self.graph.node(id);
            if node.op == ARG_OP || node.num_inputs() == 0 {
                // Differentiation target or constant; nothing to backprop
                // through. Target gradients are summed at the end.
                continue;
            }

            let num_outputs = node.num_outputs();
            let mut dys = Vec::with_capacity(num_outputs);
            for output in 0..num_outputs {
                dys.push(self.sum_gradients(Endpoint::new(id, output)));
            }

            let grad_node = self.call_grad_function(id, &dys)?;
            for edge in self.graph.in_edges(id) {
                if !edge.is_control() {
                    self.backprop_along_edge(
                        Endpoint::new(grad_node, edge.dst_input()),
                        edge.src_endpoint(),
                    );
                }
            }
        }

        Ok(x_endpoints
            .iter()
            .map(|x| self.sum_gradients(*x))
            .collect())
    }

    fn init(&mut self, y_nodes: &[NodeId], y_grads: &[Endpoint]) -> Result<()> {
        // Everything backward-reachable from the returns along data edges
        // participates; pending counts only contributions that will actually
        // arrive, i.e. data edges into reachable consumers.
        let bound = self.graph.node_bound();
        let mut reachable = vec![false; bound];
        let mut stack: Vec<NodeId> = y_nodes.to_vec();
        for &y in y_nodes {
            reachable[y.0 as usize] = true;
        }
        while let Some(id) = stack.pop() {
            for edge in self.graph.in_edges(id) {
                if !edge.is_control() && !reachable[edge.src.0 as usize] {
                    reachable[edge.src.0 as usize] = true;
                    stack.push(edge.src);
                }
            }
        }

        self.pending = vec![0; bound];
        for id in self.graph.node_ids() {
            if !reachable[id.0 as usize] {
                continue;
            }
            self.pending[id.0 as usize] = self
                .graph
                .out_edges(id)
                .iter()
                .filter(|edge| !edge.is_control() && reachable[edge.dst.0 as usize])
                .count();
        }

        for (&y, &dy) in y_nodes.iter().zip(y_grads.iter()) {
            let input = self
                .graph
                .input_edge(y, 0)
                .ok_or_else(|| Error::internal("return placeholder has no data input"))?;
            self.backprop_along_edge(dy, input.src_endpoint());
        }
        Ok(())
    }

    fn backprop_along_edge(&mut self, dst_grad: Endpoint, src: Endpoint) {
        self.backprops.entry(src).or_default().push(dst_grad);
        let pending = &mut self.pending[src.node.0 as usize];
        *pending -= 1;
        if *pending == 0 {
            self.ready.push_back(src.node);
        }
    }

    /// Collapses the contributions accumulated for `src` into one endpoint.
    fn sum_gradients(&mut self, src: Endpoint) -> Endpoint {
        let grads = self.backprops.remove(&src).unwrap_or_default();
        match grads.len() {
            0 => Endpoint::new(self.add_zeros_like(src), 0),
            1 => grads[0],
            count => {
                let dtype = src.dtype(self.graph);
                let name = self.graph.new_name("Func");
                let mut init = NodeInit::new(name, "AddN");
                init.attrs
                    .insert("N".to_string(), AttrValue::Int(count as i64));
                init.attrs.insert("T".to_string(), AttrValue::Type(dtype));
                init.in_types = SmallVec::from_elem(dtype, count);
                init.out_types.push(dtype);
                let sum = self.graph.add_node(init);
                for (slot, grad) in grads.iter().enumerate() {
                    self.graph.add_edge(grad.node, grad.index, sum, slot);
                }
                Endpoint::new(sum, 0)
            }
        }
    }

    fn add_zeros_like(&mut self, input: Endpoint) -> NodeId {
        let dtype = input.dtype(self.graph);
        let name = self.graph.new_name("Func");
        let mut init = NodeInit::new(name, "ZerosLike");
        init.attrs.insert("T".to_string(), AttrValue::Type(dtype));
        init.in_types.push(dtype);
        init.out_types.push(dtype);
        let id = self.graph.add_node(init);
        self.graph.add_edge(input.node, input.index, id, 0);
        id
    }

    /// Adds the `SymbolicGradient` call node differentiating forward node
    /// `id`, wired to the forward inputs and the summed output gradients.
    fn call_grad_function(&mut self, id: NodeId, dys: &[Endpoint]) -> Result<NodeId> {
        let node = self.graph.node(id);
        let num_inputs = node.num_inputs();
        let forward_op = node.op.clone();
        let forward_attrs = node.attrs.clone();
        let in_types = node.in_types.clone();
        let out_types = node.out_types.clone();

        let mut tin: Vec<DataType> = in_types.iter().copied().collect();
        tin.extend(out_types.iter().copied());
        let tout: Vec<DataType> = in_types.iter().copied().collect();

        let mut forward_inputs = Vec::with_capacity(num_inputs);
        for slot in 0..num_inputs {
            let edge = self
                .graph
                .input_edge(id, slot)
                .ok_or_else(|| Error::internal(format!("node input slot {slot} is not wired")))?;
            forward_inputs.push(edge.src_endpoint());
        }

        let name = self.graph.new_name("Func");
        let mut init = NodeInit::new(name, GRADIENT_OP);
        init.attrs.insert(
            "f".to_string(),
            AttrValue::Func {
                name: forward_op,
                attrs: forward_attrs,
            },
        );
        init.attrs
            .insert("Tin".to_string(), AttrValue::TypeList(tin.clone()));
        init.attrs
            .insert("Tout".to_string(), AttrValue::TypeList(tout.clone()));
        init.in_types = tin.into_iter().collect();
        init.out_types = tout.into_iter().collect();
        let grad_node = self.graph.add_node(init);

        for (slot, input) in forward_inputs.iter().enumerate() {
            self.graph.add_edge(input.node, input.index, grad_node, slot);
        }
        for (offset, dy) in dys.iter().enumerate() {
            self.graph
                .add_edge(dy.node, dy.index, grad_node, num_inputs + offset);
        }
        Ok(grad_node)
    }
}
