//! Optimization pipeline applied when building an executable item.
//!
//! The four built-in rewrites run in a bounded fixpoint loop; common
//! subexpression elimination and constant folding are external collaborators
//! plugged in as opaque [`OptimizerHook`]s.

use std::sync::Arc;

use crate::graph::Graph;
use crate::passes::{
    expand_inline_functions, remove_dead_nodes, remove_identity_nodes,
    remove_list_array_converters,
};
use crate::runtime::Runtime;

/// An externally supplied whole-graph transformation; returns whether it
/// changed the graph.
pub trait OptimizerHook: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, graph: &mut Graph) -> bool;
}

#[derive(Clone)]
pub struct OptimizerOptions {
    pub do_function_inlining: bool,
    /// Upper bound on fixpoint rounds; nested calls expand one level per
    /// round, so this also bounds self-referential expansion.
    pub max_rounds: usize,
    pub cse: Option<Arc<dyn OptimizerHook>>,
    pub constant_folding: Option<Arc<dyn OptimizerHook>>,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        OptimizerOptions {
            do_function_inlining: true,
            max_rounds: 10,
            cse: None,
            constant_folding: None,
        }
    }
}

pub struct GraphOptimizer {
    options: OptimizerOptions,
}

impl GraphOptimizer {
    pub fn new(options: OptimizerOptions) -> Self {
        GraphOptimizer { options }
    }

    pub fn optimize(&self, runtime: &Runtime, graph: &mut Graph) {
        for round in 0..self.options.max_rounds {
            let mut changed = false;
            changed |= remove_list_array_converters(graph);
            if let Some(cse) = &self.options.cse {
                if cse.run(graph) {
                    tracing::debug!(hook = cse.name(), round, "optimizer hook changed graph");
                    changed = true;
                }
            }
            if let Some(folding) = &self.options.constant_folding {
                if folding.run(graph) {
                    tracing::debug!(hook = folding.name(), round, "optimizer hook changed graph");
                    changed = true;
                }
            }
            changed |= remove_dead_nodes(graph);
            changed |= remove_identity_nodes(graph);
            if self.options.do_function_inlining {
                changed |= expand_inline_functions(runtime, graph);
            }
            if !changed {
                break;
            }
        }
    }
}

impl Default for GraphOptimizer {
    fn default() -> Self {
        GraphOptimizer::new(OptimizerOptions::default())
    }
}
