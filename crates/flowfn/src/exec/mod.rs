//! Executor collaborator boundary.
//!
//! The runtime hands an optimized graph to an [`Executor`] together with a
//! call frame, a cancellation signal, a step identifier, and a work
//! scheduler; the executor reports completion through a callback. Kernels are
//! constructed once at build time by a registry lookup on the op name into a
//! tagged variant: primitive evaluators run in place, call kernels marshal
//! back through `Runtime::run`.

mod kernels;

pub use kernels::{KernelRegistry, PrimitiveFn};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::{Error, Result};
use crate::graph::{Endpoint, Graph, NodeId};
use crate::runtime::{CallFrame, Handle, Options, Runtime, RuntimeInner};
use crate::types::{DataType, Value};

/// Work scheduler supplied by the caller; the default runs work inline.
pub type Runner = Arc<dyn Fn(Box<dyn FnOnce() + Send>) + Send + Sync>;

pub fn inline_runner() -> Runner {
    Arc::new(|work| work())
}

/// Cooperative cancellation signal, checked before dispatch.
#[derive(Debug, Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub struct ExecutorArgs {
    pub step_id: u64,
    pub frame: Arc<CallFrame>,
    pub cancellation: Option<Arc<CancellationToken>>,
    pub runner: Runner,
}

pub type DoneCallback = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// Runs a graph asynchronously against a call frame and reports completion.
pub trait Executor: Send + Sync {
    fn run_async(self: Arc<Self>, args: ExecutorArgs, done: DoneCallback);
}

/// Executable form of one node, selected at build time.
pub(crate) enum Kernel {
    /// Reads one argument out of the call frame.
    Arg { index: usize, dtype: DataType },
    /// Writes one return value into the call frame.
    Retval { index: usize, dtype: DataType },
    NoOp,
    Primitive { func: PrimitiveFn },
    /// Invokes an instantiated function through the runtime.
    Call { handle: Handle },
}

/// Forward-topological graph interpreter.
pub struct LocalExecutor {
    graph: Graph,
    plan: Vec<NodeId>,
    kernels: HashMap<NodeId, Kernel>,
    runtime: Weak<RuntimeInner>,
}

impl LocalExecutor {
    /// Builds kernels for every op node and a forward-topological execution
    /// plan. Kernel construction may reenter the instantiation cache, so this
    /// must never be called while holding the runtime lock.
    pub(crate) fn new(runtime: &Runtime, graph: Graph) -> Result<Self> {
        let plan = forward_plan(&graph)?;
        let mut kernels = HashMap::with_capacity(plan.len());
        for &id in &plan {
            kernels.insert(id, runtime.create_kernel(graph.node(id))?);
        }
        Ok(LocalExecutor {
            graph,
            plan,
            kernels,
            runtime: runtime.downgrade(),
        })
    }

    fn execute(&self, args: &ExecutorArgs) -> Result<()> {
        let mut values: HashMap<Endpoint, Value> = HashMap::new();
        for &id in &self.plan {
            let node = self.graph.node(id);
            let mut inputs = Vec::with_capacity(node.num_inputs());
            for slot in 0..node.num_inputs() {
                let edge = self.graph.input_edge(id, slot).ok_or_else(|| {
                    Error::internal(format!("input slot {slot} of {} is not wired", node.name))
                })?;
                let value = values.get(&edge.src_endpoint()).cloned().ok_or_else(|| {
                    Error::internal(format!("input of {} was not computed", node.name))
                })?;
                inputs.push(value);
            }

            let kernel = self
                .kernels
                .get(&id)
                .ok_or_else(|| Error::internal(format!("no kernel built for {}", node.name)))?;
            let outputs = match kernel {
                Kernel::Arg { index, dtype } => {
                    let value = args.frame.get_arg(*index)?;
                    if value.dtype() != *dtype {
                        return Err(Error::invalid_argument(format!(
                            "argument type mismatch: actual {} vs. expect {dtype}",
                            value.dtype()
                        )));
                    }
                    vec![value]
                }
                Kernel::Retval { index, dtype } => {
                    let value = inputs.pop().ok_or_else(|| {
                        Error::internal("return placeholder executed without an input")
                    })?;
                    if value.dtype() != *dtype {
                        return Err(Error::invalid_argument(format!(
                            "return type mismatch: actual {} vs. expect {dtype}",
                            value.dtype()
                        )));
                    }
                    args.frame.set_retval(*index, value)?;
                    Vec::new()
                }
                Kernel::NoOp => Vec::new(),
                Kernel::Primitive { func } => func(&node.attrs, &inputs)?,
                Kernel::Call { handle } => {
                    let runtime = Runtime::from_inner(
                        self.runtime
                            .upgrade()
                            .ok_or_else(|| Error::internal("runtime dropped mid-execution"))?,
                    );
                    let opts = Options {
                        step_id: args.step_id,
                        cancellation: args.cancellation.clone(),
                    };
                    runtime.run_sync(opts, *handle, inputs)?
                }
            };

            if outputs.len() != node.num_outputs() {
                return Err(Error::internal(format!(
                    "kernel for {} produced {} outputs, expected {}",
                    node.name,
                    outputs.len(),
                    node.num_outputs()
                )));
            }
            for (output, value) in outputs.into_iter().enumerate() {
                values.insert(Endpoint::new(id, output), value);
            }
        }
        Ok(())
    }
}

impl Executor for LocalExecutor {
    fn run_async(self: Arc<Self>, args: ExecutorArgs, done: DoneCallback) {
        let runner = Arc::clone(&args.runner);
        (*runner)(Box::new(move || {
            let status = self.execute(&args);
            done(status);
        }));
    }
}

/// Forward topological order over op nodes: in-degree counts seeded from all
/// edges, FIFO ready queue of zero-in-degree nodes.
fn forward_plan(graph: &Graph) -> Result<Vec<NodeId>> {
    let mut pending = vec![0usize; graph.node_bound()];
    let mut ready = VecDeque::new();
    let mut live = 0usize;
    for id in graph.node_ids() {
        live += 1;
        pending[id.0 as usize] = graph.in_edges(id).len();
        if pending[id.0 as usize] == 0 {
            ready.push_back(id);
        }
    }

    let mut plan = Vec::new();
    let mut emitted = 0usize;
    while let Some(id) = ready.pop_front() {
        emitted += 1;
        if graph.node(id).is_op() {
            plan.push(id);
        }
        for edge in graph.out_edges(id) {
            let next = edge.dst.0 as usize;
            pending[next] -= 1;
            if pending[next] == 0 {
                ready.push_back(edge.dst);
            }
        }
    }
    if emitted != live {
        return Err(Error::internal("graph contains a cycle"));
    }
    Ok(plan)
}
