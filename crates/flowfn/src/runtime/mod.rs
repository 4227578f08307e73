//! The function-instantiation runtime: handle cache, lazy executable items,
//! and run marshaling.
//!
//! A single lock guards the key table, the body table, and the item slots,
//! and is held only for lookups and inserts. Building a function body or an
//! executable item always happens outside the lock: definitions can
//! reference each other (including themselves through nested calls), so a
//! build may reenter [`Runtime::instantiate`], and holding the lock across
//! it would deadlock. Duplicate concurrent builds are resolved by re-checking
//! under the lock and discarding the loser.

mod frame;

pub use frame::CallFrame;

use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex, Weak};

use crate::body::FunctionBody;
use crate::error::{Error, Result};
use crate::exec::{
    inline_runner, CancellationToken, Executor, ExecutorArgs, Kernel, KernelRegistry,
    LocalExecutor, Runner,
};
use crate::graph::{graph_from_def, Node};
use crate::gradient::symbolic_gradient;
use crate::instantiate::{instantiate, FunctionDef};
use crate::library::{FunctionLibrary, ARG_OP, GRADIENT_OP, RET_OP};
use crate::optimizer::{GraphOptimizer, OptimizerOptions};
use crate::types::{canonical_key, AttrMap, Value};

/// Stable reference to a cached function body and its executable item.
/// Monotonically assigned, never reused, never invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub(crate) usize);

#[derive(Clone, Default)]
pub struct Options {
    pub step_id: u64,
    pub cancellation: Option<Arc<CancellationToken>>,
}

pub struct RuntimeConfig {
    pub runner: Runner,
    pub optimizer: OptimizerOptions,
    pub kernels: KernelRegistry,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            runner: inline_runner(),
            optimizer: OptimizerOptions::default(),
            kernels: KernelRegistry::with_default_kernels(),
        }
    }
}

/// Executable artifact for one handle: the optimized graph wrapped in a
/// constructed executor. Shared between the cache slot and in-flight runs.
pub(crate) struct Item {
    pub(crate) exec: Arc<dyn Executor>,
}

#[derive(Default)]
struct State {
    /// Canonical `(name, attrs)` key to handle.
    table: HashMap<String, Handle>,
    /// Append-only; a handle is an index into this table.
    bodies: Vec<Arc<FunctionBody>>,
    /// Lazily filled, one slot per handle.
    items: Vec<Option<Arc<Item>>>,
}

pub(crate) struct RuntimeInner {
    lib: Arc<FunctionLibrary>,
    kernels: KernelRegistry,
    optimizer: GraphOptimizer,
    runner: Runner,
    state: Mutex<State>,
}

#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn new(lib: Arc<FunctionLibrary>) -> Self {
        Runtime::with_config(lib, RuntimeConfig::default())
    }

    pub fn with_config(lib: Arc<FunctionLibrary>, config: RuntimeConfig) -> Self {
        Runtime {
            inner: Arc::new(RuntimeInner {
                lib,
                kernels: config.kernels,
                optimizer: GraphOptimizer::new(config.optimizer),
                runner: config.runner,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn library(&self) -> &Arc<FunctionLibrary> {
        &self.inner.lib
    }

    pub fn is_stateful(&self, name: &str) -> bool {
        self.inner.lib.is_stateful(name)
    }

    /// Returns the handle for `(name, attrs)`, instantiating the function on
    /// first use. Concurrent and reentrant requests for the same key always
    /// observe the same handle.
    pub fn instantiate(&self, name: &str, attrs: &AttrMap) -> Result<Handle> {
        let key = canonical_key(name, attrs);
        {
            let state = self.lock_state();
            if let Some(&handle) = state.table.get(&key) {
                return Ok(handle);
            }
        }

        let body = if name == GRADIENT_OP {
            self.instantiate_gradient(attrs)?
        } else {
            let fdef = self
                .inner
                .lib
                .function(name)
                .ok_or_else(|| Error::not_found(format!("function {name} is not defined")))?
                .clone();
            self.function_def_to_body(&fdef, attrs)?
        };

        let mut state = self.lock_state();
        if let Some(&handle) = state.table.get(&key) {
            // Another caller (possibly this one, reentrantly) built the same
            // function while we were building; ours is discarded.
            return Ok(handle);
        }
        let handle = Handle(state.bodies.len());
        state.table.insert(key, handle);
        state.bodies.push(Arc::new(body));
        state.items.push(None);
        Ok(handle)
    }

    /// Looks up the body behind `handle`. Out-of-range handles are a
    /// programming error, never produced by well-formed callers.
    pub fn function_body(&self, handle: Handle) -> Arc<FunctionBody> {
        let state = self.lock_state();
        state
            .bodies
            .get(handle.0)
            .cloned()
            .expect("function handle out of range")
    }

    /// Runs an instantiated function against `args`, delivering the return
    /// values (or any failure) exclusively through `done`.
    pub fn run(
        &self,
        opts: Options,
        handle: Handle,
        args: Vec<Value>,
        done: impl FnOnce(Result<Vec<Value>>) + Send + 'static,
    ) {
        if let Some(cancellation) = &opts.cancellation {
            if cancellation.is_cancelled() {
                return done(Err(Error::Cancelled));
            }
        }
        let fbody = self.function_body(handle);
        let frame = match CallFrame::new(fbody.arg_types.clone(), fbody.ret_types.clone(), args) {
            Ok(frame) => Arc::new(frame),
            Err(err) => return done(Err(err)),
        };
        let item = match self.get_or_create_item(handle) {
            Ok(item) => item,
            Err(err) => return done(Err(err)),
        };
        let exec_args = ExecutorArgs {
            step_id: opts.step_id,
            frame: Arc::clone(&frame),
            cancellation: opts.cancellation,
            runner: Arc::clone(&self.inner.runner),
        };
        let exec = Arc::clone(&item.exec);
        exec.run_async(
            exec_args,
            Box::new(move |status| {
                // The run's item reference is held until completion.
                drop(item);
                let result = status.and_then(|()| frame.take_retvals());
                done(result);
            }),
        );
    }

    /// [`Runtime::run`] drained through a single-shot completion channel.
    pub fn run_sync(&self, opts: Options, handle: Handle, args: Vec<Value>) -> Result<Vec<Value>> {
        let (tx, rx) = mpsc::channel();
        self.run(opts, handle, args, move |result| {
            let _ = tx.send(result);
        });
        rx.recv()
            .map_err(|_| Error::internal("execution finished without reporting a status"))?
    }

    /// Builds the kernel for one node: call-frame placeholders and known
    /// functions (including the gradient pseudo-function) get dedicated
    /// kernels, everything else resolves through the primitive registry.
    pub(crate) fn create_kernel(&self, node: &Node) -> Result<Kernel> {
        match node.op.as_str() {
            ARG_OP => Ok(Kernel::Arg {
                index: placeholder_index(node)?,
                dtype: node.output_type(0),
            }),
            RET_OP => Ok(Kernel::Retval {
                index: placeholder_index(node)?,
                dtype: node.input_type(0),
            }),
            "NoOp" => Ok(Kernel::NoOp),
            op if op == GRADIENT_OP || self.inner.lib.function(op).is_some() => {
                let handle = self.instantiate(op, &node.attrs)?;
                Ok(Kernel::Call { handle })
            }
            op => self
                .inner
                .kernels
                .lookup(op)
                .map(|func| Kernel::Primitive { func })
                .ok_or_else(|| Error::not_found(format!("no kernel registered for op {op}"))),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<RuntimeInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<RuntimeInner>) -> Runtime {
        Runtime { inner }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.state.lock().expect("runtime state poisoned")
    }

    fn function_def_to_body(&self, fdef: &FunctionDef, attrs: &AttrMap) -> Result<FunctionBody> {
        let result = instantiate(fdef, attrs)?;
        let graph = graph_from_def(&result.gdef, &self.inner.lib)?;
        FunctionBody::new(fdef.clone(), result.arg_types, result.ret_types, graph)
    }

    fn instantiate_gradient(&self, attrs: &AttrMap) -> Result<FunctionBody> {
        let f = attrs.get("f").ok_or_else(|| {
            Error::invalid_argument(format!("{GRADIENT_OP} is missing attr f"))
        })?;
        let (target, target_attrs) = f.as_func()?;
        if self.inner.lib.function(target).is_some() {
            // A user-defined function: instantiate it, then differentiate.
            let handle = self.instantiate(target, target_attrs)?;
            let fbody = self.function_body(handle);
            symbolic_gradient(&fbody)
        } else {
            // A primitive op: its gradient rule yields a small function
            // definition, instantiated like any other.
            let rule = self.inner.lib.gradient(target).ok_or_else(|| {
                Error::invalid_argument(format!("no gradient is defined for {target}"))
            })?;
            let grad_fdef = rule(target_attrs)?;
            self.function_def_to_body(&grad_fdef, target_attrs)
        }
    }

    fn create_item(&self, handle: Handle) -> Result<Arc<Item>> {
        let fbody = self.function_body(handle);
        let mut graph = fbody.graph.clone();
        self.inner.optimizer.optimize(self, &mut graph);
        let exec = LocalExecutor::new(self, graph)?;
        Ok(Arc::new(Item {
            exec: Arc::new(exec),
        }))
    }

    /// Fetches the handle's item, building it on first use. The build runs
    /// outside the lock (kernel construction may reenter `instantiate`);
    /// when two builders race, the first install wins and the loser's item
    /// serves only its own caller before being dropped.
    fn get_or_create_item(&self, handle: Handle) -> Result<Arc<Item>> {
        {
            let state = self.lock_state();
            let slot = state.items.get(handle.0).ok_or_else(|| {
                Error::not_found(format!("function handle {} is not valid", handle.0))
            })?;
            if let Some(item) = slot {
                return Ok(Arc::clone(item));
            }
        }

        let item = self.create_item(handle)?;

        let mut state = self.lock_state();
        if state.items[handle.0].is_none() {
            state.items[handle.0] = Some(Arc::clone(&item));
        }
        Ok(item)
    }
}

fn placeholder_index(node: &Node) -> Result<usize> {
    Ok(node
        .attrs
        .get("index")
        .ok_or_else(|| Error::internal(format!("placeholder {} has no index attr", node.name)))?
        .as_int()? as usize)
}
