//! Function-instantiation runtime for dataflow graphs.
//!
//! Declarative function definitions are expanded into typed graphs, cached
//! behind stable integer handles, rewritten for efficiency (dead-node
//! elimination, identity folding, converter elimination, call inlining),
//! differentiated in reverse mode, and executed through a pluggable executor
//! with call-frame marshaling.

pub mod body;
pub mod error;
pub mod exec;
pub mod gradient;
pub mod graph;
pub mod instantiate;
pub mod library;
pub mod optimizer;
pub mod passes;
pub mod runtime;
pub mod types;

pub use body::FunctionBody;
pub use error::{Error, Result};
pub use runtime::{Handle, Options, Runtime, RuntimeConfig};
pub use types::{AttrValue, DataType, Value};
