//! Dynamic script execution engine for hooklet
//!
//! Operator-edited source snippets run inside pooled, disposable worker
//! processes with a hard time budget. The engine rewrites macro shorthand in
//! the source, projects the live request context into a function-free wire
//! shape, relays invoke round-trips from the script back onto the live
//! context, and merges reported mutations once the script finishes.

pub mod context;
pub mod error;
pub mod executor;
pub mod merge;
pub mod modules;
pub mod pool;
pub mod router;
pub mod transform;
pub mod wrap;

pub use context::{ContextObject, ContextValue, HostFunction, ScriptContext};
pub use error::EngineError;
pub use executor::{ExecutionOutcome, ScriptEngine, ScriptRequest};
pub use modules::{ModuleCatalog, StaticModuleCatalog};
pub use pool::{PoolStats, WorkerHandle, WorkerPool};
pub use router::{InvocationError, InvocationRouter};
pub use transform::transform;
pub use wrap::wrap;
