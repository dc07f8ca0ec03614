#![forbid(unsafe_code)]
//! gateflow-exec: the execution engine.
//!
//! One `Engine::run` call is one `Run` of a compiled `Graph`. A single task
//! owns the `Run` record; node attempts execute on blocking threads and
//! report back over a channel, so every state transition happens in one place.

pub mod metrics;
pub mod runtime;
pub mod scheduler;

pub use metrics::RunMetrics;
pub use runtime::{AbortHandle, Engine, ExecError};
