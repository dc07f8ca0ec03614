#![forbid(unsafe_code)]
//! gateflow-operators: the work a node performs once dispatched.
//!
//! Operators are synchronous and may block on the warehouse; the exec crate
//! runs them on blocking threads. Each one is a plain function over a
//! `Warehouse` handle so it can be driven directly in tests.

pub mod dispatch;
pub mod load;
pub mod quality;
pub mod sql;
pub mod stage;
pub mod traits;

pub use dispatch::{execute_node, preview};
pub use traits::{Ack, OpError, QualityError};
