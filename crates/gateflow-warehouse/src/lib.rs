#![forbid(unsafe_code)]
//! gateflow-warehouse: the external collaborators, expressed as traits.
//!
//! - `Warehouse`: executes statements and returns scalar rows.
//! - `ConnectionProvider`: resolves connection ids to warehouse handles and
//!   object-store credentials.
//! - `MemoryWarehouse`: a thread-safe in-process implementation used by tests
//!   and the CLI's simulated runs.
//!
//! Real drivers live outside this workspace; they only need to implement the traits.

pub mod adapter;
pub mod credentials;
pub mod error;
pub mod fixture;
pub mod memory;
pub mod types;

pub use adapter::Warehouse;
pub use credentials::{ConnectionProvider, ObjectStoreCredentials, StaticProvider};
pub use error::{Error, Result};
pub use fixture::Fixture;
pub use memory::MemoryWarehouse;
pub use types::{Row, Scalar};
