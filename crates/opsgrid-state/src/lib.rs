//! opsgrid-state: persisted records for the OpsGrid control plane.
//!
//! Backed by [redb](https://docs.rs/redb), holds the deployment, network,
//! and stack records the reconciler reads and writes.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{name}/{region}` for deployments and networks,
//! `{name}/{region}:{stack_id}` for stacks) keep related records adjacent
//! so prefix scans stay cheap.
//!
//! The reconciler never touches `StateStore` directly. It goes through the
//! async [`DeploymentRepository`], [`NetworkLookup`], and [`StackRepository`]
//! traits, which `StateStore` implements and tests can replace.

pub mod error;
pub mod repository;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use repository::{DeploymentRepository, NetworkLookup, StackRepository};
pub use store::StateStore;
pub use types::*;
