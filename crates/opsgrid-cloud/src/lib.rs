//! opsgrid-cloud: the cloud capabilities the control plane consumes.
//!
//! # Architecture
//!
//! ```text
//!   OpsConfig ──► CloudConfig (immutable, Arc-shared)
//!                     │
//!                     ▼
//!   CloudProvider::connect ──► CloudClients { functions, queues, logs, dns, ... }
//!                                   │ each an Arc<dyn Service>
//!                                   ▼
//!          provisioners (routing, database, pipeline, stack)
//! ```
//!
//! Service traits are thin: create calls return [`Provisioned`], so
//! "already exists" reaches orchestration code as a value instead of an
//! error string to match on. Everything that waits on eventual consistency
//! goes through [`poll::poll_until`], which always has an attempt budget.
//!
//! [`sim::SimulatedCloud`] implements every trait in-process. It backs the
//! test suites and the `opsd` binary.

pub mod compute;
pub mod config;
pub mod data;
pub mod edge;
pub mod error;
pub mod identity;
pub mod messaging;
pub mod poll;
pub mod provider;
pub mod sim;

pub use config::CloudConfig;
pub use error::{CloudError, CloudResult, ProviderErrorKind, Provisioned};
pub use poll::{PollPolicy, PollState, poll_until};
pub use provider::{CloudClients, CloudProvider};
