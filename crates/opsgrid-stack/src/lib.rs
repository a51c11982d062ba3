//! opsgrid-stack: autoscaled compute fleets running the platform image.
//!
//! # Architecture
//!
//! ```text
//!   StackRequest ─► deployment + network lookup
//!                       │
//!                       ▼
//!          next_stack_id (smallest unused)
//!                       │
//!   image lookup ─► instance profile ─► startup script
//!                       │
//!                       ▼
//!   autoscaling group <d>-<id> ─► target group stack-<id> ─► attach
//!                       │
//!                       ▼
//!              Stack record persisted
//! ```
//!
//! The record is written last, so a failed launch leaves no stack behind
//! in the store and the next attempt reuses the same id.
//!
//! A new stack only answers on its own `stack-<id>` host. Promoting it
//! attaches its group to the deployment's default target as well, which
//! puts it behind the main hostname; demoting detaches it again.

pub mod deployer;
pub mod error;
pub mod user_data;

pub use deployer::{DeployedStack, StackDeployer, StackRequest, StackStatus, next_stack_id};
pub use error::{StackError, StackResult};
pub use user_data::UserData;
