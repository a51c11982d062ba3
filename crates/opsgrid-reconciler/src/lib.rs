//! opsgrid-reconciler: brings a deployment's cloud footprint in line with
//! its record.
//!
//! # Architecture
//!
//! ```text
//!   add(params)
//!     │
//!     ├─ DeploymentRepository::add          (AlreadyExists stops here)
//!     │
//!     ├─ provision ───────────────────────────────────────────────┐
//!     │    network ─► storage ─► account schema ─► database        │
//!     │      ─► log table ─► analytics ─► cron ─► [dwh] ─► alb     │
//!     │                                                            │
//!     └─ any failure ─► delete record (best effort) ─► original error
//!
//!   exists_and_update(params)
//!     stored? no  ─► fill defaults, false
//!             yes ─► immutable fields equal? ─► merge ─► provision
//!                      ─► DeploymentRepository::update ─► true
//!
//!   add_subscription   account (existing or new) ─► subscription
//!                      failure after a new account ─► delete account
//!
//!   init_admin         user ─► init entry ─► signed bootstrap token
//!                      failure after the user ─► delete user
//! ```
//!
//! Cloud clients are built per call from an immutable [`CloudConfig`]
//! (`opsgrid_cloud::CloudConfig`), so reconciliations of different
//! deployments share nothing mutable. Calls for the same deployment must
//! be serialized by the caller.

pub mod account;
pub mod error;
pub mod params;
pub mod reconciler;
pub mod storage;
pub mod token;

pub use account::{
    Access, Account, AccountData, InMemoryAccountData, InitEntry, NewUser, Subscription, User,
};
pub use error::{AccountError, AccountResult, ReconcileError, ReconcileResult};
pub use params::{AdminBootstrap, DeploymentParams, InitAdminParams, SubscriptionParams};
pub use reconciler::Reconciler;
pub use token::{BootstrapClaims, BootstrapProfile, TokenSigner};
