//! opsgrid-database: the managed relational database behind a deployment.
//!
//! # Architecture
//!
//! ```text
//!   DatabaseProvisioner::ensure(deployment, network)
//!     │
//!     ├─ cluster "fusebit-db-<d>" exists?
//!     │     yes ─► re-apply tags ─► unique tagged secret ─► DbCredentials
//!     │     no  ─► subnet group ─► security group ─► create cluster
//!     │             ─► poll until available ─► store credentials secret
//!     │
//!     └─ MigrationRunner::run
//!           SELECT version FROM schemaVersion   (missing table = -1)
//!           for each script after that version:
//!             BEGIN ─► script ─► UPDATE schemaVersion ─► COMMIT
//!             any failure ─► ROLLBACK, stop
//! ```

pub mod credentials;
pub mod error;
pub mod migrations;
pub mod provisioner;

pub use error::{DatabaseError, DatabaseResult};
pub use migrations::{Migration, MigrationRunner};
pub use provisioner::DatabaseProvisioner;
