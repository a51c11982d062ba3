//! redb table definitions for the OpsGrid record store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Deployment records keyed by `{name}/{region}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Network records keyed by `{name}/{region}`.
pub const NETWORKS: TableDefinition<&str, &[u8]> = TableDefinition::new("networks");

/// Stack records keyed by `{deployment}/{region}:{stack_id}`.
pub const STACKS: TableDefinition<&str, &[u8]> = TableDefinition::new("stacks");

/// Shape shared by every table above.
pub type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;
