//! Versioned schema migrations applied through the data API.
//!
//! The single row of `schemaVersion` is the migration cursor. Scripts are
//! embedded at build time and applied in index order; script `n` moves the
//! cursor from `n - 1` to `n`. A script whose first line is
//! `-- No Transaction` runs outside a transaction (enum changes need this).

use std::sync::Arc;

use opsgrid_cloud::{CloudError, ProviderErrorKind};
use opsgrid_cloud::data::{DataApiService, DbCredentials, SqlParam, SqlValue};
use tracing::{debug, info, warn};

use crate::error::{DatabaseError, DatabaseResult};

const NO_TRANSACTION_MARKER: &str = "-- No Transaction";

const SELECT_VERSION: &str = "SELECT version FROM schemaVersion;";

const UPDATE_VERSION: &str = "UPDATE schemaVersion SET version = :schemaVersion, fuse_ops_version = :fuseOpsVersion WHERE version = :schemaVersion - 1;";

const SCRIPTS: &[&str] = &[
    include_str!("../migrations/0000_schema_version.sql"),
    include_str!("../migrations/0001_entity.sql"),
    include_str!("../migrations/0002_entity_type_install.sql"),
    include_str!("../migrations/0003_storage_prefix.sql"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub sql: String,
    pub transactional: bool,
}

impl Migration {
    pub fn new(version: i64, sql: &str) -> Self {
        let first_line = sql.lines().next().unwrap_or_default().trim_end();
        Self {
            version,
            sql: sql.to_string(),
            transactional: first_line != NO_TRANSACTION_MARKER,
        }
    }
}

/// The embedded migration set, in order.
pub fn embedded() -> Vec<Migration> {
    SCRIPTS
        .iter()
        .enumerate()
        .map(|(i, sql)| Migration::new(i as i64, sql))
        .collect()
}

/// Only `relation "schemaversion" does not exist` marks an empty database.
/// Other bad requests (a paused cluster resuming, a syntax error) are real.
fn is_missing_version_table(err: &CloudError) -> bool {
    match err {
        CloudError::Provider {
            kind: ProviderErrorKind::BadRequest,
            message,
            ..
        } => {
            let message = message.to_ascii_lowercase();
            message.contains("\"schemaversion\"") && message.contains("does not exist")
        }
        _ => false,
    }
}

pub struct MigrationRunner {
    data_api: Arc<dyn DataApiService>,
    database: String,
    ops_version: String,
    migrations: Vec<Migration>,
}

impl MigrationRunner {
    pub fn new(data_api: Arc<dyn DataApiService>, database: &str, ops_version: &str) -> Self {
        Self::with_migrations(data_api, database, ops_version, embedded())
    }

    pub fn with_migrations(
        data_api: Arc<dyn DataApiService>,
        database: &str,
        ops_version: &str,
        migrations: Vec<Migration>,
    ) -> Self {
        Self {
            data_api,
            database: database.to_string(),
            ops_version: ops_version.to_string(),
            migrations,
        }
    }

    /// Current schema version; `-1` for an empty database.
    pub async fn current_version(&self, creds: &DbCredentials) -> DatabaseResult<i64> {
        match self
            .data_api
            .execute(creds, &self.database, SELECT_VERSION, &[], None)
            .await
        {
            Ok(outcome) => match outcome.records.first().and_then(|row| row.first()) {
                Some(SqlValue::Long(version)) => Ok(*version),
                _ => Err(DatabaseError::SchemaVersionUnreadable),
            },
            Err(e) if is_missing_version_table(&e) => Ok(-1),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply every migration after the current version. Returns the final
    /// version.
    pub async fn run(&self, creds: &DbCredentials) -> DatabaseResult<i64> {
        let current = self.current_version(creds).await?;
        debug!(version = current, "database schema version");

        let pending: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| m.version > current)
            .collect();
        if pending.is_empty() {
            debug!("database schema is up to date");
            return Ok(current);
        }

        let mut version = current;
        for migration in pending {
            self.apply(creds, migration).await?;
            version = migration.version;
            info!(version, "migration applied");
        }
        Ok(version)
    }

    async fn apply(&self, creds: &DbCredentials, migration: &Migration) -> DatabaseResult<()> {
        let version = migration.version;
        let transaction = if migration.transactional {
            let id = self
                .data_api
                .begin_transaction(creds, &self.database)
                .await
                .map_err(|source| DatabaseError::Migration { version, source })?;
            Some(id)
        } else {
            debug!(version, "migration runs outside a transaction");
            None
        };

        let outcome = self.execute(creds, migration, transaction.as_deref()).await;
        match (outcome, transaction) {
            (Ok(()), Some(id)) => self
                .data_api
                .commit_transaction(creds, &id)
                .await
                .map_err(|source| DatabaseError::Migration { version, source }),
            (Ok(()), None) => Ok(()),
            (Err(e), Some(id)) => {
                if let Err(rollback) = self.data_api.rollback_transaction(creds, &id).await {
                    warn!(version, error = %rollback, "rollback failed");
                }
                Err(e)
            }
            (Err(e), None) => {
                warn!(version, error = %e, "non-transactional migration failed; manual action needed");
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        creds: &DbCredentials,
        migration: &Migration,
        transaction: Option<&str>,
    ) -> DatabaseResult<()> {
        let version = migration.version;
        self.data_api
            .execute(creds, &self.database, &migration.sql, &[], transaction)
            .await
            .map_err(|source| DatabaseError::Migration { version, source })?;

        let params = [
            SqlParam::long("schemaVersion", version),
            SqlParam::text("fuseOpsVersion", &self.ops_version),
        ];
        let outcome = self
            .data_api
            .execute(creds, &self.database, UPDATE_VERSION, &params, transaction)
            .await
            .map_err(|source| DatabaseError::Migration { version, source })?;
        if outcome.updated_records != 1 {
            return Err(DatabaseError::VersionMismatch(version));
        }
        Ok(())
    }
}
