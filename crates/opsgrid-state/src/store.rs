//! StateStore: redb-backed record persistence for OpsGrid.
//!
//! Provides typed operations over deployments, networks, and stacks. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe record store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(NETWORKS).map_err(map_err!(Table))?;
        txn.open_table(STACKS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn write<T: Serialize>(
        &self,
        table_def: RecordTable,
        key: &str,
        value: &T,
        mode: WriteMode,
    ) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            let exists = table.get(key).map_err(map_err!(Read))?.is_some();
            match mode {
                WriteMode::Insert if exists => {
                    return Err(StateError::AlreadyExists(key.to_string()));
                }
                WriteMode::Replace if !exists => {
                    return Err(StateError::NotFound(key.to_string()));
                }
                _ => {}
            }
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn read<T: DeserializeOwned>(
        &self,
        table_def: RecordTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn remove(&self, table_def: RecordTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert a new deployment. Fails with `AlreadyExists` if the key is taken.
    pub fn insert_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        let key = deployment.table_key();
        self.write(DEPLOYMENTS, &key, deployment, WriteMode::Insert)?;
        debug!(%key, "deployment inserted");
        Ok(())
    }

    /// Replace an existing deployment. Fails with `NotFound` if absent.
    pub fn replace_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        let key = deployment.table_key();
        self.write(DEPLOYMENTS, &key, deployment, WriteMode::Replace)?;
        debug!(%key, "deployment replaced");
        Ok(())
    }

    pub fn get_deployment(&self, name: &str, region: &str) -> StateResult<Option<Deployment>> {
        self.read(DEPLOYMENTS, &deployment_key(name, region))
    }

    /// Delete a deployment. Returns true if it existed.
    pub fn delete_deployment(&self, name: &str, region: &str) -> StateResult<bool> {
        let key = deployment_key(name, region);
        let existed = self.remove(DEPLOYMENTS, &key)?;
        debug!(%key, existed, "deployment deleted");
        Ok(existed)
    }

    /// List deployments in key order, starting after `cursor`.
    pub fn list_deployments(
        &self,
        filter: &DeploymentFilter,
        cursor: Option<&str>,
        limit: usize,
    ) -> StateResult<ListPage<Deployment>> {
        let limit = limit.max(1);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut items = Vec::new();
        let mut next_cursor = None;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if cursor.is_some_and(|c| key.value() <= c) {
                continue;
            }
            let deployment: Deployment =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if !filter.matches(&deployment) {
                continue;
            }
            if items.len() == limit {
                next_cursor = items.last().map(Deployment::table_key);
                break;
            }
            items.push(deployment);
        }
        Ok(ListPage { items, next_cursor })
    }

    // ── Networks ───────────────────────────────────────────────────

    /// Insert or update a network.
    pub fn put_network(&self, network: &Network) -> StateResult<()> {
        let key = network.table_key();
        self.write(NETWORKS, &key, network, WriteMode::Upsert)?;
        debug!(%key, "network stored");
        Ok(())
    }

    pub fn get_network(&self, name: &str, region: &str) -> StateResult<Option<Network>> {
        self.read(NETWORKS, &format!("{name}/{region}"))
    }

    // ── Stacks ─────────────────────────────────────────────────────

    /// Insert a new stack. Stacks are never rewritten in place.
    pub fn insert_stack(&self, stack: &Stack) -> StateResult<()> {
        let key = stack.table_key();
        self.write(STACKS, &key, stack, WriteMode::Insert)?;
        debug!(%key, image_tag = %stack.image_tag, "stack inserted");
        Ok(())
    }

    /// List every stack of one deployment, ordered by id.
    pub fn list_stacks(&self, deployment: &str, region: &str) -> StateResult<Vec<Stack>> {
        let prefix = stack_prefix(deployment, region);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STACKS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let stack: Stack =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(stack);
            }
        }
        results.sort_by_key(|s| s.id);
        Ok(results)
    }
}

#[derive(Clone, Copy)]
enum WriteMode {
    Insert,
    Replace,
    Upsert,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_deployment(name: &str, region: &str) -> Deployment {
        Deployment {
            name: name.to_string(),
            region: region.to_string(),
            network_name: "net1".to_string(),
            domain_name: "example.com".to_string(),
            size: 2,
            segment_key: String::new(),
            elastic_search_endpoint: String::new(),
            data_warehouse_enabled: false,
            feature_use_dns_s3_bucket: false,
            grafana_endpoint: None,
            engine_version_tag: None,
        }
    }

    fn test_stack(deployment: &str, id: u32) -> Stack {
        Stack {
            deployment_name: deployment.to_string(),
            region: "us-west-2".to_string(),
            id,
            image_tag: "1.0.0".to_string(),
            size: 2,
            created_at: 1_700_000_000,
        }
    }

    // ── Deployments ────────────────────────────────────────────────

    #[test]
    fn insert_and_get_deployment() {
        let store = StateStore::open_in_memory().unwrap();
        let d = test_deployment("d1", "us-west-2");
        store.insert_deployment(&d).unwrap();

        let got = store.get_deployment("d1", "us-west-2").unwrap();
        assert_eq!(got, Some(d));
        assert!(store.get_deployment("d1", "us-east-1").unwrap().is_none());
    }

    #[test]
    fn insert_twice_is_already_exists() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .insert_deployment(&test_deployment("d1", "us-west-2"))
            .unwrap();

        let mut second = test_deployment("d1", "us-west-2");
        second.size = 9;
        let err = store.insert_deployment(&second).unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));

        let stored = store.get_deployment("d1", "us-west-2").unwrap().unwrap();
        assert_eq!(stored.size, 2);
    }

    #[test]
    fn replace_requires_existing_record() {
        let store = StateStore::open_in_memory().unwrap();
        let mut d = test_deployment("d1", "us-west-2");
        assert!(matches!(
            store.replace_deployment(&d).unwrap_err(),
            StateError::NotFound(_)
        ));

        store.insert_deployment(&d).unwrap();
        d.size = 5;
        store.replace_deployment(&d).unwrap();
        assert_eq!(
            store.get_deployment("d1", "us-west-2").unwrap().unwrap().size,
            5
        );
    }

    #[test]
    fn delete_deployment_reports_existence() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .insert_deployment(&test_deployment("d1", "us-west-2"))
            .unwrap();
        assert!(store.delete_deployment("d1", "us-west-2").unwrap());
        assert!(!store.delete_deployment("d1", "us-west-2").unwrap());
    }

    #[test]
    fn list_deployments_paginates_with_cursor() {
        let store = StateStore::open_in_memory().unwrap();
        for name in ["a1", "a2", "a3", "b1"] {
            store
                .insert_deployment(&test_deployment(name, "us-west-2"))
                .unwrap();
        }

        let filter = DeploymentFilter {
            name_prefix: Some("a".to_string()),
            region: None,
        };
        let first = store.list_deployments(&filter, None, 2).unwrap();
        let names: Vec<_> = first.items.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["a1", "a2"]);
        assert_eq!(first.next_cursor.as_deref(), Some("a2/us-west-2"));

        let second = store
            .list_deployments(&filter, first.next_cursor.as_deref(), 2)
            .unwrap();
        let names: Vec<_> = second.items.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["a3"]);
        assert!(second.next_cursor.is_none());
    }

    #[test]
    fn list_deployments_filters_by_region() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .insert_deployment(&test_deployment("d1", "us-west-2"))
            .unwrap();
        store
            .insert_deployment(&test_deployment("d1", "us-east-1"))
            .unwrap();

        let filter = DeploymentFilter {
            name_prefix: None,
            region: Some("us-east-1".to_string()),
        };
        let page = store.list_deployments(&filter, None, DEFAULT_PAGE_SIZE).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].region, "us-east-1");
    }

    // ── Networks ───────────────────────────────────────────────────

    #[test]
    fn put_network_overwrites() {
        let store = StateStore::open_in_memory().unwrap();
        let mut net = Network {
            name: "net1".to_string(),
            region: "us-west-2".to_string(),
            vpc_id: "vpc-1".to_string(),
            public_subnets: vec!["subnet-a".to_string()],
            private_subnets: vec!["subnet-b".to_string()],
            security_group_id: "sg-1".to_string(),
        };
        store.put_network(&net).unwrap();
        net.vpc_id = "vpc-2".to_string();
        store.put_network(&net).unwrap();

        let got = store.get_network("net1", "us-west-2").unwrap().unwrap();
        assert_eq!(got.vpc_id, "vpc-2");
    }

    // ── Stacks ─────────────────────────────────────────────────────

    #[test]
    fn stacks_are_scoped_and_sorted() {
        let store = StateStore::open_in_memory().unwrap();
        for id in [3, 0, 1] {
            store.insert_stack(&test_stack("d1", id)).unwrap();
        }
        store.insert_stack(&test_stack("d10", 2)).unwrap();

        let ids: Vec<u32> = store
            .list_stacks("d1", "us-west-2")
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, [0, 1, 3]);
    }

    #[test]
    fn stack_insert_is_write_once() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_stack(&test_stack("d1", 0)).unwrap();
        assert!(matches!(
            store.insert_stack(&test_stack("d1", 0)).unwrap_err(),
            StateError::AlreadyExists(_)
        ));
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store
                .insert_deployment(&test_deployment("d1", "us-west-2"))
                .unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let got = store.get_deployment("d1", "us-west-2").unwrap();
        assert_eq!(got.unwrap().domain_name, "example.com");
    }
}
