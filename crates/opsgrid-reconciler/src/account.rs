//! Tenant account data port.
//!
//! Accounts, subscriptions and users live in storage owned by the
//! deployment itself. The reconciler only needs the handful of calls
//! below; [`InMemoryAccountData`] backs tests and the operator binary.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use opsgrid_state::Deployment;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AccountError, AccountResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub account_id: String,
    pub display_name: Option<String>,
}

/// One permission statement. `action = "*"` on `/account/<id>/` is full
/// access to the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    pub action: String,
    pub resource: String,
}

impl Access {
    pub fn full(account_id: &str) -> Self {
        Self {
            action: "*".to_string(),
            resource: format!("/account/{account_id}/"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewUser {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub primary_email: Option<String>,
    pub access: Vec<Access>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub account_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub primary_email: Option<String>,
    pub access: Vec<Access>,
}

/// Pending initialization for a user, redeemed once with the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitEntry {
    pub init_id: String,
    pub user_id: String,
    pub secret_sha256: String,
    /// Seconds since the Unix epoch.
    pub expires_at: u64,
}

#[async_trait]
pub trait AccountData: Send + Sync {
    /// Prepare account storage for a deployment. Idempotent.
    async fn setup(&self, deployment: &Deployment) -> AccountResult<()>;

    async fn get_account(&self, deployment: &Deployment, account_id: &str) -> AccountResult<Option<Account>>;

    async fn create_account(&self, deployment: &Deployment, display_name: Option<String>) -> AccountResult<Account>;

    async fn delete_account(&self, deployment: &Deployment, account_id: &str) -> AccountResult<bool>;

    async fn get_subscription(
        &self,
        deployment: &Deployment,
        account_id: &str,
        subscription_id: &str,
    ) -> AccountResult<Option<Subscription>>;

    async fn create_subscription(
        &self,
        deployment: &Deployment,
        account_id: &str,
        display_name: Option<String>,
    ) -> AccountResult<Subscription>;

    async fn create_user(&self, deployment: &Deployment, account_id: &str, user: NewUser) -> AccountResult<User>;

    async fn delete_user(&self, deployment: &Deployment, account_id: &str, user_id: &str) -> AccountResult<bool>;

    async fn store_init(&self, deployment: &Deployment, account_id: &str, entry: InitEntry) -> AccountResult<()>;
}

/// `<prefix>` followed by 16 random hex characters.
pub fn new_id(prefix: &str) -> String {
    let bytes: [u8; 8] = rand::thread_rng().r#gen();
    format!("{prefix}{}", hex::encode(bytes))
}

// ── In-memory backend ──────────────────────────────────────────────

#[derive(Default, Serialize, Deserialize)]
struct Tenants {
    accounts: BTreeMap<String, Account>,
    subscriptions: BTreeMap<String, Subscription>,
    users: BTreeMap<String, User>,
    inits: BTreeMap<String, InitEntry>,
}

#[derive(Default)]
struct Inner {
    /// Keyed by deployment `{name}/{region}`.
    tenants: HashMap<String, Tenants>,
    failures: HashSet<String>,
}

/// Process-local account data, one tenant space per deployment.
#[derive(Default)]
pub struct InMemoryAccountData {
    inner: Mutex<Inner>,
}

impl InMemoryAccountData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call to `operation` fail, e.g. `"create_subscription"`.
    pub fn fail(&self, operation: &str) {
        self.lock().failures.insert(operation.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Snapshot of every tenant space, for carrying state between runs.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.lock().tenants)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let tenants = serde_json::from_str(json)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                tenants,
                failures: HashSet::new(),
            }),
        })
    }

    pub fn account_count(&self, deployment: &Deployment) -> usize {
        self.lock()
            .tenants
            .get(&deployment.table_key())
            .map_or(0, |t| t.accounts.len())
    }

    pub fn users(&self, deployment: &Deployment) -> Vec<User> {
        self.lock()
            .tenants
            .get(&deployment.table_key())
            .map(|t| t.users.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn init_entry(&self, deployment: &Deployment, init_id: &str) -> Option<InitEntry> {
        self.lock()
            .tenants
            .get(&deployment.table_key())
            .and_then(|t| t.inits.get(init_id).cloned())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("account data lock")
    }

    /// Apply any injected failure, then hand out the deployment's tenants.
    fn enter<'a>(
        inner: &'a mut Inner,
        operation: &'static str,
        deployment: &Deployment,
    ) -> AccountResult<&'a mut Tenants> {
        if inner.failures.contains(operation) {
            return Err(AccountError::Backend {
                operation,
                message: "injected failure".to_string(),
            });
        }
        Ok(inner.tenants.entry(deployment.table_key()).or_default())
    }
}

#[async_trait]
impl AccountData for InMemoryAccountData {
    async fn setup(&self, deployment: &Deployment) -> AccountResult<()> {
        let mut inner = self.lock();
        Self::enter(&mut inner, "setup", deployment)?;
        debug!(deployment = %deployment.name, "account storage ready");
        Ok(())
    }

    async fn get_account(&self, deployment: &Deployment, account_id: &str) -> AccountResult<Option<Account>> {
        let mut inner = self.lock();
        let tenants = Self::enter(&mut inner, "get_account", deployment)?;
        Ok(tenants.accounts.get(account_id).cloned())
    }

    async fn create_account(&self, deployment: &Deployment, display_name: Option<String>) -> AccountResult<Account> {
        let mut inner = self.lock();
        let tenants = Self::enter(&mut inner, "create_account", deployment)?;
        let account = Account {
            id: new_id("acc-"),
            display_name,
        };
        tenants.accounts.insert(account.id.clone(), account.clone());
        Ok(account)
    }

    async fn delete_account(&self, deployment: &Deployment, account_id: &str) -> AccountResult<bool> {
        let mut inner = self.lock();
        let tenants = Self::enter(&mut inner, "delete_account", deployment)?;
        Ok(tenants.accounts.remove(account_id).is_some())
    }

    async fn get_subscription(
        &self,
        deployment: &Deployment,
        account_id: &str,
        subscription_id: &str,
    ) -> AccountResult<Option<Subscription>> {
        let mut inner = self.lock();
        let tenants = Self::enter(&mut inner, "get_subscription", deployment)?;
        Ok(tenants
            .subscriptions
            .get(subscription_id)
            .filter(|s| s.account_id == account_id)
            .cloned())
    }

    async fn create_subscription(
        &self,
        deployment: &Deployment,
        account_id: &str,
        display_name: Option<String>,
    ) -> AccountResult<Subscription> {
        let mut inner = self.lock();
        let tenants = Self::enter(&mut inner, "create_subscription", deployment)?;
        if !tenants.accounts.contains_key(account_id) {
            return Err(AccountError::AccountNotFound(account_id.to_string()));
        }
        let subscription = Subscription {
            id: new_id("sub-"),
            account_id: account_id.to_string(),
            display_name,
        };
        tenants
            .subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        Ok(subscription)
    }

    async fn create_user(&self, deployment: &Deployment, account_id: &str, user: NewUser) -> AccountResult<User> {
        let mut inner = self.lock();
        let tenants = Self::enter(&mut inner, "create_user", deployment)?;
        if !tenants.accounts.contains_key(account_id) {
            return Err(AccountError::AccountNotFound(account_id.to_string()));
        }
        let user = User {
            id: new_id("usr-"),
            account_id: account_id.to_string(),
            first_name: user.first_name,
            last_name: user.last_name,
            primary_email: user.primary_email,
            access: user.access,
        };
        tenants.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn delete_user(&self, deployment: &Deployment, account_id: &str, user_id: &str) -> AccountResult<bool> {
        let mut inner = self.lock();
        let tenants = Self::enter(&mut inner, "delete_user", deployment)?;
        let owned = tenants
            .users
            .get(user_id)
            .is_some_and(|u| u.account_id == account_id);
        if owned {
            tenants.users.remove(user_id);
        }
        Ok(owned)
    }

    async fn store_init(&self, deployment: &Deployment, account_id: &str, entry: InitEntry) -> AccountResult<()> {
        let mut inner = self.lock();
        let tenants = Self::enter(&mut inner, "store_init", deployment)?;
        if !tenants.accounts.contains_key(account_id) {
            return Err(AccountError::AccountNotFound(account_id.to_string()));
        }
        tenants.inits.insert(entry.init_id.clone(), entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment(name: &str) -> Deployment {
        Deployment {
            name: name.to_string(),
            region: "us-west-2".to_string(),
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

    #[test]
    fn ids_carry_prefix_and_sixteen_hex_chars() {
        let id = new_id("acc-");
        assert!(id.starts_with("acc-"));
        let suffix = &id["acc-".len()..];
        assert_eq!(suffix.len(), 16);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(new_id("acc-"), id);
    }

    #[tokio::test]
    async fn tenants_are_scoped_per_deployment() {
        let data = InMemoryAccountData::new();
        let d1 = deployment("d1");
        let d2 = deployment("d2");
        let account = data.create_account(&d1, Some("Acme".to_string())).await.unwrap();

        assert!(data.get_account(&d1, &account.id).await.unwrap().is_some());
        assert!(data.get_account(&d2, &account.id).await.unwrap().is_none());
        let err = data.create_subscription(&d2, &account.id, None).await.unwrap_err();
        assert!(matches!(err, AccountError::AccountNotFound(_)));
    }

    #[tokio::test]
    async fn subscription_lookup_checks_owning_account() {
        let data = InMemoryAccountData::new();
        let d1 = deployment("d1");
        let a = data.create_account(&d1, None).await.unwrap();
        let b = data.create_account(&d1, None).await.unwrap();
        let sub = data.create_subscription(&d1, &a.id, None).await.unwrap();

        assert!(data.get_subscription(&d1, &a.id, &sub.id).await.unwrap().is_some());
        assert!(data.get_subscription(&d1, &b.id, &sub.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshot_restores_tenants() {
        let data = InMemoryAccountData::new();
        let d1 = deployment("d1");
        let account = data.create_account(&d1, None).await.unwrap();
        let sub = data.create_subscription(&d1, &account.id, None).await.unwrap();

        let restored = InMemoryAccountData::from_json(&data.to_json().unwrap()).unwrap();
        assert!(restored.get_account(&d1, &account.id).await.unwrap().is_some());
        assert_eq!(
            restored.get_subscription(&d1, &account.id, &sub.id).await.unwrap(),
            Some(sub)
        );
    }

    #[tokio::test]
    async fn injected_failure_hits_only_that_operation() {
        let data = InMemoryAccountData::new();
        let d1 = deployment("d1");
        data.fail("create_subscription");
        let account = data.create_account(&d1, None).await.unwrap();
        let err = data.create_subscription(&d1, &account.id, None).await.unwrap_err();
        assert!(matches!(err, AccountError::Backend { operation: "create_subscription", .. }));

        data.clear_failures();
        assert!(data.create_subscription(&d1, &account.id, None).await.is_ok());
    }
}
