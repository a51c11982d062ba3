pub mod deployment;
pub mod network;
pub mod stack;
pub mod tenant;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use opsgrid_cloud::sim::SimulatedCloud;
use opsgrid_core::OpsConfig;
use opsgrid_core::config::PollConfig;
use opsgrid_reconciler::{InMemoryAccountData, Reconciler, TokenSigner};
use opsgrid_state::StateStore;
use tracing::info;

/// Environment variable holding the base64 data warehouse key.
pub const WAREHOUSE_KEY_ENV: &str = "FUSEBIT_GC_BQ_KEY_BASE64";

/// Tenant data, next to the record store.
const TENANTS_FILE: &str = "tenants.json";

/// Autoscaling groups and their target attachments.
const CLOUD_FILE: &str = "cloud.json";

/// Everything a command needs, opened once per invocation.
pub struct Context {
    pub ops: OpsConfig,
    pub store: Arc<StateStore>,
    pub accounts: Arc<InMemoryAccountData>,
    tenants_path: PathBuf,
    cloud_path: PathBuf,
}

impl Context {
    pub fn open(config: Option<&Path>, data_dir: &Path) -> anyhow::Result<Self> {
        let mut ops = match config {
            Some(path) => OpsConfig::from_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => OpsConfig::default(),
        };
        // The simulated provider converges on its next describe; waiting
        // between polls only stalls the operator.
        ops.poll = PollConfig::immediate();

        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("opsgrid.redb");
        let store = Arc::new(StateStore::open(&db_path)?);
        info!(path = ?db_path, "record store opened");

        let tenants_path = data_dir.join(TENANTS_FILE);
        let accounts = if tenants_path.exists() {
            let json = std::fs::read_to_string(&tenants_path)?;
            InMemoryAccountData::from_json(&json)
                .with_context(|| format!("reading {}", tenants_path.display()))?
        } else {
            InMemoryAccountData::new()
        };

        Ok(Self {
            ops,
            store,
            accounts: Arc::new(accounts),
            tenants_path,
            cloud_path: data_dir.join(CLOUD_FILE),
        })
    }

    /// Persist tenant data for the next invocation.
    pub fn save_tenants(&self) -> anyhow::Result<()> {
        std::fs::write(&self.tenants_path, self.accounts.to_json()?)?;
        Ok(())
    }

    /// Simulated provider with a hosted zone for `domain`, carrying the
    /// groups saved by earlier invocations.
    pub fn provider(&self, domain: &str) -> anyhow::Result<SimulatedCloud> {
        let cloud = SimulatedCloud::new().with_zone(domain);
        if !self.cloud_path.exists() {
            return Ok(cloud);
        }
        let json = std::fs::read_to_string(&self.cloud_path)?;
        cloud
            .with_groups_json(&json)
            .with_context(|| format!("reading {}", self.cloud_path.display()))
    }

    /// Persist the provider's groups for the next invocation.
    pub fn save_cloud(&self, cloud: &SimulatedCloud) -> anyhow::Result<()> {
        std::fs::write(&self.cloud_path, cloud.groups_to_json()?)?;
        Ok(())
    }

    pub fn reconciler(&self, domain: &str) -> anyhow::Result<Reconciler> {
        let reconciler = Reconciler::new(
            self.ops.clone(),
            Arc::new(self.provider(domain)?),
            self.store.clone(),
            self.store.clone(),
            self.accounts.clone(),
        )
        .with_warehouse_key(std::env::var(WAREHOUSE_KEY_ENV).ok());
        Ok(match TokenSigner::from_env() {
            Some(signer) => reconciler.with_signer(signer),
            None => reconciler,
        })
    }
}

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
