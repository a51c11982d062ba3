//! Deployment reconciler.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use opsgrid_cloud::{CloudClients, CloudConfig, CloudProvider};
use opsgrid_core::{OpsConfig, naming};
use opsgrid_database::DatabaseProvisioner;
use opsgrid_pipeline::{AnalyticsPipeline, CronPipeline, DwhPipeline};
use opsgrid_routing::LoadBalancerProvisioner;
use opsgrid_state::{Deployment, DeploymentRepository, Network, NetworkLookup};
use rand::Rng;
use rand::distributions::Alphanumeric;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::account::{Access, AccountData, InitEntry, NewUser, Subscription, User, new_id};
use crate::error::{AccountError, ReconcileError, ReconcileResult};
use crate::params::{AdminBootstrap, DeploymentParams, InitAdminParams, SubscriptionParams};
use crate::storage;
use crate::token::{BootstrapClaims, BootstrapProfile, SIGNING_SECRET_ENV, TOKEN_TTL_SECS, TokenSigner};

const INIT_SECRET_LEN: usize = 32;

pub struct Reconciler {
    ops: OpsConfig,
    provider: Arc<dyn CloudProvider>,
    deployments: Arc<dyn DeploymentRepository>,
    networks: Arc<dyn NetworkLookup>,
    accounts: Arc<dyn AccountData>,
    warehouse_key: Option<String>,
    signer: Option<TokenSigner>,
}

impl Reconciler {
    pub fn new(
        ops: OpsConfig,
        provider: Arc<dyn CloudProvider>,
        deployments: Arc<dyn DeploymentRepository>,
        networks: Arc<dyn NetworkLookup>,
        accounts: Arc<dyn AccountData>,
    ) -> Self {
        Self {
            ops,
            provider,
            deployments,
            networks,
            accounts,
            warehouse_key: None,
            signer: None,
        }
    }

    /// Base64 service-account key for the data warehouse export.
    pub fn with_warehouse_key(mut self, key: Option<String>) -> Self {
        self.warehouse_key = key;
        self
    }

    pub fn with_signer(mut self, signer: TokenSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Write a new deployment record and provision everything it needs.
    ///
    /// When provisioning fails the record is deleted again and the
    /// original error returned. Cloud resources created before the
    /// failure stay in place; a later `add` reuses them.
    pub async fn add(&self, params: &DeploymentParams) -> ReconcileResult<Deployment> {
        let mut params = params.clone();
        params.apply_defaults(self.ops.stack.default_size);
        let deployment = params.to_deployment(self.ops.stack.default_size);
        validate(&deployment)?;

        self.deployments.add(&deployment).await?;
        info!(deployment = %deployment.name, region = %deployment.region, "deployment record written");

        if let Err(err) = self.provision(&deployment).await {
            warn!(
                deployment = %deployment.name,
                region = %deployment.region,
                error = %err,
                "provisioning failed, removing deployment record"
            );
            if let Err(cleanup) = self
                .deployments
                .delete(&deployment.name, &deployment.region)
                .await
            {
                warn!(deployment = %deployment.name, error = %cleanup, "deployment record could not be removed");
            }
            return Err(err);
        }

        info!(deployment = %deployment.name, region = %deployment.region, "deployment added");
        Ok(deployment)
    }

    /// Re-provision an existing deployment with updated settings.
    ///
    /// Returns `false` without touching anything when no record exists,
    /// after filling `params` with create-time defaults for a follow-up
    /// `add`. Unset fields otherwise take the stored values, and
    /// `params` is left holding the merged settings.
    pub async fn exists_and_update(&self, params: &mut DeploymentParams) -> ReconcileResult<bool> {
        let Some(stored) = self
            .deployments
            .get(&params.deployment_name, &params.region)
            .await?
        else {
            params.apply_defaults(self.ops.stack.default_size);
            debug!(deployment = %params.deployment_name, region = %params.region, "no deployment record");
            return Ok(false);
        };

        if stored.domain_name != params.domain_name {
            return Err(ReconcileError::DifferentDomain {
                stored: stored.domain_name,
                requested: params.domain_name.clone(),
            });
        }
        if stored.network_name != params.network_name {
            return Err(ReconcileError::DifferentNetwork {
                stored: stored.network_name,
                requested: params.network_name.clone(),
            });
        }

        params.merge_stored(&stored);
        let deployment = params.to_deployment(self.ops.stack.default_size);
        validate(&deployment)?;

        self.provision(&deployment).await?;
        self.deployments.update(&deployment).await?;
        info!(deployment = %deployment.name, region = %deployment.region, "deployment updated");
        Ok(true)
    }

    async fn provision(&self, deployment: &Deployment) -> ReconcileResult<()> {
        let clients = self.clients(&deployment.region);
        let network = self.network(deployment).await?;

        log_step(deployment, "storage");
        let bucket = storage::ensure_bucket(&clients, deployment).await?;
        debug!(%bucket, "storage ready");

        log_step(deployment, "accounts");
        self.accounts.setup(deployment).await?;

        log_step(deployment, "database");
        DatabaseProvisioner::new(clients.clone(), &self.ops)
            .ensure(deployment, &network)
            .await?;

        log_step(deployment, "log-table");
        storage::ensure_log_table(&clients, deployment).await?;

        log_step(deployment, "analytics");
        AnalyticsPipeline::new(clients.clone(), &self.ops)
            .provision(deployment, &network)
            .await?;

        log_step(deployment, "cron");
        CronPipeline::new(clients.clone(), &self.ops)
            .provision(deployment)
            .await?;

        if deployment.data_warehouse_enabled {
            log_step(deployment, "dwh");
            DwhPipeline::new(clients.clone(), &self.ops, self.warehouse_key.clone())
                .provision(deployment)
                .await?;
        } else {
            debug!(deployment = %deployment.name, "data warehouse export disabled");
        }

        log_step(deployment, "load-balancer");
        LoadBalancerProvisioner::new(clients, self.networks.clone(), &self.ops)
            .add_alb(deployment)
            .await?;
        Ok(())
    }

    // ── Tenants ────────────────────────────────────────────────────

    /// Subscribe an account, creating the account first when none is named.
    pub async fn add_subscription(&self, params: &SubscriptionParams) -> ReconcileResult<Subscription> {
        let deployment = self
            .require_deployment(&params.deployment_name, &params.region)
            .await?;

        let (account_id, created) = match &params.account {
            Some(id) => {
                self.accounts
                    .get_account(&deployment, id)
                    .await?
                    .ok_or_else(|| AccountError::AccountNotFound(id.clone()))?;
                (id.clone(), false)
            }
            None => {
                let account = self
                    .accounts
                    .create_account(&deployment, params.account_name.clone())
                    .await?;
                info!(deployment = %deployment.name, account = %account.id, "account created");
                (account.id, true)
            }
        };

        match self
            .accounts
            .create_subscription(&deployment, &account_id, params.subscription_name.clone())
            .await
        {
            Ok(subscription) => {
                info!(
                    deployment = %deployment.name,
                    account = %account_id,
                    subscription = %subscription.id,
                    "subscription created"
                );
                Ok(subscription)
            }
            Err(err) => {
                if created {
                    warn!(account = %account_id, error = %err, "subscription failed, removing new account");
                    if let Err(cleanup) = self.accounts.delete_account(&deployment, &account_id).await {
                        warn!(account = %account_id, error = %cleanup, "account could not be removed");
                    }
                }
                Err(err.into())
            }
        }
    }

    /// Create an administrator for an account and a bootstrap token they
    /// redeem to finish setup.
    pub async fn init_admin(&self, params: &InitAdminParams) -> ReconcileResult<AdminBootstrap> {
        let deployment = self
            .require_deployment(&params.deployment_name, &params.region)
            .await?;
        self.accounts
            .get_account(&deployment, &params.account)
            .await?
            .ok_or_else(|| AccountError::AccountNotFound(params.account.clone()))?;
        self.accounts
            .get_subscription(&deployment, &params.account, &params.subscription)
            .await?
            .ok_or_else(|| AccountError::SubscriptionNotFound {
                account: params.account.clone(),
                subscription: params.subscription.clone(),
            })?;

        let user = self
            .accounts
            .create_user(
                &deployment,
                &params.account,
                NewUser {
                    first_name: params.first_name.clone(),
                    last_name: params.last_name.clone(),
                    primary_email: params.email.clone(),
                    access: vec![Access::full(&params.account)],
                },
            )
            .await?;
        info!(deployment = %deployment.name, account = %params.account, user = %user.id, "admin user created");

        match self.issue_bootstrap(&deployment, params, &user).await {
            Ok(bootstrap) => Ok(bootstrap),
            Err(err) => {
                warn!(user = %user.id, error = %err, "bootstrap failed, removing admin user");
                if let Err(cleanup) = self
                    .accounts
                    .delete_user(&deployment, &params.account, &user.id)
                    .await
                {
                    warn!(user = %user.id, error = %cleanup, "admin user could not be removed");
                }
                Err(err)
            }
        }
    }

    async fn issue_bootstrap(
        &self,
        deployment: &Deployment,
        params: &InitAdminParams,
        user: &User,
    ) -> ReconcileResult<AdminBootstrap> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| ReconcileError::Token(format!("{SIGNING_SECRET_ENV} is not set")))?;

        let issued_at = unix_now();
        let init_id = new_id("init-");
        let secret: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(INIT_SECRET_LEN)
            .map(char::from)
            .collect();
        self.accounts
            .store_init(
                deployment,
                &params.account,
                InitEntry {
                    init_id: init_id.clone(),
                    user_id: user.id.clone(),
                    secret_sha256: hex::encode(Sha256::digest(secret.as_bytes())),
                    expires_at: issued_at + TOKEN_TTL_SECS,
                },
            )
            .await?;

        let profile = BootstrapProfile {
            account: params.account.clone(),
            subscription: params.subscription.clone(),
            boundary: params.boundary.clone(),
            function: params.function.clone(),
            base_url: format!(
                "https://{}",
                naming::deployment_host(&deployment.name, &deployment.region, &deployment.domain_name)
            ),
        };
        let claims = BootstrapClaims::new(&user.id, &init_id, issued_at, profile);
        let token = signer
            .sign(&claims)
            .map_err(|e| ReconcileError::Token(e.to_string()))?;

        Ok(AdminBootstrap {
            user_id: user.id.clone(),
            init_id,
            secret,
            token,
        })
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn clients(&self, region: &str) -> CloudClients {
        self.provider
            .connect(Arc::new(CloudConfig::from_ops(&self.ops, region)))
    }

    async fn network(&self, deployment: &Deployment) -> ReconcileResult<Network> {
        self.networks
            .get(&deployment.network_name, &deployment.region)
            .await?
            .ok_or_else(|| ReconcileError::NetworkNotFound {
                name: deployment.network_name.clone(),
                region: deployment.region.clone(),
            })
    }

    async fn require_deployment(&self, name: &str, region: &str) -> ReconcileResult<Deployment> {
        self.deployments
            .get(name, region)
            .await?
            .ok_or_else(|| ReconcileError::DeploymentNotFound {
                name: name.to_string(),
                region: region.to_string(),
            })
    }
}

fn validate(deployment: &Deployment) -> ReconcileResult<()> {
    let required = [
        ("deploymentName", &deployment.name),
        ("region", &deployment.region),
        ("networkName", &deployment.network_name),
        ("domainName", &deployment.domain_name),
    ];
    if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
        return Err(ReconcileError::InvalidParameters(format!("{field} is required")));
    }
    if deployment.size == 0 {
        return Err(ReconcileError::InvalidParameters("size must be at least 1".to_string()));
    }
    Ok(())
}

fn log_step(deployment: &Deployment, step: &str) {
    info!(deployment = %deployment.name, region = %deployment.region, step = %step, "provisioning");
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
