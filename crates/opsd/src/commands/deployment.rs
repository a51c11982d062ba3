use clap::{Args, Subcommand};
use opsgrid_reconciler::DeploymentParams;
use opsgrid_state::{DEFAULT_PAGE_SIZE, DeploymentFilter};
use serde_json::json;

use super::{Context, print_json};

#[derive(Subcommand)]
pub enum DeploymentAction {
    /// Create a deployment and provision its resources.
    Add(DeploymentArgs),
    /// Re-provision an existing deployment with changed settings.
    Update(DeploymentArgs),
    List(ListArgs),
}

#[derive(Args)]
pub struct DeploymentArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub region: String,
    #[arg(long)]
    pub network: String,
    #[arg(long)]
    pub domain: String,
    /// Instances per stack.
    #[arg(long)]
    pub size: Option<u32>,
    /// Telemetry write key.
    #[arg(long)]
    pub segment_key: Option<String>,
    /// Search endpoint URL, or a JSON domain template to provision one.
    #[arg(long)]
    pub elastic_search: Option<String>,
    #[arg(long)]
    pub data_warehouse: Option<bool>,
    /// Name the bucket after the deployment's DNS name. Create only.
    #[arg(long)]
    pub dns_bucket: Option<bool>,
    #[arg(long)]
    pub grafana: Option<String>,
    #[arg(long)]
    pub engine_version_tag: Option<String>,
}

impl From<DeploymentArgs> for DeploymentParams {
    fn from(args: DeploymentArgs) -> Self {
        DeploymentParams {
            deployment_name: args.name,
            region: args.region,
            network_name: args.network,
            domain_name: args.domain,
            size: args.size,
            segment_key: args.segment_key,
            elastic_search_endpoint: args.elastic_search,
            data_warehouse_enabled: args.data_warehouse,
            feature_use_dns_s3_bucket: args.dns_bucket,
            grafana_endpoint: args.grafana,
            engine_version_tag: args.engine_version_tag,
        }
    }
}

#[derive(Args)]
pub struct ListArgs {
    /// Only deployments whose name starts with this.
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub region: Option<String>,
    /// Continue after this key, as printed by a previous page.
    #[arg(long)]
    pub cursor: Option<String>,
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub limit: usize,
}

pub async fn add(ctx: &Context, args: DeploymentArgs) -> anyhow::Result<()> {
    let params = DeploymentParams::from(args);
    let deployment = ctx.reconciler(&params.domain_name)?.add(&params).await?;
    print_json(&deployment)
}

pub async fn update(ctx: &Context, args: DeploymentArgs) -> anyhow::Result<()> {
    let mut params = DeploymentParams::from(args);
    let reconciler = ctx.reconciler(&params.domain_name)?;
    if !reconciler.exists_and_update(&mut params).await? {
        anyhow::bail!(
            "deployment '{}' does not exist in region '{}'; use `opsd deployment add`",
            params.deployment_name,
            params.region
        );
    }
    print_json(&params)
}

pub async fn list(ctx: &Context, args: ListArgs) -> anyhow::Result<()> {
    let filter = DeploymentFilter {
        name_prefix: args.name,
        region: args.region,
    };
    let page = ctx
        .store
        .list_deployments(&filter, args.cursor.as_deref(), args.limit)?;
    print_json(&json!({
        "items": page.items,
        "next": page.next_cursor,
    }))
}
