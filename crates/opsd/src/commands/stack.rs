use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Args;
use opsgrid_cloud::sim::SimulatedCloud;
use opsgrid_cloud::{CloudConfig, CloudProvider};
use opsgrid_routing::LoadBalancerProvisioner;
use opsgrid_stack::{StackDeployer, StackRequest, StackStatus};
use serde_json::json;
use tracing::debug;

use super::{Context, print_json};

#[derive(Args)]
pub struct StackArgs {
    #[arg(long)]
    pub deployment: String,
    #[arg(long)]
    pub region: String,
    #[arg(long)]
    pub image_tag: String,
    /// Instances; defaults to the deployment's size.
    #[arg(long)]
    pub size: Option<u32>,
    /// Route traffic without the platform health check.
    #[arg(long)]
    pub disable_health_check: bool,
    /// Extra container environment, `KEY=VALUE`. Repeatable.
    #[arg(long = "env")]
    pub env: Vec<String>,
}

pub fn parse_env(pairs: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("'{pair}' is not KEY=VALUE"))?;
            anyhow::ensure!(!key.is_empty(), "'{pair}' has an empty key");
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Selects one deployment's stacks.
#[derive(Args)]
pub struct ListStackArgs {
    #[arg(long)]
    pub deployment: String,
    #[arg(long)]
    pub region: String,
}

/// Selects a single stack.
#[derive(Args)]
pub struct StackIdArgs {
    #[arg(long)]
    pub deployment: String,
    #[arg(long)]
    pub region: String,
    #[arg(long)]
    pub id: u32,
}

#[derive(Args)]
pub struct DemoteArgs {
    #[command(flatten)]
    pub stack: StackIdArgs,
    /// Demote even when no other stack would serve the deployment.
    #[arg(long)]
    pub force: bool,
}

/// Connect to the deployment's provider and make sure its load balancer
/// is in place before any stack is touched.
async fn deployer(ctx: &Context, name: &str, region: &str) -> anyhow::Result<(SimulatedCloud, StackDeployer)> {
    let deployment = ctx
        .store
        .get_deployment(name, region)?
        .with_context(|| format!("deployment '{name}' not found in region '{region}'"))?;

    let cloud = ctx.provider(&deployment.domain_name)?;
    let clients = cloud.connect(Arc::new(CloudConfig::from_ops(&ctx.ops, region)));
    let routing = Arc::new(LoadBalancerProvisioner::new(clients.clone(), ctx.store.clone(), &ctx.ops));
    let lb = routing.add_alb(&deployment).await?;
    debug!(lb = %lb.name, "load balancer ready");

    let deployer = StackDeployer::new(
        clients,
        ctx.store.clone(),
        ctx.store.clone(),
        ctx.store.clone(),
        routing,
        &ctx.ops,
    );
    Ok((cloud, deployer))
}

fn status_json(status: &StackStatus) -> serde_json::Value {
    json!({
        "stack": status.stack,
        "active": status.active,
    })
}

pub async fn deploy(ctx: &Context, args: StackArgs) -> anyhow::Result<()> {
    let environment = parse_env(&args.env)?;
    let (cloud, deployer) = deployer(ctx, &args.deployment, &args.region).await?;
    let deployed = deployer
        .deploy(&StackRequest {
            deployment_name: args.deployment,
            region: args.region,
            image_tag: args.image_tag,
            size: args.size,
            disable_health_check: args.disable_health_check,
            environment,
        })
        .await?;
    ctx.save_cloud(&cloud)?;

    print_json(&json!({
        "stack": deployed.stack,
        "target": deployed.target.name,
        "host": deployed.target.host_name,
    }))
}

pub async fn list(ctx: &Context, args: ListStackArgs) -> anyhow::Result<()> {
    let (_, deployer) = deployer(ctx, &args.deployment, &args.region).await?;
    let stacks = deployer.list(&args.deployment, &args.region).await?;
    print_json(&stacks.iter().map(status_json).collect::<Vec<_>>())
}

pub async fn get(ctx: &Context, args: StackIdArgs) -> anyhow::Result<()> {
    let (_, deployer) = deployer(ctx, &args.deployment, &args.region).await?;
    let status = deployer.get(&args.deployment, &args.region, args.id).await?;
    print_json(&status_json(&status))
}

pub async fn promote(ctx: &Context, args: StackIdArgs) -> anyhow::Result<()> {
    let (cloud, deployer) = deployer(ctx, &args.deployment, &args.region).await?;
    let status = deployer.promote(&args.deployment, &args.region, args.id).await?;
    ctx.save_cloud(&cloud)?;
    print_json(&status_json(&status))
}

pub async fn demote(ctx: &Context, args: DemoteArgs) -> anyhow::Result<()> {
    let DemoteArgs { stack, force } = args;
    let (cloud, deployer) = deployer(ctx, &stack.deployment, &stack.region).await?;
    let status = deployer.demote(&stack.deployment, &stack.region, stack.id, force).await?;
    ctx.save_cloud(&cloud)?;
    print_json(&status_json(&status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsgrid_state::{Deployment, Network};

    #[test]
    fn env_pairs_split_on_the_first_equals() {
        let env = parse_env(&["A=1".to_string(), "URL=https://x?y=z".to_string(), "EMPTY=".to_string()]).unwrap();
        assert_eq!(env["A"], "1");
        assert_eq!(env["URL"], "https://x?y=z");
        assert_eq!(env["EMPTY"], "");
    }

    #[test]
    fn malformed_env_pairs_are_rejected() {
        assert!(parse_env(&["NOVALUE".to_string()]).is_err());
        assert!(parse_env(&["=1".to_string()]).is_err());
    }

    fn seed(ctx: &Context) {
        ctx.store
            .put_network(&Network {
                name: "net1".to_string(),
                region: "us-west-2".to_string(),
                vpc_id: "vpc-1".to_string(),
                public_subnets: vec!["subnet-a".to_string()],
                private_subnets: vec!["subnet-b".to_string()],
                security_group_id: "sg-1".to_string(),
            })
            .unwrap();
        ctx.store
            .insert_deployment(&Deployment {
                name: "d1".to_string(),
                region: "us-west-2".to_string(),
                network_name: "net1".to_string(),
                domain_name: "example.com".to_string(),
                size: 1,
                segment_key: String::new(),
                elastic_search_endpoint: String::new(),
                data_warehouse_enabled: false,
                feature_use_dns_s3_bucket: false,
                grafana_endpoint: None,
                engine_version_tag: None,
            })
            .unwrap();
    }

    fn stack_id(id: u32) -> StackIdArgs {
        StackIdArgs {
            deployment: "d1".to_string(),
            region: "us-west-2".to_string(),
            id,
        }
    }

    #[tokio::test]
    async fn promotion_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ctx = Context::open(None, dir.path()).unwrap();
            seed(&ctx);
            deploy(
                &ctx,
                StackArgs {
                    deployment: "d1".to_string(),
                    region: "us-west-2".to_string(),
                    image_tag: "1.42.0".to_string(),
                    size: None,
                    disable_health_check: false,
                    env: Vec::new(),
                },
            )
            .await
            .unwrap();
            promote(&ctx, stack_id(0)).await.unwrap();
        }

        let ctx = Context::open(None, dir.path()).unwrap();
        let (_, deployer) = deployer(&ctx, "d1", "us-west-2").await.unwrap();
        assert!(deployer.get("d1", "us-west-2", 0).await.unwrap().active);

        let err = demote(
            &ctx,
            DemoteArgs {
                stack: stack_id(0),
                force: false,
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("last stack"));
    }
}
