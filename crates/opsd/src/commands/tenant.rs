use clap::Args;
use opsgrid_reconciler::{InitAdminParams, SubscriptionParams};

use super::{Context, print_json};

#[derive(Args)]
pub struct SubscriptionArgs {
    #[arg(long)]
    pub deployment: String,
    #[arg(long)]
    pub region: String,
    /// Existing account id. A new account is created when omitted.
    #[arg(long)]
    pub account: Option<String>,
    #[arg(long)]
    pub account_name: Option<String>,
    #[arg(long)]
    pub subscription_name: Option<String>,
}

#[derive(Args)]
pub struct AdminArgs {
    #[arg(long)]
    pub deployment: String,
    #[arg(long)]
    pub region: String,
    #[arg(long)]
    pub account: String,
    #[arg(long)]
    pub subscription: String,
    #[arg(long)]
    pub first_name: Option<String>,
    #[arg(long)]
    pub last_name: Option<String>,
    #[arg(long)]
    pub email: Option<String>,
    #[arg(long)]
    pub boundary: Option<String>,
    #[arg(long)]
    pub function: Option<String>,
}

pub async fn add_subscription(ctx: &Context, args: SubscriptionArgs) -> anyhow::Result<()> {
    let domain = deployment_domain(ctx, &args.deployment, &args.region)?;
    let subscription = ctx
        .reconciler(&domain)?
        .add_subscription(&SubscriptionParams {
            deployment_name: args.deployment,
            region: args.region,
            account: args.account,
            account_name: args.account_name,
            subscription_name: args.subscription_name,
        })
        .await?;
    ctx.save_tenants()?;
    print_json(&subscription)
}

pub async fn init_admin(ctx: &Context, args: AdminArgs) -> anyhow::Result<()> {
    let domain = deployment_domain(ctx, &args.deployment, &args.region)?;
    let bootstrap = ctx
        .reconciler(&domain)?
        .init_admin(&InitAdminParams {
            deployment_name: args.deployment,
            region: args.region,
            account: args.account,
            subscription: args.subscription,
            first_name: args.first_name,
            last_name: args.last_name,
            email: args.email,
            boundary: args.boundary,
            function: args.function,
        })
        .await?;
    ctx.save_tenants()?;
    print_json(&bootstrap)
}

/// Domain of a stored deployment, or empty when there is none; the
/// reconciler reports the missing deployment itself.
fn deployment_domain(ctx: &Context, name: &str, region: &str) -> anyhow::Result<String> {
    Ok(ctx
        .store
        .get_deployment(name, region)?
        .map(|d| d.domain_name)
        .unwrap_or_default())
}
