use clap::Args;
use opsgrid_state::Network;
use tracing::info;

use super::{Context, print_json};

#[derive(Args)]
pub struct NetworkArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub region: String,
    #[arg(long = "vpc")]
    pub vpc_id: String,
    /// Comma-separated subnet ids for the load balancer.
    #[arg(long, value_delimiter = ',', required = true)]
    pub public_subnets: Vec<String>,
    /// Comma-separated subnet ids for the database and search domain.
    #[arg(long, value_delimiter = ',', required = true)]
    pub private_subnets: Vec<String>,
    #[arg(long)]
    pub security_group: String,
}

impl From<NetworkArgs> for Network {
    fn from(args: NetworkArgs) -> Self {
        Network {
            name: args.name,
            region: args.region,
            vpc_id: args.vpc_id,
            public_subnets: args.public_subnets,
            private_subnets: args.private_subnets,
            security_group_id: args.security_group,
        }
    }
}

pub fn add(ctx: &Context, args: NetworkArgs) -> anyhow::Result<()> {
    let network = Network::from(args);
    ctx.store.put_network(&network)?;
    info!(network = %network.name, region = %network.region, "network registered");
    print_json(&network)
}
