//! opsd: the OpsGrid operator binary.
//!
//! Drives the reconciler, the stack deployer and the tenant calls against
//! a redb record file and the in-process simulated provider.
//!
//! # Usage
//!
//! ```text
//! opsd network add --name net1 --region us-west-2 --vpc vpc-1 \
//!     --public-subnets subnet-a,subnet-b --private-subnets subnet-c,subnet-d \
//!     --security-group sg-1
//! opsd deployment add --name d1 --region us-west-2 --network net1 --domain example.com
//! opsd stack deploy --deployment d1 --region us-west-2 --image-tag 1.42.0
//! opsd stack promote --deployment d1 --region us-west-2 --id 0
//! opsd stack list --deployment d1 --region us-west-2
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::Context;
use commands::deployment::{DeploymentAction, DeploymentArgs};
use commands::network::NetworkArgs;
use commands::stack::{DemoteArgs, ListStackArgs, StackArgs, StackIdArgs};
use commands::tenant::{AdminArgs, SubscriptionArgs};

const DEFAULT_LOG_FILTER: &str = "info,opsd=debug,opsgrid=debug";

#[derive(Parser)]
#[command(name = "opsd", about = "OpsGrid deployment operator", version, propagate_version = true)]
struct Cli {
    /// Operator configuration file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the record store.
    #[arg(long, global = true, default_value = "/var/lib/opsgrid")]
    data_dir: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register VPC placement for deployments.
    Network {
        #[command(subcommand)]
        action: NetworkAction,
    },
    /// Create, update, and list deployments.
    Deployment {
        #[command(subcommand)]
        action: DeploymentAction,
    },
    /// Launch, inspect, and route compute stacks.
    Stack {
        #[command(subcommand)]
        action: StackAction,
    },
    /// Tenant subscriptions.
    Subscription {
        #[command(subcommand)]
        action: SubscriptionAction,
    },
    /// Tenant administrators.
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Subcommand)]
enum NetworkAction {
    Add(NetworkArgs),
}

#[derive(Subcommand)]
enum StackAction {
    /// Launch a new stack for a deployment.
    Deploy(StackArgs),
    /// List a deployment's stacks and which of them serve traffic.
    List(ListStackArgs),
    Get(StackIdArgs),
    /// Route the deployment's main hostname to a stack.
    Promote(StackIdArgs),
    /// Stop routing the main hostname to a stack.
    Demote(DemoteArgs),
}

#[derive(Subcommand)]
enum SubscriptionAction {
    /// Subscribe an account, creating the account when none is given.
    Add(SubscriptionArgs),
}

#[derive(Subcommand)]
enum AdminAction {
    /// Create an account administrator and print its bootstrap token.
    Init(AdminArgs),
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let ctx = Context::open(cli.config.as_deref(), &cli.data_dir)?;

    match cli.command {
        Command::Network { action } => match action {
            NetworkAction::Add(args) => commands::network::add(&ctx, args),
        },
        Command::Deployment { action } => match action {
            DeploymentAction::Add(args) => commands::deployment::add(&ctx, args).await,
            DeploymentAction::Update(args) => commands::deployment::update(&ctx, args).await,
            DeploymentAction::List(args) => commands::deployment::list(&ctx, args).await,
        },
        Command::Stack { action } => match action {
            StackAction::Deploy(args) => commands::stack::deploy(&ctx, args).await,
            StackAction::List(args) => commands::stack::list(&ctx, args).await,
            StackAction::Get(args) => commands::stack::get(&ctx, args).await,
            StackAction::Promote(args) => commands::stack::promote(&ctx, args).await,
            StackAction::Demote(args) => commands::stack::demote(&ctx, args).await,
        },
        Command::Subscription { action } => match action {
            SubscriptionAction::Add(args) => commands::tenant::add_subscription(&ctx, args).await,
        },
        Command::Admin { action } => match action {
            AdminAction::Init(args) => commands::tenant::init_admin(&ctx, args).await,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_add_parses_with_global_flags() {
        let cli = Cli::try_parse_from([
            "opsd",
            "deployment",
            "add",
            "--name",
            "d1",
            "--region",
            "us-west-2",
            "--network",
            "net1",
            "--domain",
            "example.com",
            "--data-warehouse",
            "false",
            "--data-dir",
            "/tmp/ops",
            "--log-json",
        ])
        .unwrap();
        assert!(cli.log_json);
        assert_eq!(cli.data_dir, PathBuf::from("/tmp/ops"));
        match cli.command {
            Command::Deployment {
                action: DeploymentAction::Add(DeploymentArgs { name, data_warehouse, size, .. }),
            } => {
                assert_eq!(name, "d1");
                assert_eq!(data_warehouse, Some(false));
                assert_eq!(size, None);
            }
            _ => panic!("expected deployment add"),
        }
    }

    #[test]
    fn stack_deploy_collects_environment() {
        let cli = Cli::try_parse_from([
            "opsd",
            "stack",
            "deploy",
            "--deployment",
            "d1",
            "--region",
            "us-west-2",
            "--image-tag",
            "1.42.0",
            "--env",
            "API_SERVER=https://d1.us-west-2.example.com",
            "--env",
            "LOG_LEVEL=debug",
        ])
        .unwrap();
        match cli.command {
            Command::Stack {
                action: StackAction::Deploy(args),
            } => assert_eq!(args.env.len(), 2),
            _ => panic!("expected stack deploy"),
        }
    }

    #[test]
    fn stack_demote_takes_force() {
        let cli = Cli::try_parse_from([
            "opsd",
            "stack",
            "demote",
            "--deployment",
            "d1",
            "--region",
            "us-west-2",
            "--id",
            "3",
            "--force",
        ])
        .unwrap();
        match cli.command {
            Command::Stack {
                action: StackAction::Demote(args),
            } => {
                assert_eq!(args.stack.id, 3);
                assert!(args.force);
            }
            _ => panic!("expected stack demote"),
        }
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["opsd", "deployment", "remove"]).is_err());
    }
}
