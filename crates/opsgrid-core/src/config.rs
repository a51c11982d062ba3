//! opsgrid.toml configuration parser.
//!
//! Every section carries `#[serde(default)]`, so an empty file (or no file
//! at all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub platform: PlatformConfig,
    pub stack: StackConfig,
    pub alb: AlbConfig,
    pub cron: CronConfig,
    pub database: DatabaseConfig,
    pub poll: PollConfig,
    pub roles: RolesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub account: String,
    /// `aws` for commercial regions, `aws-us-gov` for gov cloud.
    pub arn_partition: String,
    /// Applied to every role the engine creates.
    pub permissions_boundary: Option<String>,
    /// Per-service API version pins, handed to every client factory.
    pub api_versions: BTreeMap<String, String>,
    /// Recorded on databases as `fuseopsVersion`.
    pub ops_version: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            account: "000000000000".to_string(),
            arn_partition: "aws".to_string(),
            permissions_boundary: None,
            api_versions: BTreeMap::new(),
            ops_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub instance_type: String,
    /// Port the platform container listens on.
    pub api_port: u16,
    /// Port published on the host and targeted by the load balancer.
    pub host_port: u16,
    pub os_version: String,
    pub instance_profile: String,
    pub health_check_grace_secs: u32,
    pub image_repository: String,
    pub default_size: u32,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            instance_type: "t3.xlarge".to_string(),
            api_port: 80,
            host_port: 80,
            os_version: "ubuntu-20.04".to_string(),
            instance_profile: "fusebit-EC2-instance".to_string(),
            health_check_grace_secs: 300,
            image_repository: "fusebit-function-api".to_string(),
            default_size: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlbConfig {
    pub default_target_name: String,
    pub target_prefix: String,
    pub health_check_path: String,
    pub health_check_codes: String,
    pub disabled_health_check_path: String,
    pub disabled_health_check_codes: String,
    pub waf_enabled: bool,
}

impl Default for AlbConfig {
    fn default() -> Self {
        Self {
            default_target_name: "default-target".to_string(),
            target_prefix: "stack".to_string(),
            health_check_path: "/v1/health".to_string(),
            health_check_codes: "200".to_string(),
            disabled_health_check_path: "/v1/healthz".to_string(),
            disabled_health_check_codes: "200-499".to_string(),
            waf_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CronConfig {
    pub executor_timeout_secs: u32,
    pub executor_memory_mb: u32,
    pub batch_size: u32,
    pub concurrent_execution_limit: u32,
    pub max_executions_per_window: u32,
    pub filter: String,
    pub max_receive_count: u32,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            executor_timeout_secs: 60,
            executor_memory_mb: 128,
            batch_size: 10,
            concurrent_execution_limit: 10,
            max_executions_per_window: 120,
            filter: "ctx => true;".to_string(),
            max_receive_count: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub engine: String,
    pub engine_version: String,
    pub database_name: String,
    pub master_username: String,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub port: u16,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: "aurora-postgresql".to_string(),
            engine_version: "11.17".to_string(),
            database_name: "fusebit".to_string(),
            master_username: "fusebit".to_string(),
            min_capacity: 2,
            max_capacity: 384,
            port: 5432,
        }
    }
}

/// Bounds for one polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl PollSettings {
    pub const fn new(max_attempts: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
            max_delay_ms,
        }
    }

    /// Same attempt budget, no waiting between attempts.
    pub const fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, 0, 0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub function_update: PollSettings,
    pub database: PollSettings,
    pub certificate: PollSettings,
    pub search_domain: PollSettings,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            function_update: PollSettings::new(30, 1_000, 5_000),
            database: PollSettings::new(20, 30_000, 30_000),
            certificate: PollSettings::new(60, 5_000, 10_000),
            search_domain: PollSettings::new(60, 10_000, 30_000),
        }
    }
}

impl PollConfig {
    /// Zero-delay polling with the default attempt budgets.
    pub fn immediate() -> Self {
        let defaults = Self::default();
        Self {
            function_update: PollSettings::immediate(defaults.function_update.max_attempts),
            database: PollSettings::immediate(defaults.database.max_attempts),
            certificate: PollSettings::immediate(defaults.certificate.max_attempts),
            search_domain: PollSettings::immediate(defaults.search_domain.max_attempts),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolesConfig {
    pub cron_executor: String,
    pub cron_scheduler: String,
    pub analytics: String,
    pub dwh_export: String,
    pub instance: String,
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            cron_executor: "fusebit-cron-executor".to_string(),
            cron_scheduler: "fusebit-cron-scheduler".to_string(),
            analytics: "fusebit-analytics".to_string(),
            dwh_export: "fusebit-dwh-export".to_string(),
            instance: "fusebit-EC2-instance".to_string(),
        }
    }
}

impl OpsConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: OpsConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Defaults with zero-delay polling, for tests and dry runs.
    pub fn for_testing() -> Self {
        Self {
            poll: PollConfig::immediate(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: OpsConfig = toml::from_str("").unwrap();
        assert_eq!(config.alb.default_target_name, "default-target");
        assert_eq!(config.stack.instance_type, "t3.xlarge");
        assert_eq!(config.cron.max_receive_count, 5);
        assert_eq!(config.database.max_capacity, 384);
        assert_eq!(config.poll.database.max_attempts, 20);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let toml_str = r#"
[platform]
account = "123456789012"
arn_partition = "aws-us-gov"

[cron]
executor_timeout_secs = 120
"#;
        let config: OpsConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.platform.account, "123456789012");
        assert_eq!(config.platform.arn_partition, "aws-us-gov");
        assert_eq!(config.cron.executor_timeout_secs, 120);
        assert_eq!(config.cron.batch_size, 10);
        assert!(config.platform.permissions_boundary.is_none());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = OpsConfig::for_testing();
        let toml_str = config.to_toml_string().unwrap();
        let parsed: OpsConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.poll.function_update, PollSettings::immediate(30));
    }
}
