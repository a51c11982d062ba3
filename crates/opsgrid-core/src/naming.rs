//! Resource names derived from a deployment.
//!
//! These strings are matched against resources that already exist in live
//! accounts, so every format here is fixed. `prefix` is always the
//! deployment name.

/// Scheduled trigger for the cron scheduler: every ten minutes, offset by eight.
pub const CRON_SCHEDULE: &str = "cron(8/10 * * * ? *)";

/// Daily trigger for the data-warehouse export.
pub const DWH_SCHEDULE: &str = "cron(0 8 * * ? *)";

/// Statement id of the log service's permission on the analytics function.
pub const ANALYTICS_PERMISSION_STATEMENT: &str = "lambda-analytics-invoke";

/// Retention applied to the analytics log group.
pub const LOG_RETENTION_DAYS: u32 = 7;

// ── Pipelines ──────────────────────────────────────────────────────

pub fn cron_queue(prefix: &str) -> String {
    format!("{prefix}-cron")
}

pub fn cron_dead_letter_queue(prefix: &str) -> String {
    format!("{prefix}-cron-dead-letter")
}

pub fn cron_executor(prefix: &str) -> String {
    format!("{prefix}-cron-executor")
}

pub fn cron_scheduler(prefix: &str) -> String {
    format!("{prefix}-cron-scheduler")
}

pub fn cron_trigger_rule(prefix: &str) -> String {
    format!("{prefix}-cron-scheduler-trigger")
}

pub fn analytics_function(prefix: &str) -> String {
    format!("{prefix}-lambda-analytics")
}

pub fn analytics_log_group(prefix: &str) -> String {
    format!("{prefix}-analytics-logs")
}

/// Subscription filter connecting a log group to a function.
pub fn subscription_filter(log_group: &str, function_name: &str) -> String {
    format!("{log_group}_{function_name}")
}

pub fn search_domain(prefix: &str) -> String {
    format!("{prefix}-analytics")
}

pub fn dwh_export_function(prefix: &str) -> String {
    format!("{prefix}-dwh-export")
}

pub fn dwh_trigger_rule(prefix: &str) -> String {
    format!("{prefix}-dwh-export-trigger")
}

// ── Storage ────────────────────────────────────────────────────────

/// Object storage bucket. With `use_dns_name` the bucket is named after the
/// deployment's DNS name instead of the legacy `fusebit-` form.
pub fn storage_bucket(prefix: &str, region: &str, domain: &str, use_dns_name: bool) -> String {
    if use_dns_name {
        format!("{prefix}.{region}.{domain}")
    } else {
        format!("fusebit-{prefix}-{region}")
    }
}

pub fn log_table(prefix: &str) -> String {
    format!("{prefix}.log")
}

// ── Database ───────────────────────────────────────────────────────

pub fn db_cluster(prefix: &str) -> String {
    format!("fusebit-db-{prefix}")
}

pub fn db_subnet_group(prefix: &str) -> String {
    format!("fusebit-db-subnet-group-{prefix}")
}

pub fn db_security_group(prefix: &str) -> String {
    format!("fusebit-db-security-group-{prefix}")
}

/// Secret name without the random suffix.
pub fn db_secret_prefix(prefix: &str) -> String {
    format!("rds-db-credentials/fusebit-db-secret-{prefix}-")
}

// ── Routing ────────────────────────────────────────────────────────

/// `<deployment>.<region>.<domain>`, the name the certificate is issued for.
pub fn deployment_host(prefix: &str, region: &str, domain: &str) -> String {
    format!("{prefix}.{region}.{domain}")
}

/// `<target>.<deployment>.<region>.<domain>`.
pub fn target_host(target: &str, prefix: &str, region: &str, domain: &str) -> String {
    format!("{target}.{}", deployment_host(prefix, region, domain))
}

/// Logical target name: the default target when `id` is absent, else `<target_prefix>-<id>`.
pub fn target_name(default_name: &str, target_prefix: &str, id: Option<u32>) -> String {
    match id {
        Some(id) => format!("{target_prefix}-{id}"),
        None => default_name.to_string(),
    }
}

/// Provider-level target group name, scoped to the deployment.
pub fn target_group(prefix: &str, target: &str) -> String {
    format!("{prefix}-{target}")
}

pub fn load_balancer(prefix: &str) -> String {
    format!("{prefix}-lb")
}

pub fn web_acl(prefix: &str) -> String {
    format!("{prefix}-waf")
}

// ── Compute ────────────────────────────────────────────────────────

pub fn auto_scaling_group(prefix: &str, stack_id: u32) -> String {
    format!("{prefix}-{stack_id}")
}

pub fn role_arn(partition: &str, account: &str, role: &str) -> String {
    format!("arn:{partition}:iam::{account}:role/{role}")
}

pub fn log_group_arn(partition: &str, region: &str, account: &str, group: &str) -> String {
    format!("arn:{partition}:logs:{region}:{account}:log-group:{group}:*")
}

pub fn image_uri(account: &str, region: &str, repository: &str, tag: &str) -> String {
    format!("{account}.dkr.ecr.{region}.amazonaws.com/{repository}:{tag}")
}
