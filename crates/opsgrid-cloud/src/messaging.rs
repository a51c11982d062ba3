//! Message queues and log groups.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{CloudResult, Provisioned};

// ── Queues ─────────────────────────────────────────────────────────

/// Dead-letter routing for a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedrivePolicy {
    /// Serialized as a string, which is what the queue service expects.
    #[serde(serialize_with = "as_string")]
    pub max_receive_count: u32,
    pub dead_letter_target_arn: String,
}

fn as_string<S: serde::Serializer>(value: &u32, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&value.to_string())
}

impl RedrivePolicy {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueueAttributes {
    pub visibility_timeout_secs: Option<u32>,
    pub redrive: Option<RedrivePolicy>,
}

#[async_trait]
pub trait QueueService: Send + Sync {
    /// Returns the queue URL when created.
    async fn create_queue(
        &self,
        name: &str,
        attributes: &QueueAttributes,
    ) -> CloudResult<Provisioned<String>>;

    async fn get_queue_url(&self, name: &str) -> CloudResult<Option<String>>;

    async fn get_queue_arn(&self, url: &str) -> CloudResult<String>;

    async fn set_queue_attributes(&self, url: &str, attributes: &QueueAttributes)
    -> CloudResult<()>;
}

// ── Logs ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub log_group: String,
    pub filter_name: String,
    pub pattern: String,
    pub destination_arn: String,
}

#[async_trait]
pub trait LogService: Send + Sync {
    async fn create_log_group(&self, name: &str) -> CloudResult<Provisioned>;

    async fn put_retention_policy(&self, name: &str, days: u32) -> CloudResult<()>;

    async fn put_subscription_filter(&self, filter: &SubscriptionFilter) -> CloudResult<()>;

    /// Fails with `NotFound` when no such filter exists.
    async fn delete_subscription_filter(&self, log_group: &str, filter_name: &str)
    -> CloudResult<()>;
}
