//! Credential secrets for database clusters.
//!
//! The master credentials of a cluster live in one secret named
//! `rds-db-credentials/fusebit-db-secret-<d>-<20 alphanumerics>`, tagged
//! with the deployment name and the cluster ARN. The data API needs that
//! `{resourceArn, secretArn}` pair for every statement.

use opsgrid_cloud::data::{DbCredentials, SecretInfo, SecretService, Tag, tag_value};
use opsgrid_core::naming;
use rand::Rng;
use rand::distributions::Alphanumeric;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::{DatabaseError, DatabaseResult};

/// Tag carrying the deployment name on every database resource.
pub const DEPLOYMENT_TAG: &str = "fusebitDeployment";

/// Tag carrying the cluster ARN on the credentials secret.
pub const DB_ARN_TAG: &str = "dbArn";

const PASSWORD_LENGTH: usize = 40;

/// Contents of the credentials secret.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCredentials<'a> {
    pub db_instance_identifier: &'a str,
    pub engine: &'a str,
    pub host: &'a str,
    pub port: u16,
    pub resource_id: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

impl StoredCredentials<'_> {
    pub fn to_json(&self) -> DatabaseResult<String> {
        serde_json::to_string(self).map_err(|e| DatabaseError::Encode(e.to_string()))
    }
}

/// Random master password.
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

/// Fresh secret name with a random 20-character suffix.
pub fn secret_name(deployment: &str) -> String {
    let suffix: [u8; 10] = rand::thread_rng().r#gen();
    format!("{}{}", naming::db_secret_prefix(deployment), hex::encode(suffix))
}

fn secret_pattern(deployment: &str) -> DatabaseResult<Regex> {
    let prefix = regex::escape(&naming::db_secret_prefix(deployment));
    Ok(Regex::new(&format!("^{prefix}[a-zA-Z0-9]{{20}}$"))?)
}

/// Resolve the credentials of an existing cluster from its tagged secret.
///
/// Exactly one secret may match; it must carry the cluster ARN.
pub async fn find_credentials(
    secrets: &dyn SecretService,
    deployment: &str,
) -> DatabaseResult<DbCredentials> {
    let tagged = secrets.find_secrets_by_tag(DEPLOYMENT_TAG, deployment).await?;
    let pattern = secret_pattern(deployment)?;
    let matching: Vec<&SecretInfo> = tagged.iter().filter(|s| pattern.is_match(&s.name)).collect();
    debug!(deployment, tagged = tagged.len(), matching = matching.len(), "credential secrets listed");

    let [secret] = matching.as_slice() else {
        return Err(DatabaseError::SecretNotUnique {
            deployment: deployment.to_string(),
            found: matching.len(),
        });
    };
    let db_arn = tag_value(&secret.tags, DB_ARN_TAG)
        .ok_or_else(|| DatabaseError::SecretMissingDbArn(secret.name.clone()))?;
    Ok(DbCredentials {
        resource_arn: db_arn.to_string(),
        secret_arn: secret.arn.clone(),
    })
}

/// Tags for the credentials secret: the common tags plus name and cluster ARN.
pub fn secret_tags(common: &[Tag], deployment: &str, cluster_arn: &str) -> Vec<Tag> {
    let name = format!("fusebit-db-secret-{deployment}");
    let mut tags = common.to_vec();
    tags.push(Tag::new("Name", &name));
    tags.push(Tag::new(DB_ARN_TAG, cluster_arn));
    tags
}
