//! Log-forwarding analytics pipeline.
//!
//! Application logs land in a log group. A subscription filter streams
//! them into a forwarding function, which ships them to a search index
//! and/or a telemetry service. With neither configured the filter is
//! removed so nothing is forwarded.

use std::collections::BTreeMap;

use opsgrid_cloud::compute::{FunctionSpec, InvokePermission, VpcPlacement};
use opsgrid_cloud::data::SearchDomainSpec;
use opsgrid_cloud::messaging::SubscriptionFilter;
use opsgrid_cloud::{CloudClients, PollPolicy, PollState, poll_until};
use opsgrid_core::{OpsConfig, naming};
use opsgrid_state::{Deployment, Network};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};
use crate::function::FunctionDeployer;
use crate::role::{LAMBDA_PRINCIPAL, RoleProvisioner};
use crate::step::StepRunner;
use crate::{FUNCTION_RUNTIME, function_code};

const PACKAGE: &str = "lambda-analytics";
const LOGS_PRINCIPAL: &str = "logs.amazonaws.com";

/// Sizing for a search domain the pipeline provisions itself.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDomainTemplate {
    pub instance_type: String,
    pub instance_count: u32,
    pub volume_size: u32,
}

/// Parsed form of a deployment's `elastic_search_endpoint`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEndpoint {
    None,
    Url {
        host: String,
        user: Option<String>,
        password: Option<String>,
    },
    Provision(SearchDomainTemplate),
}

impl SearchEndpoint {
    /// Accepts an empty string, an `http(s)://[user:pass@]host[/...]` URL,
    /// or a JSON domain template.
    pub fn parse(raw: &str) -> PipelineResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(SearchEndpoint::None);
        }
        if raw.starts_with('{') {
            return serde_json::from_str(raw)
                .map(SearchEndpoint::Provision)
                .map_err(|e| PipelineError::InvalidSearchEndpoint(format!("bad domain template: {e}")));
        }
        let rest = raw
            .strip_prefix("https://")
            .or_else(|| raw.strip_prefix("http://"))
            .ok_or_else(|| PipelineError::InvalidSearchEndpoint(raw.to_string()))?;
        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
        let (userinfo, host) = match authority.rsplit_once('@') {
            Some((userinfo, host)) => (Some(userinfo), host),
            None => (None, authority),
        };
        if host.is_empty() {
            return Err(PipelineError::InvalidSearchEndpoint(raw.to_string()));
        }
        let (user, password) = match userinfo.map(|u| u.split_once(':')) {
            Some(Some((user, password))) if !user.is_empty() => {
                (Some(user.to_string()), Some(password.to_string()))
            }
            Some(_) => return Err(PipelineError::InvalidSearchEndpoint(raw.to_string())),
            None => (None, None),
        };
        Ok(SearchEndpoint::Url {
            host: host.to_string(),
            user,
            password,
        })
    }

    pub fn is_configured(&self) -> bool {
        !matches!(self, SearchEndpoint::None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsResources {
    pub function_arn: String,
    pub log_group: String,
    /// Search host the forwarder writes to, if any.
    pub search_host: Option<String>,
    pub subscribed: bool,
}

pub struct AnalyticsPipeline {
    clients: CloudClients,
    functions: FunctionDeployer,
    roles: RoleProvisioner,
    role_name: String,
    search_poll: PollPolicy,
}

impl AnalyticsPipeline {
    pub fn new(clients: CloudClients, ops: &OpsConfig) -> Self {
        Self {
            functions: FunctionDeployer::new(&clients, PollPolicy::from(ops.poll.function_update)),
            roles: RoleProvisioner::new(&clients, ops.platform.permissions_boundary.clone()),
            clients,
            role_name: ops.roles.analytics.clone(),
            search_poll: PollPolicy::from(ops.poll.search_domain),
        }
    }

    pub async fn provision(&self, deployment: &Deployment, network: &Network) -> PipelineResult<AnalyticsResources> {
        // Parse before touching anything so a bad endpoint fails cleanly.
        let endpoint = SearchEndpoint::parse(&deployment.elastic_search_endpoint)?;
        let prefix = deployment.name.as_str();
        let mut run = StepRunner::new("analytics", prefix);

        let role_arn = run
            .step("role", async {
                Ok(self
                    .roles
                    .ensure_role(&self.role_name, LAMBDA_PRINCIPAL, &["AWSLambdaExecute", "AmazonESFullAccess"])
                    .await?)
            })
            .await?;

        let log_group = naming::analytics_log_group(prefix);
        run.step("log-group", async {
            if !self.clients.logs.create_log_group(&log_group).await?.is_created() {
                debug!(log_group = %log_group, "log group exists");
            }
            self.clients
                .logs
                .put_retention_policy(&log_group, naming::LOG_RETENTION_DAYS)
                .await?;
            Ok(())
        })
        .await?;

        let (search_host, user, password, vpc) = match &endpoint {
            SearchEndpoint::None => (None, None, None, None),
            SearchEndpoint::Url { host, user, password } => {
                (Some(host.clone()), user.clone(), password.clone(), None)
            }
            SearchEndpoint::Provision(template) => {
                let host = run
                    .step("search-domain", self.ensure_search_domain(prefix, template, network, &role_arn))
                    .await?;
                let vpc = VpcPlacement {
                    subnet_ids: network.private_subnets.clone(),
                    security_group_ids: vec![network.security_group_id.clone()],
                };
                (Some(host), None, None, Some(vpc))
            }
        };

        let function_name = naming::analytics_function(prefix);
        let spec = FunctionSpec {
            name: function_name.clone(),
            role_arn,
            handler: "index.executor".to_string(),
            runtime: FUNCTION_RUNTIME.to_string(),
            timeout_secs: 60,
            memory_mb: 128,
            environment: BTreeMap::from([
                ("ES_HOST".to_string(), search_host.clone().unwrap_or_default()),
                ("ES_USER".to_string(), user.unwrap_or_default()),
                ("ES_PASSWORD".to_string(), password.unwrap_or_default()),
                ("SEGMENT_KEY".to_string(), deployment.segment_key.clone()),
            ]),
            code: function_code(deployment, PACKAGE),
            vpc,
        };
        let function_arn = run
            .step("function", async { self.functions.create_or_update(&spec).await })
            .await?
            .arn;

        let permission = InvokePermission {
            function_name: function_name.clone(),
            statement_id: naming::ANALYTICS_PERMISSION_STATEMENT.to_string(),
            principal: LOGS_PRINCIPAL.to_string(),
            source_arn: Some(self.clients.config.log_group_arn(&log_group)),
        };
        run.step("permission", self.functions.grant(&permission)).await?;

        let filter_name = naming::subscription_filter(&log_group, &function_name);
        let subscribed = endpoint.is_configured() || !deployment.segment_key.is_empty();
        if subscribed {
            let filter = SubscriptionFilter {
                log_group: log_group.clone(),
                filter_name,
                pattern: String::new(),
                destination_arn: function_arn.clone(),
            };
            run.step("subscription", async {
                Ok(self.clients.logs.put_subscription_filter(&filter).await?)
            })
            .await?;
        } else {
            run.step("unsubscribe", async {
                if let Err(e) = self
                    .clients
                    .logs
                    .delete_subscription_filter(&log_group, &filter_name)
                    .await
                {
                    debug!(log_group = %log_group, error = %e, "no subscription filter to delete");
                }
                Ok(())
            })
            .await?;
        }

        run.finish();
        Ok(AnalyticsResources {
            function_arn,
            log_group,
            search_host,
            subscribed,
        })
    }

    /// Create the domain if needed and wait for its endpoint.
    async fn ensure_search_domain(
        &self,
        prefix: &str,
        template: &SearchDomainTemplate,
        network: &Network,
        role_arn: &str,
    ) -> PipelineResult<String> {
        let name = naming::search_domain(prefix);
        let domain_arn = self.clients.config.arn("es", &format!("domain/{name}"));
        let access_policy = serde_json::json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "AWS": role_arn },
                "Action": "es:*",
                "Resource": format!("{domain_arn}/*"),
            }],
        });
        let spec = SearchDomainSpec {
            name: name.clone(),
            instance_type: template.instance_type.clone(),
            instance_count: template.instance_count,
            volume_size_gb: template.volume_size,
            subnet_ids: network.private_subnets.clone(),
            security_group_ids: vec![network.security_group_id.clone()],
            encrypt_at_rest: true,
            access_policy: access_policy.to_string(),
        };
        if self.clients.search.create_domain(&spec).await?.is_created() {
            info!(domain = %name, "search domain created");
        }

        let search = &self.clients.search;
        let name = name.as_str();
        let endpoint = poll_until(&self.search_poll, &format!("search domain {name}"), |_| async move {
            Ok(match search.describe_domain(name).await?.and_then(|d| d.endpoint) {
                Some(endpoint) => PollState::Ready(endpoint),
                None => PollState::Pending,
            })
        })
        .await?;
        Ok(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{clients, deployment, network};
    use opsgrid_cloud::sim::SimulatedCloud;
    use opsgrid_core::ErrorKind;

    #[test]
    fn parses_endpoint_forms() {
        assert_eq!(SearchEndpoint::parse("").unwrap(), SearchEndpoint::None);
        assert_eq!(
            SearchEndpoint::parse("https://elastic:s3cr:et@search.example.com:9243/").unwrap(),
            SearchEndpoint::Url {
                host: "search.example.com:9243".to_string(),
                user: Some("elastic".to_string()),
                password: Some("s3cr:et".to_string()),
            }
        );
        assert_eq!(
            SearchEndpoint::parse("http://search.internal").unwrap(),
            SearchEndpoint::Url {
                host: "search.internal".to_string(),
                user: None,
                password: None,
            }
        );
        assert_eq!(
            SearchEndpoint::parse(r#"{"instanceType":"r5.large.elasticsearch","instanceCount":2,"volumeSize":100}"#)
                .unwrap(),
            SearchEndpoint::Provision(SearchDomainTemplate {
                instance_type: "r5.large.elasticsearch".to_string(),
                instance_count: 2,
                volume_size: 100,
            })
        );
    }

    #[test]
    fn rejects_malformed_endpoints() {
        for raw in ["search.example.com", "ftp://host", "https://", "https://:pw@host", r#"{"instanceType":1}"#] {
            let err = SearchEndpoint::parse(raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Conflict, "{raw}");
        }
    }

    #[tokio::test]
    async fn no_search_and_no_telemetry_deletes_the_filter() {
        let cloud = SimulatedCloud::new();
        let pipeline = AnalyticsPipeline::new(clients(&cloud), &OpsConfig::for_testing());
        let out = pipeline.provision(&deployment(), &network()).await.unwrap();

        assert!(!out.subscribed);
        assert_eq!(cloud.call_count("logs.delete_subscription_filter"), 1);
        assert_eq!(cloud.call_count("logs.put_subscription_filter"), 0);
        assert_eq!(cloud.log_retention("d1-analytics-logs"), Some(7));
        let permissions = cloud.permissions("d1-lambda-analytics");
        assert_eq!(permissions[0].statement_id, "lambda-analytics-invoke");
        assert_eq!(
            permissions[0].source_arn.as_deref(),
            Some("arn:aws:logs:us-west-2:123456789012:log-group:d1-analytics-logs:*")
        );
    }

    #[tokio::test]
    async fn telemetry_key_alone_creates_the_filter() {
        let cloud = SimulatedCloud::new();
        let pipeline = AnalyticsPipeline::new(clients(&cloud), &OpsConfig::for_testing());
        let mut d = deployment();
        d.segment_key = "wk_123".to_string();
        let out = pipeline.provision(&d, &network()).await.unwrap();

        assert!(out.subscribed);
        assert_eq!(cloud.call_count("logs.delete_subscription_filter"), 0);
        let filter = cloud
            .subscription_filter("d1-analytics-logs", "d1-analytics-logs_d1-lambda-analytics")
            .unwrap();
        assert_eq!(filter.destination_arn, out.function_arn);
        assert_eq!(cloud.function("d1-lambda-analytics").unwrap().environment["SEGMENT_KEY"], "wk_123");
    }

    #[tokio::test]
    async fn url_endpoint_credentials_reach_the_forwarder() {
        let cloud = SimulatedCloud::new();
        let pipeline = AnalyticsPipeline::new(clients(&cloud), &OpsConfig::for_testing());
        let mut d = deployment();
        d.elastic_search_endpoint = "https://elastic:pw@search.example.com".to_string();
        pipeline.provision(&d, &network()).await.unwrap();

        let env = cloud.function("d1-lambda-analytics").unwrap().environment;
        assert_eq!(env["ES_HOST"], "search.example.com");
        assert_eq!(env["ES_USER"], "elastic");
        assert_eq!(env["ES_PASSWORD"], "pw");
        assert_eq!(cloud.call_count("search."), 0);
    }

    #[tokio::test]
    async fn domain_template_provisions_and_waits_for_endpoint() {
        let cloud = SimulatedCloud::new().with_search_polls(3);
        let pipeline = AnalyticsPipeline::new(clients(&cloud), &OpsConfig::for_testing());
        let mut d = deployment();
        d.elastic_search_endpoint =
            r#"{"instanceType":"r5.large.elasticsearch","instanceCount":2,"volumeSize":100}"#.to_string();
        let out = pipeline.provision(&d, &network()).await.unwrap();

        let domain = cloud.search_domain("d1-analytics").unwrap();
        assert_eq!(out.search_host, domain.endpoint);
        let function = cloud.function("d1-lambda-analytics").unwrap();
        assert_eq!(function.vpc.unwrap().subnet_ids, network().private_subnets);
        assert!(out.subscribed);
    }

    #[tokio::test]
    async fn malformed_endpoint_fails_before_any_call() {
        let cloud = SimulatedCloud::new();
        let pipeline = AnalyticsPipeline::new(clients(&cloud), &OpsConfig::for_testing());
        let mut d = deployment();
        d.elastic_search_endpoint = "not a url".to_string();
        let err = pipeline.provision(&d, &network()).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSearchEndpoint(_)));
        assert!(cloud.calls().is_empty());
    }
}
