//! In-process simulated cloud.
//!
//! Implements every capability trait against shared in-memory state. It
//! records each call, can be told to fail specific operations, and models
//! the convergence delays the provisioners have to wait out: certificates
//! that need their validation records, clusters that take a few polls to
//! become available, function updates that stay in progress for a while,
//! and search domains whose endpoint appears late.
//!
//! Failure injection keys are `service.operation` (every call) or
//! `service.operation:target` (calls naming one resource), e.g.
//! `queues.create_queue:d1-cron`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::compute::*;
use crate::config::CloudConfig;
use crate::data::*;
use crate::edge::*;
use crate::error::{CloudError, CloudResult, ProviderErrorKind, Provisioned};
use crate::identity::*;
use crate::messaging::*;
use crate::provider::{CloudClients, CloudProvider};

/// How a newly requested certificate behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateScenario {
    /// Issued immediately.
    Issued,
    /// Pending for `polls` describes, then issued once its validation
    /// records exist in DNS.
    PendingThenIssued { polls: u32 },
    /// Pending, with one validation already failed.
    ValidationFailed,
    /// Pending forever.
    NeverIssued,
}

#[derive(Debug, Clone)]
struct Behavior {
    certificate: CertificateScenario,
    cluster_polls: u32,
    function_update_polls: u32,
    search_polls: u32,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            certificate: CertificateScenario::PendingThenIssued { polls: 1 },
            cluster_polls: 1,
            function_update_polls: 1,
            search_polls: 1,
        }
    }
}

// ── Simulated resources ────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SimBucket {
    pub encrypted: bool,
    pub public_access_blocked: bool,
    pub lifecycle: Vec<LifecycleRule>,
}

#[derive(Debug, Clone)]
struct SimQueue {
    url: String,
    arn: String,
    attributes: QueueAttributes,
}

#[derive(Debug, Clone)]
struct SimFunction {
    info: FunctionInfo,
    spec: FunctionSpec,
    pending_update_polls: u32,
    permissions: Vec<InvokePermission>,
}

#[derive(Debug, Clone)]
struct SimRule {
    arn: String,
    schedule: String,
    targets: Vec<RuleTarget>,
}

#[derive(Debug, Clone, Default)]
struct SimLogGroup {
    retention_days: Option<u32>,
    filters: BTreeMap<String, SubscriptionFilter>,
}

#[derive(Debug, Clone)]
struct SimCluster {
    info: ClusterInfo,
    tags: Vec<Tag>,
    remaining_polls: u32,
}

/// State behind one cluster's data API.
#[derive(Debug, Clone, Default)]
struct SimDatabase {
    schema_table: bool,
    version: i64,
    statements: Vec<String>,
}

#[derive(Debug, Clone)]
struct SimTransaction {
    resource_arn: String,
    staged: SimDatabase,
}

#[derive(Debug, Clone)]
struct SimSecret {
    info: SecretInfo,
    value: String,
}

#[derive(Debug, Clone)]
struct SimSearchDomain {
    domain: SearchDomain,
    endpoint: String,
    remaining_polls: u32,
}

#[derive(Debug, Clone)]
struct SimCertificate {
    hostname: String,
    alt_names: Vec<String>,
    detail: CertificateDetail,
    remaining_polls: u32,
    never_issue: bool,
}

#[derive(Debug, Clone)]
struct SimLoadBalancer {
    info: LoadBalancerInfo,
    web_acl: Option<String>,
}

#[derive(Debug, Clone)]
struct SimSecurityGroup {
    id: String,
    vpc_id: String,
    ingress: Vec<(u16, String)>,
}

#[derive(Debug, Clone)]
struct SimRole {
    spec: RoleSpec,
    attached: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SimGroup {
    spec: AutoScalingGroupSpec,
    target_groups: Vec<String>,
}

#[derive(Default)]
struct SimState {
    behavior: Behavior,
    calls: Vec<String>,
    failures: HashMap<String, ProviderErrorKind>,
    failing_sql: Option<String>,
    counter: u64,

    buckets: BTreeMap<String, SimBucket>,
    tables: BTreeMap<String, TableSpec>,
    queues: BTreeMap<String, SimQueue>,
    functions: BTreeMap<String, SimFunction>,
    mappings: Vec<EventSourceMapping>,
    rules: BTreeMap<String, SimRule>,
    log_groups: BTreeMap<String, SimLogGroup>,
    subnet_groups: BTreeSet<String>,
    clusters: BTreeMap<String, SimCluster>,
    databases: BTreeMap<String, SimDatabase>,
    transactions: BTreeMap<String, SimTransaction>,
    secrets: Vec<SimSecret>,
    search_domains: BTreeMap<String, SimSearchDomain>,
    certificates: BTreeMap<String, SimCertificate>,
    zones: BTreeMap<String, String>,
    records: BTreeMap<(String, String), DnsRecord>,
    load_balancers: BTreeMap<String, SimLoadBalancer>,
    target_groups: BTreeMap<String, (String, TargetGroupSpec)>,
    host_rules: BTreeMap<String, String>,
    security_groups: BTreeMap<String, SimSecurityGroup>,
    roles: BTreeMap<String, SimRole>,
    instance_profiles: BTreeMap<String, String>,
    groups: BTreeMap<String, SimGroup>,
    images: BTreeMap<String, String>,
}

impl SimState {
    /// Log the call and apply any injected failure.
    fn enter(&mut self, service: &'static str, operation: &'static str, target: &str) -> CloudResult<()> {
        self.calls.push(format!("{service}.{operation} {target}"));
        let scoped = format!("{service}.{operation}:{target}");
        let global = format!("{service}.{operation}");
        let injected = self
            .failures
            .get(&scoped)
            .or_else(|| self.failures.get(&global))
            .copied();
        match injected {
            Some(kind) => {
                debug!(%scoped, ?kind, "injected failure");
                Err(CloudError::provider(
                    service,
                    operation,
                    kind,
                    format!("injected failure for {target}"),
                ))
            }
            None => Ok(()),
        }
    }

    /// Identifier derived from the name alone, so a resource recreated in a
    /// fresh simulation keeps its ARN.
    fn stable_id(seed: &str) -> String {
        let digest = Sha256::digest(seed.as_bytes());
        hex::encode(&digest[..8])
    }

    /// Short deterministic identifier.
    fn next_id(&mut self, seed: &str) -> String {
        self.counter += 1;
        let digest = Sha256::digest(format!("{seed}#{}", self.counter).as_bytes());
        hex::encode(&digest[..8])
    }
}

fn not_found(service: &'static str, operation: &'static str, what: &str) -> CloudError {
    CloudError::provider(service, operation, ProviderErrorKind::NotFound, format!("{what} does not exist"))
}

// ── SimulatedCloud ─────────────────────────────────────────────────

/// Shared handle to the simulated provider. Clones see the same state.
#[derive(Clone, Default)]
pub struct SimulatedCloud {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedCloud {
    /// Empty cloud with an image registered for `ubuntu-20.04`.
    pub fn new() -> Self {
        let cloud = Self::default();
        cloud
            .lock()
            .images
            .insert("ubuntu-20.04".to_string(), "ami-0ubuntu2004".to_string());
        cloud
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().expect("sim lock")
    }

    // ── Builders ───────────────────────────────────────────────────

    pub fn with_zone(self, domain: &str) -> Self {
        {
            let mut state = self.lock();
            let id = format!("Z{}", state.next_id(domain).to_uppercase());
            state.zones.insert(domain.to_string(), id);
        }
        self
    }

    pub fn with_image(self, os_version: &str, image_id: &str) -> Self {
        self.lock()
            .images
            .insert(os_version.to_string(), image_id.to_string());
        self
    }

    pub fn with_certificate_scenario(self, scenario: CertificateScenario) -> Self {
        self.lock().behavior.certificate = scenario;
        self
    }

    /// Describes a new cluster answers `creating` before turning available.
    pub fn with_cluster_polls(self, polls: u32) -> Self {
        self.lock().behavior.cluster_polls = polls;
        self
    }

    /// Status checks a code update stays in progress for.
    pub fn with_function_update_polls(self, polls: u32) -> Self {
        self.lock().behavior.function_update_polls = polls;
        self
    }

    pub fn with_search_polls(self, polls: u32) -> Self {
        self.lock().behavior.search_polls = polls;
        self
    }

    // ── Failure injection ──────────────────────────────────────────

    pub fn fail(&self, key: &str, kind: ProviderErrorKind) {
        self.lock().failures.insert(key.to_string(), kind);
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.failures.clear();
        state.failing_sql = None;
    }

    /// Fail any SQL statement containing `fragment`.
    pub fn fail_sql_containing(&self, fragment: &str) {
        self.lock().failing_sql = Some(fragment.to_string());
    }

    // ── Seeding ────────────────────────────────────────────────────

    pub fn seed_event_source_mapping(&self, function_name: &str, event_source_arn: &str) {
        let mut state = self.lock();
        let uuid = state.next_id(event_source_arn);
        state.mappings.push(EventSourceMapping {
            uuid,
            function_name: function_name.to_string(),
            event_source_arn: event_source_arn.to_string(),
            batch_size: 1,
        });
    }

    pub fn seed_secret(&self, name: &str, tags: Vec<Tag>) {
        let mut state = self.lock();
        state.secrets.push(SimSecret {
            info: SecretInfo {
                name: name.to_string(),
                arn: format!("arn:sim:secret:{name}"),
                tags,
            },
            value: String::new(),
        });
    }

    // ── Inspection ─────────────────────────────────────────────────

    /// Every call so far, as `service.operation target`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of calls whose log line starts with `prefix`.
    pub fn call_count(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn bucket(&self, name: &str) -> Option<SimBucket> {
        self.lock().buckets.get(name).cloned()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.lock().tables.contains_key(name)
    }

    pub fn queue_attributes(&self, name: &str) -> Option<QueueAttributes> {
        self.lock().queues.get(name).map(|q| q.attributes.clone())
    }

    pub fn queue_arn(&self, name: &str) -> Option<String> {
        self.lock().queues.get(name).map(|q| q.arn.clone())
    }

    pub fn function(&self, name: &str) -> Option<FunctionSpec> {
        self.lock().functions.get(name).map(|f| f.spec.clone())
    }

    pub fn permissions(&self, function_name: &str) -> Vec<InvokePermission> {
        self.lock()
            .functions
            .get(function_name)
            .map(|f| f.permissions.clone())
            .unwrap_or_default()
    }

    pub fn event_source_mappings(&self, function_name: &str) -> Vec<EventSourceMapping> {
        self.lock()
            .mappings
            .iter()
            .filter(|m| m.function_name == function_name)
            .cloned()
            .collect()
    }

    /// Schedule and targets of a rule.
    pub fn rule(&self, name: &str) -> Option<(String, Vec<RuleTarget>)> {
        self.lock()
            .rules
            .get(name)
            .map(|r| (r.schedule.clone(), r.targets.clone()))
    }

    pub fn log_retention(&self, group: &str) -> Option<u32> {
        self.lock().log_groups.get(group).and_then(|g| g.retention_days)
    }

    pub fn subscription_filter(&self, group: &str, filter_name: &str) -> Option<SubscriptionFilter> {
        self.lock()
            .log_groups
            .get(group)
            .and_then(|g| g.filters.get(filter_name).cloned())
    }

    pub fn cluster(&self, identifier: &str) -> Option<ClusterInfo> {
        self.lock().clusters.get(identifier).map(|c| c.info.clone())
    }

    pub fn cluster_tags(&self, identifier: &str) -> Vec<Tag> {
        self.lock()
            .clusters
            .get(identifier)
            .map(|c| c.tags.clone())
            .unwrap_or_default()
    }

    /// Committed schema version of the cluster behind `resource_arn`.
    pub fn schema_version(&self, resource_arn: &str) -> Option<i64> {
        self.lock()
            .databases
            .get(resource_arn)
            .filter(|db| db.schema_table)
            .map(|db| db.version)
    }

    /// Committed statements, in order.
    pub fn executed_sql(&self, resource_arn: &str) -> Vec<String> {
        self.lock()
            .databases
            .get(resource_arn)
            .map(|db| db.statements.clone())
            .unwrap_or_default()
    }

    pub fn secrets(&self) -> Vec<SecretInfo> {
        self.lock().secrets.iter().map(|s| s.info.clone()).collect()
    }

    pub fn secret_value(&self, arn: &str) -> Option<String> {
        self.lock()
            .secrets
            .iter()
            .find(|s| s.info.arn == arn)
            .map(|s| s.value.clone())
    }

    pub fn search_domain(&self, name: &str) -> Option<SearchDomain> {
        self.lock()
            .search_domains
            .get(name)
            .map(|d| d.domain.clone())
    }

    /// Record by fully qualified name, in whichever zone holds it.
    pub fn dns_record(&self, name: &str) -> Option<DnsRecord> {
        self.lock()
            .records
            .iter()
            .find(|((_, n), _)| n == name)
            .map(|(_, r)| r.clone())
    }

    pub fn dns_records(&self) -> Vec<DnsRecord> {
        self.lock().records.values().cloned().collect()
    }

    pub fn load_balancer(&self, name: &str) -> Option<LoadBalancerInfo> {
        self.lock()
            .load_balancers
            .get(name)
            .map(|lb| lb.info.clone())
    }

    pub fn web_acl(&self, load_balancer: &str) -> Option<String> {
        self.lock()
            .load_balancers
            .get(load_balancer)
            .and_then(|lb| lb.web_acl.clone())
    }

    pub fn target_group(&self, name: &str) -> Option<TargetGroupSpec> {
        self.lock()
            .target_groups
            .get(name)
            .map(|(_, spec)| spec.clone())
    }

    /// Target group ARN a host is routed to.
    pub fn host_rule(&self, host: &str) -> Option<String> {
        self.lock().host_rules.get(host).cloned()
    }

    pub fn security_group_ingress(&self, name: &str) -> Vec<(u16, String)> {
        self.lock()
            .security_groups
            .get(name)
            .map(|g| g.ingress.clone())
            .unwrap_or_default()
    }

    pub fn role(&self, name: &str) -> Option<RoleSpec> {
        self.lock().roles.get(name).map(|r| r.spec.clone())
    }

    pub fn role_policies(&self, name: &str) -> Vec<String> {
        self.lock()
            .roles
            .get(name)
            .map(|r| r.attached.clone())
            .unwrap_or_default()
    }

    pub fn instance_profile(&self, name: &str) -> Option<String> {
        self.lock().instance_profiles.get(name).cloned()
    }

    /// Group spec and attached target group ARNs.
    pub fn auto_scaling_group(&self, name: &str) -> Option<(AutoScalingGroupSpec, Vec<String>)> {
        self.lock()
            .groups
            .get(name)
            .map(|g| (g.spec.clone(), g.target_groups.clone()))
    }

    // ── Snapshots ──────────────────────────────────────────────────

    /// Autoscaling groups and their attachments, as JSON.
    ///
    /// Load balancer and target group ARNs depend only on their names, so
    /// a fresh simulation that recreates them lines up with these
    /// attachments again.
    pub fn groups_to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.lock().groups)
    }

    /// Restore groups saved by [`groups_to_json`](Self::groups_to_json).
    pub fn with_groups_json(self, json: &str) -> serde_json::Result<Self> {
        let groups: BTreeMap<String, SimGroup> = serde_json::from_str(json)?;
        self.lock().groups.extend(groups);
        Ok(self)
    }
}

impl CloudProvider for SimulatedCloud {
    fn connect(&self, config: Arc<CloudConfig>) -> CloudClients {
        let client = Arc::new(SimClient {
            state: self.state.clone(),
            config: config.clone(),
        });
        CloudClients {
            config,
            functions: client.clone(),
            rules: client.clone(),
            autoscaling: client.clone(),
            images: client.clone(),
            queues: client.clone(),
            logs: client.clone(),
            clusters: client.clone(),
            data_api: client.clone(),
            secrets: client.clone(),
            search: client.clone(),
            tables: client.clone(),
            storage: client.clone(),
            certificates: client.clone(),
            dns: client.clone(),
            load_balancers: client.clone(),
            security_groups: client.clone(),
            identity: client,
        }
    }
}

/// Region-bound view of the simulated cloud.
struct SimClient {
    state: Arc<Mutex<SimState>>,
    config: Arc<CloudConfig>,
}

impl SimClient {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().expect("sim lock")
    }
}

// ── Functions ──────────────────────────────────────────────────────

#[async_trait]
impl FunctionService for SimClient {
    async fn create_function(&self, spec: &FunctionSpec) -> CloudResult<Provisioned<FunctionInfo>> {
        let mut state = self.lock();
        state.enter("functions", "create_function", &spec.name)?;
        if state.functions.contains_key(&spec.name) {
            return Ok(Provisioned::AlreadyExists);
        }
        let info = FunctionInfo {
            name: spec.name.clone(),
            arn: self.config.arn("lambda", &format!("function:{}", spec.name)),
        };
        state.functions.insert(
            spec.name.clone(),
            SimFunction {
                info: info.clone(),
                spec: spec.clone(),
                pending_update_polls: 0,
                permissions: Vec::new(),
            },
        );
        Ok(Provisioned::Created(info))
    }

    async fn get_function(&self, name: &str) -> CloudResult<Option<FunctionInfo>> {
        let mut state = self.lock();
        state.enter("functions", "get_function", name)?;
        Ok(state.functions.get(name).map(|f| f.info.clone()))
    }

    async fn update_function_code(&self, name: &str, code: &FunctionCode) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("functions", "update_function_code", name)?;
        let polls = state.behavior.function_update_polls;
        let function = state
            .functions
            .get_mut(name)
            .ok_or_else(|| not_found("functions", "update_function_code", name))?;
        function.spec.code = code.clone();
        function.pending_update_polls = polls;
        Ok(())
    }

    async fn update_function_configuration(&self, spec: &FunctionSpec) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("functions", "update_function_configuration", &spec.name)?;
        let function = state
            .functions
            .get_mut(&spec.name)
            .ok_or_else(|| not_found("functions", "update_function_configuration", &spec.name))?;
        if function.pending_update_polls > 0 {
            return Err(CloudError::provider(
                "functions",
                "update_function_configuration",
                ProviderErrorKind::InProgress,
                format!("an update is in progress for {}", spec.name),
            ));
        }
        let code = function.spec.code.clone();
        function.spec = FunctionSpec {
            code,
            ..spec.clone()
        };
        Ok(())
    }

    async fn last_update_status(&self, name: &str) -> CloudResult<UpdateStatus> {
        let mut state = self.lock();
        state.enter("functions", "last_update_status", name)?;
        let function = state
            .functions
            .get_mut(name)
            .ok_or_else(|| not_found("functions", "last_update_status", name))?;
        if function.pending_update_polls > 0 {
            function.pending_update_polls -= 1;
            return Ok(UpdateStatus::InProgress);
        }
        Ok(UpdateStatus::Successful)
    }

    async fn add_permission(&self, permission: &InvokePermission) -> CloudResult<Provisioned> {
        let mut state = self.lock();
        state.enter("functions", "add_permission", &permission.function_name)?;
        let function = state
            .functions
            .get_mut(&permission.function_name)
            .ok_or_else(|| not_found("functions", "add_permission", &permission.function_name))?;
        // The functions API reports a duplicate statement as a conflict.
        let result = if function
            .permissions
            .iter()
            .any(|p| p.statement_id == permission.statement_id)
        {
            Err(CloudError::provider(
                "functions",
                "add_permission",
                ProviderErrorKind::Conflict,
                format!("statement {} already exists", permission.statement_id),
            ))
        } else {
            function.permissions.push(permission.clone());
            Ok(())
        };
        Provisioned::absorb(result)
    }

    async fn list_event_source_mappings(
        &self,
        function_name: &str,
    ) -> CloudResult<Vec<EventSourceMapping>> {
        let mut state = self.lock();
        state.enter("functions", "list_event_source_mappings", function_name)?;
        Ok(state
            .mappings
            .iter()
            .filter(|m| m.function_name == function_name)
            .cloned()
            .collect())
    }

    async fn create_event_source_mapping(
        &self,
        function_name: &str,
        event_source_arn: &str,
        batch_size: u32,
    ) -> CloudResult<Provisioned<String>> {
        let mut state = self.lock();
        state.enter("functions", "create_event_source_mapping", function_name)?;
        if state
            .mappings
            .iter()
            .any(|m| m.function_name == function_name && m.event_source_arn == event_source_arn)
        {
            return Ok(Provisioned::AlreadyExists);
        }
        let uuid = state.next_id(event_source_arn);
        state.mappings.push(EventSourceMapping {
            uuid: uuid.clone(),
            function_name: function_name.to_string(),
            event_source_arn: event_source_arn.to_string(),
            batch_size,
        });
        Ok(Provisioned::Created(uuid))
    }

    async fn delete_event_source_mapping(&self, uuid: &str) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("functions", "delete_event_source_mapping", uuid)?;
        let before = state.mappings.len();
        state.mappings.retain(|m| m.uuid != uuid);
        if state.mappings.len() == before {
            return Err(not_found("functions", "delete_event_source_mapping", uuid));
        }
        Ok(())
    }
}

// ── Rules ──────────────────────────────────────────────────────────

#[async_trait]
impl EventRuleService for SimClient {
    async fn put_rule(&self, name: &str, schedule: &str) -> CloudResult<String> {
        let mut state = self.lock();
        state.enter("rules", "put_rule", name)?;
        let arn = self.config.arn("events", &format!("rule/{name}"));
        let rule = state.rules.entry(name.to_string()).or_insert_with(|| SimRule {
            arn: arn.clone(),
            schedule: schedule.to_string(),
            targets: Vec::new(),
        });
        rule.schedule = schedule.to_string();
        Ok(rule.arn.clone())
    }

    async fn put_targets(&self, rule: &str, targets: &[RuleTarget]) -> CloudResult<u32> {
        let mut state = self.lock();
        state.enter("rules", "put_targets", rule)?;
        let Some(existing) = state.rules.get_mut(rule) else {
            return Ok(targets.len() as u32);
        };
        for target in targets {
            existing.targets.retain(|t| t.id != target.id);
            existing.targets.push(target.clone());
        }
        Ok(0)
    }
}

// ── Autoscaling & images ───────────────────────────────────────────

#[async_trait]
impl AutoScalingService for SimClient {
    async fn create_group(&self, spec: &AutoScalingGroupSpec) -> CloudResult<Provisioned> {
        let mut state = self.lock();
        state.enter("autoscaling", "create_group", &spec.name)?;
        if state.groups.contains_key(&spec.name) {
            return Ok(Provisioned::AlreadyExists);
        }
        state.groups.insert(
            spec.name.clone(),
            SimGroup {
                spec: spec.clone(),
                target_groups: Vec::new(),
            },
        );
        Ok(Provisioned::Created(()))
    }

    async fn attach_target_groups(
        &self,
        group: &str,
        target_group_arns: &[String],
    ) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("autoscaling", "attach_target_groups", group)?;
        let existing = state
            .groups
            .get_mut(group)
            .ok_or_else(|| not_found("autoscaling", "attach_target_groups", group))?;
        for arn in target_group_arns {
            if !existing.target_groups.contains(arn) {
                existing.target_groups.push(arn.clone());
            }
        }
        Ok(())
    }

    async fn detach_target_groups(
        &self,
        group: &str,
        target_group_arns: &[String],
    ) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("autoscaling", "detach_target_groups", group)?;
        let existing = state
            .groups
            .get_mut(group)
            .ok_or_else(|| not_found("autoscaling", "detach_target_groups", group))?;
        existing
            .target_groups
            .retain(|arn| !target_group_arns.contains(arn));
        Ok(())
    }

    async fn describe_group(&self, group: &str) -> CloudResult<Option<AutoScalingGroupInfo>> {
        let mut state = self.lock();
        state.enter("autoscaling", "describe_group", group)?;
        Ok(state.groups.get(group).map(|g| AutoScalingGroupInfo {
            name: g.spec.name.clone(),
            size: g.spec.size,
            target_group_arns: g.target_groups.clone(),
        }))
    }
}

#[async_trait]
impl ImageService for SimClient {
    async fn find_image(&self, os_version: &str) -> CloudResult<Option<String>> {
        let mut state = self.lock();
        state.enter("images", "find_image", os_version)?;
        Ok(state.images.get(os_version).cloned())
    }
}

// ── Queues ─────────────────────────────────────────────────────────

#[async_trait]
impl QueueService for SimClient {
    async fn create_queue(
        &self,
        name: &str,
        attributes: &QueueAttributes,
    ) -> CloudResult<Provisioned<String>> {
        let mut state = self.lock();
        state.enter("queues", "create_queue", name)?;
        if state.queues.contains_key(name) {
            return Ok(Provisioned::AlreadyExists);
        }
        let url = format!(
            "https://sqs.{}.amazonaws.com/{}/{name}",
            self.config.region(),
            self.config.account()
        );
        state.queues.insert(
            name.to_string(),
            SimQueue {
                url: url.clone(),
                arn: self.config.arn("sqs", name),
                attributes: attributes.clone(),
            },
        );
        Ok(Provisioned::Created(url))
    }

    async fn get_queue_url(&self, name: &str) -> CloudResult<Option<String>> {
        let mut state = self.lock();
        state.enter("queues", "get_queue_url", name)?;
        Ok(state.queues.get(name).map(|q| q.url.clone()))
    }

    async fn get_queue_arn(&self, url: &str) -> CloudResult<String> {
        let mut state = self.lock();
        state.enter("queues", "get_queue_arn", url)?;
        state
            .queues
            .values()
            .find(|q| q.url == url)
            .map(|q| q.arn.clone())
            .ok_or_else(|| not_found("queues", "get_queue_arn", url))
    }

    async fn set_queue_attributes(
        &self,
        url: &str,
        attributes: &QueueAttributes,
    ) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("queues", "set_queue_attributes", url)?;
        let queue = state
            .queues
            .values_mut()
            .find(|q| q.url == url)
            .ok_or_else(|| not_found("queues", "set_queue_attributes", url))?;
        queue.attributes = attributes.clone();
        Ok(())
    }
}

// ── Logs ───────────────────────────────────────────────────────────

#[async_trait]
impl LogService for SimClient {
    async fn create_log_group(&self, name: &str) -> CloudResult<Provisioned> {
        let mut state = self.lock();
        state.enter("logs", "create_log_group", name)?;
        if state.log_groups.contains_key(name) {
            return Ok(Provisioned::AlreadyExists);
        }
        state
            .log_groups
            .insert(name.to_string(), SimLogGroup::default());
        Ok(Provisioned::Created(()))
    }

    async fn put_retention_policy(&self, name: &str, days: u32) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("logs", "put_retention_policy", name)?;
        let group = state
            .log_groups
            .get_mut(name)
            .ok_or_else(|| not_found("logs", "put_retention_policy", name))?;
        group.retention_days = Some(days);
        Ok(())
    }

    async fn put_subscription_filter(&self, filter: &SubscriptionFilter) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("logs", "put_subscription_filter", &filter.log_group)?;
        let group = state
            .log_groups
            .get_mut(&filter.log_group)
            .ok_or_else(|| not_found("logs", "put_subscription_filter", &filter.log_group))?;
        group
            .filters
            .insert(filter.filter_name.clone(), filter.clone());
        Ok(())
    }

    async fn delete_subscription_filter(
        &self,
        log_group: &str,
        filter_name: &str,
    ) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("logs", "delete_subscription_filter", log_group)?;
        state
            .log_groups
            .get_mut(log_group)
            .and_then(|g| g.filters.remove(filter_name))
            .map(|_| ())
            .ok_or_else(|| not_found("logs", "delete_subscription_filter", filter_name))
    }
}

// ── Clusters ───────────────────────────────────────────────────────

#[async_trait]
impl ClusterService for SimClient {
    async fn describe_cluster(&self, identifier: &str) -> CloudResult<Option<ClusterInfo>> {
        let mut state = self.lock();
        state.enter("clusters", "describe_cluster", identifier)?;
        let Some(cluster) = state.clusters.get_mut(identifier) else {
            return Ok(None);
        };
        if cluster.info.status == ClusterStatus::Creating {
            if cluster.remaining_polls > 0 {
                cluster.remaining_polls -= 1;
            } else {
                cluster.info.status = ClusterStatus::Available;
            }
        }
        Ok(Some(cluster.info.clone()))
    }

    async fn create_subnet_group(
        &self,
        name: &str,
        _subnet_ids: &[String],
        _tags: &[Tag],
    ) -> CloudResult<Provisioned> {
        let mut state = self.lock();
        state.enter("clusters", "create_subnet_group", name)?;
        if !state.subnet_groups.insert(name.to_string()) {
            return Ok(Provisioned::AlreadyExists);
        }
        Ok(Provisioned::Created(()))
    }

    async fn create_cluster(&self, spec: &ClusterSpec) -> CloudResult<Provisioned<ClusterInfo>> {
        let mut state = self.lock();
        state.enter("clusters", "create_cluster", &spec.identifier)?;
        if state.clusters.contains_key(&spec.identifier) {
            return Ok(Provisioned::AlreadyExists);
        }
        if !state.subnet_groups.contains(&spec.subnet_group) {
            return Err(not_found("clusters", "create_cluster", &spec.subnet_group));
        }
        let id = state.next_id(&spec.identifier);
        let polls = state.behavior.cluster_polls;
        let info = ClusterInfo {
            identifier: spec.identifier.clone(),
            arn: self.config.arn("rds", &format!("cluster:{}", spec.identifier)),
            status: if polls == 0 {
                ClusterStatus::Available
            } else {
                ClusterStatus::Creating
            },
            endpoint: Some(format!(
                "{}.cluster-{id}.{}.rds.amazonaws.com",
                spec.identifier,
                self.config.region()
            )),
            port: 5432,
            resource_id: format!("cluster-{}", id.to_uppercase()),
        };
        state
            .databases
            .insert(info.arn.clone(), SimDatabase::default());
        state.clusters.insert(
            spec.identifier.clone(),
            SimCluster {
                info: info.clone(),
                tags: spec.tags.clone(),
                remaining_polls: polls,
            },
        );
        Ok(Provisioned::Created(info))
    }

    async fn add_tags(&self, arn: &str, tags: &[Tag]) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("clusters", "add_tags", arn)?;
        let cluster = state
            .clusters
            .values_mut()
            .find(|c| c.info.arn == arn)
            .ok_or_else(|| not_found("clusters", "add_tags", arn))?;
        for tag in tags {
            cluster.tags.retain(|t| t.key != tag.key);
            cluster.tags.push(tag.clone());
        }
        Ok(())
    }
}

// ── Data API ───────────────────────────────────────────────────────

fn apply_sql(db: &mut SimDatabase, sql: &str, params: &[SqlParam]) -> CloudResult<SqlOutcome> {
    let trimmed = sql.trim();
    if trimmed.starts_with("SELECT version FROM schemaVersion") {
        if !db.schema_table {
            return Err(CloudError::provider(
                "data_api",
                "execute",
                ProviderErrorKind::BadRequest,
                "relation \"schemaversion\" does not exist",
            ));
        }
        return Ok(SqlOutcome {
            records: vec![vec![SqlValue::Long(db.version)]],
            updated_records: 0,
        });
    }
    if trimmed.starts_with("UPDATE schemaVersion") {
        let target = params.iter().find_map(|p| match (&p.name[..], &p.value) {
            ("schemaVersion", SqlValue::Long(v)) => Some(*v),
            _ => None,
        });
        let updated = match target {
            Some(v) if db.schema_table && db.version == v - 1 => {
                db.version = v;
                1
            }
            _ => 0,
        };
        return Ok(SqlOutcome {
            records: Vec::new(),
            updated_records: updated,
        });
    }
    if trimmed.contains("CREATE TABLE") && trimmed.contains("schemaVersion") {
        db.schema_table = true;
        db.version = -1;
    }
    db.statements.push(trimmed.to_string());
    Ok(SqlOutcome::default())
}

#[async_trait]
impl DataApiService for SimClient {
    async fn begin_transaction(&self, creds: &DbCredentials, _database: &str) -> CloudResult<String> {
        let mut state = self.lock();
        state.enter("data_api", "begin_transaction", &creds.resource_arn)?;
        let staged = state
            .databases
            .get(&creds.resource_arn)
            .cloned()
            .ok_or_else(|| not_found("data_api", "begin_transaction", &creds.resource_arn))?;
        let id = state.next_id("tx");
        state.transactions.insert(
            id.clone(),
            SimTransaction {
                resource_arn: creds.resource_arn.clone(),
                staged,
            },
        );
        Ok(id)
    }

    async fn execute(
        &self,
        creds: &DbCredentials,
        _database: &str,
        sql: &str,
        params: &[SqlParam],
        transaction_id: Option<&str>,
    ) -> CloudResult<SqlOutcome> {
        let mut state = self.lock();
        state.enter("data_api", "execute", &creds.resource_arn)?;
        if let Some(fragment) = &state.failing_sql {
            if sql.contains(fragment.as_str()) {
                return Err(CloudError::provider(
                    "data_api",
                    "execute",
                    ProviderErrorKind::BadRequest,
                    format!("syntax error near {fragment}"),
                ));
            }
        }
        let db = match transaction_id {
            Some(id) => state
                .transactions
                .get_mut(id)
                .map(|tx| &mut tx.staged)
                .ok_or_else(|| not_found("data_api", "execute", id))?,
            None => state
                .databases
                .get_mut(&creds.resource_arn)
                .ok_or_else(|| not_found("data_api", "execute", &creds.resource_arn))?,
        };
        apply_sql(db, sql, params)
    }

    async fn commit_transaction(
        &self,
        creds: &DbCredentials,
        transaction_id: &str,
    ) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("data_api", "commit_transaction", &creds.resource_arn)?;
        let tx = state
            .transactions
            .remove(transaction_id)
            .ok_or_else(|| not_found("data_api", "commit_transaction", transaction_id))?;
        state.databases.insert(tx.resource_arn, tx.staged);
        Ok(())
    }

    async fn rollback_transaction(
        &self,
        creds: &DbCredentials,
        transaction_id: &str,
    ) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("data_api", "rollback_transaction", &creds.resource_arn)?;
        state
            .transactions
            .remove(transaction_id)
            .map(|_| ())
            .ok_or_else(|| not_found("data_api", "rollback_transaction", transaction_id))
    }
}

// ── Secrets ────────────────────────────────────────────────────────

#[async_trait]
impl SecretService for SimClient {
    async fn create_secret(&self, name: &str, value: &str, tags: &[Tag]) -> CloudResult<String> {
        let mut state = self.lock();
        state.enter("secrets", "create_secret", name)?;
        if state.secrets.iter().any(|s| s.info.name == name) {
            return Err(CloudError::provider(
                "secrets",
                "create_secret",
                ProviderErrorKind::AlreadyExists,
                format!("secret {name} already exists"),
            ));
        }
        let arn = self
            .config
            .arn("secretsmanager", &format!("secret:{name}"));
        state.secrets.push(SimSecret {
            info: SecretInfo {
                name: name.to_string(),
                arn: arn.clone(),
                tags: tags.to_vec(),
            },
            value: value.to_string(),
        });
        Ok(arn)
    }

    async fn find_secrets_by_tag(&self, key: &str, value: &str) -> CloudResult<Vec<SecretInfo>> {
        let mut state = self.lock();
        state.enter("secrets", "find_secrets_by_tag", value)?;
        Ok(state
            .secrets
            .iter()
            .filter(|s| tag_value(&s.info.tags, key) == Some(value))
            .map(|s| s.info.clone())
            .collect())
    }
}

// ── Search ─────────────────────────────────────────────────────────

#[async_trait]
impl SearchService for SimClient {
    async fn describe_domain(&self, name: &str) -> CloudResult<Option<SearchDomain>> {
        let mut state = self.lock();
        state.enter("search", "describe_domain", name)?;
        let Some(domain) = state.search_domains.get_mut(name) else {
            return Ok(None);
        };
        if domain.domain.endpoint.is_none() {
            if domain.remaining_polls > 0 {
                domain.remaining_polls -= 1;
            } else {
                domain.domain.endpoint = Some(domain.endpoint.clone());
            }
        }
        Ok(Some(domain.domain.clone()))
    }

    async fn create_domain(&self, spec: &SearchDomainSpec) -> CloudResult<Provisioned> {
        let mut state = self.lock();
        state.enter("search", "create_domain", &spec.name)?;
        if state.search_domains.contains_key(&spec.name) {
            return Ok(Provisioned::AlreadyExists);
        }
        let id = state.next_id(&spec.name);
        let polls = state.behavior.search_polls;
        let endpoint = format!("vpc-{}-{id}.{}.es.amazonaws.com", spec.name, self.config.region());
        state.search_domains.insert(
            spec.name.clone(),
            SimSearchDomain {
                domain: SearchDomain {
                    name: spec.name.clone(),
                    arn: self.config.arn("es", &format!("domain/{}", spec.name)),
                    endpoint: (polls == 0).then(|| endpoint.clone()),
                },
                endpoint,
                remaining_polls: polls,
            },
        );
        Ok(Provisioned::Created(()))
    }
}

// ── Tables & storage ───────────────────────────────────────────────

#[async_trait]
impl TableService for SimClient {
    async fn create_table(&self, spec: &TableSpec) -> CloudResult<Provisioned> {
        let mut state = self.lock();
        state.enter("tables", "create_table", &spec.name)?;
        if state.tables.contains_key(&spec.name) {
            return Ok(Provisioned::AlreadyExists);
        }
        state.tables.insert(spec.name.clone(), spec.clone());
        Ok(Provisioned::Created(()))
    }
}

#[async_trait]
impl ObjectStorageService for SimClient {
    async fn create_bucket(&self, name: &str) -> CloudResult<Provisioned> {
        let mut state = self.lock();
        state.enter("storage", "create_bucket", name)?;
        if state.buckets.contains_key(name) {
            return Ok(Provisioned::AlreadyExists);
        }
        state.buckets.insert(name.to_string(), SimBucket::default());
        Ok(Provisioned::Created(()))
    }

    async fn put_default_encryption(&self, bucket: &str) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("storage", "put_default_encryption", bucket)?;
        let b = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| not_found("storage", "put_default_encryption", bucket))?;
        b.encrypted = true;
        Ok(())
    }

    async fn block_public_access(&self, bucket: &str) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("storage", "block_public_access", bucket)?;
        let b = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| not_found("storage", "block_public_access", bucket))?;
        b.public_access_blocked = true;
        Ok(())
    }

    async fn put_lifecycle_rules(&self, bucket: &str, rules: &[LifecycleRule]) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("storage", "put_lifecycle_rules", bucket)?;
        let b = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| not_found("storage", "put_lifecycle_rules", bucket))?;
        b.lifecycle = rules.to_vec();
        Ok(())
    }
}

// ── Certificates ───────────────────────────────────────────────────

/// Whether every validation record of a certificate is present in DNS.
fn validation_records_present(state: &SimState, detail: &CertificateDetail) -> bool {
    detail
        .validations
        .iter()
        .filter_map(|v| v.record.as_ref())
        .all(|record| state.records.keys().any(|(_, name)| name == &record.name))
}

#[async_trait]
impl CertificateService for SimClient {
    async fn request_certificate(
        &self,
        hostname: &str,
        alt_names: &[String],
    ) -> CloudResult<String> {
        let mut state = self.lock();
        state.enter("certificates", "request_certificate", hostname)?;

        let reusable = state.certificates.values().find(|c| {
            c.hostname == hostname
                && c.alt_names == alt_names
                && c.detail.status == CertificateStatus::Issued
        });
        if let Some(cert) = reusable {
            return Ok(cert.detail.arn.clone());
        }

        let id = state.next_id(hostname);
        let arn = self.config.arn("acm", &format!("certificate/{id}"));
        let scenario = state.behavior.certificate.clone();
        // The wildcard and the bare name validate through the same record.
        let record = ValidationRecord {
            name: format!("_{}.{hostname}", &id[..8]),
            value: format!("_{}.acm-validations.aws", &id[8..]),
        };
        let (status, validation_status, remaining_polls, never_issue) = match scenario {
            CertificateScenario::Issued => {
                (CertificateStatus::Issued, ValidationStatus::Success, 0, false)
            }
            CertificateScenario::PendingThenIssued { polls } => (
                CertificateStatus::PendingValidation,
                ValidationStatus::PendingValidation,
                polls,
                false,
            ),
            CertificateScenario::ValidationFailed | CertificateScenario::NeverIssued => (
                CertificateStatus::PendingValidation,
                ValidationStatus::PendingValidation,
                0,
                true,
            ),
        };
        let mut validations: Vec<DomainValidation> = std::iter::once(hostname.to_string())
            .chain(alt_names.iter().cloned())
            .map(|domain| DomainValidation {
                domain,
                status: validation_status,
                record: Some(record.clone()),
            })
            .collect();
        if scenario == CertificateScenario::ValidationFailed {
            if let Some(last) = validations.last_mut() {
                last.status = ValidationStatus::Failed;
            }
        }
        state.certificates.insert(
            arn.clone(),
            SimCertificate {
                hostname: hostname.to_string(),
                alt_names: alt_names.to_vec(),
                detail: CertificateDetail {
                    arn: arn.clone(),
                    status,
                    validations,
                },
                remaining_polls,
                never_issue,
            },
        );
        Ok(arn)
    }

    async fn describe_certificate(&self, arn: &str) -> CloudResult<CertificateDetail> {
        let mut state = self.lock();
        state.enter("certificates", "describe_certificate", arn)?;
        let Some(mut cert) = state.certificates.get(arn).cloned() else {
            return Err(not_found("certificates", "describe_certificate", arn));
        };
        if cert.detail.status == CertificateStatus::PendingValidation && !cert.never_issue {
            if cert.remaining_polls > 0 {
                cert.remaining_polls -= 1;
            } else if validation_records_present(&state, &cert.detail) {
                cert.detail.status = CertificateStatus::Issued;
                for validation in &mut cert.detail.validations {
                    validation.status = ValidationStatus::Success;
                }
            }
        }
        let detail = cert.detail.clone();
        state.certificates.insert(arn.to_string(), cert);
        Ok(detail)
    }
}

// ── DNS ────────────────────────────────────────────────────────────

#[async_trait]
impl DnsService for SimClient {
    async fn find_zone(&self, domain: &str) -> CloudResult<Option<String>> {
        let mut state = self.lock();
        state.enter("dns", "find_zone", domain)?;
        Ok(state.zones.get(domain).cloned())
    }

    async fn upsert_record(&self, zone_id: &str, record: &DnsRecord) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("dns", "upsert_record", &record.name)?;
        if !state.zones.values().any(|z| z == zone_id) {
            return Err(not_found("dns", "upsert_record", zone_id));
        }
        state
            .records
            .insert((zone_id.to_string(), record.name.clone()), record.clone());
        Ok(())
    }

    async fn delete_record(&self, zone_id: &str, record: &DnsRecord) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("dns", "delete_record", &record.name)?;
        state
            .records
            .remove(&(zone_id.to_string(), record.name.clone()))
            .map(|_| ())
            .ok_or_else(|| not_found("dns", "delete_record", &record.name))
    }
}

// ── Load balancing ─────────────────────────────────────────────────

#[async_trait]
impl LoadBalancerService for SimClient {
    async fn describe_load_balancer(&self, name: &str) -> CloudResult<Option<LoadBalancerInfo>> {
        let mut state = self.lock();
        state.enter("load_balancers", "describe_load_balancer", name)?;
        Ok(state.load_balancers.get(name).map(|lb| lb.info.clone()))
    }

    async fn create_load_balancer(
        &self,
        spec: &LoadBalancerSpec,
    ) -> CloudResult<Provisioned<LoadBalancerInfo>> {
        let mut state = self.lock();
        state.enter("load_balancers", "create_load_balancer", &spec.name)?;
        if state.load_balancers.contains_key(&spec.name) {
            return Ok(Provisioned::AlreadyExists);
        }
        let id = SimState::stable_id(&spec.name);
        let target = &spec.default_target;
        let target_arn = self
            .config
            .arn("elasticloadbalancing", &format!("targetgroup/{}/{id}", target.name));
        state
            .target_groups
            .insert(target.name.clone(), (target_arn.clone(), target.clone()));
        let arn = self.config.arn(
            "elasticloadbalancing",
            &format!("loadbalancer/app/{}/{id}", spec.name),
        );
        let info = LoadBalancerInfo {
            name: spec.name.clone(),
            arn: arn.clone(),
            dns_name: format!("{}-{id}.{}.elb.amazonaws.com", spec.name, self.config.region()),
            canonical_zone_id: "Z1H1FL5HABSF5".to_string(),
            listener_arn: format!("{arn}/listener/443"),
            default_target_group_arn: target_arn,
        };
        state.load_balancers.insert(
            spec.name.clone(),
            SimLoadBalancer {
                info: info.clone(),
                web_acl: None,
            },
        );
        Ok(Provisioned::Created(info))
    }

    async fn associate_web_acl(
        &self,
        load_balancer_arn: &str,
        acl_name: &str,
    ) -> CloudResult<Provisioned> {
        let mut state = self.lock();
        state.enter("load_balancers", "associate_web_acl", acl_name)?;
        let lb = state
            .load_balancers
            .values_mut()
            .find(|lb| lb.info.arn == load_balancer_arn)
            .ok_or_else(|| not_found("load_balancers", "associate_web_acl", load_balancer_arn))?;
        if lb.web_acl.as_deref() == Some(acl_name) {
            return Ok(Provisioned::AlreadyExists);
        }
        lb.web_acl = Some(acl_name.to_string());
        Ok(Provisioned::Created(()))
    }

    async fn create_target_group(&self, spec: &TargetGroupSpec) -> CloudResult<Provisioned<String>> {
        let mut state = self.lock();
        state.enter("load_balancers", "create_target_group", &spec.name)?;
        if state.target_groups.contains_key(&spec.name) {
            return Ok(Provisioned::AlreadyExists);
        }
        let id = SimState::stable_id(&spec.name);
        let arn = self
            .config
            .arn("elasticloadbalancing", &format!("targetgroup/{}/{id}", spec.name));
        state
            .target_groups
            .insert(spec.name.clone(), (arn.clone(), spec.clone()));
        Ok(Provisioned::Created(arn))
    }

    async fn find_target_group(&self, name: &str) -> CloudResult<Option<String>> {
        let mut state = self.lock();
        state.enter("load_balancers", "find_target_group", name)?;
        Ok(state.target_groups.get(name).map(|(arn, _)| arn.clone()))
    }

    async fn delete_target_group(&self, arn: &str) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("load_balancers", "delete_target_group", arn)?;
        let name = state
            .target_groups
            .iter()
            .find(|(_, (a, _))| a == arn)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| not_found("load_balancers", "delete_target_group", arn))?;
        state.target_groups.remove(&name);
        Ok(())
    }

    async fn add_host_rule(
        &self,
        _listener_arn: &str,
        host: &str,
        target_group_arn: &str,
    ) -> CloudResult<Provisioned> {
        let mut state = self.lock();
        state.enter("load_balancers", "add_host_rule", host)?;
        if state.host_rules.get(host).map(String::as_str) == Some(target_group_arn) {
            return Ok(Provisioned::AlreadyExists);
        }
        state
            .host_rules
            .insert(host.to_string(), target_group_arn.to_string());
        Ok(Provisioned::Created(()))
    }

    async fn remove_host_rule(&self, _listener_arn: &str, host: &str) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("load_balancers", "remove_host_rule", host)?;
        state
            .host_rules
            .remove(host)
            .map(|_| ())
            .ok_or_else(|| not_found("load_balancers", "remove_host_rule", host))
    }
}

// ── Security groups ────────────────────────────────────────────────

#[async_trait]
impl SecurityGroupService for SimClient {
    async fn find_group(&self, name: &str, vpc_id: &str) -> CloudResult<Option<String>> {
        let mut state = self.lock();
        state.enter("security_groups", "find_group", name)?;
        Ok(state
            .security_groups
            .get(name)
            .filter(|g| g.vpc_id == vpc_id)
            .map(|g| g.id.clone()))
    }

    async fn create_group(
        &self,
        name: &str,
        vpc_id: &str,
        _description: &str,
    ) -> CloudResult<Provisioned<String>> {
        let mut state = self.lock();
        state.enter("security_groups", "create_group", name)?;
        if state.security_groups.contains_key(name) {
            return Ok(Provisioned::AlreadyExists);
        }
        let id = format!("sg-{}", state.next_id(name));
        state.security_groups.insert(
            name.to_string(),
            SimSecurityGroup {
                id: id.clone(),
                vpc_id: vpc_id.to_string(),
                ingress: Vec::new(),
            },
        );
        Ok(Provisioned::Created(id))
    }

    async fn authorize_ingress(
        &self,
        group_id: &str,
        port: u16,
        cidr: &str,
    ) -> CloudResult<Provisioned> {
        let mut state = self.lock();
        state.enter("security_groups", "authorize_ingress", group_id)?;
        let group = state
            .security_groups
            .values_mut()
            .find(|g| g.id == group_id)
            .ok_or_else(|| not_found("security_groups", "authorize_ingress", group_id))?;
        let rule = (port, cidr.to_string());
        if group.ingress.contains(&rule) {
            return Ok(Provisioned::AlreadyExists);
        }
        group.ingress.push(rule);
        Ok(Provisioned::Created(()))
    }
}

// ── Identity ───────────────────────────────────────────────────────

#[async_trait]
impl IdentityService for SimClient {
    async fn create_role(&self, spec: &RoleSpec) -> CloudResult<Provisioned<String>> {
        let mut state = self.lock();
        state.enter("identity", "create_role", &spec.name)?;
        let result = if state.roles.contains_key(&spec.name) {
            Err(CloudError::provider(
                "identity",
                "create_role",
                ProviderErrorKind::AlreadyExists,
                format!("EntityAlreadyExists: role {}", spec.name),
            ))
        } else {
            state.roles.insert(
                spec.name.clone(),
                SimRole {
                    spec: spec.clone(),
                    attached: spec.managed_policies.clone(),
                },
            );
            Ok(self.config.role_arn(&spec.name))
        };
        Provisioned::absorb(result)
    }

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("identity", "attach_role_policy", role)?;
        let existing = state
            .roles
            .get_mut(role)
            .ok_or_else(|| not_found("identity", "attach_role_policy", role))?;
        if !existing.attached.iter().any(|p| p == policy_arn) {
            existing.attached.push(policy_arn.to_string());
        }
        Ok(())
    }

    async fn create_instance_profile(&self, name: &str, role: &str) -> CloudResult<Provisioned> {
        let mut state = self.lock();
        state.enter("identity", "create_instance_profile", name)?;
        if state.instance_profiles.contains_key(name) {
            return Ok(Provisioned::AlreadyExists);
        }
        state
            .instance_profiles
            .insert(name.to_string(), role.to_string());
        Ok(Provisioned::Created(()))
    }
}
