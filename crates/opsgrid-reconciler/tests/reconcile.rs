//! End-to-end reconciliation against the simulated provider.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use opsgrid_cloud::ProviderErrorKind;
use opsgrid_cloud::edge::{RecordTarget, RecordType};
use opsgrid_cloud::sim::SimulatedCloud;
use opsgrid_core::{ErrorKind, OpsConfig};
use opsgrid_reconciler::{
    Access, BootstrapClaims, DeploymentParams, InMemoryAccountData, InitAdminParams,
    ReconcileError, Reconciler, SubscriptionParams, TokenSigner,
};
use opsgrid_state::{Deployment, Network, StateStore};
use sha2::{Digest, Sha256};

struct Harness {
    cloud: SimulatedCloud,
    store: Arc<StateStore>,
    accounts: Arc<InMemoryAccountData>,
    reconciler: Reconciler,
}

fn harness() -> Harness {
    harness_with(None, None)
}

fn harness_with(warehouse_key: Option<&str>, signing_secret: Option<&[u8]>) -> Harness {
    let cloud = SimulatedCloud::new().with_zone("example.com");
    let store = Arc::new(StateStore::open_in_memory().unwrap());
    store
        .put_network(&Network {
            name: "net1".to_string(),
            region: "us-west-2".to_string(),
            vpc_id: "vpc-1".to_string(),
            public_subnets: vec!["subnet-a".to_string(), "subnet-b".to_string()],
            private_subnets: vec!["subnet-c".to_string(), "subnet-d".to_string()],
            security_group_id: "sg-1".to_string(),
        })
        .unwrap();
    let accounts = Arc::new(InMemoryAccountData::new());

    let mut reconciler = Reconciler::new(
        OpsConfig::for_testing(),
        Arc::new(cloud.clone()),
        store.clone(),
        store.clone(),
        accounts.clone(),
    )
    .with_warehouse_key(warehouse_key.map(str::to_string));
    if let Some(secret) = signing_secret {
        reconciler = reconciler.with_signer(TokenSigner::new(secret));
    }

    Harness {
        cloud,
        store,
        accounts,
        reconciler,
    }
}

fn d1_params() -> DeploymentParams {
    let mut params = DeploymentParams::new("d1", "us-west-2", "net1", "example.com");
    params.size = Some(2);
    params.data_warehouse_enabled = Some(false);
    params.elastic_search_endpoint = Some(String::new());
    params
}

fn stored_record(feature_use_dns_s3_bucket: bool) -> Deployment {
    Deployment {
        name: "d1".to_string(),
        region: "us-west-2".to_string(),
        network_name: "net1".to_string(),
        domain_name: "example.com".to_string(),
        size: 5,
        segment_key: String::new(),
        elastic_search_endpoint: String::new(),
        data_warehouse_enabled: false,
        feature_use_dns_s3_bucket,
        grafana_endpoint: None,
        engine_version_tag: None,
    }
}

// ── add ────────────────────────────────────────────────────────────

#[tokio::test]
async fn add_provisions_the_whole_deployment() {
    let h = harness();
    let deployment = h.reconciler.add(&d1_params()).await.unwrap();

    let stored = h.store.get_deployment("d1", "us-west-2").unwrap().unwrap();
    assert_eq!(stored, deployment);
    assert_eq!(stored.size, 2);

    let bucket = h.cloud.bucket("fusebit-d1-us-west-2").unwrap();
    assert!(bucket.encrypted);
    assert!(h.cloud.has_table("d1.log"));
    assert!(h.cloud.cluster("fusebit-db-d1").is_some());
    assert!(h.cloud.queue_arn("d1-cron").is_some());
    assert!(h.cloud.queue_arn("d1-cron-dead-letter").is_some());

    let lb = h.cloud.load_balancer("d1-lb").unwrap();
    let record = h
        .cloud
        .dns_record("default-target.d1.us-west-2.example.com")
        .unwrap();
    assert_eq!(record.record_type, RecordType::A);
    match record.target {
        RecordTarget::Alias { dns_name, .. } => assert_eq!(dns_name, lb.dns_name),
        other => panic!("expected alias, got {other:?}"),
    }

    // Neither search nor telemetry configured: the subscription is removed.
    assert_eq!(h.cloud.call_count("logs.delete_subscription_filter"), 1);
    assert_eq!(h.cloud.call_count("logs.put_subscription_filter"), 0);

    // Data warehouse export disabled.
    assert!(h.cloud.function("d1-dwh-export").is_none());
    assert_eq!(h.cloud.call_count("rules.put_rule d1-dwh-export-trigger"), 0);
}

#[tokio::test]
async fn second_add_is_already_exists_and_keeps_first_record() {
    let h = harness();
    h.reconciler.add(&d1_params()).await.unwrap();
    let calls_before = h.cloud.calls().len();

    let mut again = d1_params();
    again.size = Some(9);
    let err = h.reconciler.add(&again).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let stored = h.store.get_deployment("d1", "us-west-2").unwrap().unwrap();
    assert_eq!(stored.size, 2);
    assert_eq!(h.cloud.calls().len(), calls_before);
}

#[tokio::test]
async fn failed_cron_removes_record_and_retry_succeeds() {
    let h = harness();
    h.cloud
        .fail("queues.create_queue:d1-cron", ProviderErrorKind::Other);

    let err = h.reconciler.add(&d1_params()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fatal);
    match &err {
        ReconcileError::Pipeline(inner) => assert_eq!(inner.step(), Some("queue")),
        other => panic!("expected pipeline error, got {other:?}"),
    }
    assert!(h.store.get_deployment("d1", "us-west-2").unwrap().is_none());
    assert!(h.cloud.bucket("fusebit-d1-us-west-2").is_some());

    h.cloud.clear_failures();
    h.reconciler.add(&d1_params()).await.unwrap();
    assert!(h.store.get_deployment("d1", "us-west-2").unwrap().is_some());
    assert!(h.cloud.queue_arn("d1-cron").is_some());
}

#[tokio::test]
async fn warehouse_export_needs_a_key() {
    let h = harness();
    let mut params = d1_params();
    params.data_warehouse_enabled = None;

    let err = h.reconciler.add(&params).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fatal);
    assert!(err.to_string().contains("FUSEBIT_GC_BQ_KEY_BASE64"));
    assert!(h.store.get_deployment("d1", "us-west-2").unwrap().is_none());

    let h = harness_with(Some("a2V5"), None);
    let deployment = h.reconciler.add(&params).await.unwrap();
    assert!(deployment.data_warehouse_enabled);
    assert!(h.cloud.function("d1-dwh-export").is_some());
}

#[tokio::test]
async fn unknown_network_rolls_back() {
    let h = harness();
    let mut params = d1_params();
    params.network_name = "missing".to_string();

    let err = h.reconciler.add(&params).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(matches!(err, ReconcileError::NetworkNotFound { .. }));
    assert!(h.store.get_deployment("d1", "us-west-2").unwrap().is_none());
}

#[tokio::test]
async fn zero_size_never_writes_a_record() {
    let h = harness();
    let mut params = d1_params();
    params.size = Some(0);

    let err = h.reconciler.add(&params).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(h.store.get_deployment("d1", "us-west-2").unwrap().is_none());
    assert!(h.cloud.calls().is_empty());
}

// ── exists_and_update ──────────────────────────────────────────────

#[tokio::test]
async fn update_of_unknown_deployment_fills_defaults() {
    let h = harness();
    let mut params = DeploymentParams::new("d1", "us-west-2", "net1", "example.com");

    assert!(!h.reconciler.exists_and_update(&mut params).await.unwrap());
    assert_eq!(params.size, Some(2));
    assert_eq!(params.data_warehouse_enabled, Some(true));
    assert_eq!(params.elastic_search_endpoint.as_deref(), Some(""));
    assert!(h.cloud.calls().is_empty());
}

#[tokio::test]
async fn update_with_different_domain_is_a_conflict() {
    let h = harness();
    h.store.insert_deployment(&stored_record(false)).unwrap();

    let mut params = DeploymentParams::new("d1", "us-west-2", "net1", "other.com");
    params.size = Some(8);
    let err = h.reconciler.exists_and_update(&mut params).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(matches!(err, ReconcileError::DifferentDomain { .. }));

    let mut params = DeploymentParams::new("d1", "us-west-2", "net2", "example.com");
    let err = h.reconciler.exists_and_update(&mut params).await.unwrap_err();
    assert!(matches!(err, ReconcileError::DifferentNetwork { .. }));

    assert_eq!(
        h.store.get_deployment("d1", "us-west-2").unwrap().unwrap(),
        stored_record(false)
    );
    assert!(h.cloud.calls().is_empty());
}

#[tokio::test]
async fn update_preserves_the_bucket_naming_flag() {
    let h = harness();
    h.store.insert_deployment(&stored_record(true)).unwrap();

    let mut params = DeploymentParams::new("d1", "us-west-2", "net1", "example.com");
    params.feature_use_dns_s3_bucket = Some(false);
    assert!(h.reconciler.exists_and_update(&mut params).await.unwrap());

    let stored = h.store.get_deployment("d1", "us-west-2").unwrap().unwrap();
    assert!(stored.feature_use_dns_s3_bucket);
    assert_eq!(stored.size, 5);
    assert!(!stored.data_warehouse_enabled);
    assert_eq!(params.feature_use_dns_s3_bucket, Some(true));
    assert!(h.cloud.bucket("d1.us-west-2.example.com").is_some());
    assert!(h.cloud.bucket("fusebit-d1-us-west-2").is_none());
}

#[tokio::test]
async fn update_applies_requested_size_and_reprovisions() {
    let h = harness();
    h.reconciler.add(&d1_params()).await.unwrap();

    let mut params = DeploymentParams::new("d1", "us-west-2", "net1", "example.com");
    params.size = Some(4);
    params.segment_key = Some("seg-key".to_string());
    assert!(h.reconciler.exists_and_update(&mut params).await.unwrap());

    let stored = h.store.get_deployment("d1", "us-west-2").unwrap().unwrap();
    assert_eq!(stored.size, 4);
    assert_eq!(stored.segment_key, "seg-key");
    assert!(!stored.data_warehouse_enabled);
    // Telemetry now configured: the subscription filter is put.
    assert_eq!(h.cloud.call_count("logs.put_subscription_filter"), 1);
    assert_eq!(h.cloud.call_count("clusters.create_cluster"), 1);
}

// ── subscriptions ──────────────────────────────────────────────────

fn subscription_params(account: Option<String>) -> SubscriptionParams {
    SubscriptionParams {
        deployment_name: "d1".to_string(),
        region: "us-west-2".to_string(),
        account,
        account_name: Some("Acme".to_string()),
        subscription_name: Some("Production".to_string()),
    }
}

#[tokio::test]
async fn subscription_creates_account_when_none_given() {
    let h = harness();
    let deployment = stored_record(false);
    h.store.insert_deployment(&deployment).unwrap();

    let first = h.reconciler.add_subscription(&subscription_params(None)).await.unwrap();
    assert!(first.id.starts_with("sub-"));
    assert!(first.account_id.starts_with("acc-"));
    assert_eq!(h.accounts.account_count(&deployment), 1);

    let second = h
        .reconciler
        .add_subscription(&subscription_params(Some(first.account_id.clone())))
        .await
        .unwrap();
    assert_eq!(second.account_id, first.account_id);
    assert_eq!(h.accounts.account_count(&deployment), 1);
}

#[tokio::test]
async fn subscription_failure_removes_only_a_new_account() {
    let h = harness();
    let deployment = stored_record(false);
    h.store.insert_deployment(&deployment).unwrap();
    let existing = h.reconciler.add_subscription(&subscription_params(None)).await.unwrap();

    h.accounts.fail("create_subscription");
    let err = h
        .reconciler
        .add_subscription(&subscription_params(None))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fatal);
    assert_eq!(h.accounts.account_count(&deployment), 1);

    h.reconciler
        .add_subscription(&subscription_params(Some(existing.account_id)))
        .await
        .unwrap_err();
    assert_eq!(h.accounts.account_count(&deployment), 1);
}

#[tokio::test]
async fn subscription_for_unknown_account_or_deployment() {
    let h = harness();
    let err = h
        .reconciler
        .add_subscription(&subscription_params(None))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::DeploymentNotFound { .. }));

    h.store.insert_deployment(&stored_record(false)).unwrap();
    let err = h
        .reconciler
        .add_subscription(&subscription_params(Some("acc-0000000000000000".to_string())))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ── init_admin ─────────────────────────────────────────────────────

async fn admin_params(h: &Harness) -> InitAdminParams {
    h.store.insert_deployment(&stored_record(false)).unwrap();
    let subscription = h.reconciler.add_subscription(&subscription_params(None)).await.unwrap();
    InitAdminParams {
        deployment_name: "d1".to_string(),
        region: "us-west-2".to_string(),
        account: subscription.account_id,
        subscription: subscription.id,
        first_name: Some("Ada".to_string()),
        last_name: None,
        email: Some("ada@example.com".to_string()),
        boundary: None,
        function: None,
    }
}

#[tokio::test]
async fn init_admin_issues_a_signed_bootstrap_token() {
    let h = harness_with(None, Some(b"signing-secret"));
    let params = admin_params(&h).await;
    let deployment = stored_record(false);

    let bootstrap = h.reconciler.init_admin(&params).await.unwrap();
    assert_eq!(bootstrap.secret.len(), 32);
    assert!(bootstrap.secret.chars().all(|c| c.is_ascii_alphanumeric()));

    let users = h.accounts.users(&deployment);
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].id, bootstrap.user_id);
    assert_eq!(users[0].access, vec![Access::full(&params.account)]);

    let entry = h.accounts.init_entry(&deployment, &bootstrap.init_id).unwrap();
    assert_eq!(entry.user_id, bootstrap.user_id);
    assert_eq!(
        entry.secret_sha256,
        hex::encode(Sha256::digest(bootstrap.secret.as_bytes()))
    );

    let decoded = jsonwebtoken::decode::<BootstrapClaims>(
        &bootstrap.token,
        &DecodingKey::from_secret(b"signing-secret"),
        &Validation::new(Algorithm::HS512),
    )
    .unwrap();
    let claims = decoded.claims;
    assert_eq!(claims.sub, bootstrap.user_id);
    assert_eq!(claims.jti, bootstrap.init_id);
    assert_eq!(claims.exp - claims.iat, 8 * 60 * 60);
    assert_eq!(claims.profile.account, params.account);
    assert_eq!(claims.profile.subscription, params.subscription);
    assert_eq!(claims.profile.base_url, "https://d1.us-west-2.example.com");
}

#[tokio::test]
async fn init_admin_without_signer_removes_the_user() {
    let h = harness();
    let params = admin_params(&h).await;

    let err = h.reconciler.init_admin(&params).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Token(_)));
    assert_eq!(err.kind(), ErrorKind::Fatal);
    assert!(h.accounts.users(&stored_record(false)).is_empty());
}

#[tokio::test]
async fn init_admin_store_failure_removes_the_user() {
    let h = harness_with(None, Some(b"signing-secret"));
    let params = admin_params(&h).await;
    h.accounts.fail("store_init");

    h.reconciler.init_admin(&params).await.unwrap_err();
    assert!(h.accounts.users(&stored_record(false)).is_empty());
}

#[tokio::test]
async fn init_admin_checks_subscription_before_creating_anything() {
    let h = harness_with(None, Some(b"signing-secret"));
    let mut params = admin_params(&h).await;
    params.subscription = "sub-0000000000000000".to_string();

    let err = h.reconciler.init_admin(&params).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(h.accounts.users(&stored_record(false)).is_empty());
}
