//! End-to-end reconcile scenarios against the in-memory cluster.

use async_trait::async_trait;
use chrono::Utc;
use kintent_audit::{AuditFilter, AuditLog, FileStorage, MemoryStorage, Outcome};
use kintent_core::{
    Change, ChangeKind, ChangeSet, ClassifiedError, ClusterReader, FieldChange, IntentSpec,
    KintentConfig, Manifest, ObservedResource, ResourceKind, ResourceRef, Verdict,
};
use kintent_diff::DiffEngine;
use kintent_policy::{ApprovalDecision, ApprovalGate};
use kintent_runtime::{
    ExecuteError, ExecuteOptions, Fault, MemoryCluster, ReconcileError, ReconcileExecutor,
    ReconcileOptions, Reconciler, RetryPolicy,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn fast_config() -> KintentConfig {
    let mut config = KintentConfig::default();
    config.reconcile.initial_backoff_ms = 1;
    config.reconcile.max_backoff_ms = 5;
    config.reconcile.conflict_refresh_delay_ms = 1;
    config
}

struct Harness {
    cluster: Arc<MemoryCluster>,
    storage: Arc<MemoryStorage>,
    audit: Arc<AuditLog>,
    reconciler: Reconciler,
}

fn harness() -> Harness {
    let cluster = Arc::new(MemoryCluster::new());
    let storage = Arc::new(MemoryStorage::new());
    let audit = Arc::new(AuditLog::with_storage(storage.clone()));
    let reconciler = Reconciler::from_config(
        &fast_config(),
        cluster.clone(),
        cluster.clone(),
        audit.clone(),
    );
    Harness {
        cluster,
        storage,
        audit,
        reconciler,
    }
}

fn web() -> ResourceRef {
    ResourceRef::deployment("default", "web")
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::from(&fast_config().reconcile)
}

#[tokio::test]
async fn create_web_deployment_from_empty_cluster() {
    let h = harness();
    let intent = IntentSpec::create("web", "nginx:1.25").build().unwrap();

    let report = h
        .reconciler
        .reconcile(&intent, ReconcileOptions::default())
        .await
        .unwrap();
    assert_eq!(report.outcome(), Some(Outcome::Success));
    assert_eq!(report.attempts.len(), 1);

    let manifest = h.cluster.manifest(&web()).expect("deployment created");
    assert_eq!(manifest.replicas(), Some(1));
    assert_eq!(
        manifest.spec.pointer("/template/spec/containers/0/image"),
        Some(&json!("nginx:1.25"))
    );
    assert_eq!(
        manifest.spec.pointer("/template/spec/containers/0/ports/0/containerPort"),
        Some(&json!(80))
    );

    let records = h.audit.query(&AuditFilter::default()).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, Outcome::Success);
    assert_eq!(records[0].correlation_id, intent.id());
    assert_eq!(records[0].applied.len(), 1);
    assert_eq!(records[0].applied[0].op, ChangeKind::Create);
}

#[tokio::test]
async fn reapplying_the_same_intent_is_a_no_op() {
    let h = harness();
    let intent = IntentSpec::create("web", "nginx:1.25")
        .replicas(3)
        .label("tier", "frontend")
        .build()
        .unwrap();

    h.reconciler
        .reconcile(&intent, ReconcileOptions::default())
        .await
        .unwrap();
    let writes_after_first = h.cluster.writes().len();

    let preview = h.reconciler.preview(&intent).await.unwrap();
    assert!(preview.changeset.is_empty(), "{}", preview.changeset.summary());
    assert_eq!(preview.decision.verdict, Verdict::AutoApproved);

    let report = h
        .reconciler
        .reconcile(&intent, ReconcileOptions::default())
        .await
        .unwrap();
    assert_eq!(report.outcome(), Some(Outcome::Success));
    assert_eq!(h.cluster.writes().len(), writes_after_first);
}

#[tokio::test]
async fn scale_to_zero_needs_confirmation() {
    let h = harness();
    let create = IntentSpec::create("web", "nginx").replicas(3).build().unwrap();
    h.reconciler
        .reconcile(&create, ReconcileOptions::default())
        .await
        .unwrap();

    let scale = IntentSpec::scale("web", 0).build().unwrap();
    let report = h
        .reconciler
        .reconcile(&scale, ReconcileOptions::default())
        .await
        .unwrap();
    let last = report.last().unwrap();
    assert_eq!(last.outcome.outcome, Outcome::Rejected);
    assert_eq!(last.decision.verdict, Verdict::RequiresConfirmation);
    assert_eq!(h.cluster.manifest(&web()).unwrap().replicas(), Some(3));

    let report = h
        .reconciler
        .reconcile(
            &scale,
            ReconcileOptions {
                confirmed: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(report.outcome(), Some(Outcome::Success));
    assert_eq!(h.cluster.manifest(&web()).unwrap().replicas(), Some(0));

    let rejected = h
        .audit
        .query(&AuditFilter {
            outcome: Some(Outcome::Rejected),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].correlation_id, scale.id());
}

#[tokio::test]
async fn kube_system_is_denied_even_when_confirmed() {
    let h = harness();
    let intent = IntentSpec::create("dns", "coredns")
        .namespace("kube-system")
        .build()
        .unwrap();
    let report = h
        .reconciler
        .reconcile(
            &intent,
            ReconcileOptions {
                confirmed: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(report.outcome(), Some(Outcome::Rejected));
    assert_eq!(h.cluster.write_attempts(), 0);
}

#[tokio::test]
async fn rollout_in_progress_is_refreshed_until_stable() {
    let h = harness();
    let create = IntentSpec::create("web", "nginx").build().unwrap();
    h.reconciler
        .reconcile(&create, ReconcileOptions::default())
        .await
        .unwrap();

    // Another actor changed the deployment; the controller has not caught up
    // for the next two reads.
    assert!(h.cluster.begin_rollout(&web(), 2));

    let scale = IntentSpec::scale("web", 4).build().unwrap();
    let report = h
        .reconciler
        .reconcile(&scale, ReconcileOptions::default())
        .await
        .unwrap();

    let outcomes: Vec<Outcome> = report.attempts.iter().map(|a| a.outcome.outcome).collect();
    assert_eq!(
        outcomes,
        vec![Outcome::Rejected, Outcome::Rejected, Outcome::Success]
    );
    assert!(report.attempts[0].changeset.is_conflict());
    assert_eq!(h.cluster.manifest(&web()).unwrap().replicas(), Some(4));

    let records = h
        .audit
        .query(&AuditFilter {
            correlation_id: Some(scale.id()),
            ..Default::default()
        })
        .await
        .unwrap();
    let attempts: Vec<u32> = records.iter().map(|r| r.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
}

#[tokio::test]
async fn persistent_conflict_gives_up_after_refresh_budget() {
    let h = harness();
    let create = IntentSpec::create("web", "nginx").build().unwrap();
    h.reconciler
        .reconcile(&create, ReconcileOptions::default())
        .await
        .unwrap();
    assert!(h.cluster.begin_rollout(&web(), 100));

    let scale = IntentSpec::scale("web", 2).build().unwrap();
    let report = h
        .reconciler
        .reconcile(&scale, ReconcileOptions::default())
        .await
        .unwrap();
    // One initial attempt plus three refreshes.
    assert_eq!(report.attempts.len(), 4);
    assert_eq!(report.outcome(), Some(Outcome::Rejected));
    assert_eq!(h.cluster.manifest(&web()).unwrap().replicas(), Some(1));
}

#[tokio::test]
async fn stale_write_is_rolled_back_and_rediffed() {
    let h = harness();
    let create = IntentSpec::create("web", "nginx").replicas(2).build().unwrap();
    h.reconciler
        .reconcile(&create, ReconcileOptions::default())
        .await
        .unwrap();

    h.cluster.inject(Fault::on(
        ChangeKind::Update,
        ClassifiedError::Conflict("the object has been modified".into()),
    ));

    let scale = IntentSpec::scale("web", 5).build().unwrap();
    let report = h
        .reconciler
        .reconcile(&scale, ReconcileOptions::default())
        .await
        .unwrap();

    assert_eq!(report.attempts.len(), 2);
    assert_eq!(report.attempts[0].outcome.outcome, Outcome::RolledBack);
    assert!(report.attempts[0].outcome.conflict);
    assert_eq!(report.attempts[1].outcome.outcome, Outcome::Success);
    assert_eq!(h.cluster.manifest(&web()).unwrap().replicas(), Some(5));
}

#[tokio::test]
async fn compile_errors_never_reach_the_cluster() {
    let h = harness();
    let intent = IntentSpec::create("web", "nginx").build().unwrap();
    let reconciler = Reconciler::from_config(
        &fast_config(),
        h.cluster.clone(),
        h.cluster.clone(),
        h.audit.clone(),
    )
    .with_compiler(kintent_compiler::ManifestCompiler::only([
        kintent_core::Action::ScaleDeployment,
    ]));

    let err = reconciler
        .reconcile(&intent, ReconcileOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Compile(_)));
    assert_eq!(h.cluster.write_attempts(), 0);
    assert!(h.storage.is_empty());
}

#[tokio::test]
async fn scaling_a_missing_deployment_is_a_diff_error() {
    let h = harness();
    let scale = IntentSpec::scale("ghost", 2).build().unwrap();
    let err = h
        .reconciler
        .reconcile(&scale, ReconcileOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Diff(kintent_diff::DiffError::TargetMissing(_))
    ));
}

#[tokio::test]
async fn delete_then_delete_again_is_idempotent() {
    let h = harness();
    let create = IntentSpec::create("web", "nginx").build().unwrap();
    h.reconciler
        .reconcile(&create, ReconcileOptions::default())
        .await
        .unwrap();

    let delete = IntentSpec::delete("web").build().unwrap();
    let confirmed = ReconcileOptions {
        confirmed: true,
        ..Default::default()
    };
    let report = h.reconciler.reconcile(&delete, confirmed.clone()).await.unwrap();
    assert_eq!(report.outcome(), Some(Outcome::Success));
    assert!(h.cluster.manifest(&web()).is_none());

    let again = h.reconciler.reconcile(&delete, confirmed).await.unwrap();
    assert_eq!(again.outcome(), Some(Outcome::Success));
    assert!(again.last().unwrap().changeset.is_empty());
}

/// Three changes against three resources: create `a`, update `b`, delete `c`.
async fn mixed_change_set(cluster: &MemoryCluster) -> ChangeSet {
    let b = cluster.insert(Manifest::new(
        ResourceKind::Deployment,
        "default",
        "b",
        json!({"replicas": 2, "template": {"spec": {"containers": [
            {"name": "b", "image": "b:1"}
        ]}}}),
    ));
    let c = cluster.insert(Manifest::new(
        ResourceKind::Deployment,
        "default",
        "c",
        json!({"replicas": 1}),
    ));
    let b = cluster.get(&b.resource_ref()).await.unwrap().unwrap();
    let c = cluster.get(&c.resource_ref()).await.unwrap().unwrap();

    let intent = IntentSpec::create("a", "a:1").build().unwrap();
    ChangeSet::new(
        intent,
        Utc::now(),
        vec![
            Change::Delete {
                target: c.resource_ref(),
                expected_version: Some(c.resource_version.clone()),
                prior: Some(c.clone()),
            },
            Change::Update {
                target: b.resource_ref(),
                expected_version: Some(b.resource_version.clone()),
                prior: Some(b.clone()),
                patch: json!({"spec": {"replicas": 6, "template": {"spec": {"containers": [
                    {"name": "b", "image": "b:2"}
                ]}}}}),
                fields: vec![
                    FieldChange::new("spec.replicas", Some(json!(2)), json!(6)),
                    FieldChange::new(
                        "spec.template.spec.containers[name=b].image",
                        Some(json!("b:1")),
                        json!("b:2"),
                    ),
                ],
            },
            Change::Create {
                target: ResourceRef::deployment("default", "a"),
                manifest: Manifest::new(
                    ResourceKind::Deployment,
                    "default",
                    "a",
                    json!({"replicas": 1}),
                ),
            },
        ],
    )
}

fn approve(change_set: &ChangeSet) -> ApprovalDecision {
    let decision = ApprovalGate::default().evaluate(change_set);
    assert_eq!(decision.changeset_id, change_set.id);
    decision
}

#[tokio::test]
async fn failed_change_rolls_back_everything_applied() {
    let cluster = Arc::new(MemoryCluster::new());
    let audit = Arc::new(AuditLog::with_storage(Arc::new(MemoryStorage::new())));
    let executor = ReconcileExecutor::new(cluster.clone(), audit.clone(), fast_retry());

    let cs = mixed_change_set(&cluster).await;
    let before = cluster.dump();
    cluster.inject(Fault::on(
        ChangeKind::Delete,
        ClassifiedError::Fatal("forbidden".into()),
    ));

    let out = executor
        .execute(&cs, &approve(&cs), ExecuteOptions::confirmed())
        .await
        .unwrap();

    assert_eq!(out.outcome, Outcome::RolledBack);
    assert_eq!(out.applied.len(), 2);
    assert_eq!(out.failed.as_ref().map(|f| f.op), Some(ChangeKind::Delete));
    let undone: Vec<(ChangeKind, String)> = out
        .rolled_back
        .iter()
        .map(|r| (r.op, r.target.name.clone()))
        .collect();
    assert_eq!(
        undone,
        vec![
            (ChangeKind::Update, "b".to_string()),
            (ChangeKind::Delete, "a".to_string()),
        ]
    );

    // Compensation restores every body to its pre-execution state.
    assert_eq!(cluster.dump(), before);

    let records = audit.query(&AuditFilter::default()).await.unwrap();
    assert_eq!(records[0].outcome, Outcome::RolledBack);
    assert_eq!(records[0].rolled_back.len(), 2);
}

#[tokio::test]
async fn failed_compensation_is_partial_failure() {
    let cluster = Arc::new(MemoryCluster::new());
    let audit = Arc::new(AuditLog::with_storage(Arc::new(MemoryStorage::new())));
    let executor = ReconcileExecutor::new(cluster.clone(), audit, fast_retry());

    let cs = mixed_change_set(&cluster).await;
    // The delete of `c` fails, and so does the compensating delete of `a`.
    cluster.inject(Fault::on(ChangeKind::Delete, ClassifiedError::Fatal("forbidden".into())).times(2));

    let out = executor
        .execute(&cs, &approve(&cs), ExecuteOptions::confirmed())
        .await
        .unwrap();
    assert_eq!(out.outcome, Outcome::PartialFailure);
    assert!(out.rolled_back.iter().any(|r| !r.succeeded()));
    assert!(out.rolled_back.iter().any(|r| r.succeeded()));
    assert!(cluster.manifest(&ResourceRef::deployment("default", "a")).is_some());
}

#[tokio::test]
async fn later_changes_are_never_attempted_after_a_failure() {
    let cluster = Arc::new(MemoryCluster::new());
    let audit = Arc::new(AuditLog::with_storage(Arc::new(MemoryStorage::new())));
    let executor = ReconcileExecutor::new(cluster.clone(), audit, fast_retry());

    let cs = mixed_change_set(&cluster).await;
    cluster.inject(Fault::on(ChangeKind::Create, ClassifiedError::Fatal("invalid".into())));

    let out = executor
        .execute(&cs, &approve(&cs), ExecuteOptions::confirmed())
        .await
        .unwrap();
    assert_eq!(out.outcome, Outcome::RolledBack);
    assert!(out.applied.is_empty());
    assert_eq!(cluster.write_attempts(), 1);
}

#[tokio::test]
async fn failure_in_the_middle_rolls_back_earlier_changes_only() {
    let cluster = Arc::new(MemoryCluster::new());
    let audit = Arc::new(AuditLog::with_storage(Arc::new(MemoryStorage::new())));
    let executor = ReconcileExecutor::new(cluster.clone(), audit.clone(), fast_retry());

    let cs = mixed_change_set(&cluster).await;
    let before = cluster.dump();
    cluster.inject(Fault::on(
        ChangeKind::Update,
        ClassifiedError::Fatal("field is immutable".into()),
    ));

    let out = executor
        .execute(&cs, &approve(&cs), ExecuteOptions::confirmed())
        .await
        .unwrap();

    assert_ne!(out.outcome, Outcome::Success);
    assert_eq!(out.outcome, Outcome::RolledBack);
    assert_eq!(out.failed.as_ref().map(|f| f.op), Some(ChangeKind::Update));
    assert_eq!(out.applied.len(), 1);
    assert_eq!(out.rolled_back.len(), 1);
    assert_eq!(out.rolled_back[0].target.name, "a");

    // Create `a`, failed update of `b`, compensating delete of `a`.
    assert_eq!(cluster.write_attempts(), 3);
    assert!(cluster.manifest(&ResourceRef::deployment("default", "a")).is_none());
    assert!(cluster.manifest(&ResourceRef::deployment("default", "c")).is_some());
    assert!(
        cluster
            .writes()
            .iter()
            .all(|w| w.target().name != "c")
    );
    assert_eq!(cluster.dump(), before);

    let records = audit.query(&AuditFilter::default()).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, Outcome::RolledBack);
}

/// Reader that fails a number of reads before delegating to the cluster.
struct FlakyReader {
    inner: Arc<MemoryCluster>,
    failures: AtomicU32,
    error: ClassifiedError,
}

impl FlakyReader {
    fn new(inner: Arc<MemoryCluster>, failures: u32, error: ClassifiedError) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
            error,
        }
    }
}

#[async_trait]
impl ClusterReader for FlakyReader {
    async fn get(&self, target: &ResourceRef) -> Result<Option<ObservedResource>, ClassifiedError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(self.error.clone());
        }
        self.inner.get(target).await
    }
}

#[tokio::test]
async fn unreadable_cluster_is_audited_before_failing() {
    let h = harness();
    let config = fast_config();
    let reader = Arc::new(FlakyReader::new(
        h.cluster.clone(),
        u32::MAX,
        ClassifiedError::Retryable("connection refused".into()),
    ));
    let reconciler = Reconciler::from_config(&config, reader, h.cluster.clone(), h.audit.clone());
    let intent = IntentSpec::create("web", "nginx").build().unwrap();

    let err = reconciler
        .reconcile(&intent, ReconcileOptions::default())
        .await
        .unwrap_err();

    match err {
        ReconcileError::ClusterRead {
            source,
            attempts,
            audit_sequence,
            report,
            ..
        } => {
            assert_eq!(source, ClassifiedError::Retryable("connection refused".into()));
            assert_eq!(attempts, config.reconcile.max_retries + 1);
            assert_eq!(audit_sequence, 0);
            assert!(report.attempts.is_empty());
        }
        other => panic!("expected cluster read error, got {other:?}"),
    }
    assert_eq!(h.cluster.write_attempts(), 0);

    let records = h.audit.query(&AuditFilter::default()).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, Outcome::Rejected);
    assert_eq!(records[0].correlation_id, intent.id());
    assert_eq!(records[0].attempt, 1);
    assert!(records[0].detail.contains("connection refused"), "{}", records[0].detail);
}

#[tokio::test]
async fn transient_read_failures_are_retried() {
    let h = harness();
    let reader = Arc::new(FlakyReader::new(
        h.cluster.clone(),
        2,
        ClassifiedError::Retryable("etcdserver: request timed out".into()),
    ));
    let reconciler =
        Reconciler::from_config(&fast_config(), reader, h.cluster.clone(), h.audit.clone());
    let intent = IntentSpec::create("web", "nginx").build().unwrap();

    let report = reconciler
        .reconcile(&intent, ReconcileOptions::default())
        .await
        .unwrap();
    assert_eq!(report.outcome(), Some(Outcome::Success));
    assert!(h.cluster.manifest(&web()).is_some());
}

#[tokio::test]
async fn fatal_read_failure_is_not_retried() {
    let h = harness();
    let reader = Arc::new(FlakyReader::new(
        h.cluster.clone(),
        1,
        ClassifiedError::Fatal("deployments.apps is forbidden".into()),
    ));
    let reconciler =
        Reconciler::from_config(&fast_config(), reader, h.cluster.clone(), h.audit.clone());
    let intent = IntentSpec::create("web", "nginx").build().unwrap();

    let err = reconciler
        .reconcile(&intent, ReconcileOptions::default())
        .await
        .unwrap_err();
    assert!(
        matches!(err, ReconcileError::ClusterRead { attempts: 1, .. }),
        "{err:?}"
    );
    assert_eq!(h.storage.len(), 1);
}

#[tokio::test]
async fn audit_failure_is_reported_after_a_successful_mutation() {
    let h = harness();
    h.storage.set_fail_writes(true);

    let intent = IntentSpec::create("web", "nginx").build().unwrap();
    let err = h
        .reconciler
        .reconcile(&intent, ReconcileOptions::default())
        .await
        .unwrap_err();

    match err {
        ReconcileError::Execute(ExecuteError::AuditWrite { outcome, .. }) => {
            assert_eq!(outcome.outcome, Outcome::Success);
        }
        other => panic!("expected audit write error, got {other:?}"),
    }
    assert!(h.cluster.manifest(&web()).is_some());
}

#[tokio::test]
async fn deadline_stops_retries_and_rolls_back() {
    let h = harness();
    h.cluster.inject(
        Fault::on(ChangeKind::Create, ClassifiedError::Retryable("unavailable".into())).always(),
    );
    let mut config = fast_config();
    config.reconcile.initial_backoff_ms = 10_000;
    config.reconcile.max_backoff_ms = 10_000;
    let reconciler = Reconciler::from_config(
        &config,
        h.cluster.clone(),
        h.cluster.clone(),
        h.audit.clone(),
    );

    let intent = IntentSpec::create("web", "nginx").build().unwrap();
    let report = tokio::time::timeout(
        Duration::from_secs(5),
        reconciler.reconcile(
            &intent,
            ReconcileOptions {
                timeout: Some(Duration::from_millis(30)),
                ..Default::default()
            },
        ),
    )
    .await
    .expect("deadline must cut the backoff short")
    .unwrap();

    let last = report.last().unwrap();
    assert_eq!(last.outcome.outcome, Outcome::RolledBack);
    assert!(last.outcome.detail.contains("deadline exceeded"));
    assert_eq!(h.cluster.write_attempts(), 1);
}

#[tokio::test]
async fn audit_history_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let cluster = Arc::new(MemoryCluster::new());

    {
        let audit = Arc::new(AuditLog::with_storage(Arc::new(
            FileStorage::open(&path, true).unwrap(),
        )));
        let reconciler =
            Reconciler::from_config(&fast_config(), cluster.clone(), cluster.clone(), audit);
        let intent = IntentSpec::create("web", "nginx").build().unwrap();
        reconciler
            .reconcile(&intent, ReconcileOptions::default())
            .await
            .unwrap();
    }

    let audit = Arc::new(AuditLog::with_storage(Arc::new(
        FileStorage::open(&path, true).unwrap(),
    )));
    let reconciler =
        Reconciler::from_config(&fast_config(), cluster.clone(), cluster.clone(), audit.clone());
    let scale = IntentSpec::scale("web", 2).build().unwrap();
    reconciler
        .reconcile(&scale, ReconcileOptions::default())
        .await
        .unwrap();

    let records = audit.query(&AuditFilter::default()).await.unwrap();
    let sequences: Vec<u64> = records.iter().map(|r| r.sequence).collect();
    assert_eq!(sequences, vec![0, 1]);
}

#[tokio::test]
async fn plan_uses_snapshot_versions_as_preconditions() {
    let cluster = Arc::new(MemoryCluster::new());
    let observed = cluster.insert(Manifest::new(
        ResourceKind::Deployment,
        "default",
        "web",
        json!({"replicas": 1}),
    ));
    let engine = DiffEngine::new(cluster.clone());
    let intent = IntentSpec::scale("web", 3).build().unwrap();
    let set = kintent_compiler::compile(&intent).unwrap();
    let cs = engine.plan(&set).await.unwrap();
    assert_eq!(cs.changes[0].expected_version(), Some(observed.resource_version.as_str()));
}
