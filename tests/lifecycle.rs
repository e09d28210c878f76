//! End-to-end lifecycle tests against the in-memory fake provider.
//!
//! These drive the real provisioner, poller, and teardown walker over a
//! four-node network → subnet → interface → instance graph and assert
//! on the exact remote calls the fake records.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use fixture_rig::poll::await_available;
use fixture_rig::provision::{NodeReport, SkipReason};
use fixture_rig::testing::{FakeCloud, Op};
use fixture_rig::{
    CreateRetryPolicy, FaultKind, HoldRetryPolicy, NodeStatus, PollPolicy, PollPolicySet,
    ProvisionError, Provisioner, RemoteError, ResourceDescriptor, ResourceState, Scenario,
    ScenarioOutcome, ScenarioRunner, Scope, Teardown,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Log output shows up under `--nocapture` with `RUST_LOG` set.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn scope() -> Scope {
    Scope::new("acct-1", "fixtures")
}

fn fast_policy() -> PollPolicy {
    PollPolicy {
        max_attempts: 10,
        interval: Duration::from_millis(2),
        max_not_found_attempts: Some(4),
        has_status_field: true,
    }
}

fn policies() -> PollPolicySet {
    PollPolicySet::new()
        .with("network", fast_policy())
        .with("subnet", fast_policy())
        .with("interface", fast_policy())
        .with("instance", fast_policy())
        .with("disk", fast_policy())
}

fn fast_create_retry() -> CreateRetryPolicy {
    CreateRetryPolicy {
        max_retries: 3,
        min_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        operation_deadline: Duration::from_secs(1),
    }
}

fn fast_hold_retry() -> HoldRetryPolicy {
    HoldRetryPolicy {
        max_attempts: 3,
        delay: Duration::from_millis(1),
        operation_deadline: Duration::from_secs(1),
    }
}

/// The canonical four-node chain, written deliberately out of
/// dependency order.
fn chain() -> Vec<ResourceDescriptor> {
    vec![
        ResourceDescriptor::new("instance", "inst-1", scope(), json!({"size": "small"}))
            .depends_on("iface-1"),
        ResourceDescriptor::new("network", "net-1", scope(), json!({"cidr": "10.0.0.0/16"})),
        ResourceDescriptor::new("interface", "iface-1", scope(), json!({}))
            .depends_on("subnet-1"),
        ResourceDescriptor::new("subnet", "subnet-1", scope(), json!({"cidr": "10.0.1.0/24"}))
            .depends_on("net-1"),
    ]
}

fn status_of<'a>(nodes: &'a [NodeReport], name: &str) -> &'a NodeStatus {
    &nodes.iter().find(|n| n.name == name).unwrap().status
}

#[tokio::test]
async fn provisions_chain_in_dependency_order() {
    init_logging();
    let cloud = FakeCloud::new();
    let policies = policies();
    let provisioner = Provisioner::new(&cloud, &policies).with_create_retry(fast_create_retry());

    let report = provisioner.provision(&chain()).await.unwrap();

    assert_eq!(cloud.creates(), vec!["net-1", "subnet-1", "iface-1", "inst-1"]);
    for name in ["net-1", "subnet-1", "iface-1", "inst-1"] {
        assert_eq!(report.status_of(name), Some(&NodeStatus::Provisioned), "{name}");
        assert!(cloud.exists(name), "{name}");
    }
}

#[tokio::test]
async fn second_run_probes_instead_of_creating() {
    init_logging();
    let cloud = FakeCloud::new();
    let policies = policies();
    let provisioner = Provisioner::new(&cloud, &policies).with_create_retry(fast_create_retry());

    provisioner.provision(&chain()).await.unwrap();
    cloud.clear_calls();

    let report = provisioner.provision(&chain()).await.unwrap();

    // One existence probe per node and nothing else.
    assert_eq!(cloud.creates(), Vec::<String>::new());
    assert_eq!(cloud.gets(), vec!["net-1", "subnet-1", "iface-1", "inst-1"]);
    for name in ["net-1", "subnet-1", "iface-1", "inst-1"] {
        assert_eq!(report.status_of(name), Some(&NodeStatus::AlreadyExisted), "{name}");
    }
}

#[tokio::test]
async fn teardown_deletes_in_reverse_creation_order() {
    init_logging();
    let cloud = FakeCloud::new();
    let policies = policies();
    let descriptors = chain();
    Provisioner::new(&cloud, &policies)
        .with_create_retry(fast_create_retry())
        .provision(&descriptors)
        .await
        .unwrap();
    cloud.clear_calls();

    let errors = Teardown::new(&cloud)
        .with_hold_retry(fast_hold_retry())
        .teardown(&descriptors)
        .await;

    assert!(errors.is_empty());
    assert_eq!(cloud.deletes(), vec!["inst-1", "iface-1", "subnet-1", "net-1"]);
    for name in ["net-1", "subnet-1", "iface-1", "inst-1"] {
        assert!(!cloud.exists(name), "{name}");
    }
}

#[tokio::test]
async fn teardown_of_absent_fixture_is_clean() {
    init_logging();
    let cloud = FakeCloud::new();
    let errors = Teardown::new(&cloud)
        .with_hold_retry(fast_hold_retry())
        .teardown(&chain())
        .await;
    assert!(errors.is_empty());
    assert_eq!(cloud.deletes().len(), 4);
}

#[tokio::test]
async fn quota_skip_isolates_the_dependent_branch() {
    init_logging();
    let cloud = FakeCloud::new();
    cloud.fail_next(
        Op::Create,
        "subnet-1",
        RemoteError::api(429, "QuotaExceeded", "subnet quota exhausted"),
    );
    let descriptors = vec![
        ResourceDescriptor::new("network", "net-1", scope(), json!({})),
        ResourceDescriptor::new("subnet", "subnet-1", scope(), json!({})).depends_on("net-1"),
        ResourceDescriptor::new("interface", "iface-1", scope(), json!({}))
            .depends_on("subnet-1"),
        ResourceDescriptor::new("disk", "disk-1", scope(), json!({})),
    ];
    let policies = policies();
    let report = Provisioner::new(&cloud, &policies)
        .with_create_retry(fast_create_retry())
        .provision(&descriptors)
        .await
        .unwrap();

    assert_eq!(
        status_of(&report.nodes, "subnet-1"),
        &NodeStatus::Skipped(SkipReason::QuotaExceeded)
    );
    assert_eq!(
        status_of(&report.nodes, "iface-1"),
        &NodeStatus::Skipped(SkipReason::DependencySkipped)
    );
    // The independent branch still provisions.
    assert_eq!(status_of(&report.nodes, "net-1"), &NodeStatus::Provisioned);
    assert_eq!(status_of(&report.nodes, "disk-1"), &NodeStatus::Provisioned);
    // No creation call was ever issued for the skipped dependent.
    assert!(!cloud.creates().contains(&"iface-1".to_string()));
}

#[tokio::test]
async fn quota_skip_reports_scenario_skipped_without_validation() {
    init_logging();
    let cloud = FakeCloud::new();
    cloud.fail_next(
        Op::Create,
        "net-1",
        RemoteError::api(429, "QuotaExceeded", "network quota exhausted"),
    );
    let policies = policies();
    let runner = ScenarioRunner::new(&cloud, &policies)
        .with_create_retry(fast_create_retry())
        .with_hold_retry(fast_hold_retry());
    let scenario = Scenario::new("quota", chain());

    let validated = AtomicBool::new(false);
    let flag = &validated;
    let report = runner
        .run(&scenario, |_| async move {
            flag.store(true, Ordering::SeqCst);
            anyhow::Ok(())
        })
        .await;

    assert!(matches!(report.outcome, ScenarioOutcome::Skipped { .. }));
    assert!(!validated.load(Ordering::SeqCst));
    assert!(report.teardown_errors.is_empty());
}

#[tokio::test]
async fn terminal_fault_fails_fast_and_teardown_still_runs() {
    init_logging();
    let cloud = FakeCloud::new();
    cloud.fail_next(
        Op::Create,
        "iface-1",
        RemoteError::api(500, "InternalServerError", "provider fell over"),
    );
    let policies = policies();
    let runner = ScenarioRunner::new(&cloud, &policies)
        .with_create_retry(fast_create_retry())
        .with_hold_retry(fast_hold_retry());
    let scenario = Scenario::new("fail-fast", chain());

    let report = runner.run(&scenario, |_| async { anyhow::Ok(()) }).await;

    assert!(matches!(report.outcome, ScenarioOutcome::Failed { .. }));
    assert_eq!(status_of(&report.provision.nodes, "iface-1"), &NodeStatus::Failed);
    assert_eq!(
        status_of(&report.provision.nodes, "inst-1"),
        &NodeStatus::NotAttempted
    );
    // No creation call past the failure point.
    assert!(!cloud.creates().contains(&"inst-1".to_string()));
    // Teardown walked the full graph in reverse anyway; deletes of
    // never-created resources come back NotFound and are absorbed.
    assert_eq!(cloud.deletes(), vec!["inst-1", "iface-1", "subnet-1", "net-1"]);
    assert!(report.teardown_errors.is_empty());
    assert!(!cloud.exists("net-1"));
}

#[tokio::test]
async fn validation_error_fails_scenario_but_still_tears_down() {
    init_logging();
    let cloud = FakeCloud::new();
    let policies = policies();
    let runner = ScenarioRunner::new(&cloud, &policies)
        .with_create_retry(fast_create_retry())
        .with_hold_retry(fast_hold_retry());
    let scenario = Scenario::new("validation", chain());

    let report = runner
        .run(&scenario, |_| async { anyhow::bail!("discovered item mismatch") })
        .await;

    assert!(matches!(report.outcome, ScenarioOutcome::Failed { .. }));
    assert!(report.teardown_errors.is_empty());
    assert!(!cloud.exists("inst-1"));
}

#[tokio::test]
async fn passing_scenario_validates_the_materialized_fixture() {
    init_logging();
    let cloud = FakeCloud::new();
    let policies = policies();
    let runner = ScenarioRunner::new(&cloud, &policies)
        .with_create_retry(fast_create_retry())
        .with_hold_retry(fast_hold_retry());
    let scenario = Scenario::new("happy-path", chain());

    let validated = AtomicBool::new(false);
    let flag = &validated;
    let report = runner
        .run(&scenario, |provision| async move {
            assert_eq!(provision.materialized().len(), 4);
            flag.store(true, Ordering::SeqCst);
            anyhow::Ok(())
        })
        .await;

    assert_eq!(report.outcome, ScenarioOutcome::Passed);
    assert!(validated.load(Ordering::SeqCst));
    assert!(report.teardown_errors.is_empty());
    assert!(!cloud.exists("net-1"));
}

#[tokio::test]
async fn propagation_lag_is_polled_through() {
    init_logging();
    let cloud = FakeCloud::new();
    cloud.set_propagation_lag("net-1", 2);
    let descriptors = vec![ResourceDescriptor::new("network", "net-1", scope(), json!({}))];
    let policies = policies();

    let report = Provisioner::new(&cloud, &policies)
        .with_create_retry(fast_create_retry())
        .provision(&descriptors)
        .await
        .unwrap();

    assert_eq!(report.status_of("net-1"), Some(&NodeStatus::Provisioned));
    // Probe, two invisible polls, one visible poll.
    assert_eq!(cloud.gets().len(), 4);
}

#[tokio::test]
async fn never_visible_resource_is_terminal() {
    init_logging();
    let cloud = FakeCloud::new();
    cloud.set_propagation_lag("net-1", 100);
    let descriptors = vec![ResourceDescriptor::new("network", "net-1", scope(), json!({}))];
    let policies = policies();

    let err = Provisioner::new(&cloud, &policies)
        .with_create_retry(fast_create_retry())
        .provision(&descriptors)
        .await
        .unwrap_err();

    match err {
        ProvisionError::Fault { name, fault, .. } => {
            assert_eq!(name, "net-1");
            assert_eq!(fault.kind, FaultKind::Terminal);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn poll_budget_exhaustion_is_terminal_for_status_kinds() {
    init_logging();
    let cloud = FakeCloud::new();
    cloud.set_settle_reads("db-1", 100);
    let descriptors = vec![ResourceDescriptor::new("database", "db-1", scope(), json!({}))];
    let policies = PollPolicySet::new().with(
        "database",
        PollPolicy {
            max_attempts: 3,
            interval: Duration::from_millis(1),
            max_not_found_attempts: Some(3),
            has_status_field: true,
        },
    );

    let err = Provisioner::new(&cloud, &policies)
        .with_create_retry(fast_create_retry())
        .provision(&descriptors)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProvisionError::Fault { ref fault, .. } if fault.kind == FaultKind::Terminal
    ));
}

#[tokio::test]
async fn poll_budget_exhaustion_is_soft_success_for_statusless_kinds() {
    init_logging();
    let cloud = FakeCloud::new();
    // The provider keeps reporting Creating, but the policy says this
    // kind has no trustworthy status field.
    cloud.set_settle_reads("tag-1", 100);
    let descriptors = vec![ResourceDescriptor::new("tag", "tag-1", scope(), json!({}))];
    let policies = PollPolicySet::new().with(
        "tag",
        PollPolicy {
            max_attempts: 3,
            interval: Duration::from_millis(1),
            max_not_found_attempts: Some(3),
            has_status_field: false,
        },
    );

    let report = Provisioner::new(&cloud, &policies)
        .with_create_retry(fast_create_retry())
        .provision(&descriptors)
        .await
        .unwrap();
    assert_eq!(report.status_of("tag-1"), Some(&NodeStatus::Provisioned));
}

#[tokio::test]
async fn failed_provisioning_state_is_terminal_immediately() {
    init_logging();
    let cloud = FakeCloud::new();
    cloud.insert_existing("db-1", json!({}), ResourceState::Failed);
    let descriptor = ResourceDescriptor::new("database", "db-1", scope(), json!({}));

    let fault = await_available(&cloud, &descriptor, &fast_policy(), None)
        .await
        .unwrap_err();
    assert_eq!(fault.kind, FaultKind::Terminal);
    // No second read after the Failed observation.
    assert_eq!(cloud.gets().len(), 1);
}

#[tokio::test]
async fn hold_on_create_is_retried_until_it_clears() {
    init_logging();
    let cloud = FakeCloud::new();
    cloud.fail_next(
        Op::Create,
        "net-1",
        RemoteError::api(409, "AnotherOperationInProgress", "scope busy"),
    );
    let descriptors = vec![ResourceDescriptor::new("network", "net-1", scope(), json!({}))];
    let policies = policies();

    let report = Provisioner::new(&cloud, &policies)
        .with_create_retry(fast_create_retry())
        .provision(&descriptors)
        .await
        .unwrap();

    assert_eq!(report.status_of("net-1"), Some(&NodeStatus::Provisioned));
    assert_eq!(cloud.creates().len(), 2);
}

#[tokio::test]
async fn hold_on_probe_is_absorbed() {
    init_logging();
    let cloud = FakeCloud::new();
    cloud.fail_next(
        Op::Get,
        "net-1",
        RemoteError::api(409, "AnotherOperationInProgress", "scope busy"),
    );
    let descriptors = vec![ResourceDescriptor::new("network", "net-1", scope(), json!({}))];
    let policies = policies();

    let report = Provisioner::new(&cloud, &policies)
        .with_create_retry(fast_create_retry())
        .provision(&descriptors)
        .await
        .unwrap();

    // One transient hold on the existence read does not fail the node.
    assert_eq!(report.status_of("net-1"), Some(&NodeStatus::Provisioned));
    assert_eq!(cloud.creates(), vec!["net-1"]);
}

#[tokio::test]
async fn quota_on_probe_skips_the_node() {
    init_logging();
    let cloud = FakeCloud::new();
    cloud.fail_next(
        Op::Get,
        "net-1",
        RemoteError::api(429, "QuotaExceeded", "read quota exhausted"),
    );
    let descriptors = vec![
        ResourceDescriptor::new("network", "net-1", scope(), json!({})),
        ResourceDescriptor::new("subnet", "subnet-1", scope(), json!({})).depends_on("net-1"),
    ];
    let policies = policies();

    let report = Provisioner::new(&cloud, &policies)
        .with_create_retry(fast_create_retry())
        .provision(&descriptors)
        .await
        .unwrap();

    assert_eq!(
        report.status_of("net-1"),
        Some(&NodeStatus::Skipped(SkipReason::QuotaExceeded))
    );
    assert_eq!(
        report.status_of("subnet-1"),
        Some(&NodeStatus::Skipped(SkipReason::DependencySkipped))
    );
    assert!(cloud.creates().is_empty());
}

#[tokio::test]
async fn cancellation_mid_backoff_aborts_promptly() {
    init_logging();
    let cloud = FakeCloud::new();
    for _ in 0..5 {
        cloud.fail_next(
            Op::Create,
            "net-1",
            RemoteError::api(409, "ResourceReserved", "held"),
        );
    }
    let retry = CreateRetryPolicy {
        max_retries: 5,
        min_delay: Duration::from_millis(500),
        max_delay: Duration::from_millis(500),
        operation_deadline: Duration::from_secs(1),
    };
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });
    let descriptors = vec![ResourceDescriptor::new("network", "net-1", scope(), json!({}))];
    let policies = policies();

    let started = std::time::Instant::now();
    let err = Provisioner::new(&cloud, &policies)
        .with_create_retry(retry)
        .with_cancellation(&token)
        .provision(&descriptors)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::Fault { ref fault, .. } if fault.kind == FaultKind::CallerCancelled
    ));
    // Cancellation must interrupt the backoff sleep, not wait it out.
    assert!(
        started.elapsed() < Duration::from_millis(300),
        "took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn exhausted_poll_does_not_sleep_after_the_last_read() {
    init_logging();
    let cloud = FakeCloud::new();
    cloud.set_settle_reads("db-1", 100);
    let descriptors = vec![ResourceDescriptor::new("database", "db-1", scope(), json!({}))];
    let policies = PollPolicySet::new().with(
        "database",
        PollPolicy {
            max_attempts: 2,
            interval: Duration::from_millis(100),
            max_not_found_attempts: Some(2),
            has_status_field: true,
        },
    );

    let started = std::time::Instant::now();
    let err = Provisioner::new(&cloud, &policies)
        .with_create_retry(fast_create_retry())
        .provision(&descriptors)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::Fault { ref fault, .. } if fault.kind == FaultKind::Terminal
    ));
    // Two reads with one interval between them, no sleep after the last.
    assert!(
        started.elapsed() < Duration::from_millis(180),
        "took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn create_retries_are_bounded_by_max_retries() {
    init_logging();
    let cloud = FakeCloud::new();
    for _ in 0..4 {
        cloud.fail_next(
            Op::Create,
            "net-1",
            RemoteError::api(409, "ResourceReserved", "held"),
        );
    }
    let retry = CreateRetryPolicy {
        max_retries: 2,
        min_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        operation_deadline: Duration::from_secs(1),
    };
    let descriptors = vec![ResourceDescriptor::new("network", "net-1", scope(), json!({}))];
    let policies = policies();

    let err = Provisioner::new(&cloud, &policies)
        .with_create_retry(retry)
        .provision(&descriptors)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::Fault { ref fault, .. } if fault.kind == FaultKind::Hold
    ));
    // Initial call plus exactly max_retries further attempts.
    assert_eq!(cloud.creates().len(), 3);
}

#[tokio::test]
async fn hold_on_delete_is_retried_until_it_clears() {
    init_logging();
    let cloud = FakeCloud::new();
    cloud.insert_existing("nic-1", json!({}), ResourceState::Succeeded);
    for _ in 0..2 {
        cloud.fail_next(
            Op::Delete,
            "nic-1",
            RemoteError::api(409, "NicReservedForAnotherVm", "still attached"),
        );
    }
    let descriptors = vec![ResourceDescriptor::new("interface", "nic-1", scope(), json!({}))];

    let errors = Teardown::new(&cloud)
        .with_hold_retry(fast_hold_retry())
        .teardown(&descriptors)
        .await;

    assert!(errors.is_empty());
    assert_eq!(cloud.deletes().len(), 3);
    assert!(!cloud.exists("nic-1"));
}

#[tokio::test]
async fn exhausted_hold_on_delete_is_reported() {
    init_logging();
    let cloud = FakeCloud::new();
    cloud.insert_existing("nic-1", json!({}), ResourceState::Succeeded);
    for _ in 0..3 {
        cloud.fail_next(
            Op::Delete,
            "nic-1",
            RemoteError::api(409, "NicReservedForAnotherVm", "still attached"),
        );
    }
    let descriptors = vec![ResourceDescriptor::new("interface", "nic-1", scope(), json!({}))];

    let errors = Teardown::new(&cloud)
        .with_hold_retry(fast_hold_retry())
        .teardown(&descriptors)
        .await;

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].name, "nic-1");
    assert!(cloud.exists("nic-1"));
}

#[tokio::test]
async fn conflicting_create_is_resolved_by_reprobe() {
    init_logging();
    let cloud = FakeCloud::new();
    // A concurrent run created the resource between our probe and our
    // create: the probe misses, the create conflicts, the re-probe finds it.
    cloud.insert_existing("net-1", json!({}), ResourceState::Succeeded);
    cloud.fail_next(
        Op::Get,
        "net-1",
        RemoteError::api(404, "ResourceNotFound", "not replicated yet"),
    );
    cloud.fail_next(
        Op::Create,
        "net-1",
        RemoteError::api(409, "Conflict", "name already taken"),
    );
    let descriptors = vec![ResourceDescriptor::new("network", "net-1", scope(), json!({}))];
    let policies = policies();

    let report = Provisioner::new(&cloud, &policies)
        .with_create_retry(fast_create_retry())
        .provision(&descriptors)
        .await
        .unwrap();

    assert_eq!(report.status_of("net-1"), Some(&NodeStatus::AlreadyExisted));
}

#[tokio::test]
async fn cancelled_token_stops_provisioning_before_remote_calls() {
    init_logging();
    let cloud = FakeCloud::new();
    let token = CancellationToken::new();
    token.cancel();
    let policies = policies();

    let err = Provisioner::new(&cloud, &policies)
        .with_create_retry(fast_create_retry())
        .with_cancellation(&token)
        .provision(&chain())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::Fault { ref fault, .. } if fault.kind == FaultKind::CallerCancelled
    ));
    assert!(cloud.calls().is_empty());
}

#[tokio::test]
async fn cancelled_token_stops_teardown_without_further_deletes() {
    init_logging();
    let cloud = FakeCloud::new();
    cloud.insert_existing("net-1", json!({}), ResourceState::Succeeded);
    let token = CancellationToken::new();
    token.cancel();

    let errors = Teardown::new(&cloud)
        .with_hold_retry(fast_hold_retry())
        .with_cancellation(&token)
        .teardown(&chain())
        .await;

    assert_eq!(errors.len(), 1);
    assert!(errors[0].fault.is_cancelled());
    assert!(cloud.deletes().is_empty());
    assert!(cloud.exists("net-1"));
}

#[tokio::test]
async fn missing_poll_policy_is_rejected_before_any_remote_call() {
    init_logging();
    let cloud = FakeCloud::new();
    let policies = PollPolicySet::new().with("network", fast_policy());
    let err = Provisioner::new(&cloud, &policies)
        .provision(&chain())
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::MissingPolicy(_)));
    assert!(cloud.calls().is_empty());
}
