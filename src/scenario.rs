//! Fixture lifecycle driver
//!
//! Runs one scenario end to end: provision the graph, hand the
//! materialized fixture to the caller's validation, then tear everything
//! down. Teardown is attempted even after a terminal failure, because a
//! partial fixture left behind is worse than a failed run.

use crate::descriptor::ResourceDescriptor;
use crate::ensure::CreateRetryPolicy;
use crate::fault::FaultKind;
use crate::poll::PollPolicySet;
use crate::provision::{ProvisionError, ProvisionReport, Provisioner};
use crate::teardown::{HoldRetryPolicy, Teardown, TeardownError};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// One fixture scenario: a named, acyclic descriptor graph.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub descriptors: Vec<ResourceDescriptor>,
}

impl Scenario {
    pub fn new(name: &str, descriptors: Vec<ResourceDescriptor>) -> Self {
        Scenario {
            name: name.to_string(),
            descriptors,
        }
    }
}

/// Exactly one of these per scenario run; never a silent partial state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioOutcome {
    Passed,
    /// Environment limitation (quota), not a code defect
    Skipped { reason: String },
    /// Terminal fault or validation failure
    Failed { reason: String },
}

/// Full record of one scenario run.
#[derive(Debug)]
pub struct ScenarioReport {
    /// Scenario-scoped run id, tagged on every log line
    pub run_id: Uuid,
    pub scenario: String,
    pub outcome: ScenarioOutcome,
    pub provision: ProvisionReport,
    /// Delete failures that survived retrying; resources named here are
    /// still live remotely and need manual attention
    pub teardown_errors: Vec<TeardownError>,
}

/// Per-scenario controller: Provisioner → validation → Teardown.
pub struct ScenarioRunner<'a, C> {
    client: &'a C,
    policies: &'a PollPolicySet,
    create_retry: CreateRetryPolicy,
    hold_retry: HoldRetryPolicy,
    cancel: Option<&'a CancellationToken>,
}

impl<'a, C: crate::client::ResourceClient> ScenarioRunner<'a, C> {
    pub fn new(client: &'a C, policies: &'a PollPolicySet) -> Self {
        ScenarioRunner {
            client,
            policies,
            create_retry: CreateRetryPolicy::default(),
            hold_retry: HoldRetryPolicy::default(),
            cancel: None,
        }
    }

    pub fn with_create_retry(mut self, retry: CreateRetryPolicy) -> Self {
        self.create_retry = retry;
        self
    }

    pub fn with_hold_retry(mut self, policy: HoldRetryPolicy) -> Self {
        self.hold_retry = policy;
        self
    }

    pub fn with_cancellation(mut self, cancel: &'a CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Run the scenario. `validate` receives the provisioning report once
    /// every resource is available; its error fails the scenario.
    pub async fn run<F, Fut>(&self, scenario: &Scenario, validate: F) -> ScenarioReport
    where
        F: FnOnce(ProvisionReport) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let run_id = Uuid::new_v4();
        info!(scenario = %scenario.name, %run_id, "Starting scenario");

        let mut provisioner = Provisioner::new(self.client, self.policies)
            .with_create_retry(self.create_retry.clone());
        if let Some(cancel) = self.cancel {
            provisioner = provisioner.with_cancellation(cancel);
        }

        let (provision, outcome) = match provisioner.provision(&scenario.descriptors).await {
            Ok(report) => {
                if report.has_quota_skips() {
                    let skipped: Vec<&str> = report
                        .nodes
                        .iter()
                        .filter(|n| matches!(n.status, crate::provision::NodeStatus::Skipped(_)))
                        .map(|n| n.name.as_str())
                        .collect();
                    info!(scenario = %scenario.name, ?skipped, "Scenario skipped on quota");
                    let reason = format!("quota exhausted, not provisioned: {}", skipped.join(", "));
                    (report, ScenarioOutcome::Skipped { reason })
                } else {
                    match validate(report.clone()).await {
                        Ok(()) => (report, ScenarioOutcome::Passed),
                        Err(e) => {
                            error!(scenario = %scenario.name, error = ?e, "Validation failed");
                            (
                                report,
                                ScenarioOutcome::Failed {
                                    reason: format!("validation failed: {e:#}"),
                                },
                            )
                        }
                    }
                }
            }
            Err(e) => {
                let report = e.report().cloned().unwrap_or_default();
                let reason = match &e {
                    ProvisionError::Fault { fault, .. }
                        if fault.kind == FaultKind::CallerCancelled =>
                    {
                        format!("cancelled: {e}")
                    }
                    _ => format!("provisioning failed: {e}"),
                };
                error!(scenario = %scenario.name, error = %e, "Provisioning failed");
                (report, ScenarioOutcome::Failed { reason })
            }
        };

        // Teardown runs regardless of outcome; deleting a resource that
        // never existed comes back NotFound and is absorbed.
        let mut teardown = Teardown::new(self.client).with_hold_retry(self.hold_retry.clone());
        if let Some(cancel) = self.cancel {
            teardown = teardown.with_cancellation(cancel);
        }
        let teardown_errors = teardown.teardown(&scenario.descriptors).await;
        if !teardown_errors.is_empty() {
            warn!(
                scenario = %scenario.name,
                stranded = teardown_errors.len(),
                "Scenario left resources behind"
            );
        }

        info!(scenario = %scenario.name, %run_id, outcome = ?outcome, "Scenario finished");
        ScenarioReport {
            run_id,
            scenario: scenario.name.clone(),
            outcome,
            provision,
            teardown_errors,
        }
    }
}
