//! Dependency-ordered provisioning
//!
//! Walks the descriptor graph in topological order, ensuring each
//! resource exists and is available before anything that depends on it
//! is created. Terminal faults fail fast; quota faults skip the affected
//! branch while independent branches continue.

use crate::descriptor::{creation_order, transitive_dependents, GraphError, ResourceDescriptor};
use crate::ensure::{ensure, CreateRetryPolicy, EnsureOutcome};
use crate::fault::Fault;
use crate::poll::{await_available, observe, MissingPolicy, PollOutcome, PollPolicy, PollPolicySet};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Why a node was skipped without any remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// The node itself hit the provider's quota
    QuotaExceeded,
    /// A dependency (direct or transitive) was skipped
    DependencySkipped,
}

/// Final status of one node after a provisioning walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum NodeStatus {
    /// Created this run and confirmed available
    Provisioned,
    /// Found already existing; no creation call was issued
    AlreadyExisted,
    Skipped(SkipReason),
    /// Creation or availability polling hit a terminal fault
    Failed,
    /// The walk failed fast before reaching this node
    NotAttempted,
}

/// Per-node record in a [`ProvisionReport`].
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub name: String,
    pub kind: String,
    pub status: NodeStatus,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Outcome of a provisioning walk, one entry per descriptor in creation
/// order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProvisionReport {
    pub nodes: Vec<NodeReport>,
}

impl ProvisionReport {
    pub fn status_of(&self, name: &str) -> Option<&NodeStatus> {
        self.nodes.iter().find(|n| n.name == name).map(|n| &n.status)
    }

    /// Names of resources that exist remotely after this walk (created
    /// now or found existing). These are what teardown must remove.
    pub fn materialized(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| {
                matches!(n.status, NodeStatus::Provisioned | NodeStatus::AlreadyExisted)
            })
            .map(|n| n.name.as_str())
            .collect()
    }

    /// Whether any node was skipped for quota (directly or transitively).
    pub fn has_quota_skips(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| matches!(n.status, NodeStatus::Skipped(_)))
    }
}

/// A provisioning walk that failed fast.
///
/// Carries the partial report so the caller can still tear down whatever
/// was materialized before the failure.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid descriptor graph: {0}")]
    Graph(#[from] GraphError),
    #[error(transparent)]
    MissingPolicy(#[from] MissingPolicy),
    #[error("provisioning '{name}' failed: {fault}")]
    Fault {
        name: String,
        fault: Fault,
        report: ProvisionReport,
    },
}

impl ProvisionError {
    /// The partial report, when the walk got far enough to have one.
    pub fn report(&self) -> Option<&ProvisionReport> {
        match self {
            ProvisionError::Fault { report, .. } => Some(report),
            _ => None,
        }
    }
}

/// Sequential, single-threaded provisioner for one scenario's graph.
///
/// Dependency ordering is a correctness requirement, so no parallel
/// fan-out is attempted even where the graph would permit it.
pub struct Provisioner<'a, C> {
    client: &'a C,
    policies: &'a PollPolicySet,
    create_retry: CreateRetryPolicy,
    cancel: Option<&'a CancellationToken>,
}

impl<'a, C: crate::client::ResourceClient> Provisioner<'a, C> {
    pub fn new(client: &'a C, policies: &'a PollPolicySet) -> Self {
        Provisioner {
            client,
            policies,
            create_retry: CreateRetryPolicy::default(),
            cancel: None,
        }
    }

    pub fn with_create_retry(mut self, retry: CreateRetryPolicy) -> Self {
        self.create_retry = retry;
        self
    }

    pub fn with_cancellation(mut self, cancel: &'a CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Provision the graph: for each descriptor in creation order,
    /// ensure it exists, then wait for it to be available.
    pub async fn provision(
        &self,
        descriptors: &[ResourceDescriptor],
    ) -> Result<ProvisionReport, ProvisionError> {
        let order = creation_order(descriptors)?;
        self.policies.validate(descriptors)?;

        let mut report = ProvisionReport::default();
        let mut skipped: HashSet<String> = HashSet::new();

        for &i in &order {
            let d = &descriptors[i];

            if skipped.contains(&d.name) {
                report.nodes.push(NodeReport {
                    name: d.name.clone(),
                    kind: d.kind.clone(),
                    status: NodeStatus::Skipped(SkipReason::DependencySkipped),
                    finished_at: Some(Utc::now()),
                });
                continue;
            }

            let policy = self.policies.policy_for(&d.kind)?;
            match self.provision_node(d, policy).await {
                Ok(status) => {
                    if matches!(status, NodeStatus::Skipped(SkipReason::QuotaExceeded)) {
                        // Independent branches continue; everything
                        // downstream of this node is skipped unattempted.
                        for dependent in transitive_dependents(descriptors, &d.name) {
                            skipped.insert(dependent);
                        }
                        warn!(
                            resource = %d.name,
                            dependents = skipped.len(),
                            "Quota skip, marking dependent branch skipped"
                        );
                    }
                    report.nodes.push(NodeReport {
                        name: d.name.clone(),
                        kind: d.kind.clone(),
                        status,
                        finished_at: Some(Utc::now()),
                    });
                }
                Err(fault) => {
                    report.nodes.push(NodeReport {
                        name: d.name.clone(),
                        kind: d.kind.clone(),
                        status: NodeStatus::Failed,
                        finished_at: Some(Utc::now()),
                    });
                    for &j in &order {
                        if !report.nodes.iter().any(|n| n.name == descriptors[j].name) {
                            report.nodes.push(NodeReport {
                                name: descriptors[j].name.clone(),
                                kind: descriptors[j].kind.clone(),
                                status: NodeStatus::NotAttempted,
                                finished_at: None,
                            });
                        }
                    }
                    return Err(ProvisionError::Fault {
                        name: d.name.clone(),
                        fault,
                        report,
                    });
                }
            }
        }

        info!(
            total = report.nodes.len(),
            materialized = report.materialized().len(),
            "Provisioning walk complete"
        );
        Ok(report)
    }

    async fn provision_node(
        &self,
        d: &ResourceDescriptor,
        policy: &PollPolicy,
    ) -> Result<NodeStatus, Fault> {
        match ensure(self.client, d, &self.create_retry, self.cancel).await? {
            EnsureOutcome::SkippedQuota => Ok(NodeStatus::Skipped(SkipReason::QuotaExceeded)),
            EnsureOutcome::AlreadyExists(existing) => {
                // The probe already saw a ready resource; a re-run costs
                // exactly one read per node, no poll loop.
                if observe(&existing, policy) != PollOutcome::Ready {
                    await_available(self.client, d, policy, self.cancel).await?;
                }
                Ok(NodeStatus::AlreadyExisted)
            }
            EnsureOutcome::Created => {
                await_available(self.client, d, policy, self.cancel).await?;
                info!(resource = %d.name, kind = %d.kind, "Resource provisioned");
                Ok(NodeStatus::Provisioned)
            }
        }
    }
}
