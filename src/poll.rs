//! Availability polling with bounded attempts and cancellation
//!
//! Repeatedly reads a resource until it reaches a terminal state or the
//! attempt budget runs out. All waiting is a fixed-interval sleep raced
//! against the caller's cancellation token; total wall-clock time is
//! bounded by `max_attempts * interval`.

use crate::client::{RemoteResource, ResourceClient, ResourceState};
use crate::descriptor::ResourceDescriptor;
use crate::fault::{classify, Fault, FaultKind, RemoteError};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Polling parameters for one resource kind.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Attempt budget; polling always terminates within
    /// `max_attempts * interval`.
    pub max_attempts: u32,
    /// Fixed delay between reads
    pub interval: Duration,
    /// Tighter bound on consecutive-from-start NotFound reads. Past it,
    /// creation is assumed to never have taken effect. Defaults to
    /// `max_attempts` when unset.
    pub max_not_found_attempts: Option<u32>,
    /// Whether this resource kind exposes a status field. Kinds without
    /// one are considered ready as soon as they are visible, and budget
    /// exhaustion while "still creating" is a soft success for them.
    pub has_status_field: bool,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            max_attempts: 30,
            interval: Duration::from_secs(10),
            max_not_found_attempts: Some(6),
            has_status_field: true,
        }
    }
}

/// Per-kind poll policies.
///
/// Attempt counts and intervals were historically hard-coded per
/// scenario; requiring an explicit entry per kind keeps near-identical
/// scenarios from silently diverging.
#[derive(Debug, Clone, Default)]
pub struct PollPolicySet {
    policies: HashMap<String, PollPolicy>,
}

#[derive(Debug, Error)]
#[error("no poll policy registered for resource kind '{0}'")]
pub struct MissingPolicy(pub String);

impl PollPolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: &str, policy: PollPolicy) -> Self {
        self.policies.insert(kind.to_string(), policy);
        self
    }

    /// Look up the policy for a kind. Missing kinds are a configuration
    /// error, never a silent default.
    pub fn policy_for(&self, kind: &str) -> Result<&PollPolicy, MissingPolicy> {
        self.policies
            .get(kind)
            .ok_or_else(|| MissingPolicy(kind.to_string()))
    }

    /// Check that every descriptor's kind has a policy before any remote
    /// call is made.
    pub fn validate(&self, descriptors: &[ResourceDescriptor]) -> Result<(), MissingPolicy> {
        for d in descriptors {
            self.policy_for(&d.kind)?;
        }
        Ok(())
    }
}

/// Observation of one poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    StillWorking,
    Failed,
    Absent,
}

/// Map a found resource onto a [`PollOutcome`].
///
/// Uniform across resource kinds: the policy's `has_status_field` flag
/// decides how a missing status is read, instead of null-checking at
/// each call site.
pub fn observe(resource: &RemoteResource, policy: &PollPolicy) -> PollOutcome {
    match resource.state {
        Some(ResourceState::Succeeded) => PollOutcome::Ready,
        Some(ResourceState::Failed) => PollOutcome::Failed,
        Some(ResourceState::Creating) => PollOutcome::StillWorking,
        None if policy.has_status_field => PollOutcome::StillWorking,
        None => PollOutcome::Ready,
    }
}

/// Read faults the poller absorbs into an outcome instead of surfacing.
///
/// NotFound is propagation lag; a hold on a read clears on its own.
fn absorbed(kind: FaultKind) -> Option<PollOutcome> {
    match kind {
        FaultKind::NotFound => Some(PollOutcome::Absent),
        FaultKind::Hold => Some(PollOutcome::StillWorking),
        _ => None,
    }
}

/// Poll until the resource is available or the budget is exhausted.
///
/// Returns `Ok(())` on `Succeeded` (or visibility, for statusless
/// kinds). `Failed` returns immediately: provisioning failures do not
/// self-heal. Persistent absence past `max_not_found_attempts` means
/// creation never took effect.
pub async fn await_available<C: ResourceClient>(
    client: &C,
    descriptor: &ResourceDescriptor,
    policy: &PollPolicy,
    cancel: Option<&CancellationToken>,
) -> Result<(), Fault> {
    let name = descriptor.name.as_str();
    let nf_budget = policy.max_not_found_attempts.unwrap_or(policy.max_attempts);
    let mut not_found = 0u32;
    let mut last = PollOutcome::Absent;

    for attempt in 1..=policy.max_attempts {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(Fault::new("poll", name, RemoteError::Cancelled));
            }
        }

        last = match client.get(&descriptor.scope, name).await {
            Ok(resource) => observe(&resource, policy),
            Err(e) => match absorbed(classify(&e)) {
                Some(outcome) => outcome,
                None => return Err(Fault::new("poll", name, e)),
            },
        };

        match last {
            PollOutcome::Ready => {
                debug!(resource = %name, attempt, "Resource available");
                return Ok(());
            }
            PollOutcome::Failed => {
                warn!(resource = %name, attempt, "Resource reached Failed state");
                return Err(Fault::new(
                    "poll",
                    name,
                    RemoteError::code_only("ProvisioningFailed", "resource reached Failed state"),
                )
                .with_kind(FaultKind::Terminal));
            }
            PollOutcome::Absent => {
                not_found += 1;
                if not_found >= nf_budget {
                    warn!(resource = %name, attempts = not_found, "Resource never became visible");
                    return Err(Fault::new(
                        "poll",
                        name,
                        RemoteError::code_only("NeverVisible", "creation never took effect"),
                    )
                    .with_kind(FaultKind::Terminal));
                }
                debug!(resource = %name, attempt, "Resource not yet visible, retrying");
            }
            PollOutcome::StillWorking => {
                debug!(resource = %name, attempt, "Resource still provisioning, retrying");
            }
        }

        // No point sleeping after the last read; fall straight through
        // to the exhaustion branch.
        if attempt < policy.max_attempts {
            sleep_or_cancel(policy.interval, cancel)
                .await
                .map_err(|e| Fault::new("poll", name, e))?;
        }
    }

    // Budget exhausted. A resource that was never seen is a hard failure
    // regardless of policy; one stuck "creating" is soft-success only for
    // kinds that cannot report status.
    if last == PollOutcome::StillWorking && !policy.has_status_field {
        warn!(
            resource = %name,
            attempts = policy.max_attempts,
            "Poll budget exhausted for statusless kind, treating as available"
        );
        return Ok(());
    }
    Err(Fault::new(
        "poll",
        name,
        RemoteError::code_only("PollTimeout", "attempt budget exhausted"),
    )
    .with_kind(FaultKind::Terminal))
}

/// Sleep for `delay`, aborting promptly if the caller cancels.
pub(crate) async fn sleep_or_cancel(
    delay: Duration,
    cancel: Option<&CancellationToken>,
) -> Result<(), RemoteError> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        } => Err(RemoteError::Cancelled),
    }
}
