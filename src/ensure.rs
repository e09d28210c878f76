//! Idempotent resource creation
//!
//! `ensure` makes a descriptor's resource exist with the desired
//! configuration, treating "already exists" as success so that setup can
//! be re-run safely against the same names. Holds are absorbed with the
//! same bounded retry on the probe read and the creation call, and every
//! retry loop is raced against the caller's cancellation token.

use crate::client::{OperationHandle, RemoteResource, ResourceClient, ResourceState};
use crate::fault::{classify, Fault, FaultKind, RemoteError};
use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of an `ensure` call.
#[derive(Debug)]
pub enum EnsureOutcome {
    /// The resource already existed in an acceptable configuration;
    /// no creation call was issued.
    AlreadyExists(RemoteResource),
    /// A creation call was issued and accepted by the provider.
    Created,
    /// The provider's quota is exhausted. Not an error: the scenario
    /// records the resource as not provisioned and dependents skip.
    SkippedQuota,
}

/// Tuning for the bounded hold retry around the probe and creation calls.
#[derive(Debug, Clone)]
pub struct CreateRetryPolicy {
    /// Retries after the initial call, so a call is issued at most
    /// `max_retries + 1` times.
    pub max_retries: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Deadline handed to the operation handle's completion wait
    pub operation_deadline: Duration,
}

impl Default for CreateRetryPolicy {
    fn default() -> Self {
        CreateRetryPolicy {
            max_retries: 4,
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            operation_deadline: Duration::from_secs(300),
        }
    }
}

impl CreateRetryPolicy {
    fn schedule(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries)
    }
}

/// Ensure the resource described by `descriptor` exists.
///
/// Probe first; an acceptable existing resource short-circuits. A
/// conflicting create is re-probed once: found means a concurrent
/// idempotent run won the race, still-absent means a real conflict.
pub async fn ensure<C: ResourceClient>(
    client: &C,
    descriptor: &crate::descriptor::ResourceDescriptor,
    retry: &CreateRetryPolicy,
    cancel: Option<&CancellationToken>,
) -> Result<EnsureOutcome, Fault> {
    let name = descriptor.name.as_str();
    let scope = &descriptor.scope;

    if let Some(token) = cancel {
        if token.is_cancelled() {
            return Err(Fault::new("create", name, RemoteError::Cancelled));
        }
    }

    // Existence probe, with holds on the read retried like any other
    // held call.
    let probe = || async { client.get(scope, name).await };
    let probed = race_cancel(
        probe
            .retry(retry.schedule())
            .when(|e: &RemoteError| classify(e).is_retryable())
            .notify(|e: &RemoteError, dur: Duration| {
                warn!(resource = %name, delay = ?dur, error = %e, "Probe held, retrying read");
            }),
        cancel,
    )
    .await;

    match probed {
        Ok(existing) if is_acceptable(&existing) => {
            debug!(resource = %name, "Resource already exists, skipping creation");
            return Ok(EnsureOutcome::AlreadyExists(existing));
        }
        Ok(_) => {
            // Exists but in a failed configuration; re-issue the create
            // and let the provider's PUT semantics repair it.
            debug!(resource = %name, "Resource exists in failed state, re-creating");
        }
        Err(e) => match classify(&e) {
            FaultKind::NotFound => {}
            FaultKind::QuotaExceeded => {
                warn!(resource = %name, error = %e, "Quota exhausted on probe, marking not provisioned");
                return Ok(EnsureOutcome::SkippedQuota);
            }
            _ => return Err(Fault::new("probe", name, e)),
        },
    }

    info!(resource = %name, kind = %descriptor.kind, scope = %scope, "Creating resource");

    let create = || async {
        let handle = client
            .create_or_update(scope, name, &descriptor.desired_config)
            .await?;
        handle.await_completion(retry.operation_deadline).await
    };

    let result = race_cancel(
        create
            .retry(retry.schedule())
            .when(|e: &RemoteError| classify(e).is_retryable())
            .notify(|e: &RemoteError, dur: Duration| {
                warn!(resource = %name, delay = ?dur, error = %e, "Resource held, retrying creation");
            }),
        cancel,
    )
    .await;

    match result {
        Ok(()) => Ok(EnsureOutcome::Created),
        Err(e) => match classify(&e) {
            FaultKind::Conflict => reprobe_conflict(client, descriptor, e).await,
            FaultKind::QuotaExceeded => {
                warn!(resource = %name, error = %e, "Quota exhausted, marking not provisioned");
                Ok(EnsureOutcome::SkippedQuota)
            }
            _ => Err(Fault::new("create", name, e)),
        },
    }
}

/// Race a remote call (including its retry backoff sleeps) against the
/// caller's cancellation token, so cancellation mid-backoff returns
/// promptly instead of waiting out the schedule.
async fn race_cancel<T>(
    call: impl Future<Output = Result<T, RemoteError>>,
    cancel: Option<&CancellationToken>,
) -> Result<T, RemoteError> {
    tokio::select! {
        result = call => result,
        _ = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        } => Err(RemoteError::Cancelled),
    }
}

/// Whether an existing resource counts as "already in the desired
/// configuration" for idempotence purposes.
///
/// Anything not explicitly `Failed` does: `Succeeded` is a prior run's
/// terminal success, `Creating` is a concurrent run in flight, and a
/// missing status field carries no evidence against the resource.
fn is_acceptable(resource: &RemoteResource) -> bool {
    resource.state != Some(ResourceState::Failed)
}

/// A creation call hit Conflict: re-probe once to separate "concurrent
/// idempotent run" from "someone else's resource". A heuristic, not a
/// proof; the provider offers no better signal.
async fn reprobe_conflict<C: ResourceClient>(
    client: &C,
    descriptor: &crate::descriptor::ResourceDescriptor,
    conflict: RemoteError,
) -> Result<EnsureOutcome, Fault> {
    let name = descriptor.name.as_str();
    match client.get(&descriptor.scope, name).await {
        Ok(existing) => {
            info!(resource = %name, "Conflict resolved by re-probe, resource exists");
            Ok(EnsureOutcome::AlreadyExists(existing))
        }
        Err(probe_err) => {
            warn!(
                resource = %name,
                conflict = %conflict,
                probe = %probe_err,
                "Creation conflicted but resource is not visible"
            );
            Err(Fault::new("create", name, conflict).with_kind(FaultKind::Terminal))
        }
    }
}
