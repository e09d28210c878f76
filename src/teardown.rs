//! Dependency-ordered teardown
//!
//! Deletes a scenario's graph in strict reverse creation order,
//! collecting failures instead of short-circuiting so one resource's
//! delete failure does not strand its siblings. NotFound on delete is
//! success: teardown is as idempotent as setup.

use crate::client::{OperationHandle, ResourceClient};
use crate::descriptor::{creation_order, ResourceDescriptor};
use crate::fault::{classify, Fault, FaultKind, RemoteError};
use crate::poll::sleep_or_cancel;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Retry tuning for holds during deletion.
///
/// Holds here are the provider's own internal release delay (an
/// interface held briefly after its attached instance is removed), not
/// propagation lag, so the backoff is deliberately longer and flatter
/// than creation polling: retrying too fast wastes the hold window,
/// retrying too slow wastes wall-clock budget.
#[derive(Debug, Clone)]
pub struct HoldRetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    /// Deadline handed to each delete operation's completion wait
    pub operation_deadline: Duration,
}

impl Default for HoldRetryPolicy {
    fn default() -> Self {
        HoldRetryPolicy {
            max_attempts: 5,
            delay: Duration::from_secs(30),
            operation_deadline: Duration::from_secs(300),
        }
    }
}

/// One resource's unrecovered delete failure.
#[derive(Debug)]
pub struct TeardownError {
    pub name: String,
    pub kind: String,
    pub fault: Fault,
}

/// Sequential teardown walker for one scenario's graph.
pub struct Teardown<'a, C> {
    client: &'a C,
    hold_retry: HoldRetryPolicy,
    cancel: Option<&'a CancellationToken>,
}

impl<'a, C: ResourceClient> Teardown<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Teardown {
            client,
            hold_retry: HoldRetryPolicy::default(),
            cancel: None,
        }
    }

    pub fn with_hold_retry(mut self, policy: HoldRetryPolicy) -> Self {
        self.hold_retry = policy;
        self
    }

    pub fn with_cancellation(mut self, cancel: &'a CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Delete every descriptor's resource in reverse creation order.
    ///
    /// Returns the failures that survived retrying; an empty vector
    /// means the fixture is fully dismantled (or never existed).
    pub async fn teardown(&self, descriptors: &[ResourceDescriptor]) -> Vec<TeardownError> {
        let order = match creation_order(descriptors) {
            Ok(order) => order,
            Err(e) => {
                // An invalid graph was never provisioned; nothing to delete.
                warn!(error = %e, "Teardown called with invalid graph, nothing to do");
                return Vec::new();
            }
        };

        let mut errors = Vec::new();
        for &i in order.iter().rev() {
            let d = &descriptors[i];
            match self.delete_one(d).await {
                Ok(()) => {}
                Err(fault) if fault.is_cancelled() => {
                    warn!(resource = %d.name, "Teardown cancelled, remaining resources left in place");
                    errors.push(TeardownError {
                        name: d.name.clone(),
                        kind: d.kind.clone(),
                        fault,
                    });
                    break;
                }
                Err(fault) => {
                    warn!(resource = %d.name, error = %fault, "Failed to delete resource");
                    errors.push(TeardownError {
                        name: d.name.clone(),
                        kind: d.kind.clone(),
                        fault,
                    });
                }
            }
        }

        if errors.is_empty() {
            info!(total = descriptors.len(), "Teardown complete");
        } else {
            warn!(failed = errors.len(), "Teardown finished with failures");
        }
        errors
    }

    /// Delete one resource, absorbing NotFound and retrying holds.
    async fn delete_one(&self, d: &ResourceDescriptor) -> Result<(), Fault> {
        let name = d.name.as_str();

        for attempt in 1..=self.hold_retry.max_attempts {
            if let Some(token) = self.cancel {
                if token.is_cancelled() {
                    return Err(Fault::new("delete", name, RemoteError::Cancelled));
                }
            }

            let result = match self.client.delete(&d.scope, name).await {
                Ok(handle) => handle.await_completion(self.hold_retry.operation_deadline).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    info!(resource = %name, kind = %d.kind, "Resource deleted");
                    return Ok(());
                }
                Err(e) => match classify(&e) {
                    FaultKind::NotFound => {
                        debug!(resource = %name, "Resource already deleted");
                        return Ok(());
                    }
                    FaultKind::Hold if attempt < self.hold_retry.max_attempts => {
                        warn!(
                            resource = %name,
                            attempt,
                            delay = ?self.hold_retry.delay,
                            error = %e,
                            "Resource held, retrying delete"
                        );
                        sleep_or_cancel(self.hold_retry.delay, self.cancel)
                            .await
                            .map_err(|c| Fault::new("delete", name, c))?;
                    }
                    _ => return Err(Fault::new("delete", name, e)),
                },
            }
        }

        // Unreachable in practice: the loop returns on every arm except
        // the hold-retry one, which is bounded by max_attempts.
        Err(Fault::new(
            "delete",
            name,
            RemoteError::code_only("HoldRetryExhausted", "hold never cleared"),
        ))
    }
}
