//! Narrow remote-API traits for testing and provider adapters
//!
//! The orchestrator never talks to a provider SDK directly. It consumes
//! this three-call surface (`get`, `create_or_update`, `delete`), which a
//! provider adapter implements and tests mock with an in-memory fake.

use crate::descriptor::Scope;
use crate::fault::RemoteError;
use std::future::Future;
use std::time::Duration;

/// Provider-reported lifecycle state of a found resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Creating,
    Succeeded,
    Failed,
}

impl ResourceState {
    /// Map a provider status string onto the uniform state set.
    ///
    /// Unrecognized strings map to `Creating`: an in-flight state name we
    /// do not know is still an in-flight state.
    pub fn parse(raw: &str) -> ResourceState {
        match raw {
            "Succeeded" | "Available" | "Running" => ResourceState::Succeeded,
            "Failed" | "Canceled" => ResourceState::Failed,
            _ => ResourceState::Creating,
        }
    }
}

/// A resource as read back from the management API.
#[derive(Debug, Clone)]
pub struct RemoteResource {
    pub name: String,
    /// Configuration as the provider currently reports it
    pub config: serde_json::Value,
    /// Provider status, `None` for resource kinds with no status field
    pub state: Option<ResourceState>,
}

/// Handle for a long-running create or delete operation.
///
/// `await_completion` confirms the provider accepted and finished the
/// operation. It does not imply the resource is visible to reads yet;
/// propagation lag is the availability poller's concern.
pub trait OperationHandle: Send {
    fn await_completion(
        self,
        deadline: Duration,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

/// Per-resource-kind management API surface.
///
/// One implementation per provider; the in-memory fake in
/// [`crate::testing`] implements it for tests.
pub trait ResourceClient: Send + Sync {
    type Handle: OperationHandle;

    /// Read a resource. Absence is a `RemoteError` that classifies as
    /// `NotFound`, matching the provider wire behavior.
    fn get(
        &self,
        scope: &Scope,
        name: &str,
    ) -> impl Future<Output = Result<RemoteResource, RemoteError>> + Send;

    /// Create the resource or bring it to the desired configuration.
    fn create_or_update(
        &self,
        scope: &Scope,
        name: &str,
        config: &serde_json::Value,
    ) -> impl Future<Output = Result<Self::Handle, RemoteError>> + Send;

    /// Delete the resource.
    fn delete(
        &self,
        scope: &Scope,
        name: &str,
    ) -> impl Future<Output = Result<Self::Handle, RemoteError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_parsing() {
        assert_eq!(ResourceState::parse("Succeeded"), ResourceState::Succeeded);
        assert_eq!(ResourceState::parse("Available"), ResourceState::Succeeded);
        assert_eq!(ResourceState::parse("Failed"), ResourceState::Failed);
        assert_eq!(ResourceState::parse("Canceled"), ResourceState::Failed);
        assert_eq!(ResourceState::parse("Updating"), ResourceState::Creating);
        assert_eq!(ResourceState::parse("Provisioning"), ResourceState::Creating);
    }
}
