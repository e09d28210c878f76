//! fixture-rig - idempotent cloud fixture orchestration
//!
//! A reusable state machine for standing up and dismantling graphs of
//! interdependent cloud resources (networks, interfaces, instances,
//! storage, databases) against a management API that is slow, eventually
//! consistent, and fond of ambiguous transient failures. Fixtures built
//! with it are deterministic, idempotent, and safe to re-run: a second
//! run against the same names probes instead of creating, and teardown
//! tolerates everything already being gone.
//!
//! The pipeline is one-directional: descriptors → creation calls → poll
//! loop → ready → teardown calls. Start at [`scenario::ScenarioRunner`]
//! for the end-to-end driver, or use [`provision::Provisioner`] and
//! [`teardown::Teardown`] directly.

pub mod client;
pub mod descriptor;
pub mod discovery;
pub mod ensure;
pub mod fault;
pub mod poll;
pub mod provision;
pub mod scenario;
pub mod teardown;
pub mod testing;

pub use client::{OperationHandle, RemoteResource, ResourceClient, ResourceState};
pub use descriptor::{ProvisioningState, ResourceDescriptor, Scope};
pub use ensure::{ensure, CreateRetryPolicy, EnsureOutcome};
pub use fault::{classify, Fault, FaultKind, RemoteError};
pub use poll::{await_available, PollOutcome, PollPolicy, PollPolicySet};
pub use provision::{NodeStatus, ProvisionError, ProvisionReport, Provisioner, SkipReason};
pub use scenario::{Scenario, ScenarioOutcome, ScenarioReport, ScenarioRunner};
pub use teardown::{HoldRetryPolicy, Teardown, TeardownError};
