//! Remote fault classification
//!
//! Turns raw errors from the management API into one of six fault kinds
//! using the call's status code plus the provider error code string,
//! never message text (except hold codes, where a code string is all
//! some providers expose).

use thiserror::Error;

/// Raw error surfaced by a remote call.
///
/// This is the narrow shape every provider adapter reduces its SDK errors
/// to before they enter the orchestrator.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The caller's deadline or cancellation token fired mid-call.
    #[error("call cancelled by caller")]
    Cancelled,

    /// The API answered with an error status.
    #[error("api error (status {status:?}, code {code:?}): {message}")]
    Api {
        /// HTTP-equivalent status, when the provider exposes one
        status: Option<u16>,
        /// Provider-specific error code string
        code: Option<String>,
        message: String,
    },

    /// The call never reached the API.
    #[error("transport error: {0}")]
    Transport(String),
}

impl RemoteError {
    /// Convenience constructor for an API error with a status and code.
    pub fn api(status: u16, code: &str, message: &str) -> Self {
        RemoteError::Api {
            status: Some(status),
            code: Some(code.to_string()),
            message: message.to_string(),
        }
    }

    /// API error carrying only a provider code string, no status.
    pub fn code_only(code: &str, message: &str) -> Self {
        RemoteError::Api {
            status: None,
            code: Some(code.to_string()),
            message: message.to_string(),
        }
    }
}

/// Classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// The resource does not exist (absorbed where absence is the goal)
    NotFound,
    /// Creation rejected because the resource already exists
    Conflict,
    /// Provider-side temporary lock, expected to clear on its own
    Hold,
    /// Quota or capacity limit; will not succeed this run
    QuotaExceeded,
    /// Caller gave up waiting; never retried, never reclassified
    CallerCancelled,
    /// Everything else; never retried
    Terminal,
}

impl FaultKind {
    /// Whether the orchestrator may retry a call that failed this way.
    pub fn is_retryable(self) -> bool {
        matches!(self, FaultKind::Hold)
    }
}

/// A classified fault with enough context to report it.
#[derive(Debug, Clone, Error)]
#[error("{kind:?} while {operation} '{resource}': {source}")]
pub struct Fault {
    pub kind: FaultKind,
    /// What the orchestrator was doing ("create", "poll", "delete")
    pub operation: &'static str,
    /// Scenario-scoped resource name
    pub resource: String,
    #[source]
    pub source: RemoteError,
}

impl Fault {
    pub fn new(operation: &'static str, resource: &str, source: RemoteError) -> Self {
        Fault {
            kind: classify(&source),
            operation,
            resource: resource.to_string(),
            source,
        }
    }

    /// Override the kind while keeping the original error as context.
    ///
    /// Used where the orchestrator knows more than the classifier, e.g.
    /// a re-probed conflict that turned out to be a real naming clash.
    pub fn with_kind(mut self, kind: FaultKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == FaultKind::CallerCancelled
    }
}

/// Provider codes that mean the resource is absent.
const NOT_FOUND_CODES: &[&str] = &[
    "NotFound",
    "ResourceNotFound",
    "ResourceGroupNotFound",
    "ParentResourceNotFound",
];

/// Provider codes for a temporary hold on the resource.
///
/// Holds show up inside 409-equivalents, but some providers only expose
/// the code string, so these match with or without a status.
const HOLD_CODES: &[&str] = &[
    "ResourceReserved",
    "NicReservedForAnotherVm",
    "AnotherOperationInProgress",
    "RetryableError",
];

/// Provider codes for quota/capacity exhaustion.
const QUOTA_CODES: &[&str] = &[
    "QuotaExceeded",
    "SubscriptionQuotaExceeded",
    "LimitExceeded",
    "InsufficientCapacity",
];

/// Classify a remote error into exactly one [`FaultKind`].
///
/// Total and side-effect-free: any `RemoteError` value maps to a kind,
/// in priority order: cancellation, absence, hold-within-conflict, bare
/// conflict, quota, hold-by-code-alone, then terminal.
pub fn classify(error: &RemoteError) -> FaultKind {
    let (status, code) = match error {
        RemoteError::Cancelled => return FaultKind::CallerCancelled,
        RemoteError::Transport(_) => return FaultKind::Terminal,
        RemoteError::Api { status, code, .. } => (*status, code.as_deref()),
    };

    if status == Some(404) || code.is_some_and(|c| NOT_FOUND_CODES.contains(&c)) {
        return FaultKind::NotFound;
    }

    if status == Some(409) {
        return if code.is_some_and(|c| HOLD_CODES.contains(&c)) {
            FaultKind::Hold
        } else {
            FaultKind::Conflict
        };
    }

    if code.is_some_and(|c| QUOTA_CODES.contains(&c)) {
        return FaultKind::QuotaExceeded;
    }

    // Hold code without a status: some providers only expose the string.
    if code.is_some_and(|c| HOLD_CODES.contains(&c)) {
        return FaultKind::Hold;
    }

    FaultKind::Terminal
}
