/// Error handling module for the game server orchestrator.
///
/// Every fallible operation in the crate returns [`Result`]. Callers that need
/// to map failures onto a transport (HTTP status codes, retry policies) should
/// use [`Error::class`] rather than matching on individual variants, so engine
/// specific details never leak into the API layer.
///
/// # Example
///
/// ```
/// use gamehost_orchestrator::error::{Error, ErrorClass, Result};
///
/// fn describe(result: Result<()>) -> &'static str {
///     match result {
///         Ok(_) => "done",
///         Err(e) => match e.class() {
///             ErrorClass::Transient => "engine busy, retry later",
///             ErrorClass::Conflict => "operation already in progress",
///             ErrorClass::NotFound => "no such server",
///             ErrorClass::Permanent => "fix the request",
///         },
///     }
/// }
///
/// assert_eq!(describe(Err(Error::ConcurrencyConflict("s1".into()))), "operation already in progress");
/// ```
use crate::runtime::RuntimeError;
use crate::server::ServerState;
use thiserror::Error;

/// Errors that can occur while orchestrating game servers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Failed to read or parse a configuration file.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration parsed but contains unusable values.
    ///
    /// This error occurs when:
    /// - A limit or interval is zero
    /// - A template override is missing its image
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The request or the resolved template is malformed.
    ///
    /// Raised before any runtime call is made, so no partial state exists.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested resources or server count exceed the administrative quota.
    #[error("Resource limit exceeded: {0}")]
    ResourceLimitExceeded(String),

    /// No template with the given name is known to the registry.
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// No server record exists for the given id.
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// The server has no container yet (or it was lost to drift).
    #[error("Server not provisioned: {0}")]
    NotProvisioned(String),

    /// A lifecycle operation is already in flight for the server.
    #[error("Operation already in progress for server {0}")]
    ConcurrencyConflict(String),

    /// The requested operation is not allowed from the current state.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        /// State the server was in
        from: ServerState,
        /// State the operation would have entered
        to: ServerState,
    },

    /// The container vanished from the engine.
    #[error("Container not found: {0}")]
    NotFound(String),

    /// The engine could not be reached. Safe to retry later.
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The engine rejected the request.
    #[error("Engine error: {0}")]
    Engine(String),

    /// An operation did not complete within its time budget.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The storage collaborator failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Any other error not covered by the above categories.
    #[error("Other error: {0}")]
    Other(String),
}

/// Coarse classification of an [`Error`] for callers choosing a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Infrastructure hiccup; the same request may succeed later.
    Transient,
    /// The input or state must change before retrying.
    Permanent,
    /// Another operation holds the server; retry once it finishes.
    Conflict,
    /// The addressed server or container does not exist.
    NotFound,
}

impl Error {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::EngineUnavailable(_) | Error::Timeout(_) | Error::Storage(_) => {
                ErrorClass::Transient
            }
            Error::ConcurrencyConflict(_) => ErrorClass::Conflict,
            Error::ServerNotFound(_) | Error::NotFound(_) | Error::TemplateNotFound(_) => {
                ErrorClass::NotFound
            }
            Error::ConfigParse(_)
            | Error::ConfigInvalid(_)
            | Error::Validation(_)
            | Error::ResourceLimitExceeded(_)
            | Error::NotProvisioned(_)
            | Error::InvalidTransition { .. }
            | Error::Engine(_)
            | Error::Other(_) => ErrorClass::Permanent,
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl From<RuntimeError> for Error {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotFound(msg) => Error::NotFound(msg),
            RuntimeError::Unavailable(msg) => Error::EngineUnavailable(msg),
            RuntimeError::Timeout(msg) => Error::Timeout(msg),
            RuntimeError::Engine(msg) => Error::Engine(msg),
        }
    }
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, Error>;
