//! Error taxonomy for the launch engine
//!
//! Every failure that reaches a caller is one of the [`LaunchError`] kinds.
//! Validation errors are raised before any persistent write; storage and
//! timeout errors are surfaced as-is and retry policy belongs to the caller.

use thiserror::Error;

/// Launch engine errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LaunchError {
    /// Malformed input: address format, unparsable decimal, missing field
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Lookup miss on a required key
    #[error("Not found: {0}")]
    NotFound(String),

    /// State-machine precondition violated
    #[error("Invalid transition for log {id}: {from} -> {to}")]
    InvalidTransition { id: u64, from: String, to: String },

    /// Backing store unavailable or write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Signing requested for an unmanaged address
    #[error("No managed key for account {0}")]
    NoSuchKey(String),

    /// The signing library rejected the key or payload
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// Deadline exceeded on an I/O-bound call
    #[error("Timeout after {elapsed_ms}ms during {operation}")]
    Timeout { operation: String, elapsed_ms: u64 },

    /// JSON-RPC node or oracle unreachable or answered with garbage
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Startup configuration problem
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LaunchError {
    /// Symbolic kind name surfaced to RPC callers
    pub fn kind(&self) -> &'static str {
        match self {
            LaunchError::InvalidArgument(_) => "InvalidArgument",
            LaunchError::NotFound(_) => "NotFound",
            LaunchError::InvalidTransition { .. } => "InvalidTransition",
            LaunchError::Persistence(_) => "PersistenceError",
            LaunchError::NoSuchKey(_) => "NoSuchKey",
            LaunchError::SigningFailed(_) => "SigningFailed",
            LaunchError::Timeout { .. } => "Timeout",
            LaunchError::Upstream(_) => "UpstreamError",
            LaunchError::Config(_) => "ConfigError",
        }
    }

    /// Whether a caller may reasonably retry the same request
    pub fn is_transient(&self) -> bool {
        match self {
            LaunchError::Persistence(_) => true,
            LaunchError::Timeout { .. } => true,
            LaunchError::Upstream(_) => true,

            LaunchError::InvalidArgument(_) => false,
            LaunchError::NotFound(_) => false,
            LaunchError::InvalidTransition { .. } => false,
            LaunchError::NoSuchKey(_) => false,
            LaunchError::SigningFailed(_) => false,
            LaunchError::Config(_) => false,
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        LaunchError::InvalidArgument(msg.into())
    }

    pub fn persistence(msg: impl std::fmt::Display) -> Self {
        LaunchError::Persistence(msg.to_string())
    }
}

impl From<sled::Error> for LaunchError {
    fn from(err: sled::Error) -> Self {
        LaunchError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for LaunchError {
    fn from(err: serde_json::Error) -> Self {
        LaunchError::Persistence(format!("corrupt record: {}", err))
    }
}

impl From<tokio::task::JoinError> for LaunchError {
    fn from(err: tokio::task::JoinError) -> Self {
        LaunchError::Persistence(format!("storage task aborted: {}", err))
    }
}

/// Nonce counter errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NonceError {
    /// The counter for this network has never been initialised
    #[error("Nonce counter for network {0} is not initialised")]
    Uninitialized(String),

    /// Requested value does not move the counter forward
    #[error("Nonce advance to {requested} rejected: counter already at {current}")]
    Stale { requested: u64, current: u64 },

    /// Backing store failure
    #[error("Nonce storage error: {0}")]
    Storage(String),

    /// Deadline exceeded
    #[error("Nonce operation timed out after {0}ms")]
    Timeout(u64),
}

impl NonceError {
    pub fn is_transient(&self) -> bool {
        match self {
            NonceError::Stale { .. } => true,
            NonceError::Storage(_) => true,
            NonceError::Timeout(_) => true,
            NonceError::Uninitialized(_) => false,
        }
    }
}

impl From<sled::Error> for NonceError {
    fn from(err: sled::Error) -> Self {
        NonceError::Storage(err.to_string())
    }
}

impl From<NonceError> for LaunchError {
    fn from(err: NonceError) -> Self {
        match err {
            NonceError::Timeout(ms) => LaunchError::Timeout {
                operation: "nonce".to_string(),
                elapsed_ms: ms,
            },
            NonceError::Storage(msg) => LaunchError::Persistence(msg),
            other => LaunchError::Persistence(other.to_string()),
        }
    }
}

/// Result type for launch operations
pub type LaunchResult<T> = Result<T, LaunchError>;

/// Result type for nonce operations
pub type NonceResult<T> = Result<T, NonceError>;
