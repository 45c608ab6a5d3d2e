//! Usage: Small shared types for the gateway (error categories, wire-level status codes, ids).

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    ProtocolViolation,
    ResourceExhausted,
    Liveness,
    Downstream,
    Routing,
    SystemError,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProtocolViolation => "PROTOCOL_VIOLATION",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::Liveness => "LIVENESS",
            Self::Downstream => "DOWNSTREAM",
            Self::Routing => "ROUTING",
            Self::SystemError => "SYSTEM_ERROR",
        }
    }
}

/// Status reported back to the caller when a session or dial-back exchange fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcStatusCode {
    Ok,
    Cancelled,
    DeadlineExceeded,
    NotFound,
    FailedPrecondition,
    ResourceExhausted,
    Unavailable,
    Internal,
}

impl RpcStatusCode {
    /// Numeric value as carried by grpc-status.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Cancelled => 1,
            Self::DeadlineExceeded => 4,
            Self::NotFound => 5,
            Self::ResourceExhausted => 8,
            Self::FailedPrecondition => 9,
            Self::Internal => 13,
            Self::Unavailable => 14,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcStatus {
    pub code: RpcStatusCode,
    pub error_code: String,
    pub message: String,
}

/// Opaque worker identifier issued by the helper in a find-worker query.
///
/// The same value is used as the task id of the proxy initiate message and of the
/// dial-back `Initiate`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
