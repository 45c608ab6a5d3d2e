//! Usage: Error taxonomy for sessions and dial-back exchanges + translation to wire status.

use std::time::Duration;

use super::types::{ErrorCategory, RpcStatus, RpcStatusCode, WorkerId};

/// Ordering violations detected on the caller's primary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InboundViolation {
    #[error("received setup more than once")]
    DuplicateSetup,
    #[error("received setup after a termination notice")]
    SetupAfterTermination,
    #[error("received parameters before setup")]
    ParametersBeforeSetup,
    #[error("received parameters more than once")]
    DuplicateParameters,
    #[error("received parameters after a termination notice")]
    ParametersAfterTermination,
    #[error("received a request chunk before setup")]
    ChunkBeforeSetup,
    #[error("received a request chunk before parameters")]
    ChunkBeforeParameters,
    #[error("received a request chunk after the final chunk")]
    ChunkAfterFinalChunk,
    #[error("received more than one request chunk under request bypass")]
    ChunkUnderRequestBypass,
    #[error("received a final request chunk under request bypass")]
    FinalChunkUnderRequestBypass,
    #[error("received the final request chunk more than once")]
    DuplicateFinalChunk,
    #[error("received a request chunk after a termination notice")]
    ChunkAfterTermination,
    #[error("received a termination notice before setup")]
    TerminationBeforeSetup,
    #[error("received a termination notice more than once")]
    DuplicateTermination,
    #[error("request stream ended unexpectedly in state {state}")]
    UnexpectedEndOfStream { state: &'static str },
}

impl InboundViolation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateSetup => "duplicate_setup",
            Self::SetupAfterTermination => "setup_after_termination",
            Self::ParametersBeforeSetup => "parameters_before_setup",
            Self::DuplicateParameters => "duplicate_parameters",
            Self::ParametersAfterTermination => "parameters_after_termination",
            Self::ChunkBeforeSetup => "chunk_before_setup",
            Self::ChunkBeforeParameters => "chunk_before_parameters",
            Self::ChunkAfterFinalChunk => "chunk_after_final_chunk",
            Self::ChunkUnderRequestBypass => "chunk_under_request_bypass",
            Self::FinalChunkUnderRequestBypass => "final_chunk_under_request_bypass",
            Self::DuplicateFinalChunk => "duplicate_final_chunk",
            Self::ChunkAfterTermination => "chunk_after_termination",
            Self::TerminationBeforeSetup => "termination_before_setup",
            Self::DuplicateTermination => "duplicate_termination",
            Self::UnexpectedEndOfStream { .. } => "unexpected_end_of_stream",
        }
    }
}

/// Ordering violations detected on a worker-scoped dial-back stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DialBackViolation {
    #[error("received worker id more than once")]
    DuplicateWorkerId,
    #[error("received worker id after close")]
    WorkerIdAfterClose,
    #[error("received worker id after end of stream")]
    WorkerIdAfterEndOfStream,
    #[error("received a message before the worker id")]
    MessageBeforeWorkerId,
    #[error("received a message after close")]
    MessageAfterClose,
    #[error("received a message after end of stream")]
    MessageAfterEndOfStream,
    #[error("received close before the worker id")]
    CloseBeforeWorkerId,
    #[error("received close more than once")]
    DuplicateClose,
    #[error("received close after end of stream")]
    CloseAfterEndOfStream,
    #[error("stream ended before the worker id")]
    EndOfStreamBeforeWorkerId,
    #[error("stream ended more than once")]
    DuplicateEndOfStream,
}

impl DialBackViolation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateWorkerId => "duplicate_worker_id",
            Self::WorkerIdAfterClose => "worker_id_after_close",
            Self::WorkerIdAfterEndOfStream => "worker_id_after_end_of_stream",
            Self::MessageBeforeWorkerId => "message_before_worker_id",
            Self::MessageAfterClose => "message_after_close",
            Self::MessageAfterEndOfStream => "message_after_end_of_stream",
            Self::CloseBeforeWorkerId => "close_before_worker_id",
            Self::DuplicateClose => "duplicate_close",
            Self::CloseAfterEndOfStream => "close_after_end_of_stream",
            Self::EndOfStreamBeforeWorkerId => "end_of_stream_before_worker_id",
            Self::DuplicateEndOfStream => "duplicate_end_of_stream",
        }
    }
}

/// Failure surfaced by an RPC transport while reading a stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("stream cancelled by the remote peer")]
    Cancelled,
    #[error("transport failure: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("inbound protocol violation: {0}")]
    InboundProtocol(#[from] InboundViolation),
    #[error("dial-back protocol violation: {0}")]
    DialBackProtocol(#[from] DialBackViolation),
    #[error("request bypass is required by this gateway")]
    RequestBypassRequired,
    #[error("helper requested a worker but this gateway is not a proxy")]
    UnexpectedFindWorker,
    #[error("max concurrent requests exceeded (max={max})")]
    MaxConcurrentRequestsExceeded { max: usize },
    #[error("workload is unhealthy")]
    WorkloadUnhealthy,
    #[error("workload is busy: {0}")]
    WorkloadBusy(String),
    #[error("max cumulative request bytes exceeded (limit={limit} received={received})")]
    MaxCumulativeRequestBytesExceeded { limit: u64, received: u64 },
    #[error("gateway is draining")]
    Draining,
    #[error("a pause is already waiting for the workload to become idle")]
    AlreadyWaitingForIdle,
    #[error("no activity within {0:?}")]
    IdleTimeoutExceeded(Duration),
    #[error("session cancelled (by_caller={by_caller})")]
    Cancelled { by_caller: bool },
    #[error("helper reported failure: {0}")]
    HelperFailure(String),
    #[error("helper unavailable: {0}")]
    HelperUnavailable(String),
    #[error("unknown worker id: {0}")]
    UnknownWorkerId(WorkerId),
    #[error("worker already dialed back: {0}")]
    WorkerAlreadyConnected(WorkerId),
    #[error("gateway is not configured as a proxy; dial-back refused")]
    WorkerNotProxyCapable,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<TransportError> for GatewayError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => Self::Cancelled { by_caller: true },
            TransportError::Failed(message) => Self::Transport(message),
        }
    }
}

impl GatewayError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InboundProtocol(_)
            | Self::DialBackProtocol(_)
            | Self::RequestBypassRequired
            | Self::UnexpectedFindWorker => ErrorCategory::ProtocolViolation,
            Self::MaxConcurrentRequestsExceeded { .. }
            | Self::WorkloadUnhealthy
            | Self::WorkloadBusy(_)
            | Self::MaxCumulativeRequestBytesExceeded { .. }
            | Self::Draining => ErrorCategory::ResourceExhausted,
            Self::IdleTimeoutExceeded(_) | Self::Cancelled { .. } => ErrorCategory::Liveness,
            Self::HelperFailure(_) | Self::HelperUnavailable(_) => ErrorCategory::Downstream,
            Self::UnknownWorkerId(_)
            | Self::WorkerAlreadyConnected(_)
            | Self::WorkerNotProxyCapable => ErrorCategory::Routing,
            Self::AlreadyWaitingForIdle | Self::Transport(_) | Self::Internal(_) => {
                ErrorCategory::SystemError
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InboundProtocol(_) => "GW_INBOUND_PROTOCOL_VIOLATION",
            Self::DialBackProtocol(_) => "GW_DIAL_BACK_PROTOCOL_VIOLATION",
            Self::RequestBypassRequired => "GW_REQUEST_BYPASS_REQUIRED",
            Self::UnexpectedFindWorker => "GW_UNEXPECTED_FIND_WORKER",
            Self::MaxConcurrentRequestsExceeded { .. } => "GW_MAX_CONCURRENT_REQUESTS_EXCEEDED",
            Self::WorkloadUnhealthy => "GW_WORKLOAD_UNHEALTHY",
            Self::WorkloadBusy(_) => "GW_WORKLOAD_BUSY",
            Self::MaxCumulativeRequestBytesExceeded { .. } => {
                "GW_MAX_CUMULATIVE_REQUEST_BYTES_EXCEEDED"
            }
            Self::Draining => "GW_DRAINING",
            Self::AlreadyWaitingForIdle => "GW_ALREADY_WAITING_FOR_IDLE",
            Self::IdleTimeoutExceeded(_) => "GW_IDLE_TIMEOUT",
            Self::Cancelled { by_caller: true } => "GW_REQUEST_ABORTED",
            Self::Cancelled { by_caller: false } => "GW_REQUEST_CANCELLED",
            Self::HelperFailure(_) => "GW_HELPER_FAILURE",
            Self::HelperUnavailable(_) => "GW_HELPER_UNAVAILABLE",
            Self::UnknownWorkerId(_) => "GW_UNKNOWN_WORKER_ID",
            Self::WorkerAlreadyConnected(_) => "GW_WORKER_ALREADY_CONNECTED",
            Self::WorkerNotProxyCapable => "GW_WORKER_NOT_PROXY_CAPABLE",
            Self::Transport(_) => "GW_TRANSPORT_ERROR",
            Self::Internal(_) => "GW_INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> RpcStatusCode {
        match self {
            Self::MaxConcurrentRequestsExceeded { .. }
            | Self::MaxCumulativeRequestBytesExceeded { .. } => RpcStatusCode::ResourceExhausted,
            Self::WorkloadUnhealthy
            | Self::WorkloadBusy(_)
            | Self::Draining
            | Self::HelperUnavailable(_) => RpcStatusCode::Unavailable,
            Self::IdleTimeoutExceeded(_) => RpcStatusCode::DeadlineExceeded,
            Self::Cancelled { .. } => RpcStatusCode::Cancelled,
            Self::UnknownWorkerId(_) => RpcStatusCode::NotFound,
            Self::WorkerNotProxyCapable | Self::WorkerAlreadyConnected(_) => {
                RpcStatusCode::FailedPrecondition
            }
            Self::HelperFailure(_)
            | Self::AlreadyWaitingForIdle
            | Self::Transport(_)
            | Self::Internal(_) => RpcStatusCode::Internal,
            Self::InboundProtocol(_)
            | Self::DialBackProtocol(_)
            | Self::RequestBypassRequired
            | Self::UnexpectedFindWorker => RpcStatusCode::FailedPrecondition,
        }
    }

    pub fn is_client_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { by_caller: true })
    }

    /// Single translation point from engine errors to what the caller sees.
    pub fn to_rpc_status(&self) -> RpcStatus {
        RpcStatus {
            code: self.status_code(),
            error_code: self.error_code().to_string(),
            message: self.to_string(),
        }
    }
}
