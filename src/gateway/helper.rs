//! Usage: Narrow interface to the supervised job-helper process (launch, request relay, exit).

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::errors::GatewayError;
use super::messages::{
    ComputeToProxyMessage, DialBackClose, ProxyToComputeMessage, ResponseBypassMode,
    TraceContext, WorkloadDescriptor,
};
use super::types::WorkerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestBypassMode {
    None,
    Bypass,
    BypassWithNack,
}

impl RequestBypassMode {
    pub fn from_flags(request_bypassed: bool, request_nack: bool) -> Self {
        match (request_bypassed, request_nack) {
            (false, _) => Self::None,
            (true, false) => Self::Bypass,
            (true, true) => Self::BypassWithNack,
        }
    }

    pub fn is_bypass(self) -> bool {
        !matches!(self, Self::None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperParameters {
    pub request_id: String,
    pub one_time_token: Bytes,
    pub wrapped_key: Bytes,
    pub tenant_info: Option<String>,
    pub workload: WorkloadDescriptor,
    pub bypass_mode: RequestBypassMode,
    pub trace_context: TraceContext,
}

/// Messages the gateway hands to the helper.
///
/// Setup and termination notices from the caller are never forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelperRequest {
    Parameters(HelperParameters),
    RequestChunk {
        payload: Bytes,
        is_final: bool,
    },
    WorkerMessage {
        worker_id: WorkerId,
        message: ComputeToProxyMessage,
    },
    WorkerClosed {
        worker_id: WorkerId,
        close: DialBackClose,
    },
    WorkerEndOfStream {
        worker_id: WorkerId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindWorkerQuery {
    pub worker_id: WorkerId,
    pub service_name: String,
    pub routing_parameters: BTreeMap<String, Vec<String>>,
    pub response_bypass_mode: ResponseBypassMode,
    pub span_id: String,
}

/// Messages produced by the helper for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelperResponse {
    ResponseChunk {
        payload: Bytes,
        is_final: bool,
    },
    FailureReport {
        reason: String,
    },
    FindWorker(FindWorkerQuery),
    WorkerError {
        worker_id: WorkerId,
    },
    /// Traffic the helper wants delivered to a linked worker.
    WorkerMessage {
        worker_id: WorkerId,
        message: ProxyToComputeMessage,
    },
    /// The helper has nothing more to send to this worker.
    WorkerRequestsComplete {
        worker_id: WorkerId,
    },
}

impl HelperResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ResponseChunk { .. } => "response_chunk",
            Self::FailureReport { .. } => "failure_report",
            Self::FindWorker(_) => "find_worker",
            Self::WorkerError { .. } => "worker_error",
            Self::WorkerMessage { .. } => "worker_message",
            Self::WorkerRequestsComplete { .. } => "worker_requests_complete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelperExit {
    pub status: Option<i32>,
    /// False when the helper exited (or was reclaimed) without ever receiving parameters.
    pub used: bool,
}

#[async_trait]
pub trait JobHelper: Send + Sync {
    async fn invoke_workload_request(&self, request: HelperRequest) -> Result<(), GatewayError>;

    async fn wait_for_warmup_complete(&self) -> Result<(), GatewayError>;

    /// Resolves once the helper process is gone. With `return_if_not_used` the call returns
    /// immediately for a helper that never received a request.
    async fn wait_for_exit(&self, return_if_not_used: bool) -> HelperExit;

    /// Ask the helper to stop. Best-effort; exit is still observed via `wait_for_exit`.
    async fn teardown(&self);
}

pub struct HelperConnection {
    pub handle: Arc<dyn JobHelper>,
    pub responses: mpsc::Receiver<HelperResponse>,
}

#[async_trait]
pub trait JobHelperLauncher: Send + Sync {
    async fn launch(&self, session_id: &str) -> Result<HelperConnection, GatewayError>;
}
