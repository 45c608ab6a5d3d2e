//! Usage: Wire message shapes for the primary invocation stream and the worker dial-back stream.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::WorkerId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadDescriptor {
    pub kind: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadParameters {
    pub request_id: String,
    pub one_time_token: Bytes,
    pub decryption_key: Bytes,
    #[serde(default)]
    pub tenant_info: Option<String>,
    pub workload: WorkloadDescriptor,
    #[serde(default)]
    pub request_bypassed: bool,
    #[serde(default)]
    pub request_nack: bool,
    #[serde(default)]
    pub trace_context: TraceContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestChunk {
    pub encrypted_payload: Bytes,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationNotice {
    pub code: i32,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Caller → gateway messages on the primary stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Setup,
    Parameters(WorkloadParameters),
    RequestChunk(RequestChunk),
    Terminate(TerminationNotice),
}

impl InboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Parameters(_) => "parameters",
            Self::RequestChunk(_) => "request_chunk",
            Self::Terminate(_) => "terminate",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub proxy: bool,
    pub request_bypass: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseBypassMode {
    #[default]
    None,
    MatchRequestCiphersuiteSharedAeadState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyInitiate {
    pub task_id: WorkerId,
    pub workload: WorkloadDescriptor,
    pub trace_context: TraceContext,
    pub response_bypass_mode: ResponseBypassMode,
    pub forward_bypassed_request_chunks: bool,
}

/// Gateway → caller messages on the primary stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    SetupAck { capabilities: Capabilities },
    ResponseChunk { encrypted_payload: Bytes, is_final: bool },
    InvokeProxyInitiate(ProxyInitiate),
    ProxyWorkerError { task_id: WorkerId },
}

/// Worker traffic arriving at the proxy over the dial-back stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComputeToProxyMessage {
    Attestation { bundle: Bytes },
    ResponseChunk { encrypted_payload: Bytes, is_final: bool },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialBackClose {
    #[serde(default)]
    pub grpc_status: Option<i32>,
    #[serde(default)]
    pub grpc_message: Option<String>,
    #[serde(default)]
    pub ropes_error_code: Option<u32>,
    #[serde(default)]
    pub ropes_error_description: Option<String>,
}

/// Caller's gateway → proxy messages on the dial-back stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DialBackInbound {
    Initiate { task_id: WorkerId },
    ComputeToProxy(ComputeToProxyMessage),
    Close(DialBackClose),
}

impl DialBackInbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initiate { .. } => "initiate",
            Self::ComputeToProxy(_) => "compute_to_proxy",
            Self::Close(_) => "close",
        }
    }
}

/// Traffic the proxy sends toward the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProxyToComputeMessage {
    DecryptionKey { key: Bytes },
    RequestChunk { encrypted_payload: Bytes, is_final: bool },
}

/// Proxy → caller's gateway messages on the dial-back stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DialBackOutbound {
    ProxyToCompute(ProxyToComputeMessage),
    Close,
}
