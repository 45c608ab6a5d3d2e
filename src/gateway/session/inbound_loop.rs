//! Usage: Request ingestion: validates caller messages in order and hands them to the helper.

use futures_core::Stream;
use std::sync::Arc;

use super::SessionContext;
use crate::gateway::admission::CumulativeByteLimiter;
use crate::gateway::bypass::YieldOutcome;
use crate::gateway::errors::{GatewayError, TransportError};
use crate::gateway::helper::{HelperParameters, HelperRequest, RequestBypassMode};
use crate::gateway::messages::{
    Capabilities, DialBackOutbound, InboundMessage, OutboundMessage, ProxyToComputeMessage,
    WorkloadParameters,
};
use crate::gateway::protocol::{InboundEnd, InboundStateMachine};
use crate::gateway::streams::next_item;

pub(super) async fn run<S>(ctx: Arc<SessionContext>, mut inbound: S) -> Result<(), GatewayError>
where
    S: Stream<Item = Result<InboundMessage, TransportError>> + Unpin,
{
    let mut machine = InboundStateMachine::new();
    // Ceiling is fixed for the session even if the hot config changes mid-request.
    let mut limiter =
        CumulativeByteLimiter::new(ctx.gateway.hot_config.current().max_cumulative_request_bytes);

    while let Some(item) = next_item(&mut inbound).await {
        let message = item?;
        ctx.activity.touch();
        machine.receive(&message)?;
        tracing::trace!(kind = message.kind(), state = machine.state().as_str(), "inbound message");

        match message {
            InboundMessage::Setup => {
                ctx.helper.wait_for_warmup_complete().await?;
                let proxy = ctx.gateway.settings.proxy_mode;
                ctx.send_to_caller(OutboundMessage::SetupAck {
                    capabilities: Capabilities {
                        proxy,
                        request_bypass: proxy,
                    },
                })
                .await?;
            }
            InboundMessage::Parameters(params) => handle_parameters(&ctx, params).await?,
            InboundMessage::RequestChunk(chunk) => {
                limiter.record(chunk.encrypted_payload.len())?;
                match ctx.bypassed_requests.get() {
                    Some(bypassed) => {
                        let outcome = bypassed.yield_message(DialBackOutbound::ProxyToCompute(
                            ProxyToComputeMessage::RequestChunk {
                                encrypted_payload: chunk.encrypted_payload,
                                is_final: chunk.is_final,
                            },
                        ));
                        log_dropped_bypass(outcome, "request_chunk");
                    }
                    None => {
                        ctx.helper
                            .invoke_workload_request(HelperRequest::RequestChunk {
                                payload: chunk.encrypted_payload,
                                is_final: chunk.is_final,
                            })
                            .await?;
                    }
                }
            }
            InboundMessage::Terminate(notice) => {
                tracing::info!(
                    code = notice.code,
                    reason = notice.reason.as_deref().unwrap_or(""),
                    "caller terminated the request"
                );
                if let Some(bypassed) = ctx.bypassed_requests.get() {
                    log_dropped_bypass(bypassed.yield_message(DialBackOutbound::Close), "terminate");
                }
                ctx.helper.teardown().await;
            }
        }
    }

    let end = machine.received_eof()?;
    if let Some(bypassed) = ctx.bypassed_requests.get() {
        bypassed.finish();
    }
    match end {
        InboundEnd::Completed => tracing::debug!("request stream completed"),
        InboundEnd::Aborted => tracing::debug!("request stream ended after termination"),
    }
    Ok(())
}

async fn handle_parameters(
    ctx: &SessionContext,
    params: WorkloadParameters,
) -> Result<(), GatewayError> {
    let bypass_mode = RequestBypassMode::from_flags(params.request_bypassed, params.request_nack);
    let settings = &ctx.gateway.settings;
    if settings.proxy_mode && settings.enforce_request_bypass && !bypass_mode.is_bypass() {
        return Err(GatewayError::RequestBypassRequired);
    }

    let _ = ctx.trace_context.set(params.trace_context.clone());
    if bypass_mode.is_bypass() {
        let _ = ctx.bypassed_requests.set(Arc::default());
    }

    tracing::info!(
        request_id = %params.request_id,
        workload = %params.workload.kind,
        bypass_mode = ?bypass_mode,
        "received workload parameters"
    );

    ctx.helper
        .invoke_workload_request(HelperRequest::Parameters(HelperParameters {
            request_id: params.request_id,
            one_time_token: params.one_time_token,
            wrapped_key: params.decryption_key,
            tenant_info: params.tenant_info,
            workload: params.workload,
            bypass_mode,
            trace_context: params.trace_context,
        }))
        .await
}

fn log_dropped_bypass(outcome: YieldOutcome, kind: &'static str) {
    if outcome == YieldOutcome::Terminated {
        tracing::debug!(kind, "bypassed request forwarder already finished; message dropped");
    }
}
