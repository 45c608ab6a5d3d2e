//! Usage: Response emission: drains helper responses into the caller stream and worker outboxes.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

use super::SessionContext;
use crate::gateway::bypass::{BypassBuffer, YieldOutcome};
use crate::gateway::errors::GatewayError;
use crate::gateway::helper::{FindWorkerQuery, HelperResponse};
use crate::gateway::messages::{
    DialBackOutbound, OutboundMessage, ProxyInitiate, TraceContext, WorkloadDescriptor,
};
use crate::gateway::routing::WorkerBinding;

pub(super) async fn run(
    ctx: Arc<SessionContext>,
    mut responses: mpsc::Receiver<HelperResponse>,
) -> Result<(), GatewayError> {
    while let Some(response) = responses.recv().await {
        ctx.activity.touch();
        tracing::trace!(kind = response.kind(), "helper response");

        match response {
            HelperResponse::ResponseChunk { payload, is_final } => {
                ctx.send_to_caller(OutboundMessage::ResponseChunk {
                    encrypted_payload: payload,
                    is_final,
                })
                .await?;
            }
            HelperResponse::FailureReport { reason } => {
                if ctx.gateway.hot_config.current().propagate_helper_failures {
                    return Err(GatewayError::HelperFailure(reason));
                }
                tracing::warn!(reason = %reason, "helper reported failure (absorbed)");
            }
            HelperResponse::FindWorker(query) => handle_find_worker(&ctx, query).await?,
            HelperResponse::WorkerError { worker_id } => {
                tracing::warn!(worker_id = %worker_id, "helper reported worker error");
                match ctx.binding_for(&worker_id) {
                    Some(binding) => {
                        binding.outbox.finish();
                        ctx.gateway.routing.unlink(&worker_id);
                    }
                    None => {
                        tracing::debug!(worker_id = %worker_id, "worker error for a binding this session no longer owns");
                    }
                }
                ctx.send_to_caller(OutboundMessage::ProxyWorkerError { task_id: worker_id })
                    .await?;
            }
            HelperResponse::WorkerMessage { worker_id, message } => {
                match ctx.binding_for(&worker_id) {
                    Some(binding) => {
                        let outcome = binding
                            .outbox
                            .yield_message(DialBackOutbound::ProxyToCompute(message));
                        if outcome == YieldOutcome::Terminated {
                            tracing::debug!(worker_id = %worker_id, "worker outbox closed; message dropped");
                        }
                    }
                    None => {
                        tracing::warn!(worker_id = %worker_id, "message for unlinked worker dropped");
                    }
                }
            }
            HelperResponse::WorkerRequestsComplete { worker_id } => {
                if let Some(binding) = ctx.binding_for(&worker_id) {
                    binding.outbox.finish();
                }
            }
        }
    }

    tracing::debug!("helper response stream ended");
    Ok(())
}

async fn handle_find_worker(
    ctx: &Arc<SessionContext>,
    query: FindWorkerQuery,
) -> Result<(), GatewayError> {
    if !ctx.gateway.settings.proxy_mode {
        return Err(GatewayError::UnexpectedFindWorker);
    }

    let bypassed_requests = ctx.claim_bypassed_requests();
    let forward_bypassed_request_chunks = bypassed_requests.is_some();
    let outbox: Arc<BypassBuffer<DialBackOutbound>> = Arc::default();
    let binding = WorkerBinding {
        session_id: ctx.session_id.clone(),
        helper: Arc::clone(&ctx.helper),
        caller_sink: ctx.caller_sink.clone(),
        outbox: Arc::clone(&outbox),
        bypassed_requests,
        activity: ctx.activity.clone(),
        linked_at: Instant::now(),
    };

    ctx.gateway.routing.link(query.worker_id.clone(), binding);
    if !ctx.record_linked_worker(query.worker_id.clone(), Arc::clone(&outbox)) {
        // Session already torn down; nothing else will remove this binding.
        outbox.finish();
        if ctx.binding_for(&query.worker_id).is_some() {
            ctx.gateway.routing.unlink(&query.worker_id);
        }
        return Err(GatewayError::Cancelled { by_caller: false });
    }

    tracing::info!(
        worker_id = %query.worker_id,
        service = %query.service_name,
        forward_bypassed_request_chunks,
        "linked worker for find-worker request"
    );

    let trace_id = ctx
        .trace_context
        .get()
        .map(|trace| trace.trace_id.clone())
        .unwrap_or_default();
    ctx.send_to_caller(OutboundMessage::InvokeProxyInitiate(ProxyInitiate {
        task_id: query.worker_id,
        workload: WorkloadDescriptor {
            kind: query.service_name,
            parameters: query.routing_parameters,
        },
        trace_context: TraceContext {
            trace_id,
            span_id: query.span_id,
        },
        response_bypass_mode: query.response_bypass_mode,
        forward_bypassed_request_chunks,
    }))
    .await
}
