//! Usage: Worker dial-back exchange (worker id registration, relay to/from the owning helper).
//!
//! Failures here end only this exchange; the session that linked the worker keeps running and
//! is told about the failure with a `ProxyWorkerError`.

use futures_core::Stream;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::errors::{GatewayError, TransportError};
use super::helper::HelperRequest;
use super::messages::{DialBackInbound, DialBackOutbound, OutboundMessage};
use super::protocol::DialBackStateMachine;
use super::routing::{WorkerBinding, WorkerRoutingTable};
use super::session::ActivityClock;
use super::streams::next_item;
use super::types::WorkerId;
use super::GatewayShared;

pub(in crate::gateway) async fn run_dial_back<S>(
    gateway: Arc<GatewayShared>,
    inbound: S,
    outbound: mpsc::Sender<DialBackOutbound>,
) -> Result<(), GatewayError>
where
    S: Stream<Item = Result<DialBackInbound, TransportError>> + Send + Unpin + 'static,
{
    if !gateway.settings.proxy_mode {
        return Err(GatewayError::WorkerNotProxyCapable);
    }

    let span = tracing::info_span!(
        "dial_back",
        worker_id = tracing::field::Empty,
        session_id = tracing::field::Empty
    );
    async move {
        let mut exchange = DialBackExchange::new(Arc::clone(&gateway.routing));
        let result = exchange.run(inbound, &outbound).await;
        if let Err(err) = &result {
            exchange.fail(err);
        }
        result
    }
    .instrument(span)
    .await
}

struct DialBackExchange {
    routing: Arc<WorkerRoutingTable>,
    machine: DialBackStateMachine<WorkerBinding>,
    binding: Option<WorkerBinding>,
    unlink: Option<UnlinkGuard>,
    relay: Option<RelayTask>,
}

impl DialBackExchange {
    fn new(routing: Arc<WorkerRoutingTable>) -> Self {
        Self {
            routing,
            machine: DialBackStateMachine::new(),
            binding: None,
            unlink: None,
            relay: None,
        }
    }

    async fn run<S>(
        &mut self,
        mut inbound: S,
        outbound: &mpsc::Sender<DialBackOutbound>,
    ) -> Result<(), GatewayError>
    where
        S: Stream<Item = Result<DialBackInbound, TransportError>> + Unpin,
    {
        while let Some(item) = next_item(&mut inbound).await {
            let message = item?;
            tracing::trace!(kind = message.kind(), "dial-back message");

            match message {
                DialBackInbound::Initiate { task_id } => self.initiate(task_id, outbound)?,
                DialBackInbound::ComputeToProxy(message) => {
                    let (worker_id, binding) = self.machine.received_message()?;
                    binding.activity.touch();
                    binding
                        .helper
                        .invoke_workload_request(HelperRequest::WorkerMessage { worker_id, message })
                        .await?;
                }
                DialBackInbound::Close(close) => {
                    let (worker_id, binding) = self.machine.received_close()?;
                    binding.activity.touch();
                    tracing::info!(
                        grpc_status = ?close.grpc_status,
                        ropes_error_code = ?close.ropes_error_code,
                        "worker closed its stream"
                    );
                    binding
                        .helper
                        .invoke_workload_request(HelperRequest::WorkerClosed { worker_id, close })
                        .await?;
                }
            }
        }

        let (worker_id, binding) = self.machine.received_eof()?;
        binding.activity.touch();
        binding
            .helper
            .invoke_workload_request(HelperRequest::WorkerEndOfStream { worker_id })
            .await?;

        // Keep the binding until helper traffic for this worker has been flushed.
        if let Some(relay) = self.relay.take() {
            relay.finish().await;
        }
        tracing::debug!("dial-back exchange completed");
        Ok(())
    }

    fn initiate(
        &mut self,
        worker_id: WorkerId,
        outbound: &mpsc::Sender<DialBackOutbound>,
    ) -> Result<(), GatewayError> {
        self.machine.accepts_worker_id()?;
        let binding = self
            .routing
            .get_initiator(&worker_id)
            .ok_or_else(|| GatewayError::UnknownWorkerId(worker_id.clone()))?;

        // Connecting the outbox claims the worker. Until then this exchange owns nothing,
        // so a rejected duplicate leaves the live exchange untouched.
        let (tx, rx) = mpsc::unbounded_channel();
        if binding.outbox.connect(tx.clone()).is_err() {
            tracing::warn!(worker_id = %worker_id, "worker already has a live dial-back exchange");
            return Err(GatewayError::WorkerAlreadyConnected(worker_id));
        }

        self.unlink = Some(UnlinkGuard {
            routing: Arc::clone(&self.routing),
            worker_id: worker_id.clone(),
        });
        self.binding = Some(binding.clone());
        self.relay = Some(RelayTask::spawn(
            rx,
            outbound.clone(),
            binding.activity.clone(),
        ));
        self.machine
            .received_worker_id(worker_id.clone(), binding.clone())?;

        let span = tracing::Span::current();
        span.record("worker_id", tracing::field::display(&worker_id));
        span.record("session_id", binding.session_id.as_str());
        tracing::info!(
            find_worker_latency_ms = binding.linked_at.elapsed().as_millis() as u64,
            forward_bypassed_request_chunks = binding.bypassed_requests.is_some(),
            "worker dialed back"
        );
        binding.activity.touch();

        if let Some(bypassed) = &binding.bypassed_requests {
            bypassed
                .connect(tx)
                .map_err(|e| GatewayError::Internal(format!("bypassed request forwarder: {e}")))?;
        }
        Ok(())
    }

    fn fail(&mut self, err: &GatewayError) {
        tracing::warn!(
            error_code = err.error_code(),
            category = err.category().as_str(),
            "dial-back exchange failed: {err}"
        );
        self.relay = None;

        let Some(binding) = self.binding.take() else {
            return;
        };
        binding.outbox.finish();
        if let Some(worker_id) = self.unlink.as_ref().map(|guard| guard.worker_id.clone()) {
            if binding
                .caller_sink
                .try_send(OutboundMessage::ProxyWorkerError { task_id: worker_id })
                .is_err()
            {
                tracing::debug!("could not notify caller about failed worker exchange");
            }
        }
    }
}

struct UnlinkGuard {
    routing: Arc<WorkerRoutingTable>,
    worker_id: WorkerId,
}

impl Drop for UnlinkGuard {
    fn drop(&mut self) {
        if self.routing.unlink(&self.worker_id) {
            tracing::debug!(worker_id = %self.worker_id, "worker binding removed");
        }
    }
}

/// Forwards helper (and bypassed caller) traffic to the worker. Aborted when dropped.
struct RelayTask {
    handle: JoinHandle<()>,
}

impl RelayTask {
    fn spawn(
        rx: mpsc::UnboundedReceiver<DialBackOutbound>,
        outbound: mpsc::Sender<DialBackOutbound>,
        activity: ActivityClock,
    ) -> Self {
        let handle = tokio::spawn(relay_to_worker(rx, outbound, activity).in_current_span());
        Self { handle }
    }

    async fn finish(mut self) {
        if let Err(err) = (&mut self.handle).await {
            if !err.is_cancelled() {
                tracing::error!("dial-back relay task panicked: {err}");
            }
        }
    }
}

impl Drop for RelayTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn relay_to_worker(
    mut rx: mpsc::UnboundedReceiver<DialBackOutbound>,
    outbound: mpsc::Sender<DialBackOutbound>,
    activity: ActivityClock,
) {
    while let Some(message) = rx.recv().await {
        let is_close = matches!(message, DialBackOutbound::Close);
        if outbound.send(message).await.is_err() {
            tracing::debug!("dial-back peer stopped reading; relay ended");
            return;
        }
        activity.touch();
        if is_close {
            return;
        }
    }

    let _ = outbound.send(DialBackOutbound::Close).await;
}
