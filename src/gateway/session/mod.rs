//! Usage: Per-invocation session orchestration (four concurrent tasks + completion + cleanup).
//!
//! A session runs request ingestion, an optional idle watchdog, a helper-exit watcher and
//! response emission in one `JoinSet`. It completes once the helper has exited *and* response
//! emission is done; any task error fails the session. Either way every remaining task is
//! aborted, worker bindings are unlinked and the admission slot is released once helper exit
//! is confirmed (possibly from a detached monitor).

mod activity;
mod completion;
mod inbound_loop;
mod outbound_loop;
mod slot_guard;

pub(in crate::gateway) use activity::ActivityClock;

use futures_core::Stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::Instrument;

use super::bypass::BypassBuffer;
use super::errors::{GatewayError, TransportError};
use super::helper::{HelperConnection, HelperResponse, JobHelper};
use super::messages::{DialBackOutbound, InboundMessage, OutboundMessage, TraceContext};
use super::routing::WorkerBinding;
use super::types::WorkerId;
use super::GatewayShared;
use crate::shared::ids::new_session_id;
use crate::shared::mutex_ext::MutexExt;
use completion::{CompletionState, CompletionTracker, SessionTask};
use slot_guard::SlotGuard;

pub(in crate::gateway) struct SessionContext {
    session_id: String,
    gateway: Arc<GatewayShared>,
    helper: Arc<dyn JobHelper>,
    caller_sink: mpsc::Sender<OutboundMessage>,
    activity: ActivityClock,
    trace_context: OnceLock<TraceContext>,
    /// Set once parameters ask for request bypass.
    bypassed_requests: OnceLock<Arc<BypassBuffer<DialBackOutbound>>>,
    bypassed_requests_claimed: AtomicBool,
    /// `None` once the session has torn its workers down.
    linked_workers: Mutex<Option<Vec<(WorkerId, Arc<BypassBuffer<DialBackOutbound>>)>>>,
}

impl SessionContext {
    fn new(
        session_id: String,
        gateway: Arc<GatewayShared>,
        helper: Arc<dyn JobHelper>,
        caller_sink: mpsc::Sender<OutboundMessage>,
    ) -> Self {
        Self {
            session_id,
            gateway,
            helper,
            caller_sink,
            activity: ActivityClock::new(),
            trace_context: OnceLock::new(),
            bypassed_requests: OnceLock::new(),
            bypassed_requests_claimed: AtomicBool::new(false),
            linked_workers: Mutex::new(Some(Vec::new())),
        }
    }

    async fn send_to_caller(&self, message: OutboundMessage) -> Result<(), GatewayError> {
        self.caller_sink
            .send(message)
            .await
            .map_err(|_| GatewayError::Cancelled { by_caller: true })?;
        self.activity.touch();
        Ok(())
    }

    /// The first worker asked for receives the caller's bypassed request; later ones don't.
    fn claim_bypassed_requests(&self) -> Option<Arc<BypassBuffer<DialBackOutbound>>> {
        let bypassed = self.bypassed_requests.get()?;
        if self.bypassed_requests_claimed.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(Arc::clone(bypassed))
    }

    /// Returns false when teardown already ran; the caller must undo its link.
    fn record_linked_worker(
        &self,
        worker_id: WorkerId,
        outbox: Arc<BypassBuffer<DialBackOutbound>>,
    ) -> bool {
        match self.linked_workers.lock_or_recover().as_mut() {
            Some(linked) => {
                linked.push((worker_id, outbox));
                true
            }
            None => false,
        }
    }

    /// Binding for `worker_id`, only if it still belongs to this session.
    fn binding_for(&self, worker_id: &WorkerId) -> Option<WorkerBinding> {
        self.gateway
            .routing
            .get_initiator(worker_id)
            .filter(|binding| binding.session_id == self.session_id)
    }

    fn teardown_workers(&self) {
        if let Some(bypassed) = self.bypassed_requests.get() {
            bypassed.finish();
        }

        let linked = self.linked_workers.lock_or_recover().take().unwrap_or_default();
        let mut unlinked = 0usize;
        for (worker_id, outbox) in &linked {
            outbox.finish();
            // A later session may have reused the id; only remove our own binding.
            if self.binding_for(worker_id).is_some() && self.gateway.routing.unlink(worker_id) {
                unlinked += 1;
            }
        }
        if unlinked > 0 {
            tracing::debug!(unlinked, "removed worker bindings at session end");
        }
    }
}

/// Finishes outboxes and unlinks this session's workers, even when the session future is dropped.
struct WorkerTeardown {
    ctx: Arc<SessionContext>,
}

impl Drop for WorkerTeardown {
    fn drop(&mut self) {
        self.ctx.teardown_workers();
    }
}

type TaskOutcome = (SessionTask, Result<(), GatewayError>);

pub(in crate::gateway) async fn run_session<S>(
    gateway: Arc<GatewayShared>,
    inbound: S,
    caller_sink: mpsc::Sender<OutboundMessage>,
) -> Result<(), GatewayError>
where
    S: Stream<Item = Result<InboundMessage, TransportError>> + Send + Unpin + 'static,
{
    let _drain_ticket = gateway.drain.begin_request()?;
    gateway.admission.reserve()?;

    let session_id = new_session_id();
    let mut slot = SlotGuard::new(Arc::clone(&gateway.admission), session_id.clone());
    let span = tracing::info_span!("session", session_id = %session_id);

    async move {
        let started = Instant::now();
        let HelperConnection { handle, responses } =
            match gateway.launcher.launch(&session_id).await {
                Ok(connection) => connection,
                Err(err) => {
                    tracing::warn!(error_code = err.error_code(), "helper launch failed: {err}");
                    return Err(err);
                }
            };
        slot.bind_helper(Arc::clone(&handle));

        let ctx = Arc::new(SessionContext::new(
            session_id,
            Arc::clone(&gateway),
            handle,
            caller_sink,
        ));

        let worker_teardown = WorkerTeardown {
            ctx: Arc::clone(&ctx),
        };

        let (result, helper_exited) = orchestrate(&ctx, inbound, responses).await;
        drop(worker_teardown);

        if helper_exited {
            slot.release_now();
        } else {
            drop(slot);
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => tracing::info!(elapsed_ms, "session completed"),
            Err(err) if err.is_client_cancellation() => {
                tracing::info!(elapsed_ms, error_code = err.error_code(), "session cancelled by caller")
            }
            Err(err) => tracing::warn!(
                elapsed_ms,
                error_code = err.error_code(),
                category = err.category().as_str(),
                "session failed: {err}"
            ),
        }
        result
    }
    .instrument(span)
    .await
}

async fn orchestrate<S>(
    ctx: &Arc<SessionContext>,
    inbound: S,
    responses: mpsc::Receiver<HelperResponse>,
) -> (Result<(), GatewayError>, bool)
where
    S: Stream<Item = Result<InboundMessage, TransportError>> + Send + Unpin + 'static,
{
    let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();

    let task_ctx = Arc::clone(ctx);
    tasks.spawn(
        async move {
            (
                SessionTask::RequestIngestion,
                inbound_loop::run(task_ctx, inbound).await,
            )
        }
        .in_current_span(),
    );

    if let Some(timeout) = ctx.gateway.settings.idle_timeout() {
        let clock = ctx.activity.clone();
        tasks.spawn(
            async move {
                (
                    SessionTask::IdleWatchdog,
                    activity::idle_watchdog(clock, timeout).await,
                )
            }
            .in_current_span(),
        );
    }

    let helper = Arc::clone(&ctx.helper);
    tasks.spawn(
        async move {
            let exit = helper.wait_for_exit(false).await;
            tracing::debug!(status = ?exit.status, used = exit.used, "helper exited");
            (SessionTask::HelperExit, Ok(()))
        }
        .in_current_span(),
    );

    let task_ctx = Arc::clone(ctx);
    tasks.spawn(
        async move {
            (
                SessionTask::ResponseEmission,
                outbound_loop::run(task_ctx, responses).await,
            )
        }
        .in_current_span(),
    );

    let mut tracker = CompletionTracker::new();
    let mut helper_exited = false;
    let result = loop {
        let Some(joined) = tasks.join_next().await else {
            break Ok(());
        };
        match joined {
            Ok((task, Ok(()))) => {
                tracing::debug!(task = task.as_str(), "session task finished");
                if task == SessionTask::HelperExit {
                    helper_exited = true;
                }
                if tracker.record(task) == CompletionState::Completed {
                    break Ok(());
                }
            }
            Ok((task, Err(err))) => {
                tracing::debug!(task = task.as_str(), error_code = err.error_code(), "session task failed");
                break Err(err);
            }
            // Only this controller aborts session tasks.
            Err(join_err) if join_err.is_cancelled() => {
                break Err(GatewayError::Cancelled { by_caller: false });
            }
            Err(join_err) => {
                break Err(GatewayError::Internal(format!("session task panicked: {join_err}")));
            }
        }
    };

    tasks.shutdown().await;
    (result, helper_exited)
}
