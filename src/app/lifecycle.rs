//! Usage: Best-effort shutdown hook (drain in-flight sessions with a timeout).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::gateway::WorkloadGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Drained,
    TimedOut { active_requests: usize },
    AlreadyStarted,
}

/// Runs at most once per `started` flag; callers usually pass a process-wide static.
pub async fn shutdown_best_effort(
    started: &AtomicBool,
    gateway: &WorkloadGateway,
    timeout: Duration,
) -> ShutdownOutcome {
    if started.swap(true, Ordering::SeqCst) {
        return ShutdownOutcome::AlreadyStarted;
    }

    tracing::info!(
        timeout_ms = timeout.as_millis() as u64,
        active_requests = gateway.drain_snapshot().active_requests,
        "shutdown: draining gateway"
    );

    if tokio::time::timeout(timeout, gateway.drain()).await.is_err() {
        let active_requests = gateway.drain_snapshot().active_requests;
        tracing::warn!(active_requests, "shutdown: drain timed out");
        return ShutdownOutcome::TimedOut { active_requests };
    }

    tracing::info!("shutdown: gateway drained");
    ShutdownOutcome::Drained
}

/// Uses the gateway's configured drain timeout and a process-wide run-once flag.
pub async fn shutdown_gateway(gateway: &WorkloadGateway) -> ShutdownOutcome {
    static SHUTDOWN_STARTED: AtomicBool = AtomicBool::new(false);
    let timeout = gateway.settings().drain_timeout();
    shutdown_best_effort(&SHUTDOWN_STARTED, gateway, timeout).await
}
