//! Usage: Admission control (concurrency slots, pause/resume, health-driven capacity) + drain + byte limits.
//!
//! One `AdmissionController` exists per gateway. Its `LoadState` lives behind a single std
//! mutex that is never held across an `.await`; waiting for idle goes through a oneshot.

mod byte_limit;
mod drain;

pub use byte_limit::CumulativeByteLimiter;
pub use drain::{DrainController, DrainSnapshot, DrainTicket};

use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, watch};

use crate::gateway::errors::GatewayError;
use crate::shared::mutex_ext::MutexExt;

/// Capacity signal produced by the (external) health monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthSignal {
    Initializing,
    Unhealthy,
    Healthy { max_batch_size: usize },
}

impl HealthSignal {
    fn capacity(&self) -> usize {
        match self {
            Self::Healthy { max_batch_size } => *max_batch_size,
            Self::Initializing | Self::Unhealthy => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSnapshot {
    pub concurrent_requests: usize,
    pub max_concurrent_requests: usize,
    pub paused_reason: Option<String>,
    pub exceeded_count: u64,
}

#[derive(Debug)]
struct LoadState {
    concurrent_requests: usize,
    max_concurrent_requests: usize,
    // Last capacity reported by health; restored on resume.
    healthy_max: usize,
    paused_reason: Option<String>,
    idle_waiter: Option<oneshot::Sender<()>>,
    exceeded_count: u64,
}

#[derive(Debug)]
pub struct AdmissionController {
    state: Mutex<LoadState>,
    enforce_limit: bool,
    concurrency_tx: watch::Sender<usize>,
}

impl AdmissionController {
    pub fn new(initial_max_concurrent_requests: usize, enforce_limit: bool) -> Self {
        let (concurrency_tx, _rx) = watch::channel(0usize);
        Self {
            state: Mutex::new(LoadState {
                concurrent_requests: 0,
                max_concurrent_requests: initial_max_concurrent_requests,
                healthy_max: initial_max_concurrent_requests,
                paused_reason: None,
                idle_waiter: None,
                exceeded_count: 0,
            }),
            enforce_limit,
            concurrency_tx,
        }
    }

    /// Reserve one concurrency slot. Pair every `Ok` with exactly one `release`.
    pub fn reserve(&self) -> Result<(), GatewayError> {
        let mut state = self.state.lock_or_recover();

        if state.concurrent_requests >= state.max_concurrent_requests {
            state.exceeded_count = state.exceeded_count.saturating_add(1);
            tracing::warn!(
                concurrent_requests = state.concurrent_requests,
                max_concurrent_requests = state.max_concurrent_requests,
                enforce = self.enforce_limit,
                "max concurrent requests exceeded"
            );

            if self.enforce_limit {
                if state.max_concurrent_requests == 0 {
                    return Err(match state.paused_reason.as_ref() {
                        Some(reason) => GatewayError::WorkloadBusy(reason.clone()),
                        None => GatewayError::WorkloadUnhealthy,
                    });
                }
                return Err(GatewayError::MaxConcurrentRequestsExceeded {
                    max: state.max_concurrent_requests,
                });
            }
        }

        state.concurrent_requests += 1;
        self.concurrency_tx.send_replace(state.concurrent_requests);
        Ok(())
    }

    /// Give back a slot. Only call once the helper bound to the slot is known to have exited.
    pub fn release(&self) {
        let waiter = {
            let mut state = self.state.lock_or_recover();
            if state.concurrent_requests == 0 {
                tracing::error!("admission release without a matching reservation");
                return;
            }
            state.concurrent_requests -= 1;
            self.concurrency_tx.send_replace(state.concurrent_requests);
            if state.concurrent_requests == 0 {
                state.idle_waiter.take()
            } else {
                None
            }
        };

        if let Some(waiter) = waiter {
            let _ = waiter.send(());
        }
    }

    /// Stop admitting work and wait until every in-flight request has released its slot.
    pub async fn pause(&self, reason: impl Into<String>) -> Result<(), GatewayError> {
        let reason = reason.into();
        let idle = {
            let mut state = self.state.lock_or_recover();
            if state
                .idle_waiter
                .as_ref()
                .is_some_and(|waiter| !waiter.is_closed())
            {
                return Err(GatewayError::AlreadyWaitingForIdle);
            }

            tracing::info!(
                reason = %reason,
                concurrent_requests = state.concurrent_requests,
                "pausing workload admission"
            );
            state.max_concurrent_requests = 0;
            state.paused_reason = Some(reason);

            if state.concurrent_requests == 0 {
                state.idle_waiter = None;
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            state.idle_waiter = Some(tx);
            rx
        };

        idle.await
            .map_err(|_| GatewayError::Internal("idle waiter dropped".to_string()))
    }

    pub fn resume(&self) {
        let mut state = self.state.lock_or_recover();
        if state.paused_reason.take().is_some() {
            state.max_concurrent_requests = state.healthy_max;
            tracing::info!(
                max_concurrent_requests = state.max_concurrent_requests,
                "resumed workload admission"
            );
        }
    }

    pub fn apply_health(&self, signal: &HealthSignal) {
        let mut state = self.state.lock_or_recover();
        state.healthy_max = signal.capacity();
        if state.paused_reason.is_none() {
            state.max_concurrent_requests = state.healthy_max;
        }
        tracing::debug!(
            ?signal,
            max_concurrent_requests = state.max_concurrent_requests,
            "applied workload health signal"
        );
    }

    /// Keep `max_concurrent_requests` in sync with the health monitor until its sender is dropped.
    pub fn watch_health(
        self: &Arc<Self>,
        mut health: watch::Receiver<HealthSignal>,
    ) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let current = health.borrow_and_update().clone();
            this.apply_health(&current);
            while health.changed().await.is_ok() {
                let signal = health.borrow_and_update().clone();
                this.apply_health(&signal);
            }
            tracing::debug!("health signal source closed");
        })
    }

    pub fn subscribe_concurrency(&self) -> watch::Receiver<usize> {
        self.concurrency_tx.subscribe()
    }

    pub fn snapshot(&self) -> LoadSnapshot {
        let state = self.state.lock_or_recover();
        LoadSnapshot {
            concurrent_requests: state.concurrent_requests,
            max_concurrent_requests: state.max_concurrent_requests,
            paused_reason: state.paused_reason.clone(),
            exceeded_count: state.exceeded_count,
        }
    }
}
