//! Usage: Graceful drain: stop accepting new invocations and wait for active ones to finish.

use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::gateway::errors::GatewayError;
use crate::shared::mutex_ext::MutexExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainSnapshot {
    pub active_requests: usize,
    pub draining: bool,
    pub active_at_drain_start: usize,
}

#[derive(Debug, Default)]
struct DrainState {
    active_requests: usize,
    draining: bool,
    active_at_drain_start: usize,
    notified: bool,
}

#[derive(Debug)]
pub struct DrainController {
    state: Mutex<DrainState>,
    drained_tx: watch::Sender<bool>,
}

/// Held for the lifetime of one invocation; dropping it ends the request.
#[derive(Debug)]
pub struct DrainTicket {
    controller: Arc<DrainController>,
}

impl Drop for DrainTicket {
    fn drop(&mut self) {
        self.controller.end_request();
    }
}

impl Default for DrainController {
    fn default() -> Self {
        Self::new()
    }
}

impl DrainController {
    pub fn new() -> Self {
        let (drained_tx, _rx) = watch::channel(false);
        Self {
            state: Mutex::new(DrainState::default()),
            drained_tx,
        }
    }

    pub fn begin_request(self: &Arc<Self>) -> Result<DrainTicket, GatewayError> {
        let mut state = self.state.lock_or_recover();
        if state.draining {
            return Err(GatewayError::Draining);
        }
        state.active_requests += 1;
        Ok(DrainTicket {
            controller: Arc::clone(self),
        })
    }

    fn end_request(&self) {
        let mut state = self.state.lock_or_recover();
        state.active_requests = state.active_requests.saturating_sub(1);
        self.notify_if_drained(&mut state);
    }

    // Fires at most once per controller.
    fn notify_if_drained(&self, state: &mut DrainState) {
        if state.draining && state.active_requests == 0 && !state.notified {
            state.notified = true;
            self.drained_tx.send_replace(true);
            tracing::info!(
                active_at_drain_start = state.active_at_drain_start,
                "gateway drained"
            );
        }
    }

    /// Refuse new requests and resolve once every active request has ended.
    /// Safe to call more than once; later calls just wait.
    pub async fn drain(&self) {
        let mut drained = {
            let mut state = self.state.lock_or_recover();
            if !state.draining {
                state.draining = true;
                state.active_at_drain_start = state.active_requests;
                tracing::info!(
                    active_requests = state.active_requests,
                    "gateway drain started"
                );
            }
            self.notify_if_drained(&mut state);
            self.drained_tx.subscribe()
        };

        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = drained.wait_for(|done| *done).await;
    }

    pub fn is_draining(&self) -> bool {
        self.state.lock_or_recover().draining
    }

    pub fn snapshot(&self) -> DrainSnapshot {
        let state = self.state.lock_or_recover();
        DrainSnapshot {
            active_requests: state.active_requests,
            draining: state.draining,
            active_at_drain_start: state.active_at_drain_start,
        }
    }
}
