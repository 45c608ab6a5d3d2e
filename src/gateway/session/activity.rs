//! Usage: Session activity clock and the idle-timeout watchdog that reads it.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::gateway::errors::GatewayError;
use crate::shared::mutex_ext::MutexExt;

/// Shared by every path that carries traffic for one session (inbound, outbound, dial-back).
#[derive(Debug, Clone)]
pub(in crate::gateway) struct ActivityClock {
    last: Arc<Mutex<Instant>>,
}

impl ActivityClock {
    pub(in crate::gateway) fn new() -> Self {
        Self {
            last: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub(in crate::gateway) fn touch(&self) {
        *self.last.lock_or_recover() = Instant::now();
    }

    fn last(&self) -> Instant {
        *self.last.lock_or_recover()
    }
}

/// Resolves with `IdleTimeoutExceeded` once `timeout` passes without a `touch`.
/// Never resolves otherwise; the orchestrator aborts it when the session completes.
pub(in crate::gateway) async fn idle_watchdog(
    clock: ActivityClock,
    timeout: Duration,
) -> Result<(), GatewayError> {
    loop {
        let deadline = clock.last() + timeout;
        if Instant::now() >= deadline {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "session idle timeout");
            return Err(GatewayError::IdleTimeoutExceeded(timeout));
        }
        tokio::time::sleep_until(deadline).await;
    }
}
