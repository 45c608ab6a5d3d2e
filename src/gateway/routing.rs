//! Usage: Worker routing table (worker id → the session/helper that asked for that worker).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;

use super::bypass::BypassBuffer;
use super::helper::JobHelper;
use super::messages::{DialBackOutbound, OutboundMessage};
use super::session::ActivityClock;
use super::types::WorkerId;
use crate::shared::mutex_ext::MutexExt;

/// Everything a dial-back exchange needs to relay traffic for one worker.
///
/// Cloning is cheap; clones share the same helper, sinks and buffers.
#[derive(Clone)]
pub struct WorkerBinding {
    pub(in crate::gateway) session_id: String,
    pub(in crate::gateway) helper: Arc<dyn JobHelper>,
    pub(in crate::gateway) caller_sink: mpsc::Sender<OutboundMessage>,
    /// Helper → worker traffic, buffered until the worker dials back.
    pub(in crate::gateway) outbox: Arc<BypassBuffer<DialBackOutbound>>,
    /// Present only for the worker chosen to receive the caller's bypassed request.
    pub(in crate::gateway) bypassed_requests: Option<Arc<BypassBuffer<DialBackOutbound>>>,
    pub(in crate::gateway) activity: ActivityClock,
    pub(in crate::gateway) linked_at: Instant,
}

impl fmt::Debug for WorkerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerBinding")
            .field("session_id", &self.session_id)
            .field("forwards_bypassed_requests", &self.bypassed_requests.is_some())
            .field("linked_at", &self.linked_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct WorkerRoutingTable {
    bindings: Mutex<HashMap<WorkerId, WorkerBinding>>,
}

impl WorkerRoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(&self, worker_id: WorkerId, binding: WorkerBinding) {
        let replaced = {
            let mut bindings = self.bindings.lock_or_recover();
            bindings.insert(worker_id.clone(), binding)
        };
        if let Some(previous) = replaced {
            tracing::error!(
                worker_id = %worker_id,
                previous_session_id = %previous.session_id,
                "worker id linked twice; previous binding replaced"
            );
        }
    }

    pub fn get_initiator(&self, worker_id: &WorkerId) -> Option<WorkerBinding> {
        self.bindings.lock_or_recover().get(worker_id).cloned()
    }

    /// Idempotent: returns false when the id was already unlinked (or never linked).
    pub fn unlink(&self, worker_id: &WorkerId) -> bool {
        self.bindings.lock_or_recover().remove(worker_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.bindings.lock_or_recover().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub(in crate::gateway) mod test_support {
    use async_trait::async_trait;

    use super::*;
    use crate::gateway::errors::GatewayError;
    use crate::gateway::helper::{HelperExit, HelperRequest};

    /// Helper stub for tests that only need a handle, never real traffic.
    pub(in crate::gateway) struct InertHelper;

    #[async_trait]
    impl JobHelper for InertHelper {
        async fn invoke_workload_request(&self, _request: HelperRequest) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn wait_for_warmup_complete(&self) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn wait_for_exit(&self, _return_if_not_used: bool) -> HelperExit {
            HelperExit {
                status: Some(0),
                used: false,
            }
        }

        async fn teardown(&self) {}
    }

    pub(in crate::gateway) fn binding(
        session_id: &str,
    ) -> (WorkerBinding, mpsc::Receiver<OutboundMessage>) {
        let (caller_sink, caller_rx) = mpsc::channel(8);
        let binding = WorkerBinding {
            session_id: session_id.to_string(),
            helper: Arc::new(InertHelper),
            caller_sink,
            outbox: Arc::new(BypassBuffer::new()),
            bypassed_requests: None,
            activity: ActivityClock::new(),
            linked_at: Instant::now(),
        };
        (binding, caller_rx)
    }
}
