//! Usage: Drop guard that returns a session's admission slot only after its helper has exited.

use std::sync::Arc;

use crate::gateway::admission::AdmissionController;
use crate::gateway::helper::JobHelper;

/// Created right after a successful `reserve`. Until a helper is bound, dropping the guard
/// releases immediately; afterwards release waits for the helper to exit.
pub(super) struct SlotGuard {
    admission: Arc<AdmissionController>,
    helper: Option<Arc<dyn JobHelper>>,
    session_id: String,
    armed: bool,
}

impl SlotGuard {
    pub(super) fn new(admission: Arc<AdmissionController>, session_id: String) -> Self {
        Self {
            admission,
            helper: None,
            session_id,
            armed: true,
        }
    }

    pub(super) fn bind_helper(&mut self, helper: Arc<dyn JobHelper>) {
        self.helper = Some(helper);
    }

    /// Helper exit already observed: release synchronously.
    pub(super) fn release_now(mut self) {
        self.armed = false;
        self.admission.release();
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let admission = Arc::clone(&self.admission);
        let Some(helper) = self.helper.take() else {
            admission.release();
            return;
        };
        let session_id = std::mem::take(&mut self.session_id);

        // Detached: outlives the (possibly cancelled) session task tree.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    helper.teardown().await;
                    let exit = helper.wait_for_exit(true).await;
                    tracing::debug!(
                        session_id = %session_id,
                        status = ?exit.status,
                        used = exit.used,
                        "helper exit confirmed; releasing admission slot"
                    );
                    admission.release();
                });
            }
            Err(_) => {
                tracing::warn!(
                    session_id = %session_id,
                    "no runtime to monitor helper exit; releasing admission slot immediately"
                );
                admission.release();
            }
        }
    }
}
