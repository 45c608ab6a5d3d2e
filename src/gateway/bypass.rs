//! Usage: Order-preserving forwarder that buffers until a downstream connection exists.
//!
//! Used for the caller's bypassed request (chunks meant for the remote worker) and for
//! helper traffic addressed to a worker that has not dialed back yet.

use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::shared::mutex_ext::MutexExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldOutcome {
    Forwarded,
    Buffered,
    /// The forwarder has finished (or its target is gone); the message was discarded.
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("bypass forwarder is already connected")]
pub struct AlreadyConnected;

#[derive(Debug)]
enum BypassState<T> {
    Buffering { queued: VecDeque<T>, finished: bool },
    Connected { target: mpsc::UnboundedSender<T> },
    Complete,
}

/// Finishing drops the target sender, which is how the receiving side observes the end.
#[derive(Debug)]
pub struct BypassBuffer<T> {
    state: Mutex<BypassState<T>>,
}

impl<T> Default for BypassBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BypassBuffer<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BypassState::Buffering {
                queued: VecDeque::new(),
                finished: false,
            }),
        }
    }

    pub fn yield_message(&self, message: T) -> YieldOutcome {
        let mut state = self.state.lock_or_recover();
        match &mut *state {
            BypassState::Buffering {
                queued,
                finished: false,
            } => {
                queued.push_back(message);
                YieldOutcome::Buffered
            }
            BypassState::Buffering { finished: true, .. } | BypassState::Complete => {
                YieldOutcome::Terminated
            }
            BypassState::Connected { target } => {
                if target.send(message).is_ok() {
                    YieldOutcome::Forwarded
                } else {
                    *state = BypassState::Complete;
                    YieldOutcome::Terminated
                }
            }
        }
    }

    /// Mark the logical end of the message sequence.
    pub fn finish(&self) {
        let mut state = self.state.lock_or_recover();
        match &mut *state {
            BypassState::Buffering { finished, .. } => *finished = true,
            BypassState::Connected { .. } => *state = BypassState::Complete,
            BypassState::Complete => {}
        }
    }

    /// Replays everything buffered (and a pending finish) into `target`. Valid once.
    pub fn connect(&self, target: mpsc::UnboundedSender<T>) -> Result<(), AlreadyConnected> {
        let mut state = self.state.lock_or_recover();
        let (queued, finished) = match &mut *state {
            BypassState::Buffering { queued, finished } => (std::mem::take(queued), *finished),
            BypassState::Connected { .. } | BypassState::Complete => return Err(AlreadyConnected),
        };

        // Unbounded sends never wait, so replay happens under the lock and nothing can
        // overtake the queued messages.
        let mut target_alive = true;
        for message in queued {
            if target.send(message).is_err() {
                target_alive = false;
                break;
            }
        }

        *state = if finished || !target_alive {
            BypassState::Complete
        } else {
            BypassState::Connected { target }
        };
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            &*self.state.lock_or_recover(),
            BypassState::Connected { .. }
        )
    }
}
