//! Usage: Ordering state machine for a worker-scoped dial-back stream (worker id → messages → close → EOF).

use crate::gateway::errors::DialBackViolation;
use crate::gateway::types::WorkerId;

/// `D` is whatever the caller relays to (helper handle + sinks). The machine only hands it
/// back; it never creates or tears it down.
#[derive(Debug, Clone)]
pub enum DialBackState<D> {
    WaitingForWorkerId,
    WorkerIdReceived { worker_id: WorkerId, delegates: D },
    ConnectionClosed { worker_id: WorkerId, delegates: D },
    EndOfResponseStream,
}

impl<D> DialBackState<D> {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingForWorkerId => "waiting_for_worker_id",
            Self::WorkerIdReceived { .. } => "worker_id_received",
            Self::ConnectionClosed { .. } => "connection_closed",
            Self::EndOfResponseStream => "end_of_response_stream",
        }
    }
}

#[derive(Debug)]
pub struct DialBackStateMachine<D> {
    state: DialBackState<D>,
}

impl<D: Clone> Default for DialBackStateMachine<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Clone> DialBackStateMachine<D> {
    pub fn new() -> Self {
        Self {
            state: DialBackState::WaitingForWorkerId,
        }
    }

    pub fn state(&self) -> &DialBackState<D> {
        &self.state
    }

    pub fn worker_id(&self) -> Option<&WorkerId> {
        match &self.state {
            DialBackState::WorkerIdReceived { worker_id, .. }
            | DialBackState::ConnectionClosed { worker_id, .. } => Some(worker_id),
            _ => None,
        }
    }

    /// Ordering check for a worker id, without committing to it. Lets the caller resolve
    /// delegates (which may fail on its own) only when the id is acceptable here.
    pub fn accepts_worker_id(&self) -> Result<(), DialBackViolation> {
        match self.state {
            DialBackState::WaitingForWorkerId => Ok(()),
            DialBackState::WorkerIdReceived { .. } => Err(DialBackViolation::DuplicateWorkerId),
            DialBackState::ConnectionClosed { .. } => Err(DialBackViolation::WorkerIdAfterClose),
            DialBackState::EndOfResponseStream => {
                Err(DialBackViolation::WorkerIdAfterEndOfStream)
            }
        }
    }

    pub fn received_worker_id(
        &mut self,
        worker_id: WorkerId,
        delegates: D,
    ) -> Result<(), DialBackViolation> {
        self.accepts_worker_id()?;
        self.state = DialBackState::WorkerIdReceived {
            worker_id,
            delegates,
        };
        Ok(())
    }

    pub fn received_message(&mut self) -> Result<(WorkerId, D), DialBackViolation> {
        match &self.state {
            DialBackState::WorkerIdReceived {
                worker_id,
                delegates,
            } => Ok((worker_id.clone(), delegates.clone())),
            DialBackState::WaitingForWorkerId => Err(DialBackViolation::MessageBeforeWorkerId),
            DialBackState::ConnectionClosed { .. } => Err(DialBackViolation::MessageAfterClose),
            DialBackState::EndOfResponseStream => Err(DialBackViolation::MessageAfterEndOfStream),
        }
    }

    pub fn received_close(&mut self) -> Result<(WorkerId, D), DialBackViolation> {
        match &self.state {
            DialBackState::WorkerIdReceived {
                worker_id,
                delegates,
            } => {
                let out = (worker_id.clone(), delegates.clone());
                self.state = DialBackState::ConnectionClosed {
                    worker_id: out.0.clone(),
                    delegates: out.1.clone(),
                };
                Ok(out)
            }
            DialBackState::WaitingForWorkerId => Err(DialBackViolation::CloseBeforeWorkerId),
            DialBackState::ConnectionClosed { .. } => Err(DialBackViolation::DuplicateClose),
            DialBackState::EndOfResponseStream => Err(DialBackViolation::CloseAfterEndOfStream),
        }
    }

    pub fn received_eof(&mut self) -> Result<(WorkerId, D), DialBackViolation> {
        match std::mem::replace(&mut self.state, DialBackState::EndOfResponseStream) {
            DialBackState::WorkerIdReceived {
                worker_id,
                delegates,
            }
            | DialBackState::ConnectionClosed {
                worker_id,
                delegates,
            } => Ok((worker_id, delegates)),
            DialBackState::WaitingForWorkerId => {
                self.state = DialBackState::WaitingForWorkerId;
                Err(DialBackViolation::EndOfStreamBeforeWorkerId)
            }
            DialBackState::EndOfResponseStream => Err(DialBackViolation::DuplicateEndOfStream),
        }
    }
}
