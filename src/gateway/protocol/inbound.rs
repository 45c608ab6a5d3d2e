//! Usage: Ordering state machine for the caller's primary stream (setup → parameters → chunks → EOF).

use crate::gateway::errors::InboundViolation;
use crate::gateway::messages::InboundMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundState {
    AwaitingSetup,
    AwaitingParameters,
    ReceivingChunks,
    ReceivedFinalChunk,
    ReceivedTerminationNotice,
    RequestBypassAwaitingAuthToken,
    RequestBypass,
}

impl InboundState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingSetup => "awaiting_setup",
            Self::AwaitingParameters => "awaiting_parameters",
            Self::ReceivingChunks => "receiving_chunks",
            Self::ReceivedFinalChunk => "received_final_chunk",
            Self::ReceivedTerminationNotice => "received_termination_notice",
            Self::RequestBypassAwaitingAuthToken => "request_bypass_awaiting_auth_token",
            Self::RequestBypass => "request_bypass",
        }
    }
}

/// How the primary stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundEnd {
    Completed,
    /// The caller terminated before EOF; this gateway was never chosen.
    Aborted,
}

#[derive(Debug)]
pub struct InboundStateMachine {
    state: InboundState,
}

impl Default for InboundStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl InboundStateMachine {
    pub fn new() -> Self {
        Self {
            state: InboundState::AwaitingSetup,
        }
    }

    pub fn state(&self) -> InboundState {
        self.state
    }

    pub fn receive(&mut self, message: &InboundMessage) -> Result<InboundState, InboundViolation> {
        match message {
            InboundMessage::Setup => self.received_setup(),
            InboundMessage::Parameters(params) => {
                self.received_parameters(params.request_bypassed, params.request_nack)
            }
            InboundMessage::RequestChunk(chunk) => self.received_chunk(chunk.is_final),
            InboundMessage::Terminate(_) => self.received_termination(),
        }
    }

    pub fn received_setup(&mut self) -> Result<InboundState, InboundViolation> {
        self.state = match self.state {
            InboundState::AwaitingSetup => InboundState::AwaitingParameters,
            InboundState::ReceivedTerminationNotice => {
                return Err(InboundViolation::SetupAfterTermination)
            }
            _ => return Err(InboundViolation::DuplicateSetup),
        };
        Ok(self.state)
    }

    pub fn received_parameters(
        &mut self,
        request_bypassed: bool,
        request_nack: bool,
    ) -> Result<InboundState, InboundViolation> {
        self.state = match self.state {
            InboundState::AwaitingParameters => match (request_bypassed, request_nack) {
                (true, true) => InboundState::RequestBypass,
                (true, false) => InboundState::RequestBypassAwaitingAuthToken,
                (false, _) => InboundState::ReceivingChunks,
            },
            InboundState::AwaitingSetup => return Err(InboundViolation::ParametersBeforeSetup),
            InboundState::ReceivedTerminationNotice => {
                return Err(InboundViolation::ParametersAfterTermination)
            }
            _ => return Err(InboundViolation::DuplicateParameters),
        };
        Ok(self.state)
    }

    pub fn received_chunk(&mut self, is_final: bool) -> Result<InboundState, InboundViolation> {
        self.state = match (self.state, is_final) {
            (InboundState::AwaitingSetup, _) => return Err(InboundViolation::ChunkBeforeSetup),
            (InboundState::AwaitingParameters, _) => {
                return Err(InboundViolation::ChunkBeforeParameters)
            }
            (InboundState::ReceivedTerminationNotice, _) => {
                return Err(InboundViolation::ChunkAfterTermination)
            }
            // The auth token is never the final chunk.
            (InboundState::RequestBypassAwaitingAuthToken | InboundState::RequestBypass, true) => {
                return Err(InboundViolation::FinalChunkUnderRequestBypass)
            }
            (InboundState::RequestBypassAwaitingAuthToken, false) => InboundState::RequestBypass,
            (InboundState::RequestBypass, false) => {
                return Err(InboundViolation::ChunkUnderRequestBypass)
            }
            (InboundState::ReceivingChunks, false) => InboundState::ReceivingChunks,
            (InboundState::ReceivingChunks, true) => InboundState::ReceivedFinalChunk,
            (InboundState::ReceivedFinalChunk, false) => {
                return Err(InboundViolation::ChunkAfterFinalChunk)
            }
            (InboundState::ReceivedFinalChunk, true) => {
                return Err(InboundViolation::DuplicateFinalChunk)
            }
        };
        Ok(self.state)
    }

    pub fn received_termination(&mut self) -> Result<InboundState, InboundViolation> {
        self.state = match self.state {
            InboundState::AwaitingSetup => return Err(InboundViolation::TerminationBeforeSetup),
            InboundState::ReceivedTerminationNotice => {
                return Err(InboundViolation::DuplicateTermination)
            }
            _ => InboundState::ReceivedTerminationNotice,
        };
        Ok(self.state)
    }

    /// Consumes the machine: nothing may be received after end of stream.
    pub fn received_eof(self) -> Result<InboundEnd, InboundViolation> {
        match self.state {
            InboundState::ReceivedFinalChunk | InboundState::RequestBypass => {
                Ok(InboundEnd::Completed)
            }
            InboundState::ReceivedTerminationNotice => Ok(InboundEnd::Aborted),
            other => Err(InboundViolation::UnexpectedEndOfStream {
                state: other.as_str(),
            }),
        }
    }
}
