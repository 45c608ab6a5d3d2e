//! Usage: Message-ordering state machines for the primary and dial-back streams.

mod dial_back;
mod inbound;

pub use dial_back::{DialBackState, DialBackStateMachine};
pub use inbound::{InboundEnd, InboundState, InboundStateMachine};
