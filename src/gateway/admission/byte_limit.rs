//! Usage: Per-session cumulative request-byte ceiling.

use crate::gateway::errors::GatewayError;

/// Running total of request payload bytes for one session. A limit of 0 means unlimited.
#[derive(Debug, Clone, Copy)]
pub struct CumulativeByteLimiter {
    limit: u64,
    received: u64,
}

impl CumulativeByteLimiter {
    pub fn new(limit: u64) -> Self {
        Self { limit, received: 0 }
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn record(&mut self, len: usize) -> Result<(), GatewayError> {
        self.received = self.received.saturating_add(len as u64);
        if self.limit > 0 && self.received > self.limit {
            return Err(GatewayError::MaxCumulativeRequestBytesExceeded {
                limit: self.limit,
                received: self.received,
            });
        }
        Ok(())
    }
}
