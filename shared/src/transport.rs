//! Transport seam for secure commands
//!
//! The client never blocks on the transport: requests are handed over with
//! `send`, replies are collected with `poll` once per tick, and timeouts are
//! tracked by the caller against its own clock.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::protocol::{SecureCommandResponse, SignedRequest};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("No reply to sequence {sequence} within {timeout:?}")]
    Timeout { sequence: u32, timeout: Duration },

    #[error("Transport closed: {0}")]
    Closed(String),
}

/// Non-blocking request/response transport
pub trait Transport {
    /// Queue a request for the given node
    fn send(&mut self, request: &SignedRequest, target_node: u32) -> Result<(), TransportError>;

    /// Next reply that has arrived, if any
    fn poll(&mut self) -> Option<SecureCommandResponse>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, request: &SignedRequest, target_node: u32) -> Result<(), TransportError> {
        (**self).send(request, target_node)
    }

    fn poll(&mut self) -> Option<SecureCommandResponse> {
        (**self).poll()
    }
}

/// A request awaiting its reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub sequence: u32,
    pub sent_at: Instant,
    pub timeout: Duration,
}

impl PendingRequest {
    pub fn new(sequence: u32, sent_at: Instant, timeout: Duration) -> Self {
        Self {
            sequence,
            sent_at,
            timeout,
        }
    }

    /// Check whether the reply window has closed
    pub fn is_timed_out(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.sent_at) >= self.timeout
    }

    /// `Err(Timeout)` once the reply window has closed
    pub fn check(&self, now: Instant) -> Result<(), TransportError> {
        if self.is_timed_out(now) {
            return Err(TransportError::Timeout {
                sequence: self.sequence,
                timeout: self.timeout,
            });
        }
        Ok(())
    }
}

/// Requests in flight for one operation
#[derive(Debug, Default)]
pub struct PendingSet {
    requests: Vec<PendingRequest>,
}

impl PendingSet {
    pub fn push(&mut self, request: PendingRequest) {
        self.requests.push(request);
    }

    /// Remove and return the request a reply answers, if it is still live
    pub fn take_live(&mut self, sequence: u32, now: Instant) -> Option<PendingRequest> {
        let pos = self
            .requests
            .iter()
            .position(|p| p.sequence == sequence && !p.is_timed_out(now))?;
        Some(self.requests.remove(pos))
    }

    /// Drop timed out requests, returning their timeout errors
    pub fn expire(&mut self, now: Instant) -> Vec<TransportError> {
        let mut expired = Vec::new();
        self.requests.retain(|p| match p.check(now) {
            Ok(()) => true,
            Err(e) => {
                expired.push(e);
                false
            }
        });
        expired
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }
}
