//! Session key handshake
//!
//! ```text
//! Init ──tick──▶ AwaitingKey ──reply──▶ HaveKey
//!                  │    ▲
//!                  └────┘ no reply: re-request every retry interval
//! ```
//!
//! `HaveKey` is terminal for the life of the exchange.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::client::ClientError;
use crate::protocol::{Operation, SecureCommandResponse};
use crate::sequence::SequenceCounter;
use crate::signer::CommandSigner;
use crate::timing;
use crate::transport::{PendingRequest, PendingSet, Transport};

/// Handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Nothing sent yet
    Init,
    /// At least one request sent, no key yet
    AwaitingKey,
    /// Session key held
    HaveKey,
}

/// Opaque session key issued by the node
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey(Vec<u8>);

impl SessionKey {
    /// Wrap key bytes. Empty keys are not usable.
    pub fn new(bytes: Vec<u8>) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({} bytes)", self.0.len())
    }
}

/// Client side of the session key handshake
#[derive(Debug)]
pub struct SessionKeyExchange {
    state: ExchangeState,
    session_key: Option<SessionKey>,
    last_attempt: Option<Instant>,
    pending: PendingSet,
    timeout: Duration,
    retry_interval: Duration,
}

impl Default for SessionKeyExchange {
    fn default() -> Self {
        Self::new(Duration::from_millis(timing::DEFAULT_TIMEOUT_MS))
    }
}

impl SessionKeyExchange {
    /// Create an exchange with the given reply timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: ExchangeState::Init,
            session_key: None,
            last_attempt: None,
            pending: PendingSet::default(),
            timeout,
            retry_interval: Duration::from_millis(timing::RETRY_INTERVAL_MS),
        }
    }

    /// Override the retry cadence
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// The held key, once in `HaveKey`
    pub fn session_key(&self) -> Option<&SessionKey> {
        self.session_key.as_ref()
    }

    /// Number of requests still inside their reply window
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Whether a tick at `now` would send a request
    pub fn should_request(&self, now: Instant) -> bool {
        if self.session_key.is_some() {
            return false;
        }
        match self.last_attempt {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.retry_interval,
        }
    }

    /// Send a GET_SESSION_KEY request if one is due. Returns the sequence
    /// number used, if a request went out.
    pub fn tick<T: Transport + ?Sized>(
        &mut self,
        now: Instant,
        signer: &CommandSigner,
        sequence: &mut SequenceCounter,
        transport: &mut T,
        target_node: u32,
    ) -> Result<Option<u32>, ClientError> {
        if !self.should_request(now) {
            return Ok(None);
        }

        let seq = sequence.advance();
        let request = signer.sign_request(seq, Operation::GetSessionKey, Vec::new(), None)?;
        transport.send(&request, target_node)?;

        self.last_attempt = Some(now);
        self.pending.push(PendingRequest::new(seq, now, self.timeout));
        self.state = ExchangeState::AwaitingKey;

        info!("Requested session key (seq={})", seq);
        Ok(Some(seq))
    }

    /// Handle a GET_SESSION_KEY reply. Returns true if it produced the key.
    pub fn handle_response(&mut self, now: Instant, response: &SecureCommandResponse) -> bool {
        if self.session_key.is_some() {
            debug!("Ignoring session key reply seq={}: key already held", response.sequence);
            return false;
        }

        if self.pending.take_live(response.sequence, now).is_none() {
            debug!("Ignoring session key reply for unknown or expired seq={}", response.sequence);
            return false;
        }

        match SessionKey::new(response.data.clone()) {
            Some(key) => {
                info!("Got session key ({} bytes, result={})", key.len(), response.command_result());
                self.session_key = Some(key);
                self.state = ExchangeState::HaveKey;
                self.pending.clear();
                true
            }
            None => {
                warn!(
                    "Session key reply seq={} carried no key (result={})",
                    response.sequence,
                    response.command_result()
                );
                false
            }
        }
    }

    /// Forget requests whose reply window has closed
    pub fn expire(&mut self, now: Instant) {
        for err in self.pending.expire(now) {
            debug!("Session key request: {}", err);
        }
    }
}
