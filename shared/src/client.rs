//! Secure command client
//!
//! Owns everything that must be mutated by a single task: the sequence
//! counter, the session key handshake and the config dispatch. Drive it by
//! calling [`SecureCommandClient::tick`] once per scheduler tick.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::dispatcher::CommandDispatcher;
use crate::protocol::{CommandResult, Operation};
use crate::sequence::SequenceCounter;
use crate::session::{ExchangeState, SessionKeyExchange};
use crate::signer::{CommandSigner, SignError};
use crate::timing;
use crate::transport::{Transport, TransportError};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Sign(#[from] SignError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Config payload too large: {len} bytes (max: {max})")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Settings for one command run
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Node the command is addressed to
    pub target_node: u32,
    /// How long to wait for each reply
    pub timeout: Duration,
    /// Minimum time between attempts
    pub retry_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            target_node: 0,
            timeout: Duration::from_millis(timing::DEFAULT_TIMEOUT_MS),
            retry_interval: Duration::from_millis(timing::RETRY_INTERVAL_MS),
        }
    }
}

/// Handshake plus config change against one node
pub struct SecureCommandClient<T, C = SystemClock> {
    config: ClientConfig,
    signer: CommandSigner,
    sequence: SequenceCounter,
    exchange: SessionKeyExchange,
    dispatcher: CommandDispatcher,
    transport: T,
    clock: C,
}

impl<T: Transport, C: Clock> SecureCommandClient<T, C> {
    /// Create a client that will apply `op_string` once a session key is held
    pub fn new(
        config: ClientConfig,
        signer: CommandSigner,
        op_string: &str,
        transport: T,
        clock: C,
    ) -> Result<Self, ClientError> {
        let exchange = SessionKeyExchange::new(config.timeout).with_retry_interval(config.retry_interval);
        let dispatcher =
            CommandDispatcher::new(op_string, config.timeout)?.with_retry_interval(config.retry_interval);

        Ok(Self {
            config,
            signer,
            sequence: SequenceCounter::random(),
            exchange,
            dispatcher,
            transport,
            clock,
        })
    }

    /// Replace the randomly seeded sequence counter
    pub fn with_sequence(mut self, sequence: SequenceCounter) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn state(&self) -> ExchangeState {
        self.exchange.state()
    }

    pub fn outcome(&self) -> Option<CommandResult> {
        self.dispatcher.outcome()
    }

    /// Sequence number the next request will carry
    pub fn next_sequence(&self) -> u32 {
        self.sequence.peek()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Run one scheduler tick: handle replies, expire timeouts, send what is due
    ///
    /// Returns the node's result once the config change has been answered.
    /// Timeouts are retried internally and never returned.
    pub fn tick(&mut self) -> Result<Option<CommandResult>, ClientError> {
        if let Some(result) = self.dispatcher.outcome() {
            return Ok(Some(result));
        }

        let now = self.clock.now();

        while let Some(response) = self.transport.poll() {
            match Operation::from_code(response.operation) {
                Some(Operation::GetSessionKey) => {
                    self.exchange.handle_response(now, &response);
                }
                Some(Operation::SetConfig) => {
                    if let Some(result) = self.dispatcher.handle_response(now, &response) {
                        return Ok(Some(result));
                    }
                }
                None => {
                    warn!(
                        "Reply with unknown operation {} (seq={})",
                        response.operation, response.sequence
                    );
                }
            }
        }

        self.exchange.expire(now);
        self.dispatcher.expire(now);

        match self.exchange.session_key() {
            None => {
                self.exchange.tick(
                    now,
                    &self.signer,
                    &mut self.sequence,
                    &mut self.transport,
                    self.config.target_node,
                )?;
            }
            Some(key) => {
                self.dispatcher.tick(
                    now,
                    key,
                    &self.signer,
                    &mut self.sequence,
                    &mut self.transport,
                    self.config.target_node,
                )?;
            }
        }

        debug!("tick: state={:?} next_seq={}", self.exchange.state(), self.sequence.peek());
        Ok(None)
    }
}
