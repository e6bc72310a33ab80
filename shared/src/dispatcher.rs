//! Signed configuration change dispatch

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::client::ClientError;
use crate::keys::SIGNATURE_LEN;
use crate::protocol::{CommandResult, Operation, SecureCommandResponse, MAX_COMMAND_DATA};
use crate::sequence::SequenceCounter;
use crate::session::SessionKey;
use crate::signer::CommandSigner;
use crate::timing;
use crate::transport::{PendingRequest, PendingSet, Transport};

/// Longest config payload that fits next to a signature
pub const MAX_CONFIG_PAYLOAD: usize = MAX_COMMAND_DATA - SIGNATURE_LEN;

/// Sends one SET_CONFIG command until the node answers
///
/// There is no retry limit; the first reply of any kind ends the dispatch.
#[derive(Debug)]
pub struct CommandDispatcher {
    payload: Vec<u8>,
    last_attempt: Option<Instant>,
    pending: PendingSet,
    timeout: Duration,
    retry_interval: Duration,
    attempts: u32,
    outcome: Option<CommandResult>,
}

impl CommandDispatcher {
    /// Prepare a config change such as `LOCK_LEVEL=1`
    pub fn new(op_string: &str, timeout: Duration) -> Result<Self, ClientError> {
        let payload = op_string.as_bytes().to_vec();
        if payload.len() > MAX_CONFIG_PAYLOAD {
            return Err(ClientError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_CONFIG_PAYLOAD,
            });
        }

        Ok(Self {
            payload,
            last_attempt: None,
            pending: PendingSet::default(),
            timeout,
            retry_interval: Duration::from_millis(timing::RETRY_INTERVAL_MS),
            attempts: 0,
            outcome: None,
        })
    }

    /// Override the retry cadence
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Result reported by the node, once received
    pub fn outcome(&self) -> Option<CommandResult> {
        self.outcome
    }

    /// Number of requests sent so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether a tick at `now` would send a request
    pub fn should_send(&self, now: Instant) -> bool {
        if self.outcome.is_some() || !self.pending.is_empty() {
            return false;
        }
        match self.last_attempt {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.retry_interval,
        }
    }

    /// Send the config change if one is due. Requires a held session key.
    pub fn tick<T: Transport + ?Sized>(
        &mut self,
        now: Instant,
        session_key: &SessionKey,
        signer: &CommandSigner,
        sequence: &mut SequenceCounter,
        transport: &mut T,
        target_node: u32,
    ) -> Result<Option<u32>, ClientError> {
        if !self.should_send(now) {
            return Ok(None);
        }

        let seq = sequence.advance();
        let request = signer.sign_request(
            seq,
            Operation::SetConfig,
            self.payload.clone(),
            Some(session_key.as_bytes()),
        )?;
        transport.send(&request, target_node)?;

        self.last_attempt = Some(now);
        self.attempts += 1;
        self.pending.push(PendingRequest::new(seq, now, self.timeout));

        info!("Requested config change (seq={} attempt={})", seq, self.attempts);
        Ok(Some(seq))
    }

    /// Handle a SET_CONFIG reply. Returns the result if this ended the dispatch.
    pub fn handle_response(&mut self, now: Instant, response: &SecureCommandResponse) -> Option<CommandResult> {
        if self.outcome.is_some() {
            debug!("Ignoring config reply seq={}: already answered", response.sequence);
            return None;
        }

        if self.pending.take_live(response.sequence, now).is_none() {
            debug!("Ignoring config reply for unknown or expired seq={}", response.sequence);
            return None;
        }

        let result = response.command_result();
        info!("Got change response: {}", result);

        self.pending.clear();
        self.outcome = Some(result);
        Some(result)
    }

    /// Forget requests whose reply window has closed
    pub fn expire(&mut self, now: Instant) {
        for err in self.pending.expire(now) {
            debug!("Config change: {}, will retry", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::tests::test_key;
    use crate::protocol::SignedRequest;
    use crate::signer::verify_command;
    use crate::transport::TransportError;

    #[derive(Default)]
    struct SilentTransport {
        sent: Vec<SignedRequest>,
    }

    impl Transport for SilentTransport {
        fn send(&mut self, request: &SignedRequest, _target_node: u32) -> Result<(), TransportError> {
            self.sent.push(request.clone());
            Ok(())
        }

        fn poll(&mut self) -> Option<SecureCommandResponse> {
            None
        }
    }

    fn reply(sequence: u32, result: u32) -> SecureCommandResponse {
        SecureCommandResponse {
            sequence,
            operation: Operation::SetConfig.code(),
            result,
            data: Vec::new(),
        }
    }

    #[test]
    fn test_payload_too_large() {
        let op = "X".repeat(MAX_CONFIG_PAYLOAD + 1);
        let result = CommandDispatcher::new(&op, Duration::from_secs(3));
        assert!(matches!(result, Err(ClientError::PayloadTooLarge { .. })));
        assert!(CommandDispatcher::new(&op[1..], Duration::from_secs(3)).is_ok());
    }

    #[test]
    fn test_request_covers_session_key() {
        let signer = CommandSigner::new(test_key(1));
        let key = SessionKey::new(vec![3; 8]).unwrap();
        let mut seq = SequenceCounter::starting_at(20);
        let mut transport = SilentTransport::default();
        let mut dispatcher = CommandDispatcher::new("LOCK_LEVEL=1", Duration::from_secs(3)).unwrap();

        let sent = dispatcher
            .tick(Instant::now(), &key, &signer, &mut seq, &mut transport, 10)
            .unwrap();
        assert_eq!(sent, Some(20));

        let request = &transport.sent[0];
        assert_eq!(request.payload, b"LOCK_LEVEL=1");
        assert!(verify_command(
            &signer.public_key(),
            20,
            Operation::SetConfig,
            b"LOCK_LEVEL=1",
            Some(&[3; 8]),
            &request.signature
        ));
    }

    #[test]
    fn test_retry_after_timeout_only() {
        let signer = CommandSigner::new(test_key(1));
        let key = SessionKey::new(vec![3; 8]).unwrap();
        let mut seq = SequenceCounter::starting_at(0);
        let mut transport = SilentTransport::default();
        let mut dispatcher = CommandDispatcher::new("A=1", Duration::from_secs(3)).unwrap();
        let start = Instant::now();

        dispatcher.tick(start, &key, &signer, &mut seq, &mut transport, 10).unwrap();

        // retry interval passed but the first request is still in flight
        let t = start + Duration::from_millis(2500);
        dispatcher.expire(t);
        assert_eq!(dispatcher.tick(t, &key, &signer, &mut seq, &mut transport, 10).unwrap(), None);

        let t = start + Duration::from_secs(3);
        dispatcher.expire(t);
        assert_eq!(dispatcher.tick(t, &key, &signer, &mut seq, &mut transport, 10).unwrap(), Some(1));
        assert_eq!(dispatcher.attempts(), 2);
    }

    #[test]
    fn test_any_reply_is_terminal() {
        let signer = CommandSigner::new(test_key(1));
        let key = SessionKey::new(vec![3; 8]).unwrap();
        let mut seq = SequenceCounter::starting_at(0);
        let mut transport = SilentTransport::default();
        let mut dispatcher = CommandDispatcher::new("A=1", Duration::from_secs(3)).unwrap();
        let now = Instant::now();

        dispatcher.tick(now, &key, &signer, &mut seq, &mut transport, 10).unwrap();
        assert_eq!(dispatcher.handle_response(now, &reply(0, 77)), Some(CommandResult::Invalid(77)));
        assert_eq!(dispatcher.outcome(), Some(CommandResult::Invalid(77)));

        let later = now + Duration::from_secs(60);
        assert_eq!(dispatcher.tick(later, &key, &signer, &mut seq, &mut transport, 10).unwrap(), None);
        assert_eq!(transport.sent.len(), 1);
    }

    #[test]
    fn test_reply_for_unknown_sequence_ignored() {
        let signer = CommandSigner::new(test_key(1));
        let key = SessionKey::new(vec![3; 8]).unwrap();
        let mut seq = SequenceCounter::starting_at(0);
        let mut transport = SilentTransport::default();
        let mut dispatcher = CommandDispatcher::new("A=1", Duration::from_secs(3)).unwrap();
        let now = Instant::now();

        dispatcher.tick(now, &key, &signer, &mut seq, &mut transport, 10).unwrap();
        assert_eq!(dispatcher.handle_response(now, &reply(9, 0)), None);
        assert_eq!(dispatcher.outcome(), None);
    }
}
