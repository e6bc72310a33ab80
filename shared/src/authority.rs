//! Node-side handling of secure commands
//!
//! The node accepts a command only if its signature verifies against one of
//! its trusted public keys. GET_SESSION_KEY issues a fresh random session
//! key; SET_CONFIG must be signed over that key.

use tracing::{debug, info, warn};

use crate::keys::{PublicKey, SIGNATURE_LEN};
use crate::protocol::{CommandResult, Operation, SecureCommandRequest, SecureCommandResponse, MAX_COMMAND_DATA};
use crate::signer::verify_command;

/// Session key length issued by the node
pub const SESSION_KEY_LEN: usize = 8;

/// Maximum number of trusted public keys a node holds
pub const MAX_PUBLIC_KEYS: usize = 10;

/// Destination for `NAME=VALUE` config changes
pub trait ParameterStore {
    /// Set a parameter from its text value. Returns false if the name is
    /// unknown or the value is rejected.
    fn set_by_name(&mut self, name: &str, value: &str) -> bool;
}

/// Verifies and executes secure commands on behalf of a node
#[derive(Debug)]
pub struct CommandAuthority<P> {
    public_keys: Vec<PublicKey>,
    session_key: Option<[u8; SESSION_KEY_LEN]>,
    params: P,
}

impl<P: ParameterStore> CommandAuthority<P> {
    /// Create an authority trusting the given keys. Keys beyond
    /// `MAX_PUBLIC_KEYS` are ignored.
    pub fn new(mut public_keys: Vec<PublicKey>, params: P) -> Self {
        if public_keys.len() > MAX_PUBLIC_KEYS {
            warn!("Ignoring {} public keys beyond {}", public_keys.len() - MAX_PUBLIC_KEYS, MAX_PUBLIC_KEYS);
            public_keys.truncate(MAX_PUBLIC_KEYS);
        }
        Self {
            public_keys,
            session_key: None,
            params,
        }
    }

    pub fn params(&self) -> &P {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut P {
        &mut self.params
    }

    /// Number of trusted keys
    pub fn key_count(&self) -> usize {
        self.public_keys.len()
    }

    /// Handle one request and build the reply
    pub fn handle(&mut self, request: &SecureCommandRequest) -> SecureCommandResponse {
        let mut reply = SecureCommandResponse::reply_to(request, CommandResult::Unsupported);

        if request.data.len() > MAX_COMMAND_DATA {
            reply.result = CommandResult::Denied.code();
            return reply;
        }

        let Some((payload, signature)) = request.split_data() else {
            reply.result = CommandResult::Denied.code();
            return reply;
        };

        let Some(operation) = Operation::from_code(request.operation) else {
            debug!("Unsupported secure command operation {}", request.operation);
            return reply;
        };

        if !self.check_signature(request.sequence, operation, payload, signature) {
            warn!("Secure command seq={} {:?}: bad signature", request.sequence, operation);
            reply.result = CommandResult::Denied.code();
            return reply;
        }

        match operation {
            Operation::GetSessionKey => {
                let key: [u8; SESSION_KEY_LEN] = rand::random();
                self.session_key = Some(key);
                reply.data = key.to_vec();
                reply.result = CommandResult::Accepted.code();
                info!("Issued session key (seq={})", request.sequence);
            }
            Operation::SetConfig => {
                let result = self.apply_config(payload);
                reply.result = result.code();
            }
        }

        reply
    }

    /// Check a command signature against every trusted key
    fn check_signature(&self, sequence: u32, operation: Operation, payload: &[u8], signature: &[u8]) -> bool {
        if signature.len() != SIGNATURE_LEN {
            return false;
        }

        let session_key = match (operation.requires_session_key(), &self.session_key) {
            (false, _) => None,
            (true, Some(key)) => Some(&key[..]),
            (true, None) => {
                debug!("No session key issued yet");
                return false;
            }
        };

        self.public_keys
            .iter()
            .any(|key| verify_command(key, sequence, operation, payload, session_key, signature))
    }

    /// Apply a NUL-separated list of `NAME=VALUE` pairs
    fn apply_config(&mut self, payload: &[u8]) -> CommandResult {
        let Ok(text) = std::str::from_utf8(payload) else {
            return CommandResult::Failed;
        };

        let mut result = CommandResult::Accepted;
        for entry in text.split('\0').filter(|e| !e.is_empty()) {
            let Some((name, value)) = entry.split_once('=') else {
                continue;
            };
            if self.params.set_by_name(name, value) {
                info!("set {} OK", name);
            } else {
                warn!("set {} failed", name);
                result = CommandResult::Failed;
            }
        }
        result
    }
}
