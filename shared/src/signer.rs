//! Command signing
//!
//! The signed message is:
//! ```text
//! [ u32 LE sequence ][ u32 LE operation ][ payload ][ session key, except for GET_SESSION_KEY ]
//! ```

use thiserror::Error;

use crate::keys::{PrivateKey, PublicKey, SIGNATURE_LEN};
use crate::protocol::{Operation, SignedRequest};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignError {
    #[error("No session key held for {0:?}")]
    MissingSessionKey(Operation),
}

/// Build the canonical byte string covered by a command signature
pub fn canonical_message(
    sequence: u32,
    operation: Operation,
    payload: &[u8],
    session_key: Option<&[u8]>,
) -> Result<Vec<u8>, SignError> {
    let mut message = Vec::with_capacity(8 + payload.len() + session_key.map_or(0, |k| k.len()));
    message.extend_from_slice(&sequence.to_le_bytes());
    message.extend_from_slice(&operation.code().to_le_bytes());
    message.extend_from_slice(payload);

    if operation.requires_session_key() {
        let key = session_key.ok_or(SignError::MissingSessionKey(operation))?;
        message.extend_from_slice(key);
    }

    Ok(message)
}

/// Verify a command signature against one public key
pub fn verify_command(
    public_key: &PublicKey,
    sequence: u32,
    operation: Operation,
    payload: &[u8],
    session_key: Option<&[u8]>,
    signature: &[u8],
) -> bool {
    match canonical_message(sequence, operation, payload, session_key) {
        Ok(message) => public_key.verify(&message, signature),
        Err(_) => false,
    }
}

/// Signs secure commands with the operator's private key
#[derive(Debug)]
pub struct CommandSigner {
    key: PrivateKey,
}

impl CommandSigner {
    pub fn new(key: PrivateKey) -> Self {
        Self { key }
    }

    /// Public half of the signing key
    pub fn public_key(&self) -> PublicKey {
        self.key.public_key()
    }

    /// Sign a command. `session_key` is ignored for GET_SESSION_KEY.
    pub fn sign(
        &self,
        sequence: u32,
        operation: Operation,
        payload: &[u8],
        session_key: Option<&[u8]>,
    ) -> Result<[u8; SIGNATURE_LEN], SignError> {
        let message = canonical_message(sequence, operation, payload, session_key)?;
        Ok(self.key.sign(&message))
    }

    /// Sign and bundle a command ready for the wire
    pub fn sign_request(
        &self,
        sequence: u32,
        operation: Operation,
        payload: Vec<u8>,
        session_key: Option<&[u8]>,
    ) -> Result<SignedRequest, SignError> {
        let signature = self.sign(sequence, operation, &payload, session_key)?;
        Ok(SignedRequest {
            sequence,
            operation,
            payload,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::tests::test_key;

    #[test]
    fn test_canonical_message_layout() {
        let msg = canonical_message(0x0102_0304, Operation::SetConfig, b"A=1", Some(&[9, 9]))
            .expect("build failed");
        assert_eq!(&msg[..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&msg[4..8], &[5, 0, 0, 0]);
        assert_eq!(&msg[8..11], b"A=1");
        assert_eq!(&msg[11..], &[9, 9]);
    }

    #[test]
    fn test_session_key_not_covered_for_get_session_key() {
        let with = canonical_message(7, Operation::GetSessionKey, &[], Some(&[1, 2, 3])).unwrap();
        let without = canonical_message(7, Operation::GetSessionKey, &[], None).unwrap();
        assert_eq!(with, without);
        assert_eq!(with.len(), 8);
    }

    #[test]
    fn test_missing_session_key() {
        let signer = CommandSigner::new(test_key(1));
        let result = signer.sign(1, Operation::SetConfig, b"A=1", None);
        assert_eq!(result, Err(SignError::MissingSessionKey(Operation::SetConfig)));
    }

    #[test]
    fn test_sign_is_deterministic() {
        let signer = CommandSigner::new(test_key(1));
        let a = signer.sign(3, Operation::GetSessionKey, &[], None).unwrap();
        let b = signer.sign(3, Operation::GetSessionKey, &[], None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_verify_command() {
        let signer = CommandSigner::new(test_key(1));
        let public = signer.public_key();
        let session = [4u8; 8];

        let req = signer
            .sign_request(10, Operation::SetConfig, b"UAS_ID=X".to_vec(), Some(&session))
            .unwrap();

        assert!(verify_command(&public, 10, Operation::SetConfig, b"UAS_ID=X", Some(&session), &req.signature));
        // replayed under a different sequence
        assert!(!verify_command(&public, 11, Operation::SetConfig, b"UAS_ID=X", Some(&session), &req.signature));
        // replayed against a new session
        assert!(!verify_command(&public, 10, Operation::SetConfig, b"UAS_ID=X", Some(&[5u8; 8]), &req.signature));
        assert!(!verify_command(&public, 10, Operation::SetConfig, b"UAS_ID=X", None, &req.signature));
    }
}
