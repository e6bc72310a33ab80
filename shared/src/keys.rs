//! Key file decoding
//!
//! Keys are stored as text:
//! ```text
//! PRIVATE_KEYV1:<base64 of 32 raw bytes>
//! PUBLIC_KEYV1:<base64 of 32 raw bytes>
//! ```

use std::fmt;
use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use thiserror::Error;

/// Raw key length in bytes for both halves of a key pair
pub const KEY_LEN: usize = 32;

/// Signature length in bytes
pub const SIGNATURE_LEN: usize = 64;

/// Interoperability note shown in tool help text
pub const SIGNATURE_SCHEME_NOTE: &str = "Signatures are Ed25519 (SHA-512). Key files use the PRIVATE_KEYV1/PUBLIC_KEYV1 \
text format, but nodes that check BLAKE2b EdDSA (Monocypher) signatures will reject commands and \
images signed by this tool, even with a valid key file.";

/// Errors that can occur while decoding or loading keys
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid key format: {0}")]
    Format(String),

    #[error("Bad key length {0} (expected {KEY_LEN})")]
    Length(usize),

    #[error("Failed to read key file: {0}")]
    Io(#[from] std::io::Error),
}

/// Which half of a key pair a key file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Private,
    Public,
}

impl KeyKind {
    /// Text prefix of an encoded key of this kind
    pub fn prefix(self) -> &'static str {
        match self {
            KeyKind::Private => "PRIVATE_KEYV1:",
            KeyKind::Public => "PUBLIC_KEYV1:",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::Private => write!(f, "PRIVATE"),
            KeyKind::Public => write!(f, "PUBLIC"),
        }
    }
}

/// Decode a textual key into its raw bytes
pub fn decode_key(kind: KeyKind, text: &str) -> Result<[u8; KEY_LEN], KeyError> {
    let body = text
        .trim()
        .strip_prefix(kind.prefix())
        .ok_or_else(|| KeyError::Format(format!("expected {} prefix", kind.prefix())))?;

    let bytes = STANDARD
        .decode(body)
        .map_err(|e| KeyError::Format(format!("bad base64: {}", e)))?;

    let len = bytes.len();
    bytes.try_into().map_err(|_| KeyError::Length(len))
}

/// Encode raw key bytes in the key file text format
pub fn encode_key(kind: KeyKind, bytes: &[u8; KEY_LEN]) -> String {
    format!("{}{}", kind.prefix(), STANDARD.encode(bytes))
}

/// Ed25519 signing key. Never transmitted, zeroized on drop.
pub struct PrivateKey {
    signing_key: SigningKey,
}

impl PrivateKey {
    /// Create from raw key bytes
    pub fn from_bytes(bytes: &[u8; KEY_LEN]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// Decode from `PRIVATE_KEYV1:` text
    pub fn from_text(text: &str) -> Result<Self, KeyError> {
        let bytes = decode_key(KeyKind::Private, text)?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Load a private key file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        Self::from_text(&fs::read_to_string(path)?)
    }

    /// Derive the matching public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// Ed25519 verifying key
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
}

impl PublicKey {
    /// Create from raw key bytes, rejecting bytes that are not a curve point
    pub fn from_bytes(bytes: &[u8; KEY_LEN]) -> Result<Self, KeyError> {
        let verifying_key = VerifyingKey::from_bytes(bytes)
            .map_err(|e| KeyError::Format(format!("invalid public key: {}", e)))?;
        Ok(Self { verifying_key })
    }

    /// Decode from `PUBLIC_KEYV1:` text
    pub fn from_text(text: &str) -> Result<Self, KeyError> {
        let bytes = decode_key(KeyKind::Public, text)?;
        Self::from_bytes(&bytes)
    }

    /// Load a public key file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        Self::from_text(&fs::read_to_string(path)?)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        self.verifying_key.as_bytes()
    }

    /// Key file text for this key
    pub fn to_text(&self) -> String {
        encode_key(KeyKind::Public, self.as_bytes())
    }

    /// Verify a signature over a message
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let sig = match Signature::from_slice(signature) {
            Ok(s) => s,
            Err(_) => return false,
        };
        self.verifying_key.verify(message, &sig).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_text())
    }
}
