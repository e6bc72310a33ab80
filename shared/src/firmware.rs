//! Firmware signature descriptor
//!
//! A signed image is the original image followed by an 80-byte descriptor:
//! ```text
//! [ 8 bytes: magic ][ 4 bytes: board_id (u32 LE) ][ 4 bytes: image length (u32 LE) ][ 64 bytes: signature ]
//! ```
//!
//! The signature covers the original image bytes only.

use thiserror::Error;

use crate::keys::{PrivateKey, PublicKey, SIGNATURE_LEN};

/// Marks the start of a signature descriptor
pub const DESCRIPTOR_MAGIC: [u8; 8] = [0x43, 0x2a, 0xf1, 0x37, 0x46, 0xe2, 0x75, 0x19];

/// Total descriptor length appended to a signed image
pub const DESCRIPTOR_LEN: usize = 80;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FirmwareError {
    #[error("Image is already signed")]
    AlreadySigned,

    #[error("Bad signature length {0} (expected {SIGNATURE_LEN})")]
    SignatureLength(usize),

    #[error("Image length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Image too short for a signature descriptor: {0} bytes")]
    MissingDescriptor(usize),

    #[error("Firmware signature is invalid")]
    SignatureInvalid,

    #[error("No trusted public keys configured")]
    NoTrustedKeys,

    #[error("Image is for board {actual}, expected {expected}")]
    BoardMismatch { expected: u32, actual: u32 },
}

/// Parsed signature descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureDescriptor {
    pub board_id: u32,
    pub image_length: u32,
    pub signature: [u8; SIGNATURE_LEN],
}

impl SignatureDescriptor {
    /// Serialize to the 80-byte trailer form
    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_LEN] {
        let mut out = [0u8; DESCRIPTOR_LEN];
        out[..8].copy_from_slice(&DESCRIPTOR_MAGIC);
        out[8..12].copy_from_slice(&self.board_id.to_le_bytes());
        out[12..16].copy_from_slice(&self.image_length.to_le_bytes());
        out[16..].copy_from_slice(&self.signature);
        out
    }

    /// Parse a trailer. Returns `None` if the magic does not match.
    pub fn parse(bytes: &[u8; DESCRIPTOR_LEN]) -> Option<Self> {
        if bytes[..8] != DESCRIPTOR_MAGIC {
            return None;
        }

        let mut signature = [0u8; SIGNATURE_LEN];
        signature.copy_from_slice(&bytes[16..]);

        Some(Self {
            board_id: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            image_length: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
            signature,
        })
    }
}

/// Whether an image already ends in a signature descriptor
pub fn is_signed(image: &[u8]) -> bool {
    image.len() >= DESCRIPTOR_LEN && image[image.len() - DESCRIPTOR_LEN..][..8] == DESCRIPTOR_MAGIC
}

/// Sign a firmware image, returning the image with its descriptor appended
///
/// The input is never modified; on error no output is produced.
pub fn sign_image(image: &[u8], key: &PrivateKey, board_id: u32) -> Result<Vec<u8>, FirmwareError> {
    if is_signed(image) {
        return Err(FirmwareError::AlreadySigned);
    }

    let image_length = u32::try_from(image.len()).map_err(|_| FirmwareError::LengthMismatch {
        expected: u32::MAX as usize,
        actual: image.len(),
    })?;

    let sig = key.sign(image);
    let signature: [u8; SIGNATURE_LEN] = sig
        .as_slice()
        .try_into()
        .map_err(|_| FirmwareError::SignatureLength(sig.len()))?;

    let descriptor = SignatureDescriptor {
        board_id,
        image_length,
        signature,
    };

    let mut signed = Vec::with_capacity(image.len() + DESCRIPTOR_LEN);
    signed.extend_from_slice(image);
    signed.extend_from_slice(&descriptor.to_bytes());

    if signed.len() != image.len() + DESCRIPTOR_LEN {
        return Err(FirmwareError::LengthMismatch {
            expected: image.len() + DESCRIPTOR_LEN,
            actual: signed.len(),
        });
    }

    Ok(signed)
}

/// Split a signed image and check the descriptor's structure, without
/// checking the signature
pub fn split_descriptor(signed: &[u8]) -> Result<(&[u8], SignatureDescriptor), FirmwareError> {
    if signed.len() < DESCRIPTOR_LEN {
        return Err(FirmwareError::MissingDescriptor(signed.len()));
    }

    let (body, trailer) = signed.split_at(signed.len() - DESCRIPTOR_LEN);
    let trailer: &[u8; DESCRIPTOR_LEN] = trailer
        .try_into()
        .map_err(|_| FirmwareError::MissingDescriptor(signed.len()))?;

    let descriptor = SignatureDescriptor::parse(trailer).ok_or(FirmwareError::LengthMismatch {
        expected: body.len(),
        actual: signed.len(),
    })?;

    if descriptor.image_length as usize != body.len() {
        return Err(FirmwareError::LengthMismatch {
            expected: body.len(),
            actual: descriptor.image_length as usize,
        });
    }

    Ok((body, descriptor))
}

/// Original image bytes of a structurally valid signed image
pub fn strip_descriptor(signed: &[u8]) -> Result<&[u8], FirmwareError> {
    split_descriptor(signed).map(|(body, _)| body)
}

/// Verify a signed image, returning `(board_id, true)` on success
pub fn verify_image(signed: &[u8], key: &PublicKey) -> Result<(u32, bool), FirmwareError> {
    let (body, descriptor) = split_descriptor(signed)?;

    if !key.verify(body, &descriptor.signature) {
        return Err(FirmwareError::SignatureInvalid);
    }

    Ok((descriptor.board_id, true))
}

/// Verify a signed image against a set of trusted keys; any one may match
pub fn verify_with_keys(signed: &[u8], keys: &[PublicKey]) -> Result<SignatureDescriptor, FirmwareError> {
    if keys.is_empty() {
        return Err(FirmwareError::NoTrustedKeys);
    }

    let (body, descriptor) = split_descriptor(signed)?;

    for (i, key) in keys.iter().enumerate() {
        if key.verify(body, &descriptor.signature) {
            tracing::debug!("firmware signature good for key {}", i);
            return Ok(descriptor);
        }
        tracing::debug!("firmware check failed for key {}", i);
    }

    Err(FirmwareError::SignatureInvalid)
}

/// Reject images built for another board. Board id 0 matches any board.
pub fn check_board(descriptor: &SignatureDescriptor, expected: u32) -> Result<(), FirmwareError> {
    if descriptor.board_id != 0 && descriptor.board_id != expected {
        return Err(FirmwareError::BoardMismatch {
            expected,
            actual: descriptor.board_id,
        });
    }
    Ok(())
}

/// Why a node accepted an OTA image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateAcceptance {
    /// A trusted key verified the image
    Verified(SignatureDescriptor),
    /// The node holds no public keys, so any well-formed image passes
    NoKeys,
    /// Lock level 0: signatures are not enforced
    Unlocked,
}

/// Decide whether a node at `lock_level` accepts `signed` as its next firmware
///
/// A descriptor naming another board is rejected at every lock level. An
/// image without a valid descriptor counts as board 0.
pub fn check_update(
    signed: &[u8],
    keys: &[PublicKey],
    board_id: u32,
    lock_level: u8,
) -> Result<UpdateAcceptance, FirmwareError> {
    let checked = match split_descriptor(signed) {
        Ok((_, descriptor)) => {
            check_board(&descriptor, board_id)?;
            if keys.is_empty() {
                tracing::info!("No public keys, accepting firmware");
                Ok(UpdateAcceptance::NoKeys)
            } else {
                verify_with_keys(signed, keys).map(UpdateAcceptance::Verified)
            }
        }
        Err(e) => Err(e),
    };

    match checked {
        Err(e) if lock_level == 0 => {
            tracing::warn!("Unlocked, accepting firmware that failed checks: {}", e);
            Ok(UpdateAcceptance::Unlocked)
        }
        other => other,
    }
}
