//! Remote ID secure command and firmware signing library
//!
//! Shared by the command tool, the node simulator and the firmware signer:
//! key files, command signatures, the session key handshake, signed config
//! dispatch, the node-side verifier and the firmware signature descriptor.

pub mod authority;
pub mod client;
pub mod clock;
pub mod codec;
pub mod dispatcher;
pub mod firmware;
pub mod keys;
pub mod protocol;
pub mod sequence;
pub mod session;
pub mod signer;
pub mod transport;

pub use authority::{CommandAuthority, ParameterStore};
pub use client::{ClientConfig, ClientError, SecureCommandClient};
pub use keys::{KeyError, KeyKind, PrivateKey, PublicKey};
pub use protocol::{CommandResult, Frame, Operation, SecureCommandRequest, SecureCommandResponse, SignedRequest};
pub use signer::CommandSigner;
pub use transport::{Transport, TransportError};

/// Scheduling constants for the command client
pub mod timing {
    /// Scheduler tick period in milliseconds
    pub const TICK_INTERVAL_MS: u64 = 100;

    /// Minimum time between attempts of the same request
    pub const RETRY_INTERVAL_MS: u64 = 2000;

    /// Default reply timeout
    pub const DEFAULT_TIMEOUT_MS: u64 = 3000;
}
