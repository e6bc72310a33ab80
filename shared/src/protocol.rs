//! Secure command message types
//!
//! The wire messages mirror the DroneCAN `dronecan.remoteid.SecureCommand`
//! request/response pair. Request `data` carries `payload ‖ signature`.

use std::fmt;

use prost::Message;

/// Maximum size of the request `data` field (payload plus signature)
pub const MAX_COMMAND_DATA: usize = 220;

/// Secure command operations understood by Remote ID nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Request a fresh session key
    GetSessionKey,
    /// Apply `NAME=VALUE` parameter changes
    SetConfig,
}

impl Operation {
    /// Numeric code on the wire
    pub fn code(self) -> u32 {
        match self {
            Operation::GetSessionKey => 1,
            Operation::SetConfig => 5,
        }
    }

    /// Parse a wire code
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Operation::GetSessionKey),
            5 => Some(Operation::SetConfig),
            _ => None,
        }
    }

    /// Whether signatures for this operation must cover the session key
    pub fn requires_session_key(self) -> bool {
        !matches!(self, Operation::GetSessionKey)
    }
}

/// Result code returned by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResult {
    Accepted,
    TemporarilyRejected,
    Denied,
    Unsupported,
    Failed,
    /// Code outside the known set
    Invalid(u32),
}

impl CommandResult {
    /// Numeric code on the wire. This is also the command tool's exit status.
    pub fn code(self) -> u32 {
        match self {
            CommandResult::Accepted => 0,
            CommandResult::TemporarilyRejected => 1,
            CommandResult::Denied => 2,
            CommandResult::Unsupported => 3,
            CommandResult::Failed => 4,
            CommandResult::Invalid(code) => code,
        }
    }

    /// Human-readable label
    pub fn label(self) -> &'static str {
        match self {
            CommandResult::Accepted => "ACCEPTED",
            CommandResult::TemporarilyRejected => "TEMPORARILY_REJECTED",
            CommandResult::Denied => "DENIED",
            CommandResult::Unsupported => "UNSUPPORTED",
            CommandResult::Failed => "FAILED",
            CommandResult::Invalid(_) => "invalid",
        }
    }
}

impl From<u32> for CommandResult {
    fn from(code: u32) -> Self {
        match code {
            0 => CommandResult::Accepted,
            1 => CommandResult::TemporarilyRejected,
            2 => CommandResult::Denied,
            3 => CommandResult::Unsupported,
            4 => CommandResult::Failed,
            other => CommandResult::Invalid(other),
        }
    }
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A command with its signature, before wire encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub sequence: u32,
    pub operation: Operation,
    pub payload: Vec<u8>,
    pub signature: [u8; 64],
}

impl SignedRequest {
    /// Build the wire request: `data = payload ‖ signature`
    pub fn to_wire(&self) -> SecureCommandRequest {
        let mut data = Vec::with_capacity(self.payload.len() + self.signature.len());
        data.extend_from_slice(&self.payload);
        data.extend_from_slice(&self.signature);

        SecureCommandRequest {
            sequence: self.sequence,
            operation: self.operation.code(),
            sig_length: self.signature.len() as u32,
            data,
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct SecureCommandRequest {
    #[prost(uint32, tag = "1")]
    pub sequence: u32,

    #[prost(uint32, tag = "2")]
    pub operation: u32,

    #[prost(uint32, tag = "3")]
    pub sig_length: u32,

    /// Payload followed by `sig_length` signature bytes
    #[prost(bytes = "vec", tag = "4")]
    pub data: Vec<u8>,
}

impl SecureCommandRequest {
    /// Split `data` into payload and signature, if `sig_length` fits
    pub fn split_data(&self) -> Option<(&[u8], &[u8])> {
        let sig_len = self.sig_length as usize;
        if sig_len > self.data.len() {
            return None;
        }
        Some(self.data.split_at(self.data.len() - sig_len))
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct SecureCommandResponse {
    /// Sequence of the request being answered
    #[prost(uint32, tag = "1")]
    pub sequence: u32,

    #[prost(uint32, tag = "2")]
    pub operation: u32,

    #[prost(uint32, tag = "3")]
    pub result: u32,

    #[prost(bytes = "vec", tag = "4")]
    pub data: Vec<u8>,
}

impl SecureCommandResponse {
    /// Create a reply echoing the request's sequence and operation
    pub fn reply_to(request: &SecureCommandRequest, result: CommandResult) -> Self {
        Self {
            sequence: request.sequence,
            operation: request.operation,
            result: result.code(),
            data: Vec::new(),
        }
    }

    /// Typed result code
    pub fn command_result(&self) -> CommandResult {
        CommandResult::from(self.result)
    }
}

/// Addressed unit of transfer between tool and node
#[derive(Clone, PartialEq, Message)]
pub struct Frame {
    #[prost(uint32, tag = "1")]
    pub source_node: u32,

    #[prost(uint32, tag = "2")]
    pub target_node: u32,

    #[prost(oneof = "frame::Body", tags = "3, 4")]
    pub body: Option<frame::Body>,
}

pub mod frame {
    use super::{SecureCommandRequest, SecureCommandResponse};

    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "3")]
        Request(SecureCommandRequest),

        #[prost(message, tag = "4")]
        Response(SecureCommandResponse),
    }
}

impl Frame {
    /// Frame carrying a request
    pub fn request(source_node: u32, target_node: u32, request: SecureCommandRequest) -> Self {
        Self {
            source_node,
            target_node,
            body: Some(frame::Body::Request(request)),
        }
    }

    /// Frame carrying a response
    pub fn response(source_node: u32, target_node: u32, response: SecureCommandResponse) -> Self {
        Self {
            source_node,
            target_node,
            body: Some(frame::Body::Response(response)),
        }
    }
}
