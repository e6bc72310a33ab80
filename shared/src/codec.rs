//! Length-prefixed framing for stream transports
//!
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ N bytes: protobuf Frame ]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;

use crate::protocol::Frame;

/// Largest frame body accepted (64 KiB). Secure commands are far smaller.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024;

const PREFIX_LEN: usize = 4;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("Invalid frame length prefix: {0}")]
    InvalidLength(u32),

    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Protobuf encode error: {0}")]
    Encode(#[from] prost::EncodeError),
}

/// Encode a frame with its length prefix
pub fn encode(frame: &Frame) -> Result<Bytes, CodecError> {
    let body_len = frame.encoded_len();
    if body_len > MAX_FRAME_SIZE as usize {
        return Err(CodecError::FrameTooLarge(body_len));
    }

    let mut buf = BytesMut::with_capacity(PREFIX_LEN + body_len);
    buf.put_u32(body_len as u32);
    frame.encode(&mut buf)?;
    Ok(buf.freeze())
}

/// Decode one frame from the front of `buf`
///
/// Returns `Ok(None)` and leaves `buf` untouched if the frame is incomplete.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
    if buf.len() < PREFIX_LEN {
        return Ok(None);
    }

    let body_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if body_len > MAX_FRAME_SIZE {
        return Err(CodecError::InvalidLength(body_len));
    }

    if buf.len() < PREFIX_LEN + body_len as usize {
        return Ok(None);
    }

    buf.advance(PREFIX_LEN);
    let body = buf.split_to(body_len as usize);
    Ok(Some(Frame::decode(body)?))
}

/// Accumulates stream reads and yields complete frames
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
        }
    }

    /// Append bytes read from the stream
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Next complete frame, if any. Call until `Ok(None)` to drain.
    pub fn decode_next(&mut self) -> Result<Option<Frame>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Bytes buffered but not yet decoded
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{frame, CommandResult, SecureCommandRequest, SecureCommandResponse};

    fn request_frame() -> Frame {
        Frame::request(
            100,
            10,
            SecureCommandRequest {
                sequence: 0xfeed_beef,
                operation: 1,
                sig_length: 64,
                data: vec![0x5a; 64],
            },
        )
    }

    #[test]
    fn test_encode_decode() {
        let original = request_frame();
        let encoded = encode(&original).expect("encode failed");

        let prefix = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(prefix as usize, encoded.len() - 4);

        let mut buf = BytesMut::from(&encoded[..]);
        let decoded = decode(&mut buf).expect("decode failed").expect("no frame");
        assert_eq!(decoded, original);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_left_in_buffer() {
        let encoded = encode(&request_frame()).expect("encode failed");

        let mut buf = BytesMut::from(&encoded[..6]);
        assert!(decode(&mut buf).expect("decode failed").is_none());
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn test_decoder_across_reads() {
        let reply = Frame::response(
            10,
            100,
            SecureCommandResponse {
                sequence: 3,
                operation: 1,
                result: CommandResult::Accepted.code(),
                data: vec![1, 2, 3, 4, 5, 6, 7, 8],
            },
        );
        let first = encode(&request_frame()).unwrap();
        let second = encode(&reply).unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.extend(&first[..3]);
        assert!(decoder.decode_next().unwrap().is_none());

        decoder.extend(&first[3..]);
        decoder.extend(&second);
        assert!(matches!(
            decoder.decode_next().unwrap().and_then(|f| f.body),
            Some(frame::Body::Request(_))
        ));
        assert!(matches!(
            decoder.decode_next().unwrap().and_then(|f| f.body),
            Some(frame::Body::Response(r)) if r.data.len() == 8
        ));
        assert!(decoder.decode_next().unwrap().is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_oversized_prefix_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_FRAME_SIZE + 1);
        buf.put_bytes(0, 16);

        assert!(matches!(decode(&mut buf), Err(CodecError::InvalidLength(_))));
    }
}
