//! Per-connection handling of framed secure commands

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use remoteid_shared::codec::{self, FrameDecoder};
use remoteid_shared::protocol::frame;
use remoteid_shared::{CommandAuthority, Frame, Operation};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::params::ParameterTable;

pub type SharedAuthority = Arc<Mutex<CommandAuthority<ParameterTable>>>;

/// One operator connection to the node
pub struct NodeSession {
    addr: SocketAddr,
    stream: TcpStream,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

impl NodeSession {
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        Self {
            addr,
            stream,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
        }
    }

    /// Serve requests until the peer disconnects
    pub async fn run(mut self, node_id: u32, authority: SharedAuthority) -> Result<()> {
        loop {
            let n = self.stream.read(&mut self.read_buf).await?;
            if n == 0 {
                info!("Client disconnected: {}", self.addr);
                return Ok(());
            }
            self.decoder.extend(&self.read_buf[..n]);

            while let Some(frame) = self.decoder.decode_next()? {
                let reply = {
                    let mut authority = authority.lock().await;
                    handle_frame(node_id, &mut authority, frame)
                };
                if let Some(reply) = reply {
                    let encoded = codec::encode(&reply)?;
                    self.stream.write_all(&encoded).await?;
                }
            }
        }
    }
}

/// Answer a request frame addressed to this node
///
/// Frames for other nodes and stray responses produce no reply.
pub fn handle_frame(
    node_id: u32,
    authority: &mut CommandAuthority<ParameterTable>,
    frame: Frame,
) -> Option<Frame> {
    if frame.target_node != node_id {
        debug!("Frame for node {} ignored", frame.target_node);
        return None;
    }

    let Some(frame::Body::Request(request)) = frame.body else {
        debug!("Non-request frame from node {} ignored", frame.source_node);
        return None;
    };

    let reply = authority.handle(&request);
    let op = Operation::from_code(request.operation)
        .map(|op| format!("{:?}", op))
        .unwrap_or_else(|| request.operation.to_string());
    info!(
        "Node {} seq={} {} -> {}",
        frame.source_node,
        request.sequence,
        op,
        reply.command_result()
    );

    Some(Frame::response(node_id, frame.source_node, reply))
}
