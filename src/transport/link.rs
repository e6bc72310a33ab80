//! Channel bridge between a link stream and the polled client transport
//!
//! The client runs on a fixed tick and must never await I/O. A background
//! task owns the stream; the client side only uses `try_send`/`try_recv`.

use remoteid_shared::codec::{self, FrameDecoder};
use remoteid_shared::protocol::frame;
use remoteid_shared::{Frame, SecureCommandResponse, SignedRequest, Transport, TransportError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tracing::{debug, warn};

/// Frames queued in either direction before back-pressure kicks in
const CHANNEL_DEPTH: usize = 32;

/// Byte stream a link runs over
pub trait LinkStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> LinkStream for T {}

/// Client-side end of a link
pub struct ChannelTransport {
    local_node: u32,
    outbound_tx: mpsc::Sender<Frame>,
    inbound_rx: mpsc::Receiver<SecureCommandResponse>,
    closed: bool,
}

impl ChannelTransport {
    /// Build a transport from raw channel ends
    pub fn new(
        local_node: u32,
        outbound_tx: mpsc::Sender<Frame>,
        inbound_rx: mpsc::Receiver<SecureCommandResponse>,
    ) -> Self {
        Self {
            local_node,
            outbound_tx,
            inbound_rx,
            closed: false,
        }
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, request: &SignedRequest, target_node: u32) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed("link task ended".into()));
        }

        let frame = Frame::request(self.local_node, target_node, request.to_wire());
        match self.outbound_tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                // dropped like a lost bus frame; the client retries after timeout
                warn!("Outbound queue full, dropping request seq={}", request.sequence);
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                self.closed = true;
                Err(TransportError::Closed("link writer closed".into()))
            }
        }
    }

    fn poll(&mut self) -> Option<SecureCommandResponse> {
        match self.inbound_rx.try_recv() {
            Ok(response) => Some(response),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.closed = true;
                None
            }
        }
    }
}

/// Spawn the link task for `stream` and return the client end
pub fn spawn_link<S: LinkStream>(stream: S, local_node: u32) -> ChannelTransport {
    let (outbound_tx, outbound_rx) = mpsc::channel::<Frame>(CHANNEL_DEPTH);
    let (inbound_tx, inbound_rx) = mpsc::channel::<SecureCommandResponse>(CHANNEL_DEPTH);

    tokio::spawn(async move {
        if let Err(e) = link_loop(stream, local_node, outbound_rx, inbound_tx).await {
            warn!("Link closed: {}", e);
        }
    });

    ChannelTransport::new(local_node, outbound_tx, inbound_rx)
}

/// Run the link until either side closes, then shut the stream down
async fn link_loop<S: LinkStream>(
    stream: S,
    local_node: u32,
    outbound_rx: mpsc::Receiver<Frame>,
    inbound_tx: mpsc::Sender<SecureCommandResponse>,
) -> anyhow::Result<()> {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let result = pump(&mut reader, &mut writer, local_node, outbound_rx, inbound_tx).await;

    if let Err(e) = writer.shutdown().await {
        debug!("Link shutdown: {}", e);
    }
    result
}

/// Move frames between the stream halves and the channels
async fn pump<S: LinkStream>(
    reader: &mut ReadHalf<S>,
    writer: &mut WriteHalf<S>,
    local_node: u32,
    mut outbound_rx: mpsc::Receiver<Frame>,
    inbound_tx: mpsc::Sender<SecureCommandResponse>,
) -> anyhow::Result<()> {
    let mut decoder = FrameDecoder::new();
    let mut read_buf = vec![0u8; 1024];

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let Some(frame) = outbound else {
                    return Ok(());
                };
                let encoded = codec::encode(&frame)?;
                writer.write_all(&encoded).await?;
            }

            read = reader.read(&mut read_buf) => {
                let n = read?;
                if n == 0 {
                    return Err(anyhow::anyhow!("node closed connection"));
                }
                decoder.extend(&read_buf[..n]);

                while let Some(frame) = decoder.decode_next()? {
                    if frame.target_node != local_node {
                        debug!("Ignoring frame for node {}", frame.target_node);
                        continue;
                    }
                    match frame.body {
                        Some(frame::Body::Response(response)) => {
                            if inbound_tx.send(response).await.is_err() {
                                return Ok(());
                            }
                        }
                        Some(frame::Body::Request(_)) | None => {
                            debug!("Ignoring non-response frame from node {}", frame.source_node);
                        }
                    }
                }
            }
        }
    }
}
