//! Line transports for the push channel
//!
//! A [`Connector`] turns an endpoint string into a [`Link`]: a stream of inbound
//! frames and a sink for outbound lines. The channel's state machine only ever
//! sees links, so tests swap in an in-memory connector and production uses
//! [`TcpConnector`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::events::MalformedMessage;

use super::config::ChannelConfig;
use super::error::ChannelError;

const READ_BUFFER_BYTES: usize = 8 * 1024;

/// One inbound line, or the reason it could not be framed
pub type InboundFrame = Result<String, MalformedMessage>;

/// A live connection
///
/// `inbound` yields `None` once the peer is gone. Dropping the link closes it.
#[derive(Debug)]
pub struct Link {
    pub inbound: mpsc::Receiver<InboundFrame>,
    pub outbound: mpsc::Sender<String>,
}

/// The far side of an in-memory [`Link`]
#[derive(Debug)]
pub struct LinkPeer {
    pub to_client: mpsc::Sender<InboundFrame>,
    pub from_client: mpsc::Receiver<String>,
}

impl Link {
    /// In-memory link and its peer
    pub fn pair(buffer: usize) -> (Link, LinkPeer) {
        let (to_client, inbound) = mpsc::channel(buffer.max(1));
        let (outbound, from_client) = mpsc::channel(buffer.max(1));
        (Link { inbound, outbound }, LinkPeer { to_client, from_client })
    }
}

/// Opens links to a push endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Link, ChannelError>;
}

/// Accepts `tcp://host:port` or bare `host:port`
pub fn parse_endpoint(endpoint: &str) -> Result<String, ChannelError> {
    let trimmed = endpoint.trim();
    let addr = trimmed.strip_prefix("tcp://").unwrap_or(trimmed).trim_end_matches('/');
    if addr.is_empty() || addr.contains("://") || !addr.contains(':') {
        return Err(ChannelError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok(addr.to_string())
}

/// Newline-delimited JSON over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    buffer: usize,
    max_frame_bytes: usize,
}

impl TcpConnector {
    pub fn new(config: &ChannelConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            buffer: config.send_buffer.max(1),
            max_frame_bytes: config.max_frame_bytes,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &str) -> Result<Link, ChannelError> {
        let addr = parse_endpoint(endpoint)?;
        debug!(%addr, "TcpConnector::connect: called");

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ChannelError::ConnectTimeout(self.connect_timeout))??;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let (in_tx, inbound) = mpsc::channel(self.buffer);
        let (outbound, out_rx) = mpsc::channel(self.buffer);

        tokio::spawn(read_lines(read_half, in_tx, self.max_frame_bytes));
        tokio::spawn(write_lines(write_half, out_rx));

        debug!(%addr, "TcpConnector::connect: link established");
        Ok(Link { inbound, outbound })
    }
}

async fn read_lines(mut read_half: OwnedReadHalf, in_tx: mpsc::Sender<InboundFrame>, max_frame_bytes: usize) {
    let mut codec = LinesCodec::new_with_max_length(max_frame_bytes);
    let mut buf = BytesMut::with_capacity(READ_BUFFER_BYTES);
    let mut eof = false;

    loop {
        // Drain every complete line already buffered before reading more
        loop {
            let decoded = if eof {
                codec.decode_eof(&mut buf)
            } else {
                codec.decode(&mut buf)
            };
            let frame = match decoded {
                Ok(Some(line)) => Ok(line),
                Ok(None) => break,
                Err(LinesCodecError::MaxLineLengthExceeded) => Err(MalformedMessage::TooLarge { max: max_frame_bytes }),
                Err(LinesCodecError::Io(_)) => Err(MalformedMessage::Encoding),
            };
            if in_tx.send(frame).await.is_err() {
                return;
            }
        }

        if eof {
            break;
        }

        let read = tokio::select! {
            _ = in_tx.closed() => break,
            read = read_half.read_buf(&mut buf) => read,
        };
        match read {
            Ok(0) => eof = true,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "TcpConnector: read failed");
                break;
            }
        }
    }
    debug!("TcpConnector: reader finished");
}

async fn write_lines(mut write_half: OwnedWriteHalf, mut out_rx: mpsc::Receiver<String>) {
    while let Some(line) = out_rx.recv().await {
        let result = async {
            write_half.write_all(line.as_bytes()).await?;
            write_half.write_all(b"\n").await?;
            write_half.flush().await
        }
        .await;
        if let Err(e) = result {
            warn!(error = %e, "TcpConnector: write failed");
            break;
        }
    }
    let _ = write_half.shutdown().await;
    debug!("TcpConnector: writer finished");
}
