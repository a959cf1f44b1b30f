use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection closed by peer")]
    Closed,
    #[error("No heart-beat received within {0:?}")]
    HeartbeatTimeout(std::time::Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Message(String),
    Heartbeat,
}

/// Source of push sessions subscribed to a single topic.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self, topic: &str) -> Result<Box<dyn PushSession>, TransportError>;
}

#[async_trait]
pub trait PushSession: Send {
    /// Waits for the next inbound frame. Must be cancel-safe: dropping the
    /// returned future before completion loses no frame.
    async fn next_frame(&mut self) -> Result<Frame, TransportError>;

    async fn send_heartbeat(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self);
}

/// Newline-framed push transport over TCP. The first line sent is
/// `SUBSCRIBE <topic>`; every further line from the server is one JSON
/// message, and an empty line is a heart-beat in either direction.
pub struct TcpLineTransport {
    address: String,
}

impl TcpLineTransport {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl PushTransport for TcpLineTransport {
    async fn connect(&self, topic: &str) -> Result<Box<dyn PushSession>, TransportError> {
        tracing::debug!("Opening push connection to {}", self.address);
        let stream = TcpStream::connect(&self.address).await?;
        stream.set_nodelay(true)?;

        let (read_half, mut write_half) = stream.into_split();
        write_half
            .write_all(format!("SUBSCRIBE {}\n", topic).as_bytes())
            .await?;

        Ok(Box::new(TcpLineSession {
            lines: BufReader::new(read_half).lines(),
            writer: write_half,
        }))
    }
}

struct TcpLineSession {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

#[async_trait]
impl PushSession for TcpLineSession {
    async fn next_frame(&mut self) -> Result<Frame, TransportError> {
        match self.lines.next_line().await? {
            Some(line) if line.trim().is_empty() => Ok(Frame::Heartbeat),
            Some(line) => Ok(Frame::Message(line)),
            None => Err(TransportError::Closed),
        }
    }

    async fn send_heartbeat(&mut self) -> Result<(), TransportError> {
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!("Error while closing push connection: {}", e);
        }
    }
}
