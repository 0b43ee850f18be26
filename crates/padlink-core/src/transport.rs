//! TCP transport for client sessions.
//!
//! A thin layer that bridges an ordered byte stream to frame channels: one
//! writer task drains outbound frames, one reader task feeds the
//! [`FrameCutter`] and delivers complete frames inbound. Protocol logic
//! stays in the session layer.

use padlink_proto::{Frame, FrameCutter};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
    task::AbortHandle,
};

/// Host/port pair of a broker endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLocation {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl std::fmt::Display for ServerLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connecting to the broker failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The stream broke mid-session.
    #[error("stream error: {0}")]
    Stream(String),
}

/// Depth of the inbound/outbound frame channels.
const CHANNEL_DEPTH: usize = 64;

/// Handle to the transport's background tasks.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    reader: AbortHandle,
    writer: AbortHandle,
}

impl TransportHandle {
    /// Abort both I/O tasks, closing the connection.
    pub fn stop(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// A connected transport: frame channels plus the task handle.
///
/// Dropping the inbound receiver or aborting via the handle closes the
/// connection; the session layer observes closure as the inbound channel
/// ending.
#[derive(Debug)]
pub struct Connected {
    /// Frames to send to the broker.
    pub outbound: mpsc::Sender<Frame>,
    /// Frames received from the broker.
    pub inbound: mpsc::Receiver<Frame>,
    handle: TransportHandle,
}

impl Connected {
    /// Handle for stopping the transport tasks.
    #[must_use]
    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    /// Split into channels and task handle.
    #[must_use]
    pub fn into_parts(self) -> (mpsc::Sender<Frame>, mpsc::Receiver<Frame>, TransportHandle) {
        (self.outbound, self.inbound, self.handle)
    }
}

/// Connect to a broker over plain TCP.
pub async fn connect(server: &ServerLocation) -> Result<Connected, TransportError> {
    let stream = TcpStream::connect((server.host.as_str(), server.port))
        .await
        .map_err(|e| TransportError::Connect(format!("{server}: {e}")))?;
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("set_nodelay failed: {e}");
    }
    Ok(spawn_io(stream))
}

/// Spawn reader/writer tasks over any ordered byte stream.
///
/// Exposed so callers can wrap pre-established streams (TLS, in-process
/// duplex pipes in tests).
pub fn spawn_io<S>(stream: S) -> Connected
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(CHANNEL_DEPTH);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Frame>(CHANNEL_DEPTH);

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let bytes = match frame.to_bytes() {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("dropping unencodable frame: {e}");
                    continue;
                },
            };
            if let Err(e) = write_half.write_all(&bytes).await {
                tracing::debug!("write failed: {e}");
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let reader = tokio::spawn(async move {
        let mut cutter = FrameCutter::new();
        'read: loop {
            match read_half.read_buf(cutter.buffer_mut()).await {
                Ok(0) => break,
                Ok(_) => {},
                Err(e) => {
                    tracing::debug!("read failed: {e}");
                    break;
                },
            }
            loop {
                match cutter.next_frame() {
                    Ok(Some(frame)) => {
                        if inbound_tx.send(frame).await.is_err() {
                            break 'read;
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        // framing errors are unrecoverable on a byte stream
                        tracing::warn!("framing error, dropping connection: {e}");
                        break 'read;
                    },
                }
            }
        }
    });

    Connected {
        outbound: outbound_tx,
        inbound: inbound_rx,
        handle: TransportHandle { reader: reader.abort_handle(), writer: writer.abort_handle() },
    }
}

#[cfg(test)]
mod tests {
    use padlink_proto::Frame;

    use super::*;

    #[tokio::test]
    async fn frames_cross_a_duplex_pipe() {
        let (a, b) = tokio::io::duplex(1024);
        let left = spawn_io(a);
        let mut right = spawn_io(b);

        let frame = Frame::new(5, 7, &b"hello"[..]);
        left.outbound.send(frame.clone()).await.unwrap();
        assert_eq!(right.inbound.recv().await, Some(frame));
    }

    #[tokio::test]
    async fn closed_peer_ends_inbound_channel() {
        let (a, b) = tokio::io::duplex(1024);
        let left = spawn_io(a);
        let mut right = spawn_io(b);

        left.handle().stop();
        assert_eq!(right.inbound.recv().await, None);
    }

    #[tokio::test]
    async fn framing_error_drops_connection() {
        let (a, mut b) = tokio::io::duplex(1024);
        let mut left = spawn_io(a);

        // size field of 3 is below the header size
        b.write_all(&[3, 0, 0, 0, 0, 0, 0, 0]).await.unwrap();
        assert_eq!(left.inbound.recv().await, None);
    }
}
