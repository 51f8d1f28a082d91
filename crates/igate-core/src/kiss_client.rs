//! TNC interface abstraction
//!
//! The gateway reads KISS frames from a TNC. In practice that is a software
//! modem exposing KISS over TCP, but any byte stream works, which is how the
//! tests drive it.

use crate::TncError;
use async_trait::async_trait;
use igate_proto::{encode_frame, FrameExtractor, FrameType, RawFrame};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Default KISS TCP port
pub const DEFAULT_KISS_PORT: u16 = 8001;

/// Size of a single socket read
const READ_CHUNK_SIZE: usize = 4096;

/// TNC interface trait
///
/// Implementations provide KISS frames from some byte stream.
#[async_trait]
pub trait TncInterface: Send {
    /// Wait for the next frame
    ///
    /// Cancel-safe: dropping the future loses no buffered bytes, so callers
    /// may wrap it in a timeout.
    async fn read_frame(&mut self) -> Result<RawFrame, TncError>;

    /// Send a frame to the TNC
    async fn send_frame(
        &mut self,
        channel: u8,
        frame_type: FrameType,
        payload: &[u8],
    ) -> Result<(), TncError>;

    /// Get the interface name
    fn name(&self) -> &str;

    /// Check if the interface is open
    fn is_connected(&self) -> bool;

    /// Close the interface; safe to call repeatedly
    async fn close(&mut self);
}

/// KISS over any async byte stream
pub struct KissConnection<S> {
    name: String,
    stream: Option<S>,
    extractor: FrameExtractor,
}

impl KissConnection<TcpStream> {
    /// Connect to a KISS TCP server
    pub async fn connect(host: &str, port: u16, limit: Duration) -> Result<Self, TncError> {
        let addr = format!("{}:{}", host, port);
        debug!("Connecting to KISS server at {}", addr);

        let stream = match timeout(limit, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(TncError::Connect { addr, source }),
            Err(_) => return Err(TncError::ConnectTimeout(addr)),
        };

        info!("Connected to KISS server at {}", addr);
        Ok(Self::new(addr, stream))
    }

    /// Connect, retrying a fixed number of times
    ///
    /// Used at startup while the modem process is still coming up.
    pub async fn connect_with_retry(
        host: &str,
        port: u16,
        limit: Duration,
        attempts: usize,
        delay: Duration,
    ) -> Result<Self, TncError> {
        let mut last_error = TncError::NotConnected;

        for attempt in 1..=attempts.max(1) {
            match Self::connect(host, port, limit).await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    debug!(attempt, "KISS connect attempt failed: {}", e);
                    last_error = e;
                }
            }
            if attempt < attempts {
                sleep(delay).await;
            }
        }

        Err(last_error)
    }
}

impl<S> KissConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already-open stream
    pub fn new(name: impl Into<String>, stream: S) -> Self {
        Self {
            name: name.into(),
            stream: Some(stream),
            extractor: FrameExtractor::new(),
        }
    }
}

#[async_trait]
impl<S> TncInterface for KissConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_frame(&mut self) -> Result<RawFrame, TncError> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            // Drain buffered frames before touching the socket
            let before = self.extractor.buffered();
            if let Some(frame) = self.extractor.try_extract()? {
                return Ok(frame);
            }
            if self.extractor.buffered() < before {
                continue;
            }

            let stream = self.stream.as_mut().ok_or(TncError::NotConnected)?;
            let read = stream.read(&mut chunk).await?;
            if read == 0 {
                return Err(TncError::Closed);
            }
            self.extractor.feed(&chunk[..read]);
        }
    }

    async fn send_frame(
        &mut self,
        channel: u8,
        frame_type: FrameType,
        payload: &[u8],
    ) -> Result<(), TncError> {
        let stream = self.stream.as_mut().ok_or(TncError::NotConnected)?;
        let frame = encode_frame(channel, frame_type, payload);

        stream.write_all(&frame).await?;
        stream.flush().await?;

        debug!(
            channel,
            frame_type = ?frame_type,
            len = payload.len(),
            "Sent KISS frame"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        if let Err(e) = stream.shutdown().await {
            warn!("Error closing KISS connection {}: {}", self.name, e);
        }
        self.extractor.clear();
        info!("Closed KISS connection {}", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use igate_proto::FrameError;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_read_frame_across_reads() {
        let frame = encode_frame(2, FrameType::Data, b"test aprs");
        let (first, second) = frame.split_at(4);
        let mock = Builder::new().read(first).read(second).build();

        let mut conn = KissConnection::new("mock", mock);
        let received = conn.read_frame().await.unwrap();

        assert_eq!(received.channel, 2);
        assert_eq!(received.frame_type, FrameType::Data);
        assert_eq!(received.payload.as_ref(), b"test aprs");
    }

    #[tokio::test]
    async fn test_buffered_frames_returned_without_reading() {
        let mut bytes = encode_frame(0, FrameType::Data, b"one");
        bytes.extend_from_slice(&[0xC0, 0xC0]);
        bytes.extend_from_slice(&encode_frame(0, FrameType::Data, b"two"));
        let mock = Builder::new().read(&bytes).build();

        let mut conn = KissConnection::new("mock", mock);
        assert_eq!(conn.read_frame().await.unwrap().payload.as_ref(), b"one");
        assert_eq!(conn.read_frame().await.unwrap().payload.as_ref(), b"two");
    }

    #[tokio::test]
    async fn test_closed_by_remote() {
        let mock = Builder::new().read(b"\xC0\x00partial").build();

        let mut conn = KissConnection::new("mock", mock);
        assert!(matches!(conn.read_frame().await, Err(TncError::Closed)));
    }

    #[tokio::test]
    async fn test_framing_error_surfaces_then_recovers() {
        let mut bytes = vec![0xC0, 0x00, 0xDB, 0x41, 0xC0];
        bytes.extend_from_slice(&encode_frame(0, FrameType::Data, b"good"));
        let mock = Builder::new().read(&bytes).build();

        let mut conn = KissConnection::new("mock", mock);
        assert!(matches!(
            conn.read_frame().await,
            Err(TncError::Frame(FrameError::InvalidEscape(0x41)))
        ));
        assert_eq!(conn.read_frame().await.unwrap().payload.as_ref(), b"good");
    }

    #[tokio::test]
    async fn test_send_frame() {
        let expected = encode_frame(0, FrameType::Data, &[0x01, 0xC0, 0x02]);
        let mock = Builder::new().write(&expected).build();

        let mut conn = KissConnection::new("mock", mock);
        conn.send_frame(0, FrameType::Data, &[0x01, 0xC0, 0x02])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_idempotent() {
        let (client, _server) = tokio::io::duplex(64);

        let mut conn = KissConnection::new("duplex", client);
        assert!(conn.is_connected());

        conn.close().await;
        conn.close().await;

        assert!(!conn.is_connected());
        assert!(matches!(conn.read_frame().await, Err(TncError::NotConnected)));
    }
}
