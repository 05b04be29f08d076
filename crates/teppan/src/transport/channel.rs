use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

/// Upper bound on a single frame's payload.
///
/// A larger length prefix means the stream is out of step, not that a
/// client sent half a gigabyte.
pub const MAX_FRAME_LEN: usize = 512 * 1024 * 1024;

/// A bidirectional, message-framed connection.
///
/// Each frame is a 4-byte big-endian length followed by a MessagePack payload.
/// A payload that fails to decode leaves the stream aligned on the next frame,
/// so the peer can be asked to resend.
pub struct Channel<S> {
    stream: S,
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Serialize `message` and write it as one frame.
    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), TransportError> {
        let payload = rmp_serde::to_vec(message)?;
        self.send_raw(&payload).await
    }

    /// Write an already-encoded payload as one frame.
    pub async fn send_raw(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(payload.len()));
        }
        self.stream.write_u32(payload.len() as u32).await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the peer closed the connection between frames.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>, TransportError> {
        let mut header = [0u8; 4];
        let read = self.stream.read(&mut header).await?;
        if read == 0 {
            return Ok(None);
        }
        self.stream.read_exact(&mut header[read..]).await?;

        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(len));
        }
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await?;
        Ok(Some(rmp_serde::from_slice(&payload)?))
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
