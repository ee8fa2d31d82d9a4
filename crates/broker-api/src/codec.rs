//! Length-prefixed JSON framing: 4-byte big-endian length, then the
//! serialized message. Both connection kinds speak it in both directions.

use crate::BrokerError;
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame. Output chunks are far smaller; anything
/// past this is a corrupt length prefix.
pub const MAX_FRAME_BYTES: u32 = 8 * 1024 * 1024;

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), BrokerError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload =
        serde_json::to_vec(message).map_err(|err| BrokerError::Protocol(err.to_string()))?;
    if payload.len() > MAX_FRAME_BYTES as usize {
        return Err(BrokerError::Protocol(format!(
            "frame too large: {} bytes",
            payload.len()
        )));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, BrokerError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(map_read_err)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(BrokerError::Protocol(format!("frame too large: {len} bytes")));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await.map_err(map_read_err)?;
    serde_json::from_slice(&payload).map_err(|err| BrokerError::Protocol(err.to_string()))
}

fn map_read_err(err: std::io::Error) -> BrokerError {
    if err.kind() == std::io::ErrorKind::Interrupted {
        BrokerError::Interrupted
    } else {
        BrokerError::Io(err)
    }
}
