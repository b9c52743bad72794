//! Wire protocol between Core and the Gateway.
//!
//! Each frame is a big-endian length prefix followed by one JSON-encoded
//! [`IpcMessage`]. A connection carries any number of request/reply pairs.

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::bytes::Bytes;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::trace;

use crate::error::{Result, WardError};
use crate::types::{ActionResponse, IpcEnvelope};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum IpcMessage {
    /// Core → Gateway: execute a signed action.
    Action(IpcEnvelope),
    /// Gateway → Core: outcome of an action.
    Response(ActionResponse),
    Ping,
    Pong,
}

pub type FramedIpc<T> = Framed<T, LengthDelimitedCodec>;

/// Wrap a byte stream in the length-delimited codec.
pub fn framed<T>(io: T, max_frame_bytes: usize) -> FramedIpc<T>
where
    T: AsyncRead + AsyncWrite,
{
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_bytes)
        .new_codec();
    Framed::new(io, codec)
}

pub async fn send_message<T>(framed: &mut FramedIpc<T>, message: &IpcMessage) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let bytes = serde_json::to_vec(message)?;
    trace!(len = bytes.len(), "sending frame");
    framed
        .send(Bytes::from(bytes))
        .await
        .map_err(|e| WardError::Ipc(format!("send failed: {e}")))
}

/// Next message, or `None` once the peer closed the connection.
pub async fn recv_message<T>(framed: &mut FramedIpc<T>) -> Result<Option<IpcMessage>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    match framed.next().await {
        None => Ok(None),
        Some(Err(e)) => Err(WardError::Ipc(format!("receive failed: {e}"))),
        Some(Ok(frame)) => {
            trace!(len = frame.len(), "received frame");
            serde_json::from_slice(&frame)
                .map(Some)
                .map_err(|e| WardError::Ipc(format!("malformed message: {e}")))
        }
    }
}
