use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use ward_config::IpcConfig;
use ward_core::{ActionResponse, IpcEnvelope, IpcMessage, Result, WardError};

/// How Core reaches the Gateway.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    /// Deliver a signed envelope and wait for the Gateway's verdict.
    async fn send(&self, envelope: IpcEnvelope) -> Result<ActionResponse>;

    /// Health check.
    async fn ping(&self) -> Result<()>;
}

/// Unix socket client. Opens one connection per exchange so a stuck request
/// never blocks the next one.
#[derive(Debug, Clone)]
pub struct IpcClient {
    socket_path: PathBuf,
    timeout: Duration,
    max_frame_bytes: usize,
}

impl IpcClient {
    pub fn new(socket_path: PathBuf, timeout: Duration, max_frame_bytes: usize) -> Self {
        Self {
            socket_path,
            timeout,
            max_frame_bytes,
        }
    }

    /// Client for the socket named in `[ipc]`, already resolved to an absolute path.
    pub fn from_config(config: &IpcConfig, socket_path: PathBuf) -> Self {
        Self::new(
            socket_path,
            Duration::from_secs(config.request_timeout_secs),
            config.max_frame_bytes,
        )
    }

    pub fn socket_path(&self) -> &std::path::Path {
        &self.socket_path
    }

    async fn exchange(&self, message: IpcMessage) -> Result<IpcMessage> {
        let secs = self.timeout.as_secs();
        match tokio::time::timeout(self.timeout, self.round_trip(message)).await {
            Ok(reply) => reply,
            Err(_) => Err(WardError::Ipc(format!("gateway did not answer within {secs}s"))),
        }
    }

    #[cfg(unix)]
    async fn round_trip(&self, message: IpcMessage) -> Result<IpcMessage> {
        use tokio::net::UnixStream;
        use ward_core::ipc::{framed, recv_message, send_message};

        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            WardError::Ipc(format!(
                "cannot reach gateway at {}: {e}",
                self.socket_path.display()
            ))
        })?;
        let mut conn = framed(stream, self.max_frame_bytes);
        send_message(&mut conn, &message).await?;
        recv_message(&mut conn)
            .await?
            .ok_or_else(|| WardError::Ipc("gateway closed the connection".into()))
    }

    #[cfg(not(unix))]
    async fn round_trip(&self, _message: IpcMessage) -> Result<IpcMessage> {
        Err(WardError::Ipc(
            "gateway IPC requires Unix domain sockets".into(),
        ))
    }
}

#[async_trait]
impl GatewayTransport for IpcClient {
    async fn send(&self, envelope: IpcEnvelope) -> Result<ActionResponse> {
        let request_id = envelope.id.clone();
        debug!(request_id = %request_id, action = %envelope.action, "sending to gateway");
        match self.exchange(IpcMessage::Action(envelope)).await? {
            IpcMessage::Response(response) if response.request_id == request_id => Ok(response),
            IpcMessage::Response(response) => Err(WardError::Ipc(format!(
                "gateway answered {} for request {request_id}",
                response.request_id
            ))),
            other => Err(WardError::Ipc(format!(
                "unexpected gateway reply: {other:?}"
            ))),
        }
    }

    async fn ping(&self) -> Result<()> {
        match self.exchange(IpcMessage::Ping).await? {
            IpcMessage::Pong => Ok(()),
            other => Err(WardError::Ipc(format!(
                "unexpected gateway reply: {other:?}"
            ))),
        }
    }
}
