use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};
use ward_core::ipc::{framed, recv_message, send_message};
use ward_core::{IpcMessage, Result, WardError};

use crate::pipeline::Gateway;

/// Serve one connection until the peer hangs up.
pub async fn handle_connection<T>(gateway: Arc<Gateway>, io: T, max_frame_bytes: usize) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = framed(io, max_frame_bytes);
    while let Some(message) = recv_message(&mut framed).await? {
        let reply = match message {
            IpcMessage::Action(envelope) => IpcMessage::Response(gateway.handle(envelope).await),
            IpcMessage::Ping => IpcMessage::Pong,
            other => {
                warn!(?other, "unexpected message from core");
                continue;
            }
        };
        send_message(&mut framed, &reply).await?;
    }
    debug!("connection closed");
    Ok(())
}

/// Unix socket listener in front of a [`Gateway`].
pub struct IpcServer {
    gateway: Arc<Gateway>,
    socket_path: PathBuf,
    max_frame_bytes: usize,
}

impl IpcServer {
    pub fn new(gateway: Arc<Gateway>, socket_path: PathBuf, max_frame_bytes: usize) -> Self {
        Self {
            gateway,
            socket_path,
            max_frame_bytes,
        }
    }

    /// Accept connections until `shutdown` resolves. One task per connection.
    #[cfg(unix)]
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        use tokio::net::UnixListener;

        if let Some(parent) = self.socket_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        remove_stale_socket(&self.socket_path)?;
        let listener = UnixListener::bind(&self.socket_path).map_err(|e| {
            WardError::Ipc(format!("cannot bind {}: {e}", self.socket_path.display()))
        })?;
        set_owner_only(&self.socket_path)?;
        info!(socket = %self.socket_path.display(), "gateway listening");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let gateway = Arc::clone(&self.gateway);
                        let max = self.max_frame_bytes;
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(gateway, stream, max).await {
                                warn!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }

        info!("gateway shutting down");
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            debug!(error = %e, "socket already removed");
        }
        Ok(())
    }
}

#[cfg(unix)]
fn remove_stale_socket(path: &Path) -> Result<()> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            std::fs::remove_file(path)?;
            Ok(())
        }
        Ok(_) => Err(WardError::Ipc(format!(
            "{} exists and is not a socket",
            path.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
