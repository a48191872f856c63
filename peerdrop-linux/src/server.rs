//! Owner side: lazily bound listener on the transfer port, one inbound transfer at a time.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use peerdrop_core::{DropError, ProgressSink, TransferResult};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::channel::SlotGuard;
use crate::stream;

/// Listening endpoint for one owner episode. Created at most once per episode, closed on
/// role loss or shutdown.
pub struct TransferServer {
    bind: SocketAddr,
    listener: Option<Arc<TcpListener>>,
    episode: Option<u64>,
}

impl TransferServer {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            listener: None,
            episode: None,
        }
    }

    /// Bind for `episode` unless already bound for it. A failed bind leaves the server
    /// closed so a later call can retry.
    pub async fn listen(&mut self, episode: u64) -> Result<SocketAddr, DropError> {
        if self.episode == Some(episode) {
            if let Some(addr) = self.local_addr() {
                return Ok(addr);
            }
        } else {
            self.close();
        }
        self.episode = Some(episode);
        match TcpListener::bind(self.bind).await {
            Ok(listener) => {
                let addr = listener.local_addr().map_err(|e| DropError::Socket(e.to_string()))?;
                info!(%addr, episode, "transfer listener opened");
                self.listener = Some(Arc::new(listener));
                Ok(addr)
            }
            Err(e) => {
                error!(bind = %self.bind, error = %e, "failed to open transfer listener");
                Err(DropError::Socket(format!("bind {}: {}", self.bind, e)))
            }
        }
    }

    /// Listener for `episode`, binding it first if the episode has none yet (including after a
    /// failed bind).
    pub async fn listener_for(&mut self, episode: u64) -> Result<Arc<TcpListener>, DropError> {
        self.listen(episode).await?;
        self.listener
            .clone()
            .ok_or_else(|| DropError::Socket("listener unavailable".into()))
    }

    pub fn close(&mut self) {
        if self.listener.take().is_some() {
            debug!(episode = ?self.episode, "transfer listener closed");
        }
        self.episode = None;
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Wait for one connection on `listener` and receive a file from it into `dest_dir`.
    /// Runs on the transfer worker; returns early with a failure if cancelled.
    pub async fn accept_and_receive<S: ProgressSink>(
        listener: Arc<TcpListener>,
        dest_dir: &Path,
        sink: S,
        mut guard: SlotGuard,
    ) -> TransferResult {
        let id = guard.id();
        let accepted = tokio::select! {
            biased;
            _ = guard.cancel_signal().cancelled() => {
                return TransferResult::failed(id, 0, None, "transfer cancelled while waiting for a connection");
            }
            r = listener.accept() => r,
        };
        drop(listener);
        let (mut socket, from) = match accepted {
            Ok(x) => x,
            Err(e) => return TransferResult::failed(id, 0, None, format!("accept failed: {}", e)),
        };
        debug!(transfer = %id, %from, "transfer connection accepted");
        stream::receive_over(id, &mut socket, dest_dir, sink, guard.cancel_signal()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::TransferSlot;
    use peerdrop_core::{ErrorKind, TransferProgress};
    use tokio::io::AsyncWriteExt;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn listener_created_once_per_episode() {
        let mut server = TransferServer::new(loopback());
        let a = server.listen(1).await.unwrap();
        let b = server.listen(1).await.unwrap();
        assert_eq!(a, b);
        let c = server.listen(2).await.unwrap();
        assert_eq!(server.local_addr(), Some(c));
        server.close();
        assert_eq!(server.local_addr(), None);
    }

    #[tokio::test]
    async fn bind_failure_is_socket_error_and_retryable() {
        let taken = std::net::TcpListener::bind(loopback()).unwrap();
        let mut server = TransferServer::new(taken.local_addr().unwrap());
        let err = server.listen(1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SocketError);
        assert_eq!(server.local_addr(), None);
        drop(taken);
        assert!(server.listener_for(1).await.is_ok());
    }

    #[tokio::test]
    async fn receives_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = TransferServer::new(loopback());
        let addr = server.listen(1).await.unwrap();
        let listener = server.listener_for(1).await.unwrap();
        let guard = TransferSlot::new().acquire().unwrap();
        let dest = dir.path().to_path_buf();
        let worker = tokio::spawn(async move {
            TransferServer::accept_and_receive(listener, &dest, |_: TransferProgress| {}, guard).await
        });

        let mut socket = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut frame = peerdrop_core::wire::encode_header("hello.txt", 5).unwrap();
        frame.extend_from_slice(b"hello");
        socket.write_all(&frame).await.unwrap();
        socket.shutdown().await.unwrap();

        let r = worker.await.unwrap();
        assert!(r.success, "{:?}", r.detail);
        assert_eq!(r.bytes_moved, 5);
        assert_eq!(std::fs::read(dir.path().join("hello.txt")).unwrap(), b"hello");
    }
}
