//! Client side: dial the group owner's transfer port and stream one file to it.

use std::net::SocketAddr;
use std::time::Duration;

use peerdrop_core::{
    ConnectionInfo, DropError, ProgressSink, Role, TransferDescriptor, TransferResult,
};
use tokio::fs::File;
use tokio::net::TcpStream;
use tracing::{debug, error};

use crate::channel::SlotGuard;
use crate::stream;

#[derive(Debug, Clone, Copy)]
pub struct TransferClient {
    port: u16,
    connect_timeout: Duration,
}

impl TransferClient {
    pub fn new(port: u16, connect_timeout: Duration) -> Self {
        Self {
            port,
            connect_timeout,
        }
    }

    /// Owner endpoint for a send from the client role.
    pub fn target(&self, connection: &ConnectionInfo) -> Result<SocketAddr, DropError> {
        if connection.role() != Some(Role::Client) {
            return Err(DropError::NotConnected);
        }
        let owner = connection.owner_address.ok_or(DropError::NoAddress)?;
        Ok(SocketAddr::new(owner, self.port))
    }

    /// Open the source and check it against the declared size. Runs before any socket is opened.
    pub async fn prepare(descriptor: &TransferDescriptor) -> Result<File, DropError> {
        let missing = || DropError::FileNotFound(descriptor.source_path.clone());
        let meta = tokio::fs::metadata(&descriptor.source_path)
            .await
            .map_err(|_| missing())?;
        if !meta.is_file() {
            return Err(missing());
        }
        if meta.len() != descriptor.file_size {
            return Err(DropError::SizeMismatch {
                declared: descriptor.file_size,
                actual: meta.len(),
            });
        }
        File::open(&descriptor.source_path).await.map_err(|_| missing())
    }

    pub async fn dial(&self, addr: SocketAddr) -> Result<TcpStream, DropError> {
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(s)) => {
                let _ = s.set_nodelay(true);
                Ok(s)
            }
            Ok(Err(e)) => {
                error!(%addr, error = %e, "transfer connect failed");
                Err(DropError::Socket(format!("connect {}: {}", addr, e)))
            }
            Err(_) => {
                error!(%addr, timeout = ?self.connect_timeout, "transfer connect timed out");
                Err(DropError::Socket(format!("connect {}: timed out", addr)))
            }
        }
    }

    /// Dial `addr` and send `source` as described. Runs on the transfer worker.
    pub async fn send<S: ProgressSink>(
        &self,
        addr: SocketAddr,
        descriptor: TransferDescriptor,
        mut source: File,
        sink: S,
        mut guard: SlotGuard,
    ) -> TransferResult {
        let id = guard.id();
        let dialed = tokio::select! {
            biased;
            _ = guard.cancel_signal().cancelled() => {
                return TransferResult::failed(id, 0, None, "transfer cancelled before connecting");
            }
            r = self.dial(addr) => r,
        };
        let mut socket = match dialed {
            Ok(s) => s,
            Err(e) => return TransferResult::aborted(id, &e),
        };
        debug!(transfer = %id, %addr, file = %descriptor.file_name, "sending");
        stream::send_over(
            id,
            &mut socket,
            &descriptor,
            &mut source,
            sink,
            guard.cancel_signal(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::TransferSlot;
    use peerdrop_core::{ErrorKind, TransferProgress};
    use tokio::io::AsyncReadExt;

    fn client_link(owner: Option<&str>) -> ConnectionInfo {
        ConnectionInfo {
            connected: true,
            is_owner: false,
            owner_address: owner.map(|a| a.parse().unwrap()),
        }
    }

    #[test]
    fn target_requires_client_role_and_owner_address() {
        let c = TransferClient::new(8988, Duration::from_secs(1));
        assert_eq!(
            c.target(&ConnectionInfo::default()),
            Err(DropError::NotConnected)
        );
        let owner = ConnectionInfo {
            is_owner: true,
            ..client_link(Some("192.168.49.1"))
        };
        assert_eq!(c.target(&owner), Err(DropError::NotConnected));
        assert_eq!(c.target(&client_link(None)), Err(DropError::NoAddress));
        assert_eq!(
            c.target(&client_link(Some("192.168.49.1"))).unwrap(),
            "192.168.49.1:8988".parse().unwrap()
        );
    }

    #[tokio::test]
    async fn prepare_checks_file_before_sending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, [7u8; 10]).unwrap();

        let ok = TransferDescriptor::new(&path, "a.bin", 10).unwrap();
        assert!(TransferClient::prepare(&ok).await.is_ok());

        let wrong = TransferDescriptor::new(&path, "a.bin", 11).unwrap();
        assert_eq!(
            TransferClient::prepare(&wrong).await.unwrap_err(),
            DropError::SizeMismatch {
                declared: 11,
                actual: 10
            }
        );

        let missing = TransferDescriptor::new(dir.path().join("nope"), "nope", 0).unwrap();
        assert_eq!(
            TransferClient::prepare(&missing).await.unwrap_err().kind(),
            ErrorKind::FileNotFound
        );
        let directory = TransferDescriptor::new(dir.path(), "d", 0).unwrap();
        assert!(matches!(
            TransferClient::prepare(&directory).await,
            Err(DropError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn dial_refused_is_socket_error() {
        let addr = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };
        let c = TransferClient::new(addr.port(), Duration::from_secs(2));
        let err = c.dial(addr).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SocketError);
    }

    #[tokio::test]
    async fn sends_framed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, b"hi there").unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let reader = tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let mut all = Vec::new();
            s.read_to_end(&mut all).await.unwrap();
            all
        });

        let descriptor = TransferDescriptor::new(&path, "note.txt", 8).unwrap();
        let source = TransferClient::prepare(&descriptor).await.unwrap();
        let guard = TransferSlot::new().acquire().unwrap();
        let mut samples = Vec::new();
        let r = TransferClient::new(addr.port(), Duration::from_secs(2))
            .send(addr, descriptor, source, |p: TransferProgress| samples.push(p), guard)
            .await;
        assert!(r.success, "{:?}", r.detail);
        assert_eq!(r.bytes_moved, 8);
        assert_eq!(samples.last().map(|p| p.percent), Some(100));

        let wire = reader.await.unwrap();
        let (header, used) = peerdrop_core::decode_header(&wire).unwrap();
        assert_eq!(header.file_name, "note.txt");
        assert_eq!(header.file_size, 8);
        assert_eq!(&wire[used..], b"hi there");
    }
}
