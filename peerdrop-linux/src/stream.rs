//! Both sides of the transfer framing over any byte stream: header, then exactly
//! `file_size` content bytes in chunks, with progress after each chunk.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use peerdrop_core::progress::next_chunk_len;
use peerdrop_core::wire::{self, CHUNK_SIZE};
use peerdrop_core::{ProgressReporter, ProgressSink, TransferDescriptor, TransferId, TransferResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::channel::CancelSignal;

/// Run `fut` unless the transfer is cancelled first. Cancellation drops the pending I/O.
async fn guarded<F, T>(cancel: &mut CancelSignal, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(io::Error::new(io::ErrorKind::Interrupted, "transfer cancelled")),
        r = fut => r,
    }
}

/// Send side: write the header for `descriptor`, then stream `source` into `channel`.
pub async fn send_over<W, R, S>(
    id: TransferId,
    channel: &mut W,
    descriptor: &TransferDescriptor,
    source: &mut R,
    sink: S,
    cancel: &mut CancelSignal,
) -> TransferResult
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
    S: ProgressSink,
{
    let total = descriptor.file_size;
    let header = match wire::encode_header(&descriptor.file_name, total) {
        Ok(h) => h,
        Err(e) => return TransferResult::failed(id, 0, None, e.to_string()),
    };
    if let Err(e) = guarded(cancel, channel.write_all(&header)).await {
        return TransferResult::failed(id, 0, None, format!("failed to send metadata: {}", e));
    }

    let mut reporter = ProgressReporter::new(total, sink);
    reporter.report_empty();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent = 0u64;
    while sent < total {
        let want = next_chunk_len(total - sent);
        let n = match guarded(cancel, source.read(&mut buf[..want])).await {
            Ok(0) => {
                return TransferResult::failed(
                    id,
                    sent,
                    None,
                    format!("source ended after {} of {} bytes", sent, total),
                )
            }
            Ok(n) => n,
            Err(e) => return TransferResult::failed(id, sent, None, format!("read failed: {}", e)),
        };
        if let Err(e) = guarded(cancel, channel.write_all(&buf[..n])).await {
            return TransferResult::failed(id, sent, None, format!("write failed: {}", e));
        }
        sent += n as u64;
        reporter.report(sent);
    }

    if let Err(e) = guarded(cancel, channel.flush()).await {
        return TransferResult::failed(id, sent, None, format!("flush failed: {}", e));
    }
    if let Err(e) = channel.shutdown().await {
        debug!(transfer = %id, error = %e, "shutdown after send");
    }
    info!(transfer = %id, file = %descriptor.file_name, bytes = sent, "file sent");
    TransferResult::sent(id, sent)
}

/// Receive side: read the header from `channel`, create the named file in `dest_dir`, and
/// copy exactly the declared number of bytes into it. A short stream leaves the bytes
/// received so far in the file.
pub async fn receive_over<R, S>(
    id: TransferId,
    channel: &mut R,
    dest_dir: &Path,
    sink: S,
    cancel: &mut CancelSignal,
) -> TransferResult
where
    R: AsyncRead + Unpin,
    S: ProgressSink,
{
    let header = match read_header(channel, cancel).await {
        Ok(h) => h,
        Err(e) => return TransferResult::failed(id, 0, None, e),
    };
    let path = match destination(dest_dir, &header.file_name) {
        Some(p) => p,
        None => {
            return TransferResult::failed(
                id,
                0,
                None,
                format!("unusable file name {:?}", header.file_name),
            )
        }
    };
    if let Err(e) = tokio::fs::create_dir_all(dest_dir).await {
        return TransferResult::failed(id, 0, None, format!("cannot create {}: {}", dest_dir.display(), e));
    }
    let mut file = match tokio::fs::File::create(&path).await {
        Ok(f) => f,
        Err(e) => {
            return TransferResult::failed(id, 0, None, format!("cannot create {}: {}", path.display(), e))
        }
    };
    debug!(transfer = %id, file = %path.display(), size = header.file_size, "receiving");

    let total = header.file_size;
    let mut reporter = ProgressReporter::new(total, sink);
    reporter.report_empty();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut received = 0u64;
    let mut failure = None;
    while received < total {
        let want = next_chunk_len(total - received);
        let n = match guarded(cancel, channel.read(&mut buf[..want])).await {
            Ok(0) => {
                failure = Some(format!("channel closed after {} of {} bytes", received, total));
                break;
            }
            Ok(n) => n,
            Err(e) => {
                failure = Some(format!("read failed: {}", e));
                break;
            }
        };
        if let Err(e) = file.write_all(&buf[..n]).await {
            failure = Some(format!("write to {} failed: {}", path.display(), e));
            break;
        }
        received += n as u64;
        reporter.report(received);
    }

    if let Err(e) = file.flush().await {
        failure.get_or_insert_with(|| format!("flush of {} failed: {}", path.display(), e));
    }
    drop(file);
    match failure {
        Some(detail) => {
            warn!(transfer = %id, file = %path.display(), received, total, %detail, "receive failed");
            TransferResult::failed(id, received, Some(path), detail)
        }
        None => {
            info!(transfer = %id, file = %path.display(), bytes = received, "file received");
            TransferResult::received(id, received, path)
        }
    }
}

async fn read_header<R>(channel: &mut R, cancel: &mut CancelSignal) -> Result<wire::FileHeader, String>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 2];
    guarded(cancel, channel.read_exact(&mut buf))
        .await
        .map_err(|e| format!("failed to read metadata: {}", e))?;
    let name_len = wire::header_name_len(&buf).map_err(|e| e.to_string())?;
    buf.resize(wire::header_len(name_len), 0);
    guarded(cancel, channel.read_exact(&mut buf[2..]))
        .await
        .map_err(|e| format!("failed to read metadata: {}", e))?;
    let (header, _) = wire::decode_header(&buf).map_err(|e| format!("bad metadata: {}", e))?;
    Ok(header)
}

/// Keep only the final path component of a peer-supplied name.
fn destination(dir: &Path, file_name: &str) -> Option<PathBuf> {
    let name = Path::new(file_name).file_name()?;
    Some(dir.join(name))
}
