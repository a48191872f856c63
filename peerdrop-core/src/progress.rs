//! Progress reporting at chunk boundaries.

use crate::transfer::TransferProgress;
use crate::wire::CHUNK_SIZE;

/// Percentage of `total` covered by `transferred`, floored. A zero-byte total is complete by definition.
pub fn percent(transferred: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let p = (transferred.min(total) as u128 * 100) / total as u128;
    p as u8
}

/// Size of the next read/write given how many bytes are still owed.
pub fn next_chunk_len(remaining: u64) -> usize {
    remaining.min(CHUNK_SIZE as u64) as usize
}

/// Receives progress samples. Implemented for any `FnMut(TransferProgress)`.
pub trait ProgressSink {
    fn on_progress(&mut self, progress: TransferProgress);
}

impl<F> ProgressSink for F
where
    F: FnMut(TransferProgress),
{
    fn on_progress(&mut self, progress: TransferProgress) {
        self(progress)
    }
}

/// Tracks one transfer and forwards samples, never emitting a count lower than or equal to
/// one already emitted.
pub struct ProgressReporter<S> {
    total: u64,
    last: Option<u64>,
    sink: S,
}

impl<S: ProgressSink> ProgressReporter<S> {
    pub fn new(total: u64, sink: S) -> Self {
        Self {
            total,
            last: None,
            sink,
        }
    }

    /// Call after each chunk with the running byte count.
    pub fn report(&mut self, transferred: u64) {
        if matches!(self.last, Some(last) if transferred <= last) {
            return;
        }
        self.last = Some(transferred);
        self.sink.on_progress(TransferProgress {
            percent: percent(transferred, self.total),
            bytes_transferred: transferred,
            total_bytes: self.total,
        });
    }

    /// A zero-byte transfer streams nothing; report it complete once.
    pub fn report_empty(&mut self) {
        if self.total == 0 {
            self.report(0);
        }
    }
}
