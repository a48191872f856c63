//! Single transfer slot: at most one transfer channel open at a time, with a cancellation
//! channel the teardown path uses to close it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use peerdrop_core::{DropError, TransferId};
use tokio::sync::watch;

struct Active {
    id: TransferId,
    cancel: Arc<watch::Sender<bool>>,
}

#[derive(Clone, Default)]
pub struct TransferSlot {
    active: Arc<Mutex<Option<Active>>>,
}

impl TransferSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for a new transfer. Fails immediately if one is already active.
    pub fn acquire(&self) -> Result<SlotGuard, DropError> {
        let mut active = self.lock();
        if active.is_some() {
            return Err(DropError::TransferInProgress);
        }
        let id = TransferId::new();
        let (tx, rx) = watch::channel(false);
        *active = Some(Active {
            id,
            cancel: Arc::new(tx),
        });
        Ok(SlotGuard {
            slot: self.clone(),
            id,
            cancel: CancelSignal { rx },
        })
    }

    pub fn is_busy(&self) -> bool {
        self.lock().is_some()
    }

    /// Signal the active transfer to close its channel and wait up to `grace` for it to let go.
    /// Returns false if the worker was still holding the channel when the grace period ran out.
    pub async fn cancel(&self, grace: Duration) -> bool {
        let sender = match self.lock().as_ref() {
            Some(active) => {
                tracing::debug!(transfer = %active.id, "cancelling transfer");
                let _ = active.cancel.send(true);
                active.cancel.clone()
            }
            None => return true,
        };
        tokio::time::timeout(grace, sender.closed()).await.is_ok()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Active>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Held by the worker for the lifetime of a transfer; releases the slot on drop.
pub struct SlotGuard {
    slot: TransferSlot,
    id: TransferId,
    cancel: CancelSignal,
}

impl SlotGuard {
    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn cancel_signal(&mut self) -> &mut CancelSignal {
        &mut self.cancel
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut active = self.slot.lock();
        if matches!(active.as_ref(), Some(a) if a.id == self.id) {
            *active = None;
        }
    }
}

/// Receiving half of a transfer's cancellation channel.
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Resolves once cancellation is requested. Never resolves if the slot is torn down
    /// without a request.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|c| *c).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
