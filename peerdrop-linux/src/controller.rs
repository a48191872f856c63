//! Drives the link state machine against a radio: serial event loop, caller operations,
//! listener lifecycle and the single transfer slot.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use peerdrop_core::{
    ConnectionInfo, DropError, LinkAction, LinkMachine, LinkState, Notification, PeerDevice,
    ProgressSink, RadioEvent, Role, TransferDescriptor, TransferId, TransferProgress,
    TransferResult, OWNER_INTENT,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::TransferSlot;
use crate::client::TransferClient;
use crate::config::Config;
use crate::radio::LinkRadio;
use crate::server::TransferServer;

struct Shared {
    radio: Arc<dyn LinkRadio>,
    config: Config,
    machine: Mutex<LinkMachine>,
    server: Mutex<TransferServer>,
    slot: TransferSlot,
    client: TransferClient,
    notify: mpsc::UnboundedSender<Notification>,
    events_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// A transfer running on its own task.
pub struct TransferHandle {
    id: TransferId,
    task: JoinHandle<TransferResult>,
}

impl TransferHandle {
    pub fn id(&self) -> TransferId {
        self.id
    }

    pub async fn join(self) -> TransferResult {
        match self.task.await {
            Ok(r) => r,
            Err(e) => TransferResult::failed(self.id, 0, None, format!("transfer worker failed: {}", e)),
        }
    }
}

/// Owns connection state and the listener. Outward events go to the receiver returned by
/// [`LinkController::new`].
pub struct LinkController {
    shared: Arc<Shared>,
}

impl LinkController {
    pub fn new(
        radio: Arc<dyn LinkRadio>,
        config: Config,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (notify, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            radio,
            server: Mutex::new(TransferServer::new(config.listen_addr())),
            client: TransferClient::new(config.transfer_port, config.connect_timeout()),
            config,
            machine: Mutex::new(LinkMachine::new()),
            slot: TransferSlot::new(),
            notify,
            events_task: std::sync::Mutex::new(None),
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            rx,
        )
    }

    /// Subscribe to the radio and start the event loop. Safe to call more than once.
    pub async fn initialize(&self) -> Result<(), DropError> {
        let mut machine = self.shared.machine.lock().await;
        if machine.is_initialized() {
            return Ok(());
        }
        if !self.shared.radio.is_supported() {
            warn!("peer link not supported on this device");
            return Err(DropError::NotInitialized);
        }
        let events = self.shared.radio.subscribe().await?;
        machine.mark_initialized();
        drop(machine);

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(run_events(shared, events));
        *self.events_task() = Some(task);
        info!("peer link initialized");
        Ok(())
    }

    pub async fn start_discovery(&self) -> Result<(), DropError> {
        let mut machine = self.shared.machine.lock().await;
        machine.ensure_initialized()?;
        if !self.shared.radio.has_permissions() {
            return Err(DropError::PermissionDenied);
        }
        machine.check_start_discovery()?;
        if let Err(reason) = self.shared.radio.discover_peers().await {
            warn!(%reason, "discovery request rejected");
            return Err(DropError::DiscoveryFailed(reason));
        }
        machine.discovery_started();
        Ok(())
    }

    pub async fn stop_discovery(&self) -> Result<(), DropError> {
        let mut machine = self.shared.machine.lock().await;
        machine.ensure_initialized()?;
        if let Err(reason) = self.shared.radio.stop_discovery().await {
            warn!(%reason, "stop discovery failed");
        }
        machine.discovery_stopped();
        Ok(())
    }

    /// Request a link to `address`. Success means the request was accepted; the outcome
    /// arrives as a connection notification.
    pub async fn connect(&self, address: &str) -> Result<(), DropError> {
        let mut machine = self.shared.machine.lock().await;
        machine.ensure_initialized()?;
        if !self.shared.radio.has_permissions() {
            return Err(DropError::PermissionDenied);
        }
        machine.check_connect(address)?;
        if let Err(reason) = self.shared.radio.connect(address, OWNER_INTENT).await {
            warn!(%address, %reason, "connect request rejected");
            return Err(DropError::ConnectionFailed(reason));
        }
        machine.connect_requested(address);
        Ok(())
    }

    /// Close any transfer, the listener and the link. Always ends Disconnected.
    pub async fn disconnect(&self) -> Result<(), DropError> {
        let mut machine = self.shared.machine.lock().await;
        machine.ensure_initialized()?;
        self.shared.cancel_transfer().await;
        self.shared.server.lock().await.close();
        if let Err(reason) = self.shared.radio.remove_group().await {
            warn!(%reason, "link teardown failed, treating as disconnected");
        }
        machine.mark_disconnected();
        Ok(())
    }

    /// Send a file to the group owner. From the owner role this receives into the download
    /// directory instead.
    pub async fn spawn_send(&self, descriptor: TransferDescriptor) -> Result<TransferHandle, DropError> {
        if tokio::fs::metadata(&descriptor.source_path).await.is_err() {
            return Err(DropError::FileNotFound(descriptor.source_path));
        }
        let connection = self.connection().await;
        if connection.role() == Some(Role::Owner) {
            debug!(file = %descriptor.file_name, "owner cannot dial out, receiving instead");
            let dir = self.shared.config.download_dir.clone();
            return self.spawn_receive(dir).await;
        }
        let addr = self.shared.client.target(&connection)?;
        let guard = self.shared.slot.acquire()?;
        let source = TransferClient::prepare(&descriptor).await?;
        let id = guard.id();
        let client = self.shared.client;
        let sink = self.progress_sink();
        let task = tokio::spawn(async move { client.send(addr, descriptor, source, sink, guard).await });
        Ok(TransferHandle { id, task })
    }

    pub async fn send_file(&self, descriptor: TransferDescriptor) -> Result<TransferResult, DropError> {
        Ok(self.spawn_send(descriptor).await?.join().await)
    }

    /// Accept one inbound file on the owner's listener and write it under `dir`.
    pub async fn spawn_receive(&self, dir: PathBuf) -> Result<TransferHandle, DropError> {
        let (connection, episode) = {
            let machine = self.shared.machine.lock().await;
            (machine.connection(), machine.owner_episode())
        };
        if connection.role() != Some(Role::Owner) {
            return Err(DropError::NotConnected);
        }
        let guard = self.shared.slot.acquire()?;
        let listener = self.shared.server.lock().await.listener_for(episode).await?;
        let id = guard.id();
        let sink = self.progress_sink();
        let task = tokio::spawn(async move {
            TransferServer::accept_and_receive(listener, &dir, sink, guard).await
        });
        Ok(TransferHandle { id, task })
    }

    pub fn is_supported(&self) -> bool {
        self.shared.radio.is_supported()
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.radio.is_enabled()
    }

    pub async fn connection(&self) -> ConnectionInfo {
        self.shared.machine.lock().await.connection()
    }

    pub async fn state(&self) -> LinkState {
        self.shared.machine.lock().await.state().clone()
    }

    pub async fn peers(&self) -> Vec<PeerDevice> {
        self.shared.machine.lock().await.peers().to_vec()
    }

    pub async fn listening_addr(&self) -> Option<SocketAddr> {
        self.shared.server.lock().await.local_addr()
    }

    /// Stop the event loop and release the listener. Leaves the link itself alone.
    pub async fn shutdown(&self) {
        if let Some(task) = self.events_task().take() {
            task.abort();
        }
        if self.shared.slot.is_busy() {
            debug!("cancelling in-flight transfer for shutdown");
        }
        self.shared.cancel_transfer().await;
        self.shared.server.lock().await.close();
    }

    fn progress_sink(&self) -> impl ProgressSink + Send + 'static {
        let notify = self.shared.notify.clone();
        move |p: TransferProgress| {
            let _ = notify.send(Notification::TransferProgress(p));
        }
    }

    fn events_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.shared
            .events_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for LinkController {
    fn drop(&mut self) {
        if let Some(task) = self.events_task().take() {
            task.abort();
        }
    }
}

impl Shared {
    async fn cancel_transfer(&self) {
        if !self.slot.cancel(self.config.disconnect_grace()).await {
            warn!(grace = ?self.config.disconnect_grace(), "transfer still running after grace period");
        }
    }

    /// Perform actions in order. Follow-up actions from a re-query run before the rest.
    async fn dispatch(&self, actions: Vec<LinkAction>) {
        let mut queue: VecDeque<LinkAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            let follow_up = match action {
                LinkAction::Notify(n) => {
                    let _ = self.notify.send(n);
                    continue;
                }
                LinkAction::QueryPeers => {
                    let peers = self.radio.request_peers().await;
                    self.machine.lock().await.on_peers(peers)
                }
                LinkAction::QueryConnectionInfo => {
                    let group = self.radio.request_connection_info().await;
                    self.machine.lock().await.on_group_info(group)
                }
                LinkAction::StartServer { episode } => {
                    // Bind errors are logged by the server; the connection stays up.
                    let _ = self.server.lock().await.listen(episode).await;
                    continue;
                }
                LinkAction::StopServer => {
                    self.server.lock().await.close();
                    continue;
                }
                LinkAction::CancelTransfer => {
                    self.cancel_transfer().await;
                    continue;
                }
            };
            for a in follow_up.into_iter().rev() {
                queue.push_front(a);
            }
        }
    }
}

async fn run_events(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<RadioEvent>) {
    while let Some(event) = events.recv().await {
        let actions = shared.machine.lock().await.on_radio_event(event);
        shared.dispatch(actions).await;
    }
    debug!("link event stream closed");
}
