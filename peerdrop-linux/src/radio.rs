//! Peer link collaborator: the platform subsystem that discovers peers and forms groups.
//! `StaticRadio` stands in for a wireless stack with a configured peer table.

use std::net::IpAddr;
use std::sync::Mutex;

use async_trait::async_trait;
use peerdrop_core::{DropError, FailureReason, GroupInfo, PeerDevice, PeerStatus, RadioEvent, Role};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::{Config, StaticPeer};

/// Discovery/link subsystem consumed by the controller.
#[async_trait]
pub trait LinkRadio: Send + Sync {
    fn is_supported(&self) -> bool;

    fn is_enabled(&self) -> bool;

    fn has_permissions(&self) -> bool;

    /// Subscribe to link events. Called once per controller.
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<RadioEvent>, DropError>;

    async fn discover_peers(&self) -> Result<(), FailureReason>;

    async fn stop_discovery(&self) -> Result<(), FailureReason>;

    /// Request a link to `address`. Success means the request was accepted, not that a group formed.
    async fn connect(&self, address: &str, owner_intent: u8) -> Result<(), FailureReason>;

    async fn remove_group(&self) -> Result<(), FailureReason>;

    async fn request_peers(&self) -> Vec<PeerDevice>;

    async fn request_connection_info(&self) -> GroupInfo;
}

struct StaticState {
    events: Option<mpsc::UnboundedSender<RadioEvent>>,
    discovering: bool,
    group: GroupInfo,
}

/// Configuration-driven link: peers come from the config file and `connect` forms a group
/// immediately with the configured local role.
pub struct StaticRadio {
    peers: Vec<StaticPeer>,
    role: Role,
    local_address: IpAddr,
    state: Mutex<StaticState>,
}

impl StaticRadio {
    pub fn new(peers: Vec<StaticPeer>, role: Role, local_address: IpAddr) -> Self {
        Self {
            peers,
            role,
            local_address,
            state: Mutex::new(StaticState {
                events: None,
                discovering: false,
                group: GroupInfo::default(),
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.peers.clone(), config.role, config.local_address)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StaticState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(state: &StaticState, events: &[RadioEvent]) {
        if let Some(tx) = &state.events {
            for ev in events {
                let _ = tx.send(ev.clone());
            }
        }
    }
}

#[async_trait]
impl LinkRadio for StaticRadio {
    fn is_supported(&self) -> bool {
        true
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn has_permissions(&self) -> bool {
        true
    }

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<RadioEvent>, DropError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(RadioEvent::StateChanged { enabled: true });
        self.lock().events = Some(tx);
        Ok(rx)
    }

    async fn discover_peers(&self) -> Result<(), FailureReason> {
        let mut state = self.lock();
        state.discovering = true;
        Self::emit(&state, &[RadioEvent::PeersChanged]);
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<(), FailureReason> {
        self.lock().discovering = false;
        Ok(())
    }

    async fn connect(&self, address: &str, owner_intent: u8) -> Result<(), FailureReason> {
        let peer = self
            .peers
            .iter()
            .find(|p| p.address == address)
            .ok_or(FailureReason::Unknown(0))?;
        debug!(%address, owner_intent, role = ?self.role, "forming static group");
        let owner_address = match self.role {
            Role::Owner => self.local_address,
            Role::Client => peer.ip,
        };
        let mut state = self.lock();
        state.group = GroupInfo {
            group_formed: true,
            is_group_owner: self.role == Role::Owner,
            owner_address: Some(owner_address),
            peer_address: Some(peer.address.clone()),
        };
        Self::emit(
            &state,
            &[RadioEvent::ConnectionChanged, RadioEvent::PeersChanged],
        );
        Ok(())
    }

    async fn remove_group(&self) -> Result<(), FailureReason> {
        let mut state = self.lock();
        if !state.group.group_formed {
            return Err(FailureReason::Unknown(0));
        }
        state.group = GroupInfo::default();
        Self::emit(
            &state,
            &[RadioEvent::ConnectionChanged, RadioEvent::PeersChanged],
        );
        Ok(())
    }

    async fn request_peers(&self) -> Vec<PeerDevice> {
        let state = self.lock();
        let connected = state.group.peer_address.as_deref();
        self.peers
            .iter()
            .map(|p| {
                let status = if Some(p.address.as_str()) == connected {
                    PeerStatus::Connected
                } else if state.discovering {
                    PeerStatus::Available
                } else {
                    PeerStatus::Unavailable
                };
                PeerDevice::new(p.name.clone(), p.address.clone(), status)
            })
            .collect()
    }

    async fn request_connection_info(&self) -> GroupInfo {
        self.lock().group.clone()
    }
}
