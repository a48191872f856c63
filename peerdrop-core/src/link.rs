//! Host-driven link state machine: the host passes link-layer events and caller requests,
//! the machine updates connection state and returns actions for the host to perform.

use tracing::{debug, warn};

use crate::device::{ConnectionInfo, GroupInfo, PeerDevice, Role};
use crate::error::{DropError, FailureReason};
use crate::events::{Notification, RadioEvent};

/// Owner preference sent with every connect request (0-15, higher = more likely to own the group).
pub const OWNER_INTENT: u8 = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Discovering,
    Connecting { target: String },
    Connected { role: Role },
    Disconnected,
}

/// Action for host to perform, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    Notify(Notification),
    /// Re-query the peer list and feed it to [`LinkMachine::on_peers`].
    QueryPeers,
    /// Re-query connection info and feed it to [`LinkMachine::on_group_info`].
    QueryConnectionInfo,
    /// Bring up the listening endpoint for this owner episode.
    StartServer { episode: u64 },
    /// Close the listening endpoint.
    StopServer,
    /// Close any open transfer channel.
    CancelTransfer,
}

/// Single owner of connection state. All transitions go through the methods below.
pub struct LinkMachine {
    initialized: bool,
    state: LinkState,
    connection: ConnectionInfo,
    peers: Vec<PeerDevice>,
    this_device: Option<PeerDevice>,
    radio_enabled: bool,
    owner_episode: u64,
}

impl LinkMachine {
    pub fn new() -> Self {
        Self {
            initialized: false,
            state: LinkState::Idle,
            connection: ConnectionInfo::default(),
            peers: Vec::new(),
            this_device: None,
            radio_enabled: false,
            owner_episode: 0,
        }
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    pub fn connection(&self) -> ConnectionInfo {
        self.connection
    }

    pub fn peers(&self) -> &[PeerDevice] {
        &self.peers
    }

    pub fn this_device(&self) -> Option<&PeerDevice> {
        self.this_device.as_ref()
    }

    pub fn radio_enabled(&self) -> bool {
        self.radio_enabled
    }

    /// Number of owner episodes started so far.
    pub fn owner_episode(&self) -> u64 {
        self.owner_episode
    }

    pub fn ensure_initialized(&self) -> Result<(), DropError> {
        if self.initialized {
            Ok(())
        } else {
            Err(DropError::NotInitialized)
        }
    }

    /// Preconditions for a discovery request. Permission checks belong to the host.
    pub fn check_start_discovery(&self) -> Result<(), DropError> {
        self.ensure_initialized()?;
        match self.state {
            LinkState::Idle | LinkState::Discovering | LinkState::Disconnected => Ok(()),
            LinkState::Connecting { .. } | LinkState::Connected { .. } => {
                Err(DropError::DiscoveryFailed(FailureReason::Busy))
            }
        }
    }

    /// The link layer accepted a discovery request.
    pub fn discovery_started(&mut self) {
        if matches!(
            self.state,
            LinkState::Idle | LinkState::Disconnected | LinkState::Discovering
        ) {
            self.transition(LinkState::Discovering);
        }
    }

    pub fn discovery_stopped(&mut self) {
        if self.state == LinkState::Discovering {
            self.transition(LinkState::Idle);
        }
    }

    /// Preconditions for a connect request to `address`.
    pub fn check_connect(&self, address: &str) -> Result<(), DropError> {
        self.ensure_initialized()?;
        if address.trim().is_empty() {
            return Err(DropError::InvalidArgument("device address is required".into()));
        }
        match &self.state {
            LinkState::Discovering | LinkState::Connecting { .. } => Ok(()),
            LinkState::Idle | LinkState::Disconnected => {
                if self.peers.iter().any(|p| p.address == address) {
                    Ok(())
                } else {
                    Err(DropError::InvalidArgument(format!(
                        "unknown peer {}",
                        address
                    )))
                }
            }
            LinkState::Connected { .. } => Err(DropError::ConnectionFailed(FailureReason::Busy)),
        }
    }

    /// The link layer accepted a connect request. A later request replaces the earlier target.
    pub fn connect_requested(&mut self, address: &str) {
        self.transition(LinkState::Connecting {
            target: address.to_string(),
        });
    }

    /// Local teardown finished (whatever the link layer said about it).
    pub fn mark_disconnected(&mut self) {
        self.connection = ConnectionInfo::default();
        self.transition(LinkState::Disconnected);
    }

    /// Process one link-layer event.
    pub fn on_radio_event(&mut self, event: RadioEvent) -> Vec<LinkAction> {
        match event {
            RadioEvent::StateChanged { enabled } => {
                debug!(enabled, "peer link state changed");
                self.radio_enabled = enabled;
                vec![LinkAction::Notify(Notification::StateChanged { enabled })]
            }
            RadioEvent::PeersChanged => vec![LinkAction::QueryPeers],
            RadioEvent::ConnectionChanged => vec![LinkAction::QueryConnectionInfo],
            RadioEvent::ThisDeviceChanged { device } => {
                debug!(device = ?device.as_ref().map(|d| &d.name), "this device changed");
                self.this_device = device;
                vec![]
            }
        }
    }

    /// Fresh peer list from the link layer. Republished unmodified.
    pub fn on_peers(&mut self, peers: Vec<PeerDevice>) -> Vec<LinkAction> {
        self.peers = peers.clone();
        vec![LinkAction::Notify(Notification::PeersChanged { devices: peers })]
    }

    /// Fresh connection snapshot from the link layer.
    pub fn on_group_info(&mut self, group: GroupInfo) -> Vec<LinkAction> {
        if !group.group_formed {
            return self.on_group_lost();
        }

        if let LinkState::Connecting { target } = &self.state {
            if let Some(peer) = &group.peer_address {
                if peer != target {
                    warn!(%peer, %target, "ignoring connection report for a superseded connect request");
                    return vec![];
                }
            }
        }

        let info = ConnectionInfo::from(&group);
        let role = if info.is_owner {
            Role::Owner
        } else {
            Role::Client
        };
        let mut actions = Vec::new();
        let same_episode = matches!(self.state, LinkState::Connected { role: r } if r == role);
        if let LinkState::Connected { role: previous } = self.state {
            if previous != role {
                debug!(?previous, ?role, "role changed, ending previous link episode");
                actions.push(LinkAction::CancelTransfer);
                if previous == Role::Owner {
                    actions.push(LinkAction::StopServer);
                }
            }
        }

        self.connection = info;
        self.transition(LinkState::Connected { role });
        actions.push(LinkAction::Notify(Notification::connection(&info)));

        if role == Role::Owner && !same_episode {
            self.owner_episode += 1;
            actions.push(LinkAction::StartServer {
                episode: self.owner_episode,
            });
        }
        actions
    }

    fn on_group_lost(&mut self) -> Vec<LinkAction> {
        let mut actions = Vec::new();
        if self.connection.connected {
            actions.push(LinkAction::CancelTransfer);
            if self.connection.is_owner {
                actions.push(LinkAction::StopServer);
            }
        }
        self.connection = ConnectionInfo::default();
        match self.state {
            // No group yet while a request is being negotiated; keep waiting for the outcome.
            LinkState::Idle | LinkState::Discovering | LinkState::Connecting { .. } => {}
            _ => self.transition(LinkState::Disconnected),
        }
        actions.push(LinkAction::Notify(Notification::connection(&self.connection)));
        actions
    }

    fn transition(&mut self, next: LinkState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "link state transition");
            self.state = next;
        }
    }
}

impl Default for LinkMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::PeerStatus;

    fn owner_report(peer: Option<&str>) -> GroupInfo {
        GroupInfo {
            group_formed: true,
            is_group_owner: true,
            owner_address: Some("192.168.49.1".parse().unwrap()),
            peer_address: peer.map(str::to_string),
        }
    }

    fn client_report(peer: Option<&str>) -> GroupInfo {
        GroupInfo {
            is_group_owner: false,
            ..owner_report(peer)
        }
    }

    fn discovering() -> LinkMachine {
        let mut m = LinkMachine::new();
        m.mark_initialized();
        m.check_start_discovery().unwrap();
        m.discovery_started();
        m
    }

    fn start_server_count(actions: &[LinkAction]) -> usize {
        actions
            .iter()
            .filter(|a| matches!(a, LinkAction::StartServer { .. }))
            .count()
    }

    #[test]
    fn requires_initialize() {
        let m = LinkMachine::new();
        assert_eq!(m.check_start_discovery(), Err(DropError::NotInitialized));
        assert_eq!(m.check_connect("aa"), Err(DropError::NotInitialized));
    }

    #[test]
    fn discovery_lifecycle() {
        let mut m = discovering();
        assert_eq!(m.state(), &LinkState::Discovering);
        m.discovery_stopped();
        assert_eq!(m.state(), &LinkState::Idle);
        m.discovery_stopped();
        assert_eq!(m.state(), &LinkState::Idle);
    }

    #[test]
    fn connect_from_idle_requires_known_peer() {
        let mut m = LinkMachine::new();
        m.mark_initialized();
        assert!(matches!(
            m.check_connect("aa:bb"),
            Err(DropError::InvalidArgument(_))
        ));
        m.on_peers(vec![PeerDevice::new("Pixel", "aa:bb", PeerStatus::Available)]);
        assert!(m.check_connect("aa:bb").is_ok());
        assert!(matches!(m.check_connect(""), Err(DropError::InvalidArgument(_))));
    }

    #[test]
    fn owner_report_starts_server_once_per_episode() {
        let mut m = discovering();
        m.connect_requested("aa");
        let actions = m.on_group_info(owner_report(Some("aa")));
        assert_eq!(m.state(), &LinkState::Connected { role: Role::Owner });
        assert!(m.connection().connected);
        assert_eq!(start_server_count(&actions), 1);
        // Connection info is published before the server is started.
        assert!(matches!(actions[0], LinkAction::Notify(Notification::ConnectionChanged { .. })));
        assert!(matches!(actions[1], LinkAction::StartServer { episode: 1 }));

        // Repeated reports within the same episode do not restart it.
        let actions = m.on_group_info(owner_report(Some("aa")));
        assert_eq!(start_server_count(&actions), 0);
        assert_eq!(m.owner_episode(), 1);

        m.on_group_info(GroupInfo::default());
        assert_eq!(m.state(), &LinkState::Disconnected);

        m.discovery_started();
        m.connect_requested("aa");
        let actions = m.on_group_info(owner_report(None));
        assert_eq!(start_server_count(&actions), 1);
        assert_eq!(m.owner_episode(), 2);
    }

    #[test]
    fn client_report_does_not_start_server() {
        let mut m = discovering();
        m.connect_requested("aa");
        let actions = m.on_group_info(client_report(Some("aa")));
        assert_eq!(m.state(), &LinkState::Connected { role: Role::Client });
        assert_eq!(start_server_count(&actions), 0);
        assert_eq!(m.connection().role(), Some(Role::Client));
    }

    #[test]
    fn group_lost_clears_connection_and_tears_down() {
        let mut m = discovering();
        m.connect_requested("aa");
        m.on_group_info(owner_report(Some("aa")));
        let actions = m.on_group_info(GroupInfo::default());
        assert_eq!(m.state(), &LinkState::Disconnected);
        assert_eq!(m.connection(), ConnectionInfo::default());
        assert_eq!(actions[0], LinkAction::CancelTransfer);
        assert_eq!(actions[1], LinkAction::StopServer);
        assert_eq!(
            actions[2],
            LinkAction::Notify(Notification::ConnectionChanged {
                is_connected: false,
                is_group_owner: false,
                owner_address: None
            })
        );
    }

    #[test]
    fn latest_connect_target_wins() {
        let mut m = discovering();
        assert!(m.check_connect("aa").is_ok());
        m.connect_requested("aa");
        assert!(m.check_connect("bb").is_ok());
        m.connect_requested("bb");

        // A report for the superseded target is not treated as an active connection.
        let actions = m.on_group_info(client_report(Some("aa")));
        assert!(actions.is_empty());
        assert!(!m.connection().connected);
        assert_eq!(
            m.state(),
            &LinkState::Connecting {
                target: "bb".into()
            }
        );

        m.on_group_info(client_report(Some("bb")));
        assert!(m.connection().connected);
        assert_eq!(m.state(), &LinkState::Connected { role: Role::Client });
    }

    #[test]
    fn group_lost_while_connecting_keeps_latest_target() {
        let mut m = discovering();
        m.connect_requested("aa");
        m.connect_requested("bb");

        let actions = m.on_group_info(GroupInfo::default());
        assert!(!actions
            .iter()
            .any(|a| matches!(a, LinkAction::CancelTransfer | LinkAction::StopServer)));
        assert_eq!(
            m.state(),
            &LinkState::Connecting {
                target: "bb".into()
            }
        );

        assert!(m.on_group_info(client_report(Some("aa"))).is_empty());
        assert!(!m.connection().connected);
        assert_eq!(
            m.state(),
            &LinkState::Connecting {
                target: "bb".into()
            }
        );
    }

    #[test]
    fn connected_rejects_new_requests() {
        let mut m = discovering();
        m.connect_requested("aa");
        m.on_group_info(client_report(None));
        assert_eq!(
            m.check_connect("bb"),
            Err(DropError::ConnectionFailed(FailureReason::Busy))
        );
        assert_eq!(
            m.check_start_discovery(),
            Err(DropError::DiscoveryFailed(FailureReason::Busy))
        );
    }

    #[test]
    fn role_flip_ends_previous_episode() {
        let mut m = discovering();
        m.connect_requested("aa");
        m.on_group_info(owner_report(None));
        let actions = m.on_group_info(client_report(None));
        assert_eq!(actions[0], LinkAction::CancelTransfer);
        assert_eq!(actions[1], LinkAction::StopServer);
        assert_eq!(m.state(), &LinkState::Connected { role: Role::Client });
    }

    #[test]
    fn disconnect_clears_state() {
        let mut m = discovering();
        m.connect_requested("aa");
        m.on_group_info(client_report(None));
        m.mark_disconnected();
        assert!(!m.connection().connected);
        assert_eq!(m.state(), &LinkState::Disconnected);
        assert!(m.check_start_discovery().is_ok());
    }

    #[test]
    fn events_map_to_queries_and_notifications() {
        let mut m = LinkMachine::new();
        assert_eq!(
            m.on_radio_event(RadioEvent::StateChanged { enabled: true }),
            vec![LinkAction::Notify(Notification::StateChanged { enabled: true })]
        );
        assert!(m.radio_enabled());
        assert_eq!(
            m.on_radio_event(RadioEvent::PeersChanged),
            vec![LinkAction::QueryPeers]
        );
        assert_eq!(
            m.on_radio_event(RadioEvent::ConnectionChanged),
            vec![LinkAction::QueryConnectionInfo]
        );
        let me = PeerDevice::new("laptop", "00:11", PeerStatus::Available);
        assert!(m
            .on_radio_event(RadioEvent::ThisDeviceChanged {
                device: Some(me.clone())
            })
            .is_empty());
        assert_eq!(m.this_device(), Some(&me));
    }

    #[test]
    fn peers_republished_unmodified() {
        let mut m = LinkMachine::new();
        let peers = vec![
            PeerDevice::new("a", "aa", PeerStatus::Invited),
            PeerDevice::new("b", "bb", PeerStatus::Failed),
        ];
        let actions = m.on_peers(peers.clone());
        assert_eq!(
            actions,
            vec![LinkAction::Notify(Notification::PeersChanged {
                devices: peers.clone()
            })]
        );
        assert_eq!(m.peers(), &peers[..]);
    }
}
