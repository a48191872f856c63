//! Peer and connection records reported by the link layer.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Link-layer status of a discovered peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    Available,
    Invited,
    Connected,
    Failed,
    Unavailable,
}

impl PeerStatus {
    /// Map a platform status code. Unrecognised codes are treated as unavailable.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => PeerStatus::Connected,
            1 => PeerStatus::Invited,
            2 => PeerStatus::Failed,
            3 => PeerStatus::Available,
            _ => PeerStatus::Unavailable,
        }
    }
}

/// A peer as seen by discovery. Read-only to the controller; replaced wholesale on every peer-list refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDevice {
    #[serde(rename = "deviceName")]
    pub name: String,
    #[serde(rename = "deviceAddress")]
    pub address: String,
    pub status: PeerStatus,
}

impl PeerDevice {
    pub fn new(name: impl Into<String>, address: impl Into<String>, status: PeerStatus) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            status,
        }
    }
}

/// Which side of the link the local endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Client,
}

/// Raw group report from the link layer, as returned by a connection-info query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupInfo {
    pub group_formed: bool,
    pub is_group_owner: bool,
    pub owner_address: Option<IpAddr>,
    /// Link-layer address of the remote peer, when the platform reports it.
    pub peer_address: Option<String>,
}

/// The authoritative connection record. Overwritten atomically on each connection change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub connected: bool,
    pub is_owner: bool,
    pub owner_address: Option<IpAddr>,
}

impl ConnectionInfo {
    pub fn role(&self) -> Option<Role> {
        match (self.connected, self.is_owner) {
            (false, _) => None,
            (true, true) => Some(Role::Owner),
            (true, false) => Some(Role::Client),
        }
    }
}

impl From<&GroupInfo> for ConnectionInfo {
    fn from(g: &GroupInfo) -> Self {
        if !g.group_formed {
            return ConnectionInfo::default();
        }
        ConnectionInfo {
            connected: true,
            is_owner: g.is_group_owner,
            owner_address: g.owner_address,
        }
    }
}
