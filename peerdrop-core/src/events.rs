//! Events in from the link layer and notifications out to the application.

use std::net::IpAddr;

use serde::Serialize;

use crate::device::{ConnectionInfo, PeerDevice};
use crate::transfer::TransferProgress;

/// Normalized link-layer notification. Peer and connection changes carry no payload: the
/// controller re-queries the link layer for the current snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    StateChanged { enabled: bool },
    PeersChanged,
    ConnectionChanged,
    ThisDeviceChanged { device: Option<PeerDevice> },
}

/// Outward event for the UI/application layer. Serializes as `{"method": .., "arguments": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method", content = "arguments")]
pub enum Notification {
    #[serde(rename = "onWifiDirectStateChanged")]
    StateChanged { enabled: bool },
    #[serde(rename = "onPeersChanged")]
    PeersChanged { devices: Vec<PeerDevice> },
    #[serde(rename = "onConnectionChanged", rename_all = "camelCase")]
    ConnectionChanged {
        is_connected: bool,
        is_group_owner: bool,
        owner_address: Option<IpAddr>,
    },
    #[serde(rename = "onTransferProgress")]
    TransferProgress(TransferProgress),
}

impl Notification {
    pub fn connection(info: &ConnectionInfo) -> Self {
        Notification::ConnectionChanged {
            is_connected: info.connected,
            is_group_owner: info.is_owner,
            owner_address: info.owner_address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::PeerStatus;

    #[test]
    fn connection_changed_json_shape() {
        let info = ConnectionInfo {
            connected: true,
            is_owner: false,
            owner_address: Some("192.168.49.1".parse().unwrap()),
        };
        let v = serde_json::to_value(Notification::connection(&info)).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "method": "onConnectionChanged",
                "arguments": {
                    "isConnected": true,
                    "isGroupOwner": false,
                    "ownerAddress": "192.168.49.1"
                }
            })
        );
    }

    #[test]
    fn progress_and_peers_json_shape() {
        let v = serde_json::to_value(Notification::TransferProgress(TransferProgress {
            percent: 50,
            bytes_transferred: 4096,
            total_bytes: 8192,
        }))
        .unwrap();
        assert_eq!(v["method"], "onTransferProgress");
        assert_eq!(v["arguments"]["percent"], 50);
        assert_eq!(v["arguments"]["bytesTransferred"], 4096);
        assert_eq!(v["arguments"]["totalBytes"], 8192);

        let v = serde_json::to_value(Notification::PeersChanged {
            devices: vec![PeerDevice::new("Pixel", "aa:bb", PeerStatus::Available)],
        })
        .unwrap();
        assert_eq!(v["arguments"]["devices"][0]["deviceName"], "Pixel");
        assert_eq!(v["arguments"]["devices"][0]["deviceAddress"], "aa:bb");
        assert_eq!(v["arguments"]["devices"][0]["status"], "Available");
    }
}
