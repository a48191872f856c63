//! Load config from file and environment.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use peerdrop_core::Role;

/// Daemon configuration. File: ~/.config/peerdrop/config.toml or /etc/peerdrop/config.toml.
/// Env overrides: PEERDROP_TRANSFER_PORT, PEERDROP_DOWNLOAD_DIR, PEERDROP_ROLE.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Transfer TCP port (default 8988).
    #[serde(default = "default_transfer_port")]
    pub transfer_port: u16,
    /// Address the owner's transfer listener binds to (default 0.0.0.0).
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Where received files land.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// How long disconnect waits for an in-flight transfer to observe cancellation.
    #[serde(default = "default_disconnect_grace_ms")]
    pub disconnect_grace_ms: u64,
    /// Dial timeout for the client side.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Role this endpoint takes when the static link forms a group.
    #[serde(default = "default_role")]
    pub role: Role,
    /// Address peers reach this endpoint on when it owns the group.
    #[serde(default = "default_local_address")]
    pub local_address: IpAddr,
    /// Peers known to the static link.
    #[serde(default)]
    pub peers: Vec<StaticPeer>,
}

/// A peer entry for the configuration-driven link.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StaticPeer {
    pub name: String,
    /// Link-layer identifier used with `connect`.
    pub address: String,
    /// Network address the peer owns the group on.
    pub ip: IpAddr,
}

fn default_transfer_port() -> u16 {
    peerdrop_core::wire::TRANSFER_PORT
}
fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_download_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(h) => PathBuf::from(h).join("Downloads/peerdrop"),
        None => std::env::temp_dir().join("peerdrop"),
    }
}
fn default_disconnect_grace_ms() -> u64 {
    2000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_role() -> Role {
    Role::Owner
}
fn default_local_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transfer_port: default_transfer_port(),
            bind_address: default_bind_address(),
            download_dir: default_download_dir(),
            disconnect_grace_ms: default_disconnect_grace_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            role: default_role(),
            local_address: default_local_address(),
            peers: Vec::new(),
        }
    }
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.transfer_port)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Load config: merge default, then config file (explicit path, else first existing default path), then env vars.
pub fn load(explicit: Option<PathBuf>) -> Config {
    let mut c = load_file(explicit).unwrap_or_default();
    apply_env(&mut c);
    c
}

fn apply_env(c: &mut Config) {
    if let Ok(s) = std::env::var("PEERDROP_TRANSFER_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.transfer_port = p;
        }
    }
    if let Some(dir) = std::env::var_os("PEERDROP_DOWNLOAD_DIR") {
        c.download_dir = PathBuf::from(dir);
    }
    if let Ok(s) = std::env::var("PEERDROP_ROLE") {
        match s.to_ascii_lowercase().as_str() {
            "owner" => c.role = Role::Owner,
            "client" => c.role = Role::Client,
            other => tracing::warn!(role = other, "ignoring unknown PEERDROP_ROLE"),
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/peerdrop/config.toml"));
    }
    out.push(PathBuf::from("/etc/peerdrop/config.toml"));
    out
}

fn load_file(explicit: Option<PathBuf>) -> Option<Config> {
    let paths = match explicit {
        Some(p) => vec![p],
        None => config_paths(),
    };
    for p in paths {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match parse(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => tracing::warn!(path = %p.display(), error = %e, "invalid config file"),
                },
                Err(e) => tracing::warn!(path = %p.display(), error = %e, "unreadable config file"),
            }
            break;
        }
    }
    None
}

pub fn parse(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}
