//! # Server Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so an empty file
//! is a valid configuration.
//!
//! ```toml
//! name = "My Server"
//! port = 8303
//! max_clients = 16
//! map = "dm1"
//!
//! [rcon]
//! password = "secret"
//! max_tries = 3
//! bantime = 5
//!
//! [dnsbl]
//! enabled = true
//! host = "dnsbl.example.org"
//! ```

use crate::error::ConfigError;
use crate::server::AuthLevel;
use crate::snapshot::{DeltaCodec, Lz4Codec, VarIntCodec};
use crate::MAX_CLIENTS;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

/// Byte codec applied to snapshot deltas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotCodec {
    /// Word-wise varints.
    #[default]
    VarInt,
    /// LZ4 block compression.
    Lz4,
}

impl SnapshotCodec {
    /// Instantiates the codec.
    #[must_use]
    pub fn build(self) -> Box<dyn DeltaCodec> {
        match self {
            Self::VarInt => Box::new(VarIntCodec),
            Self::Lz4 => Box::new(Lz4Codec),
        }
    }
}

/// Remote console settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RconConfig {
    /// Password of the default admin key. Generated when every password is empty.
    pub password: String,
    /// Password of the default moderator key.
    pub mod_password: String,
    /// Password of the default helper key.
    pub helper_password: String,
    /// Failed logins before punishment; 0 disables the limit.
    pub max_tries: i32,
    /// Ban length in minutes after too many tries; 0 only disconnects.
    pub bantime: i32,
    /// Minimum level that receives server log lines.
    pub auth_level: AuthLevel,
}

impl Default for RconConfig {
    fn default() -> Self {
        Self {
            password: String::new(),
            mod_password: String::new(),
            helper_password: String::new(),
            max_tries: 30,
            bantime: 5,
            auth_level: AuthLevel::Admin,
        }
    }
}

/// Address reputation lookup settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsblConfig {
    /// Enables lookups for new connections.
    pub enabled: bool,
    /// Blacklist zone, e.g. `dnsbl.example.org`.
    pub host: String,
    /// Optional access key prepended to the query.
    pub key: String,
    /// Ban blacklisted addresses.
    pub ban: bool,
}

/// Server configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name shown in the server browser.
    pub name: String,
    /// Address to bind to.
    pub bind_addr: IpAddr,
    /// UDP port to bind.
    pub port: u16,
    /// Number of client slots.
    pub max_clients: usize,
    /// Connections allowed from one address.
    pub max_clients_per_ip: usize,
    /// Slots kept for holders of the reserved-slot password.
    pub reserved_slots: usize,
    /// Join password; empty for none.
    pub password: String,
    /// Password for the reserved slots.
    pub reserved_slots_pass: String,
    /// Map to load.
    pub map: String,
    /// Directory holding `maps/` and `maps7/`.
    pub maps_dir: PathBuf,
    /// Map chunks sent ahead per request.
    pub map_window: i32,
    /// Pre-send the map window to legacy clients.
    pub fast_download: bool,
    /// Send snapshots every tick instead of every other tick.
    pub high_bandwidth: bool,
    /// Per-client traffic limit in KiB/s; 0 disables.
    pub netlimit: i32,
    /// Smoothing of the traffic average, in percent.
    pub netlimit_alpha: i32,
    /// Server-info replies with player lists per second; 0 disables the limit.
    pub server_info_per_second: i32,
    /// 1 reloads the map once the server is empty, 2 on every emptying.
    pub reload_when_empty: i32,
    /// Shut down once the last client leaves.
    pub shutdown_when_empty: bool,
    /// Accept 0.7 clients.
    pub sixup: bool,
    /// Minutes an address is banned for leaving disruptively and rejoining; 0 disables.
    pub leave_abuse_ban: i32,
    /// Show client addresses in rcon output by default.
    pub show_ips: bool,
    /// Codec applied to snapshot deltas.
    pub snapshot_codec: SnapshotCodec,
    /// Remote console.
    pub rcon: RconConfig,
    /// Address reputation lookups.
    pub dnsbl: DnsblConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "unnamed server".to_owned(),
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8303,
            max_clients: MAX_CLIENTS,
            max_clients_per_ip: 4,
            reserved_slots: 0,
            password: String::new(),
            reserved_slots_pass: String::new(),
            map: "dm1".to_owned(),
            maps_dir: PathBuf::from("data"),
            map_window: 15,
            fast_download: true,
            high_bandwidth: false,
            netlimit: 0,
            netlimit_alpha: 50,
            server_info_per_second: 50,
            reload_when_empty: 0,
            shutdown_when_empty: false,
            sixup: true,
            leave_abuse_ban: 0,
            show_ips: false,
            snapshot_codec: SnapshotCodec::VarInt,
            rcon: RconConfig::default(),
            dnsbl: DnsblConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// See [`ServerConfig::from_toml_str`]; also fails if the file is unreadable.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_CLIENTS).contains(&self.max_clients) {
            return Err(ConfigError::Invalid(format!(
                "max_clients must be between 1 and {MAX_CLIENTS}, got {}",
                self.max_clients
            )));
        }
        if self.reserved_slots >= self.max_clients {
            return Err(ConfigError::Invalid(
                "reserved_slots must be smaller than max_clients".to_owned(),
            ));
        }
        if self.max_clients_per_ip == 0 {
            return Err(ConfigError::Invalid("max_clients_per_ip must be at least 1".to_owned()));
        }
        if self.map_window < 1 {
            return Err(ConfigError::Invalid("map_window must be at least 1".to_owned()));
        }
        if !(0..=100).contains(&self.netlimit_alpha) {
            return Err(ConfigError::Invalid("netlimit_alpha must be a percentage".to_owned()));
        }
        if self.map.is_empty() {
            return Err(ConfigError::Invalid("map must not be empty".to_owned()));
        }
        Ok(())
    }

    /// Socket address to bind.
    #[must_use]
    pub const fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = ServerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind_address().port(), 8303);
    }

    #[test]
    fn test_sections_parse() {
        let config = ServerConfig::from_toml_str(
            r#"
            name = "Test"
            max_clients = 16
            snapshot_codec = "lz4"

            [rcon]
            password = "abc"
            max_tries = 3
            auth_level = "mod"

            [dnsbl]
            enabled = true
            host = "bl.example.org"
            "#,
        )
        .unwrap();

        assert_eq!(config.name, "Test");
        assert_eq!(config.max_clients, 16);
        assert_eq!(config.snapshot_codec, SnapshotCodec::Lz4);
        assert_eq!(config.rcon.max_tries, 3);
        assert_eq!(config.rcon.bantime, 5);
        assert_eq!(config.rcon.auth_level, AuthLevel::Mod);
        assert!(config.dnsbl.enabled);
        assert!(!config.dnsbl.ban);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            ServerConfig::from_toml_str("max_clients = 65"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml_str("max_clients = 4\nreserved_slots = 4"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml_str("max_clients = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_codec_builds() {
        assert_eq!(SnapshotCodec::VarInt.build().name(), "varint");
        assert_eq!(SnapshotCodec::Lz4.build().name(), "lz4");
    }
}
