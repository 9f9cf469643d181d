//! # Snapnet Networking
//!
//! Authoritative, tick-synchronized game-server networking with per-client
//! delta-compressed snapshots.
//!
//! ## Architecture
//!
//! - **Protocol**: varint message codec, extended (UUID) message types and the
//!   translation between the legacy and the sixup (0.7) wire generations
//! - **Snapshot**: builder, field-level delta engine, per-client history
//! - **Transport**: the session contract plus a UDP and an in-memory transport
//! - **Server**: connection state machine, remote console, server browser
//!   responder and the fixed-rate tick loop
//! - **Integration**: the game-logic contract the server drives
//!
//! ## Data Flow
//!
//! ```text
//! transport ──▶ message codec ──▶ session state machine ──▶ game logic
//!                                                              │
//!      ◀── message codec ◀── delta vs. acked base ◀── snapshot builder
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use snapnet_networking::{LobbyGame, Server, ServerConfig};
//!
//! let config = ServerConfig::load("server.toml")?;
//! let mut server = Server::bind(config, LobbyGame::new())?;
//! server.run(); // Blocks, ticks at 50Hz
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod integration;
pub mod protocol;
pub mod server;
pub mod snapshot;
pub mod transport;

// Re-exports for convenience
pub use config::{DnsblConfig, RconConfig, ServerConfig, SnapshotCodec};
pub use error::{AuthError, ConfigError, NetError, NetResult, SnapshotError};
pub use integration::{DemoRecorder, GameLogic, LobbyGame, Register};
pub use protocol::{MsgPacker, Protocol, SystemMsg, Unpacker, UuidManager};
pub use server::{AuthLevel, AuthManager, ClientState, Server, ServerState};
pub use snapshot::{Snapshot, SnapshotBuilder, SnapshotHistory};
pub use transport::{ChunkFlags, MemoryTransport, NetEvent, Transport, UdpTransport};

/// Simulation ticks per second.
///
/// At 50Hz each tick is 20ms.
pub const SERVER_TICK_SPEED: u32 = 50;

/// Maximum number of client slots.
pub const MAX_CLIENTS: usize = 64;

/// Clients a vanilla server browser can display.
pub const VANILLA_MAX_CLIENTS: usize = 16;

/// Largest datagram the transport sends or accepts.
pub const MAX_PACKET_SIZE: usize = 1400;

/// Largest chunk payload inside one datagram.
pub const NET_MAX_PAYLOAD: usize = MAX_PACKET_SIZE - 6;

/// Bytes of compressed delta per snapshot part.
pub const MAX_SNAPSHOT_PACKSIZE: usize = 900;

/// Maximum integers in one client input.
pub const MAX_INPUT_SIZE: usize = 128;

/// Entries in the per-client input ring.
pub const INPUT_RING_SIZE: usize = 200;

/// Bytes of map data per transfer chunk.
pub const MAP_CHUNK_SIZE: usize = 1024 - 128;

/// Remote console commands announced per tick.
pub const MAX_RCONCMD_SEND: usize = 16;

/// Net version of legacy clients.
pub const GAME_NETVERSION: &str = "0.6 626fce9a778df4d4";

/// Net version of sixup clients.
pub const SIXUP_NETVERSION: &str = "0.7 802f1be60a05665f";

/// Capability protocol version announced to clients.
pub const SERVERCAP_CURVERSION: i32 = 5;

/// Maximum client name length in bytes.
pub const MAX_NAME_LENGTH: usize = 16;

/// Maximum clan name length in bytes.
pub const MAX_CLAN_LENGTH: usize = 12;
