//! # Integration Traits
//!
//! Collaborators the server core drives but does not own.
//!
//! ```text
//! Server core calls:          Collaborator implements:
//! ┌──────────────────┐        ┌──────────────────┐
//! │ GameLogic hooks  │ ─────▶ │ impl GameLogic   │
//! │ DemoRecorder     │ ─────▶ │ impl DemoRecorder│
//! │ Register         │ ─────▶ │ impl Register    │
//! └──────────────────┘        └──────────────────┘
//! ```
//!
//! Hooks receive the slot index of a client, never a reference to the slot.
//! Every hook runs on the tick thread and must not block.

use crate::protocol::{Unpacker, UuidManager};
use crate::server::{AuthLevel, ServerState};
use crate::snapshot::{ItemSizes, SnapshotBuilder};
use std::time::Instant;

// ============================================================================
// GAME LOGIC
// ============================================================================

/// The game simulation behind the server.
///
/// Exactly one instance is owned by a [`crate::Server`]. Hooks that take
/// `&mut ServerState` may send messages, rename clients, allocate snapshot IDs
/// or drop clients; drops take effect once the hook returns.
pub trait GameLogic: Send {
    /// Net version clients must report, e.g. [`crate::GAME_NETVERSION`].
    fn net_version(&self) -> &str;

    /// Game version shown in the server browser.
    fn version(&self) -> &str;

    /// Game type shown in the server browser.
    fn game_type(&self) -> &str;

    /// Registers extended message and item types.
    ///
    /// Called once, before the registry is shared with the snapshot builder.
    fn register_uuids(&self, _uuids: &mut UuidManager) {}

    /// Static payload sizes of snapshot item types.
    fn item_sizes(&self) -> ItemSizes {
        ItemSizes::new()
    }

    /// Bytes of per-client data kept across a map reload.
    fn persistent_client_data_size(&self) -> usize {
        0
    }

    /// A map was loaded; set up the world.
    fn on_init(&mut self, server: &mut ServerState);

    /// The world is torn down.
    ///
    /// `final_shutdown` is false when a map reload follows.
    fn on_shutdown(&mut self, _server: &mut ServerState, _final_shutdown: bool) {}

    /// Advances the simulation by one tick.
    fn on_tick(&mut self, server: &mut ServerState);

    /// Called once before the snapshots of a tick are built.
    fn on_pre_snap(&mut self, _server: &mut ServerState) {}

    /// Writes the world as seen by `cid` into `builder`.
    ///
    /// `cid` is `None` for the demo recorder's view.
    fn on_snap(&mut self, server: &ServerState, builder: &mut SnapshotBuilder, cid: Option<usize>);

    /// Called once after the snapshots of a tick were sent.
    fn on_post_snap(&mut self, _server: &mut ServerState) {}

    /// A game message from a client in [`crate::ClientState::Ready`] or later.
    fn on_message(&mut self, server: &mut ServerState, id: i32, payload: &mut Unpacker<'_>, cid: usize);

    /// A transport connection opened on `cid`.
    fn on_client_engine_join(&mut self, _server: &mut ServerState, _cid: usize, _sixup: bool) {}

    /// The slot `cid` was released.
    fn on_client_engine_drop(&mut self, _server: &mut ServerState, _cid: usize, _reason: &str) {}

    /// The client finished loading the map.
    ///
    /// `persistent` is the data captured before the last map reload, if any.
    fn on_client_connected(&mut self, server: &mut ServerState, cid: usize, persistent: Option<&[u8]>);

    /// The client entered the game.
    fn on_client_enter(&mut self, server: &mut ServerState, cid: usize);

    /// A client that was at least ready left.
    fn on_client_drop(&mut self, server: &mut ServerState, cid: usize, reason: &str);

    /// Input arrived for an in-game client.
    fn on_client_direct_input(&mut self, _server: &mut ServerState, _cid: usize, _input: &[i32]) {}

    /// Input stored for the tick about to be simulated.
    fn on_client_predicted_input(&mut self, _server: &mut ServerState, _cid: usize, _input: &[i32]) {}

    /// Input stored for the tick after the one about to be simulated.
    fn on_client_predicted_early_input(&mut self, _server: &mut ServerState, _cid: usize, _input: &[i32]) {}

    /// Whether the client may enter the game now.
    fn is_client_ready_to_enter(&self, _server: &ServerState, _cid: usize) -> bool {
        true
    }

    /// Whether the client counts as a player rather than a spectator.
    fn is_client_player(&self, cid: usize) -> bool;

    /// Writes data to carry across a map reload.
    ///
    /// # Returns
    ///
    /// False when there is nothing to keep.
    fn on_client_data_persist(&mut self, _cid: usize, _data: &mut [u8]) -> bool {
        false
    }

    /// The remote console level of a client changed.
    fn on_set_authed(&mut self, _server: &mut ServerState, _cid: usize, _level: AuthLevel) {}
}

// ============================================================================
// DEMO RECORDING
// ============================================================================

/// Server-side demo recorder. The file format is the implementor's business.
pub trait DemoRecorder: Send {
    /// True while a demo is being written.
    fn is_recording(&self) -> bool;

    /// Records the full snapshot of `tick`.
    fn record_snapshot(&mut self, tick: i32, data: &[u8]);

    /// Records a packed game message.
    fn record_message(&mut self, data: &[u8]);

    /// Finishes the current demo.
    fn stop(&mut self);
}

// ============================================================================
// MASTER SERVER REGISTRATION
// ============================================================================

/// Announces the server to master servers.
pub trait Register: Send {
    /// Drives pending announcements.
    fn update(&mut self, now: Instant);

    /// The advertised server info changed; `json` is the new document.
    fn on_new_info(&mut self, json: &str);

    /// The server is going away.
    fn on_shutdown(&mut self);
}
