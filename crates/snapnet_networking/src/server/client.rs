//! # Client Slots
//!
//! Track connected clients, their session state, and their input history.
//!
//! ## Design
//!
//! - Fixed number of slots addressed by index; collaborators only ever hold
//!   the index
//! - Ring buffer for input history
//! - Snapshot history per slot for delta bases

use super::auth::AuthLevel;
use super::dnsbl::DnsblState;
use crate::protocol::Protocol;
use crate::snapshot::SnapshotHistory;
use crate::{INPUT_RING_SIZE, MAX_INPUT_SIZE};
use std::net::SocketAddr;
use std::time::Instant;
use uuid::Uuid;

/// Session state of a slot.
///
/// Ordered: a connection only moves forward until it is reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClientState {
    /// Slot is free.
    #[default]
    Empty,
    /// Awaiting the client version message.
    PreAuth,
    /// Awaiting the info message.
    Auth,
    /// Map transfer in progress.
    Connecting,
    /// Map loaded, awaiting enter-game.
    Ready,
    /// Playing.
    InGame,
}

impl ClientState {
    /// Name used in status output.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::PreAuth => "preauth",
            Self::Auth => "auth",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::InGame => "ingame",
        }
    }
}

/// How often a client receives snapshots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SnapRate {
    /// Not yet acknowledged anything; every tenth tick.
    #[default]
    Init,
    /// Delta base lost; every fiftieth tick until the next ack.
    Recover,
    /// Every snapshot tick.
    Full,
}

/// One received input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Input {
    /// Tick the input applies to; -1 when unused.
    pub game_tick: i32,
    /// Input words.
    pub data: [i32; MAX_INPUT_SIZE],
    /// Number of valid words.
    pub size: usize,
}

impl Input {
    const EMPTY: Self = Self {
        game_tick: -1,
        data: [0; MAX_INPUT_SIZE],
        size: 0,
    };

    /// The valid words.
    #[inline]
    #[must_use]
    pub fn words(&self) -> &[i32] {
        &self.data[..self.size]
    }
}

/// Everything the server knows about one connection slot.
#[derive(Clone, Debug)]
pub struct ClientSlot {
    /// Session state.
    pub state: ClientState,
    /// Wire generation spoken by the client.
    pub protocol: Protocol,
    /// Address of the connection.
    pub addr: Option<SocketAddr>,
    /// Display name.
    pub name: String,
    /// Clan tag.
    pub clan: String,
    /// Country code.
    pub country: i32,
    /// Score shown in the server browser.
    pub score: i32,
    /// Client flags reported by the game logic.
    pub flags: i32,

    /// DDNet client version; 0 for clients that did not report one.
    pub ddnet_version: i32,
    /// Client version string.
    pub ddnet_version_str: String,
    /// Connection UUID reported by the client.
    pub connection_id: Option<Uuid>,

    /// Remote console level.
    pub authed: AuthLevel,
    /// Key slot used to log in.
    pub auth_key: Option<usize>,
    /// Failed remote console logins.
    pub auth_tries: i32,
    /// Next command to announce; `None` when the list is complete.
    pub rcon_cmd_cursor: Option<usize>,
    /// Show addresses in forwarded log lines.
    pub show_ips: bool,

    inputs: Vec<Input>,
    current_input: usize,
    /// Most recent input words.
    pub latest_input: Input,

    /// Snapshots sent, for delta bases.
    pub snapshots: SnapshotHistory,
    /// Last snapshot tick the client acknowledged; -1 for none.
    pub last_acked_snapshot: i32,
    /// Last tick the client sent input for.
    pub last_input_tick: i32,
    /// Snapshot rate.
    pub snap_rate: SnapRate,
    /// Round-trip estimate in milliseconds.
    pub latency: i32,

    /// Smoothed bytes per second received.
    pub traffic: f64,
    /// Time of the last traffic sample.
    pub traffic_since: Option<Instant>,

    /// Next map chunk to send.
    pub next_map_chunk: i32,

    /// Game-logic data kept across a map reload.
    pub persistent_data: Vec<u8>,
    /// True when `persistent_data` holds a value.
    pub has_persistent_data: bool,

    /// Address reputation.
    pub dnsbl: DnsblState,
    /// The client left in a way that should not be rewarded by a rejoin.
    pub disruptive_leave: bool,
}

impl ClientSlot {
    /// Creates an empty slot with room for `persistent_size` bytes of game data.
    #[must_use]
    pub fn new(persistent_size: usize) -> Self {
        Self {
            state: ClientState::Empty,
            protocol: Protocol::Legacy,
            addr: None,
            name: String::new(),
            clan: String::new(),
            country: -1,
            score: 0,
            flags: 0,
            ddnet_version: 0,
            ddnet_version_str: String::new(),
            connection_id: None,
            authed: AuthLevel::None,
            auth_key: None,
            auth_tries: 0,
            rcon_cmd_cursor: None,
            show_ips: false,
            inputs: vec![Input::EMPTY; INPUT_RING_SIZE],
            current_input: 0,
            latest_input: Input::EMPTY,
            snapshots: SnapshotHistory::new(),
            last_acked_snapshot: -1,
            last_input_tick: -1,
            snap_rate: SnapRate::Init,
            latency: 0,
            traffic: 0.0,
            traffic_since: None,
            next_map_chunk: 0,
            persistent_data: vec![0; persistent_size],
            has_persistent_data: false,
            dnsbl: DnsblState::None,
            disruptive_leave: false,
        }
    }

    /// True for the sixup generation.
    #[inline]
    #[must_use]
    pub const fn is_sixup(&self) -> bool {
        self.protocol.is_sixup()
    }

    /// Resets session progress for a (re)start of the join sequence.
    ///
    /// Identity, auth and persistent data are kept.
    pub fn reset(&mut self) {
        for input in &mut self.inputs {
            input.game_tick = -1;
        }
        self.current_input = 0;
        self.latest_input = Input::EMPTY;

        self.snapshots.purge_all();
        self.last_acked_snapshot = -1;
        self.last_input_tick = -1;
        self.snap_rate = SnapRate::Init;
        self.score = 0;
        self.next_map_chunk = 0;
        self.flags = 0;
        self.ddnet_version = 0;
    }

    /// Prepares the slot for a new connection.
    pub fn open(&mut self, addr: Option<SocketAddr>, protocol: Protocol, state: ClientState, show_ips: bool) {
        self.state = state;
        self.protocol = protocol;
        self.addr = addr;
        self.name.clear();
        self.clan.clear();
        self.country = -1;
        self.authed = AuthLevel::None;
        self.auth_key = None;
        self.auth_tries = 0;
        self.rcon_cmd_cursor = None;
        self.show_ips = show_ips;
        self.traffic = 0.0;
        self.traffic_since = None;
        self.has_persistent_data = false;
        self.dnsbl = DnsblState::None;
        self.disruptive_leave = false;
        self.connection_id = None;
        self.ddnet_version_str.clear();
        self.reset();
    }

    /// Returns the slot to [`ClientState::Empty`].
    pub fn clear(&mut self) {
        self.open(None, Protocol::Legacy, ClientState::Empty, false);
        self.latency = 0;
    }

    /// Stores an input in the ring and makes it the latest input.
    pub fn push_input(&mut self, game_tick: i32, words: &[i32]) {
        let size = words.len().min(MAX_INPUT_SIZE);
        let input = &mut self.inputs[self.current_input];
        input.game_tick = game_tick;
        input.size = size;
        input.data[..size].copy_from_slice(&words[..size]);
        input.data[size..].fill(0);

        self.latest_input = input.clone();
        self.current_input = (self.current_input + 1) % INPUT_RING_SIZE;
    }

    /// The stored input for `tick`, if any.
    #[must_use]
    pub fn input_for_tick(&self, tick: i32) -> Option<&Input> {
        self.inputs.iter().find(|input| input.game_tick == tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_order() {
        assert!(ClientState::Empty < ClientState::PreAuth);
        assert!(ClientState::Connecting < ClientState::Ready);
        assert!(ClientState::Ready < ClientState::InGame);
    }

    #[test]
    fn test_input_ring_wraps() {
        let mut slot = ClientSlot::new(0);
        for tick in 0..(INPUT_RING_SIZE as i32 + 5) {
            slot.push_input(tick, &[tick, 1]);
        }
        // The oldest five were overwritten
        assert!(slot.input_for_tick(4).is_none());
        assert_eq!(slot.input_for_tick(5).unwrap().words(), &[5, 1]);
        assert_eq!(slot.latest_input.words(), &[INPUT_RING_SIZE as i32 + 4, 1]);
    }

    #[test]
    fn test_input_truncated_to_max() {
        let mut slot = ClientSlot::new(0);
        let words = vec![7; MAX_INPUT_SIZE + 10];
        slot.push_input(1, &words);
        assert_eq!(slot.latest_input.size, MAX_INPUT_SIZE);
    }

    #[test]
    fn test_reset_keeps_identity() {
        let mut slot = ClientSlot::new(4);
        slot.open(None, Protocol::Sixup, ClientState::PreAuth, false);
        slot.name = "nameless tee".to_owned();
        slot.authed = AuthLevel::Mod;
        slot.push_input(3, &[1]);
        slot.last_acked_snapshot = 40;
        slot.snap_rate = SnapRate::Full;

        slot.reset();
        assert_eq!(slot.name, "nameless tee");
        assert_eq!(slot.authed, AuthLevel::Mod);
        assert!(slot.input_for_tick(3).is_none());
        assert_eq!(slot.last_acked_snapshot, -1);
        assert_eq!(slot.snap_rate, SnapRate::Init);

        slot.clear();
        assert_eq!(slot.state, ClientState::Empty);
        assert_eq!(slot.authed, AuthLevel::None);
        assert!(!slot.is_sixup());
        assert_eq!(slot.persistent_data.len(), 4);
    }
}
