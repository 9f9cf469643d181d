//! # Server State
//!
//! Everything the server core owns apart from the game logic. Game hooks
//! receive `&mut ServerState` and address clients only by slot index.
//!
//! ## Deferred work
//!
//! Dropping a client or changing its remote console level from inside a hook
//! must not re-enter the game logic. Such actions are queued in `deferred` and
//! replayed by [`super::Server`] once the current hook returns.

use super::auth::{AuthLevel, AuthManager};
use super::browser::{BrowserClient, InfoRateLimit, ServerInfo};
use super::client::{ClientSlot, ClientState, Input};
use super::dnsbl::{DnsblJob, DnsblResolver};
use super::map::LoadedMap;
use super::tick::TickClock;
use crate::config::ServerConfig;
use crate::integration::DemoRecorder;
use crate::protocol::{pack_message, MsgPacker, Protocol, SystemMsg, UuidManager};
use crate::snapshot::DeltaCodec;
use crate::transport::{ChunkFlags, NetBan, SendTarget, Transport};
use crate::{MAP_CHUNK_SIZE, MAX_CLAN_LENGTH, MAX_NAME_LENGTH, SERVERCAP_CURVERSION};
use snapnet_core::{Clock, SnapIdPool};
use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SERVERCAPFLAG_DDNET: i32 = 1 << 0;
const SERVERCAPFLAG_CHATTIMEOUTCODE: i32 = 1 << 1;
const SERVERCAPFLAG_ANYPLAYERFLAG: i32 = 1 << 2;
const SERVERCAPFLAG_PINGEX: i32 = 1 << 3;

/// Longest remote console line sent to a client.
pub const MAX_RCON_LINE: usize = 512;

/// Work queued for the server loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Deferred {
    /// The slot was dropped; run the drop hooks and clear it.
    Drop {
        /// Slot.
        cid: usize,
        /// Reason given to the client.
        reason: String,
    },
    /// The remote console level of a slot changed.
    AuthChanged {
        /// Slot.
        cid: usize,
        /// New level.
        level: AuthLevel,
    },
}

/// Server-side state shared with the game logic.
pub struct ServerState {
    pub(crate) config: ServerConfig,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) clients: Vec<ClientSlot>,
    pub(crate) ids: SnapIdPool,
    pub(crate) uuids: Arc<UuidManager>,
    pub(crate) codec: Box<dyn DeltaCodec>,
    pub(crate) auth: AuthManager,
    pub(crate) bans: NetBan,
    pub(crate) map: LoadedMap,
    pub(crate) ticks: TickClock,
    pub(crate) demo: Option<Box<dyn DemoRecorder>>,
    pub(crate) deferred: VecDeque<Deferred>,
    pub(crate) rcon_reentry: bool,
    pub(crate) rcon_cid: Option<usize>,
    pub(crate) rcon_auth_level: AuthLevel,
    pub(crate) map_reload: bool,
    pub(crate) reloaded_when_empty: bool,
    pub(crate) running: bool,
    pub(crate) shutdown_reason: Option<String>,
    pub(crate) info_needs_update: bool,
    pub(crate) info_rate: InfoRateLimit,
    pub(crate) dnsbl_jobs: Vec<Option<DnsblJob>>,
    pub(crate) resolver: Box<dyn DnsblResolver>,
    pub(crate) net_version: String,
    pub(crate) game_version: String,
    pub(crate) game_type: String,
}

impl ServerState {
    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Current game tick.
    #[inline]
    #[must_use]
    pub const fn tick(&self) -> i32 {
        self.ticks.tick()
    }

    /// Current time of the server clock.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Number of client slots.
    #[must_use]
    pub fn max_clients(&self) -> usize {
        self.clients.len()
    }

    /// A client slot; `None` for out-of-range indices.
    #[must_use]
    pub fn client(&self, cid: usize) -> Option<&ClientSlot> {
        self.clients.get(cid)
    }

    /// Session state of a slot; [`ClientState::Empty`] for out-of-range indices.
    #[must_use]
    pub fn client_state(&self, cid: usize) -> ClientState {
        self.clients.get(cid).map_or(ClientState::Empty, |c| c.state)
    }

    /// True for slots in [`ClientState::InGame`].
    #[must_use]
    pub fn client_ingame(&self, cid: usize) -> bool {
        self.client_state(cid) == ClientState::InGame
    }

    /// Remote console level of a slot.
    #[must_use]
    pub fn client_authed(&self, cid: usize) -> AuthLevel {
        self.clients.get(cid).map_or(AuthLevel::None, |c| c.authed)
    }

    /// Identifier of the key a slot logged in with.
    #[must_use]
    pub fn auth_name(&self, cid: usize) -> Option<&str> {
        let key = self.clients.get(cid)?.auth_key?;
        self.auth.key_ident(key)
    }

    /// Address of a connected slot.
    #[must_use]
    pub fn client_addr(&self, cid: usize) -> Option<SocketAddr> {
        self.clients.get(cid).filter(|c| c.state != ClientState::Empty)?.addr
    }

    /// True if a slot speaks the sixup protocol.
    #[must_use]
    pub fn is_sixup(&self, cid: usize) -> bool {
        self.clients.get(cid).is_some_and(ClientSlot::is_sixup)
    }

    /// Most recent input of a slot.
    #[must_use]
    pub fn latest_input(&self, cid: usize) -> Option<&Input> {
        self.clients.get(cid).map(|c| &c.latest_input)
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.iter().filter(|c| c.state != ClientState::Empty).count()
    }

    /// Name of the loaded map.
    #[must_use]
    pub fn map_name(&self) -> &str {
        &self.map.name
    }

    /// Registered message and item UUIDs.
    #[must_use]
    pub fn uuids(&self) -> &UuidManager {
        &self.uuids
    }

    /// Remote console keys.
    #[must_use]
    pub const fn auth(&self) -> &AuthManager {
        &self.auth
    }

    /// Address ban list.
    #[must_use]
    pub const fn bans(&self) -> &NetBan {
        &self.bans
    }

    /// Tick schedule.
    #[must_use]
    pub const fn ticks(&self) -> &TickClock {
        &self.ticks
    }

    /// False once shutdown was requested.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    // ------------------------------------------------------------------
    // Client identity
    // ------------------------------------------------------------------

    fn name_available(&self, cid: usize, name: &str) -> bool {
        if name.is_empty() || name.starts_with('/') {
            return false;
        }
        !self
            .clients
            .iter()
            .enumerate()
            .any(|(other, c)| other != cid && c.state >= ClientState::Ready && c.name == name)
    }

    fn editable(&self, cid: usize) -> bool {
        self.client_state(cid) >= ClientState::Ready
    }

    /// Sets a client's name, renaming to `(n)name` if the name is taken.
    ///
    /// Ignored for slots that are not at least [`ClientState::Ready`].
    pub fn set_client_name(&mut self, cid: usize, name: &str) {
        if !self.editable(cid) {
            return;
        }
        let trimmed = truncate_str(name.trim(), MAX_NAME_LENGTH - 1);
        let mut candidate = trimmed.to_owned();
        let mut n = 1;
        while !self.name_available(cid, &candidate) {
            candidate = truncate_str(&format!("({n}){trimmed}"), MAX_NAME_LENGTH - 1).to_owned();
            n += 1;
        }
        if self.clients[cid].name != candidate {
            self.clients[cid].name = candidate;
            self.expire_server_info();
        }
    }

    /// Sets a client's clan.
    pub fn set_client_clan(&mut self, cid: usize, clan: &str) {
        if !self.editable(cid) {
            return;
        }
        let clan = truncate_str(clan, MAX_CLAN_LENGTH - 1);
        if self.clients[cid].clan != clan {
            self.clients[cid].clan = clan.to_owned();
            self.expire_server_info();
        }
    }

    /// Sets a client's country code.
    pub fn set_client_country(&mut self, cid: usize, country: i32) {
        if !self.editable(cid) {
            return;
        }
        if self.clients[cid].country != country {
            self.clients[cid].country = country;
            self.expire_server_info();
        }
    }

    /// Sets a client's browser score.
    pub fn set_client_score(&mut self, cid: usize, score: i32) {
        if !self.editable(cid) {
            return;
        }
        if self.clients[cid].score != score {
            self.clients[cid].score = score;
            self.expire_server_info();
        }
    }

    /// Raises a client's flags; lower values are ignored.
    pub fn set_client_flags(&mut self, cid: usize, flags: i32) {
        if !self.editable(cid) {
            return;
        }
        let client = &mut self.clients[cid];
        client.flags = client.flags.max(flags);
    }

    /// Records the client version reported through a game message.
    pub fn set_client_ddnet_version(&mut self, cid: usize, version: i32) {
        if let Some(client) = self.clients.get_mut(cid).filter(|c| c.state != ClientState::Empty) {
            client.ddnet_version = version;
        }
    }

    /// Marks the server info as stale; it is rebuilt on the next loop iteration.
    pub fn expire_server_info(&mut self) {
        self.info_needs_update = true;
    }

    // ------------------------------------------------------------------
    // Snapshot IDs
    // ------------------------------------------------------------------

    /// Allocates an ID for a snapshot-visible object.
    ///
    /// # Panics
    ///
    /// When every ID is allocated or still cooling down.
    pub fn snap_new_id(&mut self) -> i32 {
        let now = self.clock.now();
        self.ids.allocate(now)
    }

    /// Returns an ID; it becomes reusable after the grace period.
    pub fn snap_free_id(&mut self, id: i32) {
        let now = self.clock.now();
        self.ids.free(id, now);
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Sends a message to one client, or to every in-game client.
    ///
    /// A broadcast is packed once per protocol generation. Game messages are
    /// also handed to the demo recorder.
    ///
    /// # Returns
    ///
    /// False when the message could not be packed for a recipient's protocol.
    pub fn send_msg(&mut self, msg: &MsgPacker, flags: ChunkFlags, cid: Option<usize>) -> bool {
        match cid {
            Some(cid) => {
                let Some(protocol) = self.clients.get(cid).map(|c| c.protocol) else {
                    return false;
                };
                let Some(data) = pack_message(msg, protocol, &self.uuids) else {
                    tracing::debug!("dropping message {} for cid={cid}", msg.id());
                    return false;
                };
                self.record_message(msg, &data);
                self.transport.send(SendTarget::Client(cid), &data, flags);
            }
            None => {
                let (Some(legacy), Some(sixup)) = (
                    pack_message(msg, Protocol::Legacy, &self.uuids),
                    pack_message(msg, Protocol::Sixup, &self.uuids),
                ) else {
                    return false;
                };
                self.record_message(msg, &legacy);
                for (cid, client) in self.clients.iter().enumerate() {
                    if client.state != ClientState::InGame {
                        continue;
                    }
                    let data = if client.is_sixup() { &sixup } else { &legacy };
                    self.transport.send(SendTarget::Client(cid), data, flags);
                }
            }
        }
        true
    }

    fn record_message(&mut self, msg: &MsgPacker, data: &[u8]) {
        if msg.is_system() {
            return;
        }
        if let Some(demo) = self.demo.as_mut().filter(|d| d.is_recording()) {
            demo.record_message(data);
        }
    }

    /// Sends pre-packed chunk bytes to a slot.
    pub fn send_raw(&mut self, cid: usize, data: &[u8], flags: ChunkFlags) {
        self.transport.send(SendTarget::Client(cid), data, flags);
    }

    pub(crate) fn send_capabilities(&mut self, cid: usize) {
        let mut msg = MsgPacker::system(SystemMsg::Capabilities);
        msg.add_int(SERVERCAP_CURVERSION).add_int(
            SERVERCAPFLAG_DDNET | SERVERCAPFLAG_CHATTIMEOUTCODE | SERVERCAPFLAG_ANYPLAYERFLAG | SERVERCAPFLAG_PINGEX,
        );
        self.send_msg(&msg, ChunkFlags::VITAL, Some(cid));
    }

    /// Sends the map details and map change messages, restarting the transfer.
    pub(crate) fn send_map(&mut self, cid: usize) {
        let protocol = self.clients[cid].protocol;
        let file = self.map.file(protocol);

        let mut details = MsgPacker::system(SystemMsg::MapDetails);
        details
            .add_string(&self.map.name, 0)
            .add_raw(file.sha256())
            .add_int(file.wire_crc())
            .add_int(file.wire_size());

        let mut change = MsgPacker::system(SystemMsg::MapChange);
        change
            .add_string(&self.map.name, 0)
            .add_int(file.wire_crc())
            .add_int(file.wire_size());
        if protocol.is_sixup() {
            change
                .add_int(self.config.map_window)
                .add_int(i32::try_from(MAP_CHUNK_SIZE).unwrap_or(i32::MAX))
                .add_raw(file.sha256());
        }

        self.send_msg(&details, ChunkFlags::VITAL, Some(cid));
        self.send_msg(&change, ChunkFlags::VITAL | ChunkFlags::FLUSH, Some(cid));
        self.clients[cid].next_map_chunk = 0;
    }

    /// Sends one map chunk. Requests outside the file are ignored.
    pub(crate) fn send_map_data(&mut self, cid: usize, chunk: i32) {
        let protocol = self.clients[cid].protocol;
        let file = self.map.file(protocol);
        let Some((data, last)) = file.chunk(chunk) else {
            return;
        };
        let size = i32::try_from(data.len()).unwrap_or(i32::MAX);

        let mut msg = MsgPacker::system(SystemMsg::MapData);
        if !protocol.is_sixup() {
            msg.add_int(i32::from(last))
                .add_int(file.wire_crc())
                .add_int(chunk)
                .add_int(size);
        }
        msg.add_raw(data);
        self.send_msg(&msg, ChunkFlags::VITAL | ChunkFlags::FLUSH, Some(cid));
        tracing::trace!("sending chunk {chunk} with size {size}");
    }

    pub(crate) fn send_connection_ready(&mut self, cid: usize) {
        let msg = MsgPacker::system(SystemMsg::ConReady);
        self.send_msg(&msg, ChunkFlags::VITAL | ChunkFlags::FLUSH, Some(cid));
    }

    /// Tells clients whether logins need a username; `None` broadcasts.
    pub(crate) fn send_rcon_type(&mut self, cid: Option<usize>, username_required: bool) {
        let mut msg = MsgPacker::system(SystemMsg::RconType);
        msg.add_int(i32::from(username_required));
        self.send_msg(&msg, ChunkFlags::VITAL, cid);
    }

    /// Sends one remote console line to a client.
    pub fn send_rcon_line(&mut self, cid: usize, line: &str) {
        let mut msg = MsgPacker::system(SystemMsg::RconLine);
        msg.add_string(line, MAX_RCON_LINE);
        self.send_msg(&msg, ChunkFlags::VITAL, Some(cid));
    }

    /// Forwards a log line to every client logged in at the current console
    /// level or above.
    ///
    /// The first `<{address}>` marker is unwrapped for clients that enabled
    /// `show_ips` and replaced by `XXX` for everyone else.
    pub fn send_rcon_line_authed(&mut self, line: &str) {
        if self.rcon_reentry {
            return;
        }
        self.rcon_reentry = true;

        let (with_ips, without_ips) = split_addr_markers(line);
        for cid in 0..self.clients.len() {
            let client = &self.clients[cid];
            if client.state == ClientState::Empty
                || client.authed == AuthLevel::None
                || client.authed < self.rcon_auth_level
            {
                continue;
            }
            let text = if client.show_ips { &with_ips } else { &without_ips };
            self.send_rcon_line(cid, text);
        }

        self.rcon_reentry = false;
    }

    /// Logs a server line and forwards it to logged-in clients.
    pub fn print(&mut self, line: &str) {
        tracing::info!("{line}");
        self.send_rcon_line_authed(line);
    }

    // ------------------------------------------------------------------
    // Dropping and banning
    // ------------------------------------------------------------------

    /// Disconnects a client. The drop hooks run once the current hook returns.
    pub fn drop_client(&mut self, cid: usize, reason: &str) {
        if self.client_state(cid) == ClientState::Empty || self.drop_pending(cid) {
            return;
        }
        self.transport.drop_client(cid, reason);
        self.deferred.push_back(Deferred::Drop {
            cid,
            reason: reason.to_owned(),
        });
    }

    pub(crate) fn drop_pending(&self, cid: usize) -> bool {
        self.deferred
            .iter()
            .any(|d| matches!(d, Deferred::Drop { cid: pending, .. } if *pending == cid))
    }

    /// Kicks a client on behalf of the current console user.
    ///
    /// Refuses invalid slots, the issuer itself and clients with a higher
    /// console level than the issuer.
    pub fn kick(&mut self, cid: usize, reason: &str) -> bool {
        if self.client_state(cid) == ClientState::Empty {
            self.print("invalid client id to kick");
            return false;
        }
        if self.rcon_cid == Some(cid) {
            self.print("you can't kick yourself");
            return false;
        }
        if self.clients[cid].authed > self.rcon_auth_level {
            self.print("kick command denied");
            return false;
        }
        self.drop_client(cid, reason);
        true
    }

    /// Bans the address of a client.
    pub fn ban(&mut self, cid: usize, duration: Option<Duration>, reason: &str) {
        if let Some(addr) = self.client_addr(cid) {
            self.ban_ext(addr.ip(), duration, reason);
        }
    }

    /// Bans an address and drops every client connected from it.
    pub(crate) fn ban_ext(&mut self, ip: IpAddr, duration: Option<Duration>, reason: &str) {
        let now = self.clock.now();
        let message = self.bans.ban_addr(ip, duration, reason, now).message(now);
        let length = duration.map_or_else(
            || "permanently".to_owned(),
            |d| {
                let minutes = d.as_secs().div_ceil(60);
                format!("for {minutes} minute{}", if minutes == 1 { "" } else { "s" })
            },
        );
        self.print(&format!("banned <{{{ip}}}> {length} ({reason})"));

        let targets: Vec<usize> = self
            .clients
            .iter()
            .enumerate()
            .filter(|(_, c)| c.state != ClientState::Empty && c.addr.is_some_and(|a| a.ip() == ip))
            .map(|(cid, _)| cid)
            .collect();
        for cid in targets {
            self.drop_client(cid, &message);
        }
    }

    /// Lets a reconnecting client take over its own timed-out slot.
    ///
    /// `cid` is the timed-out slot, `from` the fresh connection that proved it
    /// owns it. The fresh slot is released without a transport drop.
    ///
    /// # Returns
    ///
    /// False when the transport refuses the takeover.
    pub fn set_timed_out(&mut self, cid: usize, from: usize) -> bool {
        if cid == from || cid >= self.clients.len() || from >= self.clients.len() {
            return false;
        }
        if !self.transport.set_timed_out(cid, from) {
            return false;
        }
        self.clients[cid].protocol = self.clients[from].protocol;

        if self.clients[cid].authed != AuthLevel::None {
            self.logout_client(cid, "Timeout Protection");
        }

        let disruptive = self.clients[cid].disruptive_leave;
        let ban_minutes = self.config.leave_abuse_ban;
        if ban_minutes > 0 && disruptive {
            let duration = Some(Duration::from_secs(u64::from(ban_minutes.unsigned_abs()) * 60));
            let addrs = [self.clients[from].addr, self.clients[cid].addr];
            // The fresh slot is already detached from the transport
            self.deferred.push_back(Deferred::Drop {
                cid: from,
                reason: "Leave abuse".to_owned(),
            });
            for ip in addrs.into_iter().flatten().map(|a| a.ip()) {
                self.ban_ext(ip, duration, "Leave abuse");
            }
        } else {
            let reason = if disruptive { "Rejoined" } else { "Timeout Protection used" };
            self.deferred.push_back(Deferred::Drop {
                cid: from,
                reason: reason.to_owned(),
            });
        }

        let flags = self.clients[from].flags;
        let new_addr = self.clients[from].addr;
        let client = &mut self.clients[cid];
        client.authed = AuthLevel::None;
        client.auth_key = None;
        client.flags = flags;
        client.disruptive_leave = false;
        if new_addr.is_some() {
            client.addr = new_addr;
        }
        true
    }

    // ------------------------------------------------------------------
    // Remote console sessions
    // ------------------------------------------------------------------

    /// Ends the console session of a client.
    ///
    /// An empty `reason` is a voluntary logout.
    pub fn logout_client(&mut self, cid: usize, reason: &str) {
        if self.is_sixup(cid) {
            let msg = MsgPacker::untranslated(crate::protocol::sixup::native::RCON_AUTH_OFF, true);
            self.send_msg(&msg, ChunkFlags::VITAL, Some(cid));
        } else {
            let mut msg = MsgPacker::system(SystemMsg::RconAuthStatus);
            msg.add_int(0).add_int(0);
            self.send_msg(&msg, ChunkFlags::VITAL, Some(cid));
        }

        let ident = self.auth_name(cid).unwrap_or("").to_owned();
        let client = &mut self.clients[cid];
        client.auth_tries = 0;
        client.rcon_cmd_cursor = None;

        let line = if reason.is_empty() {
            self.send_rcon_line(cid, "Logout successful.");
            format!("ClientID={cid} with key={ident} logged out")
        } else {
            self.send_rcon_line(cid, &format!("Logged out by {reason}."));
            format!("ClientID={cid} with key={ident} logged out by {reason}")
        };

        let client = &mut self.clients[cid];
        client.authed = AuthLevel::None;
        client.auth_key = None;
        self.deferred.push_back(Deferred::AuthChanged {
            cid,
            level: AuthLevel::None,
        });
        self.print(&line);
    }

    /// Logs out every client that used key `slot`.
    pub fn logout_key(&mut self, slot: usize, reason: &str) {
        for cid in 0..self.clients.len() {
            if self.clients[cid].auth_key == Some(slot) {
                self.logout_client(cid, reason);
            }
        }
    }

    /// Removes a key, logging out its sessions and re-pointing sessions of the
    /// key that moved into its slot.
    pub(crate) fn remove_auth_key(&mut self, slot: usize) {
        self.logout_key(slot, "key removal");
        let Some(moved) = self.auth.remove_key(slot) else {
            return;
        };
        if moved != slot {
            for client in &mut self.clients {
                if client.auth_key == Some(moved) {
                    client.auth_key = Some(slot);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------

    /// Switches to another map on the next loop iteration.
    pub fn change_map(&mut self, name: &str) {
        self.config.map = name.to_owned();
        self.map_reload = self.config.map != self.map.name;
    }

    /// Reloads the current map on the next loop iteration.
    pub fn reload_map(&mut self) {
        self.map_reload = true;
    }

    /// Stops the server after the current iteration.
    ///
    /// `reason` is shown to every client; `None` uses "Server shutdown".
    pub fn shutdown(&mut self, reason: Option<&str>) {
        self.running = false;
        if let Some(reason) = reason {
            self.shutdown_reason = Some(reason.to_owned());
        }
    }

    /// Sets the demo recorder for the server-wide demo.
    pub fn set_demo_recorder(&mut self, recorder: Option<Box<dyn DemoRecorder>>) {
        self.demo = recorder;
    }

    // ------------------------------------------------------------------
    // Server info
    // ------------------------------------------------------------------

    /// Current server info as advertised to browsers.
    #[must_use]
    pub fn server_info(&self, is_player: impl Fn(usize) -> bool) -> ServerInfo {
        let file = &self.map.legacy;
        ServerInfo {
            version: self.game_version.clone(),
            name: self.config.name.clone(),
            game_type: self.game_type.clone(),
            map_name: self.map.name.clone(),
            map_crc: file.wire_crc(),
            map_size: file.wire_size(),
            map_sha256: file.sha256_hex(),
            passworded: !self.config.password.is_empty(),
            max_clients: self.clients.len(),
            reserved_slots: self.config.reserved_slots,
            clients: self
                .clients
                .iter()
                .enumerate()
                .filter(|(_, c)| c.state != ClientState::Empty)
                .map(|(cid, c)| BrowserClient {
                    name: c.name.clone(),
                    clan: c.clan.clone(),
                    country: c.country,
                    score: c.score,
                    is_player: is_player(cid),
                })
                .collect(),
        }
    }
}

/// Longest prefix of `s` of at most `max` bytes ending on a char boundary.
pub(crate) fn truncate_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Splits a log line into its forms with the address shown and hidden.
pub(crate) fn split_addr_markers(line: &str) -> (String, String) {
    let Some(start) = line.find("<{") else {
        return (line.to_owned(), line.to_owned());
    };
    let Some(len) = line[start + 2..].find("}>") else {
        return (line.to_owned(), line.to_owned());
    };
    let end = start + 2 + len;
    let (head, addr, tail) = (&line[..start], &line[start + 2..end], &line[end + 2..]);
    (format!("{head}{addr}{tail}"), format!("{head}XXX{tail}"))
}

/// Address of `addr` inside log markers.
pub(crate) fn addr_marker(addr: Option<SocketAddr>) -> String {
    addr.map_or_else(|| "<{}>".to_owned(), |a| format!("<{{{a}}}>"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_addr_markers() {
        let (shown, hidden) = split_addr_markers("client dropped. cid=1 addr=<{1.2.3.4:5}> reason=''");
        assert_eq!(shown, "client dropped. cid=1 addr=1.2.3.4:5 reason=''");
        assert_eq!(hidden, "client dropped. cid=1 addr=XXX reason=''");

        let (shown, hidden) = split_addr_markers("no address <{ here");
        assert_eq!(shown, hidden);
    }

    #[test]
    fn test_truncate_str_keeps_chars_whole() {
        assert_eq!(truncate_str("abcdef", 4), "abcd");
        assert_eq!(truncate_str("aé", 2), "a");
        assert_eq!(truncate_str("ab", 15), "ab");
    }

    #[test]
    fn test_addr_marker() {
        let addr: SocketAddr = "10.0.0.1:8303".parse().unwrap();
        assert_eq!(addr_marker(Some(addr)), "<{10.0.0.1:8303}>");
        assert_eq!(addr_marker(None), "<{}>");
    }
}
