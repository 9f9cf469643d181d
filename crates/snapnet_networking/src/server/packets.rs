//! # Client Packet Processing
//!
//! The session state machine. Every system message is gated on the vital
//! flag where the protocol requires it and on the slot's current state.
//! Malformed payloads are dropped without a reply.

use super::auth::AuthLevel;
use super::browser::sixup_server_info;
use super::client::{ClientState, SnapRate};
use super::state::addr_marker;
use super::Server;
use crate::integration::GameLogic;
use crate::protocol::{sixup::native, unpack_message_id, MsgPacker, SystemMsg, UnpackOutcome, Unpacker};
use crate::transport::ChunkFlags;
use crate::{MAX_INPUT_SIZE, SIXUP_NETVERSION};
use std::time::Duration;
use uuid::Uuid;

/// Samples closer together than this do not update the traffic average.
const TRAFFIC_SAMPLE_MIN: Duration = Duration::from_micros(100);

/// Ban length for clients exceeding the traffic limit.
const NETLIMIT_BAN: Duration = Duration::from_secs(600);

impl<G: GameLogic> Server<G> {
    /// Dispatches one chunk received from `cid`.
    pub(super) fn process_client_packet(&mut self, cid: usize, data: &[u8], vital: bool) {
        let Some(protocol) = self
            .state
            .clients
            .get(cid)
            .filter(|c| c.state != ClientState::Empty)
            .map(|c| c.protocol)
        else {
            return;
        };

        let mut unpacker = Unpacker::new(data);
        let header = match unpack_message_id(&mut unpacker, protocol, &self.state.uuids) {
            UnpackOutcome::Error => return,
            UnpackOutcome::Answer(reply) => {
                self.state.send_msg(&reply, ChunkFlags::VITAL, Some(cid));
                return;
            }
            UnpackOutcome::Message(header) => header,
        };

        let map_request = header.system && header.id == SystemMsg::RequestMapData.id();
        if !map_request && !self.check_netlimit(cid, data.len()) {
            return;
        }

        if !header.system {
            if vital && self.state.client_state(cid) >= ClientState::Ready {
                self.game.on_message(&mut self.state, header.id, &mut unpacker, cid);
            }
            return;
        }

        let Some(msg) = SystemMsg::from_id(header.id) else {
            return;
        };
        match msg {
            SystemMsg::ClientVer => self.on_client_ver(cid, &mut unpacker, vital),
            SystemMsg::Info => self.on_info(cid, &mut unpacker, vital),
            SystemMsg::RequestMapData => self.on_request_map_data(cid, &mut unpacker, vital),
            SystemMsg::Ready => self.on_ready(cid, vital),
            SystemMsg::EnterGame => self.on_enter_game(cid, vital),
            SystemMsg::Input => self.on_input(cid, &mut unpacker),
            SystemMsg::RconCmd => {
                let Some(line) = unpacker.get_string() else {
                    return;
                };
                let client = &self.state.clients[cid];
                if vital && client.authed != AuthLevel::None && client.state >= ClientState::Ready {
                    self.state.execute_rcon(cid, line);
                }
            }
            SystemMsg::RconAuth => self.on_rcon_auth(cid, &mut unpacker, vital),
            SystemMsg::Ping => {
                let reply = MsgPacker::system(SystemMsg::PingReply);
                self.state.send_msg(&reply, ChunkFlags::NONE, Some(cid));
            }
            SystemMsg::PingEx => {
                let Some(id) = unpacker.get_raw(16) else {
                    return;
                };
                let mut reply = MsgPacker::system(SystemMsg::PongEx);
                reply.add_raw(id);
                self.state.send_msg(&reply, ChunkFlags::FLUSH, Some(cid));
            }
            other => tracing::debug!("unhandled system message {other:?} from cid={cid}"),
        }
    }

    /// Updates the traffic average of `cid`.
    ///
    /// Returns false if the client was banned for exceeding the limit.
    fn check_netlimit(&mut self, cid: usize, size: usize) -> bool {
        let limit = self.state.config.netlimit;
        if limit <= 0 {
            return true;
        }
        if self.state.clients[cid].traffic > f64::from(limit) * 1024.0 {
            self.state.ban(cid, Some(NETLIMIT_BAN), "Stressing network");
            return false;
        }

        let now = self.state.clock.now();
        let alpha = f64::from(self.state.config.netlimit_alpha) / 100.0;
        let client = &mut self.state.clients[cid];
        match client.traffic_since {
            Some(since) => {
                let elapsed = now.saturating_duration_since(since);
                if elapsed > TRAFFIC_SAMPLE_MIN {
                    let bytes = f64::from(u32::try_from(size).unwrap_or(u32::MAX));
                    client.traffic = alpha * (bytes / elapsed.as_secs_f64()) + (1.0 - alpha) * client.traffic;
                    client.traffic_since = Some(now);
                }
            }
            None => client.traffic_since = Some(now),
        }
        true
    }

    fn on_client_ver(&mut self, cid: usize, unpacker: &mut Unpacker<'_>, vital: bool) {
        if !vital || self.state.client_state(cid) != ClientState::PreAuth {
            return;
        }
        let (Some(connection_id), Some(version), Some(version_str)) =
            (unpacker.get_raw(16), unpacker.get_int(), unpacker.get_sanitized_string())
        else {
            return;
        };
        if version < 0 {
            return;
        }

        let client = &mut self.state.clients[cid];
        client.connection_id = Uuid::from_slice(connection_id).ok();
        client.ddnet_version = version;
        client.ddnet_version_str = version_str;
        client.state = ClientState::Auth;
    }

    fn on_info(&mut self, cid: usize, unpacker: &mut Unpacker<'_>, vital: bool) {
        let state = self.state.client_state(cid);
        if !vital || !matches!(state, ClientState::PreAuth | ClientState::Auth) {
            return;
        }
        let Some(version) = unpacker.get_string() else {
            return;
        };
        let sixup_version = self.state.is_sixup(cid) && version == SIXUP_NETVERSION;
        if version != self.state.net_version && !sixup_version {
            let reason = format!(
                "Wrong version. Server is running '{}' and client '{version}'",
                self.state.net_version
            );
            self.state.drop_client(cid, &reason);
            return;
        }

        let password = unpacker.get_string().unwrap_or("");
        let config = &self.state.config;
        let wrong_password = !config.password.is_empty() && password != config.password;
        let reserved = cid >= self.state.clients.len().saturating_sub(config.reserved_slots);
        let wrong_reserved =
            reserved && !config.reserved_slots_pass.is_empty() && password != config.reserved_slots_pass;
        if wrong_password {
            self.state.drop_client(cid, "Wrong password");
            return;
        }
        if wrong_reserved {
            self.state.drop_client(cid, "This server is full");
            return;
        }

        self.state.clients[cid].state = ClientState::Connecting;
        let named_keys = self.state.auth.num_non_default_keys() > 0;
        self.state.send_rcon_type(Some(cid), named_keys);
        self.state.send_capabilities(cid);
        self.state.send_map(cid);
    }

    fn on_request_map_data(&mut self, cid: usize, unpacker: &mut Unpacker<'_>, vital: bool) {
        if !vital || self.state.client_state(cid) < ClientState::Connecting {
            return;
        }
        let window = self.state.config.map_window;

        if self.state.is_sixup(cid) {
            for _ in 0..window {
                let chunk = self.state.clients[cid].next_map_chunk;
                self.state.clients[cid].next_map_chunk += 1;
                self.state.send_map_data(cid, chunk);
            }
            return;
        }

        let Some(chunk) = unpacker.get_int() else {
            return;
        };
        let next = self.state.clients[cid].next_map_chunk;
        if chunk != next || !self.state.config.fast_download {
            self.state.send_map_data(cid, chunk);
            return;
        }
        if chunk == 0 {
            for i in 0..window {
                self.state.send_map_data(cid, i);
            }
        }
        self.state.send_map_data(cid, window + next);
        self.state.clients[cid].next_map_chunk += 1;
    }

    fn on_ready(&mut self, cid: usize, vital: bool) {
        if !vital || self.state.client_state(cid) != ClientState::Connecting {
            return;
        }
        let addr = addr_marker(self.state.clients[cid].addr);
        self.state
            .print(&format!("player is ready. ClientID={cid} addr={addr} secure=yes"));

        let client = &mut self.state.clients[cid];
        let persistent = if client.has_persistent_data {
            client.has_persistent_data = false;
            Some(std::mem::take(&mut client.persistent_data))
        } else {
            None
        };
        client.state = ClientState::Ready;

        self.game.on_client_connected(&mut self.state, cid, persistent.as_deref());
        if let Some(data) = persistent {
            self.state.clients[cid].persistent_data = data;
        }
        self.state.send_connection_ready(cid);
    }

    fn on_enter_game(&mut self, cid: usize, vital: bool) {
        if !vital
            || self.state.client_state(cid) != ClientState::Ready
            || !self.game.is_client_ready_to_enter(&self.state, cid)
        {
            return;
        }
        let addr = addr_marker(self.state.clients[cid].addr);
        let sixup = self.state.is_sixup(cid);
        self.state.print(&format!(
            "player has entered the game. ClientID={cid} addr={addr} sixup={}",
            i32::from(sixup)
        ));
        self.state.clients[cid].state = ClientState::InGame;

        if sixup {
            let info = self.server_info();
            let mut msg = MsgPacker::untranslated(native::SERVERINFO, true);
            sixup_server_info(&info, &mut msg);
            self.state.send_msg(&msg, ChunkFlags::VITAL | ChunkFlags::FLUSH, Some(cid));
        }
        self.game.on_client_enter(&mut self.state, cid);
        self.state.expire_server_info();
    }

    fn on_input(&mut self, cid: usize, unpacker: &mut Unpacker<'_>) {
        let (Some(last_acked), Some(intended), Some(size)) =
            (unpacker.get_int(), unpacker.get_int(), unpacker.get_int())
        else {
            return;
        };
        let Ok(size) = usize::try_from(size) else {
            return;
        };
        if size / 4 > MAX_INPUT_SIZE {
            return;
        }

        let now = self.state.clock.now();
        let tick = self.state.tick();
        let client = &mut self.state.clients[cid];
        client.last_acked_snapshot = last_acked;
        if last_acked > 0 {
            client.snap_rate = SnapRate::Full;
        }
        if let Some(entry) = client.snapshots.get(last_acked) {
            let ms = now.saturating_duration_since(entry.tag_time).as_millis();
            client.latency = i32::try_from(ms).unwrap_or(i32::MAX);
        }

        if intended > client.last_input_tick {
            let time_left = self.state.ticks.ms_until(intended, now);
            let mut msg = MsgPacker::system(SystemMsg::InputTiming);
            msg.add_int(intended).add_int(time_left);
            self.state.send_msg(&msg, ChunkFlags::NONE, Some(cid));
        }

        let words: Vec<i32> = (0..size / 4).map(|_| unpacker.get_int().unwrap_or(0)).collect();
        let game_tick = if intended <= tick { tick + 1 } else { intended };
        let client = &mut self.state.clients[cid];
        client.last_input_tick = intended;
        client.push_input(game_tick, &words);

        if client.state == ClientState::InGame {
            self.game.on_client_direct_input(&mut self.state, cid, &words);
        }
    }

    fn on_rcon_auth(&mut self, cid: usize, unpacker: &mut Unpacker<'_>, vital: bool) {
        if !vital {
            return;
        }
        let sixup = self.state.is_sixup(cid);
        let ident = if sixup {
            None
        } else {
            let Some(ident) = unpacker.get_string() else {
                return;
            };
            Some(ident)
        };
        let Some(password) = unpacker.get_string() else {
            return;
        };
        let send_cmds = sixup || unpacker.get_int().is_some_and(|v| v != 0);
        self.state.rcon_auth(cid, ident, password, send_cmds);
    }
}
