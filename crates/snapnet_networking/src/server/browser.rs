//! # Server Browser Responder
//!
//! Connectionless server-info replies and the registration payload.
//!
//! ## Variants
//!
//! ```text
//! request    reply      players per packet
//! gie3       inf3       first 16 (vanilla)
//! gie3+tok   iext/iex+  as many as fit NET_MAX_PAYLOAD, overflow retried
//! fstd       dtsf       24, each packet carries its offset
//! (push)     inf3       in-game refresh without players
//! ```
//!
//! Numbers in the legacy formats are decimal strings.

use crate::protocol::{MsgPacker, Packer};
use crate::{MAX_CLAN_LENGTH, MAX_CLIENTS, MAX_NAME_LENGTH, NET_MAX_PAYLOAD, SERVER_TICK_SPEED, VANILLA_MAX_CLIENTS};
use serde::Serialize;

/// Connectionless header shared by all browser packets.
const CONNLESS: [u8; 4] = [0xff; 4];

/// Vanilla and extended info request.
pub const SERVERBROWSE_GETINFO: [u8; 8] = concat_sig(*b"gie3");
/// Vanilla info reply.
pub const SERVERBROWSE_INFO: [u8; 8] = concat_sig(*b"inf3");
/// 64-slot legacy info request.
pub const SERVERBROWSE_GETINFO_64_LEGACY: [u8; 8] = concat_sig(*b"fstd");
/// 64-slot legacy info reply.
pub const SERVERBROWSE_INFO_64_LEGACY: [u8; 8] = concat_sig(*b"dtsf");
/// First extended info reply.
pub const SERVERBROWSE_INFO_EXTENDED: [u8; 8] = concat_sig(*b"iext");
/// Follow-up extended info reply.
pub const SERVERBROWSE_INFO_EXTENDED_MORE: [u8; 8] = concat_sig(*b"iex+");

/// Server requires a password.
pub const SERVER_FLAG_PASSWORD: i32 = 1;

/// Version announced to sixup clients.
const SIXUP_GAME_VERSION: &str = "0.7.5";

/// Players per 64-slot legacy packet.
const LEGACY_64_PLAYERS_PER_PACKET: usize = 24;

/// Room left for the transport header and the largest token.
const EXTENDED_RESERVE: usize = 18;

const fn concat_sig(tag: [u8; 4]) -> [u8; 8] {
    [CONNLESS[0], CONNLESS[1], CONNLESS[2], CONNLESS[3], tag[0], tag[1], tag[2], tag[3]]
}

/// Server-info packet variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InfoKind {
    /// Vanilla browsers, at most 16 slots.
    Vanilla,
    /// 64-slot legacy browsers.
    Legacy64,
    /// Extended browsers.
    Extended,
    /// Refresh pushed to connected legacy clients.
    InGame,
}

/// A parsed info request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InfoRequest {
    /// Reply variant.
    pub kind: InfoKind,
    /// Token echoed in the reply.
    pub token: i32,
}

/// Parses a connectionless datagram as an info request.
///
/// A `gie3` request carrying two extra token bytes asks for the extended
/// variant.
#[must_use]
pub fn parse_request(data: &[u8]) -> Option<InfoRequest> {
    let token = i32::from(*data.get(SERVERBROWSE_GETINFO.len())?);
    if data.starts_with(&SERVERBROWSE_GETINFO) {
        let extra = data.get(SERVERBROWSE_GETINFO.len() + 1..SERVERBROWSE_GETINFO.len() + 3);
        return Some(match extra {
            Some(&[hi, lo]) => InfoRequest {
                kind: InfoKind::Extended,
                token: token | ((i32::from(hi) << 8 | i32::from(lo)) << 8),
            },
            _ => InfoRequest { kind: InfoKind::Vanilla, token },
        });
    }
    if data.starts_with(&SERVERBROWSE_GETINFO_64_LEGACY) {
        return Some(InfoRequest { kind: InfoKind::Legacy64, token });
    }
    None
}

/// One client as the browser sees it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BrowserClient {
    /// Name.
    pub name: String,
    /// Clan.
    pub clan: String,
    /// Country code.
    pub country: i32,
    /// Score.
    pub score: i32,
    /// Playing rather than spectating.
    pub is_player: bool,
}

/// Everything a server-info reply describes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerInfo {
    /// Game version string.
    pub version: String,
    /// Server name.
    pub name: String,
    /// Game type.
    pub game_type: String,
    /// Map name.
    pub map_name: String,
    /// Map CRC as sent on the wire.
    pub map_crc: i32,
    /// Map size in bytes.
    pub map_size: i32,
    /// Map SHA-256, lowercase hex.
    pub map_sha256: String,
    /// A join password is set.
    pub passworded: bool,
    /// Slots of the transport.
    pub max_clients: usize,
    /// Slots kept for the reserved-slot password.
    pub reserved_slots: usize,
    /// Every non-empty slot, in slot order.
    pub clients: Vec<BrowserClient>,
}

impl ServerInfo {
    fn counts(&self) -> (usize, usize) {
        let players = self.clients.iter().filter(|c| c.is_player).count();
        (players, self.clients.len())
    }

    fn flags(&self) -> i32 {
        if self.passworded {
            SERVER_FLAG_PASSWORD
        } else {
            0
        }
    }
}

fn add_num(packer: &mut Packer, value: impl ToString) {
    packer.add_string(&value.to_string(), 0);
}

fn add_client(packer: &mut Packer, client: &BrowserClient, extended: bool) {
    packer.add_string(&client.name, MAX_NAME_LENGTH);
    packer.add_string(&client.clan, MAX_CLAN_LENGTH);
    add_num(packer, client.country);
    add_num(packer, client.score);
    add_num(packer, i32::from(client.is_player));
    if extended {
        // extra info, reserved
        packer.add_string("", 0);
    }
}

fn header(info: &ServerInfo, token: i32, kind: InfoKind) -> Packer {
    let (mut players, mut clients) = info.counts();
    let mut p = Packer::new();

    p.add_raw(match kind {
        InfoKind::Extended => &SERVERBROWSE_INFO_EXTENDED,
        InfoKind::Legacy64 => &SERVERBROWSE_INFO_64_LEGACY,
        InfoKind::Vanilla | InfoKind::InGame => &SERVERBROWSE_INFO,
    });
    add_num(&mut p, token);
    p.add_string(&info.version, 32);

    if kind != InfoKind::Vanilla {
        p.add_string(&info.name, 256);
    } else if info.max_clients <= VANILLA_MAX_CLIENTS {
        p.add_string(&info.name, 64);
    } else {
        let max = clients.max(info.max_clients.saturating_sub(info.reserved_slots));
        p.add_string(&format!("{} [{clients}/{max}]", info.name), 64);
    }
    p.add_string(&info.map_name, 32);

    if kind == InfoKind::Extended {
        add_num(&mut p, info.map_crc);
        add_num(&mut p, info.map_size);
    }

    p.add_string(&info.game_type, 16);
    add_num(&mut p, info.flags());

    let mut protocol_max = MAX_CLIENTS;
    if matches!(kind, InfoKind::Vanilla | InfoKind::InGame) {
        if clients >= VANILLA_MAX_CLIENTS {
            clients = if clients < info.max_clients {
                VANILLA_MAX_CLIENTS - 1
            } else {
                VANILLA_MAX_CLIENTS
            };
        }
        protocol_max = VANILLA_MAX_CLIENTS;
        players = players.min(clients);
    }

    add_num(&mut p, players);
    add_num(&mut p, protocol_max.min(info.max_clients.max(players)));
    add_num(&mut p, clients);
    add_num(&mut p, protocol_max.min(info.max_clients.max(clients)));

    if kind == InfoKind::Extended {
        // extra info, reserved
        p.add_string("", 0);
    }
    p
}

fn more_header(token: i32, packet: usize) -> Packer {
    let mut p = Packer::new();
    p.add_raw(&SERVERBROWSE_INFO_EXTENDED_MORE);
    add_num(&mut p, token);
    add_num(&mut p, packet);
    // extra info, reserved
    p.add_string("", 0);
    p
}

/// Builds the reply datagrams for one request.
///
/// Without `send_clients` a single packet without players is produced.
#[must_use]
pub fn server_info_packets(info: &ServerInfo, token: i32, kind: InfoKind, send_clients: bool) -> Vec<Vec<u8>> {
    let prefix = header(info, token, kind);
    let mut packets = Vec::new();
    let mut q = prefix.clone();
    if kind == InfoKind::Legacy64 {
        // offset
        q.add_int(0);
    }
    if !send_clients {
        packets.push(q.as_slice().to_vec());
        return packets;
    }

    let mut remaining = match kind {
        InfoKind::Extended => None,
        InfoKind::Legacy64 => Some(LEGACY_64_PLAYERS_PER_PACKET),
        InfoKind::Vanilla | InfoKind::InGame => Some(VANILLA_MAX_CLIENTS),
    };
    let mut players_sent = 0;
    let mut fresh_len = q.len();
    let mut index = 0;

    while let Some(client) = info.clients.get(index) {
        if remaining == Some(0) {
            if kind != InfoKind::Legacy64 {
                break;
            }
            packets.push(q.as_slice().to_vec());
            q = prefix.clone();
            q.add_int(i32::try_from(players_sent).unwrap_or(i32::MAX));
            fresh_len = q.len();
            remaining = Some(LEGACY_64_PLAYERS_PER_PACKET);
        }
        if let Some(left) = remaining.as_mut() {
            *left -= 1;
        }

        let previous = q.len();
        add_client(&mut q, client, kind == InfoKind::Extended);

        if kind == InfoKind::Extended && q.len() >= NET_MAX_PAYLOAD - EXTENDED_RESERVE && previous > fresh_len {
            // Retry this player in the next packet
            q.truncate(previous);
            packets.push(q.as_slice().to_vec());
            q = more_header(token, packets.len());
            fresh_len = q.len();
            continue;
        }
        players_sent += 1;
        index += 1;
    }

    packets.push(q.as_slice().to_vec());
    packets
}

/// Server info pushed to sixup clients as a system message payload.
pub fn sixup_server_info(info: &ServerInfo, msg: &mut MsgPacker) {
    let (players, clients) = info.counts();
    let to_int = |n: usize| i32::try_from(n).unwrap_or(i32::MAX);
    msg.add_string(SIXUP_GAME_VERSION, 32)
        .add_string(&info.name, 64)
        // hostname
        .add_string("", 128)
        .add_string(&info.map_name, 32)
        .add_string(&info.game_type, 16)
        .add_int(info.flags())
        // skill level
        .add_int(1)
        .add_int(to_int(players))
        .add_int(to_int(info.max_clients.max(players)))
        .add_int(to_int(clients))
        .add_int(to_int(info.max_clients.max(clients)));
}

#[derive(Serialize)]
struct RegisterMap<'a> {
    name: &'a str,
    sha256: &'a str,
    size: i32,
}

#[derive(Serialize)]
struct RegisterInfo<'a> {
    max_clients: usize,
    max_players: usize,
    passworded: bool,
    game_type: &'a str,
    name: &'a str,
    map: RegisterMap<'a>,
    version: &'a str,
    client_score_kind: &'static str,
    requires_login: bool,
    clients: &'a [BrowserClient],
}

/// JSON document handed to the registration collaborator.
///
/// # Errors
///
/// Propagates serialization failures.
pub fn register_json(info: &ServerInfo) -> serde_json::Result<String> {
    let (players, clients) = info.counts();
    serde_json::to_string(&RegisterInfo {
        max_clients: info.max_clients.max(clients),
        max_players: info.max_clients.max(players),
        passworded: info.passworded,
        game_type: &info.game_type,
        name: &info.name,
        map: RegisterMap {
            name: &info.map_name,
            sha256: &info.map_sha256,
            size: info.map_size,
        },
        version: &info.version,
        client_score_kind: "points",
        requires_login: false,
        clients: &info.clients,
    })
}

/// Caps how many replies per second carry the player list.
#[derive(Clone, Copy, Debug, Default)]
pub struct InfoRateLimit {
    first_request: i32,
    num_requests: i32,
}

impl InfoRateLimit {
    /// Counts a request at `tick`; returns true if it may list players.
    ///
    /// `per_second` of 0 disables the limit.
    pub fn allow_clients(&mut self, tick: i32, per_second: i32) -> bool {
        if per_second == 0 {
            return true;
        }
        let send_clients = self.num_requests <= per_second;
        let window = i32::try_from(SERVER_TICK_SPEED).unwrap_or(i32::MAX);
        if tick <= self.first_request.saturating_add(window) {
            self.num_requests += 1;
        } else {
            self.num_requests = 1;
            self.first_request = tick;
        }
        send_clients
    }

    /// Restarts the window, e.g. after the tick counter was reset.
    pub fn reset(&mut self) {
        self.first_request = 0;
    }
}
