//! # Lobby Game
//!
//! A minimal [`GameLogic`]: players walk left and right, chat is echoed to
//! everyone and the score counts seconds spent in game. It is what the
//! `snapnet_server` binary runs and what the integration tests drive.

use super::traits::GameLogic;
use crate::protocol::{MsgPacker, Unpacker};
use crate::server::ServerState;
use crate::snapshot::{ItemSizes, SnapshotBuilder};
use crate::transport::ChunkFlags;
use crate::{GAME_NETVERSION, MAX_CLIENTS, SERVER_TICK_SPEED};

/// Chat message from a client: team, text.
pub const MSG_CL_SAY: i32 = 17;
/// Player info from a client: name, clan, country.
pub const MSG_CL_STARTINFO: i32 = 20;
/// Chat line from the server: team, sender, text.
pub const MSG_SV_CHAT: i32 = 3;

/// Per-player item: client ID, score, latency.
pub const ITEM_PLAYER_INFO: i32 = 1;
/// Per-player item: position.
pub const ITEM_CHARACTER: i32 = 2;

const PLAYER_INFO_WORDS: usize = 3;
const CHARACTER_WORDS: usize = 2;
const WALK_SPEED: i32 = 4;
const WORLD_WIDTH: i32 = 4096;
const MAX_CHAT_LENGTH: usize = 256;

#[derive(Clone, Copy, Debug, Default)]
struct Player {
    entity: i32,
    x: i32,
    ticks_in_game: i32,
    direction: i32,
}

/// The lobby world.
#[derive(Debug)]
pub struct LobbyGame {
    players: [Option<Player>; MAX_CLIENTS],
    kept_scores: [Option<i32>; MAX_CLIENTS],
}

impl Default for LobbyGame {
    fn default() -> Self {
        Self::new()
    }
}

impl LobbyGame {
    /// Creates an empty lobby.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            players: [None; MAX_CLIENTS],
            kept_scores: [None; MAX_CLIENTS],
        }
    }

    /// Horizontal position of a player's character.
    #[must_use]
    pub fn position(&self, cid: usize) -> Option<i32> {
        self.players.get(cid).copied().flatten().map(|p| p.x)
    }

    /// Number of players in game.
    #[must_use]
    pub fn num_players(&self) -> usize {
        self.players.iter().flatten().count()
    }

    fn score(player: &Player) -> i32 {
        player.ticks_in_game / i32::try_from(SERVER_TICK_SPEED).unwrap_or(50)
    }
}

impl GameLogic for LobbyGame {
    fn net_version(&self) -> &str {
        GAME_NETVERSION
    }

    fn version(&self) -> &str {
        "0.6.4, 18.0"
    }

    fn game_type(&self) -> &str {
        "lobby"
    }

    fn item_sizes(&self) -> ItemSizes {
        let mut sizes = ItemSizes::new();
        sizes.set(ITEM_PLAYER_INFO, PLAYER_INFO_WORDS);
        sizes.set(ITEM_CHARACTER, CHARACTER_WORDS);
        sizes
    }

    fn persistent_client_data_size(&self) -> usize {
        4
    }

    fn on_init(&mut self, server: &mut ServerState) {
        self.players = [None; MAX_CLIENTS];
        tracing::debug!("lobby ready on map '{}'", server.map_name());
    }

    fn on_shutdown(&mut self, server: &mut ServerState, _final_shutdown: bool) {
        for player in self.players.iter_mut().filter_map(Option::take) {
            server.snap_free_id(player.entity);
        }
    }

    fn on_tick(&mut self, server: &mut ServerState) {
        for (cid, slot) in self.players.iter_mut().enumerate() {
            let Some(player) = slot else { continue };
            player.x = (player.x + player.direction.signum() * WALK_SPEED).clamp(0, WORLD_WIDTH);
            player.ticks_in_game += 1;
            let score = Self::score(player);
            server.set_client_score(cid, score);
        }
    }

    fn on_snap(&mut self, server: &ServerState, builder: &mut SnapshotBuilder, cid: Option<usize>) {
        for (owner, player) in self.players.iter().enumerate() {
            let Some(player) = player else { continue };
            let owner_id = i32::try_from(owner).unwrap_or(0);

            if let Ok(info) = builder.new_item(ITEM_PLAYER_INFO, owner_id, PLAYER_INFO_WORDS) {
                info[0] = i32::from(cid == Some(owner));
                info[1] = Self::score(player);
                info[2] = server.client(owner).map_or(0, |c| c.latency);
            }
            match builder.new_item(ITEM_CHARACTER, player.entity, CHARACTER_WORDS) {
                Ok(character) => {
                    character[0] = player.x;
                    character[1] = owner_id;
                }
                Err(err) => tracing::warn!("character of cid={owner} not snapped: {err}"),
            }
        }
    }

    fn on_message(&mut self, server: &mut ServerState, id: i32, payload: &mut Unpacker<'_>, cid: usize) {
        match id {
            MSG_CL_SAY => {
                let (Some(team), Some(text)) = (payload.get_int(), payload.get_sanitized_string()) else {
                    return;
                };
                let text = text.trim();
                if text.is_empty() {
                    return;
                }
                tracing::info!("chat: {cid}:{team}:{}: {text}", server.client(cid).map_or("", |c| c.name.as_str()));
                let mut msg = MsgPacker::new(MSG_SV_CHAT, false);
                msg.add_int(team)
                    .add_int(i32::try_from(cid).unwrap_or(-1))
                    .add_string(text, MAX_CHAT_LENGTH);
                server.send_msg(&msg, ChunkFlags::VITAL, None);
            }
            MSG_CL_STARTINFO => {
                let (Some(name), Some(clan), Some(country)) = (
                    payload.get_sanitized_string(),
                    payload.get_sanitized_string(),
                    payload.get_int(),
                ) else {
                    return;
                };
                server.set_client_name(cid, &name);
                server.set_client_clan(cid, &clan);
                server.set_client_country(cid, country);
            }
            _ => {}
        }
    }

    fn on_client_connected(&mut self, _server: &mut ServerState, cid: usize, persistent: Option<&[u8]>) {
        let kept = persistent
            .and_then(|data| data.get(..4))
            .and_then(|bytes| bytes.try_into().ok())
            .map(i32::from_le_bytes);
        if let Some(slot) = self.kept_scores.get_mut(cid) {
            *slot = kept;
        }
    }

    fn on_client_enter(&mut self, server: &mut ServerState, cid: usize) {
        if cid >= MAX_CLIENTS {
            return;
        }
        let seconds = self.kept_scores[cid].take().unwrap_or(0);
        let entity = server.snap_new_id();
        self.players[cid] = Some(Player {
            entity,
            x: WORLD_WIDTH / 2,
            ticks_in_game: seconds.saturating_mul(i32::try_from(SERVER_TICK_SPEED).unwrap_or(50)),
            direction: 0,
        });
        tracing::info!("cid={cid} joined the lobby");
    }

    fn on_client_drop(&mut self, server: &mut ServerState, cid: usize, reason: &str) {
        if let Some(player) = self.players.get_mut(cid).and_then(Option::take) {
            server.snap_free_id(player.entity);
            tracing::info!("cid={cid} left the lobby ({reason})");
        }
        if let Some(kept) = self.kept_scores.get_mut(cid) {
            *kept = None;
        }
    }

    fn on_client_direct_input(&mut self, _server: &mut ServerState, cid: usize, input: &[i32]) {
        if let (Some(Some(player)), Some(&direction)) = (self.players.get_mut(cid), input.first()) {
            player.direction = direction;
        }
    }

    fn is_client_player(&self, cid: usize) -> bool {
        self.players.get(cid).is_some_and(Option::is_some)
    }

    fn on_client_data_persist(&mut self, cid: usize, data: &mut [u8]) -> bool {
        let Some(Some(player)) = self.players.get(cid) else {
            return false;
        };
        let Some(out) = data.get_mut(..4) else {
            return false;
        };
        out.copy_from_slice(&Self::score(player).to_le_bytes());
        true
    }
}
