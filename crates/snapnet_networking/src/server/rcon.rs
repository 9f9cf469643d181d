//! # Remote Console Sessions
//!
//! Login, logout and the streaming of the command list to logged-in clients.
//! The list goes out a few commands per tick, one client per tick in turn,
//! so a login never produces a burst.

use super::auth::AuthLevel;
use super::client::ClientState;
use super::console::{CommandInfo, COMMANDS};
use super::state::{Deferred, ServerState};
use crate::protocol::{sixup::native, MsgPacker, SystemMsg};
use crate::transport::ChunkFlags;
use crate::{MAX_CLIENTS, MAX_RCONCMD_SEND};
use std::time::Duration;

const MAX_CMD_NAME: usize = 32;
const MAX_CMD_HELP: usize = 96;
const MAX_CMD_PARAMS: usize = 16;

const TOO_MANY_TRIES: &str = "Too many remote console authentication tries";

impl ServerState {
    /// Handles a login attempt from `cid`.
    ///
    /// Without an identifier the password is tried against the default admin,
    /// moderator and helper keys in that order.
    pub(crate) fn rcon_auth(&mut self, cid: usize, ident: Option<&str>, password: &str, send_cmds: bool) {
        let key = match ident.filter(|i| !i.is_empty()) {
            None => [AuthLevel::Admin, AuthLevel::Mod, AuthLevel::Helper]
                .into_iter()
                .filter_map(|level| self.auth.default_key(level))
                .find(|&slot| self.auth.check_key(slot, password)),
            Some(ident) => self
                .auth
                .find_key(ident)
                .filter(|&slot| self.auth.check_key(slot, password)),
        };

        match key {
            Some(slot) => self.rcon_login(cid, slot, send_cmds),
            None => self.rcon_login_failed(cid),
        }
    }

    fn rcon_login(&mut self, cid: usize, slot: usize, send_cmds: bool) {
        let level = self.auth.key_level(slot);
        if self.clients[cid].authed == level {
            return;
        }

        let sixup = self.is_sixup(cid);
        if sixup {
            let msg = MsgPacker::untranslated(native::RCON_AUTH_ON, true);
            self.send_msg(&msg, ChunkFlags::VITAL, Some(cid));
        } else {
            let mut msg = MsgPacker::system(SystemMsg::RconAuthStatus);
            msg.add_int(1).add_int(1);
            self.send_msg(&msg, ChunkFlags::VITAL, Some(cid));
        }

        let client = &mut self.clients[cid];
        client.authed = level;
        client.auth_key = Some(slot);
        client.auth_tries = 0;
        client.rcon_cmd_cursor = (sixup || send_cmds).then_some(0);

        let greeting = match level {
            AuthLevel::Admin => "Admin authentication successful. Full remote console access granted.",
            AuthLevel::Mod => "Moderator authentication successful. Limited remote console access granted.",
            _ => "Helper authentication successful. Limited remote console access granted.",
        };
        self.send_rcon_line(cid, greeting);

        let ident = self.auth.key_ident(slot).unwrap_or("").to_owned();
        self.print(&format!("ClientID={cid} authed with key={ident} ({})", level.name()));
        self.deferred.push_back(Deferred::AuthChanged { cid, level });
    }

    fn rcon_login_failed(&mut self, cid: usize) {
        let max_tries = self.config.rcon.max_tries;
        if max_tries <= 0 {
            self.send_rcon_line(cid, "Wrong password.");
            return;
        }

        self.clients[cid].auth_tries += 1;
        let tries = self.clients[cid].auth_tries;
        self.send_rcon_line(cid, &format!("Wrong password {tries}/{max_tries}."));
        if tries < max_tries {
            return;
        }

        let bantime = self.config.rcon.bantime;
        if bantime <= 0 {
            self.drop_client(cid, TOO_MANY_TRIES);
        } else {
            let duration = Duration::from_secs(u64::from(bantime.unsigned_abs()) * 60);
            self.ban(cid, Some(duration), TOO_MANY_TRIES);
        }
    }

    /// Runs a console line on behalf of a logged-in client.
    pub(crate) fn execute_rcon(&mut self, cid: usize, line: &str) {
        let level = self.clients[cid].authed;
        self.print(&format!("ClientID={cid} rcon='{line}'"));

        self.rcon_cid = Some(cid);
        self.rcon_auth_level = level;
        self.execute_line(line);
        self.rcon_cid = None;
        self.rcon_auth_level = self.config.rcon.auth_level;
    }

    /// Runs a line typed on the server's own console, with full access.
    pub fn execute_console_line(&mut self, line: &str) {
        self.rcon_cid = None;
        self.rcon_auth_level = AuthLevel::Admin;
        self.execute_line(line);
        self.rcon_auth_level = self.config.rcon.auth_level;
    }

    fn send_rcon_cmd_add(&mut self, cid: usize, command: &CommandInfo) {
        let mut msg = MsgPacker::system(SystemMsg::RconCmdAdd);
        msg.add_string(command.name, MAX_CMD_NAME)
            .add_string(command.help, MAX_CMD_HELP)
            .add_string(command.params, MAX_CMD_PARAMS);
        self.send_msg(&msg, ChunkFlags::VITAL, Some(cid));
    }

    /// Announces the next batch of commands to the client whose turn it is.
    pub(crate) fn update_rcon_commands(&mut self) {
        let cid = usize::try_from(self.tick()).unwrap_or(0) % MAX_CLIENTS;
        let Some(client) = self.clients.get(cid) else {
            return;
        };
        if client.state == ClientState::Empty || client.authed == AuthLevel::None {
            return;
        }
        let Some(mut cursor) = client.rcon_cmd_cursor else {
            return;
        };
        let level = client.authed;

        let mut sent = 0;
        while sent < MAX_RCONCMD_SEND && cursor < COMMANDS.len() {
            let command = &COMMANDS[cursor];
            cursor += 1;
            if command.level <= level {
                self.send_rcon_cmd_add(cid, command);
                sent += 1;
            }
        }
        self.clients[cid].rcon_cmd_cursor = (cursor < COMMANDS.len()).then_some(cursor);
    }
}
