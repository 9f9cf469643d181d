//! # Console Commands
//!
//! Built-in commands available to the server console and to logged-in
//! remote console clients. Each command has a minimum [`AuthLevel`]; output
//! goes through [`ServerState::print`].

use super::auth::AuthLevel;
use super::client::ClientState;
use super::state::{addr_marker, ServerState};
use crate::error::AuthError;
use std::net::IpAddr;
use std::time::Duration;

/// A console command as announced to remote console clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CommandInfo {
    pub(crate) name: &'static str,
    pub(crate) params: &'static str,
    pub(crate) help: &'static str,
    pub(crate) level: AuthLevel,
}

const fn command(name: &'static str, params: &'static str, help: &'static str, level: AuthLevel) -> CommandInfo {
    CommandInfo {
        name,
        params,
        help,
        level,
    }
}

/// Every built-in command, in announcement order.
pub(crate) const COMMANDS: &[CommandInfo] = &[
    command("status", "?r[name]", "List players containing name or all players", AuthLevel::Helper),
    command("logout", "", "Logout of rcon", AuthLevel::Helper),
    command("show_ips", "?i[show]", "Show IP addresses in rcon commands (1 = on, 0 = off)", AuthLevel::Helper),
    command("kick", "v[id] ?r[reason]", "Kick player with specified id for any reason", AuthLevel::Mod),
    command("ban", "s[ip|id] ?i[minutes] r[reason]", "Ban player with ip/client id for x minutes for any reason", AuthLevel::Mod),
    command("unban", "s[ip]", "Unban ip", AuthLevel::Mod),
    command("bans", "", "Show banlist", AuthLevel::Mod),
    command("change_map", "?r[map]", "Change map", AuthLevel::Admin),
    command("reload", "", "Reload the map", AuthLevel::Admin),
    command("shutdown", "?r[reason]", "Shut down", AuthLevel::Admin),
    command("auth_add", "s[ident] s[level] r[pw]", "Add a rcon key", AuthLevel::Admin),
    command("auth_update", "s[ident] s[level] r[pw]", "Update a rcon key", AuthLevel::Admin),
    command("auth_remove", "s[ident]", "Remove a rcon key", AuthLevel::Admin),
    command("auth_list", "", "List all rcon keys", AuthLevel::Admin),
];

const LEVEL_HINT: &str = "level can be one of {\"admin\", \"mod(erator)\", \"helper\"}";
const DEFAULT_BAN_MINUTES: i64 = 30;
const MAX_BAN_MINUTES: i64 = 525_600;

/// Splits a console line into arguments. Double quotes group words and `\`
/// escapes the next character inside quotes.
pub(crate) fn tokenize(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else { break };

        let mut arg = String::new();
        if first == '"' {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '"' => break,
                    '\\' => arg.extend(chars.next()),
                    _ => arg.push(c),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                arg.push(c);
            }
        }
        args.push(arg);
    }
    args
}

fn level_title(level: AuthLevel) -> &'static str {
    match level {
        AuthLevel::Admin => "Admin",
        AuthLevel::Mod => "Mod",
        AuthLevel::Helper => "Helper",
        AuthLevel::None => "",
    }
}

fn rest(args: &[String], from: usize) -> Option<String> {
    let rest = args.get(from..)?.join(" ");
    (!rest.is_empty()).then_some(rest)
}

impl ServerState {
    /// Parses and runs one console line at the current console level.
    pub(crate) fn execute_line(&mut self, line: &str) {
        let tokens = tokenize(line);
        let Some((name, args)) = tokens.split_first() else {
            return;
        };
        let Some(info) = COMMANDS.iter().find(|c| c.name == name.as_str()) else {
            self.print(&format!("No such command: {name}."));
            return;
        };
        if info.level > self.rcon_auth_level {
            self.print(&format!("Access for command {name} denied."));
            return;
        }

        match info.name {
            "status" => self.con_status(args.first().map(String::as_str)),
            "logout" => {
                if let Some(cid) = self.rcon_cid {
                    self.logout_client(cid, "");
                }
            }
            "show_ips" => self.con_show_ips(args),
            "kick" => self.con_kick(args),
            "ban" => self.con_ban(args),
            "unban" => self.con_unban(args),
            "bans" => self.con_bans(),
            "change_map" => match rest(args, 0) {
                Some(map) => self.change_map(&map),
                None => {
                    let current = format!("Value: {}", self.config.map);
                    self.print(&current);
                }
            },
            "reload" => self.reload_map(),
            "shutdown" => {
                let reason = rest(args, 0);
                self.shutdown(reason.as_deref());
            }
            "auth_add" => self.con_auth_add(args),
            "auth_update" => self.con_auth_update(args),
            "auth_remove" => self.con_auth_remove(args),
            "auth_list" => self.con_auth_list(),
            _ => {}
        }
    }

    fn con_status(&mut self, filter: Option<&str>) {
        let filter = filter.map(str::to_lowercase);
        let mut lines = Vec::new();
        for (cid, client) in self.clients.iter().enumerate() {
            if client.state == ClientState::Empty {
                continue;
            }
            if let Some(filter) = &filter {
                if !client.name.to_lowercase().contains(filter.as_str()) {
                    continue;
                }
            }
            let addr = addr_marker(client.addr);
            if client.state != ClientState::InGame {
                lines.push(format!("id={cid} addr={addr} connecting"));
                continue;
            }

            let dnsbl = if self.config.dnsbl.enabled {
                format!(" dnsbl={}", client.dnsbl.name())
            } else {
                String::new()
            };
            let key = match (client.authed, client.auth_key.and_then(|k| self.auth.key_ident(k))) {
                (AuthLevel::None, _) | (_, None) => String::new(),
                (level, Some(ident)) => format!(" key={ident} ({})", level_title(level)),
            };
            let prefix = if client.is_sixup() { "0.7:" } else { "" };
            lines.push(format!(
                "id={cid} addr={addr} name='{}' client={prefix}{} secure=yes flags={}{dnsbl}{key}",
                client.name, client.ddnet_version, client.flags
            ));
        }
        for line in lines {
            self.print(&line);
        }
    }

    fn con_show_ips(&mut self, args: &[String]) {
        let Some(cid) = self.rcon_cid else {
            return;
        };
        match args.first() {
            Some(value) => self.clients[cid].show_ips = value.parse::<i32>().unwrap_or(0) != 0,
            None => {
                let value = i32::from(self.clients[cid].show_ips);
                self.print(&format!("Value: {value}"));
            }
        }
    }

    fn con_kick(&mut self, args: &[String]) {
        let Some(cid) = args.first().and_then(|a| a.parse::<usize>().ok()) else {
            self.print("invalid client id to kick");
            return;
        };
        let reason = rest(args, 1).map_or_else(|| "Kicked by console".to_owned(), |r| format!("Kicked ({r})"));
        self.kick(cid, &reason);
    }

    fn con_ban(&mut self, args: &[String]) {
        let Some(target) = args.first() else {
            return;
        };
        let minutes = args
            .get(1)
            .map_or(DEFAULT_BAN_MINUTES, |m| m.parse::<i64>().unwrap_or(0))
            .clamp(0, MAX_BAN_MINUTES);
        let duration = (minutes > 0).then(|| Duration::from_secs(minutes.unsigned_abs() * 60));
        let reason = rest(args, 2).unwrap_or_else(|| "No reason given".to_owned());

        let ip = if let Ok(ip) = target.parse::<IpAddr>() {
            ip
        } else {
            match target.parse::<usize>().ok().and_then(|cid| self.client_addr(cid)) {
                Some(addr) => addr.ip(),
                None => {
                    self.print("ban error (invalid client id)");
                    return;
                }
            }
        };

        if let Some(issuer) = self.rcon_cid {
            if self.client_addr(issuer).is_some_and(|a| a.ip() == ip) {
                self.print("ban error (you can't ban yourself)");
                return;
            }
            let protected = self.clients.iter().enumerate().any(|(cid, c)| {
                cid != issuer
                    && c.state != ClientState::Empty
                    && c.addr.is_some_and(|a| a.ip() == ip)
                    && c.authed >= self.rcon_auth_level
            });
            if protected {
                self.print("ban error (command denied)");
                return;
            }
        }

        self.ban_ext(ip, duration, &reason);
    }

    fn con_unban(&mut self, args: &[String]) {
        let Some(ip) = args.first().and_then(|a| a.parse::<IpAddr>().ok()) else {
            self.print("unban error (invalid address)");
            return;
        };
        if self.bans.unban_addr(ip) {
            self.print(&format!("unbanned <{{{ip}}}>"));
        } else {
            self.print("unban failed (invalid entry)");
        }
    }

    fn con_bans(&mut self) {
        let now = self.clock.now();
        let lines: Vec<String> = self
            .bans
            .entries()
            .iter()
            .enumerate()
            .map(|(i, entry)| format!("  #{i} <{{{}}}> {}", entry.addr, entry.message(now)))
            .collect();
        let count = lines.len();
        for line in lines {
            self.print(&line);
        }
        self.print(&format!("{count} ban(s)"));
    }

    fn con_auth_add(&mut self, args: &[String]) {
        let [ident, level, password, ..] = args else {
            return;
        };
        let Some(level) = AuthLevel::parse(level) else {
            self.print(LEVEL_HINT);
            return;
        };
        let first_named = self.auth.num_non_default_keys() == 0;
        match self.auth.add_key(ident, password, level) {
            Ok(_) => {
                self.print("key added");
                if first_named {
                    self.send_rcon_type(None, true);
                }
            }
            Err(AuthError::IdentExists(_)) => self.print("ident already exists"),
            Err(err) => self.print(&err.to_string()),
        }
    }

    fn con_auth_update(&mut self, args: &[String]) {
        let [ident, level, password, ..] = args else {
            return;
        };
        let Some(slot) = self.auth.find_key(ident) else {
            self.print("ident couldn't be found");
            return;
        };
        let Some(level) = AuthLevel::parse(level) else {
            self.print(LEVEL_HINT);
            return;
        };
        if let Err(err) = self.auth.update_key(slot, password, level) {
            self.print(&err.to_string());
            return;
        }
        self.logout_key(slot, "key update");
        self.print("key updated");
    }

    fn con_auth_remove(&mut self, args: &[String]) {
        let Some(ident) = args.first() else {
            return;
        };
        let Some(slot) = self.auth.find_key(ident) else {
            self.print("ident couldn't be found");
            return;
        };
        let had_named = self.auth.num_non_default_keys() > 0;
        self.remove_auth_key(slot);
        if had_named && self.auth.num_non_default_keys() == 0 {
            self.send_rcon_type(None, false);
        }
        self.print("key removed, all users logged out");
    }

    fn con_auth_list(&mut self) {
        let lines: Vec<String> = self
            .auth
            .keys()
            .map(|(ident, level)| format!("{ident} {}", level.name()))
            .collect();
        for line in lines {
            self.print(&line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_quotes_and_spaces() {
        assert_eq!(tokenize("  kick   3 spamming "), vec!["kick", "3", "spamming"]);
        assert_eq!(tokenize(r#"auth_add "my key" admin "pa ss\"word""#), vec!["auth_add", "my key", "admin", "pa ss\"word"]);
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_rest_joins_tail() {
        let args: Vec<String> = ["1", "2", "too", "fast"].iter().map(|s| (*s).to_owned()).collect();
        assert_eq!(rest(&args, 2).as_deref(), Some("too fast"));
        assert_eq!(rest(&args, 4), None);
        assert_eq!(rest(&args, 9), None);
    }

    #[test]
    fn test_command_table() {
        assert!(COMMANDS.iter().all(|c| c.level != AuthLevel::None));
        let admin_only = COMMANDS.iter().filter(|c| c.level == AuthLevel::Admin).count();
        assert!(admin_only > 0 && admin_only < COMMANDS.len());
        for (i, c) in COMMANDS.iter().enumerate() {
            assert!(COMMANDS[i + 1..].iter().all(|o| o.name != c.name), "duplicate {}", c.name);
        }
        assert_eq!(level_title(AuthLevel::Mod), "Mod");
    }
}
