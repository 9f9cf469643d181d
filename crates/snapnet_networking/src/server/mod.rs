//! # Snapshot Server
//!
//! The authoritative server core: client slots, the session state machine,
//! the remote console and the fixed-rate tick loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SERVER CORE                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │ Transport    │  │ Tick Loop    │  │ Snapshots    │       │
//! │  │ (recv/send)  │──│ (50Hz)       │──│ (delta/ack)  │       │
//! │  └──────────────┘  └──────────────┘  └──────────────┘       │
//! │         │                 │                 │               │
//! │         └─────────────────┼─────────────────┘               │
//! │                           │                                 │
//! │               ┌───────────▼───────────┐                     │
//! │               │ ServerState           │                     │
//! │               │ - client slots        │                     │
//! │               │ - auth keys, bans     │                     │
//! │               │ - map, snapshot IDs   │                     │
//! │               └───────────────────────┘                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Loop iteration
//!
//! 1. Map reload if requested or the tick counter nears overflow
//! 2. Address reputation results
//! 3. Catch-up ticks with input delivery
//! 4. Snapshots every other tick, command list streaming
//! 5. Registration and server info refresh
//! 6. Network pump
//! 7. Idle handling and the bounded wait for the next tick

pub mod auth;
pub mod browser;
pub mod client;
mod console;
pub mod dnsbl;
pub mod map;
mod packets;
mod rcon;
mod snap;
mod state;
pub mod tick;

pub use auth::{AuthLevel, AuthManager};
pub use client::{ClientSlot, ClientState, Input, SnapRate};
pub use state::{ServerState, MAX_RCON_LINE};

use crate::config::ServerConfig;
use crate::error::NetResult;
use crate::integration::{DemoRecorder, GameLogic, Register};
use crate::protocol::{protocol_uuids, sixup::native, MsgPacker};
use crate::snapshot::SnapshotBuilder;
use crate::transport::{ChunkFlags, NetEvent, SendTarget, Transport, UdpTransport};
use browser::{parse_request, register_json, server_info_packets, sixup_server_info, InfoKind, InfoRateLimit, ServerInfo};
use crossbeam_channel::Receiver;
use dnsbl::{query_name, DnsblResolver, DnsblState, SystemResolver};
use map::{DirMapSource, MapSource};
use snapnet_core::{Clock, SnapIdPool, SystemClock};
use state::{addr_marker, Deferred};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tick::TickClock;

/// Wait while no client is connected.
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// Ban length for blacklisted addresses.
const DNSBL_BAN: Duration = Duration::from_secs(600);

/// The game server.
///
/// Owns the transport, every client slot and the game logic. Everything runs
/// on the thread that calls [`Server::run`] or [`Server::update`].
pub struct Server<G: GameLogic> {
    state: ServerState,
    game: G,
    builder: SnapshotBuilder,
    maps: Box<dyn MapSource>,
    register: Option<Box<dyn Register>>,
    console: Option<Receiver<String>>,
    info_cache: Option<ServerInfo>,
    started: bool,
}

impl<G: GameLogic> Server<G> {
    /// Creates a server on top of an existing transport.
    ///
    /// Loads the configured map and sets up the remote console keys. A
    /// generated admin password is logged once.
    ///
    /// # Errors
    ///
    /// Invalid configuration or a map that cannot be loaded.
    pub fn new(
        config: ServerConfig,
        transport: Box<dyn Transport>,
        clock: Arc<dyn Clock>,
        mut maps: Box<dyn MapSource>,
        game: G,
    ) -> NetResult<Self> {
        config.validate()?;
        let max_clients = config.max_clients.min(transport.max_clients());

        let mut uuids = protocol_uuids();
        game.register_uuids(&mut uuids);
        let uuids = Arc::new(uuids);
        let builder = SnapshotBuilder::new(Arc::clone(&uuids), game.item_sizes());

        let map = maps.load(&config.map)?;
        tracing::info!("{} sha256 is {}", config.map, map.legacy.sha256_hex());

        let persistent_size = game.persistent_client_data_size();
        let now = clock.now();
        let state = ServerState {
            transport,
            clients: (0..max_clients).map(|_| ClientSlot::new(persistent_size)).collect(),
            ids: SnapIdPool::new(),
            uuids,
            codec: config.snapshot_codec.build(),
            auth: AuthManager::new(),
            bans: crate::transport::NetBan::new(),
            map,
            ticks: TickClock::server(now),
            demo: None,
            deferred: VecDeque::new(),
            rcon_reentry: false,
            rcon_cid: None,
            rcon_auth_level: config.rcon.auth_level,
            map_reload: false,
            reloaded_when_empty: false,
            running: true,
            shutdown_reason: None,
            info_needs_update: false,
            info_rate: InfoRateLimit::default(),
            dnsbl_jobs: (0..max_clients).map(|_| None).collect(),
            resolver: Box::new(SystemResolver),
            net_version: game.net_version().to_owned(),
            game_version: game.version().to_owned(),
            game_type: game.game_type().to_owned(),
            clock,
            config,
        };

        let mut server = Self {
            state,
            game,
            builder,
            maps,
            register: None,
            console: None,
            info_cache: None,
            started: false,
        };
        if let Some(password) = server.state.auth.init(&server.state.config.rcon) {
            let line = format!("| rcon password: '{password}' |");
            let border = format!("+{}+", "-".repeat(line.len() - 2));
            tracing::info!("{border}");
            tracing::info!("{line}");
            tracing::info!("{border}");
        }
        Ok(server)
    }

    /// Binds a UDP transport and reads maps from `config.maps_dir`.
    ///
    /// # Errors
    ///
    /// Bind failure, invalid configuration or a map that cannot be loaded.
    pub fn bind(config: ServerConfig, game: G) -> NetResult<Self> {
        let transport = UdpTransport::bind(config.bind_address(), config.max_clients)?;
        tracing::info!("bound to {}", transport.local_addr());
        let maps = DirMapSource::new(config.maps_dir.clone());
        Self::new(config, Box::new(transport), Arc::new(SystemClock), Box::new(maps), game)
    }

    /// Sets the address reputation resolver, builder style.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Box<dyn DnsblResolver>) -> Self {
        self.state.resolver = resolver;
        self
    }

    /// Sets the master server registration, builder style.
    #[must_use]
    pub fn with_register(mut self, register: Box<dyn Register>) -> Self {
        self.register = Some(register);
        self
    }

    /// Sets the demo recorder, builder style.
    #[must_use]
    pub fn with_demo_recorder(mut self, recorder: Box<dyn DemoRecorder>) -> Self {
        self.state.demo = Some(recorder);
        self
    }

    /// Feeds console lines from a channel into the loop, builder style.
    #[must_use]
    pub fn with_console(mut self, lines: Receiver<String>) -> Self {
        self.console = Some(lines);
        self
    }

    /// Server state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> &ServerState {
        &self.state
    }

    /// Mutable server state.
    #[inline]
    pub fn state_mut(&mut self) -> &mut ServerState {
        &mut self.state
    }

    /// The game logic.
    #[inline]
    #[must_use]
    pub const fn game(&self) -> &G {
        &self.game
    }

    /// Mutable game logic.
    #[inline]
    pub fn game_mut(&mut self) -> &mut G {
        &mut self.game
    }

    /// Runs one console line with full access.
    pub fn execute_console_line(&mut self, line: &str) {
        self.state.execute_console_line(line);
        self.process_deferred();
    }

    // ------------------------------------------------------------------
    // Main loop
    // ------------------------------------------------------------------

    /// Runs until shutdown, then disconnects everyone.
    pub fn run(&mut self) {
        while self.update() {}
        self.shutdown();
    }

    /// Initializes the game on the first call; later calls do nothing.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.game.on_init(&mut self.state);
        self.process_deferred();
        tracing::info!("server name is '{}'", self.state.config.name);
        tracing::info!("version {}", self.state.net_version);
        self.update_server_info(false);
    }

    /// Runs one loop iteration.
    ///
    /// Returns false once the server should shut down.
    pub fn update(&mut self) -> bool {
        self.start();
        if !self.state.running {
            return false;
        }

        if self.state.map_reload || self.state.ticks.needs_wrap() {
            self.reload();
        }

        if self.state.config.dnsbl.enabled {
            self.update_dnsbl();
        }

        let new_ticks = self.run_ticks();
        if new_ticks {
            if self.state.config.high_bandwidth || self.state.tick() % 2 == 0 {
                self.do_snapshot();
                self.process_deferred();
            }
            self.state.update_rcon_commands();
        }

        let now = self.state.clock.now();
        if let Some(register) = self.register.as_mut() {
            register.update(now);
        }
        if self.state.info_needs_update {
            self.update_server_info(true);
        }

        self.pump_network();
        self.poll_console();

        if !self.state.running {
            return false;
        }
        self.idle();
        self.state.running
    }

    /// Simulates every tick that is due. Returns true if any was simulated.
    fn run_ticks(&mut self) -> bool {
        let mut new_ticks = false;
        let now = self.state.clock.now();
        while self.state.ticks.next_tick_due(now) {
            let begin = self.state.clock.now();

            let next = self.state.tick() + 1;
            for (cid, words) in self.inputs_for_tick(next) {
                self.game.on_client_predicted_early_input(&mut self.state, cid, &words);
            }
            self.state.ticks.advance();
            new_ticks = true;

            let tick = self.state.tick();
            for (cid, words) in self.inputs_for_tick(tick) {
                self.game.on_client_predicted_input(&mut self.state, cid, &words);
            }
            self.game.on_tick(&mut self.state);
            self.process_deferred();

            let took = self.state.clock.now().saturating_duration_since(begin);
            self.state.ticks.record(took);
            if !self.state.running {
                break;
            }
        }
        new_ticks
    }

    fn inputs_for_tick(&self, tick: i32) -> Vec<(usize, Vec<i32>)> {
        self.state
            .clients
            .iter()
            .enumerate()
            .filter(|(_, c)| c.state == ClientState::InGame)
            .filter_map(|(cid, c)| c.input_for_tick(tick).map(|input| (cid, input.words().to_vec())))
            .collect()
    }

    fn idle(&mut self) {
        if self.state.client_count() == 0 {
            match self.state.config.reload_when_empty {
                1 => {
                    self.state.map_reload = true;
                    self.state.config.reload_when_empty = 0;
                }
                2 if !self.state.reloaded_when_empty => {
                    self.state.map_reload = true;
                    self.state.reloaded_when_empty = true;
                }
                _ => {}
            }
            if self.state.config.shutdown_when_empty {
                self.state.running = false;
            } else {
                self.state.transport.wait(IDLE_WAIT);
            }
            return;
        }

        self.state.reloaded_when_empty = false;
        let now = self.state.clock.now();
        let timeout = self.state.ticks.until_next_tick(now);
        self.state.transport.wait(timeout);
    }

    /// Disconnects every client and tears the game down.
    pub fn shutdown(&mut self) {
        let reason = self
            .state
            .shutdown_reason
            .clone()
            .unwrap_or_else(|| "Server shutdown".to_owned());
        tracing::info!("shutting down: {reason}");

        for cid in 0..self.state.clients.len() {
            self.state.drop_client(cid, &reason);
        }
        self.process_deferred();

        if let Some(register) = self.register.as_mut() {
            register.on_shutdown();
        }
        self.game.on_shutdown(&mut self.state, true);
        self.process_deferred();
        if let Some(demo) = self.state.demo.as_mut().filter(|d| d.is_recording()) {
            demo.stop();
        }
        self.state.running = false;
    }

    // ------------------------------------------------------------------
    // Map
    // ------------------------------------------------------------------

    fn load_map(&mut self, name: &str) -> NetResult<()> {
        let map = self.maps.load(name)?;
        if let Some(demo) = self.state.demo.as_mut().filter(|d| d.is_recording()) {
            demo.stop();
        }
        self.state.ids.expire_all();
        tracing::info!("{name} sha256 is {}", map.legacy.sha256_hex());
        if map.sixup.is_none() && self.state.config.sixup {
            tracing::debug!("no 0.7 version of {name}, 0.7 clients get the 0.6 map");
        }
        self.state.map = map;
        Ok(())
    }

    fn reload(&mut self) {
        self.state.map_reload = false;
        let name = self.state.config.map.clone();
        if let Err(err) = self.load_map(&name) {
            tracing::warn!("failed to load map. mapname='{name}': {err}");
            self.state.config.map = self.state.map.name.clone();
            return;
        }

        for cid in 0..self.state.clients.len() {
            if self.state.clients[cid].state != ClientState::InGame {
                continue;
            }
            let mut data = std::mem::take(&mut self.state.clients[cid].persistent_data);
            let kept = self.game.on_client_data_persist(cid, &mut data);
            let client = &mut self.state.clients[cid];
            client.persistent_data = data;
            client.has_persistent_data = kept;
        }
        self.game.on_shutdown(&mut self.state, false);
        self.process_deferred();

        for cid in 0..self.state.clients.len() {
            if self.state.clients[cid].state <= ClientState::Auth {
                continue;
            }
            self.state.send_map(cid);
            let client = &mut self.state.clients[cid];
            client.reset();
            client.state = ClientState::Connecting;
        }

        let now = self.state.clock.now();
        self.state.ticks.restart(now);
        self.state.info_rate.reset();
        self.game.on_init(&mut self.state);
        self.process_deferred();
        self.update_server_info(true);
    }

    // ------------------------------------------------------------------
    // Address reputation
    // ------------------------------------------------------------------

    fn update_dnsbl(&mut self) {
        for cid in 0..self.state.clients.len() {
            let client = &self.state.clients[cid];
            if client.state == ClientState::Empty {
                continue;
            }
            let Some(addr) = client.addr else {
                continue;
            };
            let status = client.dnsbl;
            match status {
                DnsblState::None => {
                    let dnsbl = &self.state.config.dnsbl;
                    let query = query_name(addr.ip(), &dnsbl.host, &dnsbl.key);
                    self.state.dnsbl_jobs[cid] = Some(self.state.resolver.lookup(query));
                    self.state.clients[cid].dnsbl = DnsblState::Pending;
                }
                DnsblState::Pending => {
                    let Some(listed) = self.state.dnsbl_jobs[cid].as_mut().and_then(dnsbl::DnsblJob::poll) else {
                        continue;
                    };
                    self.state.dnsbl_jobs[cid] = None;
                    if !listed {
                        self.state.clients[cid].dnsbl = DnsblState::Whitelisted;
                        continue;
                    }
                    self.state.clients[cid].dnsbl = DnsblState::Blacklisted;
                    let marker = addr_marker(Some(addr));
                    self.state
                        .print(&format!("ClientID={cid} addr={marker} secure=yes blacklisted"));
                    if self.state.config.dnsbl.ban {
                        self.state.ban(
                            cid,
                            Some(DNSBL_BAN),
                            "VPN detected, try connecting without. Contact admin if mistaken",
                        );
                    }
                }
                DnsblState::Whitelisted | DnsblState::Blacklisted => {}
            }
        }
        self.process_deferred();
    }

    // ------------------------------------------------------------------
    // Network
    // ------------------------------------------------------------------

    fn pump_network(&mut self) {
        let now = self.state.clock.now();
        self.state.transport.update(now);
        while let Some(event) = self.state.transport.recv() {
            self.handle_event(event);
            self.process_deferred();
        }
        let now = self.state.clock.now();
        self.state.bans.update(now);
    }

    fn poll_console(&mut self) {
        let Some(console) = self.console.as_ref() else {
            return;
        };
        let lines: Vec<String> = console.try_iter().collect();
        for line in lines {
            self.execute_console_line(&line);
        }
    }

    fn handle_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::Connected { cid, addr, sixup } => {
                if self.admit(cid, addr, sixup) {
                    self.new_client(cid, addr, sixup);
                }
            }
            NetEvent::ConnectedNoAuth { cid, addr } => {
                if self.admit(cid, addr, false) {
                    self.new_client_no_auth(cid, addr);
                }
            }
            NetEvent::Rejoined { cid } => self.rejoin(cid),
            NetEvent::TimedOut { cid } => {
                tracing::debug!("cid={cid} timed out, slot kept for takeover");
            }
            NetEvent::Disconnected { cid, reason } => self.del_client(cid, &reason),
            NetEvent::Chunk { cid, data, vital } => self.process_client_packet(cid, &data, vital),
            NetEvent::Connless { addr, data } => self.handle_connless(addr, &data),
        }
    }

    /// Applies bans and connection limits to a fresh connection.
    fn admit(&mut self, cid: usize, addr: SocketAddr, sixup: bool) -> bool {
        let now = self.state.clock.now();
        let refusal = if cid >= self.state.clients.len() {
            Some("This server is full".to_owned())
        } else if let Some(ban) = self.state.bans.is_banned(addr.ip(), now) {
            Some(ban.message(now))
        } else if sixup && !self.state.config.sixup {
            Some("This server does not accept 0.7 clients".to_owned())
        } else {
            let limit = self.state.config.max_clients_per_ip;
            let same_ip = self
                .state
                .clients
                .iter()
                .filter(|c| c.state != ClientState::Empty && c.addr.is_some_and(|a| a.ip() == addr.ip()))
                .count();
            (same_ip >= limit).then(|| format!("Only {limit} players with the same IP are allowed"))
        };

        match refusal {
            Some(reason) => {
                tracing::debug!("refused connection from <{{{addr}}}>: {reason}");
                self.state.transport.drop_client(cid, &reason);
                false
            }
            None => true,
        }
    }

    fn new_client(&mut self, cid: usize, addr: SocketAddr, sixup: bool) {
        let protocol = if sixup {
            crate::protocol::Protocol::Sixup
        } else {
            crate::protocol::Protocol::Legacy
        };
        let show_ips = self.state.config.show_ips;
        self.state.clients[cid].open(Some(addr), protocol, ClientState::PreAuth, show_ips);
        self.state.dnsbl_jobs[cid] = None;
        self.game.on_client_engine_join(&mut self.state, cid, sixup);
        self.state.expire_server_info();
    }

    fn new_client_no_auth(&mut self, cid: usize, addr: SocketAddr) {
        let show_ips = self.state.config.show_ips;
        self.state.clients[cid].open(
            Some(addr),
            crate::protocol::Protocol::Legacy,
            ClientState::Connecting,
            show_ips,
        );
        self.state.dnsbl_jobs[cid] = None;
        self.game.on_client_engine_join(&mut self.state, cid, false);
        self.state.send_capabilities(cid);
        self.state.send_map(cid);
        self.state.expire_server_info();
    }

    fn rejoin(&mut self, cid: usize) {
        if self.state.client_state(cid) == ClientState::Empty {
            return;
        }
        let client = &mut self.state.clients[cid];
        let was_authed = client.authed != AuthLevel::None;
        client.authed = AuthLevel::None;
        client.auth_key = None;
        client.rcon_cmd_cursor = None;
        client.reset();
        if was_authed {
            self.game.on_set_authed(&mut self.state, cid, AuthLevel::None);
        }
        self.state.send_map(cid);
    }

    /// Releases a slot and runs the drop hooks.
    fn del_client(&mut self, cid: usize, reason: &str) {
        let state = self.state.client_state(cid);
        if state == ClientState::Empty {
            return;
        }
        let addr = addr_marker(self.state.clients[cid].addr);
        self.state
            .print(&format!("client dropped. cid={cid} addr={addr} reason='{reason}'"));

        if state >= ClientState::Ready {
            self.game.on_client_drop(&mut self.state, cid, reason);
        }
        self.state.clients[cid].clear();
        self.state.dnsbl_jobs[cid] = None;
        self.game.on_client_engine_drop(&mut self.state, cid, reason);
        self.state.expire_server_info();
    }

    /// Replays drops and auth changes queued by hooks.
    fn process_deferred(&mut self) {
        while let Some(item) = self.state.deferred.pop_front() {
            match item {
                Deferred::Drop { cid, reason } => self.del_client(cid, &reason),
                Deferred::AuthChanged { cid, level } => self.game.on_set_authed(&mut self.state, cid, level),
            }
        }
    }

    // ------------------------------------------------------------------
    // Server info
    // ------------------------------------------------------------------

    fn server_info(&self) -> ServerInfo {
        self.state.server_info(|cid| self.game.is_client_player(cid))
    }

    fn handle_connless(&mut self, addr: SocketAddr, data: &[u8]) {
        let Some(request) = parse_request(data) else {
            return;
        };
        let now = self.state.clock.now();
        if self.state.bans.is_banned(addr.ip(), now).is_some() {
            return;
        }

        let tick = self.state.tick();
        let per_second = self.state.config.server_info_per_second;
        let send_clients = self.state.info_rate.allow_clients(tick, per_second);
        if self.info_cache.is_none() || self.state.info_needs_update {
            self.info_cache = Some(self.server_info());
        }
        let Some(info) = self.info_cache.as_ref() else {
            return;
        };
        for packet in server_info_packets(info, request.token, request.kind, send_clients) {
            self.state
                .transport
                .send(SendTarget::Addr(addr), &packet, ChunkFlags::NONE);
        }
    }

    /// Rebuilds the advertised info; with `resend` in-game clients get it too.
    fn update_server_info(&mut self, resend: bool) {
        let info = self.server_info();
        if let Some(register) = self.register.as_mut() {
            match register_json(&info) {
                Ok(json) => register.on_new_info(&json),
                Err(err) => tracing::warn!("failed to encode server info: {err}"),
            }
        }

        if resend {
            for cid in 0..self.state.clients.len() {
                let client = &self.state.clients[cid];
                if client.state != ClientState::InGame {
                    continue;
                }
                if client.is_sixup() {
                    let mut msg = MsgPacker::untranslated(native::SERVERINFO, true);
                    sixup_server_info(&info, &mut msg);
                    self.state.send_msg(&msg, ChunkFlags::VITAL | ChunkFlags::FLUSH, Some(cid));
                } else if let Some(addr) = client.addr {
                    for packet in server_info_packets(&info, -1, InfoKind::InGame, false) {
                        self.state
                            .transport
                            .send(SendTarget::Addr(addr), &packet, ChunkFlags::NONE);
                    }
                }
            }
        }

        self.info_cache = Some(info);
        self.state.info_needs_update = false;
    }
}
