//! Shared harness: a lobby server on an in-memory transport and a manual clock.

#![allow(dead_code)]

use snapnet_core::ManualClock;
use snapnet_networking::protocol::{
    pack_message, protocol_uuids, unpack_message_id, MsgPacker, SystemMsg, UnpackOutcome, Unpacker, UuidManager,
};
use snapnet_networking::server::map::MemoryMapSource;
use snapnet_networking::transport::{MemoryLink, SendTarget};
use snapnet_networking::{LobbyGame, MemoryTransport, Protocol, Server, ServerConfig, GAME_NETVERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Map every test server starts on.
pub const MAP: &str = "lobby";

/// One decoded chunk the server sent to a client.
#[derive(Clone, Debug)]
pub struct Received {
    /// Message ID in legacy numbering.
    pub id: i32,
    /// System message.
    pub system: bool,
    /// Payload after the header.
    pub payload: Vec<u8>,
}

impl Received {
    /// True if this is the given system message.
    pub fn is(&self, msg: SystemMsg) -> bool {
        self.system && self.id == msg.id()
    }

    /// Payload integers, stopping at the first malformed one.
    pub fn ints(&self) -> Vec<i32> {
        let mut unpacker = Unpacker::new(&self.payload);
        std::iter::from_fn(|| unpacker.get_int()).collect()
    }

    /// First payload string.
    pub fn string(&self) -> String {
        Unpacker::new(&self.payload).get_string().unwrap_or("").to_owned()
    }
}

/// Server under test plus its peers' side of the transport.
pub struct Harness {
    pub server: Server<LobbyGame>,
    pub link: MemoryLink,
    pub clock: Arc<ManualClock>,
    pub uuids: UuidManager,
}

/// Configuration with small, test-friendly defaults.
pub fn config() -> ServerConfig {
    let mut config = ServerConfig {
        name: "test server".to_owned(),
        max_clients: 8,
        map: MAP.to_owned(),
        ..ServerConfig::default()
    };
    config.rcon.password = "admin-pass".to_owned();
    config.rcon.mod_password = "mod-pass".to_owned();
    config
}

/// Address of test peer `n`.
pub fn addr(n: u16) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, 1], 40_000 + n))
}

impl Harness {
    /// Starts a server with [`config`].
    pub fn new() -> Self {
        Self::with_config(config())
    }

    /// Starts a server with a custom configuration.
    pub fn with_config(config: ServerConfig) -> Self {
        let (transport, link) = MemoryTransport::new(config.max_clients);
        let clock = Arc::new(ManualClock::new());
        let maps = MemoryMapSource::new()
            .with_map(MAP, vec![7; 3000], None)
            .with_map("other", vec![9; 500], None);
        let mut server = Server::new(config, Box::new(transport), clock.clone(), Box::new(maps), LobbyGame::new())
            .expect("server starts");
        server.start();
        Self {
            server,
            link,
            clock,
            uuids: protocol_uuids(),
        }
    }

    /// Runs one loop iteration.
    pub fn update(&mut self) {
        self.server.update();
    }

    /// Advances the clock by `ticks` whole ticks and runs one iteration.
    pub fn advance_ticks(&mut self, ticks: u32) {
        self.clock.advance(Duration::from_millis(20) * ticks + Duration::from_micros(100));
        self.server.update();
    }

    /// Delivers a message from `cid`.
    pub fn send(&self, cid: usize, msg: &MsgPacker, vital: bool) {
        let data = pack_message(msg, Protocol::Legacy, &self.uuids).expect("message packs");
        self.link.send_chunk(cid, data, vital);
    }

    /// Decodes everything sent to `cid` since the last call.
    ///
    /// Chunks for other targets are discarded.
    pub fn received(&self, cid: usize) -> Vec<Received> {
        self.link
            .take_sent()
            .into_iter()
            .filter(|chunk| chunk.target == SendTarget::Client(cid))
            .filter_map(|chunk| {
                let mut unpacker = Unpacker::new(&chunk.data);
                match unpack_message_id(&mut unpacker, Protocol::Legacy, &self.uuids) {
                    UnpackOutcome::Message(header) => Some(Received {
                        id: header.id,
                        system: header.system,
                        payload: unpacker.remaining().to_vec(),
                    }),
                    _ => None,
                }
            })
            .collect()
    }

    /// Sends the DDNet version message.
    pub fn send_client_ver(&self, cid: usize) {
        let mut msg = MsgPacker::system(SystemMsg::ClientVer);
        msg.add_raw(&[0x42; 16]).add_int(16_050).add_string("DDNet 16.5", 0);
        self.send(cid, &msg, true);
    }

    /// Sends the info message with `password`.
    pub fn send_info(&self, cid: usize, password: &str) {
        let mut msg = MsgPacker::system(SystemMsg::Info);
        msg.add_string(GAME_NETVERSION, 0).add_string(password, 0);
        self.send(cid, &msg, true);
    }

    /// Sends a payload-less system message.
    pub fn send_system(&self, cid: usize, msg: SystemMsg) {
        self.send(cid, &MsgPacker::system(msg), true);
    }

    /// Sends an input acknowledging snapshot `ack`.
    pub fn send_input(&self, cid: usize, ack: i32, intended: i32, words: &[i32]) {
        let mut msg = MsgPacker::system(SystemMsg::Input);
        let size = i32::try_from(words.len() * 4).unwrap_or(0);
        msg.add_int(ack).add_int(intended).add_int(size);
        for &word in words {
            msg.add_int(word);
        }
        self.send(cid, &msg, false);
    }

    /// Sends a legacy remote console login.
    pub fn send_rcon_auth(&self, cid: usize, ident: &str, password: &str) {
        let mut msg = MsgPacker::system(SystemMsg::RconAuth);
        msg.add_string(ident, 0).add_string(password, 0).add_int(1);
        self.send(cid, &msg, true);
    }

    /// Sends a remote console command.
    pub fn send_rcon_cmd(&self, cid: usize, line: &str) {
        let mut msg = MsgPacker::system(SystemMsg::RconCmd);
        msg.add_string(line, 0);
        self.send(cid, &msg, true);
    }

    /// Connects `cid` and walks it through the handshake into the game.
    pub fn join(&mut self, cid: usize) {
        let port = u16::try_from(cid).unwrap_or(0);
        self.link.connect(cid, addr(port), false);
        self.update();
        self.send_client_ver(cid);
        self.send_info(cid, "");
        self.update();
        self.send_system(cid, SystemMsg::Ready);
        self.update();
        self.send_system(cid, SystemMsg::EnterGame);
        self.update();
    }

    /// Remote console lines sent to `cid`, decoded from `received`.
    pub fn rcon_lines(received: &[Received]) -> Vec<String> {
        received
            .iter()
            .filter(|r| r.is(SystemMsg::RconLine))
            .map(Received::string)
            .collect()
    }
}
