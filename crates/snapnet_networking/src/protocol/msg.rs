//! # Protocol Messages
//!
//! Every chunk payload starts with a message header:
//!
//! ```text
//! small id:     varint((id << 1) | system)
//! extended id:  varint(0 | system) + 16-byte type UUID
//! ```
//!
//! Outgoing messages are built with [`MsgPacker`] and serialized per client by
//! [`pack_message`], which applies the protocol-generation translation.

use super::packer::{Packer, Unpacker};
use super::sixup::{self, Protocol};
use super::uuid_manager::{UuidLookup, UuidManager, OFFSET_UUID};

/// System message IDs in legacy numbering, plus the extended set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SystemMsg {
    /// Extended header marker.
    Ex = 0,
    /// Client version and password.
    Info = 1,
    /// Server announces a map.
    MapChange = 2,
    /// One map chunk.
    MapData = 3,
    /// Server acknowledges the ready message.
    ConReady = 4,
    /// One part of a multi-part snapshot.
    Snap = 5,
    /// Snapshot identical to its delta base.
    SnapEmpty = 6,
    /// Snapshot that fits one part.
    SnapSingle = 7,
    /// Unused small snapshot variant.
    SnapSmall = 8,
    /// Input timing feedback.
    InputTiming = 9,
    /// Remote console login state.
    RconAuthStatus = 10,
    /// Remote console output line.
    RconLine = 11,
    /// Reserved.
    AuthChallenge = 12,
    /// Reserved.
    AuthResult = 13,
    /// Client finished loading the map.
    Ready = 14,
    /// Client wants to join the game.
    EnterGame = 15,
    /// Per-tick input.
    Input = 16,
    /// Remote console command.
    RconCmd = 17,
    /// Remote console login.
    RconAuth = 18,
    /// Map chunk request.
    RequestMapData = 19,
    /// Reserved.
    AuthStart = 20,
    /// Reserved.
    AuthResponse = 21,
    /// Ping.
    Ping = 22,
    /// Ping reply.
    PingReply = 23,
    /// Reserved.
    Error = 24,
    /// Remote console command announcement.
    RconCmdAdd = 25,
    /// Remote console command withdrawal.
    RconCmdRem = 26,

    /// Asks the peer for the name of a UUID.
    WhatIs = OFFSET_UUID,
    /// Answer to [`SystemMsg::WhatIs`].
    ItIs = OFFSET_UUID + 1,
    /// Negative answer to [`SystemMsg::WhatIs`].
    IDontKnow = OFFSET_UUID + 2,
    /// Whether named rcon logins are available.
    RconType = OFFSET_UUID + 3,
    /// Map name, hash, crc and size.
    MapDetails = OFFSET_UUID + 4,
    /// Server capability flags.
    Capabilities = OFFSET_UUID + 5,
    /// Client connection id and version.
    ClientVer = OFFSET_UUID + 6,
    /// Ping carrying a UUID.
    PingEx = OFFSET_UUID + 7,
    /// Reply to [`SystemMsg::PingEx`].
    PongEx = OFFSET_UUID + 8,
    /// Reserved.
    ChecksumRequest = OFFSET_UUID + 9,
    /// Reserved.
    ChecksumResponse = OFFSET_UUID + 10,
    /// Reserved.
    ChecksumError = OFFSET_UUID + 11,
}

/// Names of the extended system messages in registration order.
pub const EXTENDED_SYSTEM_MESSAGES: [&str; 12] = [
    "what-is@ddnet.tw",
    "it-is@ddnet.tw",
    "i-dont-know@ddnet.tw",
    "rcon-type@ddnet.tw",
    "map-details@ddnet.tw",
    "capabilities@ddnet.tw",
    "clientver@ddnet.tw",
    "ping@ddnet.tw",
    "pong@ddnet.tw",
    "checksum-request@ddnet.tw",
    "checksum-response@ddnet.tw",
    "checksum-error@ddnet.tw",
];

impl SystemMsg {
    /// Numeric ID in legacy numbering.
    #[inline]
    #[must_use]
    pub const fn id(self) -> i32 {
        self as i32
    }

    /// Converts a numeric ID.
    #[must_use]
    pub const fn from_id(id: i32) -> Option<Self> {
        Some(match id {
            0 => Self::Ex,
            1 => Self::Info,
            2 => Self::MapChange,
            3 => Self::MapData,
            4 => Self::ConReady,
            5 => Self::Snap,
            6 => Self::SnapEmpty,
            7 => Self::SnapSingle,
            8 => Self::SnapSmall,
            9 => Self::InputTiming,
            10 => Self::RconAuthStatus,
            11 => Self::RconLine,
            12 => Self::AuthChallenge,
            13 => Self::AuthResult,
            14 => Self::Ready,
            15 => Self::EnterGame,
            16 => Self::Input,
            17 => Self::RconCmd,
            18 => Self::RconAuth,
            19 => Self::RequestMapData,
            20 => Self::AuthStart,
            21 => Self::AuthResponse,
            22 => Self::Ping,
            23 => Self::PingReply,
            24 => Self::Error,
            25 => Self::RconCmdAdd,
            26 => Self::RconCmdRem,
            _ => return Self::from_extended(id),
        })
    }

    const fn from_extended(id: i32) -> Option<Self> {
        Some(match id - OFFSET_UUID {
            0 => Self::WhatIs,
            1 => Self::ItIs,
            2 => Self::IDontKnow,
            3 => Self::RconType,
            4 => Self::MapDetails,
            5 => Self::Capabilities,
            6 => Self::ClientVer,
            7 => Self::PingEx,
            8 => Self::PongEx,
            9 => Self::ChecksumRequest,
            10 => Self::ChecksumResponse,
            11 => Self::ChecksumError,
            _ => return None,
        })
    }
}

/// Creates a registry holding the extended system messages.
///
/// Game logic may register further names afterwards.
#[must_use]
pub fn protocol_uuids() -> UuidManager {
    let mut manager = UuidManager::new();
    for name in EXTENDED_SYSTEM_MESSAGES {
        manager.register(name);
    }
    manager
}

/// An outgoing message: ID, system flag and payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MsgPacker {
    id: i32,
    system: bool,
    no_translate: bool,
    packer: Packer,
}

impl MsgPacker {
    /// Creates a message with legacy numbering.
    #[must_use]
    pub fn new(id: i32, system: bool) -> Self {
        Self {
            id,
            system,
            no_translate: false,
            packer: Packer::new(),
        }
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(msg: SystemMsg) -> Self {
        Self::new(msg.id(), true)
    }

    /// Creates a message already numbered for its target protocol.
    #[must_use]
    pub fn untranslated(id: i32, system: bool) -> Self {
        Self {
            no_translate: true,
            ..Self::new(id, system)
        }
    }

    /// Message ID.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> i32 {
        self.id
    }

    /// True for system messages.
    #[inline]
    #[must_use]
    pub const fn is_system(&self) -> bool {
        self.system
    }

    /// Payload written so far.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.packer.as_slice()
    }

    /// True once the payload overflowed.
    #[inline]
    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.packer.has_error()
    }

    /// See [`Packer::add_int`].
    pub fn add_int(&mut self, value: i32) -> &mut Self {
        self.packer.add_int(value);
        self
    }

    /// See [`Packer::add_string`].
    pub fn add_string(&mut self, value: &str, limit: usize) -> &mut Self {
        self.packer.add_string(value, limit);
        self
    }

    /// See [`Packer::add_raw`].
    pub fn add_raw(&mut self, data: &[u8]) -> &mut Self {
        self.packer.add_raw(data);
        self
    }
}

/// Serializes `msg` for a client speaking `protocol`.
///
/// # Returns
///
/// The chunk bytes, or `None` when the message has no counterpart in the
/// target protocol or the payload overflowed.
#[must_use]
pub fn pack_message(msg: &MsgPacker, protocol: Protocol, uuids: &UuidManager) -> Option<Vec<u8>> {
    if msg.has_error() {
        return None;
    }

    let mut id = msg.id;
    if protocol.is_sixup() && !msg.no_translate {
        id = if msg.system {
            sixup::system_to_sixup(id)?
        } else {
            sixup::game_to_sixup(id)?
        };
    }

    let system_bit = i32::from(msg.system);
    let mut packer = Packer::new();
    if id < OFFSET_UUID {
        packer.add_int((id << 1) | system_bit);
    } else {
        packer.add_int(system_bit);
        if !uuids.pack_uuid(id, &mut packer) {
            return None;
        }
    }
    packer.add_raw(msg.payload());

    if packer.has_error() {
        return None;
    }
    Some(packer.as_slice().to_vec())
}

/// Decoded message header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsgHeader {
    /// Message ID in legacy numbering.
    pub id: i32,
    /// True for system messages.
    pub system: bool,
}

/// Outcome of reading a message header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnpackOutcome {
    /// A message to dispatch.
    Message(MsgHeader),
    /// The header was answered at the codec level; send the reply vital.
    Answer(MsgPacker),
    /// Malformed or unknown; drop silently.
    Error,
}

/// Reads a message header from a chunk.
///
/// Sixup IDs are translated to legacy numbering. A system `what-is` query is
/// answered here and never reaches the dispatcher.
pub fn unpack_message_id(
    unpacker: &mut Unpacker<'_>,
    protocol: Protocol,
    uuids: &UuidManager,
) -> UnpackOutcome {
    let Some(raw) = unpacker.get_int() else {
        return UnpackOutcome::Error;
    };
    let system = raw & 1 != 0;
    let mut id = raw >> 1;
    if !(0..OFFSET_UUID).contains(&id) {
        return UnpackOutcome::Error;
    }

    if id != SystemMsg::Ex.id() {
        if protocol.is_sixup() {
            let translated = if system {
                sixup::system_from_sixup(id)
            } else {
                sixup::game_from_sixup(id)
            };
            match translated {
                Some(legacy) => id = legacy,
                None => return UnpackOutcome::Error,
            }
        }
        return UnpackOutcome::Message(MsgHeader { id, system });
    }

    id = match uuids.unpack_uuid(unpacker) {
        UuidLookup::Known(id) => id,
        UuidLookup::Unknown(_) | UuidLookup::Invalid => return UnpackOutcome::Error,
    };

    if system && id == SystemMsg::WhatIs.id() {
        return match uuids.unpack_uuid(unpacker) {
            UuidLookup::Invalid => UnpackOutcome::Error,
            UuidLookup::Unknown(asked) => {
                let mut reply = MsgPacker::system(SystemMsg::IDontKnow);
                reply.add_raw(asked.as_bytes());
                UnpackOutcome::Answer(reply)
            }
            UuidLookup::Known(asked_id) => {
                let mut reply = MsgPacker::system(SystemMsg::ItIs);
                if let (Some(uuid), Some(name)) = (uuids.uuid(asked_id), uuids.name(asked_id)) {
                    reply.add_raw(uuid.as_bytes()).add_string(name, 0);
                }
                UnpackOutcome::Answer(reply)
            }
        };
    }

    UnpackOutcome::Message(MsgHeader { id, system })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::uuid_manager::calculate_uuid;

    fn read_header(bytes: &[u8], protocol: Protocol, uuids: &UuidManager) -> UnpackOutcome {
        let mut unpacker = Unpacker::new(bytes);
        unpack_message_id(&mut unpacker, protocol, uuids)
    }

    #[test]
    fn test_extended_ids_match_registry() {
        let uuids = protocol_uuids();
        assert_eq!(uuids.name(SystemMsg::PingEx.id()), Some("ping@ddnet.tw"));
        assert_eq!(uuids.name(SystemMsg::ClientVer.id()), Some("clientver@ddnet.tw"));
        assert_eq!(SystemMsg::from_id(OFFSET_UUID + 4), Some(SystemMsg::MapDetails));
        assert_eq!(SystemMsg::from_id(27), None);
    }

    #[test]
    fn test_small_header() {
        let uuids = protocol_uuids();
        let mut msg = MsgPacker::system(SystemMsg::ConReady);
        msg.add_int(3);
        let bytes = pack_message(&msg, Protocol::Legacy, &uuids).unwrap();
        assert_eq!(bytes[0], (4 << 1) | 1);

        let outcome = read_header(&bytes, Protocol::Legacy, &uuids);
        assert_eq!(outcome, UnpackOutcome::Message(MsgHeader { id: 4, system: true }));
    }

    #[test]
    fn test_extended_header_carries_uuid() {
        let uuids = protocol_uuids();
        let msg = MsgPacker::system(SystemMsg::Capabilities);
        let bytes = pack_message(&msg, Protocol::Legacy, &uuids).unwrap();
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..17], calculate_uuid("capabilities@ddnet.tw").as_bytes());

        let outcome = read_header(&bytes, Protocol::Legacy, &uuids);
        assert_eq!(
            outcome,
            UnpackOutcome::Message(MsgHeader { id: SystemMsg::Capabilities.id(), system: true })
        );
    }

    #[test]
    fn test_sixup_translation_and_drop() {
        let uuids = protocol_uuids();
        let snap = MsgPacker::system(SystemMsg::SnapEmpty);
        let bytes = pack_message(&snap, Protocol::Sixup, &uuids).unwrap();
        assert_eq!(bytes[0], (7 << 1) | 1);

        let status = MsgPacker::system(SystemMsg::RconAuthStatus);
        assert!(pack_message(&status, Protocol::Sixup, &uuids).is_none());

        let native = MsgPacker::untranslated(sixup::native::RCON_AUTH_ON, true);
        let bytes = pack_message(&native, Protocol::Sixup, &uuids).unwrap();
        assert_eq!(bytes[0], (11 << 1) | 1);
    }

    #[test]
    fn test_inbound_sixup_ready() {
        let uuids = protocol_uuids();
        let bytes = [(18 << 1) | 1];
        let outcome = read_header(&bytes, Protocol::Sixup, &uuids);
        assert_eq!(
            outcome,
            UnpackOutcome::Message(MsgHeader { id: SystemMsg::Ready.id(), system: true })
        );
    }

    #[test]
    fn test_what_is_answered() {
        let uuids = protocol_uuids();

        let mut query = Packer::new();
        query.add_int(1);
        query.add_raw(calculate_uuid("what-is@ddnet.tw").as_bytes());
        query.add_raw(calculate_uuid("pong@ddnet.tw").as_bytes());

        match read_header(query.as_slice(), Protocol::Legacy, &uuids) {
            UnpackOutcome::Answer(reply) => {
                assert_eq!(reply.id(), SystemMsg::ItIs.id());
                let mut payload = Unpacker::new(reply.payload());
                assert_eq!(payload.get_raw(16), Some(calculate_uuid("pong@ddnet.tw").as_bytes().as_slice()));
                assert_eq!(payload.get_string(), Some("pong@ddnet.tw"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let mut unknown = Packer::new();
        unknown.add_int(1);
        unknown.add_raw(calculate_uuid("what-is@ddnet.tw").as_bytes());
        unknown.add_raw(calculate_uuid("mystery@example.org").as_bytes());
        match read_header(unknown.as_slice(), Protocol::Legacy, &uuids) {
            UnpackOutcome::Answer(reply) => assert_eq!(reply.id(), SystemMsg::IDontKnow.id()),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_negative_and_unknown_rejected() {
        let uuids = protocol_uuids();
        let mut negative = Packer::new();
        negative.add_int(-4);
        assert_eq!(read_header(negative.as_slice(), Protocol::Legacy, &uuids), UnpackOutcome::Error);

        let mut unknown = Packer::new();
        unknown.add_int(0);
        unknown.add_raw(calculate_uuid("mystery@example.org").as_bytes());
        assert_eq!(read_header(unknown.as_slice(), Protocol::Legacy, &uuids), UnpackOutcome::Error);
    }
}
