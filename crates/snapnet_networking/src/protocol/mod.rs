//! # Network Protocol
//!
//! Message-level wire format shared by both protocol generations.
//!
//! ## Chunk Payload Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header: varint((id << 1) | sys)  [+ 16-byte UUID if id = 0]  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Payload: varints, NUL-terminated strings, raw bytes          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Philosophy
//!
//! - Translation between generations happens only at this boundary
//! - Decoding failures never panic; callers drop the chunk silently
//! - Extended types are identified by name hash, never renumbered

mod msg;
mod packer;
pub mod sixup;
mod uuid_manager;
pub mod varint;

pub use msg::{
    pack_message, protocol_uuids, unpack_message_id, MsgHeader, MsgPacker, SystemMsg,
    UnpackOutcome, EXTENDED_SYSTEM_MESSAGES,
};
pub use packer::{Packer, Unpacker, PACKER_BUFFER_SIZE};
pub use sixup::Protocol;
pub use uuid_manager::{calculate_uuid, UuidLookup, UuidManager, OFFSET_UUID, TEEWORLDS_NAMESPACE};
