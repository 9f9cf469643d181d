//! # Extended Type Identifiers
//!
//! Message and snapshot-item types above [`OFFSET_UUID`] are identified on the
//! wire by a name-based UUID instead of a small integer.

use super::packer::{Packer, Unpacker};
use std::collections::HashMap;
use uuid::Uuid;

/// First numeric ID assigned to UUID-identified types.
pub const OFFSET_UUID: i32 = 1 << 16;

/// Namespace all type names are hashed into.
pub const TEEWORLDS_NAMESPACE: Uuid = Uuid::from_u128(0xe05d_daaa_c4e6_4cfb_b642_5d48_e80c_0029);

/// Computes the UUID of a type name.
#[must_use]
pub fn calculate_uuid(name: &str) -> Uuid {
    Uuid::new_v3(&TEEWORLDS_NAMESPACE, name.as_bytes())
}

/// Result of reading a UUID from a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UuidLookup {
    /// Fewer than 16 bytes were left.
    Invalid,
    /// A well-formed UUID nobody registered.
    Unknown(Uuid),
    /// A registered type.
    Known(i32),
}

/// Registry mapping type names and UUIDs to numeric IDs.
#[derive(Clone, Debug, Default)]
pub struct UuidManager {
    entries: Vec<(String, Uuid)>,
    by_uuid: HashMap<Uuid, i32>,
}

impl UuidManager {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` and returns its numeric ID.
    ///
    /// IDs are handed out consecutively starting at [`OFFSET_UUID`].
    /// Registering the same name twice returns the existing ID.
    pub fn register(&mut self, name: &str) -> i32 {
        let uuid = calculate_uuid(name);
        if let Some(&id) = self.by_uuid.get(&uuid) {
            return id;
        }
        let id = OFFSET_UUID + i32::try_from(self.entries.len()).unwrap_or(i32::MAX - OFFSET_UUID);
        self.entries.push((name.to_owned(), uuid));
        self.by_uuid.insert(uuid, id);
        id
    }

    /// Returns the number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, id: i32) -> Option<&(String, Uuid)> {
        let index = usize::try_from(id.checked_sub(OFFSET_UUID)?).ok()?;
        self.entries.get(index)
    }

    /// Returns the UUID of a registered ID.
    #[must_use]
    pub fn uuid(&self, id: i32) -> Option<Uuid> {
        self.entry(id).map(|(_, uuid)| *uuid)
    }

    /// Returns the name of a registered ID.
    #[must_use]
    pub fn name(&self, id: i32) -> Option<&str> {
        self.entry(id).map(|(name, _)| name.as_str())
    }

    /// Looks up the ID registered for `uuid`.
    #[must_use]
    pub fn lookup(&self, uuid: &Uuid) -> Option<i32> {
        self.by_uuid.get(uuid).copied()
    }

    /// Reads 16 raw bytes and resolves them.
    pub fn unpack_uuid(&self, unpacker: &mut Unpacker<'_>) -> UuidLookup {
        let Some(raw) = unpacker.get_raw(16) else {
            return UuidLookup::Invalid;
        };
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(raw);
        let uuid = Uuid::from_bytes(bytes);
        match self.lookup(&uuid) {
            Some(id) => UuidLookup::Known(id),
            None => UuidLookup::Unknown(uuid),
        }
    }

    /// Writes the UUID of a registered ID. Returns false for unknown IDs.
    pub fn pack_uuid(&self, id: i32, packer: &mut Packer) -> bool {
        match self.uuid(id) {
            Some(uuid) => packer.add_raw(uuid.as_bytes()),
            None => false,
        }
    }
}
