//! # Snapshot Builder
//!
//! Accumulates the items of one tick for one recipient.
//!
//! Items are appended in call order with no deduplication; the game logic must
//! not emit the same `(type, id)` twice in one build. [`SnapshotBuilder::finish`]
//! hands back the snapshot in canonical order.

use super::delta::ItemSizes;
use super::item::{SnapItem, Snapshot, MAX_ITEM_KEY_PART, MAX_SNAPSHOT_ITEMS, MAX_SNAPSHOT_SIZE};
use crate::error::SnapshotError;
use crate::protocol::{Protocol, UuidManager, OFFSET_UUID};
use std::sync::Arc;

/// Wire type of the `index`-th extended type in a snapshot.
#[inline]
#[must_use]
pub const fn extended_wire_type(index: usize) -> i32 {
    0x7fff - index as i32
}

/// Per-tick snapshot accumulator.
pub struct SnapshotBuilder {
    items: Vec<SnapItem>,
    /// Serialized size of everything added so far, header included.
    size: usize,
    protocol: Protocol,
    uuids: Arc<UuidManager>,
    sizes: ItemSizes,
    /// Extended types seen this build, in registration order.
    extended: Vec<i32>,
}

impl SnapshotBuilder {
    /// Creates a builder resolving extended types through `uuids`.
    #[must_use]
    pub fn new(uuids: Arc<UuidManager>, sizes: ItemSizes) -> Self {
        Self {
            items: Vec::with_capacity(64),
            size: 8,
            protocol: Protocol::Legacy,
            uuids,
            sizes,
            extended: Vec::new(),
        }
    }

    /// Starts a new build for a recipient speaking `protocol`.
    pub fn init(&mut self, protocol: Protocol) {
        self.items.clear();
        self.extended.clear();
        self.size = 8;
        self.protocol = protocol;
    }

    /// Number of items added so far.
    #[must_use]
    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    /// Static item sizes the builder validates against.
    #[must_use]
    pub const fn item_sizes(&self) -> &ItemSizes {
        &self.sizes
    }

    fn reserve(&mut self, words: usize) -> Result<(), SnapshotError> {
        // key + payload + offset entry
        let bytes = (words + 2) * 4;
        if self.items.len() >= MAX_SNAPSHOT_ITEMS || self.size + bytes > MAX_SNAPSHOT_SIZE {
            return Err(SnapshotError::Full);
        }
        self.size += bytes;
        Ok(())
    }

    fn push(&mut self, wire_type: i32, id: i32, words: usize) -> Result<&mut [i32], SnapshotError> {
        self.reserve(words)?;
        self.items.push(SnapItem::new(wire_type, id, vec![0; words]));
        let last = self.items.len() - 1;
        Ok(self.items[last].data_mut())
    }

    /// Wire type for an extended type, registering its type-info item on first use.
    fn extended_type(&mut self, item_type: i32) -> Result<i32, SnapshotError> {
        if let Some(index) = self.extended.iter().position(|&t| t == item_type) {
            return Ok(extended_wire_type(index));
        }
        let uuid = self
            .uuids
            .uuid(item_type)
            .ok_or(SnapshotError::UnknownType(item_type))?;

        let index = self.extended.len();
        let wire_type = extended_wire_type(index);
        let info = self.push(0, wire_type, 4)?;
        for (word, chunk) in info.iter_mut().zip(uuid.as_bytes().chunks_exact(4)) {
            *word = i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        self.extended.push(item_type);
        Ok(wire_type)
    }

    /// Appends an item and returns its zeroed payload.
    ///
    /// # Errors
    ///
    /// - `id` outside `0..=0xFFFF`, or `item_type` zero or negative
    /// - extended type unknown, or sent to a sixup recipient
    /// - payload length contradicts the type's static size
    /// - builder out of capacity
    pub fn new_item(&mut self, item_type: i32, id: i32, words: usize) -> Result<&mut [i32], SnapshotError> {
        if !(0..=MAX_ITEM_KEY_PART).contains(&id) {
            return Err(SnapshotError::InvalidId(id));
        }
        if item_type <= 0 || (item_type > MAX_ITEM_KEY_PART && item_type < OFFSET_UUID) {
            return Err(SnapshotError::UnknownType(item_type));
        }
        if let Some(expected) = self.sizes.get(item_type) {
            if expected != words {
                return Err(SnapshotError::StaticSizeMismatch { item_type, expected, actual: words });
            }
        }

        let wire_type = if item_type >= OFFSET_UUID {
            if self.protocol.is_sixup() {
                return Err(SnapshotError::UnknownType(item_type));
            }
            self.extended_type(item_type)?
        } else {
            item_type
        };
        self.push(wire_type, id, words)
    }

    /// Completes the build.
    ///
    /// # Panics
    ///
    /// Panics if the snapshot exceeds [`MAX_SNAPSHOT_SIZE`]; truncating would
    /// corrupt every delta computed from it.
    pub fn finish(&mut self) -> Snapshot {
        let snapshot = Snapshot::from_items(std::mem::take(&mut self.items));
        assert!(
            snapshot.serialized_size() <= MAX_SNAPSHOT_SIZE,
            "snapshot of {} bytes exceeds maximum size",
            snapshot.serialized_size()
        );
        self.extended.clear();
        self.size = 8;
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::calculate_uuid;

    fn builder() -> SnapshotBuilder {
        SnapshotBuilder::new(Arc::new(UuidManager::new()), ItemSizes::new())
    }

    #[test]
    fn test_items_written() {
        let mut b = builder();
        b.init(Protocol::Legacy);
        b.new_item(3, 1, 2).unwrap().copy_from_slice(&[10, 20]);
        b.new_item(2, 4, 1).unwrap()[0] = -1;
        let snap = b.finish();

        assert_eq!(snap.num_items(), 2);
        assert_eq!(snap.items()[0].item_type(), 2);
        assert_eq!(snap.items()[1].data(), &[10, 20]);
    }

    #[test]
    fn test_invalid_id_rejected() {
        let mut b = builder();
        b.init(Protocol::Legacy);
        assert_eq!(b.new_item(1, 0x1_0000, 1).err(), Some(SnapshotError::InvalidId(0x1_0000)));
        assert_eq!(b.new_item(1, -1, 1).err(), Some(SnapshotError::InvalidId(-1)));
    }

    #[test]
    fn test_capacity_exhausted() {
        let mut b = builder();
        b.init(Protocol::Legacy);
        for id in 0..MAX_SNAPSHOT_ITEMS {
            b.new_item(1, id as i32, 0).unwrap();
        }
        assert_eq!(b.new_item(1, 0, 0).err(), Some(SnapshotError::Full));
    }

    #[test]
    fn test_size_limit() {
        let mut b = builder();
        b.init(Protocol::Legacy);
        assert_eq!(b.new_item(1, 0, MAX_SNAPSHOT_SIZE / 4).err(), Some(SnapshotError::Full));
        assert!(b.new_item(1, 0, 100).is_ok());
    }

    #[test]
    fn test_static_size_enforced() {
        let mut sizes = ItemSizes::new();
        sizes.set(5, 3);
        let mut b = SnapshotBuilder::new(Arc::new(UuidManager::new()), sizes);
        b.init(Protocol::Legacy);
        assert!(matches!(
            b.new_item(5, 0, 2),
            Err(SnapshotError::StaticSizeMismatch { expected: 3, actual: 2, .. })
        ));
        assert!(b.new_item(5, 0, 3).is_ok());
    }

    #[test]
    fn test_extended_type_registers_info_item() {
        let mut uuids = UuidManager::new();
        let ext = uuids.register("my-object@example.org");
        let mut b = SnapshotBuilder::new(Arc::new(uuids), ItemSizes::new());

        b.init(Protocol::Legacy);
        b.new_item(ext, 1, 2).unwrap();
        b.new_item(ext, 2, 2).unwrap();
        let snap = b.finish();

        // one type-info item plus two objects
        assert_eq!(snap.num_items(), 3);
        let info = &snap.items()[0];
        assert_eq!(info.item_type(), 0);
        assert_eq!(info.id(), 0x7fff);
        let uuid = calculate_uuid("my-object@example.org");
        assert_eq!(info.data()[0], i32::from_be_bytes(uuid.as_bytes()[0..4].try_into().unwrap()));
        assert!(snap.items()[1..].iter().all(|item| item.item_type() == 0x7fff));

        b.init(Protocol::Sixup);
        assert!(b.new_item(ext, 1, 2).is_err());
    }

    #[test]
    fn test_finish_resets_builder() {
        let mut b = builder();
        b.init(Protocol::Legacy);
        b.new_item(1, 1, 1).unwrap();
        let _ = b.finish();
        assert_eq!(b.num_items(), 0);
        b.init(Protocol::Legacy);
        assert!(b.finish().is_empty());
    }
}
