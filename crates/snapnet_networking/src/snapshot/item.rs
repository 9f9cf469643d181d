//! # Snapshot Items
//!
//! A snapshot is a list of items, each a key (`type << 16 | id`) and a
//! fixed-layout payload of `i32` words. Snapshots are kept in canonical order
//! (sorted by key) so equal worlds serialize to equal bytes.
//!
//! ## Serialized Layout
//!
//! ```text
//! ┌───────────┬───────────┬────────────────────┬──────────────────────────┐
//! │ data_size │ num_items │ offsets[num_items] │ items: key, payload ...  │
//! └───────────┴───────────┴────────────────────┴──────────────────────────┘
//! all fields little-endian i32, offsets relative to the item area
//! ```

/// Hard upper bound of a serialized snapshot.
pub const MAX_SNAPSHOT_SIZE: usize = 64 * 1024;

/// Maximum number of items in one snapshot.
pub const MAX_SNAPSHOT_ITEMS: usize = 1024;

/// Largest item type or ID representable in a key.
pub const MAX_ITEM_KEY_PART: i32 = 0xFFFF;

/// Builds an item key.
#[inline]
#[must_use]
pub const fn item_key(item_type: i32, id: i32) -> i32 {
    (item_type << 16) | (id & 0xFFFF)
}

/// One typed, identified snapshot item.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SnapItem {
    key: i32,
    data: Vec<i32>,
}

impl SnapItem {
    /// Creates an item.
    #[must_use]
    pub fn new(item_type: i32, id: i32, data: Vec<i32>) -> Self {
        Self {
            key: item_key(item_type, id),
            data,
        }
    }

    /// Creates an item from a raw key.
    #[must_use]
    pub const fn from_key(key: i32, data: Vec<i32>) -> Self {
        Self { key, data }
    }

    /// Combined type and ID.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> i32 {
        self.key
    }

    /// Item type.
    #[inline]
    #[must_use]
    pub const fn item_type(&self) -> i32 {
        (self.key >> 16) & 0xFFFF
    }

    /// Item ID.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> i32 {
        self.key & 0xFFFF
    }

    /// Payload words.
    #[inline]
    #[must_use]
    pub fn data(&self) -> &[i32] {
        &self.data
    }

    /// Mutable payload words.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [i32] {
        &mut self.data
    }

    /// Serialized size including the key.
    #[inline]
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        (self.data.len() + 1) * 4
    }
}

/// A complete snapshot in canonical order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    items: Vec<SnapItem>,
}

impl Snapshot {
    /// The canonical empty snapshot, used as delta base when none is acked.
    #[must_use]
    pub const fn empty() -> Self {
        Self { items: Vec::new() }
    }

    /// Creates a snapshot, sorting items into canonical order.
    #[must_use]
    pub fn from_items(mut items: Vec<SnapItem>) -> Self {
        items.sort_by_key(SnapItem::key);
        Self { items }
    }

    /// Items in canonical order.
    #[inline]
    #[must_use]
    pub fn items(&self) -> &[SnapItem] {
        &self.items
    }

    /// Number of items.
    #[inline]
    #[must_use]
    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the snapshot holds no items.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Finds an item by key.
    #[must_use]
    pub fn find(&self, key: i32) -> Option<&SnapItem> {
        self.items
            .binary_search_by_key(&key, SnapItem::key)
            .ok()
            .map(|index| &self.items[index])
    }

    /// Size of the item area in bytes.
    #[must_use]
    pub fn data_size(&self) -> usize {
        self.items.iter().map(SnapItem::size_bytes).sum()
    }

    /// Total serialized size in bytes.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        8 + self.items.len() * 4 + self.data_size()
    }

    /// Integrity checksum: wrapping sum of every payload word.
    #[must_use]
    pub fn crc(&self) -> i32 {
        self.items
            .iter()
            .flat_map(|item| item.data.iter())
            .fold(0i32, |acc, &word| acc.wrapping_add(word))
    }

    /// Serializes to the flat layout.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_size());
        let push = |out: &mut Vec<u8>, word: i32| out.extend_from_slice(&word.to_le_bytes());

        push(&mut out, len_to_i32(self.data_size()));
        push(&mut out, len_to_i32(self.items.len()));
        let mut offset = 0;
        for item in &self.items {
            push(&mut out, len_to_i32(offset));
            offset += item.size_bytes();
        }
        for item in &self.items {
            push(&mut out, item.key);
            for &word in &item.data {
                push(&mut out, word);
            }
        }
        out
    }

    /// Parses the flat layout.
    ///
    /// Returns `None` for any structural inconsistency.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 4 != 0 || bytes.len() < 8 || bytes.len() > MAX_SNAPSHOT_SIZE {
            return None;
        }
        let words: Vec<i32> = bytes
            .chunks_exact(4)
            .map(|w| i32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();

        let data_size = usize::try_from(words[0]).ok()?;
        let num_items = usize::try_from(words[1]).ok()?;
        if num_items > MAX_SNAPSHOT_ITEMS || 8 + num_items * 4 + data_size != bytes.len() {
            return None;
        }

        let offsets = &words[2..2 + num_items];
        let item_area = &words[2 + num_items..];
        let mut items = Vec::with_capacity(num_items);
        for (index, &offset) in offsets.iter().enumerate() {
            let start = usize::try_from(offset).ok()?;
            let end = match offsets.get(index + 1) {
                Some(&next) => usize::try_from(next).ok()?,
                None => data_size,
            };
            if start % 4 != 0 || end % 4 != 0 || end < start + 4 || end > data_size {
                return None;
            }
            let item_words = &item_area[start / 4..end / 4];
            items.push(SnapItem::from_key(item_words[0], item_words[1..].to_vec()));
        }
        if offsets.first().is_some_and(|&first| first != 0) {
            return None;
        }
        Some(Self { items })
    }
}

fn len_to_i32(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}
