//! # Snapshot Delta Engine
//!
//! Field-level difference between two snapshots.
//!
//! ## Delta Layout (little-endian i32 words)
//!
//! ```text
//! num_deleted │ num_updates │ num_temp (0)
//! deleted keys ...
//! updates: type │ id │ [size, unless the type has a static size] │ words ...
//! ```
//!
//! An update for an item present in the base carries per-word wrapping
//! differences (`to - from`); an item absent from the base carries its full
//! payload. Applying a delta yields canonical order, so
//! `apply_delta(a, &create_delta(a, b)) == b` byte for byte.

use super::item::{item_key, SnapItem, Snapshot, MAX_ITEM_KEY_PART, MAX_SNAPSHOT_ITEMS, MAX_SNAPSHOT_SIZE};
use crate::error::SnapshotError;
use std::collections::HashSet;

/// Number of item types that can be declared static-size.
pub const MAX_NETOBJSIZES: usize = 64;

/// Per-type payload sizes, in words, for types whose size is implied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ItemSizes {
    sizes: [Option<usize>; MAX_NETOBJSIZES],
}

impl ItemSizes {
    /// A table with no static sizes.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sizes: [None; MAX_NETOBJSIZES],
        }
    }

    /// Declares the payload size of `item_type`.
    ///
    /// Returns false when the type does not fit the table.
    pub fn set(&mut self, item_type: i32, words: usize) -> bool {
        match usize::try_from(item_type).ok().and_then(|t| self.sizes.get_mut(t)) {
            Some(slot) => {
                *slot = Some(words);
                true
            }
            None => false,
        }
    }

    /// Static size of `item_type`, if declared.
    #[must_use]
    pub fn get(&self, item_type: i32) -> Option<usize> {
        usize::try_from(item_type)
            .ok()
            .and_then(|t| self.sizes.get(t).copied().flatten())
    }
}

impl Default for ItemSizes {
    fn default() -> Self {
        Self::new()
    }
}

fn push_word(out: &mut Vec<u8>, word: i32) {
    out.extend_from_slice(&word.to_le_bytes());
}

fn usize_word(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Computes the delta that turns `from` into `to`.
///
/// # Returns
///
/// The delta bytes, empty when both snapshots are identical.
#[must_use]
pub fn create_delta(from: &Snapshot, to: &Snapshot, sizes: &ItemSizes) -> Vec<u8> {
    let deleted: Vec<i32> = from
        .items()
        .iter()
        .map(SnapItem::key)
        .filter(|&key| to.find(key).is_none())
        .collect();

    let mut updates = Vec::new();
    let mut num_updates = 0usize;
    let mut diff = Vec::new();

    for item in to.items() {
        let data = item.data();
        let past = from.find(item.key()).map(SnapItem::data);

        if let Some(past) = past {
            diff.clear();
            diff.extend(
                data.iter()
                    .enumerate()
                    .map(|(i, &word)| word.wrapping_sub(past.get(i).copied().unwrap_or(0))),
            );
            if past.len() == data.len() && diff.iter().all(|&word| word == 0) {
                continue;
            }
        }

        push_word(&mut updates, item.item_type());
        push_word(&mut updates, item.id());
        if sizes.get(item.item_type()).is_none() {
            push_word(&mut updates, usize_word(data.len()));
        }
        let words: &[i32] = if past.is_some() { &diff } else { data };
        for &word in words {
            push_word(&mut updates, word);
        }
        num_updates += 1;
    }

    if deleted.is_empty() && num_updates == 0 {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(12 + deleted.len() * 4 + updates.len());
    push_word(&mut out, usize_word(deleted.len()));
    push_word(&mut out, usize_word(num_updates));
    push_word(&mut out, 0);
    for key in deleted {
        push_word(&mut out, key);
    }
    out.extend_from_slice(&updates);
    out
}

/// Reader over the delta words.
struct Words<'a> {
    words: &'a [u8],
    position: usize,
}

impl Words<'_> {
    fn next(&mut self) -> Result<i32, SnapshotError> {
        let bytes = self
            .words
            .get(self.position..self.position + 4)
            .ok_or(SnapshotError::Truncated)?;
        self.position += 4;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn count(&mut self) -> Result<usize, SnapshotError> {
        usize::try_from(self.next()?).map_err(|_| SnapshotError::InvalidHeader)
    }

    fn is_done(&self) -> bool {
        self.position >= self.words.len()
    }
}

/// Reconstructs the snapshot `delta` was computed towards.
///
/// An empty delta returns `from` unchanged.
///
/// # Errors
///
/// Any structural problem in the delta: truncation, negative counts, keys or
/// sizes out of range, or a result that would exceed the snapshot limits.
pub fn apply_delta(from: &Snapshot, delta: &[u8], sizes: &ItemSizes) -> Result<Snapshot, SnapshotError> {
    if delta.is_empty() {
        return Ok(from.clone());
    }
    if delta.len() % 4 != 0 {
        return Err(SnapshotError::Truncated);
    }

    let mut reader = Words { words: delta, position: 0 };
    let num_deleted = reader.count()?;
    let num_updates = reader.count()?;
    let num_temp = reader.count()?;
    if num_temp != 0 || num_deleted > MAX_SNAPSHOT_ITEMS || num_updates > MAX_SNAPSHOT_ITEMS {
        return Err(SnapshotError::InvalidHeader);
    }

    let mut deleted = HashSet::with_capacity(num_deleted);
    for _ in 0..num_deleted {
        deleted.insert(reader.next()?);
    }

    let mut items: Vec<SnapItem> = from
        .items()
        .iter()
        .filter(|item| !deleted.contains(&item.key()))
        .cloned()
        .collect();

    for _ in 0..num_updates {
        let item_type = reader.next()?;
        let id = reader.next()?;
        if !(0..=MAX_ITEM_KEY_PART).contains(&item_type) || !(0..=MAX_ITEM_KEY_PART).contains(&id) {
            return Err(SnapshotError::ItemOutOfRange { item_type, id });
        }
        let size = match sizes.get(item_type) {
            Some(size) => size,
            None => reader.count().map_err(|_| SnapshotError::ItemOutOfRange { item_type, id })?,
        };
        if size * 4 > MAX_SNAPSHOT_SIZE {
            return Err(SnapshotError::ItemOutOfRange { item_type, id });
        }

        let key = item_key(item_type, id);
        let past = from.find(key).map(SnapItem::data);
        let mut data = Vec::with_capacity(size);
        for i in 0..size {
            let word = reader.next()?;
            data.push(match past {
                Some(past) => word.wrapping_add(past.get(i).copied().unwrap_or(0)),
                None => word,
            });
        }

        match items.iter_mut().find(|item| item.key() == key) {
            Some(existing) => *existing = SnapItem::from_key(key, data),
            None => items.push(SnapItem::from_key(key, data)),
        }
    }

    if !reader.is_done() {
        return Err(SnapshotError::TrailingData);
    }

    let snapshot = Snapshot::from_items(items);
    if snapshot.num_items() > MAX_SNAPSHOT_ITEMS || snapshot.serialized_size() > MAX_SNAPSHOT_SIZE {
        return Err(SnapshotError::TooLarge);
    }
    Ok(snapshot)
}
