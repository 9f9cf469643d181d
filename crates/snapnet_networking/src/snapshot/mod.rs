//! # Snapshot System
//!
//! Server-side snapshot production and delta encoding.
//!
//! ## Pipeline
//!
//! ```text
//! game logic ──▶ SnapshotBuilder ──▶ Snapshot ──▶ SnapshotHistory (per client)
//!                                       │
//!             acked base (or empty) ────┤
//!                                       ▼
//!                                 create_delta ──▶ DeltaCodec ──▶ wire
//! ```

mod builder;
mod codec;
mod delta;
mod history;
mod item;

pub use builder::{extended_wire_type, SnapshotBuilder};
pub use codec::{DeltaCodec, Lz4Codec, VarIntCodec};
pub use delta::{apply_delta, create_delta, ItemSizes, MAX_NETOBJSIZES};
pub use history::{HistoryEntry, SnapshotHistory};
pub use item::{item_key, SnapItem, Snapshot, MAX_ITEM_KEY_PART, MAX_SNAPSHOT_ITEMS, MAX_SNAPSHOT_SIZE};
