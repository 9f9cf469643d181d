//! # Memory Management
//!
//! Pre-allocated pools handed out by the server core.
//!
//! All slots are allocated once at startup. During a tick:
//! - No heap allocations
//! - Bounded capacity, exhaustion is a fatal bug

mod id_pool;

pub use id_pool::{IdState, SnapIdPool, ID_GRACE_PERIOD, MAX_IDS};
