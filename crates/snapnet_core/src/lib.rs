//! # Snapnet Core
//!
//! Engine-agnostic building blocks shared by the snapshot server:
//! - Snapshot ID pool with a timed reuse barrier
//! - Clock abstraction for deterministic tick scheduling
//!
//! ## Example
//!
//! ```rust
//! use snapnet_core::{Clock, ManualClock, SnapIdPool};
//!
//! let clock = ManualClock::new();
//! let mut pool = SnapIdPool::with_capacity(16);
//! let id = pool.allocate(clock.now());
//! pool.free(id, clock.now());
//! // `id` stays reserved for the next five seconds of clock time
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod memory;
pub mod time;

pub use memory::{IdState, SnapIdPool, ID_GRACE_PERIOD, MAX_IDS};
pub use time::{Clock, ManualClock, SystemClock};
