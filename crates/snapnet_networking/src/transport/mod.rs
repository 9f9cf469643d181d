//! # Transport Layer
//!
//! Session transport consumed by the server core.
//!
//! ## Contract
//!
//! - Ordered, reliable delivery of chunks flagged [`ChunkFlags::VITAL`]
//! - Best-effort delivery of everything else
//! - Connectionless datagrams for server-info queries
//! - Per-connection slot IDs in `0..max_clients`, connection events, loss
//!   detection (a timed-out peer produces [`NetEvent::Disconnected`])
//! - Timeout takeover: a reconnecting client may adopt a timed-out slot
//!
//! [`UdpTransport`] is the production implementation, [`MemoryTransport`] an
//! in-process one for tests.

mod ban;
mod memory;
mod udp;

pub use ban::{BanEntry, NetBan};
pub use memory::{MemoryLink, MemoryTransport, SentChunk};
pub use udp::{ReliabilityLayer, TransportStats, UdpTransport};

use std::net::SocketAddr;
use std::ops::BitOr;
use std::time::{Duration, Instant};

/// Delivery flags of an outgoing chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChunkFlags(u8);

impl ChunkFlags {
    /// Best effort, may be batched.
    pub const NONE: Self = Self(0);
    /// Reliable and ordered.
    pub const VITAL: Self = Self(1);
    /// Send the pending batch immediately.
    pub const FLUSH: Self = Self(2);

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Builds flags from raw bits, ignoring unknown ones.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0b11)
    }

    /// Returns true if every flag of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true for reliable chunks.
    #[inline]
    #[must_use]
    pub const fn is_vital(self) -> bool {
        self.contains(Self::VITAL)
    }
}

impl BitOr for ChunkFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Destination of an outgoing chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SendTarget {
    /// A connected slot.
    Client(usize),
    /// A connectionless datagram.
    Addr(SocketAddr),
}

/// Something the transport observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetEvent {
    /// A peer completed the token handshake.
    Connected {
        /// Slot assigned.
        cid: usize,
        /// Peer address.
        addr: SocketAddr,
        /// Peer speaks the 0.7 protocol.
        sixup: bool,
    },
    /// A legacy peer connected without a security token.
    ConnectedNoAuth {
        /// Slot assigned.
        cid: usize,
        /// Peer address.
        addr: SocketAddr,
    },
    /// A connected peer restarted its session on the same slot.
    Rejoined {
        /// Slot of the peer.
        cid: usize,
    },
    /// A peer stopped answering; its slot may be taken over until it is
    /// finally disconnected.
    TimedOut {
        /// Slot of the silent peer.
        cid: usize,
    },
    /// A peer left or timed out.
    Disconnected {
        /// Slot that is now free.
        cid: usize,
        /// Human-readable reason.
        reason: String,
    },
    /// A chunk from a connected peer.
    Chunk {
        /// Sender slot.
        cid: usize,
        /// Chunk payload.
        data: Vec<u8>,
        /// Delivered through the reliable channel.
        vital: bool,
    },
    /// A connectionless datagram.
    Connless {
        /// Sender address.
        addr: SocketAddr,
        /// Datagram payload.
        data: Vec<u8>,
    },
}

/// Session transport.
pub trait Transport: Send {
    /// Number of slots.
    fn max_clients(&self) -> usize;

    /// Services resends, keepalives and timeouts.
    fn update(&mut self, now: Instant);

    /// Returns the next pending event.
    fn recv(&mut self) -> Option<NetEvent>;

    /// Queues a chunk.
    fn send(&mut self, target: SendTarget, data: &[u8], flags: ChunkFlags);

    /// Closes a connection with a reason shown to the peer.
    ///
    /// No [`NetEvent::Disconnected`] is produced for drops initiated here.
    fn drop_client(&mut self, cid: usize, reason: &str);

    /// Address of a connected slot.
    fn client_addr(&self, cid: usize) -> Option<SocketAddr>;

    /// Moves the live connection of slot `from` into the timed-out slot `cid`.
    ///
    /// Slot `from` is left empty without an event. Returns false when `cid`
    /// is not a timed-out connection.
    fn set_timed_out(&mut self, cid: usize, from: usize) -> bool;

    /// Blocks until data arrives or `timeout` elapses.
    fn wait(&mut self, timeout: Duration);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_flags() {
        let flags = ChunkFlags::VITAL | ChunkFlags::FLUSH;
        assert!(flags.is_vital());
        assert!(flags.contains(ChunkFlags::FLUSH));
        assert!(!ChunkFlags::FLUSH.is_vital());
        assert_eq!(ChunkFlags::from_bits(0xff), flags);
        assert_eq!(flags.bits(), 3);
    }
}
