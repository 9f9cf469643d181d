//! # In-Process Transport
//!
//! A [`Transport`] backed by queues. Tests hold a [`MemoryLink`] to inject
//! events as if peers were talking and to inspect what the server sent.

use super::{ChunkFlags, NetEvent, SendTarget, Transport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A chunk the server handed to the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentChunk {
    /// Destination.
    pub target: SendTarget,
    /// Chunk bytes.
    pub data: Vec<u8>,
    /// Delivery flags.
    pub flags: ChunkFlags,
}

#[derive(Debug, Default)]
struct LinkState {
    inbound: VecDeque<NetEvent>,
    sent: Vec<SentChunk>,
    dropped: Vec<(usize, String)>,
    addrs: Vec<Option<SocketAddr>>,
    timed_out: Vec<bool>,
    waits: usize,
}

/// Test-side handle of a [`MemoryTransport`].
#[derive(Clone, Debug, Default)]
pub struct MemoryLink {
    inner: Arc<Mutex<LinkState>>,
}

impl MemoryLink {
    fn push(&self, event: NetEvent) {
        self.inner.lock().inbound.push_back(event);
    }

    fn set_addr(&self, cid: usize, addr: Option<SocketAddr>) {
        let mut state = self.inner.lock();
        if state.addrs.len() <= cid {
            state.addrs.resize(cid + 1, None);
            state.timed_out.resize(cid + 1, false);
        }
        state.addrs[cid] = addr;
        state.timed_out[cid] = false;
    }

    /// Connects a peer with a security token.
    pub fn connect(&self, cid: usize, addr: SocketAddr, sixup: bool) {
        self.set_addr(cid, Some(addr));
        self.push(NetEvent::Connected { cid, addr, sixup });
    }

    /// Connects a legacy peer without a security token.
    pub fn connect_no_auth(&self, cid: usize, addr: SocketAddr) {
        self.set_addr(cid, Some(addr));
        self.push(NetEvent::ConnectedNoAuth { cid, addr });
    }

    /// Restarts the session of a connected peer.
    pub fn rejoin(&self, cid: usize) {
        self.push(NetEvent::Rejoined { cid });
    }

    /// Disconnects a peer from its side.
    pub fn disconnect(&self, cid: usize, reason: &str) {
        self.set_addr(cid, None);
        self.push(NetEvent::Disconnected { cid, reason: reason.to_owned() });
    }

    /// Marks a slot as timed out so it can be taken over.
    pub fn time_out(&self, cid: usize) {
        let mut state = self.inner.lock();
        if let Some(flag) = state.timed_out.get_mut(cid) {
            *flag = true;
            state.inbound.push_back(NetEvent::TimedOut { cid });
        }
    }

    /// Delivers a chunk from a connected peer.
    pub fn send_chunk(&self, cid: usize, data: Vec<u8>, vital: bool) {
        self.push(NetEvent::Chunk { cid, data, vital });
    }

    /// Delivers a connectionless datagram.
    pub fn send_connless(&self, addr: SocketAddr, data: Vec<u8>) {
        self.push(NetEvent::Connless { addr, data });
    }

    /// Takes everything the server sent since the last call.
    #[must_use]
    pub fn take_sent(&self) -> Vec<SentChunk> {
        std::mem::take(&mut self.inner.lock().sent)
    }

    /// Takes the server-initiated drops since the last call.
    #[must_use]
    pub fn take_dropped(&self) -> Vec<(usize, String)> {
        std::mem::take(&mut self.inner.lock().dropped)
    }

    /// Number of times the server waited on the transport.
    #[must_use]
    pub fn waits(&self) -> usize {
        self.inner.lock().waits
    }
}

/// Queue-backed transport.
#[derive(Debug)]
pub struct MemoryTransport {
    link: MemoryLink,
    max_clients: usize,
}

impl MemoryTransport {
    /// Creates a transport with `max_clients` slots and its test handle.
    #[must_use]
    pub fn new(max_clients: usize) -> (Self, MemoryLink) {
        let link = MemoryLink::default();
        (Self { link: link.clone(), max_clients }, link)
    }
}

impl Transport for MemoryTransport {
    fn max_clients(&self) -> usize {
        self.max_clients
    }

    fn update(&mut self, _now: Instant) {}

    fn recv(&mut self) -> Option<NetEvent> {
        self.link.inner.lock().inbound.pop_front()
    }

    fn send(&mut self, target: SendTarget, data: &[u8], flags: ChunkFlags) {
        self.link.inner.lock().sent.push(SentChunk { target, data: data.to_vec(), flags });
    }

    fn drop_client(&mut self, cid: usize, reason: &str) {
        self.link.set_addr(cid, None);
        self.link.inner.lock().dropped.push((cid, reason.to_owned()));
    }

    fn client_addr(&self, cid: usize) -> Option<SocketAddr> {
        self.link.inner.lock().addrs.get(cid).copied().flatten()
    }

    fn set_timed_out(&mut self, cid: usize, from: usize) -> bool {
        let mut state = self.link.inner.lock();
        let can_take = state.timed_out.get(cid).copied().unwrap_or(false)
            && state.addrs.get(from).copied().flatten().is_some();
        if can_take {
            state.timed_out[cid] = false;
            state.addrs[cid] = state.addrs[from];
            state.addrs[from] = None;
        }
        can_take
    }

    fn wait(&mut self, _timeout: Duration) {
        self.link.inner.lock().waits += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[test]
    fn test_events_in_order() {
        let (mut transport, link) = MemoryTransport::new(4);
        link.connect(1, addr(), false);
        link.send_chunk(1, vec![1, 2], true);

        assert!(matches!(transport.recv(), Some(NetEvent::Connected { cid: 1, .. })));
        assert!(matches!(transport.recv(), Some(NetEvent::Chunk { cid: 1, vital: true, .. })));
        assert!(transport.recv().is_none());
        assert_eq!(transport.client_addr(1), Some(addr()));
    }

    #[test]
    fn test_sent_and_dropped_recorded() {
        let (mut transport, link) = MemoryTransport::new(4);
        link.connect(0, addr(), false);
        transport.send(SendTarget::Client(0), &[9], ChunkFlags::VITAL);
        transport.drop_client(0, "bye");

        let sent = link.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].data, vec![9]);
        assert_eq!(link.take_dropped(), vec![(0, "bye".to_owned())]);
        assert_eq!(transport.client_addr(0), None);
    }

    #[test]
    fn test_takeover_requires_timed_out_slot() {
        let (mut transport, link) = MemoryTransport::new(4);
        link.connect(0, addr(), false);
        link.connect(1, "127.0.0.1:4001".parse().unwrap(), false);
        assert!(!transport.set_timed_out(0, 1));

        link.time_out(0);
        assert!(transport.set_timed_out(0, 1));
        assert_eq!(transport.client_addr(0), Some("127.0.0.1:4001".parse().unwrap()));
        assert_eq!(transport.client_addr(1), None);
    }
}
