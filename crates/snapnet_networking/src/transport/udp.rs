//! # UDP Session Transport
//!
//! Thin session layer over one non-blocking UDP socket.
//!
//! ## Packet Layout
//!
//! ```text
//! CONNLESS   0 | payload
//! CONNECT    1 | flags
//! ACCEPT     2 | token:u32
//! CLOSE      3 | token:u32 | reason
//! DATA       4 | token:u32 | ack:u16 | count:u8 | chunks
//! KEEPALIVE  5 | token:u32 | ack:u16
//!
//! chunk: flags:u8 | len:u16 | [seq:u16 if vital] | data
//! ```
//!
//! Vital chunks carry a sequence number and are accepted strictly in order;
//! the receiver acknowledges cumulatively. All integers are little-endian.

use super::{ChunkFlags, NetEvent, SendTarget, Transport};
use crate::MAX_PACKET_SIZE;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};
use tracing::debug;

const PACKET_CONNLESS: u8 = 0;
const PACKET_CONNECT: u8 = 1;
const PACKET_ACCEPT: u8 = 2;
const PACKET_CLOSE: u8 = 3;
const PACKET_DATA: u8 = 4;
const PACKET_KEEPALIVE: u8 = 5;

const CONNECT_FLAG_SIXUP: u8 = 1;
const CONNECT_FLAG_NO_TOKEN: u8 = 2;

const CHUNK_FLAG_VITAL: u8 = 1;

/// DATA header: kind + token + ack + count.
const DATA_HEADER_SIZE: usize = 8;

/// Silence after which a connection counts as timed out.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
/// How long a timed-out connection waits to be taken over.
const TAKEOVER_GRACE: Duration = Duration::from_secs(20);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Returns true if sequence `a` is at or before `b`, modulo wrap.
#[inline]
const fn seq_at_or_before(a: u16, b: u16) -> bool {
    (b.wrapping_sub(a) as i16) >= 0
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransportStats {
    /// Packets sent.
    pub packets_sent: u64,
    /// Packets received.
    pub packets_received: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Send errors.
    pub send_errors: u64,
    /// Receive errors.
    pub recv_errors: u64,
    /// Vital chunks resent.
    pub resends: u64,
}

/// Reliable, ordered chunk channel of one connection.
pub struct ReliabilityLayer {
    /// Sent vital chunks not yet acknowledged, oldest first.
    pending: VecDeque<PendingChunk>,
    /// Last sequence number assigned.
    sequence: u16,
    /// Last sequence number received in order.
    ack: u16,
    resend_timeout: Duration,
}

#[derive(Clone)]
struct PendingChunk {
    sequence: u16,
    /// Encoded chunk, header included.
    data: Vec<u8>,
    first_sent: Instant,
    sent_time: Instant,
}

impl ReliabilityLayer {
    /// Creates a channel with a 100 ms resend timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: VecDeque::with_capacity(32),
            sequence: 0,
            ack: 0,
            resend_timeout: Duration::from_millis(100),
        }
    }

    /// Assigns the next sequence number to a vital chunk.
    ///
    /// `encode` receives the sequence number and returns the encoded chunk,
    /// a copy of which is kept for resending.
    pub fn send_reliable(&mut self, now: Instant, encode: impl FnOnce(u16) -> Vec<u8>) -> Vec<u8> {
        self.sequence = self.sequence.wrapping_add(1);
        let data = encode(self.sequence);
        self.pending.push_back(PendingChunk {
            sequence: self.sequence,
            data: data.clone(),
            first_sent: now,
            sent_time: now,
        });
        data
    }

    /// Handles a cumulative acknowledgement.
    pub fn acknowledge(&mut self, ack: u16) {
        while self
            .pending
            .front()
            .is_some_and(|p| seq_at_or_before(p.sequence, ack))
        {
            self.pending.pop_front();
        }
    }

    /// Checks an incoming vital sequence number.
    ///
    /// Returns true and advances the ack if it is the next one expected;
    /// duplicates and gaps return false.
    pub fn accept(&mut self, sequence: u16) -> bool {
        if sequence == self.ack.wrapping_add(1) {
            self.ack = sequence;
            true
        } else {
            false
        }
    }

    /// Last sequence number received in order.
    #[must_use]
    pub const fn ack(&self) -> u16 {
        self.ack
    }

    /// Number of unacknowledged chunks.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Send time of the oldest unacknowledged chunk.
    #[must_use]
    pub fn oldest_unacked(&self) -> Option<Instant> {
        self.pending.front().map(|p| p.first_sent)
    }

    /// Returns chunks whose resend timeout elapsed.
    pub fn get_resends(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let mut resends = Vec::new();
        for chunk in &mut self.pending {
            if now.duration_since(chunk.sent_time) > self.resend_timeout {
                chunk.sent_time = now;
                resends.push(chunk.data.clone());
            }
        }
        resends
    }

    /// Sets the resend timeout.
    pub fn set_resend_timeout(&mut self, timeout: Duration) {
        self.resend_timeout = timeout;
    }
}

impl Default for ReliabilityLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConnState {
    Online,
    TimedOut(Instant),
}

struct Connection {
    addr: SocketAddr,
    token: u32,
    state: ConnState,
    last_recv: Instant,
    last_send: Instant,
    reliability: ReliabilityLayer,
    /// Encoded chunks waiting for the next flush.
    outbox: Vec<u8>,
    outbox_chunks: u8,
}

impl Connection {
    fn new(addr: SocketAddr, token: u32, now: Instant) -> Self {
        Self {
            addr,
            token,
            state: ConnState::Online,
            last_recv: now,
            last_send: now,
            reliability: ReliabilityLayer::new(),
            outbox: Vec::with_capacity(MAX_PACKET_SIZE),
            outbox_chunks: 0,
        }
    }
}

fn encode_chunk(flags: ChunkFlags, sequence: Option<u16>, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 5);
    out.push(if flags.is_vital() { CHUNK_FLAG_VITAL } else { 0 });
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    if let Some(sequence) = sequence {
        out.extend_from_slice(&sequence.to_le_bytes());
    }
    out.extend_from_slice(data);
    out
}

fn read_u16(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// UDP session transport.
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    recv_buffer: [u8; MAX_PACKET_SIZE],
    slots: Vec<Option<Connection>>,
    events: VecDeque<NetEvent>,
    stats: TransportStats,
    rng: ChaCha20Rng,
}

impl UdpTransport {
    /// Binds a transport with `max_clients` slots.
    ///
    /// # Errors
    ///
    /// Fails if the socket cannot be bound or made non-blocking.
    pub fn bind(addr: SocketAddr, max_clients: usize) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            recv_buffer: [0u8; MAX_PACKET_SIZE],
            slots: (0..max_clients).map(|_| None).collect(),
            events: VecDeque::new(),
            stats: TransportStats::default(),
            rng: ChaCha20Rng::from_entropy(),
        })
    }

    /// Returns the local address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns statistics.
    #[must_use]
    pub const fn stats(&self) -> &TransportStats {
        &self.stats
    }

    fn send_raw(&mut self, data: &[u8], addr: SocketAddr) {
        match self.socket.send_to(data, addr) {
            Ok(n) => {
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += n as u64;
            }
            Err(_) => self.stats.send_errors += 1,
        }
    }

    fn send_control(&mut self, kind: u8, token: u32, extra: &[u8], addr: SocketAddr) {
        let mut packet = Vec::with_capacity(5 + extra.len());
        packet.push(kind);
        packet.extend_from_slice(&token.to_le_bytes());
        packet.extend_from_slice(extra);
        self.send_raw(&packet, addr);
    }

    fn slot_by_addr(&self, addr: SocketAddr) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|c| c.addr == addr))
    }

    fn data_packet(conn: &Connection, chunks: &[u8], count: u8) -> Vec<u8> {
        let mut packet = Vec::with_capacity(DATA_HEADER_SIZE + chunks.len());
        packet.push(PACKET_DATA);
        packet.extend_from_slice(&conn.token.to_le_bytes());
        packet.extend_from_slice(&conn.reliability.ack().to_le_bytes());
        packet.push(count);
        packet.extend_from_slice(chunks);
        packet
    }

    fn flush(&mut self, cid: usize, now: Instant) {
        let Some(conn) = self.slots[cid].as_mut() else {
            return;
        };
        if conn.outbox_chunks == 0 {
            return;
        }
        let packet = Self::data_packet(conn, &conn.outbox, conn.outbox_chunks);
        conn.outbox.clear();
        conn.outbox_chunks = 0;
        conn.last_send = now;
        let addr = conn.addr;
        self.send_raw(&packet, addr);
    }

    fn handle_connect(&mut self, addr: SocketAddr, flags: u8, now: Instant) {
        if let Some(cid) = self.slot_by_addr(addr) {
            // lost ACCEPT
            if let Some(token) = self.slots[cid].as_ref().map(|c| c.token) {
                self.send_control(PACKET_ACCEPT, token, &[], addr);
            }
            return;
        }
        let Some(cid) = self.slots.iter().position(Option::is_none) else {
            self.send_control(PACKET_CLOSE, 0, b"This server is full", addr);
            return;
        };

        let no_token = flags & CONNECT_FLAG_NO_TOKEN != 0;
        let token = if no_token { 0 } else { self.rng.gen::<u32>() | 1 };
        self.slots[cid] = Some(Connection::new(addr, token, now));
        self.send_control(PACKET_ACCEPT, token, &[], addr);

        debug!(cid, %addr, "connection accepted");
        self.events.push_back(if no_token {
            NetEvent::ConnectedNoAuth { cid, addr }
        } else {
            NetEvent::Connected { cid, addr, sixup: flags & CONNECT_FLAG_SIXUP != 0 }
        });
    }

    fn handle_data(&mut self, cid: usize, packet: &[u8]) {
        let Some(conn) = self.slots[cid].as_mut() else {
            return;
        };
        let (Some(ack), Some(&count)) = (read_u16(packet, 5), packet.get(7)) else {
            return;
        };
        conn.reliability.acknowledge(ack);

        let mut at = DATA_HEADER_SIZE;
        for _ in 0..count {
            let (Some(&flags), Some(len)) = (packet.get(at), read_u16(packet, at + 1)) else {
                return;
            };
            at += 3;
            let vital = flags & CHUNK_FLAG_VITAL != 0;
            let accepted = if vital {
                let Some(sequence) = read_u16(packet, at) else {
                    return;
                };
                at += 2;
                conn.reliability.accept(sequence)
            } else {
                true
            };
            let Some(data) = packet.get(at..at + usize::from(len)) else {
                return;
            };
            at += usize::from(len);
            if accepted {
                self.events.push_back(NetEvent::Chunk { cid, data: data.to_vec(), vital });
            }
        }
    }

    fn handle_packet(&mut self, len: usize, addr: SocketAddr, now: Instant) {
        let packet = self.recv_buffer[..len].to_vec();
        let Some(&kind) = packet.first() else {
            return;
        };
        match kind {
            PACKET_CONNLESS => {
                self.events.push_back(NetEvent::Connless { addr, data: packet[1..].to_vec() });
                return;
            }
            PACKET_CONNECT => {
                self.handle_connect(addr, packet.get(1).copied().unwrap_or(0), now);
                return;
            }
            _ => {}
        }

        let Some(cid) = self.slot_by_addr(addr) else {
            return;
        };
        let Some(conn) = self.slots[cid].as_mut() else {
            return;
        };
        if read_u32(&packet, 1) != Some(conn.token) {
            return;
        }
        conn.last_recv = now;
        conn.state = ConnState::Online;

        match kind {
            PACKET_CLOSE => {
                let reason = String::from_utf8_lossy(&packet[5..]).into_owned();
                self.slots[cid] = None;
                self.events.push_back(NetEvent::Disconnected { cid, reason });
            }
            PACKET_KEEPALIVE => {
                if let Some(ack) = read_u16(&packet, 5) {
                    conn.reliability.acknowledge(ack);
                }
            }
            PACKET_DATA => self.handle_data(cid, &packet),
            _ => {}
        }
    }

    fn close(&mut self, cid: usize, reason: &str) -> Option<Connection> {
        let conn = self.slots.get_mut(cid)?.take()?;
        self.send_control(PACKET_CLOSE, conn.token, reason.as_bytes(), conn.addr);
        Some(conn)
    }
}

impl Transport for UdpTransport {
    fn max_clients(&self) -> usize {
        self.slots.len()
    }

    fn update(&mut self, now: Instant) {
        for cid in 0..self.slots.len() {
            self.flush(cid, now);
            let Some(conn) = self.slots[cid].as_mut() else {
                continue;
            };

            if let ConnState::TimedOut(since) = conn.state {
                if now.duration_since(since) > TAKEOVER_GRACE {
                    self.slots[cid] = None;
                    self.events
                        .push_back(NetEvent::Disconnected { cid, reason: "Timeout".to_owned() });
                }
                continue;
            }
            if now.duration_since(conn.last_recv) > CONNECTION_TIMEOUT {
                conn.state = ConnState::TimedOut(now);
                self.events.push_back(NetEvent::TimedOut { cid });
                continue;
            }
            if conn
                .reliability
                .oldest_unacked()
                .is_some_and(|sent| now.duration_since(sent) > CONNECTION_TIMEOUT)
            {
                let reason = "Too weak connection (not acked for 10 seconds)";
                self.close(cid, reason);
                self.events.push_back(NetEvent::Disconnected { cid, reason: reason.to_owned() });
                continue;
            }

            let resends = conn.reliability.get_resends(now);
            let mut packets = Vec::new();
            for chunk in &resends {
                packets.push(Self::data_packet(conn, chunk, 1));
            }
            let keepalive = packets.is_empty() && now.duration_since(conn.last_send) > KEEPALIVE_INTERVAL;
            if !packets.is_empty() || keepalive {
                conn.last_send = now;
            }
            let (addr, token, ack) = (conn.addr, conn.token, conn.reliability.ack());

            self.stats.resends += resends.len() as u64;
            for packet in packets {
                self.send_raw(&packet, addr);
            }
            if keepalive {
                self.send_control(PACKET_KEEPALIVE, token, &ack.to_le_bytes(), addr);
            }
        }
    }

    fn recv(&mut self) -> Option<NetEvent> {
        while self.events.is_empty() {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((len, addr)) => {
                    self.stats.packets_received += 1;
                    self.stats.bytes_received += len as u64;
                    self.handle_packet(len, addr, Instant::now());
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => {
                    self.stats.recv_errors += 1;
                    break;
                }
            }
        }
        self.events.pop_front()
    }

    fn send(&mut self, target: SendTarget, data: &[u8], flags: ChunkFlags) {
        let cid = match target {
            SendTarget::Addr(addr) => {
                let mut packet = Vec::with_capacity(data.len() + 1);
                packet.push(PACKET_CONNLESS);
                packet.extend_from_slice(data);
                self.send_raw(&packet, addr);
                return;
            }
            SendTarget::Client(cid) => cid,
        };

        let now = Instant::now();
        let Some(conn) = self.slots.get_mut(cid).and_then(Option::as_mut) else {
            return;
        };
        if conn.state != ConnState::Online {
            return;
        }
        let chunk_len = data.len() + 5;
        if conn.outbox.len() + chunk_len + DATA_HEADER_SIZE > MAX_PACKET_SIZE || conn.outbox_chunks == u8::MAX {
            self.flush(cid, now);
        }
        let Some(conn) = self.slots[cid].as_mut() else {
            return;
        };
        if flags.is_vital() {
            let chunk = conn
                .reliability
                .send_reliable(now, |seq| encode_chunk(flags, Some(seq), data));
            conn.outbox.extend_from_slice(&chunk);
        } else {
            conn.outbox.extend_from_slice(&encode_chunk(flags, None, data));
        }
        conn.outbox_chunks += 1;

        if flags.contains(ChunkFlags::FLUSH) {
            self.flush(cid, now);
        }
    }

    fn drop_client(&mut self, cid: usize, reason: &str) {
        self.flush(cid, Instant::now());
        self.close(cid, reason);
    }

    fn client_addr(&self, cid: usize) -> Option<SocketAddr> {
        self.slots.get(cid)?.as_ref().map(|c| c.addr)
    }

    fn set_timed_out(&mut self, cid: usize, from: usize) -> bool {
        let timed_out = self
            .slots
            .get(cid)
            .and_then(Option::as_ref)
            .is_some_and(|c| matches!(c.state, ConnState::TimedOut(_)));
        if !timed_out || cid == from {
            return false;
        }
        let Some(conn) = self.slots.get_mut(from).and_then(Option::take) else {
            return false;
        };
        self.slots[cid] = Some(conn);
        true
    }

    fn wait(&mut self, timeout: Duration) {
        if timeout.is_zero() {
            return;
        }
        let mut probe = [0u8; 1];
        let blocking = self.socket.set_nonblocking(false).is_ok()
            && self.socket.set_read_timeout(Some(timeout)).is_ok();
        if blocking {
            // data or timeout; errors just end the wait
            let _ = self.socket.peek_from(&mut probe);
        }
        if self.socket.set_nonblocking(true).is_err() {
            self.stats.recv_errors += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reliability_cumulative_ack() {
        let mut layer = ReliabilityLayer::new();
        let now = Instant::now();

        layer.send_reliable(now, |seq| vec![seq as u8]);
        layer.send_reliable(now, |seq| vec![seq as u8]);
        layer.send_reliable(now, |seq| vec![seq as u8]);
        assert_eq!(layer.pending_len(), 3);

        layer.acknowledge(2);
        assert_eq!(layer.pending_len(), 1);
        layer.acknowledge(1);
        assert_eq!(layer.pending_len(), 1);
    }

    #[test]
    fn test_ordered_acceptance() {
        let mut layer = ReliabilityLayer::new();
        assert!(!layer.accept(2));
        assert!(layer.accept(1));
        assert!(!layer.accept(1));
        assert!(layer.accept(2));
        assert_eq!(layer.ack(), 2);
    }

    #[test]
    fn test_resend_after_timeout() {
        let mut layer = ReliabilityLayer::new();
        layer.set_resend_timeout(Duration::from_millis(50));
        let now = Instant::now();
        layer.send_reliable(now, |_| b"hello".to_vec());

        assert!(layer.get_resends(now + Duration::from_millis(10)).is_empty());
        assert_eq!(layer.get_resends(now + Duration::from_millis(60)), vec![b"hello".to_vec()]);
        assert!(layer.get_resends(now + Duration::from_millis(70)).is_empty());
    }

    #[test]
    fn test_sequence_wrap() {
        assert!(seq_at_or_before(u16::MAX, 0));
        assert!(seq_at_or_before(5, 5));
        assert!(!seq_at_or_before(6, 5));
    }

    #[test]
    fn test_loopback_session() {
        let server_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut server = UdpTransport::bind(server_addr, 2).unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_read_timeout(Some(Duration::from_secs(1))).unwrap();

        client.send_to(&[PACKET_CONNECT, 0], server.local_addr()).unwrap();
        server.wait(Duration::from_millis(500));
        let Some(NetEvent::Connected { cid, sixup: false, .. }) = server.recv() else {
            panic!("expected connection");
        };

        let mut buf = [0u8; 64];
        let (len, _) = client.recv_from(&mut buf).unwrap();
        assert_eq!(buf[0], PACKET_ACCEPT);
        let token = read_u32(&buf[..len], 1).unwrap();

        let mut packet = vec![PACKET_DATA];
        packet.extend_from_slice(&token.to_le_bytes());
        packet.extend_from_slice(&0u16.to_le_bytes());
        packet.push(1);
        packet.extend_from_slice(&encode_chunk(ChunkFlags::VITAL, Some(1), b"hi"));
        client.send_to(&packet, server.local_addr()).unwrap();

        server.wait(Duration::from_millis(500));
        assert_eq!(
            server.recv(),
            Some(NetEvent::Chunk { cid, data: b"hi".to_vec(), vital: true })
        );
    }
}
