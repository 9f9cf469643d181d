//! # Address Reputation Lookups
//!
//! DNS blacklist queries run on worker threads. The tick loop polls each job
//! once per iteration; nothing calls back into server state.
//!
//! A listed address resolves to any record; an unlisted one fails to resolve.

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use std::net::{IpAddr, ToSocketAddrs};

/// Reputation of a client address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DnsblState {
    /// No lookup started.
    #[default]
    None,
    /// Lookup running.
    Pending,
    /// Not listed.
    Whitelisted,
    /// Listed.
    Blacklisted,
}

impl DnsblState {
    /// Name used in status output.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "n/a",
            Self::Pending => "pending",
            Self::Whitelisted => "white",
            Self::Blacklisted => "black",
        }
    }
}

/// Builds the query name for `addr`.
///
/// IPv4 octets and IPv6 nibbles are reversed; the access key, if any, goes in
/// front.
#[must_use]
pub fn query_name(addr: IpAddr, host: &str, key: &str) -> String {
    let reversed = match addr {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            format!("{d}.{c}.{b}.{a}")
        }
        IpAddr::V6(v6) => v6
            .octets()
            .iter()
            .rev()
            .flat_map(|byte| [byte & 0x0f, byte >> 4])
            .map(|nibble| format!("{nibble:x}"))
            .collect::<Vec<_>>()
            .join("."),
    };
    if key.is_empty() {
        format!("{reversed}.{host}")
    } else {
        format!("{key}.{reversed}.{host}")
    }
}

/// A running lookup.
#[derive(Debug)]
pub struct DnsblJob {
    rx: Receiver<bool>,
    result: Option<bool>,
}

impl DnsblJob {
    /// Wraps the receiving end of a lookup.
    #[must_use]
    pub fn new(rx: Receiver<bool>) -> Self {
        Self { rx, result: None }
    }

    /// Creates a job that is already done.
    #[must_use]
    pub fn finished(listed: bool) -> Self {
        Self {
            rx: crossbeam_channel::never(),
            result: Some(listed),
        }
    }

    /// `Some(listed)` once the lookup finished.
    pub fn poll(&mut self) -> Option<bool> {
        if self.result.is_none() {
            match self.rx.try_recv() {
                Ok(listed) => self.result = Some(listed),
                // A worker that died without answering counts as not listed
                Err(TryRecvError::Disconnected) => self.result = Some(false),
                Err(TryRecvError::Empty) => {}
            }
        }
        self.result
    }
}

/// Starts lookups.
pub trait DnsblResolver: Send {
    /// Starts resolving `query`.
    fn lookup(&self, query: String) -> DnsblJob;
}

/// Resolver using the system's name service on a detached thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemResolver;

impl DnsblResolver for SystemResolver {
    fn lookup(&self, query: String) -> DnsblJob {
        let (tx, rx) = bounded(1);
        let spawned = std::thread::Builder::new()
            .name("dnsbl".to_owned())
            .spawn(move || {
                let listed = (query.as_str(), 0)
                    .to_socket_addrs()
                    .is_ok_and(|mut addrs| addrs.next().is_some());
                // The server may have dropped the job already
                let _ = tx.send(listed);
            });
        if spawned.is_err() {
            return DnsblJob::finished(false);
        }
        DnsblJob::new(rx)
    }
}
