//! # Address Bans
//!
//! Expiring bans keyed by IP address.

use std::net::IpAddr;
use std::time::{Duration, Instant};

/// One banned address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BanEntry {
    /// Banned address.
    pub addr: IpAddr,
    /// End of the ban; `None` is permanent.
    pub expires: Option<Instant>,
    /// Reason shown to the client.
    pub reason: String,
}

impl BanEntry {
    /// Message shown to a banned client trying to connect.
    #[must_use]
    pub fn message(&self, now: Instant) -> String {
        match self.expires {
            Some(expires) => {
                let secs = expires.saturating_duration_since(now).as_secs();
                let minutes = secs.div_ceil(60).max(1);
                let plural = if minutes == 1 { "" } else { "s" };
                format!("You have been banned for {minutes} minute{plural} ({})", self.reason)
            }
            None => format!("You have been banned ({})", self.reason),
        }
    }
}

/// Ban list.
#[derive(Clone, Debug, Default)]
pub struct NetBan {
    entries: Vec<BanEntry>,
}

impl NetBan {
    /// Creates an empty ban list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bans `addr`, replacing any existing ban of it.
    ///
    /// # Arguments
    ///
    /// * `duration` - Ban length, `None` for permanent
    pub fn ban_addr(&mut self, addr: IpAddr, duration: Option<Duration>, reason: &str, now: Instant) -> &BanEntry {
        let entry = BanEntry {
            addr,
            expires: duration.map(|d| now + d),
            reason: reason.to_owned(),
        };
        let index = match self.entries.iter().position(|e| e.addr == addr) {
            Some(index) => {
                self.entries[index] = entry;
                index
            }
            None => {
                self.entries.push(entry);
                self.entries.len() - 1
            }
        };
        &self.entries[index]
    }

    /// Lifts the ban of `addr`. Returns false if it was not banned.
    pub fn unban_addr(&mut self, addr: IpAddr) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.addr != addr);
        self.entries.len() != before
    }

    /// Returns the active ban of `addr`, if any.
    #[must_use]
    pub fn is_banned(&self, addr: IpAddr, now: Instant) -> Option<&BanEntry> {
        self.entries
            .iter()
            .find(|e| e.addr == addr && e.expires.map_or(true, |expires| expires > now))
    }

    /// Removes expired bans. Returns how many were removed.
    pub fn update(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| e.expires.map_or(true, |expires| expires > now));
        before - self.entries.len()
    }

    /// All bans, active or not yet purged.
    #[must_use]
    pub fn entries(&self) -> &[BanEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

    #[test]
    fn test_ban_expires() {
        let mut bans = NetBan::new();
        let now = Instant::now();
        bans.ban_addr(ADDR, Some(Duration::from_secs(60)), "spam", now);

        assert!(bans.is_banned(ADDR, now + Duration::from_secs(59)).is_some());
        assert!(bans.is_banned(ADDR, now + Duration::from_secs(60)).is_none());
        assert_eq!(bans.update(now + Duration::from_secs(61)), 1);
        assert!(bans.entries().is_empty());
    }

    #[test]
    fn test_reban_replaces() {
        let mut bans = NetBan::new();
        let now = Instant::now();
        bans.ban_addr(ADDR, Some(Duration::from_secs(60)), "a", now);
        bans.ban_addr(ADDR, None, "b", now);
        assert_eq!(bans.entries().len(), 1);
        assert_eq!(bans.entries()[0].reason, "b");
        assert!(bans.unban_addr(ADDR));
        assert!(!bans.unban_addr(ADDR));
    }

    #[test]
    fn test_messages() {
        let now = Instant::now();
        let mut bans = NetBan::new();
        let entry = bans.ban_addr(ADDR, Some(Duration::from_secs(600)), "Stressing network", now);
        assert_eq!(entry.message(now), "You have been banned for 10 minutes (Stressing network)");

        let entry = bans.ban_addr(ADDR, None, "cheating", now);
        assert_eq!(entry.message(now), "You have been banned (cheating)");
    }
}
