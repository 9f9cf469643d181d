//! # Protocol Generation Translation
//!
//! Message IDs differ between the legacy (0.6/DDNet) and the sixup (0.7) wire
//! formats. Translation is a pure function of the ID, expressed as range rules:
//! contiguous shifts, single remaps and explicit drops (`None`).
//!
//! IDs at or above [`OFFSET_UUID`] are never remapped.

use super::uuid_manager::OFFSET_UUID;

/// Wire-protocol generation spoken by a client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// 0.6 / DDNet numbering.
    #[default]
    Legacy,
    /// 0.7 numbering.
    Sixup,
}

impl Protocol {
    /// Returns true for the 0.7 generation.
    #[inline]
    #[must_use]
    pub const fn is_sixup(self) -> bool {
        matches!(self, Self::Sixup)
    }
}

/// Sixup-native system message IDs sent without translation.
pub mod native {
    /// Server info push to in-game clients.
    pub const SERVERINFO: i32 = 4;
    /// Remote console login succeeded.
    pub const RCON_AUTH_ON: i32 = 11;
    /// Remote console logout.
    pub const RCON_AUTH_OFF: i32 = 12;
}

/// Maps an outgoing legacy system message ID to its sixup ID.
#[must_use]
pub const fn system_to_sixup(id: i32) -> Option<i32> {
    if id >= OFFSET_UUID {
        return Some(id);
    }
    match id {
        2..=3 => Some(id),
        4..=9 => Some(id + 1),
        11 => Some(13),
        12..=13 | 22..=24 => Some(id + 4),
        25..=26 => Some(id - 11),
        _ => None,
    }
}

/// Maps an incoming sixup system message ID to its legacy ID.
#[must_use]
pub const fn system_from_sixup(id: i32) -> Option<i32> {
    if id >= OFFSET_UUID {
        return Some(id);
    }
    match id {
        1 => Some(id),
        14..=15 => Some(id + 11),
        18..=28 => Some(14 + (id - 18)),
        _ => None,
    }
}

/// Maps an outgoing legacy game message ID to its sixup ID.
#[must_use]
pub const fn game_to_sixup(id: i32) -> Option<i32> {
    if id >= OFFSET_UUID {
        return Some(id);
    }
    match id {
        1..=3 | 6..=16 => Some(id),
        4 => Some(5),
        17..=20 => Some(id + 7),
        22 => Some(28),
        23..=25 => Some(id + 7),
        _ => None,
    }
}

/// Maps an incoming sixup game message ID to its legacy ID.
///
/// Inverse of [`game_to_sixup`] on its image.
#[must_use]
pub const fn game_from_sixup(id: i32) -> Option<i32> {
    if id >= OFFSET_UUID {
        return Some(id);
    }
    match id {
        1..=3 | 6..=16 => Some(id),
        5 => Some(4),
        24..=27 => Some(id - 7),
        28 => Some(22),
        30..=32 => Some(id - 7),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_ranges() {
        // map change and data pass through
        assert_eq!(system_to_sixup(2), Some(2));
        // snap family shifts by one
        assert_eq!(system_to_sixup(5), Some(6));
        assert_eq!(system_to_sixup(9), Some(10));
        // rcon line
        assert_eq!(system_to_sixup(11), Some(13));
        // ping / ping reply / error
        assert_eq!(system_to_sixup(22), Some(26));
        assert_eq!(system_to_sixup(24), Some(28));
        // rcon command add / remove
        assert_eq!(system_to_sixup(25), Some(14));
        assert_eq!(system_to_sixup(26), Some(15));
        // rcon auth status has no sixup counterpart
        assert_eq!(system_to_sixup(10), None);
        assert_eq!(system_to_sixup(OFFSET_UUID + 3), Some(OFFSET_UUID + 3));
    }

    #[test]
    fn test_system_inbound() {
        assert_eq!(system_from_sixup(1), Some(1));
        // ready, enter game, input, rcon cmd, rcon auth, request map data
        assert_eq!(system_from_sixup(18), Some(14));
        assert_eq!(system_from_sixup(19), Some(15));
        assert_eq!(system_from_sixup(20), Some(16));
        assert_eq!(system_from_sixup(23), Some(19));
        // ping
        assert_eq!(system_from_sixup(26), Some(22));
        assert_eq!(system_from_sixup(5), None);
    }

    #[test]
    fn test_game_tables_are_inverse() {
        for id in 0..40 {
            if let Some(seven) = game_to_sixup(id) {
                assert_eq!(game_from_sixup(seven), Some(id), "legacy id {id}");
            }
        }
        for id in 0..40 {
            if let Some(six) = game_from_sixup(id) {
                assert_eq!(game_to_sixup(six), Some(id), "sixup id {id}");
            }
        }
    }

    #[test]
    fn test_game_drops() {
        assert_eq!(game_to_sixup(5), None);
        assert_eq!(game_to_sixup(21), None);
        assert_eq!(game_to_sixup(26), None);
        assert_eq!(game_from_sixup(4), None);
        assert_eq!(game_from_sixup(29), None);
    }
}
