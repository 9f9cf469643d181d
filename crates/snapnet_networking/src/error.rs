//! # Error Types
//!
//! Recoverable failures of the networking stack. Capacity violations that would
//! corrupt shared snapshot state are assertions, not errors.

use thiserror::Error;

/// Errors produced while building or decoding snapshots.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// Item ID outside `0..=0xFFFF`.
    #[error("snapshot item id out of range: {0}")]
    InvalidId(i32),

    /// Item type reserved, out of range or not registered.
    #[error("unknown snapshot item type: {0}")]
    UnknownType(i32),

    /// Item payload length differs from the declared static size.
    #[error("item type {item_type} has static size {expected}, got {actual}")]
    StaticSizeMismatch {
        /// The item type.
        item_type: i32,
        /// Declared payload words.
        expected: usize,
        /// Requested payload words.
        actual: usize,
    },

    /// Builder ran out of items or bytes.
    #[error("snapshot builder full")]
    Full,

    /// Delta ended in the middle of a field.
    #[error("delta truncated")]
    Truncated,

    /// Delta header counts are negative or implausible.
    #[error("invalid delta header")]
    InvalidHeader,

    /// Delta references an item outside the key space.
    #[error("delta item out of range: type {item_type} id {id}")]
    ItemOutOfRange {
        /// Item type read.
        item_type: i32,
        /// Item ID read.
        id: i32,
    },

    /// Bytes left after the last update.
    #[error("trailing data after delta")]
    TrailingData,

    /// Reconstructed snapshot exceeds the limits.
    #[error("reconstructed snapshot too large")]
    TooLarge,
}

/// Errors reading or validating the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid TOML for the schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is outside its allowed range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors managing remote console keys.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Identifier already in use.
    #[error("ident already exists: {0}")]
    IdentExists(String),

    /// Identifier not found.
    #[error("ident does not exist: {0}")]
    IdentNotFound(String),

    /// Identifier empty or too long.
    #[error("invalid ident: {0}")]
    InvalidIdent(String),

    /// Level name not recognized.
    #[error("level must be one of admin, mod, helper: {0}")]
    InvalidLevel(String),
}

/// Top-level server errors.
#[derive(Error, Debug)]
pub enum NetError {
    /// Socket failure.
    #[error("network I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Snapshot failure.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Map could not be loaded.
    #[error("failed to load map '{0}'")]
    MapLoad(String),
}

/// Result type for networking operations.
pub type NetResult<T> = Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(SnapshotError::InvalidId(70000).to_string(), "snapshot item id out of range: 70000");
        assert_eq!(NetError::MapLoad("dm1".into()).to_string(), "failed to load map 'dm1'");
        assert_eq!(
            NetError::from(SnapshotError::Full).to_string(),
            "snapshot builder full"
        );
    }
}
