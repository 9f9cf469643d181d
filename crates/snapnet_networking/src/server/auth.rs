//! # Remote Console Keys
//!
//! Named credentials with an access level. Passwords are stored as salted
//! SHA-256 digests; the plain text never outlives the call that set it.
//!
//! Three default keys, one per level, are created from the configured
//! passwords. When none is configured an admin password is generated and
//! logged once at startup.

use crate::config::RconConfig;
use crate::error::AuthError;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Bytes of random salt per key.
pub const SALT_SIZE: usize = 8;

/// Maximum identifier length in bytes.
pub const MAX_IDENT_LENGTH: usize = 64;

/// Length of a generated admin password.
const GENERATED_PASSWORD_LENGTH: usize = 6;

/// Characters a generated password is drawn from. Look-alikes are left out.
const PASSWORD_ALPHABET: &[u8] = b"ABCDEFGHKLMNPRSTUVWXYZabcdefghjkmnopqt23456789";

/// Remote console access level, ordered from least to most privileged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthLevel {
    /// Not logged in.
    #[default]
    None,
    /// Helper commands.
    Helper,
    /// Moderation commands.
    Mod,
    /// Everything.
    Admin,
}

impl AuthLevel {
    /// Parses a level name as typed in console commands.
    ///
    /// Accepts `admin`, `helper` and anything starting with `mod`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "admin" => Some(Self::Admin),
            "helper" => Some(Self::Helper),
            _ if name.starts_with("mod") => Some(Self::Mod),
            _ => None,
        }
    }

    /// Long name used in log lines.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Helper => "helper",
            Self::Mod => "moderator",
            Self::Admin => "admin",
        }
    }

    /// Index into per-level tables, `None` for [`AuthLevel::None`].
    const fn index(self) -> Option<usize> {
        match self {
            Self::None => None,
            Self::Helper => Some(0),
            Self::Mod => Some(1),
            Self::Admin => Some(2),
        }
    }
}

impl fmt::Display for AuthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifiers of the default keys, indexed like [`AuthLevel::index`].
const DEFAULT_IDENTS: [&str; 3] = ["default_helper", "default_mod", "default_admin"];

#[derive(Clone, Debug)]
struct AuthKey {
    ident: String,
    digest: [u8; 32],
    salt: [u8; SALT_SIZE],
    level: AuthLevel,
}

fn hash_password(password: &str, salt: &[u8; SALT_SIZE]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt);
    hasher.finalize().into()
}

/// Key store.
///
/// Keys live in a dense array addressed by slot index. Removing a key moves
/// the last key into the freed slot; see [`AuthManager::remove_key`].
pub struct AuthManager {
    keys: Vec<AuthKey>,
    defaults: [Option<usize>; 3],
    generated: bool,
    rng: ChaCha20Rng,
}

impl AuthManager {
    /// Creates an empty store seeded from the OS.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(ChaCha20Rng::from_entropy())
    }

    /// Creates an empty store with a deterministic salt source.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(ChaCha20Rng::seed_from_u64(seed))
    }

    fn with_rng(rng: ChaCha20Rng) -> Self {
        Self {
            keys: Vec::new(),
            defaults: [None; 3],
            generated: false,
            rng,
        }
    }

    /// Creates the default keys from the configured passwords.
    ///
    /// # Returns
    ///
    /// The generated admin password when no password was configured.
    pub fn init(&mut self, config: &RconConfig) -> Option<String> {
        self.set_default_password(AuthLevel::Admin, &config.password);
        self.set_default_password(AuthLevel::Mod, &config.mod_password);
        self.set_default_password(AuthLevel::Helper, &config.helper_password);

        if !self.keys.is_empty() {
            return None;
        }
        let password: String = (0..GENERATED_PASSWORD_LENGTH)
            .map(|_| char::from(PASSWORD_ALPHABET[self.rng.gen_range(0..PASSWORD_ALPHABET.len())]))
            .collect();
        self.set_default_password(AuthLevel::Admin, &password);
        self.generated = true;
        Some(password)
    }

    /// Sets or replaces the default key of `level`. Empty passwords create no key.
    ///
    /// # Returns
    ///
    /// The key slot, if a key exists afterwards.
    pub fn set_default_password(&mut self, level: AuthLevel, password: &str) -> Option<usize> {
        let index = level.index()?;
        if password.is_empty() {
            return self.defaults[index];
        }
        match self.defaults[index] {
            Some(slot) => {
                self.rehash(slot, password, level);
                Some(slot)
            }
            None => {
                let slot = self.push_key(DEFAULT_IDENTS[index], password, level);
                self.defaults[index] = Some(slot);
                Some(slot)
            }
        }
    }

    fn push_key(&mut self, ident: &str, password: &str, level: AuthLevel) -> usize {
        let mut salt = [0u8; SALT_SIZE];
        self.rng.fill(&mut salt);
        self.keys.push(AuthKey {
            ident: ident.to_owned(),
            digest: hash_password(password, &salt),
            salt,
            level,
        });
        self.keys.len() - 1
    }

    fn rehash(&mut self, slot: usize, password: &str, level: AuthLevel) {
        let mut salt = [0u8; SALT_SIZE];
        self.rng.fill(&mut salt);
        let key = &mut self.keys[slot];
        key.salt = salt;
        key.digest = hash_password(password, &salt);
        key.level = level;
    }

    /// Adds a named key.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidIdent`] for empty or overlong identifiers
    /// - [`AuthError::InvalidLevel`] for [`AuthLevel::None`]
    /// - [`AuthError::IdentExists`] if the identifier is taken
    pub fn add_key(&mut self, ident: &str, password: &str, level: AuthLevel) -> Result<usize, AuthError> {
        if ident.is_empty() || ident.len() > MAX_IDENT_LENGTH {
            return Err(AuthError::InvalidIdent(ident.to_owned()));
        }
        if level == AuthLevel::None {
            return Err(AuthError::InvalidLevel(level.to_string()));
        }
        if self.find_key(ident).is_some() {
            return Err(AuthError::IdentExists(ident.to_owned()));
        }
        Ok(self.push_key(ident, password, level))
    }

    /// Replaces the password and level of a key.
    ///
    /// # Errors
    ///
    /// [`AuthError::IdentNotFound`] for an unknown slot, [`AuthError::InvalidLevel`]
    /// for [`AuthLevel::None`].
    pub fn update_key(&mut self, slot: usize, password: &str, level: AuthLevel) -> Result<(), AuthError> {
        if slot >= self.keys.len() {
            return Err(AuthError::IdentNotFound(slot.to_string()));
        }
        if level == AuthLevel::None {
            return Err(AuthError::InvalidLevel(level.to_string()));
        }
        self.rehash(slot, password, level);
        Ok(())
    }

    /// Removes a key by moving the last key into its slot.
    ///
    /// # Returns
    ///
    /// The former slot of the key that now occupies `slot` (equal to `slot`
    /// when the removed key was the last one), or `None` for an unknown slot.
    /// Sessions referencing the returned slot must be re-pointed to `slot`.
    pub fn remove_key(&mut self, slot: usize) -> Option<usize> {
        if slot >= self.keys.len() {
            return None;
        }
        let last = self.keys.len() - 1;
        self.keys.swap_remove(slot);
        for default in &mut self.defaults {
            if *default == Some(slot) {
                *default = None;
            } else if *default == Some(last) {
                *default = Some(slot);
            }
        }
        Some(last)
    }

    /// Finds a key by identifier.
    #[must_use]
    pub fn find_key(&self, ident: &str) -> Option<usize> {
        self.keys.iter().position(|key| key.ident == ident)
    }

    /// Checks a password against a key.
    #[must_use]
    pub fn check_key(&self, slot: usize, password: &str) -> bool {
        self.keys
            .get(slot)
            .is_some_and(|key| hash_password(password, &key.salt) == key.digest)
    }

    /// The default key of `level`.
    #[must_use]
    pub fn default_key(&self, level: AuthLevel) -> Option<usize> {
        level.index().and_then(|index| self.defaults[index])
    }

    /// Access level of a key; [`AuthLevel::None`] for unknown slots.
    #[must_use]
    pub fn key_level(&self, slot: usize) -> AuthLevel {
        self.keys.get(slot).map_or(AuthLevel::None, |key| key.level)
    }

    /// Identifier of a key.
    #[must_use]
    pub fn key_ident(&self, slot: usize) -> Option<&str> {
        self.keys.get(slot).map(|key| key.ident.as_str())
    }

    /// Number of keys that are not default keys.
    #[must_use]
    pub fn num_non_default_keys(&self) -> usize {
        let defaults = self.defaults.iter().filter(|d| d.is_some()).count();
        self.keys.len() - defaults
    }

    /// True if the admin password was generated.
    #[must_use]
    pub const fn is_generated(&self) -> bool {
        self.generated
    }

    /// Identifiers and levels of every key, in slot order.
    pub fn keys(&self) -> impl Iterator<Item = (&str, AuthLevel)> + '_ {
        self.keys.iter().map(|key| (key.ident.as_str(), key.level))
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True if no key exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Default for AuthManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(admin: &str, moderator: &str, helper: &str) -> RconConfig {
        RconConfig {
            password: admin.to_owned(),
            mod_password: moderator.to_owned(),
            helper_password: helper.to_owned(),
            ..RconConfig::default()
        }
    }

    #[test]
    fn test_level_parse_and_order() {
        assert_eq!(AuthLevel::parse("admin"), Some(AuthLevel::Admin));
        assert_eq!(AuthLevel::parse("mod"), Some(AuthLevel::Mod));
        assert_eq!(AuthLevel::parse("moderator"), Some(AuthLevel::Mod));
        assert_eq!(AuthLevel::parse("helper"), Some(AuthLevel::Helper));
        assert_eq!(AuthLevel::parse("root"), None);
        assert!(AuthLevel::Admin > AuthLevel::Mod);
        assert!(AuthLevel::Helper > AuthLevel::None);
        assert_eq!(AuthLevel::Mod.to_string(), "moderator");
    }

    #[test]
    fn test_default_keys_from_config() {
        let mut auth = AuthManager::with_seed(1);
        assert_eq!(auth.init(&config("a", "", "h")), None);

        let admin = auth.default_key(AuthLevel::Admin).unwrap();
        let helper = auth.default_key(AuthLevel::Helper).unwrap();
        assert!(auth.default_key(AuthLevel::Mod).is_none());
        assert!(auth.check_key(admin, "a"));
        assert!(!auth.check_key(admin, "h"));
        assert!(auth.check_key(helper, "h"));
        assert_eq!(auth.key_ident(admin), Some("default_admin"));
        assert_eq!(auth.num_non_default_keys(), 0);
        assert!(!auth.is_generated());
    }

    #[test]
    fn test_generated_password() {
        let mut auth = AuthManager::with_seed(7);
        let password = auth.init(&config("", "", "")).unwrap();
        assert_eq!(password.len(), GENERATED_PASSWORD_LENGTH);
        assert!(auth.is_generated());
        let admin = auth.default_key(AuthLevel::Admin).unwrap();
        assert!(auth.check_key(admin, &password));
    }

    #[test]
    fn test_salts_differ() {
        let mut auth = AuthManager::with_seed(3);
        let a = auth.add_key("a", "same", AuthLevel::Mod).unwrap();
        let b = auth.add_key("b", "same", AuthLevel::Mod).unwrap();
        assert_ne!(auth.keys[a].digest, auth.keys[b].digest);
        assert!(auth.check_key(a, "same") && auth.check_key(b, "same"));
    }

    #[test]
    fn test_add_key_errors() {
        let mut auth = AuthManager::with_seed(3);
        auth.add_key("ops", "pw", AuthLevel::Mod).unwrap();
        assert_eq!(
            auth.add_key("ops", "pw", AuthLevel::Admin),
            Err(AuthError::IdentExists("ops".to_owned()))
        );
        assert!(matches!(auth.add_key("", "pw", AuthLevel::Admin), Err(AuthError::InvalidIdent(_))));
        assert!(matches!(auth.add_key("x", "pw", AuthLevel::None), Err(AuthError::InvalidLevel(_))));
    }

    #[test]
    fn test_update_key() {
        let mut auth = AuthManager::with_seed(3);
        let slot = auth.add_key("ops", "old", AuthLevel::Helper).unwrap();
        auth.update_key(slot, "new", AuthLevel::Admin).unwrap();
        assert!(!auth.check_key(slot, "old"));
        assert!(auth.check_key(slot, "new"));
        assert_eq!(auth.key_level(slot), AuthLevel::Admin);
        assert!(auth.update_key(9, "x", AuthLevel::Admin).is_err());
    }

    #[test]
    fn test_remove_moves_last_key() {
        let mut auth = AuthManager::with_seed(5);
        auth.init(&config("a", "m", ""));
        let ops = auth.add_key("ops", "pw", AuthLevel::Mod).unwrap();
        assert_eq!(ops, 2);

        // Removing the admin default moves "ops" into slot 0
        assert_eq!(auth.remove_key(0), Some(2));
        assert_eq!(auth.key_ident(0), Some("ops"));
        assert!(auth.default_key(AuthLevel::Admin).is_none());
        assert_eq!(auth.default_key(AuthLevel::Mod), Some(1));
        assert_eq!(auth.len(), 2);
        assert_eq!(auth.num_non_default_keys(), 1);

        // Removing the last key moves nothing
        assert_eq!(auth.remove_key(1), Some(1));
        assert!(auth.default_key(AuthLevel::Mod).is_none());
        assert_eq!(auth.remove_key(5), None);
    }

    #[test]
    fn test_default_moved_by_removal() {
        let mut auth = AuthManager::with_seed(5);
        auth.add_key("ops", "pw", AuthLevel::Mod).unwrap();
        auth.set_default_password(AuthLevel::Helper, "h");
        assert_eq!(auth.default_key(AuthLevel::Helper), Some(1));

        auth.remove_key(0);
        assert_eq!(auth.default_key(AuthLevel::Helper), Some(0));
        assert!(auth.check_key(0, "h"));
        let listed: Vec<_> = auth.keys().collect();
        assert_eq!(listed, vec![("default_helper", AuthLevel::Helper)]);
    }
}
