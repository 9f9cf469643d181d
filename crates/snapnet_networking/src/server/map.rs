//! # Maps
//!
//! The server only needs a map's bytes, name, CRC32 and SHA-256 to transfer
//! it; parsing the map is the game logic's business. Sixup clients may get a
//! separate file of their own format.

use crate::error::{NetError, NetResult};
use crate::protocol::Protocol;
use crate::MAP_CHUNK_SIZE;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;

/// One map file ready for transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapFile {
    data: Vec<u8>,
    crc: u32,
    sha256: [u8; 32],
}

impl MapFile {
    /// Wraps raw map bytes and computes their checksums.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        let crc = crc32fast::hash(&data);
        let sha256 = Sha256::digest(&data).into();
        Self { data, crc, sha256 }
    }

    /// Map bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Size as sent on the wire.
    #[must_use]
    pub fn wire_size(&self) -> i32 {
        i32::try_from(self.data.len()).unwrap_or(i32::MAX)
    }

    /// CRC32 of the bytes.
    #[must_use]
    pub const fn crc(&self) -> u32 {
        self.crc
    }

    /// CRC32 reinterpreted as the signed wire integer.
    #[must_use]
    pub const fn wire_crc(&self) -> i32 {
        i32::from_ne_bytes(self.crc.to_ne_bytes())
    }

    /// SHA-256 of the bytes.
    #[must_use]
    pub const fn sha256(&self) -> &[u8; 32] {
        &self.sha256
    }

    /// SHA-256 as lowercase hex.
    #[must_use]
    pub fn sha256_hex(&self) -> String {
        hex::encode(self.sha256)
    }

    /// Number of transfer chunks.
    #[must_use]
    pub fn num_chunks(&self) -> usize {
        self.data.len().div_ceil(MAP_CHUNK_SIZE)
    }

    /// Bytes of transfer chunk `index` and whether it is the last one.
    ///
    /// Returns `None` for negative indices and indices past the end.
    #[must_use]
    pub fn chunk(&self, index: i32) -> Option<(&[u8], bool)> {
        let index = usize::try_from(index).ok()?;
        let offset = index.checked_mul(MAP_CHUNK_SIZE)?;
        if offset > self.data.len() {
            return None;
        }
        let end = (offset + MAP_CHUNK_SIZE).min(self.data.len());
        Some((&self.data[offset..end], end == self.data.len()))
    }
}

/// A loaded map in every format the server hands out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedMap {
    /// Map name without directory or extension.
    pub name: String,
    /// File for legacy clients.
    pub legacy: MapFile,
    /// File for sixup clients, if one exists.
    pub sixup: Option<MapFile>,
}

impl LoadedMap {
    /// File for a client speaking `protocol`; sixup falls back to the legacy file.
    #[must_use]
    pub fn file(&self, protocol: Protocol) -> &MapFile {
        match (&self.sixup, protocol) {
            (Some(file), Protocol::Sixup) => file,
            _ => &self.legacy,
        }
    }
}

/// Where maps come from.
pub trait MapSource: Send {
    /// Loads a map by name.
    ///
    /// # Errors
    ///
    /// [`NetError::MapLoad`] if the map does not exist or cannot be read.
    fn load(&mut self, name: &str) -> NetResult<LoadedMap>;
}

fn validate_name(name: &str) -> NetResult<()> {
    let bad = name.is_empty()
        || name.contains("..")
        || name.starts_with('/')
        || name.contains('\\')
        || name.contains(':');
    if bad {
        return Err(NetError::MapLoad(name.to_owned()));
    }
    Ok(())
}

/// Loads `maps/<name>.map` and, if present, `maps7/<name>.map` below a root.
#[derive(Clone, Debug)]
pub struct DirMapSource {
    root: PathBuf,
}

impl DirMapSource {
    /// Creates a source reading below `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl MapSource for DirMapSource {
    fn load(&mut self, name: &str) -> NetResult<LoadedMap> {
        validate_name(name)?;
        let file_name = format!("{name}.map");
        let legacy = std::fs::read(self.root.join("maps").join(&file_name))
            .map_err(|_| NetError::MapLoad(name.to_owned()))?;
        let sixup = std::fs::read(self.root.join("maps7").join(&file_name)).ok();

        Ok(LoadedMap {
            name: short_name(name).to_owned(),
            legacy: MapFile::new(legacy),
            sixup: sixup.map(MapFile::new),
        })
    }
}

/// Maps held in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryMapSource {
    maps: HashMap<String, (Vec<u8>, Option<Vec<u8>>)>,
}

impl MemoryMapSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a map, builder style.
    #[must_use]
    pub fn with_map(mut self, name: &str, legacy: Vec<u8>, sixup: Option<Vec<u8>>) -> Self {
        self.insert(name, legacy, sixup);
        self
    }

    /// Adds or replaces a map.
    pub fn insert(&mut self, name: &str, legacy: Vec<u8>, sixup: Option<Vec<u8>>) {
        self.maps.insert(name.to_owned(), (legacy, sixup));
    }
}

impl MapSource for MemoryMapSource {
    fn load(&mut self, name: &str) -> NetResult<LoadedMap> {
        validate_name(name)?;
        let (legacy, sixup) = self
            .maps
            .get(name)
            .ok_or_else(|| NetError::MapLoad(name.to_owned()))?;
        Ok(LoadedMap {
            name: short_name(name).to_owned(),
            legacy: MapFile::new(legacy.clone()),
            sixup: sixup.clone().map(MapFile::new),
        })
    }
}

/// Map name without its directory.
#[must_use]
pub fn short_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}
