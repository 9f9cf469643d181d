//! # Message Packing
//!
//! Bounded writer and reader for message payloads.
//!
//! ## Design
//!
//! - Integers are varints, strings are NUL-terminated, raw bytes are copied as is
//! - Both sides carry a sticky error flag: once a write overflows or a read runs
//!   past the end, every following call fails too

use super::varint;

/// Maximum payload a packer accepts.
pub const PACKER_BUFFER_SIZE: usize = 2048;

/// Payload writer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Packer {
    buffer: Vec<u8>,
    error: bool,
}

impl Packer {
    /// Creates an empty packer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64),
            error: false,
        }
    }

    /// Resets the packer for reuse.
    #[inline]
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.error = false;
    }

    /// Returns the number of bytes written.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no bytes have been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns true once any write overflowed.
    #[inline]
    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.error
    }

    /// Returns a slice of the written data.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Drops everything after the first `len` bytes.
    pub fn truncate(&mut self, len: usize) {
        self.buffer.truncate(len);
    }

    fn reserve(&mut self, additional: usize) -> bool {
        if self.error || self.buffer.len() + additional > PACKER_BUFFER_SIZE {
            self.error = true;
            return false;
        }
        true
    }

    /// Writes a variable-length integer.
    pub fn add_int(&mut self, value: i32) -> bool {
        if !self.reserve(varint::MAX_VARINT_BYTES) {
            return false;
        }
        varint::pack(value, &mut self.buffer);
        true
    }

    /// Writes a string truncated to `limit` bytes (0 = unlimited) plus a NUL.
    ///
    /// Truncation never splits a UTF-8 sequence.
    pub fn add_string(&mut self, value: &str, limit: usize) -> bool {
        let mut end = value.len();
        if limit > 0 && end > limit {
            end = limit;
            while !value.is_char_boundary(end) {
                end -= 1;
            }
        }
        let bytes = &value.as_bytes()[..end];
        let bytes = bytes.split(|&b| b == 0).next().unwrap_or_default();
        if !self.reserve(bytes.len() + 1) {
            return false;
        }
        self.buffer.extend_from_slice(bytes);
        self.buffer.push(0);
        true
    }

    /// Writes raw bytes.
    pub fn add_raw(&mut self, data: &[u8]) -> bool {
        if !self.reserve(data.len()) {
            return false;
        }
        self.buffer.extend_from_slice(data);
        true
    }
}

/// Payload reader over a borrowed buffer.
#[derive(Clone, Debug)]
pub struct Unpacker<'a> {
    data: &'a [u8],
    position: usize,
    error: bool,
}

impl<'a> Unpacker<'a> {
    /// Creates a reader positioned at the start of `data`.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            error: false,
        }
    }

    /// Returns true once any read failed.
    #[inline]
    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.error
    }

    /// Returns the unread tail.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.position..]
    }

    fn fail<T>(&mut self) -> Option<T> {
        self.error = true;
        None
    }

    /// Reads a variable-length integer.
    pub fn get_int(&mut self) -> Option<i32> {
        if self.error {
            return None;
        }
        match varint::unpack(self.remaining()) {
            Some((value, used)) => {
                self.position += used;
                Some(value)
            }
            None => self.fail(),
        }
    }

    /// Reads a NUL-terminated string that must be valid UTF-8.
    pub fn get_string(&mut self) -> Option<&'a str> {
        if self.error {
            return None;
        }
        let tail = self.remaining();
        let Some(end) = tail.iter().position(|&b| b == 0) else {
            return self.fail();
        };
        match std::str::from_utf8(&tail[..end]) {
            Ok(text) => {
                self.position += end + 1;
                Some(text)
            }
            Err(_) => self.fail(),
        }
    }

    /// Reads a string and strips ASCII control characters.
    pub fn get_sanitized_string(&mut self) -> Option<String> {
        self.get_string()
            .map(|s| s.chars().filter(|c| !c.is_ascii_control()).collect())
    }

    /// Reads exactly `len` raw bytes.
    pub fn get_raw(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.error {
            return None;
        }
        let tail = self.remaining();
        if len > tail.len() {
            return self.fail();
        }
        self.position += len;
        Some(&tail[..len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_payload() {
        let mut packer = Packer::new();
        assert!(packer.add_int(-7));
        assert!(packer.add_string("nameless tee", 0));
        assert!(packer.add_raw(&[1, 2, 3]));

        let mut unpacker = Unpacker::new(packer.as_slice());
        assert_eq!(unpacker.get_int(), Some(-7));
        assert_eq!(unpacker.get_string(), Some("nameless tee"));
        assert_eq!(unpacker.get_raw(3), Some(&[1u8, 2, 3][..]));
        assert!(unpacker.remaining().is_empty());
        assert!(!unpacker.has_error());
    }

    #[test]
    fn test_string_limit_respects_char_boundary() {
        let mut packer = Packer::new();
        // "é" is two bytes; a limit of 2 must not split it
        packer.add_string("aé", 2);
        assert_eq!(packer.as_slice(), b"a\0");
    }

    #[test]
    fn test_overflow_is_sticky() {
        let mut packer = Packer::new();
        assert!(!packer.add_raw(&[0u8; PACKER_BUFFER_SIZE + 1]));
        assert!(packer.has_error());
        assert!(!packer.add_int(1));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let data = [0xff, 0xfe, 0x00];
        let mut unpacker = Unpacker::new(&data);
        assert_eq!(unpacker.get_string(), None);
        assert!(unpacker.has_error());
        // Sticky
        assert_eq!(unpacker.get_int(), None);
    }

    #[test]
    fn test_missing_terminator() {
        let mut unpacker = Unpacker::new(b"abc");
        assert_eq!(unpacker.get_string(), None);
    }

    #[test]
    fn test_sanitized_string() {
        let mut packer = Packer::new();
        packer.add_string("a\tb\x07c", 0);
        let mut unpacker = Unpacker::new(packer.as_slice());
        assert_eq!(unpacker.get_sanitized_string().as_deref(), Some("abc"));
    }
}
