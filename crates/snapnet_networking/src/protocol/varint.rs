//! # Variable-Length Integers
//!
//! Sign-folded little-endian base-128 encoding used for every integer on the
//! wire and as the default byte codec for snapshot deltas.
//!
//! ```text
//! byte 0:  [E][S][d5 d4 d3 d2 d1 d0]     E = extend, S = sign
//! byte n:  [E][d6 d5 d4 d3 d2 d1 d0]
//! ```

/// Largest encoded size of one integer.
pub const MAX_VARINT_BYTES: usize = 5;

/// Appends `value` to `out`.
pub fn pack(value: i32, out: &mut Vec<u8>) {
    let mut rest = value;
    let mut first = 0u8;
    if rest < 0 {
        first |= 0x40;
        rest = !rest;
    }

    first |= (rest & 0x3f) as u8;
    rest >>= 6;
    if rest != 0 {
        first |= 0x80;
    }
    out.push(first);

    while rest != 0 {
        let mut byte = (rest & 0x7f) as u8;
        rest >>= 7;
        if rest != 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
}

/// Reads one integer from the front of `data`.
///
/// # Returns
///
/// The value and the number of bytes consumed, or `None` when `data` ends in
/// the middle of an integer.
#[must_use]
pub fn unpack(data: &[u8]) -> Option<(i32, usize)> {
    let first = *data.first()?;
    let sign = (first >> 6) & 1;
    let mut value = u32::from(first & 0x3f);
    let mut current = first;
    let mut consumed = 1;
    let mut shift = 6;

    while current & 0x80 != 0 && consumed < MAX_VARINT_BYTES {
        current = *data.get(consumed)?;
        value |= u32::from(current & 0x7f) << shift;
        shift += 7;
        consumed += 1;
    }

    let value = value as i32;
    Some((value ^ -i32::from(sign), consumed))
}

/// Packs a buffer of little-endian `i32` words into varints.
///
/// Returns `None` when the input length is not a multiple of four.
#[must_use]
pub fn compress(src: &[u8]) -> Option<Vec<u8>> {
    if src.len() % 4 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(src.len());
    for word in src.chunks_exact(4) {
        pack(i32::from_le_bytes([word[0], word[1], word[2], word[3]]), &mut out);
    }
    Some(out)
}

/// Expands a varint stream back into little-endian `i32` words.
#[must_use]
pub fn decompress(src: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(src.len() * 4);
    let mut pos = 0;
    while pos < src.len() {
        let (value, used) = unpack(&src[pos..])?;
        out.extend_from_slice(&value.to_le_bytes());
        pos += used;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: i32) -> Vec<u8> {
        let mut out = Vec::new();
        pack(value, &mut out);
        out
    }

    #[test]
    fn test_small_values_one_byte() {
        assert_eq!(encoded(0), vec![0x00]);
        assert_eq!(encoded(1), vec![0x01]);
        assert_eq!(encoded(63), vec![0x3f]);
        assert_eq!(encoded(-1), vec![0x40]);
        assert_eq!(encoded(-64), vec![0x7f]);
    }

    #[test]
    fn test_extension_byte() {
        // 64 needs a second byte: low six bits zero, extend set, then 1
        assert_eq!(encoded(64), vec![0x80, 0x01]);
        assert_eq!(unpack(&[0x80, 0x01]), Some((64, 2)));
    }

    #[test]
    fn test_extremes_fit_five_bytes() {
        for value in [i32::MAX, i32::MIN] {
            let bytes = encoded(value);
            assert_eq!(bytes.len(), MAX_VARINT_BYTES);
            assert_eq!(unpack(&bytes), Some((value, MAX_VARINT_BYTES)));
        }
    }

    #[test]
    fn test_truncated_input() {
        assert_eq!(unpack(&[]), None);
        assert_eq!(unpack(&[0x80]), None);
    }

    #[test]
    fn test_compress_rejects_ragged_buffer() {
        assert!(compress(&[1, 2, 3]).is_none());
    }

    #[test]
    fn test_compress_shrinks_small_words() {
        let words: Vec<u8> = [0i32, 5, -3, 1000, 0, 0]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        let packed = compress(&words).unwrap();
        assert!(packed.len() < words.len());
        assert_eq!(decompress(&packed).unwrap(), words);
    }
}
