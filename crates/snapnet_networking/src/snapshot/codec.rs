//! # Delta Byte Codecs
//!
//! Lossless compression stage applied to delta bytes before they go on the
//! wire. Swappable; every codec must reproduce its input byte for byte.

/// A lossless byte codec.
pub trait DeltaCodec: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Compresses `data`. Returns `None` if the input is not encodable.
    fn compress(&self, data: &[u8]) -> Option<Vec<u8>>;

    /// Reverses [`DeltaCodec::compress`]. Returns `None` on corrupt input.
    fn decompress(&self, data: &[u8]) -> Option<Vec<u8>>;
}

/// Word-wise variable-length integer packing. Understood by every client.
#[derive(Clone, Copy, Debug, Default)]
pub struct VarIntCodec;

impl DeltaCodec for VarIntCodec {
    fn name(&self) -> &'static str {
        "varint"
    }

    fn compress(&self, data: &[u8]) -> Option<Vec<u8>> {
        crate::protocol::varint::compress(data)
    }

    fn decompress(&self, data: &[u8]) -> Option<Vec<u8>> {
        crate::protocol::varint::decompress(data)
    }
}

/// LZ4 block compression with a size prefix.
#[derive(Clone, Copy, Debug, Default)]
pub struct Lz4Codec;

impl DeltaCodec for Lz4Codec {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn compress(&self, data: &[u8]) -> Option<Vec<u8>> {
        Some(lz4_flex::compress_prepend_size(data))
    }

    fn decompress(&self, data: &[u8]) -> Option<Vec<u8>> {
        lz4_flex::decompress_size_prepended(data).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{create_delta, ItemSizes, SnapItem, Snapshot};

    fn sample_delta() -> Vec<u8> {
        let from = Snapshot::from_items(vec![SnapItem::new(1, 0, vec![0; 16])]);
        let to = Snapshot::from_items(vec![
            SnapItem::new(1, 0, (0..16).collect()),
            SnapItem::new(2, 3, vec![-7, 1 << 20]),
        ]);
        create_delta(&from, &to, &ItemSizes::new())
    }

    #[test]
    fn test_codecs_are_lossless() {
        let delta = sample_delta();
        let codecs: [Box<dyn DeltaCodec>; 2] = [Box::new(VarIntCodec), Box::new(Lz4Codec)];
        for codec in &codecs {
            let packed = codec.compress(&delta).unwrap();
            assert_eq!(codec.decompress(&packed).unwrap(), delta, "codec {}", codec.name());
        }
    }

    #[test]
    fn test_varint_shrinks_delta() {
        let delta = sample_delta();
        assert!(VarIntCodec.compress(&delta).unwrap().len() < delta.len());
    }

    #[test]
    fn test_lz4_rejects_garbage() {
        assert!(Lz4Codec.decompress(&[100, 0, 0, 0, 0xf0]).is_none());
    }
}
