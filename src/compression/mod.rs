
//! Contains the compression variants of the format
//! and methods to compress and decompress whole tile buffers.


// private modules make non-breaking changes easier
mod deflate;
mod lzw;
mod rle;

use crate::error::{Error, Result};

/// A byte vector.
pub type ByteVec = Vec<u8>;

/// Specifies which compression method to use for tile payloads.
/// All methods are lossless and operate on whole tiles;
/// there is no streaming state across tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {

    /// Store raw tile bytes.
    /// Produces large files that can be read and written very quickly.
    None,

    /// Raw deflate streams without a zlib envelope.
    /// Produces small files at moderate speed, and works
    /// well on most raster data.
    Deflate,

    /// TIFF-style LZW with least-significant-bit-first code packing.
    LzwLsb,

    /// TIFF-style LZW with most-significant-bit-first code packing.
    LzwMsb,

    /// Byte-oriented run-length encoding.
    /// Fast, and effective for tiles with large uniform areas,
    /// such as oceans and masks.
    Rle8,
}

impl Default for Compression {
    fn default() -> Self { Compression::None }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{} compression", match self {
            Compression::None => "no",
            Compression::Deflate => "deflate",
            Compression::LzwLsb => "lzw (lsb)",
            Compression::LzwMsb => "lzw (msb)",
            Compression::Rle8 => "rle8",
        })
    }
}

impl Compression {

    /// The compression id stored in a layer record.
    pub(crate) fn id(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Deflate => 1,
            Compression::LzwLsb => 2,
            Compression::LzwMsb => 3,
            Compression::Rle8 => 4,
        }
    }

    /// Look up a compression id read from a layer record.
    pub(crate) fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Deflate),
            2 => Ok(Compression::LzwLsb),
            3 => Ok(Compression::LzwMsb),
            4 => Ok(Compression::Rle8),
            _ => Err(Error::UnknownCodec(id)),
        }
    }

    /// Compress a whole raw tile buffer.
    /// The length of the result is what the tile index
    /// records as the on-disk size.
    pub fn compress(self, bytes: ByteVec) -> Result<ByteVec> {
        match self {
            Compression::None => Ok(bytes),
            Compression::Deflate => Ok(deflate::compress_bytes(&bytes)),
            Compression::LzwLsb => lzw::compress_bytes(&bytes, weezl::BitOrder::Lsb),
            Compression::LzwMsb => lzw::compress_bytes(&bytes, weezl::BitOrder::Msb),
            Compression::Rle8 => Ok(rle::compress_bytes(&bytes)),
        }
    }

    /// Decompress one tile payload back into raw tile bytes,
    /// validating the decoded length against the layer geometry.
    pub fn decompress(self, compressed: &[u8], expected_byte_size: usize) -> Result<ByteVec> {
        let bytes = match self {
            Compression::None => compressed.to_vec(),
            Compression::Deflate => deflate::decompress_bytes(compressed, expected_byte_size)?,
            Compression::LzwLsb => lzw::decompress_bytes(compressed, weezl::BitOrder::Lsb)?,
            Compression::LzwMsb => lzw::decompress_bytes(compressed, weezl::BitOrder::Msb)?,
            Compression::Rle8 => rle::decompress_bytes(compressed, expected_byte_size)?,
        };

        if bytes.len() != expected_byte_size {
            return Err(Error::corrupt("decompressed tile size"));
        }

        Ok(bytes)
    }
}


#[cfg(test)]
pub mod test {
    use super::*;
    use rand::{Rng, SeedableRng};

    const ALL: [Compression; 5] = [
        Compression::None, Compression::Deflate,
        Compression::LzwLsb, Compression::LzwMsb,
        Compression::Rle8,
    ];

    fn roundtrip(compression: Compression, bytes: &[u8]) {
        let compressed = compression.compress(bytes.to_vec()).unwrap();
        let decompressed = compression.decompress(&compressed, bytes.len()).unwrap();
        assert_eq!(decompressed, bytes, "{} roundtrip failed", compression);
    }

    #[test]
    fn roundtrip_all_zero() {
        for &compression in &ALL {
            roundtrip(compression, &[0_u8; 4096]);
        }
    }

    #[test]
    fn roundtrip_all_ones() {
        for &compression in &ALL {
            roundtrip(compression, &[0xff_u8; 4096]);
        }
    }

    #[test]
    fn roundtrip_empty() {
        for &compression in &ALL {
            roundtrip(compression, &[]);
        }
    }

    #[test]
    fn roundtrip_adversarial_runs() {
        // run lengths around the 127/128/129 encoder boundaries
        let mut bytes = Vec::new();
        for &run in &[1_usize, 2, 3, 126, 127, 128, 129, 130, 255, 256, 257] {
            let value = (run % 251) as u8;
            bytes.extend(std::iter::repeat(value).take(run));
            bytes.push(value.wrapping_add(1));
        }

        for &compression in &ALL {
            roundtrip(compression, &bytes);
        }
    }

    #[test]
    fn roundtrip_random_bytes() {
        let mut random = rand::rngs::StdRng::seed_from_u64(42);

        for _ in 0 .. 16 {
            let length = random.gen_range(0 .. 4096);
            let bytes: Vec<u8> = (0 .. length).map(|_| random.gen()).collect();

            for &compression in &ALL {
                roundtrip(compression, &bytes);
            }
        }
    }

    #[test]
    fn wrong_decoded_size_is_corrupt() {
        for &compression in &ALL {
            let compressed = compression.compress(vec![7_u8; 64]).unwrap();
            assert!(matches!(
                compression.decompress(&compressed, 65),
                Err(Error::CorruptTile(_))
            ));
        }
    }

    #[test]
    fn unknown_codec_id_is_rejected() {
        assert!(matches!(Compression::from_id(5), Err(Error::UnknownCodec(5))));
        for id in 0 .. 5 {
            assert_eq!(Compression::from_id(id).unwrap().id(), id);
        }
    }
}
