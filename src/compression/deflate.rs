// see https://www.rfc-editor.org/rfc/rfc1951

use super::ByteVec;
use crate::error::{Error, Result};

// compression level 4 trades speed against size
// about as well as for the image data this usually carries
const COMPRESSION_LEVEL: u8 = 4;

/// Compress a tile buffer into a raw deflate stream (no zlib envelope).
pub fn compress_bytes(bytes: &[u8]) -> ByteVec {
    miniz_oxide::deflate::compress_to_vec(bytes, COMPRESSION_LEVEL)
}

/// Decompress a raw deflate stream back into tile bytes.
pub fn decompress_bytes(compressed: &[u8], expected_byte_size: usize) -> Result<ByteVec> {
    let options = zune_inflate::DeflateOptions::default()
        .set_limit(expected_byte_size)
        .set_size_hint(expected_byte_size);

    let mut decoder = zune_inflate::DeflateDecoder::new_with_options(compressed, options);
    decoder.decode_deflate()
        .map_err(|_| Error::corrupt("deflate stream malformed"))
}


#[cfg(test)]
mod test {

    #[test]
    fn raw_stream_roundtrip() {
        let compressed = super::compress_bytes(&[1, 2, 3, 4]);
        assert_eq!(super::decompress_bytes(&compressed, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn truncated_stream_is_corrupt() {
        let compressed = super::compress_bytes(&[7_u8; 512]);
        assert!(super::decompress_bytes(&compressed[.. compressed.len() / 2], 512).is_err());
    }
}
