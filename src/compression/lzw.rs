// see https://download.osgeo.org/libtiff/doc/TIFF6.pdf, section 13

use super::ByteVec;
use crate::error::{Error, Result};
use weezl::BitOrder;

/// Compress a tile buffer with tiff-style lzw in the given bit order.
pub fn compress_bytes(bytes: &[u8], bit_order: BitOrder) -> Result<ByteVec> {
    weezl::encode::Encoder::with_tiff_size_switch(bit_order, 8)
        .encode(bytes)
        .map_err(|_| Error::corrupt("lzw stream unencodable"))
}

/// Decompress a tiff-style lzw stream back into tile bytes.
pub fn decompress_bytes(compressed: &[u8], bit_order: BitOrder) -> Result<ByteVec> {
    weezl::decode::Decoder::with_tiff_size_switch(bit_order, 8)
        .decode(compressed)
        .map_err(|_| Error::corrupt("lzw stream malformed"))
}
