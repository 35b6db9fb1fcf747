
//! Move tiles between in-memory sample buffers and their compressed
//! on-disk payloads: the iterative layer writer and the caching reader.

pub mod reader;
pub mod writer;

use crate::meta::layer::Layer;
use smallvec::SmallVec;

/// The in-flight buffers of the tile currently being filled:
/// a single buffer for interleaved layers, one per channel for planar.
#[derive(Debug, Clone)]
pub(crate) enum TileBuffers {
    Interleaved(Vec<u8>),
    Planar(SmallVec<[Vec<u8>; 4]>),
}

impl TileBuffers {

    /// Fresh zeroed buffers for one tile of the layer.
    pub(crate) fn allocate(layer: &Layer) -> Self {
        if layer.planar {
            let tiles_per_plane = layer.dimensions.tiles_per_plane();

            TileBuffers::Planar(
                (0 .. layer.channels.len())
                    .map(|channel| vec![0_u8; layer.decoded_tile_size(channel * tiles_per_plane)])
                    .collect()
            )
        }
        else {
            TileBuffers::Interleaved(vec![0_u8; layer.decoded_tile_size(0)])
        }
    }
}
