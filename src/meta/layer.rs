
//! A single layer of a container: its shape descriptors, storage
//! options, and the tile index locating every compressed payload.

use crate::compression::Compression;
use crate::error::{Error, Result};
use crate::io::{Data, Sink, Source, SourceReader};
use crate::io::{read_string, write_string};
use crate::meta::channel::{Channel, ChannelSet, ChannelType};
use crate::meta::dimension::{Dimension, DimensionSet};
use crate::meta::{Header, MAX_CHAIN_LENGTH, NULL_OFFSET};
use smallvec::SmallVec;

/// Where one compressed tile payload lives in the file.
/// A null file offset marks a tile that has not been written yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TileIndexEntry {

    /// Offset of the payload in the file. Never zero once written,
    /// as offset zero is occupied by the header.
    pub file_offset: u64,

    /// Number of compressed bytes stored at the offset.
    pub on_disk_size: u64,
}

impl TileIndexEntry {

    /// Whether this tile has been written yet.
    pub fn is_written(self) -> bool {
        self.file_offset != NULL_OFFSET
    }
}

/// Storage options of a new layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerOptions {

    /// Store each channel in its own tiles instead of
    /// interleaving all channels of a sample.
    pub planar: bool,

    /// How tile payloads are compressed on disk.
    pub compression: Compression,
}

impl Default for LayerOptions {
    fn default() -> Self {
        LayerOptions { planar: false, compression: Compression::None }
    }
}

/// One named raster layer of a container.
///
/// While a layer is being written, the tile index and the channel
/// envelopes accumulate in memory; the record is serialized to the
/// file only when the layer writer is finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {

    /// Name of the layer, unique within sensible containers.
    pub name: String,

    /// Whether each channel occupies its own tiles.
    pub planar: bool,

    /// How tile payloads are compressed on disk.
    pub compression: Compression,

    /// The axes of this layer.
    pub dimensions: DimensionSet,

    /// The channels of this layer.
    pub channels: ChannelSet,

    /// One entry per tile, or per (channel, tile) for planar layers:
    /// the plane of channel `c` occupies entries `[c·T, (c+1)·T)`
    /// where `T` is the number of tiles per plane.
    pub tile_index: Vec<TileIndexEntry>,
}

impl Layer {

    /// A new in-memory layer with an all-unwritten tile index.
    /// Fails when a dimension cannot be split into whole tiles
    /// or when dimensions or channels are empty.
    pub fn new(
        name: impl Into<String>,
        dimensions: impl Into<SmallVec<[Dimension; 2]>>,
        channels: impl Into<SmallVec<[Channel; 4]>>,
        options: LayerOptions,
    ) -> Result<Self>
    {
        let dimensions = DimensionSet::new(dimensions);
        let channels = ChannelSet::new(channels);
        dimensions.validate()?;
        channels.validate()?;

        let planes = if options.planar { channels.len() } else { 1 };
        let tile_index = vec![TileIndexEntry::default(); dimensions.tiles_per_plane() * planes];

        Ok(Layer {
            name: name.into(),
            planar: options.planar,
            compression: options.compression,
            dimensions, channels, tile_index,
        })
    }

    /// Number of entries in the tile index.
    pub fn disk_tile_count(&self) -> usize {
        self.tile_index.len()
    }

    /// The tile index entry of a (tile, channel) pair.
    /// For interleaved layers the channel is ignored.
    pub fn disk_tile_of(&self, tile: usize, channel: usize) -> usize {
        if self.planar { channel * self.dimensions.tiles_per_plane() + tile }
        else { tile }
    }

    /// Decompressed byte size of the given disk tile. Planar bool
    /// planes are bit-packed and rounded up to whole bytes.
    pub fn decoded_tile_size(&self, disk_tile: usize) -> usize {
        let samples = self.dimensions.samples_per_tile();

        if self.planar {
            let channel = disk_tile / self.dimensions.tiles_per_plane();
            match self.channels[channel].channel_type {
                ChannelType::Bool => (samples + 7) / 8,
                other => samples * other.byte_size(),
            }
        }
        else {
            samples * self.channels.bytes_per_sample
        }
    }

    /// Serialize the complete record, including the full tile index
    /// table in one contiguous block, and append it to the sink.
    /// Returns the record offset and the file position of the
    /// null next-layer link slot at its end.
    pub(crate) fn write_record(&self, sink: &mut impl Sink, header: Header) -> Result<(u64, u64)> {
        let order = header.byte_order;
        let offsets = header.offset_width;

        let mut bytes = Vec::new();
        write_string(&mut bytes, &self.name, order, offsets)?;
        (self.planar as u8).write_ordered(&mut bytes, order)?;
        self.compression.id().write_ordered(&mut bytes, order)?;

        offsets.write_offset(&mut bytes, self.dimensions.len() as u64, order)?;
        for dimension in &self.dimensions.list {
            dimension.write(&mut bytes, order, offsets)?;
        }

        offsets.write_offset(&mut bytes, self.channels.len() as u64, order)?;
        for channel in &self.channels.list {
            channel.write(&mut bytes, order, offsets)?;
        }

        offsets.write_offset(&mut bytes, self.tile_index.len() as u64, order)?;
        for entry in &self.tile_index {
            offsets.write_offset(&mut bytes, entry.file_offset, order)?;
            offsets.write_offset(&mut bytes, entry.on_disk_size, order)?;
        }

        let link_slot = bytes.len();
        offsets.write_offset(&mut bytes, NULL_OFFSET, order)?;

        let record_offset = sink.append(&bytes)?;
        Ok((record_offset, record_offset + link_slot as u64))
    }

    /// Parse one record at the given offset. Returns the layer,
    /// the offset of the next record (null at the end of the chain),
    /// and the file position of the next-layer link slot.
    pub(crate) fn read_record(source: &mut impl Source, header: Header, offset: u64) -> Result<(Self, u64, u64)> {
        let order = header.byte_order;
        let offsets = header.offset_width;
        let mut read = SourceReader::new(source, offset);

        let name = read_string(&mut read, order, offsets)?;

        let flags = u8::read_ordered(&mut read, order)?;
        if flags & !1 != 0 {
            return Err(Error::invalid("layer flags"));
        }

        let compression = Compression::from_id(u8::read_ordered(&mut read, order)?)?;

        let dimension_count = offsets.read_offset(&mut read, order)? as usize;
        if dimension_count > MAX_CHAIN_LENGTH {
            return Err(Error::invalid("dimension count"));
        }

        let mut dimensions = SmallVec::with_capacity(dimension_count);
        for _ in 0 .. dimension_count {
            dimensions.push(Dimension::read(&mut read, order, offsets)?);
        }

        let channel_count = offsets.read_offset(&mut read, order)? as usize;
        if channel_count > MAX_CHAIN_LENGTH {
            return Err(Error::invalid("channel count"));
        }

        let mut channels = SmallVec::with_capacity(channel_count);
        for _ in 0 .. channel_count {
            channels.push(Channel::read(&mut read, order, offsets)?);
        }

        let mut layer = Layer::new(name, dimensions, channels, LayerOptions {
            planar: flags & 1 != 0,
            compression,
        })?;

        let tile_count = offsets.read_offset(&mut read, order)? as usize;
        if tile_count != layer.tile_index.len() {
            return Err(Error::invalid("tile index length"));
        }

        for entry in &mut layer.tile_index {
            entry.file_offset = offsets.read_offset(&mut read, order)?;
            entry.on_disk_size = offsets.read_offset(&mut read, order)?;
        }

        let link_slot = read.byte_position();
        let next = offsets.read_offset(&mut read, order)?;

        Ok((layer, next, link_slot))
    }
}
