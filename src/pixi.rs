
//! The façade that assembles a complete container out of a header,
//! tag blocks, and iteratively written layers, and that reopens
//! finished containers for reading.

use crate::block::reader::ReadCache;
use crate::block::writer::IterativeLayerWriter;
use crate::error::{Error, Result, UnitResult};
use crate::io::{Sink, Source};
use crate::meta::channel::{ChannelType, Sample, Value};
use crate::meta::dimension::SampleCoordinate;
use crate::meta::layer::Layer;
use crate::meta::{tag_block, Header, MAX_CHAIN_LENGTH, NULL_OFFSET};

/// The in-memory summary of one container: its header, the tags read
/// or appended so far, and every layer record linked into the file.
///
/// The file itself is append-only behind the header: appending a tag
/// block or layer record only ever patches the one link slot that
/// points at the new record. A writer that dies before its layer
/// record is linked therefore leaves a detectably incomplete file.
#[derive(Debug)]
pub struct Pixi {

    /// The fixed prologue of the container.
    pub header: Header,

    /// All tag pairs, in insertion order, duplicates preserved.
    pub tags: Vec<(String, String)>,

    /// All layers linked into the container so far.
    pub layers: Vec<Layer>,

    /// File position of the link slot the next tag block patches.
    next_tag_slot: u64,

    /// File position of the link slot the next layer record patches.
    next_layer_slot: u64,
}

impl Pixi {

    /// A new, empty summary for a container about to be written.
    pub fn new(header: Header) -> Self {
        Pixi {
            header,
            tags: Vec::new(),
            layers: Vec::new(),
            next_tag_slot: header.first_tag_slot(),
            next_layer_slot: header.first_layer_slot(),
        }
    }

    /// Write the fixed prologue at the start of the sink.
    /// Must happen once, before anything else is appended.
    pub fn write_header(&self, sink: &mut impl Sink) -> UnitResult {
        self.header.write_to(sink)
    }

    /// The first value recorded for the given tag key, if any.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.iter()
            .find(|(tag_key, _)| tag_key == key)
            .map(|(_, value)| value.as_str())
    }

    /// Append one tag block and link it into the tag chain.
    pub fn append_tags(&mut self, sink: &mut impl Sink, pairs: &[(&str, &str)]) -> UnitResult {
        let (bytes, link_slot) = tag_block::write(pairs, self.header)?;
        let offset = sink.append(&bytes)?;

        self.patch_link(sink, self.next_tag_slot, offset)?;
        self.next_tag_slot = offset + link_slot as u64;

        self.tags.extend(pairs.iter().map(|(key, value)| (key.to_string(), value.to_string())));
        tracing::debug!(count = pairs.len(), "tag block appended");
        Ok(())
    }

    /// Drive the producer over the layer writer, finalize it, write the
    /// completed layer record, and link it into the layer chain. The sink
    /// travels through the writer's worker and is handed back for the
    /// next pass.
    ///
    /// The producer typically loops `while writer.next()`, reads
    /// `writer.coord()`, and calls `writer.set_sample(..)`. On any error,
    /// of the producer or of the writer, the record is neither written
    /// nor linked, and the error is returned after the worker has been
    /// joined.
    pub fn append_iterative_layer<W, F>(&mut self, mut writer: IterativeLayerWriter<W>, producer: F) -> Result<W>
        where W: Sink + Send + 'static, F: FnOnce(&mut IterativeLayerWriter<W>) -> UnitResult
    {
        let produced = producer(&mut writer);

        // join the worker even when the producer failed
        let finished = writer.done();
        produced?;
        finished?;

        let (mut sink, layer) = writer.finish()?;

        let (record_offset, link_slot) = layer.write_record(&mut sink, self.header)?;
        self.patch_link(&mut sink, self.next_layer_slot, record_offset)?;
        self.next_layer_slot = link_slot;

        tracing::debug!(
            layer = layer.name.as_str(),
            tiles = layer.disk_tile_count(),
            "layer record linked"
        );

        self.layers.push(layer);
        Ok(sink)
    }

    /// Build a coarser overview of an already written base layer:
    /// every overview value is the arithmetic mean of the
    /// `factor ^ dimensions` block of base samples it covers.
    ///
    /// The base layer is read back through a first-in-first-out tile
    /// cache over `source` (usually a freshly reopened handle of the
    /// same file the sink appends to), so no more than `cache_capacity`
    /// decoded base tiles are held at once. The overview channels must
    /// be a prefix of the base channels; trailing base channels are
    /// left out of the overview.
    ///
    /// Integer channels average over 64-bit sums with truncating
    /// division, so a constant region stays exactly constant.
    pub fn append_downsampled_layer<W, R>(
        &mut self,
        sink: W,
        source: R,
        base_layer_index: usize,
        layer: Layer,
        factor: usize,
        cache_capacity: usize,
    ) -> Result<(W, R)>
        where W: Sink + Send + 'static, R: Source
    {
        let base = self.layers.get(base_layer_index)
            .ok_or_else(|| Error::shape("base layer index out of range"))?
            .clone();

        if factor == 0 {
            return Err(Error::shape("downsampling factor must not be zero"));
        }

        if layer.dimensions.len() != base.dimensions.len() {
            return Err(Error::shape("overview dimension count differs from the base layer"));
        }

        for (overview, original) in layer.dimensions.list.iter().zip(&base.dimensions.list) {
            if overview.size * factor != original.size {
                return Err(Error::shape(format!(
                    "overview dimension `{}` of size {} does not cover size {} at factor {}",
                    overview.name, overview.size, original.size, factor
                )));
            }
        }

        if layer.channels.len() > base.channels.len() {
            return Err(Error::shape("overview has more channels than the base layer"));
        }

        for (overview, original) in layer.channels.list.iter().zip(&base.channels.list) {
            if overview.channel_type != original.channel_type {
                return Err(Error::type_mismatch(format!(
                    "overview channel `{}` does not match the base channel type",
                    overview.name
                )));
            }
        }

        let axes = layer.dimensions.len();
        let channel_types: Vec<ChannelType> = layer.channels.list.iter()
            .map(|channel| channel.channel_type)
            .collect();

        let block_samples = factor.pow(axes as u32);

        let cache = ReadCache::fifo(source, self.header, base, cache_capacity);
        let writer = IterativeLayerWriter::container_order(sink, self.header, layer);

        let sink = self.append_iterative_layer(writer, |writer| {
            let mut base_sample = Sample::new();
            let mut base_coordinate = SampleCoordinate::new();

            while writer.next() {
                let coordinate = writer.coord();

                let mut sums: Vec<Accumulator> = channel_types.iter()
                    .map(|&channel_type| Accumulator::new(channel_type))
                    .collect();

                for block_index in 0 .. block_samples {
                    base_coordinate.clear();
                    let mut remaining = block_index;
                    for axis in 0 .. axes {
                        base_coordinate.push(coordinate[axis] * factor + remaining % factor);
                        remaining /= factor;
                    }

                    cache.sample_into(&base_coordinate, &mut base_sample)?;
                    for (sum, &value) in sums.iter_mut().zip(base_sample.iter()) {
                        sum.add(value);
                    }
                }

                let sample: Sample = sums.iter()
                    .zip(&channel_types)
                    .map(|(sum, &channel_type)| sum.mean(block_samples as u64, channel_type))
                    .collect();

                writer.set_sample(&sample);
            }

            Ok(())
        })?;

        Ok((sink, cache.into_source()))
    }

    /// Reopen a finished container: parse the header,
    /// then follow the tag chain and the layer chain.
    /// Appending further tags or layers continues where the file ends.
    pub fn read_from(source: &mut impl Source) -> Result<Self> {
        let (header, first_tag, first_layer) = Header::read_with_links(source)?;
        let (tags, next_tag_slot) = tag_block::read_chain(source, header, first_tag)?;

        let mut layers = Vec::new();
        let mut next_layer_slot = header.first_layer_slot();
        let mut next = first_layer;

        while next != NULL_OFFSET {
            if layers.len() > MAX_CHAIN_LENGTH {
                return Err(Error::invalid("layer chain length"));
            }

            let (layer, following, link_slot) = Layer::read_record(source, header, next)?;
            layers.push(layer);
            next_layer_slot = link_slot;
            next = following;
        }

        Ok(Pixi { header, tags, layers, next_tag_slot, next_layer_slot })
    }

    /// Overwrite one link slot with the offset of a freshly appended record.
    fn patch_link(&self, sink: &mut impl Sink, slot: u64, target: u64) -> UnitResult {
        let mut bytes = Vec::with_capacity(8);
        self.header.offset_width.write_offset(&mut bytes, target, self.header.byte_order)?;
        sink.write_at(slot, &bytes)
    }
}

/// A per-channel running sum wide enough for whole-tile averages.
#[derive(Debug, Clone, Copy)]
enum Accumulator {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
}

impl Accumulator {

    fn new(channel_type: ChannelType) -> Self {
        use ChannelType::*;
        match channel_type {
            Bool | U8 | U16 | U32 | U64 => Accumulator::Unsigned(0),
            I8 | I16 | I32 | I64 => Accumulator::Signed(0),
            F32 | F64 => Accumulator::Float(0.0),
        }
    }

    fn add(&mut self, value: Value) {
        match (self, value) {
            (Accumulator::Unsigned(sum), Value::Bool(value)) => *sum += u64::from(value),
            (Accumulator::Unsigned(sum), Value::U8(value)) => *sum += u64::from(value),
            (Accumulator::Unsigned(sum), Value::U16(value)) => *sum += u64::from(value),
            (Accumulator::Unsigned(sum), Value::U32(value)) => *sum += u64::from(value),
            (Accumulator::Unsigned(sum), Value::U64(value)) => *sum += value,
            (Accumulator::Signed(sum), Value::I8(value)) => *sum += i64::from(value),
            (Accumulator::Signed(sum), Value::I16(value)) => *sum += i64::from(value),
            (Accumulator::Signed(sum), Value::I32(value)) => *sum += i64::from(value),
            (Accumulator::Signed(sum), Value::I64(value)) => *sum += value,
            (Accumulator::Float(sum), Value::F32(value)) => *sum += f64::from(value),
            (Accumulator::Float(sum), Value::F64(value)) => *sum += value,
            _ => {},
        }
    }

    fn mean(self, count: u64, channel_type: ChannelType) -> Value {
        use ChannelType::*;
        match (self, channel_type) {
            (Accumulator::Unsigned(sum), Bool) => Value::Bool(sum * 2 >= count),
            (Accumulator::Unsigned(sum), U8) => Value::U8((sum / count) as u8),
            (Accumulator::Unsigned(sum), U16) => Value::U16((sum / count) as u16),
            (Accumulator::Unsigned(sum), U32) => Value::U32((sum / count) as u32),
            (Accumulator::Unsigned(sum), U64) => Value::U64(sum / count),
            (Accumulator::Signed(sum), I8) => Value::I8((sum / count as i64) as i8),
            (Accumulator::Signed(sum), I16) => Value::I16((sum / count as i64) as i16),
            (Accumulator::Signed(sum), I32) => Value::I32((sum / count as i64) as i32),
            (Accumulator::Signed(sum), I64) => Value::I64(sum / count as i64),
            (Accumulator::Float(sum), F32) => Value::F32((sum / count as f64) as f32),
            (Accumulator::Float(sum), F64) => Value::F64(sum / count as f64),

            // accumulators are constructed from the channel type itself
            (_, other) => other.smallest(),
        }
    }
}
