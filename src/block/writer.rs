
//! Write the samples of one layer in tile scan order, sealing each
//! filled tile into a bounded queue that a background worker
//! compresses and appends to the backing sink.

use crate::block::TileBuffers;
use crate::compression::Compression;
use crate::error::{Error, Result, UnitResult};
use crate::io::{ByteOrder, Sink};
use crate::meta::Header;
use crate::meta::channel::{pack_bool, ChannelType, Value};
use crate::meta::dimension::{SampleCoordinate, TileSelector};
use crate::meta::layer::{Layer, TileIndexEntry};
use smallvec::SmallVec;
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

/// Number of sealed tiles the write queue holds before
/// the producer blocks on the worker.
const WRITE_QUEUE_CAPACITY: usize = 100;

/// One sealed tile on its way to the file.
struct TileWriteCommand {
    tile: usize,
    buffers: TileBuffers,
}

/// What the worker hands back when it is joined.
struct WorkerOutcome<W> {
    sink: W,
    tile_index: Vec<TileIndexEntry>,
}

/// Writes one layer sample by sample. The writer visits every
/// coordinate of the layer exactly once; which tile order it
/// visits them in depends on the construction variant.
///
/// Use it in a loop of the form
/// `while writer.next() { let coord = writer.coord(); writer.set_sample(..); }`,
/// and finalize with [`IterativeLayerWriter::done`]. Any error, on either
/// side of the queue, latches into a sticky slot: subsequent `next` calls
/// return `false`, `set_*` calls do nothing, and `done` surfaces the error.
pub struct IterativeLayerWriter<W> {
    layer: Layer,
    byte_order: ByteOrder,
    samples_per_tile: usize,

    order: WriteOrder,
    in_tile: usize,
    started: bool,
    exhausted: bool,
    buffers: TileBuffers,

    sender: Option<flume::Sender<TileWriteCommand>>,
    worker: Option<JoinHandle<WorkerOutcome<W>>>,
    sticky: Arc<RwLock<Option<Error>>>,
    finished: Option<Option<Error>>,
    outcome: Option<WorkerOutcome<W>>,
}

impl<W> std::fmt::Debug for IterativeLayerWriter<W> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("IterativeLayerWriter")
            .field("layer", &self.layer.name)
            .field("order", &self.order)
            .field("in_tile", &self.in_tile)
            .finish()
    }
}

/// The tile visit order of a writer.
#[derive(Debug)]
enum WriteOrder {

    /// Row-major over the container tile grid, dimension 0 fastest.
    ContainerOrder {
        tile: usize,
        tile_count: usize,
    },

    /// Row-major inside each tile of a coarser source grid, so a
    /// producer reading foreign tiles keeps only one of them live.
    SourceTileOrder {
        source_tile: usize,
        tile_in_source: usize,

        /// container tiles per source tile, per axis
        factors: SmallVec<[usize; 2]>,
        /// source tiles per axis
        source_tiles: SmallVec<[usize; 2]>,
        /// container tiles per axis
        container_tiles: SmallVec<[usize; 2]>,

        tiles_per_source: usize,
        source_tile_count: usize,
    },
}

impl WriteOrder {

    /// The container tile the cursor is currently filling.
    fn current_tile(&self) -> usize {
        match self {
            WriteOrder::ContainerOrder { tile, .. } => *tile,

            WriteOrder::SourceTileOrder {
                source_tile, tile_in_source,
                factors, source_tiles, container_tiles, ..
            } => {
                let mut tile = 0;
                let mut stride = 1;
                let mut remaining_source = *source_tile;
                let mut remaining_in_source = *tile_in_source;

                for axis in 0 .. factors.len() {
                    let source_axis = remaining_source % source_tiles[axis];
                    let in_source_axis = remaining_in_source % factors[axis];
                    remaining_source /= source_tiles[axis];
                    remaining_in_source /= factors[axis];

                    tile += (source_axis * factors[axis] + in_source_axis) * stride;
                    stride *= container_tiles[axis];
                }

                tile
            },
        }
    }

    /// Advance to the next tile of the visit order.
    /// Returns false once every tile has been visited.
    fn advance(&mut self) -> bool {
        match self {
            WriteOrder::ContainerOrder { tile, tile_count } => {
                *tile += 1;
                *tile < *tile_count
            },

            WriteOrder::SourceTileOrder {
                source_tile, tile_in_source,
                tiles_per_source, source_tile_count, ..
            } => {
                *tile_in_source += 1;
                if *tile_in_source == *tiles_per_source {
                    *tile_in_source = 0;
                    *source_tile += 1;
                }

                *source_tile < *source_tile_count
            },
        }
    }
}

impl<W: Sink + Send + 'static> IterativeLayerWriter<W> {

    /// A writer that visits tiles in row-major container order.
    pub fn container_order(sink: W, header: Header, layer: Layer) -> Self {
        let order = WriteOrder::ContainerOrder {
            tile: 0,
            tile_count: layer.dimensions.tiles_per_plane(),
        };

        Self::spawn(sink, header, layer, order)
    }

    /// A writer for producers that emit samples in the scan order of a
    /// coarser input tile grid. Each source tile size must be an integer
    /// multiple of the container tile size along its axis, and must
    /// divide the dimension size. Within one source tile, the writer
    /// visits each contained container tile fully, one after another,
    /// so the emission order differs from container row-major while the
    /// tile index, built by tile id, stays fully general.
    pub fn source_tile_order(sink: W, header: Header, layer: Layer, source_tile_sizes: &[usize]) -> Result<Self> {
        if source_tile_sizes.len() != layer.dimensions.len() {
            return Err(Error::shape("one source tile size is required per dimension"));
        }

        let mut factors = SmallVec::new();
        let mut source_tiles = SmallVec::new();
        let mut container_tiles = SmallVec::new();

        for (dimension, &source_size) in layer.dimensions.list.iter().zip(source_tile_sizes) {
            if source_size == 0 || source_size % dimension.tile_size != 0 {
                return Err(Error::shape(format!(
                    "source tile size {} is not a multiple of tile size {} in dimension `{}`",
                    source_size, dimension.tile_size, dimension.name
                )));
            }

            if dimension.size % source_size != 0 {
                return Err(Error::shape(format!(
                    "dimension `{}` of size {} cannot be split into source tiles of size {}",
                    dimension.name, dimension.size, source_size
                )));
            }

            factors.push(source_size / dimension.tile_size);
            source_tiles.push(dimension.size / source_size);
            container_tiles.push(dimension.tiles());
        }

        let order = WriteOrder::SourceTileOrder {
            source_tile: 0,
            tile_in_source: 0,
            tiles_per_source: factors.iter().product(),
            source_tile_count: source_tiles.iter().product(),
            factors, source_tiles, container_tiles,
        };

        Ok(Self::spawn(sink, header, layer, order))
    }

    /// Start the writer worker owning the sink and the tile index.
    fn spawn(mut sink: W, header: Header, layer: Layer, order: WriteOrder) -> Self {
        let buffers = TileBuffers::allocate(&layer);
        let samples_per_tile = layer.dimensions.samples_per_tile();

        let (sender, receiver) = flume::bounded::<TileWriteCommand>(WRITE_QUEUE_CAPACITY);
        let sticky = Arc::new(RwLock::new(None));

        let mut tile_index = layer.tile_index.clone();
        let compression = layer.compression;
        let tiles_per_plane = layer.dimensions.tiles_per_plane();
        let worker_sticky = Arc::clone(&sticky);

        let worker = std::thread::spawn(move || {
            for command in receiver.iter() {
                let written = write_tile_command(
                    &mut sink, &mut tile_index,
                    compression, tiles_per_plane, command
                );

                if let Err(error) = written {
                    {
                        let mut slot = worker_sticky.write().expect("sticky error slot poisoned");
                        if slot.is_none() { *slot = Some(error); }
                    }

                    // drain remaining commands without touching the sink,
                    // so a full queue cannot deadlock the producer
                    for _ in receiver.iter() {}
                    break;
                }
            }

            WorkerOutcome { sink, tile_index }
        });

        IterativeLayerWriter {
            layer,
            byte_order: header.byte_order,
            samples_per_tile,
            order,
            in_tile: 0,
            started: false,
            exhausted: false,
            buffers,
            sender: Some(sender),
            worker: Some(worker),
            sticky,
            finished: None,
            outcome: None,
        }
    }

    /// The layer this writer fills, with the channel envelopes
    /// observed so far.
    pub fn layer(&self) -> &Layer {
        &self.layer
    }

    /// Advance the cursor to the next sample coordinate.
    /// Returns false when the layer is complete or an error is latched.
    pub fn next(&mut self) -> bool {
        if self.exhausted || self.error().is_some() {
            return false;
        }

        if !self.started {
            self.started = true;
            return true;
        }

        self.in_tile += 1;
        if self.in_tile == self.samples_per_tile {
            self.in_tile = 0;
            return self.seal_current_tile();
        }

        true
    }

    /// The sample coordinate the cursor currently points at.
    /// Only meaningful after `next` returned true.
    pub fn coord(&self) -> SampleCoordinate {
        self.layer.dimensions.coordinate_of(TileSelector {
            tile: self.order.current_tile(),
            in_tile: self.in_tile,
        })
    }

    /// Write all channel values at the current coordinate.
    /// Performs no I/O; tiles only reach the file once sealed.
    pub fn set_sample(&mut self, sample: &[Value]) {
        if self.error().is_some() {
            return;
        }

        if sample.len() != self.layer.channels.len() {
            self.latch(Error::shape(format!(
                "sample has {} values, layer has {} channels",
                sample.len(), self.layer.channels.len()
            )));

            return;
        }

        for (channel_index, &value) in sample.iter().enumerate() {
            self.set_channel(channel_index, value);
        }
    }

    /// Write a single channel value at the current coordinate,
    /// widening the channel envelope. Performs no I/O.
    pub fn set_channel(&mut self, channel_index: usize, value: Value) {
        if self.error().is_some() {
            return;
        }

        if self.sender.is_none() {
            self.latch(Error::WriterClosed);
            return;
        }

        if self.exhausted {
            return;
        }

        let channel_type = match self.layer.channels.list.get(channel_index) {
            Some(channel) => channel.channel_type,
            None => {
                self.latch(Error::shape(format!("channel index {} out of range", channel_index)));
                return;
            },
        };

        if value.channel_type() != channel_type {
            self.latch(Error::type_mismatch(format!(
                "channel `{}` holds {:?} values",
                self.layer.channels[channel_index].name, channel_type
            )));

            return;
        }

        self.layer.channels.list[channel_index].widen(value);

        let packed = match &mut self.buffers {
            TileBuffers::Planar(planes) => {
                let plane = &mut planes[channel_index];

                if channel_type == ChannelType::Bool {
                    if let Value::Bool(value) = value {
                        pack_bool(value, plane, self.in_tile);
                    }

                    Ok(())
                }
                else {
                    let offset = self.in_tile * channel_type.byte_size();
                    value.write_ordered(&mut &mut plane[offset ..], self.byte_order)
                }
            },

            TileBuffers::Interleaved(buffer) => {
                let offset = self.in_tile * self.layer.channels.bytes_per_sample
                    + self.layer.channels.offset_of(channel_index);

                value.write_ordered(&mut &mut buffer[offset ..], self.byte_order)
            },
        };

        if let Err(error) = packed {
            self.latch(error);
        }
    }

    /// The latched error, if any. Once an error is latched, all further
    /// `set_*` calls do nothing and `next` returns false.
    pub fn error(&self) -> Option<Error> {
        self.sticky.read().expect("sticky error slot poisoned").clone()
    }

    /// Close the queue, wait until every sealed tile has been compressed,
    /// appended, and recorded in the tile index, and surface the first
    /// latched error. Idempotent: repeated calls return the same outcome
    /// and never repeat finalization work.
    pub fn done(&mut self) -> UnitResult {
        if let Some(frozen) = &self.finished {
            return match frozen {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            };
        }

        drop(self.sender.take());

        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(outcome) => self.outcome = Some(outcome),
                Err(_) => self.latch(Error::WriterClosed),
            }
        }

        let error = self.error();
        self.finished = Some(error.clone());

        match error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Finalize if necessary, then hand back the sink and the completed
    /// layer with its filled tile index and channel envelopes.
    pub fn finish(mut self) -> Result<(W, Layer)> {
        self.done()?;

        let outcome = self.outcome.take().ok_or(Error::WriterClosed)?;
        let mut layer = self.layer;
        layer.tile_index = outcome.tile_index;

        Ok((outcome.sink, layer))
    }

    /// Seal the filled tile into the queue and move to the next one.
    /// Returns false when this was the last tile of the layer.
    fn seal_current_tile(&mut self) -> bool {
        let sealed_tile = self.order.current_tile();
        let more = self.order.advance();

        let buffers = if more {
            std::mem::replace(&mut self.buffers, TileBuffers::allocate(&self.layer))
        }
        else {
            self.exhausted = true;
            std::mem::replace(&mut self.buffers, TileBuffers::Interleaved(Vec::new()))
        };

        let command = TileWriteCommand { tile: sealed_tile, buffers };

        if let Some(sender) = &self.sender {
            // blocks while the queue is full, providing backpressure
            if sender.send(command).is_err() {
                self.latch(Error::WriterClosed);
                return false;
            }
        }

        more
    }

    fn latch(&self, error: Error) {
        let mut slot = self.sticky.write().expect("sticky error slot poisoned");
        if slot.is_none() {
            *slot = Some(error);
        }
    }
}

/// Compress and append one sealed tile, or every channel plane
/// of it for planar layers, recording the tile index entries.
fn write_tile_command<W: Sink>(
    sink: &mut W,
    tile_index: &mut [TileIndexEntry],
    compression: Compression,
    tiles_per_plane: usize,
    command: TileWriteCommand,
) -> UnitResult
{
    match command.buffers {
        TileBuffers::Interleaved(buffer) =>
            write_disk_tile(sink, tile_index, compression, command.tile, buffer),

        TileBuffers::Planar(planes) => {
            for (channel, buffer) in planes.into_iter().enumerate() {
                write_disk_tile(sink, tile_index, compression, channel * tiles_per_plane + command.tile, buffer)?;
            }

            Ok(())
        },
    }
}

fn write_disk_tile<W: Sink>(
    sink: &mut W,
    tile_index: &mut [TileIndexEntry],
    compression: Compression,
    disk_tile: usize,
    buffer: Vec<u8>,
) -> UnitResult
{
    let compressed = compression.compress(buffer)?;
    let file_offset = sink.append(&compressed)?;

    let entry = &mut tile_index[disk_tile];
    debug_assert!(!entry.is_written(), "tile {} sealed twice", disk_tile);
    *entry = TileIndexEntry { file_offset, on_disk_size: compressed.len() as u64 };

    tracing::trace!(disk_tile, bytes = compressed.len(), "tile payload appended");
    Ok(())
}
