
//! Serve random sample reads from a finished layer through a
//! bounded cache of decoded tiles.

use crate::error::{Error, Result, UnitResult};
use crate::io::{ByteOrder, Source};
use crate::meta::Header;
use crate::meta::channel::{unpack_bool, ChannelType, Sample, Value};
use crate::meta::layer::Layer;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Which cached tile to sacrifice when the cache is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachePolicy {

    /// Evict the tile that has been cached longest.
    Fifo,

    /// Evict the tile with the fewest accesses,
    /// ties broken by earliest insertion.
    Lfu,
}

/// Counters of how often the cache answered from memory
/// and how often it had to decode a tile.
/// Every miss corresponds to exactly one decompression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {

    /// Reads answered from an already decoded tile.
    pub hits: u64,

    /// Reads that had to fetch and decode a tile.
    pub misses: u64,
}

/// A bounded, read-only cache of decoded tiles over a seekable source,
/// serving random access to the samples of one layer.
///
/// Tiles are keyed by their disk tile index, so planar layers cache
/// each channel plane separately. Concurrent readers share the cache
/// through its internal lock.
#[derive(Debug)]
pub struct ReadCache<R> {
    inner: Mutex<CacheInner<R>>,
}

#[derive(Debug)]
struct CacheInner<R> {
    source: R,
    byte_order: ByteOrder,
    layer: Layer,
    capacity: usize,
    policy: CachePolicy,

    tiles: HashMap<usize, CachedTile>,
    clock: u64,
    stats: CacheStats,
}

#[derive(Debug)]
struct CachedTile {
    bytes: Arc<Vec<u8>>,
    inserted: u64,
    accesses: u64,
}

impl<R: Source> ReadCache<R> {

    /// A new cache over the given finished layer,
    /// holding at most `capacity` decoded tiles.
    pub fn new(source: R, header: Header, layer: Layer, capacity: usize, policy: CachePolicy) -> Self {
        ReadCache {
            inner: Mutex::new(CacheInner {
                source,
                byte_order: header.byte_order,
                layer,
                capacity: capacity.max(1),
                policy,
                tiles: HashMap::new(),
                clock: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    /// A new cache evicting in first-in-first-out order.
    pub fn fifo(source: R, header: Header, layer: Layer, capacity: usize) -> Self {
        Self::new(source, header, layer, capacity, CachePolicy::Fifo)
    }

    /// A new cache evicting the least frequently used tile.
    pub fn lfu(source: R, header: Header, layer: Layer, capacity: usize) -> Self {
        Self::new(source, header, layer, capacity, CachePolicy::Lfu)
    }

    /// Read the full sample at the given coordinate.
    pub fn sample_at(&self, coordinate: &[usize]) -> Result<Sample> {
        let mut sample = Sample::new();
        self.sample_into(coordinate, &mut sample)?;
        Ok(sample)
    }

    /// Read the sample at the given coordinate into a reusable buffer,
    /// avoiding an allocation per read.
    pub fn sample_into(&self, coordinate: &[usize], sample: &mut Sample) -> UnitResult {
        self.inner.lock().expect("read cache lock poisoned")
            .sample_into(coordinate, sample)
    }

    /// The hit and miss counters accumulated so far.
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().expect("read cache lock poisoned").stats
    }

    /// Release the cache and hand the source handle back.
    pub fn into_source(self) -> R {
        self.inner.into_inner().expect("read cache lock poisoned").source
    }
}

impl<R: Source> CacheInner<R> {

    fn sample_into(&mut self, coordinate: &[usize], sample: &mut Sample) -> UnitResult {
        let selector = self.layer.dimensions.selector_of(coordinate)?;
        sample.clear();

        if self.layer.planar {
            for channel_index in 0 .. self.layer.channels.len() {
                let channel_type = self.layer.channels[channel_index].channel_type;
                let disk_tile = self.layer.disk_tile_of(selector.tile, channel_index);
                let byte_order = self.byte_order;

                let bytes = self.tile_bytes(disk_tile)?;
                let value = match channel_type {
                    ChannelType::Bool => Value::Bool(unpack_bool(&bytes, selector.in_tile)),
                    other => Value::read_ordered(
                        &mut &bytes[selector.in_tile * other.byte_size() ..],
                        byte_order, other
                    )?,
                };

                sample.push(value);
            }
        }
        else {
            let byte_order = self.byte_order;
            let mut offset = selector.in_tile * self.layer.channels.bytes_per_sample;

            let channel_types: smallvec::SmallVec<[ChannelType; 4]> = self.layer.channels.list.iter()
                .map(|channel| channel.channel_type)
                .collect();

            let bytes = self.tile_bytes(selector.tile)?;
            for channel_type in channel_types {
                let value = Value::read_ordered(&mut &bytes[offset ..], byte_order, channel_type)?;
                sample.push(value);
                offset += channel_type.byte_size();
            }
        }

        Ok(())
    }

    /// The decoded bytes of one disk tile, from the cache or,
    /// on a miss, fetched, decompressed, and inserted.
    fn tile_bytes(&mut self, disk_tile: usize) -> Result<Arc<Vec<u8>>> {
        if let Some(tile) = self.tiles.get_mut(&disk_tile) {
            tile.accesses += 1;
            self.stats.hits += 1;
            return Ok(Arc::clone(&tile.bytes));
        }

        self.stats.misses += 1;

        let entry = *self.layer.tile_index.get(disk_tile)
            .ok_or_else(|| Error::shape("tile index out of range"))?;

        if !entry.is_written() {
            return Err(Error::corrupt("tile has not been written"));
        }

        let mut compressed = vec![0_u8; entry.on_disk_size as usize];
        self.source.read_at(entry.file_offset, &mut compressed)?;

        let decoded = self.layer.compression
            .decompress(&compressed, self.layer.decoded_tile_size(disk_tile))?;

        let bytes = Arc::new(decoded);

        if self.tiles.len() >= self.capacity {
            self.evict_one();
        }

        self.clock += 1;
        self.tiles.insert(disk_tile, CachedTile {
            bytes: Arc::clone(&bytes),
            inserted: self.clock,
            accesses: 1,
        });

        tracing::trace!(disk_tile, "tile decoded into cache");
        Ok(bytes)
    }

    fn evict_one(&mut self) {
        let victim = match self.policy {
            CachePolicy::Fifo => self.tiles.iter()
                .min_by_key(|(_, tile)| tile.inserted),

            CachePolicy::Lfu => self.tiles.iter()
                .min_by_key(|(_, tile)| (tile.accesses, tile.inserted)),
        };

        if let Some((&disk_tile, _)) = victim {
            self.tiles.remove(&disk_tile);
            tracing::trace!(disk_tile, "cached tile evicted");
        }
    }
}
