//! End-to-end scenarios: bit-exact tile payloads, cache behavior,
//! failing backing stores, and the two-pass overview pipeline.

use pixi::prelude::*;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

fn bathymetry_layer(compression: Compression, channel_type: ChannelType) -> Layer {
    Layer::new(
        "gebco",
        vec![Dimension::new("lng", 8, 4), Dimension::new("lat", 4, 4)],
        vec![Channel::new("v", channel_type)],
        LayerOptions { planar: false, compression },
    ).unwrap()
}

/// Write the layer through the façade and return the finished file.
fn build_container(
    header: Header,
    layer: Layer,
    value: impl Fn(&[usize]) -> Value,
) -> (Cursor<Vec<u8>>, Pixi) {
    let mut summary = Pixi::new(header);
    let mut file = Cursor::new(Vec::new());
    summary.write_header(&mut file).unwrap();

    let writer = IterativeLayerWriter::container_order(file, header, layer);
    let file = summary.append_iterative_layer(writer, |writer| {
        while writer.next() {
            let sample = value(&writer.coord());
            writer.set_channel(0, sample);
        }
        Ok(())
    }).unwrap();

    (file, summary)
}

#[test]
fn uncompressed_tiles_hold_the_exact_little_endian_samples() {
    let header = Header::new(ByteOrder::Little, OffsetWidth::Eight);
    let layer = bathymetry_layer(Compression::None, ChannelType::I16);

    let (file, summary) = build_container(header, layer, |coordinate| {
        Value::I16(coordinate[0] as i16 - 2 * coordinate[1] as i16)
    });

    let layer = &summary.layers[0];
    assert_eq!(layer.disk_tile_count(), 2);

    // tile 0 holds x 0..4 of y 0..4, the first dimension varying fastest
    let mut expected = Vec::new();
    for y in 0 .. 4_i16 {
        for x in 0 .. 4_i16 {
            expected.extend_from_slice(&(x - 2 * y).to_le_bytes());
        }
    }

    let entry = layer.tile_index[0];
    let payload = &file.get_ref()[entry.file_offset as usize .. (entry.file_offset + entry.on_disk_size) as usize];
    assert_eq!(payload, expected.as_slice());

    // the envelope covers the whole layer, so the maximum
    // comes from tile 1 at f(7, 0) = 7
    assert_eq!(layer.channels[0].min, Value::I16(-6));
    assert_eq!(layer.channels[0].max, Value::I16(7));
}

#[test]
fn uniform_tiles_collapse_under_run_length_encoding() {
    let header = Header::new(ByteOrder::Little, OffsetWidth::Eight);
    let layer = bathymetry_layer(Compression::Rle8, ChannelType::U8);

    let (file, summary) = build_container(header, layer, |_| Value::U8(255));

    for &entry in &summary.layers[0].tile_index {
        assert!(entry.on_disk_size <= 3, "tile stayed {} bytes on disk", entry.on_disk_size);
    }

    let cache = ReadCache::fifo(file, header, summary.layers[0].clone(), 1);
    for y in 0 .. 4 {
        for x in 0 .. 8 {
            assert_eq!(cache.sample_at(&[x, y]).unwrap().as_slice(), &[Value::U8(255)]);
        }
    }
}

#[test]
fn a_single_tile_cache_misses_on_every_alternation() {
    let header = Header::new(ByteOrder::Little, OffsetWidth::Eight);
    let layer = bathymetry_layer(Compression::None, ChannelType::I16);

    let (file, summary) = build_container(header, layer, |coordinate| {
        Value::I16(coordinate[0] as i16 - 2 * coordinate[1] as i16)
    });

    let cache = ReadCache::fifo(file, header, summary.layers[0].clone(), 1);
    cache.sample_at(&[0, 0]).unwrap();
    cache.sample_at(&[4, 0]).unwrap();
    cache.sample_at(&[0, 0]).unwrap();

    assert_eq!(cache.stats(), CacheStats { hits: 0, misses: 3 });
}

#[test]
fn source_tile_order_fills_the_right_container_tiles() {
    let header = Header::new(ByteOrder::Little, OffsetWidth::Eight);
    let layer = Layer::new(
        "stitched",
        vec![Dimension::new("x", 8, 2), Dimension::new("y", 4, 2)],
        vec![Channel::new("v", ChannelType::U8)],
        LayerOptions::default(),
    ).unwrap();

    // the producer walks 4x4 source tiles, each holding
    // the values 0..16 in row-major source scan order
    let mut writer = IterativeLayerWriter::source_tile_order(
        Cursor::new(Vec::new()), header, layer, &[4, 4]
    ).unwrap();

    while writer.next() {
        let coordinate = writer.coord();
        let value = (coordinate[1] % 4) * 4 + coordinate[0] % 4;
        writer.set_channel(0, Value::U8(value as u8));
    }

    let (file, layer) = writer.finish().unwrap();

    let tile_payload = |tile: usize| {
        let entry = layer.tile_index[tile];
        file.get_ref()[entry.file_offset as usize .. (entry.file_offset + entry.on_disk_size) as usize].to_vec()
    };

    assert_eq!(tile_payload(0), vec![0, 1, 4, 5]);
    assert_eq!(tile_payload(1), vec![2, 3, 6, 7]);
}

/// A sink whose appends start failing after a while,
/// as if the disk filled up mid-write.
#[derive(Debug)]
struct FailingSink {
    shared: Arc<Mutex<Cursor<Vec<u8>>>>,
    appends_before_failure: usize,
}

impl Sink for FailingSink {
    fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        if self.appends_before_failure == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "backing store failed").into());
        }

        self.appends_before_failure -= 1;
        self.shared.lock().unwrap().append(bytes)
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> UnitResult {
        self.shared.lock().unwrap().write_at(offset, bytes)
    }
}

#[test]
fn a_failing_backing_store_latches_into_the_writer() {
    let header = Header::new(ByteOrder::Little, OffsetWidth::Eight);
    let layer = Layer::new(
        "doomed",
        vec![Dimension::new("x", 8, 2), Dimension::new("y", 2, 2)],
        vec![Channel::new("v", ChannelType::U8)],
        LayerOptions::default(),
    ).unwrap();

    let shared = Arc::new(Mutex::new(Cursor::new(Vec::new())));
    let sink = FailingSink { shared, appends_before_failure: 2 };

    let mut writer = IterativeLayerWriter::container_order(sink, header, layer);
    while writer.next() {
        writer.set_channel(0, Value::U8(1));
    }

    assert!(matches!(writer.done(), Err(Error::Io(_))));
    assert!(matches!(writer.error(), Some(Error::Io(_))));

    // writes after the error change nothing, and the
    // second finalization surfaces the same error
    writer.set_channel(0, Value::U8(2));
    assert!(matches!(writer.done(), Err(Error::Io(_))));
}

#[test]
fn a_failed_layer_is_never_linked_into_the_file() {
    let header = Header::new(ByteOrder::Little, OffsetWidth::Eight);
    let layer = Layer::new(
        "doomed",
        vec![Dimension::new("x", 8, 2), Dimension::new("y", 2, 2)],
        vec![Channel::new("v", ChannelType::U8)],
        LayerOptions::default(),
    ).unwrap();

    let shared = Arc::new(Mutex::new(Cursor::new(Vec::new())));
    let sink = FailingSink { shared: Arc::clone(&shared), appends_before_failure: 2 };

    let mut summary = Pixi::new(header);
    let mut sink = sink;
    summary.write_header(&mut sink).unwrap();

    let writer = IterativeLayerWriter::container_order(sink, header, layer);
    let result = summary.append_iterative_layer(writer, |writer| {
        while writer.next() {
            writer.set_channel(0, Value::U8(1));
        }
        Ok(())
    });

    assert!(matches!(result, Err(Error::Io(_))));
    assert!(summary.layers.is_empty());

    // the partial file is detectably incomplete: the header
    // was written, but no layer record is linked from it
    let bytes = shared.lock().unwrap().get_ref().clone();
    let reopened = Pixi::read_from(&mut Cursor::new(bytes)).unwrap();
    assert!(reopened.layers.is_empty());
}

#[test]
fn overviews_of_constant_layers_are_exact() {
    let header = Header::new(ByteOrder::Big, OffsetWidth::Eight);
    let layer = Layer::new(
        "gebco",
        vec![Dimension::new("lng", 8, 4), Dimension::new("lat", 4, 4)],
        vec![Channel::new("ice", ChannelType::I16), Channel::new("sub_ice", ChannelType::I16)],
        LayerOptions { planar: false, compression: Compression::Deflate },
    ).unwrap();

    let mut summary = Pixi::new(header);
    let mut file = Cursor::new(Vec::new());
    summary.write_header(&mut file).unwrap();
    summary.append_tags(&mut file, &[("year", "2025")]).unwrap();

    let writer = IterativeLayerWriter::container_order(file, header, layer);
    let file = summary.append_iterative_layer(writer, |writer| {
        while writer.next() {
            writer.set_sample(&[Value::I16(-1234), Value::I16(-1234)]);
        }
        Ok(())
    }).unwrap();

    let overview = Layer::new(
        "gebco_overview",
        vec![Dimension::new("lng", 2, 2), Dimension::new("lat", 1, 1)],
        vec![Channel::new("ice", ChannelType::I16), Channel::new("sub_ice", ChannelType::I16)],
        LayerOptions { planar: false, compression: Compression::Deflate },
    ).unwrap();

    let reader = Cursor::new(file.get_ref().clone());
    let (mut file, _reader) = summary
        .append_downsampled_layer(file, reader, 0, overview, 4, 8)
        .unwrap();

    let reopened = Pixi::read_from(&mut file).unwrap();
    assert_eq!(reopened.tag("year"), Some("2025"));
    assert_eq!(reopened.layers.len(), 2);

    let cache = ReadCache::fifo(file, header, reopened.layers[1].clone(), 2);
    for x in 0 .. 2 {
        let sample = cache.sample_at(&[x, 0]).unwrap();
        assert_eq!(sample.as_slice(), &[Value::I16(-1234), Value::I16(-1234)]);
    }

    assert_eq!(reopened.layers[1].channels[0].min, Value::I16(-1234));
    assert_eq!(reopened.layers[1].channels[0].max, Value::I16(-1234));
}

#[test]
fn overviews_average_whole_blocks() {
    let header = Header::new(ByteOrder::Little, OffsetWidth::Four);
    let layer = Layer::new(
        "ramp",
        vec![Dimension::new("x", 8, 2), Dimension::new("y", 4, 2)],
        vec![Channel::new("v", ChannelType::U16)],
        LayerOptions::default(),
    ).unwrap();

    let (file, mut summary) = {
        let mut summary = Pixi::new(header);
        let mut file = Cursor::new(Vec::new());
        summary.write_header(&mut file).unwrap();

        let writer = IterativeLayerWriter::container_order(file, header, layer);
        let file = summary.append_iterative_layer(writer, |writer| {
            while writer.next() {
                let x = writer.coord()[0];
                writer.set_channel(0, Value::U16(10 * x as u16));
            }
            Ok(())
        }).unwrap();

        (file, summary)
    };

    let overview = Layer::new(
        "ramp_overview",
        vec![Dimension::new("x", 4, 2), Dimension::new("y", 2, 2)],
        vec![Channel::new("v", ChannelType::U16)],
        LayerOptions::default(),
    ).unwrap();

    let reader = Cursor::new(file.get_ref().clone());
    let (file, _reader) = summary
        .append_downsampled_layer(file, reader, 0, overview, 2, 4)
        .unwrap();

    // each overview sample covers x values {2c, 2c + 1},
    // so the mean of 10x over the block is 20c + 5
    let cache = ReadCache::fifo(file, header, summary.layers[1].clone(), 2);
    for x in 0 .. 4 {
        for y in 0 .. 2 {
            let sample = cache.sample_at(&[x, y]).unwrap();
            assert_eq!(sample.as_slice(), &[Value::U16(20 * x as u16 + 5)]);
        }
    }
}
