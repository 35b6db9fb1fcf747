
//! Describes all structural metadata of a container:
//! the fixed header, the chained tag blocks, and the per-layer descriptors.

pub mod dimension;
pub mod channel;
pub mod layer;

use crate::error::{Error, Result, UnitResult};
use crate::io::{ByteOrder, Data, OffsetWidth, Sink, Source, SourceReader, Write};
use crate::io::{read_string, write_string};

/// The container format version this library reads and writes.
pub const VERSION: u16 = 1;

/// A link slot containing this value points at nothing.
pub(crate) const NULL_OFFSET: u64 = 0;

/// Upper bound on chain lengths and list counts while parsing,
/// so a corrupt file cannot keep a reader busy forever.
pub(crate) const MAX_CHAIN_LENGTH: usize = 1 << 16;

/// The first four bytes of each container.
/// Used to abort reading unrelated files.
pub mod magic_number {
    use super::*;

    /// The first four bytes of each container.
    pub const BYTES: [u8; 4] = *b"PIXI";

    /// Without validation, write the marker to the byte stream.
    pub fn write(write: &mut impl Write) -> UnitResult {
        write.write_all(&BYTES)?;
        Ok(())
    }

    /// Check whether the given bytes start a container.
    pub fn validate(bytes: &[u8]) -> UnitResult {
        if bytes.len() >= BYTES.len() && bytes[.. BYTES.len()] == BYTES { Ok(()) }
        else { Err(Error::BadMagic) }
    }
}

/// The fixed-size prologue of every container.
/// Immutable after the first byte has been written.
///
/// The prologue also contains two link slots pointing at the first
/// tag block and the first layer record, which start out null and are
/// patched when those records are appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {

    /// The container format version, currently always [`VERSION`].
    pub version: u16,

    /// The byte order of every multi-byte integer in the file.
    pub byte_order: ByteOrder,

    /// The width of every in-file pointer and length prefix.
    pub offset_width: OffsetWidth,
}

impl Header {

    /// A header for a new container, using the current format version.
    pub fn new(byte_order: ByteOrder, offset_width: OffsetWidth) -> Self {
        Header { version: VERSION, byte_order, offset_width }
    }

    /// Byte count of the full prologue, including both link slots.
    pub fn byte_size(self) -> usize {
        8 + 2 * self.offset_width.byte_count()
    }

    /// File offset of the link slot pointing at the first tag block.
    pub(crate) fn first_tag_slot(self) -> u64 {
        8
    }

    /// File offset of the link slot pointing at the first layer record.
    pub(crate) fn first_layer_slot(self) -> u64 {
        8 + self.offset_width.byte_count() as u64
    }

    /// Write magic, version, byte order, offset width
    /// and both zeroed link slots at the start of the sink.
    pub fn write_to(self, sink: &mut impl Sink) -> UnitResult {
        let mut bytes = Vec::with_capacity(self.byte_size());

        magic_number::write(&mut bytes)?;
        self.version.write_ordered(&mut bytes, self.byte_order)?;
        self.byte_order.id().write_ordered(&mut bytes, self.byte_order)?;
        self.offset_width.id().write_ordered(&mut bytes, self.byte_order)?;
        self.offset_width.write_offset(&mut bytes, NULL_OFFSET, self.byte_order)?;
        self.offset_width.write_offset(&mut bytes, NULL_OFFSET, self.byte_order)?;

        sink.write_at(0, &bytes)
    }

    /// Parse and validate the prologue at the start of the source.
    pub fn read_from(source: &mut impl Source) -> Result<Self> {
        Ok(Self::read_with_links(source)?.0)
    }

    /// Parse the prologue and the offsets of the first tag block
    /// and the first layer record (null where none exists yet).
    pub(crate) fn read_with_links(source: &mut impl Source) -> Result<(Self, u64, u64)> {
        let mut prologue = [0_u8; 8];
        source.read_at(0, &mut prologue)?;
        magic_number::validate(&prologue)?;

        // the byte order marker is a single byte and is
        // inspected before any multi-byte field is decoded
        let byte_order = ByteOrder::from_id(prologue[6])?;
        let offset_width = OffsetWidth::from_id(prologue[7])?;

        let version = u16::read_ordered(&mut &prologue[4 .. 6], byte_order)?;
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let header = Header { version, byte_order, offset_width };

        let mut read = SourceReader::new(source, header.first_tag_slot());
        let first_tag = offset_width.read_offset(&mut read, byte_order)?;
        let first_layer = offset_width.read_offset(&mut read, byte_order)?;

        Ok((header, first_tag, first_layer))
    }
}

/// Chained blocks of ordered string pairs appended after the header.
/// A block is never mutated once written; appending a block only
/// patches the previous next-block link slot.
pub(crate) mod tag_block {
    use super::*;

    /// Serialize one tag block, returning its bytes and the position
    /// of the next-block link slot within those bytes.
    pub(crate) fn write(pairs: &[(&str, &str)], header: Header) -> Result<(Vec<u8>, usize)> {
        let order = header.byte_order;
        let offsets = header.offset_width;

        let mut bytes = Vec::new();
        offsets.write_offset(&mut bytes, pairs.len() as u64, order)?;

        for (key, value) in pairs {
            write_string(&mut bytes, key, order, offsets)?;
            write_string(&mut bytes, value, order, offsets)?;
        }

        let link_slot = bytes.len();
        offsets.write_offset(&mut bytes, NULL_OFFSET, order)?;

        Ok((bytes, link_slot))
    }

    /// Follow the block chain starting at the given offset, collecting all
    /// pairs in insertion order. Duplicate keys are preserved; consumers
    /// looking a key up take its first occurrence. Also returns the file
    /// position of the last link slot, so another block can be appended.
    pub(crate) fn read_chain(source: &mut impl Source, header: Header, first_offset: u64) -> Result<(Vec<(String, String)>, u64)> {
        let order = header.byte_order;
        let offsets = header.offset_width;

        let mut pairs = Vec::new();
        let mut last_slot = header.first_tag_slot();
        let mut next = first_offset;
        let mut chain_length = 0;

        while next != NULL_OFFSET {
            chain_length += 1;
            if chain_length > MAX_CHAIN_LENGTH {
                return Err(Error::invalid("tag block chain length"));
            }

            let mut read = SourceReader::new(source, next);
            let count = offsets.read_offset(&mut read, order)? as usize;
            if count > MAX_CHAIN_LENGTH {
                return Err(Error::invalid("tag count"));
            }

            for _ in 0 .. count {
                let key = read_string(&mut read, order, offsets)?;
                let value = read_string(&mut read, order, offsets)?;
                pairs.push((key, value));
            }

            last_slot = read.byte_position();
            next = offsets.read_offset(&mut read, order)?;
        }

        Ok((pairs, last_slot))
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_roundtrip() {
        for &order in &[ByteOrder::Little, ByteOrder::Big] {
            for &offsets in &[OffsetWidth::Four, OffsetWidth::Eight] {
                let header = Header::new(order, offsets);

                let mut file = Cursor::new(Vec::new());
                header.write_to(&mut file).unwrap();
                assert_eq!(file.get_ref().len(), header.byte_size());

                let (parsed, first_tag, first_layer) = Header::read_with_links(&mut file).unwrap();
                assert_eq!(parsed, header);
                assert_eq!(first_tag, NULL_OFFSET);
                assert_eq!(first_layer, NULL_OFFSET);
            }
        }
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut file = Cursor::new(b"JUNKJUNKJUNKJUNKJUNKJUNK".to_vec());
        match Header::read_from(&mut file) {
            Err(Error::BadMagic) => {},
            other => panic!("expected bad magic, got {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_version_and_width() {
        let header = Header::new(ByteOrder::Little, OffsetWidth::Eight);
        let mut file = Cursor::new(Vec::new());
        header.write_to(&mut file).unwrap();

        let mut wrong_version = Cursor::new(file.get_ref().clone());
        wrong_version.get_mut()[4] = 0xff;
        assert!(matches!(Header::read_from(&mut wrong_version), Err(Error::UnsupportedVersion(_))));

        let mut wrong_width = Cursor::new(file.get_ref().clone());
        wrong_width.get_mut()[7] = 3;
        assert!(matches!(Header::read_from(&mut wrong_width), Err(Error::BadOffsetWidth(3))));
    }

    #[test]
    fn tag_blocks_chain_and_preserve_duplicates() {
        let header = Header::new(ByteOrder::Little, OffsetWidth::Four);
        let mut file = Cursor::new(Vec::new());
        header.write_to(&mut file).unwrap();

        let (first_bytes, first_link) = tag_block::write(&[("year", "2025"), ("year", "2026")], header).unwrap();
        let first_offset = file.append(&first_bytes).unwrap();
        {
            let mut slot = Vec::new();
            header.offset_width.write_offset(&mut slot, first_offset, header.byte_order).unwrap();
            file.write_at(header.first_tag_slot(), &slot).unwrap();
        }

        let (second_bytes, _) = tag_block::write(&[("source", "gebco")], header).unwrap();
        let second_offset = file.append(&second_bytes).unwrap();
        {
            let mut slot = Vec::new();
            header.offset_width.write_offset(&mut slot, second_offset, header.byte_order).unwrap();
            file.write_at(first_offset + first_link as u64, &slot).unwrap();
        }

        let (_, first_tag, _) = Header::read_with_links(&mut file).unwrap();
        let (pairs, _) = tag_block::read_chain(&mut file, header, first_tag).unwrap();

        assert_eq!(pairs, vec![
            ("year".to_string(), "2025".to_string()),
            ("year".to_string(), "2026".to_string()),
            ("source".to_string(), "gebco".to_string()),
        ]);
    }
}
