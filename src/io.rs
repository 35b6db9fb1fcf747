
//! Positioned input and output over seekable byte stores, and the
//! byte-order-aware encoding of the primitive values inside them.

pub use std::io::{Read, Write};

use crate::error::{Error, Result, UnitResult};
use lebe::prelude::*;
use std::io::{Seek, SeekFrom};

/// Reject any single length prefix larger than this
/// without trying to allocate that much memory.
pub(crate) const MAX_STRING_BYTES: usize = 1 << 16;

/// The byte order all multi-byte integers of one container are encoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {

    /// Least significant byte first.
    Little,

    /// Most significant byte first.
    Big,
}

impl ByteOrder {

    /// The byte order of the machine this program runs on.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") { ByteOrder::Big }
        else { ByteOrder::Little }
    }

    pub(crate) fn id(self) -> u8 {
        match self {
            ByteOrder::Little => 0,
            ByteOrder::Big => 1,
        }
    }

    pub(crate) fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(ByteOrder::Little),
            1 => Ok(ByteOrder::Big),
            _ => Err(Error::invalid("byte order marker")),
        }
    }
}

/// The width of every in-file pointer and length prefix of one container.
/// Four-byte files are smaller, eight-byte files can exceed 4 GB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OffsetWidth {

    /// Offsets are stored as `u32`.
    Four,

    /// Offsets are stored as `u64`.
    Eight,
}

impl OffsetWidth {

    /// Number of bytes one offset occupies in the file.
    pub fn byte_count(self) -> usize {
        match self {
            OffsetWidth::Four => 4,
            OffsetWidth::Eight => 8,
        }
    }

    pub(crate) fn id(self) -> u8 {
        self.byte_count() as u8
    }

    pub(crate) fn from_id(id: u8) -> Result<Self> {
        match id {
            4 => Ok(OffsetWidth::Four),
            8 => Ok(OffsetWidth::Eight),
            _ => Err(Error::BadOffsetWidth(id)),
        }
    }

    /// Read one offset or length prefix of this width.
    pub fn read_offset(self, read: &mut impl Read, order: ByteOrder) -> Result<u64> {
        match self {
            OffsetWidth::Four => Ok(u64::from(u32::read_ordered(read, order)?)),
            OffsetWidth::Eight => u64::read_ordered(read, order),
        }
    }

    /// Write one offset or length prefix of this width.
    /// Values that do not fit the width cannot be represented in the file.
    pub fn write_offset(self, write: &mut impl Write, value: u64, order: ByteOrder) -> UnitResult {
        match self {
            OffsetWidth::Four => {
                if value > u64::from(u32::MAX) {
                    return Err(Error::invalid("file offset exceeds the 4-byte offset width"));
                }

                (value as u32).write_ordered(write, order)
            },

            OffsetWidth::Eight => value.write_ordered(write, order),
        }
    }
}

/// A seekable byte destination that records and tile payloads are appended to,
/// and whose already written link slots can be patched in place.
pub trait Sink {

    /// Append the bytes at the end of the store,
    /// returning the offset the bytes start at.
    fn append(&mut self, bytes: &[u8]) -> Result<u64>;

    /// Overwrite previously written bytes at the given offset.
    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> UnitResult;
}

impl<W> Sink for W where W: Write + Seek {
    fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.seek(SeekFrom::End(0))?;
        self.write_all(bytes)?;
        Ok(offset)
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> UnitResult {
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(bytes)?;
        Ok(())
    }
}

/// A seekable byte source that tiles and records are read from.
pub trait Source {

    /// Fill the buffer with the bytes at the given offset.
    fn read_at(&mut self, offset: u64, buffer: &mut [u8]) -> UnitResult;
}

impl<R> Source for R where R: Read + Seek {
    fn read_at(&mut self, offset: u64, buffer: &mut [u8]) -> UnitResult {
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buffer)?;
        Ok(())
    }
}

/// Tracks a read position over a positioned source, so that
/// variable-length records can be parsed sequentially.
#[derive(Debug)]
pub struct SourceReader<'s, S> {
    source: &'s mut S,
    position: u64,
}

impl<'s, S: Source> SourceReader<'s, S> {

    /// Start reading the source at the given byte position.
    pub fn new(source: &'s mut S, position: u64) -> Self {
        SourceReader { source, position }
    }

    /// The byte position the next read will start at.
    pub fn byte_position(&self) -> u64 {
        self.position
    }
}

impl<S: Source> Read for SourceReader<'_, S> {
    fn read(&mut self, buffer: &mut [u8]) -> std::io::Result<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }

        self.source.read_at(self.position, buffer)
            .map_err(|error| std::io::Error::new(std::io::ErrorKind::Other, error))?;

        self.position += buffer.len() as u64;
        Ok(buffer.len())
    }
}

/// Extension trait for primitive values with a canonical
/// byte encoding in either byte order.
pub trait Data: Sized {

    /// Number of bytes this value occupies on disk.
    const BYTE_SIZE: usize = std::mem::size_of::<Self>();

    /// Decode a value in the given byte order.
    fn read_ordered(read: &mut impl Read, order: ByteOrder) -> Result<Self>;

    /// Encode a value in the given byte order.
    fn write_ordered(self, write: &mut impl Write, order: ByteOrder) -> UnitResult;
}

macro_rules! implement_data_for_primitive {
    ($kind: ident) => {
        impl Data for $kind {
            #[inline]
            fn read_ordered(read: &mut impl Read, order: ByteOrder) -> Result<Self> {
                Ok(match order {
                    ByteOrder::Little => read.read_from_little_endian()?,
                    ByteOrder::Big => read.read_from_big_endian()?,
                })
            }

            #[inline]
            fn write_ordered(self, write: &mut impl Write, order: ByteOrder) -> UnitResult {
                match order {
                    ByteOrder::Little => write.write_as_little_endian(&self)?,
                    ByteOrder::Big => write.write_as_big_endian(&self)?,
                }

                Ok(())
            }
        }
    };
}

implement_data_for_primitive!(u8);
implement_data_for_primitive!(i8);
implement_data_for_primitive!(i16);
implement_data_for_primitive!(u16);
implement_data_for_primitive!(u32);
implement_data_for_primitive!(i32);
implement_data_for_primitive!(i64);
implement_data_for_primitive!(u64);
implement_data_for_primitive!(f32);
implement_data_for_primitive!(f64);

/// Read exactly `byte_count` bytes into a new vector, rejecting
/// lengths beyond the sanity limit before allocating.
pub(crate) fn read_u8_vec(read: &mut impl Read, byte_count: usize, hard_max: usize, purpose: &'static str) -> Result<Vec<u8>> {
    if byte_count > hard_max {
        return Err(Error::invalid(purpose));
    }

    let mut bytes = vec![0_u8; byte_count];
    read.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Write the length of a string as an offset-width prefix, then its UTF-8 bytes.
pub(crate) fn write_string(write: &mut impl Write, text: &str, order: ByteOrder, offsets: OffsetWidth) -> UnitResult {
    offsets.write_offset(write, text.len() as u64, order)?;
    write.write_all(text.as_bytes())?;
    Ok(())
}

/// Read a length-prefixed UTF-8 string.
pub(crate) fn read_string(read: &mut impl Read, order: ByteOrder, offsets: OffsetWidth) -> Result<String> {
    let length = offsets.read_offset(read, order)?;
    let bytes = read_u8_vec(read, length as usize, MAX_STRING_BYTES, "string length")?;
    String::from_utf8(bytes).map_err(|_| Error::invalid("string encoding"))
}
