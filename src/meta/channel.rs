
//! The typed channels of a layer, the values they carry, and the
//! packing of those values into the byte buffers of a tile.

use crate::error::{Error, Result, UnitResult};
use crate::io::{ByteOrder, Data, OffsetWidth, Read, Write};
use crate::io::{read_string, write_string};
use bit_field::BitField;
use smallvec::SmallVec;

/// The closed set of value types a channel can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ChannelType {
    Bool,
    U8, U16, U32, U64,
    I8, I16, I32, I64,
    F32, F64,
}

impl ChannelType {

    pub(crate) fn id(self) -> u8 {
        use ChannelType::*;
        match self {
            Bool => 0,
            U8 => 1, U16 => 2, U32 => 3, U64 => 4,
            I8 => 5, I16 => 6, I32 => 7, I64 => 8,
            F32 => 9, F64 => 10,
        }
    }

    pub(crate) fn from_id(id: u8) -> Result<Self> {
        use ChannelType::*;
        Ok(match id {
            0 => Bool,
            1 => U8, 2 => U16, 3 => U32, 4 => U64,
            5 => I8, 6 => I16, 7 => I32, 8 => I64,
            9 => F32, 10 => F64,
            _ => return Err(Error::invalid("channel type id")),
        })
    }

    /// Bytes one value of this type occupies in an interleaved tile.
    /// Bool values occupy a whole byte when interleaved with other
    /// channels; only planar bool planes are bit-packed.
    pub fn byte_size(self) -> usize {
        use ChannelType::*;
        match self {
            Bool | U8 | I8 => 1,
            U16 | I16 => 2,
            U32 | I32 | F32 => 4,
            U64 | I64 | F64 => 8,
        }
    }

    /// The smallest value of this type, used as the initial `max`
    /// of a channel nothing has been written to yet.
    pub(crate) fn smallest(self) -> Value {
        use ChannelType::*;
        match self {
            Bool => Value::Bool(false),
            U8 => Value::U8(u8::MIN), U16 => Value::U16(u16::MIN),
            U32 => Value::U32(u32::MIN), U64 => Value::U64(u64::MIN),
            I8 => Value::I8(i8::MIN), I16 => Value::I16(i16::MIN),
            I32 => Value::I32(i32::MIN), I64 => Value::I64(i64::MIN),
            F32 => Value::F32(f32::NEG_INFINITY), F64 => Value::F64(f64::NEG_INFINITY),
        }
    }

    /// The largest value of this type, used as the initial `min`
    /// of a channel nothing has been written to yet.
    pub(crate) fn largest(self) -> Value {
        use ChannelType::*;
        match self {
            Bool => Value::Bool(true),
            U8 => Value::U8(u8::MAX), U16 => Value::U16(u16::MAX),
            U32 => Value::U32(u32::MAX), U64 => Value::U64(u64::MAX),
            I8 => Value::I8(i8::MAX), I16 => Value::I16(i16::MAX),
            I32 => Value::I32(i32::MAX), I64 => Value::I64(i64::MAX),
            F32 => Value::F32(f32::INFINITY), F64 => Value::F64(f64::INFINITY),
        }
    }
}

/// A single typed value of one channel at one coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(missing_docs)]
pub enum Value {
    Bool(bool),
    U8(u8), U16(u16), U32(u32), U64(u64),
    I8(i8), I16(i16), I32(i32), I64(i64),
    F32(f32), F64(f64),
}

/// A sample: one value per channel, in channel declaration order.
pub type Sample = SmallVec<[Value; 4]>;

impl Value {

    /// The channel type this value belongs to.
    pub fn channel_type(self) -> ChannelType {
        use Value::*;
        match self {
            Bool(_) => ChannelType::Bool,
            U8(_) => ChannelType::U8, U16(_) => ChannelType::U16,
            U32(_) => ChannelType::U32, U64(_) => ChannelType::U64,
            I8(_) => ChannelType::I8, I16(_) => ChannelType::I16,
            I32(_) => ChannelType::I32, I64(_) => ChannelType::I64,
            F32(_) => ChannelType::F32, F64(_) => ChannelType::F64,
        }
    }

    /// Convert the value to an f64.
    /// Note: Integers beyond `2^53` lose precision.
    #[inline]
    pub fn to_f64(self) -> f64 {
        use Value::*;
        match self {
            Bool(value) => if value { 1.0 } else { 0.0 },
            U8(value) => f64::from(value), U16(value) => f64::from(value),
            U32(value) => f64::from(value), U64(value) => value as f64,
            I8(value) => f64::from(value), I16(value) => f64::from(value),
            I32(value) => f64::from(value), I64(value) => value as f64,
            F32(value) => f64::from(value), F64(value) => value,
        }
    }

    /// Encode this value in the canonical byte encoding of its type.
    /// Bool values occupy one byte holding 0 or 1.
    pub(crate) fn write_ordered(self, write: &mut impl Write, order: ByteOrder) -> UnitResult {
        use Value::*;
        match self {
            Bool(value) => (value as u8).write_ordered(write, order),
            U8(value) => value.write_ordered(write, order),
            U16(value) => value.write_ordered(write, order),
            U32(value) => value.write_ordered(write, order),
            U64(value) => value.write_ordered(write, order),
            I8(value) => value.write_ordered(write, order),
            I16(value) => value.write_ordered(write, order),
            I32(value) => value.write_ordered(write, order),
            I64(value) => value.write_ordered(write, order),
            F32(value) => value.write_ordered(write, order),
            F64(value) => value.write_ordered(write, order),
        }
    }

    /// Decode a value of the given type from its canonical byte encoding.
    pub(crate) fn read_ordered(read: &mut impl Read, order: ByteOrder, channel_type: ChannelType) -> Result<Value> {
        use ChannelType::*;
        Ok(match channel_type {
            Bool => Value::Bool(u8::read_ordered(read, order)? != 0),
            U8 => Value::U8(u8::read_ordered(read, order)?),
            U16 => Value::U16(u16::read_ordered(read, order)?),
            U32 => Value::U32(u32::read_ordered(read, order)?),
            U64 => Value::U64(u64::read_ordered(read, order)?),
            I8 => Value::I8(i8::read_ordered(read, order)?),
            I16 => Value::I16(i16::read_ordered(read, order)?),
            I32 => Value::I32(i32::read_ordered(read, order)?),
            I64 => Value::I64(i64::read_ordered(read, order)?),
            F32 => Value::F32(f32::read_ordered(read, order)?),
            F64 => Value::F64(f64::read_ordered(read, order)?),
        })
    }
}

impl From<bool> for Value { #[inline] fn from(value: bool) -> Self { Value::Bool(value) } }
impl From<u8> for Value { #[inline] fn from(value: u8) -> Self { Value::U8(value) } }
impl From<u16> for Value { #[inline] fn from(value: u16) -> Self { Value::U16(value) } }
impl From<u32> for Value { #[inline] fn from(value: u32) -> Self { Value::U32(value) } }
impl From<u64> for Value { #[inline] fn from(value: u64) -> Self { Value::U64(value) } }
impl From<i8> for Value { #[inline] fn from(value: i8) -> Self { Value::I8(value) } }
impl From<i16> for Value { #[inline] fn from(value: i16) -> Self { Value::I16(value) } }
impl From<i32> for Value { #[inline] fn from(value: i32) -> Self { Value::I32(value) } }
impl From<i64> for Value { #[inline] fn from(value: i64) -> Self { Value::I64(value) } }
impl From<f32> for Value { #[inline] fn from(value: f32) -> Self { Value::F32(value) } }
impl From<f64> for Value { #[inline] fn from(value: f64) -> Self { Value::F64(value) } }

/// Set one bool in the bit-packed plane of a planar bool channel.
/// Bit `i` of byte `i >> 3` represents sample `i` of the tile.
#[inline]
pub(crate) fn pack_bool(value: bool, tile: &mut [u8], sample_index: usize) {
    tile[sample_index >> 3].set_bit(sample_index & 7, value);
}

/// Get one bool from the bit-packed plane of a planar bool channel.
#[inline]
pub(crate) fn unpack_bool(tile: &[u8], sample_index: usize) -> bool {
    tile[sample_index >> 3].get_bit(sample_index & 7)
}

/// One channel of a layer, with the envelope of every value
/// that has ever been packed into it.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {

    /// Name of the channel, for example `ice` or `tid`.
    pub name: String,

    /// The type of every value of this channel.
    pub channel_type: ChannelType,

    /// The smallest value packed so far. A channel nothing has been
    /// written to carries an inverted envelope (`min` above `max`).
    pub min: Value,

    /// The largest value packed so far.
    pub max: Value,
}

impl Channel {

    /// A new channel with an inverted envelope, which the first
    /// packed value collapses onto itself.
    pub fn new(name: impl Into<String>, channel_type: ChannelType) -> Self {
        Channel {
            name: name.into(),
            channel_type,
            min: channel_type.largest(),
            max: channel_type.smallest(),
        }
    }

    /// Monotonically widen the envelope to include the value.
    /// Values of a foreign type are rejected before packing and never reach this.
    pub(crate) fn widen(&mut self, value: Value) {
        use Value::*;
        match (&mut self.min, &mut self.max, value) {
            (Bool(min), Bool(max), Bool(value)) => { if value < *min { *min = value; } if value > *max { *max = value; } },
            (U8(min), U8(max), U8(value)) => { if value < *min { *min = value; } if value > *max { *max = value; } },
            (U16(min), U16(max), U16(value)) => { if value < *min { *min = value; } if value > *max { *max = value; } },
            (U32(min), U32(max), U32(value)) => { if value < *min { *min = value; } if value > *max { *max = value; } },
            (U64(min), U64(max), U64(value)) => { if value < *min { *min = value; } if value > *max { *max = value; } },
            (I8(min), I8(max), I8(value)) => { if value < *min { *min = value; } if value > *max { *max = value; } },
            (I16(min), I16(max), I16(value)) => { if value < *min { *min = value; } if value > *max { *max = value; } },
            (I32(min), I32(max), I32(value)) => { if value < *min { *min = value; } if value > *max { *max = value; } },
            (I64(min), I64(max), I64(value)) => { if value < *min { *min = value; } if value > *max { *max = value; } },
            (F32(min), F32(max), F32(value)) => { if value < *min { *min = value; } if value > *max { *max = value; } },
            (F64(min), F64(max), F64(value)) => { if value < *min { *min = value; } if value > *max { *max = value; } },
            _ => {},
        }
    }

    pub(crate) fn write(&self, write: &mut impl Write, order: ByteOrder, offsets: OffsetWidth) -> UnitResult {
        write_string(write, &self.name, order, offsets)?;
        self.channel_type.id().write_ordered(write, order)?;
        self.min.write_ordered(write, order)?;
        self.max.write_ordered(write, order)?;
        Ok(())
    }

    pub(crate) fn read(read: &mut impl Read, order: ByteOrder, offsets: OffsetWidth) -> Result<Self> {
        let name = read_string(read, order, offsets)?;
        let channel_type = ChannelType::from_id(u8::read_ordered(read, order)?)?;
        let min = Value::read_ordered(read, order, channel_type)?;
        let max = Value::read_ordered(read, order, channel_type)?;
        Ok(Channel { name, channel_type, min, max })
    }
}

/// All channels of a layer, with the byte size
/// of one interleaved sample cached.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSet {

    /// The channels, in declaration order.
    pub list: SmallVec<[Channel; 4]>,

    /// Byte size of one interleaved sample: the sum of all channel sizes.
    pub bytes_per_sample: usize,
}

impl ChannelSet {

    /// A new channel set, caching the interleaved sample size.
    pub fn new(list: impl Into<SmallVec<[Channel; 4]>>) -> Self {
        let list = list.into();
        let bytes_per_sample = list.iter()
            .map(|channel| channel.channel_type.byte_size())
            .sum();

        ChannelSet { list, bytes_per_sample }
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Whether this set contains no channels at all.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Byte offset of a channel within one interleaved sample.
    pub fn offset_of(&self, channel_index: usize) -> usize {
        self.list[.. channel_index].iter()
            .map(|channel| channel.channel_type.byte_size())
            .sum()
    }

    pub(crate) fn validate(&self) -> UnitResult {
        if self.list.is_empty() {
            return Err(Error::shape("a layer requires at least one channel"));
        }

        Ok(())
    }
}

impl std::ops::Index<usize> for ChannelSet {
    type Output = Channel;
    fn index(&self, channel_index: usize) -> &Channel {
        &self.list[channel_index]
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn envelope_widens_monotonically() {
        let mut channel = Channel::new("v", ChannelType::I16);
        assert_eq!(channel.min, Value::I16(i16::MAX));
        assert_eq!(channel.max, Value::I16(i16::MIN));

        channel.widen(Value::I16(3));
        assert_eq!(channel.min, Value::I16(3));
        assert_eq!(channel.max, Value::I16(3));

        channel.widen(Value::I16(-6));
        channel.widen(Value::I16(1));
        assert_eq!(channel.min, Value::I16(-6));
        assert_eq!(channel.max, Value::I16(3));
    }

    #[test]
    fn values_roundtrip_in_their_canonical_encoding() {
        let values = [
            Value::Bool(true), Value::U8(200), Value::U16(40_000),
            Value::U32(4_000_000_000), Value::U64(u64::MAX),
            Value::I8(-100), Value::I16(-30_000), Value::I32(-2_000_000_000),
            Value::I64(i64::MIN), Value::F32(1.5), Value::F64(-2.25),
        ];

        for &order in &[ByteOrder::Little, ByteOrder::Big] {
            for &value in &values {
                let mut bytes = Vec::new();
                value.write_ordered(&mut bytes, order).unwrap();
                assert_eq!(bytes.len(), value.channel_type().byte_size());

                let decoded = Value::read_ordered(&mut bytes.as_slice(), order, value.channel_type()).unwrap();
                assert_eq!(decoded, value);
            }
        }
    }

    #[test]
    fn bools_pack_into_bits() {
        let mut plane = [0_u8; 2];

        pack_bool(true, &mut plane, 0);
        pack_bool(true, &mut plane, 3);
        pack_bool(true, &mut plane, 9);
        assert_eq!(plane, [0b0000_1001, 0b0000_0010]);

        assert!(unpack_bool(&plane, 0));
        assert!(!unpack_bool(&plane, 1));
        assert!(unpack_bool(&plane, 3));
        assert!(unpack_bool(&plane, 9));

        pack_bool(false, &mut plane, 3);
        assert!(!unpack_bool(&plane, 3));
    }

    #[test]
    fn interleaved_offsets_accumulate_channel_sizes() {
        let channels = ChannelSet::new(vec![
            Channel::new("a", ChannelType::I16),
            Channel::new("b", ChannelType::Bool),
            Channel::new("c", ChannelType::F64),
        ]);

        assert_eq!(channels.bytes_per_sample, 11);
        assert_eq!(channels.offset_of(0), 0);
        assert_eq!(channels.offset_of(1), 2);
        assert_eq!(channels.offset_of(2), 3);
    }
}
