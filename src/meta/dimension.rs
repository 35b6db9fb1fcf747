
//! The axes of a layer, and the mapping between sample
//! coordinates and the tiles that store them.

use crate::error::{Error, Result, UnitResult};
use crate::io::{ByteOrder, Data, OffsetWidth, Read, Write};
use crate::io::{read_string, write_string};
use smallvec::SmallVec;

/// A sample position: one index per dimension, in declaration order.
pub type SampleCoordinate = SmallVec<[usize; 2]>;

/// The alternate form of a sample position: which tile the sample
/// lives in and its index inside that tile. The bijection with
/// [`SampleCoordinate`] is a row-major unpack, dimension 0 fastest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileSelector {

    /// Index of the tile within one channel plane.
    pub tile: usize,

    /// Index of the sample within the tile.
    pub in_tile: usize,
}

/// One axis of a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {

    /// Name of the axis, for example `lng` or `lat`.
    pub name: String,

    /// Total extent along this axis in samples.
    pub size: usize,

    /// Extent of one tile along this axis. The total size must be a
    /// non-zero multiple of this, as there are no ragged edge tiles.
    pub tile_size: usize,
}

impl Dimension {

    /// A new axis descriptor.
    pub fn new(name: impl Into<String>, size: usize, tile_size: usize) -> Self {
        Dimension { name: name.into(), size, tile_size }
    }

    /// Number of tiles along this axis.
    pub fn tiles(&self) -> usize {
        self.size / self.tile_size
    }

    pub(crate) fn validate(&self) -> UnitResult {
        if self.size == 0 || self.tile_size == 0 || self.size % self.tile_size != 0 {
            return Err(Error::shape(format!(
                "dimension `{}` of size {} cannot be split into tiles of size {}",
                self.name, self.size, self.tile_size
            )));
        }

        Ok(())
    }

    pub(crate) fn write(&self, write: &mut impl Write, order: ByteOrder, offsets: OffsetWidth) -> UnitResult {
        write_string(write, &self.name, order, offsets)?;
        (self.size as i64).write_ordered(write, order)?;
        (self.tile_size as i64).write_ordered(write, order)?;
        Ok(())
    }

    pub(crate) fn read(read: &mut impl Read, order: ByteOrder, offsets: OffsetWidth) -> Result<Self> {
        let name = read_string(read, order, offsets)?;
        let size = i64::read_ordered(read, order)?;
        let tile_size = i64::read_ordered(read, order)?;

        if size <= 0 || tile_size <= 0 {
            return Err(Error::invalid("dimension size sign"));
        }

        let dimension = Dimension::new(name, size as usize, tile_size as usize);
        dimension.validate()?;
        Ok(dimension)
    }
}

/// All axes of a layer, in declaration order.
/// Dimension 0 varies fastest in every scan order of the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionSet {

    /// The axes, ordered fastest-varying first.
    pub list: SmallVec<[Dimension; 2]>,
}

impl DimensionSet {

    /// A new set of axes.
    pub fn new(list: impl Into<SmallVec<[Dimension; 2]>>) -> Self {
        DimensionSet { list: list.into() }
    }

    /// Number of axes.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Whether this set contains no axes at all.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Number of tiles along the given axis.
    pub fn tiles_along(&self, axis: usize) -> usize {
        self.list[axis].tiles()
    }

    /// Total number of tiles in one channel plane.
    pub fn tiles_per_plane(&self) -> usize {
        self.list.iter().map(Dimension::tiles).product()
    }

    /// Number of samples in one tile.
    pub fn samples_per_tile(&self) -> usize {
        self.list.iter().map(|dimension| dimension.tile_size).product()
    }

    /// Translate a sample coordinate into the tile that stores it
    /// and the sample index within that tile.
    pub fn selector_of(&self, coordinate: &[usize]) -> Result<TileSelector> {
        if coordinate.len() != self.list.len() {
            return Err(Error::shape(format!(
                "coordinate has {} axes, layer has {}",
                coordinate.len(), self.list.len()
            )));
        }

        let mut tile = 0;
        let mut in_tile = 0;
        let mut tile_stride = 1;
        let mut in_tile_stride = 1;

        for (axis, dimension) in self.list.iter().enumerate() {
            let position = coordinate[axis];
            if position >= dimension.size {
                return Err(Error::shape(format!(
                    "coordinate {} exceeds dimension `{}` of size {}",
                    position, dimension.name, dimension.size
                )));
            }

            tile += (position / dimension.tile_size) * tile_stride;
            in_tile += (position % dimension.tile_size) * in_tile_stride;
            tile_stride *= dimension.tiles();
            in_tile_stride *= dimension.tile_size;
        }

        Ok(TileSelector { tile, in_tile })
    }

    /// Translate a tile and in-tile index back into the sample coordinate.
    pub fn coordinate_of(&self, selector: TileSelector) -> SampleCoordinate {
        let mut tile = selector.tile;
        let mut in_tile = selector.in_tile;
        let mut coordinate = SampleCoordinate::with_capacity(self.list.len());

        for dimension in &self.list {
            let tile_axis = tile % dimension.tiles();
            let in_tile_axis = in_tile % dimension.tile_size;
            tile /= dimension.tiles();
            in_tile /= dimension.tile_size;

            coordinate.push(tile_axis * dimension.tile_size + in_tile_axis);
        }

        coordinate
    }

    pub(crate) fn validate(&self) -> UnitResult {
        if self.list.is_empty() {
            return Err(Error::shape("a layer requires at least one dimension"));
        }

        for dimension in &self.list {
            dimension.validate()?;
        }

        Ok(())
    }
}

impl std::ops::Index<usize> for DimensionSet {
    type Output = Dimension;
    fn index(&self, axis: usize) -> &Dimension {
        &self.list[axis]
    }
}
