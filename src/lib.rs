

//! Read and write Pixi containers: seekable, tiled, optionally compressed
//! binary rasters holding multiple layers of typed channels.
//!
//! A container starts with a fixed header, followed by any number of
//! tag blocks and layer records linked through in-file pointers.
//! Layers are written through an [`block::writer::IterativeLayerWriter`],
//! which streams finished tiles to a background worker, and read back
//! through a [`block::reader::ReadCache`], which keeps a bounded number
//! of decoded tiles in memory.

#![warn(
    rust_2018_idioms,
    future_incompatible,
    unused_extern_crates,
    unused,

    missing_copy_implementations,
    missing_debug_implementations,

    clippy::all,
    clippy::restriction,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
)]

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod io;

pub mod compression;
pub mod meta;

pub mod error;
pub mod block;
pub mod pixi;


/// Export the most important items from `pixi`.
/// _Note: This includes a type called `Result`, possibly overwriting the default `std::Result` type usage._
pub mod prelude {

    pub use crate::pixi::Pixi;
    pub use crate::io::{ByteOrder, OffsetWidth, Sink, Source};
    pub use crate::meta::Header;
    pub use crate::meta::dimension::{Dimension, DimensionSet, SampleCoordinate, TileSelector};
    pub use crate::meta::channel::{Channel, ChannelSet, ChannelType, Sample, Value};
    pub use crate::meta::layer::{Layer, LayerOptions, TileIndexEntry};
    pub use crate::compression::Compression;
    pub use crate::block::writer::IterativeLayerWriter;
    pub use crate::block::reader::{CachePolicy, CacheStats, ReadCache};

    // error handling
    pub use crate::error::{Error, Result, UnitResult};

    // re-export external stuff
    pub use smallvec::SmallVec;
}
