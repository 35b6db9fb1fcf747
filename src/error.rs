
//! Error type for everything that can go wrong
//! while writing or reading a container.

use std::borrow::Cow;
use std::fmt;
use std::io::ErrorKind;
use std::sync::Arc;

/// A result that may fail with a container [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// A result that, if ok, contains nothing, and otherwise contains a container [`Error`].
pub type UnitResult = Result<()>;

pub use std::io::Error as IoError;
pub use std::io::Result as IoResult;

/// All possible container failures.
/// The error is cloneable so a single latched error can be surfaced
/// both from a writer's sticky slot and from its finalization.
#[derive(Debug, Clone)]
pub enum Error {

    /// The file does not start with the container magic marker.
    BadMagic,

    /// The file declares a format version this library does not understand.
    UnsupportedVersion(u16),

    /// The file declares an in-file pointer width other than 4 or 8 bytes.
    BadOffsetWidth(u8),

    /// A layer record names a compression id this library does not know.
    UnknownCodec(u8),

    /// A tile payload could not be decoded back into raw samples.
    CorruptTile(Cow<'static, str>),

    /// A shape constraint was violated: a dimension not divisible by its
    /// tile size, a wrong channel count, or an out-of-range coordinate.
    ShapeMismatch(Cow<'static, str>),

    /// A value was supplied to a channel of a different type.
    TypeMismatch(Cow<'static, str>),

    /// A sample was written to a layer writer that was already finalized.
    WriterClosed,

    /// The contents of the file are invalid or a record cannot be
    /// represented within the declared offset width.
    Invalid(Cow<'static, str>),

    /// The underlying byte stream could not be read or written.
    Io(Arc<IoError>),
}

impl Error {

    /// Create an error describing an undecodable tile payload.
    pub(crate) fn corrupt(message: impl Into<Cow<'static, str>>) -> Self {
        Error::CorruptTile(message.into())
    }

    /// Create an error describing a violated shape constraint.
    pub(crate) fn shape(message: impl Into<Cow<'static, str>>) -> Self {
        Error::ShapeMismatch(message.into())
    }

    /// Create an error describing a wrongly typed channel value.
    pub(crate) fn type_mismatch(message: impl Into<Cow<'static, str>>) -> Self {
        Error::TypeMismatch(message.into())
    }

    /// Create an error describing invalid file contents.
    pub(crate) fn invalid(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Invalid(message.into())
    }
}

/// Enable using the `?` operator on `std::io::Result`.
impl From<IoError> for Error {
    fn from(error: IoError) -> Self {
        if error.kind() == ErrorKind::UnexpectedEof {
            Error::invalid("content size")
        }
        else {
            Error::Io(Arc::new(error))
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadMagic => write!(formatter, "not a pixi container (magic marker missing)"),
            Error::UnsupportedVersion(version) => write!(formatter, "unsupported container version {}", version),
            Error::BadOffsetWidth(width) => write!(formatter, "invalid offset width of {} bytes", width),
            Error::UnknownCodec(id) => write!(formatter, "unknown tile compression id {}", id),
            Error::CorruptTile(message) => write!(formatter, "corrupt tile payload ({})", message),
            Error::ShapeMismatch(message) => write!(formatter, "shape mismatch ({})", message),
            Error::TypeMismatch(message) => write!(formatter, "channel type mismatch ({})", message),
            Error::WriterClosed => write!(formatter, "layer writer is already finalized"),
            Error::Invalid(message) => write!(formatter, "invalid container contents ({})", message),
            Error::Io(error) => write!(formatter, "io error: {}", error),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(error) => Some(error.as_ref()),
            _ => None,
        }
    }
}
