//! Error types and the related `Result<T>`

use camino::Utf8PathBuf;
use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// The archive couldn't be opened, read, or memory mapped.
    #[error("Unable to open input file {path}")]
    CannotOpen {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file doesn't start with a local file header.
    #[error("Not a Zip archive")]
    NotAZip,

    /// A read would run past the end of the archive.
    #[error("Truncated Zip archive: {0}")]
    Truncated(&'static str),

    /// The ZIP archive contained data APPNOTE.TXT doesn't allow.
    #[error("Invalid Zip archive: {0}")]
    InvalidArchive(&'static str),

    /// A cast from a 64-bit int to a usize failed while mapping the file,
    /// probably on a 32-bit system.
    #[error("Zip archive too large for address space")]
    InsufficientAddressSpace,

    /// `CREATE VIRTUAL TABLE` was given no archive path.
    #[error("Input file name missing")]
    MissingFileName,

    /// A prefix filter wasn't of the form `<prefix>*`.
    #[error("Invalid path pattern {0:?}: expected a single trailing '*'")]
    InvalidPattern(String),

    #[error("Invalid column number {0}")]
    InvalidColumn(usize),

    /// The cursor isn't positioned on a row.
    #[error("Cursor out of bounds")]
    NoCurrentRow,

    #[error("Invalid compression level {0}")]
    InvalidLevel(i64),

    /// A scalar function got the wrong number or kind of arguments.
    #[error("Bad arguments: {0}")]
    Arguments(&'static str),

    /// The entry uses a compression method we can't decode.
    #[error("Unsupported compression method {0}")]
    UnsupportedMethod(u16),

    #[error("Inflate error")]
    Inflate,

    #[error("Deflate error")]
    Deflate,

    /// Growing an output buffer failed.
    #[error("Out of memory")]
    OutOfMemory,

    /// The host couldn't run a query on our behalf.
    #[error("Host query failed: {0}")]
    Host(String),
}

impl From<std::collections::TryReserveError> for ZipError {
    fn from(_: std::collections::TryReserveError) -> Self {
        ZipError::OutOfMemory
    }
}
