use std::io;
use thiserror::Error;

/// Convenience alias for results produced by this crate
pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Error, Debug)]
#[non_exhaustive]
/// Possible `libfgdb` errors
pub enum Error {
    /// The underlying byte source failed or returned short
    #[error("i/o error")]
    Io(#[from] io::Error),
    /// A file version, field type or encoding variant this crate does not read
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    /// Self-inconsistent or truncated on-disk data
    #[error("malformed data: {0}")]
    MalformedBlob(String),
    /// A geometry blob carries a stream its geometry definition cannot decode
    #[error("missing context: {0}")]
    MissingContext(&'static str),
    /// Unknown table name or identifier
    #[error("not found: {0}")]
    NotFound(String),
    /// Contract violation by the caller
    #[error("contract violation: {0}")]
    Assertion(&'static str),
}

impl Error {
    pub(crate) fn unsupported(what: impl Into<String>) -> Self {
        Self::UnsupportedFormat(what.into())
    }

    pub(crate) fn malformed(what: impl Into<String>) -> Self {
        Self::MalformedBlob(what.into())
    }
}
