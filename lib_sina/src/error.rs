use std::path::PathBuf;

/// Error raised while building or mutating a [`crate::base::Base`] or
/// [`crate::cseq::CSeq`].
#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    #[error("byte {byte:#04x} at input offset {offset} is not a valid IUPAC code or gap character")]
    BadCharacter { byte: u8, offset: usize },

    #[error("cannot set width to {requested}: sequence already holds {occupied} bases")]
    WidthBelowOccupancy { requested: u32, occupied: u32 },

    #[error("appended column {column} is less than the previous column {previous}")]
    NonMonotonicAppend { previous: u32, column: u32 },

    #[error("no free column available to resolve duplicate entries at column {column}")]
    NoFreeSlot { column: u32 },

    #[error("compressed blob is truncated or malformed: {reason}")]
    MalformedBlob { reason: &'static str },
}

/// Error raised by the reference store (C3).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("reference store path must not be empty")]
    EmptyPath,

    #[error("failed to open reference store at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to persist reference store at {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("(de)serialization of stored record failed: {0}")]
    Codec(#[from] bincode::error::DecodeError),

    #[error("serialization of record failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

/// Error raised by the k-mer index (C4).
#[derive(Debug, thiserror::Error)]
pub enum KmerIndexError {
    #[error("index file header magic mismatch: expected SINAKIDX")]
    BadMagic,

    #[error("index file format version {found} is unsupported (expected {expected})")]
    UnsupportedVersion { found: u16, expected: u16 },

    #[error("index file is truncated: {reason}")]
    Truncated { reason: &'static str },

    #[error("failed to read or write index file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rebuilding a stale or broken index failed: {0}")]
    RebuildFailed(Box<KmerIndexError>),
}

/// Top level, composed error type for the library's `Result::Err` boundary.
///
/// Per-sequence failures (bad character, family too small, ...) are recorded as
/// [`crate::tray::Rejection`] values on the tray instead of surfacing here; only
/// configuration and resource errors reach this type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Sequence(#[from] SequenceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    KmerIndex(#[from] KmerIndexError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("reference file missing: {0}")]
    ReferenceFileMissing(PathBuf),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
