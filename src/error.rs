//! Central error types for the engine, grouped the way `format.rs`'s
//! `DemuxerError` and `format/mkv/ebml.rs`'s `MkvError` grouped theirs in the
//! base crate: one enum per boundary, `thiserror` doing the `Display`/`source`
//! plumbing, `#[from]` at every natural conversion point.

use std::io;
use thiserror::Error;

/// Failures from the byte I/O layer (§4.1).
#[derive(Debug, Error)]
pub enum IoError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("unexpected end of file")]
    Eof,
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },
    #[error("seek failed: {0}")]
    SeekFailed(io::Error),
    #[error("{0}")]
    Other(io::Error),
}

impl IoError {
    pub fn from_io(path: &str, err: io::Error) -> IoError {
        match err.kind() {
            io::ErrorKind::NotFound => IoError::NotFound(path.to_string()),
            io::ErrorKind::PermissionDenied => IoError::Permission(path.to_string()),
            io::ErrorKind::UnexpectedEof => IoError::Eof,
            _ => IoError::Other(err),
        }
    }
}

impl From<io::Error> for IoError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => IoError::NotFound(String::new()),
            io::ErrorKind::PermissionDenied => IoError::Permission(String::new()),
            io::ErrorKind::UnexpectedEof => IoError::Eof,
            _ => IoError::Other(err),
        }
    }
}

/// Why track selection (`-a/-A/-d/-D/-s/-S`) failed (§4.2, §4.7).
#[derive(Debug, Error)]
pub enum TrackSelectionError {
    #[error("cannot combine an explicit track list with the matching 'no tracks' flag")]
    ConflictingFlags,
    #[error("track id {0} is out of range (expected 1..=255)")]
    OutOfRange(u32),
    #[error("track id {0} does not exist in this input")]
    NotFound(u32),
}

/// Why the demultiplexer couldn't even get started (§7).
#[derive(Debug, Error)]
pub enum DemuxError {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error("no demultiplexer recognized this input")]
    ProbeFailed,
    #[error("unsupported format: {0}")]
    UnsupportedFormat(&'static str),
    #[error("failed to parse {format} headers: {detail}")]
    Init { format: &'static str, detail: String },
    #[error(transparent)]
    TrackSelection(#[from] TrackSelectionError),
}

/// Why a CLI/option-file value was rejected (§4.7, §6).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid sync specification {0:?}: {1}")]
    SyncInvalid(String, String),
    #[error("invalid aspect ratio {0:?}: {1}")]
    AspectInvalid(String, String),
    #[error("FourCC must be exactly 4 characters, got {0:?}")]
    FourCCInvalid(String),
    #[error("invalid ISO 639-2 language code {0:?}")]
    LanguageInvalid(String),
    #[error(transparent)]
    TrackSelection(#[from] TrackSelectionError),
    #[error("{0}")]
    Usage(String),
}

/// Failures while rendering the EBML document (§4.6, §7).
#[derive(Debug, Error)]
pub enum WriterError {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

/// A non-fatal diagnostic the engine surfaces to the user without aborting
/// (currently only `MetaSeekOverflow`, §7's "only non-fatal downgrade").
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
}

impl Diagnostic {
    pub fn meta_seek_overflow(reserved: u64, needed: u64) -> Diagnostic {
        let suggestion = needed + 100;
        Diagnostic {
            message: format!(
                "warning: the reserved seek-head space ({reserved} bytes) was too small to hold \
                 the {needed}-byte seek head; re-run with '--meta-seek-size {suggestion}' or \
                 larger to keep the full meta-seek index",
            ),
        }
    }
}

/// Top-level error returned by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Demux(#[from] DemuxError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Writer(#[from] WriterError),
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}
