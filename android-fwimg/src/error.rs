use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Broad class of an [`Error`], so callers can tell "not this format" apart
/// from "this format, but broken" and from bad caller input.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Format,
    Io,
    Validation,
    Tool,
}

#[derive(Debug, Error)]
pub enum Error {
    // Format errors.
    #[error("{structure}: invalid magic {found:#010x} at offset {offset:#x}")]
    InvalidMagic {
        structure: &'static str,
        offset: u64,
        found: u32,
    },
    #[error("{structure}: truncated at offset {offset:#x}")]
    Truncated { structure: &'static str, offset: u64 },
    #[error("{structure}: unsupported version {version}")]
    UnsupportedVersion {
        structure: &'static str,
        version: String,
    },
    #[error("{field} at offset {offset:#x}: {reason}")]
    Malformed {
        field: &'static str,
        offset: u64,
        reason: String,
    },
    #[error("{table} table ({offset:#x} + {len:#x}) exceeds tables size {tables_size:#x}")]
    TableOutOfBounds {
        table: &'static str,
        offset: u64,
        len: u64,
        tables_size: u64,
    },
    #[error("Input is a sparse image, unsparse it first")]
    SparseInput,
    #[error("No valid metadata header found in {slots} slot(s)")]
    NoValidMetadataSlot { slots: u32 },
    // Validation errors.
    #[error("Command line is {len} bytes, exceeds the {max}-byte region")]
    CmdlineTooLong { len: usize, max: usize },
    #[error("{table} entry size mismatch: expected {expected}, got {actual}")]
    EntrySizeMismatch {
        table: &'static str,
        expected: u32,
        actual: u32,
    },
    #[error("{0}")]
    Invalid(String),
    // I/O errors.
    #[error("{}: file not found", .0.display())]
    NotFound(PathBuf),
    #[error("{}: {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to {0}")]
    Io(&'static str, #[source] io::Error),
    // External tools.
    #[error("{program}: not found or not executable")]
    ToolMissing {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {exit_code}: {stderr}")]
    ToolFailed {
        program: String,
        exit_code: i32,
        stderr: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidMagic { .. }
            | Error::Truncated { .. }
            | Error::UnsupportedVersion { .. }
            | Error::Malformed { .. }
            | Error::TableOutOfBounds { .. }
            | Error::SparseInput
            | Error::NoValidMetadataSlot { .. } => ErrorKind::Format,
            Error::CmdlineTooLong { .. } | Error::EntrySizeMismatch { .. } | Error::Invalid(_) => {
                ErrorKind::Validation
            }
            Error::NotFound(_) | Error::File { .. } | Error::Io(..) | Error::ToolMissing { .. } => {
                ErrorKind::Io
            }
            Error::ToolFailed { .. } => ErrorKind::Tool,
        }
    }

    /// Wraps an error raised while opening or reading `path`, keeping a
    /// missing file distinguishable from other failures.
    pub fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            Error::NotFound(path)
        } else {
            Error::File { path, source }
        }
    }

    /// Maps an I/O error from reading a fixed structure: an early EOF means
    /// the structure is truncated, anything else is an I/O failure.
    pub(crate) fn read(structure: &'static str, offset: u64, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::UnexpectedEof {
            Error::Truncated { structure, offset }
        } else {
            Error::Io("read image data", source)
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::Invalid(message.into())
    }
}
