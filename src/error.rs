//! Error type shared by every archive operation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ZipError>;

/// Everything that can go wrong while listing, writing or extracting an archive.
#[derive(Error, Debug)]
pub enum ZipError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not a valid ZIP file: {0}")]
    NotAnArchive(String),

    #[error("Invalid Central Directory at offset {offset}: {reason}")]
    InvalidDirectory { offset: u64, reason: String },

    #[error("Corrupt data in entry '{name}': {reason}")]
    CorruptData { name: String, reason: String },

    #[error("CRC-32 mismatch in entry '{name}': expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        name: String,
        expected: u32,
        actual: u32,
    },

    #[error("Unsupported compression method {method} in entry '{name}'")]
    UnsupportedMethod { name: String, method: u16 },

    #[error("Duplicate entry name: {0}")]
    DuplicateEntry(String),

    #[error("Source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("Entry '{0}' would be extracted outside the destination directory")]
    PathTraversal(String),

    #[error("Destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("Archive is already closed")]
    ArchiveClosed,

    #[error("IO error: {0}")]
    Io(io::Error),
}

/// Coarse classification of [`ZipError`], used for process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotAnArchive,
    Io,
    Integrity,
}

impl ErrorKind {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::InvalidArgument => 2,
            ErrorKind::NotAnArchive => 3,
            ErrorKind::Io => 4,
            ErrorKind::Integrity => 5,
        }
    }
}

impl ZipError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ZipError::InvalidArgument(_) | ZipError::DuplicateEntry(_) => {
                ErrorKind::InvalidArgument
            }
            ZipError::NotAnArchive(_) | ZipError::InvalidDirectory { .. } => {
                ErrorKind::NotAnArchive
            }
            ZipError::SourceNotFound(_) | ZipError::PermissionDenied(_) | ZipError::Io(_) => {
                ErrorKind::Io
            }
            ZipError::CorruptData { .. }
            | ZipError::ChecksumMismatch { .. }
            | ZipError::UnsupportedMethod { .. }
            | ZipError::PathTraversal(_)
            | ZipError::DestinationExists(_)
            | ZipError::ArchiveClosed => ErrorKind::Integrity,
        }
    }

    /// True for errors raised because payload bytes failed validation.
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            ZipError::CorruptData { .. } | ZipError::ChecksumMismatch { .. }
        )
    }

    /// Map an I/O error raised while touching `path` onto the source-level variants.
    pub fn from_source_io(err: io::Error, path: impl Into<PathBuf>) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ZipError::SourceNotFound(path.into()),
            io::ErrorKind::PermissionDenied => ZipError::PermissionDenied(path.into()),
            _ => ZipError::from(err),
        }
    }

    /// Wrap this error so it can travel through `std::io::Read`/`Write`.
    pub(crate) fn into_io(self) -> io::Error {
        match self {
            ZipError::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

impl From<io::Error> for ZipError {
    fn from(err: io::Error) -> Self {
        // Errors produced by `into_io` come back out unchanged.
        if err.get_ref().is_some_and(|inner| inner.is::<ZipError>()) {
            if let Some(inner) = err.into_inner() {
                if let Ok(zip_err) = inner.downcast::<ZipError>() {
                    return *zip_err;
                }
            }
            return ZipError::Io(io::Error::other("wrapped error lost"));
        }
        ZipError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_round_trip_preserves_variant() {
        let err = ZipError::ChecksumMismatch {
            name: "a.txt".into(),
            expected: 1,
            actual: 2,
        };
        let back = ZipError::from(err.into_io());
        assert!(matches!(back, ZipError::ChecksumMismatch { expected: 1, actual: 2, .. }));
    }

    #[test]
    fn plain_io_errors_stay_io() {
        let err = ZipError::from(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(matches!(err, ZipError::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn source_errors_are_classified() {
        let err = ZipError::from_source_io(io::Error::from(io::ErrorKind::NotFound), "missing");
        assert!(matches!(err, ZipError::SourceNotFound(_)));
        let err =
            ZipError::from_source_io(io::Error::from(io::ErrorKind::PermissionDenied), "locked");
        assert!(matches!(err, ZipError::PermissionDenied(_)));
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_eq!(ZipError::InvalidArgument("x".into()).kind().exit_code(), 2);
        assert_eq!(ZipError::NotAnArchive("x".into()).kind().exit_code(), 3);
        assert_eq!(ZipError::ArchiveClosed.kind().exit_code(), 5);
    }
}
