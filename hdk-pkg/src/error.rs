//! Error types for package and NPD operations

use std::io;

use thiserror::Error;

/// Errors raised while reading a package.
///
/// Digest and license mismatches are not errors; they are reported as
/// booleans so callers can decide how much to trust the data.
#[derive(Debug, Error)]
pub enum PkgError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("PKG file too small for header")]
    FileTooSmall,

    #[error("invalid PKG magic {0:#010x} (expected 0x7F504B47)")]
    InvalidMagic(u32),

    #[error("unsupported PKG revision {0:#06x} (expected retail 0x8000)")]
    UnsupportedRevision(u16),

    #[error("unsupported PKG type {0:#06x} (expected PS3 0x0001)")]
    UnsupportedType(u16),

    #[error("metadata entry overruns the metadata region")]
    MetadataOverflow,

    #[error("data_offset + data_size exceeds file size")]
    DataOutOfBounds,

    #[error("entry index {0} out of range")]
    EntryIndex(usize),

    #[error("entry name or data range of entry {0} is outside the data area")]
    EntryOutOfBounds(usize),

    #[error("invalid UTF-8 in entry name at index {0}")]
    InvalidEntryName(usize),

    #[error("entry {0} is a directory and has no data")]
    IsDirectory(usize),

    #[error("entry name \"{0}\" escapes the extraction directory")]
    UnsafePath(String),

    #[error("NPD header error: {0}")]
    Npd(#[from] NpdError),
}

impl PkgError {
    /// Whether this error means the input is not a well-formed package, as
    /// opposed to an I/O failure or a caller mistake.
    pub const fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::FileTooSmall
                | Self::InvalidMagic(_)
                | Self::UnsupportedRevision(_)
                | Self::UnsupportedType(_)
                | Self::MetadataOverflow
                | Self::DataOutOfBounds
                | Self::EntryOutOfBounds(_)
                | Self::InvalidEntryName(_)
        )
    }
}

/// Errors raised while writing a package.
#[derive(Debug, Error)]
pub enum PkgWriteError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("content ID \"{0}\" exceeds 48 bytes")]
    ContentIdTooLong(String),

    #[error("entry name must not be empty")]
    EntryNameEmpty,

    #[error("install directory \"{0}\" exceeds 32 bytes")]
    InstallDirTooLong(String),

    #[error("package layout overflows")]
    DataOverflow,
}

/// NPD header errors
#[derive(Debug, Error)]
pub enum NpdError {
    #[error("Buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Invalid NPD magic: expected {expected:02x?}, got {actual:02x?}")]
    InvalidMagic { expected: [u8; 4], actual: [u8; 4] },

    #[error("Failed to process NPD header: {0}")]
    Binrw(#[from] binrw::Error),
}
