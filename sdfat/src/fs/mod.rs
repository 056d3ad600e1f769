//! Filesystem layer
//!
//! One driver: a read-only FAT32 engine over the sector-level disk
//! adapter. The engine never touches the SPI bus directly, and the
//! adapter never parses filesystem structures.

pub mod fat32;

pub use fat32::FileSystem;

use crate::sd::SdError;

/// Engine-level failure codes. Every public entry point returns one of
/// these; there is no panic path in normal operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// The card did not come up or reported a bad status.
    NotReady,
    /// No FAT32 volume on the medium, directly or behind the first
    /// partition-table entry.
    NoFilesystem,
    /// No volume is mounted.
    NotMounted,
    /// A path segment did not resolve to an entry.
    NotFound,
    /// The path names a directory, not a file.
    IsDirectory,
    /// No file is currently open.
    NotOpen,
    /// A sector read failed below the engine.
    Io,
    /// A cluster number or FAT chain is structurally invalid.
    BadChain,
}

impl From<SdError> for FsError {
    fn from(_: SdError) -> Self {
        FsError::Io
    }
}
