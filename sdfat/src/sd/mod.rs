//! SD card access over SPI
//!
//! Two layers, bottom-up:
//! - `card`: frames commands, reads 8-/16-bit responses, drives the
//!   power-on/reset/ready handshake and decodes card status codes.
//! - `disk`: the sector-level adapter the filesystem engine talks to:
//!   initialize, then read byte ranges out of 512-byte sectors.

pub mod card;
pub mod disk;

pub use card::{CardStatus, R1, SdCard};
pub use disk::{Disk, SECTOR_SIZE};

/// Card-layer failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdError {
    /// The card never answered the reset command. An answer of 0xFF after
    /// the whole retry budget is indistinguishable from "card still busy";
    /// both are reported here.
    NoCard,
    /// The card answered the reset command with something other than the
    /// idle status.
    Protocol(u8),
    /// The card never reported ready during initialization.
    InitFailed(u8),
    /// The card reported a non-zero status word.
    Status(u16),
    /// The card rejected a read command; the R1 byte it answered with.
    ReadRejected(u8),
    /// The start-of-block token never arrived (or an error token came in
    /// its place); the last byte observed.
    NoStartToken(u8),
}
