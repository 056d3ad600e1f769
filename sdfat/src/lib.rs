//! Read-only FAT32 over a bit-banged SPI SD card.
//!
//! Built for small microcontroller hosts: no allocation, no sector
//! cache, one open file per volume. The host supplies the hardware
//! through the [`hal::SpiBus`] and [`hal::Monotonic`] traits; everything
//! above that is portable.
//!
//! Typical use:
//!
//! ```ignore
//! let mut volume = FileSystem::new(bus, clock);
//! volume.mount()?;
//! volume.open("/maps/board.txt")?;
//! let n = volume.read(&mut buf)?;
//! ```
//!
//! Diagnostics go through the `log` facade; the crate never installs a
//! logger.

#![cfg_attr(not(test), no_std)]

pub mod fs;
pub mod hal;
pub mod sd;

pub use fs::{FileSystem, FsError};
pub use hal::{Monotonic, SpiBus, Timeout};
pub use sd::{Disk, SdError, SECTOR_SIZE};
