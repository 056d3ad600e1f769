//! Hardware seams
//!
//! The engine reaches hardware through two small traits: a full-duplex
//! SPI master ([`spi::SpiBus`]) and a monotonic clock ([`time::Monotonic`]).
//! Targets implement them over their bus controller registers; tests
//! substitute scripted doubles.

pub mod spi;
pub mod time;

pub use spi::SpiBus;
pub use time::{Monotonic, Timeout};
