//! Disk I/O adapter
//!
//! Translates "read N bytes at offset O within sector S" into the
//! command/response/data-token sequence the card speaks. The card always
//! transfers whole 512-byte blocks; partial reads save marshaling, never
//! bus cycles.

use crate::hal::spi::{self, SpiBus, SPI_PRESCALE_FAST};
use crate::hal::time::{Monotonic, Timeout};
use crate::sd::card::{log_r1, sd_cmd, SdCard, R1};
use crate::sd::SdError;

/// Logical sector size, fixed by the card protocol and the filesystem.
pub const SECTOR_SIZE: usize = 512;

/// Byte marking the start of a read-data block.
const START_BLOCK_TOKEN: u8 = 0xFE;

/// Response polls while waiting for the start-of-block token.
pub const TOKEN_POLLS: u32 = 65535;

const TOKEN_TIMEOUT_US: u64 = 100_000;

/// Sector-level access to one SD card.
pub struct Disk<B, C> {
    card: SdCard<B, C>,
}

impl<B: SpiBus, C: Monotonic> Disk<B, C> {
    pub fn new(bus: B, clock: C) -> Self {
        Self {
            card: SdCard::new(bus, clock),
        }
    }

    /// Bring the card up and switch to the full read clock.
    ///
    /// The order is dictated by the card's electrical characteristics:
    /// warm the bus up slowly, reset and initialize, check the status
    /// word, and only then raise the clock.
    pub fn initialize(&mut self) -> Result<(), SdError> {
        spi::warm_up(&mut self.card.bus);
        self.card.bring_up()?;
        self.card.query_state()?;
        self.card.bus.set_speed(SPI_PRESCALE_FAST);
        log::debug!("SD: card ready");
        Ok(())
    }

    /// Read `dest.len()` bytes starting `offset` bytes into `sector`.
    ///
    /// The whole 512-byte block plus two checksum bytes is clocked out
    /// regardless of the requested window; bytes outside it are drained.
    /// `offset + dest.len()` must not exceed [`SECTOR_SIZE`].
    ///
    /// The card is byte-addressed, which caps reachable media at 4 GiB;
    /// sectors past that are rejected with the address-error bit without
    /// touching the bus.
    pub fn read_partial(
        &mut self,
        sector: u32,
        offset: usize,
        dest: &mut [u8],
    ) -> Result<(), SdError> {
        debug_assert!(offset + dest.len() <= SECTOR_SIZE);

        // The bus is shared with other peripherals; reassert our rate.
        self.card.bus.set_speed(SPI_PRESCALE_FAST);

        // The card addresses by byte.
        let address = match sector.checked_mul(SECTOR_SIZE as u32) {
            Some(address) => address,
            None => {
                log::warn!("SD: sector {} beyond byte addressing", sector);
                return Err(SdError::ReadRejected(R1::ADDRESS_ERROR.bits()));
            }
        };
        self.card.command(sd_cmd::READ, address);
        let response = self.card.response_8();

        let timeout = Timeout::after(&self.card.clock, TOKEN_TIMEOUT_US);
        let mut token = 0xFF;
        for _ in 0..TOKEN_POLLS {
            token = self.card.response_8();
            if token != 0xFF || timeout.expired(&self.card.clock) {
                break;
            }
        }

        if response != 0 || token != START_BLOCK_TOKEN {
            // Dump whatever the card showed us; it is usually an R1-style
            // error byte.
            log_r1(token);
            self.card.bus.deselect();
            return Err(if response != 0 {
                SdError::ReadRejected(response)
            } else {
                SdError::NoStartToken(token)
            });
        }

        self.card.bus.select();
        for _ in 0..offset {
            self.card.bus.transfer(0xFF); // skip leading bytes
        }
        for i in 0..(SECTOR_SIZE - offset) {
            let byte = self.card.bus.transfer(0xFF);
            if i < dest.len() {
                dest[i] = byte;
            }
        }
        // Two checksum bytes, ignored.
        self.card.bus.transfer(0xFF);
        self.card.bus.transfer(0xFF);
        self.card.bus.deselect();

        Ok(())
    }
}
