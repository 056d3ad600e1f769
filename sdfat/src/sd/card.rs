//! Card command protocol
//!
//! SPI-mode SD commands are 6-byte frames: `0x40 | index`, a 32-bit
//! big-endian parameter, and a checksum byte the card only verifies for
//! the very first command. Responses arrive within a small number of
//! clocks; 0xFF on the wire means the card has not answered yet.

use crate::hal::spi::SpiBus;
use crate::hal::time::{Monotonic, Timeout};
use crate::sd::SdError;

/// SD command indices (SPI mode).
pub mod sd_cmd {
    /// GO_IDLE_STATE - software reset.
    pub const RESET: u8 = 0;
    /// SEND_OP_COND - start initialization.
    pub const INIT: u8 = 1;
    /// SEND_STATUS - 16-bit status word.
    pub const STATUS: u8 = 13;
    /// READ_SINGLE_BLOCK.
    pub const READ: u8 = 17;
}

/// Checksum byte sent with every frame. Only CMD0 has its CRC checked by
/// the card, and this is the correct value for CMD0 with a zero argument.
const FRAME_CHECKSUM: u8 = 0x95;

/// Clocks to poll for an 8-bit response before giving up.
pub const RESPONSE_POLLS: u32 = 8;

/// Reset attempts before declaring the card absent.
pub const RESET_ATTEMPTS: u32 = 100;

/// Initialization attempts before declaring the card stuck.
pub const INIT_ATTEMPTS: u32 = 32000;

const RESET_TIMEOUT_US: u64 = 250_000;
const INIT_TIMEOUT_US: u64 = 1_000_000;

bitflags::bitflags! {
    /// R1 response bits. 0x00 is ready; IDLE alone means the card is
    /// still initializing.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct R1: u8 {
        const IDLE          = 0x01;
        const ERASE_RESET   = 0x02;
        const ILLEGAL_CMD   = 0x04;
        const CRC_ERROR     = 0x08;
        const ERASE_SEQ_ERR = 0x10;
        const ADDRESS_ERROR = 0x20;
        const PARAM_ERROR   = 0x40;
    }
}

bitflags::bitflags! {
    /// Low byte of the CMD13 status word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CardStatus: u16 {
        const CARD_LOCKED   = 0x0001;
        const WP_ERASE_SKIP = 0x0002;
        const GENERAL_ERROR = 0x0004;
        const CC_ERROR      = 0x0008;
        const ECC_FAILED    = 0x0010;
        const WP_VIOLATION  = 0x0020;
        const ERASE_PARAM   = 0x0040;
        const OUT_OF_RANGE  = 0x0080;
    }
}

const R1_MESSAGES: [(R1, &str); 7] = [
    (R1::PARAM_ERROR, "argument out of bounds"),
    (R1::ADDRESS_ERROR, "address out of bounds"),
    (R1::ERASE_SEQ_ERR, "error during erase sequence"),
    (R1::CRC_ERROR, "CRC failed"),
    (R1::ILLEGAL_CMD, "illegal command"),
    (R1::ERASE_RESET, "erase reset"),
    (R1::IDLE, "card is initialising"),
];

const STATUS_MESSAGES: [(CardStatus, &str); 8] = [
    (CardStatus::CARD_LOCKED, "card is locked"),
    (CardStatus::WP_ERASE_SKIP, "WP erase skip, lock/unlock failed"),
    (CardStatus::GENERAL_ERROR, "general or unknown error"),
    (CardStatus::CC_ERROR, "internal card controller error"),
    (CardStatus::ECC_FAILED, "card ECC applied but failed to correct"),
    (CardStatus::WP_VIOLATION, "write protect violation"),
    (CardStatus::ERASE_PARAM, "invalid erase sector selection"),
    (CardStatus::OUT_OF_RANGE, "out of range / CSD overwrite"),
];

/// Log every condition a non-zero R1 byte reports.
pub(crate) fn log_r1(value: u8) {
    let flags = R1::from_bits_truncate(value);
    for (flag, message) in R1_MESSAGES {
        if flags.contains(flag) {
            log::warn!("SD: {}", message);
        }
    }
    if value & !R1::all().bits() != 0 {
        log::warn!("SD: unknown response 0x{:02x}", value);
    }
}

/// Log every condition a non-zero CMD13 status word reports.
fn log_status(word: u16) {
    let flags = CardStatus::from_bits_truncate(word);
    for (flag, message) in STATUS_MESSAGES {
        if flags.contains(flag) {
            log::warn!("SD: {}", message);
        }
    }
    if word > 0x00FF {
        // High byte is an R1-style error.
        log_r1((word >> 8) as u8);
    } else if flags.is_empty() {
        log::warn!("SD: unknown status 0x{:04x}", word);
    }
}

/// One SPI-attached SD card.
pub struct SdCard<B, C> {
    pub(crate) bus: B,
    pub(crate) clock: C,
}

impl<B: SpiBus, C: Monotonic> SdCard<B, C> {
    pub fn new(bus: B, clock: C) -> Self {
        Self { bus, clock }
    }

    /// Send one command frame. Chip-select is held for the frame plus one
    /// throwaway clock, then released; the caller polls for the response
    /// separately.
    pub(crate) fn command(&mut self, index: u8, parameter: u32) {
        self.bus.select();
        self.bus.transfer(0xFF); // sync clock before the frame

        self.bus.transfer(0x40 | index);
        self.bus.transfer((parameter >> 24) as u8);
        self.bus.transfer((parameter >> 16) as u8);
        self.bus.transfer((parameter >> 8) as u8);
        self.bus.transfer(parameter as u8);
        self.bus.transfer(FRAME_CHECKSUM);

        self.bus.transfer(0xFF); // eat the empty command-response slot
        self.bus.deselect();
    }

    /// First byte other than 0xFF within [`RESPONSE_POLLS`] clocks.
    ///
    /// 0xFF back means the card either stayed busy for the whole budget or
    /// explicitly answered 0xFF; the two are not distinguishable on the
    /// wire and are deliberately reported as one outcome. Chip-select
    /// stays asserted once a response arrives so a data phase can continue
    /// on the same selection; it is released only on the all-0xFF path.
    pub(crate) fn response_8(&mut self) -> u8 {
        self.bus.select();
        let mut response = 0xFF;
        for _ in 0..RESPONSE_POLLS {
            response = self.bus.transfer(0xFF);
            if response != 0xFF {
                return response;
            }
        }
        self.bus.deselect();
        response
    }

    /// Two chained 8-bit reads composed big-endian.
    pub(crate) fn response_16(&mut self) -> u16 {
        self.bus.select();
        let value = u16::from(self.response_8()) << 8;

        self.bus.select();
        let value = value | u16::from(self.bus.transfer(0xFF));
        self.bus.deselect();
        value
    }

    /// Reset the card and wait for it to finish initializing.
    ///
    /// CMD0 is retried up to [`RESET_ATTEMPTS`] times until the card
    /// reports idle; a final 0xFF means no card answered at all, anything
    /// else is a protocol error. CMD1 is then retried up to
    /// [`INIT_ATTEMPTS`] times until the idle bit clears. Both loops also
    /// observe a wall-clock deadline.
    pub fn bring_up(&mut self) -> Result<(), SdError> {
        let timeout = Timeout::after(&self.clock, RESET_TIMEOUT_US);
        let mut response = 0xFF;
        for _ in 0..RESET_ATTEMPTS {
            self.command(sd_cmd::RESET, 0);
            response = self.response_8();
            if response == R1::IDLE.bits() || timeout.expired(&self.clock) {
                break;
            }
        }
        if response != R1::IDLE.bits() {
            if response == 0xFF {
                return Err(SdError::NoCard);
            }
            log_r1(response);
            return Err(SdError::Protocol(response));
        }

        let timeout = Timeout::after(&self.clock, INIT_TIMEOUT_US);
        for _ in 0..INIT_ATTEMPTS {
            self.command(sd_cmd::INIT, 0);
            response = self.response_8();
            if response != R1::IDLE.bits() || timeout.expired(&self.clock) {
                break;
            }
        }
        if response != 0 {
            log_r1(response);
            return Err(SdError::InitFailed(response));
        }
        Ok(())
    }

    /// Ask the card for its 16-bit status word; success only when it is
    /// exactly zero. Every recognized non-zero condition is logged.
    pub fn query_state(&mut self) -> Result<(), SdError> {
        self.command(sd_cmd::STATUS, 0);
        let word = self.response_16();
        if word == 0 {
            return Ok(());
        }
        log_status(word);
        Err(SdError::Status(word))
    }
}
