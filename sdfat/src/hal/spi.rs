//! SPI bus abstraction
//!
//! The card sits on a synchronous serial bus with a dedicated chip-select
//! line. The engine owns nothing below this trait; a target implementation
//! bit-bangs the controller registers and busy-waits on the
//! transfer-complete flag.

/// Smallest clock prescaler the bus controller accepts.
pub const SPI_PRESCALE_MIN: u8 = 8;

/// Prescaler used while bringing the card up. Cards must be clocked
/// slowly until initialization completes.
pub const SPI_PRESCALE_SLOW: u8 = 254;

/// Prescaler for normal data reads once the card reports ready.
pub const SPI_PRESCALE_FAST: u8 = SPI_PRESCALE_MIN;

/// Number of bytes clocked out with the card deselected before the first
/// command, to let the card's internal state machine settle.
pub const WARM_UP_CLOCKS: usize = 21;

/// Full-duplex SPI master with chip-select and clock-rate control.
///
/// `transfer` busy-waits on the controller's transfer-complete flag. A bus
/// that never completes a byte hangs the calling task; that failure mode
/// is accepted and never reported upward.
pub trait SpiBus {
    /// Shift one byte out and return the byte shifted in.
    fn transfer(&mut self, out: u8) -> u8;

    /// Set the bus clock prescaler. Implementations should pass the value
    /// through [`clamp_prescaler`]; the hardware only takes even values at
    /// or above [`SPI_PRESCALE_MIN`].
    fn set_speed(&mut self, prescaler: u8);

    /// Assert chip-select.
    fn select(&mut self);

    /// Deassert chip-select.
    fn deselect(&mut self);
}

/// Mask the low bit and enforce the hardware minimum prescale value.
pub fn clamp_prescaler(prescaler: u8) -> u8 {
    let prescaler = prescaler & 0xFE;
    if prescaler < SPI_PRESCALE_MIN {
        SPI_PRESCALE_MIN
    } else {
        prescaler
    }
}

/// Prepare the bus for the first command: drop to the bring-up clock and
/// run [`WARM_UP_CLOCKS`] dummy transfers with the card deselected.
pub fn warm_up<B: SpiBus>(bus: &mut B) {
    bus.deselect();
    bus.set_speed(SPI_PRESCALE_SLOW);
    for _ in 0..WARM_UP_CLOCKS {
        bus.transfer(0xFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prescaler_is_clamped_to_minimum() {
        assert_eq!(clamp_prescaler(0), SPI_PRESCALE_MIN);
        assert_eq!(clamp_prescaler(7), SPI_PRESCALE_MIN);
        assert_eq!(clamp_prescaler(8), 8);
    }

    #[test]
    fn prescaler_masks_low_bit() {
        assert_eq!(clamp_prescaler(9), 8);
        assert_eq!(clamp_prescaler(255), 254);
        assert_eq!(clamp_prescaler(100), 100);
    }
}
