//! Bit-serial SPI slave port shared by the serial EEPROM and RTC chips
//!
//! Input bits are sampled on rising clock edges and output bits change on falling clock edges,
//! most significant bit first. Every 8 falling edges the received byte is handed to the attached
//! device, which may respond with a byte to shift out next.

use bincode::{Decode, Encode};

pub trait SpiDevice {
    /// Handle a complete byte received from the host. Returns the byte to shift out next, if any;
    /// when `None` the port shifts out 1 bits.
    fn on_byte_received(&mut self, byte: u8) -> Option<u8>;

    /// The host released chip select.
    fn on_deselect(&mut self);
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct SpiPort {
    phase: u8,
    value_in: u8,
    value_out: u8,
    output: bool,
    chip_enable: bool,
    clock: bool,
}

impl Default for SpiPort {
    fn default() -> Self {
        Self::new()
    }
}

impl SpiPort {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: 0,
            value_in: 0xFF,
            value_out: 0xFF,
            output: true,
            chip_enable: false,
            clock: false,
        }
    }

    pub fn cold_reset(&mut self) {
        *self = Self::new();
    }

    /// Current state of the serial output line.
    #[must_use]
    pub fn read_state(&self) -> bool {
        self.output
    }

    /// Drive the chip select, clock, and data input lines.
    ///
    /// Clock edges are evaluated against the chip select state from before this call, so a host
    /// that drops chip select in the same write as the final clock edge still completes the byte.
    pub fn write_state<D: SpiDevice>(
        &mut self,
        device: &mut D,
        chip_enable: bool,
        clock: bool,
        data: bool,
    ) {
        if self.clock != clock {
            self.clock = clock;

            if self.chip_enable {
                if clock {
                    self.value_in = (self.value_in << 1) | u8::from(data);
                } else {
                    self.phase += 1;
                    if self.phase == 8 {
                        self.phase = 0;

                        let received = self.value_in;
                        log::trace!("SPI byte received: {received:02X}");
                        if let Some(response) = device.on_byte_received(received) {
                            self.value_out = response;
                        }
                    }

                    self.output = self.value_out & 0x80 != 0;
                    self.value_out = (self.value_out << 1) | 1;
                }
            }
        }

        if self.chip_enable != chip_enable {
            self.chip_enable = chip_enable;

            if !chip_enable {
                log::trace!("SPI chip deselected");
                self.phase = 0;
                self.output = true;
                device.on_deselect();
            }
        }
    }
}

/// Test helpers for driving an [`SpiPort`] one byte at a time.
#[cfg(test)]
pub(crate) mod testing {
    use super::{SpiDevice, SpiPort};

    /// Clock one byte out to the device, MSB first, returning the bits that were on the output line
    /// before each rising edge.
    pub fn exchange<D: SpiDevice>(port: &mut SpiPort, device: &mut D, byte: u8) -> u8 {
        let mut received = 0;
        for i in (0..8).rev() {
            let bit = byte & (1 << i) != 0;
            port.write_state(device, true, false, bit);
            received = (received << 1) | u8::from(port.read_state());
            port.write_state(device, true, true, bit);
            port.write_state(device, true, false, bit);
        }
        received
    }

    pub fn select<D: SpiDevice>(port: &mut SpiPort, device: &mut D) {
        port.write_state(device, true, false, true);
    }

    pub fn deselect<D: SpiDevice>(port: &mut SpiPort, device: &mut D) {
        port.write_state(device, false, false, true);
    }
}
