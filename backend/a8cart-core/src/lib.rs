//! Atari 8-bit bank-switched flash cartridge emulation: flash chips, cartridge mappers, SPI
//! peripherals, and the cycle-based event scheduler that times them.

pub mod api;
pub mod bus;
pub mod cartridge;
pub mod eeprom;
pub mod flash;
pub mod memory;
pub mod rtc;
pub mod scheduler;
pub mod spi;

// 1.7897725 MHz
pub const NTSC_CPU_CLOCK_SPEED: u64 = 1_789_773;

/// Convert a duration in microseconds to a number of NTSC CPU cycles, rounding up.
#[must_use]
pub const fn micros_to_cycles(micros: u64) -> u64 {
    (micros * NTSC_CPU_CLOCK_SPEED).div_ceil(1_000_000)
}
