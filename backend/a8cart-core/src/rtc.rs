//! Microchip MCP7951x SPI real-time clock with battery-backed SRAM, a 256-byte EEPROM, and a
//! 16-byte unique ID EEPROM
//!
//! The chip is driven one byte at a time through [`Mcp7951x::transfer`]. It can also be attached to
//! a bit-serial [`SpiPort`](crate::spi::SpiPort) through its [`SpiDevice`] implementation.

use crate::api::NvramError;
use crate::spi::SpiDevice;
use a8cart_common::frontend::SaveWriter;
use a8cart_common::num::Bcd;
use a8cart_common::timeutils;
use bincode::{Decode, Encode};
use time::OffsetDateTime;

pub const RAM_LEN: usize = 0x60;
pub const EEPROM_LEN: usize = 0x100;
pub const ID_EEPROM_LEN: usize = 0x10;

/// Length of the serialized nonvolatile state: RAM, then EEPROM, then ID EEPROM.
pub const NV_STATE_LEN: usize = RAM_LEN + EEPROM_LEN + ID_EEPROM_LEN;

// Timekeeping registers occupy the first 0x20 bytes of RAM; SRAM occupies 0x20-0x5F
const SRAM_START: u8 = 0x20;
const RAM_END: u8 = 0x60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
enum State {
    #[default]
    Command,
    // Discard everything until chip select is released
    Jam,
    ReadAddress,
    ReadData,
    WriteAddress,
    WriteData,
    EepromReadAddress,
    EepromReadData,
    EepromWriteAddress,
    EepromWriteData,
    ClearRam,
    StatusRead,
    StatusWrite,
    IdReadAddress,
    IdReadData,
    IdWriteAddress,
    IdWriteData,
    Unlock,
}

impl State {
    fn is_read_data(self) -> bool {
        matches!(self, Self::ReadData | Self::EepromReadData | Self::StatusRead | Self::IdReadData)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
enum UnlockState {
    #[default]
    Locked,
    FirstKey,
    Unlocked,
}

/// RAM address increment that wraps within either the timekeeping area or the SRAM area.
fn next_ram_address(address: u8) -> u8 {
    match address + 1 {
        SRAM_START => 0,
        RAM_END => SRAM_START,
        next => next,
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Mcp7951x {
    state: State,
    address: u8,
    status: u8,
    unlock: UnlockState,
    write_enabled: bool,
    ram: [u8; RAM_LEN],
    eeprom: [u8; EEPROM_LEN],
    id_eeprom: [u8; ID_EEPROM_LEN],
    dirty: bool,
}

impl Default for Mcp7951x {
    fn default() -> Self {
        Self::new()
    }
}

impl Mcp7951x {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::default(),
            address: 0,
            status: 0,
            unlock: UnlockState::default(),
            write_enabled: false,
            ram: [0; RAM_LEN],
            eeprom: [0; EEPROM_LEN],
            id_eeprom: [0; ID_EEPROM_LEN],
            dirty: false,
        }
    }

    /// Reset the protocol state. Memory contents and the status register are preserved.
    pub fn cold_reset(&mut self) {
        self.state = State::Command;
        self.address = 0;
        self.unlock = UnlockState::Locked;
        self.write_enabled = false;
    }

    /// Chip select was toggled; the next byte is interpreted as a command.
    pub fn reselect(&mut self) {
        self.state = State::Command;
    }

    /// Exchange one byte with the chip. Returns the byte driven on the output line, which is 0xFF
    /// outside of data read phases.
    pub fn transfer(&mut self, input: u8) -> u8 {
        let mut output = 0xFF;

        self.state = match self.state {
            State::Command => self.begin_command(input),
            State::Jam => State::Jam,
            State::ReadAddress => {
                self.address = input;
                if input < SRAM_START {
                    self.update_clock();
                }

                if input < RAM_END { State::ReadData } else { State::Jam }
            }
            State::ReadData => {
                output = self.ram[self.address as usize];
                self.address = next_ram_address(self.address);
                State::ReadData
            }
            State::WriteAddress => {
                self.address = input;
                if input < RAM_END { State::WriteData } else { State::Jam }
            }
            State::WriteData => {
                log::trace!("RTC RAM write: {:02X} = {input:02X}", self.address);
                self.ram[self.address as usize] = input;
                self.address = next_ram_address(self.address);
                self.dirty = true;
                State::WriteData
            }
            State::EepromReadAddress => {
                self.address = input;
                State::EepromReadData
            }
            State::EepromReadData => {
                output = self.eeprom[self.address as usize];
                self.address = self.address.wrapping_add(1);
                State::EepromReadData
            }
            State::EepromWriteAddress => {
                self.address = input;
                if self.write_enabled {
                    State::EepromWriteData
                } else {
                    log::warn!("RTC EEPROM write without write enable latch set");
                    State::Jam
                }
            }
            State::EepromWriteData => {
                log::trace!("RTC EEPROM write: {:02X} = {input:02X}", self.address);
                self.eeprom[self.address as usize] = input;
                // Wraps within an 8-byte page
                self.address = (self.address & 0xF8) | (self.address.wrapping_add(1) & 0x07);
                self.write_enabled = false;
                self.dirty = true;
                State::EepromWriteData
            }
            State::ClearRam => {
                log::debug!("RTC SRAM cleared");
                self.ram[SRAM_START as usize..].fill(0);
                self.dirty = true;
                State::ClearRam
            }
            State::StatusRead => {
                output = self.status | (u8::from(self.write_enabled) << 1);
                State::StatusRead
            }
            State::StatusWrite => {
                // Only the block protect bits are writable
                self.status = input & 0x0C;
                self.write_enabled = false;
                State::StatusWrite
            }
            State::IdReadAddress => {
                self.address = input & 0x0F;
                State::IdReadData
            }
            State::IdReadData => {
                output = self.id_eeprom[self.address as usize];
                self.address = (self.address + 1) & 0x0F;
                State::IdReadData
            }
            State::IdWriteAddress => {
                self.address = input & 0x0F;
                if self.unlock == UnlockState::Unlocked {
                    State::IdWriteData
                } else {
                    log::warn!("RTC ID EEPROM write without unlock sequence");
                    State::Jam
                }
            }
            State::IdWriteData => {
                log::trace!("RTC ID EEPROM write: {:02X} = {input:02X}", self.address);
                self.id_eeprom[self.address as usize] = input;
                self.address = (self.address & 0x08) | ((self.address + 1) & 0x07);
                self.write_enabled = false;
                self.dirty = true;
                State::IdWriteData
            }
            State::Unlock => {
                self.unlock = match (self.unlock, input) {
                    (UnlockState::Locked, 0x55) => UnlockState::FirstKey,
                    (UnlockState::Locked, _) => UnlockState::Locked,
                    (UnlockState::FirstKey, 0xAA) => UnlockState::Unlocked,
                    (UnlockState::FirstKey | UnlockState::Unlocked, _) => UnlockState::Locked,
                };
                State::Unlock
            }
        };

        output
    }

    fn begin_command(&mut self, command: u8) -> State {
        log::trace!("RTC command {command:02X}");

        if command != 0x32 && command != 0x14 {
            self.unlock = UnlockState::Locked;
        }

        match command {
            0x01 => State::StatusWrite,
            0x02 => State::EepromWriteAddress,
            0x03 => State::EepromReadAddress,
            0x04 => {
                self.write_enabled = false;
                State::Jam
            }
            0x05 => State::StatusRead,
            0x06 => {
                self.write_enabled = true;
                State::Jam
            }
            0x12 => State::WriteAddress,
            0x13 => State::ReadAddress,
            0x14 => State::Unlock,
            0x32 => State::IdWriteAddress,
            0x33 => State::IdReadAddress,
            0x54 => State::ClearRam,
            _ => {
                log::warn!("Unknown RTC command {command:02X}");
                State::Jam
            }
        }
    }

    fn update_clock(&mut self) {
        self.write_clock_registers(timeutils::local_datetime());
    }

    /// Copy a wall-clock time into the timekeeping registers in packed BCD.
    pub fn write_clock_registers(&mut self, datetime: OffsetDateTime) {
        let weekday = datetime.weekday().number_days_from_sunday() + 1;
        let month = u8::from(datetime.month());
        let leap_year = time::util::is_leap_year(datetime.year());

        // Oscillator start bit
        self.ram[0] = timeutils::centiseconds(datetime).to_bcd();
        self.ram[1] = datetime.second().to_bcd() | 0x80;
        self.ram[2] = datetime.minute().to_bcd();
        self.ram[3] = datetime.hour().to_bcd();
        // Oscillator running and battery enable bits
        self.ram[4] = 0x28 | weekday;
        self.ram[5] = datetime.day().to_bcd();
        self.ram[6] = month.to_bcd() | (u8::from(leap_year) << 5);
        self.ram[7] = timeutils::two_digit_year(datetime).to_bcd();
    }

    /// Replace the nonvolatile state (RAM, EEPROM, ID EEPROM in that order).
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not exactly [`NV_STATE_LEN`] bytes long.
    pub fn load(&mut self, bytes: &[u8]) -> Result<(), NvramError> {
        if bytes.len() != NV_STATE_LEN {
            return Err(NvramError::InvalidLength {
                device: "RTC",
                expected: NV_STATE_LEN,
                actual: bytes.len(),
            });
        }

        let (ram, rest) = bytes.split_at(RAM_LEN);
        let (eeprom, id_eeprom) = rest.split_at(EEPROM_LEN);
        self.ram.copy_from_slice(ram);
        self.eeprom.copy_from_slice(eeprom);
        self.id_eeprom.copy_from_slice(id_eeprom);
        self.dirty = false;

        Ok(())
    }

    #[must_use]
    pub fn save(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(NV_STATE_LEN);
        bytes.extend_from_slice(&self.ram);
        bytes.extend_from_slice(&self.eeprom);
        bytes.extend_from_slice(&self.id_eeprom);
        bytes
    }

    /// Load nonvolatile state from the save writer's `rtc` file, if present and valid.
    pub fn load_from<S: SaveWriter>(&mut self, save_writer: &mut S) {
        let Ok(bytes) = save_writer.load_bytes("rtc") else {
            log::debug!("No saved RTC state");
            return;
        };

        if let Err(err) = self.load(&bytes) {
            log::error!("Ignoring saved RTC state: {err}");
        }
    }

    /// Write nonvolatile state to the save writer's `rtc` file if it changed since the last load
    /// or persist.
    ///
    /// # Errors
    ///
    /// Propagates any error from the save writer.
    pub fn persist_to<S: SaveWriter>(&mut self, save_writer: &mut S) -> Result<(), S::Err> {
        if !self.dirty {
            return Ok(());
        }

        save_writer.persist_bytes("rtc", &self.save())?;
        self.dirty = false;

        Ok(())
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl SpiDevice for Mcp7951x {
    fn on_byte_received(&mut self, byte: u8) -> Option<u8> {
        // Output for data read phases is loaded as soon as the preceding byte completes
        if !self.state.is_read_data() {
            self.transfer(byte);
            if !self.state.is_read_data() {
                return None;
            }
        }

        Some(self.transfer(byte))
    }

    fn on_deselect(&mut self) {
        self.reselect();
    }
}
