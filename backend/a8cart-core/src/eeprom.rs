//! 256-byte SPI serial EEPROM (25xx02-style), as used for The!Cart configuration storage
//!
//! Supports WRSR, WRITE, READ, WRDI, RDSR, and WREN. Bit 3 of the command byte is ignored, and the
//! write-enable latch is tracked but not enforced.


use crate::api::NvramError;
use crate::spi::{SpiDevice, SpiPort};
use a8cart_common::frontend::SaveWriter;
use bincode::{Decode, Encode};

pub const EEPROM_LEN: usize = 256;

const WRITE_ENABLE_LATCH: u8 = 0x02;
const BLOCK_PROTECT_MASK: u8 = 0x0C;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
enum CommandState {
    #[default]
    Initial,
    CommandCompleted,
    WriteStatus,
    WriteMemoryAddress,
    WriteMemoryNext,
    ReadMemoryAddress,
    ReadMemoryNext,
}

#[derive(Debug, Clone, Encode, Decode)]
struct EepromChip {
    memory: [u8; EEPROM_LEN],
    address: u8,
    status: u8,
    command: CommandState,
    dirty: bool,
}

impl EepromChip {
    fn new() -> Self {
        Self {
            memory: [0; EEPROM_LEN],
            address: 0,
            status: 0,
            command: CommandState::default(),
            dirty: false,
        }
    }

    fn is_write_protected(&self, address: u8) -> bool {
        match self.status & BLOCK_PROTECT_MASK {
            0x00 => false,
            0x04 => address >= 0xC0,
            0x08 => address >= 0x80,
            _ => true,
        }
    }

    fn write_memory(&mut self, value: u8) {
        let address = self.address;
        if self.is_write_protected(address) {
            log::warn!(
                "EEPROM write to protected address {address:02X} ignored (status {:02X})",
                self.status
            );
        } else {
            log::trace!("EEPROM write: {address:02X} = {value:02X}");
            self.memory[address as usize] = value;
            self.dirty = true;
        }

        // Writes wrap within the current 16-byte page
        self.address = (address & 0xF0) | (address.wrapping_add(1) & 0x0F);
    }

    fn read_memory(&mut self) -> u8 {
        let value = self.memory[self.address as usize];
        log::trace!("EEPROM read: {:02X} = {value:02X}", self.address);

        // Reads wrap through the entire address space
        self.address = self.address.wrapping_add(1);

        value
    }
}

impl SpiDevice for EepromChip {
    fn on_byte_received(&mut self, byte: u8) -> Option<u8> {
        let mut response = None;

        self.command = match self.command {
            CommandState::Initial => match byte & 0xF7 {
                0x01 => CommandState::WriteStatus,
                0x02 => CommandState::WriteMemoryAddress,
                0x03 => CommandState::ReadMemoryAddress,
                0x04 => {
                    self.status &= !WRITE_ENABLE_LATCH;
                    CommandState::CommandCompleted
                }
                0x05 => {
                    response = Some(self.status);
                    CommandState::CommandCompleted
                }
                0x06 => {
                    self.status |= WRITE_ENABLE_LATCH;
                    CommandState::CommandCompleted
                }
                _ => {
                    log::debug!("Ignoring unknown EEPROM command {byte:02X}");
                    CommandState::Initial
                }
            },
            CommandState::CommandCompleted => CommandState::CommandCompleted,
            CommandState::WriteStatus => {
                self.status = (self.status & 0x03) | (byte & BLOCK_PROTECT_MASK);
                log::debug!("EEPROM status register set to {:02X}", self.status);
                CommandState::CommandCompleted
            }
            CommandState::WriteMemoryAddress => {
                self.address = byte;
                CommandState::WriteMemoryNext
            }
            CommandState::WriteMemoryNext => {
                self.write_memory(byte);
                CommandState::WriteMemoryNext
            }
            CommandState::ReadMemoryAddress => {
                // First byte is available immediately after the address
                self.address = byte;
                response = Some(self.read_memory());
                CommandState::ReadMemoryNext
            }
            CommandState::ReadMemoryNext => {
                response = Some(self.read_memory());
                CommandState::ReadMemoryNext
            }
        };

        response
    }

    fn on_deselect(&mut self) {
        self.command = CommandState::Initial;
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct SpiEeprom {
    port: SpiPort,
    chip: EepromChip,
}

impl Default for SpiEeprom {
    fn default() -> Self {
        Self::new()
    }
}

impl SpiEeprom {
    /// Create an EEPROM with every byte cleared to 0.
    #[must_use]
    pub fn new() -> Self {
        Self { port: SpiPort::new(), chip: EepromChip::new() }
    }

    /// Reset the serial interface and status register. Memory contents are preserved.
    pub fn cold_reset(&mut self) {
        self.port.cold_reset();
        self.chip.address = 0;
        self.chip.status = 0;
        self.chip.command = CommandState::Initial;
    }

    #[must_use]
    pub fn read_state(&self) -> bool {
        self.port.read_state()
    }

    pub fn write_state(&mut self, chip_enable: bool, clock: bool, data: bool) {
        self.port.write_state(&mut self.chip, chip_enable, clock, data);
    }

    #[must_use]
    pub fn status(&self) -> u8 {
        self.chip.status
    }

    /// Replace the memory contents.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not exactly 256 bytes long.
    pub fn load(&mut self, bytes: &[u8]) -> Result<(), NvramError> {
        let memory: [u8; EEPROM_LEN] = bytes.try_into().map_err(|_| {
            NvramError::InvalidLength { device: "EEPROM", expected: EEPROM_LEN, actual: bytes.len() }
        })?;

        self.chip.memory = memory;
        self.chip.dirty = false;

        Ok(())
    }

    #[must_use]
    pub fn save(&self) -> &[u8; EEPROM_LEN] {
        &self.chip.memory
    }

    /// Load memory contents from the save writer's `eep` file, if present and valid.
    pub fn load_from<S: SaveWriter>(&mut self, save_writer: &mut S) {
        let Ok(bytes) = save_writer.load_bytes("eep") else {
            log::debug!("No saved EEPROM contents");
            return;
        };

        if let Err(err) = self.load(&bytes) {
            log::error!("Ignoring saved EEPROM contents: {err}");
        }
    }

    /// Write memory contents to the save writer's `eep` file if they changed since the last load
    /// or persist.
    ///
    /// # Errors
    ///
    /// Propagates any error from the save writer.
    pub fn persist_to<S: SaveWriter>(&mut self, save_writer: &mut S) -> Result<(), S::Err> {
        if !self.chip.dirty {
            return Ok(());
        }

        save_writer.persist_bytes("eep", &self.chip.memory)?;
        self.chip.dirty = false;

        Ok(())
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.chip.dirty
    }
}
