//! Flash programming through the emulated CPU bus
//!
//! Every operation is expressed as the CPU loads and stores a flasher program running on the Atari
//! would perform: bank register writes in $D5xx followed by accesses to the cartridge window.

use a8cart_config::{CartFamily, CartridgeType};
use a8cart_core::bus::Bus;
use a8cart_core::cartridge::Cartridge;
use a8cart_core::flash::FlashType;
use a8cart_core::memory::AtariMemory;
use std::ops::Range;
use thiserror::Error;

// Roughly one absolute-addressed 6502 store
const CYCLES_PER_ACCESS: u64 = 4;

const SIXTEEN_K: usize = 0x4000;
const EIGHT_K: usize = 0x2000;
const SIC_CHIP_LEN: usize = 0x80000;

const THECART_BANK_LOW: u16 = 0xD5A0;
const THECART_BANK_HIGH: u16 = 0xD5A1;
const THECART_BANK_CONFIG: u16 = 0xD5A7;

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("{0} cartridges have no flash memory")]
    NoFlash(CartridgeType),
    #[error("Range {start:#X}..{end:#X} does not fit in a {size}-byte cartridge")]
    OutOfRange { start: usize, end: usize, size: usize },
    #[error("Offset {offset:#X} cannot be mapped by the cartridge bank registers")]
    Unreachable { offset: usize },
    #[error("Verify failed at offset {offset:#X}: expected {expected:02X}, read {actual:02X}")]
    Verify { offset: usize, expected: u8, actual: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipId {
    pub flash_type: FlashType,
    pub manufacturer: u8,
    pub device: u8,
}

impl ChipId {
    pub fn matches_expected(&self) -> bool {
        (self.manufacturer, self.device) == self.flash_type.ids()
    }
}

pub struct Programmer {
    memory: AtariMemory,
    cartridge: Cartridge,
    cycles: u64,
}

impl Programmer {
    pub fn new(mut cartridge: Cartridge) -> Self {
        let mut memory = AtariMemory::new();
        cartridge.cold_reset(&mut memory);

        let mut programmer = Self { memory, cartridge, cycles: 0 };
        if programmer.cartridge.cartridge_type().family() == CartFamily::TheCart {
            // Primary bank from flash with writes enabled
            programmer.store(THECART_BANK_CONFIG, 0x01);
        }

        programmer
    }

    pub fn cartridge(&self) -> &Cartridge {
        &self.cartridge
    }

    pub fn into_cartridge(self) -> Cartridge {
        self.cartridge
    }

    /// Size of the bank selected by one write to the primary bank register.
    pub fn bank_len(&self) -> usize {
        match self.cartridge.cartridge_type().family() {
            CartFamily::MegaCart | CartFamily::Sic => SIXTEEN_K,
            CartFamily::MaxFlash | CartFamily::TheCart => EIGHT_K,
        }
    }

    fn store(&mut self, address: u16, value: u8) {
        Bus { memory: &mut self.memory, cartridge: &mut self.cartridge }.write(address, value);
        self.advance(CYCLES_PER_ACCESS);
    }

    fn load(&mut self, address: u16) -> u8 {
        let value =
            Bus { memory: &mut self.memory, cartridge: &mut self.cartridge }.read(address);
        self.advance(CYCLES_PER_ACCESS);
        value
    }

    fn advance(&mut self, cycles: u64) {
        self.cycles += cycles;
        self.cartridge.tick(self.cycles);
    }

    /// Skip idle cycles until every pending flash timeout has fired.
    fn run_pending_events(&mut self) {
        while let Some(deadline) = self.cartridge.next_event_cycle() {
            self.advance(deadline.saturating_sub(self.cycles));
        }
    }

    fn check_range(&self, range: Range<usize>) -> Result<(), ProgramError> {
        let size = self.cartridge.image().len();
        if range.start > range.end || range.end > size {
            return Err(ProgramError::OutOfRange { start: range.start, end: range.end, size });
        }

        Ok(())
    }

    /// Switch banks so that image offset `offset` is visible to the CPU, and return the CPU
    /// address where it appears.
    fn select(&mut self, offset: usize) -> Result<u16, ProgramError> {
        let cartridge_type = self.cartridge.cartridge_type();
        match cartridge_type.family() {
            CartFamily::MegaCart => {
                // $FF disables the 4MB cartridge, so its last bank has no bank number
                let bank = u8::try_from(offset / SIXTEEN_K)
                    .ok()
                    .filter(|&bank| bank != 0xFF)
                    .ok_or(ProgramError::Unreachable { offset })?;
                self.store(0xD500, bank);
                Ok(0x8000 | (offset % SIXTEEN_K) as u16)
            }
            CartFamily::Sic => {
                let bank = ((offset % SIC_CHIP_LEN) / SIXTEEN_K) as u8;
                let high_bit = if cartridge_type == CartridgeType::SicPlus1024 {
                    // Chip select
                    u8::from(offset >= SIC_CHIP_LEN) << 7
                } else {
                    // Write enable
                    0x80
                };

                // Both 8K halves enabled
                self.store(0xD500, high_bit | 0x20 | bank);
                Ok(0x8000 | (offset % SIXTEEN_K) as u16)
            }
            CartFamily::MaxFlash => {
                let bank = offset / EIGHT_K;
                if bank >= 0x80 {
                    return Err(ProgramError::Unreachable { offset });
                }

                self.store(0xD500 | bank as u16, 0x00);
                Ok(0xA000 | (offset % EIGHT_K) as u16)
            }
            CartFamily::TheCart => {
                let bank = offset / EIGHT_K;
                self.store(THECART_BANK_LOW, bank as u8);
                self.store(THECART_BANK_HIGH, (bank >> 8) as u8);
                Ok(0xA000 | (offset % EIGHT_K) as u16)
            }
        }
    }

    fn write(&mut self, offset: usize, value: u8) -> Result<(), ProgramError> {
        let address = self.select(offset)?;
        self.store(address, value);
        Ok(())
    }

    fn read(&mut self, offset: usize) -> Result<u8, ProgramError> {
        let address = self.select(offset)?;
        Ok(self.load(address))
    }

    fn flash_chip(&self, offset: usize) -> Result<(usize, FlashType), ProgramError> {
        let chips = self.cartridge.chips();
        let Some(first) = chips.first() else {
            return Err(ProgramError::NoFlash(self.cartridge.cartridge_type()));
        };

        // Multi-chip cartridges always use identical chips
        let chip_len = first.flash_type().size() as usize;
        let index = offset / chip_len;
        match chips.get(index) {
            Some(chip) => Ok((index * chip_len, chip.flash_type())),
            None => Err(ProgramError::Unreachable { offset }),
        }
    }

    fn unlock_command(
        &mut self,
        chip_base: usize,
        flash_type: FlashType,
        command: u8,
    ) -> Result<(), ProgramError> {
        let (first, second) = flash_type.unlock_addresses();
        let (first, second) = (chip_base + first as usize, chip_base + second as usize);

        self.write(first, 0xAA)?;
        self.write(second, 0x55)?;
        self.write(first, command)
    }

    /// Read the autoselect manufacturer and device IDs of every flash chip.
    pub fn identify(&mut self) -> Result<Vec<ChipId>, ProgramError> {
        self.flash_chip(0)?;

        let chip_types: Vec<_> =
            self.cartridge.chips().iter().map(|chip| chip.flash_type()).collect();
        let mut ids = Vec::with_capacity(chip_types.len());
        let mut chip_base = 0;
        for flash_type in chip_types {
            let (manufacturer_address, device_address) = flash_type.id_addresses();

            self.unlock_command(chip_base, flash_type, 0x90)?;
            let manufacturer = self.read(chip_base + manufacturer_address as usize)?;
            let device = self.read(chip_base + device_address as usize)?;
            self.write(chip_base, 0xF0)?;

            log::debug!("{flash_type} at {chip_base:#X}: {manufacturer:02X} {device:02X}");
            ids.push(ChipId { flash_type, manufacturer, device });
            chip_base += flash_type.size() as usize;
        }

        Ok(ids)
    }

    /// Erase every flash chip.
    pub fn erase_chips(&mut self) -> Result<(), ProgramError> {
        self.flash_chip(0)?;

        let mut chip_base = 0;
        while chip_base < self.cartridge.image().len() {
            let (_, flash_type) = self.flash_chip(chip_base)?;
            log::info!("Erasing {flash_type} at {chip_base:#X}");

            self.unlock_command(chip_base, flash_type, 0x80)?;
            self.unlock_command(chip_base, flash_type, 0x10)?;

            chip_base += flash_type.size() as usize;
        }

        Ok(())
    }

    /// Erase the sector containing `offset`, returning the erased image range.
    pub fn erase_sector(&mut self, offset: usize) -> Result<Range<usize>, ProgramError> {
        self.check_range(offset..offset + 1)?;
        let (chip_base, flash_type) = self.flash_chip(offset)?;

        let (first, second) = flash_type.unlock_addresses();
        self.unlock_command(chip_base, flash_type, 0x80)?;
        self.write(chip_base + first as usize, 0xAA)?;
        self.write(chip_base + second as usize, 0x55)?;
        self.write(offset, 0x30)?;

        // Let the multi-sector erase window close
        self.run_pending_events();

        let sector = flash_type.sector_containing((offset - chip_base) as u32);
        Ok(chip_base + sector.start as usize..chip_base + sector.end as usize)
    }

    /// Erase every sector overlapping `range`.
    pub fn erase_range(&mut self, range: Range<usize>) -> Result<Vec<Range<usize>>, ProgramError> {
        self.check_range(range.clone())?;

        let mut erased = Vec::new();
        let mut offset = range.start;
        while offset < range.end {
            let sector = self.erase_sector(offset)?;
            offset = sector.end;
            erased.push(sector);
        }

        Ok(erased)
    }

    /// Program `data` at image offset `offset` one byte at a time and verify the result. Bytes of
    /// $FF are skipped since programming can only clear bits. Returns the number of bytes
    /// programmed.
    pub fn program(&mut self, offset: usize, data: &[u8]) -> Result<usize, ProgramError> {
        self.check_range(offset..offset + data.len())?;
        self.flash_chip(offset)?;

        let mut programmed = 0;
        for (i, &byte) in data.iter().enumerate() {
            if byte == 0xFF {
                continue;
            }

            let (chip_base, flash_type) = self.flash_chip(offset + i)?;
            self.unlock_command(chip_base, flash_type, 0xA0)?;
            self.write(offset + i, byte)?;
            programmed += 1;
        }

        for (i, &expected) in data.iter().enumerate() {
            let actual = self.read(offset + i)?;
            if actual != expected {
                return Err(ProgramError::Verify { offset: offset + i, expected, actual });
            }
        }

        Ok(programmed)
    }

    /// Read `len` bytes starting at image offset `offset` as the CPU sees them.
    pub fn dump(&mut self, offset: usize, len: usize) -> Result<Vec<u8>, ProgramError> {
        self.check_range(offset..offset + len)?;
        (offset..offset + len).map(|offset| self.read(offset)).collect()
    }
}
