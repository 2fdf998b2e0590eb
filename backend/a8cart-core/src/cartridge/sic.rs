//! SIC! and SIC!+ cartridges
//!
//! A single bank register at $D500-$D51F ($D500-$D53F on SIC!+) selects a 16K flash bank which is
//! split across two independently enabled 8K windows:
//! - Bits 0-4: Bank number (masked to the chip size)
//! - Bit 5: 1 = $8000-$9FFF enabled
//! - Bit 6: 1 = $A000-$BFFF disabled
//! - Bit 7: SIC! - 1 = flash writes enabled; SIC!+ - selects the second 512K chip

use crate::cartridge::{chip_region, chip_region_mut, image_slice};
use crate::flash::{FlashChip, FlashType};
use crate::memory::{MemoryMap, WindowHooks};
use a8cart_common::num::GetBit;
use bincode::{Decode, Encode};

const BANK_LEN: usize = 0x4000;
const HALF_BANK_LEN: usize = 0x2000;

#[derive(Debug, Clone, Encode, Decode)]
pub struct Sic {
    chips: Vec<FlashChip>,
    bank_mask: u8,
    register_range: u8,
    bank: u8,
}

impl Sic {
    pub fn new(flash_type: FlashType, bank_mask: u8) -> Self {
        Self { chips: vec![FlashChip::new(flash_type)], bank_mask, register_range: 0x20, bank: 0 }
    }

    pub fn plus() -> Self {
        Self {
            chips: vec![FlashChip::new(FlashType::Am29F040B), FlashChip::new(FlashType::Am29F040B)],
            bank_mask: 0x1F,
            register_range: 0x40,
            bank: 0,
        }
    }

    fn is_plus(&self) -> bool {
        self.chips.len() > 1
    }

    pub fn cold_reset<M: MemoryMap>(&mut self, image: &[u8], memory: &mut M) {
        self.bank = 0;
        self.map(image, memory);
    }

    pub fn read_control<M: MemoryMap>(
        &mut self,
        _image: &[u8],
        address: u16,
        _memory: &mut M,
    ) -> u8 {
        if (address as u8) < self.register_range { self.bank } else { 0xFF }
    }

    pub fn write_control<M: MemoryMap>(
        &mut self,
        image: &[u8],
        address: u16,
        value: u8,
        memory: &mut M,
    ) {
        if (address as u8) >= self.register_range || value == self.bank {
            return;
        }

        log::debug!("SIC! bank register {:02X} -> {value:02X}", self.bank);
        let previous = self.mapped_bits();
        self.bank = value;
        if self.mapped_bits() != previous {
            self.map(image, memory);
        }
    }

    /// Register bits that affect what the windows show. Bit 7 only counts on SIC!+ where it
    /// selects the chip.
    fn mapped_bits(&self) -> u8 {
        let chip_select = if self.is_plus() { 0x80 } else { 0x00 };
        self.bank & (chip_select | 0x60 | self.bank_mask)
    }

    fn selected_chip(&self) -> usize {
        if self.is_plus() { usize::from(self.bank.bit(7)) } else { 0 }
    }

    fn map<M: MemoryMap>(&self, image: &[u8], memory: &mut M) {
        let region = chip_region(image, self.selected_chip());
        let bank_offset = usize::from(self.bank & self.bank_mask) * BANK_LEN;

        if self.bank.bit(5) {
            memory.cart_809f_enable();
            memory.set_flash_routines(WindowHooks::Flash);
            memory.set_flash(0x8000, 0x9FFF);
            memory.copy_from_cart(0x8000, 0x9FFF, image_slice(region, bank_offset, HALF_BANK_LEN));
        } else {
            memory.cart_809f_disable();
        }

        if self.bank.bit(6) {
            memory.cart_a0bf_disable();
        } else {
            memory.cart_a0bf_enable();
            memory.set_flash_routines(WindowHooks::Flash);
            memory.set_flash(0xA000, 0xBFFF);
            memory.copy_from_cart(
                0xA000,
                0xBFFF,
                image_slice(region, bank_offset + HALF_BANK_LEN, HALF_BANK_LEN),
            );
        }
    }

    fn flash_address(&self, address: u16) -> u32 {
        (u32::from(self.bank & self.bank_mask) * BANK_LEN as u32 + u32::from(address & 0x3FFF))
            & 0x7FFFF
    }

    pub fn read_window(&mut self, image: &[u8], address: u16) -> u8 {
        let chip_idx = self.selected_chip();
        let flash_address = self.flash_address(address);
        self.chips[chip_idx].read(chip_region(image, chip_idx), flash_address).0
    }

    pub fn write_window(&mut self, image: &mut [u8], address: u16, value: u8) {
        if !self.is_plus() && !self.bank.bit(7) {
            log::trace!("SIC! flash write with write enable clear: {address:04X} {value:02X}");
            return;
        }

        let chip_idx = self.selected_chip();
        let flash_address = self.flash_address(address);
        self.chips[chip_idx].write(chip_region_mut(image, chip_idx), flash_address, value);
    }

    pub fn chips(&self) -> &[FlashChip] {
        &self.chips
    }

    pub fn chips_mut(&mut self) -> &mut [FlashChip] {
        &mut self.chips
    }
}
