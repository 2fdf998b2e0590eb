//! MegaCart 16K-4MB: a single 16K window at $8000-$BFFF selected by writes anywhere in $D500-$D5FF

use crate::flash::{FlashChip, FlashType};
use crate::memory::{MemoryMap, WindowHooks};
use bincode::{Decode, Encode};

const WINDOW_START: u16 = 0x8000;
const WINDOW_END: u16 = 0xBFFF;
const BANK_LEN: usize = 0x4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum BankSelect {
    /// Bit 7 disables the cartridge, otherwise the bank is the value ANDed with the mask.
    Masked(u8),
    /// $FF disables the cartridge, every other value is a bank number.
    Full,
}

impl BankSelect {
    fn bank_for(self, value: u8) -> Option<u8> {
        match self {
            Self::Masked(mask) => (value & 0x80 == 0).then_some(value & mask),
            Self::Full => (value != 0xFF).then_some(value),
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct MegaCart {
    chips: Vec<FlashChip>,
    bank_select: BankSelect,
    size: usize,
    power_on_bank: u8,
    bank: Option<u8>,
}

impl MegaCart {
    pub fn rom(bank_select: BankSelect, size: usize) -> Self {
        Self { chips: vec![], bank_select, size, power_on_bank: 0, bank: Some(0) }
    }

    pub fn flash(flash_type: FlashType, bank_select: BankSelect, size: usize) -> Self {
        // The 4MB cartridge powers up with the menu bank selected
        let power_on_bank = match bank_select {
            BankSelect::Full => 254,
            BankSelect::Masked(_) => 0,
        };

        Self {
            chips: vec![FlashChip::new(flash_type)],
            bank_select,
            size,
            power_on_bank,
            bank: Some(power_on_bank),
        }
    }

    pub fn cold_reset<M: MemoryMap>(&mut self, image: &[u8], memory: &mut M) {
        self.bank = Some(self.power_on_bank);
        self.map(image, memory);
    }

    pub fn read_control<M: MemoryMap>(
        &mut self,
        _image: &[u8],
        _address: u16,
        _memory: &mut M,
    ) -> u8 {
        match (self.chips.is_empty(), self.bank) {
            (false, Some(bank)) => bank,
            _ => 0xFF,
        }
    }

    pub fn write_control<M: MemoryMap>(
        &mut self,
        image: &[u8],
        _address: u16,
        value: u8,
        memory: &mut M,
    ) {
        let bank = self.bank_select.bank_for(value);
        if bank == self.bank {
            return;
        }

        log::debug!("MegaCart bank change: {:?} -> {bank:?}", self.bank);
        self.bank = bank;
        self.map(image, memory);
    }

    fn map<M: MemoryMap>(&self, image: &[u8], memory: &mut M) {
        let Some(bank) = self.bank else {
            memory.cart_809f_disable();
            memory.cart_a0bf_disable();
            return;
        };

        memory.cart_809f_enable();
        memory.cart_a0bf_enable();
        if !self.chips.is_empty() {
            memory.set_flash_routines(WindowHooks::Flash);
            memory.set_flash(WINDOW_START, WINDOW_END);
        }

        let offset = (usize::from(bank) * BANK_LEN) & (self.size - 1);
        memory.copy_from_cart(
            WINDOW_START,
            WINDOW_END,
            super::image_slice(image, offset, BANK_LEN),
        );
    }

    fn flash_address(&self, bank: u8, address: u16) -> u32 {
        ((usize::from(bank) * BANK_LEN + usize::from(address & 0x3FFF)) & (self.size - 1)) as u32
    }

    pub fn read_window(&mut self, image: &[u8], address: u16) -> u8 {
        let Some(bank) = self.bank else { return 0xFF };
        let flash_address = self.flash_address(bank, address);

        match self.chips.first_mut() {
            Some(chip) => chip.read(image, flash_address).0,
            None => image.get(flash_address as usize).copied().unwrap_or(0xFF),
        }
    }

    pub fn write_window(&mut self, image: &mut [u8], address: u16, value: u8) {
        let Some(bank) = self.bank else { return };
        let flash_address = self.flash_address(bank, address);

        if let Some(chip) = self.chips.first_mut() {
            chip.write(image, flash_address, value);
        }
    }

    pub fn chips(&self) -> &[FlashChip] {
        &self.chips
    }

    pub fn chips_mut(&mut self) -> &mut [FlashChip] {
        &mut self.chips
    }
}
