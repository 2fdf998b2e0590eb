//! AtariMax, J(Atari)Cart and D-Cart flash cartridges
//!
//! All of these map a single 8K bank at $A000-$BFFF. The bank is selected by the low byte of the
//! address of any read or write in $D500-$D5FF; the value written is ignored.

use crate::cartridge::{chip_region, chip_region_mut, image_slice};
use crate::flash::{FlashChip, FlashType};
use crate::memory::{MemoryMap, WindowHooks};
use a8cart_common::num::GetBit;
use bincode::{Decode, Encode};

const WINDOW_START: u16 = 0xA000;
const WINDOW_END: u16 = 0xBFFF;
const BANK_LEN: usize = 0x2000;
const CHIP_LEN: usize = 0x80000;

// D-Cart control reads see flash at this offset within the selected 8K bank
const DCART_CONTROL_WINDOW_OFFSET: u32 = 0x1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum MaxFlashBanking {
    /// $D500-$D50F select banks 0-15, $D510-$D51F disable the cartridge
    AtMax128,
    /// Address bit 7 disables the cartridge, otherwise the bank is the address ANDed with the mask
    AddressMasked(u8),
    /// As `AddressMasked(0x3F)`, plus a $D5xx read window into the selected bank
    DCart,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct MaxFlash {
    chips: Vec<FlashChip>,
    banking: MaxFlashBanking,
    size: usize,
    power_on_bank: u8,
    bank: Option<u8>,
    mini_bank: u8,
}

impl MaxFlash {
    pub fn new(
        flash_types: &[FlashType],
        banking: MaxFlashBanking,
        size: usize,
        power_on_bank: u8,
    ) -> Self {
        Self {
            chips: flash_types.iter().copied().map(FlashChip::new).collect(),
            banking,
            size,
            power_on_bank,
            bank: Some(power_on_bank),
            mini_bank: 0,
        }
    }

    pub fn cold_reset<M: MemoryMap>(&mut self, image: &[u8], memory: &mut M) {
        self.bank = Some(self.power_on_bank);
        self.mini_bank = 0;
        self.map(image, memory);
    }

    /// The bank selected by an access to `address`, or `None` if the access does not affect
    /// banking.
    fn bank_for_access(&self, address: u16) -> Option<Option<u8>> {
        let low = address as u8;
        match self.banking {
            MaxFlashBanking::AtMax128 => match low {
                0x00..=0x0F => Some(Some(low)),
                0x10..=0x1F => Some(None),
                _ => None,
            },
            MaxFlashBanking::AddressMasked(mask) => Some((!low.bit(7)).then_some(low & mask)),
            MaxFlashBanking::DCart => Some((!low.bit(7)).then_some(low & 0x3F)),
        }
    }

    fn select_bank<M: MemoryMap>(&mut self, image: &[u8], bank: Option<u8>, memory: &mut M) {
        if bank == self.bank {
            return;
        }

        log::debug!("MaxFlash bank change: {:?} -> {bank:?}", self.bank);
        self.bank = bank;
        self.map(image, memory);
    }

    pub fn read_control<M: MemoryMap>(
        &mut self,
        image: &[u8],
        address: u16,
        memory: &mut M,
    ) -> u8 {
        if self.banking == MaxFlashBanking::DCart {
            // Readable regardless of whether the $A000 window is enabled
            let flash_address = (u32::from(self.mini_bank) << 13)
                + DCART_CONTROL_WINDOW_OFFSET
                + u32::from(address & 0xFF);
            return self.chips[0].read(image, flash_address).0;
        }

        if let Some(bank) = self.bank_for_access(address) {
            self.select_bank(image, bank, memory);
        }

        0xFF
    }

    pub fn write_control<M: MemoryMap>(
        &mut self,
        image: &[u8],
        address: u16,
        _value: u8,
        memory: &mut M,
    ) {
        if self.banking == MaxFlashBanking::DCart {
            self.mini_bank = (address as u8) & 0x3F;
        }

        if let Some(bank) = self.bank_for_access(address) {
            self.select_bank(image, bank, memory);
        }
    }

    fn map<M: MemoryMap>(&self, image: &[u8], memory: &mut M) {
        let Some(bank) = self.bank else {
            memory.cart_a0bf_disable();
            return;
        };

        memory.cart_a0bf_enable();
        memory.set_flash_routines(WindowHooks::Flash);
        memory.set_flash(WINDOW_START, WINDOW_END);

        let offset = (usize::from(bank) * BANK_LEN) & (self.size - 1);
        memory.copy_from_cart(WINDOW_START, WINDOW_END, image_slice(image, offset, BANK_LEN));
    }

    /// Chip index and chip-relative address for a window access.
    fn flash_address(&self, bank: u8, address: u16) -> (usize, u32) {
        let full_address =
            (usize::from(bank) * BANK_LEN + usize::from(address & 0x1FFF)) & (self.size - 1);
        (full_address / CHIP_LEN, (full_address % CHIP_LEN) as u32)
    }

    pub fn read_window(&mut self, image: &[u8], address: u16) -> u8 {
        let Some(bank) = self.bank else { return 0xFF };
        let (chip_idx, flash_address) = self.flash_address(bank, address);

        match self.chips.get_mut(chip_idx) {
            Some(chip) => chip.read(chip_region(image, chip_idx), flash_address).0,
            None => 0xFF,
        }
    }

    pub fn write_window(&mut self, image: &mut [u8], address: u16, value: u8) {
        let Some(bank) = self.bank else { return };
        let (chip_idx, flash_address) = self.flash_address(bank, address);

        if let Some(chip) = self.chips.get_mut(chip_idx) {
            chip.write(chip_region_mut(image, chip_idx), flash_address, value);
        }
    }

    pub fn chips(&self) -> &[FlashChip] {
        &self.chips
    }

    pub fn chips_mut(&mut self) -> &mut [FlashChip] {
        &mut self.chips
    }
}
