//! CPU-side address decoding between the 64K memory map and the cartridge

use crate::cartridge::Cartridge;
use crate::memory::{AtariMemory, PageMapping};

const CART_CONTROL_START: u16 = 0xD500;
const CART_CONTROL_END: u16 = 0xD5FF;

pub struct Bus<'a> {
    pub memory: &'a mut AtariMemory,
    pub cartridge: &'a mut Cartridge,
}

impl Bus<'_> {
    #[inline]
    pub fn read(&mut self, address: u16) -> u8 {
        match address {
            CART_CONTROL_START..=CART_CONTROL_END => {
                self.cartridge.read_control(address, self.memory)
            }
            _ => match self.memory.page_mapping(address) {
                PageMapping::Hooked(_) => self.cartridge.read_window(address),
                PageMapping::Ram | PageMapping::CartRom => self.memory.read(address),
            },
        }
    }

    #[inline]
    pub fn write(&mut self, address: u16, value: u8) {
        match address {
            CART_CONTROL_START..=CART_CONTROL_END => {
                self.cartridge.write_control(address, value, self.memory);
            }
            _ => match self.memory.page_mapping(address) {
                PageMapping::Hooked(_) => self.cartridge.write_window(address, value),
                PageMapping::Ram | PageMapping::CartRom => self.memory.write(address, value),
            },
        }
    }
}
