//! Cartridge-facing memory-layer interface and a reference 64K Atari memory map implementing it

use a8cart_common::boxedarray::BoxedByteArray;
use bincode::{Decode, Encode};
use std::ops::RangeInclusive;

pub const RAM_LEN: usize = 0x10000;
pub const PAGE_LEN: usize = 0x100;

const CART_START: u16 = 0x8000;
const CART_LEN: usize = 0x4000;
const CART_809F_PAGES: RangeInclusive<usize> = 0x80..=0x9F;
const CART_A0BF_PAGES: RangeInclusive<usize> = 0xA0..=0xBF;

/// Which cartridge window handler services pages hooked by [`MemoryMap::set_flash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum WindowHooks {
    /// Reads and writes go through a flash chip state machine.
    #[default]
    Flash,
    /// Reads and writes go to cartridge RAM.
    CartRam,
}

/// Operations the cartridge mappers use to install and remove bank windows.
///
/// All address ranges are inclusive and page-aligned.
pub trait MemoryMap {
    /// Select the handler set applied by subsequent [`set_flash`](Self::set_flash) calls.
    fn set_flash_routines(&mut self, hooks: WindowHooks);

    /// Route CPU reads and writes in `start..=end` to the cartridge window handlers.
    fn set_flash(&mut self, start: u16, end: u16);

    /// Copy cartridge bytes into the CPU-visible cartridge area at `start..=end`. `bytes` may be
    /// shorter than the range, in which case the remainder reads as 0xFF.
    fn copy_from_cart(&mut self, start: u16, end: u16, bytes: &[u8]);

    /// Map the cartridge into $A000-$BFFF as ROM.
    fn cart_a0bf_enable(&mut self);

    /// Unmap the cartridge from $A000-$BFFF, exposing RAM.
    fn cart_a0bf_disable(&mut self);

    /// Map the cartridge into $8000-$9FFF as ROM.
    fn cart_809f_enable(&mut self);

    /// Unmap the cartridge from $8000-$9FFF, exposing RAM.
    fn cart_809f_disable(&mut self);
}

/// Where CPU accesses to a page are serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum PageMapping {
    #[default]
    Ram,
    CartRom,
    Hooked(WindowHooks),
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct AtariMemory {
    ram: BoxedByteArray<RAM_LEN>,
    cart: BoxedByteArray<CART_LEN>,
    pages: Vec<PageMapping>,
    hooks: WindowHooks,
}

impl Default for AtariMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl AtariMemory {
    /// Create a memory map with power-on RAM contents randomized and no cartridge mapped.
    #[must_use]
    pub fn new() -> Self {
        let mut ram = BoxedByteArray::<RAM_LEN>::new();
        ram.iter_mut().for_each(|byte| *byte = rand::random());

        Self {
            ram,
            cart: BoxedByteArray::filled(0xFF),
            pages: vec![PageMapping::default(); RAM_LEN / PAGE_LEN],
            hooks: WindowHooks::default(),
        }
    }

    #[must_use]
    pub fn page_mapping(&self, address: u16) -> PageMapping {
        self.pages[(address >> 8) as usize]
    }

    /// Read a byte for any page that is not hooked. Hooked pages return the last bytes copied in.
    #[must_use]
    pub fn read(&self, address: u16) -> u8 {
        match self.page_mapping(address) {
            PageMapping::Ram => self.ram[address as usize],
            PageMapping::CartRom | PageMapping::Hooked(_) => self.read_cart_view(address),
        }
    }

    /// Write a byte to a RAM page. Writes to cartridge pages are ignored.
    pub fn write(&mut self, address: u16, value: u8) {
        match self.page_mapping(address) {
            PageMapping::Ram => self.ram[address as usize] = value,
            PageMapping::CartRom => {
                log::trace!("Ignoring write to cartridge ROM at {address:04X}: {value:02X}");
            }
            PageMapping::Hooked(hooks) => {
                log::warn!(
                    "Write to hooked page {address:04X} ({hooks:?}) reached RAM layer; ignoring"
                );
            }
        }
    }

    fn read_cart_view(&self, address: u16) -> u8 {
        match address.checked_sub(CART_START) {
            Some(offset) if (offset as usize) < CART_LEN => self.cart[offset as usize],
            _ => 0xFF,
        }
    }

    fn set_pages(&mut self, pages: RangeInclusive<usize>, mapping: PageMapping) {
        self.pages[pages].fill(mapping);
    }
}

fn page_range(start: u16, end: u16) -> RangeInclusive<usize> {
    (start >> 8) as usize..=(end >> 8) as usize
}

impl MemoryMap for AtariMemory {
    fn set_flash_routines(&mut self, hooks: WindowHooks) {
        self.hooks = hooks;
    }

    fn set_flash(&mut self, start: u16, end: u16) {
        log::trace!("Hooking {start:04X}-{end:04X} with {:?}", self.hooks);
        self.set_pages(page_range(start, end), PageMapping::Hooked(self.hooks));
    }

    fn copy_from_cart(&mut self, start: u16, end: u16, bytes: &[u8]) {
        let (Some(start_offset), Some(end_offset)) =
            (start.checked_sub(CART_START), end.checked_sub(CART_START))
        else {
            log::warn!("Cartridge copy outside of cartridge area: {start:04X}-{end:04X}");
            return;
        };

        let start_offset = start_offset as usize;
        let end_offset = (end_offset as usize).min(CART_LEN - 1);
        if start_offset > end_offset {
            log::warn!("Invalid cartridge copy range: {start:04X}-{end:04X}");
            return;
        }

        let window = &mut self.cart[start_offset..=end_offset];
        let len = bytes.len().min(window.len());
        window[..len].copy_from_slice(&bytes[..len]);
        window[len..].fill(0xFF);
    }

    fn cart_a0bf_enable(&mut self) {
        self.set_pages(CART_A0BF_PAGES, PageMapping::CartRom);
    }

    fn cart_a0bf_disable(&mut self) {
        self.set_pages(CART_A0BF_PAGES, PageMapping::Ram);
    }

    fn cart_809f_enable(&mut self) {
        self.set_pages(CART_809F_PAGES, PageMapping::CartRom);
    }

    fn cart_809f_disable(&mut self) {
        self.set_pages(CART_809F_PAGES, PageMapping::Ram);
    }
}
