//! Bank-switched flash cartridges
//!
//! A [`Cartridge`] owns the image buffer, the mapper for its cartridge type, and a scheduler for the
//! flash chips' timed command windows. The memory layer routes $D500-$D5FF accesses to
//! [`Cartridge::read_control`] / [`Cartridge::write_control`] and accesses to hooked window pages to
//! [`Cartridge::read_window`] / [`Cartridge::write_window`].

mod maxflash;
mod megacart;
mod sic;
mod thecart;

#[cfg(test)]
mod tests;

use crate::api::{CartLoadError, CartridgeError};
use crate::cartridge::maxflash::{MaxFlash, MaxFlashBanking};
use crate::cartridge::megacart::{BankSelect, MegaCart};
use crate::cartridge::sic::Sic;
use crate::cartridge::thecart::TheCart;
use crate::eeprom::SpiEeprom;
use crate::flash::{FlashChip, FlashType};
use crate::memory::MemoryMap;
use crate::scheduler::Scheduler;
use a8cart_common::frontend::SaveWriter;
use a8cart_config::CartridgeType;
use a8cart_proc_macros::MatchEachVariantMacro;
use bincode::{Decode, Encode};

/// Image size behind each chip of a two-chip cartridge.
const DUAL_CHIP_LEN: usize = 512 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum CartridgeEvent {
    /// A flash chip's command window timed out; the value is the chip index.
    FlashTimeout(u8),
}

/// Bytes `offset..offset + len` of `image`, truncated at the end of the image.
fn image_slice(image: &[u8], offset: usize, len: usize) -> &[u8] {
    let start = offset.min(image.len());
    let end = offset.saturating_add(len).min(image.len());
    &image[start..end]
}

/// The region of a two-chip image backing chip `index`.
fn chip_region(image: &[u8], index: usize) -> &[u8] {
    image.get(index * DUAL_CHIP_LEN..).unwrap_or(&[])
}

fn chip_region_mut(image: &mut [u8], index: usize) -> &mut [u8] {
    let start = (index * DUAL_CHIP_LEN).min(image.len());
    &mut image[start..]
}

#[derive(Debug, Clone, Encode, Decode, MatchEachVariantMacro)]
enum Mapper {
    MegaCart(MegaCart),
    Sic(Sic),
    MaxFlash(MaxFlash),
    TheCart(TheCart),
}

impl Mapper {
    fn new(cartridge_type: CartridgeType) -> Self {
        let size = cartridge_type.size_bytes();

        match cartridge_type {
            CartridgeType::Mega16 => Self::MegaCart(MegaCart::rom(BankSelect::Masked(0x00), size)),
            CartridgeType::Mega32 => Self::MegaCart(MegaCart::rom(BankSelect::Masked(0x01), size)),
            CartridgeType::Mega64 => Self::MegaCart(MegaCart::rom(BankSelect::Masked(0x03), size)),
            CartridgeType::Mega128 => Self::MegaCart(MegaCart::rom(BankSelect::Masked(0x07), size)),
            CartridgeType::Mega256 => Self::MegaCart(MegaCart::rom(BankSelect::Masked(0x0F), size)),
            CartridgeType::Mega1024 => {
                Self::MegaCart(MegaCart::rom(BankSelect::Masked(0x3F), size))
            }
            CartridgeType::Mega2048 => {
                Self::MegaCart(MegaCart::rom(BankSelect::Masked(0x7F), size))
            }
            CartridgeType::Mega512 => Self::MegaCart(MegaCart::flash(
                FlashType::Am29F040B,
                BankSelect::Masked(0x1F),
                size,
            )),
            CartridgeType::Mega4096 => {
                Self::MegaCart(MegaCart::flash(FlashType::Am29F032B, BankSelect::Full, size))
            }
            CartridgeType::Sic128 => Self::Sic(Sic::new(FlashType::Am29F010B, 0x07)),
            CartridgeType::Sic256 => Self::Sic(Sic::new(FlashType::Am29F002BT, 0x0F)),
            CartridgeType::Sic512 => Self::Sic(Sic::new(FlashType::Am29F040B, 0x1F)),
            CartridgeType::SicPlus1024 => Self::Sic(Sic::plus()),
            CartridgeType::AtMax128 => Self::MaxFlash(MaxFlash::new(
                &[FlashType::Am29F010],
                MaxFlashBanking::AtMax128,
                size,
                0,
            )),
            CartridgeType::AtMaxOld1024 => Self::MaxFlash(MaxFlash::new(
                &[FlashType::Am29F040B, FlashType::Am29F040B],
                MaxFlashBanking::AddressMasked(0x7F),
                size,
                127,
            )),
            CartridgeType::AtMaxNew1024 => Self::MaxFlash(MaxFlash::new(
                &[FlashType::Am29F040B, FlashType::Am29F040B],
                MaxFlashBanking::AddressMasked(0x7F),
                size,
                0,
            )),
            CartridgeType::JaCart128 => Self::MaxFlash(MaxFlash::new(
                &[FlashType::SST39SF010],
                MaxFlashBanking::AddressMasked(0x0F),
                size,
                0,
            )),
            CartridgeType::JaCart256 => Self::MaxFlash(MaxFlash::new(
                &[FlashType::SST39SF020],
                MaxFlashBanking::AddressMasked(0x1F),
                size,
                0,
            )),
            CartridgeType::JaCart512 => Self::MaxFlash(MaxFlash::new(
                &[FlashType::SST39SF040],
                MaxFlashBanking::AddressMasked(0x3F),
                size,
                0,
            )),
            CartridgeType::JaCart1024 => Self::MaxFlash(MaxFlash::new(
                &[FlashType::SST39SF040, FlashType::SST39SF040],
                MaxFlashBanking::AddressMasked(0x7F),
                size,
                0,
            )),
            CartridgeType::DCart => Self::MaxFlash(MaxFlash::new(
                &[FlashType::SST39SF040],
                MaxFlashBanking::DCart,
                size,
                0,
            )),
            CartridgeType::TheCart32M => Self::TheCart(TheCart::new(FlashType::S29GL256P)),
            CartridgeType::TheCart64M => Self::TheCart(TheCart::new(FlashType::S29GL512P)),
            CartridgeType::TheCart128M => Self::TheCart(TheCart::new(FlashType::S29GL01P)),
        }
    }

    fn cold_reset<M: MemoryMap>(&mut self, image: &[u8], memory: &mut M) {
        match_each_variant!(self, mapper => mapper.cold_reset(image, memory));
    }

    fn read_control<M: MemoryMap>(&mut self, image: &[u8], address: u16, memory: &mut M) -> u8 {
        match_each_variant!(self, mapper => mapper.read_control(image, address, memory))
    }

    fn write_control<M: MemoryMap>(
        &mut self,
        image: &[u8],
        address: u16,
        value: u8,
        memory: &mut M,
    ) {
        match_each_variant!(self, mapper => mapper.write_control(image, address, value, memory));
    }

    fn read_window(&mut self, image: &[u8], address: u16) -> u8 {
        match_each_variant!(self, mapper => mapper.read_window(image, address))
    }

    fn write_window(&mut self, image: &mut [u8], address: u16, value: u8) {
        match_each_variant!(self, mapper => mapper.write_window(image, address, value));
    }

    fn chips(&self) -> &[FlashChip] {
        match_each_variant!(self, mapper => mapper.chips())
    }

    fn chips_mut(&mut self) -> &mut [FlashChip] {
        match_each_variant!(self, mapper => mapper.chips_mut())
    }

    fn eeprom_mut(&mut self) -> Option<&mut SpiEeprom> {
        match self {
            Self::TheCart(mapper) => Some(mapper.eeprom_mut()),
            Self::MegaCart(_) | Self::Sic(_) | Self::MaxFlash(_) => None,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Cartridge {
    cartridge_type: CartridgeType,
    image: Box<[u8]>,
    mapper: Mapper,
    scheduler: Scheduler<CartridgeEvent>,
    cycles: u64,
}

impl Cartridge {
    /// Create a cartridge from a raw image, which must be exactly the size of the cartridge type.
    ///
    /// # Errors
    ///
    /// Returns an error if the image length does not match the cartridge type.
    pub fn create(cartridge_type: CartridgeType, image: Vec<u8>) -> Result<Self, CartLoadError> {
        if image.is_empty() {
            return Err(CartLoadError::EmptyImage);
        }

        let expected = cartridge_type.size_bytes();
        if image.len() != expected {
            return Err(CartLoadError::InvalidImageLength {
                cartridge_type,
                expected,
                actual: image.len(),
            });
        }

        let mapper = Mapper::new(cartridge_type);
        log::info!(
            "Created {} cartridge ({} KB, flash chips: {:?})",
            cartridge_type.description(),
            cartridge_type.size_kb(),
            mapper.chips().iter().map(FlashChip::flash_type).collect::<Vec<_>>()
        );

        Ok(Self {
            cartridge_type,
            image: image.into_boxed_slice(),
            mapper,
            scheduler: Scheduler::new(),
            cycles: 0,
        })
    }

    /// Create a cartridge with a fully erased (0xFF) image.
    #[must_use]
    pub fn blank(cartridge_type: CartridgeType) -> Self {
        let image = vec![0xFF; cartridge_type.size_bytes()];
        Self {
            cartridge_type,
            image: image.into_boxed_slice(),
            mapper: Mapper::new(cartridge_type),
            scheduler: Scheduler::new(),
            cycles: 0,
        }
    }

    #[must_use]
    pub fn cartridge_type(&self) -> CartridgeType {
        self.cartridge_type
    }

    #[must_use]
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    #[must_use]
    pub fn chips(&self) -> &[FlashChip] {
        self.mapper.chips()
    }

    /// Current CPU cycle count as of the last [`tick`](Self::tick).
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Power-on reset: flash chips return to read mode, pending timeouts are dropped, and the
    /// mapper's power-on banking is installed in the memory map.
    pub fn cold_reset<M: MemoryMap>(&mut self, memory: &mut M) {
        log::info!("Cold reset of {} cartridge", self.cartridge_type);

        for (i, chip) in self.mapper.chips_mut().iter_mut().enumerate() {
            chip.cold_reset();
            self.scheduler.delete(i as u32);
        }

        self.mapper.cold_reset(&self.image, memory);
    }

    pub fn read_control<M: MemoryMap>(&mut self, address: u16, memory: &mut M) -> u8 {
        let value = self.mapper.read_control(&self.image, address, memory);
        log::trace!("Cartridge control read {address:04X}: {value:02X}");
        value
    }

    pub fn write_control<M: MemoryMap>(&mut self, address: u16, value: u8, memory: &mut M) {
        log::trace!("Cartridge control write {address:04X}: {value:02X}");
        self.mapper.write_control(&self.image, address, value, memory);
    }

    pub fn read_window(&mut self, address: u16) -> u8 {
        self.mapper.read_window(&self.image, address)
    }

    pub fn write_window(&mut self, address: u16, value: u8) {
        self.mapper.write_window(&mut self.image, address, value);
        self.schedule_chip_timers();
    }

    fn schedule_chip_timers(&mut self) {
        for (i, chip) in self.mapper.chips_mut().iter_mut().enumerate() {
            if let Some(delay) = chip.take_timer_request() {
                self.scheduler.add(
                    i as u32,
                    delay,
                    CartridgeEvent::FlashTimeout(i as u8),
                    self.cycles,
                );
            }
        }
    }

    /// CPU cycle count at which the next pending flash timeout fires.
    #[must_use]
    pub fn next_event_cycle(&self) -> Option<u64> {
        self.scheduler.next_deadline()
    }

    /// Advance to CPU cycle count `cycles` and handle every event that has come due.
    pub fn tick(&mut self, cycles: u64) {
        self.cycles = cycles;

        let mapper = &mut self.mapper;
        while self.scheduler.check_and_handle(cycles, |_, event| match event {
            CartridgeEvent::FlashTimeout(index) => {
                if let Some(chip) = mapper.chips_mut().get_mut(index as usize) {
                    log::debug!("Flash chip {index} command window timed out");
                    chip.timer_expired();
                }
            }
        }) {}
    }

    /// Whether the image has been modified since the last [`clear_dirty`](Self::clear_dirty).
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.mapper.chips().iter().any(FlashChip::is_dirty)
    }

    pub fn clear_dirty(&mut self) {
        self.mapper.chips_mut().iter_mut().for_each(FlashChip::clear_dirty);
    }

    /// Whether any chip programmed or erased since the last call.
    pub fn take_write_activity(&mut self) -> bool {
        self.mapper
            .chips_mut()
            .iter_mut()
            .fold(false, |activity, chip| chip.take_write_activity() || activity)
    }

    /// Load any onboard nonvolatile memory (The!Cart configuration EEPROM).
    pub fn load_nvram<S: SaveWriter>(&mut self, save_writer: &mut S) {
        if let Some(eeprom) = self.mapper.eeprom_mut() {
            eeprom.load_from(save_writer);
        }
    }

    /// Persist onboard nonvolatile memory if it changed.
    ///
    /// # Errors
    ///
    /// Propagates any error from the save writer.
    pub fn persist_nvram<S: SaveWriter>(
        &mut self,
        save_writer: &mut S,
    ) -> Result<(), CartridgeError<S::Err>> {
        if let Some(eeprom) = self.mapper.eeprom_mut() {
            eeprom.persist_to(save_writer).map_err(CartridgeError::SaveWrite)?;
        }

        Ok(())
    }

    /// Take ownership of the image, e.g. to write it back to disk.
    #[must_use]
    pub fn into_image(self) -> Vec<u8> {
        self.image.into_vec()
    }
}
