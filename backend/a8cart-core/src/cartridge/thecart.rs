//! The!Cart: up to 128MB of Spansion GL flash plus 512K of RAM, with a register file at
//! $D5A0-$D5AF and a mode register that emulates the banking schemes of many other cartridges
//!
//! Registers:
//! - $D5A0/$D5A1: Primary bank number, low 8 bits / high 6 bits
//! - $D5A2: Primary bank enable (bit 0)
//! - $D5A3/$D5A4: Secondary bank number, low 8 bits / high 6 bits
//! - $D5A5: Secondary bank enable (bit 0)
//! - $D5A6: Cartridge mode
//! - $D5A7: Bit 0 = primary write enable, bit 1 = primary from RAM, bit 2 = secondary write
//!   enable, bit 3 = secondary from RAM
//! - $D5A8: SPI EEPROM; bit 0 = clock, bit 1 = chip select (active low), bit 7 = data
//! - $D5AF: Any write locks the configuration registers until the next cold reset

use crate::eeprom::SpiEeprom;
use crate::flash::{FlashChip, FlashType};
use crate::memory::{MemoryMap, WindowHooks};
use a8cart_common::boxedarray::BoxedByteArray;
use a8cart_common::num::GetBit;
use bincode::{Decode, Encode};

const RAM_LEN: usize = 512 * 1024;

const INITIAL_REGISTERS: [u8; 9] = [
    0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00,
    // SPI chip select high, data high, clock low
    0x82,
];

const REGISTER_WRITE_MASKS: [u8; 8] = [0xFF, 0x3F, 0x01, 0xFF, 0x3F, 0x01, 0x3F, 0x0F];

// Bank table entries hold a primary bank number in the low bits plus these flags
const ENTRY_ENABLE: u16 = 0x4000;
const ENTRY_SIC_809F_ENABLE: u16 = 0x2000;

// SIC! window enables, stored using the bit positions of the SIC! bank register
const SIC_A0BF_ENABLE: u8 = 0x40;
const SIC_809F_ENABLE: u8 = 0x20;

const OSS_BANK_LOOKUP: [Option<u16>; 4] = [Some(1), Some(3), None, Some(2)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum BankMode {
    Disabled,
    /// 8K primary bank at $A000
    EightK,
    /// 16K bank at $8000; the primary bank number must be odd and is paired with the even bank
    /// below it
    SixteenK,
    /// Independent 8K primary bank at $A000 and secondary bank at $8000
    Flexi,
    /// Fixed 8K primary bank at $A000 (the last bank under the bank mask), switchable 8K bank at
    /// $8000
    EightKFixed,
    /// 4K fixed primary bank at $B000, switchable 4K bank at $A000
    Oss,
    /// 16K bank with independently switchable 8K halves
    Sic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum BankSource {
    Flash,
    Ram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
struct BankMapping {
    base: u16,
    len: u16,
    offset: usize,
    source: BankSource,
    write_enable: bool,
}

impl BankMapping {
    fn end(self) -> u16 {
        self.base + (self.len - 1)
    }

    fn contains(self, address: u16) -> bool {
        (self.base..=self.end()).contains(&address)
    }

    fn hooks(self) -> WindowHooks {
        match self.source {
            BankSource::Flash => WindowHooks::Flash,
            BankSource::Ram => WindowHooks::CartRam,
        }
    }
}

/// A bank number register value plus its flash/RAM selection.
#[derive(Debug, Clone, Copy)]
struct BankRegister {
    bank: u16,
    source: BankSource,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct TheCart {
    flash: FlashChip,
    flash_size: usize,
    ram: BoxedByteArray<RAM_LEN>,
    eeprom: SpiEeprom,
    registers: [u8; 9],
    mode: BankMode,
    bank_table: [Option<u16>; 256],
    bank_by_address: bool,
    bank_mask: u16,
    oss_bank: u8,
    sic_enables: u8,
    config_lock: bool,
    primary: Option<BankMapping>,
    secondary: Option<BankMapping>,
}

impl TheCart {
    pub fn new(flash_type: FlashType) -> Self {
        let mut cart = Self {
            flash: FlashChip::new(flash_type),
            flash_size: flash_type.size() as usize,
            ram: BoxedByteArray::new(),
            eeprom: SpiEeprom::new(),
            registers: INITIAL_REGISTERS,
            mode: BankMode::EightK,
            bank_table: [None; 256],
            bank_by_address: false,
            bank_mask: 0,
            oss_bank: 0,
            sic_enables: SIC_A0BF_ENABLE,
            config_lock: false,
            primary: None,
            secondary: None,
        };
        cart.rebuild_bank_table();
        cart
    }

    pub fn cold_reset<M: MemoryMap>(&mut self, image: &[u8], memory: &mut M) {
        self.registers = INITIAL_REGISTERS;
        self.config_lock = false;
        self.sic_enables = SIC_A0BF_ENABLE;
        self.oss_bank = 0;
        self.rebuild_bank_table();
        self.eeprom.cold_reset();
        self.update_banks(image, memory, true);
    }

    fn primary_register(&self) -> u16 {
        u16::from_le_bytes([self.registers[0], self.registers[1]])
    }

    fn set_primary_register(&mut self, bank: u16) {
        [self.registers[0], self.registers[1]] = bank.to_le_bytes();
    }

    fn sic_readback(&self) -> u8 {
        let mut value = (self.registers[0] >> 1) & 0x1F;
        if self.sic_enables & SIC_A0BF_ENABLE == 0 {
            value |= 0x40;
        }
        if self.sic_enables & SIC_809F_ENABLE != 0 {
            value |= 0x20;
        }
        value
    }

    pub fn read_control<M: MemoryMap>(
        &mut self,
        image: &[u8],
        address: u16,
        memory: &mut M,
    ) -> u8 {
        let low = address as u8;

        if (0xA0..=0xAF).contains(&low) && !self.config_lock {
            return match low {
                0xA0..=0xA7 => self.registers[usize::from(low - 0xA0)],
                0xA8 => (self.registers[8] & 0x03) | (u8::from(self.eeprom.read_state()) << 7),
                _ => 0xFF,
            };
        }

        if self.mode == BankMode::Sic && low < 0x20 {
            return self.sic_readback();
        }

        if self.bank_by_address {
            self.write_control(image, address, 0, memory);
        }

        0xFF
    }

    pub fn write_control<M: MemoryMap>(
        &mut self,
        image: &[u8],
        address: u16,
        value: u8,
        memory: &mut M,
    ) {
        let low = address as u8;

        if (0xA0..=0xAF).contains(&low) && !self.config_lock {
            match low {
                0xA0..=0xA7 => self.write_register(image, usize::from(low - 0xA0), value, memory),
                0xA8 => {
                    let value = value & 0x83;
                    if value != self.registers[8] {
                        self.registers[8] = value;
                        self.eeprom.write_state(!value.bit(1), value.bit(0), value.bit(7));
                    }
                }
                0xAF => {
                    log::debug!("The!Cart configuration locked");
                    self.config_lock = true;
                }
                _ => {
                    log::trace!("Ignoring The!Cart write to unused register {address:04X}");
                }
            }
            return;
        }

        let key = if self.bank_by_address { low } else { value };
        let Some(entry) = self.bank_table[usize::from(key)] else { return };

        let old_bank = self.primary_register();
        let new_bank = old_bank ^ ((old_bank ^ entry) & self.bank_mask);

        match self.mode {
            BankMode::Sic => {
                if low >= 0x20 {
                    return;
                }

                let new_enables = ((entry & (ENTRY_ENABLE | ENTRY_SIC_809F_ENABLE)) >> 8) as u8;
                if old_bank != new_bank || new_enables != self.sic_enables {
                    self.set_primary_register(new_bank);
                    self.sic_enables = new_enables;
                    self.update_banks(image, memory, false);
                }
            }
            BankMode::Oss => {
                if entry as u8 != self.oss_bank {
                    self.oss_bank = entry as u8;
                    self.update_banks(image, memory, false);
                }
            }
            _ => {
                let new_enable = u8::from(entry & ENTRY_ENABLE != 0);
                if old_bank != new_bank || new_enable != self.registers[2] {
                    self.set_primary_register(new_bank);
                    self.registers[2] = new_enable;
                    self.update_banks(image, memory, false);
                }
            }
        }
    }

    fn write_register<M: MemoryMap>(
        &mut self,
        image: &[u8],
        index: usize,
        value: u8,
        memory: &mut M,
    ) {
        let value = value & REGISTER_WRITE_MASKS[index];

        // Writing a bank number enables that bank's window
        let enable_index = match index {
            0 | 1 => Some(2),
            3 | 4 => Some(5),
            _ => None,
        };
        let mut force = false;
        if let Some(enable_index) = enable_index {
            if self.registers[enable_index] == 0 {
                self.registers[enable_index] = 1;
                force = true;
            }
        }

        if !force && self.registers[index] == value {
            return;
        }

        log::trace!("The!Cart register {index}: {:02X} -> {value:02X}", self.registers[index]);
        self.registers[index] = value;

        if index == 6 {
            self.rebuild_bank_table();
        }

        self.update_banks(image, memory, false);
    }

    fn rebuild_bank_table(&mut self) {
        let mode = self.registers[6] & 0x3F;
        let table = &mut self.bank_table;

        table.fill(None);
        self.bank_mask = 0;
        self.bank_by_address = false;

        self.mode = match mode {
            0x00 => BankMode::Disabled,
            0x01 => BankMode::EightK,
            0x20 => BankMode::Flexi,
            0x21 => BankMode::SixteenK,
            // AtariMax 128K
            0x02 => {
                self.bank_by_address = true;
                self.bank_mask = 0x0F;
                for i in 0x00..0x10 {
                    table[i] = Some(ENTRY_ENABLE | i as u16);
                }
                for i in 0x10..0x20 {
                    table[i] = Some(i as u16);
                }
                BankMode::EightK
            }
            // AtariMax 1MB; only $D58x disables
            0x03 => {
                self.bank_by_address = true;
                self.bank_mask = 0x7F;
                for i in 0x00..0x80 {
                    table[i] = Some(ENTRY_ENABLE | i as u16);
                }
                for i in 0x80..0x90 {
                    table[i] = Some(i as u16);
                }
                BankMode::EightK
            }
            // OSS M091
            0x04 => {
                self.bank_by_address = true;
                self.bank_mask = 0x01;
                for (i, entry) in table.iter_mut().enumerate() {
                    let bits = (i & 1) | ((i >> 2) & 2);
                    *entry = OSS_BANK_LOOKUP[bits];
                }
                BankMode::Oss
            }
            // SpartaDOS X ($D5Ex), Diamond GOS ($D5Dx), Express ($D57x)
            0x08 | 0x09 | 0x0A => {
                let base = match mode {
                    0x08 => 0xE0,
                    0x09 => 0xD0,
                    _ => 0x70,
                };
                self.bank_by_address = true;
                self.bank_mask = 0x07;
                for i in 0..8 {
                    table[base + i] = Some(ENTRY_ENABLE | (7 - i as u16));
                    table[base + 8 + i] = Some(7 - i as u16);
                }
                BankMode::EightK
            }
            // Atrax 128K
            0x0C => {
                self.bank_mask = 0x0F;
                for i in 0x00..0x80 {
                    table[i] = Some(ENTRY_ENABLE | i as u16);
                    table[0x80 + i] = Some(i as u16);
                }
                BankMode::EightK
            }
            // Williams 64K
            0x0D => {
                self.bank_by_address = true;
                self.bank_mask = 0x07;
                for (i, entry) in table.iter_mut().enumerate() {
                    let i = i as u16;
                    *entry = Some(if i.bit(3) { i } else { ENTRY_ENABLE | i });
                }
                BankMode::EightK
            }
            // MegaMax 16K, AtariMax 1MB banking
            0x22 => {
                self.bank_by_address = true;
                self.bank_mask = 0xFE;
                fill_mega_table(table);
                BankMode::SixteenK
            }
            // Blizzard 16K
            0x23 => {
                table.fill(Some(0));
                BankMode::SixteenK
            }
            // SIC! 512K; bit 7 (flash write enable) is ignored
            0x24 => {
                self.bank_mask = 0x3E;
                for (i, entry) in table.iter_mut().enumerate() {
                    let i = i as u16;
                    let mut value = (i & 0x1F) * 2;
                    if !i.bit(6) {
                        value |= ENTRY_ENABLE;
                    }
                    if i.bit(5) {
                        value |= ENTRY_SIC_809F_ENABLE;
                    }
                    *entry = Some(value);
                }
                BankMode::Sic
            }
            // MegaCart 16K-2MB; value bit 7 disables
            0x28..=0x2F => {
                self.bank_mask = (2 << (mode - 0x28)) - 2;
                fill_mega_table(table);
                BankMode::SixteenK
            }
            // XEGS 32K-1MB
            0x30..=0x35 => {
                self.bank_mask = (4 << (mode - 0x30)) - 1;
                for (i, entry) in table.iter_mut().enumerate() {
                    *entry = Some(ENTRY_ENABLE | i as u16);
                }
                BankMode::EightKFixed
            }
            // Switchable XEGS 32K-1MB; value bit 7 enables
            0x38..=0x3D => {
                self.bank_mask = (4 << (mode - 0x38)) - 1;
                for (i, entry) in table.iter_mut().enumerate() {
                    let i = i as u16;
                    *entry = Some(if i.bit(7) { ENTRY_ENABLE | i } else { i });
                }
                BankMode::EightKFixed
            }
            _ => {
                log::warn!("Unsupported The!Cart mode {mode:02X}; cartridge disabled");
                BankMode::Disabled
            }
        };

        log::debug!(
            "The!Cart mode {mode:02X}: {:?}, bank mask {:02X}, by address {}",
            self.mode,
            self.bank_mask,
            self.bank_by_address
        );
    }

    fn primary_bank(&self) -> Option<BankRegister> {
        self.registers[2].bit(0).then(|| BankRegister {
            bank: self.primary_register() & 0x3FFF,
            source: source_for(self.registers[7].bit(1)),
        })
    }

    fn secondary_bank(&self) -> Option<BankRegister> {
        self.registers[5].bit(0).then(|| BankRegister {
            bank: u16::from_le_bytes([self.registers[3], self.registers[4]]) & 0x3FFF,
            source: source_for(self.registers[7].bit(3)),
        })
    }

    fn bank_mapping(
        &self,
        base: u16,
        len: u16,
        offset: usize,
        source: BankSource,
        write_enable: bool,
    ) -> BankMapping {
        let offset = match source {
            BankSource::Flash => offset & (self.flash_size - 1),
            BankSource::Ram => offset & (RAM_LEN - 1),
        };
        BankMapping { base, len, offset, source, write_enable }
    }

    fn compute_mappings(&self) -> (Option<BankMapping>, Option<BankMapping>) {
        let primary_write = self.registers[7].bit(0);
        let secondary_write = match self.mode {
            BankMode::Disabled | BankMode::EightK | BankMode::Flexi => self.registers[7].bit(2),
            BankMode::SixteenK | BankMode::EightKFixed | BankMode::Oss | BankMode::Sic => {
                primary_write
            }
        };

        let window_8k = |base: u16, bank: u16, source: BankSource, write_enable: bool| {
            self.bank_mapping(base, 0x2000, usize::from(bank) * 0x2000, source, write_enable)
        };

        match self.mode {
            BankMode::Disabled => (None, None),
            BankMode::EightK => {
                let primary = self
                    .primary_bank()
                    .map(|p| window_8k(0xA000, p.bank, p.source, primary_write));
                (primary, None)
            }
            BankMode::Flexi => {
                let primary = self
                    .primary_bank()
                    .map(|p| window_8k(0xA000, p.bank, p.source, primary_write));
                let secondary = self
                    .secondary_bank()
                    .map(|s| window_8k(0x8000, s.bank, s.source, secondary_write));
                (primary, secondary)
            }
            BankMode::SixteenK => match self.primary_bank() {
                Some(p) => {
                    let bank = p.bank & !1;
                    (
                        Some(window_8k(0xA000, bank + 1, p.source, primary_write)),
                        Some(window_8k(0x8000, bank, p.source, secondary_write)),
                    )
                }
                None => (None, None),
            },
            BankMode::Sic => match self.primary_bank() {
                Some(p) => {
                    let bank = p.bank & !1;
                    let primary = (self.sic_enables & SIC_A0BF_ENABLE != 0)
                        .then(|| window_8k(0xA000, bank + 1, p.source, primary_write));
                    let secondary = (self.sic_enables & SIC_809F_ENABLE != 0)
                        .then(|| window_8k(0x8000, bank, p.source, secondary_write));
                    (primary, secondary)
                }
                None => (None, None),
            },
            BankMode::EightKFixed => match self.primary_bank() {
                Some(p) => (
                    Some(window_8k(0xA000, p.bank | self.bank_mask, p.source, primary_write)),
                    Some(window_8k(0x8000, p.bank, p.source, secondary_write)),
                ),
                None => (None, None),
            },
            BankMode::Oss => match self.primary_bank() {
                Some(p) => {
                    let fixed = self.bank_mapping(
                        0xB000,
                        0x1000,
                        usize::from(p.bank) * 0x2000,
                        p.source,
                        primary_write,
                    );
                    let switched = self.bank_mapping(
                        0xA000,
                        0x1000,
                        usize::from(p.bank & !1) * 0x2000 + usize::from(self.oss_bank) * 0x1000,
                        p.source,
                        secondary_write,
                    );
                    (Some(fixed), Some(switched))
                }
                None => (None, None),
            },
        }
    }

    fn update_banks<M: MemoryMap>(&mut self, image: &[u8], memory: &mut M, force: bool) {
        let (primary, secondary) = self.compute_mappings();
        if !force && primary == self.primary && secondary == self.secondary {
            return;
        }

        log::debug!("The!Cart banks: primary {primary:?}, secondary {secondary:?}");
        self.primary = primary;
        self.secondary = secondary;

        match primary {
            Some(mapping) => {
                memory.cart_a0bf_enable();
                install_window(image, mapping, memory);
            }
            None => memory.cart_a0bf_disable(),
        }

        match secondary {
            Some(mapping) => {
                // OSS places the secondary bank at $A000, leaving $8000-$9FFF unmapped
                if mapping.base >= 0xA000 {
                    memory.cart_809f_disable();
                } else {
                    memory.cart_809f_enable();
                }
                install_window(image, mapping, memory);
            }
            None => memory.cart_809f_disable(),
        }
    }

    fn mapping_for(&self, address: u16) -> Option<BankMapping> {
        [self.primary, self.secondary].into_iter().flatten().find(|m| m.contains(address))
    }

    pub fn read_window(&mut self, image: &[u8], address: u16) -> u8 {
        let Some(mapping) = self.mapping_for(address) else { return 0xFF };
        let offset = mapping.offset + usize::from(address - mapping.base);

        match mapping.source {
            BankSource::Flash => self.flash.read(image, offset as u32).0,
            BankSource::Ram => self.ram[offset & (RAM_LEN - 1)],
        }
    }

    pub fn write_window(&mut self, image: &mut [u8], address: u16, value: u8) {
        let Some(mapping) = self.mapping_for(address) else { return };
        if !mapping.write_enable {
            log::trace!("The!Cart write to protected bank at {address:04X}: {value:02X}");
            return;
        }

        let offset = mapping.offset + usize::from(address - mapping.base);
        match mapping.source {
            BankSource::Flash => {
                self.flash.write(image, offset as u32, value);
            }
            BankSource::Ram => self.ram[offset & (RAM_LEN - 1)] = value,
        }
    }

    pub fn chips(&self) -> &[FlashChip] {
        std::slice::from_ref(&self.flash)
    }

    pub fn chips_mut(&mut self) -> &mut [FlashChip] {
        std::slice::from_mut(&mut self.flash)
    }

    pub fn eeprom_mut(&mut self) -> &mut SpiEeprom {
        &mut self.eeprom
    }
}

fn source_for(ram: bool) -> BankSource {
    if ram { BankSource::Ram } else { BankSource::Flash }
}

// 16K banks selected by value, bit 7 disables
fn fill_mega_table(table: &mut [Option<u16>; 256]) {
    for i in 0..128 {
        table[i] = Some(ENTRY_ENABLE | (i as u16 * 2));
        table[128 + i] = Some(i as u16 * 2);
    }
}

fn install_window<M: MemoryMap>(image: &[u8], mapping: BankMapping, memory: &mut M) {
    memory.set_flash_routines(mapping.hooks());
    memory.set_flash(mapping.base, mapping.end());
    if mapping.source == BankSource::Flash {
        memory.copy_from_cart(
            mapping.base,
            mapping.end(),
            super::image_slice(image, mapping.offset, usize::from(mapping.len)),
        );
    }
}
