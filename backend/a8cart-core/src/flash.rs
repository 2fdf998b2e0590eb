//! JEDEC-style parallel flash chip emulation
//!
//! A [`FlashChip`] holds only command/mode state. The backing memory is owned by the cartridge and
//! passed in on every access, sized to the chip capacity.


use crate::micros_to_cycles;
use a8cart_proc_macros::{EnumAll, EnumDisplay};
use bincode::{Decode, Encode};
use std::ops::Range;

/// Window after a sector erase during which additional sector erase commands are accepted.
/// Datasheets guarantee between 50us and 80us.
pub const SECTOR_ERASE_TIMEOUT_CYCLES: u64 = micros_to_cycles(80);

/// Atmel page loads end when no byte has been written for this long.
pub const ATMEL_BYTE_LOAD_TIMEOUT_CYCLES: u64 = micros_to_cycles(150);

const ATMEL_PAGE_LEN: u32 = 0x100;
const WRITE_BUFFER_LEN: usize = 32;

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode, EnumDisplay, EnumAll)]
pub enum FlashType {
    /// AMD 128K x 8
    Am29F010,
    /// AMD 128K x 8
    Am29F010B,
    /// AMD 512K x 8
    Am29F040,
    /// AMD 512K x 8
    Am29F040B,
    /// AMD 2M x 8
    Am29F016D,
    /// AMD 4M x 8
    Am29F032B,
    /// AMD 256K x 8, top boot block
    Am29F002BT,
    /// Atmel 128K x 8
    AT29C010A,
    /// Atmel 512K x 8
    AT29C040,
    /// SST 128K x 8
    SST39SF010,
    /// SST 256K x 8
    SST39SF020,
    /// SST 512K x 8
    SST39SF040,
    /// AMIC 512K x 8
    A29040,
    /// Spansion 128M x 8 (byte mode)
    S29GL01P,
    /// Spansion 64M x 8 (byte mode)
    S29GL512P,
    /// Spansion 32M x 8 (byte mode)
    S29GL256P,
    /// Bright 512K x 8
    BM29F040,
    /// ST 128K x 8
    M29F010B,
    /// Hynix 512K x 8
    HY29F040A,
    /// Numonyx 1M x 8, top boot block
    M29W800DT,
    /// Macronix 8M x 8, top boot block
    MX29LV640DT,
}

/// Which address bits a chip decodes when matching the unlock sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnlockWindow {
    // $5555 / $2AAA, 15 address bits
    A15,
    // $555 / $2AA, 11 address bits
    A11,
    // $AAA / $555, 16-bit device addressed in byte mode
    A12Interleaved,
    // Atmel chips compare the full address
    Exact,
}

impl UnlockWindow {
    fn is_first(self, address: u32) -> bool {
        match self {
            Self::A15 => address & 0x7FFF == 0x5555,
            Self::A11 => address & 0x7FF == 0x555,
            Self::A12Interleaved => address & 0xFFF == 0xAAA,
            Self::Exact => address == 0x5555,
        }
    }

    fn is_second(self, address: u32) -> bool {
        match self {
            Self::A15 => address & 0x7FFF == 0x2AAA,
            Self::A11 => address & 0x7FF == 0x2AA,
            Self::A12Interleaved => address & 0xFFF == 0x555,
            Self::Exact => address == 0x2AAA,
        }
    }
}

impl FlashType {
    /// Capacity in bytes.
    #[must_use]
    pub fn size(self) -> u32 {
        match self {
            Self::Am29F010 | Self::Am29F010B | Self::AT29C010A | Self::M29F010B | Self::SST39SF010 => {
                128 * 1024
            }
            Self::Am29F002BT | Self::SST39SF020 => 256 * 1024,
            Self::Am29F040
            | Self::Am29F040B
            | Self::AT29C040
            | Self::SST39SF040
            | Self::A29040
            | Self::BM29F040
            | Self::HY29F040A => 512 * 1024,
            Self::M29W800DT => 1024 * 1024,
            Self::Am29F016D => 2 * 1024 * 1024,
            Self::Am29F032B => 4 * 1024 * 1024,
            Self::MX29LV640DT => 8 * 1024 * 1024,
            Self::S29GL256P => 32 * 1024 * 1024,
            Self::S29GL512P => 64 * 1024 * 1024,
            Self::S29GL01P => 128 * 1024 * 1024,
        }
    }

    /// Manufacturer ID (autoselect address 0) and device ID (autoselect address 1).
    ///
    /// The Spansion GL chips instead expose a 16-bit interleaved ID/CFI table.
    #[must_use]
    pub fn ids(self) -> (u8, u8) {
        match self {
            Self::Am29F010 | Self::Am29F010B => (0x01, 0x20),
            Self::Am29F040 | Self::Am29F040B => (0x01, 0xA4),
            Self::Am29F016D => (0x01, 0xAD),
            Self::Am29F032B => (0x01, 0x41),
            Self::Am29F002BT => (0x01, 0xB0),
            Self::AT29C010A => (0x1F, 0xD5),
            Self::AT29C040 => (0x1F, 0x5B),
            Self::SST39SF010 => (0xBF, 0xB5),
            Self::SST39SF020 => (0xBF, 0xB6),
            Self::SST39SF040 => (0xBF, 0xB7),
            Self::A29040 => (0x37, 0x86),
            Self::BM29F040 => (0xAD, 0x40),
            Self::M29F010B => (0x20, 0x20),
            Self::HY29F040A => (0xAD, 0xA4),
            Self::M29W800DT => (0x20, 0xD7),
            Self::MX29LV640DT => (0xC2, 0xC9),
            Self::S29GL256P | Self::S29GL512P | Self::S29GL01P => (0x01, 0x7E),
        }
    }

    /// Chip addresses of the first and second unlock cycles.
    #[must_use]
    pub fn unlock_addresses(self) -> (u32, u32) {
        match self.unlock_window() {
            UnlockWindow::A15 | UnlockWindow::Exact => (0x5555, 0x2AAA),
            UnlockWindow::A11 => (0x555, 0x2AA),
            UnlockWindow::A12Interleaved => (0xAAA, 0x555),
        }
    }

    /// Autoselect addresses holding the bytes returned by [`Self::ids`].
    #[must_use]
    pub fn id_addresses(self) -> (u32, u32) {
        if self.is_spansion_gl() { (0x00, 0x02) } else { (0x00, 0x01) }
    }

    fn unlock_window(self) -> UnlockWindow {
        match self {
            Self::Am29F010 | Self::Am29F040 | Self::SST39SF010 | Self::SST39SF020 | Self::SST39SF040 | Self::BM29F040 => {
                UnlockWindow::A15
            }
            Self::A29040
            | Self::Am29F010B
            | Self::Am29F040B
            | Self::Am29F016D
            | Self::Am29F032B
            | Self::Am29F002BT
            | Self::M29F010B
            | Self::HY29F040A => UnlockWindow::A11,
            Self::S29GL01P | Self::S29GL512P | Self::S29GL256P | Self::M29W800DT | Self::MX29LV640DT => {
                UnlockWindow::A12Interleaved
            }
            Self::AT29C010A | Self::AT29C040 => UnlockWindow::Exact,
        }
    }

    fn is_atmel(self) -> bool {
        matches!(self, Self::AT29C010A | Self::AT29C040)
    }

    fn is_spansion_gl(self) -> bool {
        matches!(self, Self::S29GL01P | Self::S29GL512P | Self::S29GL256P)
    }

    /// Whether the chip accepts further sector erase commands during the erase timeout window.
    #[must_use]
    pub fn supports_multi_sector_erase(self) -> bool {
        matches!(
            self,
            Self::A29040
                | Self::Am29F010
                | Self::Am29F010B
                | Self::Am29F002BT
                | Self::M29F010B
                | Self::HY29F040A
                | Self::M29W800DT
                | Self::MX29LV640DT
                | Self::Am29F040
                | Self::Am29F040B
                | Self::BM29F040
        )
    }

    /// The erase sector containing `address`. For Atmel chips, which have no sector erase, this is
    /// the 256-byte write page.
    #[must_use]
    pub fn sector_containing(self, address: u32) -> Range<u32> {
        let address = address & (self.size() - 1);

        let (start, len) = match self {
            Self::Am29F010 | Self::Am29F010B | Self::M29F010B => (address & !0x3FFF, 0x4000),
            Self::Am29F040
            | Self::Am29F040B
            | Self::A29040
            | Self::BM29F040
            | Self::HY29F040A
            | Self::Am29F016D
            | Self::Am29F032B => (address & !0xFFFF, 0x10000),
            Self::SST39SF010 | Self::SST39SF020 | Self::SST39SF040 => (address & !0xFFF, 0x1000),
            Self::S29GL256P | Self::S29GL512P | Self::S29GL01P => (address & !0x1FFFF, 0x20000),
            Self::AT29C010A | Self::AT29C040 => (address & !(ATMEL_PAGE_LEN - 1), ATMEL_PAGE_LEN),
            Self::Am29F002BT => match address {
                0x00000..0x30000 => (address & !0xFFFF, 0x10000),
                0x30000..0x38000 => (0x30000, 0x8000),
                0x38000..0x3A000 => (0x38000, 0x2000),
                0x3A000..0x3C000 => (0x3A000, 0x2000),
                _ => (0x3C000, 0x4000),
            },
            Self::M29W800DT => match address {
                0x00000..0xF0000 => (address & !0xFFFF, 0x10000),
                0xF0000..0xF8000 => (0xF0000, 0x8000),
                0xF8000..0xFA000 => (0xF8000, 0x2000),
                0xFA000..0xFC000 => (0xFA000, 0x2000),
                _ => (0xFC000, 0x4000),
            },
            Self::MX29LV640DT => {
                if address < 0x7F0000 {
                    (address & !0xFFFF, 0x10000)
                } else {
                    (address & !0x1FFF, 0x2000)
                }
            }
        };

        start..start + len
    }

    fn spansion_id_byte(self, address: u32) -> u8 {
        let address8 = (address & 0xFF) as usize;

        // Per-density overrides of the shared table
        let index = match self {
            Self::S29GL256P => 0,
            Self::S29GL512P => 1,
            _ => 2,
        };
        match address8 {
            // Device ID 3
            0x1C => [0x22, 0x23, 0x28][index],
            // Typical full chip erase timeout
            0x44 => [0x13, 0x12, 0x11][index],
            // Device size
            0x4E => [0x19, 0x1A, 0x1B][index],
            // Erase block region 1 count
            0x5C => [0x00, 0x01, 0x03][index],
            _ => SPANSION_GL_ID_TABLE.get(address8).copied().unwrap_or(0xFF),
        }
    }
}

// Autoselect ID + CFI query data for the S29GL-P family, one 16-bit word per pair of bytes
const SPANSION_GL_ID_TABLE: [u8; 0xA2] = [
    // Manufacturer ID, device ID, protection, indicator bits
    0x01, 0x00, 0x7E, 0x22, 0x00, 0x00, 0x3F, 0xFF,
    // Reserved
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    // Software bits, device IDs 2 and 3
    0x04, 0x00, 0xFF, 0xFF, 0x28, 0x22, 0x01, 0x22,
    // "QRY", command set, extended table address
    0x51, 0x00, 0x52, 0x00, 0x59, 0x00, 0x02, 0x00,
    0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x27, 0x00,
    0x36, 0x00, 0x00, 0x00, 0x00, 0x00, 0x06, 0x00,
    // Timeouts, device size, interface, write buffer size, erase regions
    0x06, 0x00, 0x09, 0x00, 0x13, 0x00, 0x03, 0x00,
    0x05, 0x00, 0x03, 0x00, 0x02, 0x00, 0x1B, 0x00,
    0x01, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00,
    0x01, 0x00, 0xFF, 0x00, 0x03, 0x00, 0x00, 0x00,
    0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    // "PRI" extended table
    0x50, 0x00, 0x52, 0x00, 0x49, 0x00, 0x31, 0x00,
    0x33, 0x00, 0x14, 0x00, 0x02, 0x00, 0x01, 0x00,
    0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x02, 0x00, 0xB5, 0x00, 0xC5, 0x00, 0x05, 0x00,
    0x01, 0x00,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum ReadMode {
    #[default]
    Normal,
    Autoselect,
    WriteStatusPending,
    SectorEraseStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
enum CommandPhase {
    #[default]
    Idle,
    Unlock1,
    Unlock2,
    EraseSetup,
    EraseUnlock1,
    EraseUnlock2,
    Program,
    AtmelUnlock1,
    AtmelUnlock2,
    AtmelEraseSetup,
    AtmelEraseUnlock1,
    AtmelEraseUnlock2,
    AtmelPageStart,
    AtmelPageLoad,
    MultiSectorErase,
    WriteBufferCount,
    WriteBufferFirst,
    WriteBufferNext,
    WriteBufferConfirm,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct FlashChip {
    flash_type: FlashType,
    read_mode: ReadMode,
    phase: CommandPhase,
    toggle_bits: u8,
    atmel_sdp: bool,
    write_page: u32,
    write_buffer: [u8; WRITE_BUFFER_LEN],
    pending_write_count: u8,
    pending_write_address: u32,
    timer_request: Option<u64>,
    dirty: bool,
    write_activity: bool,
}

fn read_byte(memory: &[u8], address: u32) -> u8 {
    memory.get(address as usize).copied().unwrap_or(0xFF)
}

fn modify_byte(memory: &mut [u8], address: u32, f: impl FnOnce(u8) -> u8) {
    if let Some(byte) = memory.get_mut(address as usize) {
        *byte = f(*byte);
    }
}

fn erase_range(memory: &mut [u8], range: Range<u32>) {
    let end = (range.end as usize).min(memory.len());
    let start = (range.start as usize).min(end);
    memory[start..end].fill(0xFF);
}

impl FlashChip {
    #[must_use]
    pub fn new(flash_type: FlashType) -> Self {
        Self {
            flash_type,
            read_mode: ReadMode::Normal,
            phase: CommandPhase::Idle,
            toggle_bits: 0,
            atmel_sdp: flash_type.is_atmel(),
            write_page: 0,
            write_buffer: [0xFF; WRITE_BUFFER_LEN],
            pending_write_count: 0,
            pending_write_address: 0,
            timer_request: None,
            dirty: false,
            write_activity: false,
        }
    }

    #[must_use]
    pub fn flash_type(&self) -> FlashType {
        self.flash_type
    }

    #[must_use]
    pub fn read_mode(&self) -> ReadMode {
        self.read_mode
    }

    pub fn cold_reset(&mut self) {
        self.read_mode = ReadMode::Normal;
        self.phase = CommandPhase::Idle;
        self.toggle_bits = 0;
        self.timer_request = None;
    }

    /// Whether reads currently return status/ID data instead of the memory array, in which case
    /// mapped windows must route reads through the chip instead of reading the image directly.
    #[must_use]
    pub fn is_control_read_enabled(&self) -> bool {
        self.read_mode != ReadMode::Normal
    }

    /// Read a byte. The second value is true only for memory array reads.
    pub fn read(&mut self, memory: &[u8], address: u32) -> (u8, bool) {
        let result = self.debug_read(memory, address);

        if self.read_mode == ReadMode::SectorEraseStatus {
            // DQ6 and DQ2 toggle on every read while erasing
            self.toggle_bits ^= 0x44;
        }

        log::trace!(
            "{} read {address:07X}: {:02X} ({:?})",
            self.flash_type,
            result.0,
            self.read_mode
        );

        result
    }

    /// Read a byte without side effects.
    #[must_use]
    pub fn debug_read(&self, memory: &[u8], address: u32) -> (u8, bool) {
        let address = address & (self.flash_type.size() - 1);

        match self.read_mode {
            ReadMode::Normal => (read_byte(memory, address), true),
            ReadMode::Autoselect => (self.autoselect_byte(address), false),
            ReadMode::WriteStatusPending => (!read_byte(memory, address) & 0x80, false),
            // DQ7=0, DQ5=0, DQ3=0, toggling DQ6 and DQ2
            ReadMode::SectorEraseStatus => (self.toggle_bits, false),
        }
    }

    fn autoselect_byte(&self, address: u32) -> u8 {
        if self.flash_type.is_spansion_gl() {
            return self.flash_type.spansion_id_byte(address);
        }

        let (manufacturer_id, device_id) = self.flash_type.ids();
        match address & 0xFF {
            0x00 => manufacturer_id,
            0x01 => device_id,
            // Sector protect verify and everything else
            _ => 0x00,
        }
    }

    /// Write a byte, advancing the command state machine. Returns true if the write completed a
    /// command or modified the memory array.
    pub fn write(&mut self, memory: &mut [u8], address: u32, value: u8) -> bool {
        let address = address & (self.flash_type.size() - 1);
        let window = self.flash_type.unlock_window();

        log::trace!(
            "{} write {address:07X} {value:02X}, phase {:?} mode {:?}",
            self.flash_type,
            self.phase,
            self.read_mode
        );

        let mut handled = false;
        self.phase = match self.phase {
            CommandPhase::Idle => {
                if value == 0xF0 && self.read_mode != ReadMode::Normal {
                    log::debug!("{}: exiting autoselect mode", self.flash_type);
                    self.read_mode = ReadMode::Normal;
                    handled = true;
                    CommandPhase::Idle
                } else if value == 0xF0 {
                    CommandPhase::Idle
                } else if window.is_first(address) && value == 0xAA {
                    if self.flash_type.is_atmel() {
                        CommandPhase::AtmelUnlock1
                    } else {
                        CommandPhase::Unlock1
                    }
                } else if self.flash_type.is_atmel() && !self.atmel_sdp {
                    // Without software data protection any write starts a page load
                    self.start_page_load(memory, address, value);
                    handled = true;
                    CommandPhase::AtmelPageLoad
                } else {
                    CommandPhase::Idle
                }
            }
            CommandPhase::Unlock1 => {
                if value == 0x55 && window.is_second(address) {
                    CommandPhase::Unlock2
                } else {
                    CommandPhase::Idle
                }
            }
            CommandPhase::Unlock2 => {
                if self.flash_type.is_spansion_gl() && value == 0x25 {
                    log::debug!("{}: entering write buffer load", self.flash_type);
                    self.pending_write_address = address;
                    CommandPhase::WriteBufferCount
                } else if !window.is_first(address) {
                    CommandPhase::Idle
                } else {
                    match value {
                        0x80 => CommandPhase::EraseSetup,
                        0x90 => {
                            log::debug!("{}: entering autoselect mode", self.flash_type);
                            self.read_mode = ReadMode::Autoselect;
                            handled = true;
                            CommandPhase::Idle
                        }
                        0xA0 => CommandPhase::Program,
                        0xF0 => {
                            self.read_mode = ReadMode::Normal;
                            handled = true;
                            CommandPhase::Idle
                        }
                        _ => {
                            log::debug!("{}: unknown command {value:02X}", self.flash_type);
                            CommandPhase::Idle
                        }
                    }
                }
            }
            CommandPhase::EraseSetup => {
                if value == 0xAA && window.is_first(address) {
                    CommandPhase::EraseUnlock1
                } else {
                    CommandPhase::Idle
                }
            }
            CommandPhase::EraseUnlock1 => {
                if value == 0x55 && window.is_second(address) {
                    CommandPhase::EraseUnlock2
                } else {
                    CommandPhase::Idle
                }
            }
            CommandPhase::EraseUnlock2 => {
                handled = true;

                if value == 0x10 && window.is_first(address) {
                    self.erase_chip(memory);
                    self.read_mode = ReadMode::Normal;
                    CommandPhase::Idle
                } else if value == 0x30 {
                    self.erase_sector(memory, address);

                    if self.flash_type.supports_multi_sector_erase() {
                        self.read_mode = ReadMode::SectorEraseStatus;
                        self.timer_request = Some(SECTOR_ERASE_TIMEOUT_CYCLES);
                        CommandPhase::MultiSectorErase
                    } else {
                        self.read_mode = ReadMode::Normal;
                        CommandPhase::Idle
                    }
                } else {
                    log::debug!("{}: erase aborted by {value:02X}", self.flash_type);
                    self.read_mode = ReadMode::Normal;
                    CommandPhase::Idle
                }
            }
            CommandPhase::Program => {
                modify_byte(memory, address, |byte| byte & value);
                self.mark_written();
                self.read_mode = ReadMode::Normal;
                handled = true;
                CommandPhase::Idle
            }
            CommandPhase::MultiSectorErase => {
                handled = true;

                if value == 0x30 {
                    self.erase_sector(memory, address);
                    self.timer_request = Some(SECTOR_ERASE_TIMEOUT_CYCLES);
                    CommandPhase::MultiSectorErase
                } else {
                    log::debug!("{}: multiple sector erase ended by {value:02X}", self.flash_type);
                    self.read_mode = ReadMode::Normal;
                    CommandPhase::Idle
                }
            }
            CommandPhase::AtmelUnlock1 => {
                if value == 0x55 && window.is_second(address) {
                    CommandPhase::AtmelUnlock2
                } else {
                    CommandPhase::Idle
                }
            }
            CommandPhase::AtmelUnlock2 => {
                if !window.is_first(address) {
                    CommandPhase::Idle
                } else {
                    match value {
                        0x80 => CommandPhase::AtmelEraseSetup,
                        0x90 => {
                            self.read_mode = ReadMode::Autoselect;
                            CommandPhase::Idle
                        }
                        0xA0 => {
                            self.atmel_sdp = true;
                            CommandPhase::AtmelPageStart
                        }
                        0xF0 => {
                            self.read_mode = ReadMode::Normal;
                            handled = true;
                            CommandPhase::Idle
                        }
                        _ => CommandPhase::Idle,
                    }
                }
            }
            CommandPhase::AtmelEraseSetup => {
                if value == 0xAA && window.is_first(address) {
                    CommandPhase::AtmelEraseUnlock1
                } else {
                    CommandPhase::Idle
                }
            }
            CommandPhase::AtmelEraseUnlock1 => {
                if value == 0x55 && window.is_second(address) {
                    CommandPhase::AtmelEraseUnlock2
                } else {
                    CommandPhase::Idle
                }
            }
            CommandPhase::AtmelEraseUnlock2 => {
                self.read_mode = ReadMode::Normal;

                match (window.is_first(address), value) {
                    (true, 0x10) => {
                        self.erase_chip(memory);
                        CommandPhase::Idle
                    }
                    (true, 0x20) => {
                        log::debug!("{}: software data protection disabled", self.flash_type);
                        self.atmel_sdp = false;
                        CommandPhase::AtmelPageStart
                    }
                    _ => CommandPhase::Idle,
                }
            }
            CommandPhase::AtmelPageStart => {
                self.start_page_load(memory, address, value);
                handled = true;
                CommandPhase::AtmelPageLoad
            }
            CommandPhase::AtmelPageLoad => {
                if address & !(ATMEL_PAGE_LEN - 1) == self.write_page {
                    modify_byte(memory, address, |_| value);
                    self.mark_written();
                    self.timer_request = Some(ATMEL_BYTE_LOAD_TIMEOUT_CYCLES);
                    handled = true;
                } else {
                    log::debug!(
                        "{}: ignoring write to {address:05X} outside of page {:05X}",
                        self.flash_type,
                        self.write_page
                    );
                }
                CommandPhase::AtmelPageLoad
            }
            CommandPhase::WriteBufferCount => {
                if value >= WRITE_BUFFER_LEN as u8 {
                    log::debug!("{}: invalid write buffer count {value:02X}", self.flash_type);
                    CommandPhase::Idle
                } else if !self.in_pending_sector(address) {
                    log::debug!("{}: write buffer count outside of initial sector", self.flash_type);
                    CommandPhase::Idle
                } else {
                    self.write_buffer = [0xFF; WRITE_BUFFER_LEN];
                    self.pending_write_count = value + 1;
                    CommandPhase::WriteBufferFirst
                }
            }
            CommandPhase::WriteBufferFirst => {
                if !self.in_pending_sector(address) {
                    log::debug!("{}: write buffer data outside of initial sector", self.flash_type);
                    CommandPhase::Idle
                } else {
                    self.pending_write_address = address;
                    self.load_write_buffer(address, value)
                }
            }
            CommandPhase::WriteBufferNext => {
                if (address ^ self.pending_write_address) & !(WRITE_BUFFER_LEN as u32 - 1) != 0 {
                    log::debug!("{}: write buffer data outside of write page", self.flash_type);
                    CommandPhase::Idle
                } else {
                    self.load_write_buffer(address, value)
                }
            }
            CommandPhase::WriteBufferConfirm => {
                if value == 0x29 {
                    let page = self.pending_write_address & !(WRITE_BUFFER_LEN as u32 - 1);
                    log::debug!("{}: programming write page at {page:07X}", self.flash_type);

                    for (i, &data) in self.write_buffer.iter().enumerate() {
                        modify_byte(memory, page + i as u32, |byte| byte & data);
                    }
                    self.mark_written();
                    handled = true;
                } else {
                    log::debug!("{}: buffered write aborted by {value:02X}", self.flash_type);
                }
                CommandPhase::Idle
            }
        };

        handled
    }

    fn in_pending_sector(&self, address: u32) -> bool {
        (address ^ self.pending_write_address) & !0x1FFFF == 0
    }

    fn load_write_buffer(&mut self, address: u32, value: u8) -> CommandPhase {
        self.write_buffer[address as usize % WRITE_BUFFER_LEN] &= value;
        self.pending_write_count -= 1;

        if self.pending_write_count == 0 {
            CommandPhase::WriteBufferConfirm
        } else {
            CommandPhase::WriteBufferNext
        }
    }

    fn start_page_load(&mut self, memory: &mut [u8], address: u32, value: u8) {
        self.write_page = address & !(ATMEL_PAGE_LEN - 1);
        self.read_mode = ReadMode::WriteStatusPending;

        // The whole page is rewritten; bytes not loaded read back erased
        erase_range(memory, self.flash_type.sector_containing(address));
        modify_byte(memory, address, |_| value);
        self.mark_written();
        self.timer_request = Some(ATMEL_BYTE_LOAD_TIMEOUT_CYCLES);

        log::debug!("{}: loading page {:05X}", self.flash_type, self.write_page);
    }

    fn erase_chip(&mut self, memory: &mut [u8]) {
        log::debug!("{}: erasing entire chip", self.flash_type);
        erase_range(memory, 0..self.flash_type.size());
        self.mark_written();
    }

    fn erase_sector(&mut self, memory: &mut [u8], address: u32) {
        let sector = self.flash_type.sector_containing(address);
        log::debug!(
            "{}: erasing sector {:07X}-{:07X}",
            self.flash_type,
            sector.start,
            sector.end - 1
        );
        erase_range(memory, sector);
        self.mark_written();
    }

    fn mark_written(&mut self) {
        self.dirty = true;
        self.write_activity = true;
    }

    /// Take the pending request to (re)start this chip's timeout timer, as a cycle delta from now.
    pub fn take_timer_request(&mut self) -> Option<u64> {
        self.timer_request.take()
    }

    /// Signal that the most recently requested timeout has elapsed.
    pub fn timer_expired(&mut self) {
        match self.phase {
            CommandPhase::MultiSectorErase => {
                log::debug!("{}: sector erase timeout window closed", self.flash_type);
                self.read_mode = ReadMode::Normal;
                self.phase = CommandPhase::Idle;
            }
            CommandPhase::AtmelPageLoad => {
                log::debug!("{}: page {:05X} programmed", self.flash_type, self.write_page);
                self.read_mode = ReadMode::Normal;
                self.phase = CommandPhase::Idle;
            }
            _ => {}
        }
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Returns whether the memory array has been modified since the last call.
    pub fn take_write_activity(&mut self) -> bool {
        std::mem::take(&mut self.write_activity)
    }
}
