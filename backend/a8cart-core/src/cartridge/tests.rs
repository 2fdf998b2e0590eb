use super::*;
use crate::flash::{ReadMode, SECTOR_ERASE_TIMEOUT_CYCLES};
use crate::memory::WindowHooks;
use a8cart_common::frontend::MemorySaveWriter;
use test_log::test;

#[derive(Debug, Clone, PartialEq, Eq)]
enum MemoryCall {
    FlashRoutines(WindowHooks),
    SetFlash(u16, u16),
    CopyFromCart { start: u16, end: u16, first: Option<u8> },
    A0bf(bool),
    Cart809f(bool),
}

#[derive(Debug, Default)]
struct RecordingMemoryMap {
    calls: Vec<MemoryCall>,
}

impl RecordingMemoryMap {
    fn take(&mut self) -> Vec<MemoryCall> {
        std::mem::take(&mut self.calls)
    }
}

impl MemoryMap for RecordingMemoryMap {
    fn set_flash_routines(&mut self, hooks: WindowHooks) {
        self.calls.push(MemoryCall::FlashRoutines(hooks));
    }

    fn set_flash(&mut self, start: u16, end: u16) {
        self.calls.push(MemoryCall::SetFlash(start, end));
    }

    fn copy_from_cart(&mut self, start: u16, end: u16, bytes: &[u8]) {
        self.calls.push(MemoryCall::CopyFromCart { start, end, first: bytes.first().copied() });
    }

    fn cart_a0bf_enable(&mut self) {
        self.calls.push(MemoryCall::A0bf(true));
    }

    fn cart_a0bf_disable(&mut self) {
        self.calls.push(MemoryCall::A0bf(false));
    }

    fn cart_809f_enable(&mut self) {
        self.calls.push(MemoryCall::Cart809f(true));
    }

    fn cart_809f_disable(&mut self) {
        self.calls.push(MemoryCall::Cart809f(false));
    }
}

/// Every 256-byte page is filled with a byte identifying its 8K bank, XORed with the page number.
fn patterned_image(cartridge_type: CartridgeType) -> Vec<u8> {
    (0..cartridge_type.size_bytes()).map(|i| ((i >> 13) as u8) ^ ((i >> 8) as u8 & 0x1F)).collect()
}

fn new_cartridge(cartridge_type: CartridgeType) -> (Cartridge, RecordingMemoryMap) {
    let mut memory = RecordingMemoryMap::default();
    let mut cartridge = Cartridge::create(cartridge_type, patterned_image(cartridge_type)).unwrap();
    cartridge.cold_reset(&mut memory);
    (cartridge, memory)
}

fn write_sequence(cartridge: &mut Cartridge, writes: &[(u16, u8)]) {
    for &(address, value) in writes {
        cartridge.write_window(address, value);
    }
}

#[test]
fn create_rejects_wrong_size() {
    assert!(matches!(
        Cartridge::create(CartridgeType::Mega512, vec![0; 1024]),
        Err(CartLoadError::InvalidImageLength { expected: 524288, actual: 1024, .. })
    ));
    assert!(matches!(
        Cartridge::create(CartridgeType::Mega16, vec![]),
        Err(CartLoadError::EmptyImage)
    ));
}

#[test]
fn every_type_constructs_and_resets() {
    for cartridge_type in CartridgeType::ALL {
        let mut memory = RecordingMemoryMap::default();
        let mut cartridge = Cartridge::blank(cartridge_type);
        cartridge.cold_reset(&mut memory);

        let chip_capacity: usize =
            cartridge.chips().iter().map(|chip| chip.flash_type().size() as usize).sum();
        if cartridge_type.has_flash() {
            assert_eq!(chip_capacity, cartridge_type.size_bytes(), "{cartridge_type}");
        } else {
            assert_eq!(chip_capacity, 0, "{cartridge_type}");
        }
        assert!(!cartridge.is_dirty());
    }
}

#[test]
fn mega512_end_to_end() {
    let (mut cartridge, mut memory) = new_cartridge(CartridgeType::Mega512);
    let image = patterned_image(CartridgeType::Mega512);

    // Cold reset maps bank 0 as flash
    assert_eq!(
        memory.take(),
        vec![
            MemoryCall::Cart809f(true),
            MemoryCall::A0bf(true),
            MemoryCall::FlashRoutines(WindowHooks::Flash),
            MemoryCall::SetFlash(0x8000, 0xBFFF),
            MemoryCall::CopyFromCart { start: 0x8000, end: 0xBFFF, first: Some(image[0]) },
        ]
    );

    // Sector erase through the $A000 half of the window
    write_sequence(
        &mut cartridge,
        &[
            (0x8555, 0xAA),
            (0x82AA, 0x55),
            (0x8555, 0x80),
            (0x8555, 0xAA),
            (0x82AA, 0x55),
            (0xA000, 0x30),
        ],
    );
    assert!(cartridge.image()[..0x10000].iter().all(|&byte| byte == 0xFF));
    assert_eq!(cartridge.image()[0x10000..], image[0x10000..]);
    assert!(cartridge.is_dirty());
    assert!(cartridge.take_write_activity());
    assert!(!cartridge.take_write_activity());

    // Bank 3
    cartridge.write_control(0xD500, 3, &mut memory);
    assert_eq!(cartridge.read_control(0xD500, &mut memory), 3);
    let calls = memory.take();
    assert_eq!(
        calls.last(),
        Some(&MemoryCall::CopyFromCart { start: 0x8000, end: 0xBFFF, first: Some(0xFF) })
    );

    cartridge.tick(SECTOR_ERASE_TIMEOUT_CYCLES);
    cartridge.write_control(0xD500, 5, &mut memory);
    assert_eq!(cartridge.read_window(0x8000), image[5 * 0x4000]);
    assert_eq!(cartridge.read_window(0xB234), image[5 * 0x4000 + 0x3234]);
}

#[test]
fn multi_sector_erase_window_closes_on_tick() {
    let (mut cartridge, _memory) = new_cartridge(CartridgeType::Mega512);

    cartridge.tick(1000);
    write_sequence(
        &mut cartridge,
        &[
            (0x8555, 0xAA),
            (0x82AA, 0x55),
            (0x8555, 0x80),
            (0x8555, 0xAA),
            (0x82AA, 0x55),
            (0x8000, 0x30),
        ],
    );
    assert_eq!(cartridge.chips()[0].read_mode(), ReadMode::SectorEraseStatus);

    // Status reads toggle DQ6 and DQ2
    let first = cartridge.read_window(0x8000);
    let second = cartridge.read_window(0x8000);
    assert_eq!(first ^ second, 0x44);
    assert_eq!(cartridge.next_event_cycle(), Some(1000 + SECTOR_ERASE_TIMEOUT_CYCLES));

    cartridge.tick(1000 + SECTOR_ERASE_TIMEOUT_CYCLES - 1);
    assert_eq!(cartridge.chips()[0].read_mode(), ReadMode::SectorEraseStatus);

    cartridge.tick(1000 + SECTOR_ERASE_TIMEOUT_CYCLES);
    assert_eq!(cartridge.chips()[0].read_mode(), ReadMode::Normal);
    assert_eq!(cartridge.next_event_cycle(), None);
    assert_eq!(cartridge.read_window(0x8000), 0xFF);
}

#[test]
fn cold_reset_cancels_pending_timeouts() {
    let (mut cartridge, mut memory) = new_cartridge(CartridgeType::Mega512);
    let image_before = cartridge.image().to_vec();

    write_sequence(&mut cartridge, &[(0x8555, 0xAA), (0x82AA, 0x55), (0x8555, 0x90)]);
    assert_eq!(cartridge.chips()[0].read_mode(), ReadMode::Autoselect);
    assert_eq!(cartridge.read_window(0x8000), 0x01);
    assert_eq!(cartridge.read_window(0x8001), 0xA4);

    cartridge.cold_reset(&mut memory);
    let calls_once = memory.take();
    cartridge.cold_reset(&mut memory);
    assert_eq!(memory.take(), calls_once);

    assert_eq!(cartridge.chips()[0].read_mode(), ReadMode::Normal);
    assert_eq!(cartridge.image(), image_before.as_slice());
}

#[test]
fn unchanged_bank_select_makes_no_memory_calls() {
    let cases: &[(CartridgeType, u16, u8)] = &[
        (CartridgeType::Mega256, 0xD500, 0x00),
        (CartridgeType::Mega4096, 0xD500, 254),
        (CartridgeType::Sic512, 0xD500, 0x00),
        (CartridgeType::SicPlus1024, 0xD53F, 0x00),
        (CartridgeType::AtMax128, 0xD500, 0x00),
        (CartridgeType::AtMaxOld1024, 0xD57F, 0x00),
        (CartridgeType::JaCart512, 0xD500, 0x00),
        (CartridgeType::DCart, 0xD500, 0x00),
        (CartridgeType::TheCart32M, 0xD5A0, 0x00),
        (CartridgeType::TheCart32M, 0xD5A2, 0x01),
    ];

    for &(cartridge_type, address, value) in cases {
        let (mut cartridge, mut memory) = new_cartridge(cartridge_type);
        memory.take();

        cartridge.write_control(address, value, &mut memory);
        assert_eq!(memory.take(), vec![], "{cartridge_type} {address:04X} {value:02X}");
    }
}

#[test]
fn megacart_rom_disable_and_masking() {
    let (mut cartridge, mut memory) = new_cartridge(CartridgeType::Mega256);
    let image = patterned_image(CartridgeType::Mega256);
    memory.take();

    // 16 banks; upper bits below bit 7 are ignored
    cartridge.write_control(0xD512, 0x13, &mut memory);
    assert_eq!(
        memory.take(),
        vec![
            MemoryCall::Cart809f(true),
            MemoryCall::A0bf(true),
            MemoryCall::CopyFromCart { start: 0x8000, end: 0xBFFF, first: Some(image[3 * 0x4000]) },
        ]
    );
    assert_eq!(cartridge.read_window(0x8100), image[3 * 0x4000 + 0x100]);
    assert_eq!(cartridge.read_control(0xD500, &mut memory), 0xFF);

    cartridge.write_control(0xD500, 0x80, &mut memory);
    assert_eq!(memory.take(), vec![MemoryCall::Cart809f(false), MemoryCall::A0bf(false)]);
    assert_eq!(cartridge.read_window(0x8100), 0xFF);

    // ROM writes never reach the image
    cartridge.write_control(0xD500, 0x00, &mut memory);
    cartridge.write_window(0x8000, 0x00);
    assert_eq!(cartridge.image()[0], image[0]);
}

#[test]
fn mega4096_power_on_bank_and_disable() {
    let (mut cartridge, mut memory) = new_cartridge(CartridgeType::Mega4096);
    let image = patterned_image(CartridgeType::Mega4096);

    assert_eq!(cartridge.read_control(0xD500, &mut memory), 254);
    assert_eq!(cartridge.read_window(0x8000), image[254 * 0x4000]);

    // Bit 7 alone does not disable the 4MB cartridge
    cartridge.write_control(0xD500, 0x80, &mut memory);
    assert_eq!(cartridge.read_window(0x8000), image[0x80 * 0x4000]);

    memory.take();
    cartridge.write_control(0xD500, 0xFF, &mut memory);
    assert_eq!(memory.take(), vec![MemoryCall::Cart809f(false), MemoryCall::A0bf(false)]);
    assert_eq!(cartridge.read_control(0xD500, &mut memory), 0xFF);
}

#[test]
fn sic_window_enables() {
    let (mut cartridge, mut memory) = new_cartridge(CartridgeType::Sic512);
    let image = patterned_image(CartridgeType::Sic512);

    // Power on: $8000 disabled, $A000 showing the upper half of bank 0
    assert_eq!(
        memory.take(),
        vec![
            MemoryCall::Cart809f(false),
            MemoryCall::A0bf(true),
            MemoryCall::FlashRoutines(WindowHooks::Flash),
            MemoryCall::SetFlash(0xA000, 0xBFFF),
            MemoryCall::CopyFromCart { start: 0xA000, end: 0xBFFF, first: Some(image[0x2000]) },
        ]
    );

    // Bank 2, both halves, writes enabled
    cartridge.write_control(0xD510, 0xA2, &mut memory);
    assert_eq!(cartridge.read_control(0xD51F, &mut memory), 0xA2);
    assert_eq!(cartridge.read_control(0xD520, &mut memory), 0xFF);
    assert_eq!(
        memory.take(),
        vec![
            MemoryCall::Cart809f(true),
            MemoryCall::FlashRoutines(WindowHooks::Flash),
            MemoryCall::SetFlash(0x8000, 0x9FFF),
            MemoryCall::CopyFromCart {
                start: 0x8000,
                end: 0x9FFF,
                first: Some(image[2 * 0x4000])
            },
            MemoryCall::A0bf(true),
            MemoryCall::FlashRoutines(WindowHooks::Flash),
            MemoryCall::SetFlash(0xA000, 0xBFFF),
            MemoryCall::CopyFromCart {
                start: 0xA000,
                end: 0xBFFF,
                first: Some(image[2 * 0x4000 + 0x2000])
            },
        ]
    );
    assert_eq!(cartridge.read_window(0x9000), image[2 * 0x4000 + 0x1000]);

    // Register writes outside $D500-$D51F are ignored
    cartridge.write_control(0xD520, 0x00, &mut memory);
    assert!(memory.take().is_empty());

    // $A000 disabled
    cartridge.write_control(0xD500, 0x62, &mut memory);
    assert!(memory.take().contains(&MemoryCall::A0bf(false)));
}

#[test]
fn sic_flash_writes_require_enable_bit() {
    let (mut cartridge, mut memory) = new_cartridge(CartridgeType::Sic128);
    let unlock_and_program = [(0x8555, 0xAA), (0x82AA, 0x55), (0x8555, 0xA0), (0x8010, 0x00)];

    cartridge.write_control(0xD500, 0x20, &mut memory);
    write_sequence(&mut cartridge, &unlock_and_program);
    assert!(!cartridge.is_dirty());

    cartridge.write_control(0xD500, 0xA0, &mut memory);
    write_sequence(&mut cartridge, &unlock_and_program);
    assert!(cartridge.is_dirty());
    assert_eq!(cartridge.image()[0x10], 0x00);
}

#[test]
fn sic_write_enable_toggle_keeps_mapping() {
    let (mut cartridge, mut memory) = new_cartridge(CartridgeType::Sic256);
    let image = patterned_image(CartridgeType::Sic256);

    cartridge.write_control(0xD500, 0x23, &mut memory);
    assert!(!memory.take().is_empty());

    // Only the write enable bit changes; the register still reads back the new value
    cartridge.write_control(0xD500, 0xA3, &mut memory);
    assert_eq!(memory.take(), vec![]);
    assert_eq!(cartridge.read_control(0xD500, &mut memory), 0xA3);
    assert_eq!(cartridge.read_window(0x8000), image[3 * 0x4000]);

    // Bank bits above the chip size don't change the windows either
    cartridge.write_control(0xD500, 0xB3, &mut memory);
    assert_eq!(memory.take(), vec![]);

    cartridge.write_control(0xD500, 0xB4, &mut memory);
    assert!(memory.take().contains(&MemoryCall::CopyFromCart {
        start: 0x8000,
        end: 0x9FFF,
        first: Some(image[4 * 0x4000])
    }));
}

#[test]
fn sic_plus_chip_select_remaps() {
    let (mut cartridge, mut memory) = new_cartridge(CartridgeType::SicPlus1024);
    let image = patterned_image(CartridgeType::SicPlus1024);
    memory.take();

    cartridge.write_control(0xD500, 0x80, &mut memory);
    assert!(memory.take().contains(&MemoryCall::CopyFromCart {
        start: 0xA000,
        end: 0xBFFF,
        first: Some(image[0x80000 + 0x2000])
    }));
}

#[test]
fn sic_plus_selects_chip_with_bit_7() {
    let (mut cartridge, mut memory) = new_cartridge(CartridgeType::SicPlus1024);
    let image = patterned_image(CartridgeType::SicPlus1024);

    cartridge.write_control(0xD53F, 0xA1, &mut memory);
    assert_eq!(cartridge.read_control(0xD530, &mut memory), 0xA1);
    assert_eq!(cartridge.read_window(0x8000), image[0x80000 + 0x4000]);
    assert_eq!(cartridge.read_window(0xA000), image[0x80000 + 0x6000]);

    // Program the second chip
    write_sequence(
        &mut cartridge,
        &[(0x8555, 0xAA), (0x82AA, 0x55), (0x8555, 0xA0), (0x8000, 0x00)],
    );
    assert_eq!(cartridge.image()[0x80000 + 0x4000], 0x00);
    assert_eq!(cartridge.image()[0x4000], image[0x4000]);
    assert!(cartridge.chips()[1].is_dirty());
    assert!(!cartridge.chips()[0].is_dirty());
}

#[test]
fn atmax128_banking_by_address() {
    let (mut cartridge, mut memory) = new_cartridge(CartridgeType::AtMax128);
    let image = patterned_image(CartridgeType::AtMax128);

    // Reads select banks too
    assert_eq!(cartridge.read_control(0xD507, &mut memory), 0xFF);
    assert_eq!(cartridge.read_window(0xA000), image[7 * 0x2000]);

    cartridge.write_control(0xD515, 0x00, &mut memory);
    assert_eq!(cartridge.read_window(0xA000), 0xFF);
    assert!(memory.take().contains(&MemoryCall::A0bf(false)));

    // $D520 and above are ignored
    cartridge.write_control(0xD520, 0x00, &mut memory);
    assert!(memory.take().is_empty());

    cartridge.write_control(0xD50F, 0x00, &mut memory);
    assert_eq!(cartridge.read_window(0xBFFF), image[15 * 0x2000 + 0x1FFF]);
}

#[test]
fn atmax_old_1024_two_chips() {
    let (mut cartridge, mut memory) = new_cartridge(CartridgeType::AtMaxOld1024);
    let image = patterned_image(CartridgeType::AtMaxOld1024);

    // Powers up at the last bank, in the second chip
    assert_eq!(cartridge.read_window(0xA000), image[127 * 0x2000]);

    cartridge.write_control(0xD540, 0x00, &mut memory);
    assert_eq!(cartridge.read_window(0xA123), image[0x40 * 0x2000 + 0x123]);

    cartridge.write_control(0xD580, 0x00, &mut memory);
    assert_eq!(cartridge.read_window(0xA123), 0xFF);

    // Autoselect on the second chip only
    cartridge.write_control(0xD540, 0x00, &mut memory);
    write_sequence(&mut cartridge, &[(0xA555, 0xAA), (0xA2AA, 0x55), (0xA555, 0x90)]);
    assert_eq!(cartridge.chips()[1].read_mode(), ReadMode::Autoselect);
    assert_eq!(cartridge.chips()[0].read_mode(), ReadMode::Normal);
    assert_eq!(cartridge.read_window(0xA001), 0xA4);
}

#[test]
fn dcart_control_read_window() {
    let (mut cartridge, mut memory) = new_cartridge(CartridgeType::DCart);
    let image = patterned_image(CartridgeType::DCart);

    cartridge.write_control(0xD505, 0x00, &mut memory);
    assert_eq!(cartridge.read_window(0xA000), image[5 * 0x2000]);
    assert_eq!(cartridge.read_control(0xD542, &mut memory), image[5 * 0x2000 + 0x1500 + 0x42]);

    // Disabling the window keeps the control read window on the last selected bank
    cartridge.write_control(0xD585, 0x00, &mut memory);
    assert_eq!(cartridge.read_window(0xA000), 0xFF);
    assert_eq!(cartridge.read_control(0xD510, &mut memory), image[5 * 0x2000 + 0x1510]);
}

#[test]
fn jacart_masks_bank() {
    let (mut cartridge, mut memory) = new_cartridge(CartridgeType::JaCart256);
    let image = patterned_image(CartridgeType::JaCart256);

    cartridge.write_control(0xD53F, 0x00, &mut memory);
    assert_eq!(cartridge.read_window(0xA000), image[0x1F * 0x2000]);
}

fn thecart() -> (Cartridge, RecordingMemoryMap) {
    let mut memory = RecordingMemoryMap::default();
    let mut cartridge = Cartridge::blank(CartridgeType::TheCart32M);
    cartridge.cold_reset(&mut memory);
    (cartridge, memory)
}

#[test]
fn thecart_power_on_state() {
    let (mut cartridge, mut memory) = thecart();

    assert_eq!(
        memory.take(),
        vec![
            MemoryCall::A0bf(true),
            MemoryCall::FlashRoutines(WindowHooks::Flash),
            MemoryCall::SetFlash(0xA000, 0xBFFF),
            MemoryCall::CopyFromCart { start: 0xA000, end: 0xBFFF, first: Some(0xFF) },
            MemoryCall::Cart809f(false),
        ]
    );

    let registers: Vec<u8> =
        (0xD5A0..=0xD5A8).map(|address| cartridge.read_control(address, &mut memory)).collect();
    assert_eq!(registers, vec![0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x82]);
    assert_eq!(cartridge.read_control(0xD5AA, &mut memory), 0xFF);
}

#[test]
fn thecart_register_masks_and_lock() {
    let (mut cartridge, mut memory) = thecart();

    cartridge.write_control(0xD5A1, 0xFF, &mut memory);
    assert_eq!(cartridge.read_control(0xD5A1, &mut memory), 0x3F);
    cartridge.write_control(0xD5A7, 0xFF, &mut memory);
    assert_eq!(cartridge.read_control(0xD5A7, &mut memory), 0x0F);

    cartridge.write_control(0xD5AF, 0x00, &mut memory);
    memory.take();

    // Locked registers read as $FF and ignore writes
    assert_eq!(cartridge.read_control(0xD5A1, &mut memory), 0xFF);
    cartridge.write_control(0xD5A0, 0x12, &mut memory);
    assert!(memory.take().is_empty());

    // Cold reset unlocks
    cartridge.cold_reset(&mut memory);
    assert_eq!(cartridge.read_control(0xD5A1, &mut memory), 0x00);
}

#[test]
fn thecart_bank_write_enables_window() {
    let (mut cartridge, mut memory) = thecart();

    cartridge.write_control(0xD5A2, 0x00, &mut memory);
    assert_eq!(cartridge.read_window(0xA000), 0xFF);
    assert!(memory.take().contains(&MemoryCall::A0bf(false)));

    // Writing the bank register re-enables the primary window even with an unchanged value
    cartridge.write_control(0xD5A0, 0x00, &mut memory);
    assert_eq!(cartridge.read_control(0xD5A2, &mut memory), 0x01);
    assert!(memory.take().contains(&MemoryCall::A0bf(true)));
}

#[test]
fn thecart_ram_banks_respect_write_enable() {
    let (mut cartridge, mut memory) = thecart();

    // Flexi mode, primary bank 3 from RAM (write protected), secondary bank 3 from RAM
    cartridge.write_control(0xD5A6, 0x20, &mut memory);
    cartridge.write_control(0xD5A0, 0x03, &mut memory);
    cartridge.write_control(0xD5A3, 0x03, &mut memory);
    memory.take();
    cartridge.write_control(0xD5A7, 0x0A, &mut memory);
    assert_eq!(
        memory.take(),
        vec![
            MemoryCall::A0bf(true),
            MemoryCall::FlashRoutines(WindowHooks::CartRam),
            MemoryCall::SetFlash(0xA000, 0xBFFF),
            MemoryCall::Cart809f(true),
            MemoryCall::FlashRoutines(WindowHooks::CartRam),
            MemoryCall::SetFlash(0x8000, 0x9FFF),
        ]
    );

    cartridge.write_window(0xA010, 0x5A);
    assert_eq!(cartridge.read_window(0xA010), 0x00);

    // Secondary write enable
    cartridge.write_control(0xD5A7, 0x0E, &mut memory);
    cartridge.write_window(0x8010, 0x5A);
    assert_eq!(cartridge.read_window(0x8010), 0x5A);
    // Both windows see the same RAM bank
    assert_eq!(cartridge.read_window(0xA010), 0x5A);
    assert!(!cartridge.is_dirty());
}

#[test]
fn thecart_flash_write_protect() {
    let (mut cartridge, mut memory) = thecart();
    let program = [(0xAAAA, 0xAA), (0xA555, 0x55), (0xAAAA, 0xA0), (0xA000, 0x12)];

    write_sequence(&mut cartridge, &program);
    assert!(!cartridge.is_dirty());

    cartridge.write_control(0xD5A7, 0x01, &mut memory);
    write_sequence(&mut cartridge, &program);
    assert!(cartridge.is_dirty());
    assert_eq!(cartridge.image()[0], 0x12);
}

#[test]
fn thecart_atarimax_emulation() {
    let (mut cartridge, mut memory) = thecart();

    cartridge.write_control(0xD5A6, 0x02, &mut memory);
    memory.take();

    // Bank select by address, the value is ignored; reads also switch banks
    cartridge.write_control(0xD505, 0xFF, &mut memory);
    assert_eq!(cartridge.read_control(0xD5A0, &mut memory), 0x05);
    assert_eq!(cartridge.read_control(0xD510, &mut memory), 0xFF);
    assert_eq!(cartridge.read_control(0xD5A2, &mut memory), 0x00);
    assert_eq!(cartridge.read_window(0xA000), 0xFF);

    // $D51x disables and clears the low bank bits
    assert_eq!(cartridge.read_control(0xD5A0, &mut memory), 0x00);
    assert!(memory.take().contains(&MemoryCall::A0bf(false)));
}

#[test]
fn thecart_sixteen_k_mega_mode() {
    let mut cartridge = Cartridge::blank(CartridgeType::TheCart32M);
    let mut memory = RecordingMemoryMap::default();
    cartridge.cold_reset(&mut memory);

    // 64K MegaCart emulation: bank mask $06
    cartridge.write_control(0xD5A6, 0x2A, &mut memory);
    memory.take();

    cartridge.write_control(0xD500, 0x02, &mut memory);
    assert_eq!(cartridge.read_control(0xD5A0, &mut memory), 0x04);
    assert_eq!(
        memory.take(),
        vec![
            MemoryCall::A0bf(true),
            MemoryCall::FlashRoutines(WindowHooks::Flash),
            MemoryCall::SetFlash(0xA000, 0xBFFF),
            MemoryCall::CopyFromCart { start: 0xA000, end: 0xBFFF, first: Some(0xFF) },
            MemoryCall::Cart809f(true),
            MemoryCall::FlashRoutines(WindowHooks::Flash),
            MemoryCall::SetFlash(0x8000, 0x9FFF),
            MemoryCall::CopyFromCart { start: 0x8000, end: 0x9FFF, first: Some(0xFF) },
        ]
    );

    cartridge.write_control(0xD500, 0x82, &mut memory);
    assert_eq!(memory.take(), vec![MemoryCall::A0bf(false), MemoryCall::Cart809f(false)]);
}

#[test]
fn thecart_sic_mode_readback() {
    let (mut cartridge, mut memory) = thecart();

    cartridge.write_control(0xD5A6, 0x24, &mut memory);
    assert_eq!(cartridge.read_control(0xD500, &mut memory), 0x00);

    cartridge.write_control(0xD500, 0x23, &mut memory);
    assert_eq!(cartridge.read_control(0xD510, &mut memory), 0x23);
    assert_eq!(cartridge.read_control(0xD5A0, &mut memory), 0x06);

    cartridge.write_control(0xD500, 0x45, &mut memory);
    assert_eq!(cartridge.read_control(0xD500, &mut memory), 0x45);
    memory.take();
    cartridge.write_control(0xD500, 0x45, &mut memory);
    assert!(memory.take().is_empty());
}

#[test]
fn thecart_oss_split_banks() {
    let mut image = vec![0xFF; CartridgeType::TheCart32M.size_bytes()];
    for (i, chunk) in image[..0x8000].chunks_mut(0x1000).enumerate() {
        chunk.fill(i as u8);
    }
    let mut memory = RecordingMemoryMap::default();
    let mut cartridge = Cartridge::create(CartridgeType::TheCart32M, image).unwrap();
    cartridge.cold_reset(&mut memory);

    cartridge.write_control(0xD5A6, 0x04, &mut memory);
    cartridge.write_control(0xD5A0, 0x01, &mut memory);

    // Fixed 4K at $B000 from the primary bank's first half
    assert_eq!(cartridge.read_window(0xB000), 2);

    // $D500 selects the 4K bank 1 of the pair
    cartridge.write_control(0xD500, 0x00, &mut memory);
    assert_eq!(cartridge.read_window(0xA000), 1);

    cartridge.write_control(0xD509, 0x00, &mut memory);
    assert_eq!(cartridge.read_window(0xA000), 2);

    memory.take();
    cartridge.write_control(0xD501, 0x00, &mut memory);
    assert_eq!(cartridge.read_window(0xA000), 3);
    assert_eq!(
        memory.take(),
        vec![
            MemoryCall::A0bf(true),
            MemoryCall::FlashRoutines(WindowHooks::Flash),
            MemoryCall::SetFlash(0xB000, 0xBFFF),
            MemoryCall::CopyFromCart { start: 0xB000, end: 0xBFFF, first: Some(2) },
            MemoryCall::Cart809f(false),
            MemoryCall::FlashRoutines(WindowHooks::Flash),
            MemoryCall::SetFlash(0xA000, 0xAFFF),
            MemoryCall::CopyFromCart { start: 0xA000, end: 0xAFFF, first: Some(3) },
        ]
    );
}

#[test]
fn thecart_unsupported_mode_disables() {
    let (mut cartridge, mut memory) = thecart();
    memory.take();

    cartridge.write_control(0xD5A6, 0x3F, &mut memory);
    assert_eq!(memory.take(), vec![MemoryCall::A0bf(false), MemoryCall::Cart809f(false)]);
    assert_eq!(cartridge.read_window(0xA000), 0xFF);
}

fn eeprom_send_byte(cartridge: &mut Cartridge, memory: &mut RecordingMemoryMap, byte: u8) {
    for i in (0..8).rev() {
        let data = if byte & (1 << i) != 0 { 0x80 } else { 0x00 };
        cartridge.write_control(0xD5A8, data, memory);
        cartridge.write_control(0xD5A8, data | 0x01, memory);
        cartridge.write_control(0xD5A8, data, memory);
    }
}

fn eeprom_receive_byte(cartridge: &mut Cartridge, memory: &mut RecordingMemoryMap) -> u8 {
    let mut byte = 0;
    for _ in 0..8 {
        byte = (byte << 1) | (cartridge.read_control(0xD5A8, memory) >> 7);
        cartridge.write_control(0xD5A8, 0x01, memory);
        cartridge.write_control(0xD5A8, 0x00, memory);
    }
    byte
}

#[test]
fn thecart_eeprom_through_registers() {
    let (mut cartridge, mut memory) = thecart();
    memory.take();

    // Chip select is active low
    eeprom_send_byte(&mut cartridge, &mut memory, 0x06);
    cartridge.write_control(0xD5A8, 0x82, &mut memory);
    eeprom_send_byte(&mut cartridge, &mut memory, 0x05);
    assert_eq!(eeprom_receive_byte(&mut cartridge, &mut memory), 0x02);
    cartridge.write_control(0xD5A8, 0x82, &mut memory);

    // Status changes alone are not persisted
    let mut save_writer = MemorySaveWriter::new();
    cartridge.persist_nvram(&mut save_writer).unwrap();
    assert!(save_writer.get("eep").is_none());

    assert!(memory.take().is_empty());
}

#[test]
fn thecart_persists_eeprom_writes() {
    let (mut cartridge, mut memory) = thecart();

    for byte in [0x02, 0x10, 0x99] {
        eeprom_send_byte(&mut cartridge, &mut memory, byte);
    }
    cartridge.write_control(0xD5A8, 0x82, &mut memory);

    let mut save_writer = MemorySaveWriter::new();
    cartridge.persist_nvram(&mut save_writer).unwrap();
    assert_eq!(save_writer.get("eep").map(|bytes| bytes[0x10]), Some(0x99));

    let mut reloaded = Cartridge::blank(CartridgeType::TheCart32M);
    reloaded.load_nvram(&mut save_writer);
    reloaded.cold_reset(&mut memory);

    eeprom_send_byte(&mut reloaded, &mut memory, 0x03);
    eeprom_send_byte(&mut reloaded, &mut memory, 0x10);
    assert_eq!(eeprom_receive_byte(&mut reloaded, &mut memory), 0x99);
}

#[test]
fn non_thecart_nvram_is_noop() {
    let (mut cartridge, _memory) = new_cartridge(CartridgeType::Sic256);
    let mut save_writer = MemorySaveWriter::new();

    cartridge.load_nvram(&mut save_writer);
    cartridge.persist_nvram(&mut save_writer).unwrap();
    assert!(save_writer.get("eep").is_none());
}

#[test]
fn cartridge_state_round_trips_through_bincode() {
    let (mut cartridge, mut memory) = new_cartridge(CartridgeType::Sic256);
    cartridge.write_control(0xD500, 0x25, &mut memory);
    write_sequence(&mut cartridge, &[(0x8555, 0xAA), (0x82AA, 0x55), (0x8555, 0x90)]);

    let config = bincode::config::standard();
    let bytes = bincode::encode_to_vec(&cartridge, config).unwrap();
    let (decoded, _): (Cartridge, _) = bincode::decode_from_slice(&bytes, config).unwrap();

    assert_eq!(decoded.chips()[0].read_mode(), ReadMode::Autoselect);
    assert_eq!(decoded.image(), cartridge.image());
}
