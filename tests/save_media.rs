mod common;

use common::*;
use oxidegba::cpu::Bus;
use oxidegba::{SaveDataError, SaveType};

#[test]
fn detection() {
    let cases: &[(&[u8], SaveType)] = &[
        (b"EEPROM_V124", SaveType::Eeprom512),
        (b"FLASH1M_V103", SaveType::Flash128K),
        (b"FLASH_V126", SaveType::Flash128K),
        (b"FLASH512_V131", SaveType::Flash64K),
        (b"SRAM_V113", SaveType::Sram),
        (b"NOTHING_HERE", SaveType::None),
    ];
    for &(marker, kind) in cases {
        let gba = boot(with_marker(cartridge(&[SPIN]), marker));
        assert_eq!(gba.cart.save.kind(), kind, "{}", String::from_utf8_lossy(marker));
        assert_eq!(gba.save_data().map(|d| d.len()).unwrap_or(0), kind.size());
    }
}

#[test]
fn eeprom_capacity_follows_rom_size() {
    let mut rom = with_marker(cartridge(&[SPIN]), b"EEPROM_V124");
    rom.resize(9 * 1024 * 1024, 0);
    let gba = boot(rom);
    assert_eq!(gba.cart.save.kind(), SaveType::Eeprom8K);
    assert_eq!(gba.save_data().unwrap().len(), 8 * 1024);
}

#[test]
fn sram_through_the_bus() {
    let mut gba = boot(with_marker(cartridge(&[SPIN]), b"SRAM_V113"));
    {
        let (_, mut bus) = gba.bus();
        bus.write8(0x0E00_0010, 0x5A);
        // The save chips have an 8 bit bus, so wider writes only store one byte.
        bus.write16(0x0E00_0020, 0x1234);
        assert_eq!(bus.read8(0x0E00_0010), 0x5A);
        assert_eq!(bus.read16(0x0E00_0010), 0x5A5A);
        assert_eq!(bus.read32(0x0E00_0010), 0x5A5A_5A5A);
    }
    let data = gba.save_data().unwrap();
    assert_eq!(data[0x10], 0x5A);
    assert_eq!(data[0x20], 0x34);
}

#[test]
fn flash_identifies_itself() {
    let mut gba = boot(with_marker(cartridge(&[SPIN]), b"FLASH1M_V103"));
    let (_, mut bus) = gba.bus();
    bus.write8(0x0E00_5555, 0xAA);
    bus.write8(0x0E00_2AAA, 0x55);
    bus.write8(0x0E00_5555, 0x90);
    assert_eq!(bus.read8(0x0E00_0000), 0xC2);
    assert_eq!(bus.read8(0x0E00_0001), 0x09);

    bus.write8(0x0E00_5555, 0xAA);
    bus.write8(0x0E00_2AAA, 0x55);
    bus.write8(0x0E00_5555, 0xF0);
    assert_eq!(bus.read8(0x0E00_0000), 0xFF);
}

#[test]
fn flash_program_only_clears_bits() {
    let mut gba = boot(with_marker(cartridge(&[SPIN]), b"FLASH512_V131"));
    {
        let (_, mut bus) = gba.bus();
        for &v in [0xF0u8, 0x3C].iter() {
            bus.write8(0x0E00_5555, 0xAA);
            bus.write8(0x0E00_2AAA, 0x55);
            bus.write8(0x0E00_5555, 0xA0);
            bus.write8(0x0E00_0100, v);
        }
    }
    assert_eq!(gba.save_data().unwrap()[0x100], 0x30);
}

#[test]
fn save_data_import() {
    let mut gba = boot(with_marker(cartridge(&[SPIN]), b"SRAM_V113"));
    gba.load_save_data(&[1, 2, 3]).unwrap();
    let data = gba.save_data().unwrap();
    assert_eq!(&data[..4], &[1, 2, 3, 0]);

    let mut gba = boot(with_marker(cartridge(&[SPIN]), b"FLASH_V126"));
    gba.load_save_data(&vec![0x11; 256 * 1024]).unwrap();
    assert_eq!(gba.save_data().unwrap().len(), 128 * 1024);
    gba.load_save_data(&[0x22]).unwrap();
    assert_eq!(&gba.save_data().unwrap()[..2], &[0x22, 0xFF]);

    let mut gba = boot(cartridge(&[SPIN]));
    assert_eq!(gba.load_save_data(&[0]), Err(SaveDataError::NoSaveMedium));
    assert!(gba.save_data().is_none());
}

#[test]
fn eeprom_is_mapped_into_rom_space() {
    let mut gba = boot(with_marker(cartridge(&[SPIN]), b"EEPROM_V124"));
    let (_, mut bus) = gba.bus();
    // Idle EEPROM reads back ready.
    assert_eq!(bus.read16(0x0D00_0000) & 1, 1);
    // ROM below the EEPROM window is untouched.
    assert_eq!(bus.read32(0x0800_00A0), u32::from_le_bytes(*b"TEST"));
}
