//! The Game Pak. Its ROM is mapped three times over, at 0x08000000, 0x0A000000 and 0x0C000000, each mirror with its
//! own wait state settings. The save chip lives at 0x0E000000, except for EEPROM, which answers at the top of the ROM
//! space instead. The ROM data is kept in snapshots, so a snapshot is enough to resume a session on its own.

use crate::backup::{SaveMedium, SaveType};
use log::info;
use serde::{Deserialize, Serialize};

/// The largest ROM the 32MB address window can map.
pub const MAX_ROM_SIZE: usize = 32 * 1024 * 1024;

const TITLE_RANGE: std::ops::Range<usize> = 0xA0..0xAC;
const GAME_CODE_RANGE: std::ops::Range<usize> = 0xAC..0xB0;

#[derive(Clone, Default, Deserialize, Serialize)]
pub struct Cartridge {
    #[serde(with = "serde_bytes")]
    rom: Vec<u8>,
    pub title: String,
    pub game_code: String,
    pub save: SaveMedium,
}

fn header_string(rom: &[u8], range: std::ops::Range<usize>) -> Option<String> {
    rom.get(range)?
        .split(|&b| b == 0)
        .next()
        .and_then(|v| std::str::from_utf8(v).ok())
        .map(|s| s.trim_end().to_string())
        .filter(|s| !s.is_empty())
}

impl Cartridge {
    pub fn from_rom(rom: Vec<u8>) -> Cartridge {
        let title = header_string(&rom, TITLE_RANGE).unwrap_or_else(|| "UNKNOWN".to_string());
        let game_code = header_string(&rom, GAME_CODE_RANGE).unwrap_or_default();
        let kind = SaveType::detect(&rom);
        info!("Loaded \"{}\" ({}), {} bytes, save type {:?}", title, game_code, rom.len(), kind);

        Cartridge {
            rom,
            title,
            game_code,
            save: SaveMedium::new(kind),
        }
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    pub fn is_empty(&self) -> bool {
        self.rom.is_empty()
    }

    /// Whether an access to `addr` (somewhere in 0x08000000 - 0x0DFFFFFF) goes to the EEPROM. Carts with up to 16MB
    /// of ROM expose the EEPROM across the whole 0x0D region, bigger ones only in its last 256 bytes.
    pub fn is_eeprom_access(&self, addr: u32) -> bool {
        self.save.is_eeprom()
            && addr & 0x0F00_0000 == 0x0D00_0000
            && (self.rom.len() <= 0x100_0000 || addr & 0x00FF_FF00 == 0x00FF_FF00)
    }

    /// Reads a halfword of ROM. Past the end of the ROM, the bus still holds the low bits of the address that was put
    /// on it, so that's what comes back.
    pub fn read16(&self, addr: u32) -> u16 {
        let offset = (addr & 0x01FF_FFFE) as usize;
        match self.rom.get(offset..offset + 2) {
            Some(b) => u16::from(b[0]) | (u16::from(b[1]) << 8),
            None => (offset >> 1) as u16,
        }
    }

    pub fn read8(&self, addr: u32) -> u8 {
        (self.read16(addr) >> ((addr & 1) * 8)) as u8
    }

    pub fn read32(&self, addr: u32) -> u32 {
        let addr = addr & !3;
        u32::from(self.read16(addr)) | (u32::from(self.read16(addr + 2)) << 16)
    }
}
