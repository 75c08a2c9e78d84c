//! GBA cartridges persist savegames in one of a few different kinds of chip, and there's no header field that says
//! which one a cartridge carries. Thankfully the official SDK libraries that drive these chips embed a version
//! string in the ROM ("EEPROM_V122", "FLASH1M_V103", "SRAM_V113", ...), so we sniff for those. EEPROM capacity can't
//! be sniffed at all, we guess it from the ROM size: the big 64Kbit parts only shipped on 16MB+ carts.
//! SRAM and Flash hang off the 0x0E000000 region and are 8 bits wide. EEPROM is a serial device mapped into the top
//! of the ROM space at 0x0D000000 and is accessed one bit at a time (in practice via DMA).

pub mod eeprom;
pub mod flash;

use eeprom::Eeprom;
use flash::Flash;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SRAM_SIZE: usize = 32 * 1024;
const EEPROM_LARGE_ROM_THRESHOLD: usize = 8 * 1024 * 1024;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum SaveType {
    None,
    Sram,
    Flash64K,
    Flash128K,
    Eeprom512,
    Eeprom8K,
}

#[derive(Debug, Error, PartialEq)]
pub enum SaveDataError {
    #[error("the loaded cartridge has no save medium")]
    NoSaveMedium,
}

impl SaveType {
    /// Figure out the save chip by scanning the first 0x200 bytes of the ROM for the SDK's library markers.
    pub fn detect(rom: &[u8]) -> SaveType {
        let header = &rom[..rom.len().min(0x200)];
        let has = |marker: &[u8]| header.windows(marker.len()).any(|w| w == marker);

        if has(b"EEPROM_V") {
            if rom.len() > EEPROM_LARGE_ROM_THRESHOLD {
                SaveType::Eeprom8K
            } else {
                SaveType::Eeprom512
            }
        } else if has(b"FLASH1M_V") || has(b"FLASH_V") {
            SaveType::Flash128K
        } else if has(b"FLASH512_V") || has(b"FLASH_512") {
            SaveType::Flash64K
        } else if has(b"SRAM_V") {
            SaveType::Sram
        } else {
            SaveType::None
        }
    }

    pub fn size(self) -> usize {
        match self {
            SaveType::None => 0,
            SaveType::Sram => SRAM_SIZE,
            SaveType::Flash64K => 64 * 1024,
            SaveType::Flash128K => 128 * 1024,
            SaveType::Eeprom512 => 512,
            SaveType::Eeprom8K => 8 * 1024,
        }
    }
}

/// The save chip in the cartridge, along with its contents.
#[derive(Clone, Deserialize, Serialize)]
pub enum SaveMedium {
    None,
    Sram(#[serde(with = "serde_bytes")] Vec<u8>),
    Flash(Flash),
    Eeprom(Eeprom),
}

impl Default for SaveMedium {
    fn default() -> SaveMedium {
        SaveMedium::None
    }
}

impl SaveMedium {
    pub fn new(kind: SaveType) -> SaveMedium {
        match kind {
            SaveType::None => SaveMedium::None,
            SaveType::Sram => SaveMedium::Sram(vec![0; SRAM_SIZE]),
            SaveType::Flash64K | SaveType::Flash128K => SaveMedium::Flash(Flash::new(kind.size())),
            SaveType::Eeprom512 | SaveType::Eeprom8K => SaveMedium::Eeprom(Eeprom::new(kind.size())),
        }
    }

    pub fn kind(&self) -> SaveType {
        match self {
            SaveMedium::None => SaveType::None,
            SaveMedium::Sram(_) => SaveType::Sram,
            SaveMedium::Flash(f) if f.is_large() => SaveType::Flash128K,
            SaveMedium::Flash(_) => SaveType::Flash64K,
            SaveMedium::Eeprom(e) if e.size() > 512 => SaveType::Eeprom8K,
            SaveMedium::Eeprom(_) => SaveType::Eeprom512,
        }
    }

    /// Resets any in-flight protocol state. Stored data is left alone.
    pub fn reset(&mut self) {
        match self {
            SaveMedium::Flash(f) => f.reset(),
            SaveMedium::Eeprom(e) => e.reset(),
            SaveMedium::None | SaveMedium::Sram(_) => {}
        }
    }

    pub fn is_eeprom(&self) -> bool {
        match self {
            SaveMedium::Eeprom(_) => true,
            _ => false,
        }
    }

    /// Read from the 0x0E000000 region.
    pub fn read8(&self, addr: u32) -> u8 {
        match self {
            SaveMedium::Sram(data) => data[(addr as usize) & (SRAM_SIZE - 1)],
            SaveMedium::Flash(f) => f.read(addr),
            SaveMedium::None | SaveMedium::Eeprom(_) => 0xFF,
        }
    }

    /// Write to the 0x0E000000 region.
    pub fn write8(&mut self, addr: u32, v: u8) {
        match self {
            SaveMedium::Sram(data) => data[(addr as usize) & (SRAM_SIZE - 1)] = v,
            SaveMedium::Flash(f) => f.write(addr, v),
            SaveMedium::None | SaveMedium::Eeprom(_) => {}
        }
    }

    /// Serial read from the EEPROM window. Only bit 0 is meaningful.
    pub fn eeprom_read(&mut self) -> u16 {
        match self {
            SaveMedium::Eeprom(e) => e.read_bit(),
            _ => 1,
        }
    }

    /// Serial write to the EEPROM window. Only bit 0 is meaningful.
    pub fn eeprom_write(&mut self, v: u16) {
        if let SaveMedium::Eeprom(e) = self {
            e.write_bit(v & 1);
        }
    }

    /// Raw save contents, or None if the cartridge has no save chip.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            SaveMedium::None => None,
            SaveMedium::Sram(data) => Some(data.as_slice()),
            SaveMedium::Flash(f) => Some(f.data()),
            SaveMedium::Eeprom(e) => Some(e.data()),
        }
    }

    /// Replaces the save contents with an externally persisted copy. Oversized payloads are truncated, short ones
    /// are padded with the chip's erased value.
    pub fn load(&mut self, payload: &[u8]) -> Result<(), SaveDataError> {
        let (buf, fill) = match self {
            SaveMedium::None => return Err(SaveDataError::NoSaveMedium),
            SaveMedium::Sram(data) => (&mut data[..], 0x00),
            SaveMedium::Flash(f) => (f.data_mut(), 0xFF),
            SaveMedium::Eeprom(e) => (e.data_mut(), 0xFF),
        };

        if payload.len() > buf.len() {
            warn!(
                "Save data is {} bytes but the save medium only holds {}, truncating",
                payload.len(),
                buf.len()
            );
        }
        for (i, b) in buf.iter_mut().enumerate() {
            *b = payload.get(i).copied().unwrap_or(fill);
        }
        info!("Loaded {} bytes of save data", payload.len().min(buf.len()));
        self.reset();
        Ok(())
    }
}
