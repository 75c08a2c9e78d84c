//! Flash save chips (Macronix/Sanyo/Panasonic parts in 64KiB and 128KiB sizes).
//! The chip reads like plain SRAM, but writing is done through JEDEC style command sequences: every command is
//! prefixed by the "unlock" writes 0xAA -> 0x5555, 0x55 -> 0x2AAA. Programming a byte can only clear bits, so data
//! must be erased (back to 0xFF) a sector or a whole chip at a time before it's rewritten. The 128KiB parts expose
//! their two 64KiB halves through a bank switch command.

use serde::{Deserialize, Serialize};

const BANK_SIZE: usize = 0x10000;
const SECTOR_SIZE: usize = 0x1000;
const MANUFACTURER_MACRONIX: u8 = 0xC2;
const DEVICE_64K: u8 = 0x1C;
const DEVICE_128K: u8 = 0x09;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
enum State {
    Ready,
    Unlock1,        // Seen 0xAA -> 0x5555
    Unlock2,        // Seen 0x55 -> 0x2AAA, expecting a command
    Erase,          // Seen the 0x80 erase command
    EraseUnlock1,   // Erase command re-unlock, seen 0xAA
    EraseUnlock2,   // Erase command re-unlock, seen 0x55
    Program,        // Next write is a data byte
    BankSwitch,     // Next write to 0x0000 selects the bank
}

#[derive(Clone, Deserialize, Serialize)]
pub struct Flash {
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
    state: State,
    id_mode: bool,
    bank: usize,
}

impl Flash {
    pub fn new(size: usize) -> Flash {
        Flash {
            data: vec![0xFF; size],
            state: State::Ready,
            id_mode: false,
            bank: 0,
        }
    }

    pub fn reset(&mut self) {
        self.state = State::Ready;
        self.id_mode = false;
        self.bank = 0;
    }

    pub fn is_large(&self) -> bool {
        self.data.len() > BANK_SIZE
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn read(&self, addr: u32) -> u8 {
        let offset = (addr & 0xFFFF) as usize;
        if self.id_mode && offset < 2 {
            return if offset == 0 {
                MANUFACTURER_MACRONIX
            } else if self.is_large() {
                DEVICE_128K
            } else {
                DEVICE_64K
            };
        }
        self.data.get(self.bank * BANK_SIZE + offset).copied().unwrap_or(0xFF)
    }

    pub fn write(&mut self, addr: u32, v: u8) {
        let offset = (addr & 0xFFFF) as usize;

        // A pending program/bank switch consumes the write as data, everything else can be aborted with 0xF0.
        match self.state {
            State::Program => {
                let idx = self.bank * BANK_SIZE + offset;
                if let Some(b) = self.data.get_mut(idx) {
                    *b &= v;
                }
                self.state = State::Ready;
                return;
            }
            State::BankSwitch => {
                if offset == 0 && self.is_large() {
                    self.bank = (v & 1) as usize;
                }
                self.state = State::Ready;
                return;
            }
            _ => {}
        }

        if v == 0xF0 {
            self.state = State::Ready;
            self.id_mode = false;
            return;
        }

        self.state = match (self.state, offset, v) {
            (State::Ready, 0x5555, 0xAA) => State::Unlock1,
            (State::Unlock1, 0x2AAA, 0x55) => State::Unlock2,
            (State::Unlock2, 0x5555, 0x90) => {
                self.id_mode = true;
                State::Ready
            }
            (State::Unlock2, 0x5555, 0x80) => State::Erase,
            (State::Unlock2, 0x5555, 0xA0) => State::Program,
            (State::Unlock2, 0x5555, 0xB0) => State::BankSwitch,
            (State::Erase, 0x5555, 0xAA) => State::EraseUnlock1,
            (State::EraseUnlock1, 0x2AAA, 0x55) => State::EraseUnlock2,
            // Some titles skip the re-unlock between 0x80 and the erase command, the chips seem to tolerate it.
            (State::Erase, _, 0x10) | (State::Erase, _, 0x30) | (State::EraseUnlock2, _, _) => {
                self.erase(offset, v);
                State::Ready
            }
            _ => State::Ready,
        };
    }

    fn erase(&mut self, offset: usize, cmd: u8) {
        match cmd {
            0x10 if offset == 0x5555 => {
                for b in self.data.iter_mut() {
                    *b = 0xFF;
                }
            }
            0x30 => {
                let start = self.bank * BANK_SIZE + (offset & 0xF000);
                let end = (start + SECTOR_SIZE).min(self.data.len());
                for b in self.data[start.min(end)..end].iter_mut() {
                    *b = 0xFF;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(flash: &mut Flash, cmd: u8) {
        flash.write(0x0E00_5555, 0xAA);
        flash.write(0x0E00_2AAA, 0x55);
        flash.write(0x0E00_5555, cmd);
    }

    fn program(flash: &mut Flash, addr: u32, v: u8) {
        command(flash, 0xA0);
        flash.write(addr, v);
    }

    #[test]
    fn fresh_chip_is_erased() {
        let flash = Flash::new(0x10000);
        assert!(flash.data().iter().all(|b| *b == 0xFF));
    }

    #[test]
    fn program_only_clears_bits() {
        let mut flash = Flash::new(0x10000);
        program(&mut flash, 0x0E00_0123, 0x0F);
        assert_eq!(flash.read(0x0E00_0123), 0x0F);
        program(&mut flash, 0x0E00_0123, 0xF1);
        assert_eq!(flash.read(0x0E00_0123), 0x01);
    }

    #[test]
    fn writes_without_unlock_are_ignored() {
        let mut flash = Flash::new(0x10000);
        flash.write(0x0E00_0010, 0x00);
        assert_eq!(flash.read(0x0E00_0010), 0xFF);
    }

    #[test]
    fn chip_erase() {
        let mut flash = Flash::new(0x20000);
        program(&mut flash, 0x0E00_0000, 0x12);
        program(&mut flash, 0x0E00_8000, 0x34);
        command(&mut flash, 0x80);
        command(&mut flash, 0x10);
        assert!(flash.data().iter().all(|b| *b == 0xFF));
    }

    #[test]
    fn sector_erase() {
        let mut flash = Flash::new(0x10000);
        program(&mut flash, 0x0E00_1010, 0x00);
        program(&mut flash, 0x0E00_2010, 0x00);
        command(&mut flash, 0x80);
        flash.write(0x0E00_5555, 0xAA);
        flash.write(0x0E00_2AAA, 0x55);
        flash.write(0x0E00_1000, 0x30);
        assert_eq!(flash.read(0x0E00_1010), 0xFF);
        assert_eq!(flash.read(0x0E00_2010), 0x00);
    }

    #[test]
    fn id_mode() {
        let mut flash = Flash::new(0x20000);
        command(&mut flash, 0x90);
        assert_eq!(flash.read(0x0E00_0000), 0xC2);
        assert_eq!(flash.read(0x0E00_0001), 0x09);
        command(&mut flash, 0xF0);
        assert_eq!(flash.read(0x0E00_0000), 0xFF);
    }

    #[test]
    fn bank_switch() {
        let mut flash = Flash::new(0x20000);
        command(&mut flash, 0xB0);
        flash.write(0x0E00_0000, 1);
        program(&mut flash, 0x0E00_0042, 0x99);
        assert_eq!(flash.data()[0x10042], 0x99);
        assert_eq!(flash.read(0x0E00_0042), 0x99);

        command(&mut flash, 0xB0);
        flash.write(0x0E00_0000, 0);
        assert_eq!(flash.read(0x0E00_0042), 0xFF);
    }

    #[test]
    fn small_chip_ignores_bank_switch() {
        let mut flash = Flash::new(0x10000);
        command(&mut flash, 0xB0);
        flash.write(0x0E00_0000, 1);
        program(&mut flash, 0x0E00_0042, 0x99);
        assert_eq!(flash.data()[0x42], 0x99);
    }
}
