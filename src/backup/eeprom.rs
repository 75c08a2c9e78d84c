//! Serial EEPROM save chips, 512 bytes (6 bit addressing) or 8KiB (14 bit addressing).
//! The EEPROM is a bit-serial device: every access to its window moves a single bit in or out through bit 0.
//! Commands are streamed MSB first:
//!   Read request:  0b11, address, a 0 stop bit. The following 68 reads return 4 junk bits then 64 data bits.
//!   Write request: 0b10, address, 64 data bits, a 0 stop bit.
//! Addresses are in units of 8 byte blocks. While idle (or "ready" after a write) reads return 1.

use serde::{Deserialize, Serialize};

const READ_PREAMBLE_BITS: u32 = 4;
const BLOCK_BITS: u32 = 64;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
enum State {
    Idle,
    Command { value: u8, bits: u32 },
    Address { write: bool, value: u32, bits: u32 },
    Data { block: usize, value: u64, bits: u32 },
    ReadStop { block: usize },
    WriteStop,
    Reading { block: usize, bit: u32 },
}

#[derive(Clone, Deserialize, Serialize)]
pub struct Eeprom {
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
    state: State,
}

impl Eeprom {
    pub fn new(size: usize) -> Eeprom {
        Eeprom {
            data: vec![0xFF; size],
            state: State::Idle,
        }
    }

    pub fn reset(&mut self) {
        self.state = State::Idle;
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn address_bits(&self) -> u32 {
        if self.data.len() > 512 {
            14
        } else {
            6
        }
    }

    fn block_mask(&self) -> usize {
        (self.data.len() / 8).saturating_sub(1)
    }

    pub fn write_bit(&mut self, bit: u16) {
        let bit = bit & 1;
        self.state = match self.state {
            State::Idle | State::Reading { .. } => State::Command { value: bit as u8, bits: 1 },
            State::Command { value, .. } => match (value << 1) | bit as u8 {
                0b11 => State::Address { write: false, value: 0, bits: 0 },
                0b10 => State::Address { write: true, value: 0, bits: 0 },
                _ => State::Idle,
            },
            State::Address { write, value, bits } => {
                let value = (value << 1) | u32::from(bit);
                if bits + 1 < self.address_bits() {
                    State::Address { write, value, bits: bits + 1 }
                } else {
                    let block = value as usize & self.block_mask();
                    if write {
                        State::Data { block, value: 0, bits: 0 }
                    } else {
                        State::ReadStop { block }
                    }
                }
            }
            State::Data { block, value, bits } => {
                let value = (value << 1) | u64::from(bit);
                if bits + 1 < BLOCK_BITS {
                    State::Data { block, value, bits: bits + 1 }
                } else {
                    // The data (and the block, if the state came from a snapshot) isn't trusted to be in range.
                    if let Some(dest) = self.data.get_mut(block * 8..block * 8 + 8) {
                        dest.copy_from_slice(&value.to_be_bytes());
                    }
                    State::WriteStop
                }
            }
            State::ReadStop { block } => State::Reading { block, bit: 0 },
            State::WriteStop => State::Idle,
        };
    }

    pub fn read_bit(&mut self) -> u16 {
        match self.state {
            State::Reading { block, bit } => {
                let out = if bit < READ_PREAMBLE_BITS {
                    0
                } else {
                    let n = bit - READ_PREAMBLE_BITS;
                    let byte = self.data.get(block * 8 + (n / 8) as usize).copied().unwrap_or(0xFF);
                    u16::from((byte >> (7 - n % 8)) & 1)
                };
                self.state = if bit + 1 < READ_PREAMBLE_BITS + BLOCK_BITS {
                    State::Reading { block, bit: bit + 1 }
                } else {
                    State::Idle
                };
                out
            }
            _ => 1,
        }
    }
}
