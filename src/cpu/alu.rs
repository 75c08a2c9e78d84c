//! Arithmetic helpers shared by the ARM and THUMB instruction sets: flag-producing adds and subtracts, and the barrel
//! shifter.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ShiftType {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

impl ShiftType {
    pub fn from_bits(v: u32) -> ShiftType {
        match v & 3 {
            0 => ShiftType::Lsl,
            1 => ShiftType::Lsr,
            2 => ShiftType::Asr,
            _ => ShiftType::Ror,
        }
    }

    pub fn bits(self) -> u32 {
        self as u32
    }
}

impl std::fmt::Display for ShiftType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ShiftType::Lsl => write!(f, "lsl"),
            ShiftType::Lsr => write!(f, "lsr"),
            ShiftType::Asr => write!(f, "asr"),
            ShiftType::Ror => write!(f, "ror"),
        }
    }
}

/// The result of an addition or subtraction along with the C and V flags it produces.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AluResult {
    pub value: u32,
    pub carry: bool,
    pub overflow: bool,
}

/// a + b + carry.
pub fn add(a: u32, b: u32, carry: bool) -> AluResult {
    let wide = u64::from(a) + u64::from(b) + u64::from(carry);
    let value = wide as u32;
    AluResult {
        value,
        carry: wide > 0xFFFF_FFFF,
        overflow: (!(a ^ b) & (a ^ value)) & 0x8000_0000 != 0,
    }
}

/// a - b - !carry. The carry flag comes out as NOT borrow, as on ARM.
pub fn sub(a: u32, b: u32, carry: bool) -> AluResult {
    add(a, !b, carry)
}

/// Shift by an immediate amount, which has the special encodings: LSR #0 and ASR #0 mean a shift by 32, and ROR #0
/// is RRX (rotate right by one through carry).
pub fn shift_immediate(kind: ShiftType, v: u32, amount: u32, carry: bool) -> (u32, bool) {
    match (kind, amount) {
        (ShiftType::Lsl, 0) => (v, carry),
        (ShiftType::Lsr, 0) => shift_register(ShiftType::Lsr, v, 32, carry),
        (ShiftType::Asr, 0) => shift_register(ShiftType::Asr, v, 32, carry),
        (ShiftType::Ror, 0) => ((u32::from(carry) << 31) | (v >> 1), v & 1 != 0),
        _ => shift_register(kind, v, amount, carry),
    }
}

/// Shift by a register supplied amount. Only the bottom byte of the register counts, and a shift of 0 leaves both
/// the value and the carry alone.
pub fn shift_register(kind: ShiftType, v: u32, amount: u32, carry: bool) -> (u32, bool) {
    let amount = amount & 0xFF;
    if amount == 0 {
        return (v, carry);
    }
    match kind {
        ShiftType::Lsl => match amount {
            1..=31 => (v << amount, (v >> (32 - amount)) & 1 != 0),
            32 => (0, v & 1 != 0),
            _ => (0, false),
        },
        ShiftType::Lsr => match amount {
            1..=31 => (v >> amount, (v >> (amount - 1)) & 1 != 0),
            32 => (0, v & 0x8000_0000 != 0),
            _ => (0, false),
        },
        ShiftType::Asr => {
            if amount < 32 {
                (((v as i32) >> amount) as u32, ((v as i32) >> (amount - 1)) & 1 != 0)
            } else {
                let fill = ((v as i32) >> 31) as u32;
                (fill, fill & 1 != 0)
            }
        }
        ShiftType::Ror => {
            let r = amount & 31;
            if r == 0 {
                (v, v & 0x8000_0000 != 0)
            } else {
                let out = v.rotate_right(r);
                (out, out & 0x8000_0000 != 0)
            }
        }
    }
}

/// Decodes a data processing immediate: an 8 bit value rotated right by twice the rotate field. A non-zero rotation
/// also sets the shifter carry out.
pub fn rotated_immediate(imm: u8, rotate: u8, carry: bool) -> (u32, bool) {
    if rotate == 0 {
        (u32::from(imm), carry)
    } else {
        let v = u32::from(imm).rotate_right(u32::from(rotate) * 2);
        (v, v & 0x8000_0000 != 0)
    }
}

/// The number of internal cycles a multiply spends, determined by how many significant bytes the multiplier has.
pub fn multiply_cycles(rs: u32) -> u32 {
    if rs & 0xFFFF_FF00 == 0 || rs & 0xFFFF_FF00 == 0xFFFF_FF00 {
        1
    } else if rs & 0xFFFF_0000 == 0 || rs & 0xFFFF_0000 == 0xFFFF_0000 {
        2
    } else if rs & 0xFF00_0000 == 0 || rs & 0xFF00_0000 == 0xFF00_0000 {
        3
    } else {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_boundaries() {
        assert_eq!(
            add(0xFFFF_FFFF, 1, false),
            AluResult {
                value: 0,
                carry: true,
                overflow: false
            }
        );
        assert_eq!(
            add(0x7FFF_FFFF, 1, false),
            AluResult {
                value: 0x8000_0000,
                carry: false,
                overflow: true
            }
        );
        assert_eq!(
            add(0x8000_0000, 0x8000_0000, false),
            AluResult {
                value: 0,
                carry: true,
                overflow: true
            }
        );
        assert_eq!(add(0xFFFF_FFFF, 0, true).value, 0);
        assert!(add(0xFFFF_FFFF, 0, true).carry);
    }

    #[test]
    fn sub_boundaries() {
        // 0 - 1 borrows, so C is clear.
        assert_eq!(
            sub(0, 1, true),
            AluResult {
                value: 0xFFFF_FFFF,
                carry: false,
                overflow: false
            }
        );
        // Equal operands: no borrow.
        assert_eq!(
            sub(5, 5, true),
            AluResult {
                value: 0,
                carry: true,
                overflow: false
            }
        );
        assert_eq!(
            sub(0x8000_0000, 1, true),
            AluResult {
                value: 0x7FFF_FFFF,
                carry: true,
                overflow: true
            }
        );
        assert_eq!(
            sub(0x7FFF_FFFF, 0xFFFF_FFFF, true),
            AluResult {
                value: 0x8000_0000,
                carry: false,
                overflow: true
            }
        );
        // SBC with the carry clear subtracts one more.
        assert_eq!(sub(5, 5, false).value, 0xFFFF_FFFF);
    }

    #[test]
    fn immediate_shift_special_cases() {
        assert_eq!(shift_immediate(ShiftType::Lsl, 0x8000_0001, 0, true), (0x8000_0001, true));
        assert_eq!(shift_immediate(ShiftType::Lsr, 0x8000_0000, 0, false), (0, true));
        assert_eq!(shift_immediate(ShiftType::Asr, 0x8000_0000, 0, false), (0xFFFF_FFFF, true));
        assert_eq!(shift_immediate(ShiftType::Ror, 0x0000_0003, 0, true), (0x8000_0001, true));
        assert_eq!(shift_immediate(ShiftType::Lsl, 0x8000_0001, 1, false), (2, true));
    }

    #[test]
    fn register_shift_large_amounts() {
        assert_eq!(shift_register(ShiftType::Lsl, 0x1234, 0, true), (0x1234, true));
        assert_eq!(shift_register(ShiftType::Lsl, 1, 32, false), (0, true));
        assert_eq!(shift_register(ShiftType::Lsl, 1, 33, true), (0, false));
        assert_eq!(shift_register(ShiftType::Lsr, 0x8000_0000, 32, false), (0, true));
        assert_eq!(shift_register(ShiftType::Asr, 0x4000_0000, 40, true), (0, false));
        assert_eq!(shift_register(ShiftType::Ror, 0x8000_0001, 32, false), (0x8000_0001, true));
        assert_eq!(shift_register(ShiftType::Ror, 0x0000_0001, 33, false), (0x8000_0000, true));
        // Only the bottom byte of the shift register is used.
        assert_eq!(shift_register(ShiftType::Lsl, 1, 0x101, false), (2, false));
    }

    #[test]
    fn rotated_immediates() {
        assert_eq!(rotated_immediate(0xFF, 0, true), (0xFF, true));
        assert_eq!(rotated_immediate(0x02, 1, false), (0x8000_0000, true));
        assert_eq!(rotated_immediate(0x03, 6, true), (0x0030_0000, false));
    }

    #[test]
    fn multiply_timing() {
        assert_eq!(multiply_cycles(0xFF), 1);
        assert_eq!(multiply_cycles(0xFFFF_FFF0), 1);
        assert_eq!(multiply_cycles(0x1234), 2);
        assert_eq!(multiply_cycles(0x12_3456), 3);
        assert_eq!(multiply_cycles(0x1234_5678), 4);
    }
}
