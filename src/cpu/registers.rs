//! The ARM7TDMI register file. Sixteen registers are visible at any time, but R13 and R14 have a private copy for each
//! of the privileged exception modes, and FIQ mode additionally banks R8-R12. The active copy lives in `r`, and the
//! inactive ones are parked in the bank arrays, so switching modes is a matter of swapping values in and out.

use serde::{Deserialize, Serialize};

pub const FLAG_N: u32 = 1 << 31;
pub const FLAG_Z: u32 = 1 << 30;
pub const FLAG_C: u32 = 1 << 29;
pub const FLAG_V: u32 = 1 << 28;
pub const FLAG_I: u32 = 1 << 7;
pub const FLAG_F: u32 = 1 << 6;
pub const FLAG_T: u32 = 1 << 5;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[rustfmt::skip]
pub enum Mode {
    User       = 0x10,
    Fiq        = 0x11,
    Irq        = 0x12,
    Supervisor = 0x13,
    Abort      = 0x17,
    Undefined  = 0x1B,
    System     = 0x1F,
}

impl Mode {
    pub fn from_bits(v: u32) -> Option<Mode> {
        match v & 0x1F {
            0x10 => Some(Mode::User),
            0x11 => Some(Mode::Fiq),
            0x12 => Some(Mode::Irq),
            0x13 => Some(Mode::Supervisor),
            0x17 => Some(Mode::Abort),
            0x1B => Some(Mode::Undefined),
            0x1F => Some(Mode::System),
            _ => None,
        }
    }

    /// Which R13/R14/SPSR bank a mode uses. User and System share bank 0, which has no SPSR.
    pub fn bank(self) -> usize {
        match self {
            Mode::User | Mode::System => 0,
            Mode::Fiq => 1,
            Mode::Irq => 2,
            Mode::Supervisor => 3,
            Mode::Abort => 4,
            Mode::Undefined => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Mode::User => "USR",
            Mode::Fiq => "FIQ",
            Mode::Irq => "IRQ",
            Mode::Supervisor => "SVC",
            Mode::Abort => "ABT",
            Mode::Undefined => "UND",
            Mode::System => "SYS",
        }
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct Registers {
    r: [u32; 16],
    // R8-R12 for every mode except FIQ, and FIQ's own copies. Whichever set isn't active is stored here.
    r8_12: [u32; 5],
    r8_12_fiq: [u32; 5],
    r13: [u32; 6],
    r14: [u32; 6],
    spsr: [u32; 6],
    cpsr: u32,
}

impl Default for Registers {
    fn default() -> Registers {
        Registers {
            r: [0; 16],
            r8_12: [0; 5],
            r8_12_fiq: [0; 5],
            r13: [0; 6],
            r14: [0; 6],
            spsr: [0; 6],
            cpsr: Mode::Supervisor as u32 | FLAG_I | FLAG_F,
        }
    }
}

impl Registers {
    pub fn new() -> Registers {
        Default::default()
    }

    #[inline]
    pub fn get(&self, n: usize) -> u32 {
        self.r[n]
    }

    #[inline]
    pub fn set(&mut self, n: usize, v: u32) {
        self.r[n] = v;
    }

    #[inline]
    pub fn pc(&self) -> u32 {
        self.r[15]
    }

    #[inline]
    pub fn set_pc(&mut self, v: u32) {
        self.r[15] = v;
    }

    pub fn mode(&self) -> Mode {
        // set_cpsr never stores invalid mode bits.
        Mode::from_bits(self.cpsr).unwrap_or(Mode::User)
    }

    pub fn cpsr(&self) -> u32 {
        self.cpsr
    }

    /// Replaces the CPSR, switching register banks if the mode changed. Writes with invalid mode bits keep the
    /// current mode.
    pub fn set_cpsr(&mut self, v: u32) {
        let mode = Mode::from_bits(v).unwrap_or_else(|| self.mode());
        self.switch_mode(mode);
        self.cpsr = (v & !0x1F) | mode as u32;
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.switch_mode(mode);
        self.cpsr = (self.cpsr & !0x1F) | mode as u32;
    }

    fn switch_mode(&mut self, new: Mode) {
        let old = self.mode();
        if old == new {
            return;
        }

        let (old_bank, new_bank) = (old.bank(), new.bank());
        if old_bank != new_bank {
            self.r13[old_bank] = self.r[13];
            self.r14[old_bank] = self.r[14];
            self.r[13] = self.r13[new_bank];
            self.r[14] = self.r14[new_bank];
        }

        if (old == Mode::Fiq) != (new == Mode::Fiq) {
            let (save, load) = if new == Mode::Fiq {
                (&mut self.r8_12, &self.r8_12_fiq)
            } else {
                (&mut self.r8_12_fiq, &self.r8_12)
            };
            save.copy_from_slice(&self.r[8..13]);
            self.r[8..13].copy_from_slice(load);
        }
    }

    /// The SPSR of the current mode. User and System mode have none, reading it gives the CPSR.
    pub fn spsr(&self) -> u32 {
        match self.mode().bank() {
            0 => self.cpsr,
            bank => self.spsr[bank],
        }
    }

    pub fn set_spsr(&mut self, v: u32) {
        let bank = self.mode().bank();
        if bank != 0 {
            self.spsr[bank] = v;
        }
    }

    /// Reads a register as seen from User mode, used by LDM/STM with the S bit.
    pub fn get_user(&self, n: usize) -> u32 {
        let mode = self.mode();
        match n {
            8..=12 if mode == Mode::Fiq => self.r8_12[n - 8],
            13 if mode.bank() != 0 => self.r13[0],
            14 if mode.bank() != 0 => self.r14[0],
            _ => self.r[n],
        }
    }

    pub fn set_user(&mut self, n: usize, v: u32) {
        let mode = self.mode();
        match n {
            8..=12 if mode == Mode::Fiq => self.r8_12[n - 8] = v,
            13 if mode.bank() != 0 => self.r13[0] = v,
            14 if mode.bank() != 0 => self.r14[0] = v,
            _ => self.r[n] = v,
        }
    }

    /// Directly sets the banked R13 of a mode, regardless of the current mode.
    pub fn set_banked_sp(&mut self, mode: Mode, v: u32) {
        if mode.bank() == self.mode().bank() {
            self.r[13] = v;
        } else {
            self.r13[mode.bank()] = v;
        }
    }

    pub fn banked_sp(&self, mode: Mode) -> u32 {
        if mode.bank() == self.mode().bank() {
            self.r[13]
        } else {
            self.r13[mode.bank()]
        }
    }

    #[inline]
    pub fn flag(&self, flag: u32) -> bool {
        self.cpsr & flag != 0
    }

    #[inline]
    pub fn set_flag(&mut self, flag: u32, v: bool) {
        if v {
            self.cpsr |= flag;
        } else {
            self.cpsr &= !flag;
        }
    }

    #[inline]
    pub fn thumb(&self) -> bool {
        self.flag(FLAG_T)
    }

    pub fn set_nz(&mut self, v: u32) {
        self.set_flag(FLAG_N, v & 0x8000_0000 != 0);
        self.set_flag(FLAG_Z, v == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r13_r14_banked_per_mode() {
        let mut regs = Registers::new();
        regs.set_mode(Mode::System);
        regs.set(13, 0x100);
        regs.set(14, 0x101);
        regs.set_mode(Mode::Irq);
        regs.set(13, 0x200);
        regs.set(14, 0x201);
        regs.set_mode(Mode::Supervisor);
        regs.set(13, 0x300);
        regs.set(14, 0x301);

        regs.set_mode(Mode::User);
        assert_eq!((regs.get(13), regs.get(14)), (0x100, 0x101));
        regs.set_mode(Mode::Irq);
        assert_eq!((regs.get(13), regs.get(14)), (0x200, 0x201));
        regs.set_mode(Mode::Supervisor);
        assert_eq!((regs.get(13), regs.get(14)), (0x300, 0x301));
        regs.set_mode(Mode::Undefined);
        assert_eq!((regs.get(13), regs.get(14)), (0, 0));
        regs.set_mode(Mode::System);
        assert_eq!((regs.get(13), regs.get(14)), (0x100, 0x101));
    }

    #[test]
    fn fiq_banks_r8_to_r12() {
        let mut regs = Registers::new();
        regs.set_mode(Mode::System);
        for n in 0..13 {
            regs.set(n, n as u32);
        }
        regs.set_mode(Mode::Fiq);
        assert_eq!(regs.get(7), 7);
        assert_eq!(regs.get(8), 0);
        regs.set(8, 0x88);
        assert_eq!(regs.get_user(8), 8);

        regs.set_mode(Mode::Irq);
        assert_eq!(regs.get(8), 8);
        assert_eq!(regs.get(12), 12);
        regs.set_mode(Mode::Fiq);
        assert_eq!(regs.get(8), 0x88);
    }

    #[test]
    fn spsr_and_user_view() {
        let mut regs = Registers::new();
        regs.set_spsr(0x1234_5610);
        assert_eq!(regs.spsr(), 0x1234_5610);
        regs.set_user(13, 0xAAAA);
        assert_ne!(regs.get(13), 0xAAAA);

        regs.set_cpsr(0x0000_001F);
        assert_eq!(regs.mode(), Mode::System);
        assert_eq!(regs.get(13), 0xAAAA);
        // No SPSR in System mode.
        regs.set_spsr(0);
        assert_eq!(regs.spsr(), regs.cpsr());

        // Invalid mode bits leave the mode alone but still update the flags.
        regs.set_cpsr(0x8000_0005);
        assert_eq!(regs.mode(), Mode::System);
        assert!(regs.flag(FLAG_N));
    }

    #[test]
    fn banked_sp_access() {
        let mut regs = Registers::new();
        regs.set_banked_sp(Mode::Irq, 0x0300_7FA0);
        regs.set_banked_sp(Mode::Supervisor, 0x0300_7FE0);
        assert_eq!(regs.get(13), 0x0300_7FE0);
        regs.set_mode(Mode::Irq);
        assert_eq!(regs.get(13), 0x0300_7FA0);
        assert_eq!(regs.banked_sp(Mode::Supervisor), 0x0300_7FE0);
    }
}
