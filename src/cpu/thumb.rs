//! The 16-bit THUMB instruction set. THUMB instructions are really just compressed encodings of a subset of ARM
//! operations, restricted (mostly) to the low eight registers and without conditional execution.
//! Dispatch uses the top ten bits of the opcode as an index into a table of the nineteen instruction formats.

use super::alu::{self, ShiftType};
use super::arm::Condition;
use super::registers::{FLAG_C, FLAG_T, FLAG_V};
use super::{Bus, Cpu};
use crate::util::sign_extend;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImmediateOp {
    Mov,
    Cmp,
    Add,
    Sub,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[rustfmt::skip]
pub enum ThumbAluOp { And, Eor, Lsl, Lsr, Asr, Adc, Sbc, Ror, Tst, Neg, Cmp, Cmn, Orr, Mul, Bic, Mvn }

impl ThumbAluOp {
    pub fn from_bits(v: u16) -> ThumbAluOp {
        use ThumbAluOp::*;
        [And, Eor, Lsl, Lsr, Asr, Adc, Sbc, Ror, Tst, Neg, Cmp, Cmn, Orr, Mul, Bic, Mvn][usize::from(v & 0xF)]
    }

    fn mnemonic(self) -> &'static str {
        match self {
            ThumbAluOp::And => "and",
            ThumbAluOp::Eor => "eor",
            ThumbAluOp::Lsl => "lsl",
            ThumbAluOp::Lsr => "lsr",
            ThumbAluOp::Asr => "asr",
            ThumbAluOp::Adc => "adc",
            ThumbAluOp::Sbc => "sbc",
            ThumbAluOp::Ror => "ror",
            ThumbAluOp::Tst => "tst",
            ThumbAluOp::Neg => "neg",
            ThumbAluOp::Cmp => "cmp",
            ThumbAluOp::Cmn => "cmn",
            ThumbAluOp::Orr => "orr",
            ThumbAluOp::Mul => "mul",
            ThumbAluOp::Bic => "bic",
            ThumbAluOp::Mvn => "mvn",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HiRegisterOp {
    Add,
    Cmp,
    Mov,
    Bx,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignExtendedOp {
    Strh,
    Ldsb,
    Ldrh,
    Ldsh,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ThumbInstruction {
    MoveShifted { shift: ShiftType, amount: u8, rs: usize, rd: usize },
    AddSub { sub: bool, immediate: bool, operand: u8, rs: usize, rd: usize },
    Immediate { op: ImmediateOp, rd: usize, imm: u8 },
    Alu { op: ThumbAluOp, rs: usize, rd: usize },
    HiRegister { op: HiRegisterOp, rs: usize, rd: usize },
    PcRelativeLoad { rd: usize, imm: u8 },
    LoadStoreRegister { load: bool, byte: bool, ro: usize, rb: usize, rd: usize },
    LoadStoreSignExtended { op: SignExtendedOp, ro: usize, rb: usize, rd: usize },
    LoadStoreImmediate { load: bool, byte: bool, offset: u8, rb: usize, rd: usize },
    LoadStoreHalf { load: bool, offset: u8, rb: usize, rd: usize },
    SpRelative { load: bool, rd: usize, imm: u8 },
    LoadAddress { sp: bool, rd: usize, imm: u8 },
    AddSp { negative: bool, imm: u8 },
    PushPop { load: bool, pc_lr: bool, list: u8 },
    Multiple { load: bool, rb: usize, list: u8 },
    ConditionalBranch { cond: Condition, offset: i8 },
    Swi { comment: u8 },
    Branch { offset: i16 },
    LongBranch { high: bool, offset: u16 },
    Undefined(u16),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Format {
    MoveShifted,
    AddSub,
    Immediate,
    Alu,
    HiRegister,
    PcRelativeLoad,
    LoadStoreRegister,
    LoadStoreSignExtended,
    LoadStoreImmediate,
    LoadStoreHalf,
    SpRelative,
    LoadAddress,
    AddSp,
    PushPop,
    Multiple,
    ConditionalBranch,
    Swi,
    Branch,
    LongBranch,
    Undefined,
}

// (mask, value, format) over opcode bits 15-6, tested in order.
#[rustfmt::skip]
const PATTERNS: [(u16, u16, Format); 20] = [
    (0x3E0, 0x060, Format::AddSub),
    (0x380, 0x000, Format::MoveShifted),
    (0x380, 0x080, Format::Immediate),
    (0x3F0, 0x100, Format::Alu),
    (0x3F0, 0x110, Format::HiRegister),
    (0x3E0, 0x120, Format::PcRelativeLoad),
    (0x3C8, 0x140, Format::LoadStoreRegister),
    (0x3C8, 0x148, Format::LoadStoreSignExtended),
    (0x380, 0x180, Format::LoadStoreImmediate),
    (0x3C0, 0x200, Format::LoadStoreHalf),
    (0x3C0, 0x240, Format::SpRelative),
    (0x3C0, 0x280, Format::LoadAddress),
    (0x3FC, 0x2C0, Format::AddSp),
    (0x3D8, 0x2D0, Format::PushPop),
    (0x3C0, 0x300, Format::Multiple),
    (0x3FC, 0x37C, Format::Swi),
    (0x3FC, 0x378, Format::Undefined),
    (0x3C0, 0x340, Format::ConditionalBranch),
    (0x3E0, 0x380, Format::Branch),
    (0x3C0, 0x3C0, Format::LongBranch),
];

const fn build_table() -> [Format; 1024] {
    let mut table = [Format::Undefined; 1024];
    let mut idx = 0;
    while idx < 1024 {
        let mut p = 0;
        while p < PATTERNS.len() {
            let (mask, value, format) = PATTERNS[p];
            if idx as u16 & mask == value {
                table[idx] = format;
                break;
            }
            p += 1;
        }
        idx += 1;
    }
    table
}

static TABLE: [Format; 1024] = build_table();

#[inline]
fn low(inst: u16, shift: u16) -> usize {
    usize::from((inst >> shift) & 7)
}

#[inline]
fn bit(inst: u16, n: u16) -> bool {
    inst & (1 << n) != 0
}

impl ThumbInstruction {
    pub fn decode(inst: u16) -> ThumbInstruction {
        use ThumbInstruction as T;
        match TABLE[usize::from(inst >> 6)] {
            Format::MoveShifted => T::MoveShifted {
                shift: ShiftType::from_bits(u32::from(inst >> 11)),
                amount: ((inst >> 6) & 0x1F) as u8,
                rs: low(inst, 3),
                rd: low(inst, 0),
            },
            Format::AddSub => T::AddSub {
                sub: bit(inst, 9),
                immediate: bit(inst, 10),
                operand: ((inst >> 6) & 7) as u8,
                rs: low(inst, 3),
                rd: low(inst, 0),
            },
            Format::Immediate => T::Immediate {
                op: match (inst >> 11) & 3 {
                    0 => ImmediateOp::Mov,
                    1 => ImmediateOp::Cmp,
                    2 => ImmediateOp::Add,
                    _ => ImmediateOp::Sub,
                },
                rd: low(inst, 8),
                imm: inst as u8,
            },
            Format::Alu => T::Alu {
                op: ThumbAluOp::from_bits(inst >> 6),
                rs: low(inst, 3),
                rd: low(inst, 0),
            },
            Format::HiRegister => T::HiRegister {
                op: match (inst >> 8) & 3 {
                    0 => HiRegisterOp::Add,
                    1 => HiRegisterOp::Cmp,
                    2 => HiRegisterOp::Mov,
                    _ => HiRegisterOp::Bx,
                },
                rs: usize::from((inst >> 3) & 0xF),
                rd: usize::from(((inst >> 4) & 8) | (inst & 7)),
            },
            Format::PcRelativeLoad => T::PcRelativeLoad {
                rd: low(inst, 8),
                imm: inst as u8,
            },
            Format::LoadStoreRegister => T::LoadStoreRegister {
                load: bit(inst, 11),
                byte: bit(inst, 10),
                ro: low(inst, 6),
                rb: low(inst, 3),
                rd: low(inst, 0),
            },
            Format::LoadStoreSignExtended => T::LoadStoreSignExtended {
                op: match (inst >> 10) & 3 {
                    0 => SignExtendedOp::Strh,
                    1 => SignExtendedOp::Ldsb,
                    2 => SignExtendedOp::Ldrh,
                    _ => SignExtendedOp::Ldsh,
                },
                ro: low(inst, 6),
                rb: low(inst, 3),
                rd: low(inst, 0),
            },
            Format::LoadStoreImmediate => T::LoadStoreImmediate {
                load: bit(inst, 11),
                byte: bit(inst, 12),
                offset: ((inst >> 6) & 0x1F) as u8,
                rb: low(inst, 3),
                rd: low(inst, 0),
            },
            Format::LoadStoreHalf => T::LoadStoreHalf {
                load: bit(inst, 11),
                offset: ((inst >> 6) & 0x1F) as u8,
                rb: low(inst, 3),
                rd: low(inst, 0),
            },
            Format::SpRelative => T::SpRelative {
                load: bit(inst, 11),
                rd: low(inst, 8),
                imm: inst as u8,
            },
            Format::LoadAddress => T::LoadAddress {
                sp: bit(inst, 11),
                rd: low(inst, 8),
                imm: inst as u8,
            },
            Format::AddSp => T::AddSp {
                negative: bit(inst, 7),
                imm: (inst & 0x7F) as u8,
            },
            Format::PushPop => T::PushPop {
                load: bit(inst, 11),
                pc_lr: bit(inst, 8),
                list: inst as u8,
            },
            Format::Multiple => T::Multiple {
                load: bit(inst, 11),
                rb: low(inst, 8),
                list: inst as u8,
            },
            Format::ConditionalBranch => {
                let cond = Condition::from_bits(u32::from(inst >> 8));
                if cond == Condition::Al {
                    return T::Undefined(inst);
                }
                T::ConditionalBranch {
                    cond,
                    offset: inst as u8 as i8,
                }
            }
            Format::Swi => T::Swi { comment: inst as u8 },
            Format::Branch => T::Branch {
                offset: sign_extend(u32::from(inst & 0x7FF), 11) as i16,
            },
            Format::LongBranch => T::LongBranch {
                high: !bit(inst, 11),
                offset: inst & 0x7FF,
            },
            Format::Undefined => T::Undefined(inst),
        }
    }

    pub fn encode(&self) -> u16 {
        let r = |n: usize, shift: u16| (n as u16) << shift;
        let b = |v: bool, shift: u16| u16::from(v) << shift;
        match *self {
            ThumbInstruction::MoveShifted { shift, amount, rs, rd } => {
                ((shift.bits() as u16) << 11) | (u16::from(amount) << 6) | r(rs, 3) | r(rd, 0)
            }
            ThumbInstruction::AddSub {
                sub,
                immediate,
                operand,
                rs,
                rd,
            } => 0x1800 | b(immediate, 10) | b(sub, 9) | (u16::from(operand) << 6) | r(rs, 3) | r(rd, 0),
            ThumbInstruction::Immediate { op, rd, imm } => 0x2000 | ((op as u16) << 11) | r(rd, 8) | u16::from(imm),
            ThumbInstruction::Alu { op, rs, rd } => 0x4000 | ((op as u16) << 6) | r(rs, 3) | r(rd, 0),
            ThumbInstruction::HiRegister { op, rs, rd } => {
                0x4400 | ((op as u16) << 8) | r(rd & 8, 4) | r(rs, 3) | r(rd & 7, 0)
            }
            ThumbInstruction::PcRelativeLoad { rd, imm } => 0x4800 | r(rd, 8) | u16::from(imm),
            ThumbInstruction::LoadStoreRegister {
                load,
                byte,
                ro,
                rb,
                rd,
            } => 0x5000 | b(load, 11) | b(byte, 10) | r(ro, 6) | r(rb, 3) | r(rd, 0),
            ThumbInstruction::LoadStoreSignExtended { op, ro, rb, rd } => {
                0x5200 | ((op as u16) << 10) | r(ro, 6) | r(rb, 3) | r(rd, 0)
            }
            ThumbInstruction::LoadStoreImmediate {
                load,
                byte,
                offset,
                rb,
                rd,
            } => 0x6000 | b(byte, 12) | b(load, 11) | (u16::from(offset) << 6) | r(rb, 3) | r(rd, 0),
            ThumbInstruction::LoadStoreHalf { load, offset, rb, rd } => {
                0x8000 | b(load, 11) | (u16::from(offset) << 6) | r(rb, 3) | r(rd, 0)
            }
            ThumbInstruction::SpRelative { load, rd, imm } => 0x9000 | b(load, 11) | r(rd, 8) | u16::from(imm),
            ThumbInstruction::LoadAddress { sp, rd, imm } => 0xA000 | b(sp, 11) | r(rd, 8) | u16::from(imm),
            ThumbInstruction::AddSp { negative, imm } => 0xB000 | b(negative, 7) | u16::from(imm),
            ThumbInstruction::PushPop { load, pc_lr, list } => 0xB400 | b(load, 11) | b(pc_lr, 8) | u16::from(list),
            ThumbInstruction::Multiple { load, rb, list } => 0xC000 | b(load, 11) | r(rb, 8) | u16::from(list),
            ThumbInstruction::ConditionalBranch { cond, offset } => {
                0xD000 | ((cond.bits() as u16) << 8) | u16::from(offset as u8)
            }
            ThumbInstruction::Swi { comment } => 0xDF00 | u16::from(comment),
            ThumbInstruction::Branch { offset } => 0xE000 | (offset as u16 & 0x7FF),
            ThumbInstruction::LongBranch { high, offset } => 0xF000 | b(!high, 11) | (offset & 0x7FF),
            ThumbInstruction::Undefined(inst) => inst,
        }
    }
}

fn reg_name(n: usize) -> String {
    match n {
        13 => "sp".to_string(),
        14 => "lr".to_string(),
        15 => "pc".to_string(),
        n => format!("r{}", n),
    }
}

fn reg_list(list: u8, extra: Option<usize>) -> String {
    let mut regs: Vec<String> = (0..8).filter(|r| list & (1 << r) != 0).map(reg_name).collect();
    if let Some(r) = extra {
        regs.push(reg_name(r));
    }
    format!("{{{}}}", regs.join(", "))
}

impl fmt::Display for ThumbInstruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ThumbInstruction::MoveShifted { shift, amount, rs, rd } => {
                write!(f, "{} r{}, r{}, #{}", shift, rd, rs, amount)
            }
            ThumbInstruction::AddSub {
                sub,
                immediate,
                operand,
                rs,
                rd,
            } => {
                let op = if sub { "sub" } else { "add" };
                if immediate {
                    write!(f, "{} r{}, r{}, #{}", op, rd, rs, operand)
                } else {
                    write!(f, "{} r{}, r{}, r{}", op, rd, rs, operand)
                }
            }
            ThumbInstruction::Immediate { op, rd, imm } => {
                let op = match op {
                    ImmediateOp::Mov => "mov",
                    ImmediateOp::Cmp => "cmp",
                    ImmediateOp::Add => "add",
                    ImmediateOp::Sub => "sub",
                };
                write!(f, "{} r{}, #0x{:X}", op, rd, imm)
            }
            ThumbInstruction::Alu { op, rs, rd } => write!(f, "{} r{}, r{}", op.mnemonic(), rd, rs),
            ThumbInstruction::HiRegister { op, rs, rd } => match op {
                HiRegisterOp::Add => write!(f, "add {}, {}", reg_name(rd), reg_name(rs)),
                HiRegisterOp::Cmp => write!(f, "cmp {}, {}", reg_name(rd), reg_name(rs)),
                HiRegisterOp::Mov => write!(f, "mov {}, {}", reg_name(rd), reg_name(rs)),
                HiRegisterOp::Bx => write!(f, "bx {}", reg_name(rs)),
            },
            ThumbInstruction::PcRelativeLoad { rd, imm } => {
                write!(f, "ldr r{}, [pc, #0x{:X}]", rd, u16::from(imm) * 4)
            }
            ThumbInstruction::LoadStoreRegister {
                load,
                byte,
                ro,
                rb,
                rd,
            } => write!(
                f,
                "{}{} r{}, [r{}, r{}]",
                if load { "ldr" } else { "str" },
                if byte { "b" } else { "" },
                rd,
                rb,
                ro
            ),
            ThumbInstruction::LoadStoreSignExtended { op, ro, rb, rd } => {
                let op = match op {
                    SignExtendedOp::Strh => "strh",
                    SignExtendedOp::Ldsb => "ldsb",
                    SignExtendedOp::Ldrh => "ldrh",
                    SignExtendedOp::Ldsh => "ldsh",
                };
                write!(f, "{} r{}, [r{}, r{}]", op, rd, rb, ro)
            }
            ThumbInstruction::LoadStoreImmediate {
                load,
                byte,
                offset,
                rb,
                rd,
            } => {
                let offset = if byte { u16::from(offset) } else { u16::from(offset) * 4 };
                write!(
                    f,
                    "{}{} r{}, [r{}, #0x{:X}]",
                    if load { "ldr" } else { "str" },
                    if byte { "b" } else { "" },
                    rd,
                    rb,
                    offset
                )
            }
            ThumbInstruction::LoadStoreHalf { load, offset, rb, rd } => write!(
                f,
                "{} r{}, [r{}, #0x{:X}]",
                if load { "ldrh" } else { "strh" },
                rd,
                rb,
                u16::from(offset) * 2
            ),
            ThumbInstruction::SpRelative { load, rd, imm } => write!(
                f,
                "{} r{}, [sp, #0x{:X}]",
                if load { "ldr" } else { "str" },
                rd,
                u16::from(imm) * 4
            ),
            ThumbInstruction::LoadAddress { sp, rd, imm } => write!(
                f,
                "add r{}, {}, #0x{:X}",
                rd,
                if sp { "sp" } else { "pc" },
                u16::from(imm) * 4
            ),
            ThumbInstruction::AddSp { negative, imm } => {
                write!(f, "add sp, #{}0x{:X}", if negative { "-" } else { "" }, u16::from(imm) * 4)
            }
            ThumbInstruction::PushPop { load, pc_lr, list } => {
                if load {
                    write!(f, "pop {}", reg_list(list, if pc_lr { Some(15) } else { None }))
                } else {
                    write!(f, "push {}", reg_list(list, if pc_lr { Some(14) } else { None }))
                }
            }
            ThumbInstruction::Multiple { load, rb, list } => write!(
                f,
                "{} r{}!, {}",
                if load { "ldmia" } else { "stmia" },
                rb,
                reg_list(list, None)
            ),
            ThumbInstruction::ConditionalBranch { cond, offset } => {
                write!(f, "b{} {:+}", cond, i32::from(offset) * 2 + 4)
            }
            ThumbInstruction::Swi { comment } => write!(f, "swi 0x{:X}", comment),
            ThumbInstruction::Branch { offset } => write!(f, "b {:+}", i32::from(offset) * 2 + 4),
            ThumbInstruction::LongBranch { high, offset } => {
                write!(f, "bl{} 0x{:X}", if high { "_hi" } else { "_lo" }, offset)
            }
            ThumbInstruction::Undefined(inst) => write!(f, "undefined 0x{:04X}", inst),
        }
    }
}

impl Cpu {
    fn set_add_sub_flags(&mut self, result: alu::AluResult) {
        self.regs.set_nz(result.value);
        self.regs.set_flag(FLAG_C, result.carry);
        self.regs.set_flag(FLAG_V, result.overflow);
    }

    /// PC as used for PC-relative addressing: word aligned.
    fn thumb_pc_base(&self) -> u32 {
        self.regs.pc() & !2
    }

    /// Executes one THUMB instruction. Returns false if it was undefined.
    pub(super) fn execute_thumb<B: Bus>(&mut self, bus: &mut B, inst: u16) -> bool {
        let carry = self.regs.flag(FLAG_C);
        match ThumbInstruction::decode(inst) {
            ThumbInstruction::MoveShifted { shift, amount, rs, rd } => {
                let (v, c) = alu::shift_immediate(shift, self.regs.get(rs), u32::from(amount), carry);
                self.regs.set(rd, v);
                self.regs.set_nz(v);
                self.regs.set_flag(FLAG_C, c);
            }
            ThumbInstruction::AddSub {
                sub,
                immediate,
                operand,
                rs,
                rd,
            } => {
                let a = self.regs.get(rs);
                let b = if immediate {
                    u32::from(operand)
                } else {
                    self.regs.get(usize::from(operand))
                };
                let result = if sub { alu::sub(a, b, true) } else { alu::add(a, b, false) };
                self.regs.set(rd, result.value);
                self.set_add_sub_flags(result);
            }
            ThumbInstruction::Immediate { op, rd, imm } => {
                let a = self.regs.get(rd);
                let b = u32::from(imm);
                match op {
                    ImmediateOp::Mov => {
                        self.regs.set(rd, b);
                        self.regs.set_nz(b);
                    }
                    ImmediateOp::Cmp => self.set_add_sub_flags(alu::sub(a, b, true)),
                    ImmediateOp::Add => {
                        let result = alu::add(a, b, false);
                        self.regs.set(rd, result.value);
                        self.set_add_sub_flags(result);
                    }
                    ImmediateOp::Sub => {
                        let result = alu::sub(a, b, true);
                        self.regs.set(rd, result.value);
                        self.set_add_sub_flags(result);
                    }
                }
            }
            ThumbInstruction::Alu { op, rs, rd } => self.thumb_alu(bus, op, rs, rd),
            ThumbInstruction::HiRegister { op, rs, rd } => {
                let source = self.regs.get(rs);
                match op {
                    HiRegisterOp::Add => {
                        let v = self.regs.get(rd).wrapping_add(source);
                        self.write_reg(bus, rd, v);
                    }
                    HiRegisterOp::Cmp => {
                        let result = alu::sub(self.regs.get(rd), source, true);
                        self.set_add_sub_flags(result);
                    }
                    HiRegisterOp::Mov => self.write_reg(bus, rd, source),
                    HiRegisterOp::Bx => {
                        self.regs.set_flag(FLAG_T, source & 1 != 0);
                        self.branch_to(bus, source);
                    }
                }
            }
            ThumbInstruction::PcRelativeLoad { rd, imm } => {
                let addr = self.thumb_pc_base().wrapping_add(u32::from(imm) * 4);
                let v = bus.read32(addr);
                bus.tick(1);
                self.regs.set(rd, v);
            }
            ThumbInstruction::LoadStoreRegister {
                load,
                byte,
                ro,
                rb,
                rd,
            } => {
                let addr = self.regs.get(rb).wrapping_add(self.regs.get(ro));
                self.thumb_load_store(bus, load, byte, addr, rd);
            }
            ThumbInstruction::LoadStoreSignExtended { op, ro, rb, rd } => {
                let addr = self.regs.get(rb).wrapping_add(self.regs.get(ro));
                match op {
                    SignExtendedOp::Strh => bus.write16(addr & !1, self.regs.get(rd) as u16),
                    SignExtendedOp::Ldsb => {
                        let v = bus.read8(addr) as i8 as u32;
                        bus.tick(1);
                        self.regs.set(rd, v);
                    }
                    SignExtendedOp::Ldrh => {
                        let v = self.read_half_rotated(bus, addr);
                        bus.tick(1);
                        self.regs.set(rd, v);
                    }
                    SignExtendedOp::Ldsh => {
                        let v = self.read_half_signed(bus, addr);
                        bus.tick(1);
                        self.regs.set(rd, v);
                    }
                }
            }
            ThumbInstruction::LoadStoreImmediate {
                load,
                byte,
                offset,
                rb,
                rd,
            } => {
                let offset = if byte { u32::from(offset) } else { u32::from(offset) * 4 };
                let addr = self.regs.get(rb).wrapping_add(offset);
                self.thumb_load_store(bus, load, byte, addr, rd);
            }
            ThumbInstruction::LoadStoreHalf { load, offset, rb, rd } => {
                let addr = self.regs.get(rb).wrapping_add(u32::from(offset) * 2);
                if load {
                    let v = self.read_half_rotated(bus, addr);
                    bus.tick(1);
                    self.regs.set(rd, v);
                } else {
                    bus.write16(addr & !1, self.regs.get(rd) as u16);
                }
            }
            ThumbInstruction::SpRelative { load, rd, imm } => {
                let addr = self.regs.get(13).wrapping_add(u32::from(imm) * 4);
                self.thumb_load_store(bus, load, false, addr, rd);
            }
            ThumbInstruction::LoadAddress { sp, rd, imm } => {
                let base = if sp { self.regs.get(13) } else { self.thumb_pc_base() };
                self.regs.set(rd, base.wrapping_add(u32::from(imm) * 4));
            }
            ThumbInstruction::AddSp { negative, imm } => {
                let sp = self.regs.get(13);
                let offset = u32::from(imm) * 4;
                let sp = if negative {
                    sp.wrapping_sub(offset)
                } else {
                    sp.wrapping_add(offset)
                };
                self.regs.set(13, sp);
            }
            ThumbInstruction::PushPop { load, pc_lr, list } => self.thumb_push_pop(bus, load, pc_lr, list),
            ThumbInstruction::Multiple { load, rb, list } => self.thumb_multiple(bus, load, rb, list),
            ThumbInstruction::ConditionalBranch { cond, offset } => {
                if cond.passes(self.regs.cpsr()) {
                    let target = self.regs.pc().wrapping_add((i32::from(offset) * 2) as u32);
                    self.branch_to(bus, target);
                }
            }
            ThumbInstruction::Swi { comment } => self.software_interrupt(bus, comment),
            ThumbInstruction::Branch { offset } => {
                let target = self.regs.pc().wrapping_add((i32::from(offset) * 2) as u32);
                self.branch_to(bus, target);
            }
            ThumbInstruction::LongBranch { high, offset } => {
                let pc = self.regs.pc();
                if high {
                    let upper = sign_extend(u32::from(offset), 11) << 12;
                    self.regs.set(14, pc.wrapping_add(upper as u32));
                } else {
                    let target = self.regs.get(14).wrapping_add(u32::from(offset) << 1);
                    self.regs.set(14, pc.wrapping_sub(2) | 1);
                    self.branch_to(bus, target);
                }
            }
            ThumbInstruction::Undefined(inst) => {
                self.undefined(bus, u32::from(inst));
                return false;
            }
        }
        true
    }

    fn thumb_alu<B: Bus>(&mut self, bus: &mut B, op: ThumbAluOp, rs: usize, rd: usize) {
        let a = self.regs.get(rd);
        let b = self.regs.get(rs);
        let carry = self.regs.flag(FLAG_C);

        let shift = |kind: ShiftType| alu::shift_register(kind, a, b & 0xFF, carry);
        let (value, write) = match op {
            ThumbAluOp::And => (a & b, true),
            ThumbAluOp::Eor => (a ^ b, true),
            ThumbAluOp::Orr => (a | b, true),
            ThumbAluOp::Bic => (a & !b, true),
            ThumbAluOp::Mvn => (!b, true),
            ThumbAluOp::Tst => (a & b, false),
            ThumbAluOp::Lsl | ThumbAluOp::Lsr | ThumbAluOp::Asr | ThumbAluOp::Ror => {
                let kind = match op {
                    ThumbAluOp::Lsl => ShiftType::Lsl,
                    ThumbAluOp::Lsr => ShiftType::Lsr,
                    ThumbAluOp::Asr => ShiftType::Asr,
                    _ => ShiftType::Ror,
                };
                let (v, c) = shift(kind);
                bus.tick(1);
                self.regs.set_flag(FLAG_C, c);
                (v, true)
            }
            ThumbAluOp::Mul => {
                bus.tick(alu::multiply_cycles(a));
                (a.wrapping_mul(b), true)
            }
            ThumbAluOp::Adc | ThumbAluOp::Sbc | ThumbAluOp::Neg | ThumbAluOp::Cmp | ThumbAluOp::Cmn => {
                let result = match op {
                    ThumbAluOp::Adc => alu::add(a, b, carry),
                    ThumbAluOp::Sbc => alu::sub(a, b, carry),
                    ThumbAluOp::Neg => alu::sub(0, b, true),
                    ThumbAluOp::Cmp => alu::sub(a, b, true),
                    _ => alu::add(a, b, false),
                };
                self.regs.set_flag(FLAG_C, result.carry);
                self.regs.set_flag(FLAG_V, result.overflow);
                let write = op != ThumbAluOp::Cmp && op != ThumbAluOp::Cmn;
                (result.value, write)
            }
        };

        self.regs.set_nz(value);
        if write {
            self.regs.set(rd, value);
        }
    }

    fn thumb_load_store<B: Bus>(&mut self, bus: &mut B, load: bool, byte: bool, addr: u32, rd: usize) {
        if load {
            let v = if byte {
                u32::from(bus.read8(addr))
            } else {
                self.read_word_rotated(bus, addr)
            };
            bus.tick(1);
            self.regs.set(rd, v);
        } else if byte {
            bus.write8(addr, self.regs.get(rd) as u8);
        } else {
            bus.write32(addr & !3, self.regs.get(rd));
        }
    }

    fn thumb_push_pop<B: Bus>(&mut self, bus: &mut B, load: bool, pc_lr: bool, list: u8) {
        let count = list.count_ones() + u32::from(pc_lr);
        let sp = self.regs.get(13);
        if load {
            let mut addr = sp;
            for r in (0..8).filter(|r| list & (1 << r) != 0) {
                let v = bus.read32(addr);
                self.regs.set(r, v);
                addr = addr.wrapping_add(4);
            }
            bus.tick(1);
            if pc_lr {
                let v = bus.read32(addr);
                addr = addr.wrapping_add(4);
                self.regs.set(13, addr);
                self.branch_to(bus, v);
            } else {
                self.regs.set(13, addr);
            }
        } else {
            let base = sp.wrapping_sub(count * 4);
            let mut addr = base;
            for r in (0..8).filter(|r| list & (1 << r) != 0) {
                bus.write32(addr, self.regs.get(r));
                addr = addr.wrapping_add(4);
            }
            if pc_lr {
                bus.write32(addr, self.regs.get(14));
            }
            self.regs.set(13, base);
        }
    }

    fn thumb_multiple<B: Bus>(&mut self, bus: &mut B, load: bool, rb: usize, list: u8) {
        let base = self.regs.get(rb);
        let new_base = base.wrapping_add(list.count_ones() * 4);
        let mut addr = base;
        if load {
            for r in (0..8).filter(|r| list & (1 << r) != 0) {
                let v = bus.read32(addr);
                self.regs.set(r, v);
                addr = addr.wrapping_add(4);
            }
            bus.tick(1);
            // A loaded base wins over the writeback.
            if list & (1 << rb) == 0 {
                self.regs.set(rb, new_base);
            }
        } else {
            let first = list.trailing_zeros() as usize;
            for r in (0..8).filter(|r| list & (1 << r) != 0) {
                let v = if r == rb && r != first {
                    new_base
                } else {
                    self.regs.get(r)
                };
                bus.write32(addr, v);
                addr = addr.wrapping_add(4);
            }
            self.regs.set(rb, new_base);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::registers::{Mode, FLAG_N, FLAG_Z};
    use super::super::tests::{cpu_at, TestBus};
    use super::*;

    #[test]
    fn every_opcode_round_trips() {
        let mut formats = std::collections::HashSet::new();
        for inst in 0..=0xFFFFu16 {
            let decoded = ThumbInstruction::decode(inst);
            assert_eq!(decoded.encode(), inst, "{:04X} decoded as {:?}", inst, decoded);
            assert_eq!(ThumbInstruction::decode(decoded.encode()), decoded);
            formats.insert(std::mem::discriminant(&decoded));
        }
        assert_eq!(formats.len(), 20);
    }

    #[test]
    fn undefined_encodings() {
        for &inst in &[0xB100u16, 0xBE00, 0xDE00, 0xE800, 0xEFFF] {
            assert_eq!(ThumbInstruction::decode(inst), ThumbInstruction::Undefined(inst), "{:04X}", inst);
        }
    }

    #[test]
    fn disassembly() {
        assert_eq!(ThumbInstruction::decode(0x2005).to_string(), "mov r0, #0x5");
        assert_eq!(ThumbInstruction::decode(0x4770).to_string(), "bx lr");
        assert_eq!(ThumbInstruction::decode(0xB510).to_string(), "push {r4, lr}");
        assert_eq!(ThumbInstruction::decode(0xBD10).to_string(), "pop {r4, pc}");
        assert_eq!(ThumbInstruction::decode(0xD0FE).to_string(), "beq +0");
        assert_eq!(ThumbInstruction::decode(0xDF06).to_string(), "swi 0x6");
    }

    fn run(program: &[u16], setup: impl FnOnce(&mut Cpu)) -> (Cpu, TestBus) {
        let mut bus = TestBus::new();
        bus.load_thumb(0x1000, program);
        let mut cpu = cpu_at(&mut bus, 0x1000, true);
        setup(&mut cpu);
        for _ in 0..program.len() {
            cpu.step(&mut bus);
        }
        (cpu, bus)
    }

    #[test]
    fn immediates_and_flags() {
        let (cpu, _) = run(
            &[
                0x2000, // mov r0, #0
                0x3801, // sub r0, #1
                0x2105, // mov r1, #5
                0x2905, // cmp r1, #5
            ],
            |_| {},
        );
        assert_eq!(cpu.regs.get(0), 0xFFFF_FFFF);
        assert!(cpu.regs.flag(FLAG_Z) && cpu.regs.flag(FLAG_C));
    }

    #[test]
    fn shift_by_zero_register_keeps_carry() {
        // lsl r0, r1 with r1 = 0
        let (cpu, _) = run(&[0x4088], |cpu| {
            cpu.regs.set(0, 0x8000_0000);
            cpu.regs.set_flag(FLAG_C, true);
        });
        assert_eq!(cpu.regs.get(0), 0x8000_0000);
        assert!(cpu.regs.flag(FLAG_C) && cpu.regs.flag(FLAG_N));
    }

    #[test]
    fn alu_ops() {
        let (cpu, _) = run(
            &[
                0x4248, // neg r0, r1
                0x434A, // mul r2, r1
                0x43CB, // mvn r3, r1
            ],
            |cpu| {
                cpu.regs.set(1, 3);
                cpu.regs.set(2, 7);
            },
        );
        assert_eq!(cpu.regs.get(0), 0xFFFF_FFFD);
        assert_eq!(cpu.regs.get(2), 21);
        assert_eq!(cpu.regs.get(3), !3);
    }

    #[test]
    fn pc_relative_load_aligns() {
        // At 0x1002: ldr r0, [pc, #4] reads from (0x1006 & !2) + 4 = 0x1008.
        let mut bus = TestBus::new();
        bus.load_thumb(0x1000, &[0x46C0, 0x4801]);
        bus.write32(0x1008, 0xCAFE_F00D);
        let mut cpu = cpu_at(&mut bus, 0x1000, true);
        cpu.step(&mut bus);
        cpu.step(&mut bus);
        assert_eq!(cpu.regs.get(0), 0xCAFE_F00D);
    }

    #[test]
    fn push_pop() {
        let (cpu, mut bus) = run(
            &[
                0xB503, // push {r0, r1, lr}
                0xBC0C, // pop {r2, r3}
            ],
            |cpu| {
                cpu.regs.set(13, 0x3000);
                cpu.regs.set(0, 1);
                cpu.regs.set(1, 2);
                cpu.regs.set(14, 0x5555);
            },
        );
        assert_eq!(bus.read32(0x2FFC), 0x5555);
        assert_eq!((cpu.regs.get(2), cpu.regs.get(3)), (1, 2));
        assert_eq!(cpu.regs.get(13), 0x2FFC);
    }

    #[test]
    fn long_branch_with_link() {
        // bl +0x100 from 0x1000
        let (cpu, _) = run(&[0xF000, 0xF87E], |_| {});
        assert_eq!(cpu.next_instruction_addr(), 0x1100);
        assert_eq!(cpu.regs.get(14), 0x1005);
    }

    #[test]
    fn conditional_branch() {
        // beq -> skipped, bne taken back to the start
        let (cpu, _) = run(&[0xD001, 0xD1FC], |cpu| cpu.regs.set_flag(FLAG_Z, false));
        assert_eq!(cpu.next_instruction_addr(), 0x0FFE);
    }

    #[test]
    fn hi_register_ops() {
        let (cpu, _) = run(
            &[
                0x4688, // mov r8, r1
                0x4440, // add r0, r8
                0x4700, // bx r0
            ],
            |cpu| {
                cpu.regs.set(0, 0x2000);
                cpu.regs.set(1, 0x100);
            },
        );
        assert_eq!(cpu.regs.get(8), 0x100);
        assert!(!cpu.regs.thumb());
        assert_eq!(cpu.next_instruction_addr(), 0x2100);
        assert_eq!(cpu.regs.mode(), Mode::System);
    }

    #[test]
    fn loads_and_stores() {
        let (cpu, mut bus) = run(
            &[
                0x6008, // str r0, [r1]
                0x880A, // ldrh r2, [r1]
                0x5E4B, // ldsh r3, [r1, r1] -> address 0x6000
                0x7848, // ldrb r0, [r1, #1]
                0xC10C, // stmia r1!, {r2, r3}
            ],
            |cpu| {
                cpu.regs.set(0, 0x1234_8765);
                cpu.regs.set(1, 0x3000);
            },
        );
        assert_eq!(cpu.regs.get(2), 0x8765);
        assert_eq!(cpu.regs.get(3), 0);
        assert_eq!(cpu.regs.get(0), 0x87);
        assert_eq!(cpu.regs.get(1), 0x3008);
        assert_eq!(bus.read32(0x3000), 0x8765);
        assert_eq!(bus.read32(0x3004), 0);
    }
}
