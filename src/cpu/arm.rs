//! The 32-bit ARM instruction set.
//! Instructions are classified by bits 27-20 and 7-4, which together form a 12-bit index into a dispatch table of
//! instruction families. The table is computed at compile time by testing every index against a list of bit patterns.
//! Decoding then pulls the operand fields out into an `ArmInstruction`, which can also be encoded back into a word and
//! printed as disassembly.

use super::alu::{self, ShiftType};
use super::registers::{FLAG_C, FLAG_N, FLAG_T, FLAG_V, FLAG_Z};
use super::{Bus, Cpu};
use crate::util::sign_extend;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[rustfmt::skip]
pub enum Condition { Eq, Ne, Cs, Cc, Mi, Pl, Vs, Vc, Hi, Ls, Ge, Lt, Gt, Le, Al, Nv }

impl Condition {
    pub fn from_bits(v: u32) -> Condition {
        use Condition::*;
        [Eq, Ne, Cs, Cc, Mi, Pl, Vs, Vc, Hi, Ls, Ge, Lt, Gt, Le, Al, Nv][(v & 0xF) as usize]
    }

    pub fn bits(self) -> u32 {
        self as u32
    }

    /// Evaluates the condition against the flags in `cpsr`. NV never passes on ARMv4.
    pub fn passes(self, cpsr: u32) -> bool {
        let n = cpsr & FLAG_N != 0;
        let z = cpsr & FLAG_Z != 0;
        let c = cpsr & FLAG_C != 0;
        let v = cpsr & FLAG_V != 0;
        match self {
            Condition::Eq => z,
            Condition::Ne => !z,
            Condition::Cs => c,
            Condition::Cc => !c,
            Condition::Mi => n,
            Condition::Pl => !n,
            Condition::Vs => v,
            Condition::Vc => !v,
            Condition::Hi => c && !z,
            Condition::Ls => !c || z,
            Condition::Ge => n == v,
            Condition::Lt => n != v,
            Condition::Gt => !z && n == v,
            Condition::Le => z || n != v,
            Condition::Al => true,
            Condition::Nv => false,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Condition::Eq => "eq",
            Condition::Ne => "ne",
            Condition::Cs => "cs",
            Condition::Cc => "cc",
            Condition::Mi => "mi",
            Condition::Pl => "pl",
            Condition::Vs => "vs",
            Condition::Vc => "vc",
            Condition::Hi => "hi",
            Condition::Ls => "ls",
            Condition::Ge => "ge",
            Condition::Lt => "lt",
            Condition::Gt => "gt",
            Condition::Le => "le",
            Condition::Al => "",
            Condition::Nv => "nv",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[rustfmt::skip]
pub enum AluOp { And, Eor, Sub, Rsb, Add, Adc, Sbc, Rsc, Tst, Teq, Cmp, Cmn, Orr, Mov, Bic, Mvn }

impl AluOp {
    pub fn from_bits(v: u32) -> AluOp {
        use AluOp::*;
        [And, Eor, Sub, Rsb, Add, Adc, Sbc, Rsc, Tst, Teq, Cmp, Cmn, Orr, Mov, Bic, Mvn][(v & 0xF) as usize]
    }

    /// TST/TEQ/CMP/CMN only set flags, they have no destination.
    pub fn is_test(self) -> bool {
        match self {
            AluOp::Tst | AluOp::Teq | AluOp::Cmp | AluOp::Cmn => true,
            _ => false,
        }
    }

    fn is_move(self) -> bool {
        self == AluOp::Mov || self == AluOp::Mvn
    }

    fn mnemonic(self) -> &'static str {
        match self {
            AluOp::And => "and",
            AluOp::Eor => "eor",
            AluOp::Sub => "sub",
            AluOp::Rsb => "rsb",
            AluOp::Add => "add",
            AluOp::Adc => "adc",
            AluOp::Sbc => "sbc",
            AluOp::Rsc => "rsc",
            AluOp::Tst => "tst",
            AluOp::Teq => "teq",
            AluOp::Cmp => "cmp",
            AluOp::Cmn => "cmn",
            AluOp::Orr => "orr",
            AluOp::Mov => "mov",
            AluOp::Bic => "bic",
            AluOp::Mvn => "mvn",
        }
    }
}

/// The second operand of a data processing instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShifterOperand {
    Immediate { imm: u8, rotate: u8 },
    ShiftedImmediate { rm: usize, shift: ShiftType, amount: u32 },
    ShiftedRegister { rm: usize, shift: ShiftType, rs: usize },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HalfwordKind {
    UnsignedHalf = 1,
    SignedByte = 2,
    SignedHalf = 3,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HalfwordOffset {
    Register(usize),
    Immediate(u8),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferOffset {
    Immediate(u16),
    Register { rm: usize, shift: ShiftType, amount: u32 },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MsrSource {
    Register(usize),
    Immediate { imm: u8, rotate: u8 },
}

/// Addressing flags shared by the load/store families.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Indexing {
    pub pre: bool,
    pub up: bool,
    pub writeback: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArmInstruction {
    DataProcessing {
        cond: Condition,
        op: AluOp,
        s: bool,
        rn: usize,
        rd: usize,
        operand: ShifterOperand,
    },
    Multiply {
        cond: Condition,
        accumulate: bool,
        s: bool,
        rd: usize,
        rn: usize,
        rs: usize,
        rm: usize,
    },
    MultiplyLong {
        cond: Condition,
        signed: bool,
        accumulate: bool,
        s: bool,
        rd_hi: usize,
        rd_lo: usize,
        rs: usize,
        rm: usize,
    },
    Swap {
        cond: Condition,
        byte: bool,
        rn: usize,
        rd: usize,
        rm: usize,
    },
    BranchExchange {
        cond: Condition,
        rm: usize,
    },
    HalfwordTransfer {
        cond: Condition,
        indexing: Indexing,
        load: bool,
        kind: HalfwordKind,
        rn: usize,
        rd: usize,
        offset: HalfwordOffset,
    },
    SingleTransfer {
        cond: Condition,
        indexing: Indexing,
        load: bool,
        byte: bool,
        rn: usize,
        rd: usize,
        offset: TransferOffset,
    },
    BlockTransfer {
        cond: Condition,
        indexing: Indexing,
        load: bool,
        psr: bool,
        rn: usize,
        list: u16,
    },
    Branch {
        cond: Condition,
        link: bool,
        offset: i32,
    },
    Mrs {
        cond: Condition,
        spsr: bool,
        rd: usize,
    },
    Msr {
        cond: Condition,
        spsr: bool,
        fields: u8,
        source: MsrSource,
    },
    SoftwareInterrupt {
        cond: Condition,
        comment: u32,
    },
    Undefined(u32),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Family {
    DataProcessing,
    Multiply,
    MultiplyLong,
    Swap,
    BranchExchange,
    HalfwordTransfer,
    SingleTransfer,
    BlockTransfer,
    Branch,
    Mrs,
    Msr,
    SoftwareInterrupt,
    Undefined,
}

// (mask, value, family) over the 12-bit table index, tested in order. The first match wins.
#[rustfmt::skip]
const PATTERNS: [(u32, u32, Family); 21] = [
    (0xFFF, 0x121, Family::BranchExchange),
    (0xFCF, 0x009, Family::Multiply),
    (0xF8F, 0x089, Family::MultiplyLong),
    (0xFBF, 0x109, Family::Swap),
    (0xE0F, 0x009, Family::Undefined),        // what's left of the multiply space
    (0xE1F, 0x00D, Family::Undefined),        // LDRD (ARMv5)
    (0xE1F, 0x00F, Family::Undefined),        // STRD (ARMv5)
    (0xE09, 0x009, Family::HalfwordTransfer),
    (0xFBF, 0x100, Family::Mrs),
    (0xFBF, 0x120, Family::Msr),
    (0xFB0, 0x320, Family::Msr),
    (0xF90, 0x100, Family::Undefined),        // remaining miscellaneous instructions
    (0xF90, 0x300, Family::Undefined),
    (0xC00, 0x000, Family::DataProcessing),
    (0xE01, 0x601, Family::Undefined),
    (0xC00, 0x400, Family::SingleTransfer),
    (0xE00, 0x800, Family::BlockTransfer),
    (0xE00, 0xA00, Family::Branch),
    (0xF00, 0xF00, Family::SoftwareInterrupt),
    (0xC00, 0xC00, Family::Undefined),        // coprocessor
    (0x000, 0x000, Family::Undefined),
];

const fn build_table() -> [Family; 4096] {
    let mut table = [Family::Undefined; 4096];
    let mut idx = 0;
    while idx < 4096 {
        let mut p = 0;
        while p < PATTERNS.len() {
            let (mask, value, family) = PATTERNS[p];
            if idx as u32 & mask == value {
                table[idx] = family;
                break;
            }
            p += 1;
        }
        idx += 1;
    }
    table
}

static TABLE: [Family; 4096] = build_table();

#[inline]
fn table_index(inst: u32) -> usize {
    (((inst >> 16) & 0xFF0) | ((inst >> 4) & 0xF)) as usize
}

#[inline]
fn bit(inst: u32, n: u32) -> bool {
    inst & (1 << n) != 0
}

#[inline]
fn reg(inst: u32, shift: u32) -> usize {
    ((inst >> shift) & 0xF) as usize
}

fn indexing(inst: u32) -> Indexing {
    Indexing {
        pre: bit(inst, 24),
        up: bit(inst, 23),
        writeback: bit(inst, 21),
    }
}

fn encode_indexing(i: Indexing) -> u32 {
    (u32::from(i.pre) << 24) | (u32::from(i.up) << 23) | (u32::from(i.writeback) << 21)
}

impl ArmInstruction {
    pub fn decode(inst: u32) -> ArmInstruction {
        let cond = Condition::from_bits(inst >> 28);
        match TABLE[table_index(inst)] {
            Family::DataProcessing => {
                let operand = if bit(inst, 25) {
                    ShifterOperand::Immediate {
                        imm: inst as u8,
                        rotate: ((inst >> 8) & 0xF) as u8,
                    }
                } else if bit(inst, 4) {
                    ShifterOperand::ShiftedRegister {
                        rm: reg(inst, 0),
                        shift: ShiftType::from_bits(inst >> 5),
                        rs: reg(inst, 8),
                    }
                } else {
                    ShifterOperand::ShiftedImmediate {
                        rm: reg(inst, 0),
                        shift: ShiftType::from_bits(inst >> 5),
                        amount: (inst >> 7) & 0x1F,
                    }
                };
                ArmInstruction::DataProcessing {
                    cond,
                    op: AluOp::from_bits(inst >> 21),
                    s: bit(inst, 20),
                    rn: reg(inst, 16),
                    rd: reg(inst, 12),
                    operand,
                }
            }
            Family::Multiply => ArmInstruction::Multiply {
                cond,
                accumulate: bit(inst, 21),
                s: bit(inst, 20),
                rd: reg(inst, 16),
                rn: reg(inst, 12),
                rs: reg(inst, 8),
                rm: reg(inst, 0),
            },
            Family::MultiplyLong => ArmInstruction::MultiplyLong {
                cond,
                signed: bit(inst, 22),
                accumulate: bit(inst, 21),
                s: bit(inst, 20),
                rd_hi: reg(inst, 16),
                rd_lo: reg(inst, 12),
                rs: reg(inst, 8),
                rm: reg(inst, 0),
            },
            Family::Swap => ArmInstruction::Swap {
                cond,
                byte: bit(inst, 22),
                rn: reg(inst, 16),
                rd: reg(inst, 12),
                rm: reg(inst, 0),
            },
            Family::BranchExchange => {
                if (inst >> 8) & 0xFFF != 0xFFF {
                    return ArmInstruction::Undefined(inst);
                }
                ArmInstruction::BranchExchange { cond, rm: reg(inst, 0) }
            }
            Family::HalfwordTransfer => {
                let kind = match (inst >> 5) & 3 {
                    1 => HalfwordKind::UnsignedHalf,
                    2 => HalfwordKind::SignedByte,
                    _ => HalfwordKind::SignedHalf,
                };
                let offset = if bit(inst, 22) {
                    HalfwordOffset::Immediate((((inst >> 4) & 0xF0) | (inst & 0xF)) as u8)
                } else {
                    HalfwordOffset::Register(reg(inst, 0))
                };
                ArmInstruction::HalfwordTransfer {
                    cond,
                    indexing: indexing(inst),
                    load: bit(inst, 20),
                    kind,
                    rn: reg(inst, 16),
                    rd: reg(inst, 12),
                    offset,
                }
            }
            Family::SingleTransfer => {
                let offset = if bit(inst, 25) {
                    TransferOffset::Register {
                        rm: reg(inst, 0),
                        shift: ShiftType::from_bits(inst >> 5),
                        amount: (inst >> 7) & 0x1F,
                    }
                } else {
                    TransferOffset::Immediate((inst & 0xFFF) as u16)
                };
                ArmInstruction::SingleTransfer {
                    cond,
                    indexing: indexing(inst),
                    load: bit(inst, 20),
                    byte: bit(inst, 22),
                    rn: reg(inst, 16),
                    rd: reg(inst, 12),
                    offset,
                }
            }
            Family::BlockTransfer => ArmInstruction::BlockTransfer {
                cond,
                indexing: indexing(inst),
                load: bit(inst, 20),
                psr: bit(inst, 22),
                rn: reg(inst, 16),
                list: inst as u16,
            },
            Family::Branch => ArmInstruction::Branch {
                cond,
                link: bit(inst, 24),
                offset: sign_extend(inst & 0xFF_FFFF, 24) << 2,
            },
            Family::Mrs => ArmInstruction::Mrs {
                cond,
                spsr: bit(inst, 22),
                rd: reg(inst, 12),
            },
            Family::Msr => {
                let source = if bit(inst, 25) {
                    MsrSource::Immediate {
                        imm: inst as u8,
                        rotate: ((inst >> 8) & 0xF) as u8,
                    }
                } else {
                    MsrSource::Register(reg(inst, 0))
                };
                ArmInstruction::Msr {
                    cond,
                    spsr: bit(inst, 22),
                    fields: ((inst >> 16) & 0xF) as u8,
                    source,
                }
            }
            Family::SoftwareInterrupt => ArmInstruction::SoftwareInterrupt {
                cond,
                comment: inst & 0xFF_FFFF,
            },
            Family::Undefined => ArmInstruction::Undefined(inst),
        }
    }

    pub fn encode(&self) -> u32 {
        let c = |cond: &Condition| cond.bits() << 28;
        let r = |n: &usize, shift: u32| (*n as u32) << shift;
        match self {
            ArmInstruction::DataProcessing {
                cond,
                op,
                s,
                rn,
                rd,
                operand,
            } => {
                let operand = match operand {
                    ShifterOperand::Immediate { imm, rotate } => {
                        (1 << 25) | (u32::from(*rotate) << 8) | u32::from(*imm)
                    }
                    ShifterOperand::ShiftedImmediate { rm, shift, amount } => {
                        (amount << 7) | (shift.bits() << 5) | *rm as u32
                    }
                    ShifterOperand::ShiftedRegister { rm, shift, rs } => {
                        ((*rs as u32) << 8) | (shift.bits() << 5) | (1 << 4) | *rm as u32
                    }
                };
                c(cond) | ((*op as u32) << 21) | (u32::from(*s) << 20) | r(rn, 16) | r(rd, 12) | operand
            }
            ArmInstruction::Multiply {
                cond,
                accumulate,
                s,
                rd,
                rn,
                rs,
                rm,
            } => {
                c(cond)
                    | (u32::from(*accumulate) << 21)
                    | (u32::from(*s) << 20)
                    | r(rd, 16)
                    | r(rn, 12)
                    | r(rs, 8)
                    | 0x90
                    | r(rm, 0)
            }
            ArmInstruction::MultiplyLong {
                cond,
                signed,
                accumulate,
                s,
                rd_hi,
                rd_lo,
                rs,
                rm,
            } => {
                c(cond)
                    | (1 << 23)
                    | (u32::from(*signed) << 22)
                    | (u32::from(*accumulate) << 21)
                    | (u32::from(*s) << 20)
                    | r(rd_hi, 16)
                    | r(rd_lo, 12)
                    | r(rs, 8)
                    | 0x90
                    | r(rm, 0)
            }
            ArmInstruction::Swap { cond, byte, rn, rd, rm } => {
                c(cond) | (1 << 24) | (u32::from(*byte) << 22) | r(rn, 16) | r(rd, 12) | 0x90 | r(rm, 0)
            }
            ArmInstruction::BranchExchange { cond, rm } => c(cond) | 0x012F_FF10 | r(rm, 0),
            ArmInstruction::HalfwordTransfer {
                cond,
                indexing,
                load,
                kind,
                rn,
                rd,
                offset,
            } => {
                let offset = match offset {
                    HalfwordOffset::Immediate(imm) => {
                        let imm = u32::from(*imm);
                        (1 << 22) | ((imm & 0xF0) << 4) | (imm & 0xF)
                    }
                    HalfwordOffset::Register(rm) => *rm as u32,
                };
                c(cond)
                    | encode_indexing(*indexing)
                    | (u32::from(*load) << 20)
                    | r(rn, 16)
                    | r(rd, 12)
                    | 0x90
                    | ((*kind as u32) << 5)
                    | offset
            }
            ArmInstruction::SingleTransfer {
                cond,
                indexing,
                load,
                byte,
                rn,
                rd,
                offset,
            } => {
                let offset = match offset {
                    TransferOffset::Immediate(imm) => u32::from(*imm),
                    TransferOffset::Register { rm, shift, amount } => {
                        (1 << 25) | (amount << 7) | (shift.bits() << 5) | *rm as u32
                    }
                };
                c(cond)
                    | (1 << 26)
                    | encode_indexing(*indexing)
                    | (u32::from(*byte) << 22)
                    | (u32::from(*load) << 20)
                    | r(rn, 16)
                    | r(rd, 12)
                    | offset
            }
            ArmInstruction::BlockTransfer {
                cond,
                indexing,
                load,
                psr,
                rn,
                list,
            } => {
                c(cond)
                    | (1 << 27)
                    | encode_indexing(*indexing)
                    | (u32::from(*psr) << 22)
                    | (u32::from(*load) << 20)
                    | r(rn, 16)
                    | u32::from(*list)
            }
            ArmInstruction::Branch { cond, link, offset } => {
                c(cond) | (0b101 << 25) | (u32::from(*link) << 24) | ((*offset >> 2) as u32 & 0xFF_FFFF)
            }
            ArmInstruction::Mrs { cond, spsr, rd } => c(cond) | 0x010F_0000 | (u32::from(*spsr) << 22) | r(rd, 12),
            ArmInstruction::Msr {
                cond,
                spsr,
                fields,
                source,
            } => {
                let source = match source {
                    MsrSource::Register(rm) => *rm as u32,
                    MsrSource::Immediate { imm, rotate } => (1 << 25) | (u32::from(*rotate) << 8) | u32::from(*imm),
                };
                c(cond) | 0x0120_F000 | (u32::from(*spsr) << 22) | (u32::from(*fields) << 16) | source
            }
            ArmInstruction::SoftwareInterrupt { cond, comment } => c(cond) | 0x0F00_0000 | (comment & 0xFF_FFFF),
            ArmInstruction::Undefined(inst) => *inst,
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

fn reg_list(list: u16) -> String {
    let regs: Vec<String> = (0..16).filter(|r| list & (1 << r) != 0).map(reg_name).collect();
    format!("{{{}}}", regs.join(", "))
}

fn fmt_address(f: &mut fmt::Formatter, rn: usize, indexing: Indexing, offset: &str) -> fmt::Result {
    if indexing.pre {
        let writeback = if indexing.writeback { "!" } else { "" };
        write!(f, "[{}, {}]{}", reg_name(rn), offset, writeback)
    } else {
        write!(f, "[{}], {}", reg_name(rn), offset)
    }
}

fn sign(indexing: Indexing) -> &'static str {
    if indexing.up {
        ""
    } else {
        "-"
    }
}

impl fmt::Display for ArmInstruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ArmInstruction::DataProcessing {
                cond,
                op,
                s,
                rn,
                rd,
                operand,
            } => {
                let s = if s && !op.is_test() { "s" } else { "" };
                write!(f, "{}{}{} ", op.mnemonic(), cond, s)?;
                if op.is_test() {
                    write!(f, "{}, ", reg_name(rn))?;
                } else if op.is_move() {
                    write!(f, "{}, ", reg_name(rd))?;
                } else {
                    write!(f, "{}, {}, ", reg_name(rd), reg_name(rn))?;
                }
                match operand {
                    ShifterOperand::Immediate { imm, rotate } => {
                        write!(f, "#0x{:X}", u32::from(imm).rotate_right(u32::from(rotate) * 2))
                    }
                    ShifterOperand::ShiftedImmediate { rm, shift, amount } => match (shift, amount) {
                        (ShiftType::Lsl, 0) => write!(f, "{}", reg_name(rm)),
                        (ShiftType::Ror, 0) => write!(f, "{}, rrx", reg_name(rm)),
                        (_, 0) => write!(f, "{}, {} #32", reg_name(rm), shift),
                        _ => write!(f, "{}, {} #{}", reg_name(rm), shift, amount),
                    },
                    ShifterOperand::ShiftedRegister { rm, shift, rs } => {
                        write!(f, "{}, {} {}", reg_name(rm), shift, reg_name(rs))
                    }
                }
            }
            ArmInstruction::Multiply {
                cond,
                accumulate,
                s,
                rd,
                rn,
                rs,
                rm,
            } => {
                let s = if s { "s" } else { "" };
                if accumulate {
                    write!(
                        f,
                        "mla{}{} {}, {}, {}, {}",
                        cond,
                        s,
                        reg_name(rd),
                        reg_name(rm),
                        reg_name(rs),
                        reg_name(rn)
                    )
                } else {
                    write!(f, "mul{}{} {}, {}, {}", cond, s, reg_name(rd), reg_name(rm), reg_name(rs))
                }
            }
            ArmInstruction::MultiplyLong {
                cond,
                signed,
                accumulate,
                s,
                rd_hi,
                rd_lo,
                rs,
                rm,
            } => write!(
                f,
                "{}{}{}{} {}, {}, {}, {}",
                if signed { "s" } else { "u" },
                if accumulate { "mlal" } else { "mull" },
                cond,
                if s { "s" } else { "" },
                reg_name(rd_lo),
                reg_name(rd_hi),
                reg_name(rm),
                reg_name(rs)
            ),
            ArmInstruction::Swap { cond, byte, rn, rd, rm } => write!(
                f,
                "swp{}{} {}, {}, [{}]",
                cond,
                if byte { "b" } else { "" },
                reg_name(rd),
                reg_name(rm),
                reg_name(rn)
            ),
            ArmInstruction::BranchExchange { cond, rm } => write!(f, "bx{} {}", cond, reg_name(rm)),
            ArmInstruction::HalfwordTransfer {
                cond,
                indexing,
                load,
                kind,
                rn,
                rd,
                offset,
            } => {
                let suffix = match kind {
                    HalfwordKind::UnsignedHalf => "h",
                    HalfwordKind::SignedByte => "sb",
                    HalfwordKind::SignedHalf => "sh",
                };
                write!(f, "{}{}{} {}, ", if load { "ldr" } else { "str" }, cond, suffix, reg_name(rd))?;
                let offset = match offset {
                    HalfwordOffset::Immediate(imm) => format!("#{}0x{:X}", sign(indexing), imm),
                    HalfwordOffset::Register(rm) => format!("{}{}", sign(indexing), reg_name(rm)),
                };
                fmt_address(f, rn, indexing, &offset)
            }
            ArmInstruction::SingleTransfer {
                cond,
                indexing,
                load,
                byte,
                rn,
                rd,
                offset,
            } => {
                write!(
                    f,
                    "{}{}{} {}, ",
                    if load { "ldr" } else { "str" },
                    cond,
                    if byte { "b" } else { "" },
                    reg_name(rd)
                )?;
                let offset = match offset {
                    TransferOffset::Immediate(imm) => format!("#{}0x{:X}", sign(indexing), imm),
                    TransferOffset::Register {
                        rm,
                        shift: ShiftType::Lsl,
                        amount: 0,
                    } => format!("{}{}", sign(indexing), reg_name(rm)),
                    TransferOffset::Register { rm, shift, amount } => {
                        format!("{}{}, {} #{}", sign(indexing), reg_name(rm), shift, amount)
                    }
                };
                fmt_address(f, rn, indexing, &offset)
            }
            ArmInstruction::BlockTransfer {
                cond,
                indexing,
                load,
                psr,
                rn,
                list,
            } => {
                let mode = match (indexing.pre, indexing.up) {
                    (false, true) => "ia",
                    (true, true) => "ib",
                    (false, false) => "da",
                    (true, false) => "db",
                };
                write!(
                    f,
                    "{}{}{} {}{}, {}{}",
                    if load { "ldm" } else { "stm" },
                    cond,
                    mode,
                    reg_name(rn),
                    if indexing.writeback { "!" } else { "" },
                    reg_list(list),
                    if psr { "^" } else { "" }
                )
            }
            ArmInstruction::Branch { cond, link, offset } => {
                write!(f, "b{}{} ", if link { "l" } else { "" }, cond)?;
                // Relative to the instruction itself, which is 8 bytes behind PC.
                let target = offset + 8;
                if target < 0 {
                    write!(f, "-0x{:X}", -target)
                } else {
                    write!(f, "+0x{:X}", target)
                }
            }
            ArmInstruction::Mrs { cond, spsr, rd } => {
                write!(f, "mrs{} {}, {}", cond, reg_name(rd), if spsr { "spsr" } else { "cpsr" })
            }
            ArmInstruction::Msr {
                cond,
                spsr,
                fields,
                source,
            } => {
                let mut flags = String::new();
                for (n, c) in ['c', 'x', 's', 'f'].iter().enumerate() {
                    if fields & (1 << n) != 0 {
                        flags.push(*c);
                    }
                }
                write!(f, "msr{} {}_{}, ", cond, if spsr { "spsr" } else { "cpsr" }, flags)?;
                match source {
                    MsrSource::Register(rm) => write!(f, "{}", reg_name(rm)),
                    MsrSource::Immediate { imm, rotate } => {
                        write!(f, "#0x{:X}", u32::from(imm).rotate_right(u32::from(rotate) * 2))
                    }
                }
            }
            ArmInstruction::SoftwareInterrupt { cond, comment } => write!(f, "swi{} 0x{:X}", cond, comment),
            ArmInstruction::Undefined(inst) => write!(f, "undefined 0x{:08X}", inst),
        }
    }
}

impl Cpu {
    /// Value of a register as an operand. PC reads as the instruction address + 8, or + 12 when the instruction
    /// also shifts by a register (the extra cycle lets the prefetch advance).
    fn operand(&self, n: usize, shift_by_register: bool) -> u32 {
        if n == 15 && shift_by_register {
            self.regs.pc().wrapping_add(4)
        } else {
            self.regs.get(n)
        }
    }

    /// Executes one ARM instruction. Returns false if it was undefined.
    pub(super) fn execute_arm<B: Bus>(&mut self, bus: &mut B, inst: u32) -> bool {
        let decoded = ArmInstruction::decode(inst);
        let cond = match decoded {
            ArmInstruction::Undefined(_) => Condition::Al,
            ArmInstruction::DataProcessing { cond, .. }
            | ArmInstruction::Multiply { cond, .. }
            | ArmInstruction::MultiplyLong { cond, .. }
            | ArmInstruction::Swap { cond, .. }
            | ArmInstruction::BranchExchange { cond, .. }
            | ArmInstruction::HalfwordTransfer { cond, .. }
            | ArmInstruction::SingleTransfer { cond, .. }
            | ArmInstruction::BlockTransfer { cond, .. }
            | ArmInstruction::Branch { cond, .. }
            | ArmInstruction::Mrs { cond, .. }
            | ArmInstruction::Msr { cond, .. }
            | ArmInstruction::SoftwareInterrupt { cond, .. } => cond,
        };
        if !cond.passes(self.regs.cpsr()) {
            return true;
        }

        match decoded {
            ArmInstruction::DataProcessing {
                op,
                s,
                rn,
                rd,
                operand,
                ..
            } => self.arm_data_processing(bus, op, s, rn, rd, operand),
            ArmInstruction::Multiply {
                accumulate,
                s,
                rd,
                rn,
                rs,
                rm,
                ..
            } => {
                let multiplier = self.regs.get(rs);
                let mut result = self.regs.get(rm).wrapping_mul(multiplier);
                bus.tick(alu::multiply_cycles(multiplier));
                if accumulate {
                    result = result.wrapping_add(self.regs.get(rn));
                    bus.tick(1);
                }
                self.regs.set(rd, result);
                if s {
                    self.regs.set_nz(result);
                }
            }
            ArmInstruction::MultiplyLong {
                signed,
                accumulate,
                s,
                rd_hi,
                rd_lo,
                rs,
                rm,
                ..
            } => {
                let multiplier = self.regs.get(rs);
                let mut result = if signed {
                    (i64::from(self.regs.get(rm) as i32) * i64::from(multiplier as i32)) as u64
                } else {
                    u64::from(self.regs.get(rm)) * u64::from(multiplier)
                };
                bus.tick(alu::multiply_cycles(multiplier) + 1);
                if accumulate {
                    let acc = (u64::from(self.regs.get(rd_hi)) << 32) | u64::from(self.regs.get(rd_lo));
                    result = result.wrapping_add(acc);
                    bus.tick(1);
                }
                self.regs.set(rd_lo, result as u32);
                self.regs.set(rd_hi, (result >> 32) as u32);
                if s {
                    self.regs.set_flag(FLAG_N, result >> 63 != 0);
                    self.regs.set_flag(FLAG_Z, result == 0);
                }
            }
            ArmInstruction::Swap { byte, rn, rd, rm, .. } => {
                let addr = self.regs.get(rn);
                let source = self.regs.get(rm);
                let old = if byte {
                    let old = u32::from(bus.read8(addr));
                    bus.write8(addr, source as u8);
                    old
                } else {
                    let old = self.read_word_rotated(bus, addr);
                    bus.write32(addr, source);
                    old
                };
                bus.tick(1);
                self.write_reg(bus, rd, old);
            }
            ArmInstruction::BranchExchange { rm, .. } => {
                let target = self.regs.get(rm);
                self.regs.set_flag(FLAG_T, target & 1 != 0);
                self.branch_to(bus, target);
            }
            ArmInstruction::HalfwordTransfer {
                indexing,
                load,
                kind,
                rn,
                rd,
                offset,
                ..
            } => {
                let offset = match offset {
                    HalfwordOffset::Immediate(imm) => u32::from(imm),
                    HalfwordOffset::Register(rm) => self.regs.get(rm),
                };
                let (addr, base) = self.transfer_address(rn, indexing, offset);
                if load {
                    let v = match kind {
                        HalfwordKind::UnsignedHalf => self.read_half_rotated(bus, addr),
                        HalfwordKind::SignedByte => bus.read8(addr) as i8 as u32,
                        HalfwordKind::SignedHalf => self.read_half_signed(bus, addr),
                    };
                    bus.tick(1);
                    self.writeback(rn, indexing, base);
                    self.write_reg(bus, rd, v);
                } else {
                    let v = self.store_value(rd);
                    bus.write16(addr & !1, v as u16);
                    self.writeback(rn, indexing, base);
                }
            }
            ArmInstruction::SingleTransfer {
                indexing,
                load,
                byte,
                rn,
                rd,
                offset,
                ..
            } => {
                let offset = match offset {
                    TransferOffset::Immediate(imm) => u32::from(imm),
                    TransferOffset::Register { rm, shift, amount } => {
                        let carry = self.regs.flag(FLAG_C);
                        alu::shift_immediate(shift, self.regs.get(rm), amount, carry).0
                    }
                };
                let (addr, base) = self.transfer_address(rn, indexing, offset);
                if load {
                    let v = if byte {
                        u32::from(bus.read8(addr))
                    } else {
                        self.read_word_rotated(bus, addr)
                    };
                    bus.tick(1);
                    self.writeback(rn, indexing, base);
                    self.write_reg(bus, rd, v);
                } else {
                    let v = self.store_value(rd);
                    if byte {
                        bus.write8(addr, v as u8);
                    } else {
                        bus.write32(addr & !3, v);
                    }
                    self.writeback(rn, indexing, base);
                }
            }
            ArmInstruction::BlockTransfer {
                indexing,
                load,
                psr,
                rn,
                list,
                ..
            } => self.arm_block_transfer(bus, indexing, load, psr, rn, list),
            ArmInstruction::Branch { link, offset, .. } => {
                let pc = self.regs.pc();
                if link {
                    self.regs.set(14, pc.wrapping_sub(4));
                }
                self.branch_to(bus, pc.wrapping_add(offset as u32));
            }
            ArmInstruction::Mrs { spsr, rd, .. } => {
                let v = if spsr { self.regs.spsr() } else { self.regs.cpsr() };
                self.regs.set(rd, v);
            }
            ArmInstruction::Msr {
                spsr, fields, source, ..
            } => {
                let v = match source {
                    MsrSource::Register(rm) => self.regs.get(rm),
                    MsrSource::Immediate { imm, rotate } => u32::from(imm).rotate_right(u32::from(rotate) * 2),
                };
                self.msr(spsr, fields, v);
            }
            ArmInstruction::SoftwareInterrupt { comment, .. } => {
                self.software_interrupt(bus, (comment >> 16) as u8);
            }
            ArmInstruction::Undefined(inst) => {
                self.undefined(bus, inst);
                return false;
            }
        }
        true
    }

    fn arm_data_processing<B: Bus>(
        &mut self,
        bus: &mut B,
        op: AluOp,
        s: bool,
        rn: usize,
        rd: usize,
        operand: ShifterOperand,
    ) {
        let carry = self.regs.flag(FLAG_C);
        let by_register = match operand {
            ShifterOperand::ShiftedRegister { .. } => true,
            _ => false,
        };
        let (b, shifter_carry) = match operand {
            ShifterOperand::Immediate { imm, rotate } => alu::rotated_immediate(imm, rotate, carry),
            ShifterOperand::ShiftedImmediate { rm, shift, amount } => {
                alu::shift_immediate(shift, self.regs.get(rm), amount, carry)
            }
            ShifterOperand::ShiftedRegister { rm, shift, rs } => {
                bus.tick(1);
                let amount = self.regs.get(rs) & 0xFF;
                alu::shift_register(shift, self.operand(rm, true), amount, carry)
            }
        };
        let a = self.operand(rn, by_register);

        let (value, arith) = match op {
            AluOp::And | AluOp::Tst => (a & b, None),
            AluOp::Eor | AluOp::Teq => (a ^ b, None),
            AluOp::Orr => (a | b, None),
            AluOp::Bic => (a & !b, None),
            AluOp::Mov => (b, None),
            AluOp::Mvn => (!b, None),
            AluOp::Sub | AluOp::Cmp => Self::arith(alu::sub(a, b, true)),
            AluOp::Rsb => Self::arith(alu::sub(b, a, true)),
            AluOp::Add | AluOp::Cmn => Self::arith(alu::add(a, b, false)),
            AluOp::Adc => Self::arith(alu::add(a, b, carry)),
            AluOp::Sbc => Self::arith(alu::sub(a, b, carry)),
            AluOp::Rsc => Self::arith(alu::sub(b, a, carry)),
        };

        if rd == 15 && !op.is_test() {
            // Writing PC with S set returns from an exception: the saved status comes back first, so the refill
            // happens in the restored instruction set.
            if s {
                let spsr = self.regs.spsr();
                self.regs.set_cpsr(spsr);
            }
            self.branch_to(bus, value);
            return;
        }

        if s {
            self.regs.set_nz(value);
            match arith {
                Some(result) => {
                    self.regs.set_flag(FLAG_C, result.carry);
                    self.regs.set_flag(FLAG_V, result.overflow);
                }
                None => self.regs.set_flag(FLAG_C, shifter_carry),
            }
        }
        if !op.is_test() {
            self.regs.set(rd, value);
        }
    }

    fn arith(result: alu::AluResult) -> (u32, Option<alu::AluResult>) {
        (result.value, Some(result))
    }

    /// Computes the effective address of a single load/store and the written back base value.
    fn transfer_address(&self, rn: usize, indexing: Indexing, offset: u32) -> (u32, u32) {
        let base = self.regs.get(rn);
        let offset_base = if indexing.up {
            base.wrapping_add(offset)
        } else {
            base.wrapping_sub(offset)
        };
        if indexing.pre {
            (offset_base, offset_base)
        } else {
            (base, offset_base)
        }
    }

    fn writeback(&mut self, rn: usize, indexing: Indexing, base: u32) {
        if (!indexing.pre || indexing.writeback) && rn != 15 {
            self.regs.set(rn, base);
        }
    }

    /// The value a store writes for register `rd`. Storing PC writes the instruction address + 12.
    fn store_value(&self, rd: usize) -> u32 {
        if rd == 15 {
            self.regs.pc().wrapping_add(4)
        } else {
            self.regs.get(rd)
        }
    }

    fn arm_block_transfer<B: Bus>(
        &mut self,
        bus: &mut B,
        indexing: Indexing,
        load: bool,
        psr: bool,
        rn: usize,
        list: u16,
    ) {
        // An empty list transfers PC alone, but moves the base as if all 16 registers were transferred.
        let (list, size) = if list == 0 {
            (1 << 15, 0x40)
        } else {
            (list, list.count_ones() * 4)
        };
        let base = self.regs.get(rn);
        let (start, new_base) = match (indexing.pre, indexing.up) {
            (false, true) => (base, base.wrapping_add(size)),
            (true, true) => (base.wrapping_add(4), base.wrapping_add(size)),
            (false, false) => (base.wrapping_sub(size).wrapping_add(4), base.wrapping_sub(size)),
            (true, false) => (base.wrapping_sub(size), base.wrapping_sub(size)),
        };
        // With S set, the user bank is transferred instead, except for an LDM that loads PC: that one restores CPSR.
        let user_bank = psr && !(load && list & 0x8000 != 0);
        let mut addr = start;

        if load {
            if indexing.writeback {
                self.regs.set(rn, new_base);
            }
            let mut new_pc = None;
            for r in (0..16).filter(|r| list & (1 << r) != 0) {
                let v = bus.read32(addr);
                addr = addr.wrapping_add(4);
                if r == 15 {
                    new_pc = Some(v);
                } else if user_bank {
                    self.regs.set_user(r, v);
                } else {
                    self.regs.set(r, v);
                }
            }
            bus.tick(1);
            if let Some(pc) = new_pc {
                if psr {
                    let spsr = self.regs.spsr();
                    self.regs.set_cpsr(spsr);
                }
                self.branch_to(bus, pc);
            }
        } else {
            let first = list.trailing_zeros() as usize;
            for r in (0..16).filter(|r| list & (1 << r) != 0) {
                // The base is written back after the first store, so a later store of the base sees the new value.
                let v = if r == rn && r != first && indexing.writeback {
                    new_base
                } else if r == 15 {
                    self.store_value(15)
                } else if user_bank {
                    self.regs.get_user(r)
                } else {
                    self.regs.get(r)
                };
                bus.write32(addr, v);
                addr = addr.wrapping_add(4);
            }
            if indexing.writeback {
                self.regs.set(rn, new_base);
            }
        }
    }

    fn msr(&mut self, spsr: bool, fields: u8, v: u32) {
        let mut mask = 0;
        for n in 0..4 {
            if fields & (1 << n) != 0 {
                mask |= 0xFF << (n * 8);
            }
        }
        if spsr {
            let old = self.regs.spsr();
            self.regs.set_spsr((old & !mask) | (v & mask));
            return;
        }
        // User mode may only touch the condition flags, and T is never changed through MSR.
        if self.regs.mode() == super::registers::Mode::User {
            mask &= 0xFF00_0000;
        }
        mask &= !FLAG_T;
        let old = self.regs.cpsr();
        self.regs.set_cpsr((old & !mask) | (v & mask));
    }
}
