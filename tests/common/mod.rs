//! Shared helpers for the integration tests: a tiny stand-in BIOS and a handful of ARM encoders for assembling test
//! cartridges on the fly.
#![allow(dead_code)]

use oxidegba::{Config, Gba};

pub const IWRAM: u32 = 0x0300_0000;
pub const IO: u32 = 0x0400_0000;
pub const VRAM: u32 = 0x0600_0000;

/// A BIOS that does the bare minimum: jump to the cartridge on reset, and dispatch IRQs to the handler stored at
/// 0x03FFFFFC the way the real one does.
pub fn bios() -> Vec<u8> {
    let mut bios = vec![0; 0x4000];
    let mut put = |addr: usize, v: u32| bios[addr..addr + 4].copy_from_slice(&v.to_le_bytes());
    put(0x00, 0xE59F_F038); // ldr pc, [pc, #0x38]
    put(0x04, 0xEAFF_FFFE); // b .
    put(0x18, 0xE92D_500F); // stmfd sp!, {r0-r3, r12, lr}
    put(0x1C, 0xE3A0_0301); // mov r0, #0x04000000
    put(0x20, 0xE28F_E000); // add lr, pc, #0
    put(0x24, 0xE510_F004); // ldr pc, [r0, #-4]
    put(0x28, 0xE8BD_500F); // ldmfd sp!, {r0-r3, r12, lr}
    put(0x2C, 0xE25E_F004); // subs pc, lr, #4
    put(0x40, 0x0800_0000);
    bios
}

/// Builds a cartridge image out of ARM instructions, with a header title and room for a save marker.
pub fn cartridge(program: &[u32]) -> Vec<u8> {
    let mut rom = vec![0; 0x400];
    rom[0xA0..0xA8].copy_from_slice(b"TESTCART");
    rom[0xAC..0xB0].copy_from_slice(b"ZTST");
    // Programs start after the header, so the entry point branches over it.
    rom[0..4].copy_from_slice(&b(0, 0xC0).to_le_bytes());
    for (i, inst) in program.iter().enumerate() {
        let at = 0xC0 + i * 4;
        if at + 4 > rom.len() {
            rom.resize(at + 4, 0);
        }
        rom[at..at + 4].copy_from_slice(&inst.to_le_bytes());
    }
    rom
}

pub fn with_marker(mut rom: Vec<u8>, marker: &[u8]) -> Vec<u8> {
    rom[0xB0..0xB0 + marker.len()].copy_from_slice(marker);
    rom
}

/// Boots a cartridge with the BIOS skipped.
pub fn boot(rom: Vec<u8>) -> Gba {
    let config = Config {
        skip_bios: true,
        ..Default::default()
    };
    Gba::with_config(&bios(), rom, config).unwrap()
}

/// Steps until the CPU sits on the `b .` at the end of a test program.
pub fn run_until_spinning(gba: &mut Gba) {
    for _ in 0..1_000_000 {
        let pc = gba.cpu.next_instruction_addr();
        if gba.cpu.pipeline()[0] == SPIN && pc >= 0x0800_0000 {
            return;
        }
        gba.step();
    }
    panic!("program never finished\n{}", gba.state_dump());
}

pub const SPIN: u32 = 0xEAFF_FFFE;

fn rotated_immediate(v: u32) -> u32 {
    for rot in 0..16 {
        let imm = v.rotate_left(rot * 2);
        if imm <= 0xFF {
            return (rot << 8) | imm;
        }
    }
    panic!("{:#x} can't be encoded as an immediate", v);
}

fn data_imm(op: u32, s: bool, rd: u32, rn: u32, imm: u32) -> u32 {
    0xE200_0000 | (op << 21) | ((s as u32) << 20) | (rn << 16) | (rd << 12) | rotated_immediate(imm)
}

pub fn mov(rd: u32, imm: u32) -> u32 {
    data_imm(0b1101, false, rd, 0, imm)
}

pub fn orr(rd: u32, rn: u32, imm: u32) -> u32 {
    data_imm(0b1100, false, rd, rn, imm)
}

pub fn add(rd: u32, rn: u32, imm: u32) -> u32 {
    data_imm(0b0100, false, rd, rn, imm)
}

pub fn subs(rd: u32, rn: u32, imm: u32) -> u32 {
    data_imm(0b0010, true, rd, rn, imm)
}

pub fn cmp(rn: u32, imm: u32) -> u32 {
    data_imm(0b1010, true, 0, rn, imm)
}

pub fn str32(rd: u32, rn: u32, offset: u32) -> u32 {
    0xE580_0000 | (rn << 16) | (rd << 12) | offset
}

pub fn ldr32(rd: u32, rn: u32, offset: u32) -> u32 {
    0xE590_0000 | (rn << 16) | (rd << 12) | offset
}

pub fn str16(rd: u32, rn: u32, offset: u32) -> u32 {
    0xE1C0_00B0 | (rn << 16) | (rd << 12) | ((offset & 0xF0) << 4) | (offset & 0xF)
}

pub fn str8(rd: u32, rn: u32, offset: u32) -> u32 {
    0xE5C0_0000 | (rn << 16) | (rd << 12) | offset
}

pub fn swi(n: u32) -> u32 {
    0xEF00_0000 | (n << 16)
}

pub fn bx(rn: u32) -> u32 {
    0xE12F_FF10 | rn
}

/// Branch from the instruction at `from` to `to`, both ROM offsets.
pub fn b(from: u32, to: u32) -> u32 {
    0xEA00_0000 | ((to.wrapping_sub(from + 8) >> 2) & 0x00FF_FFFF)
}

/// Conditional branch back by `back` instructions, taken when Z is clear.
pub fn bne_back(back: u32) -> u32 {
    0x1A00_0000 | ((back + 2).wrapping_neg() & 0x00FF_FFFF)
}

/// Loads an arbitrary 32 bit constant into `rd` a byte at a time.
pub fn load(rd: u32, v: u32) -> Vec<u32> {
    let mut out = vec![mov(rd, v & 0xFF)];
    for shift in [8, 16, 24].iter() {
        let part = v & (0xFF << shift);
        if part != 0 {
            out.push(orr(rd, rd, part));
        }
    }
    out
}
