//! High level emulation of the firmware's software interrupt services. Instead of entering Supervisor mode and running
//! BIOS code, an SWI instruction lands here and the service is performed directly against the CPU registers and the
//! bus. Arguments and results follow the usual firmware calling convention: r0-r3 in, r0/r1/r3 out.

use crate::cpu::{Bus, Cpu};
use log::debug;

const BIOS_CHECKSUM: u32 = 0xBAAE_187F;

/// Performs the firmware service `number`. Unknown numbers are ignored.
pub fn call<B: Bus>(cpu: &mut Cpu, bus: &mut B, number: u8) {
    debug!("SWI {:#04X} {}", number, name(number));
    let (r0, r1, r2) = (cpu.regs.get(0), cpu.regs.get(1), cpu.regs.get(2));
    match number {
        0x00 => soft_reset(cpu, bus),
        0x01 => bus.clear_memory(r0),
        0x02 | 0x03 => bus.halt(),
        0x04 => intr_wait(bus, r0 != 0, r1 as u16),
        0x05 => intr_wait(bus, true, 1),
        0x06 => div(cpu, r0 as i32, r1 as i32),
        0x07 => div(cpu, r1 as i32, r0 as i32),
        0x08 => cpu.regs.set(0, sqrt(r0)),
        0x09 => cpu.regs.set(0, arctan(r0 as i32) as u32),
        0x0A => cpu.regs.set(0, u32::from(arctan2(r0 as i16 as i32, r1 as i16 as i32))),
        0x0B => cpu_set(bus, r0, r1, r2),
        0x0C => cpu_fast_set(bus, r0, r1, r2),
        0x0D => cpu.regs.set(0, BIOS_CHECKSUM),
        0x11 | 0x12 => {
            let data = lz77(bus, r0);
            write_output(bus, r1, &data, number == 0x12);
        }
        0x13 => {
            let data = huffman(bus, r0);
            write_words(bus, r1, &data);
        }
        0x14 | 0x15 => {
            let data = run_length(bus, r0);
            write_output(bus, r1, &data, number == 0x15);
        }
        _ => {}
    }
}

fn name(number: u8) -> &'static str {
    match number {
        0x00 => "SoftReset",
        0x01 => "RegisterRamReset",
        0x02 => "Halt",
        0x03 => "Stop",
        0x04 => "IntrWait",
        0x05 => "VBlankIntrWait",
        0x06 => "Div",
        0x07 => "DivArm",
        0x08 => "Sqrt",
        0x09 => "ArcTan",
        0x0A => "ArcTan2",
        0x0B => "CpuSet",
        0x0C => "CpuFastSet",
        0x0D => "GetBiosChecksum",
        0x11 => "LZ77UnCompWram",
        0x12 => "LZ77UnCompVram",
        0x13 => "HuffUnComp",
        0x14 => "RLUnCompWram",
        0x15 => "RLUnCompVram",
        _ => "(unsupported)",
    }
}

/// Clears the top of IWRAM where the firmware keeps its variables, and restarts the cartridge in System mode.
fn soft_reset<B: Bus>(cpu: &mut Cpu, bus: &mut B) {
    for addr in (0x0300_7E00..0x0300_8000).step_by(4) {
        bus.write32(addr, 0);
    }
    cpu.skip_bios(bus);
}

/// Waits for one of the interrupts in `mask`. With `discard` set, requests that are already pending are thrown away
/// first so only a fresh one ends the wait.
fn intr_wait<B: Bus>(bus: &mut B, discard: bool, mask: u16) {
    let ic = bus.interrupt_controller();
    if discard {
        ic.request &= !mask;
    }
    ic.enable |= mask;
    ic.master_enable = true;
    bus.halt();
}

fn div(cpu: &mut Cpu, num: i32, den: i32) {
    if den == 0 {
        cpu.regs.set(0, if num < 0 { 1 } else { -1i32 as u32 });
        cpu.regs.set(1, num as u32);
        cpu.regs.set(3, 1);
        return;
    }
    let quot = num.wrapping_div(den);
    cpu.regs.set(0, quot as u32);
    cpu.regs.set(1, num.wrapping_rem(den) as u32);
    cpu.regs.set(3, quot.wrapping_abs() as u32);
}

fn sqrt(v: u32) -> u32 {
    let (mut rem, mut root) = (v, 0u32);
    let mut bit = 1u32 << 30;
    while bit > rem {
        bit >>= 2;
    }
    while bit != 0 {
        if rem >= root + bit {
            rem -= root + bit;
            root = (root >> 1) + bit;
        } else {
            root >>= 1;
        }
        bit >>= 2;
    }
    root
}

/// Arc tangent of a 1.14 fixed point value, as a 16 bit angle where 0x4000 is a quarter turn. Evaluated with the
/// same polynomial the firmware uses.
fn arctan(i: i32) -> i32 {
    let a = -(i.wrapping_mul(i) >> 14);
    let mut b = ((0xA9i32.wrapping_mul(a)) >> 14) + 0x390;
    for &c in &[0x91C, 0xFB6, 0x16AA, 0x2081, 0x3651, 0xA2F9] {
        b = (b.wrapping_mul(a) >> 14) + c;
    }
    i.wrapping_mul(b) >> 16
}

/// Full circle arc tangent of y/x. 0 points along +X, and the angle grows counter clockwise to 0xFFFF.
fn arctan2(x: i32, y: i32) -> u16 {
    if y == 0 {
        return if x >= 0 { 0 } else { 0x8000 };
    }
    if x == 0 {
        return if y >= 0 { 0x4000 } else { 0xC000 };
    }
    let angle = if y >= 0 {
        if x >= 0 && x >= y {
            arctan((y << 14) / x)
        } else if x < 0 && -x >= y {
            arctan((y << 14) / x) + 0x8000
        } else {
            0x4000 - arctan((x << 14) / y)
        }
    } else if x <= 0 && -x > -y {
        arctan((y << 14) / x) + 0x8000
    } else if x > 0 && x >= -y {
        arctan((y << 14) / x) + 0x1_0000
    } else {
        0xC000 - arctan((x << 14) / y)
    };
    angle as u16
}

/// Copies or fills `count` halfwords or words. r2 bits 0-20 are the count, bit 24 selects fill and bit 26 selects
/// words.
fn cpu_set<B: Bus>(bus: &mut B, src: u32, dest: u32, control: u32) {
    let count = match control & 0x1F_FFFF {
        0 => 0x10_0000,
        n => n,
    };
    let fill = control & (1 << 24) != 0;
    if control & (1 << 26) != 0 {
        let (mut src, mut dest) = (src & !3, dest & !3);
        let value = bus.read32(src);
        for _ in 0..count {
            let v = if fill { value } else { bus.read32(src) };
            bus.write32(dest, v);
            if !fill {
                src = src.wrapping_add(4);
            }
            dest = dest.wrapping_add(4);
        }
    } else {
        let (mut src, mut dest) = (src & !1, dest & !1);
        let value = bus.read16(src);
        for _ in 0..count {
            let v = if fill { value } else { bus.read16(src) };
            bus.write16(dest, v);
            if !fill {
                src = src.wrapping_add(2);
            }
            dest = dest.wrapping_add(2);
        }
    }
}

/// Like CpuSet, but always in words and in blocks of eight.
fn cpu_fast_set<B: Bus>(bus: &mut B, src: u32, dest: u32, control: u32) {
    let count = match control & 0x1F_FFFF {
        0 => 0x2_0000,
        n => (n + 7) & !7,
    };
    let fill = control & (1 << 24) != 0;
    let (mut src, mut dest) = (src & !3, dest & !3);
    let value = bus.read32(src);
    for _ in 0..count {
        let v = if fill { value } else { bus.read32(src) };
        bus.write32(dest, v);
        if !fill {
            src = src.wrapping_add(4);
        }
        dest = dest.wrapping_add(4);
    }
}

/// The decompressed size from a compression header: bits 8-31 of the first word.
fn header_size<B: Bus>(bus: &mut B, src: u32) -> usize {
    (bus.read32(src & !3) >> 8) as usize
}

fn lz77<B: Bus>(bus: &mut B, src: u32) -> Vec<u8> {
    let size = header_size(bus, src);
    let mut out = Vec::with_capacity(size);
    let mut src = (src & !3).wrapping_add(4);
    while out.len() < size {
        let flags = bus.read8(src);
        src = src.wrapping_add(1);
        for block in (0..8).rev() {
            if out.len() >= size {
                break;
            }
            if flags & (1 << block) == 0 {
                out.push(bus.read8(src));
                src = src.wrapping_add(1);
                continue;
            }
            let (b1, b2) = (bus.read8(src), bus.read8(src.wrapping_add(1)));
            src = src.wrapping_add(2);
            let len = usize::from(b1 >> 4) + 3;
            let disp = ((usize::from(b1 & 0xF) << 8) | usize::from(b2)) + 1;
            for _ in 0..len {
                // A reference before the start of the output reads zeroes.
                let v = out.len().checked_sub(disp).map_or(0, |i| out[i]);
                out.push(v);
            }
        }
    }
    out.truncate(size);
    out
}

fn run_length<B: Bus>(bus: &mut B, src: u32) -> Vec<u8> {
    let size = header_size(bus, src);
    let mut out = Vec::with_capacity(size);
    let mut src = (src & !3).wrapping_add(4);
    while out.len() < size {
        let flag = bus.read8(src);
        src = src.wrapping_add(1);
        if flag & 0x80 != 0 {
            let v = bus.read8(src);
            src = src.wrapping_add(1);
            out.extend(std::iter::repeat(v).take(usize::from(flag & 0x7F) + 3));
        } else {
            for _ in 0..=flag {
                out.push(bus.read8(src));
                src = src.wrapping_add(1);
            }
        }
    }
    out.truncate(size);
    out
}

/// Huffman streams are a tree table followed by 32 bit words of path bits, most significant bit first. Each tree node
/// holds a 6 bit offset to its pair of children, and two flags marking which of those children are leaves.
fn huffman<B: Bus>(bus: &mut B, src: u32) -> Vec<u8> {
    let src = src & !3;
    let header = bus.read32(src);
    let nibbles = header & 0xF == 4;
    let size = (header >> 8) as usize;
    let tree_size = u32::from(bus.read8(src.wrapping_add(4)));
    let root = src.wrapping_add(5);
    let mut stream = src.wrapping_add(4).wrapping_add((tree_size + 1) * 2);

    let mut out = Vec::with_capacity(size);
    let mut low_nibble: Option<u8> = None;
    let (mut node_addr, mut node) = (root, bus.read8(root));
    while out.len() < size {
        let word = bus.read32(stream);
        stream = stream.wrapping_add(4);
        for bit in (0..32).rev() {
            let right = (word >> bit) & 1;
            let child = (node_addr & !1) + u32::from(node & 0x3F) * 2 + 2 + right;
            let leaf_flag = if right == 1 { 0x40 } else { 0x80 };
            if node & leaf_flag == 0 {
                node_addr = child;
                node = bus.read8(child);
                continue;
            }

            let value = bus.read8(child);
            if nibbles {
                match low_nibble.take() {
                    Some(lo) => out.push(lo | (value << 4)),
                    None => low_nibble = Some(value & 0xF),
                }
            } else {
                out.push(value);
            }
            node_addr = root;
            node = bus.read8(root);
            if out.len() >= size {
                break;
            }
        }
    }
    out.truncate(size);
    out
}

/// Writes decompressed data out. VRAM can't take byte writes, so the VRAM variants write halfwords.
fn write_output<B: Bus>(bus: &mut B, dest: u32, data: &[u8], halfwords: bool) {
    if halfwords {
        let dest = dest & !1;
        for (i, pair) in data.chunks(2).enumerate() {
            let v = u16::from(pair[0]) | pair.get(1).map_or(0, |&hi| u16::from(hi) << 8);
            bus.write16(dest.wrapping_add(i as u32 * 2), v);
        }
    } else {
        for (i, &b) in data.iter().enumerate() {
            bus.write8(dest.wrapping_add(i as u32), b);
        }
    }
}

fn write_words<B: Bus>(bus: &mut B, dest: u32, data: &[u8]) {
    let dest = dest & !3;
    for (i, chunk) in data.chunks(4).enumerate() {
        let v = chunk
            .iter()
            .enumerate()
            .fold(0u32, |acc, (n, &b)| acc | (u32::from(b) << (n * 8)));
        bus.write32(dest.wrapping_add(i as u32 * 4), v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::registers::Mode;
    use crate::cpu::tests::{cpu_at, TestBus};

    fn swi(number: u8, regs: &[u32]) -> (Cpu, TestBus) {
        let mut bus = TestBus::new();
        let mut cpu = cpu_at(&mut bus, 0x1000, false);
        for (n, &v) in regs.iter().enumerate() {
            cpu.regs.set(n, v);
        }
        call(&mut cpu, &mut bus, number);
        (cpu, bus)
    }

    fn write_bytes(bus: &mut TestBus, addr: u32, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            bus.write8(addr + i as u32, b);
        }
    }

    fn read_bytes(bus: &mut TestBus, addr: u32, len: usize) -> Vec<u8> {
        (0..len).map(|i| bus.read8(addr + i as u32)).collect()
    }

    #[test]
    fn division() {
        let (cpu, _) = swi(0x06, &[(-7i32) as u32, 2]);
        assert_eq!(cpu.regs.get(0) as i32, -3);
        assert_eq!(cpu.regs.get(1) as i32, -1);
        assert_eq!(cpu.regs.get(3), 3);

        // DivArm takes its operands the other way around.
        let (cpu, _) = swi(0x07, &[5, 100]);
        assert_eq!((cpu.regs.get(0), cpu.regs.get(1)), (20, 0));

        let (cpu, _) = swi(0x06, &[0x8000_0000, (-1i32) as u32]);
        assert_eq!(cpu.regs.get(0), 0x8000_0000);
    }

    #[test]
    fn division_by_zero() {
        let (cpu, _) = swi(0x06, &[10, 0]);
        assert_eq!(cpu.regs.get(0), 0xFFFF_FFFF);
        assert_eq!(cpu.regs.get(1), 10);
        assert_eq!(cpu.regs.get(3), 1);
    }

    #[test]
    fn square_root() {
        assert_eq!(sqrt(0), 0);
        assert_eq!(sqrt(1), 1);
        assert_eq!(sqrt(15), 3);
        assert_eq!(sqrt(16), 4);
        assert_eq!(sqrt(0xFFFF_FFFF), 0xFFFF);
        let (cpu, _) = swi(0x08, &[10_000]);
        assert_eq!(cpu.regs.get(0), 100);
    }

    #[test]
    fn arc_tangents() {
        assert_eq!(arctan(0), 0);
        assert_eq!(arctan(0x4000), 0x2000);
        assert_eq!(arctan(-0x4000), -0x2000);

        assert_eq!(arctan2(1, 0), 0);
        assert_eq!(arctan2(0, 1), 0x4000);
        assert_eq!(arctan2(-1, 0), 0x8000);
        assert_eq!(arctan2(0, -1), 0xC000);
        assert_eq!(arctan2(100, 100), 0x2000);
        assert_eq!(arctan2(-100, 100), 0x6000);
        assert_eq!(arctan2(-100, -100), 0xA000);
        assert_eq!(arctan2(100, -100), 0xE000);
    }

    #[test]
    fn checksum() {
        let (cpu, _) = swi(0x0D, &[]);
        assert_eq!(cpu.regs.get(0), 0xBAAE_187F);
    }

    #[test]
    fn cpu_set_copy_and_fill() {
        let mut bus = TestBus::new();
        let mut cpu = cpu_at(&mut bus, 0x1000, false);
        write_bytes(&mut bus, 0x2000, &[1, 2, 3, 4, 5, 6, 7, 8]);

        cpu.regs.set(0, 0x2000);
        cpu.regs.set(1, 0x3000);
        cpu.regs.set(2, 3);
        call(&mut cpu, &mut bus, 0x0B);
        assert_eq!(read_bytes(&mut bus, 0x3000, 8), vec![1, 2, 3, 4, 5, 6, 0, 0]);

        cpu.regs.set(1, 0x4000);
        cpu.regs.set(2, (1 << 24) | (1 << 26) | 2);
        call(&mut cpu, &mut bus, 0x0B);
        assert_eq!(bus.read32(0x4000), 0x0403_0201);
        assert_eq!(bus.read32(0x4004), 0x0403_0201);
        assert_eq!(bus.read32(0x4008), 0);
    }

    #[test]
    fn cpu_fast_set_rounds_up_to_blocks_of_eight() {
        let mut bus = TestBus::new();
        let mut cpu = cpu_at(&mut bus, 0x1000, false);
        bus.write32(0x2000, 0xAABB_CCDD);
        cpu.regs.set(0, 0x2000);
        cpu.regs.set(1, 0x3000);
        cpu.regs.set(2, (1 << 24) | 1);
        call(&mut cpu, &mut bus, 0x0C);
        for i in 0..8 {
            assert_eq!(bus.read32(0x3000 + i * 4), 0xAABB_CCDD);
        }
        assert_eq!(bus.read32(0x3020), 0);
    }

    #[test]
    fn lz77_decompression() {
        let mut bus = TestBus::new();
        let mut cpu = cpu_at(&mut bus, 0x1000, false);
        // "ABC" then a 6 byte back reference of distance 3: "ABCABCABC".
        bus.write32(0x2000, (9 << 8) | 0x10);
        write_bytes(&mut bus, 0x2004, &[0b0001_0000, b'A', b'B', b'C', 0x30, 0x02]);
        cpu.regs.set(0, 0x2000);
        cpu.regs.set(1, 0x3000);
        call(&mut cpu, &mut bus, 0x11);
        assert_eq!(read_bytes(&mut bus, 0x3000, 10), b"ABCABCABC\0".to_vec());
    }

    #[test]
    fn run_length_decompression_to_vram_uses_halfwords() {
        let mut bus = TestBus::new();
        let mut cpu = cpu_at(&mut bus, 0x1000, false);
        // 2 literal bytes, then 'Z' repeated 3 times.
        bus.write32(0x2000, (5 << 8) | 0x30);
        write_bytes(&mut bus, 0x2004, &[0x01, b'x', b'y', 0x80, b'Z']);
        cpu.regs.set(0, 0x2000);
        cpu.regs.set(1, 0x3000);
        call(&mut cpu, &mut bus, 0x15);
        assert_eq!(read_bytes(&mut bus, 0x3000, 6), b"xyZZZ\0".to_vec());
    }

    #[test]
    fn huffman_decompression() {
        let mut bus = TestBus::new();
        let mut cpu = cpu_at(&mut bus, 0x1000, false);
        bus.write32(0x2000, (4 << 8) | 0x28);
        // Tree: a root whose two children are both leaves.
        write_bytes(&mut bus, 0x2004, &[0x01, 0xC0, b'A', b'B']);
        // Paths 0, 1, 1, 0.
        bus.write32(0x2008, 0x6000_0000);
        cpu.regs.set(0, 0x2000);
        cpu.regs.set(1, 0x3000);
        call(&mut cpu, &mut bus, 0x13);
        assert_eq!(read_bytes(&mut bus, 0x3000, 4), b"ABBA".to_vec());
    }

    #[test]
    fn waits_halt_the_cpu() {
        let (_, bus) = swi(0x02, &[]);
        assert!(bus.halted);

        let (_, mut bus) = swi(0x05, &[]);
        assert!(bus.halted);
        let ic = bus.interrupt_controller();
        assert!(ic.master_enable);
        assert_eq!(ic.enable & 1, 1);
    }

    #[test]
    fn soft_reset_restarts_the_cartridge() {
        let (cpu, _) = swi(0x00, &[1, 2, 3]);
        assert_eq!(cpu.next_instruction_addr(), 0x0800_0000);
        assert_eq!(cpu.regs.mode(), Mode::System);
        assert_eq!(cpu.regs.get(0), 0);
        assert_eq!(cpu.regs.get(13), 0x0300_7F00);
    }

    #[test]
    fn unknown_calls_are_ignored() {
        let (cpu, _) = swi(0x2A, &[7]);
        assert_eq!(cpu.regs.get(0), 7);
    }
}
