//! Human readable dump of the machine state, for when a game goes off the rails and you want to know where it ended
//! up.

use crate::cpu::registers::{FLAG_C, FLAG_F, FLAG_I, FLAG_N, FLAG_T, FLAG_V, FLAG_Z};
use crate::gba::Gba;
use std::fmt;

fn flag(set: bool, name: char) -> char {
    if set {
        name
    } else {
        '-'
    }
}

impl fmt::Display for Gba {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let regs = &self.cpu.regs;
        let thumb = regs.thumb();

        writeln!(f, "Cycle {} / frame {}", self.cycle_count, self.frame_count)?;
        writeln!(f, "Registers:")?;
        for row in 0..4 {
            for col in 0..4 {
                let n = row * 4 + col;
                write!(f, "\tR{:<2}={:08X}", n, regs.get(n))?;
            }
            writeln!(f)?;
        }

        let cpsr = regs.cpsr();
        writeln!(
            f,
            "CPSR={:08X} [{}{}{}{}] {} {}{}{}",
            cpsr,
            flag(cpsr & FLAG_N != 0, 'N'),
            flag(cpsr & FLAG_Z != 0, 'Z'),
            flag(cpsr & FLAG_C != 0, 'C'),
            flag(cpsr & FLAG_V != 0, 'V'),
            regs.mode().name(),
            flag(cpsr & FLAG_I != 0, 'I'),
            flag(cpsr & FLAG_F != 0, 'F'),
            flag(cpsr & FLAG_T != 0, 'T'),
        )?;
        if regs.mode().bank() != 0 {
            writeln!(f, "SPSR={:08X}", regs.spsr())?;
        }

        let width = self.cpu.instruction_width();
        let addr = self.cpu.next_instruction_addr();
        for (i, &inst) in self.cpu.pipeline().iter().enumerate() {
            let at = addr.wrapping_add(width * i as u32);
            if thumb {
                writeln!(f, "  {:08X}: {:04X}      {}", at, inst, self.cpu.disassemble(inst, true))?;
            } else {
                writeln!(f, "  {:08X}: {:08X}  {}", at, inst, self.cpu.disassemble(inst, false))?;
            }
        }
        if self.system.halted {
            writeln!(f, "Halted")?;
        }

        let ic = &self.interrupts;
        writeln!(
            f,
            "IME={} IE={:04X} IF={:04X} {:?}",
            ic.master_enable as u8,
            ic.enable,
            ic.request,
            ic.requested_names()
        )?;

        let ppu = &self.ppu;
        let dispstat = u16::from(ppu.read_register(0x04)) | (u16::from(ppu.read_register(0x05)) << 8);
        writeln!(
            f,
            "DISPCNT={:04X} DISPSTAT={:04X} VCOUNT={}",
            ppu.dispcnt, dispstat, ppu.vcount
        )?;
        for bg in 0..4 {
            writeln!(
                f,
                "\tBG{} CNT={:04X} HOFS={:03X} VOFS={:03X}",
                bg, ppu.bgcnt[bg], ppu.bghofs[bg], ppu.bgvofs[bg]
            )?;
        }
        writeln!(
            f,
            "\tWININ={:04X} WINOUT={:04X} BLDCNT={:04X} BLDALPHA={:04X} BLDY={:02X}",
            ppu.winin, ppu.winout, ppu.bldcnt, ppu.bldalpha, ppu.bldy
        )?;

        for (i, t) in self.timers.timers.iter().enumerate() {
            writeln!(
                f,
                "TM{} counter={:04X} reload={:04X} control={:02X}",
                i, t.counter, t.reload, t.control
            )?;
        }
        for (i, ch) in self.dma.channels.iter().enumerate() {
            writeln!(
                f,
                "DMA{} {:08X} -> {:08X} count={:04X} control={:04X}",
                i, ch.source, ch.dest, ch.count, ch.control
            )?;
        }
        Ok(())
    }
}
