//! The GBA is built around an ARM7TDMI: a 32-bit RISC core with a three stage pipeline and two instruction sets. The
//! 32-bit ARM set is fully featured (every instruction is conditional, operands go through a barrel shifter), while
//! the 16-bit THUMB set trades some of that for code density. Both sets operate on the same register file, and the T
//! bit in CPSR selects which one is being decoded.
//! This module contains the interpreter core: the pipeline, exception entry and the step loop. Decoding and execution
//! of the two instruction sets lives in the `arm` and `thumb` submodules.

pub mod alu;
pub mod arm;
pub mod registers;
pub mod thumb;

use crate::interrupt::InterruptController;
use log::{error, trace, warn};
use registers::{Mode, Registers, FLAG_F, FLAG_I, FLAG_T};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LOG_LIMIT: u32 = 100;

/// Everything the CPU needs from the outside world. Reads and writes charge their own wait states, `tick` is only
/// used for internal cycles (multiplies, register shifts, the base cost of an instruction).
pub trait Bus {
    fn read8(&mut self, addr: u32) -> u8;
    fn read16(&mut self, addr: u32) -> u16;
    fn read32(&mut self, addr: u32) -> u32;
    fn write8(&mut self, addr: u32, v: u8);
    fn write16(&mut self, addr: u32, v: u16);
    fn write32(&mut self, addr: u32, v: u32);
    fn tick(&mut self, cycles: u32);
    fn interrupt_controller(&mut self) -> &mut InterruptController;

    /// An opcode fetch. The GBA bus remembers the last fetched opcode, which is what protected BIOS reads return.
    fn fetch16(&mut self, addr: u32) -> u16 {
        self.read16(addr)
    }
    fn fetch32(&mut self, addr: u32) -> u32 {
        self.read32(addr)
    }

    /// Halt the CPU until an enabled interrupt is requested.
    fn halt(&mut self) {}
    /// Zero the memories selected by a RegisterRamReset flag byte.
    fn clear_memory(&mut self, _flags: u32) {}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Exception {
    Reset,
    Undefined,
    SoftwareInterrupt,
    Irq,
}

impl Exception {
    fn vector(self) -> u32 {
        match self {
            Exception::Reset => 0x00,
            Exception::Undefined => 0x04,
            Exception::SoftwareInterrupt => 0x08,
            Exception::Irq => 0x18,
        }
    }

    fn mode(self) -> Mode {
        match self {
            Exception::Reset | Exception::SoftwareInterrupt => Mode::Supervisor,
            Exception::Undefined => Mode::Undefined,
            Exception::Irq => Mode::Irq,
        }
    }
}

#[derive(Clone, Default, Deserialize, Serialize)]
pub struct Cpu {
    pub regs: Registers,
    pipeline: [u32; 2],

    // Set whenever an instruction refills the pipeline, so the step loop knows not to advance PC.
    #[serde(skip)]
    flushed: bool,
    // Consecutive unhandled opcodes. Diagnostics only, so not part of a snapshot.
    #[serde(skip)]
    unhandled: u32,
    #[serde(skip)]
    log_limit: u32,
}

impl Cpu {
    pub fn new() -> Cpu {
        Cpu {
            log_limit: DEFAULT_LOG_LIMIT,
            ..Default::default()
        }
    }

    pub fn set_log_limit(&mut self, limit: u32) {
        self.log_limit = limit;
    }

    /// Power-on state: Supervisor mode with interrupts masked, executing from the reset vector.
    pub fn reset<B: Bus>(&mut self, bus: &mut B) {
        self.regs = Registers::new();
        self.regs.set_banked_sp(Mode::Supervisor, 0x0300_7F00);
        self.regs.set_banked_sp(Mode::Irq, 0x0300_7FA0);
        self.regs.set_banked_sp(Mode::System, 0x0300_7F00);
        self.unhandled = 0;
        self.fill_pipeline(bus, 0);
    }

    /// The state the BIOS leaves behind right before it jumps to the cartridge entry point.
    pub fn skip_bios<B: Bus>(&mut self, bus: &mut B) {
        self.regs = Registers::new();
        self.regs.set_banked_sp(Mode::Supervisor, 0x0300_7FE0);
        self.regs.set_banked_sp(Mode::Irq, 0x0300_7FA0);
        self.regs.set_banked_sp(Mode::System, 0x0300_7F00);
        self.regs.set_cpsr(Mode::System as u32);
        self.fill_pipeline(bus, 0x0800_0000);
    }

    pub fn pipeline(&self) -> [u32; 2] {
        self.pipeline
    }

    /// The width in bytes of an instruction in the current state.
    #[inline]
    pub fn instruction_width(&self) -> u32 {
        if self.regs.thumb() {
            2
        } else {
            4
        }
    }

    /// The address of the instruction that will execute next.
    pub fn next_instruction_addr(&self) -> u32 {
        self.regs.pc().wrapping_sub(self.instruction_width() * 2)
    }

    /// Refills the pipeline from `addr`. Afterwards PC points at the next instruction to be prefetched, two slots past
    /// `addr`.
    pub fn fill_pipeline<B: Bus>(&mut self, bus: &mut B, addr: u32) {
        if self.regs.thumb() {
            let addr = addr & !1;
            self.pipeline = [
                u32::from(bus.fetch16(addr)),
                u32::from(bus.fetch16(addr.wrapping_add(2))),
            ];
            self.regs.set_pc(addr.wrapping_add(4));
        } else {
            let addr = addr & !3;
            self.pipeline = [bus.fetch32(addr), bus.fetch32(addr.wrapping_add(4))];
            self.regs.set_pc(addr.wrapping_add(8));
        }
        self.flushed = true;
    }

    /// Executes a single instruction, or enters the IRQ handler if an interrupt is due.
    pub fn step<B: Bus>(&mut self, bus: &mut B) {
        if !self.regs.flag(FLAG_I) && bus.interrupt_controller().irq_line() {
            self.exception(bus, Exception::Irq);
            return;
        }

        self.flushed = false;
        let inst = self.pipeline[0];
        let pc = self.regs.pc();
        let thumb = self.regs.thumb();
        self.pipeline[0] = self.pipeline[1];
        self.pipeline[1] = if thumb {
            u32::from(bus.fetch16(pc))
        } else {
            bus.fetch32(pc)
        };

        if log::log_enabled!(log::Level::Trace) {
            trace!("{:08X}: {}", pc.wrapping_sub(self.instruction_width() * 2), self.disassemble(inst, thumb));
        }

        let handled = if thumb {
            self.execute_thumb(bus, inst as u16)
        } else {
            self.execute_arm(bus, inst)
        };
        bus.tick(1);

        if handled {
            self.unhandled = 0;
        }
        if !self.flushed {
            self.regs.set_pc(pc.wrapping_add(if thumb { 2 } else { 4 }));
        }
    }

    pub fn disassemble(&self, inst: u32, thumb: bool) -> String {
        if thumb {
            thumb::ThumbInstruction::decode(inst as u16).to_string()
        } else {
            arm::ArmInstruction::decode(inst).to_string()
        }
    }

    /// Enters an exception handler. LR gets the address the handler's conventional return sequence expects.
    pub fn exception<B: Bus>(&mut self, bus: &mut B, kind: Exception) {
        let pc = self.regs.pc();
        let thumb = self.regs.thumb();
        let lr = match kind {
            // The IRQ is taken in place of the instruction at pc - 2*width, and handlers return with SUBS PC, LR, #4.
            Exception::Irq if thumb => pc,
            Exception::Irq => pc.wrapping_sub(4),
            // SWI and UND return to the instruction following the one that raised them.
            _ if thumb => pc.wrapping_sub(2),
            _ => pc.wrapping_sub(4),
        };

        let cpsr = self.regs.cpsr();
        self.regs.set_mode(kind.mode());
        self.regs.set_spsr(cpsr);
        self.regs.set(14, lr);
        self.regs.set_flag(FLAG_T, false);
        self.regs.set_flag(FLAG_I, true);
        if kind == Exception::Reset {
            self.regs.set_flag(FLAG_F, true);
        }
        self.fill_pipeline(bus, kind.vector());
    }

    /// Jumps to `addr` in the current instruction set.
    fn branch_to<B: Bus>(&mut self, bus: &mut B, addr: u32) {
        self.fill_pipeline(bus, addr);
    }

    /// Writes a register, refilling the pipeline if it was PC.
    fn write_reg<B: Bus>(&mut self, bus: &mut B, n: usize, v: u32) {
        if n == 15 {
            self.branch_to(bus, v);
        } else {
            self.regs.set(n, v);
        }
    }

    /// Loads a word the way LDR does: misaligned addresses read the aligned word rotated so the addressed byte lands
    /// in the low byte.
    fn read_word_rotated<B: Bus>(&mut self, bus: &mut B, addr: u32) -> u32 {
        bus.read32(addr & !3).rotate_right((addr & 3) * 8)
    }

    /// LDRH from an odd address rotates the halfword by a byte.
    fn read_half_rotated<B: Bus>(&mut self, bus: &mut B, addr: u32) -> u32 {
        u32::from(bus.read16(addr & !1)).rotate_right((addr & 1) * 8)
    }

    /// LDRSH from an odd address behaves like LDRSB.
    fn read_half_signed<B: Bus>(&mut self, bus: &mut B, addr: u32) -> u32 {
        if addr & 1 != 0 {
            bus.read8(addr) as i8 as u32
        } else {
            bus.read16(addr) as i16 as u32
        }
    }

    fn software_interrupt<B: Bus>(&mut self, bus: &mut B, number: u8) {
        crate::bios::call(self, bus, number);
    }

    /// Handles an opcode that doesn't decode to anything. Logs (a bounded number of times) and raises UND.
    fn undefined<B: Bus>(&mut self, bus: &mut B, inst: u32) {
        let thumb = self.regs.thumb();
        let addr = self.regs.pc().wrapping_sub(self.instruction_width() * 2);
        self.unhandled = self.unhandled.saturating_add(1);
        if self.unhandled <= self.log_limit {
            if thumb {
                error!("Unhandled THUMB instruction {:04X} at {:08X}", inst, addr);
            } else {
                error!("Unhandled ARM instruction {:08X} at {:08X}", inst, addr);
            }
            if self.unhandled == self.log_limit {
                warn!("Suppressing further unhandled instruction logs");
            }
        }
        self.exception(bus, Exception::Undefined);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::interrupt::Interrupt;

    /// A flat 64KiB RAM mirrored across the address space, for running small hand assembled programs.
    pub struct TestBus {
        pub mem: Vec<u8>,
        pub cycles: u32,
        pub interrupts: InterruptController,
        pub halted: bool,
    }

    impl TestBus {
        pub fn new() -> TestBus {
            TestBus {
                mem: vec![0; 0x10000],
                cycles: 0,
                interrupts: InterruptController::new(),
                halted: false,
            }
        }

        pub fn load_arm(&mut self, addr: u32, program: &[u32]) {
            for (i, inst) in program.iter().enumerate() {
                self.write32(addr + i as u32 * 4, *inst);
            }
        }

        pub fn load_thumb(&mut self, addr: u32, program: &[u16]) {
            for (i, inst) in program.iter().enumerate() {
                self.write16(addr + i as u32 * 2, *inst);
            }
        }
    }

    impl Bus for TestBus {
        fn read8(&mut self, addr: u32) -> u8 {
            self.mem[(addr & 0xFFFF) as usize]
        }
        fn read16(&mut self, addr: u32) -> u16 {
            let addr = addr & !1;
            u16::from(self.read8(addr)) | (u16::from(self.read8(addr + 1)) << 8)
        }
        fn read32(&mut self, addr: u32) -> u32 {
            let addr = addr & !3;
            u32::from(self.read16(addr)) | (u32::from(self.read16(addr + 2)) << 16)
        }
        fn write8(&mut self, addr: u32, v: u8) {
            self.mem[(addr & 0xFFFF) as usize] = v;
        }
        fn write16(&mut self, addr: u32, v: u16) {
            let addr = addr & !1;
            self.write8(addr, v as u8);
            self.write8(addr + 1, (v >> 8) as u8);
        }
        fn write32(&mut self, addr: u32, v: u32) {
            let addr = addr & !3;
            self.write16(addr, v as u16);
            self.write16(addr + 2, (v >> 16) as u16);
        }
        fn tick(&mut self, cycles: u32) {
            self.cycles += cycles;
        }
        fn interrupt_controller(&mut self) -> &mut InterruptController {
            &mut self.interrupts
        }
        fn halt(&mut self) {
            self.halted = true;
        }
    }

    /// A CPU in System mode, about to execute the program at `addr`.
    pub fn cpu_at(bus: &mut TestBus, addr: u32, thumb: bool) -> Cpu {
        let mut cpu = Cpu::new();
        cpu.regs.set_cpsr(Mode::System as u32 | if thumb { FLAG_T } else { 0 });
        cpu.fill_pipeline(bus, addr);
        cpu
    }

    #[test]
    fn pipeline_runs_ahead_of_execution() {
        let mut bus = TestBus::new();
        // mov r0, pc ; mov r1, pc
        bus.load_arm(0x100, &[0xE1A0_000F, 0xE1A0_100F]);
        let mut cpu = cpu_at(&mut bus, 0x100, false);
        assert_eq!(cpu.regs.pc(), 0x108);
        cpu.step(&mut bus);
        assert_eq!(cpu.regs.get(0), 0x108);
        assert_eq!(cpu.regs.pc(), 0x10C);
        cpu.step(&mut bus);
        assert_eq!(cpu.regs.get(1), 0x10C);
        assert_eq!(cpu.next_instruction_addr(), 0x108);
    }

    #[test]
    fn reset_state() {
        let mut bus = TestBus::new();
        let mut cpu = Cpu::new();
        cpu.reset(&mut bus);
        assert_eq!(cpu.regs.mode(), Mode::Supervisor);
        assert!(cpu.regs.flag(FLAG_I) && cpu.regs.flag(FLAG_F));
        assert_eq!(cpu.regs.get(13), 0x0300_7F00);
        assert_eq!(cpu.regs.banked_sp(Mode::Irq), 0x0300_7FA0);
        assert_eq!(cpu.regs.pc(), 8);
    }

    #[test]
    fn irq_entry_from_arm() {
        let mut bus = TestBus::new();
        bus.load_arm(0x200, &[0xE1A0_0000, 0xE1A0_0000]);
        let mut cpu = cpu_at(&mut bus, 0x200, false);
        bus.interrupts.reg_ie_write(Interrupt::VBlank as u16);
        bus.interrupts.reg_ime_write(1);
        bus.interrupts.request(Interrupt::VBlank);

        cpu.step(&mut bus);
        assert_eq!(cpu.regs.mode(), Mode::Irq);
        assert_eq!(cpu.regs.get(14), 0x204);
        assert_eq!(cpu.regs.spsr() & 0x1F, Mode::System as u32);
        assert!(cpu.regs.flag(FLAG_I));
        assert_eq!(cpu.next_instruction_addr(), 0x18);

        // Masked by I now, so the handler runs.
        cpu.step(&mut bus);
        assert_eq!(cpu.regs.mode(), Mode::Irq);
    }

    #[test]
    fn irq_entry_from_thumb() {
        let mut bus = TestBus::new();
        bus.load_thumb(0x300, &[0x46C0, 0x46C0]);
        let mut cpu = cpu_at(&mut bus, 0x300, true);
        bus.interrupts.reg_ie_write(Interrupt::Timer0 as u16);
        bus.interrupts.reg_ime_write(1);
        bus.interrupts.request(Interrupt::Timer0);
        cpu.step(&mut bus);
        assert!(!cpu.regs.thumb());
        assert_eq!(cpu.regs.get(14), 0x304);
        assert!(cpu.regs.spsr() & FLAG_T != 0);
    }

    #[test]
    fn irq_needs_ime() {
        let mut bus = TestBus::new();
        bus.load_arm(0x200, &[0xE1A0_0000]);
        let mut cpu = cpu_at(&mut bus, 0x200, false);
        bus.interrupts.reg_ie_write(Interrupt::VBlank as u16);
        bus.interrupts.request(Interrupt::VBlank);
        cpu.step(&mut bus);
        assert_eq!(cpu.regs.mode(), Mode::System);
    }

    #[test]
    fn undefined_instruction_traps() {
        let mut bus = TestBus::new();
        // An ARM coprocessor data operation.
        bus.load_arm(0x400, &[0xEE00_0000]);
        let mut cpu = cpu_at(&mut bus, 0x400, false);
        cpu.step(&mut bus);
        assert_eq!(cpu.regs.mode(), Mode::Undefined);
        assert_eq!(cpu.regs.get(14), 0x404);
        assert_eq!(cpu.next_instruction_addr(), 0x04);
        assert_eq!(cpu.unhandled, 1);

        let mut bus = TestBus::new();
        bus.load_thumb(0x400, &[0xE800]);
        let mut cpu = cpu_at(&mut bus, 0x400, true);
        cpu.step(&mut bus);
        assert_eq!(cpu.regs.mode(), Mode::Undefined);
        assert_eq!(cpu.regs.get(14), 0x402);
        assert!(!cpu.regs.thumb());
    }

    #[test]
    fn unhandled_counter_resets() {
        let mut bus = TestBus::new();
        // The UND vector holds another undefined opcode, then a nop.
        bus.load_arm(0x04, &[0xEE00_0000, 0xE1A0_0000, 0xE1A0_0000]);
        bus.load_arm(0x400, &[0xEE00_0000]);
        let mut cpu = cpu_at(&mut bus, 0x400, false);
        cpu.set_log_limit(1);
        cpu.step(&mut bus);
        cpu.step(&mut bus);
        assert_eq!(cpu.unhandled, 2);
        // Each trap lands on the vector, which traps again.
        cpu.step(&mut bus);
        assert_eq!(cpu.unhandled, 3);
        bus.load_arm(0x04, &[0xE1A0_0000]);
        cpu.fill_pipeline(&mut bus, 0x04);
        cpu.step(&mut bus);
        assert_eq!(cpu.unhandled, 0);
    }
}
