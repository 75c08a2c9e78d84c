//! Small hand assembled programs run on the full machine.

mod common;

use common::*;

fn run_steps(gba: &mut oxidegba::Gba, steps: usize) {
    for _ in 0..steps {
        gba.step();
    }
}

#[test]
fn counting_loop() {
    let program = [
        mov(0, 0),
        mov(1, 10),
        add(0, 0, 3), // loop:
        subs(1, 1, 1),
        bne_back(2),
        mov(2, IWRAM),
        str32(0, 2, 0),
        SPIN,
    ];
    let mut gba = boot(cartridge(&program));
    run_until_spinning(&mut gba);
    assert_eq!(gba.iwram.read32(0), 30);
    assert_eq!(gba.cpu.regs.get(1), 0);
}

#[test]
fn firmware_division() {
    let program = [
        mov(0, 100),
        mov(1, 7),
        swi(0x06),
        mov(3, IWRAM),
        str32(0, 3, 0),
        str32(1, 3, 4),
        SPIN,
    ];
    let mut gba = boot(cartridge(&program));
    run_until_spinning(&mut gba);
    assert_eq!(gba.iwram.read32(0), 14);
    assert_eq!(gba.iwram.read32(4), 2);
}

#[test]
fn switching_to_thumb() {
    let program = [
        mov(2, IWRAM),
        add(0, 15, 1), // r0 = address of the THUMB code below, with the T bit set
        bx(0),
        0x0049_212A, // mov r1, #42 ; lsl r1, r1, #1
        0xE7FE_6011, // str r1, [r2] ; b .
    ];
    let mut gba = boot(cartridge(&program));
    run_steps(&mut gba, 20);
    assert!(gba.cpu.regs.thumb());
    assert_eq!(gba.iwram.read32(0), 84);
}

#[test]
fn unmapped_memory_never_faults() {
    let mut program = load(0, 0x1000_0000);
    program.extend_from_slice(&[
        ldr32(1, 0, 0), // open bus: the last prefetched opcode
        mov(0, 0),
        ldr32(2, 0, 0), // BIOS, locked since we're running from ROM
        mov(3, IWRAM),
        str32(1, 3, 0),
        str32(2, 3, 4),
        SPIN,
    ]);
    let mut gba = boot(cartridge(&program));
    run_until_spinning(&mut gba);
    assert_ne!(gba.iwram.read32(0), 0);
    assert_eq!(gba.iwram.read32(4), 0xE129_F000);
}

#[test]
fn serial_port_debug_output() {
    let mut program = vec![mov(0, IO), add(0, 0, 0x100)];
    for &c in b"ok\n" {
        program.push(mov(1, u32::from(c)));
        program.push(str8(1, 0, 0x2A));
        program.push(mov(1, 0x81));
        program.push(str8(1, 0, 0x28));
    }
    program.push(SPIN);
    let mut gba = boot(cartridge(&program));
    run_until_spinning(&mut gba);
    assert_eq!(gba.drain_serial(), "ok\n");
}

#[test]
fn dma_fill_shows_up_on_screen() {
    // Mode 3 with BG2, in forced blank while VRAM is being filled.
    let mut program = vec![mov(0, IO), mov(1, 0x83), orr(1, 1, 0x400), str16(1, 0, 0)];
    // The fill source, a red pixel pair, goes in IWRAM.
    program.extend(load(2, 0x001F_001F));
    program.extend_from_slice(&[mov(3, IWRAM), str32(2, 3, 0)]);
    // DMA3: IWRAM (fixed) -> VRAM, 240*160/2 words, enabled immediately.
    program.extend_from_slice(&[add(4, 0, 0xD4), str32(3, 4, 0), mov(5, VRAM), str32(5, 4, 4)]);
    program.extend(load(6, 0x8500_4B00));
    program.extend_from_slice(&[str32(6, 4, 8), mov(1, 3), orr(1, 1, 0x400), str16(1, 0, 0), SPIN]);

    let mut gba = boot(cartridge(&program));
    run_until_spinning(&mut gba);
    assert_eq!(gba.ppu.vram.read16(0), 0x001F);
    assert_eq!(gba.ppu.vram.read16(240 * 160 * 2 - 2), 0x001F);
    assert_eq!(gba.dma.channels[3].control & 0x8000, 0);

    // The first frame still has lines drawn during the forced blank.
    gba.run_frame();
    let frame = gba.run_frame().unwrap();
    assert!(frame.iter().all(|&pix| pix == 0xFFF8_0000));
}
