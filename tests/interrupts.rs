mod common;

use common::*;
use oxidegba::{Button, Gba};

const HANDLER: u32 = 0x0800_00C4;

/// Installs a VBlank handler that counts calls at IWRAM+0x100, then runs `main_loop`.
fn vblank_counter(main_loop: &[u32]) -> Gba {
    let handler = [
        mov(0, IWRAM),
        ldr32(1, 0, 0x100),
        add(1, 1, 1),
        str32(1, 0, 0x100),
        mov(0, IO),
        add(0, 0, 0x200),
        mov(1, 1),
        str16(1, 0, 0x02), // acknowledge in IF
        bx(14),
    ];
    let main = 0xC0 + 4 * (1 + handler.len() as u32);
    let mut program = vec![b(0xC0, main)];
    program.extend_from_slice(&handler);

    program.extend(load(0, 0x0300_7FFC));
    program.extend(load(1, HANDLER));
    program.push(str32(1, 0, 0));
    program.extend_from_slice(&[
        mov(0, IO),
        mov(1, 0x08),
        str16(1, 0, 0x04), // DISPSTAT: VBlank IRQ
        add(0, 0, 0x200),
        mov(1, 1),
        str16(1, 0, 0x00), // IE: VBlank
        str16(1, 0, 0x08), // IME
    ]);
    program.extend_from_slice(main_loop);
    boot(cartridge(&program))
}

fn settle(gba: &mut Gba) {
    for _ in 0..1000 {
        gba.step();
    }
}

#[test]
fn vblank_interrupts_while_spinning() {
    let mut gba = vblank_counter(&[SPIN]);
    for _ in 0..4 {
        gba.run_frame();
    }
    settle(&mut gba);
    assert_eq!(gba.iwram.read32(0x100), 4);
    assert_eq!(gba.interrupts.request & 1, 0);
}

#[test]
fn halt_wakes_on_vblank() {
    let mut gba = vblank_counter(&[swi(0x02), 0xEAFF_FFFD]); // swi Halt ; b -1
    for _ in 0..3 {
        gba.run_frame();
    }
    settle(&mut gba);
    assert_eq!(gba.iwram.read32(0x100), 3);
    assert!(gba.system.halted);
}

#[test]
fn keypad_interrupt() {
    let mut gba = boot(cartridge(&[SPIN]));
    gba.joypad.keycnt = 0x4000 | Button::A as u16 | Button::B as u16;
    gba.set_button(Button::Start, true);
    assert_eq!(gba.interrupts.request & (1 << 12), 0);
    gba.set_button(Button::B, true);
    assert_ne!(gba.interrupts.request & (1 << 12), 0);
    assert_eq!(gba.joypad.keyinput & (Button::B as u16), 0);
}
