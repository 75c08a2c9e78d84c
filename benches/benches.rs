#[macro_use]
extern crate bencher;

use bencher::Bencher;
use oxidegba::cpu::arm::ArmInstruction;
use oxidegba::cpu::thumb::ThumbInstruction;
use oxidegba::{dma, interrupt, ppu, Config, Gba};

fn gba() -> Gba {
    let bios = vec![0; 0x4000];
    // A counting loop: add r0, r0, #1 ; b -1
    let mut rom = vec![0; 0x200];
    rom[0..4].copy_from_slice(&0xE280_0001u32.to_le_bytes());
    rom[4..8].copy_from_slice(&0xEAFF_FFFDu32.to_le_bytes());
    let config = Config {
        skip_bios: true,
        ..Default::default()
    };
    Gba::with_config(&bios, rom, config).unwrap()
}

fn capture_snapshot(bench: &mut Bencher) {
    let mut gba = gba();
    gba.run_frame();
    let size = gba.capture_snapshot().unwrap().len();

    bench.iter(|| {
        assert_eq!(gba.capture_snapshot().unwrap().len(), size);
    });
}

fn restore_snapshot(bench: &mut Bencher) {
    let mut gba = gba();
    gba.run_frame();
    let snapshot = gba.capture_snapshot().unwrap();
    gba.run_frame();
    let frame_count = gba.frame_count;

    bench.iter(|| {
        gba.restore_snapshot(&snapshot).unwrap();
        assert!(gba.frame_count < frame_count);
    });
}

fn run_frame(bench: &mut Bencher) {
    let mut gba = gba();

    bench.iter(|| {
        gba.run_frame();
    });
}

fn ppu_scanline_sprites(bench: &mut Bencher) {
    let mut ppu = ppu::Ppu::new();
    let mut interrupts = interrupt::InterruptController::new();
    let mut dma = dma::DmaController::new();
    let mut framebuffer = vec![0; ppu::SCREEN_SIZE];

    // Mode 0, all four backgrounds and sprites, 1D mapping.
    ppu.write_register(0x00, 0x40);
    ppu.write_register(0x01, 0x1F);
    for i in 0..128usize {
        ppu.oam.write16(i * 8, (i % 160) as u16);
        ppu.oam.write16(i * 8 + 2, 0x4000 | (i * 2) as u16);
    }

    bench.iter(|| {
        ppu.step(ppu::LINE_CYCLES, &mut interrupts, &mut dma, &mut framebuffer);
    });
}

fn decode(bench: &mut Bencher) {
    bench.iter(|| {
        let mut n = 0;
        for inst in (0..0x1_0000u32).step_by(7) {
            if let ThumbInstruction::Undefined(_) = ThumbInstruction::decode(inst as u16) {
                n += 1;
            }
            if let ArmInstruction::Undefined(_) = ArmInstruction::decode(inst.wrapping_mul(0x9E37_79B9)) {
                n += 1;
            }
        }
        n
    });
}

benchmark_group!(
    benches,
    capture_snapshot,
    restore_snapshot,
    run_frame,
    ppu_scanline_sprites,
    decode
);
benchmark_main!(benches);
