//! Runs a cartridge without any UI. Useful for test ROMs that report over the serial port, for grabbing screenshots,
//! and for producing snapshots to poke at later.

use byteorder::{LittleEndian, WriteBytesExt};
use clap::Parser;
use log::{info, LevelFilter};
use oxidegba::{Config, FramePacer, Gba, Snapshot, SCREEN_HEIGHT, SCREEN_WIDTH};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "oxidegba-headless", about = "Runs a GBA cartridge with no UI attached")]
struct Args {
    /// BIOS image
    #[arg(long)]
    bios: PathBuf,

    /// Cartridge ROM
    #[arg(long)]
    rom: PathBuf,

    /// How many frames to run
    #[arg(long, default_value_t = 600)]
    frames: u32,

    /// Save file. Loaded before running if it exists, written back afterwards.
    #[arg(long)]
    save: Option<PathBuf>,

    /// Write a snapshot here after the last frame
    #[arg(long)]
    snapshot_out: Option<PathBuf>,

    /// Restore this snapshot before running
    #[arg(long)]
    snapshot_in: Option<PathBuf>,

    /// Write the last frame here as a PNG
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// Write the generated audio here as raw little endian f32 samples
    #[arg(long)]
    audio_out: Option<PathBuf>,

    #[arg(long)]
    skip_bios: bool,

    /// Emulation speed multiplier, only meaningful with --realtime
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Run frames at the speed of the real hardware instead of as fast as possible
    #[arg(long)]
    realtime: bool,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let bios = fs::read(&args.bios)?;
    let rom = fs::read(&args.rom)?;
    let config = Config {
        skip_bios: args.skip_bios,
        ..Default::default()
    };
    let mut gba = Gba::with_config(&bios, rom, config)?;

    if let Some(path) = &args.save {
        if path.exists() {
            gba.load_save_data(&fs::read(path)?)?;
            info!("Loaded save data from {}", path.display());
        }
    }

    if let Some(path) = &args.snapshot_in {
        let compressed = fs::read(path)?;
        let data = snap::Decoder::new().decompress_vec(&compressed)?;
        gba.restore_snapshot(&Snapshot::from_bytes(data))?;
        info!("Restored snapshot from {}", path.display());
    }

    let mut audio = match &args.audio_out {
        Some(path) => Some(BufWriter::new(File::create(path)?)),
        None => None,
    };

    let stdout = std::io::stdout();
    let mut frame = |gba: &mut Gba| -> Result<()> {
        gba.run_frame();
        let serial = gba.drain_serial();
        if !serial.is_empty() {
            let mut out = stdout.lock();
            out.write_all(serial.as_bytes())?;
            out.flush()?;
        }
        let samples = gba.drain_audio();
        if let Some(out) = audio.as_mut() {
            for s in samples {
                out.write_f32::<LittleEndian>(s)?;
            }
        }
        Ok(())
    };

    if args.realtime {
        let mut pacer = FramePacer::new(args.speed);
        let mut last = Instant::now();
        let mut remaining = args.frames;
        while remaining > 0 {
            let now = Instant::now();
            let due = pacer.advance(now - last).min(remaining);
            last = now;
            for _ in 0..due {
                frame(&mut gba)?;
            }
            remaining -= due;
            if due == 0 {
                std::thread::sleep(pacer.until_next_frame());
            }
        }
    } else {
        for _ in 0..args.frames {
            frame(&mut gba)?;
        }
    }
    drop(frame);

    if let Some(mut out) = audio {
        out.flush()?;
    }

    if let Some(path) = &args.screenshot {
        let mut pixels = Vec::with_capacity(SCREEN_WIDTH * SCREEN_HEIGHT * 3);
        for &pix in gba.framebuffer() {
            pixels.extend_from_slice(&[(pix >> 16) as u8, (pix >> 8) as u8, pix as u8]);
        }
        let img = image::RgbImage::from_raw(SCREEN_WIDTH as u32, SCREEN_HEIGHT as u32, pixels)
            .ok_or("framebuffer has the wrong size")?;
        img.save(path)?;
        info!("Wrote screenshot to {}", path.display());
    }

    if let Some(path) = &args.snapshot_out {
        let snapshot = gba.capture_snapshot()?;
        let compressed = snap::Encoder::new().compress_vec(snapshot.as_bytes())?;
        fs::write(path, compressed)?;
        info!("Wrote {} byte snapshot to {}", snapshot.len(), path.display());
    }

    if let Some(path) = &args.save {
        if let Some(data) = gba.save_data() {
            fs::write(path, data)?;
            info!("Wrote save data to {}", path.display());
        }
    }

    Ok(())
}
