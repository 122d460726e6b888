//! Headless development runner.
//!
//! Loads a ROM, runs a fixed number of frames (directly or through a
//! threaded session), and dumps machine state for inspection. This is a
//! smoke-testing tool, not a player: video and audio stay in memory.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use emu::Nes;
use session::{EmuSession, InputRegistry};

#[derive(Parser, Debug)]
#[command(name = "satsuma")]
#[command(about = "Headless NES emulator runner", long_about = None)]
struct Args {
    /// Path to the iNES ROM file
    rom: PathBuf,

    /// Number of frames to run
    #[arg(short, long, default_value = "60")]
    frames: u64,

    /// Run through the threaded session harness instead of stepping
    /// the machine directly
    #[arg(long)]
    session: bool,

    /// Load a save state before running
    #[arg(long)]
    load_state: Option<PathBuf>,

    /// Write a save state after running
    #[arg(long)]
    save_state: Option<PathBuf>,

    /// Dump CPU state after execution
    #[arg(short = 'c', long)]
    dump_cpu: bool,

    /// Dump PPU position after execution
    #[arg(short = 'p', long)]
    dump_ppu: bool,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Keep the appender guard alive for the life of the process.
    let _log_guard = init_logging(args.log_file.as_deref());

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(log_file: Option<&std::path::Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::from_default_env();
    match log_file {
        Some(path) => {
            let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().unwrap_or_else(|| "satsuma.log".as_ref());
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.session {
        return run_session(args);
    }

    let rom = std::fs::read(&args.rom)?;
    let mut nes = Nes::new();
    nes.load_rom(&rom)?;

    if let Some(info) = nes.rom() {
        println!("loaded: mapper {}, {} PRG banks, {} CHR banks, crc {:08x}",
            info.mapper, info.prg_banks, info.chr_banks, info.crc);
    }

    if let Some(path) = &args.load_state {
        nes.load_state_from_file(path)?;
        println!("state loaded from {}", path.display());
    }

    for _ in 0..args.frames {
        nes.step_frame()?;
    }
    println!("ran {} frames", args.frames);

    if let Some(path) = &args.save_state {
        nes.save_state_to_file(path)?;
        println!("state saved to {}", path.display());
    }

    if args.dump_cpu {
        let (a, x, y, sp, p) = nes.cpu_registers();
        println!("cpu: pc={:04X} a={a:02X} x={x:02X} y={y:02X} sp={sp:02X} p={p:02X} cycles={}",
            nes.program_counter(), nes.cycle_count());
    }
    if args.dump_ppu {
        let (scanline, dot) = nes.ppu_position();
        println!("ppu: frame={} scanline={scanline} dot={dot}", nes.frame_count());
    }

    Ok(())
}

fn run_session(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let registry = std::sync::Arc::new(InputRegistry::new());
    let session = EmuSession::start(&args.rom, registry)?;

    if let Some(path) = &args.load_state {
        session.load_state_from_file(path)?;
    }

    while session.frame_count() < args.frames {
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    println!("session reached {} frames", session.frame_count());

    if let Some(path) = &args.save_state {
        session.save_state_to_file(path)?;
    }

    session.stop();
    session.cleanup();
    Ok(())
}
