//! rustyboy - a Game Boy (Sharp LR35902) emulation core.
//!
//! CLI entry point: parses arguments, loads a cartridge, and runs the
//! scheduler loop either against a real SDL2 window or headlessly.

mod cartridge;
mod cpu;
mod debug;
mod display;
mod error;
mod gameboy;
mod joypad;
mod memory;
mod ppu;
mod registers;
mod scheduler;

use std::process::ExitCode;

use clap::Parser;
use log::error;

use debug::{DebugOverlay, LogOverlay, NullOverlay};
use display::{NullSink, Sdl2Sink};
use gameboy::GameBoy;

/// A Game Boy (Sharp LR35902) emulation core.
#[derive(Parser, Debug)]
#[command(name = "rustyboy", version, about)]
struct Cli {
    /// Path to the ROM image to load.
    #[arg(default_value = "rom.gb")]
    rom: String,

    /// Integer window scale factor (ignored in --headless mode).
    #[arg(long, default_value_t = 3)]
    scale: u32,

    /// Append a `PC=... op=...` line per instruction to this file.
    #[arg(long)]
    trace: Option<String>,

    /// Run the scheduler without opening an SDL2 window; drives a bounded
    /// number of frames then exits (used by CI-friendly smoke checks).
    #[arg(long)]
    headless: bool,

    /// Number of frames to run under --headless before exiting.
    #[arg(long, default_value_t = 60)]
    frames: u64,

    /// Log verbosity when RUST_LOG is unset (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Feed each step's register/flag/opcode snapshot to the debug overlay
    /// via trace-level logging instead of discarding it.
    #[arg(long)]
    debug_overlay: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level.clone())).init();

    let mut gb = GameBoy::new();
    if let Err(e) = gb.load_cartridge(&cli.rom) {
        error!("failed to load cartridge {}: {}", cli.rom, e);
        return ExitCode::FAILURE;
    }

    if let Some(trace_path) = &cli.trace {
        gb.enable_trace(trace_path.clone());
    }

    let mut overlay: Box<dyn DebugOverlay> = if cli.debug_overlay {
        Box::new(LogOverlay)
    } else {
        Box::new(NullOverlay)
    };

    let run_result = if cli.headless {
        let mut sink = NullSink;
        gb.run(&mut sink, overlay.as_mut(), Some(cli.frames))
    } else {
        match Sdl2Sink::new(cli.scale) {
            Ok(mut sink) => gb.run(&mut sink, overlay.as_mut(), None),
            Err(e) => {
                error!("failed to initialize display: {e}");
                return ExitCode::FAILURE;
            }
        }
    };

    match run_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            gameboy::report_fatal(&e);
            ExitCode::FAILURE
        }
    }
}
