//! Top-level system: owns the bus exclusively and drives the
//! scheduler/display-sink/debug-overlay loop (spec.md §5, §6).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use log::{error, warn};

use crate::cpu::Cpu;
use crate::debug::DebugOverlay;
use crate::display::DisplaySink;
use crate::error::EmulatorError;
use crate::memory::MemoryBus;
use crate::scheduler::{FrameOutcome, Scheduler};

const JOYPAD_OFFSET: u16 = 0xFF00;

/// Ties the CPU interpreter, memory bus, PPU-driving scheduler, display
/// sink, and optional debug overlay together into one runnable system.
pub struct GameBoy {
    bus: MemoryBus,
    scheduler: Scheduler,
    trace_path: Option<String>,
}

impl GameBoy {
    pub fn new() -> Self {
        GameBoy {
            bus: MemoryBus::new(),
            scheduler: Scheduler::new(Cpu::new()),
            trace_path: None,
        }
    }

    pub fn load_cartridge(&mut self, path: impl AsRef<Path>) -> Result<(), EmulatorError> {
        let cartridge = crate::cartridge::Cartridge::load(path)?;
        self.bus.insert_cartridge(cartridge);
        Ok(())
    }

    pub fn enable_trace(&mut self, path: impl Into<String>) {
        self.trace_path = Some(path.into());
    }

    /// Run until the sink requests shutdown or the CPU hits an unknown
    /// opcode. `max_frames`, when `Some`, bounds a headless run.
    pub fn run(
        &mut self,
        sink: &mut dyn DisplaySink,
        overlay: &mut dyn DebugOverlay,
        max_frames: Option<u64>,
    ) -> Result<(), EmulatorError> {
        let mut frames_run: u64 = 0;
        loop {
            if let Some(limit) = max_frames {
                if frames_run >= limit {
                    return Ok(());
                }
            }

            overlay.on_frame(&self.scheduler.cpu().debug_snapshot(&self.bus));

            let trace_path = self.trace_path.clone();
            let outcome = self.scheduler.run_frame(&mut self.bus, move |pc, opcode| {
                if let Some(path) = &trace_path {
                    Self::append_trace_line(path, pc, opcode);
                }
            })?;
            let FrameOutcome::Rendered(frame) = outcome;

            let joypad = sink.joypad();
            let select = self.bus.read8(JOYPAD_OFFSET);
            let select_directions = select & 0x10 == 0;
            let select_buttons = select & 0x20 == 0;
            self.bus
                .write8(JOYPAD_OFFSET, joypad.to_register(select_directions, select_buttons));

            frames_run += 1;
            if !sink.present(&frame) {
                return Ok(());
            }
        }
    }

    /// Appends one `PC=... op=...` line to the advisory trace file.
    /// Best-effort: a write failure is logged and otherwise ignored, since
    /// a trace file problem must never abort emulation (SPEC_FULL.md §6).
    fn append_trace_line(path: &str, pc: u16, opcode: u8) {
        let line = format!("PC={pc:04X} op={opcode:02X}\n");
        if let Err(e) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(line.as_bytes()))
        {
            warn!("failed to append trace line to {path}: {e}");
        }
    }
}

impl Default for GameBoy {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs the faulting PC and opcode for a fatal-opcode error, matching
/// spec.md §6's exit-code-1 contract.
pub fn report_fatal(err: &EmulatorError) {
    match err {
        EmulatorError::UnknownOpcode { pc, opcode } => {
            error!("unknown opcode {opcode:#04X} at PC={pc:#06X}");
        }
        EmulatorError::UnknownCbOpcode { pc, opcode } => {
            error!("unknown CB opcode {opcode:#04X} at PC={pc:#06X}");
        }
        other => error!("fatal: {other}"),
    }
}
