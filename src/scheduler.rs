//! Frame scheduler / interrupt gate (spec.md §4.5).
//!
//! Runs `Cpu::step` in a loop, accumulating machine cycles until a full
//! frame's worth (70224 T-states, 17556 machine cycles) has elapsed, then
//! snapshots VRAM/OAM/PPU registers, renders one frame, raises the
//! VBlank interrupt, and hands the frame to the display sink.

use log::debug;

use crate::cpu::Cpu;
use crate::memory::{interrupts, MemoryBus};
use crate::ppu::Ppu;

/// Machine cycles (4 T-states each) in one 59.7 Hz Game Boy frame.
pub const CYCLES_PER_FRAME: u32 = 17_556;

/// Drives the CPU/PPU pairing one frame at a time.
pub struct Scheduler {
    cpu: Cpu,
    ppu: Ppu,
    cyc: u32,
}

/// Outcome of running one frame.
pub enum FrameOutcome {
    /// The frame completed normally; its pixels are attached.
    Rendered([u8; crate::ppu::SCREEN_WIDTH * crate::ppu::SCREEN_HEIGHT]),
}

impl Scheduler {
    pub fn new(cpu: Cpu) -> Self {
        Scheduler {
            cpu,
            ppu: Ppu::new(),
            cyc: 0,
        }
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    /// Step the CPU until a frame boundary is crossed, then render and
    /// return that frame. Propagates a fatal-opcode error from the CPU.
    /// `on_step`, if given, is called with `(pc, opcode)` before each
    /// instruction is executed, feeding the advisory `--trace` log.
    pub fn run_frame(
        &mut self,
        bus: &mut MemoryBus,
        mut on_step: impl FnMut(u16, u8),
    ) -> Result<FrameOutcome, crate::error::EmulatorError> {
        while self.cyc < CYCLES_PER_FRAME {
            let pc = self.cpu.regs.pc;
            on_step(pc, bus.read8(pc));
            let cycles = self.cpu.step(bus)?;
            self.cyc += cycles;
        }
        self.cyc -= CYCLES_PER_FRAME;

        let frame = self.ppu.render(bus.vram(), bus.oam(), bus.ppu_regs());
        bus.request_interrupt(interrupts::VBLANK);
        debug!("frame rendered, {} leftover cycles carried to next frame", self.cyc);

        Ok(FrameOutcome::Rendered(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Cartridge;
    use std::io::Write;

    fn nop_rom() -> Cartridge {
        let dir = std::env::temp_dir();
        let path = dir.join("rustyboy_scheduler_test.gb");
        let mut rom = vec![0u8; 0x8000];
        rom[0x0148] = 1;
        {
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(&rom).unwrap();
        }
        let cart = Cartridge::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        cart
    }

    #[test]
    fn run_frame_consumes_exactly_one_frame_budget_worth_of_nops() {
        let mut bus = MemoryBus::new();
        bus.insert_cartridge(nop_rom());
        let mut scheduler = Scheduler::new(Cpu::new());
        scheduler.cpu_mut().regs.pc = 0x0000;

        let before_if = bus.interrupt_flags();
        let FrameOutcome::Rendered(frame) = scheduler.run_frame(&mut bus, |_, _| {}).unwrap();

        assert_eq!(frame.len(), crate::ppu::SCREEN_WIDTH * crate::ppu::SCREEN_HEIGHT);
        assert_eq!(bus.interrupt_flags() & interrupts::VBLANK, interrupts::VBLANK);
        assert_ne!(before_if, bus.interrupt_flags());
    }
}
