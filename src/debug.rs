//! Debug overlay collaborator (spec.md §6, SPEC_FULL.md §4.8).
//!
//! A graphical overlay is out of scope; the contract itself is still
//! implemented since spec.md names it as an external interface.

use log::trace;

/// Receives one textual register/flag/opcode snapshot per step (or per
/// frame, at the caller's discretion).
pub trait DebugOverlay {
    fn on_frame(&mut self, snapshot: &str);
}

/// Default overlay: discards every snapshot.
#[derive(Debug, Default)]
pub struct NullOverlay;

impl DebugOverlay for NullOverlay {
    fn on_frame(&mut self, _snapshot: &str) {}
}

/// Emits each snapshot at `trace!` level instead of rendering it.
#[derive(Debug, Default)]
pub struct LogOverlay;

impl DebugOverlay for LogOverlay {
    fn on_frame(&mut self, snapshot: &str) {
        trace!("{}", snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_overlay_accepts_any_snapshot_without_panicking() {
        let mut overlay = NullOverlay;
        overlay.on_frame("AF=01B0 BC=0013 DE=00D8 HL=014D SP=FFFE PC=0100 Z=0 N=0 H=0 C=0 op=00");
    }
}
