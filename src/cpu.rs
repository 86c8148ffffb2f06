//! CPU interpreter for the Sharp LR35902.
//!
//! `Cpu::step` fetches the byte at `PC`, dispatches it (the base page or,
//! for `0xCB`, the second 256-entry page), mutates [`Registers`] and the
//! [`MemoryBus`], and returns the number of machine cycles consumed (one
//! machine cycle = 4 T-states). Opcode families that repeat across the
//! register file (`LD r,r'`, the ALU page, `INC`/`DEC r8`, the 16-bit
//! pair ops) are dispatched by masking the opcode byte against the bit
//! pattern the family shares, rather than by listing all 256 cases –
//! see `execute_next` below.

use log::{error, trace};

use crate::error::EmulatorError;
use crate::memory::{interrupts, MemoryBus};
use crate::registers::Registers;

/// Base vector for IE/IF-driven interrupt dispatch; bit `n` vectors to
/// `0x40 + 8*n`.
const INTERRUPT_VECTOR_BASE: u16 = 0x40;

pub struct Cpu {
    pub regs: Registers,
    /// Set by `HALT` (`0x76`); cleared when a pending, enabled interrupt
    /// wakes the CPU (with or without `IME` set).
    pub halted: bool,
    /// Instructions remaining before a pending `EI` takes effect (real
    /// hardware delays `IME` by one instruction).
    ei_delay: u8,
}

impl Cpu {
    pub fn new() -> Self {
        Cpu {
            regs: Registers::post_boot(),
            halted: false,
            ei_delay: 0,
        }
    }

    /// Fetch-decode-execute one instruction (or service one pending
    /// interrupt, or idle one tick while halted) and return the number
    /// of machine cycles consumed.
    pub fn step(&mut self, bus: &mut MemoryBus) -> Result<u32, EmulatorError> {
        if self.ei_delay > 0 {
            self.ei_delay -= 1;
            if self.ei_delay == 0 {
                self.regs.ime = true;
            }
        }

        let pending = bus.interrupt_enable() & bus.interrupt_flags() & 0x1F;
        if self.halted {
            if pending != 0 {
                self.halted = false;
            } else {
                return Ok(1);
            }
        }

        let cycles = self.execute_next(bus)?;
        let interrupt_cycles = self.service_interrupt(bus);
        Ok(cycles + interrupt_cycles)
    }

    /// If `IME` is set and a bit is common to `IE` and `IF`, service the
    /// lowest-numbered one: clear `IME`, clear the `IF` bit, push `PC`,
    /// jump to its vector. Returns the extra cycles consumed (0 if no
    /// interrupt was serviced).
    fn service_interrupt(&mut self, bus: &mut MemoryBus) -> u32 {
        if !self.regs.ime {
            return 0;
        }
        let pending = bus.interrupt_enable() & bus.interrupt_flags() & 0x1F;
        if pending == 0 {
            return 0;
        }
        let bit = pending.trailing_zeros();
        self.regs.ime = false;
        bus.set_interrupt_flags(bus.interrupt_flags() & !(1 << bit));
        self.push16(bus, self.regs.pc);
        self.regs.pc = INTERRUPT_VECTOR_BASE + 8 * bit as u16;
        trace!("serviced interrupt bit {} -> PC={:04X}", bit, self.regs.pc);
        5
    }

    /// A textual snapshot for the debug overlay collaborator (spec.md
    /// §6): register pairs, flags, and the opcode about to execute.
    pub fn debug_snapshot(&self, bus: &MemoryBus) -> String {
        let r = &self.regs;
        format!(
            "AF={:04X} BC={:04X} DE={:04X} HL={:04X} SP={:04X} PC={:04X} \
             Z={} N={} H={} C={} op={:02X}",
            r.af,
            r.bc,
            r.de,
            r.hl,
            r.sp,
            r.pc,
            r.z() as u8,
            r.n() as u8,
            r.h_flag() as u8,
            r.c_flag() as u8,
            bus.read8(r.pc),
        )
    }

    // ---- fetch helpers ----

    fn fetch8(&mut self, bus: &MemoryBus) -> u8 {
        let v = bus.read8(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        v
    }

    fn fetch16(&mut self, bus: &MemoryBus) -> u16 {
        let lo = self.fetch8(bus) as u16;
        let hi = self.fetch8(bus) as u16;
        (hi << 8) | lo
    }

    // ---- register-field addressing (spec.md §4.3 "Register addressing table") ----

    fn read_r8(&self, bus: &MemoryBus, idx: u8) -> u8 {
        match idx {
            0 => self.regs.b(),
            1 => self.regs.c(),
            2 => self.regs.d(),
            3 => self.regs.e(),
            4 => self.regs.h(),
            5 => self.regs.l(),
            6 => bus.read8(self.regs.hl),
            7 => self.regs.a(),
            _ => unreachable!("3-bit register field"),
        }
    }

    fn write_r8(&mut self, bus: &mut MemoryBus, idx: u8, v: u8) {
        match idx {
            0 => self.regs.set_b(v),
            1 => self.regs.set_c(v),
            2 => self.regs.set_d(v),
            3 => self.regs.set_e(v),
            4 => self.regs.set_h(v),
            5 => self.regs.set_l(v),
            6 => bus.write8(self.regs.hl, v),
            7 => self.regs.set_a(v),
            _ => unreachable!("3-bit register field"),
        }
    }

    /// `BC, DE, HL, SP` group used by `LD rr,d16` / `INC rr` / `DEC rr` /
    /// `ADD HL,rr`.
    fn get_rr(&self, idx: u8) -> u16 {
        match idx {
            0 => self.regs.bc,
            1 => self.regs.de,
            2 => self.regs.hl,
            3 => self.regs.sp,
            _ => unreachable!("2-bit pair field"),
        }
    }

    fn set_rr(&mut self, idx: u8, v: u16) {
        match idx {
            0 => self.regs.bc = v,
            1 => self.regs.de = v,
            2 => self.regs.hl = v,
            3 => self.regs.sp = v,
            _ => unreachable!("2-bit pair field"),
        }
    }

    /// `BC, DE, HL, AF` group used by `PUSH`/`POP`.
    fn get_rr_stack(&self, idx: u8) -> u16 {
        match idx {
            0 => self.regs.bc,
            1 => self.regs.de,
            2 => self.regs.hl,
            3 => self.regs.af,
            _ => unreachable!("2-bit pair field"),
        }
    }

    fn set_rr_stack(&mut self, idx: u8, v: u16) {
        match idx {
            0 => self.regs.bc = v,
            1 => self.regs.de = v,
            2 => self.regs.hl = v,
            3 => self.regs.set_af(v),
            _ => unreachable!("2-bit pair field"),
        }
    }

    /// `NZ, Z, NC, C` condition group shared by `JR`/`JP`/`CALL`/`RET`.
    fn check_cc(&self, idx: u8) -> bool {
        match idx {
            0 => !self.regs.z(),
            1 => self.regs.z(),
            2 => !self.regs.c_flag(),
            3 => self.regs.c_flag(),
            _ => unreachable!("2-bit condition field"),
        }
    }

    fn push16(&mut self, bus: &mut MemoryBus, v: u16) {
        self.regs.sp = self.regs.sp.wrapping_sub(2);
        bus.write16(self.regs.sp, v);
    }

    fn pop16(&mut self, bus: &MemoryBus) -> u16 {
        let v = bus.read16(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(2);
        v
    }

    fn jr(&mut self, bus: &MemoryBus) {
        let e = self.fetch8(bus) as i8;
        self.regs.pc = self.regs.pc.wrapping_add(e as i16 as u16);
    }

    fn jr_cc(&mut self, bus: &MemoryBus, cc: u8) -> u32 {
        let e = self.fetch8(bus) as i8;
        if self.check_cc(cc) {
            self.regs.pc = self.regs.pc.wrapping_add(e as i16 as u16);
            3
        } else {
            2
        }
    }

    // ---- ALU (spec.md §4.3 flag semantics table) ----

    fn alu_add(&mut self, value: u8, carry: u8) {
        let a = self.regs.a();
        let half = (a & 0x0F) + (value & 0x0F) + carry > 0x0F;
        let (r1, c1) = a.overflowing_add(value);
        let (result, c2) = r1.overflowing_add(carry);
        self.regs.set_a(result);
        self.regs.set_z(result == 0);
        self.regs.set_n(false);
        self.regs.set_h(half);
        self.regs.set_c(c1 || c2);
    }

    fn alu_sub(&mut self, value: u8, carry: u8, store: bool) {
        let a = self.regs.a();
        let half = (a & 0x0F) < (value & 0x0F) + carry;
        let (r1, b1) = a.overflowing_sub(value);
        let (result, b2) = r1.overflowing_sub(carry);
        self.regs.set_z(result == 0);
        self.regs.set_n(true);
        self.regs.set_h(half);
        self.regs.set_c(b1 || b2);
        if store {
            self.regs.set_a(result);
        }
    }

    fn alu_and(&mut self, value: u8) {
        let r = self.regs.a() & value;
        self.regs.set_a(r);
        self.regs.set_z(r == 0);
        self.regs.set_n(false);
        self.regs.set_h(true);
        self.regs.set_c(false);
    }

    fn alu_or(&mut self, value: u8) {
        let r = self.regs.a() | value;
        self.regs.set_a(r);
        self.regs.set_z(r == 0);
        self.regs.set_n(false);
        self.regs.set_h(false);
        self.regs.set_c(false);
    }

    fn alu_xor(&mut self, value: u8) {
        let r = self.regs.a() ^ value;
        self.regs.set_a(r);
        self.regs.set_z(r == 0);
        self.regs.set_n(false);
        self.regs.set_h(false);
        self.regs.set_c(false);
    }

    fn alu_op(&mut self, op: u8, value: u8) {
        match op {
            0 => self.alu_add(value, 0),
            1 => {
                let c = self.regs.c_flag() as u8;
                self.alu_add(value, c);
            }
            2 => self.alu_sub(value, 0, true),
            3 => {
                let c = self.regs.c_flag() as u8;
                self.alu_sub(value, c, true);
            }
            4 => self.alu_and(value),
            5 => self.alu_xor(value),
            6 => self.alu_or(value),
            7 => self.alu_sub(value, 0, false),
            _ => unreachable!("3-bit ALU op field"),
        }
    }

    fn inc8(&mut self, v: u8) -> u8 {
        let half = (v & 0x0F) == 0x0F;
        let r = v.wrapping_add(1);
        self.regs.set_z(r == 0);
        self.regs.set_n(false);
        self.regs.set_h(half);
        r
    }

    fn dec8(&mut self, v: u8) -> u8 {
        let half = (v & 0x0F) == 0x00;
        let r = v.wrapping_sub(1);
        self.regs.set_z(r == 0);
        self.regs.set_n(true);
        self.regs.set_h(half);
        r
    }

    fn add_hl(&mut self, value: u16) {
        let hl = self.regs.hl;
        let half = (hl & 0x0FFF) + (value & 0x0FFF) > 0x0FFF;
        let (result, carry) = hl.overflowing_add(value);
        self.regs.hl = result;
        self.regs.set_n(false);
        self.regs.set_h(half);
        self.regs.set_c(carry);
    }

    /// Shared flag computation for `ADD SP,e8` and `LD HL,SP+e8`: both
    /// add a signed 8-bit displacement to `SP` and derive H/C from the
    /// *unsigned byte* addition, per real hardware.
    fn add_sp_signed(&mut self, sp: u16, e: i8) -> u16 {
        let e16 = e as i16 as u16;
        let half = (sp & 0x0F) + (e16 & 0x0F) > 0x0F;
        let carry = (sp & 0xFF) + (e16 & 0xFF) > 0xFF;
        self.regs.set_z(false);
        self.regs.set_n(false);
        self.regs.set_h(half);
        self.regs.set_c(carry);
        sp.wrapping_add(e16)
    }

    fn daa(&mut self) {
        let mut a = self.regs.a();
        let mut adjust = 0u8;
        let mut carry = self.regs.c_flag();
        if self.regs.n() {
            if self.regs.h_flag() {
                adjust |= 0x06;
            }
            if carry {
                adjust |= 0x60;
            }
            a = a.wrapping_sub(adjust);
        } else {
            if self.regs.h_flag() || (a & 0x0F) > 0x09 {
                adjust |= 0x06;
            }
            if carry || a > 0x99 {
                adjust |= 0x60;
                carry = true;
            }
            a = a.wrapping_add(adjust);
        }
        self.regs.set_a(a);
        self.regs.set_z(a == 0);
        self.regs.set_h(false);
        self.regs.set_c(carry);
        // N is preserved (spec.md §9's corrected-from-source behavior).
    }

    // ---- CB-page rotate/shift primitives; carry is read before `v` is
    // mutated (spec.md §9's corrected-from-source ordering). ----

    fn rlc(&mut self, v: u8) -> u8 {
        let carry = v & 0x80 != 0;
        let r = (v << 1) | carry as u8;
        self.set_rotate_flags(r, carry);
        r
    }

    fn rrc(&mut self, v: u8) -> u8 {
        let carry = v & 0x01 != 0;
        let r = (v >> 1) | ((carry as u8) << 7);
        self.set_rotate_flags(r, carry);
        r
    }

    fn rl(&mut self, v: u8) -> u8 {
        let old_carry = self.regs.c_flag() as u8;
        let carry = v & 0x80 != 0;
        let r = (v << 1) | old_carry;
        self.set_rotate_flags(r, carry);
        r
    }

    fn rr(&mut self, v: u8) -> u8 {
        let old_carry = self.regs.c_flag() as u8;
        let carry = v & 0x01 != 0;
        let r = (v >> 1) | (old_carry << 7);
        self.set_rotate_flags(r, carry);
        r
    }

    fn sla(&mut self, v: u8) -> u8 {
        let carry = v & 0x80 != 0;
        let r = v << 1;
        self.set_rotate_flags(r, carry);
        r
    }

    fn sra(&mut self, v: u8) -> u8 {
        let carry = v & 0x01 != 0;
        let r = (v >> 1) | (v & 0x80);
        self.set_rotate_flags(r, carry);
        r
    }

    fn swap(&mut self, v: u8) -> u8 {
        let r = (v << 4) | (v >> 4);
        self.regs.set_z(r == 0);
        self.regs.set_n(false);
        self.regs.set_h(false);
        self.regs.set_c(false);
        r
    }

    fn srl(&mut self, v: u8) -> u8 {
        let carry = v & 0x01 != 0;
        let r = v >> 1;
        self.set_rotate_flags(r, carry);
        r
    }

    fn set_rotate_flags(&mut self, result: u8, carry: bool) {
        self.regs.set_z(result == 0);
        self.regs.set_n(false);
        self.regs.set_h(false);
        self.regs.set_c(carry);
    }

    fn bit(&mut self, v: u8, b: u8) {
        self.regs.set_z(v & (1 << b) == 0);
        self.regs.set_n(false);
        self.regs.set_h(true);
        // C unchanged.
    }

    // ---- dispatch ----

    fn execute_next(&mut self, bus: &mut MemoryBus) -> Result<u32, EmulatorError> {
        let pc_at_fetch = self.regs.pc;
        let opcode = self.fetch8(bus);
        trace!("PC={:04X} opcode={:02X}", pc_at_fetch, opcode);

        let cycles = match opcode {
            0x00 => 1,
            0x10 => {
                self.fetch8(bus); // always-zero second byte, discarded
                1
            }
            0x76 => {
                self.halted = true;
                1
            }
            0x07 => {
                self.rlca();
                1
            }
            0x0F => {
                self.rrca();
                1
            }
            0x17 => {
                self.rla();
                1
            }
            0x1F => {
                self.rra();
                1
            }
            0x08 => {
                let addr = self.fetch16(bus);
                bus.write16(addr, self.regs.sp);
                5
            }
            0x18 => {
                self.jr(bus);
                3
            }
            0x20 | 0x28 | 0x30 | 0x38 => self.jr_cc(bus, (opcode >> 3) & 0x3),
            0x27 => {
                self.daa();
                1
            }
            0x2F => {
                let a = !self.regs.a();
                self.regs.set_a(a);
                self.regs.set_n(true);
                self.regs.set_h(true);
                1
            }
            0x37 => {
                self.regs.set_n(false);
                self.regs.set_h(false);
                self.regs.set_c(true);
                1
            }
            0x3F => {
                self.regs.set_n(false);
                self.regs.set_h(false);
                let c = self.regs.c_flag();
                self.regs.set_c(!c);
                1
            }
            0x02 => {
                bus.write8(self.regs.bc, self.regs.a());
                2
            }
            0x12 => {
                bus.write8(self.regs.de, self.regs.a());
                2
            }
            0x22 => {
                bus.write8(self.regs.hl, self.regs.a());
                self.regs.hl = self.regs.hl.wrapping_add(1);
                2
            }
            0x32 => {
                bus.write8(self.regs.hl, self.regs.a());
                self.regs.hl = self.regs.hl.wrapping_sub(1);
                2
            }
            0x0A => {
                let v = bus.read8(self.regs.bc);
                self.regs.set_a(v);
                2
            }
            0x1A => {
                let v = bus.read8(self.regs.de);
                self.regs.set_a(v);
                2
            }
            0x2A => {
                let v = bus.read8(self.regs.hl);
                self.regs.set_a(v);
                self.regs.hl = self.regs.hl.wrapping_add(1);
                2
            }
            0x3A => {
                let v = bus.read8(self.regs.hl);
                self.regs.set_a(v);
                self.regs.hl = self.regs.hl.wrapping_sub(1);
                2
            }
            0x40..=0x7F => {
                // LD r,r' (0x76 == HALT is matched above, first).
                let dst = (opcode >> 3) & 0x7;
                let src = opcode & 0x7;
                let v = self.read_r8(bus, src);
                self.write_r8(bus, dst, v);
                if dst == 6 || src == 6 {
                    2
                } else {
                    1
                }
            }
            0x80..=0xBF => {
                let op = (opcode >> 3) & 0x7;
                let src = opcode & 0x7;
                let v = self.read_r8(bus, src);
                self.alu_op(op, v);
                if src == 6 {
                    2
                } else {
                    1
                }
            }
            0xC6 => {
                let v = self.fetch8(bus);
                self.alu_op(0, v);
                2
            }
            0xCE => {
                let v = self.fetch8(bus);
                self.alu_op(1, v);
                2
            }
            0xD6 => {
                let v = self.fetch8(bus);
                self.alu_op(2, v);
                2
            }
            0xDE => {
                let v = self.fetch8(bus);
                self.alu_op(3, v);
                2
            }
            0xE6 => {
                let v = self.fetch8(bus);
                self.alu_op(4, v);
                2
            }
            0xEE => {
                let v = self.fetch8(bus);
                self.alu_op(5, v);
                2
            }
            0xF6 => {
                let v = self.fetch8(bus);
                self.alu_op(6, v);
                2
            }
            0xFE => {
                let v = self.fetch8(bus);
                self.alu_op(7, v);
                2
            }
            0xC3 => {
                self.regs.pc = self.fetch16(bus);
                4
            }
            0xE9 => {
                self.regs.pc = self.regs.hl;
                1
            }
            0xCD => {
                let addr = self.fetch16(bus);
                self.push16(bus, self.regs.pc);
                self.regs.pc = addr;
                6
            }
            0xC9 => {
                self.regs.pc = self.pop16(bus);
                4
            }
            0xD9 => {
                self.regs.pc = self.pop16(bus);
                self.regs.ime = true;
                4
            }
            0xCB => return self.execute_cb(bus),
            0xE0 => {
                let off = self.fetch8(bus);
                bus.write8(0xFF00 + off as u16, self.regs.a());
                3
            }
            0xF0 => {
                let off = self.fetch8(bus);
                let v = bus.read8(0xFF00 + off as u16);
                self.regs.set_a(v);
                3
            }
            0xE2 => {
                bus.write8(0xFF00 + self.regs.c() as u16, self.regs.a());
                2
            }
            0xF2 => {
                let v = bus.read8(0xFF00 + self.regs.c() as u16);
                self.regs.set_a(v);
                2
            }
            0xEA => {
                let addr = self.fetch16(bus);
                bus.write8(addr, self.regs.a());
                4
            }
            0xFA => {
                let addr = self.fetch16(bus);
                let v = bus.read8(addr);
                self.regs.set_a(v);
                4
            }
            0xF3 => {
                self.regs.ime = false;
                self.ei_delay = 0;
                1
            }
            0xFB => {
                self.ei_delay = 2;
                1
            }
            0xE8 => {
                let e = self.fetch8(bus) as i8;
                self.regs.sp = self.add_sp_signed(self.regs.sp, e);
                4
            }
            0xF8 => {
                let e = self.fetch8(bus) as i8;
                self.regs.hl = self.add_sp_signed(self.regs.sp, e);
                3
            }
            0xF9 => {
                self.regs.sp = self.regs.hl;
                2
            }
            _ if opcode & 0xC7 == 0x04 => {
                let idx = (opcode >> 3) & 0x7;
                let v = self.read_r8(bus, idx);
                let r = self.inc8(v);
                self.write_r8(bus, idx, r);
                if idx == 6 {
                    3
                } else {
                    1
                }
            }
            _ if opcode & 0xC7 == 0x05 => {
                let idx = (opcode >> 3) & 0x7;
                let v = self.read_r8(bus, idx);
                let r = self.dec8(v);
                self.write_r8(bus, idx, r);
                if idx == 6 {
                    3
                } else {
                    1
                }
            }
            _ if opcode & 0xC7 == 0x06 => {
                let idx = (opcode >> 3) & 0x7;
                let v = self.fetch8(bus);
                self.write_r8(bus, idx, v);
                if idx == 6 {
                    3
                } else {
                    2
                }
            }
            _ if opcode & 0xCF == 0x01 => {
                let idx = (opcode >> 4) & 0x3;
                let v = self.fetch16(bus);
                self.set_rr(idx, v);
                3
            }
            _ if opcode & 0xCF == 0x03 => {
                let idx = (opcode >> 4) & 0x3;
                let v = self.get_rr(idx).wrapping_add(1);
                self.set_rr(idx, v);
                2
            }
            _ if opcode & 0xCF == 0x0B => {
                let idx = (opcode >> 4) & 0x3;
                let v = self.get_rr(idx).wrapping_sub(1);
                self.set_rr(idx, v);
                2
            }
            _ if opcode & 0xCF == 0x09 => {
                let idx = (opcode >> 4) & 0x3;
                let v = self.get_rr(idx);
                self.add_hl(v);
                2
            }
            _ if opcode & 0xE7 == 0xC2 => {
                let cc = (opcode >> 3) & 0x3;
                let addr = self.fetch16(bus);
                if self.check_cc(cc) {
                    self.regs.pc = addr;
                    4
                } else {
                    3
                }
            }
            _ if opcode & 0xE7 == 0xC4 => {
                let cc = (opcode >> 3) & 0x3;
                let addr = self.fetch16(bus);
                if self.check_cc(cc) {
                    self.push16(bus, self.regs.pc);
                    self.regs.pc = addr;
                    6
                } else {
                    3
                }
            }
            _ if opcode & 0xE7 == 0xC0 => {
                let cc = (opcode >> 3) & 0x3;
                if self.check_cc(cc) {
                    self.regs.pc = self.pop16(bus);
                    5
                } else {
                    2
                }
            }
            _ if opcode & 0xC7 == 0xC7 => {
                let n = opcode & 0x38;
                self.push16(bus, self.regs.pc);
                self.regs.pc = n as u16;
                4
            }
            _ if opcode & 0xCF == 0xC5 => {
                let idx = (opcode >> 4) & 0x3;
                let v = self.get_rr_stack(idx);
                self.push16(bus, v);
                4
            }
            _ if opcode & 0xCF == 0xC1 => {
                let idx = (opcode >> 4) & 0x3;
                let v = self.pop16(bus);
                self.set_rr_stack(idx, v);
                3
            }
            _ => {
                error!("unknown opcode ${:02X} at PC=${:04X}", opcode, pc_at_fetch);
                return Err(EmulatorError::UnknownOpcode {
                    pc: pc_at_fetch,
                    opcode,
                });
            }
        };
        Ok(cycles)
    }

    fn execute_cb(&mut self, bus: &mut MemoryBus) -> Result<u32, EmulatorError> {
        let opcode = self.fetch8(bus);
        let idx = opcode & 0x7;
        let group = (opcode >> 6) & 0x3;
        let bit = (opcode >> 3) & 0x7;
        let mem = idx == 6;

        let v = self.read_r8(bus, idx);
        let result = match group {
            0 => {
                let op = (opcode >> 3) & 0x7;
                match op {
                    0 => self.rlc(v),
                    1 => self.rrc(v),
                    2 => self.rl(v),
                    3 => self.rr(v),
                    4 => self.sla(v),
                    5 => self.sra(v),
                    6 => self.swap(v),
                    7 => self.srl(v),
                    _ => unreachable!("3-bit CB op field"),
                }
            }
            1 => {
                self.bit(v, bit);
                v
            }
            2 => v & !(1 << bit),
            3 => v | (1 << bit),
            _ => unreachable!("2-bit CB group field"),
        };

        if group != 1 {
            self.write_r8(bus, idx, result);
        }

        Ok(match group {
            1 => {
                if mem {
                    3
                } else {
                    2
                }
            }
            _ => {
                if mem {
                    4
                } else {
                    2
                }
            }
        })
    }

    fn rlca(&mut self) {
        let a = self.regs.a();
        let r = self.rlc(a);
        self.regs.set_a(r);
        self.regs.set_z(false);
    }

    fn rrca(&mut self) {
        let a = self.regs.a();
        let r = self.rrc(a);
        self.regs.set_a(r);
        self.regs.set_z(false);
    }

    fn rla(&mut self) {
        let a = self.regs.a();
        let r = self.rl(a);
        self.regs.set_a(r);
        self.regs.set_z(false);
    }

    fn rra(&mut self) {
        let a = self.regs.a();
        let r = self.rr(a);
        self.regs.set_a(r);
        self.regs.set_z(false);
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Programs are loaded into work RAM (`0xC000`) rather than ROM space,
    /// since bus writes below `0x8000` are bank-control messages, not
    /// memory stores.
    fn setup(program: &[u8]) -> (Cpu, MemoryBus) {
        let mut bus = MemoryBus::new();
        for (i, &b) in program.iter().enumerate() {
            bus.write8(0xC000 + i as u16, b);
        }
        let mut cpu = Cpu::new();
        cpu.regs.pc = 0xC000;
        (cpu, bus)
    }

    fn run(cpu: &mut Cpu, bus: &mut MemoryBus, steps: usize) {
        for _ in 0..steps {
            cpu.step(bus).unwrap();
        }
    }

    #[test]
    fn pc_and_flag_invariants_hold() {
        let (mut cpu, mut bus) = setup(&[0x3E, 0x42, 0x06, 0x13, 0x80]);
        for _ in 0..3 {
            cpu.step(&mut bus).unwrap();
            assert!(cpu.regs.pc <= 0xFFFF);
            assert_eq!(cpu.regs.f() & 0x0F, 0);
        }
    }

    #[test]
    fn scenario_ld_and_add() {
        // LD A,0x42; LD B,0x13; ADD A,B -> A=0x55, all flags clear.
        let (mut cpu, mut bus) = setup(&[0x3E, 0x42, 0x06, 0x13, 0x80]);
        run(&mut cpu, &mut bus, 3);
        assert_eq!(cpu.regs.a(), 0x55);
        assert!(!cpu.regs.z());
        assert!(!cpu.regs.n());
        assert!(!cpu.regs.h_flag());
        assert!(!cpu.regs.c_flag());
    }

    #[test]
    fn xor_a_clears_a_and_sets_zero() {
        let (mut cpu, mut bus) = setup(&[0xAF]);
        cpu.regs.set_a(0xFF);
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.regs.a(), 0);
        assert!(cpu.regs.z());
        assert!(!cpu.regs.n());
        assert!(!cpu.regs.h_flag());
        assert!(!cpu.regs.c_flag());
    }

    #[test]
    fn push_pop_round_trips_and_masks_f() {
        // LD BC,0x1234; PUSH BC; POP DE
        let (mut cpu, mut bus) = setup(&[0x01, 0x34, 0x12, 0xC5, 0xD1]);
        let sp_before = cpu.regs.sp;
        run(&mut cpu, &mut bus, 3);
        assert_eq!(cpu.regs.de, 0x1234);
        assert_eq!(cpu.regs.bc, 0x1234);
        assert_eq!(cpu.regs.sp, sp_before);
    }

    #[test]
    fn pop_af_masks_low_nibble() {
        // LD HL,0x12FF; PUSH HL; POP AF
        let (mut cpu, mut bus) = setup(&[0x21, 0xFF, 0x12, 0xE5, 0xF1]);
        run(&mut cpu, &mut bus, 3);
        assert_eq!(cpu.regs.a(), 0x12);
        assert_eq!(cpu.regs.f(), 0xF0);
    }

    #[test]
    fn call_then_ret_returns_past_the_call() {
        // At 0xC000: CALL 0xC006; at 0xC003: NOP (return lands here); 0xC006: RET
        let mut program = vec![0xCD, 0x06, 0xC0, 0x00, 0x00, 0x00, 0xC9];
        program.resize(7, 0);
        let (mut cpu, mut bus) = setup(&program);
        cpu.step(&mut bus).unwrap(); // CALL
        assert_eq!(cpu.regs.pc, 0xC006);
        cpu.step(&mut bus).unwrap(); // RET
        assert_eq!(cpu.regs.pc, 0xC003);
    }

    #[test]
    fn inc_0xff_wraps_and_sets_zero_and_half_carry() {
        let (mut cpu, mut bus) = setup(&[0x3C]); // INC A
        cpu.regs.set_a(0xFF);
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.regs.a(), 0x00);
        assert!(cpu.regs.z());
        assert!(!cpu.regs.n());
        assert!(cpu.regs.h_flag());
    }

    #[test]
    fn dec_0x00_wraps_and_clears_zero_sets_half_carry() {
        let (mut cpu, mut bus) = setup(&[0x3D]); // DEC A
        cpu.regs.set_a(0x00);
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.regs.a(), 0xFF);
        assert!(!cpu.regs.z());
        assert!(cpu.regs.n());
        assert!(cpu.regs.h_flag());
    }

    #[test]
    fn add_hl_bc_carries_from_bit_eleven_not_fifteen() {
        let (mut cpu, mut bus) = setup(&[0x09]); // ADD HL,BC
        cpu.regs.hl = 0x0FFF;
        cpu.regs.bc = 0x0001;
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.regs.hl, 0x1000);
        assert!(cpu.regs.h_flag());
        assert!(!cpu.regs.c_flag());
    }

    #[test]
    fn signed_jr_minus_two_is_an_infinite_loop() {
        // JR -2 at 0xC000, displacement byte at 0xC001.
        let (mut cpu, mut bus) = setup(&[0x18, 0xFE]);
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.regs.pc, 0xC000);
    }

    #[test]
    fn vblank_dispatch_clears_ime_and_if_and_jumps_to_vector() {
        let (mut cpu, mut bus) = setup(&[0x00]); // NOP, dispatch happens after it
        cpu.regs.ime = true;
        bus.write8(0xFFFF, interrupts::VBLANK);
        bus.request_interrupt(interrupts::VBLANK);
        cpu.step(&mut bus).unwrap();
        assert!(!cpu.regs.ime);
        assert_eq!(bus.interrupt_flags() & interrupts::VBLANK, 0);
        assert_eq!(cpu.regs.pc, 0x0040);
    }

    #[test]
    fn halt_wakes_on_pending_interrupt_without_ime() {
        let (mut cpu, mut bus) = setup(&[0x76]); // HALT
        cpu.step(&mut bus).unwrap();
        assert!(cpu.halted);
        bus.write8(0xFFFF, interrupts::VBLANK);
        bus.request_interrupt(interrupts::VBLANK);
        cpu.step(&mut bus).unwrap();
        assert!(!cpu.halted);
    }

    #[test]
    fn daa_preserves_subtract_flag() {
        // SUB A,0x01 so A=0xFF,N=1; DAA should correct toward 0x99 and keep N set.
        let (mut cpu, mut bus) = setup(&[0xD6, 0x01, 0x27]);
        cpu.regs.set_a(0x00);
        run(&mut cpu, &mut bus, 2);
        assert!(cpu.regs.n());
    }

    #[test]
    fn unknown_opcode_reports_fatal_halt() {
        let (mut cpu, mut bus) = setup(&[0xD3]); // illegal on real hardware
        let err = cpu.step(&mut bus).unwrap_err();
        assert!(matches!(err, EmulatorError::UnknownOpcode { opcode: 0xD3, .. }));
    }

    #[test]
    fn cb_bit_instruction_does_not_mutate_operand() {
        // LD A,0x00; BIT 0,A -> Z set, A unchanged.
        let (mut cpu, mut bus) = setup(&[0x3E, 0x00, 0xCB, 0x47]);
        run(&mut cpu, &mut bus, 2);
        assert_eq!(cpu.regs.a(), 0x00);
        assert!(cpu.regs.z());
        assert!(cpu.regs.h_flag());
    }

    #[test]
    fn cb_rotate_computes_carry_before_mutation() {
        // LD A,0x01; RRCA should put old bit 0 into carry, not the new A.
        let (mut cpu, mut bus) = setup(&[0x3E, 0x01, 0x0F]);
        run(&mut cpu, &mut bus, 2);
        assert_eq!(cpu.regs.a(), 0x80);
        assert!(cpu.regs.c_flag());
        assert!(!cpu.regs.z());
    }
}
