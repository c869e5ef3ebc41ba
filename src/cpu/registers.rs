//! LS-8 registers.
//!
//! The LS-8 has 8 byte-wide registers plus two internal ones:
//! - R0-R4: general purpose
//! - R5 (IM): interrupt mask, reserved
//! - R6 (IS): interrupt status, reserved
//! - R7 (SP): stack pointer
//! - PC: program counter
//! - FL: compare flags (Equal / Greater / Less)

use crate::cpu::memory::STACK_TOP;
use serde::{Serialize, Deserialize};

/// The number of registers in the file.
pub const NUM_REGISTERS: usize = 8;

/// A checked register index.
///
/// Instruction operand bytes name registers, but only values 0-7 are
/// valid; `Reg` can only hold one of them, so register accesses cannot go
/// out of bounds.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reg(u8);

impl Reg {
    /// R7: stack pointer.
    pub const SP: Reg = Reg(7);

    /// R5: interrupt mask (reserved, unused by the instruction subset).
    pub const IM: Reg = Reg(5);

    /// R6: interrupt status (reserved, unused by the instruction subset).
    pub const IS: Reg = Reg(6);

    /// Create from a raw operand byte. Returns `None` for indices >= 8.
    pub fn new(index: u8) -> Option<Reg> {
        if (index as usize) < NUM_REGISTERS {
            Some(Reg(index))
        } else {
            None
        }
    }

    /// The register number, 0-7.
    pub fn index(self) -> u8 {
        self.0
    }
}

impl std::fmt::Debug for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{}", self.0)
    }
}

impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// The FL compare-flags register.
///
/// Only the low 3 bits are meaningful: bit 0 Equal, bit 1 Greater, bit 2
/// Less. CMP is the only writer and leaves exactly one of the three set.
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Flags(u8);

impl Flags {
    /// Bit 0: the compared values were equal.
    pub const EQUAL: u8 = 0b001;
    /// Bit 1: the first value was greater.
    pub const GREATER: u8 = 0b010;
    /// Bit 2: the first value was less.
    pub const LESS: u8 = 0b100;

    /// All flags clear (the reset state; no compare has run yet).
    pub const fn clear() -> Self {
        Flags(0)
    }

    /// Compare two values, setting exactly one of Equal/Greater/Less.
    pub fn compare(a: u8, b: u8) -> Self {
        use std::cmp::Ordering;

        match a.cmp(&b) {
            Ordering::Equal => Flags(Self::EQUAL),
            Ordering::Greater => Flags(Self::GREATER),
            Ordering::Less => Flags(Self::LESS),
        }
    }

    pub fn equal(self) -> bool {
        self.0 & Self::EQUAL != 0
    }

    pub fn greater(self) -> bool {
        self.0 & Self::GREATER != 0
    }

    pub fn less(self) -> bool {
        self.0 & Self::LESS != 0
    }

    /// The raw FL byte.
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl std::fmt::Debug for Flags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.equal() {
            "E"
        } else if self.greater() {
            "G"
        } else if self.less() {
            "L"
        } else {
            "-"
        };
        write!(f, "FL={}", state)
    }
}

/// The LS-8 register file, including PC and FL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    r: [u8; NUM_REGISTERS],

    /// PC: memory address of the next instruction to fetch.
    pub pc: u8,

    /// FL: result of the last CMP.
    pub fl: Flags,
}

impl Registers {
    /// Create a fresh register file: everything zero except SP, which
    /// starts at the stack top.
    pub fn new() -> Self {
        let mut r = [0; NUM_REGISTERS];
        r[Reg::SP.index() as usize] = STACK_TOP;

        Self {
            r,
            pc: 0,
            fl: Flags::clear(),
        }
    }

    /// Reset all registers to their power-on values.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Read a register.
    #[inline]
    pub fn get(&self, reg: Reg) -> u8 {
        self.r[reg.index() as usize]
    }

    /// Write a register.
    #[inline]
    pub fn set(&mut self, reg: Reg, value: u8) {
        self.r[reg.index() as usize] = value;
    }

    /// Stack pointer shorthand (R7).
    pub fn sp(&self) -> u8 {
        self.get(Reg::SP)
    }

    /// Write the stack pointer (R7).
    pub fn set_sp(&mut self, value: u8) {
        self.set(Reg::SP, value);
    }

    /// Advance PC by an instruction width. Wraps with the 256-byte
    /// address space.
    pub fn advance_pc(&mut self, width: u8) {
        self.pc = self.pc.wrapping_add(width);
    }

    /// Set PC to an absolute address.
    pub fn jump(&mut self, addr: u8) {
        self.pc = addr;
    }

    /// The register cells in index order (for trace output).
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.r.iter().copied()
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reg_index_bounds() {
        for i in 0..NUM_REGISTERS as u8 {
            assert_eq!(Reg::new(i).map(Reg::index), Some(i));
        }
        assert_eq!(Reg::new(8), None);
        assert_eq!(Reg::new(0xFF), None);
    }

    #[test]
    fn test_sp_starts_at_stack_top() {
        let regs = Registers::new();
        assert_eq!(regs.sp(), STACK_TOP);
        assert_eq!(regs.pc, 0);
    }

    #[test]
    fn test_get_set_roundtrip() {
        let mut regs = Registers::new();
        let r3 = Reg::new(3).unwrap();

        regs.set(r3, 200);
        assert_eq!(regs.get(r3), 200);
    }

    #[test]
    fn test_compare_sets_exactly_one_flag() {
        for (a, b) in [(1, 1), (9, 3), (3, 9), (0, 255), (255, 0)] {
            let fl = Flags::compare(a, b);
            let set = [fl.equal(), fl.greater(), fl.less()]
                .iter()
                .filter(|&&s| s)
                .count();
            assert_eq!(set, 1, "compare({}, {}) set {} flags", a, b, set);
        }
    }

    #[test]
    fn test_compare_matches_ordering() {
        assert!(Flags::compare(5, 5).equal());
        assert!(Flags::compare(6, 5).greater());
        assert!(Flags::compare(4, 5).less());
    }

    #[test]
    fn test_advance_pc_wraps() {
        let mut regs = Registers::new();
        regs.pc = 0xFE;

        regs.advance_pc(3);
        assert_eq!(regs.pc, 1);
    }

    #[test]
    fn test_reset_restores_power_on_state() {
        let mut regs = Registers::new();
        regs.set(Reg::new(0).unwrap(), 42);
        regs.pc = 17;
        regs.fl = Flags::compare(1, 2);

        regs.reset();
        assert_eq!(regs, Registers::new());
    }
}
