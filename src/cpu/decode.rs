//! LS-8 instruction set and decoder.
//!
//! Instructions are 1-3 bytes: an opcode byte followed by up to two
//! operand bytes. The opcode byte is structured `AABCDDDD`:
//!
//! - `AA`: number of operand bytes (0-2)
//! - `B`: 1 if the instruction is handled by the ALU
//! - `C`: 1 if the instruction sets PC directly
//! - `DDDD`: instruction identifier
//!
//! Dispatch still goes through an explicit opcode table so that unknown
//! opcodes fail decode instead of being skipped by width arithmetic.

use crate::cpu::registers::Reg;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Opcode byte values.
pub struct Opcode;

impl Opcode {
    pub const HLT: u8 = 0b0000_0001;
    pub const RET: u8 = 0b0001_0001;
    pub const PUSH: u8 = 0b0100_0101;
    pub const POP: u8 = 0b0100_0110;
    pub const PRN: u8 = 0b0100_0111;
    pub const CALL: u8 = 0b0101_0000;
    pub const JMP: u8 = 0b0101_0100;
    pub const JEQ: u8 = 0b0101_0101;
    pub const JNE: u8 = 0b0101_0110;
    pub const LDI: u8 = 0b1000_0010;
    pub const ADD: u8 = 0b1010_0000;
    pub const MUL: u8 = 0b1010_0010;
    pub const CMP: u8 = 0b1010_0111;
}

/// A decoded LS-8 instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    // ==================== Control Flow ====================

    /// Halt execution; terminal state.
    Hlt,

    /// Call the routine at the address held in a register, pushing the
    /// address of the following instruction.
    Call { reg: Reg },

    /// Return to the address on top of the stack.
    Ret,

    /// Unconditional jump: PC := reg.
    Jmp { reg: Reg },

    /// Jump if the Equal flag is set.
    Jeq { reg: Reg },

    /// Jump if the Equal flag is clear.
    Jne { reg: Reg },

    // ==================== Data Transfer ====================

    /// Load immediate: reg := value.
    Ldi { reg: Reg, value: u8 },

    /// Push a register onto the stack.
    Push { reg: Reg },

    /// Pop the top of the stack into a register.
    Pop { reg: Reg },

    /// Print the decimal value of a register to the output sink.
    Prn { reg: Reg },

    // ==================== ALU ====================

    /// dst := (dst + src) mod 256.
    Add { dst: Reg, src: Reg },

    /// dst := (dst * src) mod 256.
    Mul { dst: Reg, src: Reg },

    /// Compare two registers and set FL to exactly one of
    /// Equal/Greater/Less.
    Cmp { a: Reg, b: Reg },
}

impl Instruction {
    /// Instruction width in bytes: the opcode plus its operands.
    ///
    /// Instructions that set PC replace it outright; the width of the
    /// conditional jumps still matters for their not-taken path.
    pub fn width(&self) -> u8 {
        match self {
            Instruction::Hlt | Instruction::Ret => 1,
            Instruction::Call { .. }
            | Instruction::Jmp { .. }
            | Instruction::Jeq { .. }
            | Instruction::Jne { .. }
            | Instruction::Push { .. }
            | Instruction::Pop { .. }
            | Instruction::Prn { .. } => 2,
            Instruction::Ldi { .. }
            | Instruction::Add { .. }
            | Instruction::Mul { .. }
            | Instruction::Cmp { .. } => 3,
        }
    }

    /// Whether the instruction writes PC itself (conditionally, for the
    /// conditional jumps) instead of always advancing by its width.
    pub fn sets_pc(&self) -> bool {
        matches!(
            self,
            Instruction::Call { .. }
                | Instruction::Ret
                | Instruction::Jmp { .. }
                | Instruction::Jeq { .. }
                | Instruction::Jne { .. }
        )
    }

    /// The assembly mnemonic.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::Hlt => "HLT",
            Instruction::Call { .. } => "CALL",
            Instruction::Ret => "RET",
            Instruction::Jmp { .. } => "JMP",
            Instruction::Jeq { .. } => "JEQ",
            Instruction::Jne { .. } => "JNE",
            Instruction::Ldi { .. } => "LDI",
            Instruction::Push { .. } => "PUSH",
            Instruction::Pop { .. } => "POP",
            Instruction::Prn { .. } => "PRN",
            Instruction::Add { .. } => "ADD",
            Instruction::Mul { .. } => "MUL",
            Instruction::Cmp { .. } => "CMP",
        }
    }
}

fn reg(operand: u8) -> Result<Reg, DecodeError> {
    Reg::new(operand).ok_or(DecodeError::RegisterOutOfRange(operand))
}

/// Decode an opcode byte and its two eagerly fetched operand bytes.
///
/// Operand bytes an instruction does not use are ignored, mirroring the
/// fetch unit, which always reads PC+1 and PC+2.
pub fn decode(opcode: u8, operand_a: u8, operand_b: u8) -> Result<Instruction, DecodeError> {
    let instruction = match opcode {
        Opcode::HLT => Instruction::Hlt,
        Opcode::LDI => Instruction::Ldi { reg: reg(operand_a)?, value: operand_b },
        Opcode::PRN => Instruction::Prn { reg: reg(operand_a)? },
        Opcode::ADD => Instruction::Add { dst: reg(operand_a)?, src: reg(operand_b)? },
        Opcode::MUL => Instruction::Mul { dst: reg(operand_a)?, src: reg(operand_b)? },
        Opcode::PUSH => Instruction::Push { reg: reg(operand_a)? },
        Opcode::POP => Instruction::Pop { reg: reg(operand_a)? },
        Opcode::CALL => Instruction::Call { reg: reg(operand_a)? },
        Opcode::RET => Instruction::Ret,
        Opcode::CMP => Instruction::Cmp { a: reg(operand_a)?, b: reg(operand_b)? },
        Opcode::JMP => Instruction::Jmp { reg: reg(operand_a)? },
        Opcode::JEQ => Instruction::Jeq { reg: reg(operand_a)? },
        Opcode::JNE => Instruction::Jne { reg: reg(operand_a)? },
        _ => return Err(DecodeError::InvalidOpcode(opcode)),
    };

    Ok(instruction)
}

/// Encode an instruction back to its byte sequence.
pub fn encode(instr: &Instruction) -> Vec<u8> {
    match instr {
        Instruction::Hlt => vec![Opcode::HLT],
        Instruction::Ret => vec![Opcode::RET],
        Instruction::Call { reg } => vec![Opcode::CALL, reg.index()],
        Instruction::Jmp { reg } => vec![Opcode::JMP, reg.index()],
        Instruction::Jeq { reg } => vec![Opcode::JEQ, reg.index()],
        Instruction::Jne { reg } => vec![Opcode::JNE, reg.index()],
        Instruction::Ldi { reg, value } => vec![Opcode::LDI, reg.index(), *value],
        Instruction::Push { reg } => vec![Opcode::PUSH, reg.index()],
        Instruction::Pop { reg } => vec![Opcode::POP, reg.index()],
        Instruction::Prn { reg } => vec![Opcode::PRN, reg.index()],
        Instruction::Add { dst, src } => vec![Opcode::ADD, dst.index(), src.index()],
        Instruction::Mul { dst, src } => vec![Opcode::MUL, dst.index(), src.index()],
        Instruction::Cmp { a, b } => vec![Opcode::CMP, a.index(), b.index()],
    }
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid opcode: {0:#010b}")]
    InvalidOpcode(u8),

    #[error("register operand {0} out of range (R0-R7)")]
    RegisterOutOfRange(u8),
}
