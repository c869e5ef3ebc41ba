//! CPU emulation for the LS-8 computer.
//!
//! This module implements the complete LS-8 architecture:
//! - 256 bytes of memory shared between code and stack
//! - 8 byte-wide registers (R7 is the stack pointer) plus PC and FL
//! - a 13-instruction set: ALU, stack, and control flow

pub mod memory;
pub mod registers;
pub mod decode;
pub mod execute;

pub use memory::{Memory, MemoryError};
pub use registers::{Flags, Reg, Registers};
pub use decode::{Instruction, DecodeError};
pub use execute::{Cpu, CpuError, CpuState, Outcome};
