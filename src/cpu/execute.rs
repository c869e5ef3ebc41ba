//! LS-8 execution engine.
//!
//! Implements the fetch-decode-execute cycle and all instruction
//! behaviors, including the ALU and the stack/control-flow group.

use crate::cpu::{Memory, Registers};
use crate::cpu::decode::{self, Instruction, DecodeError};
use crate::cpu::memory::MemoryError;
use crate::cpu::registers::Flags;
use serde::{Serialize, Deserialize};
use std::io::Write;
use thiserror::Error;

/// CPU execution state.
///
/// There is deliberately no error state: a failed step surfaces through
/// the returned `Result` and leaves the machine untouched, so callers can
/// inspect the exact state at the faulting fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU has halted (executed HLT).
    Halted,
}

/// Result of a single successful step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The instruction completed; more follow.
    Continue,
    /// HLT was executed; the machine is in its terminal state.
    Halted,
}

/// The LS-8 CPU.
///
/// A self-contained value type owning the register file, flags, and
/// memory. PRN output goes to a caller-supplied sink so embedding code
/// and tests can capture it.
#[derive(Clone, Serialize, Deserialize)]
pub struct Cpu {
    /// CPU registers, including PC and FL.
    pub regs: Registers,
    /// Unified code/stack memory.
    pub mem: Memory,
    /// Current execution state.
    pub state: CpuState,
    /// Instructions executed so far.
    pub cycles: u64,
    /// Last executed instruction (for tracing).
    last_instr: Option<Instruction>,
}

impl Cpu {
    /// Create a new CPU with zeroed state and SP at the stack top.
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            mem: Memory::new(),
            state: CpuState::Running,
            cycles: 0,
            last_instr: None,
        }
    }

    /// Reset the CPU to its power-on state.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.mem.clear();
        self.state = CpuState::Running;
        self.cycles = 0;
        self.last_instr = None;
    }

    /// Load a program image at consecutive addresses starting at 0.
    pub fn load(&mut self, image: &[u8]) -> Result<(), MemoryError> {
        self.mem.load(image)
    }

    /// Execute a single fetch-decode-execute cycle.
    ///
    /// `out` receives PRN output. On error the machine is left exactly as
    /// it was before the faulting fetch.
    pub fn step<W: Write>(&mut self, out: &mut W) -> Result<Outcome, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }

        // Fetch the opcode and both potential operand bytes. Operands are
        // read eagerly; instructions that need fewer ignore the extras.
        // PC arithmetic wraps with the 256-byte address space, so the
        // prefetch stays in bounds even for a 1-byte instruction in the
        // last cells of memory.
        let pc = self.regs.pc;
        let opcode = self.mem.read(pc);
        let operand_a = self.mem.read(pc.wrapping_add(1));
        let operand_b = self.mem.read(pc.wrapping_add(2));

        let instr = decode::decode(opcode, operand_a, operand_b)?;

        let outcome = self.execute(instr, out)?;

        self.cycles += 1;
        self.last_instr = Some(instr);

        Ok(outcome)
    }

    /// Run until halt or error.
    ///
    /// Returns the number of instructions executed.
    pub fn run<W: Write>(&mut self, out: &mut W) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;

        while self.state == CpuState::Running {
            self.step(out)?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Run for at most `max_cycles` instructions.
    pub fn run_limited<W: Write>(&mut self, max_cycles: u64, out: &mut W) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;
        let limit = self.cycles + max_cycles;

        while self.state == CpuState::Running && self.cycles < limit {
            self.step(out)?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Execute a decoded instruction.
    ///
    /// Every handler advances PC by its own width; the control-flow
    /// handlers replace PC instead (the conditional jumps advance only on
    /// their not-taken path). Fault checks come before any mutation.
    fn execute<W: Write>(&mut self, instr: Instruction, out: &mut W) -> Result<Outcome, CpuError> {
        let width = instr.width();

        match instr {
            // ==================== Control Flow ====================

            Instruction::Hlt => {
                self.state = CpuState::Halted;
                self.regs.advance_pc(width);
            }

            Instruction::Call { reg } => {
                // Return address points past the 2-byte CALL.
                let return_addr = self.regs.pc.wrapping_add(width);
                let target = self.regs.get(reg);
                self.push(return_addr)?;
                self.regs.jump(target);
            }

            Instruction::Ret => {
                let return_addr = self.pop()?;
                self.regs.jump(return_addr);
            }

            Instruction::Jmp { reg } => {
                let target = self.regs.get(reg);
                self.regs.jump(target);
            }

            Instruction::Jeq { reg } => {
                if self.regs.fl.equal() {
                    let target = self.regs.get(reg);
                    self.regs.jump(target);
                } else {
                    self.regs.advance_pc(width);
                }
            }

            Instruction::Jne { reg } => {
                if !self.regs.fl.equal() {
                    let target = self.regs.get(reg);
                    self.regs.jump(target);
                } else {
                    self.regs.advance_pc(width);
                }
            }

            // ==================== Data Transfer ====================

            Instruction::Ldi { reg, value } => {
                self.regs.set(reg, value);
                self.regs.advance_pc(width);
            }

            Instruction::Push { reg } => {
                let value = self.regs.get(reg);
                self.push(value)?;
                self.regs.advance_pc(width);
            }

            Instruction::Pop { reg } => {
                let value = self.pop()?;
                self.regs.set(reg, value);
                self.regs.advance_pc(width);
            }

            Instruction::Prn { reg } => {
                let value = self.regs.get(reg);
                writeln!(out, "{}", value).map_err(|e| CpuError::Output(e.to_string()))?;
                self.regs.advance_pc(width);
            }

            // ==================== ALU ====================

            Instruction::Add { dst, src } => {
                let result = self.regs.get(dst).wrapping_add(self.regs.get(src));
                self.regs.set(dst, result);
                self.regs.advance_pc(width);
            }

            Instruction::Mul { dst, src } => {
                let result = self.regs.get(dst).wrapping_mul(self.regs.get(src));
                self.regs.set(dst, result);
                self.regs.advance_pc(width);
            }

            Instruction::Cmp { a, b } => {
                self.regs.fl = Flags::compare(self.regs.get(a), self.regs.get(b));
                self.regs.advance_pc(width);
            }
        }

        Ok(if self.state == CpuState::Halted {
            Outcome::Halted
        } else {
            Outcome::Continue
        })
    }

    /// Push a byte: decrement SP, then write. The stack grows down, and a
    /// push that would carry SP below address 0 is a fault.
    fn push(&mut self, value: u8) -> Result<(), CpuError> {
        let sp = self.regs.sp();
        if sp == 0 {
            return Err(CpuError::StackOverflow { pc: self.regs.pc });
        }

        self.regs.set_sp(sp - 1);
        self.mem.write(sp - 1, value);
        Ok(())
    }

    /// Pop a byte: read, then increment SP. A pop that would carry SP
    /// past the last memory address is a fault.
    fn pop(&mut self) -> Result<u8, CpuError> {
        let sp = self.regs.sp();
        if sp == u8::MAX {
            return Err(CpuError::StackUnderflow { pc: self.regs.pc });
        }

        let value = self.mem.read(sp);
        self.regs.set_sp(sp + 1);
        Ok(value)
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    /// Check if the CPU has halted.
    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .finish()
    }
}

/// Errors that can occur during CPU execution. All are fatal to the
/// current run; none are silently ignored.
#[derive(Debug, Clone, Error)]
pub enum CpuError {
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("stack overflow: push below address 0 (pc={pc:#04x})")]
    StackOverflow { pc: u8 },

    #[error("stack underflow: pop past the top of memory (pc={pc:#04x})")]
    StackUnderflow { pc: u8 },

    #[error("output error: {0}")]
    Output(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::Opcode;
    use crate::cpu::memory::STACK_TOP;
    use crate::cpu::registers::Reg;
    use proptest::prelude::*;

    fn r(index: u8) -> Reg {
        Reg::new(index).unwrap()
    }

    /// Load and run an image, returning the halted CPU and its output.
    fn run_image(image: &[u8]) -> (Cpu, String) {
        let mut cpu = Cpu::new();
        cpu.load(image).unwrap();

        let mut out = Vec::new();
        cpu.run(&mut out).unwrap();

        (cpu, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_cpu_halt() {
        let (cpu, out) = run_image(&[Opcode::HLT]);

        assert!(cpu.is_halted());
        assert_eq!(cpu.cycles, 1);
        assert!(out.is_empty());
    }

    #[test]
    fn test_print8_program() {
        // LDI R0,8; LDI R1,9; MUL R0,R1; PRN R0; HLT
        let image = [
            0b10000010, 0b00000000, 0b00001000,
            0b10000010, 0b00000001, 0b00001001,
            0b10100010, 0b00000000, 0b00000001,
            0b01000111, 0b00000000,
            0b00000001,
        ];
        let (cpu, out) = run_image(&image);

        assert_eq!(out, "72\n");
        assert_eq!(cpu.regs.get(r(0)), 72);
        assert!(cpu.is_halted());
    }

    #[test]
    fn test_add_wraps_to_eight_bits() {
        // LDI R0,255; LDI R1,10; ADD R0,R1; HLT
        let image = [
            Opcode::LDI, 0, 255,
            Opcode::LDI, 1, 10,
            Opcode::ADD, 0, 1,
            Opcode::HLT,
        ];
        let (cpu, _) = run_image(&image);

        assert_eq!(cpu.regs.get(r(0)), 9);
    }

    #[test]
    fn test_ldi_idempotent() {
        let image = [
            Opcode::LDI, 2, 123,
            Opcode::LDI, 2, 123,
            Opcode::HLT,
        ];
        let (cpu, _) = run_image(&image);

        assert_eq!(cpu.regs.get(r(2)), 123);
    }

    #[test]
    fn test_push_pop_roundtrip() {
        // LDI R2,5; PUSH R2; LDI R2,0; POP R2; HLT
        let image = [
            Opcode::LDI, 2, 5,
            Opcode::PUSH, 2,
            Opcode::LDI, 2, 0,
            Opcode::POP, 2,
            Opcode::HLT,
        ];
        let (cpu, _) = run_image(&image);

        assert_eq!(cpu.regs.get(r(2)), 5);
        assert_eq!(cpu.regs.sp(), STACK_TOP);
        // The pushed value went through memory below the stack top.
        assert_eq!(cpu.mem.read(STACK_TOP - 1), 5);
    }

    #[test]
    fn test_call_ret() {
        // 0: LDI R0,10   (subroutine address)
        // 3: CALL R0
        // 5: HLT
        // 10: LDI R2,99
        // 13: RET
        let mut image = vec![0u8; 14];
        image[0..3].copy_from_slice(&[Opcode::LDI, 0, 10]);
        image[3..5].copy_from_slice(&[Opcode::CALL, 0]);
        image[5] = Opcode::HLT;
        image[10..13].copy_from_slice(&[Opcode::LDI, 2, 99]);
        image[13] = Opcode::RET;

        let (cpu, _) = run_image(&image);

        assert!(cpu.is_halted());
        assert_eq!(cpu.regs.get(r(2)), 99, "subroutine body ran");
        assert_eq!(cpu.regs.sp(), STACK_TOP, "RET restored SP");
    }

    #[test]
    fn test_call_pushes_address_after_call() {
        let mut cpu = Cpu::new();
        let mut image = vec![0u8; 32];
        image[0..3].copy_from_slice(&[Opcode::LDI, 0, 20]);
        image[3..5].copy_from_slice(&[Opcode::CALL, 0]);
        image[20] = Opcode::HLT;
        cpu.load(&image).unwrap();

        let mut out = Vec::new();
        cpu.step(&mut out).unwrap(); // LDI
        cpu.step(&mut out).unwrap(); // CALL

        assert_eq!(cpu.regs.pc, 20);
        assert_eq!(cpu.regs.sp(), STACK_TOP - 1);
        // Return address is the byte after the CALL instruction at 3.
        assert_eq!(cpu.mem.read(cpu.regs.sp()), 5);
    }

    #[test]
    fn test_cmp_jeq_taken() {
        // 0:  LDI R0,7
        // 3:  LDI R1,7
        // 6:  CMP R0,R1
        // 9:  LDI R2,20   (branch target)
        // 12: JEQ R2
        // 14: LDI R3,1    (skipped)
        // 17: HLT
        // 20: LDI R3,2
        // 23: HLT
        let mut image = vec![0u8; 24];
        image[0..3].copy_from_slice(&[Opcode::LDI, 0, 7]);
        image[3..6].copy_from_slice(&[Opcode::LDI, 1, 7]);
        image[6..9].copy_from_slice(&[Opcode::CMP, 0, 1]);
        image[9..12].copy_from_slice(&[Opcode::LDI, 2, 20]);
        image[12..14].copy_from_slice(&[Opcode::JEQ, 2]);
        image[14..17].copy_from_slice(&[Opcode::LDI, 3, 1]);
        image[17] = Opcode::HLT;
        image[20..23].copy_from_slice(&[Opcode::LDI, 3, 2]);
        image[23] = Opcode::HLT;

        let (cpu, _) = run_image(&image);

        assert!(cpu.regs.fl.equal());
        assert_eq!(cpu.regs.get(r(3)), 2, "JEQ took the branch");
    }

    #[test]
    fn test_cmp_jne_not_taken_advances_two() {
        let mut cpu = Cpu::new();
        let image = [
            Opcode::LDI, 0, 7,
            Opcode::LDI, 1, 7,
            Opcode::CMP, 0, 1,
            Opcode::JNE, 0,
            Opcode::HLT,
        ];
        cpu.load(&image).unwrap();

        let mut out = Vec::new();
        for _ in 0..4 {
            cpu.step(&mut out).unwrap();
        }

        // JNE at 9 fell through to 11.
        assert_eq!(cpu.regs.pc, 11);
        assert!(cpu.is_running());
    }

    #[test]
    fn test_jmp_unconditional() {
        // JMP skips over an LDI regardless of FL.
        let mut image = vec![0u8; 12];
        image[0..3].copy_from_slice(&[Opcode::LDI, 0, 8]);
        image[3..5].copy_from_slice(&[Opcode::JMP, 0]);
        image[5..8].copy_from_slice(&[Opcode::LDI, 1, 1]);
        image[8] = Opcode::HLT;

        let (cpu, _) = run_image(&image);
        assert_eq!(cpu.regs.get(r(1)), 0, "LDI at 5 was jumped over");
    }

    #[test]
    fn test_invalid_opcode_preserves_state() {
        let mut cpu = Cpu::new();
        cpu.load(&[0xFF]).unwrap();
        let before = cpu.clone();

        let mut out = Vec::new();
        let err = cpu.step(&mut out).unwrap_err();

        assert!(matches!(err, CpuError::Decode(DecodeError::InvalidOpcode(0xFF))));
        assert_eq!(cpu.regs, before.regs);
        assert_eq!(cpu.mem, before.mem);
        assert_eq!(cpu.state, before.state);
        assert_eq!(cpu.cycles, before.cycles);
    }

    #[test]
    fn test_stack_overflow_fault() {
        // LDI R7,0 then PUSH faults without mutating anything.
        let mut cpu = Cpu::new();
        cpu.load(&[Opcode::LDI, 7, 0, Opcode::PUSH, 0]).unwrap();

        let mut out = Vec::new();
        cpu.step(&mut out).unwrap();
        let before = cpu.clone();

        let err = cpu.step(&mut out).unwrap_err();
        assert!(matches!(err, CpuError::StackOverflow { pc: 3 }));
        assert_eq!(cpu.regs, before.regs);
        assert_eq!(cpu.mem, before.mem);
    }

    #[test]
    fn test_stack_underflow_fault() {
        // LDI R7,0xFF then POP faults: SP would leave memory.
        let mut cpu = Cpu::new();
        cpu.load(&[Opcode::LDI, 7, 0xFF, Opcode::POP, 0]).unwrap();

        let mut out = Vec::new();
        cpu.step(&mut out).unwrap();

        let err = cpu.step(&mut out).unwrap_err();
        assert!(matches!(err, CpuError::StackUnderflow { pc: 3 }));
        assert_eq!(cpu.regs.sp(), 0xFF);
    }

    #[test]
    fn test_step_after_halt_is_an_error() {
        let (mut cpu, _) = run_image(&[Opcode::HLT]);

        let mut out = Vec::new();
        let err = cpu.step(&mut out).unwrap_err();
        assert!(matches!(err, CpuError::NotRunning(CpuState::Halted)));
    }

    #[test]
    fn test_operand_prefetch_wraps_at_top_of_memory() {
        // A 1-byte HLT in the last cell: the eager operand reads at
        // PC+1/PC+2 wrap around instead of running off the end.
        let mut cpu = Cpu::new();
        cpu.regs.pc = 0xFF;
        cpu.mem.write(0xFF, Opcode::HLT);

        let mut out = Vec::new();
        assert_eq!(cpu.step(&mut out).unwrap(), Outcome::Halted);
    }

    #[test]
    fn test_state_survives_serde_roundtrip() {
        let (cpu, _) = run_image(&[Opcode::LDI, 0, 42, Opcode::HLT]);

        let json = serde_json::to_string(&cpu).unwrap();
        let restored: Cpu = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.regs, cpu.regs);
        assert_eq!(restored.mem, cpu.mem);
        assert_eq!(restored.state, cpu.state);
        assert_eq!(restored.cycles, cpu.cycles);
    }

    #[test]
    fn test_run_limited_stops_at_bound() {
        // An infinite loop: LDI R0,0; JMP R0 (jumps back to 0).
        let mut cpu = Cpu::new();
        cpu.load(&[Opcode::LDI, 0, 0, Opcode::JMP, 0]).unwrap();

        let mut out = Vec::new();
        let executed = cpu.run_limited(100, &mut out).unwrap();

        assert_eq!(executed, 100);
        assert!(cpu.is_running());
    }

    proptest! {
        #[test]
        fn prop_add_wraps_mod_256(a: u8, b: u8) {
            let image = [Opcode::LDI, 0, a, Opcode::LDI, 1, b, Opcode::ADD, 0, 1, Opcode::HLT];
            let (cpu, _) = run_image(&image);
            prop_assert_eq!(cpu.regs.get(r(0)) as u16, (a as u16 + b as u16) % 256);
        }

        #[test]
        fn prop_mul_wraps_mod_256(a: u8, b: u8) {
            let image = [Opcode::LDI, 0, a, Opcode::LDI, 1, b, Opcode::MUL, 0, 1, Opcode::HLT];
            let (cpu, _) = run_image(&image);
            prop_assert_eq!(cpu.regs.get(r(0)) as u32, (a as u32 * b as u32) % 256);
        }

        #[test]
        // SP stays above the 14-byte program so the push cannot clobber it.
        fn prop_push_pop_restores_value_and_sp(value: u8, sp in 15u8..=STACK_TOP) {
            let image = [
                Opcode::LDI, 7, sp,
                Opcode::LDI, 2, value,
                Opcode::PUSH, 2,
                Opcode::LDI, 2, 0,
                Opcode::POP, 2,
                Opcode::HLT,
            ];
            let (cpu, _) = run_image(&image);
            prop_assert_eq!(cpu.regs.get(r(2)), value);
            prop_assert_eq!(cpu.regs.sp(), sp);
        }

        #[test]
        fn prop_cmp_sets_exactly_one_flag(a: u8, b: u8) {
            let image = [Opcode::LDI, 0, a, Opcode::LDI, 1, b, Opcode::CMP, 0, 1, Opcode::HLT];
            let (cpu, _) = run_image(&image);

            let fl = cpu.regs.fl;
            let set = [fl.equal(), fl.greater(), fl.less()].iter().filter(|&&s| s).count();
            prop_assert_eq!(set, 1);
            prop_assert_eq!(fl.equal(), a == b);
            prop_assert_eq!(fl.greater(), a > b);
            prop_assert_eq!(fl.less(), a < b);
        }
    }
}
