//! Simple assembler for LS-8 programs.
//!
//! Syntax:
//! ```text
//! # Comment
//! LOOP:              # define a label
//!     LDI R0,LOOP    # immediates: labels, decimal, 0x.. or 0b..
//!     LDI R1,1
//!     ADD R0,R1
//!     PUSH R0
//!     JMP R2
//!     HLT
//!     DAT 0b00101010 # raw data byte
//! ```
//!
//! Labels name byte addresses in the assembled image. Since every jump
//! and call takes its target from a register, a label is used by loading
//! it into a register with LDI first.

use crate::cpu::decode::{encode, Instruction};
use crate::cpu::memory::MEMORY_SIZE;
use crate::cpu::registers::Reg;
use std::collections::HashMap;
use thiserror::Error;

/// Assemble source text to a byte image.
pub fn assemble(source: &str) -> Result<Vec<u8>, AssemblerError> {
    let mut asm = Assembler::new();
    asm.assemble(source)
}

/// The assembler state.
struct Assembler {
    /// Symbol table (label -> byte address).
    symbols: HashMap<String, u8>,
    /// Unresolved label references: (byte offset to patch, label, source line).
    pending: Vec<(usize, String, usize)>,
    /// Output image.
    output: Vec<u8>,
}

impl Assembler {
    fn new() -> Self {
        Self {
            symbols: HashMap::new(),
            pending: Vec::new(),
            output: Vec::new(),
        }
    }

    fn assemble(&mut self, source: &str) -> Result<Vec<u8>, AssemblerError> {
        // Pass 1: collect labels and generate code
        for (line_num, line) in source.lines().enumerate() {
            self.process_line(line, line_num + 1)?;
        }

        // Pass 2: resolve forward references
        self.resolve_references()?;

        Ok(self.output.clone())
    }

    fn process_line(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        // Strip comments
        let line = match line.split_once('#') {
            Some((before, _)) => before.trim(),
            None => line.trim(),
        };

        if line.is_empty() {
            return Ok(());
        }

        // Check for a label definition
        if let Some((label, rest)) = line.split_once(':') {
            let label = label.trim().to_uppercase();
            if !label.is_empty() {
                let addr = self.current_addr(line_num)?;
                self.symbols.insert(label, addr);
            }

            let rest = rest.trim();
            if !rest.is_empty() {
                return self.process_instruction(rest, line_num);
            }
            return Ok(());
        }

        self.process_instruction(line, line_num)
    }

    fn process_instruction(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        let (mnemonic, operands) = match line.split_once(char::is_whitespace) {
            Some((m, rest)) => (m.to_uppercase(), rest.trim()),
            None => (line.to_uppercase(), ""),
        };

        // Operands are comma-separated; spaces around commas are fine.
        let operands: Vec<&str> = if operands.is_empty() {
            Vec::new()
        } else {
            operands.split(',').map(str::trim).collect()
        };

        match mnemonic.as_str() {
            "DAT" | "DATA" => {
                let operand = self.expect_operands(&operands, 1, &mnemonic, line_num)?[0];
                let offset = self.output.len();
                let value = self.parse_value(operand, line_num, offset)?;
                self.emit(&[value], line_num)?;
            }

            "HLT" | "HALT" => {
                self.expect_operands(&operands, 0, &mnemonic, line_num)?;
                self.emit(&encode(&Instruction::Hlt), line_num)?;
            }
            "RET" => {
                self.expect_operands(&operands, 0, &mnemonic, line_num)?;
                self.emit(&encode(&Instruction::Ret), line_num)?;
            }

            "PRN" | "PUSH" | "POP" | "CALL" | "JMP" | "JEQ" | "JNE" => {
                let operand = self.expect_operands(&operands, 1, &mnemonic, line_num)?[0];
                let reg = parse_register(operand, line_num)?;
                let instr = match mnemonic.as_str() {
                    "PRN" => Instruction::Prn { reg },
                    "PUSH" => Instruction::Push { reg },
                    "POP" => Instruction::Pop { reg },
                    "CALL" => Instruction::Call { reg },
                    "JMP" => Instruction::Jmp { reg },
                    "JEQ" => Instruction::Jeq { reg },
                    _ => Instruction::Jne { reg },
                };
                self.emit(&encode(&instr), line_num)?;
            }

            "ADD" | "MUL" | "CMP" => {
                let ops = self.expect_operands(&operands, 2, &mnemonic, line_num)?;
                let a = parse_register(ops[0], line_num)?;
                let b = parse_register(ops[1], line_num)?;
                let instr = match mnemonic.as_str() {
                    "ADD" => Instruction::Add { dst: a, src: b },
                    "MUL" => Instruction::Mul { dst: a, src: b },
                    _ => Instruction::Cmp { a, b },
                };
                self.emit(&encode(&instr), line_num)?;
            }

            "LDI" => {
                let ops = self.expect_operands(&operands, 2, &mnemonic, line_num)?;
                let reg = parse_register(ops[0], line_num)?;
                // The immediate lands two bytes past the opcode.
                let offset = self.output.len() + 2;
                let value = self.parse_value(ops[1], line_num, offset)?;
                self.emit(&encode(&Instruction::Ldi { reg, value }), line_num)?;
            }

            _ => {
                return Err(AssemblerError::UnknownMnemonic {
                    line: line_num,
                    mnemonic,
                })
            }
        }

        Ok(())
    }

    fn expect_operands<'a>(
        &self,
        operands: &'a [&'a str],
        count: usize,
        mnemonic: &str,
        line_num: usize,
    ) -> Result<&'a [&'a str], AssemblerError> {
        if operands.len() != count {
            return Err(AssemblerError::SyntaxError {
                line: line_num,
                message: format!(
                    "{} takes {} operand(s), found {}",
                    mnemonic,
                    count,
                    operands.len()
                ),
            });
        }
        Ok(operands)
    }

    /// Parse an immediate: a numeric literal, or a label reference to be
    /// resolved in pass 2 (emitted as a placeholder 0 for now).
    fn parse_value(
        &mut self,
        token: &str,
        line_num: usize,
        patch_offset: usize,
    ) -> Result<u8, AssemblerError> {
        let parsed = if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16).ok()
        } else if let Some(bin) = token.strip_prefix("0b").or_else(|| token.strip_prefix("0B")) {
            i64::from_str_radix(bin, 2).ok()
        } else if token.chars().next().is_some_and(|c| c.is_ascii_digit() || c == '-') {
            token.parse::<i64>().ok()
        } else {
            // A label reference
            self.pending.push((patch_offset, token.to_uppercase(), line_num));
            return Ok(0);
        };

        match parsed {
            Some(value @ 0..=255) => Ok(value as u8),
            Some(value) => Err(AssemblerError::ValueOutOfRange { line: line_num, value }),
            None => Err(AssemblerError::SyntaxError {
                line: line_num,
                message: format!("invalid value {:?}", token),
            }),
        }
    }

    fn current_addr(&self, line_num: usize) -> Result<u8, AssemblerError> {
        u8::try_from(self.output.len()).map_err(|_| AssemblerError::ProgramTooLarge {
            line: line_num,
            capacity: MEMORY_SIZE,
        })
    }

    fn emit(&mut self, bytes: &[u8], line_num: usize) -> Result<(), AssemblerError> {
        if self.output.len() + bytes.len() > MEMORY_SIZE {
            return Err(AssemblerError::ProgramTooLarge {
                line: line_num,
                capacity: MEMORY_SIZE,
            });
        }
        self.output.extend_from_slice(bytes);
        Ok(())
    }

    fn resolve_references(&mut self) -> Result<(), AssemblerError> {
        for (offset, label, line_num) in &self.pending {
            let addr = self.symbols.get(label).ok_or_else(|| AssemblerError::UndefinedLabel {
                line: *line_num,
                label: label.clone(),
            })?;

            self.output[*offset] = *addr;
        }
        Ok(())
    }
}

fn parse_register(token: &str, line_num: usize) -> Result<Reg, AssemblerError> {
    let index = token
        .strip_prefix('R')
        .or_else(|| token.strip_prefix('r'))
        .and_then(|n| n.parse::<u8>().ok());

    index
        .and_then(Reg::new)
        .ok_or_else(|| AssemblerError::SyntaxError {
            line: line_num,
            message: format!("expected a register R0-R7, found {:?}", token),
        })
}

/// Errors that can occur during assembly.
#[derive(Debug, Clone, Error)]
pub enum AssemblerError {
    #[error("syntax error on line {line}: {message}")]
    SyntaxError { line: usize, message: String },

    #[error("unknown mnemonic on line {line}: {mnemonic}")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("undefined label on line {line}: {label}")]
    UndefinedLabel { line: usize, label: String },

    #[error("value out of range on line {line}: {value} (0-255)")]
    ValueOutOfRange { line: usize, value: i64 },

    #[error("program exceeds {capacity} bytes at line {line}")]
    ProgramTooLarge { line: usize, capacity: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::Cpu;

    #[test]
    fn test_assemble_print8() {
        let source = r#"
            # multiply 8 by 9 and print the result
            LDI R0,8
            LDI R1,9
            MUL R0,R1
            PRN R0
            HLT
        "#;

        let image = assemble(source).unwrap();
        assert_eq!(
            image,
            vec![
                0b10000010, 0, 8,
                0b10000010, 1, 9,
                0b10100010, 0, 1,
                0b01000111, 0,
                0b00000001,
            ]
        );
    }

    #[test]
    fn test_assemble_and_run() {
        let source = r#"
            LDI R0,8
            LDI R1,9
            MUL R0,R1
            PRN R0
            HLT
        "#;

        let mut cpu = Cpu::new();
        cpu.load(&assemble(source).unwrap()).unwrap();

        let mut out = Vec::new();
        cpu.run(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "72\n");
    }

    #[test]
    fn test_assemble_forward_label() {
        let source = r#"
            LDI R0,END
            JMP R0
            LDI R1,1   # jumped over
        END:
            HLT
        "#;

        let image = assemble(source).unwrap();
        // END sits after LDI(3) + JMP(2) + LDI(3) = byte 8.
        assert_eq!(image[2], 8);

        let mut cpu = Cpu::new();
        cpu.load(&image).unwrap();
        let mut out = Vec::new();
        cpu.run(&mut out).unwrap();
        assert!(cpu.is_halted());
    }

    #[test]
    fn test_assemble_call_ret_with_labels() {
        let source = r#"
            LDI R0,MUL2
            LDI R1,12
            CALL R0
            PRN R1
            HLT

        MUL2:
            LDI R2,2
            MUL R1,R2
            RET
        "#;

        let mut cpu = Cpu::new();
        cpu.load(&assemble(source).unwrap()).unwrap();

        let mut out = Vec::new();
        cpu.run(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "24\n");
    }

    #[test]
    fn test_assemble_label_on_instruction_line() {
        let source = "LOOP: JMP R0\n";
        let image = assemble(source).unwrap();
        assert_eq!(image, vec![0b01010100, 0]);
    }

    #[test]
    fn test_assemble_dat_literals() {
        let source = "DAT 42\nDAT 0x2A\nDAT 0b00101010\n";
        let image = assemble(source).unwrap();
        assert_eq!(image, vec![42, 42, 42]);
    }

    #[test]
    fn test_unknown_mnemonic() {
        let err = assemble("FROB R0\n").unwrap_err();
        assert!(matches!(err, AssemblerError::UnknownMnemonic { line: 1, .. }));
    }

    #[test]
    fn test_undefined_label() {
        let err = assemble("LDI R0,NOWHERE\nHLT\n").unwrap_err();
        assert!(matches!(err, AssemblerError::UndefinedLabel { line: 1, .. }));
    }

    #[test]
    fn test_value_out_of_range() {
        let err = assemble("LDI R0,256\n").unwrap_err();
        assert!(matches!(err, AssemblerError::ValueOutOfRange { line: 1, value: 256 }));
    }

    #[test]
    fn test_negative_value_out_of_range() {
        let err = assemble("DAT -1\n").unwrap_err();
        assert!(matches!(err, AssemblerError::ValueOutOfRange { line: 1, value: -1 }));
    }

    #[test]
    fn test_bad_register() {
        let err = assemble("PRN R9\n").unwrap_err();
        assert!(matches!(err, AssemblerError::SyntaxError { line: 1, .. }));
    }

    #[test]
    fn test_wrong_operand_count() {
        let err = assemble("ADD R0\n").unwrap_err();
        assert!(matches!(err, AssemblerError::SyntaxError { line: 1, .. }));
    }
}
