//! Disassembler for LS-8 program images.
//!
//! Converts byte images back to readable assembly.

use crate::cpu::decode::{decode, Instruction};

/// Disassemble a single decoded instruction to text.
pub fn disassemble_instruction(instr: &Instruction) -> String {
    match instr {
        // Control flow
        Instruction::Hlt => "HLT".to_string(),
        Instruction::Ret => "RET".to_string(),
        Instruction::Call { reg } => format!("CALL {}", reg),
        Instruction::Jmp { reg } => format!("JMP {}", reg),
        Instruction::Jeq { reg } => format!("JEQ {}", reg),
        Instruction::Jne { reg } => format!("JNE {}", reg),

        // Data transfer
        Instruction::Ldi { reg, value } => format!("LDI {},{}", reg, value),
        Instruction::Push { reg } => format!("PUSH {}", reg),
        Instruction::Pop { reg } => format!("POP {}", reg),
        Instruction::Prn { reg } => format!("PRN {}", reg),

        // ALU
        Instruction::Add { dst, src } => format!("ADD {},{}", dst, src),
        Instruction::Mul { dst, src } => format!("MUL {},{}", dst, src),
        Instruction::Cmp { a, b } => format!("CMP {},{}", a, b),
    }
}

/// Disassemble a byte image to a listing.
///
/// Bytes that do not decode as an instruction come out as `DAT` lines, so
/// images that mix code and data still produce a listing the assembler
/// accepts and turns back into the same bytes.
pub fn disassemble(bytes: &[u8]) -> String {
    let mut output = String::new();
    output.push_str("# LS-8 disassembly\n\n");

    let mut addr = 0usize;
    while addr < bytes.len() {
        let opcode = bytes[addr];
        let operand_a = bytes.get(addr + 1).copied().unwrap_or(0);
        let operand_b = bytes.get(addr + 2).copied().unwrap_or(0);

        match decode(opcode, operand_a, operand_b) {
            // A decodable opcode whose operands run past the image end is
            // data, not a truncated instruction.
            Ok(instr) if addr + instr.width() as usize <= bytes.len() => {
                let text = disassemble_instruction(&instr);
                output.push_str(&format!("{:<16}# {:#04x}\n", text, addr));
                addr += instr.width() as usize;
            }
            _ => {
                let text = format!("DAT 0b{:08b}", opcode);
                output.push_str(&format!("{:<16}# {:#04x}\n", text, addr));
                addr += 1;
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assemble;
    use crate::cpu::decode::Opcode;
    use crate::cpu::registers::Reg;

    #[test]
    fn test_disassemble_ldi() {
        let instr = Instruction::Ldi { reg: Reg::new(0).unwrap(), value: 8 };
        assert_eq!(disassemble_instruction(&instr), "LDI R0,8");
    }

    #[test]
    fn test_disassemble_print8_image() {
        let image = [
            Opcode::LDI, 0, 8,
            Opcode::LDI, 1, 9,
            Opcode::MUL, 0, 1,
            Opcode::PRN, 0,
            Opcode::HLT,
        ];
        let listing = disassemble(&image);

        assert!(listing.contains("LDI R0,8"));
        assert!(listing.contains("LDI R1,9"));
        assert!(listing.contains("MUL R0,R1"));
        assert!(listing.contains("PRN R0"));
        assert!(listing.contains("HLT"));
    }

    #[test]
    fn test_disassemble_unknown_byte_as_data() {
        let listing = disassemble(&[0xFF, Opcode::HLT]);

        assert!(listing.contains("DAT 0b11111111"));
        assert!(listing.contains("HLT"));
    }

    #[test]
    fn test_listing_reassembles_to_same_bytes() {
        let image = vec![
            Opcode::LDI, 0, 8,
            Opcode::PRN, 0,
            Opcode::HLT,
            0xFF, // trailing data byte
        ];

        let listing = disassemble(&image);
        assert_eq!(assemble(&listing).unwrap(), image);
    }

    #[test]
    fn test_truncated_instruction_is_data() {
        // An LDI opcode as the last byte cannot be a 3-byte instruction.
        let listing = disassemble(&[Opcode::HLT, Opcode::LDI]);

        assert!(listing.contains("HLT"));
        assert!(listing.contains("DAT 0b10000010"));
    }
}
