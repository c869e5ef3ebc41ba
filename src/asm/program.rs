//! The `.ls8` program file format.
//!
//! `.ls8` files are machine code as text:
//! - one byte per line, written as a binary literal
//! - `#` starts a comment that runs to the end of the line
//! - blank lines are ignored
//!
//! ```text
//! # print8.ls8: multiply 8 by 9 and print the result
//! 10000010 # LDI R0,8
//! 00000000
//! 00001000
//! 00000001 # HLT
//! ```

use std::path::Path;
use std::io::Write;
use thiserror::Error;

/// A loaded `.ls8` program.
#[derive(Debug, Clone)]
pub struct ProgramFile {
    /// The byte image, placed at consecutive addresses from 0.
    pub bytes: Vec<u8>,
    /// Original source lines (for diagnostics), one per byte.
    pub source_lines: Vec<String>,
}

impl ProgramFile {
    /// Create a new empty program.
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            source_lines: Vec::new(),
        }
    }

    /// Parse program text.
    pub fn parse(source: &str) -> Result<ProgramFile, ProgramError> {
        let mut program = ProgramFile::new();

        for (line_num, line) in source.lines().enumerate() {
            // Strip the comment suffix, if any
            let code = match line.split_once('#') {
                Some((before, _)) => before.trim(),
                None => line.trim(),
            };

            if code.is_empty() {
                continue;
            }

            let byte = match u8::from_str_radix(code, 2) {
                Ok(byte) if code.len() <= 8 => byte,
                _ => {
                    return Err(ProgramError::ParseError {
                        line: line_num + 1,
                        message: format!("expected an 8-bit binary literal, found {:?}", code),
                    })
                }
            };

            program.push(byte, line.trim());
        }

        Ok(program)
    }

    /// Add a byte.
    pub fn push(&mut self, byte: u8, source: &str) {
        self.bytes.push(byte);
        self.source_lines.push(source.to_string());
    }

    /// Get the image size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Default for ProgramFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Load a `.ls8` file from disk.
pub fn load_program<P: AsRef<Path>>(path: P) -> Result<ProgramFile, ProgramError> {
    let source = std::fs::read_to_string(path.as_ref())
        .map_err(|e| ProgramError::IoError(e.to_string()))?;

    ProgramFile::parse(&source)
}

/// Save a `.ls8` file to disk.
pub fn save_program<P: AsRef<Path>>(path: P, program: &ProgramFile) -> Result<(), ProgramError> {
    let mut file = std::fs::File::create(path.as_ref())
        .map_err(|e| ProgramError::IoError(e.to_string()))?;

    writeln!(file, "# LS-8 program image")
        .map_err(|e| ProgramError::IoError(e.to_string()))?;
    writeln!(file, "# {} bytes", program.len())
        .map_err(|e| ProgramError::IoError(e.to_string()))?;
    writeln!(file).map_err(|e| ProgramError::IoError(e.to_string()))?;

    for (addr, byte) in program.bytes.iter().enumerate() {
        writeln!(file, "{:08b} # {:#04x}", byte, addr)
            .map_err(|e| ProgramError::IoError(e.to_string()))?;
    }

    Ok(())
}

/// Save a raw byte image directly as a `.ls8` file.
pub fn save_bytes<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<(), ProgramError> {
    let program = ProgramFile {
        bytes: bytes.to_vec(),
        source_lines: bytes.iter().map(|b| format!("{:08b}", b)).collect(),
    };
    save_program(path, &program)
}

/// Errors that can occur loading or saving programs.
#[derive(Debug, Clone, Error)]
pub enum ProgramError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("parse error on line {line}: {message}")]
    ParseError { line: usize, message: String },
}
