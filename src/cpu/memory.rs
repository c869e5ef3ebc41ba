//! LS-8 memory subsystem.
//!
//! The LS-8 has 256 bytes of memory holding code and stack in the same
//! address space (von Neumann model). Addresses are a full `u8`, so every
//! address a program can name refers to a valid cell.

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// The number of memory cells in the LS-8.
pub const MEMORY_SIZE: usize = 256;

/// Address the stack grows down from. SP is reset to this value.
pub const STACK_TOP: u8 = 0xF4;

/// Conventional pending-keypress cell. The emulated instruction subset has
/// no interrupt source, so nothing ever writes it.
pub const KEY_PRESSED: u8 = 0xF4;

/// LS-8 memory: 256 byte cells.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    cells: Vec<u8>,
}

impl Memory {
    /// Create a new memory with all cells zeroed.
    pub fn new() -> Self {
        Self {
            cells: vec![0; MEMORY_SIZE],
        }
    }

    /// Read a cell. The `u8` address makes every read in range.
    #[inline]
    pub fn read(&self, addr: u8) -> u8 {
        self.cells[addr as usize]
    }

    /// Write a cell.
    #[inline]
    pub fn write(&mut self, addr: u8, value: u8) {
        self.cells[addr as usize] = value;
    }

    /// Clear all memory to zeros.
    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            *cell = 0;
        }
    }

    /// Load a program image at consecutive addresses starting at 0.
    ///
    /// The image bytes are not validated as instructions; bad opcodes are
    /// caught when the CPU fetches them.
    pub fn load(&mut self, image: &[u8]) -> Result<(), MemoryError> {
        if image.len() > MEMORY_SIZE {
            return Err(MemoryError::ImageTooLarge {
                size: image.len(),
                capacity: MEMORY_SIZE,
            });
        }

        self.cells[..image.len()].copy_from_slice(image);
        Ok(())
    }

    /// Dump a memory range (for debugging).
    pub fn dump(&self, start: u8, count: usize) -> Vec<(u8, u8)> {
        let end = (start as usize + count).min(MEMORY_SIZE);
        (start as usize..end)
            .map(|i| (i as u8, self.cells[i]))
            .collect()
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Only count non-zero cells
        let non_zero = self.cells.iter().filter(|&&cell| cell != 0).count();

        f.debug_struct("Memory")
            .field("non_zero_cells", &non_zero)
            .field("total_cells", &MEMORY_SIZE)
            .finish()
    }
}

/// Errors that can occur during memory operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// Program image does not fit in memory.
    #[error("program image of {size} bytes exceeds memory capacity {capacity}")]
    ImageTooLarge { size: usize, capacity: usize },
}
