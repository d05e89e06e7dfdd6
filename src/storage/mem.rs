//! RAM-backed store.
//!
//! Stands in for the EEPROM in tests and host tools. On top of plain storage it
//! keeps per-address write counters to check wear leveling, and can simulate a
//! power cut by silently discarding writes after a budget of byte writes.

use alloc::vec;
use alloc::vec::Vec;

use log::error;

use super::{Address, ERASED_BYTE, NonVolatileStore};

/// In-memory [`NonVolatileStore`], erased (`0xFF`) on creation
#[derive(Debug, Clone)]
pub struct MemStore {
    cells: Vec<u8>,
    write_counts: Vec<u32>,
    page_size: u16,
    /// Byte writes still allowed before the simulated power loss
    writes_left: Option<usize>,
    dropped: usize,
}

impl MemStore {
    /// Create an erased store of `size` bytes
    pub fn new(size: u16, page_size: u16) -> Self {
        Self {
            cells: vec![ERASED_BYTE; size as usize],
            write_counts: vec![0; size as usize],
            page_size,
            writes_left: None,
            dropped: 0,
        }
    }

    /// Create a store from an existing memory image.
    ///
    /// Images longer than the 16-bit address space are truncated.
    pub fn from_image(image: &[u8], page_size: u16) -> Self {
        let len = image.len().min(u16::MAX as usize);
        Self {
            cells: image[..len].to_vec(),
            write_counts: vec![0; len],
            page_size,
            writes_left: None,
            dropped: 0,
        }
    }

    /// Raw contents of the store
    pub fn image(&self) -> &[u8] {
        &self.cells
    }

    /// Number of committed writes to `addr`
    pub fn write_count(&self, addr: Address) -> u32 {
        self.write_counts.get(addr as usize).copied().unwrap_or(0)
    }

    /// Highest write count over `len` bytes starting at `start`
    pub fn max_write_count(&self, start: Address, len: u16) -> u32 {
        let start = start as usize;
        let end = (start + len as usize).min(self.write_counts.len());
        self.write_counts[start.min(end)..end]
            .iter()
            .copied()
            .max()
            .unwrap_or(0)
    }

    /// Commit only the next `byte_writes` writes, then drop everything else.
    ///
    /// Models power being lost partway through a sequence of operations.
    pub fn cut_power_after(&mut self, byte_writes: usize) {
        self.writes_left = Some(byte_writes);
    }

    /// Resume committing writes
    pub fn restore_power(&mut self) {
        self.writes_left = None;
    }

    /// Number of writes discarded while the power was cut
    pub fn dropped_writes(&self) -> usize {
        self.dropped
    }

    /// Overwrite a byte without wear accounting or power simulation.
    ///
    /// Used to inject corruption.
    pub fn poke(&mut self, addr: Address, value: u8) {
        if let Some(cell) = self.cells.get_mut(addr as usize) {
            *cell = value;
        }
    }

    /// Reset every byte to the erased pattern and clear the wear counters
    pub fn erase(&mut self) {
        self.cells.fill(ERASED_BYTE);
        self.write_counts.fill(0);
    }
}

impl NonVolatileStore for MemStore {
    fn read_byte(&self, addr: Address) -> u8 {
        self.cells.get(addr as usize).copied().unwrap_or(ERASED_BYTE)
    }

    fn write_byte(&mut self, addr: Address, value: u8) {
        if let Some(left) = self.writes_left.as_mut() {
            if *left == 0 {
                self.dropped += 1;
                return;
            }
            *left -= 1;
        }

        match self.cells.get_mut(addr as usize) {
            Some(cell) => {
                *cell = value;
                self.write_counts[addr as usize] += 1;
            }
            None => error!("Write past end of store at 0x{:04X}", addr),
        }
    }

    fn mem_size(&self) -> u16 {
        self.cells.len() as u16
    }

    fn page_size(&self) -> u16 {
        self.page_size
    }
}
