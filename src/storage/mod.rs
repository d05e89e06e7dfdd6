//! Byte-addressable non-volatile storage interface.
//!
//! Every structure in this crate talks to the medium through
//! [`NonVolatileStore`]. Writes are synchronous: when a write method returns the
//! bytes are committed. The layers above never hold the store; it is passed in
//! on every call so the application owns exactly one instance.

use core::fmt::Write;

use log::info;

pub mod mem;

pub use mem::MemStore;

/// Offset into the store's address space, `[0, mem_size)`
pub type Address = u16;

/// Physical reset state of an EEPROM cell.
///
/// Doubles as the "never written" and "placeholder" sentinel throughout the
/// crate. Real data colliding with an all-`0xFF` record is treated as erased.
pub const ERASED_BYTE: u8 = 0xFF;

/// Bytes shown per line by [`NonVolatileStore::dump`] at most
const DUMP_MAX_LINE: u16 = 32;

/// Byte-addressable non-volatile memory such as an MCU's internal EEPROM.
///
/// Implementors provide the byte primitives and size queries; the wider
/// accessors default to little-endian compositions of byte accesses and can be
/// overridden when the hardware has faster paths.
pub trait NonVolatileStore {
    /// Read one byte
    fn read_byte(&self, addr: Address) -> u8;

    /// Write one byte, blocking until it is committed
    fn write_byte(&mut self, addr: Address, value: u8);

    /// Total size of the store in bytes
    fn mem_size(&self) -> u16;

    /// Largest unit the medium commits in one physical write
    fn page_size(&self) -> u16;

    /// Read a little-endian `u16`
    fn read_word(&self, addr: Address) -> u16 {
        let mut bytes = [0u8; 2];
        self.read_block(addr, &mut bytes);
        u16::from_le_bytes(bytes)
    }

    /// Write a little-endian `u16`
    fn write_word(&mut self, addr: Address, value: u16) {
        self.write_block(addr, &value.to_le_bytes());
    }

    /// Read a little-endian `u32`
    fn read_long(&self, addr: Address) -> u32 {
        let mut bytes = [0u8; 4];
        self.read_block(addr, &mut bytes);
        u32::from_le_bytes(bytes)
    }

    /// Write a little-endian `u32`
    fn write_long(&mut self, addr: Address, value: u32) {
        self.write_block(addr, &value.to_le_bytes());
    }

    /// Fill `buf` with the bytes starting at `addr`
    fn read_block(&self, addr: Address, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read_byte(addr.wrapping_add(i as u16));
        }
    }

    /// Write `data` starting at `addr`
    fn write_block(&mut self, addr: Address, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            self.write_byte(addr.wrapping_add(i as u16), byte);
        }
    }

    /// Log the store contents as hex, one line per page.
    ///
    /// The range is widened to page boundaries, so a few bytes before `start`
    /// and after the requested length may be shown. `len` of `None` dumps
    /// everything from `start` to the end of the store.
    fn dump(&self, start: Address, len: Option<u16>) {
        let mem_size = self.mem_size() as u32;
        let line = self.page_size().clamp(1, DUMP_MAX_LINE) as u32;

        let end = match len {
            Some(len) => (start as u32 + len as u32).min(mem_size),
            None => mem_size,
        };
        let mut addr = start as u32 - start as u32 % line;

        while addr < end {
            let mut text: heapless::String<128> = heapless::String::new();
            let _ = write!(text, "0x{:04X}:", addr);
            for offset in 0..line {
                let a = addr + offset;
                if a >= mem_size {
                    break;
                }
                let _ = write!(text, " {:02X}", self.read_byte(a as Address));
            }
            info!("{}", text);
            addr += line;
        }
    }
}
