//! Fixed-size records stored by the persistence layers.
//!
//! A record is any type with a constant serialized size. The layers never look
//! inside a record; they only move `SIZE` bytes around and checksum them.

use crate::storage::ERASED_BYTE;

/// Largest record the structures can move, in bytes.
///
/// I/O goes through stack buffers of this size so the hot path stays free of
/// allocation.
pub const MAX_RECORD_SIZE: usize = 128;

/// Fixed-size, byte-serializable value
pub trait Record: Sized {
    /// Serialized size in bytes; must not change between builds that share a store
    const SIZE: usize;

    /// Serialize into `buf`, which is exactly `SIZE` bytes long
    fn encode(&self, buf: &mut [u8]);

    /// Deserialize from `buf`, which is exactly `SIZE` bytes long
    fn decode(buf: &[u8]) -> Self;
}

/// True when every byte is in the erased state
pub fn is_erased(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == ERASED_BYTE)
}

macro_rules! impl_record_for_primitive {
    ($($ty:ty),*) => {
        $(
            impl Record for $ty {
                const SIZE: usize = core::mem::size_of::<$ty>();

                fn encode(&self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_le_bytes());
                }

                fn decode(buf: &[u8]) -> Self {
                    let mut bytes = [0u8; core::mem::size_of::<$ty>()];
                    bytes.copy_from_slice(buf);
                    <$ty>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_record_for_primitive!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl<const N: usize> Record for [u8; N] {
    const SIZE: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(self);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(buf);
        bytes
    }
}
