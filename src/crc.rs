//! CRC16 CCITT used to detect corrupted records.
//!
//! Polynomial `0x1021`, initial value `0xFFFF`, MSB first, no final XOR.

/// Initial CRC register value
pub const CRC16_INIT: u16 = 0xFFFF;

const POLY: u16 = 0x1021;

/// Feed a single byte into the CRC register
#[inline]
pub fn crc16_update(crc: u16, byte: u8) -> u16 {
    let mut crc = crc ^ ((byte as u16) << 8);
    for _ in 0..8 {
        crc = if crc & 0x8000 != 0 {
            (crc << 1) ^ POLY
        } else {
            crc << 1
        };
    }
    crc
}

/// CRC16 of a byte slice
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(CRC16_INIT, |crc, &b| crc16_update(crc, b))
}
