//! # CRC-16/MCRF4XX Implementation
//!
//! The X.25 checksum MAVLink appends to every frame.
//!
//! **Polynomial**: 0x1021 (reflected: 0x8408)
//! **Initial Value**: 0xFFFF
//!
//! The checksum covers every byte after the start marker up to the end of
//! the payload, followed by the message's CRC_EXTRA seed byte.

/// Reflected CRC-16-CCITT polynomial
const CRC16_POLY_REFLECTED: u16 = 0x8408;

/// Initial accumulator value
pub const CRC16_INIT: u16 = 0xFFFF;

/// Precomputed lookup table for fast calculation
const CRC16_TABLE: [u16; 256] = generate_crc16_table();

/// Generate CRC16 lookup table at compile time
const fn generate_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u16;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ CRC16_POLY_REFLECTED;
            } else {
                crc >>= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Running X.25 checksum
///
/// # Examples
///
/// ```
/// use mav_proxy::mavlink::crc::X25;
///
/// let mut crc = X25::new();
/// crc.update(b"123456789");
/// assert_eq!(crc.value(), 0x6F91);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct X25(u16);

impl Default for X25 {
    fn default() -> Self {
        Self::new()
    }
}

impl X25 {
    /// Starts a fresh checksum
    pub const fn new() -> Self {
        Self(CRC16_INIT)
    }

    /// Feeds a single byte
    pub fn accumulate(&mut self, byte: u8) {
        let index = ((self.0 ^ byte as u16) & 0xFF) as usize;
        self.0 = (self.0 >> 8) ^ CRC16_TABLE[index];
    }

    /// Feeds a byte slice
    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.accumulate(byte);
        }
    }

    /// Current checksum value
    pub fn value(&self) -> u16 {
        self.0
    }
}

/// Checksum a MAVLink frame body (header after STX + payload) with its seed
///
/// # Arguments
///
/// * `body` - Frame bytes between the start marker and the checksum
/// * `crc_extra` - Per-message seed byte
///
/// # Returns
///
/// * `u16` - Checksum as it appears (little-endian) on the wire
pub fn frame_crc(body: &[u8], crc_extra: u8) -> u16 {
    let mut crc = X25::new();
    crc.update(body);
    crc.accumulate(crc_extra);
    crc.value()
}

/// Bitwise implementation, used to cross-check the lookup table
#[allow(dead_code)]
fn x25_slow(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;

    for &byte in data {
        let mut tmp = byte ^ (crc & 0xFF) as u8;
        tmp ^= tmp << 4;
        let tmp = tmp as u16;
        crc = (crc >> 8) ^ (tmp << 8) ^ (tmp << 3) ^ (tmp >> 4);
    }

    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_empty_is_init() {
        assert_eq!(X25::new().value(), 0xFFFF);
    }

    #[test]
    fn test_crc_check_value() {
        // Standard CRC-16/MCRF4XX check value
        let mut crc = X25::new();
        crc.update(b"123456789");
        assert_eq!(crc.value(), 0x6F91);
        assert_eq!(x25_slow(b"123456789"), 0x6F91);
    }

    #[test]
    fn test_lookup_table_matches_slow() {
        let test_data = [
            vec![0x09, 0x00, 0x01, 0x01, 0x00],
            vec![0xFF, 0xFE, 0xFD],
            vec![0x00; 24],
            vec![0xFF; 10],
        ];

        for data in test_data.iter() {
            let mut crc = X25::new();
            crc.update(data);
            assert_eq!(crc.value(), x25_slow(data), "CRC mismatch for data: {:?}", data);
        }
    }

    #[test]
    fn test_crc_extra_changes_result() {
        let body = [0x09, 0x00, 0xFF, 0x00, 0x00];
        assert_ne!(frame_crc(&body, 50), frame_crc(&body, 51));
    }
}
