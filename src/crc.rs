//! CRC-24 used by maXTouch parts for the information block and config
//! checksums.
//!
//! Bytes are folded two at a time as a little-endian word. An odd trailing
//! byte is paired with a zero pad. Only the low 24 bits of the result are
//! significant.

/// Generator polynomial.
pub const CRC24_POLY: u32 = 0x0080_001B;

const CARRY: u32 = 0x0100_0000;
const MASK: u32 = 0x00FF_FFFF;

/// Fold one byte pair into the running CRC.
#[inline]
pub const fn crc24_step(crc: u32, lo: u8, hi: u8) -> u32 {
  let word = ((hi as u32) << 8) | lo as u32;
  let res = (crc << 1) ^ word;
  if res & CARRY != 0 {
    res ^ CRC24_POLY
  } else {
    res
  }
}

/// CRC-24 of `bytes`.
pub fn crc24(bytes: &[u8]) -> u32 {
  let mut crc = 0;
  let mut pairs = bytes.chunks_exact(2);
  for pair in &mut pairs {
    crc = crc24_step(crc, pair[0], pair[1]);
  }
  if let [last] = pairs.remainder() {
    crc = crc24_step(crc, *last, 0);
  }
  crc & MASK
}

/// Assemble a 24-bit value from three little-endian bytes.
pub const fn le24(b: [u8; 3]) -> u32 {
  b[0] as u32 | (b[1] as u32) << 8 | (b[2] as u32) << 16
}
