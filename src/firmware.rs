//! maXTouch firmware container.
//!
//! A container starts with a little-endian magic word followed by a packed
//! header, then the config blob and the raw bootloader frames:
//!
//! ```text
//! offset  size  field
//!      0     4  magic (0x4D3C2B1A)
//!      4     1  firmware version
//!      5     1  firmware build
//!      6     4  header length (22)
//!     10     4  config length
//!     14     4  firmware length
//!     18     4  config CRC (24 significant bits)
//!     22     …  config bytes, then firmware bytes
//! ```
//!
//! A file without the magic is treated as raw firmware with no config.

use crate::ValidationError;

pub const MAGIC: u32 = 0x4D3C_2B1A;
pub const HEADER_LEN: usize = 22;

/// Parsed view over a firmware file. Borrows the file for the duration of
/// the flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareImage<'a> {
  pub fw_version: u8,
  pub build_version: u8,
  pub header_len: u32,
  pub config_len: u32,
  pub firmware_len: u32,
  /// Config checksum, masked to 24 bits.
  pub config_crc: u32,
  pub config: &'a [u8],
  pub firmware: &'a [u8],
}

impl<'a> FirmwareImage<'a> {
  pub fn parse(bytes: &'a [u8]) -> Result<Self, ValidationError> {
    let magic = match bytes.get(..4) {
      Some(m) => u32::from_le_bytes([m[0], m[1], m[2], m[3]]),
      None => 0,
    };
    if magic != MAGIC {
      return Self::raw(bytes);
    }
    if bytes.len() < HEADER_LEN {
      return Err(ValidationError::HeaderTruncated);
    }

    let le32 = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    let header_len = le32(6);
    let config_len = le32(10);
    let firmware_len = le32(14);
    let config_crc = le32(18) & 0x00FF_FFFF;

    if header_len as usize != HEADER_LEN {
      return Err(ValidationError::HeaderLength(header_len));
    }
    let declared = header_len as u64 + config_len as u64 + firmware_len as u64;
    if declared != bytes.len() as u64 {
      return Err(ValidationError::SizeMismatch { declared: declared.min(u32::MAX as u64) as u32, actual: bytes.len() as u32 });
    }
    if config_len == 0 {
      return Err(ValidationError::MissingConfig);
    }
    if firmware_len == 0 {
      return Err(ValidationError::MissingFirmware);
    }

    let (config, firmware) = bytes[HEADER_LEN..].split_at(config_len as usize);
    Ok(Self {
      fw_version: bytes[4],
      build_version: bytes[5],
      header_len,
      config_len,
      firmware_len,
      config_crc,
      config,
      firmware,
    })
  }

  /// Headerless image: everything is firmware, version unknown.
  pub fn raw(bytes: &'a [u8]) -> Result<Self, ValidationError> {
    if bytes.is_empty() {
      return Err(ValidationError::MissingFirmware);
    }
    Ok(Self {
      fw_version: 0,
      build_version: 0,
      header_len: 0,
      config_len: 0,
      firmware_len: bytes.len() as u32,
      config_crc: 0,
      config: &[],
      firmware: bytes,
    })
  }

  pub fn has_header(&self) -> bool {
    self.header_len != 0
  }

  /// `true` when the image was built for the given firmware version/build.
  pub fn matches(&self, version: u8, build: u8) -> bool {
    self.fw_version == version && self.build_version == build
  }
}
