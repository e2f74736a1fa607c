/******************************************************************************
 * maXTouch object protocol: memory map, object types, command values and     *
 * timing. Object numbering follows the Tnn names used in Atmel protocol       *
 * guides.                                                                     *
 ******************************************************************************/

// Information block
pub(crate) const INFO_BLOCK_ADDR: u16 = 0x0000;
pub(crate) const INFO_BLOCK_SIZE: usize = 7;
pub(crate) const OBJECT_TABLE_ADDR: u16 = 0x0007;
pub(crate) const OBJECT_ENTRY_SIZE: usize = 6;
pub(crate) const INFO_CRC_SIZE: usize = 3;

/// Most objects a table may hold. Devices report far fewer; anything above
/// this is treated as a corrupt information block.
pub const MAX_OBJECTS: usize = 64;

/// Report ID a message processor returns when its queue is empty.
pub const NO_MESSAGE: u8 = 0xFF;

/// Message record: report ID followed by the object payload.
pub(crate) const MESSAGE_SIZE: usize = 9;
pub(crate) const MESSAGE_PAYLOAD: usize = 8;

/// maXTouch object types this driver knows about.
#[allow(dead_code)]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ObjectType {
  Reserved = 0,
  MessageProcessor = 5,
  CommandProcessor = 6,
  PowerConfig = 7,
  AcquisitionConfig = 8,
  MultiTouchScreen = 9,
  KeyArray = 15,
  SelfTest = 25,
  Diagnostic = 37,
  TouchSuppression = 42,
  SpareObject = 38,
  ExtraTouchData = 57,
  NoiseSuppression = 62,
  MultiTouchScreenT100 = 100,
}

impl From<ObjectType> for u8 {
  fn from(t: ObjectType) -> Self {
    t as u8
  }
}

impl TryFrom<u8> for ObjectType {
  type Error = u8;

  fn try_from(v: u8) -> Result<Self, u8> {
    Ok(match v {
      0 => Self::Reserved,
      5 => Self::MessageProcessor,
      6 => Self::CommandProcessor,
      7 => Self::PowerConfig,
      8 => Self::AcquisitionConfig,
      9 => Self::MultiTouchScreen,
      15 => Self::KeyArray,
      25 => Self::SelfTest,
      37 => Self::Diagnostic,
      38 => Self::SpareObject,
      42 => Self::TouchSuppression,
      57 => Self::ExtraTouchData,
      62 => Self::NoiseSuppression,
      100 => Self::MultiTouchScreenT100,
      other => return Err(other),
    })
  }
}

// T6 command processor register offsets
pub(crate) const COMMAND_RESET: u16 = 0;
pub(crate) const COMMAND_BACKUPNV: u16 = 1;
pub(crate) const COMMAND_CALIBRATE: u16 = 2;
pub(crate) const COMMAND_REPORTALL: u16 = 3;
pub(crate) const COMMAND_DIAGNOSTIC: u16 = 5;

// T6 command values
pub(crate) const RESET_VALUE: u8 = 0x01;
pub(crate) const BOOT_VALUE: u8 = 0xA5;
pub(crate) const BACKUP_VALUE: u8 = 0x55;
pub(crate) const DISABLE_EVENTS_VALUE: u8 = 0x33;

// T9 register offsets
pub(crate) const T9_THRESHOLD: u16 = 7;

// T62 noise suppression
pub(crate) const T62_CTRL: u16 = 0;
pub(crate) const T62_CTRL_REPORT_DISABLE: u8 = 0x02;
pub(crate) const T62_CALCFG: u16 = 1;
pub(crate) const T62_CALCFG_CHARGER: u8 = 0x01;

// T37 diagnostic debug
pub(crate) const T37_MODE: u16 = 0;
pub(crate) const T37_PAGE: u16 = 1;
pub(crate) const T37_DATA: u16 = 2;
pub(crate) const NODES_PER_PAGE: u16 = 64;
pub(crate) const BYTES_PER_NODE: u16 = 2;

// Bootloader
pub(crate) const BOOT_STATUS_MASK: u8 = 0x3F;
pub(crate) const BOOT_EXTENDED_ID: u8 = 0x20;
pub(crate) const BOOT_ID_MASK: u8 = 0x1F;
pub(crate) const UNLOCK_CMD: [u8; 2] = [0xDC, 0xAA];

// Timing (ms)
pub(crate) const BACKUP_TIME_MS: u32 = 25;
pub(crate) const SW_RESET_TIME_MS: u32 = 300;
pub(crate) const HW_RESET_TIME_MS: u32 = 80;
pub(crate) const CHG_POLL_MS: u32 = 50;
pub(crate) const CHG_POLL_LIMIT: u32 = 20;
pub(crate) const FRAME_SETTLE_MS: u32 = 20;
pub(crate) const DIAG_POLL_MS: u32 = 20;
pub(crate) const DIAG_POLL_LIMIT: u32 = 50;
pub(crate) const CRC_CHECK_POLL_LIMIT: u32 = 100;
pub(crate) const CRC_CHECK_POLL_MS: u32 = 10;
pub(crate) const CHARGER_DEBOUNCE_MS: u32 = 200;
