/******************************************************************************
 * RMI4 register map: page description table layout, function numbers, F01   *
 * device control values and per-function register geometry. Addresses are    *
 * 16 bits, page in the high byte.                                             *
 ******************************************************************************/

// Page description table
pub(crate) const PDT_START: u8 = 0xE9;
pub(crate) const PDT_END: u8 = 0x0A;
pub(crate) const PDT_ENTRY_SIZE: u8 = 6;

/// Pages searched for function descriptors.
pub const PAGES_TO_SERVICE: u8 = 10;

/// Interrupt status and enable registers in F01. Four registers give 32
/// interrupt sources.
pub const MAX_INTR_REGISTERS: usize = 4;

/// Most functions a table may hold.
pub const MAX_FUNCTIONS: usize = 32;

/// RMI4 function numbers this driver knows about.
#[allow(dead_code)]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Function {
  DeviceControl = 0x01,
  Sensor2d = 0x11,
  Sensor2dObjects = 0x12,
  Buttons = 0x1A,
  Flash = 0x34,
  Analog = 0x54,
}

impl From<Function> for u8 {
  fn from(f: Function) -> Self {
    f as u8
  }
}

impl TryFrom<u8> for Function {
  type Error = u8;

  fn try_from(v: u8) -> Result<Self, u8> {
    Ok(match v {
      0x01 => Self::DeviceControl,
      0x11 => Self::Sensor2d,
      0x12 => Self::Sensor2dObjects,
      0x1A => Self::Buttons,
      0x34 => Self::Flash,
      0x54 => Self::Analog,
      other => return Err(other),
    })
  }
}

// F01 device control
pub(crate) const F01_QUERY_LEN: usize = 21;
pub(crate) const F01_PRODUCT_ID: usize = 11;
pub(crate) const F01_PRODUCT_ID_LEN: usize = 10;
pub(crate) const F01_BUILD_ID: usize = 18;
pub(crate) const F01_RESET_COMMAND: u8 = 0x01;
pub(crate) const STATUS_CRC_IN_PROGRESS: u8 = 0x06;
pub(crate) const SLEEP_MODE_NORMAL: u8 = 0x00;
pub(crate) const SLEEP_MODE_SENSOR_SLEEP: u8 = 0x01;
pub(crate) const MANUFACTURER_SYNAPTICS: u8 = 1;

// F11 2D sensor
pub(crate) const F11_QUERY_LEN: usize = 9;
pub(crate) const F11_CTRL_LEN: usize = 10;
pub(crate) const F11_MAX_BLOCK: usize = 5;

// F12 2D sensor, object reporting
pub(crate) const F12_FINGERS: u8 = 10;
pub(crate) const F12_FINGER_SIZE: usize = 8;
pub(crate) const F12_INVALID_COORD: u16 = 0xFFFF;
pub(crate) const F12_CTRL8_LEN: usize = 14;
pub(crate) const F12_QUERY5_LEN: usize = 5;
pub(crate) const F12_QUERY8_MAX: usize = 3;
pub(crate) const F12_REPORT_ENABLES: u8 = 0xFF;

// F12 object types
pub(crate) const OBJECT_NONE: u8 = 0x00;
pub(crate) const OBJECT_PALM: u8 = 0x03;
pub(crate) const OBJECT_GLOVE: u8 = 0x06;

// F1A 0D buttons
pub(crate) const MAX_BUTTONS: usize = 16;

// Timing (ms)
pub(crate) const HW_RESET_TIME_MS: u32 = 100;
pub(crate) const CHECK_STATUS_TIMEOUT_MS: u32 = 200;
pub(crate) const CHECK_STATUS_POLL_MS: u32 = 20;
