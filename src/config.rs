use crate::bus::MxtAddress;

/// A discrete touch key decoded from the key-array object.
///
/// `mask` selects the key's bit in the key status byte. A non-zero `guard`
/// names a neighbouring dummy region: while that region is held without the
/// key itself, the key's next transition is suppressed. This filters palm and
/// edge grabs that brush the key on their way across.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchKey {
  pub mask: u8,
  pub code: u16,
  pub guard: u8,
}

impl TouchKey {
  pub const fn new(mask: u8, code: u16) -> Self {
    Self { mask, code, guard: 0 }
  }

  pub const fn with_guard(mut self, guard: u8) -> Self {
    self.guard = guard;
    self
  }
}

/// Register image for one object, written when the firmware container does
/// not carry a config blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BoardObject {
  pub object_type: u8,
  pub data: &'static [u8],
}

impl BoardObject {
  pub const fn new(object_type: u8, data: &'static [u8]) -> Self {
    Self { object_type, data }
  }
}

/// Board description for a maXTouch controller.
///
/// ```no_run
/// use mxt_rmi::{Config, TouchKey};
///
/// static KEYS: [TouchKey; 2] = [TouchKey::new(0x01, 139), TouchKey::new(0x02, 158)];
/// let config = Config::default().with_axes(719, 1279).with_keys(&KEYS);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
  /// Advertised X range maximum. Below 1024 reported coordinates are divided by four.
  pub max_x: u16,
  pub max_y: u16,
  pub keys: &'static [TouchKey],
  pub board_objects: &'static [BoardObject],
  pub address: MxtAddress,
}

impl Config {
  pub const fn new(max_x: u16, max_y: u16) -> Self {
    Self { max_x, max_y, keys: &[], board_objects: &[], address: MxtAddress::for_app(0x4A) }
  }

  pub const fn with_axes(mut self, max_x: u16, max_y: u16) -> Self {
    self.max_x = max_x;
    self.max_y = max_y;
    self
  }

  pub const fn with_keys(mut self, keys: &'static [TouchKey]) -> Self {
    self.keys = keys;
    self
  }

  pub const fn with_board_objects(mut self, objects: &'static [BoardObject]) -> Self {
    self.board_objects = objects;
    self
  }

  pub const fn with_address(mut self, address: MxtAddress) -> Self {
    self.address = address;
    self
  }
}

impl Default for Config {
  fn default() -> Self {
    Self::new(4095, 4095)
  }
}

/// Board description for a Synaptics RMI4 controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Rmi4Config {
  pub address: u8,
  pub x_flip: bool,
  pub y_flip: bool,
  /// Key codes for the F1A buttons, by button index.
  pub buttons: &'static [u16],
  /// Report buttons pressed while a 2D contact is down.
  pub buttons_during_touch: bool,
}

impl Rmi4Config {
  pub const fn new(address: u8) -> Self {
    Self { address, x_flip: false, y_flip: false, buttons: &[], buttons_during_touch: false }
  }

  pub const fn with_flip(mut self, x: bool, y: bool) -> Self {
    self.x_flip = x;
    self.y_flip = y;
    self
  }

  pub const fn with_buttons(mut self, buttons: &'static [u16]) -> Self {
    self.buttons = buttons;
    self
  }

  pub const fn with_buttons_during_touch(mut self, report: bool) -> Self {
    self.buttons_during_touch = report;
    self
  }
}

impl Default for Rmi4Config {
  fn default() -> Self {
    Self::new(0x20)
  }
}
