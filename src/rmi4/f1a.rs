//! F1A: 0D capacitive buttons, one bit per button.

use super::defs::*;
use super::pdt::FunctionDescriptor;
use crate::bus::Transport;
use crate::touch::Reporter;
use crate::Rmi4Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct F1a {
  pub function: FunctionDescriptor,
  /// Buttons the device implements.
  pub buttons: u8,
  /// Buttons that have a key code in the board map.
  pub mapped: u8,
}

impl F1a {
  pub(crate) async fn init<T, E>(bus: &mut T, function: FunctionDescriptor, config: &Rmi4Config) -> Result<Self, E>
  where
    T: Transport<Error = E>,
  {
    let mut query = [0u8; 2];
    bus.read(function.query_base, &mut query).await?;
    let buttons = ((query[0] & 0x07) + 1).min(MAX_BUTTONS as u8);
    let mapped = buttons.min(config.buttons.len().min(MAX_BUTTONS) as u8);
    if mapped == 0 {
      warn!("rmi4: F1A has {} buttons but no button map", buttons);
    } else if mapped != buttons {
      warn!("rmi4: F1A has {} buttons, {} mapped", buttons, mapped);
    }
    Ok(Self { function, buttons, mapped })
  }

  /// Bytes in the button bitmask.
  pub(crate) fn data_len(&self) -> usize {
    (self.buttons as usize + 7) / 8
  }
}

/// Button state carried between reports.
///
/// With suppression enabled a button pressed while a 2D contact is down is
/// swallowed, press and release both. A button already held when the 2D
/// contact lands still reports its release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ButtonState {
  current: u16,
  before_2d: u16,
  while_2d: u16,
}

impl ButtonState {
  pub fn is_pressed(&self, button: usize) -> bool {
    button < MAX_BUTTONS && self.current & (1 << button) != 0
  }

  /// Decode a button bitmask. Returns the number of key events sent.
  pub(crate) fn decode<R: Reporter + ?Sized>(
    &mut self,
    f1a: &F1a,
    data: &[u8],
    fingers_on_2d: bool,
    config: &Rmi4Config,
    reporter: &mut R,
  ) -> usize {
    let mut sent = 0;
    for button in 0..f1a.mapped as usize {
      let bit = 1u16 << button;
      let pressed = data.get(button / 8).is_some_and(|b| b & (1 << (button % 8)) != 0);
      if (self.current & bit != 0) == pressed {
        continue;
      }
      self.current ^= bit;
      let code = config.buttons[button];
      debug!("rmi4: button {} (code {}) -> {}", button, code, pressed);

      if config.buttons_during_touch {
        reporter.key(code, pressed);
        sent += 1;
        continue;
      }

      if !fingers_on_2d {
        if pressed {
          self.before_2d |= bit;
        } else if self.while_2d & bit != 0 {
          self.while_2d &= !bit;
          continue;
        } else {
          self.before_2d &= !bit;
        }
        reporter.key(code, pressed);
        sent += 1;
      } else if self.before_2d & bit != 0 {
        self.before_2d &= !bit;
        reporter.key(code, pressed);
        sent += 1;
      } else if pressed {
        self.while_2d |= bit;
      } else {
        self.while_2d &= !bit;
      }
    }
    sent
  }

  /// Send a release for every held button and forget all state.
  pub(crate) fn release_all<R: Reporter + ?Sized>(&mut self, config: &Rmi4Config, reporter: &mut R) -> usize {
    let mut sent = 0;
    for (button, code) in config.buttons.iter().enumerate().take(MAX_BUTTONS) {
      if self.current & (1 << button) != 0 {
        reporter.key(*code, false);
        sent += 1;
      }
    }
    *self = Self::default();
    sent
  }
}
