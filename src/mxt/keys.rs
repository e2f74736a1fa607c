use super::Mxt;
use crate::touch::Reporter;

/// T15 message: any key detected.
const KEY_DETECT: u8 = 0x80;

/// Touch key state carried between T15 messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyState {
  /// Key bits from the last message.
  pub status: u8,
  /// Keys whose transitions are swallowed while their guard region is held.
  pub suppressed: u8,
}

impl<T, CHG, D> Mxt<T, CHG, D> {
  pub fn key_state(&self) -> KeyState {
    self.keys
  }

  /// Decode a T15 message: `detect` is the status byte, `bits` the key state.
  pub(crate) fn handle_keys<R: Reporter + ?Sized>(&mut self, detect: u8, bits: u8, reporter: &mut R) {
    if detect & KEY_DETECT == 0 {
      self.release_keys(reporter);
      self.keys.status = bits;
      return;
    }

    let changed = bits ^ self.keys.status;
    let mut reported = false;
    for key in self.config.keys {
      if changed & key.mask == 0 {
        continue;
      }
      let pressed = bits & key.mask != 0;
      if self.keys.suppressed & key.mask != 0 {
        info!("mxt: key {} ignored ({})", key.code, pressed);
      } else {
        debug!("mxt: key {} {}", key.code, pressed);
        reporter.key(key.code, pressed);
        reported = true;
      }
    }

    for key in self.config.keys.iter().filter(|k| k.guard != 0) {
      if changed & key.guard == 0 || bits & key.mask != 0 {
        continue;
      }
      let guard_held = bits & key.guard != 0;
      let suppressed = self.keys.suppressed & key.mask != 0;
      if guard_held && !suppressed {
        self.keys.suppressed |= key.mask;
        info!("mxt: key {} suppressed by dummy region", key.code);
      } else if !guard_held && suppressed {
        self.keys.suppressed &= !key.mask;
        info!("mxt: key {} suppression cleared", key.code);
      }
    }

    if reported {
      reporter.sync();
    }
    self.keys.status = bits;
  }

  /// Release every key still held and clear suppression.
  pub fn release_keys<R: Reporter + ?Sized>(&mut self, reporter: &mut R) {
    if self.keys.status == 0 {
      return;
    }
    for key in self.config.keys {
      if self.keys.status & key.mask != 0 && self.keys.suppressed & key.mask == 0 {
        reporter.key(key.code, false);
      }
    }
    reporter.sync();
    self.keys = KeyState::default();
  }
}
