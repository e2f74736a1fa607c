use bitfield_struct::bitfield;

use super::Mxt;
use crate::touch::{Contact, Reporter, MAX_FINGERS};

/// Coordinates are reported at 12 bits; axes configured below this are
/// scaled down by four.
const FULL_RESOLUTION: u16 = 1024;
/// Added to the reported width while running on battery.
const BATTERY_WIDTH_BIAS: u16 = 4;

/// T9 message status byte.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub(crate) struct TouchStatus {
  __: bool,
  pub(crate) suppress: bool,
  pub(crate) amplitude: bool,
  pub(crate) vector: bool,
  pub(crate) moved: bool,
  pub(crate) release: bool,
  pub(crate) press: bool,
  pub(crate) detect: bool,
}

/// Split 12-bit X/Y: `x = b1 << 4 | b3 >> 4`, `y = b2 << 4 | b3 & 0xF`.
pub(crate) const fn position(b1: u8, b2: u8, b3: u8) -> (u16, u16) {
  let x = (b1 as u16) << 4 | (b3 >> 4) as u16;
  let y = (b2 as u16) << 4 | (b3 & 0x0F) as u16;
  (x, y)
}

impl<T, CHG, D> Mxt<T, CHG, D> {
  /// Decode one T9 record for finger `index`. Returns the number of frames
  /// flushed while doing so.
  pub(crate) fn handle_touch<R: Reporter + ?Sized>(&mut self, index: u8, p: &[u8; 8], reporter: &mut R) -> u16 {
    let id = index as usize;
    if id >= MAX_FINGERS {
      error!("mxt: finger {} exceeds slot count", id);
      return 0;
    }

    let mut frames = 0;
    // A second record for the same finger in one pass starts a new frame.
    if self.slots.is_dirty(id) && self.slots.flush(reporter) > 0 {
      frames += 1;
    }

    let status = TouchStatus::from_bits(p[0]);
    if status.release() {
      self.metrics.palm = false;
      self.slots.release(id, p[4] as u16);
      frames += self.flush_frame(reporter);
    } else if status.detect() && (status.press() || status.moved()) {
      let contact = self.decode_contact(p);
      if status.press() {
        self.slots.press(id, contact);
      } else if !self.slots.motion(id, contact) {
        trace!("mxt: motion for idle finger {}", id);
      }
      if status.suppress() && !self.metrics.palm {
        info!("mxt: palm detected");
      }
      self.metrics.palm = status.suppress();
    } else if status.suppress() && self.slots.is_active(id) {
      if !status.detect() {
        info!("mxt: finger {} suppressed without detect", id);
        self.metrics.palm = false;
        self.slots.release(id, p[4] as u16);
        frames += self.flush_frame(reporter);
      }
    } else if !(status.detect() && (status.amplitude() || status.vector())) {
      warn!("mxt: unknown touch status {} {}", p[0], p[1]);
    }
    frames
  }

  fn flush_frame<R: Reporter + ?Sized>(&mut self, reporter: &mut R) -> u16 {
    (self.slots.flush(reporter) > 0) as u16
  }

  fn decode_contact(&self, p: &[u8; 8]) -> Contact {
    let (mut x, mut y) = position(p[1], p[2], p[3]);
    if self.config.max_x < FULL_RESOLUTION {
      x >>= 2;
    }
    if self.config.max_y < FULL_RESOLUTION {
      y >>= 2;
    }

    let width = match p[4] {
      0 => 1,
      w if self.charger.is_charging() => w as u16,
      w => w as u16 + BATTERY_WIDTH_BIAS,
    };

    let mut pressure = p[5] as u16;
    if pressure == 0 {
      warn!("mxt: zero pressure on active contact");
      pressure = 1;
    }
    Contact::new(x, y, pressure, width)
  }
}
