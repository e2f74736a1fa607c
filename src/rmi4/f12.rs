//! F12: 2D sensor with typed object reports.
//!
//! F12 registers are sparse: query 5 and query 8 carry presence bitmaps and a
//! register's address is its base plus the number of present registers
//! before it. Each object is an 8-byte record:
//!
//! ```text
//!   [0] type  [1..3] X (le)  [3..5] Y (le)  [5] Z  [6] Wx  [7] Wy
//! ```
//!
//! Data register 15 holds a per-object attention bitmap. Only records up to
//! the highest flagged object are read, but never fewer than the slots still
//! holding a contact, or a lift-off on a high slot would go unseen.

use super::defs::*;
use super::pdt::FunctionDescriptor;
use crate::bus::Transport;
use crate::touch::{Contact, Slots, MAX_FINGERS};
use crate::Rmi4Config;

/// Largest object report read in one go.
pub(crate) const F12_DATA_MAX: usize = F12_FINGERS as usize * F12_FINGER_SIZE;

/// Address offset of register `n` given a presence bitmap.
pub(crate) fn register_offset(present: u32, n: u32) -> u16 {
  (present & ((1u32 << n) - 1)).count_ones() as u16
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct F12 {
  pub function: FunctionDescriptor,
  pub fingers: u8,
  pub max_x: u16,
  pub max_y: u16,
  pub rx: u8,
  pub tx: u8,
  pub threshold: u8,
  /// Report enable register (control 28).
  pub report_enable: u16,
  data1: u16,
  /// Attention bitmap register and its length.
  data15: Option<(u16, u8)>,
}

impl F12 {
  pub(crate) async fn init<T, E>(bus: &mut T, function: FunctionDescriptor) -> Result<Self, E>
  where
    T: Transport<Error = E>,
  {
    let query = function.query_base;
    let ctrl = function.control_base;

    let mut query5 = [0u8; F12_QUERY5_LEN];
    bus.read(query + 5, &mut query5).await?;
    let ctrl_present = u32::from_le_bytes([query5[1], query5[2], query5[3], query5[4]]);
    let ctrl_at = |n| ctrl + register_offset(ctrl_present, n);

    let mut ctrl23 = [0u8; 2];
    bus.read(ctrl_at(23), &mut ctrl23).await?;
    let fingers = ctrl23[1].min(F12_FINGERS).min(MAX_FINGERS as u8);

    let report_enable = ctrl_at(28);
    bus.write(report_enable, &[F12_REPORT_ENABLES]).await?;

    let mut size = [0u8; 1];
    bus.read(query + 7, &mut size).await?;
    let mut query8 = [0u8; F12_QUERY8_MAX];
    let len = (size[0] as usize).min(F12_QUERY8_MAX);
    bus.read(query + 8, &mut query8[..len]).await?;
    let data_present = u32::from_le_bytes([query8[0], query8[1], query8[2], 0]);

    let data1 = function.data_base + (data_present & 0x01) as u16;
    let data15 = if size[0] >= 3 && data_present & (1 << 15) != 0 {
      Some((function.data_base + register_offset(data_present, 15), (fingers + 7) / 8))
    } else {
      None
    };

    let mut ctrl8 = [0u8; F12_CTRL8_LEN];
    bus.read(ctrl_at(8), &mut ctrl8).await?;
    let max_x = u16::from_le_bytes([ctrl8[0], ctrl8[1]]);
    let max_y = u16::from_le_bytes([ctrl8[2], ctrl8[3]]);
    let (rx, tx) = (ctrl8[12], ctrl8[13]);

    let mut ctrl9 = [0u8; 1];
    bus.read(ctrl_at(9), &mut ctrl9).await?;

    debug!("rmi4: F12 {} fingers, max {}x{}, {}x{} nodes", fingers, max_x, max_y, rx, tx);
    Ok(Self { function, fingers, max_x, max_y, rx, tx, threshold: ctrl9[0], report_enable, data1, data15 })
  }

  pub fn node_count(&self) -> u16 {
    self.rx as u16 * self.tx as u16
  }

  /// Attention bitmap register, if the device implements one.
  pub(crate) fn attention(&self) -> Option<(u16, u8)> {
    self.data15
  }

  pub(crate) fn records(&self) -> u16 {
    self.data1
  }

  /// Objects to read: up to the highest flagged object, but at least up to
  /// the highest slot that is still held. Without an attention bitmap every
  /// supported object is read.
  pub(crate) fn objects_to_process(&self, attention: Option<&[u8]>, slots: &Slots) -> u8 {
    let flagged = match attention {
      Some(bitmap) => {
        let lo = bitmap.first().copied().unwrap_or(0) as u16;
        let hi = bitmap.get(1).map_or(0, |b| (b & 0x07) as u16);
        let bits = lo | hi << 8;
        (16 - bits.leading_zeros() as u8).min(self.fingers)
      }
      None => self.fingers,
    };
    let held = (0..self.fingers as usize).rev().find(|i| slots.is_active(*i)).map_or(0, |i| i as u8 + 1);
    flagged.max(held)
  }

  /// Decode `records` (8 bytes per object) into `slots`. Returns the number
  /// of objects reported as a contact.
  pub(crate) fn decode(&self, records: &[u8], config: &Rmi4Config, slots: &mut Slots) -> u8 {
    let mut touching = 0;
    for (finger, r) in records.chunks_exact(F12_FINGER_SIZE).enumerate().take(self.fingers as usize) {
      let x = u16::from_le_bytes([r[1], r[2]]);
      let y = u16::from_le_bytes([r[3], r[4]]);
      let object = if x == F12_INVALID_COORD && y == F12_INVALID_COORD { OBJECT_NONE } else { r[0] };

      if object == OBJECT_NONE || object == OBJECT_PALM {
        if object == OBJECT_PALM {
          debug!("rmi4: F12 object {} is a palm, rejected", finger);
        }
        let width = slots.get(finger).map_or(0, |s| s.width);
        slots.release(finger, width);
        continue;
      }

      let x = if config.x_flip { self.max_x.saturating_sub(x) } else { x };
      let y = if config.y_flip { self.max_y.saturating_sub(y) } else { y };
      let (wx, wy) = (r[6] as u16, r[7] as u16);
      let z = (r[5] as u16).max(1);
      if object == OBJECT_GLOVE {
        trace!("rmi4: F12 object {} is a glove", finger);
      }

      trace!("rmi4: F12 object {} type {} x {} y {} wx {} wy {}", finger, object, x, y, wx, wy);
      slots.track(finger, Contact::new(x, y, z, wx.max(wy)).with_minor_width(wx.min(wy)));
      touching += 1;
    }
    touching
  }
}
