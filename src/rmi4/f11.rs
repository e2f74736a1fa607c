//! F11: 2D sensor with per-finger status bits.
//!
//! The data area starts with the finger status registers, two bits per
//! finger, followed by one fixed-size block per finger:
//!
//! ```text
//!   [0] X[11:4]  [1] Y[11:4]  [2] Y[3:0] X[3:0]  [3] Wy Wx  [4] Z
//! ```

use super::defs::*;
use super::pdt::FunctionDescriptor;
use crate::bus::Transport;
use crate::touch::{Contact, Slots, MAX_FINGERS};
use crate::Rmi4Config;

/// Largest F11 data area: status registers plus ten 5-byte blocks.
pub(crate) const F11_DATA_MAX: usize = (MAX_FINGERS + 3) / 4 + MAX_FINGERS * F11_MAX_BLOCK;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct F11 {
  pub function: FunctionDescriptor,
  pub fingers: u8,
  pub max_x: u16,
  pub max_y: u16,
  /// Bytes per finger block, 3 or 5.
  pub block_size: u8,
}

impl F11 {
  pub(crate) async fn init<T, E>(bus: &mut T, function: FunctionDescriptor) -> Result<Self, E>
  where
    T: Transport<Error = E>,
  {
    let mut query = [0u8; F11_QUERY_LEN];
    bus.read(function.query_base, &mut query).await?;
    let fingers = match query[1] & 0x07 {
      n @ 0..=4 => n + 1,
      _ => MAX_FINGERS as u8,
    };

    let mut ctrl = [0u8; F11_CTRL_LEN];
    bus.read(function.control_base, &mut ctrl).await?;
    let max_x = ctrl[6] as u16 | ((ctrl[7] & 0x0F) as u16) << 8;
    let max_y = ctrl[8] as u16 | ((ctrl[9] & 0x0F) as u16) << 8;

    let block_size = if query[5] & 0x03 == 0 { 5 } else { 3 };
    debug!("rmi4: F11 {} fingers, max {}x{}", fingers, max_x, max_y);
    Ok(Self { function, fingers, max_x, max_y, block_size })
  }

  fn status_registers(&self) -> usize {
    (self.fingers as usize + 3) / 4
  }

  /// Bytes to read from the data base for one report.
  pub(crate) fn data_len(&self) -> usize {
    (self.status_registers() + self.fingers as usize * self.block_size as usize).min(F11_DATA_MAX)
  }

  /// Decode one report into `slots`. Returns the number of fingers present.
  pub(crate) fn decode(&self, data: &[u8], config: &Rmi4Config, slots: &mut Slots) -> u8 {
    let blocks = &data[self.status_registers().min(data.len())..];
    let block = self.block_size as usize;
    let mut touching = 0;

    for finger in 0..(self.fingers as usize).min(MAX_FINGERS) {
      let status = data.get(finger / 4).map_or(0, |reg| (reg >> ((finger % 4) * 2)) & 0x03);
      let Some(b) = blocks.get(finger * block..(finger + 1) * block) else {
        break;
      };

      if status == 0 {
        let width = slots.get(finger).map_or(0, |s| s.width);
        slots.release(finger, width);
        continue;
      }

      let mut x = (b[0] as u16) << 4 | (b[2] & 0x0F) as u16;
      let mut y = (b[1] as u16) << 4 | (b[2] >> 4) as u16;
      if config.x_flip {
        x = self.max_x.saturating_sub(x);
      }
      if config.y_flip {
        y = self.max_y.saturating_sub(y);
      }
      let w = b.get(3).copied().unwrap_or(0);
      let wx = (w & 0x0F) as u16;
      let wy = (w >> 4) as u16;
      let z = b.get(4).map_or(1, |z| (*z as u16).max(1));

      trace!("rmi4: F11 finger {} status {} x {} y {} wx {} wy {}", finger, status, x, y, wx, wy);
      slots.track(finger, Contact::new(x, y, z, wx.max(wy)).with_minor_width(wx.min(wy)));
      touching += 1;
    }
    touching
  }
}

#[cfg(test)]
mod tests {
  use super::super::fixture;
  use super::*;
  use crate::SlotState;
  use embassy_futures::block_on;

  fn f11(block_size: u8) -> F11 {
    let mut bus = fixture::f11_image();
    let fd = block_on(super::super::pdt::scan(&mut bus))
      .ok()
      .and_then(|t| t.find(Function::Sensor2d).copied())
      .expect("F11");
    F11 { function: fd, fingers: 2, max_x: 1023, max_y: 2047, block_size }
  }

  #[test]
  fn init_reads_geometry() {
    let mut bus = fixture::f11_image();
    let fd = f11(5).function;
    let f = block_on(F11::init(&mut bus, fd)).expect("init");
    assert_eq!(f.fingers, 2);
    assert_eq!((f.max_x, f.max_y), (1023, 2047));
    assert_eq!(f.block_size, 5);
    assert_eq!(f.data_len(), 1 + 2 * 5);
  }

  #[test]
  fn decodes_twelve_bit_coordinates_and_widths() {
    let f = f11(5);
    let mut slots = Slots::new();
    // finger 1 present, finger 0 absent
    let data = [0x04, 0, 0, 0, 0, 0, 0x12, 0x34, 0x65, 0x52, 30];
    assert_eq!(f.decode(&data, &Rmi4Config::default(), &mut slots), 1);

    let slot = slots.get(1).copied().expect("slot");
    assert_eq!(slot.state, SlotState::Press);
    assert_eq!((slot.x, slot.y), (0x125, 0x346));
    assert_eq!((slot.width, slot.minor_width), (5, Some(2)));
    assert_eq!(slot.z, 30);
    assert!(!slots.is_active(0));
  }

  #[test]
  fn flips_mirror_against_sensor_maximum() {
    let f = f11(3);
    let mut slots = Slots::new();
    let data = [0x01, 0x01, 0x02, 0x00, 0, 0, 0];
    let config = Rmi4Config::default().with_flip(true, true);
    f.decode(&data, &config, &mut slots);
    let slot = slots.get(0).copied().expect("slot");
    assert_eq!((slot.x, slot.y), (1023 - 16, 2047 - 32));
    assert_eq!(slot.z, 1);
  }

  #[test]
  fn cleared_status_releases_held_finger() {
    let f = f11(5);
    let mut slots = Slots::new();
    f.decode(&[0x01, 1, 1, 0, 0x11, 9, 0, 0, 0, 0, 0], &Rmi4Config::default(), &mut slots);
    assert!(slots.is_active(0));
    assert_eq!(f.decode(&[0x00; 11], &Rmi4Config::default(), &mut slots), 0);
    assert_eq!(slots.get(0).map(|s| s.state), Some(SlotState::Release));
  }
}
