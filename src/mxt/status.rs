use bitfield_struct::bitfield;

use super::Mxt;
use crate::touch::Reporter;

/// T57 touch-channel count above which the sum size is floored on battery.
const CHANNEL_FLOOR: u16 = 15;

/// Command processor status byte, the first payload byte of a T6 message.
/// All zero means normal operation.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceStatus {
  #[bits(2)]
  __: u8,
  pub checksum_error: bool,
  pub config_error: bool,
  pub calibrating: bool,
  pub signal_error: bool,
  pub overflow: bool,
  pub reset: bool,
}

impl<T, CHG, D> Mxt<T, CHG, D> {
  pub(crate) fn handle_status<R: Reporter + ?Sized>(&mut self, raw: u8, reporter: &mut R) -> DeviceStatus {
    let status = DeviceStatus::from_bits(raw);
    if raw == 0 {
      info!("mxt: normal mode");
    }
    if status.checksum_error() {
      error!("mxt: I2C checksum error");
    }
    if status.config_error() {
      error!("mxt: config error");
    }
    if status.calibrating() {
      info!("mxt: calibration in progress");
    }
    if status.signal_error() {
      error!("mxt: signal error");
    }
    if status.overflow() {
      error!("mxt: message overflow");
    }
    if status.reset() {
      info!("mxt: reset in progress");
      self.charger.invalidate();
    }
    reporter.status(raw);
    status
  }

  pub(crate) fn handle_self_test(&mut self, p: &[u8; 8]) {
    let result = [p[0], p[1], p[2], p[3]];
    error!("mxt: self test fail {:?}", result);
    self.self_test = Some(result);
  }

  pub(crate) fn handle_palm(&mut self, flags: u8) {
    self.metrics.palm = flags & 0x01 != 0;
    if self.metrics.palm {
      info!("mxt: palm touch detected");
    } else {
      info!("mxt: palm touch released");
    }
  }

  /// T57: summed touch area, floored by the touched channel count on battery.
  pub(crate) fn handle_extra_touch(&mut self, p: &[u8; 8]) {
    let mut sum_size = u16::from_le_bytes([p[0], p[1]]);
    if !self.charger.is_charging() {
      let channels = u16::from_le_bytes([p[2], p[3]]);
      self.metrics.touch_channels = channels;
      if channels > CHANNEL_FLOOR {
        sum_size = sum_size.max(channels.saturating_mul(2));
      }
    }
    self.metrics.sum_size = sum_size;
  }
}
