use embedded_hal::digital::InputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use super::defs::*;
use super::Mxt;
use crate::bus::Transport;
use crate::debounce::Debounce;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargerMode {
  #[default]
  Battery,
  Charging,
}

impl From<bool> for ChargerMode {
  fn from(charging: bool) -> Self {
    if charging {
      ChargerMode::Charging
    } else {
      ChargerMode::Battery
    }
  }
}

/// Charger notification state: the requested mode, the debounce in front of
/// it and the mode last written to the device.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Charger {
  requested: ChargerMode,
  applied: Option<ChargerMode>,
  debounce: Debounce<ChargerMode>,
}

impl Charger {
  pub(crate) const fn new() -> Self {
    Self { requested: ChargerMode::Battery, applied: None, debounce: Debounce::new(CHARGER_DEBOUNCE_MS) }
  }

  /// `true` once charging mode has been written to the device.
  pub(crate) fn is_charging(&self) -> bool {
    self.applied == Some(ChargerMode::Charging)
  }

  /// Forget what the device holds so the next sync writes it again.
  pub(crate) fn invalidate(&mut self) {
    self.applied = None;
  }
}

impl<T, CHG, D> Mxt<T, CHG, D> {
  pub fn charger_mode(&self) -> ChargerMode {
    self.charger.requested
  }

  /// The device lost its registers, the charger bit must be written again.
  pub(crate) fn invalidate_charger(&mut self) {
    self.charger.invalidate();
  }

  /// Record a charger change. It reaches the device once it has been stable
  /// for the debounce delay, see [`Mxt::poll_charger`]. Returning to the mode
  /// the device already holds drops the pending change.
  pub fn inform_charger(&mut self, charging: bool, now_ms: u32) {
    let mode = ChargerMode::from(charging);
    self.charger.requested = mode;
    if self.charger.applied == Some(mode) {
      self.charger.debounce.cancel();
    } else {
      self.charger.debounce.schedule(mode, now_ms);
    }
  }
}

impl<T, E, CHG, D> Mxt<T, CHG, D>
where
  T: Transport<Error = E>,
  CHG: InputPin + Wait,
  D: DelayNs,
{
  /// Apply a debounced charger change. While the device is not `enabled` the
  /// change is rescheduled instead. Returns `true` when the device was updated.
  pub async fn poll_charger(&mut self, now_ms: u32, enabled: bool) -> Result<bool, Error<E>> {
    let Some(mode) = self.charger.debounce.poll(now_ms) else {
      return Ok(false);
    };
    if !enabled {
      self.charger.debounce.schedule(mode, now_ms);
      return Ok(false);
    }
    info!("mxt: {:?} mode", mode);
    self.set_charger_config().await?;
    Ok(true)
  }

  /// Write the requested charger mode to T62 if the device does not hold it.
  pub(crate) async fn set_charger_config(&mut self) -> Result<(), Error<E>> {
    let mode = self.charger.requested;
    if self.charger.applied == Some(mode) {
      return Ok(());
    }
    let charging = mode == ChargerMode::Charging;
    self
      .modify_object(ObjectType::NoiseSuppression, T62_CALCFG, |v| {
        if charging {
          v | T62_CALCFG_CHARGER
        } else {
          v & !T62_CALCFG_CHARGER
        }
      })
      .await?;
    self.charger.applied = Some(mode);
    Ok(())
  }

  /// Clear the T62 report bit so noise suppression stays quiet. Runs before
  /// the backup so the change is stored with the config.
  pub async fn disable_noise_reports(&mut self) -> Result<(), Error<E>> {
    self.modify_object(ObjectType::NoiseSuppression, T62_CTRL, |v| v & !T62_CTRL_REPORT_DISABLE).await?;
    debug!("mxt: T62 reports disabled");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::super::fixture;
  use super::*;
  use crate::Config;
  use embassy_futures::block_on;

  const CALCFG: u16 = fixture::T62 + T62_CALCFG;

  #[test]
  fn applies_after_debounce() {
    let mut dev = fixture::discovered(Config::default());
    dev.inform_charger(true, 1000);
    assert_eq!(block_on(dev.poll_charger(1100, true)), Ok(false));
    assert_eq!(block_on(dev.poll_charger(1200, true)), Ok(true));
    assert_eq!(dev.bus().mem[CALCFG as usize] & T62_CALCFG_CHARGER, T62_CALCFG_CHARGER);
  }

  #[test]
  fn burst_delivers_last_value_only() {
    let mut dev = fixture::discovered(Config::default());
    dev.inform_charger(true, 0);
    dev.inform_charger(false, 100);
    assert_eq!(block_on(dev.poll_charger(250, true)), Ok(false));
    assert_eq!(block_on(dev.poll_charger(300, true)), Ok(true));
    assert_eq!(dev.charger_mode(), ChargerMode::Battery);
    assert_eq!(dev.bus().mem[CALCFG as usize] & T62_CALCFG_CHARGER, 0);
  }

  #[test]
  fn bounce_back_to_applied_mode_writes_nothing() {
    let mut dev = fixture::discovered(Config::default());
    dev.inform_charger(false, 0);
    block_on(dev.poll_charger(200, true)).expect("apply");
    let writes = dev.bus().writes_to(CALCFG);

    dev.inform_charger(true, 1000);
    dev.inform_charger(false, 1050);
    assert!(!dev.charger.debounce.is_pending());
    assert_eq!(block_on(dev.poll_charger(1500, true)), Ok(false));
    assert_eq!(dev.bus().writes_to(CALCFG), writes);
  }

  #[test]
  fn width_bias_follows_applied_mode() {
    let mut dev = fixture::discovered(Config::default());
    dev.inform_charger(true, 0);
    assert!(!dev.charger.is_charging());
    block_on(dev.poll_charger(200, true)).expect("apply");
    assert!(dev.charger.is_charging());
  }

  #[test]
  fn reschedules_while_stopped() {
    let mut dev = fixture::discovered(Config::default());
    dev.inform_charger(true, 0);
    assert_eq!(block_on(dev.poll_charger(200, false)), Ok(false));
    assert!(dev.bus().writes.is_empty());
    assert_eq!(block_on(dev.poll_charger(300, true)), Ok(false));
    assert_eq!(block_on(dev.poll_charger(400, true)), Ok(true));
  }

  #[test]
  fn writes_only_on_change_until_reset() {
    let mut dev = fixture::discovered(Config::default());
    dev.bus().mem[CALCFG as usize] = 0x40;
    dev.inform_charger(true, 0);
    block_on(dev.poll_charger(200, true)).expect("apply");
    assert_eq!(dev.bus().mem[CALCFG as usize], 0x41);
    block_on(dev.set_charger_config()).expect("no-op");
    assert_eq!(dev.bus().writes_to(CALCFG), 1);

    dev.charger.invalidate();
    dev.bus().mem[CALCFG as usize] = 0x40;
    block_on(dev.set_charger_config()).expect("reapply");
    assert_eq!(dev.bus().mem[CALCFG as usize], 0x41);
    assert_eq!(dev.bus().writes_to(CALCFG), 2);
  }

  #[test]
  fn noise_reports_bit_is_cleared() {
    let mut dev = fixture::discovered(Config::default());
    dev.bus().mem[(fixture::T62 + T62_CTRL) as usize] = 0x83;
    block_on(dev.disable_noise_reports()).expect("T62");
    assert_eq!(dev.bus().mem[(fixture::T62 + T62_CTRL) as usize], 0x81);
  }
}
