//! Device bring-up and power management for maXTouch controllers.
//!
//! [`Controller`] owns the [`Mxt`] core and the board [`Platform`]. It runs
//! the start-up sequence as a state machine, keeps start/stop idempotent and
//! masks the interrupt line around everything that rewrites the device.

use embedded_hal::digital::InputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use crate::bus::{BootloaderPort, Transport};
use crate::firmware::FirmwareImage;
use crate::mxt::defs::{BACKUP_VALUE, DISABLE_EVENTS_VALUE, HW_RESET_TIME_MS, RESET_VALUE};
use crate::mxt::{ConfigSync, DrainSummary, Mxt};
use crate::platform::{IrqGuard, Platform};
use crate::touch::Reporter;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LifecycleState {
  PoweredOff,
  PoweringOn,
  TableDiscovery,
  CrcVerify,
  ConfigSync,
  Backup,
  SoftReset,
  Ready,
  Suspended,
  Error,
}

/// What a probe or firmware update did on its way to `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProbeOutcome {
  pub flashed: bool,
  pub config: ConfigSync,
}

pub struct Controller<T, CHG, D, P> {
  device: Mxt<T, CHG, D>,
  platform: P,
  state: LifecycleState,
  enabled: bool,
}

impl<T, CHG, D, P> Controller<T, CHG, D, P> {
  pub fn new(device: Mxt<T, CHG, D>, platform: P) -> Self {
    Self { device, platform, state: LifecycleState::PoweredOff, enabled: false }
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  /// `true` while the device is powered with its interrupt unmasked.
  pub fn is_enabled(&self) -> bool {
    self.enabled
  }

  pub fn device(&mut self) -> &mut Mxt<T, CHG, D> {
    &mut self.device
  }

  pub fn platform(&mut self) -> &mut P {
    &mut self.platform
  }

  pub fn release(self) -> (Mxt<T, CHG, D>, P) {
    (self.device, self.platform)
  }

  /// Record a charger change. See [`Controller::poll`].
  pub fn inform_charger(&mut self, charging: bool, now_ms: u32) {
    self.device.inform_charger(charging, now_ms);
  }
}

impl<T, E, CHG, D, P> Controller<T, CHG, D, P>
where
  T: Transport<Error = E>,
  CHG: InputPin + Wait,
  D: DelayNs,
  P: Platform,
{
  async fn power_on(device: &mut Mxt<T, CHG, D>, platform: &mut P) -> Result<(), Error<E>> {
    platform.set_power(true).map_err(|e| {
      error!("mxt: failed to power on");
      e
    })?;
    if device.wait_for_chg(HW_RESET_TIME_MS).await.is_err() {
      warn!("mxt: no response after power on");
    }
    Ok(())
  }

  /// Bring-up after the layout may have changed: discovery through reset.
  async fn bring_up(
    device: &mut Mxt<T, CHG, D>,
    state: &mut LifecycleState,
    image: Option<&FirmwareImage<'_>>,
  ) -> Result<ConfigSync, Error<E>> {
    let mut sync = ConfigSync::BoardObjects { objects: 0 };
    *state = LifecycleState::TableDiscovery;

    loop {
      match *state {
        LifecycleState::TableDiscovery => {
          let layout = device.discover().await?;
          debug!("mxt: {} report ids", layout.report_ids.max_report_id());
          *state = LifecycleState::CrcVerify;
        }

        LifecycleState::CrcVerify => {
          device.verify_info_crc().await?;
          *state = LifecycleState::ConfigSync;
        }

        LifecycleState::ConfigSync => {
          device.backup(DISABLE_EVENTS_VALUE).await?;
          sync = match image {
            Some(image) => device.write_config(image).await?,
            None => {
              let objects = device.config().board_objects;
              ConfigSync::BoardObjects { objects: device.write_board_objects(objects).await? }
            }
          };
          if device.disable_noise_reports().await.is_err() {
            warn!("mxt: T62 init skipped");
          }
          *state = LifecycleState::Backup;
        }

        LifecycleState::Backup => {
          device.backup(BACKUP_VALUE).await?;
          *state = LifecycleState::SoftReset;
        }

        LifecycleState::SoftReset => {
          device.reset(RESET_VALUE).await?;
          device.make_highchg().await?;
          *state = LifecycleState::Ready;
        }

        LifecycleState::Ready => {
          info!("mxt: controller ready");
          return Ok(sync);
        }

        other => {
          error!("mxt: bring-up entered {:?}", other);
          return Err(Error::NotReady);
        }
      }
    }
  }

  /// Power up and unmask the interrupt. No-op when already started.
  pub async fn start(&mut self) -> Result<(), Error<E>> {
    if self.enabled {
      debug!("mxt: start, but touch already on");
      return Ok(());
    }
    if self.state == LifecycleState::Error || self.device.layout().is_none() {
      return Err(Error::NotReady);
    }
    Self::power_on(&mut self.device, &mut self.platform).await?;
    self.platform.enable_irq();
    self.enabled = true;
    self.state = LifecycleState::Ready;
    Ok(())
  }

  /// Mask the interrupt, power down and release every contact. No-op when
  /// already stopped. If power cannot be removed the interrupt is unmasked
  /// again and the device stays started.
  pub fn stop<R: Reporter + ?Sized>(&mut self, reporter: &mut R) -> Result<(), Error<E>> {
    if !self.enabled {
      debug!("mxt: stop, but touch already off");
      return Ok(());
    }
    let mut irq = IrqGuard::new(&mut self.platform);
    irq.set_power(false).map_err(|e| {
      error!("mxt: failed to power off");
      e
    })?;
    irq.keep_disabled();

    self.enabled = false;
    self.device.release_all(reporter);
    self.device.invalidate_charger();
    if self.state != LifecycleState::Error {
      self.state = LifecycleState::PoweredOff;
    }
    Ok(())
  }

  pub fn suspend<R: Reporter + ?Sized>(&mut self, reporter: &mut R) -> Result<(), Error<E>> {
    let was_ready = self.state == LifecycleState::Ready;
    self.stop(reporter)?;
    if was_ready {
      self.state = LifecycleState::Suspended;
    }
    Ok(())
  }

  pub async fn resume(&mut self) -> Result<(), Error<E>> {
    if self.state != LifecycleState::Suspended {
      return Ok(());
    }
    self.start().await
  }

  /// Wait for the next interrupt and service it. Returns an empty summary
  /// while the device is stopped.
  pub async fn wait_and_service<R: Reporter + ?Sized>(&mut self, reporter: &mut R) -> DrainSummary {
    if !self.enabled {
      return DrainSummary::default();
    }
    self.device.wait_and_service(reporter).await
  }

  /// Apply a pending charger change once its debounce delay has passed.
  pub async fn poll(&mut self, now_ms: u32) -> Result<bool, Error<E>> {
    self.device.poll_charger(now_ms, self.enabled).await
  }
}

impl<T, E, CHG, D, P> Controller<T, CHG, D, P>
where
  T: Transport<Error = E> + BootloaderPort<Error = E>,
  CHG: InputPin + Wait,
  D: DelayNs,
  P: Platform,
{
  /// Power the device, update its firmware from `firmware` if needed and run
  /// the bring-up sequence. An image that fails validation is skipped and
  /// the board objects are used instead. On failure the device is powered
  /// down again and left in [`LifecycleState::Error`].
  pub async fn probe(&mut self, firmware: Option<&[u8]>) -> Result<ProbeOutcome, Error<E>> {
    let image = match firmware.map(FirmwareImage::parse) {
      Some(Ok(image)) => Some(image),
      Some(Err(e)) => {
        error!("mxt: firmware image rejected: {:?}", e);
        None
      }
      None => None,
    };

    self.state = LifecycleState::PoweringOn;
    let mut irq = IrqGuard::new(&mut self.platform);
    let result = Self::probe_inner(&mut self.device, &mut *irq, &mut self.state, image.as_ref()).await;

    match result {
      Ok(outcome) => {
        drop(irq);
        self.enabled = true;
        Ok(outcome)
      }
      Err(e) => {
        self.state = LifecycleState::Error;
        if irq.set_power(false).is_err() {
          error!("mxt: failed to power off after failed probe");
        }
        drop(irq);
        Err(e)
      }
    }
  }

  async fn probe_inner(
    device: &mut Mxt<T, CHG, D>,
    platform: &mut P,
    state: &mut LifecycleState,
    image: Option<&FirmwareImage<'_>>,
  ) -> Result<ProbeOutcome, Error<E>> {
    Self::power_on(device, platform).await?;

    let mut flashed = false;
    if let Some(image) = image.filter(|i| i.has_header()) {
      flashed = device.flash_on_probe(image).await?;
    }
    let config = Self::bring_up(device, state, image).await?;
    Ok(ProbeOutcome { flashed, config })
  }

  /// Flash `firmware` on a running device and bring it up again with the
  /// config it carries. The interrupt stays masked for the whole update. A
  /// failed update powers the device down and leaves it in
  /// [`LifecycleState::Error`] until the next probe.
  pub async fn update_firmware(&mut self, firmware: &[u8]) -> Result<ProbeOutcome, Error<E>> {
    if !self.enabled {
      return Err(Error::NotReady);
    }
    let image = FirmwareImage::parse(firmware)?;

    let mut irq = IrqGuard::new(&mut self.platform);
    match Self::reflash(&mut self.device, &mut self.state, &image).await {
      Ok(config) => Ok(ProbeOutcome { flashed: true, config }),
      Err(e) => {
        error!("mxt: firmware update failed: {:?}", e);
        self.state = LifecycleState::Error;
        self.enabled = false;
        if irq.set_power(false).is_err() {
          error!("mxt: failed to power off after failed update");
        }
        drop(irq);
        self.device.invalidate_charger();
        Err(e)
      }
    }
  }

  async fn reflash(
    device: &mut Mxt<T, CHG, D>,
    state: &mut LifecycleState,
    image: &FirmwareImage<'_>,
  ) -> Result<ConfigSync, Error<E>> {
    device.enter_bootloader().await?;
    device.flash(image.firmware).await?;
    Self::bring_up(device, state, Some(image)).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bus::mock::MockBus;
  use crate::firmware::MAGIC;
  use crate::mxt::fixture;
  use crate::mxt::BootState;
  use crate::platform::mock::{MockChg, MockDelay, MockPlatform};
  use crate::touch::recorder::Recorder;
  use crate::Config;
  use embassy_futures::block_on;

  type Ctl = Controller<MockBus, MockChg, MockDelay, MockPlatform>;

  const CMD: u8 = BootState::WaitingBootloadCmd as u8;
  const FRAME: u8 = BootState::WaitingFrameData as u8;
  const PASS: u8 = BootState::FrameCrcPass as u8;
  const FAIL: u8 = BootState::FrameCrcFail as u8;

  fn controller() -> Ctl {
    Controller::new(fixture::device(Config::default()), MockPlatform::default())
  }

  fn container(version: u8, config: &[u8], firmware: &[u8], crc: u32) -> std::vec::Vec<u8> {
    let mut out = std::vec::Vec::new();
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.push(version);
    out.push(fixture::BUILD);
    out.extend_from_slice(&22u32.to_le_bytes());
    out.extend_from_slice(&(config.len() as u32).to_le_bytes());
    out.extend_from_slice(&(firmware.len() as u32).to_le_bytes());
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(config);
    out.extend_from_slice(firmware);
    out
  }

  fn config_crc_report(ctl: &mut Ctl, crc: u32) {
    let b = crc.to_le_bytes();
    ctl.device().bus().push_record(&fixture::message(1, &[0, b[0], b[1], b[2]]));
  }

  const T7_CONFIG: [u8; 5] = [7, 0, 2, 0x20, 0x10];

  #[test]
  fn probe_without_image_reaches_ready() {
    let mut ctl = controller();
    let outcome = block_on(ctl.probe(None)).expect("probe");
    assert_eq!(outcome, ProbeOutcome { flashed: false, config: ConfigSync::BoardObjects { objects: 0 } });
    assert_eq!(ctl.state(), LifecycleState::Ready);
    assert!(ctl.is_enabled());
    assert!(ctl.platform().powered && ctl.platform().irq_enabled);

    let bus = ctl.device().bus();
    assert_eq!(bus.writes_to(fixture::T6 + 1), 2);
    assert_eq!(bus.mem[(fixture::T6 + 1) as usize], BACKUP_VALUE);
    assert_eq!(bus.mem[fixture::T6 as usize], RESET_VALUE);
  }

  #[test]
  fn info_crc_mismatch_is_fatal() {
    let mut ctl = controller();
    let crc_at = 7 + fixture::ENTRIES.len() * 6;
    ctl.device().bus().mem[crc_at] ^= 0xFF;
    assert!(matches!(block_on(ctl.probe(None)), Err(Error::ChecksumMismatch { .. })));
    assert_eq!(ctl.state(), LifecycleState::Error);
    assert!(!ctl.is_enabled());
    assert!(!ctl.platform().powered);
    assert!(ctl.platform().irq_enabled);
    assert_eq!(block_on(ctl.start()), Err(Error::NotReady));
  }

  #[test]
  fn matching_firmware_is_not_flashed() {
    let mut ctl = controller();
    let file = container(fixture::VERSION, &T7_CONFIG, &[0, 2, 0xAB, 0xCD], 0x123456);
    config_crc_report(&mut ctl, 0x123456);
    let outcome = block_on(ctl.probe(Some(&file))).expect("probe");
    assert_eq!(outcome, ProbeOutcome { flashed: false, config: ConfigSync::UpToDate { crc: 0x123456 } });
    assert!(ctl.device().bus().frames.is_empty());
  }

  #[test]
  fn other_firmware_is_flashed_before_bring_up() {
    let mut ctl = controller();
    let file = container(fixture::VERSION + 1, &T7_CONFIG, &[0, 2, 0xAB, 0xCD], 0x123456);
    ctl.device().bus().boot_status.extend([CMD, FRAME, PASS]);
    config_crc_report(&mut ctl, 0x000001);

    let outcome = block_on(ctl.probe(Some(&file))).expect("probe");
    // The mock keeps reporting the old version after the flash.
    assert_eq!(outcome, ProbeOutcome { flashed: true, config: ConfigSync::VersionMismatch });
    assert_eq!(ctl.device().bus().frames, [std::vec![0xDC, 0xAA], std::vec![0, 2, 0xAB, 0xCD]]);
    assert_eq!(ctl.state(), LifecycleState::Ready);
  }

  #[test]
  fn config_is_written_when_crc_differs() {
    let mut ctl = controller();
    let file = container(fixture::VERSION, &T7_CONFIG, &[0, 2, 0xAB, 0xCD], 0x123456);
    config_crc_report(&mut ctl, 0x654321);
    let outcome = block_on(ctl.probe(Some(&file))).expect("probe");
    assert_eq!(outcome.config, ConfigSync::Written { entries: 1 });
    assert_eq!(ctl.device().bus().mem[fixture::T7 as usize..fixture::T7 as usize + 3], [0x20, 0x10, 0]);
  }

  #[test]
  fn rejected_image_falls_back_to_board_objects() {
    let mut ctl = controller();
    let mut file = container(fixture::VERSION, &T7_CONFIG, &[0, 2, 0xAB, 0xCD], 0);
    file.push(0);
    let outcome = block_on(ctl.probe(Some(&file))).expect("probe");
    assert_eq!(outcome.config, ConfigSync::BoardObjects { objects: 0 });
  }

  #[test]
  fn start_and_stop_are_idempotent() {
    let mut ctl = controller();
    let mut rec = Recorder::default();
    block_on(ctl.probe(None)).expect("probe");
    let calls = ctl.platform().power_calls;

    block_on(ctl.start()).expect("start");
    assert_eq!(ctl.platform().power_calls, calls);

    ctl.stop(&mut rec).expect("stop");
    ctl.stop(&mut rec).expect("stop again");
    assert_eq!(ctl.platform().power_calls, calls + 1);
    assert_eq!(ctl.state(), LifecycleState::PoweredOff);
    assert!(!ctl.platform().powered && !ctl.platform().irq_enabled);

    block_on(ctl.start()).expect("restart");
    assert_eq!(ctl.state(), LifecycleState::Ready);
    assert!(ctl.platform().irq_enabled);
  }

  #[test]
  fn failed_power_off_keeps_device_running() {
    let mut ctl = controller();
    let mut rec = Recorder::default();
    block_on(ctl.probe(None)).expect("probe");
    ctl.platform().fail_power_off = true;
    assert_eq!(ctl.stop(&mut rec), Err(Error::Power));
    assert!(ctl.is_enabled());
    assert!(ctl.platform().irq_enabled);
    assert_eq!(ctl.state(), LifecycleState::Ready);
  }

  #[test]
  fn stop_releases_active_fingers() {
    let mut ctl = controller();
    let mut rec = Recorder::default();
    block_on(ctl.probe(None)).expect("probe");
    ctl.device().bus().push_record(&fixture::message(2, &[0xC0, 10, 10, 0, 3, 40]));
    block_on(ctl.wait_and_service(&mut rec));
    assert_eq!(ctl.device().slots().active_count(), 1);

    ctl.stop(&mut rec).expect("stop");
    assert_eq!(ctl.device().slots().active_count(), 0);
    assert_eq!(rec.contacts().last().map(|c| c.active), Some(false));
  }

  #[test]
  fn suspend_and_resume() {
    let mut ctl = controller();
    let mut rec = Recorder::default();
    block_on(ctl.probe(None)).expect("probe");
    ctl.suspend(&mut rec).expect("suspend");
    assert_eq!(ctl.state(), LifecycleState::Suspended);
    assert_eq!(block_on(ctl.wait_and_service(&mut rec)), DrainSummary::default());

    block_on(ctl.resume()).expect("resume");
    assert_eq!(ctl.state(), LifecycleState::Ready);
    assert!(ctl.platform().powered);
  }

  #[test]
  fn charger_waits_for_start() {
    let mut ctl = controller();
    let mut rec = Recorder::default();
    block_on(ctl.probe(None)).expect("probe");
    ctl.stop(&mut rec).expect("stop");
    ctl.inform_charger(true, 0);
    assert_eq!(block_on(ctl.poll(300)), Ok(false));
    block_on(ctl.start()).expect("start");
    assert_eq!(block_on(ctl.poll(600)), Ok(true));
  }

  #[test]
  fn firmware_update_rebuilds_layout() {
    let mut ctl = controller();
    block_on(ctl.probe(None)).expect("probe");
    let file = container(fixture::VERSION, &T7_CONFIG, &[0, 2, 0xAB, 0xCD], 0x123456);
    ctl.device().bus().boot_status.extend([CMD, FRAME, PASS]);
    config_crc_report(&mut ctl, 0x123456);

    let outcome = block_on(ctl.update_firmware(&file)).expect("update");
    assert!(outcome.flashed);
    assert_eq!(ctl.state(), LifecycleState::Ready);
    assert!(ctl.device().layout().is_some());
    assert!(ctl.platform().irq_enabled);
  }

  #[test]
  fn firmware_update_failure_disables() {
    let mut ctl = controller();
    let mut rec = Recorder::default();
    block_on(ctl.probe(None)).expect("probe");
    let file = container(fixture::VERSION, &T7_CONFIG, &[0, 2, 0xAB, 0xCD], 0x123456);
    ctl.device().bus().boot_status.extend([CMD, FRAME, FAIL]);

    assert_eq!(block_on(ctl.update_firmware(&file)).err(), Some(Error::Protocol(crate::ProtocolViolation::FrameCrcFail)));
    assert_eq!(ctl.state(), LifecycleState::Error);
    assert!(!ctl.is_enabled());
    assert!(!ctl.platform().powered);
    assert!(ctl.device().layout().is_none());
    assert_eq!(block_on(ctl.start()), Err(Error::NotReady));
    assert_eq!(block_on(ctl.wait_and_service(&mut rec)), DrainSummary::default());
  }

  #[test]
  fn firmware_update_needs_running_device() {
    let mut ctl = controller();
    assert_eq!(block_on(ctl.update_firmware(&[0, 2, 1, 2])), Err(Error::NotReady));
  }
}
