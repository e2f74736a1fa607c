//! Atmel maXTouch driver core.
//!
//! [`Mxt`] owns the register transport, the CHG line and a delay source. The
//! object table and report-ID table are kept together in a [`Layout`] that is
//! replaced as a whole on every discovery, so nothing ever addresses an object
//! through a table from before a reset or reflash.
//!
//! Functionality is split across modules that each add an `impl` block:
//!
//! - `rw`: object register access, messages and T6 commands
//! - `event`: interrupt drain loop and message routing
//! - `touch`, `keys`, `status`: per-object message decoders
//! - `config`: config CRC and config blob installation
//! - `charger`: debounced charger notification
//! - `bootloader`: firmware flashing
//! - `diagnostic`: T37 reference and delta scans

mod bootloader;
mod charger;
mod config;
pub mod defs;
mod diagnostic;
mod event;
mod keys;
pub mod report_id;
mod rw;
mod status;
pub mod table;
mod touch;

use embedded_hal::digital::InputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use crate::bus::Transport;
use crate::touch::{Reporter, Slots};
use crate::{Config, Error};

pub use bootloader::{BootState, BootloaderId};
pub use charger::ChargerMode;
pub use config::{ConfigEntries, ConfigEntry, ConfigSync};
pub use defs::{ObjectType, MAX_OBJECTS, NO_MESSAGE};
pub use diagnostic::{DiagnosticMode, ScanSummary, REFERENCE_MAX, REFERENCE_MIN, REFERENCE_OFFSET};
pub use event::{DrainSummary, Message};
pub use keys::KeyState;
pub use report_id::{Handler, ReportIdEntry, ReportIdTable};
pub use status::DeviceStatus;
pub use table::{CapabilityBlock, InfoBlock, ObjectTable};

use charger::Charger;

/// Discovered device layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
  pub objects: ObjectTable,
  pub report_ids: ReportIdTable,
}

impl Layout {
  pub fn new(objects: ObjectTable) -> Self {
    let report_ids = ReportIdTable::build(&objects);
    Self { objects, report_ids }
  }
}

/// Aggregates from the extra touch data object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchMetrics {
  /// Summed touch area reported with the last frame.
  pub sum_size: u16,
  /// Touched channel count. Only tracked while not charging.
  pub touch_channels: u16,
  /// Palm suppression active.
  pub palm: bool,
}

/// maXTouch controller.
pub struct Mxt<T, CHG, D> {
  bus: T,
  chg: CHG,
  delay: D,
  config: Config,
  layout: Option<Layout>,
  slots: Slots,
  keys: KeyState,
  charger: Charger,
  metrics: TouchMetrics,
  self_test: Option<[u8; 4]>,
  read_errors: u32,
}

impl<T, CHG, D> Mxt<T, CHG, D> {
  pub fn new(bus: T, chg: CHG, delay: D, config: Config) -> Self {
    Self {
      bus,
      chg,
      delay,
      config,
      layout: None,
      slots: Slots::new(),
      keys: KeyState::default(),
      charger: Charger::new(),
      metrics: TouchMetrics::default(),
      self_test: None,
      read_errors: 0,
    }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn layout(&self) -> Option<&Layout> {
    self.layout.as_ref()
  }

  pub fn info(&self) -> Option<InfoBlock> {
    self.layout.as_ref().map(|l| l.objects.info)
  }

  pub fn slots(&self) -> &Slots {
    &self.slots
  }

  pub fn metrics(&self) -> TouchMetrics {
    self.metrics
  }

  /// Result bytes of the last failed self-test, if any.
  pub fn self_test_failure(&self) -> Option<[u8; 4]> {
    self.self_test
  }

  /// Drain-loop read failures seen so far.
  pub fn read_errors(&self) -> u32 {
    self.read_errors
  }

  pub fn bus(&mut self) -> &mut T {
    &mut self.bus
  }

  /// Drop the layout. Required after anything that changes the firmware.
  pub fn forget_layout(&mut self) {
    self.layout = None;
  }

  pub fn release(self) -> (T, CHG, D) {
    (self.bus, self.chg, self.delay)
  }
}

impl<T, E, CHG, D> Mxt<T, CHG, D>
where
  T: Transport<Error = E>,
  CHG: InputPin + Wait,
  D: DelayNs,
{
  /// Read the object table and rebuild the layout. On failure the previous
  /// layout is discarded as well.
  pub async fn discover(&mut self) -> Result<&Layout, Error<E>> {
    self.layout = None;
    let objects = table::discover(&mut self.bus).await?;
    Ok(self.layout.insert(Layout::new(objects)))
  }

  /// Check the information block CRC against a fresh read.
  pub async fn verify_info_crc(&mut self) -> Result<u32, Error<E>> {
    let info = self.info().ok_or(Error::NotReady)?;
    table::verify_info_crc(&mut self.bus, &info).await
  }

  /// `true` while the device holds CHG low.
  pub fn chg_asserted(&mut self) -> bool {
    self.chg.is_low().unwrap_or(false)
  }

  /// Let the device settle for `settle_ms`, then poll CHG until it goes low.
  pub async fn wait_for_chg(&mut self, settle_ms: u32) -> Result<(), Error<E>> {
    self.delay.delay_ms(settle_ms).await;
    let mut polls = 0;
    while !self.chg_asserted() {
      if polls >= defs::CHG_POLL_LIMIT {
        error!("mxt: CHG stayed high after {} polls", polls);
        return Err(Error::Timeout);
      }
      self.delay.delay_ms(defs::CHG_POLL_MS).await;
      polls += 1;
    }
    Ok(())
  }

  /// Release all fingers and keys.
  pub fn release_all<R: Reporter + ?Sized>(&mut self, reporter: &mut R) {
    self.slots.release_all(reporter);
    self.release_keys(reporter);
  }
}


#[cfg(test)]
mod tests {
  use super::fixture;
  use super::*;
  use crate::bus::mock::BusFault;
  use crate::platform::mock::MockChg;
  use embassy_futures::block_on;

  #[test]
  fn discovery_builds_layout_and_dispatch() {
    let mut dev = fixture::device(Config::default());
    let layout = block_on(dev.discover()).expect("discovery");
    assert_eq!(layout.objects.max_report_id(), 16);
    assert_eq!(layout.report_ids.first_of(9), Some(2));
    assert_eq!(block_on(dev.verify_info_crc()).map(|_| ()), Ok(()));
  }

  #[test]
  fn failed_rediscovery_drops_old_layout() {
    let mut dev = fixture::discovered(Config::default());
    dev.bus().fail_reads = 1;
    assert_eq!(block_on(dev.discover()).err(), Some(Error::Discovery(crate::DiscoveryError::TransportFailure(BusFault))));
    assert!(dev.layout().is_none());
    assert_eq!(block_on(dev.verify_info_crc()), Err(Error::NotReady));
  }

  #[test]
  fn wait_for_chg_times_out() {
    let mut dev = fixture::device(Config::default());
    dev.chg = MockChg::high();
    assert_eq!(block_on(dev.wait_for_chg(10)), Err(Error::Timeout));
    assert_eq!(dev.delay.elapsed_ms, 10 + (defs::CHG_POLL_LIMIT * defs::CHG_POLL_MS) as u64);
  }
}
