//! Synaptics RMI4 driver core.
//!
//! [`Rmi4`] owns the register transport, the ATTN line and a delay source.
//! Discovery scans the page description tables, sets up the 2D sensor (F11
//! or F12) and the 0D buttons (F1A), enables their interrupt sources in F01
//! and marks the device configured. The result is kept as one
//! [`Rmi4Layout`], rebuilt as a whole whenever the device is reset.
//!
//! - `pdt`: page description table scan and interrupt source numbering
//! - `f01`: device status, control and identification
//! - `f11`, `f12`, `f1a`: per-function decoders
//! - `report`: interrupt service
//! - `power`: probe, start/stop, soft reset and the 0D button toggle

pub mod defs;
mod f01;
mod f11;
mod f12;
mod f1a;
pub mod pdt;
mod power;
mod report;

use embedded_hal::digital::InputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use crate::bus::Transport;
use crate::touch::{Reporter, Slots};
use crate::{Error, Rmi4Config};

pub use defs::{Function, MAX_FUNCTIONS, MAX_INTR_REGISTERS, PAGES_TO_SERVICE};
pub use f01::{DeviceControl, DeviceStatus, ProductInfo};
pub use f11::F11;
pub use f12::F12;
pub use f1a::{ButtonState, F1a};
pub use pdt::{FunctionDescriptor, FunctionTable, IrqSources};
pub use report::ServiceSummary;

/// Discovered device layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rmi4Layout {
  pub functions: FunctionTable,
  pub f01: FunctionDescriptor,
  pub product: ProductInfo,
  pub f11: Option<F11>,
  pub f12: Option<F12>,
  pub f1a: Option<F1a>,
  /// Interrupt enable registers as written to F01.
  pub irq_enable: [u8; MAX_INTR_REGISTERS],
}

impl Rmi4Layout {
  /// Sensor coordinate maxima of the 2D function.
  pub fn sensor_max(&self) -> Option<(u16, u16)> {
    match (self.f12, self.f11) {
      (Some(f12), _) => Some((f12.max_x, f12.max_y)),
      (None, Some(f11)) => Some((f11.max_x, f11.max_y)),
      _ => None,
    }
  }

  fn irq_registers(&self) -> usize {
    self.functions.irq_registers().min(MAX_INTR_REGISTERS)
  }
}

/// Synaptics RMI4 controller.
pub struct Rmi4<T, ATTN, D> {
  bus: T,
  attn: ATTN,
  delay: D,
  config: Rmi4Config,
  layout: Option<Rmi4Layout>,
  slots: Slots,
  buttons: ButtonState,
  fingers_on_2d: bool,
  buttons_enabled: bool,
  stopped: bool,
  sleeping: bool,
  flash_prog: bool,
  read_errors: u32,
}

impl<T, ATTN, D> Rmi4<T, ATTN, D> {
  /// The device starts out stopped, see [`Rmi4::probe`].
  pub fn new(bus: T, attn: ATTN, delay: D, config: Rmi4Config) -> Self {
    Self {
      bus,
      attn,
      delay,
      config,
      layout: None,
      slots: Slots::new(),
      buttons: ButtonState::default(),
      fingers_on_2d: false,
      buttons_enabled: false,
      stopped: true,
      sleeping: false,
      flash_prog: false,
      read_errors: 0,
    }
  }

  pub fn config(&self) -> &Rmi4Config {
    &self.config
  }

  pub fn layout(&self) -> Option<&Rmi4Layout> {
    self.layout.as_ref()
  }

  pub fn product(&self) -> Option<ProductInfo> {
    self.layout.as_ref().map(|l| l.product)
  }

  pub fn slots(&self) -> &Slots {
    &self.slots
  }

  pub fn buttons(&self) -> &ButtonState {
    &self.buttons
  }

  pub fn is_stopped(&self) -> bool {
    self.stopped
  }

  pub fn is_sleeping(&self) -> bool {
    self.sleeping
  }

  /// The device reported it has no valid firmware.
  pub fn in_flash_mode(&self) -> bool {
    self.flash_prog
  }

  pub fn fingers_on_2d(&self) -> bool {
    self.fingers_on_2d
  }

  pub fn buttons_enabled(&self) -> bool {
    self.buttons_enabled
  }

  /// Interrupt-time read failures seen so far.
  pub fn read_errors(&self) -> u32 {
    self.read_errors
  }

  pub fn bus(&mut self) -> &mut T {
    &mut self.bus
  }

  pub fn release(self) -> (T, ATTN, D) {
    (self.bus, self.attn, self.delay)
  }

  /// Release all fingers and buttons.
  pub fn release_all<R: Reporter + ?Sized>(&mut self, reporter: &mut R) {
    self.slots.release_all(reporter);
    if self.buttons.release_all(&self.config, reporter) > 0 {
      reporter.sync();
    }
    self.fingers_on_2d = false;
  }
}

impl<T, E, ATTN, D> Rmi4<T, ATTN, D>
where
  T: Transport<Error = E>,
  ATTN: InputPin + Wait,
  D: DelayNs,
{
  /// Scan the function tables, set up the supported functions, enable their
  /// interrupts and mark the device configured.
  ///
  /// A device in flash programming mode is left with only F01 set up. On
  /// failure no layout is kept.
  pub async fn discover(&mut self) -> Result<&Rmi4Layout, Error<E>> {
    self.layout = None;
    let functions = pdt::scan(&mut self.bus).await?;
    let f01 = functions
      .find(Function::DeviceControl)
      .copied()
      .ok_or(Error::MissingObject(Function::DeviceControl.into()))?;
    self.check_status_at(f01.data_base).await?;

    let mut layout = Rmi4Layout {
      functions,
      f01,
      product: ProductInfo::default(),
      f11: None,
      f12: None,
      f1a: None,
      irq_enable: [0; MAX_INTR_REGISTERS],
    };

    if self.flash_prog {
      warn!("rmi4: device in flash programming mode");
    } else {
      for fd in layout.functions.iter().filter(|f| f.irq.count > 0) {
        match fd.function() {
          Some(Function::Sensor2d) => {
            layout.f11 = Some(F11::init(&mut self.bus, *fd).await.map_err(Error::Transport)?);
          }
          Some(Function::Sensor2dObjects) => {
            layout.f12 = Some(F12::init(&mut self.bus, *fd).await.map_err(Error::Transport)?);
          }
          Some(Function::Buttons) => {
            layout.f1a = Some(F1a::init(&mut self.bus, *fd, &self.config).await.map_err(Error::Transport)?);
          }
          _ => {}
        }
      }
    }

    let handled = [
      layout.f11.map(|f| f.function.irq),
      layout.f12.map(|f| f.function.irq),
      layout.f1a.map(|f| f.function.irq),
    ];
    for irq in handled.into_iter().flatten() {
      irq.enable_in(&mut layout.irq_enable);
    }

    layout.product = self.read_product(&f01).await?;
    let regs = layout.irq_registers();
    self.write_irq_enables(&f01, &layout.irq_enable[..regs]).await?;
    self.buttons_enabled = layout.f1a.is_some();
    self.layout = Some(layout);

    if let Err(e) = self.set_configured().await {
      self.layout = None;
      return Err(e);
    }
    self.layout.as_ref().ok_or(Error::NotReady)
  }

  /// Restore the host-side configuration after the device lost it: report
  /// enables, interrupt enables and the configured flag. Contacts held
  /// before are released.
  pub async fn reinit<R: Reporter + ?Sized>(&mut self, reporter: &mut R) -> Result<(), Error<E>> {
    self.release_all(reporter);
    let layout = self.layout.as_ref().ok_or(Error::NotReady)?;
    let (f01, f12, f1a) = (layout.f01, layout.f12, layout.f1a);
    let mut masks = layout.irq_enable;
    let regs = layout.irq_registers();

    if let (Some(f1a), false) = (f1a, self.buttons_enabled) {
      let irq = f1a.function.irq;
      for (reg, mask) in masks.iter_mut().enumerate() {
        *mask &= !irq.mask_in(reg);
      }
    }
    if let Some(f12) = f12 {
      self.bus.write(f12.report_enable, &[defs::F12_REPORT_ENABLES]).await.map_err(Error::Transport)?;
    }
    self.write_irq_enables(&f01, &masks[..regs]).await?;
    self.set_configured().await
  }
}


#[cfg(test)]
mod tests {
  use super::fixture;
  use super::*;
  use crate::bus::mock::BusFault;
  use crate::touch::recorder::Recorder;
  use crate::DiscoveryError;
  use embassy_futures::block_on;

  #[test]
  fn discovery_sets_up_functions_and_interrupts() {
    let mut dev = fixture::f11_device(Rmi4Config::default().with_buttons(&fixture::BUTTONS));
    let layout = block_on(dev.discover()).expect("discovery").clone();

    assert!(layout.f11.is_some());
    assert!(layout.f12.is_none());
    assert_eq!(layout.f1a.map(|f| (f.buttons, f.mapped)), Some((2, 2)));
    assert_eq!(layout.sensor_max(), Some((1023, 2047)));
    assert_eq!(layout.irq_enable[0], 0x06);
    assert_eq!(layout.product.product_id(), "S5000");

    assert_eq!(dev.bus().mem[fixture::F01_CTRL as usize + 1], 0x06);
    assert_eq!(dev.bus().mem[fixture::F01_CTRL as usize] & 0x80, 0x80);
    assert!(dev.buttons_enabled());
  }

  #[test]
  fn f12_device_on_second_page() {
    let dev = fixture::discovered_f12(Rmi4Config::default());
    let layout = dev.layout().expect("layout");
    assert_eq!(layout.f12.map(|f| f.fingers), Some(10));
    assert_eq!(layout.irq_enable[0], 0x06);
    assert_eq!(layout.sensor_max(), Some((1439, 2559)));
  }

  #[test]
  fn flash_programming_mode_skips_function_setup() {
    let mut dev = fixture::f11_device(Rmi4Config::default());
    dev.bus().mem[fixture::F01_DATA as usize] = 0x40;
    let layout = block_on(dev.discover()).expect("discovery").clone();
    assert!(dev.in_flash_mode());
    assert!(layout.f11.is_none());
    assert_eq!(layout.irq_enable, [0; MAX_INTR_REGISTERS]);
    assert_eq!(dev.bus().writes_to(fixture::F01_CTRL + 1), 0);
  }

  #[test]
  fn missing_f01_is_reported() {
    let mut dev = Rmi4::new(
      crate::bus::mock::MockBus::new(),
      crate::platform::mock::MockChg::high(),
      crate::platform::mock::MockDelay::default(),
      Rmi4Config::default(),
    );
    assert_eq!(block_on(dev.discover()).err(), Some(Error::MissingObject(0x01)));
    assert!(dev.layout().is_none());
  }

  #[test]
  fn failed_scan_drops_layout() {
    let mut dev = fixture::discovered_f11(Rmi4Config::default());
    dev.bus().fail_reads = 1;
    assert_eq!(block_on(dev.discover()).err(), Some(Error::Discovery(DiscoveryError::TransportFailure(BusFault))));
    assert!(dev.layout().is_none());
  }

  #[test]
  fn reinit_rewrites_enables_and_releases_contacts() {
    let mut dev = fixture::discovered_f12(Rmi4Config::default());
    let mut rec = Recorder::default();
    dev.slots.press(0, crate::Contact::new(1, 2, 3, 4));
    dev.bus().mem[fixture::F01_CTRL as usize] = 0;
    let enables = dev.bus().writes_to(fixture::F12_CTRL + 3);

    block_on(dev.reinit(&mut rec)).expect("reinit");
    assert_eq!(rec.contacts().len(), 1);
    assert!(!rec.contacts()[0].active);
    assert_eq!(dev.bus().writes_to(fixture::F12_CTRL + 3), enables + 1);
    assert_eq!(dev.bus().mem[fixture::F01_CTRL as usize], 0x80);
  }
}
