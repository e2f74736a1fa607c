//! Probe, start/stop, soft reset and the 0D button toggle.
//!
//! The board [`Platform`] is borrowed per call. Everything that rewrites the
//! device runs with the ATTN interrupt masked through an [`IrqGuard`].

use embedded_hal::digital::InputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use super::defs::*;
use super::{ProductInfo, Rmi4};
use crate::bus::Transport;
use crate::platform::{IrqGuard, Platform};
use crate::touch::Reporter;
use crate::Error;

impl<T, E, ATTN, D> Rmi4<T, ATTN, D>
where
  T: Transport<Error = E>,
  ATTN: InputPin + Wait,
  D: DelayNs,
{
  /// Power the device, discover it and unmask its interrupt.
  ///
  /// Power is removed again if discovery or the interrupt flush fails.
  pub async fn probe<P: Platform>(&mut self, platform: &mut P) -> Result<ProductInfo, Error<E>> {
    platform.set_power(true)?;
    self.bus.invalidate();
    self.delay.delay_ms(HW_RESET_TIME_MS).await;

    match self.probe_inner().await {
      Ok(product) => {
        platform.enable_irq();
        self.stopped = false;
        Ok(product)
      }
      Err(e) => {
        error!("rmi4: probe failed");
        if platform.set_power(false).is_err() {
          warn!("rmi4: failed to power off after probe");
        }
        self.bus.invalidate();
        Err(e)
      }
    }
  }

  async fn probe_inner(&mut self) -> Result<ProductInfo, Error<E>> {
    let product = self.discover().await?.product;
    self.clear_pending_irqs().await?;
    Ok(product)
  }

  /// Mask the interrupt, power down and release every contact. No-op when
  /// already stopped. If power cannot be removed the interrupt is unmasked
  /// again and the device stays started.
  pub fn stop<P: Platform, R: Reporter + ?Sized>(&mut self, platform: &mut P, reporter: &mut R) -> Result<(), Error<E>> {
    if self.stopped {
      debug!("rmi4: stop, but touch already off");
      return Ok(());
    }
    let mut irq = IrqGuard::new(platform);
    irq.set_power(false).map_err(|e| {
      error!("rmi4: failed to power off");
      e
    })?;
    irq.keep_disabled();

    self.stopped = true;
    self.sleeping = false;
    self.release_all(reporter);
    self.bus.invalidate();
    Ok(())
  }

  /// Power up and restore the host configuration. No-op when already
  /// started.
  pub async fn start<P: Platform, R: Reporter + ?Sized>(
    &mut self,
    platform: &mut P,
    reporter: &mut R,
  ) -> Result<(), Error<E>> {
    if !self.stopped {
      debug!("rmi4: start, but touch already on");
      return Ok(());
    }
    if self.layout.is_none() {
      return Err(Error::NotReady);
    }
    platform.set_power(true)?;
    self.bus.invalidate();
    self.delay.delay_ms(HW_RESET_TIME_MS).await;
    self.stopped = false;

    let result = self.reinit(reporter).await;
    if result.is_err() {
      error!("rmi4: failed to restore configuration on start");
    }
    platform.enable_irq();
    result
  }

  /// Soft reset through F01 and discover the device again.
  pub async fn reset<P: Platform, R: Reporter + ?Sized>(
    &mut self,
    platform: &mut P,
    reporter: &mut R,
  ) -> Result<(), Error<E>> {
    let _irq = IrqGuard::new(platform);
    self.release_all(reporter);
    self.reset_command().await?;
    self.discover().await.map(|_| ())
  }

  /// Enable or disable the F1A interrupt source. Buttons held when they are
  /// disabled are released.
  pub async fn set_buttons_enabled<R: Reporter + ?Sized>(&mut self, enable: bool, reporter: &mut R) -> Result<(), Error<E>> {
    if enable == self.buttons_enabled {
      return Ok(());
    }
    let layout = self.layout.as_ref().ok_or(Error::NotReady)?;
    let f1a = layout.f1a.ok_or(Error::MissingObject(Function::Buttons.into()))?;
    let (f01, regs) = (layout.f01, layout.irq_registers());

    for reg in 0..regs {
      let mask = f1a.function.irq.mask_in(reg);
      if mask == 0 {
        continue;
      }
      let addr = f01.control_base + 1 + reg as u16;
      let mut enables = [0u8; 1];
      self.bus.read(addr, &mut enables).await.map_err(Error::Transport)?;
      if enable {
        enables[0] |= mask;
      } else {
        enables[0] &= !mask;
      }
      self.bus.write(addr, &enables).await.map_err(Error::Transport)?;
    }

    if !enable && self.buttons.release_all(&self.config, reporter) > 0 {
      reporter.sync();
    }
    info!("rmi4: 0D buttons {}", if enable { "enabled" } else { "disabled" });
    self.buttons_enabled = enable;
    Ok(())
  }
}
