use core::ops::{Deref, DerefMut};

/// Regulator or GPIO failure while switching touch power.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PowerError;

/// Board services the lifecycle controller needs: touch power and masking of
/// the controller's interrupt line.
pub trait Platform {
  fn set_power(&mut self, on: bool) -> Result<(), PowerError>;

  fn enable_irq(&mut self);

  fn disable_irq(&mut self);
}

/// Masks the interrupt line for as long as it lives.
///
/// The line is unmasked again when the guard drops, including on early
/// returns through `?`. [`IrqGuard::keep_disabled`] consumes the guard without
/// unmasking, for paths that end with the device stopped.
pub struct IrqGuard<'a, P: Platform> {
  platform: &'a mut P,
  rearm: bool,
}

impl<'a, P: Platform> IrqGuard<'a, P> {
  pub fn new(platform: &'a mut P) -> Self {
    platform.disable_irq();
    Self { platform, rearm: true }
  }

  pub fn keep_disabled(mut self) {
    self.rearm = false;
  }
}

impl<P: Platform> Deref for IrqGuard<'_, P> {
  type Target = P;

  fn deref(&self) -> &P {
    self.platform
  }
}

impl<P: Platform> DerefMut for IrqGuard<'_, P> {
  fn deref_mut(&mut self) -> &mut P {
    self.platform
  }
}

impl<P: Platform> Drop for IrqGuard<'_, P> {
  fn drop(&mut self) {
    if self.rearm {
      self.platform.enable_irq();
    }
  }
}
