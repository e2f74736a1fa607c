use bitfield_struct::bitfield;
use embedded_hal::digital::InputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use super::defs::*;
use super::pdt::FunctionDescriptor;
use super::Rmi4;
use crate::bus::Transport;
use crate::Error;

/// F01 data register 0.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceStatus {
  #[bits(4)]
  pub code: u8,
  #[bits(2)]
  __: u8,
  /// The device runs its bootloader, there is no valid firmware.
  pub flash_prog: bool,
  /// Set by the device after any reset until the host writes
  /// [`DeviceControl::configured`].
  pub unconfigured: bool,
}

/// F01 control register 0.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceControl {
  #[bits(2)]
  pub sleep_mode: u8,
  pub no_sleep: bool,
  #[bits(2)]
  __: u8,
  pub charger_connected: bool,
  pub report_rate: bool,
  pub configured: bool,
}

/// Identification read from the F01 query registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProductInfo {
  pub manufacturer_id: u8,
  pub product_props: u8,
  pub product_info: [u8; 2],
  /// Year, month, day.
  pub date_code: [u8; 3],
  pub tester_id: u16,
  pub serial_number: u16,
  pub product_id: [u8; F01_PRODUCT_ID_LEN],
  pub build_id: [u8; 3],
}

impl From<[u8; F01_QUERY_LEN]> for ProductInfo {
  fn from(q: [u8; F01_QUERY_LEN]) -> Self {
    let mut product_id = [0u8; F01_PRODUCT_ID_LEN];
    product_id.copy_from_slice(&q[F01_PRODUCT_ID..F01_PRODUCT_ID + F01_PRODUCT_ID_LEN]);
    let mut build_id = [0u8; 3];
    build_id.copy_from_slice(&q[F01_BUILD_ID..F01_BUILD_ID + 3]);
    Self {
      manufacturer_id: q[0],
      product_props: q[1],
      product_info: [q[2] & 0x7F, q[3] & 0x7F],
      date_code: [q[4] & 0x1F, q[5] & 0x0F, q[6] & 0x1F],
      tester_id: ((q[7] & 0x7F) as u16) << 8 | (q[8] & 0x7F) as u16,
      serial_number: ((q[9] & 0x7F) as u16) << 8 | (q[10] & 0x7F) as u16,
      product_id,
      build_id,
    }
  }
}

impl ProductInfo {
  /// Product ID up to the first NUL. Empty when it is not ASCII.
  pub fn product_id(&self) -> &str {
    let end = self.product_id.iter().position(|b| *b == 0).unwrap_or(F01_PRODUCT_ID_LEN);
    core::str::from_utf8(&self.product_id[..end]).unwrap_or("")
  }

  /// Firmware build number, little endian over three bytes.
  pub fn build(&self) -> u32 {
    u32::from_le_bytes([self.build_id[0], self.build_id[1], self.build_id[2], 0])
  }

  pub fn is_synaptics(&self) -> bool {
    self.manufacturer_id == MANUFACTURER_SYNAPTICS
  }
}

impl<T, E, ATTN, D> Rmi4<T, ATTN, D>
where
  T: Transport<Error = E>,
  ATTN: InputPin + Wait,
  D: DelayNs,
{
  pub(crate) fn f01(&self) -> Result<FunctionDescriptor, Error<E>> {
    self.layout.as_ref().map(|l| l.f01).ok_or(Error::NotReady)
  }

  pub async fn read_status(&mut self) -> Result<DeviceStatus, Error<E>> {
    let f01 = self.f01()?;
    self.read_status_at(f01.data_base).await
  }

  async fn read_status_at(&mut self, data_base: u16) -> Result<DeviceStatus, Error<E>> {
    let mut raw = [0u8; 1];
    self.bus.read(data_base, &mut raw).await.map_err(Error::Transport)?;
    Ok(DeviceStatus::from_bits(raw[0]))
  }

  /// Wait out a configuration CRC check, then latch the flash programming flag.
  pub(crate) async fn check_status_at(&mut self, data_base: u16) -> Result<DeviceStatus, Error<E>> {
    let mut status = self.read_status_at(data_base).await?;
    let mut waited = 0;
    while status.code() == STATUS_CRC_IN_PROGRESS {
      if waited >= CHECK_STATUS_TIMEOUT_MS {
        error!("rmi4: CRC check still running after {} ms", waited);
        return Err(Error::Timeout);
      }
      self.delay.delay_ms(CHECK_STATUS_POLL_MS).await;
      waited += CHECK_STATUS_POLL_MS;
      status = self.read_status_at(data_base).await?;
    }
    self.flash_prog = status.flash_prog();
    Ok(status)
  }

  pub async fn check_status(&mut self) -> Result<DeviceStatus, Error<E>> {
    let f01 = self.f01()?;
    self.check_status_at(f01.data_base).await
  }

  pub async fn read_control(&mut self) -> Result<DeviceControl, Error<E>> {
    let f01 = self.f01()?;
    let mut raw = [0u8; 1];
    self.bus.read(f01.control_base, &mut raw).await.map_err(Error::Transport)?;
    Ok(DeviceControl::from_bits(raw[0]))
  }

  async fn update_control<F>(&mut self, f: F) -> Result<DeviceControl, Error<E>>
  where
    F: FnOnce(DeviceControl) -> DeviceControl,
  {
    let f01 = self.f01()?;
    let ctrl = f(self.read_control().await?);
    self.bus.write(f01.control_base, &[ctrl.into_bits()]).await.map_err(Error::Transport)?;
    Ok(ctrl)
  }

  /// Clear the unconfigured flag so a later spontaneous reset can be seen.
  pub(crate) async fn set_configured(&mut self) -> Result<(), Error<E>> {
    self.update_control(|c| c.with_configured(true)).await.map(|_| ())
  }

  /// Write the non-zero interrupt enable registers.
  pub(crate) async fn write_irq_enables(&mut self, f01: &FunctionDescriptor, masks: &[u8]) -> Result<(), Error<E>> {
    for (reg, mask) in masks.iter().enumerate() {
      if *mask == 0 {
        continue;
      }
      debug!("rmi4: interrupt enable {} = {}", reg, mask);
      let addr = f01.control_base + 1 + reg as u16;
      self.bus.write(addr, &[*mask]).await.map_err(Error::Transport)?;
    }
    Ok(())
  }

  /// Read and discard the interrupt status registers.
  pub(crate) async fn clear_pending_irqs(&mut self) -> Result<(), Error<E>> {
    let Some(layout) = self.layout.as_ref() else {
      return Err(Error::NotReady);
    };
    let addr = layout.f01.data_base + 1;
    let len = layout.functions.irq_registers().clamp(1, MAX_INTR_REGISTERS);
    let mut status = [0u8; MAX_INTR_REGISTERS];
    self.bus.read(addr, &mut status[..len]).await.map_err(Error::Transport)
  }

  pub(crate) async fn read_product(&mut self, f01: &FunctionDescriptor) -> Result<ProductInfo, Error<E>> {
    let mut query = [0u8; F01_QUERY_LEN];
    self.bus.read(f01.query_base, &mut query).await.map_err(Error::Transport)?;
    let product = ProductInfo::from(query);
    if !product.is_synaptics() {
      warn!("rmi4: non-Synaptics device, manufacturer {}", product.manufacturer_id);
    }
    info!("rmi4: product {} build {}", product.product_id(), product.build());
    Ok(product)
  }

  /// Put the sensor to sleep. Interrupts stay configured.
  pub async fn sleep(&mut self) -> Result<(), Error<E>> {
    self
      .update_control(|c| c.with_sleep_mode(SLEEP_MODE_SENSOR_SLEEP).with_no_sleep(false))
      .await
      .map_err(|e| {
        error!("rmi4: failed to enter sleep mode");
        e
      })?;
    self.sleeping = true;
    Ok(())
  }

  pub async fn wake(&mut self) -> Result<(), Error<E>> {
    self
      .update_control(|c| c.with_sleep_mode(SLEEP_MODE_NORMAL).with_no_sleep(false))
      .await
      .map_err(|e| {
        error!("rmi4: failed to wake from sleep mode");
        e
      })?;
    self.sleeping = false;
    Ok(())
  }

  /// Tell the firmware whether a charger is connected. It switches to its
  /// charger noise profile while the bit is set.
  pub async fn set_charger(&mut self, connected: bool) -> Result<(), Error<E>> {
    let ctrl = self.update_control(|c| c.with_charger_connected(connected)).await?;
    info!("rmi4: device control {} charger {}", ctrl.into_bits(), connected);
    Ok(())
  }

  /// Issue a soft reset through the F01 command register.
  pub(crate) async fn reset_command(&mut self) -> Result<(), Error<E>> {
    let f01 = self.f01()?;
    self.bus.write(f01.command_base, &[F01_RESET_COMMAND]).await.map_err(Error::Transport)?;
    self.delay.delay_ms(HW_RESET_TIME_MS).await;
    self.bus.invalidate();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::super::fixture;
  use super::*;
  use crate::Rmi4Config;
  use embassy_futures::block_on;

  #[test]
  fn product_info_from_query() {
    let mut q = [0u8; F01_QUERY_LEN];
    q[0] = 1;
    q[4] = 0x2D;
    q[5] = 0x13;
    q[9] = 0x81;
    q[10] = 0x02;
    q[11..16].copy_from_slice(b"S5000");
    q[18..21].copy_from_slice(&[0x34, 0x12, 0x00]);
    let info = ProductInfo::from(q);
    assert!(info.is_synaptics());
    assert_eq!(info.date_code, [0x0D, 0x03, 0]);
    assert_eq!(info.serial_number, 0x0102);
    assert_eq!(info.product_id(), "S5000");
    assert_eq!(info.build(), 0x1234);
  }

  #[test]
  fn status_bits() {
    let status = DeviceStatus::from_bits(0xC6);
    assert_eq!(status.code(), STATUS_CRC_IN_PROGRESS);
    assert!(status.flash_prog());
    assert!(status.unconfigured());
  }

  #[test]
  fn crc_check_wait_is_bounded() {
    let mut dev = fixture::discovered_f11(Rmi4Config::default());
    dev.bus().mem[fixture::F01_DATA as usize] = STATUS_CRC_IN_PROGRESS;
    let before = dev.delay.elapsed_ms;
    assert_eq!(block_on(dev.check_status()), Err(Error::Timeout));
    assert_eq!(dev.delay.elapsed_ms - before, CHECK_STATUS_TIMEOUT_MS as u64);
  }

  #[test]
  fn flash_programming_is_latched() {
    let mut dev = fixture::discovered_f11(Rmi4Config::default());
    dev.bus().mem[fixture::F01_DATA as usize] = 0x40;
    assert!(block_on(dev.check_status()).expect("status").flash_prog());
    assert!(dev.in_flash_mode());
  }

  #[test]
  fn sleep_and_wake_rewrite_sleep_mode_only() {
    let mut dev = fixture::discovered_f11(Rmi4Config::default());
    let ctrl = fixture::F01_CTRL as usize;
    dev.bus().mem[ctrl] = 0x84 | 0x20;

    block_on(dev.sleep()).expect("sleep");
    assert_eq!(dev.bus().mem[ctrl], 0x81 | 0x20);
    assert!(dev.is_sleeping());

    block_on(dev.wake()).expect("wake");
    assert_eq!(dev.bus().mem[ctrl], 0x80 | 0x20);
    assert!(!dev.is_sleeping());
  }

  #[test]
  fn charger_bit_toggles() {
    let mut dev = fixture::discovered_f11(Rmi4Config::default());
    let ctrl = fixture::F01_CTRL as usize;
    block_on(dev.set_charger(true)).expect("charger");
    assert_eq!(dev.bus().mem[ctrl] & 0x20, 0x20);
    block_on(dev.set_charger(false)).expect("charger");
    assert_eq!(dev.bus().mem[ctrl] & 0x20, 0);
  }
}
