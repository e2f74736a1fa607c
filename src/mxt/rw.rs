use embedded_hal::digital::InputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use super::defs::*;
use super::event::Message;
use super::table::CapabilityBlock;
use super::Mxt;
use crate::bus::Transport;
use crate::{Error, ValidationError};

impl<T, E, CHG, D> Mxt<T, CHG, D>
where
  T: Transport<Error = E>,
  CHG: InputPin + Wait,
  D: DelayNs,
{
  /// Look up an object in the current layout.
  pub fn object(&self, type_id: u8) -> Result<CapabilityBlock, Error<E>> {
    let layout = self.layout.as_ref().ok_or(Error::NotReady)?;
    layout.objects.get(type_id).copied().ok_or_else(|| {
      error!("mxt: T{} not present", type_id);
      Error::MissingObject(type_id)
    })
  }

  fn object_register(&self, type_id: u8, offset: u16) -> Result<u16, Error<E>> {
    let object = self.object(type_id)?;
    if offset >= object.span() {
      error!("mxt: T{} offset {} outside object", type_id, offset);
      return Err(ValidationError::OffsetOutOfRange { object: type_id, offset }.into());
    }
    Ok(object.start_address + offset)
  }

  pub async fn read_object(&mut self, t: ObjectType, offset: u16) -> Result<u8, Error<E>> {
    let reg = self.object_register(t.into(), offset)?;
    let mut b = [0u8; 1];
    self.bus.read(reg, &mut b).await.map_err(Error::Transport)?;
    Ok(b[0])
  }

  pub async fn write_object(&mut self, t: ObjectType, offset: u16, value: u8) -> Result<(), Error<E>> {
    let reg = self.object_register(t.into(), offset)?;
    self.bus.write(reg, &[value]).await.map_err(Error::Transport)
  }

  /// Read-modify-write of a single object register.
  pub(crate) async fn modify_object<F>(&mut self, t: ObjectType, offset: u16, f: F) -> Result<u8, Error<E>>
  where
    F: FnOnce(u8) -> u8,
  {
    let old = self.read_object(t, offset).await?;
    let new = f(old);
    if new != old {
      self.write_object(t, offset, new).await?;
    }
    Ok(new)
  }

  /// Read raw bytes at an absolute address.
  pub async fn read_mem(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Error<E>> {
    self.bus.read(addr, buf).await.map_err(Error::Transport)
  }

  /// Write raw bytes at an absolute address.
  pub async fn write_mem(&mut self, addr: u16, data: &[u8]) -> Result<(), Error<E>> {
    self.bus.write(addr, data).await.map_err(Error::Transport)
  }

  /// Pop one record from the message processor.
  pub async fn read_message(&mut self) -> Result<Message, Error<E>> {
    let t5 = self.object(ObjectType::MessageProcessor.into())?;
    let mut buf = [0u8; MESSAGE_SIZE];
    self.bus.read(t5.start_address, &mut buf).await.map_err(Error::Transport)?;
    Ok(Message::from(buf))
  }

  /// Read messages until one carries `report_id`, skipping others.
  pub async fn read_message_for(&mut self, report_id: u8) -> Result<Message, Error<E>> {
    let tries = self.max_report_id().max(1) as u16 * 2;
    for _ in 0..tries {
      let msg = self.read_message().await?;
      if msg.report_id == report_id {
        return Ok(msg);
      }
    }
    error!("mxt: no message for report id {}", report_id);
    Err(Error::Timeout)
  }

  /// Read until the message queue is empty so CHG can go high.
  pub async fn make_highchg(&mut self) -> Result<(), Error<E>> {
    let tries = self.max_report_id().max(1) as u16 * 2;
    for _ in 0..tries {
      if self.read_message().await?.report_id == NO_MESSAGE {
        return Ok(());
      }
    }
    error!("mxt: message queue does not drain");
    Err(Error::Busy)
  }

  pub(crate) fn max_report_id(&self) -> u8 {
    self.layout.as_ref().map_or(0, |l| l.objects.max_report_id())
  }

  /// Report ID of the command processor's status messages.
  pub(crate) fn status_report_id(&self) -> Result<u8, Error<E>> {
    let t6 = self.object(ObjectType::CommandProcessor.into())?;
    Ok(t6.max_report_id)
  }

  /// Software reset with `value` (`1` normal, `0xA5` into bootloader). Waits
  /// for CHG unless entering the bootloader.
  pub async fn reset(&mut self, value: u8) -> Result<(), Error<E>> {
    info!("mxt: reset ({})", value);
    self.write_object(ObjectType::CommandProcessor, COMMAND_RESET, value).await?;
    if value == BOOT_VALUE {
      self.delay.delay_ms(HW_RESET_TIME_MS).await;
      return Ok(());
    }
    self.wait_for_chg(SW_RESET_TIME_MS).await
  }

  /// Backup command: `0x55` commits to non-volatile memory, `0x33` stops
  /// message generation.
  pub async fn backup(&mut self, value: u8) -> Result<(), Error<E>> {
    self.write_object(ObjectType::CommandProcessor, COMMAND_BACKUPNV, value).await?;
    self.delay.delay_ms(BACKUP_TIME_MS).await;
    Ok(())
  }

  pub async fn calibrate(&mut self) -> Result<(), Error<E>> {
    self.write_object(ObjectType::CommandProcessor, COMMAND_CALIBRATE, 1).await
  }
}
