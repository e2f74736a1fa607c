use embedded_hal::digital::InputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use super::defs::*;
use super::f01::DeviceStatus;
use super::f11::{F11, F11_DATA_MAX};
use super::f12::{F12, F12_DATA_MAX};
use super::f1a::F1a;
use super::Rmi4;
use crate::bus::{count_read_error, Transport};
use crate::touch::Reporter;
use crate::Error;

/// Sensor reports handled per interrupt before yielding, even if ATTN
/// stays asserted.
const MAX_SERVICE_PASSES: u16 = 16;

/// What one interrupt service did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceSummary {
  /// Sensor reports read.
  pub passes: u16,
  /// Flushes that emitted at least one slot.
  pub frames: u16,
  /// The device came back from a spontaneous reset and was reinitialised.
  pub reset_seen: bool,
  /// The service stopped on a read failure.
  pub aborted: bool,
}

impl<T, E, ATTN, D> Rmi4<T, ATTN, D>
where
  T: Transport<Error = E>,
  ATTN: InputPin + Wait,
  D: DelayNs,
{
  /// `true` while the device holds ATTN low.
  pub fn attn_asserted(&mut self) -> bool {
    self.attn.is_low().unwrap_or(false)
  }

  /// Wait for ATTN to assert, then service the device. Returns at once with
  /// an empty summary while the device is stopped.
  pub async fn wait_and_service<R: Reporter + ?Sized>(&mut self, reporter: &mut R) -> ServiceSummary {
    if self.stopped {
      return ServiceSummary::default();
    }
    if self.attn.wait_for_low().await.is_err() {
      warn!("rmi4: ATTN wait failed");
    }
    self.service_interrupt(reporter).await
  }

  /// Read sensor reports until ATTN deasserts.
  ///
  /// Each pass reads F01 status and the interrupt status registers, then
  /// hands every flagged function its data. A set unconfigured bit means
  /// the device reset on its own: the host configuration is restored and
  /// the pass ends. Read failures are counted and end the service. Dirty
  /// slots are flushed once at the end.
  pub async fn service_interrupt<R: Reporter + ?Sized>(&mut self, reporter: &mut R) -> ServiceSummary {
    let mut summary = ServiceSummary::default();
    if self.layout.is_none() {
      warn!("rmi4: interrupt before discovery");
      return summary;
    }

    for _ in 0..MAX_SERVICE_PASSES {
      summary.passes += 1;
      if self.sensor_report(reporter, &mut summary).await.is_err() {
        count_read_error(&mut self.read_errors);
        summary.aborted = true;
        break;
      }
      if self.stopped || !self.attn_asserted() {
        break;
      }
    }

    if self.slots.has_dirty() && self.slots.flush(reporter) > 0 {
      summary.frames += 1;
    }
    summary
  }

  async fn sensor_report<R: Reporter + ?Sized>(
    &mut self,
    reporter: &mut R,
    summary: &mut ServiceSummary,
  ) -> Result<(), Error<E>> {
    let layout = self.layout.as_ref().ok_or(Error::NotReady)?;
    let (f01, f11, f12, f1a) = (layout.f01, layout.f11, layout.f12, layout.f1a);
    let regs = layout.irq_registers();

    let mut data = [0u8; 1 + MAX_INTR_REGISTERS];
    self.bus.read(f01.data_base, &mut data[..1 + regs]).await.map_err(Error::Transport)?;

    let status = DeviceStatus::from_bits(data[0]);
    if status.unconfigured() {
      info!("rmi4: spontaneous reset detected");
      summary.reset_seen = true;
      reporter.status(data[0]);
      if self.reinit(reporter).await.is_err() {
        error!("rmi4: failed to reinit device");
      }
      return Ok(());
    }

    let irq = &data[1..1 + regs];
    if let Some(f11) = f11.filter(|f| f.function.irq.is_pending(irq)) {
      self.fingers_on_2d = self.report_f11(&f11).await? > 0;
    }
    if let Some(f12) = f12.filter(|f| f.function.irq.is_pending(irq)) {
      self.fingers_on_2d = self.report_f12(&f12).await? > 0;
    }
    if let Some(f1a) = f1a.filter(|f| f.function.irq.is_pending(irq)) {
      self.report_f1a(&f1a, reporter).await?;
    }
    Ok(())
  }

  async fn report_f11(&mut self, f11: &F11) -> Result<u8, Error<E>> {
    let mut data = [0u8; F11_DATA_MAX];
    let len = f11.data_len();
    self.bus.read(f11.function.data_base, &mut data[..len]).await.map_err(Error::Transport)?;
    Ok(f11.decode(&data[..len], &self.config, &mut self.slots))
  }

  async fn report_f12(&mut self, f12: &F12) -> Result<u8, Error<E>> {
    let mut bitmap = [0u8; 2];
    let attention = match f12.attention() {
      Some((addr, len)) => {
        let len = (len as usize).min(bitmap.len());
        self.bus.read(addr, &mut bitmap[..len]).await.map_err(Error::Transport)?;
        Some(&bitmap[..len])
      }
      None => None,
    };

    let objects = f12.objects_to_process(attention, &self.slots) as usize;
    if objects == 0 {
      return Ok(0);
    }

    let mut records = [0u8; F12_DATA_MAX];
    let len = (objects * F12_FINGER_SIZE).min(F12_DATA_MAX);
    self.bus.read(f12.records(), &mut records[..len]).await.map_err(Error::Transport)?;
    Ok(f12.decode(&records[..len], &self.config, &mut self.slots))
  }

  async fn report_f1a<R: Reporter + ?Sized>(&mut self, f1a: &F1a, reporter: &mut R) -> Result<(), Error<E>> {
    let mut data = [0u8; MAX_BUTTONS / 8];
    let len = f1a.data_len().min(data.len());
    self.bus.read(f1a.function.data_base, &mut data[..len]).await.map_err(Error::Transport)?;
    let sent = self.buttons.decode(f1a, &data[..len], self.fingers_on_2d, &self.config, reporter);
    if sent > 0 {
      reporter.sync();
    }
    Ok(())
  }
}
