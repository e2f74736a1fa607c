//! Message drain.
//!
//! While CHG is asserted the message processor is read one record at a time
//! and every record is routed through the report-ID table to its decoder.
//! The drain is bounded by twice the number of report IDs, and a read failure
//! ends it.

use embedded_hal::digital::InputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use super::defs::*;
use super::report_id::{Handler, ReportIdEntry};
use super::Mxt;
use crate::bus::{count_read_error, Transport};
use crate::touch::Reporter;

/// Smallest drain budget, for tables with very few report IDs.
const MIN_DRAIN_RECORDS: u16 = 16;

/// One record popped from the message processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Message {
  pub report_id: u8,
  pub payload: [u8; MESSAGE_PAYLOAD],
}

impl From<[u8; MESSAGE_SIZE]> for Message {
  fn from(b: [u8; MESSAGE_SIZE]) -> Self {
    let mut payload = [0u8; MESSAGE_PAYLOAD];
    payload.copy_from_slice(&b[1..]);
    Self { report_id: b[0], payload }
  }
}

impl Message {
  pub fn is_empty(&self) -> bool {
    self.report_id == NO_MESSAGE
  }
}

/// What one interrupt service pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DrainSummary {
  /// Records routed to a decoder.
  pub records: u16,
  /// Flushes that emitted at least one slot.
  pub frames: u16,
  /// The command processor reported a reset.
  pub reset_seen: bool,
  /// The command processor reported normal operation.
  pub normal_mode: bool,
  /// The pass stopped on a read failure.
  pub aborted: bool,
}

impl<T, E, CHG, D> Mxt<T, CHG, D>
where
  T: Transport<Error = E>,
  CHG: InputPin + Wait,
  D: DelayNs,
{
  /// Wait for CHG to assert, then drain the message queue.
  pub async fn wait_and_service<R: Reporter + ?Sized>(&mut self, reporter: &mut R) -> DrainSummary {
    if self.chg.wait_for_low().await.is_err() {
      warn!("mxt: CHG wait failed");
    }
    self.service_interrupt(reporter).await
  }

  /// Drain the message queue after CHG asserted.
  ///
  /// Reads one record at a time until CHG deasserts or the queue returns the
  /// empty sentinel. Records with unknown report IDs are dropped. Nothing is
  /// returned as an error: a read failure is counted, logged with rate
  /// limiting and ends the pass. Slots still dirty at the end are flushed.
  pub async fn service_interrupt<R: Reporter + ?Sized>(&mut self, reporter: &mut R) -> DrainSummary {
    let mut summary = DrainSummary::default();
    let Some(layout) = self.layout.as_ref() else {
      warn!("mxt: interrupt before discovery");
      return summary;
    };
    let budget = (layout.report_ids.max_report_id() as u16 * 2).max(MIN_DRAIN_RECORDS);

    for _ in 0..budget {
      let msg = match self.read_message().await {
        Ok(msg) => msg,
        Err(_) => {
          count_read_error(&mut self.read_errors);
          summary.aborted = true;
          break;
        }
      };
      if msg.is_empty() {
        break;
      }

      let entry = self.layout.as_ref().and_then(|l| l.report_ids.lookup(msg.report_id));
      match entry {
        Some(entry) => {
          summary.records += 1;
          self.dispatch(entry, &msg, reporter, &mut summary).await;
        }
        None => trace!("mxt: dropping report id {}", msg.report_id),
      }

      if !self.chg_asserted() {
        break;
      }
    }

    if self.slots.has_dirty() && self.slots.flush(reporter) > 0 {
      summary.frames += 1;
    }
    summary
  }

  async fn dispatch<R: Reporter + ?Sized>(
    &mut self,
    entry: ReportIdEntry,
    msg: &Message,
    reporter: &mut R,
    summary: &mut DrainSummary,
  ) {
    let p = &msg.payload;
    match entry.handler {
      Handler::Status => {
        let status = self.handle_status(p[0], reporter);
        summary.reset_seen |= status.reset();
        if status.into_bits() == 0 {
          summary.normal_mode = true;
          if let Err(_e) = self.set_charger_config().await {
            error!("mxt: charger config after reset failed");
          }
        }
      }
      Handler::Touch => summary.frames += self.handle_touch(entry.local_index, p, reporter),
      Handler::Keys => self.handle_keys(p[0], p[1], reporter),
      Handler::SelfTest => self.handle_self_test(p),
      Handler::Palm => self.handle_palm(p[0]),
      Handler::ExtraTouch => self.handle_extra_touch(p),
      Handler::NoiseSuppression => {}
      Handler::Unhandled => debug!("mxt: untreated T{} message {:?}", entry.capability_type, p),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::super::fixture;
  use super::*;
  use crate::touch::recorder::Recorder;
  use crate::{Config, SlotState};
  use embassy_futures::block_on;

  fn touch(id: u8, status: u8, x: u16, y: u16, w: u8, z: u8) -> std::vec::Vec<u8> {
    let b1 = (x >> 4) as u8;
    let b2 = (y >> 4) as u8;
    let b3 = ((x as u8 & 0x0F) << 4) | (y as u8 & 0x0F);
    fixture::message(id, &[status, b1, b2, b3, w, z])
  }

  #[test]
  fn drains_until_sentinel_and_flushes_once() {
    let mut dev = fixture::discovered(Config::default());
    let mut rec = Recorder::default();
    dev.bus().push_record(&touch(2, 0xC0, 100, 200, 3, 40));
    dev.bus().push_record(&touch(3, 0xC0, 300, 400, 3, 40));

    let summary = block_on(dev.service_interrupt(&mut rec));
    assert_eq!(summary.records, 2);
    assert_eq!(summary.frames, 1);
    assert!(!summary.aborted);
    assert_eq!(rec.contacts().len(), 2);
    assert_eq!(rec.syncs(), 1);
    assert_eq!(dev.slots().get(1).map(|s| (s.x, s.y)), Some((300, 400)));
  }

  #[test]
  fn out_of_range_ids_are_dropped_and_loop_continues() {
    let mut dev = fixture::discovered(Config::default());
    let mut rec = Recorder::default();
    dev.bus().push_record(&fixture::message(200, &[0xC0]));
    dev.bus().push_record(&fixture::message(0, &[0xC0]));
    dev.bus().push_record(&touch(2, 0xC0, 10, 10, 1, 1));

    let summary = block_on(dev.service_interrupt(&mut rec));
    assert_eq!(summary.records, 1);
    assert_eq!(dev.slots().get(0).map(|s| s.state), Some(SlotState::Move));
  }

  #[test]
  fn stops_when_chg_deasserts() {
    let mut dev = fixture::discovered(Config::default());
    let mut rec = Recorder::default();
    dev.chg.script.push_back(false);
    dev.bus().push_record(&touch(2, 0xC0, 10, 10, 1, 1));
    dev.bus().push_record(&touch(3, 0xC0, 20, 20, 1, 1));

    let summary = block_on(dev.service_interrupt(&mut rec));
    assert_eq!(summary.records, 1);
    assert_eq!(dev.bus().fifo.len(), 1);
  }

  #[test]
  fn read_failure_aborts_pass_and_counts() {
    let mut dev = fixture::discovered(Config::default());
    let mut rec = Recorder::default();
    dev.bus().fail_reads = 1;
    let summary = block_on(dev.service_interrupt(&mut rec));
    assert!(summary.aborted);
    assert_eq!(dev.read_errors(), 1);
    assert!(rec.log.is_empty());
  }

  #[test]
  fn status_reset_is_reported() {
    let mut dev = fixture::discovered(Config::default());
    let mut rec = Recorder::default();
    dev.bus().push_record(&fixture::message(1, &[0x80]));
    let summary = block_on(dev.service_interrupt(&mut rec));
    assert!(summary.reset_seen);
    assert!(!summary.normal_mode);
    assert_eq!(rec.log, [crate::touch::recorder::Record::Status(0x80)]);
  }

  #[test]
  fn service_before_discovery_is_a_no_op() {
    let mut dev = fixture::device(Config::default());
    let mut rec = Recorder::default();
    assert_eq!(block_on(dev.service_interrupt(&mut rec)), DrainSummary::default());
    assert!(dev.bus().writes.is_empty());
  }
}
