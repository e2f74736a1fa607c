use embedded_hal::digital::InputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use super::defs::*;
use super::Mxt;
use crate::bus::Transport;
use crate::{Error, ValidationError};

/// Modes with any of these bits set are confirmed through the T37 mode byte.
const MODE_MASK: u8 = 0xFC;
/// Raw references are reported with this offset added.
pub const REFERENCE_OFFSET: u16 = 16384;
pub const REFERENCE_MIN: u16 = 19744 - REFERENCE_OFFSET;
pub const REFERENCE_MAX: u16 = 28884 - REFERENCE_OFFSET;
const REFERENCE_RETRY_MS: u32 = 10;

/// Values written to the T6 diagnostic register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DiagnosticMode {
  PageUp = 0x01,
  PageDown = 0x02,
  Delta = 0x10,
  Reference = 0x11,
  /// Capacitive touch engine data. Selecting it rewinds to page 0.
  Cte = 0x31,
}

/// Result of a full-matrix scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanSummary {
  Reference {
    min: u16,
    max: u16,
    /// Nodes outside `REFERENCE_MIN..=REFERENCE_MAX`.
    out_of_range: u16,
  },
  Delta {
    /// Node with the largest absolute delta. `0` when all deltas are zero.
    node: u16,
    value: i16,
  },
}

impl<T, CHG, D> Mxt<T, CHG, D> {
  /// Number of matrix nodes, `x * y`.
  pub fn node_count(&self) -> u16 {
    self.info().map_or(0, |i| i.matrix_x as u16 * i.matrix_y as u16)
  }

  /// Map matrix coordinates to a node index.
  pub fn xy_to_node(&self, x: u16, y: u16) -> Option<u16> {
    let info = self.info()?;
    if x >= info.matrix_x as u16 || y >= info.matrix_y as u16 {
      return None;
    }
    Some(x * info.matrix_y as u16 + y)
  }

  pub fn node_to_xy(&self, node: u16) -> Option<(u16, u16)> {
    let info = self.info()?;
    if info.matrix_y == 0 || node >= self.node_count() {
      return None;
    }
    Some((node / info.matrix_y as u16, node % info.matrix_y as u16))
  }
}

impl<T, E, CHG, D> Mxt<T, CHG, D>
where
  T: Transport<Error = E>,
  CHG: InputPin + Wait,
  D: DelayNs,
{
  /// Select a diagnostic mode and wait until T37 reports it.
  pub async fn set_diagnostic_mode(&mut self, mode: DiagnosticMode) -> Result<(), Error<E>> {
    let mode = mode as u8;
    self.write_object(ObjectType::CommandProcessor, COMMAND_DIAGNOSTIC, mode).await.map_err(|e| {
      error!("mxt: failed to select diagnostic mode {}", mode);
      e
    })?;
    if mode & MODE_MASK == 0 {
      return Ok(());
    }
    for _ in 0..DIAG_POLL_LIMIT {
      if self.read_object(ObjectType::Diagnostic, T37_MODE).await? == mode {
        trace!("mxt: diagnostic mode {}", mode);
        return Ok(());
      }
      self.delay.delay_ms(DIAG_POLL_MS).await;
    }
    error!("mxt: diagnostic mode {} not reached", mode);
    Err(Error::Timeout)
  }

  async fn page_up(&mut self, page: u8) -> Result<(), Error<E>> {
    self.set_diagnostic_mode(DiagnosticMode::PageUp).await?;
    for _ in 0..DIAG_POLL_LIMIT {
      self.delay.delay_ms(DIAG_POLL_MS).await;
      if self.read_object(ObjectType::Diagnostic, T37_PAGE).await? == page {
        return Ok(());
      }
    }
    error!("mxt: diagnostic page {} not reached", page);
    Err(Error::Timeout)
  }

  /// Rewind to page 0 of `mode`.
  async fn enter_diagnostic(&mut self, mode: DiagnosticMode) -> Result<u16, Error<E>> {
    let t37 = self.object(ObjectType::Diagnostic.into())?;
    self.set_diagnostic_mode(DiagnosticMode::Cte).await?;
    self.set_diagnostic_mode(mode).await?;
    Ok(t37.start_address)
  }

  async fn read_node_value(&mut self, base: u16, slot: u16) -> Result<u16, Error<E>> {
    let mut b = [0u8; BYTES_PER_NODE as usize];
    self.read_mem(base + T37_DATA + slot * BYTES_PER_NODE, &mut b).await?;
    Ok(u16::from_le_bytes(b))
  }

  /// Read the raw value of one node in `mode`.
  pub async fn read_node(&mut self, mode: DiagnosticMode, node: u16) -> Result<u16, Error<E>> {
    if node >= self.node_count() {
      return Err(ValidationError::OffsetOutOfRange { object: ObjectType::Diagnostic.into(), offset: node }.into());
    }
    let base = self.enter_diagnostic(mode).await?;
    let page = node / NODES_PER_PAGE;
    for p in 1..=page {
      self.page_up(p as u8).await?;
    }
    let value = self.read_node_value(base, node % NODES_PER_PAGE).await?;
    debug!("mxt: diagnostic {:?} node {} = {}", mode, node, value);
    Ok(value)
  }

  /// Walk every matrix node in `mode`, handing each raw value to `f`.
  async fn scan_nodes<F>(&mut self, mode: DiagnosticMode, mut f: F) -> Result<(), Error<E>>
  where
    F: FnMut(u16, u16),
  {
    let base = self.enter_diagnostic(mode).await?;
    let total = self.node_count();
    let pages = total.div_ceil(NODES_PER_PAGE);
    for page in 0..pages {
      if page > 0 {
        self.page_up(page as u8).await?;
      }
      let first = page * NODES_PER_PAGE;
      for node in first..total.min(first + NODES_PER_PAGE) {
        let slot = node - first;
        let mut raw = self.read_node_value(base, slot).await?;
        if mode == DiagnosticMode::Reference && raw < REFERENCE_OFFSET {
          warn!("mxt: reference {} = {} below offset, retrying", node, raw);
          self.delay.delay_ms(REFERENCE_RETRY_MS).await;
          raw = self.read_node_value(base, slot).await?;
        }
        f(node, raw);
      }
    }
    Ok(())
  }

  /// Read every reference value and report the extremes.
  pub async fn reference_scan(&mut self) -> Result<ScanSummary, Error<E>> {
    let mut min = u16::MAX;
    let mut max = 0;
    let mut out_of_range = 0;
    self
      .scan_nodes(DiagnosticMode::Reference, |node, raw| {
        let reference = raw.saturating_sub(REFERENCE_OFFSET);
        if !(REFERENCE_MIN..=REFERENCE_MAX).contains(&reference) {
          warn!("mxt: reference {} out of range: {}", node, reference);
          out_of_range += 1;
        }
        min = min.min(reference);
        max = max.max(reference);
      })
      .await?;
    if min > max {
      min = 0;
    }
    info!("mxt: reference min {} max {}", min, max);
    Ok(ScanSummary::Reference { min, max, out_of_range })
  }

  /// Read every delta value and find the node with the largest magnitude.
  pub async fn delta_scan(&mut self) -> Result<ScanSummary, Error<E>> {
    let mut best = (0u16, 0i16);
    self
      .scan_nodes(DiagnosticMode::Delta, |node, raw| {
        let delta = raw as i16;
        if delta.unsigned_abs() > best.1.unsigned_abs() {
          best = (node, delta);
        }
      })
      .await?;
    info!("mxt: max delta node {} = {}", best.0, best.1);
    Ok(ScanSummary::Delta { node: best.0, value: best.1 })
  }
}

#[cfg(test)]
mod tests {
  use super::super::fixture;
  use super::*;
  use crate::bus::mock::{DiagPages, MockBus};
  use crate::platform::mock::{MockChg, MockDelay};
  use crate::Config;
  use embassy_futures::block_on;

  type Dev = Mxt<MockBus, MockChg, MockDelay>;

  fn page(values: &[u16]) -> std::vec::Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
  }

  fn with_pages(pages: std::vec::Vec<std::vec::Vec<u8>>) -> Dev {
    let mut dev = fixture::discovered(Config::default());
    dev.bus().diag = Some(DiagPages { command: fixture::T6 + COMMAND_DIAGNOSTIC, object: fixture::T37, pages });
    dev
  }

  #[test]
  fn node_mapping_follows_matrix() {
    let dev = fixture::discovered(Config::default());
    assert_eq!(dev.node_count(), 12);
    assert_eq!(dev.xy_to_node(2, 1), Some(7));
    assert_eq!(dev.node_to_xy(7), Some((2, 1)));
    assert_eq!(dev.xy_to_node(4, 0), None);
    assert_eq!(dev.xy_to_node(0, 3), None);
  }

  #[test]
  fn mode_change_times_out_when_not_acknowledged() {
    let mut dev = fixture::discovered(Config::default());
    assert_eq!(block_on(dev.set_diagnostic_mode(DiagnosticMode::Delta)), Err(Error::Timeout));
    assert_eq!(dev.delay.elapsed_ms, (DIAG_POLL_LIMIT * DIAG_POLL_MS) as u64);
  }

  #[test]
  fn page_up_is_not_polled() {
    let mut dev = fixture::discovered(Config::default());
    assert_eq!(block_on(dev.set_diagnostic_mode(DiagnosticMode::PageUp)), Ok(()));
    assert_eq!(dev.delay.elapsed_ms, 0);
  }

  #[test]
  fn reads_node_on_later_page() {
    let mut values = std::vec![0u16; 64];
    values[6] = 0x1234;
    let mut dev = with_pages(std::vec![page(&[0; 64]), page(&values)]);
    if let Some(layout) = dev.layout.as_mut() {
      layout.objects.info.matrix_x = 10;
      layout.objects.info.matrix_y = 10;
    }
    assert_eq!(block_on(dev.read_node(DiagnosticMode::Delta, 70)), Ok(0x1234));
    assert_eq!(dev.bus().mem[(fixture::T37 + T37_PAGE) as usize], 1);
  }

  #[test]
  fn read_node_rejects_nodes_outside_matrix() {
    let mut dev = fixture::discovered(Config::default());
    assert_eq!(
      block_on(dev.read_node(DiagnosticMode::Reference, 12)),
      Err(Error::Validation(ValidationError::OffsetOutOfRange { object: 37, offset: 12 }))
    );
  }

  #[test]
  fn reference_scan_strips_offset() {
    let mut refs = [REFERENCE_OFFSET + 5000; 12];
    refs[3] = REFERENCE_OFFSET + 4000;
    refs[8] = REFERENCE_OFFSET + 13000;
    let mut dev = with_pages(std::vec![page(&refs)]);
    assert_eq!(
      block_on(dev.reference_scan()),
      Ok(ScanSummary::Reference { min: 4000, max: 13000, out_of_range: 1 })
    );
  }

  #[test]
  fn reference_below_offset_counts_as_zero() {
    let mut refs = [REFERENCE_OFFSET + 5000; 12];
    refs[0] = 100;
    let mut dev = with_pages(std::vec![page(&refs)]);
    assert_eq!(block_on(dev.reference_scan()), Ok(ScanSummary::Reference { min: 0, max: 5000, out_of_range: 1 }));
    assert_eq!(dev.delay.elapsed_ms, REFERENCE_RETRY_MS as u64);
  }

  #[test]
  fn delta_scan_finds_largest_magnitude() {
    let mut deltas = [0u16; 12];
    deltas[2] = 40;
    deltas[9] = (-75i16) as u16;
    deltas[11] = 75;
    let mut dev = with_pages(std::vec![page(&deltas)]);
    assert_eq!(block_on(dev.delta_scan()), Ok(ScanSummary::Delta { node: 9, value: -75 }));
  }

  #[test]
  fn delta_scan_walks_every_page() {
    let mut second = [0u16; 64];
    second[35] = 300;
    let mut dev = with_pages(std::vec![page(&[1; 64]), page(&second)]);
    if let Some(layout) = dev.layout.as_mut() {
      layout.objects.info.matrix_x = 10;
      layout.objects.info.matrix_y = 10;
    }
    assert_eq!(block_on(dev.delta_scan()), Ok(ScanSummary::Delta { node: 99, value: 300 }));
  }
}
