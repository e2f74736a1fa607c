//! Page description table scan.
//!
//! Every page may carry a table of 6-byte function descriptors growing down
//! from `0xE9`. A descriptor with function number 0 ends the page. Interrupt
//! sources are numbered in discovery order across all pages, which fixes each
//! function's bits in the F01 interrupt status and enable registers.

use heapless::Vec;

use super::defs::*;
use crate::bus::Transport;
use crate::DiscoveryError;

/// Interrupt sources owned by one function: `count` consecutive bits starting
/// at bit `first` of the concatenated interrupt registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IrqSources {
  pub first: u8,
  pub count: u8,
}

impl IrqSources {
  /// Register holding the first source.
  pub const fn register(&self) -> usize {
    self.first as usize / 8
  }

  /// Bits of these sources that land in interrupt register `reg`.
  pub fn mask_in(&self, reg: usize) -> u8 {
    (self.first..self.first.saturating_add(self.count))
      .filter(|bit| *bit as usize / 8 == reg)
      .fold(0, |mask, bit| mask | 1 << (bit % 8))
  }

  /// `true` when any source is flagged in `status`.
  pub fn is_pending(&self, status: &[u8]) -> bool {
    status.iter().enumerate().any(|(reg, bits)| bits & self.mask_in(reg) != 0)
  }

  /// Set these sources in a set of enable registers.
  pub(crate) fn enable_in(&self, masks: &mut [u8]) {
    for (reg, mask) in masks.iter_mut().enumerate() {
      *mask |= self.mask_in(reg);
    }
  }
}

/// One page description table entry with page-qualified addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FunctionDescriptor {
  pub number: u8,
  pub version: u8,
  pub query_base: u16,
  pub command_base: u16,
  pub control_base: u16,
  pub data_base: u16,
  pub irq: IrqSources,
}

impl FunctionDescriptor {
  pub(crate) fn from_entry(b: [u8; PDT_ENTRY_SIZE as usize], page: u8, first_irq: u8) -> Self {
    let page = (page as u16) << 8;
    Self {
      number: b[5],
      version: (b[4] >> 5) & 0x03,
      query_base: page | b[0] as u16,
      command_base: page | b[1] as u16,
      control_base: page | b[2] as u16,
      data_base: page | b[3] as u16,
      irq: IrqSources { first: first_irq, count: b[4] & 0x07 },
    }
  }

  pub fn function(&self) -> Option<Function> {
    Function::try_from(self.number).ok()
  }
}

/// Functions found on the device, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionTable {
  functions: Vec<FunctionDescriptor, MAX_FUNCTIONS>,
  irq_count: u8,
}

impl FunctionTable {
  pub fn find(&self, function: Function) -> Option<&FunctionDescriptor> {
    let number = u8::from(function);
    self.functions.iter().find(|f| f.number == number)
  }

  pub fn iter(&self) -> impl Iterator<Item = &FunctionDescriptor> + '_ {
    self.functions.iter()
  }

  pub fn len(&self) -> usize {
    self.functions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.functions.is_empty()
  }

  /// Interrupt sources over all functions.
  pub fn irq_count(&self) -> u8 {
    self.irq_count
  }

  /// Interrupt status registers the device implements.
  pub fn irq_registers(&self) -> usize {
    (self.irq_count as usize + 7) / 8
  }
}

/// Scan the page description tables of the first [`PAGES_TO_SERVICE`] pages.
pub async fn scan<T, E>(bus: &mut T) -> Result<FunctionTable, DiscoveryError<E>>
where
  T: Transport<Error = E>,
{
  let mut table = FunctionTable::default();

  for page in 0..PAGES_TO_SERVICE {
    let mut entry = PDT_START;
    while entry > PDT_END {
      let addr = (page as u16) << 8 | entry as u16;
      let mut raw = [0u8; PDT_ENTRY_SIZE as usize];
      bus.read(addr, &mut raw).await.map_err(DiscoveryError::TransportFailure)?;
      if raw[5] == 0 {
        break;
      }

      let fd = FunctionDescriptor::from_entry(raw, page, table.irq_count);
      debug!(
        "rmi4: F{:02x} page {} query {} ctrl {} data {} irqs {}",
        fd.number,
        page,
        fd.query_base,
        fd.control_base,
        fd.data_base,
        fd.irq.count
      );

      let irq_count = table.irq_count as usize + fd.irq.count as usize;
      if irq_count > MAX_INTR_REGISTERS * 8 {
        error!("rmi4: {} interrupt sources do not fit", irq_count);
        return Err(DiscoveryError::AllocationLimitExceeded(irq_count as u8));
      }
      if table.functions.push(fd).is_err() {
        error!("rmi4: more than {} functions", MAX_FUNCTIONS);
        return Err(DiscoveryError::AllocationLimitExceeded(MAX_FUNCTIONS as u8));
      }
      table.irq_count = irq_count as u8;
      entry -= PDT_ENTRY_SIZE;
    }
  }

  Ok(table)
}

#[cfg(test)]
mod tests {
  use super::super::fixture;
  use super::*;
  use crate::bus::mock::{BusFault, MockBus};
  use embassy_futures::block_on;

  #[test]
  fn sources_split_across_registers() {
    let irq = IrqSources { first: 7, count: 2 };
    assert_eq!(irq.register(), 0);
    assert_eq!(irq.mask_in(0), 0x80);
    assert_eq!(irq.mask_in(1), 0x01);
    assert_eq!(irq.mask_in(2), 0x00);
    assert!(irq.is_pending(&[0x00, 0x01]));
    assert!(!irq.is_pending(&[0x7F, 0xFE]));

    let mut masks = [0u8; MAX_INTR_REGISTERS];
    irq.enable_in(&mut masks);
    assert_eq!(masks, [0x80, 0x01, 0, 0]);
  }

  #[test]
  fn scan_qualifies_addresses_with_page() {
    let mut bus = fixture::f12_image();
    let table = block_on(scan(&mut bus)).expect("scan");

    assert_eq!(table.len(), 2);
    assert_eq!(table.irq_count(), 3);
    assert_eq!(table.irq_registers(), 1);

    let f01 = table.find(Function::DeviceControl).expect("F01");
    assert_eq!(f01.irq, IrqSources { first: 0, count: 1 });
    assert_eq!(f01.data_base, fixture::F01_DATA);

    let f12 = table.find(Function::Sensor2dObjects).expect("F12");
    assert_eq!(f12.query_base, 0x0100);
    assert_eq!(f12.control_base, fixture::F12_CTRL);
    assert_eq!(f12.data_base, fixture::F12_DATA);
    assert_eq!(f12.irq, IrqSources { first: 1, count: 2 });
  }

  #[test]
  fn empty_device_yields_empty_table() {
    let mut bus = MockBus::new();
    let table = block_on(scan(&mut bus)).expect("scan");
    assert!(table.is_empty());
    assert_eq!(table.irq_registers(), 0);
  }

  #[test]
  fn read_failure_is_discovery_error() {
    let mut bus = fixture::f11_image();
    bus.fail_reads = 1;
    assert_eq!(block_on(scan(&mut bus)), Err(DiscoveryError::TransportFailure(BusFault)));
  }
}
