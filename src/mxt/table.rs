//! Information block and object table discovery.

use heapless::Vec;

use super::defs::*;
use crate::bus::Transport;
use crate::crc::{crc24, le24};
use crate::{DiscoveryError, Error};

/// Identification block at address 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InfoBlock {
  pub family_id: u8,
  pub variant_id: u8,
  pub version: u8,
  pub build: u8,
  pub matrix_x: u8,
  pub matrix_y: u8,
  pub object_count: u8,
}

impl From<[u8; INFO_BLOCK_SIZE]> for InfoBlock {
  fn from(b: [u8; INFO_BLOCK_SIZE]) -> Self {
    Self {
      family_id: b[0],
      variant_id: b[1],
      version: b[2],
      build: b[3],
      matrix_x: b[4],
      matrix_y: b[5],
      object_count: b[6],
    }
  }
}

impl InfoBlock {
  /// Bytes covered by the information block CRC.
  pub const fn crc_area(&self) -> usize {
    INFO_BLOCK_SIZE + self.object_count as usize * OBJECT_ENTRY_SIZE
  }

  /// Address of the stored CRC, right after the object table.
  pub const fn crc_address(&self) -> u16 {
    self.crc_area() as u16
  }

  pub const fn node_count(&self) -> u16 {
    self.matrix_x as u16 * self.matrix_y as u16
  }
}

/// One discovered object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CapabilityBlock {
  pub type_id: u8,
  pub start_address: u16,
  /// Bytes per instance.
  pub element_size: u16,
  pub instance_count: u16,
  /// Report IDs per instance.
  pub report_id_count: u8,
  /// Last report ID owned by this object, or the running total of earlier
  /// objects when it owns none.
  pub max_report_id: u8,
}

impl CapabilityBlock {
  /// Decode a table entry. `max_report_id` is filled in by the table scan.
  pub(crate) fn from_entry(b: [u8; OBJECT_ENTRY_SIZE]) -> Self {
    Self {
      type_id: b[0],
      start_address: u16::from_le_bytes([b[1], b[2]]),
      element_size: b[3] as u16 + 1,
      instance_count: b[4] as u16 + 1,
      report_id_count: b[5],
      max_report_id: 0,
    }
  }

  /// Report IDs owned across all instances.
  pub const fn report_ids(&self) -> u16 {
    self.report_id_count as u16 * self.instance_count
  }

  /// First report ID owned by this object.
  pub const fn min_report_id(&self) -> Option<u8> {
    if self.report_id_count == 0 {
      None
    } else {
      Some((self.max_report_id as u16 + 1 - self.report_ids()) as u8)
    }
  }

  /// Total register span across instances.
  pub const fn span(&self) -> u16 {
    self.element_size * self.instance_count
  }
}

/// Discovered object table. Rebuilt wholesale after any reset or reflash.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectTable {
  pub info: InfoBlock,
  objects: Vec<CapabilityBlock, MAX_OBJECTS>,
  max_report_id: u8,
}

impl ObjectTable {
  /// Build a table from decoded entries, accumulating report-ID ranges.
  pub fn from_blocks<I, E>(info: InfoBlock, blocks: I) -> Result<Self, DiscoveryError<E>>
  where
    I: IntoIterator<Item = CapabilityBlock>,
  {
    let mut objects = Vec::new();
    let mut total: u16 = 0;
    for mut block in blocks {
      if block.report_id_count != 0 {
        total += block.report_ids();
        if total >= NO_MESSAGE as u16 {
          return Err(DiscoveryError::ReportIdOverflow);
        }
      }
      block.max_report_id = total as u8;
      objects.push(block).map_err(|_| DiscoveryError::AllocationLimitExceeded(info.object_count))?;
    }
    Ok(Self { info, objects, max_report_id: total as u8 })
  }

  pub fn objects(&self) -> &[CapabilityBlock] {
    &self.objects
  }

  pub fn max_report_id(&self) -> u8 {
    self.max_report_id
  }

  /// First object of the given type.
  pub fn get(&self, type_id: u8) -> Option<&CapabilityBlock> {
    self.objects.iter().find(|o| o.type_id == type_id)
  }

  pub fn object(&self, t: ObjectType) -> Option<&CapabilityBlock> {
    self.get(t.into())
  }
}

/// Read the information block.
pub async fn read_info<T: Transport>(bus: &mut T) -> Result<InfoBlock, T::Error> {
  let mut buf = [0u8; INFO_BLOCK_SIZE];
  bus.read(INFO_BLOCK_ADDR, &mut buf).await?;
  Ok(InfoBlock::from(buf))
}

/// Read the information block and object table.
pub async fn discover<T: Transport>(bus: &mut T) -> Result<ObjectTable, DiscoveryError<T::Error>> {
  let info = read_info(bus).await.map_err(DiscoveryError::TransportFailure)?;
  if info.object_count as usize > MAX_OBJECTS {
    error!("mxt: implausible object count {}", info.object_count);
    return Err(DiscoveryError::AllocationLimitExceeded(info.object_count));
  }

  let mut blocks: Vec<CapabilityBlock, MAX_OBJECTS> = Vec::new();
  for i in 0..info.object_count as u16 {
    let mut entry = [0u8; OBJECT_ENTRY_SIZE];
    let addr = OBJECT_TABLE_ADDR + i * OBJECT_ENTRY_SIZE as u16;
    bus.read(addr, &mut entry).await.map_err(DiscoveryError::TransportFailure)?;
    let block = CapabilityBlock::from_entry(entry);
    trace!(
      "mxt: T{} start {} size {} instances {} report ids {}",
      block.type_id,
      block.start_address,
      block.element_size,
      block.instance_count,
      block.report_id_count
    );
    // Bounded by the object count check above.
    let _ = blocks.push(block);
  }

  let table = ObjectTable::from_blocks(info, blocks)?;
  info!(
    "mxt: family {} variant {} version {} build {} objects {} max report id {}",
    info.family_id,
    info.variant_id,
    info.version,
    info.build,
    info.object_count,
    table.max_report_id()
  );
  Ok(table)
}

/// Recompute the information block CRC from a fresh read and compare it with
/// the stored one. Returns the CRC on success.
pub async fn verify_info_crc<T: Transport>(bus: &mut T, info: &InfoBlock) -> Result<u32, Error<T::Error>> {
  let mut raw = [0u8; INFO_BLOCK_SIZE + MAX_OBJECTS * OBJECT_ENTRY_SIZE];
  let area = info.crc_area();
  if area > raw.len() {
    return Err(Error::Discovery(DiscoveryError::AllocationLimitExceeded(info.object_count)));
  }
  bus.read(INFO_BLOCK_ADDR, &mut raw[..area]).await.map_err(Error::Transport)?;

  let mut stored = [0u8; INFO_CRC_SIZE];
  bus.read(info.crc_address(), &mut stored).await.map_err(Error::Transport)?;
  let stored = le24(stored);
  let computed = crc24(&raw[..area]);

  if stored != computed {
    error!("mxt: information block CRC {} != {}", stored, computed);
    return Err(Error::ChecksumMismatch { stored, computed });
  }
  Ok(computed)
}

#[cfg(test)]
pub(crate) mod fixture {
  use crate::bus::mock::MockBus;

  /// Two objects: T5 at 0x100 (size 2, one report ID) and T9 at 0x110
  /// (size 9, ten report IDs), with a valid CRC.
  pub const INFO: [u8; 19] = [
    0x81, 0x01, 0x10, 0xAA, 0x18, 0x0E, 0x02, //
    0x05, 0x00, 0x01, 0x01, 0x00, 0x01, //
    0x09, 0x10, 0x01, 0x08, 0x00, 0x0A,
  ];
  pub const INFO_CRC: [u8; 3] = [0xC2, 0x32, 0xAF];

  pub fn bus() -> MockBus {
    let mut bus = MockBus::new();
    bus.load(0, &INFO);
    bus.load(INFO.len() as u16, &INFO_CRC);
    bus
  }
}

#[cfg(test)]
mod tests {
  use super::fixture;
  use super::*;
  use crate::bus::mock::BusFault;
  use embassy_futures::block_on;

  #[test]
  fn discovers_two_object_table() {
    let mut bus = fixture::bus();
    let table = block_on(discover(&mut bus)).expect("discovery");

    assert_eq!(table.info.object_count, 2);
    assert_eq!(table.max_report_id(), 11);

    let t5 = table.object(ObjectType::MessageProcessor).expect("T5");
    assert_eq!((t5.start_address, t5.element_size, t5.instance_count), (0x100, 2, 1));
    assert_eq!(t5.max_report_id, 1);

    let t9 = table.object(ObjectType::MultiTouchScreen).expect("T9");
    assert_eq!((t9.start_address, t9.element_size), (0x110, 9));
    assert_eq!((t9.min_report_id(), t9.max_report_id), (Some(2), 11));
  }

  #[test]
  fn verifies_info_crc() {
    let mut bus = fixture::bus();
    let table = block_on(discover(&mut bus)).expect("discovery");
    assert_eq!(block_on(verify_info_crc(&mut bus, &table.info)), Ok(0xAF32C2));
  }

  #[test]
  fn corrupt_table_fails_crc() {
    let mut bus = fixture::bus();
    let table = block_on(discover(&mut bus)).expect("discovery");
    bus.mem[8] ^= 0x01;
    assert_eq!(
      block_on(verify_info_crc(&mut bus, &table.info)),
      Err(Error::ChecksumMismatch { stored: 0xAF32C2, computed: crc24(&bus.mem[..19]) })
    );
  }

  #[test]
  fn rejects_implausible_object_count() {
    let mut bus = fixture::bus();
    bus.mem[6] = 200;
    assert_eq!(block_on(discover(&mut bus)), Err(DiscoveryError::AllocationLimitExceeded(200)));
  }

  #[test]
  fn read_failure_is_transport_failure() {
    let mut bus = fixture::bus();
    bus.fail_reads = 1;
    assert_eq!(block_on(discover(&mut bus)), Err(DiscoveryError::TransportFailure(BusFault)));
  }

  #[test]
  fn report_ids_stop_short_of_sentinel() {
    let info = InfoBlock { object_count: 2, ..Default::default() };
    let big = CapabilityBlock::from_entry([9, 0, 0, 0, 25, 10]);
    assert_eq!(ObjectTable::from_blocks::<_, ()>(info, [big]), Err(DiscoveryError::ReportIdOverflow));
  }

  #[test]
  fn objects_without_report_ids_carry_running_total() {
    let info = InfoBlock { object_count: 3, ..Default::default() };
    let blocks = [
      CapabilityBlock::from_entry([6, 0, 0, 5, 0, 1]),
      CapabilityBlock::from_entry([7, 0, 0, 2, 0, 0]),
      CapabilityBlock::from_entry([15, 0, 0, 10, 1, 1]),
    ];
    let table = ObjectTable::from_blocks::<_, ()>(info, blocks).expect("table");
    let max: std::vec::Vec<u8> = table.objects().iter().map(|o| o.max_report_id).collect();
    assert_eq!(max, [1, 1, 3]);
    assert_eq!(table.objects()[1].min_report_id(), None);
    assert_eq!(table.objects()[2].min_report_id(), Some(2));
  }
}
