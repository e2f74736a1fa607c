//! Report-ID dispatch.
//!
//! Every message carries a report ID. The table built here maps each ID to
//! the object that owns it, the instance-local index and the handler that
//! decodes it, so routing a message is a single array lookup.

use heapless::Vec;

use super::defs::{ObjectType, NO_MESSAGE};
use super::table::ObjectTable;

/// Decoder selected for a report ID, resolved once when the table is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Handler {
  Status,
  Touch,
  Keys,
  SelfTest,
  Palm,
  ExtraTouch,
  NoiseSuppression,
  /// Object with no decoder; messages are logged and dropped.
  Unhandled,
}

impl Handler {
  pub fn for_type(type_id: u8) -> Self {
    match ObjectType::try_from(type_id) {
      Ok(ObjectType::CommandProcessor) => Handler::Status,
      Ok(ObjectType::MultiTouchScreen) => Handler::Touch,
      Ok(ObjectType::KeyArray) => Handler::Keys,
      Ok(ObjectType::SelfTest) => Handler::SelfTest,
      Ok(ObjectType::TouchSuppression) => Handler::Palm,
      Ok(ObjectType::ExtraTouchData) => Handler::ExtraTouch,
      Ok(ObjectType::NoiseSuppression) => Handler::NoiseSuppression,
      _ => Handler::Unhandled,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReportIdEntry {
  pub capability_type: u8,
  pub local_index: u8,
  pub handler: Handler,
}

const RESERVED: ReportIdEntry = ReportIdEntry { capability_type: 0, local_index: 0, handler: Handler::Unhandled };

/// Report ID to object mapping. Index 0 is reserved and never routed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReportIdTable {
  entries: Vec<ReportIdEntry, 256>,
}

impl ReportIdTable {
  /// Assign IDs in object order starting at 1.
  pub fn build(table: &ObjectTable) -> Self {
    let mut entries: Vec<ReportIdEntry, 256> = Vec::new();
    let _ = entries.push(RESERVED);
    for object in table.objects() {
      let handler = Handler::for_type(object.type_id);
      for local in 0..object.report_ids() {
        // The table builder keeps the total below the sentinel.
        let _ = entries.push(ReportIdEntry { capability_type: object.type_id, local_index: local as u8, handler });
      }
    }
    Self { entries }
  }

  /// Highest routed report ID.
  pub fn max_report_id(&self) -> u8 {
    self.entries.len().saturating_sub(1) as u8
  }

  /// Entry for `id`. `None` for the reserved ID, the empty-queue sentinel and
  /// anything past the table.
  pub fn lookup(&self, id: u8) -> Option<ReportIdEntry> {
    if id == 0 || id == NO_MESSAGE {
      return None;
    }
    self.entries.get(id as usize).copied()
  }

  /// First report ID owned by `type_id`.
  pub fn first_of(&self, type_id: u8) -> Option<u8> {
    self.entries.iter().skip(1).position(|e| e.capability_type == type_id).map(|p| p as u8 + 1)
  }
}
