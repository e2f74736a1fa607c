//! Config checksum and config blob installation.
//!
//! A config blob is a packed sequence of entries:
//!
//! ```text
//! offset  size  field
//!      0     1  object type
//!      1     1  instance
//!      2     1  length N
//!      3     N  register bytes
//! ```
//!
//! The whole blob is validated against the discovered table before the first
//! register is written, so a bad blob never leaves the device half configured.

use embedded_hal::digital::InputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use super::defs::*;
use super::table::{CapabilityBlock, ObjectTable};
use super::Mxt;
use crate::bus::Transport;
use crate::crc::le24;
use crate::firmware::FirmwareImage;
use crate::{BoardObject, Error, ValidationError};

const ENTRY_HEADER: usize = 3;
/// Largest object instance the zero fill covers in one write.
const MAX_ELEMENT: usize = 256;

/// One register image from a config blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfigEntry<'a> {
  pub object_type: u8,
  pub instance: u8,
  pub data: &'a [u8],
}

/// Iterator over the entries of a config blob. Yields one error and stops
/// when an entry runs past the end.
#[derive(Debug, Clone)]
pub struct ConfigEntries<'a> {
  blob: &'a [u8],
  offset: usize,
}

impl<'a> ConfigEntries<'a> {
  pub fn new(blob: &'a [u8]) -> Self {
    Self { blob, offset: 0 }
  }
}

impl<'a> Iterator for ConfigEntries<'a> {
  type Item = Result<ConfigEntry<'a>, ValidationError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.offset >= self.blob.len() {
      return None;
    }
    let at = self.offset;
    let rest = &self.blob[at..];
    let entry = match rest {
      [object_type, instance, len, data @ ..] if data.len() >= *len as usize => {
        ConfigEntry { object_type: *object_type, instance: *instance, data: &data[..*len as usize] }
      }
      _ => {
        self.offset = self.blob.len();
        return Some(Err(ValidationError::EntryTruncated { offset: at }));
      }
    };
    self.offset += ENTRY_HEADER + entry.data.len();
    Some(Ok(entry))
  }
}

impl ConfigEntry<'_> {
  /// Check the entry against the discovered object. Returns the object.
  pub fn validate(&self, table: &ObjectTable) -> Result<CapabilityBlock, ValidationError> {
    let object = table.get(self.object_type).copied().ok_or(ValidationError::UnknownObject(self.object_type))?;
    if self.data.len() > object.element_size as usize {
      return Err(ValidationError::LengthExceeded {
        object: self.object_type,
        declared: self.data.len() as u16,
        actual: object.element_size,
      });
    }
    if self.instance as u16 >= object.instance_count {
      return Err(ValidationError::InstanceExceeded {
        object: self.object_type,
        instance: self.instance,
        instances: object.instance_count,
      });
    }
    Ok(object)
  }
}

/// Outcome of [`Mxt::write_config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigSync {
  /// The image had no config; the board objects were written instead.
  BoardObjects { objects: usize },
  /// The image was built for other firmware. Nothing written.
  VersionMismatch,
  /// The device already holds this config.
  UpToDate { crc: u32 },
  /// The blob was written.
  Written { entries: usize },
}

impl ConfigSync {
  /// `true` when registers changed and need a backup.
  pub fn wrote(&self) -> bool {
    match self {
      ConfigSync::BoardObjects { objects } => *objects > 0,
      ConfigSync::Written { .. } => true,
      _ => false,
    }
  }
}

impl<T, E, CHG, D> Mxt<T, CHG, D>
where
  T: Transport<Error = E>,
  CHG: InputPin + Wait,
  D: DelayNs,
{
  /// Ask the command processor to report all, then take the config checksum
  /// from its status message.
  pub async fn read_config_crc(&mut self) -> Result<u32, Error<E>> {
    let report_id = self.status_report_id()?;
    self.write_object(ObjectType::CommandProcessor, COMMAND_REPORTALL, 1).await?;
    let msg = self.read_message_for(report_id).await.map_err(|e| {
      error!("mxt: failed to retrieve config CRC");
      e
    })?;
    Ok(le24([msg.payload[1], msg.payload[2], msg.payload[3]]))
  }

  /// Install the config carried by `image`, unless the device already holds
  /// it or the image targets other firmware.
  pub async fn write_config(&mut self, image: &FirmwareImage<'_>) -> Result<ConfigSync, Error<E>> {
    if image.config.is_empty() {
      info!("mxt: no config in image, writing board objects");
      let objects = self.write_board_objects(self.config.board_objects).await?;
      return Ok(ConfigSync::BoardObjects { objects });
    }

    let current = self.read_config_crc().await?;
    let info = self.info().ok_or(Error::NotReady)?;
    if !image.matches(info.version, info.build) {
      warn!(
        "mxt: config for firmware {}.{} but device runs {}.{}",
        image.fw_version,
        image.build_version,
        info.version,
        info.build
      );
      return Ok(ConfigSync::VersionMismatch);
    }
    if current == image.config_crc {
      info!("mxt: config up to date, CRC {}", current);
      return Ok(ConfigSync::UpToDate { crc: current });
    }
    info!("mxt: writing config, CRC {} != {}", current, image.config_crc);

    let table = &self.layout.as_ref().ok_or(Error::NotReady)?.objects;
    for entry in ConfigEntries::new(image.config) {
      if let Err(e) = entry.and_then(|entry| entry.validate(table)) {
        error!("mxt: config rejected: {:?}", e);
        return Err(e.into());
      }
    }

    let mut entries = 0;
    for entry in ConfigEntries::new(image.config) {
      let entry = entry?;
      let object = self.object(entry.object_type)?;
      let reg = object.start_address + object.element_size * entry.instance as u16;
      self.write_mem(reg, entry.data).await?;

      let len = entry.data.len();
      let size = object.element_size as usize;
      if len < size {
        // New firmware grew the object; zeroing keeps old behaviour.
        warn!("mxt: zeroing {} byte(s) in T{}", size - len, entry.object_type);
        let zeros = [0u8; MAX_ELEMENT];
        self.write_mem(reg + len as u16, &zeros[..size - len]).await?;
      }
      entries += 1;
    }
    info!("mxt: updated configuration ({} entries)", entries);
    Ok(ConfigSync::Written { entries })
  }

  /// Write board supplied register images to instance 0 of each object and
  /// clear any further instances.
  pub async fn write_board_objects(&mut self, objects: &[BoardObject]) -> Result<usize, Error<E>> {
    for board in objects {
      let entry = ConfigEntry { object_type: board.object_type, instance: 0, data: board.data };
      let table = &self.layout.as_ref().ok_or(Error::NotReady)?.objects;
      entry.validate(table)?;
    }

    for board in objects {
      let object = self.object(board.object_type)?;
      self.write_mem(object.start_address, board.data).await?;
      if object.instance_count > 1 {
        let zeros = [0u8; MAX_ELEMENT];
        let start = object.start_address + object.element_size;
        for i in 1..object.instance_count {
          let reg = start + (i - 1) * object.element_size;
          self.write_mem(reg, &zeros[..object.element_size as usize]).await?;
        }
      }
    }
    Ok(objects.len())
  }
}
