//! Bootloader handshake and frame-by-frame firmware transfer.
//!
//! Firmware is a sequence of frames, each starting with a big-endian length
//! that excludes the two trailing CRC bytes. The bootloader checks every
//! frame on its own and a failed frame ends the update; there is no
//! per-frame retry.

use embedded_hal::digital::InputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use super::defs::*;
use super::{table, Mxt};
use crate::bus::{BootloaderPort, Transport};
use crate::firmware::FirmwareImage;
use crate::{Error, ProtocolViolation, ValidationError};

/// Bootloader status values.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootState {
  WaitingBootloadCmd = 0xC0,
  WaitingFrameData = 0x80,
  FrameCrcCheck = 0x02,
  FrameCrcFail = 0x03,
  FrameCrcPass = 0x04,
  AppCrcFail = 0x40,
}

/// Identity the bootloader reports while waiting for the unlock command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootloaderId {
  pub id: u8,
  /// Only reported by bootloaders with extended ID.
  pub version: Option<u8>,
}

impl<T, E, CHG, D> Mxt<T, CHG, D>
where
  T: Transport<Error = E> + BootloaderPort<Error = E>,
  CHG: InputPin + Wait,
  D: DelayNs,
{
  async fn boot_status(&mut self) -> Result<u8, Error<E>> {
    let mut b = [0u8; 1];
    self.bus.recv(&mut b).await.map_err(Error::Transport)?;
    Ok(b[0])
  }

  async fn bootloader_id(&mut self, status: u8) -> Result<BootloaderId, Error<E>> {
    if status & BOOT_EXTENDED_ID == 0 {
      return Ok(BootloaderId { id: status & BOOT_ID_MASK, version: None });
    }
    let mut buf = [0u8; 3];
    self.bus.recv(&mut buf).await.map_err(Error::Transport)?;
    Ok(BootloaderId { id: buf[1], version: Some(buf[2]) })
  }

  /// Read the bootloader status and require `expected`. While a frame CRC is
  /// being computed the status is polled again every `CRC_CHECK_POLL_MS`, up
  /// to `CRC_CHECK_POLL_LIMIT` times.
  pub async fn check_bootloader(&mut self, expected: BootState) -> Result<(), Error<E>> {
    for _ in 0..CRC_CHECK_POLL_LIMIT {
      let raw = self.boot_status().await?;
      let found = match expected {
        BootState::WaitingBootloadCmd => {
          let id = self.bootloader_id(raw).await?;
          info!("mxt: bootloader id {} version {:?}", id.id, id.version);
          raw & !BOOT_STATUS_MASK
        }
        BootState::WaitingFrameData | BootState::AppCrcFail => raw & !BOOT_STATUS_MASK,
        BootState::FrameCrcPass if raw == BootState::FrameCrcCheck as u8 => {
          self.delay.delay_ms(CRC_CHECK_POLL_MS).await;
          continue;
        }
        BootState::FrameCrcPass if raw == BootState::FrameCrcFail as u8 => {
          error!("mxt: bootloader frame CRC fail");
          return Err(ProtocolViolation::FrameCrcFail.into());
        }
        _ => raw,
      };
      if found != expected as u8 {
        error!("mxt: bootloader state {} expected {}", found, expected as u8);
        return Err(ProtocolViolation::UnexpectedState { expected: expected as u8, found }.into());
      }
      return Ok(());
    }
    error!("mxt: frame CRC check did not finish");
    Err(Error::Timeout)
  }

  pub async fn unlock_bootloader(&mut self) -> Result<(), Error<E>> {
    self.bus.send(&UNLOCK_CMD).await.map_err(Error::Transport)
  }

  /// Check that the bootloader address answers with a bootloader status.
  pub async fn probe_bootloader(&mut self) -> Result<u8, Error<E>> {
    let status = self.boot_status().await?;
    if status & !BOOT_STATUS_MASK == 0 {
      error!("mxt: unknown bootloader status {}", status);
      return Err(ProtocolViolation::NotInBootloader(status).into());
    }
    if status & !BOOT_STATUS_MASK == BootState::AppCrcFail as u8 {
      error!("mxt: application CRC failure");
    } else {
      info!("mxt: device in bootloader mode");
    }
    Ok(status)
  }

  /// Reset into the bootloader. The object table is gone afterwards.
  pub async fn enter_bootloader(&mut self) -> Result<(), Error<E>> {
    if self.layout.is_none() {
      self.discover().await?;
    }
    let result = self.reset(BOOT_VALUE).await;
    self.forget_layout();
    result
  }

  /// Transfer `firmware` frame by frame, then wait for the application to
  /// come back.
  pub async fn flash(&mut self, firmware: &[u8]) -> Result<(), Error<E>> {
    if firmware.is_empty() {
      return Err(ValidationError::MissingFirmware.into());
    }
    self.forget_layout();

    if self.check_bootloader(BootState::WaitingBootloadCmd).await.is_ok() {
      info!("mxt: unlocking bootloader");
      self.unlock_bootloader().await?;
    } else {
      // Still unlocked from an earlier attempt.
      self.check_bootloader(BootState::WaitingFrameData).await?;
    }

    let mut pos = 0;
    while pos < firmware.len() {
      self.check_bootloader(BootState::WaitingFrameData).await?;

      let frame = match firmware.get(pos..pos + 2) {
        Some(len) => u16::from_be_bytes([len[0], len[1]]) as usize + 2,
        None => return Err(ValidationError::FrameTruncated { offset: pos }.into()),
      };
      let data = firmware.get(pos..pos + frame).ok_or(ValidationError::FrameTruncated { offset: pos })?;
      self.bus.send(data).await.map_err(Error::Transport)?;

      self.check_bootloader(BootState::FrameCrcPass).await?;
      pos += frame;
      trace!("mxt: flashed {} of {} bytes", pos, firmware.len());
      self.delay.delay_ms(FRAME_SETTLE_MS).await;
    }

    self.wait_for_chg(SW_RESET_TIME_MS).await?;
    info!("mxt: firmware update done");
    Ok(())
  }

  /// Bring the firmware in line with `image` at start-up. Flashes when the
  /// application reports another version, or straight from the bootloader
  /// when the application does not answer. Returns `true` if it flashed.
  pub async fn flash_on_probe(&mut self, image: &FirmwareImage<'_>) -> Result<bool, Error<E>> {
    match table::read_info(&mut self.bus).await {
      Err(_) => {
        self.probe_bootloader().await?;
        info!("mxt: updating firmware from bootloader");
      }
      Ok(info) if image.matches(info.version, info.build) => {
        debug!("mxt: firmware {}.{} already installed", info.version, info.build);
        return Ok(false);
      }
      Ok(info) => {
        info!(
          "mxt: updating firmware {}.{} -> {}.{}",
          info.version,
          info.build,
          image.fw_version,
          image.build_version
        );
        self.enter_bootloader().await?;
      }
    }
    self.flash(image.firmware).await?;
    Ok(true)
  }
}
