#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Async, `no_std` core for Atmel maXTouch and Synaptics RMI4 touch
//! controllers.
//!
//! Both families describe their register space at runtime: maXTouch parts
//! publish an object table (T-objects) behind a CRC-24 protected information
//! block, RMI4 parts publish a page description table of functions
//! (F-functions). This crate discovers those layouts, decodes the interrupt
//! driven event streams into per-slot finger state, and drives the device
//! lifecycle:
//!
//! - Object/function table discovery with report-ID dispatch built once
//! - Multi-finger slot state machine with coalesced frame flushes
//! - CRC-24 information block verification and config blob installation
//! - Bootloader frame-by-frame firmware flashing with CRC pass/fail polling
//! - Idempotent start/stop and suspend/resume with a scoped interrupt guard
//! - T37 diagnostic scans and a small textual command surface on top
//! - RMI4 F11/F12 2D and F1A button decoding over paged register access,
//!   see [`rmi4::Rmi4`]
//!
//! Everything is built on `embedded-hal` / `embedded-hal-async` 1.0. The
//! register bus is reached through the [`bus::Transport`] trait so the same
//! decoding core can run over I2C adapters or test doubles.
//!
//! ```no_run
//! use embedded_hal::digital::InputPin;
//! use embedded_hal_async::{delay::DelayNs, digital::Wait, i2c::I2c};
//! use mxt_rmi::{bus::MxtI2c, mxt::Mxt, Config, Controller, Platform, Reporter};
//!
//! async fn run<I, CHG, D, P, R>(i2c: I, chg: CHG, delay: D, platform: P, reporter: &mut R)
//!   -> Result<(), mxt_rmi::Error<I::Error>>
//! where
//!   I: I2c,
//!   CHG: InputPin + Wait,
//!   D: DelayNs,
//!   P: Platform,
//!   R: Reporter,
//! {
//!   let config = Config::default().with_axes(4095, 4095);
//!   let device = Mxt::new(MxtI2c::new(i2c, config.address), chg, delay, config);
//!   let mut controller = Controller::new(device, platform);
//!   controller.probe(None).await?;
//!   loop {
//!     controller.wait_and_service(reporter).await;
//!   }
//! }
//! ```

#[cfg(test)]
extern crate std;

#[macro_use]
mod fmt;

pub mod bus;
pub mod command;
mod config;
pub mod crc;
mod debounce;
pub mod firmware;
mod lifecycle;
pub mod mxt;
mod platform;
pub mod rmi4;
mod touch;

pub use config::*;
pub use debounce::{Debounce, DebounceState};
pub use lifecycle::{Controller, LifecycleState, ProbeOutcome};
pub use platform::{IrqGuard, Platform, PowerError};
pub use touch::{Contact, FingerSlot, Reporter, SlotEvent, SlotState, Slots, MAX_FINGERS};

/// Errors surfaced by the controller core.
///
/// `E` is the error type of the underlying [`bus::Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
  /// Bus transaction failed after the transport exhausted its retries.
  Transport(E),
  /// Object or function table could not be read or parsed.
  Discovery(DiscoveryError<E>),
  /// CRC read back from the device differs from the computed one.
  ChecksumMismatch { stored: u32, computed: u32 },
  /// Bootloader state mismatch or frame CRC failure.
  Protocol(ProtocolViolation),
  /// Firmware container or config blob failed validation.
  Validation(ValidationError),
  /// The operation needs an object or function the device does not expose.
  MissingObject(u8),
  /// A bounded wait ran out of polls.
  Timeout,
  /// Power rail switching failed.
  Power,
  /// Another command is already running, or the device would not go quiet.
  Busy,
  /// The layout has not been discovered yet.
  NotReady,
}

/// Table discovery failures. Fatal to device start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryError<E> {
  /// A read of the identification block or table failed.
  TransportFailure(E),
  /// The device reported more objects than the table can hold.
  AllocationLimitExceeded(u8),
  /// Report IDs would run into the reserved sentinel.
  ReportIdOverflow,
}

/// Bootloader protocol failures. Fatal to the flash in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolViolation {
  /// Bootloader reported a state other than the one the protocol expects.
  UnexpectedState { expected: u8, found: u8 },
  /// The bootloader rejected a frame CRC.
  FrameCrcFail,
  /// Status byte read from the bootloader address does not look like a bootloader.
  NotInBootloader(u8),
}

/// Firmware container or config blob validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ValidationError {
  /// Magic present but the file is shorter than the header.
  HeaderTruncated,
  /// Header length field does not match the container header size.
  HeaderLength(u32),
  /// `hdr_len + cfg_len + fw_len` differs from the file size.
  SizeMismatch { declared: u32, actual: u32 },
  MissingConfig,
  MissingFirmware,
  /// Config entry header or payload runs past the end of the blob.
  EntryTruncated { offset: usize },
  /// Config entry targets an object the device does not expose.
  UnknownObject(u8),
  /// Config entry is larger than the object on the device.
  LengthExceeded { object: u8, declared: u16, actual: u16 },
  /// Config entry instance is outside the object's instance range.
  InstanceExceeded { object: u8, instance: u8, instances: u16 },
  /// Register offset is outside the object.
  OffsetOutOfRange { object: u8, offset: u16 },
  /// Bootloader frame length runs past the end of the firmware.
  FrameTruncated { offset: usize },
}

impl<E> From<DiscoveryError<E>> for Error<E> {
  fn from(e: DiscoveryError<E>) -> Self {
    Error::Discovery(e)
  }
}

impl<E> From<ProtocolViolation> for Error<E> {
  fn from(e: ProtocolViolation) -> Self {
    Error::Protocol(e)
  }
}

impl<E> From<ValidationError> for Error<E> {
  fn from(e: ValidationError) -> Self {
    Error::Validation(e)
  }
}

impl<E> From<PowerError> for Error<E> {
  fn from(_: PowerError) -> Self {
    Error::Power
  }
}
