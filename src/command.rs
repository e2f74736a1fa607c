//! Textual diagnostic commands: `"name,p1,p2,..."` in, status and result
//! string out.
//!
//! Only one command runs at a time. [`CommandGate`] rejects a second command
//! instead of queueing it, and [`execute`] never surfaces handler failures as
//! errors: they come back as [`CommandStatus::Fail`] with an `NG` result.

use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::digital::InputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;
use heapless::{String, Vec};

use crate::bus::Transport;
use crate::lifecycle::Controller;
use crate::mxt::defs::{ObjectType, T9_THRESHOLD};
use crate::mxt::{DiagnosticMode, ScanSummary, REFERENCE_OFFSET};
use crate::platform::Platform;
use crate::touch::Reporter;
use crate::Error;

pub const MAX_PARAMS: usize = 5;
pub const RESULT_LEN: usize = 64;

const CHIP_VENDOR: &str = "ATMEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandStatus {
  #[default]
  Waiting,
  Running,
  Ok,
  Fail,
  NotApplicable,
}

impl CommandStatus {
  pub const fn as_str(self) -> &'static str {
    match self {
      CommandStatus::Waiting => "WAITING",
      CommandStatus::Running => "RUNNING",
      CommandStatus::Ok => "OK",
      CommandStatus::Fail => "FAIL",
      CommandStatus::NotApplicable => "NOT_APPLICABLE",
    }
  }
}

/// Single "command is running" flag.
#[derive(Debug, Default)]
pub struct CommandGate {
  running: AtomicBool,
}

impl CommandGate {
  pub const fn new() -> Self {
    Self { running: AtomicBool::new(false) }
  }

  /// Claim the gate, or `None` if another command holds it.
  pub fn try_begin(&self) -> Option<CommandTicket<'_>> {
    self
      .running
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| CommandTicket { gate: self })
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }
}

/// Holds the gate until dropped.
pub struct CommandTicket<'a> {
  gate: &'a CommandGate,
}

impl Drop for CommandTicket<'_> {
  fn drop(&mut self) {
    self.gate.running.store(false, Ordering::Release);
  }
}

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command<'a> {
  pub name: &'a str,
  /// Parameters that fail to parse read as `0`. Parameters past
  /// [`MAX_PARAMS`] are dropped.
  pub params: Vec<i32, MAX_PARAMS>,
}

impl<'a> Command<'a> {
  pub fn parse(line: &'a str) -> Self {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let mut parts = line.split(',');
    let name = parts.next().unwrap_or_default();
    let mut params = Vec::new();
    for raw in parts.take(MAX_PARAMS) {
      let value = raw.trim().parse().unwrap_or_else(|_| {
        warn!("cmd: bad parameter {}", raw);
        0
      });
      let _ = params.push(value);
    }
    Self { name, params }
  }

  fn param(&self, i: usize) -> i32 {
    self.params.get(i).copied().unwrap_or(0)
  }
}

/// Outcome of one command: its status and a `"name:value"` result string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
  pub status: CommandStatus,
  pub text: String<RESULT_LEN>,
}

impl CommandResult {
  fn new(name: &str) -> Self {
    let mut text = String::new();
    let _ = write!(text, "{}:", name);
    Self { status: CommandStatus::Running, text }
  }

  /// The part after `name:`.
  pub fn value(&self) -> &str {
    self.text.split_once(':').map_or("", |(_, v)| v)
  }

  fn ok(mut self, value: core::fmt::Arguments<'_>) -> Self {
    if self.text.write_fmt(value).is_err() {
      warn!("cmd: result truncated");
    }
    self.status = CommandStatus::Ok;
    self
  }

  fn fail(mut self) -> Self {
    let _ = self.text.push_str("NG");
    self.status = CommandStatus::Fail;
    self
  }

  fn not_applicable(mut self) -> Self {
    let _ = self.text.push_str("NA");
    self.status = CommandStatus::NotApplicable;
    self
  }
}

/// Run one command line against the controller. Fails only with
/// [`Error::Busy`] when another command holds `gate`.
pub async fn execute<T, E, CHG, D, P, R>(
  gate: &CommandGate,
  controller: &mut Controller<T, CHG, D, P>,
  line: &str,
  reporter: &mut R,
) -> Result<CommandResult, Error<E>>
where
  T: Transport<Error = E>,
  CHG: InputPin + Wait,
  D: DelayNs,
  P: Platform,
  R: Reporter + ?Sized,
{
  let Some(_ticket) = gate.try_begin() else {
    error!("cmd: other command is running");
    return Err(Error::Busy);
  };

  let cmd = Command::parse(line);
  info!("cmd: {} {:?}", cmd.name, cmd.params.as_slice());
  let result = CommandResult::new(cmd.name);
  let result = match cmd.name {
    "get_chip_vendor" => result.ok(format_args!("{}", CHIP_VENDOR)),
    "get_chip_name" => match controller.device().info() {
      Some(info) => result.ok(format_args!("MXT{:02X}{:02X}", info.family_id, info.variant_id)),
      None => result.fail(),
    },
    "get_fw_ver_ic" => match controller.device().info() {
      Some(info) => result.ok(format_args!("AT00{:02x}{:02x}", info.version, info.build)),
      None => result.fail(),
    },
    "get_config_ver" => match controller.device().read_config_crc().await {
      Ok(crc) => result.ok(format_args!("AT_0x{:06X}", crc)),
      Err(_) => result.fail(),
    },
    "get_threshold" => match controller.device().read_object(ObjectType::MultiTouchScreen, T9_THRESHOLD).await {
      Ok(threshold) => result.ok(format_args!("{}", threshold)),
      Err(_) => result.fail(),
    },
    "get_x_num" => match controller.device().info() {
      Some(info) => result.ok(format_args!("{}", info.matrix_x)),
      None => result.fail(),
    },
    "get_y_num" => match controller.device().info() {
      Some(info) => result.ok(format_args!("{}", info.matrix_y)),
      None => result.fail(),
    },
    "run_reference_read" => match controller.device().reference_scan().await {
      Ok(ScanSummary::Reference { min, max, .. }) => result.ok(format_args!("{},{}", min, max)),
      _ => result.fail(),
    },
    "run_delta_read" => match controller.device().delta_scan().await {
      Ok(_) => result.ok(format_args!("")),
      Err(_) => result.fail(),
    },
    "find_delta" => {
      let device = controller.device();
      match device.delta_scan().await {
        Ok(ScanSummary::Delta { node, .. }) => match device.node_to_xy(node) {
          Some((x, y)) => result.ok(format_args!("{},{}", x, y)),
          None => result.fail(),
        },
        _ => result.fail(),
      }
    }
    "get_reference" => match read_node_at(controller, &cmd, DiagnosticMode::Reference).await {
      Some(raw) => result.ok(format_args!("{}", raw.saturating_sub(REFERENCE_OFFSET))),
      None => result.fail(),
    },
    "get_delta" => match read_node_at(controller, &cmd, DiagnosticMode::Delta).await {
      Some(raw) => result.ok(format_args!("{}", raw as i16)),
      None => result.fail(),
    },
    "module_off_master" => match controller.stop(reporter) {
      Ok(()) => result.ok(format_args!("OK")),
      Err(_) => result.fail(),
    },
    "module_on_master" => match controller.start().await {
      Ok(()) => result.ok(format_args!("OK")),
      Err(_) => result.fail(),
    },
    _ => result.not_applicable(),
  };

  info!("cmd: {} -> {}", result.text.as_str(), result.status.as_str());
  Ok(result)
}

/// Node value at `(param0, param1)`, or `None` on bad coordinates or a
/// failed read.
async fn read_node_at<T, E, CHG, D, P>(
  controller: &mut Controller<T, CHG, D, P>,
  cmd: &Command<'_>,
  mode: DiagnosticMode,
) -> Option<u16>
where
  T: Transport<Error = E>,
  CHG: InputPin + Wait,
  D: DelayNs,
  P: Platform,
{
  let (x, y) = (cmd.param(0), cmd.param(1));
  let device = controller.device();
  let node = match (u16::try_from(x), u16::try_from(y)) {
    (Ok(x), Ok(y)) => device.xy_to_node(x, y),
    _ => None,
  };
  let Some(node) = node else {
    error!("cmd: parameter error: {},{}", x, y);
    return None;
  };
  device.read_node(mode, node).await.ok()
}
