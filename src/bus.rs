//! Register transport contracts and the I2C adapters that implement them.
//!
//! The decoding core never touches an I2C peripheral directly. It speaks to a
//! [`Transport`], an addressed register read/write pair that is expected to
//! retry a few times before giving up. maXTouch parts additionally expose a
//! bootloader on a second address which takes raw frames without a register
//! prefix, reached through [`BootloaderPort`].
//!
//! RMI4 parts use an 8-bit register offset inside 256-byte pages. [`Rmi4I2c`]
//! takes the page from the high byte of the 16-bit address and selects it
//! only when it differs from the page it last selected.

use embedded_hal_async::i2c::{I2c, SevenBitAddress};

/// Attempts made by the adapters before a bus error is surfaced.
pub const RETRY_LIMIT: usize = 3;

/// Largest payload sent in one bus write. Longer writes are split and the
/// register address advanced, relying on the device's auto-increment.
pub const WRITE_CHUNK: usize = 64;

/// Read failures always logged before rate limiting starts.
const ERROR_LOG_BURST: u32 = 10;
/// Past the burst, one failure in this many is logged.
const ERROR_LOG_EVERY: u32 = 2000;
/// The failure counter restarts above this.
const ERROR_COUNT_WRAP: u32 = 60000;

/// Count a failed interrupt-time read, logging with rate limiting so a wedged
/// bus does not flood the log.
pub(crate) fn count_read_error(errors: &mut u32) {
  *errors += 1;
  if *errors < ERROR_LOG_BURST || *errors % ERROR_LOG_EVERY == 0 {
    error!("failed to read interrupt data ({})", *errors);
  } else if *errors > ERROR_COUNT_WRAP {
    *errors = 0;
    error!("read error counter reset");
  }
}

/// Addressed register access.
#[allow(async_fn_in_trait)]
pub trait Transport {
  type Error;

  /// Fill `buf` from consecutive registers starting at `addr`.
  async fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error>;

  /// Write `data` to consecutive registers starting at `addr`.
  async fn write(&mut self, addr: u16, data: &[u8]) -> Result<(), Self::Error>;

  /// Forget any cached bus state. Called after the device lost power.
  fn invalidate(&mut self) {}
}

/// Raw access to the maXTouch bootloader address.
#[allow(async_fn_in_trait)]
pub trait BootloaderPort {
  type Error;

  async fn recv(&mut self, buf: &mut [u8]) -> Result<(), Self::Error>;

  async fn send(&mut self, data: &[u8]) -> Result<(), Self::Error>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
  type Error = T::Error;

  async fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
    T::read(self, addr, buf).await
  }

  async fn write(&mut self, addr: u16, data: &[u8]) -> Result<(), Self::Error> {
    T::write(self, addr, data).await
  }

  fn invalidate(&mut self) {
    T::invalidate(self)
  }
}

/// maXTouch application and bootloader I2C addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MxtAddress {
  pub app: u8,
  pub bootloader: u8,
}

impl MxtAddress {
  pub const fn new(app: u8, bootloader: u8) -> Self {
    Self { app, bootloader }
  }

  /// Bootloader address paired with a standard application address.
  pub const fn for_app(app: u8) -> Self {
    let bootloader = match app {
      0x4A | 0x4B | 0x4C | 0x4D | 0x5A | 0x5B => app - 0x26,
      _ => app,
    };
    Self { app, bootloader }
  }
}

impl Default for MxtAddress {
  fn default() -> Self {
    Self::for_app(0x4A)
  }
}

/// maXTouch register transport: 16-bit little-endian register address
/// followed by data.
pub struct MxtI2c<I> {
  i2c: I,
  address: MxtAddress,
}

impl<I> MxtI2c<I> {
  pub fn new(i2c: I, address: MxtAddress) -> Self {
    Self { i2c, address }
  }

  pub fn address(&self) -> MxtAddress {
    self.address
  }

  pub fn release(self) -> I {
    self.i2c
  }
}

impl<I, E> Transport for MxtI2c<I>
where
  I: I2c<SevenBitAddress, Error = E>,
{
  type Error = E;

  async fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), E> {
    let reg = addr.to_le_bytes();
    let mut attempt = 1;
    loop {
      match self.i2c.write_read(self.address.app, &reg, buf).await {
        Ok(()) => return Ok(()),
        Err(e) if attempt >= RETRY_LIMIT => return Err(e),
        Err(_) => {
          warn!("mxt: read retry {} at {}", attempt, addr);
          attempt += 1;
        }
      }
    }
  }

  async fn write(&mut self, addr: u16, data: &[u8]) -> Result<(), E> {
    let mut reg = addr;
    for chunk in data.chunks(WRITE_CHUNK) {
      let mut buf = [0u8; WRITE_CHUNK + 2];
      buf[..2].copy_from_slice(&reg.to_le_bytes());
      buf[2..2 + chunk.len()].copy_from_slice(chunk);
      let frame = &buf[..2 + chunk.len()];

      let mut attempt = 1;
      loop {
        match self.i2c.write(self.address.app, frame).await {
          Ok(()) => break,
          Err(e) if attempt >= RETRY_LIMIT => return Err(e),
          Err(_) => {
            warn!("mxt: write retry {} at {}", attempt, reg);
            attempt += 1;
          }
        }
      }
      reg = reg.wrapping_add(chunk.len() as u16);
    }
    Ok(())
  }
}

impl<I, E> BootloaderPort for MxtI2c<I>
where
  I: I2c<SevenBitAddress, Error = E>,
{
  type Error = E;

  async fn recv(&mut self, buf: &mut [u8]) -> Result<(), E> {
    self.i2c.read(self.address.bootloader, buf).await
  }

  async fn send(&mut self, data: &[u8]) -> Result<(), E> {
    self.i2c.write(self.address.bootloader, data).await
  }
}

/// RMI4 page select register, present at the same offset on every page.
const RMI4_PAGE_SELECT: u8 = 0xFF;

/// Synaptics RMI4 register transport.
///
/// The high byte of a register address is the page, the low byte the offset
/// sent on the wire.
pub struct Rmi4I2c<I> {
  i2c: I,
  address: u8,
  page: Option<u8>,
}

impl<I> Rmi4I2c<I> {
  pub fn new(i2c: I, address: u8) -> Self {
    Self { i2c, address, page: None }
  }

  pub fn address(&self) -> u8 {
    self.address
  }

  /// Page the device is known to have selected.
  pub fn page(&self) -> Option<u8> {
    self.page
  }

  pub fn release(self) -> I {
    self.i2c
  }
}

impl<I, E> Rmi4I2c<I>
where
  I: I2c<SevenBitAddress, Error = E>,
{
  async fn select_page(&mut self, addr: u16) -> Result<(), E> {
    let page = (addr >> 8) as u8;
    if self.page == Some(page) {
      return Ok(());
    }

    let mut attempt = 1;
    loop {
      match self.i2c.write(self.address, &[RMI4_PAGE_SELECT, page]).await {
        Ok(()) => {
          self.page = Some(page);
          return Ok(());
        }
        Err(e) if attempt >= RETRY_LIMIT => {
          self.page = None;
          return Err(e);
        }
        Err(_) => {
          warn!("rmi4: page select retry {} for page {}", attempt, page);
          attempt += 1;
        }
      }
    }
  }
}

impl<I, E> Transport for Rmi4I2c<I>
where
  I: I2c<SevenBitAddress, Error = E>,
{
  type Error = E;

  async fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), E> {
    self.select_page(addr).await?;
    let reg = [addr as u8];
    let mut attempt = 1;
    loop {
      match self.i2c.write_read(self.address, &reg, buf).await {
        Ok(()) => return Ok(()),
        Err(e) if attempt >= RETRY_LIMIT => return Err(e),
        Err(_) => {
          warn!("rmi4: read retry {} at {}", attempt, addr);
          attempt += 1;
        }
      }
    }
  }

  async fn write(&mut self, addr: u16, data: &[u8]) -> Result<(), E> {
    self.select_page(addr).await?;
    let mut reg = addr as u8;
    for chunk in data.chunks(WRITE_CHUNK) {
      let mut buf = [0u8; WRITE_CHUNK + 1];
      buf[0] = reg;
      buf[1..1 + chunk.len()].copy_from_slice(chunk);
      let frame = &buf[..1 + chunk.len()];

      let mut attempt = 1;
      loop {
        match self.i2c.write(self.address, frame).await {
          Ok(()) => break,
          Err(e) if attempt >= RETRY_LIMIT => return Err(e),
          Err(_) => {
            warn!("rmi4: write retry {} at {}", attempt, addr);
            attempt += 1;
          }
        }
      }
      reg = reg.wrapping_add(chunk.len() as u8);
    }
    Ok(())
  }

  fn invalidate(&mut self) {
    self.page = None;
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use embassy_futures::block_on;
  use embedded_hal::i2c::{ErrorKind, ErrorType, Operation};

  #[derive(Default)]
  struct MockI2c {
    writes: std::vec::Vec<(u8, std::vec::Vec<u8>)>,
    fail: usize,
  }

  impl ErrorType for MockI2c {
    type Error = ErrorKind;
  }

  impl I2c for MockI2c {
    async fn transaction(&mut self, address: u8, ops: &mut [Operation<'_>]) -> Result<(), ErrorKind> {
      if self.fail > 0 {
        self.fail -= 1;
        return Err(ErrorKind::Other);
      }
      for op in ops {
        match op {
          Operation::Write(data) => self.writes.push((address, data.to_vec())),
          Operation::Read(buf) => buf.fill(0xA5),
        }
      }
      Ok(())
    }
  }

  #[test]
  fn read_error_counter_wraps() {
    let mut errors = 0;
    count_read_error(&mut errors);
    assert_eq!(errors, 1);
    errors = ERROR_COUNT_WRAP;
    count_read_error(&mut errors);
    assert_eq!(errors, 0);
  }

  #[test]
  fn bootloader_address_follows_application_address() {
    assert_eq!(MxtAddress::for_app(0x4A).bootloader, 0x24);
    assert_eq!(MxtAddress::for_app(0x4B).bootloader, 0x25);
    assert_eq!(MxtAddress::for_app(0x10).bootloader, 0x10);
  }

  #[test]
  fn mxt_writes_are_chunked_with_little_endian_address() {
    let mut bus = MxtI2c::new(MockI2c::default(), MxtAddress::default());
    let data = [7u8; 100];
    block_on(bus.write(0x0120, &data)).unwrap();
    let writes = &bus.i2c.writes;
    assert_eq!(writes.len(), 2);
    assert_eq!(&writes[0].1[..2], &[0x20, 0x01]);
    assert_eq!(writes[0].1.len(), 2 + WRITE_CHUNK);
    assert_eq!(&writes[1].1[..2], &[0x60, 0x01]);
    assert_eq!(writes[1].1.len(), 2 + 100 - WRITE_CHUNK);
  }

  #[test]
  fn mxt_read_gives_up_after_retry_limit() {
    let mut bus = MxtI2c::new(MockI2c { fail: RETRY_LIMIT, ..Default::default() }, MxtAddress::default());
    let mut buf = [0u8; 2];
    assert_eq!(block_on(bus.read(0, &mut buf)), Err(ErrorKind::Other));

    let mut bus = MxtI2c::new(MockI2c { fail: RETRY_LIMIT - 1, ..Default::default() }, MxtAddress::default());
    assert_eq!(block_on(bus.read(0, &mut buf)), Ok(()));
    assert_eq!(buf, [0xA5, 0xA5]);
  }

  #[test]
  fn rmi4_selects_page_only_when_it_changes() {
    let mut bus = Rmi4I2c::new(MockI2c::default(), 0x20);
    let mut buf = [0u8; 1];
    block_on(bus.read(0x0123, &mut buf)).unwrap();
    block_on(bus.read(0x0140, &mut buf)).unwrap();
    block_on(bus.write(0x0012, &[0x80])).unwrap();

    let writes: std::vec::Vec<_> = bus.i2c.writes.iter().map(|(_, d)| d.clone()).collect();
    assert_eq!(
      writes,
      std::vec![
        std::vec![0xFF, 0x01],
        std::vec![0x23],
        std::vec![0x40],
        std::vec![0xFF, 0x00],
        std::vec![0x12, 0x80],
      ]
    );
    assert_eq!(bus.page(), Some(0));
  }

  #[test]
  fn rmi4_invalidate_forces_page_select() {
    let mut bus = Rmi4I2c::new(MockI2c::default(), 0x20);
    let mut buf = [0u8; 1];
    block_on(bus.read(0x0010, &mut buf)).unwrap();
    bus.invalidate();
    assert_eq!(bus.page(), None);
    block_on(bus.read(0x0010, &mut buf)).unwrap();
    assert_eq!(bus.i2c.writes.iter().filter(|(_, d)| d[0] == 0xFF).count(), 2);
  }

  #[test]
  fn rmi4_failed_page_select_clears_cache() {
    let mut bus = Rmi4I2c::new(MockI2c { fail: RETRY_LIMIT, ..Default::default() }, 0x20);
    let mut buf = [0u8; 1];
    assert_eq!(block_on(bus.read(0x0210, &mut buf)), Err(ErrorKind::Other));
    assert_eq!(bus.page(), None);
    assert!(bus.i2c.writes.is_empty());
  }
}
