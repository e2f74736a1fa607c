/// Phase of a [`Debounce`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DebounceState<T> {
  /// Nothing scheduled.
  Idle,
  /// Waiting for `due_ms` before delivering `value`.
  Pending { value: T, due_ms: u32 },
  /// `value` was handed out and has not been superseded.
  Fired { value: T },
}

/// Cancel-then-reschedule timer driven by caller supplied timestamps.
///
/// Scheduling while a value is pending replaces it and restarts the delay, so
/// only the last value of a burst is delivered. Time is a wrapping millisecond
/// counter.
#[derive(Debug, Clone, Copy)]
pub struct Debounce<T> {
  delay_ms: u32,
  state: DebounceState<T>,
}

impl<T: Copy> Debounce<T> {
  pub const fn new(delay_ms: u32) -> Self {
    Self { delay_ms, state: DebounceState::Idle }
  }

  pub fn state(&self) -> DebounceState<T> {
    self.state
  }

  pub fn is_pending(&self) -> bool {
    matches!(self.state, DebounceState::Pending { .. })
  }

  pub fn schedule(&mut self, value: T, now_ms: u32) {
    self.state = DebounceState::Pending { value, due_ms: now_ms.wrapping_add(self.delay_ms) };
  }

  pub fn cancel(&mut self) {
    if self.is_pending() {
      self.state = DebounceState::Idle;
    }
  }

  /// Deliver the pending value once its delay has elapsed.
  pub fn poll(&mut self, now_ms: u32) -> Option<T> {
    match self.state {
      DebounceState::Pending { value, due_ms } if Self::reached(now_ms, due_ms) => {
        self.state = DebounceState::Fired { value };
        Some(value)
      }
      _ => None,
    }
  }

  fn reached(now: u32, due: u32) -> bool {
    // Wrapping comparison, valid for delays below 2^31 ms.
    now.wrapping_sub(due) < 0x8000_0000
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fires_after_delay() {
    let mut d = Debounce::new(200);
    d.schedule(true, 1000);
    assert_eq!(d.poll(1100), None);
    assert_eq!(d.poll(1200), Some(true));
    assert_eq!(d.state(), DebounceState::Fired { value: true });
    assert_eq!(d.poll(1300), None);
  }

  #[test]
  fn reschedule_keeps_only_last_value() {
    let mut d = Debounce::new(200);
    d.schedule(true, 0);
    d.schedule(false, 150);
    assert_eq!(d.poll(250), None);
    assert_eq!(d.poll(350), Some(false));
  }

  #[test]
  fn survives_counter_wrap() {
    let mut d = Debounce::new(200);
    d.schedule(1u8, u32::MAX - 50);
    assert_eq!(d.poll(u32::MAX), None);
    assert_eq!(d.poll(150), Some(1));
  }

  #[test]
  fn cancel_returns_to_idle() {
    let mut d = Debounce::new(10);
    d.schedule(1u8, 0);
    d.cancel();
    assert_eq!(d.state(), DebounceState::Idle);
    assert_eq!(d.poll(100), None);
  }
}
