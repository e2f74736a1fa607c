//! Per-slot finger state and the reporting boundary.
//!
//! Both controller families decode their touch records into the same fixed
//! array of [`FingerSlot`]s. Decoders update slots and mark them dirty; a
//! flush then emits one [`SlotEvent`] per dirty slot, in slot order, followed
//! by a single [`Reporter::sync`].
//!
//! # Slot lifecycle
//!
//! ```text
//!   Inactive --press--> Press --flush--> Move --release--> Release --flush--> Inactive
//!                         \____________________release___^
//! ```
//!
//! - A slot only leaves `Inactive` through a press. Motion reported for an
//!   inactive slot is ignored, so a contact can never appear mid-gesture.
//! - The slot index is stable for the whole contact.
//! - A slot is emitted at most once per flush, and only when it changed.

/// Number of tracked touch points.
pub const MAX_FINGERS: usize = 10;

/// State of one contact slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotState {
  #[default]
  Inactive,
  /// First detect of a new contact, not flushed yet.
  Press,
  /// Contact that has been reported at least once.
  Move,
  /// Lift-off waiting for its flush.
  Release,
}

impl SlotState {
  /// `true` while the slot holds a contact, including a pending release.
  pub const fn is_active(self) -> bool {
    !matches!(self, SlotState::Inactive)
  }
}

/// Decoded sample for a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Contact {
  pub x: u16,
  pub y: u16,
  pub pressure: u16,
  pub width: u16,
  pub minor_width: Option<u16>,
}

impl Contact {
  pub const fn new(x: u16, y: u16, pressure: u16, width: u16) -> Self {
    Self { x, y, pressure, width, minor_width: None }
  }

  pub const fn with_minor_width(mut self, minor: u16) -> Self {
    self.minor_width = Some(minor);
    self
  }
}

/// Tracked state of a single touch point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FingerSlot {
  pub state: SlotState,
  pub x: u16,
  pub y: u16,
  /// Pressure. Zero only after a release.
  pub z: u16,
  pub width: u16,
  pub minor_width: Option<u16>,
  /// Motion samples since the press.
  pub move_count: u32,
}

/// One slot snapshot handed to the [`Reporter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotEvent {
  pub slot: u8,
  /// `false` for the frame that ends a contact.
  pub active: bool,
  pub x: u16,
  pub y: u16,
  pub pressure: u16,
  pub width: u16,
  pub minor_width: Option<u16>,
}

/// Consumer of decoded input, typically an input subsystem or an HID report
/// builder.
pub trait Reporter {
  /// A dirty slot is being flushed.
  fn contact(&mut self, event: SlotEvent);

  /// A touch key or button changed state.
  fn key(&mut self, _code: u16, _pressed: bool) {}

  /// End of one batch of updates.
  fn sync(&mut self);

  /// The device reported its health flags. Reset notifications arrive here.
  fn status(&mut self, _flags: u8) {}
}

/// Fixed array of finger slots with a per-pass dirty mask.
#[derive(Debug, Clone, Default)]
pub struct Slots {
  slots: [FingerSlot; MAX_FINGERS],
  dirty: u16,
}

impl Slots {
  pub const fn new() -> Self {
    const EMPTY: FingerSlot =
      FingerSlot { state: SlotState::Inactive, x: 0, y: 0, z: 0, width: 0, minor_width: None, move_count: 0 };
    Self { slots: [EMPTY; MAX_FINGERS], dirty: 0 }
  }

  pub fn get(&self, index: usize) -> Option<&FingerSlot> {
    self.slots.get(index)
  }

  pub fn iter(&self) -> impl Iterator<Item = &FingerSlot> + '_ {
    self.slots.iter()
  }

  pub fn is_dirty(&self, index: usize) -> bool {
    index < MAX_FINGERS && self.dirty & (1 << index) != 0
  }

  pub fn has_dirty(&self) -> bool {
    self.dirty != 0
  }

  /// Number of slots holding a contact.
  pub fn active_count(&self) -> usize {
    self.slots.iter().filter(|s| s.state.is_active()).count()
  }

  pub(crate) fn is_active(&self, index: usize) -> bool {
    self.slots.get(index).is_some_and(|s| s.state.is_active())
  }

  /// Start a new contact in `index`.
  pub(crate) fn press(&mut self, index: usize, c: Contact) {
    let Some(slot) = self.slots.get_mut(index) else { return };
    slot.state = SlotState::Press;
    slot.move_count = 0;
    Self::apply(slot, c);
    self.dirty |= 1 << index;
  }

  /// Update an existing contact. Returns `false` when the slot holds no
  /// contact, in which case nothing changes.
  pub(crate) fn motion(&mut self, index: usize, c: Contact) -> bool {
    let Some(slot) = self.slots.get_mut(index) else { return false };
    if matches!(slot.state, SlotState::Inactive | SlotState::Release) {
      return false;
    }
    slot.move_count = slot.move_count.wrapping_add(1);
    Self::apply(slot, c);
    self.dirty |= 1 << index;
    true
  }

  /// Press for a new contact, motion for a known one.
  pub(crate) fn track(&mut self, index: usize, c: Contact) {
    if self.is_active(index) {
      self.motion(index, c);
    } else {
      self.press(index, c);
    }
  }

  /// End the contact in `index` with its last reported width.
  pub(crate) fn release(&mut self, index: usize, width: u16) {
    let Some(slot) = self.slots.get_mut(index) else { return };
    if !slot.state.is_active() {
      return;
    }
    slot.state = SlotState::Release;
    slot.z = 0;
    slot.width = width;
    self.dirty |= 1 << index;
  }

  fn apply(slot: &mut FingerSlot, c: Contact) {
    slot.x = c.x;
    slot.y = c.y;
    slot.z = c.pressure;
    slot.width = c.width;
    slot.minor_width = c.minor_width;
  }

  /// Emit every dirty slot and sync once. Returns the number of events sent.
  pub fn flush<R: Reporter + ?Sized>(&mut self, reporter: &mut R) -> usize {
    let mut sent = 0;
    for (index, slot) in self.slots.iter_mut().enumerate() {
      if self.dirty & (1 << index) == 0 || !slot.state.is_active() {
        continue;
      }
      let active = slot.state != SlotState::Release;
      reporter.contact(SlotEvent {
        slot: index as u8,
        active,
        x: slot.x,
        y: slot.y,
        pressure: slot.z,
        width: slot.width,
        minor_width: slot.minor_width,
      });
      sent += 1;

      if active {
        slot.state = SlotState::Move;
      } else {
        *slot = FingerSlot::default();
      }
    }
    self.dirty = 0;
    if sent > 0 {
      reporter.sync();
    }
    sent
  }

  /// Release every held contact and flush.
  pub fn release_all<R: Reporter + ?Sized>(&mut self, reporter: &mut R) -> usize {
    for index in 0..MAX_FINGERS {
      let width = self.slots[index].width;
      self.release(index, width);
    }
    self.flush(reporter)
  }
}


#[cfg(test)]
mod tests {
  use super::recorder::Recorder;
  use super::*;

  #[test]
  fn press_flushes_then_becomes_move() {
    let mut slots = Slots::new();
    let mut rec = Recorder::default();

    slots.press(2, Contact::new(100, 200, 30, 5));
    assert_eq!(slots.get(2).map(|s| s.state), Some(SlotState::Press));
    assert!(slots.is_dirty(2));

    assert_eq!(slots.flush(&mut rec), 1);
    assert_eq!(slots.get(2).map(|s| s.state), Some(SlotState::Move));
    assert!(!slots.has_dirty());

    let events = rec.contacts();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].slot, 2);
    assert!(events[0].active);
    assert_eq!((events[0].x, events[0].y, events[0].pressure), (100, 200, 30));
    assert_eq!(rec.syncs(), 1);
  }

  #[test]
  fn motion_on_inactive_slot_is_ignored() {
    let mut slots = Slots::new();
    assert!(!slots.motion(0, Contact::new(1, 1, 1, 1)));
    assert_eq!(slots.get(0).map(|s| s.state), Some(SlotState::Inactive));
    assert!(!slots.has_dirty());
  }

  #[test]
  fn move_count_resets_on_press() {
    let mut slots = Slots::new();
    slots.press(0, Contact::new(1, 1, 1, 1));
    slots.motion(0, Contact::new(2, 2, 1, 1));
    slots.motion(0, Contact::new(3, 3, 1, 1));
    assert_eq!(slots.get(0).map(|s| s.move_count), Some(2));
    slots.press(0, Contact::new(4, 4, 1, 1));
    assert_eq!(slots.get(0).map(|s| s.move_count), Some(0));
  }

  #[test]
  fn release_emits_inactive_event_and_frees_slot() {
    let mut slots = Slots::new();
    let mut rec = Recorder::default();
    slots.press(1, Contact::new(10, 10, 20, 3));
    slots.flush(&mut rec);

    slots.release(1, 7);
    let slot = slots.get(1).copied().unwrap_or_default();
    assert_eq!((slot.state, slot.z, slot.width), (SlotState::Release, 0, 7));

    slots.flush(&mut rec);
    let last = rec.contacts().pop().expect("release event");
    assert!(!last.active);
    assert_eq!((last.pressure, last.width), (0, 7));
    assert_eq!(slots.get(1).map(|s| s.state), Some(SlotState::Inactive));
  }

  #[test]
  fn flush_without_changes_is_silent() {
    let mut slots = Slots::new();
    let mut rec = Recorder::default();
    slots.press(0, Contact::new(1, 1, 1, 1));
    slots.flush(&mut rec);
    assert_eq!(slots.flush(&mut rec), 0);
    assert_eq!(rec.syncs(), 1);
  }

  #[test]
  fn flush_orders_by_slot_index() {
    let mut slots = Slots::new();
    let mut rec = Recorder::default();
    slots.press(5, Contact::new(5, 5, 1, 1));
    slots.press(0, Contact::new(0, 0, 1, 1));
    slots.press(3, Contact::new(3, 3, 1, 1));
    slots.flush(&mut rec);
    let order: std::vec::Vec<u8> = rec.contacts().iter().map(|e| e.slot).collect();
    assert_eq!(order, [0, 3, 5]);
  }

  #[test]
  fn release_all_only_touches_held_slots() {
    let mut slots = Slots::new();
    let mut rec = Recorder::default();
    slots.press(0, Contact::new(1, 1, 1, 4));
    slots.press(4, Contact::new(1, 1, 1, 6));
    slots.flush(&mut rec);

    assert_eq!(slots.release_all(&mut rec), 2);
    assert_eq!(slots.active_count(), 0);
    assert_eq!(slots.release_all(&mut rec), 0);
  }
}
