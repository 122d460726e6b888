//! Process-wide virtual input.
//!
//! An [`InputRegistry`] is the shared "virtual controller" surface:
//! callers on any thread flip button/touch state, and every session that
//! was constructed with the same registry samples it once per frame step.
//! Sharing is the point — setting a virtual button affects *all* sessions
//! reading virtual input, not just one. Sessions that need isolated input
//! are simply given their own registry.
//!
//! The registry carries its own locks, independent of any session's
//! machine lock, so input never contends with frame stepping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::Lazy;

/// Virtual buttons: the NES pad plus the extended set consumed by the
/// dual-screen console variant (ignored by the NES core).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualButton {
    A,
    B,
    Select,
    Start,
    Up,
    Down,
    Left,
    Right,
    X,
    Y,
    L,
    R,
}

/// Number of virtual buttons tracked by a registry.
pub const VIRTUAL_BUTTON_COUNT: usize = 12;

impl VirtualButton {
    pub(crate) const fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::Select => 2,
            Self::Start => 3,
            Self::Up => 4,
            Self::Down => 5,
            Self::Left => 6,
            Self::Right => 7,
            Self::X => 8,
            Self::Y => 9,
            Self::L => 10,
            Self::R => 11,
        }
    }
}

/// Pointer state for the touch-capable console variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchState {
    pub x: u16,
    pub y: u16,
    pub pressed: bool,
}

/// Thread-safe shared button/touch state.
#[derive(Debug, Default)]
pub struct InputRegistry {
    buttons: Mutex<[bool; VIRTUAL_BUTTON_COUNT]>,
    touch: Mutex<Option<TouchState>>,
    reset: AtomicBool,
    poweroff: AtomicBool,
}

impl InputRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_button(&self, button: VirtualButton, pressed: bool) {
        self.lock_buttons()[button.index()] = pressed;
    }

    /// One coherent copy of all button states.
    #[must_use]
    pub fn snapshot(&self) -> [bool; VIRTUAL_BUTTON_COUNT] {
        *self.lock_buttons()
    }

    pub fn set_touch(&self, x: u16, y: u16, pressed: bool) {
        let state = TouchState { x, y, pressed };
        match self.touch.lock() {
            Ok(mut guard) => *guard = Some(state),
            Err(mut poisoned) => **poisoned.get_mut() = Some(state),
        }
    }

    #[must_use]
    pub fn touch(&self) -> Option<TouchState> {
        match self.touch.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => **poisoned.get_ref(),
        }
    }

    /// Ask every consuming session to reset at its next frame boundary.
    pub fn request_reset(&self) {
        self.reset.store(true, Ordering::Release);
    }

    pub(crate) fn take_reset_request(&self) -> bool {
        self.reset.swap(false, Ordering::AcqRel)
    }

    /// Ask every consuming session to power off.
    pub fn request_poweroff(&self) {
        self.poweroff.store(true, Ordering::Release);
    }

    pub(crate) fn poweroff_requested(&self) -> bool {
        self.poweroff.load(Ordering::Acquire)
    }

    fn lock_buttons(&self) -> MutexGuard<'_, [bool; VIRTUAL_BUTTON_COUNT]> {
        // A poisoned button lock just means a panicking reader; the plain
        // state array is still valid.
        match self.buttons.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The process-wide registry used by the C interface and the simple
/// start-up wrapper. Rust callers normally inject their own registry.
pub fn shared_registry() -> Arc<InputRegistry> {
    static SHARED: Lazy<Arc<InputRegistry>> = Lazy::new(|| Arc::new(InputRegistry::new()));
    Arc::clone(&SHARED)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn buttons_round_trip() {
        let registry = InputRegistry::new();
        registry.set_button(VirtualButton::A, true);
        registry.set_button(VirtualButton::Start, true);

        let snapshot = registry.snapshot();
        assert!(snapshot[VirtualButton::A.index()]);
        assert!(snapshot[VirtualButton::Start.index()]);
        assert!(!snapshot[VirtualButton::B.index()]);

        registry.set_button(VirtualButton::A, false);
        assert!(!registry.snapshot()[VirtualButton::A.index()]);
    }

    #[test]
    fn touch_replaces_previous_state() {
        let registry = InputRegistry::new();
        assert_eq!(registry.touch(), None);

        registry.set_touch(10, 20, true);
        registry.set_touch(30, 40, true);
        assert_eq!(
            registry.touch(),
            Some(TouchState {
                x: 30,
                y: 40,
                pressed: true
            })
        );
    }

    #[test]
    fn reset_request_is_consumed_once() {
        let registry = InputRegistry::new();
        assert!(!registry.take_reset_request());

        registry.request_reset();
        assert!(registry.take_reset_request());
        assert!(!registry.take_reset_request());
    }

    #[test]
    fn shared_registry_is_one_instance() {
        let a = shared_registry();
        let b = shared_registry();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
