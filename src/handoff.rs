//! Interrupt state handed over without masking interrupts.
//!
//! A [`Handoff`] holds the state of one interrupt handler while its
//! subsystem runs. The application [`put()`](Handoff::put)s the state in
//! before enabling the interrupt and [`take()`](Handoff::take)s it back
//! after disabling it. The handler reaches it through
//! [`with()`](Handoff::with). An atomic flag arbitrates, so neither side
//! needs a critical section and higher priority interrupts are never
//! delayed by a handover.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, Ordering};

const EMPTY: u8 = 0;
/// The application is moving a value in or out.
const MOVING: u8 = 1;
const READY: u8 = 2;
/// The handler is using the value.
const BUSY: u8 = 3;

pub struct Handoff<T> {
    state: AtomicU8,
    value: UnsafeCell<Option<T>>,
}

// NOTE(unsafe): The value is only accessed by whoever moved `state` out of
// NOTE(unsafe): READY or EMPTY, and only that side moves it on again.
unsafe impl<T: Send> Sync for Handoff<T> {}

impl<T> Handoff<T> {
    pub const fn new() -> Self {
        Handoff { state: AtomicU8::new(EMPTY), value: UnsafeCell::new(None) }
    }

    /// Store `value` for the handler. Gives it back if a value is already held.
    pub fn put(&self, value: T) -> Result<(), T> {
        if self.claim(EMPTY, MOVING).is_err() {
            return Err(value);
        }
        // NOTE(unsafe): MOVING excludes every other access.
        unsafe { *self.value.get() = Some(value) };
        self.state.store(READY, Ordering::Release);
        Ok(())
    }

    /// Remove the held value.
    ///
    /// Waits for the handler to finish if it is running on another hart, so
    /// must not be called from an interrupt that preempts the handler.
    pub fn take(&self) -> Option<T> {
        loop {
            match self.claim(READY, MOVING) {
                Ok(()) => break,
                Err(BUSY) => core::hint::spin_loop(),
                Err(_) => return None,
            }
        }
        // NOTE(unsafe): MOVING excludes every other access.
        let value = unsafe { (*self.value.get()).take() };
        self.state.store(EMPTY, Ordering::Release);
        value
    }

    /// Run `f` on the held value. Returns None without calling `f` if the
    /// slot is empty or the application is moving the value.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.claim(READY, BUSY).ok()?;
        // NOTE(unsafe): BUSY excludes every other access.
        let r = unsafe { (*self.value.get()).as_mut().map(f) };
        self.state.store(READY, Ordering::Release);
        r
    }

    pub fn is_empty(&self) -> bool {
        self.state.load(Ordering::Relaxed) == EMPTY
    }

    fn claim(&self, from: u8, to: u8) -> Result<(), u8> {
        self.state
            .compare_exchange(from, to, Ordering::Acquire, Ordering::Relaxed)
            .map(|_| ())
    }
}

impl<T> Default for Handoff<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn put_then_take() {
        let slot = Handoff::new();
        assert!(slot.is_empty());
        assert_eq!(slot.with(|v: &mut u32| *v), None);
        assert_eq!(slot.put(5), Ok(()));
        assert_eq!(slot.put(6), Err(6));
        let bumped = slot.with(|v| {
            *v += 1;
            *v
        });
        assert_eq!(bumped, Some(6));
        assert_eq!(slot.take(), Some(6));
        assert_eq!(slot.take(), None);
        assert!(slot.is_empty());
    }

    #[test]
    fn handler_skips_while_value_moves() {
        let slot = Handoff::new();
        slot.put(1u8).unwrap();
        // An interrupt arriving halfway through a take finds the slot claimed.
        slot.state.store(MOVING, Ordering::Relaxed);
        assert_eq!(slot.with(|v| *v), None);
        slot.state.store(READY, Ordering::Relaxed);
        assert_eq!(slot.with(|v| *v), Some(1));
    }

    #[test]
    fn take_waits_for_running_handler() {
        let slot = Arc::new(Handoff::new());
        slot.put(Vec::<u32>::new()).unwrap();
        let running = Arc::new(AtomicBool::new(false));
        let handler = {
            let slot = slot.clone();
            let running = running.clone();
            std::thread::spawn(move || {
                slot.with(|v| {
                    running.store(true, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    v.push(7);
                })
            })
        };
        while !running.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }
        // The handler's push is never lost to a concurrent take.
        assert_eq!(slot.take(), Some(vec![7]));
        assert_eq!(handler.join().unwrap(), Some(()));
    }
}
