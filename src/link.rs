//! Keyboard link between the two CPUs of the BabyPC.
//!
//! The secondary CPU scans the key matrix and streams scan frames to the
//! primary over a serial link: the keycode of every pressed key, then a zero
//! byte. Before streaming, the primary establishes the link by sending
//! [`SYNC`] until it has seen three consecutive echoes, then sends
//! [`SYNC_OK`].

use core::sync::atomic::{AtomicBool, Ordering};

use crate::hal::{CycleCounter, KeyLines, SerialLink};
use crate::keyboard::{Key, KeySet};

/// Handshake byte, echoed by the secondary.
pub const SYNC: u8 = 0x55;
/// Sent by the primary once the handshake succeeded.
pub const SYNC_OK: u8 = 0xAA;
/// Ends a scan frame.
pub const FRAME_END: u8 = 0x00;

/// Consecutive echoes needed to accept the link.
const SYNC_ECHOES: u8 = 3;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkError {
    /// No stable echo within the timeout.
    SyncTimeout,
}

/// Establish the link from the primary side.
///
/// Gives up with [`LinkError::SyncTimeout`] after `timeout` cycles of `clock`.
pub fn sync_init<L, C>(link: &mut L, clock: &C, timeout: u32) -> Result<(), LinkError>
    where L: SerialLink, C: CycleCounter
{
    let start = clock.cycles();
    let expired = || clock.cycles().wrapping_sub(start) >= timeout;

    // Discard anything left over from before a reset.
    while link.read().is_some() {}

    let mut echoes = 0;
    while echoes < SYNC_ECHOES {
        link.write(SYNC);
        let reply = loop {
            if let Some(b) = link.read() {
                break b;
            }
            if expired() {
                return Err(LinkError::SyncTimeout);
            }
        };
        if reply == SYNC {
            echoes += 1;
        } else {
            echoes = 0;
        }
        if expired() {
            return Err(LinkError::SyncTimeout);
        }
    }

    link.write(SYNC_OK);
    Ok(())
}

/// Key lines read from scan frames arriving on the link.
///
/// Each `read` drains the receiver and reports the last complete frame.
pub struct LinkKeys<L: SerialLink> {
    link: L,
    partial: KeySet,
    current: KeySet,
}

impl<L: SerialLink> LinkKeys<L> {
    pub fn new(link: L) -> Self {
        LinkKeys { link, partial: KeySet::new(), current: KeySet::new() }
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn release(self) -> L {
        self.link
    }
}

impl<L: SerialLink> KeyLines for LinkKeys<L> {
    fn read(&mut self, pressed: &mut KeySet) {
        while let Some(b) = self.link.read() {
            if b == FRAME_END {
                self.current = self.partial;
                self.partial.clear();
            } else if let Some(key) = Key::from_code(b) {
                self.partial.press(key);
            }
        }
        for key in Key::all().filter(|&k| self.current.contains(k)) {
            pressed.press(key);
        }
    }
}

/// Request/acknowledge lock between the application and the link interrupt.
///
/// While the application holds the lock the interrupt must leave the link
/// alone; [`LinkLock::isr_enter()`] tells it whether it may proceed. The
/// application can then run its own exchange, such as a fresh
/// [`sync_init()`], without the key scanner swallowing the replies.
pub struct LinkLock {
    req: AtomicBool,
    ack: AtomicBool,
}

impl LinkLock {
    pub const fn new() -> Self {
        LinkLock { req: AtomicBool::new(false), ack: AtomicBool::new(false) }
    }

    /// Take the lock. Spins until the interrupt has acknowledged, so the
    /// interrupt must keep running.
    pub fn lock(&self) {
        self.req.store(true, Ordering::Release);
        while !self.ack.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
    }

    /// Release the lock and wait until the interrupt has seen it.
    pub fn unlock(&self) {
        self.req.store(false, Ordering::Release);
        while self.ack.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
    }

    pub fn is_locked(&self) -> bool {
        self.ack.load(Ordering::Relaxed)
    }

    /// Call at the top of the link interrupt. Returns `false` if the
    /// application holds the lock and the link must not be touched.
    pub fn isr_enter(&self) -> bool {
        if self.req.load(Ordering::Acquire) {
            self.ack.store(true, Ordering::Release);
            false
        } else {
            self.ack.store(false, Ordering::Release);
            true
        }
    }
}

impl Default for LinkLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Responder side of the link, run by the CPU that owns the key matrix.
pub struct Secondary<L: SerialLink> {
    link: L,
    synced: bool,
}

impl<L: SerialLink> Secondary<L> {
    pub fn new(link: L) -> Self {
        Secondary { link, synced: false }
    }

    /// Handle received handshake bytes.
    pub fn poll(&mut self) {
        while let Some(b) = self.link.read() {
            match b {
                SYNC => {
                    self.synced = false;
                    self.link.write(SYNC);
                }
                SYNC_OK => self.synced = true,
                _ => (),
            }
        }
    }

    pub fn synced(&self) -> bool {
        self.synced
    }

    /// Send one scan frame, once the link is up.
    pub fn send_scan(&mut self, keys: &KeySet) {
        if !self.synced {
            return;
        }
        for key in Key::all().filter(|&k| keys.contains(k)) {
            self.link.write(key.code());
        }
        self.link.write(FRAME_END);
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::sync::Arc;

    /// One end of an in-memory full duplex link.
    struct Pipe {
        tx: Rc<RefCell<VecDeque<u8>>>,
        rx: Rc<RefCell<VecDeque<u8>>>,
    }

    fn pipe() -> (Pipe, Pipe) {
        let a = Rc::new(RefCell::new(VecDeque::new()));
        let b = Rc::new(RefCell::new(VecDeque::new()));
        (Pipe { tx: a.clone(), rx: b.clone() }, Pipe { tx: b, rx: a })
    }

    impl SerialLink for Pipe {
        fn write(&mut self, byte: u8) {
            self.tx.borrow_mut().push_back(byte);
        }

        fn read(&mut self) -> Option<u8> {
            self.rx.borrow_mut().pop_front()
        }
    }

    /// Primary end whose reads let the secondary respond first.
    struct Wired<'a> {
        end: Pipe,
        peer: &'a RefCell<Secondary<Pipe>>,
    }

    impl SerialLink for Wired<'_> {
        fn write(&mut self, byte: u8) {
            self.end.write(byte);
        }

        fn read(&mut self) -> Option<u8> {
            self.peer.borrow_mut().poll();
            self.end.read()
        }
    }

    /// Clock advancing one cycle per reading.
    struct Ticker(Cell<u32>);

    impl CycleCounter for Ticker {
        fn cycles(&self) -> u32 {
            let c = self.0.get();
            self.0.set(c.wrapping_add(1));
            c
        }
    }

    #[test]
    fn sync_with_secondary() {
        let (a, b) = pipe();
        let peer = RefCell::new(Secondary::new(b));
        let mut link = Wired { end: a, peer: &peer };
        let clock = Ticker(Cell::new(u32::MAX - 10));
        assert_eq!(sync_init(&mut link, &clock, 1000), Ok(()));
        peer.borrow_mut().poll();
        assert!(peer.borrow().synced());
    }

    #[test]
    fn sync_times_out_without_peer() {
        let (mut a, b) = pipe();
        let clock = Ticker(Cell::new(0));
        assert_eq!(sync_init(&mut a, &clock, 100), Err(LinkError::SyncTimeout));
        // Attempts were made.
        assert_eq!(b.rx.borrow().front(), Some(&SYNC));
    }

    #[test]
    fn sync_discards_stale_bytes() {
        let (mut a, mut b) = pipe();
        for byte in [SYNC, SYNC, 0x12, SYNC, SYNC] {
            b.write(byte);
        }
        let clock = Ticker(Cell::new(0));
        // Stale bytes are flushed first, so nothing answers.
        assert_eq!(sync_init(&mut a, &clock, 50), Err(LinkError::SyncTimeout));
    }

    #[test]
    fn scan_frames_become_key_lines() {
        let (a, b) = pipe();
        let mut secondary = Secondary::new(b);
        let mut keys = LinkKeys::new(a);

        // Not synced: nothing sent.
        let mut set = KeySet::new();
        set.press(Key::A);
        secondary.send_scan(&set);
        let mut out = KeySet::new();
        keys.read(&mut out);
        assert!(out.is_empty());

        keys.link_mut().write(SYNC_OK);
        secondary.poll();
        secondary.send_scan(&set);
        set.press(Key::Space);
        secondary.send_scan(&set);
        // Incomplete frame is not reported yet.
        secondary.link_mut().write(Key::Enter.code());
        keys.read(&mut out);
        assert!(out.contains(Key::A));
        assert!(out.contains(Key::Space));
        assert!(!out.contains(Key::Enter));

        secondary.link_mut().write(FRAME_END);
        let mut out = KeySet::new();
        keys.read(&mut out);
        assert!(out.contains(Key::Enter));
        assert!(!out.contains(Key::A));

        // No new frame: the last one still holds.
        let mut out = KeySet::new();
        keys.read(&mut out);
        assert!(out.contains(Key::Enter));
    }

    #[test]
    fn lock_waits_for_interrupt() {
        let lock = Arc::new(LinkLock::new());
        let stop = Arc::new(AtomicBool::new(false));
        let isr = {
            let lock = lock.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut skipped = 0u32;
                while !stop.load(Ordering::Relaxed) {
                    if !lock.isr_enter() {
                        skipped += 1;
                    }
                    std::thread::yield_now();
                }
                skipped
            })
        };

        lock.lock();
        assert!(lock.is_locked());
        lock.unlock();
        assert!(!lock.is_locked());
        stop.store(true, Ordering::Relaxed);
        assert!(isr.join().unwrap() >= 1);
    }

    #[test]
    fn locked_link_keeps_replies_from_key_reader() {
        use std::sync::Mutex;

        let lock = Arc::new(LinkLock::new());
        let rx = Arc::new(Mutex::new(VecDeque::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let isr = {
            let (lock, rx, stop) = (lock.clone(), rx.clone(), stop.clone());
            std::thread::spawn(move || {
                let mut drained = 0;
                while !stop.load(Ordering::Relaxed) {
                    if lock.isr_enter() {
                        drained += rx.lock().unwrap().drain(..).count();
                    }
                    std::thread::yield_now();
                }
                drained
            })
        };

        lock.lock();
        rx.lock().unwrap().extend([SYNC, SYNC, SYNC]);
        std::thread::sleep(std::time::Duration::from_millis(20));
        // Every echo is still there for the application to read.
        assert_eq!(rx.lock().unwrap().drain(..).collect::<Vec<_>>(), [SYNC; 3]);
        lock.unlock();

        // Once unlocked the reader drains the link again.
        rx.lock().unwrap().push_back(FRAME_END);
        while !rx.lock().unwrap().is_empty() {
            std::thread::yield_now();
        }
        stop.store(true, Ordering::Relaxed);
        assert_eq!(isr.join().unwrap(), 1);
    }
}
