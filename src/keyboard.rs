//! 40-key keyboard with debounce, auto-repeat and an event ring.
//!
//! [`KeyScan`] runs from a periodic interrupt, samples the raw key lines and
//! pushes key events into the shared [`Keys`] state, which the application
//! polls with [`Keys::get()`] or [`Keys::get_char()`].

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use crate::hal::KeyLines;

/// Number of keys, not counting [`Key::NoKey`].
pub const KEY_NUM: usize = 40;

/// Keycodes, one row per printed key row.
#[rustfmt::skip]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Key {
    NoKey = 0,
    Key1, Key2, Key3, Key4, Key5, Key6, Key7, Key8, Key9, Key0,
    Q, W, E, R, T, Y, U, I, O, P,
    A, S, D, F, G, H, J, K, L, Enter,
    Shift, Z, X, C, V, B, N, M, Ctrl, Space,
}

impl Key {
    /// Key for a keycode, `None` for codes above [`Key::Space`].
    pub fn from_code(code: u8) -> Option<Key> {
        ALL_KEYS.get(code as usize).copied()
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Iterate over every real key.
    pub fn all() -> impl Iterator<Item = Key> {
        ALL_KEYS[1..].iter().copied()
    }
}

#[rustfmt::skip]
static ALL_KEYS: [Key; KEY_NUM + 1] = [
    Key::NoKey,
    Key::Key1, Key::Key2, Key::Key3, Key::Key4, Key::Key5,
    Key::Key6, Key::Key7, Key::Key8, Key::Key9, Key::Key0,
    Key::Q, Key::W, Key::E, Key::R, Key::T, Key::Y, Key::U, Key::I, Key::O, Key::P,
    Key::A, Key::S, Key::D, Key::F, Key::G, Key::H, Key::J, Key::K, Key::L, Key::Enter,
    Key::Shift, Key::Z, Key::X, Key::C, Key::V, Key::B, Key::N, Key::M, Key::Ctrl, Key::Space,
];

/// Characters for each keycode, unshifted.
static CHARS: [u8; KEY_NUM + 1] = *b"\x001234567890qwertyuiopasdfghjkl\n\0zxcvbnm\0 ";
/// Characters for each keycode with Shift held.
static CHARS_SHIFT: [u8; KEY_NUM + 1] = *b"\x00!\"#$%&'()_QWERTYUIOPASDFGHJKL\n\0ZXCVBNM\0 ";

/// Set of keys, one bit per keycode.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct KeySet(u64);

impl KeySet {
    pub const fn new() -> Self {
        KeySet(0)
    }

    pub fn set(&mut self, key: Key, pressed: bool) {
        if pressed {
            self.0 |= 1u64 << key.code();
        } else {
            self.0 &= !(1u64 << key.code());
        }
    }

    pub fn press(&mut self, key: Key) {
        self.set(key, true);
    }

    pub fn contains(&self, key: Key) -> bool {
        key != Key::NoKey && self.0 & (1u64 << key.code()) != 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 & !1 == 0
    }
}

/// Debounce timing, in scan ticks.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KeyConfig {
    /// Ticks a key must read released before it counts as released.
    pub release: u16,
    /// Ticks from the first press event to the first repeat.
    pub press: u16,
    /// Ticks between further repeats.
    pub repeat: u16,
}

impl KeyConfig {
    /// Timing for a 100Hz scan tick: 50ms release, 400ms delay, 100ms repeat.
    pub const DEFAULT: KeyConfig = KeyConfig { release: 5, press: 40, repeat: 10 };
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Single producer, single consumer ring of keycodes.
///
/// `S` must be a power of two. The producer never blocks: when it gets more
/// than `S` events ahead, the oldest events are lost and the consumer
/// resumes at the oldest event still held.
pub struct KeyBuf<const S: usize> {
    buf: [AtomicU8; S],
    write: AtomicUsize,
    read: AtomicUsize,
}

impl<const S: usize> KeyBuf<S> {
    const SIZE_OK: () = assert!(S.is_power_of_two());

    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let _ = Self::SIZE_OK;
        KeyBuf {
            buf: [const { AtomicU8::new(0) }; S],
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
        }
    }

    /// Producer side.
    pub fn push(&self, code: u8) {
        let w = self.write.load(Ordering::Relaxed);
        self.buf[w & (S - 1)].store(code, Ordering::Relaxed);
        self.write.store(w.wrapping_add(1), Ordering::Release);
    }

    /// Consumer side.
    pub fn pop(&self) -> Option<u8> {
        let w = self.write.load(Ordering::Acquire);
        let mut r = self.read.load(Ordering::Relaxed);
        if w == r {
            return None;
        }
        if w.wrapping_sub(r) > S {
            r = w.wrapping_sub(S);
        }
        let code = self.buf[r & (S - 1)].load(Ordering::Relaxed);
        self.read.store(r.wrapping_add(1), Ordering::Relaxed);
        Some(code)
    }

    /// Consumer side: discard everything queued.
    pub fn flush(&self) {
        self.read.store(self.write.load(Ordering::Acquire), Ordering::Relaxed);
    }

    pub fn is_empty(&self) -> bool {
        self.write.load(Ordering::Acquire) == self.read.load(Ordering::Relaxed)
    }
}

impl<const S: usize> Default for KeyBuf<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Keyboard state shared between the scan interrupt and the application.
pub struct Keys<const S: usize> {
    buf: KeyBuf<S>,
    pressed: [AtomicBool; KEY_NUM + 1],
}

impl<const S: usize> Keys<S> {
    pub const fn new() -> Self {
        Keys { buf: KeyBuf::new(), pressed: [const { AtomicBool::new(false) }; KEY_NUM + 1] }
    }

    /// Next key event, or [`Key::NoKey`] if none are queued.
    pub fn get(&self) -> Key {
        self.buf.pop().and_then(Key::from_code).unwrap_or(Key::NoKey)
    }

    /// Next key event that maps to a character, using the current Shift state.
    ///
    /// Events without a character are consumed and skipped.
    pub fn get_char(&self) -> Option<char> {
        loop {
            let key = self.buf.pop().and_then(Key::from_code)?;
            let table = if self.pressed(Key::Shift) { &CHARS_SHIFT } else { &CHARS };
            let c = table[key.code() as usize];
            if c != 0 {
                return Some(c as char);
            }
        }
    }

    /// Discard all queued events.
    pub fn flush(&self) {
        self.buf.flush();
    }

    pub fn pressed(&self, key: Key) -> bool {
        self.pressed[key.code() as usize].load(Ordering::Relaxed)
    }

    pub fn no_pressed(&self) -> bool {
        Key::all().all(|k| !self.pressed(k))
    }

    /// Busy-wait until every key is released. Never returns if a key is held.
    pub fn wait_no_pressed(&self) {
        while !self.no_pressed() {
            core::hint::spin_loop();
        }
    }

    fn event(&self, key: Key) {
        self.buf.push(key.code());
    }

    fn set_pressed(&self, key: Key, pressed: bool) {
        self.pressed[key.code() as usize].store(pressed, Ordering::Relaxed);
    }
}

impl<const S: usize> Default for Keys<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Debounce and auto-repeat engine, owned by the scan interrupt.
pub struct KeyScan<'a, L: KeyLines, const S: usize> {
    lines: L,
    keys: &'a Keys<S>,
    cfg: KeyConfig,
    /// Ticks left until each key counts as released, 0 when released.
    release: [u16; KEY_NUM + 1],
    /// Ticks left until the next repeat event.
    repeat: [u16; KEY_NUM + 1],
    raw: KeySet,
}

impl<'a, L: KeyLines, const S: usize> KeyScan<'a, L, S> {
    pub fn new(lines: L, keys: &'a Keys<S>, cfg: KeyConfig) -> Self {
        KeyScan {
            lines,
            keys,
            cfg,
            release: [0; KEY_NUM + 1],
            repeat: [0; KEY_NUM + 1],
            raw: KeySet::new(),
        }
    }

    /// Call once per scan tick.
    pub fn scan(&mut self) {
        self.raw.clear();
        self.lines.read(&mut self.raw);

        for key in Key::all() {
            let k = key.code() as usize;
            if self.raw.contains(key) {
                if self.release[k] == 0 {
                    self.keys.event(key);
                    self.keys.set_pressed(key, true);
                    self.repeat[k] = self.cfg.press;
                } else if self.repeat[k] > 0 {
                    self.repeat[k] -= 1;
                    if self.repeat[k] == 0 {
                        self.keys.event(key);
                        self.repeat[k] = self.cfg.repeat;
                    }
                }
                self.release[k] = self.cfg.release.max(1);
            } else if self.release[k] > 0 {
                self.release[k] -= 1;
                if self.release[k] == 0 {
                    self.keys.set_pressed(key, false);
                }
            }
        }
    }

    pub fn lines_mut(&mut self) -> &mut L {
        &mut self.lines
    }

    /// Release every key and return the key lines.
    pub fn release(self) -> L {
        for key in Key::all() {
            self.keys.set_pressed(key, false);
        }
        self.lines
    }
}
