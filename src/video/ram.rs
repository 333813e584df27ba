use core::ops::Range;
use core::sync::atomic::{AtomicU16, AtomicU32, AtomicU8, Ordering};

/// Statically allocated video memory shared by the application and the line interrupt.
///
/// Every byte is an [`AtomicU8`] accessed with relaxed ordering, which compiles to
/// plain loads and stores. The application may draw at any time while the line
/// interrupt reads; a frame showing half old and half new data is accepted.
pub struct VideoRam<const N: usize> {
    bytes: [AtomicU8; N],
}

impl<const N: usize> VideoRam<N> {
    pub const fn new() -> Self {
        VideoRam { bytes: [const { AtomicU8::new(0) }; N] }
    }

    pub const fn len(&self) -> usize {
        N
    }

    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    #[inline(always)]
    pub fn get(&self, idx: usize) -> u8 {
        self.bytes[idx].load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn set(&self, idx: usize, val: u8) {
        self.bytes[idx].store(val, Ordering::Relaxed);
    }

    /// Set every byte in `range` to `val`.
    pub fn fill(&self, range: Range<usize>, val: u8) {
        for b in self.bytes[range].iter() {
            b.store(val, Ordering::Relaxed);
        }
    }

    /// Copy `len` bytes from `src` to `dst` inside the RAM. Ranges may overlap
    /// only when `dst < src`.
    pub fn copy_within(&self, src: usize, dst: usize, len: usize) {
        for i in 0..len {
            self.set(dst + i, self.get(src + i));
        }
    }
}

impl<const N: usize> Default for VideoRam<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Scanline and frame counters published by the line interrupt.
///
/// Only the [`Scanline`](super::Scanline) dispatcher writes these; any other
/// context may read them to synchronise with the display.
pub struct VideoState {
    pub(super) line: AtomicU16,
    pub(super) frame: AtomicU32,
}

impl VideoState {
    pub const fn new() -> Self {
        VideoState { line: AtomicU16::new(0), frame: AtomicU32::new(0) }
    }

    /// Current scanline within the frame.
    pub fn line(&self) -> u16 {
        self.line.load(Ordering::Relaxed)
    }

    /// Number of frames started since the display was enabled, wrapping.
    pub fn frame(&self) -> u32 {
        self.frame.load(Ordering::Relaxed)
    }

    /// Busy-wait until the next frame starts.
    ///
    /// Never returns if the line interrupt is not running.
    pub fn wait_vsync(&self) {
        let frame = self.frame();
        while self.frame() == frame {
            core::hint::spin_loop();
        }
    }
}

impl Default for VideoState {
    fn default() -> Self {
        Self::new()
    }
}
