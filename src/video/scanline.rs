//! Scanline dispatcher.
//!
//! # Concept of operation
//!
//! Horizontal sync is produced entirely by a timer PWM channel. A second
//! compare channel of the same timer raises an interrupt once per line at
//! [`Timing::active_start()`] cycles, and the handler calls
//! [`Scanline::line_isr()`].
//!
//! Each call advances the line counter, wrapping to 0 after
//! `timing.total_lines` lines, at which point the frame counter increments.
//! Both counters are published through [`VideoState`] for the application.
//!
//! Lines outside the visible area cost a counter update and, on the two
//! vsync edge lines, one write to the vsync output. Nothing else happens.
//!
//! Visible lines are double buffered, in the same way as an LED matrix
//! driver which computes the next bit plane while the current one is
//! clocked out:
//!
//! 1. While handling line `n - 1`, row data for line `n` is serialized into
//!    the idle line buffer.
//! 2. At line `n` that buffer is handed to [`ScanOut::send_line()`], which
//!    starts the SPI or DMA transfer and returns immediately. The buffers
//!    are swapped.
//! 3. Still inside the line `n` interrupt, line `n + 1` is serialized into
//!    the now idle buffer while the transfer runs.
//!
//! This keeps the time between the interrupt and the first pixel constant,
//! independent of mode, and bounds the per-line work to one serializer pass.
//!
//! # Deadline
//!
//! There is no recovery from a missed line. The serializer for every mode in
//! [`MODES`](super::MODES) runs a fixed number of iterations, which on a
//! 64MHz CH32V2 completes within roughly a quarter of the 2034 cycle line.
//!
//! [`ScanOut::send_line()`]: crate::hal::ScanOut::send_line

use core::sync::atomic::Ordering;

use super::{render_line, Font, LineBuf, Mode, ModeError, Timing, VideoRam, VideoState};
use crate::hal::ScanOut;

/// Which part of the frame the dispatcher is in.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Outside the visible area: porches and vertical sync.
    Blank,
    /// Inside the visible area.
    Active,
}

/// Line interrupt state machine.
///
/// Refer to the [module-level documentation](self) for more details.
pub struct Scanline<'a, O: ScanOut, const N: usize> {
    /// Output path for serialized lines and vertical sync.
    out: O,
    /// Current mode. Can be swapped out at runtime.
    mode: &'static Mode,
    /// Frame buffer to serialize from.
    ram: &'a VideoRam<N>,
    /// Counters published to the application.
    state: &'a VideoState,
    font: &'static Font,
    /// Memory to serialize lines to, which must stay readable by the
    /// output path while a transfer is running.
    lbufs: &'a mut [LineBuf; 2],
    /// Line buffer holding the next line to send, 0..2.
    lbuf: u8,
    /// Current scanline, 0..total_lines.
    line: u16,
    /// Current frame.
    frame: u32,
}

impl<'a, O: ScanOut, const N: usize> Scanline<'a, O, N> {
    /// Create a new dispatcher.
    ///
    /// * `out`: output path, usually SPI or DMA to a GPIO port.
    /// * `mode`: initial video mode, which must fit `ram`.
    /// * `ram`: video memory shared with the application.
    /// * `state`: counters shared with the application.
    /// * `font`: font used in text modes.
    /// * `lbufs`: two line buffers which the output path can read from.
    pub fn new(
        out: O,
        mode: &'static Mode,
        ram: &'a VideoRam<N>,
        state: &'a VideoState,
        font: &'static Font,
        lbufs: &'a mut [LineBuf; 2],
    ) -> Result<Self, ModeError> {
        mode.check(N)?;
        Ok(Self { out, mode, ram, state, font, lbufs, lbuf: 0, line: 0, frame: 0 })
    }

    /// Reset to the first line of the frame and prepare the first visible line.
    ///
    /// Call before enabling the line interrupt.
    pub fn start(&mut self) {
        self.line = 0;
        self.lbuf = 0;
        self.state.line.store(0, Ordering::Relaxed);
        self.out.set_vsync(false);
        self.prepare(self.next_line());
    }

    /// Call from the line interrupt.
    pub fn line_isr(&mut self) {
        let timing = self.mode.timing;

        let mut line = self.line + 1;
        if line >= timing.total_lines {
            line = 0;
            self.frame = self.frame.wrapping_add(1);
            self.state.frame.store(self.frame, Ordering::Relaxed);
        }
        self.line = line;
        self.state.line.store(line, Ordering::Relaxed);

        if line == timing.vsync_start {
            self.out.set_vsync(true);
        } else if line == timing.vsync_end {
            self.out.set_vsync(false);
        }

        if self.mode.row_of(line).is_some() {
            let len = self.mode.line_bytes();
            self.out.send_line(&self.lbufs[self.lbuf as usize][..len]);
            self.lbuf ^= 1;
        }

        self.prepare(self.next_line());
    }

    /// Switch to a new mode, restarting from the top of the frame.
    ///
    /// The frame counter keeps running. If the mode does not fit the
    /// video RAM the current mode is kept.
    pub fn set_mode(&mut self, mode: &'static Mode) -> Result<(), ModeError> {
        mode.check(N)?;
        self.mode = mode;
        self.start();
        Ok(())
    }

    pub fn mode(&self) -> &'static Mode {
        self.mode
    }

    pub fn timing(&self) -> &'static Timing {
        self.mode.timing
    }

    /// Current scanline.
    pub fn line(&self) -> u16 {
        self.line
    }

    pub fn phase(&self) -> Phase {
        match self.mode.row_of(self.line) {
            Some(_) => Phase::Active,
            None => Phase::Blank,
        }
    }

    /// Output path, for acknowledging its interrupts.
    pub fn out_mut(&mut self) -> &mut O {
        &mut self.out
    }

    /// Shut down, returning the output path so its peripherals can be
    /// reset, and the line buffers for a later restart.
    pub fn release(mut self) -> (O, &'a mut [LineBuf; 2]) {
        self.out.set_vsync(false);
        (self.out, self.lbufs)
    }

    fn next_line(&self) -> u16 {
        let next = self.line + 1;
        if next >= self.mode.timing.total_lines { 0 } else { next }
    }

    /// Serialize the row for `line` into the idle buffer, if it is visible.
    fn prepare(&mut self, line: u16) {
        if let Some(row) = self.mode.row_of(line) {
            let lbuf = &mut self.lbufs[self.lbuf as usize];
            render_line(self.mode, self.ram, self.font, row, lbuf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::{
        timing, Format, MonoCanvas, ATTR_256X192, FONT_8X8, LINE_BYTES, MONO_128X64,
        PALETTE_160X128, TEXT_40X30,
    };
    use embedded_graphics::{pixelcolor::BinaryColor, prelude::*};

    #[derive(Default)]
    struct Recorder {
        lines: Vec<Vec<u8>>,
        vsync: Vec<(usize, bool)>,
    }

    impl ScanOut for &mut Recorder {
        fn send_line(&mut self, line: &[u8]) {
            self.lines.push(line.to_vec());
        }

        fn set_vsync(&mut self, active: bool) {
            let n = self.lines.len();
            self.vsync.push((n, active));
        }
    }

    fn lbufs() -> [LineBuf; 2] {
        [[0u8; LINE_BYTES]; 2]
    }

    #[test]
    fn line_counter_wraps_once_per_frame() {
        let ram: VideoRam<1024> = VideoRam::new();
        let state = VideoState::new();
        let mut rec = Recorder::default();
        let mut bufs = lbufs();
        let mut video = Scanline::new(&mut rec, &MONO_128X64, &ram, &state, &FONT_8X8, &mut bufs)
            .unwrap();
        video.start();

        let total = MONO_128X64.timing.total_lines;
        for _ in 0..3 * total as usize {
            let before = state.line();
            video.line_isr();
            assert_eq!(state.line(), (before + 1) % total);
        }
        assert_eq!(state.frame(), 3);
    }

    #[test]
    fn frame_counter_needs_full_frame_including_porch() {
        let ram: VideoRam<1024> = VideoRam::new();
        let state = VideoState::new();
        let mut rec = Recorder::default();
        let mut bufs = lbufs();
        let mut video = Scanline::new(&mut rec, &MONO_128X64, &ram, &state, &FONT_8X8, &mut bufs)
            .unwrap();
        video.start();

        // 64 calls covers the row count but not the frame.
        for _ in 0..64 {
            video.line_isr();
        }
        assert_eq!(state.frame(), 0);

        let total = MONO_128X64.timing.total_lines as usize;
        for _ in 64..total - 1 {
            video.line_isr();
        }
        assert_eq!(state.frame(), 0);
        video.line_isr();
        assert_eq!(state.frame(), 1);
        assert_eq!(state.line(), 0);
    }

    #[test]
    fn emits_each_visible_line_once_per_frame() {
        let ram: VideoRam<1024> = VideoRam::new();
        let state = VideoState::new();
        let mut rec = Recorder::default();
        let mut bufs = lbufs();
        {
            let mut video =
                Scanline::new(&mut rec, &MONO_128X64, &ram, &state, &FONT_8X8, &mut bufs).unwrap();
            video.start();
            for _ in 0..MONO_128X64.timing.total_lines {
                video.line_isr();
            }
        }
        assert_eq!(rec.lines.len(), 256);
        assert!(rec.lines.iter().all(|l| l.len() == 17));
    }

    #[test]
    fn lines_carry_frame_buffer_rows() {
        let ram: VideoRam<1024> = VideoRam::new();
        let mut canvas = MonoCanvas::new(&MONO_128X64, &ram).unwrap();
        // Pixel (0, 10) lit.
        Pixel(Point::new(0, 10), BinaryColor::On).draw(&mut canvas).unwrap();

        let state = VideoState::new();
        let mut rec = Recorder::default();
        let mut bufs = lbufs();
        {
            let mut video =
                Scanline::new(&mut rec, &MONO_128X64, &ram, &state, &FONT_8X8, &mut bufs).unwrap();
            video.start();
            for _ in 0..MONO_128X64.timing.total_lines {
                video.line_isr();
            }
        }
        // Row 10 is repeated on four scanlines.
        for (i, line) in rec.lines.iter().enumerate() {
            let lit = line[0] & 0x80 != 0;
            assert_eq!(lit, i / 4 == 10, "scanline {}", i);
        }
    }

    #[test]
    fn vsync_pulse_on_configured_lines() {
        let ram: VideoRam<1024> = VideoRam::new();
        let state = VideoState::new();
        let mut rec = Recorder::default();
        let mut bufs = lbufs();
        {
            let mut video =
                Scanline::new(&mut rec, &MONO_128X64, &ram, &state, &FONT_8X8, &mut bufs).unwrap();
            video.start();
            for _ in 0..MONO_128X64.timing.total_lines {
                video.line_isr();
                if state.line() == timing::VGA_64MHZ.vsync_start {
                    assert_eq!(video.phase(), Phase::Blank);
                }
            }
        }
        // Initial deassert from start(), then the pulse after all visible lines.
        assert_eq!(rec.vsync, vec![(0, false), (256, true), (256, false)]);
    }

    #[test]
    fn first_visible_line_ready_after_wrap() {
        // Text mode starts on line 0, so line 0 must be prepared at the end of the frame.
        let ram: VideoRam<1200> = VideoRam::new();
        ram.fill(0..1200, b' ');
        ram.set(0, b'_');
        let state = VideoState::new();
        let mut rec = Recorder::default();
        let mut bufs = lbufs();
        {
            let mut video =
                Scanline::new(&mut rec, &TEXT_40X30, &ram, &state, &FONT_8X8, &mut bufs).unwrap();
            video.start();
            for _ in 0..2 * TEXT_40X30.timing.total_lines as usize {
                video.line_isr();
            }
        }
        // The first frame starts on line 0 without sending it.
        assert_eq!(rec.lines.len(), 2 * 480);
        // Line 0 of the next frame is character row 0, glyph line 0.
        assert_eq!(rec.lines[479][0], 0x00);
        assert_eq!(rec.lines[479 + 13][0], 0x00);
        // Glyph line 7 of '_' is solid, shown on scanlines 14 and 15.
        assert_eq!(rec.lines[479 + 14][0], 0xFF);
        assert_eq!(rec.lines[479 + 15][0], 0xFF);
    }

    #[test]
    fn release_drops_vsync_and_returns_buffers() {
        let ram: VideoRam<1024> = VideoRam::new();
        let state = VideoState::new();
        let mut rec = Recorder::default();
        let mut bufs = lbufs();
        {
            let mut video =
                Scanline::new(&mut rec, &MONO_128X64, &ram, &state, &FONT_8X8, &mut bufs)
                    .unwrap();
            video.start();
            for _ in 0..490 {
                video.line_isr();
            }
            assert_eq!(video.out_mut().vsync.last(), Some(&(256, true)));
            let (out, bufs) = video.release();
            assert_eq!(out.vsync.last(), Some(&(256, false)));
            bufs[0][0] = 0x5A;
        }
        assert_eq!(bufs[0][0], 0x5A);
    }

    #[test]
    fn set_mode_rejects_oversized_modes() {
        let ram: VideoRam<1024> = VideoRam::new();
        let state = VideoState::new();
        let mut rec = Recorder::default();
        let mut bufs = lbufs();
        let mut video = Scanline::new(&mut rec, &MONO_128X64, &ram, &state, &FONT_8X8, &mut bufs)
            .unwrap();
        assert!(matches!(
            video.set_mode(&ATTR_256X192),
            Err(ModeError::RamTooSmall { .. })
        ));
        assert_eq!(video.mode().format, Format::Mono);
    }

    #[test]
    fn lcd_mode_reopens_window_once_per_frame() {
        let ram: VideoRam<20992> = VideoRam::new();
        let state = VideoState::new();
        let mut rec = Recorder::default();
        let mut bufs = lbufs();
        {
            let mut video =
                Scanline::new(&mut rec, &PALETTE_160X128, &ram, &state, &FONT_8X8, &mut bufs)
                    .unwrap();
            video.start();
            for _ in 0..128 {
                video.line_isr();
                assert_eq!(video.phase(), Phase::Active);
            }
            video.line_isr();
            assert_eq!(video.phase(), Phase::Blank);
            video.line_isr();
        }
        assert_eq!(state.frame(), 1);
        assert_eq!(rec.lines.len(), 129);
        // start() deasserts, then line 1 ends the pulse the first frame never raised.
        assert_eq!(rec.vsync, vec![(0, false), (0, false), (128, true), (128, false)]);
    }
}
