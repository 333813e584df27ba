//! Software generated video output.
//!
//! A hardware timer raises one compare interrupt per scanline, at
//! [`Timing::active_start()`] cycles into the line. The [`Scanline`]
//! dispatcher counts lines, toggles vertical sync and, inside the visible
//! area, hands a pre-serialized line buffer to the [`ScanOut`] path while
//! serializing the following line into the second buffer.
//!
//! Pixel data lives in a [`VideoRam`] region whose layout depends on the
//! [`Mode`]: packed 1bpp bitmaps, character codes for text mode, a bitmap
//! plus coarse colour attributes, or 8-bit palette indices.
//!
//! [`ScanOut`]: crate::hal::ScanOut

use core::ops::Range;

mod canvas;
mod font;
mod ram;
mod scanline;
mod serialize;
pub mod timing;

pub use canvas::{attr, splash, AttrCanvas, Index, MonoCanvas, PaletteCanvas, Rgb3, TextConsole};
pub use font::{Font, FONT_8X8};
pub use ram::{VideoRam, VideoState};
pub use scanline::{Phase, Scanline};
pub use serialize::render_line;
pub use timing::Timing;

/// Largest serialized scanline of any mode, in bytes.
pub const LINE_BYTES: usize = 320;

/// Buffer for one serialized scanline.
pub type LineBuf = [u8; LINE_BYTES];

/// Bytes occupied by a 256-entry RGB565 palette.
const PALETTE_BYTES: usize = 512;

/// Frame buffer encoding.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Format {
    /// Character codes rendered through an 8x8 font. Bit 7 inverts the cell.
    Text,
    /// 1bpp bitmap, MSB is the leftmost pixel.
    Mono,
    /// 1bpp bitmap plus one ink/paper attribute byte per cell.
    Attr,
    /// One byte per pixel indexing a 256-entry RGB565 palette.
    Palette,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ModeError {
    /// The video RAM is smaller than the mode layout.
    RamTooSmall { needed: usize, available: usize },
    /// A serialized line does not fit a [`LineBuf`].
    LineTooLong,
    /// Visible area does not fit inside the frame, or cells do not tile the screen.
    BadGeometry,
    /// Pixels plus the trailing blank byte would still be shifting out at
    /// cycle `end` of a `line_cycles` long line.
    LineOverrun { end: u32, line_cycles: u32 },
    /// Canvas type does not match the mode format.
    WrongFormat,
}

/// Offsets of each area inside the video RAM.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Layout {
    pub pixels: Range<usize>,
    pub attrs: Range<usize>,
    pub palette: Range<usize>,
}

/// A video mode: frame buffer geometry plus the signal timing it runs on.
#[derive(Debug, Eq, PartialEq)]
pub struct Mode {
    pub name: &'static str,
    pub format: Format,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
    /// Glyph width (text) or attribute block width (attr), in pixels.
    pub cell_w: u8,
    /// Glyph height (text) or attribute block height (attr), in pixels.
    pub cell_h: u8,
    /// Bytes per frame buffer row; per character row in text mode.
    pub stride: u16,
    /// First visible scanline.
    pub first_line: u16,
    /// Number of scanlines each frame buffer row is shown on.
    pub line_repeat: u8,
    /// System clock cycles per output pixel.
    pub pixel_cycles: u8,
    pub timing: &'static Timing,
}

impl Mode {
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        name: &'static str,
        format: Format,
        width: u16,
        height: u16,
        cell: (u8, u8),
        first_line: u16,
        line_repeat: u8,
        pixel_cycles: u8,
        timing: &'static Timing,
    ) -> Self {
        let stride = match format {
            Format::Text => width / cell.0 as u16,
            Format::Mono | Format::Attr => width / 8,
            Format::Palette => width,
        };
        Mode {
            name,
            format,
            width,
            height,
            cell_w: cell.0,
            cell_h: cell.1,
            stride,
            first_line,
            line_repeat,
            pixel_cycles,
            timing,
        }
    }

    /// Number of text columns or attribute cells per row.
    pub const fn cols(&self) -> u16 {
        match self.format {
            Format::Text | Format::Attr => self.width / self.cell_w as u16,
            Format::Mono | Format::Palette => self.width,
        }
    }

    /// Number of text rows or attribute cell rows.
    pub const fn rows(&self) -> u16 {
        match self.format {
            Format::Text | Format::Attr => self.height / self.cell_h as u16,
            Format::Mono | Format::Palette => self.height,
        }
    }

    pub const fn pixel_bytes(&self) -> usize {
        match self.format {
            Format::Text => self.stride as usize * self.rows() as usize,
            _ => self.stride as usize * self.height as usize,
        }
    }

    pub const fn attr_bytes(&self) -> usize {
        match self.format {
            Format::Attr => self.cols() as usize * self.rows() as usize,
            _ => 0,
        }
    }

    pub const fn palette_bytes(&self) -> usize {
        match self.format {
            Format::Palette => PALETTE_BYTES,
            _ => 0,
        }
    }

    /// Total video RAM required by this mode.
    pub const fn ram_size(&self) -> usize {
        self.pixel_bytes() + self.attr_bytes() + self.palette_bytes()
    }

    pub const fn layout(&self) -> Layout {
        let p = self.pixel_bytes();
        let a = p + self.attr_bytes();
        Layout { pixels: 0..p, attrs: p..a, palette: a..a + self.palette_bytes() }
    }

    /// Bytes emitted per serialized scanline.
    pub const fn line_bytes(&self) -> usize {
        match self.format {
            Format::Mono | Format::Text => self.stride as usize + 1,
            Format::Attr => self.width as usize + 1,
            Format::Palette => self.width as usize * 2,
        }
    }

    /// Number of scanlines covered by the visible area.
    pub const fn visible_lines(&self) -> u16 {
        self.height * self.line_repeat as u16
    }

    /// Frame buffer row shown on scanline `line`, or None outside the visible area.
    #[inline]
    pub const fn row_of(&self, line: u16) -> Option<u16> {
        if line < self.first_line {
            return None;
        }
        let offset = line - self.first_line;
        if offset >= self.visible_lines() {
            None
        } else {
            Some(offset / self.line_repeat as u16)
        }
    }

    /// Cycle after the start of a line at which the last pixel, followed by
    /// eight blank pixels, has left the output. None for controller-paced
    /// displays.
    pub const fn scan_end(&self) -> Option<u32> {
        let t = self.timing;
        if t.line_cycles == 0 {
            return None;
        }
        let pixels = (self.width as u32 + 8) * self.pixel_cycles as u32;
        Some(t.hsync_cycles + t.back_porch_cycles + pixels)
    }

    /// Check the mode is self-consistent and fits a video RAM of `ram_len` bytes.
    pub fn check(&self, ram_len: usize) -> Result<(), ModeError> {
        if self.ram_size() > ram_len {
            return Err(ModeError::RamTooSmall { needed: self.ram_size(), available: ram_len });
        }
        if self.line_bytes() > LINE_BYTES {
            return Err(ModeError::LineTooLong);
        }
        if self.line_repeat == 0
            || self.pixel_cycles == 0
            || self.first_line as u32 + self.visible_lines() as u32 > self.timing.total_lines as u32
        {
            return Err(ModeError::BadGeometry);
        }
        let tiled = match self.format {
            Format::Mono | Format::Palette => true,
            Format::Text => self.cell_w == 8 && self.cell_h == 8,
            Format::Attr => {
                self.cell_w > 0 && self.cell_h > 0
                    && self.width % self.cell_w as u16 == 0
                    && self.height % self.cell_h as u16 == 0
            }
        };
        if !tiled || (self.format != Format::Palette && self.width % 8 != 0) {
            return Err(ModeError::BadGeometry);
        }
        match self.scan_end() {
            Some(end) if end > self.timing.line_cycles => {
                Err(ModeError::LineOverrun { end, line_cycles: self.timing.line_cycles })
            }
            _ => Ok(()),
        }
    }
}

/// 40x30 characters of 8x8 text, line doubled on 480 VGA lines.
pub static TEXT_40X30: Mode =
    Mode::new("text 40x30", Format::Text, 320, 240, (8, 8), 0, 2, 4, &timing::VGA_64MHZ);

/// 320x240 monochrome graphics, line doubled.
pub static MONO_320X240: Mode =
    Mode::new("mono 320x240", Format::Mono, 320, 240, (1, 1), 0, 2, 4, &timing::VGA_64MHZ);

/// 128x64 monochrome graphics, each row shown on 4 lines, centred vertically.
pub static MONO_128X64: Mode =
    Mode::new("mono 128x64", Format::Mono, 128, 64, (1, 1), 112, 4, 8, &timing::VGA_64MHZ);

/// 256x192 graphics with one colour attribute per 8x8 cell.
pub static ATTR_256X192: Mode =
    Mode::new("attr 256x192", Format::Attr, 256, 192, (8, 8), 48, 2, 5, &timing::VGA_64MHZ);

/// 160x120 graphics with one colour attribute per 2x2 block.
pub static ATTR_160X120: Mode =
    Mode::new("attr 160x120", Format::Attr, 160, 120, (2, 2), 0, 4, 8, &timing::VGA_64MHZ);

/// 160x128 palette graphics on an ST7735 LCD.
pub static PALETTE_160X128: Mode =
    Mode::new("palette 160x128", Format::Palette, 160, 128, (1, 1), 1, 1, 2, &timing::LCD_160X128);

/// All predefined modes.
pub static MODES: [&Mode; 6] =
    [&TEXT_40X30, &MONO_320X240, &MONO_128X64, &ATTR_256X192, &ATTR_160X120, &PALETTE_160X128];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predefined_modes_are_consistent() {
        for mode in MODES.iter() {
            assert_eq!(mode.check(usize::MAX), Ok(()), "{}", mode.name);
        }
    }

    #[test]
    fn layout_sizes() {
        assert_eq!(TEXT_40X30.stride, 40);
        assert_eq!(TEXT_40X30.ram_size(), 40 * 30);
        assert_eq!(MONO_128X64.ram_size(), 16 * 64);
        assert_eq!(ATTR_256X192.layout(), Layout {
            pixels: 0..6144, attrs: 6144..6912, palette: 6912..6912,
        });
        assert_eq!(ATTR_160X120.attr_bytes(), 80 * 60);
        assert_eq!(PALETTE_160X128.layout().palette, 20480..20992);
    }

    #[test]
    fn line_bytes_per_format() {
        assert_eq!(MONO_128X64.line_bytes(), 17);
        assert_eq!(TEXT_40X30.line_bytes(), 41);
        assert_eq!(ATTR_256X192.line_bytes(), 257);
        assert_eq!(PALETTE_160X128.line_bytes(), 320);
    }

    #[test]
    fn row_mapping() {
        assert_eq!(MONO_128X64.row_of(111), None);
        assert_eq!(MONO_128X64.row_of(112), Some(0));
        assert_eq!(MONO_128X64.row_of(115), Some(0));
        assert_eq!(MONO_128X64.row_of(116), Some(1));
        assert_eq!(MONO_128X64.row_of(112 + 255), Some(63));
        assert_eq!(MONO_128X64.row_of(112 + 256), None);
    }

    #[test]
    fn check_rejects_small_ram() {
        assert_eq!(
            MONO_320X240.check(1024),
            Err(ModeError::RamTooSmall { needed: 9600, available: 1024 })
        );
    }

    #[test]
    fn vga_modes_finish_before_line_end() {
        for mode in MODES.iter().filter(|m| m.timing.line_cycles != 0) {
            let end = mode.scan_end().unwrap();
            assert!(end <= mode.timing.line_cycles, "{}: {}", mode.name, end);
        }
        assert_eq!(TEXT_40X30.scan_end(), Some(244 + 122 + 328 * 4));
        assert_eq!(PALETTE_160X128.scan_end(), None);
    }

    #[test]
    fn check_rejects_pixels_past_line_end() {
        // 320 pixels at 4 cycles do not fit the visible part of a 48MHz line.
        let mode =
            Mode::new("wide", Format::Mono, 320, 240, (1, 1), 0, 2, 4, &timing::VGA_48MHZ);
        assert_eq!(
            mode.check(usize::MAX),
            Err(ModeError::LineOverrun { end: 183 + 92 + 328 * 4, line_cycles: 1525 })
        );
        let narrow =
            Mode::new("narrow", Format::Mono, 128, 64, (1, 1), 112, 4, 8, &timing::VGA_48MHZ);
        assert_eq!(narrow.check(usize::MAX), Ok(()));
    }

    #[test]
    fn check_rejects_overlong_frame() {
        let mode = Mode::new("tall", Format::Mono, 128, 200, (1, 1), 100, 4, 8, &timing::VGA_64MHZ);
        assert_eq!(mode.check(usize::MAX), Err(ModeError::BadGeometry));
    }
}
