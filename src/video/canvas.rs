//! Drawing surfaces over the video RAM.

use core::convert::Infallible;
use core::fmt;

use embedded_graphics::{
    Pixel,
    draw_target::DrawTarget,
    geometry::{Dimensions, OriginDimensions, Point, Size},
    pixelcolor::{BinaryColor, PixelColor, Rgb565, Rgb888, RgbColor},
};
use tinytga::Tga;

use super::{Format, Mode, ModeError, VideoRam};

/// Boot logo shown by [`splash()`].
static LOGO: &[u8] = include_bytes!("../../assets/logo.tga");

/// 3-bit colour for attribute modes: bit 0 red, bit 1 green, bit 2 blue.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Rgb3(pub u8);

impl Rgb3 {
    pub const BLACK: Rgb3 = Rgb3(0);
    pub const RED: Rgb3 = Rgb3(1);
    pub const GREEN: Rgb3 = Rgb3(2);
    pub const YELLOW: Rgb3 = Rgb3(3);
    pub const BLUE: Rgb3 = Rgb3(4);
    pub const MAGENTA: Rgb3 = Rgb3(5);
    pub const CYAN: Rgb3 = Rgb3(6);
    pub const WHITE: Rgb3 = Rgb3(7);
}

impl PixelColor for Rgb3 {
    type Raw = ();
}

impl From<Rgb888> for Rgb3 {
    fn from(c: Rgb888) -> Self {
        Rgb3((c.r() >> 7) | ((c.g() >> 7) << 1) | ((c.b() >> 7) << 2))
    }
}

impl From<Rgb3> for Rgb888 {
    fn from(c: Rgb3) -> Self {
        let on = |bit: u8| if c.0 & bit != 0 { 0xFF } else { 0x00 };
        Rgb888::new(on(1), on(2), on(4))
    }
}

/// Palette index for palette modes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Index(pub u8);

impl PixelColor for Index {
    type Raw = ();
}

/// Pack an ink and paper colour into an attribute byte.
pub const fn attr(ink: Rgb3, paper: Rgb3) -> u8 {
    (ink.0 & 0x07) | ((paper.0 & 0x07) << 4)
}

fn expect_format<const N: usize>(mode: &Mode, format: Format) -> Result<(), ModeError> {
    if mode.format != format {
        return Err(ModeError::WrongFormat);
    }
    mode.check(N)
}

/// Convert a drawing coordinate into `(x, y)` if it lies on a `mode` sized screen.
fn clip(mode: &Mode, p: Point) -> Option<(usize, usize)> {
    let (x, y): (u32, u32) = p.try_into().ok()?;
    if x < mode.width as u32 && y < mode.height as u32 {
        Some((x as usize, y as usize))
    } else {
        None
    }
}

/// 1bpp canvas for mono modes.
pub struct MonoCanvas<'a, const N: usize> {
    mode: &'static Mode,
    ram: &'a VideoRam<N>,
}

impl<'a, const N: usize> MonoCanvas<'a, N> {
    pub fn new(mode: &'static Mode, ram: &'a VideoRam<N>) -> Result<Self, ModeError> {
        expect_format::<N>(mode, Format::Mono)?;
        Ok(Self { mode, ram })
    }
}

impl<const N: usize> OriginDimensions for MonoCanvas<'_, N> {
    fn size(&self) -> Size {
        Size::new(self.mode.width as u32, self.mode.height as u32)
    }
}

impl<const N: usize> DrawTarget for MonoCanvas<'_, N> {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
        where I: IntoIterator<Item = Pixel<Self::Color>>
    {
        let stride = self.mode.stride as usize;
        for Pixel(coord, color) in pixels.into_iter() {
            if let Some((x, y)) = clip(self.mode, coord) {
                let idx = y * stride + x / 8;
                let mask = 0x80 >> (x % 8);
                let b = self.ram.get(idx);
                self.ram.set(idx, if color.is_on() { b | mask } else { b & !mask });
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        let fill = if color.is_on() { 0xFF } else { 0x00 };
        self.ram.fill(self.mode.layout().pixels, fill);
        Ok(())
    }
}

/// Bitmap plus colour attribute canvas.
///
/// Each pixel is either ink or paper of the attribute cell it lies in.
/// Drawing the cell's paper colour clears the pixel; drawing any other colour
/// sets the pixel and changes the ink of the whole cell.
pub struct AttrCanvas<'a, const N: usize> {
    mode: &'static Mode,
    ram: &'a VideoRam<N>,
}

impl<'a, const N: usize> AttrCanvas<'a, N> {
    pub fn new(mode: &'static Mode, ram: &'a VideoRam<N>) -> Result<Self, ModeError> {
        expect_format::<N>(mode, Format::Attr)?;
        Ok(Self { mode, ram })
    }

    fn cell(&self, x: usize, y: usize) -> usize {
        let cols = self.mode.cols() as usize;
        self.mode.pixel_bytes()
            + (y / self.mode.cell_h as usize) * cols
            + x / self.mode.cell_w as usize
    }

    /// Set the attribute of cell (`cx`, `cy`) directly.
    pub fn set_attr_cell(&mut self, cx: u16, cy: u16, ink: Rgb3, paper: Rgb3) {
        if cx < self.mode.cols() && cy < self.mode.rows() {
            let idx = self.mode.pixel_bytes() + cy as usize * self.mode.cols() as usize
                + cx as usize;
            self.ram.set(idx, attr(ink, paper));
        }
    }

    /// Ink and paper of the cell containing pixel (`x`, `y`).
    pub fn ink_paper(&self, x: u16, y: u16) -> Option<(Rgb3, Rgb3)> {
        let (x, y) = clip(self.mode, Point::new(x as i32, y as i32))?;
        let a = self.ram.get(self.cell(x, y));
        Some((Rgb3(a & 0x07), Rgb3((a >> 4) & 0x07)))
    }
}

impl<const N: usize> OriginDimensions for AttrCanvas<'_, N> {
    fn size(&self) -> Size {
        Size::new(self.mode.width as u32, self.mode.height as u32)
    }
}

impl<const N: usize> DrawTarget for AttrCanvas<'_, N> {
    type Color = Rgb3;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
        where I: IntoIterator<Item = Pixel<Self::Color>>
    {
        let stride = self.mode.stride as usize;
        for Pixel(coord, color) in pixels.into_iter() {
            if let Some((x, y)) = clip(self.mode, coord) {
                let idx = y * stride + x / 8;
                let mask = 0x80 >> (x % 8);
                let cell = self.cell(x, y);
                let a = self.ram.get(cell);
                let b = self.ram.get(idx);
                if (color.0 & 0x07) == (a >> 4) & 0x07 {
                    self.ram.set(idx, b & !mask);
                } else {
                    self.ram.set(idx, b | mask);
                    self.ram.set(cell, (a & 0xF8) | (color.0 & 0x07));
                }
            }
        }
        Ok(())
    }

    /// Clear all pixels and set every cell's paper to `color`, keeping ink.
    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        let layout = self.mode.layout();
        self.ram.fill(layout.pixels, 0);
        for idx in layout.attrs {
            let a = self.ram.get(idx);
            self.ram.set(idx, (a & 0x0F) | ((color.0 & 0x07) << 4));
        }
        Ok(())
    }
}

/// 8-bit indexed canvas with a 256-entry RGB565 palette.
pub struct PaletteCanvas<'a, const N: usize> {
    mode: &'static Mode,
    ram: &'a VideoRam<N>,
}

impl<'a, const N: usize> PaletteCanvas<'a, N> {
    pub fn new(mode: &'static Mode, ram: &'a VideoRam<N>) -> Result<Self, ModeError> {
        expect_format::<N>(mode, Format::Palette)?;
        Ok(Self { mode, ram })
    }

    /// Set palette entry `idx`. Stored big-endian, the order the LCD expects.
    pub fn set_palette(&mut self, idx: u8, color: Rgb565) {
        let raw = ((color.r() as u16) << 11) | ((color.g() as u16) << 5) | color.b() as u16;
        let base = self.mode.layout().palette.start + 2 * idx as usize;
        let [hi, lo] = raw.to_be_bytes();
        self.ram.set(base, hi);
        self.ram.set(base + 1, lo);
    }

    pub fn palette(&self, idx: u8) -> Rgb565 {
        let base = self.mode.layout().palette.start + 2 * idx as usize;
        let raw = u16::from_be_bytes([self.ram.get(base), self.ram.get(base + 1)]);
        Rgb565::new((raw >> 11) as u8, ((raw >> 5) & 0x3F) as u8, (raw & 0x1F) as u8)
    }

    /// Load a 3-3-2 RGB palette, so index bits are `RRRGGGBB`.
    pub fn load_default_palette(&mut self) {
        for i in 0..=255u8 {
            let (r, g, b) = ((i >> 5) as u16, ((i >> 2) & 0x07) as u16, (i & 0x03) as u16);
            self.set_palette(i, Rgb565::new((r * 31 / 7) as u8, (g * 63 / 7) as u8, (b * 31 / 3) as u8));
        }
    }
}

impl<const N: usize> OriginDimensions for PaletteCanvas<'_, N> {
    fn size(&self) -> Size {
        Size::new(self.mode.width as u32, self.mode.height as u32)
    }
}

impl<const N: usize> DrawTarget for PaletteCanvas<'_, N> {
    type Color = Index;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
        where I: IntoIterator<Item = Pixel<Self::Color>>
    {
        let width = self.mode.width as usize;
        for Pixel(coord, color) in pixels.into_iter() {
            if let Some((x, y)) = clip(self.mode, coord) {
                self.ram.set(y * width + x, color.0);
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        self.ram.fill(self.mode.layout().pixels, color.0);
        Ok(())
    }
}

/// Character console for text modes.
///
/// Writes go to the cursor position, wrapping at the right edge and
/// scrolling the screen up when the cursor leaves the bottom row.
/// Characters outside printable ASCII are shown as `?`.
pub struct TextConsole<'a, const N: usize> {
    mode: &'static Mode,
    ram: &'a VideoRam<N>,
    col: u16,
    row: u16,
    inverse: bool,
}

impl<'a, const N: usize> TextConsole<'a, N> {
    pub fn new(mode: &'static Mode, ram: &'a VideoRam<N>) -> Result<Self, ModeError> {
        expect_format::<N>(mode, Format::Text)?;
        Ok(Self { mode, ram, col: 0, row: 0, inverse: false })
    }

    /// Blank the screen and home the cursor.
    pub fn clear(&mut self) {
        self.ram.fill(self.mode.layout().pixels, b' ');
        self.col = 0;
        self.row = 0;
    }

    pub fn cursor(&self) -> (u16, u16) {
        (self.col, self.row)
    }

    /// Move the cursor, clamped to the screen.
    pub fn set_cursor(&mut self, col: u16, row: u16) {
        self.col = col.min(self.mode.cols() - 1);
        self.row = row.min(self.mode.rows() - 1);
    }

    /// Subsequent characters are drawn inverted.
    pub fn set_inverse(&mut self, inverse: bool) {
        self.inverse = inverse;
    }

    /// Write `s` starting at (`col`, `row`).
    pub fn print_at(&mut self, col: u16, row: u16, s: &str) {
        self.set_cursor(col, row);
        for c in s.chars() {
            self.put_char(c);
        }
    }

    /// Character code stored at (`col`, `row`), including the inverse bit.
    pub fn char_at(&self, col: u16, row: u16) -> u8 {
        self.ram.get(row as usize * self.mode.stride as usize + col as usize)
    }

    pub fn put_char(&mut self, c: char) {
        match c {
            '\n' => self.newline(),
            '\r' => self.col = 0,
            '\x08' => {
                if self.col > 0 {
                    self.col -= 1;
                    self.store(b' ');
                }
            }
            c => {
                let code = if (' '..='~').contains(&c) { c as u8 } else { b'?' };
                self.store(if self.inverse { code | 0x80 } else { code });
                self.col += 1;
                if self.col >= self.mode.cols() {
                    self.newline();
                }
            }
        }
    }

    fn store(&self, code: u8) {
        let idx = self.row as usize * self.mode.stride as usize + self.col as usize;
        self.ram.set(idx, code);
    }

    fn newline(&mut self) {
        self.col = 0;
        if self.row + 1 < self.mode.rows() {
            self.row += 1;
        } else {
            self.scroll();
        }
    }

    /// Move every row up by one and blank the last row.
    fn scroll(&mut self) {
        let cols = self.mode.stride as usize;
        let rows = self.mode.rows() as usize;
        self.ram.copy_within(cols, 0, cols * (rows - 1));
        self.ram.fill(cols * (rows - 1)..cols * rows, b' ');
    }
}

impl<const N: usize> fmt::Write for TextConsole<'_, N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            self.put_char(c);
        }
        Ok(())
    }
}

/// Draw the boot logo centred on `display`, converting colours with `map`.
pub fn splash<D, F>(display: &mut D, map: F) -> Result<(), D::Error>
    where D: DrawTarget, F: Fn(Rgb888) -> D::Color
{
    let tga = match Tga::<Rgb888>::from_slice(LOGO) {
        Ok(tga) => tga,
        Err(_) => return Ok(()),
    };
    let area = display.bounding_box();
    let logo = tga.size();
    let offset = Point::new(
        (area.size.width as i32 - logo.width as i32) / 2,
        (area.size.height as i32 - logo.height as i32) / 2,
    );
    display.draw_iter(tga.pixels().map(|Pixel(p, c)| Pixel(p + offset, map(c))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::{ATTR_160X120, ATTR_256X192, MONO_128X64, PALETTE_160X128, TEXT_40X30};
    use core::fmt::Write;
    use embedded_graphics::{
        prelude::*,
        primitives::{Line, PrimitiveStyle, Rectangle},
    };

    #[test]
    fn canvas_checks_format() {
        let ram: VideoRam<8192> = VideoRam::new();
        assert!(matches!(MonoCanvas::new(&TEXT_40X30, &ram), Err(ModeError::WrongFormat)));
        assert!(matches!(TextConsole::new(&MONO_128X64, &ram), Err(ModeError::WrongFormat)));
        assert!(matches!(
            PaletteCanvas::new(&PALETTE_160X128, &ram),
            Err(ModeError::RamTooSmall { .. })
        ));
    }

    #[test]
    fn mono_draws_and_clips() {
        let ram: VideoRam<1024> = VideoRam::new();
        let mut canvas = MonoCanvas::new(&MONO_128X64, &ram).unwrap();
        Line::new(Point::new(-4, 0), Point::new(200, 0))
            .into_styled(PrimitiveStyle::with_stroke(BinaryColor::On, 1))
            .draw(&mut canvas)
            .unwrap();
        for i in 0..16 {
            assert_eq!(ram.get(i), 0xFF);
        }
        assert_eq!(ram.get(16), 0x00);

        Pixel(Point::new(9, 0), BinaryColor::Off).draw(&mut canvas).unwrap();
        assert_eq!(ram.get(1), 0b1011_1111);

        canvas.clear(BinaryColor::Off).unwrap();
        assert_eq!(ram.get(0), 0);
    }

    #[test]
    fn attr_pixel_sets_cell_ink() {
        let ram: VideoRam<6912> = VideoRam::new();
        let mut canvas = AttrCanvas::new(&ATTR_256X192, &ram).unwrap();
        canvas.clear(Rgb3::BLUE).unwrap();
        assert_eq!(canvas.ink_paper(0, 0), Some((Rgb3::BLACK, Rgb3::BLUE)));

        Pixel(Point::new(9, 1), Rgb3::YELLOW).draw(&mut canvas).unwrap();
        assert_eq!(ram.get(32 + 1), 0b0100_0000);
        assert_eq!(canvas.ink_paper(8, 0), Some((Rgb3::YELLOW, Rgb3::BLUE)));
        // Neighbouring cell untouched.
        assert_eq!(canvas.ink_paper(0, 0), Some((Rgb3::BLACK, Rgb3::BLUE)));

        // Drawing paper clears the bit and keeps the ink.
        Pixel(Point::new(9, 1), Rgb3::BLUE).draw(&mut canvas).unwrap();
        assert_eq!(ram.get(32 + 1), 0);
        assert_eq!(canvas.ink_paper(8, 0), Some((Rgb3::YELLOW, Rgb3::BLUE)));
    }

    #[test]
    fn attr_2x2_blocks() {
        let ram: VideoRam<7200> = VideoRam::new();
        let mut canvas = AttrCanvas::new(&ATTR_160X120, &ram).unwrap();
        Rectangle::new(Point::new(2, 2), Size::new(2, 2))
            .into_styled(PrimitiveStyle::with_fill(Rgb3::RED))
            .draw(&mut canvas)
            .unwrap();
        assert_eq!(ram.get(2400 + 80 + 1), attr(Rgb3::RED, Rgb3::BLACK));
        assert_eq!(ram.get(2400 + 80), 0);
        canvas.set_attr_cell(79, 59, Rgb3::WHITE, Rgb3::CYAN);
        assert_eq!(canvas.ink_paper(159, 119), Some((Rgb3::WHITE, Rgb3::CYAN)));
    }

    #[test]
    fn palette_entries_are_big_endian() {
        let ram: VideoRam<20992> = VideoRam::new();
        let mut canvas = PaletteCanvas::new(&PALETTE_160X128, &ram).unwrap();
        canvas.set_palette(1, Rgb565::RED);
        assert_eq!(ram.get(20482), 0xF8);
        assert_eq!(ram.get(20483), 0x00);
        assert_eq!(canvas.palette(1), Rgb565::RED);

        canvas.load_default_palette();
        assert_eq!(canvas.palette(0), Rgb565::BLACK);
        assert_eq!(canvas.palette(255), Rgb565::WHITE);
        assert_eq!(canvas.palette(0b1110_0000), Rgb565::RED);

        Pixel(Point::new(159, 127), Index(42)).draw(&mut canvas).unwrap();
        assert_eq!(ram.get(160 * 128 - 1), 42);
    }

    #[test]
    fn console_writes_wraps_and_scrolls() {
        let ram: VideoRam<1200> = VideoRam::new();
        let mut con = TextConsole::new(&TEXT_40X30, &ram).unwrap();
        con.clear();
        write!(con, "Hi\n\u{e9}").unwrap();
        assert_eq!(con.char_at(0, 0), b'H');
        assert_eq!(con.char_at(1, 0), b'i');
        assert_eq!(con.char_at(0, 1), b'?');
        assert_eq!(con.cursor(), (1, 1));

        con.put_char('\x08');
        assert_eq!(con.char_at(0, 1), b' ');
        assert_eq!(con.cursor(), (0, 1));

        con.set_inverse(true);
        con.print_at(39, 29, "AB");
        con.set_inverse(false);
        // 'A' filled the last cell, then the screen scrolled for 'B'.
        assert_eq!(con.char_at(39, 28), b'A' | 0x80);
        assert_eq!(con.char_at(0, 29), b'B' | 0x80);
        assert_eq!(con.char_at(0, 0), b' ');
        assert_eq!(con.cursor(), (1, 29));
    }

    #[test]
    fn console_carriage_return() {
        let ram: VideoRam<1200> = VideoRam::new();
        let mut con = TextConsole::new(&TEXT_40X30, &ram).unwrap();
        con.clear();
        write!(con, "abc\rX").unwrap();
        assert_eq!(con.char_at(0, 0), b'X');
        assert_eq!(con.char_at(1, 0), b'b');
    }

    #[test]
    fn rgb3_conversions() {
        assert_eq!(Rgb3::from(Rgb888::new(200, 10, 255)), Rgb3::MAGENTA);
        assert_eq!(Rgb888::from(Rgb3::CYAN), Rgb888::CYAN);
        assert_eq!(attr(Rgb3::WHITE, Rgb3::BLUE), 0x47);
    }

    #[test]
    fn splash_draws_centred_logo() {
        let ram: VideoRam<1024> = VideoRam::new();
        let mut canvas = MonoCanvas::new(&MONO_128X64, &ram).unwrap();
        splash(&mut canvas, |c| BinaryColor::from(c.g() > 127)).unwrap();
        let lit = (0..1024).filter(|&i| ram.get(i) != 0).count();
        assert!(lit > 0);
        // Corners stay clear.
        assert_eq!(ram.get(0), 0);
        assert_eq!(ram.get(1023), 0);
    }
}
