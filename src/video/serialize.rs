//! Mode-specific pixel serializers.
//!
//! Each serializer turns one frame buffer row into exactly
//! [`Mode::line_bytes()`] bytes in the format the output path expects.
//! They run inside the line interrupt, so the loops are kept to a fixed
//! number of iterations per mode with the row offsets computed once up front.

use super::{Font, Format, Mode, VideoRam};

/// Serialize frame buffer row `y` of `mode` into `out`.
///
/// Returns the number of bytes written, always `mode.line_bytes()`.
/// `out` must be at least that long; [`Mode::check()`] guarantees this for a
/// [`LineBuf`](super::LineBuf).
pub fn render_line<const N: usize>(
    mode: &Mode,
    ram: &VideoRam<N>,
    font: &Font,
    y: u16,
    out: &mut [u8],
) -> usize {
    match mode.format {
        Format::Mono => mono(mode, ram, y, out),
        Format::Text => text(mode, ram, font, y, out),
        Format::Attr => attr(mode, ram, y, out),
        Format::Palette => palette(mode, ram, y, out),
    }
}

/// Raw bitmap bytes, followed by a zero byte to blank the output.
fn mono<const N: usize>(mode: &Mode, ram: &VideoRam<N>, y: u16, out: &mut [u8]) -> usize {
    let stride = mode.stride as usize;
    let base = y as usize * stride;
    for (i, p) in out[..stride].iter_mut().enumerate() {
        *p = ram.get(base + i);
    }
    out[stride] = 0;
    stride + 1
}

/// One glyph row per character cell, followed by a zero byte.
fn text<const N: usize>(mode: &Mode, ram: &VideoRam<N>, font: &Font, y: u16, out: &mut [u8])
    -> usize
{
    let cols = mode.stride as usize;
    let base = (y / mode.cell_h as u16) as usize * cols;
    let line = (y % mode.cell_h as u16) as u8;
    for (i, p) in out[..cols].iter_mut().enumerate() {
        *p = font.glyph_row(ram.get(base + i), line);
    }
    out[cols] = 0;
    cols + 1
}

/// One GPIO byte per pixel: ink where the bitmap bit is set, paper elsewhere.
fn attr<const N: usize>(mode: &Mode, ram: &VideoRam<N>, y: u16, out: &mut [u8]) -> usize {
    let width = mode.width as usize;
    let stride = mode.stride as usize;
    let cell_w = mode.cell_w as usize;
    let base = y as usize * stride;
    let attrs = mode.pixel_bytes() + (y / mode.cell_h as u16) as usize * mode.cols() as usize;

    if cell_w == 8 {
        // One attribute covers exactly one bitmap byte.
        for (bx, px) in out[..width].chunks_exact_mut(8).enumerate() {
            let bits = ram.get(base + bx);
            let a = ram.get(attrs + bx);
            let (ink, paper) = (a & 0x07, (a >> 4) & 0x07);
            for (i, p) in px.iter_mut().enumerate() {
                *p = if bits & (0x80 >> i) != 0 { ink } else { paper };
            }
        }
    } else {
        for (bx, px) in out[..width].chunks_exact_mut(8).enumerate() {
            let bits = ram.get(base + bx);
            for (i, p) in px.iter_mut().enumerate() {
                let a = ram.get(attrs + (bx * 8 + i) / cell_w);
                *p = if bits & (0x80 >> i) != 0 { a & 0x07 } else { (a >> 4) & 0x07 };
            }
        }
    }
    out[width] = 0;
    width + 1
}

/// Two RGB565 bytes per pixel, big-endian, looked up in the palette.
fn palette<const N: usize>(mode: &Mode, ram: &VideoRam<N>, y: u16, out: &mut [u8]) -> usize {
    let width = mode.width as usize;
    let base = y as usize * width;
    let pal = mode.pixel_bytes();
    for (x, p) in out[..width * 2].chunks_exact_mut(2).enumerate() {
        let idx = ram.get(base + x) as usize;
        p[0] = ram.get(pal + 2 * idx);
        p[1] = ram.get(pal + 2 * idx + 1);
    }
    width * 2
}
