//! Screenshots of the video RAM as Windows BMP files.
//!
//! The file is written top-down (negative height) so rows can be streamed in
//! display order straight from the serializers:
//!
//! | Format | Bits per pixel | Palette |
//! |---|---|---|
//! | Mono, Text | 1 | black, white |
//! | Attr | 8 | the 8 attribute colours |
//! | Palette | 8 | the 256 mode palette entries |
//!
//! Two zero bytes follow the pixel data and are counted in both size fields.

use core::fmt::Write;

use heapless::String;

use crate::video::{render_line, Font, Format, LineBuf, Mode, ModeError, Rgb3, VideoRam, LINE_BYTES};

pub const MAGIC: u16 = 0x4D42;
pub const FILE_HEADER_LEN: usize = 14;
pub const INFO_HEADER_LEN: usize = 40;
pub const HEADER_LEN: usize = FILE_HEADER_LEN + INFO_HEADER_LEN;
/// Trailing padding after the pixel data.
pub const TAIL_LEN: usize = 2;
/// Highest screenshot number tried.
const MAX_INDEX: u32 = 99_999;

/// Minimal file system interface: one open file at a time.
pub trait Storage {
    type Error;

    fn mounted(&self) -> bool;
    fn mount(&mut self) -> Result<(), Self::Error>;
    fn unmount(&mut self);
    fn exists(&mut self, name: &str) -> Result<bool, Self::Error>;
    /// Create or truncate `name` and make it the open file.
    fn create(&mut self, name: &str) -> Result<(), Self::Error>;
    /// Append to the open file.
    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error>;
    /// Close the open file. Does nothing if no file is open.
    fn close(&mut self) -> Result<(), Self::Error>;
}

#[derive(Debug, Eq, PartialEq)]
pub enum ScreenshotError<E> {
    /// Every name up to `SCR99999.BMP` is taken.
    NoFreeName,
    /// The mode does not fit the video RAM.
    Mode(ModeError),
    Storage(E),
}

/// Image geometry for a mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BmpInfo {
    pub width: u32,
    pub height: u32,
    pub bpp: u16,
    pub palette_len: u32,
}

impl BmpInfo {
    pub const fn new(mode: &Mode) -> Self {
        let (bpp, palette_len) = match mode.format {
            Format::Mono | Format::Text => (1, 2),
            Format::Attr => (8, 8),
            Format::Palette => (8, 256),
        };
        BmpInfo { width: mode.width as u32, height: mode.height as u32, bpp, palette_len }
    }

    /// Bytes per row including padding to a multiple of 4.
    pub const fn row_bytes(&self) -> usize {
        ((self.width as usize * self.bpp as usize + 31) / 32) * 4
    }

    pub const fn pixel_offset(&self) -> usize {
        HEADER_LEN + 4 * self.palette_len as usize
    }

    pub const fn image_size(&self) -> usize {
        self.row_bytes() * self.height as usize + TAIL_LEN
    }

    pub const fn file_size(&self) -> usize {
        self.pixel_offset() + self.image_size()
    }

    /// Serialize the file and info headers.
    pub fn header(&self) -> [u8; HEADER_LEN] {
        let mut h = [0u8; HEADER_LEN];
        h[0..2].copy_from_slice(&MAGIC.to_le_bytes());
        h[2..6].copy_from_slice(&(self.file_size() as u32).to_le_bytes());
        h[10..14].copy_from_slice(&(self.pixel_offset() as u32).to_le_bytes());
        h[14..18].copy_from_slice(&(INFO_HEADER_LEN as u32).to_le_bytes());
        h[18..22].copy_from_slice(&(self.width as i32).to_le_bytes());
        h[22..26].copy_from_slice(&(-(self.height as i32)).to_le_bytes());
        h[26..28].copy_from_slice(&1u16.to_le_bytes());
        h[28..30].copy_from_slice(&self.bpp.to_le_bytes());
        h[34..38].copy_from_slice(&(self.image_size() as u32).to_le_bytes());
        // 72 DPI.
        h[38..42].copy_from_slice(&2835u32.to_le_bytes());
        h[42..46].copy_from_slice(&2835u32.to_le_bytes());
        h[46..50].copy_from_slice(&self.palette_len.to_le_bytes());
        h
    }
}

/// File name for screenshot number `idx`.
pub fn file_name(idx: u32) -> String<12> {
    let mut name = String::new();
    // Cannot overflow for idx <= 99999.
    write!(name, "SCR{:05}.BMP", idx.min(MAX_INDEX)).ok();
    name
}

/// Write the current screen to the first free `SCRnnnnn.BMP` and return its name.
///
/// If writing fails, the file is closed, the disk remounted and the whole
/// file written once more. The disk is left unmounted afterwards unless it
/// was mounted on entry.
pub fn screenshot<S: Storage, const N: usize>(
    storage: &mut S,
    mode: &Mode,
    ram: &VideoRam<N>,
    font: &Font,
) -> Result<String<12>, ScreenshotError<S::Error>> {
    mode.check(N).map_err(ScreenshotError::Mode)?;
    let was_mounted = storage.mounted();

    let mut name = None;
    let mut result = write_file(storage, &mut name, mode, ram, font);
    if matches!(result, Err(ScreenshotError::Storage(_))) {
        storage.close().ok();
        storage.unmount();
        result = write_file(storage, &mut name, mode, ram, font);
    }

    if result.is_err() {
        storage.close().ok();
    }
    if !was_mounted {
        storage.unmount();
    }
    result
}

/// Write the whole file once. `name` is chosen on the first attempt and
/// reused by the retry.
fn write_file<S: Storage, const N: usize>(
    storage: &mut S,
    name: &mut Option<String<12>>,
    mode: &Mode,
    ram: &VideoRam<N>,
    font: &Font,
) -> Result<String<12>, ScreenshotError<S::Error>> {
    if !storage.mounted() {
        storage.mount().map_err(ScreenshotError::Storage)?;
    }

    if name.is_none() {
        for idx in 0..=MAX_INDEX {
            let candidate = file_name(idx);
            if !storage.exists(&candidate).map_err(ScreenshotError::Storage)? {
                *name = Some(candidate);
                break;
            }
        }
    }
    let name = name.clone().ok_or(ScreenshotError::NoFreeName)?;

    let info = BmpInfo::new(mode);
    write_image(storage, &name, &info, mode, ram, font).map_err(ScreenshotError::Storage)?;
    Ok(name)
}

fn write_image<S: Storage, const N: usize>(
    storage: &mut S,
    name: &str,
    info: &BmpInfo,
    mode: &Mode,
    ram: &VideoRam<N>,
    font: &Font,
) -> Result<(), S::Error> {
    storage.create(name)?;
    storage.write(&info.header())?;
    write_palette(storage, mode, ram)?;

    let mut line: LineBuf = [0; LINE_BYTES];
    let mut row: LineBuf = [0; LINE_BYTES];
    let row_bytes = info.row_bytes();
    for y in 0..mode.height {
        row.fill(0);
        match mode.format {
            Format::Mono | Format::Text => {
                render_line(mode, ram, font, y, &mut line);
                let n = mode.width as usize / 8;
                row[..n].copy_from_slice(&line[..n]);
            }
            Format::Attr => {
                render_line(mode, ram, font, y, &mut line);
                let n = mode.width as usize;
                row[..n].copy_from_slice(&line[..n]);
            }
            Format::Palette => {
                let base = y as usize * mode.width as usize;
                for (x, p) in row[..mode.width as usize].iter_mut().enumerate() {
                    *p = ram.get(base + x);
                }
            }
        }
        storage.write(&row[..row_bytes])?;
    }

    storage.write(&[0; TAIL_LEN])?;
    storage.close()
}

fn write_palette<S: Storage, const N: usize>(storage: &mut S, mode: &Mode, ram: &VideoRam<N>)
    -> Result<(), S::Error>
{
    match mode.format {
        Format::Mono | Format::Text => {
            storage.write(&[0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0])
        }
        Format::Attr => {
            for c in 0..8 {
                let c = Rgb3(c);
                let on = |bit: u8| if c.0 & bit != 0 { 0xFF } else { 0x00 };
                storage.write(&[on(4), on(2), on(1), 0])?;
            }
            Ok(())
        }
        Format::Palette => {
            let base = mode.layout().palette.start;
            for i in 0..256 {
                let raw = u16::from_be_bytes([ram.get(base + 2 * i), ram.get(base + 2 * i + 1)]);
                let r5 = (raw >> 11) as u8;
                let g6 = ((raw >> 5) & 0x3F) as u8;
                let b5 = (raw & 0x1F) as u8;
                let bgra = [
                    (b5 << 3) | (b5 >> 2),
                    (g6 << 2) | (g6 >> 4),
                    (r5 << 3) | (r5 >> 2),
                    0,
                ];
                storage.write(&bgra)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::{
        AttrCanvas, Index, MonoCanvas, PaletteCanvas, TextConsole, ATTR_256X192, FONT_8X8, MONO_128X64,
        PALETTE_160X128, TEXT_40X30,
    };
    use embedded_graphics::{pixelcolor::{BinaryColor, Rgb565}, prelude::*};
    use std::collections::BTreeMap;

    #[derive(Debug, Eq, PartialEq)]
    struct DiskError;

    #[derive(Default)]
    struct MemDisk {
        files: BTreeMap<std::string::String, Vec<u8>>,
        open: Option<std::string::String>,
        mounted: bool,
        mounts: u32,
        /// Number of upcoming writes that fail.
        fail_writes: u32,
        mount_fails: bool,
    }

    impl Storage for MemDisk {
        type Error = DiskError;

        fn mounted(&self) -> bool {
            self.mounted
        }

        fn mount(&mut self) -> Result<(), DiskError> {
            if self.mount_fails {
                return Err(DiskError);
            }
            self.mounts += 1;
            self.mounted = true;
            Ok(())
        }

        fn unmount(&mut self) {
            self.mounted = false;
        }

        fn exists(&mut self, name: &str) -> Result<bool, DiskError> {
            Ok(self.files.contains_key(name))
        }

        fn create(&mut self, name: &str) -> Result<(), DiskError> {
            assert!(self.mounted && self.open.is_none());
            self.files.insert(name.into(), Vec::new());
            self.open = Some(name.into());
            Ok(())
        }

        fn write(&mut self, data: &[u8]) -> Result<(), DiskError> {
            if self.fail_writes > 0 {
                self.fail_writes -= 1;
                return Err(DiskError);
            }
            let name = self.open.as_ref().ok_or(DiskError)?;
            self.files.get_mut(name).ok_or(DiskError)?.extend_from_slice(data);
            Ok(())
        }

        fn close(&mut self) -> Result<(), DiskError> {
            self.open = None;
            Ok(())
        }
    }

    fn u32_at(b: &[u8], i: usize) -> u32 {
        u32::from_le_bytes([b[i], b[i + 1], b[i + 2], b[i + 3]])
    }

    fn i32_at(b: &[u8], i: usize) -> i32 {
        u32_at(b, i) as i32
    }

    fn u16_at(b: &[u8], i: usize) -> u16 {
        u16::from_le_bytes([b[i], b[i + 1]])
    }

    /// Check the size fields against the actual file.
    fn check_sizes(file: &[u8], width: i32, height: i32, bpp: u16) {
        assert_eq!(u16_at(file, 0), MAGIC);
        assert_eq!(u32_at(file, 2) as usize, file.len());
        assert_eq!(i32_at(file, 18), width);
        assert_eq!(i32_at(file, 22), -height);
        assert_eq!(u16_at(file, 28), bpp);
        let offset = u32_at(file, 10) as usize;
        assert_eq!(u32_at(file, 34) as usize, file.len() - offset);
        assert_eq!(&file[file.len() - 2..], &[0, 0]);
    }

    #[test]
    fn mono_screenshot() {
        let ram: VideoRam<1024> = VideoRam::new();
        let mut canvas = MonoCanvas::new(&MONO_128X64, &ram).unwrap();
        Pixel(Point::new(0, 0), BinaryColor::On).draw(&mut canvas).unwrap();
        Pixel(Point::new(127, 63), BinaryColor::On).draw(&mut canvas).unwrap();

        let mut disk = MemDisk::default();
        let name = screenshot(&mut disk, &MONO_128X64, &ram, &FONT_8X8).unwrap();
        assert_eq!(name.as_str(), "SCR00000.BMP");
        assert!(!disk.mounted);

        let file = &disk.files["SCR00000.BMP"];
        check_sizes(file, 128, 64, 1);
        assert_eq!(file.len(), 54 + 8 + 16 * 64 + 2);
        let px = &file[62..];
        assert_eq!(px[0], 0x80);
        assert_eq!(px[16 * 63 + 15], 0x01);
    }

    #[test]
    fn text_rows_are_padded() {
        let ram: VideoRam<1200> = VideoRam::new();
        let mut con = TextConsole::new(&TEXT_40X30, &ram).unwrap();
        con.clear();
        con.print_at(0, 0, "_");

        let mut disk = MemDisk::default();
        screenshot(&mut disk, &TEXT_40X30, &ram, &FONT_8X8).unwrap();
        let file = &disk.files["SCR00000.BMP"];
        check_sizes(file, 320, 240, 1);
        // 320 pixels at 1bpp is already a multiple of 4 bytes.
        assert_eq!(file.len(), 62 + 40 * 240 + 2);
        assert_eq!(file[62 + 40 * 7], 0xFF);
    }

    #[test]
    fn attr_uses_colour_indices() {
        let ram: VideoRam<6912> = VideoRam::new();
        let mut canvas = AttrCanvas::new(&ATTR_256X192, &ram).unwrap();
        canvas.clear(crate::video::Rgb3::BLUE).unwrap();
        Pixel(Point::new(1, 0), crate::video::Rgb3::RED).draw(&mut canvas).unwrap();

        let mut disk = MemDisk::default();
        screenshot(&mut disk, &ATTR_256X192, &ram, &FONT_8X8).unwrap();
        let file = &disk.files["SCR00000.BMP"];
        check_sizes(file, 256, 192, 8);
        assert_eq!(u32_at(file, 10), 54 + 32);
        // Palette entry 1 is red in BGRA order.
        assert_eq!(&file[58..62], &[0, 0, 0xFF, 0]);
        assert_eq!(&file[86..89], &[4, 1, 4]);
    }

    #[test]
    fn palette_mode_converts_palette() {
        let ram: VideoRam<20992> = VideoRam::new();
        let mut canvas = PaletteCanvas::new(&PALETTE_160X128, &ram).unwrap();
        canvas.set_palette(3, Rgb565::GREEN);
        Pixel(Point::new(2, 0), Index(3)).draw(&mut canvas).unwrap();

        let mut disk = MemDisk::default();
        screenshot(&mut disk, &PALETTE_160X128, &ram, &FONT_8X8).unwrap();
        let file = &disk.files["SCR00000.BMP"];
        check_sizes(file, 160, 128, 8);
        assert_eq!(file.len(), 54 + 1024 + 160 * 128 + 2);
        assert_eq!(&file[54 + 12..54 + 16], &[0, 0xFF, 0, 0]);
        assert_eq!(file[54 + 1024 + 2], 3);
    }

    #[test]
    fn picks_next_free_name_and_keeps_caller_mount() {
        let ram: VideoRam<1024> = VideoRam::new();
        let mut disk = MemDisk::default();
        disk.files.insert("SCR00000.BMP".into(), Vec::new());
        disk.files.insert("SCR00001.BMP".into(), Vec::new());
        disk.mount().unwrap();

        let name = screenshot(&mut disk, &MONO_128X64, &ram, &FONT_8X8).unwrap();
        assert_eq!(name.as_str(), "SCR00002.BMP");
        assert!(disk.mounted);
    }

    #[test]
    fn retries_once_after_remount() {
        let ram: VideoRam<1024> = VideoRam::new();
        let mut disk = MemDisk { fail_writes: 1, ..Default::default() };
        let name = screenshot(&mut disk, &MONO_128X64, &ram, &FONT_8X8).unwrap();
        assert_eq!(name.as_str(), "SCR00000.BMP");
        assert_eq!(disk.mounts, 2);
        check_sizes(&disk.files["SCR00000.BMP"], 128, 64, 1);
        assert!(!disk.mounted);
    }

    #[test]
    fn gives_up_after_second_failure() {
        let ram: VideoRam<1024> = VideoRam::new();
        let mut disk = MemDisk { fail_writes: 2, ..Default::default() };
        let res = screenshot(&mut disk, &MONO_128X64, &ram, &FONT_8X8);
        assert_eq!(res, Err(ScreenshotError::Storage(DiskError)));
        assert!(disk.open.is_none());
        assert!(!disk.mounted);

        let mut disk = MemDisk { mount_fails: true, ..Default::default() };
        let res = screenshot(&mut disk, &MONO_128X64, &ram, &FONT_8X8);
        assert_eq!(res, Err(ScreenshotError::Storage(DiskError)));
    }

    #[test]
    fn rejects_mode_larger_than_ram() {
        let ram: VideoRam<1024> = VideoRam::new();
        let mut disk = MemDisk::default();
        let res = screenshot(&mut disk, &PALETTE_160X128, &ram, &FONT_8X8);
        assert!(matches!(res, Err(ScreenshotError::Mode(ModeError::RamTooSmall { .. }))));
        assert_eq!(disk.mounts, 0);
    }

    #[test]
    fn names() {
        assert_eq!(file_name(0).as_str(), "SCR00000.BMP");
        assert_eq!(file_name(42).as_str(), "SCR00042.BMP");
        assert_eq!(file_name(99_999).as_str(), "SCR99999.BMP");
    }
}
