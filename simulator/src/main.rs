use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, prelude::*};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use embedded_graphics::{
    mono_font::{ascii::FONT_6X10, MonoTextStyle},
    pixelcolor::{BinaryColor, Rgb565, Rgb888},
    prelude::*,
    text::{Baseline, Text},
};
use embedded_graphics_simulator::{
    OutputSettings, SimulatorDisplay, SimulatorEvent, Window, sdl2::Keycode,
};

use babysdk::bmp::{self, Storage};
use babysdk::hal::{CycleCounter, KeyLines, ScanOut, SerialLink, TonePwm};
use babysdk::keyboard::{Key, KeyConfig, KeyScan, KeySet, Keys};
use babysdk::link::{self, LinkKeys, Secondary};
use babysdk::sound::{self, Sound, SoundChannel, TONE_TIMER_HZ};
use babysdk::video::{
    splash, AttrCanvas, Format, Index, LineBuf, Mode, MonoCanvas, PaletteCanvas, Rgb3,
    Scanline, TextConsole, VideoRam, VideoState, FONT_8X8, LINE_BYTES, MODES,
};

const VRAM_SIZE: usize = 20_992;

/// The firmware scans keys at 100Hz and steps melodies at 50Hz, so one
/// simulated frame every 20ms carries two key scans and one sound step.
const FRAME_MS: u64 = 20;
const KEY_SCANS_PER_FRAME: u32 = 2;

/// Simulated CPU clock, for the link timeout.
const SYS_CK: u32 = 64_000_000;

/// Decodes serialized scanlines back into pixels, standing in for the
/// monitor or LCD panel.
struct Monitor {
    display: SimulatorDisplay<Rgb888>,
    mode: &'static Mode,
    /// Scanlines received since the last vertical sync.
    count: u32,
}

impl Monitor {
    fn new(size: Size, mode: &'static Mode) -> Self {
        Monitor { display: SimulatorDisplay::new(size), mode, count: 0 }
    }

    fn set_mode(&mut self, mode: &'static Mode) {
        self.mode = mode;
        self.count = 0;
        self.display.clear(Rgb888::BLACK).ok();
    }

    fn pixel(&self, line: &[u8], x: usize) -> Rgb888 {
        match self.mode.format {
            Format::Mono | Format::Text => {
                if line[x / 8] & (0x80 >> (x % 8)) != 0 { Rgb888::WHITE } else { Rgb888::BLACK }
            }
            Format::Attr => Rgb3(line[x] & 0x07).into(),
            Format::Palette => {
                let raw = u16::from_be_bytes([line[2 * x], line[2 * x + 1]]);
                Rgb565::new((raw >> 11) as u8, ((raw >> 5) & 0x3F) as u8, (raw & 0x1F) as u8)
                    .into()
            }
        }
    }
}

impl ScanOut for Monitor {
    fn send_line(&mut self, line: &[u8]) {
        let repeat = self.mode.line_repeat as u32;
        let count = self.count;
        self.count += 1;
        // Repeated scanlines carry the same row.
        if count % repeat != 0 {
            return;
        }
        let y = (count / repeat) as i32;
        let pixels = (0..self.mode.width as usize)
            .map(|x| Pixel(Point::new(x as i32, y), self.pixel(line, x)))
            .collect::<Vec<_>>();
        self.display.draw_iter(pixels).ok();
    }

    fn set_vsync(&mut self, active: bool) {
        if active {
            self.count = 0;
        }
    }
}

/// Speaker: reports each change of pitch.
struct Speaker {
    div: Option<u16>,
}

impl TonePwm for Speaker {
    fn set_divider(&mut self, div: u16) {
        if div == 0 {
            return self.off();
        }
        if self.div != Some(div) {
            println!("Sound: {} Hz", TONE_TIMER_HZ / div as u32);
            self.div = Some(div);
        }
    }

    fn off(&mut self) {
        if self.div.take().is_some() {
            println!("Sound: off");
        }
    }
}

/// Keys currently held down in the window.
type Held = Arc<Mutex<KeySet>>;

/// One end of an in-memory serial cable.
struct PipeEnd {
    tx: Arc<Mutex<VecDeque<u8>>>,
    rx: Arc<Mutex<VecDeque<u8>>>,
}

fn cable() -> (PipeEnd, PipeEnd) {
    let a = Arc::new(Mutex::new(VecDeque::new()));
    let b = Arc::new(Mutex::new(VecDeque::new()));
    (PipeEnd { tx: a.clone(), rx: b.clone() }, PipeEnd { tx: b, rx: a })
}

impl SerialLink for PipeEnd {
    fn write(&mut self, byte: u8) {
        self.tx.lock().unwrap().push_back(byte);
    }

    fn read(&mut self) -> Option<u8> {
        self.rx.lock().unwrap().pop_front()
    }
}

struct HostClock(Instant);

impl CycleCounter for HostClock {
    fn cycles(&self) -> u32 {
        (self.0.elapsed().as_micros() as u64 * (SYS_CK / 1_000_000) as u64) as u32
    }
}

/// Key lines read straight from the window, or from the second CPU over
/// the link as on the BabyPC.
enum Lines {
    Direct(Held),
    Link(LinkKeys<PipeEnd>),
}

impl KeyLines for Lines {
    fn read(&mut self, pressed: &mut KeySet) {
        match self {
            Lines::Direct(held) => {
                let held = held.lock().unwrap();
                for key in Key::all().filter(|&k| held.contains(k)) {
                    pressed.press(key);
                }
            }
            Lines::Link(link) => link.read(pressed),
        }
    }
}

/// Run the second CPU on its own thread: answer the handshake and send
/// a scan frame every 10ms.
fn start_secondary(end: PipeEnd, held: Held) {
    std::thread::spawn(move || {
        let mut cpu2 = Secondary::new(end);
        loop {
            cpu2.poll();
            let keys = *held.lock().unwrap();
            cpu2.send_scan(&keys);
            std::thread::sleep(Duration::from_millis(10));
        }
    });
}

/// Screenshot storage in a host directory.
struct DirStorage {
    dir: PathBuf,
    mounted: bool,
    file: Option<File>,
}

impl Storage for DirStorage {
    type Error = io::Error;

    fn mounted(&self) -> bool {
        self.mounted
    }

    fn mount(&mut self) -> Result<(), io::Error> {
        fs::create_dir_all(&self.dir)?;
        self.mounted = true;
        Ok(())
    }

    fn unmount(&mut self) {
        self.file = None;
        self.mounted = false;
    }

    fn exists(&mut self, name: &str) -> Result<bool, io::Error> {
        Ok(self.dir.join(name).exists())
    }

    fn create(&mut self, name: &str) -> Result<(), io::Error> {
        self.file = Some(File::create(self.dir.join(name))?);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), io::Error> {
        match self.file.as_mut() {
            Some(file) => file.write_all(data),
            None => Err(io::Error::new(io::ErrorKind::Other, "no open file")),
        }
    }

    fn close(&mut self) -> Result<(), io::Error> {
        match self.file.take() {
            Some(file) => file.sync_all(),
            None => Ok(()),
        }
    }
}

fn map_key(keycode: Keycode) -> Option<Key> {
    Some(match keycode {
        Keycode::Num1 => Key::Key1, Keycode::Num2 => Key::Key2, Keycode::Num3 => Key::Key3,
        Keycode::Num4 => Key::Key4, Keycode::Num5 => Key::Key5, Keycode::Num6 => Key::Key6,
        Keycode::Num7 => Key::Key7, Keycode::Num8 => Key::Key8, Keycode::Num9 => Key::Key9,
        Keycode::Num0 => Key::Key0,
        Keycode::Q => Key::Q, Keycode::W => Key::W, Keycode::E => Key::E, Keycode::R => Key::R,
        Keycode::T => Key::T, Keycode::Y => Key::Y, Keycode::U => Key::U, Keycode::I => Key::I,
        Keycode::O => Key::O, Keycode::P => Key::P,
        Keycode::A => Key::A, Keycode::S => Key::S, Keycode::D => Key::D, Keycode::F => Key::F,
        Keycode::G => Key::G, Keycode::H => Key::H, Keycode::J => Key::J, Keycode::K => Key::K,
        Keycode::L => Key::L, Keycode::Return => Key::Enter,
        Keycode::LShift | Keycode::RShift => Key::Shift,
        Keycode::Z => Key::Z, Keycode::X => Key::X, Keycode::C => Key::C, Keycode::V => Key::V,
        Keycode::B => Key::B, Keycode::N => Key::N, Keycode::M => Key::M,
        Keycode::LCtrl | Keycode::RCtrl => Key::Ctrl,
        Keycode::Space => Key::Space,
        _ => return None,
    })
}

/// Index into [`MODES`] selected by a function key.
fn mode_key(keycode: Keycode) -> Option<usize> {
    [Keycode::F1, Keycode::F2, Keycode::F3, Keycode::F4, Keycode::F5, Keycode::F6]
        .iter()
        .position(|&k| k == keycode)
}

/// Typing position on the current mode's canvas.
struct Screen {
    mode: &'static Mode,
    text_cursor: (u16, u16),
    cursor: Point,
}

impl Screen {
    /// Clear the frame buffer for `mode`, draw the logo and a banner.
    fn open(mode: &'static Mode, ram: &VideoRam<VRAM_SIZE>) -> Self {
        let mut screen = Screen { mode, text_cursor: (0, 0), cursor: Point::zero() };
        match mode.format {
            Format::Text => {
                if let Ok(mut con) = TextConsole::new(mode, ram) {
                    con.clear();
                }
            }
            Format::Mono => {
                if let Ok(mut canvas) = MonoCanvas::new(mode, ram) {
                    canvas.clear(BinaryColor::Off).ok();
                    splash(&mut canvas, |c| {
                        BinaryColor::from(c.r() as u16 + c.g() as u16 + c.b() as u16 > 384)
                    }).ok();
                }
            }
            Format::Attr => {
                if let Ok(mut canvas) = AttrCanvas::new(mode, ram) {
                    canvas.clear(Rgb3::BLACK).ok();
                    splash(&mut canvas, Rgb3::from).ok();
                }
            }
            Format::Palette => {
                if let Ok(mut canvas) = PaletteCanvas::new(mode, ram) {
                    canvas.load_default_palette();
                    canvas.clear(Index(0)).ok();
                    splash(&mut canvas, rgb332).ok();
                }
            }
        }
        screen.print(ram, "BabySDK ");
        screen.print(ram, mode.name);
        screen.print(ram, "\n");
        screen
    }

    fn print(&mut self, ram: &VideoRam<VRAM_SIZE>, s: &str) {
        for c in s.chars() {
            self.put_char(ram, c);
        }
    }

    fn put_char(&mut self, ram: &VideoRam<VRAM_SIZE>, c: char) {
        match self.mode.format {
            Format::Text => {
                if let Ok(mut con) = TextConsole::new(self.mode, ram) {
                    con.set_cursor(self.text_cursor.0, self.text_cursor.1);
                    con.put_char(c);
                    self.text_cursor = con.cursor();
                }
            }
            Format::Mono => {
                if let Ok(mut canvas) = MonoCanvas::new(self.mode, ram) {
                    draw_char(&mut canvas, BinaryColor::On, BinaryColor::Off, &mut self.cursor, c);
                }
            }
            Format::Attr => {
                if let Ok(mut canvas) = AttrCanvas::new(self.mode, ram) {
                    draw_char(&mut canvas, Rgb3::WHITE, Rgb3::BLACK, &mut self.cursor, c);
                }
            }
            Format::Palette => {
                if let Ok(mut canvas) = PaletteCanvas::new(self.mode, ram) {
                    draw_char(&mut canvas, Index(0xFF), Index(0), &mut self.cursor, c);
                }
            }
        }
    }
}

/// Palette index for the default RRRGGGBB palette.
fn rgb332(c: Rgb888) -> Index {
    Index((c.r() & 0xE0) | ((c.g() >> 3) & 0x1C) | (c.b() >> 6))
}

/// Draw `c` at `cursor` in a 6x10 font, wrapping at the right edge and
/// clearing the screen when the bottom is reached.
fn draw_char<D: DrawTarget>(canvas: &mut D, ink: D::Color, paper: D::Color, cursor: &mut Point, c: char) {
    let cell = FONT_6X10.character_size;
    let size = canvas.bounding_box().size;
    let newline = |canvas: &mut D, cursor: &mut Point| {
        *cursor = Point::new(0, cursor.y + cell.height as i32);
        if cursor.y + cell.height as i32 > size.height as i32 {
            *cursor = Point::zero();
            canvas.clear(paper).ok();
        }
    };
    if c == '\n' {
        newline(canvas, cursor);
        return;
    }
    if cursor.x + cell.width as i32 > size.width as i32 {
        newline(canvas, cursor);
    }
    let mut buf = [0u8; 4];
    let style = MonoTextStyle::new(&FONT_6X10, ink);
    Text::with_baseline(c.encode_utf8(&mut buf), *cursor, style, Baseline::Top).draw(canvas).ok();
    cursor.x += cell.width as i32;
}

pub fn main() {
    let babypc = std::env::args().any(|a| a == "--babypc");

    let ram: VideoRam<VRAM_SIZE> = VideoRam::new();
    let state = VideoState::new();
    let keys: Keys<16> = Keys::new();
    let channel = SoundChannel::new();
    let mut lbufs: [LineBuf; 2] = [[0; LINE_BYTES]; 2];

    let size = MODES.iter().fold(Size::zero(), |s, m| {
        Size::new(s.width.max(m.width as u32), s.height.max(m.height as u32))
    });
    let settings = OutputSettings { scale: 2, pixel_spacing: 0, ..Default::default() };
    let mut window = Window::new("BabySDK", &settings);

    let mode = MODES[0];
    let monitor = Monitor::new(size, mode);
    let mut video = match Scanline::new(monitor, mode, &ram, &state, &FONT_8X8, &mut lbufs) {
        Ok(video) => video,
        Err(e) => {
            eprintln!("Cannot start video: {:?}", e);
            return;
        }
    };
    video.start();

    let held: Held = Arc::new(Mutex::new(KeySet::new()));
    let lines = if babypc {
        let (cpu1, cpu2) = cable();
        start_secondary(cpu2, held.clone());
        let mut cpu1 = cpu1;
        let clock = HostClock(Instant::now());
        if let Err(e) = link::sync_init(&mut cpu1, &clock, SYS_CK / 2) {
            eprintln!("CPU2 SYNC ERROR! {:?}", e);
            return;
        }
        println!("Link to second CPU established.");
        Lines::Link(LinkKeys::new(cpu1))
    } else {
        Lines::Direct(held.clone())
    };
    let mut keyscan = KeyScan::new(lines, &keys, KeyConfig::DEFAULT);
    let mut sound = Sound::new(&channel, Speaker { div: None });

    let mut storage = DirStorage { dir: PathBuf::from("screenshots"), mounted: false, file: None };
    let mut screen = Screen::open(mode, &ram);
    channel.play_melody(&sound::STARTUP);

    'outer: loop {
        let t0 = Instant::now();

        // One frame's worth of line interrupts.
        for _ in 0..video.timing().total_lines {
            video.line_isr();
        }
        window.update(&video.out_mut().display);

        for event in window.events() {
            match event {
                SimulatorEvent::Quit => break 'outer,
                SimulatorEvent::KeyDown { keycode: Keycode::Escape, .. } => break 'outer,
                SimulatorEvent::KeyDown { keycode: Keycode::F12, .. } => {
                    match bmp::screenshot(&mut storage, video.mode(), &ram, &FONT_8X8) {
                        Ok(name) => println!("Saved {}", name),
                        Err(e) => println!("Screenshot failed: {:?}", e),
                    }
                }
                SimulatorEvent::KeyDown { keycode, repeat: false, .. } => {
                    if let Some(idx) = mode_key(keycode) {
                        let mode = MODES[idx];
                        match video.set_mode(mode) {
                            Ok(()) => {
                                video.out_mut().set_mode(mode);
                                screen = Screen::open(mode, &ram);
                                println!("Mode: {}", mode.name);
                            }
                            Err(e) => println!("Mode {} rejected: {:?}", mode.name, e),
                        }
                    } else if let Some(key) = map_key(keycode) {
                        held.lock().unwrap().set(key, true);
                    }
                }
                SimulatorEvent::KeyUp { keycode, .. } => {
                    if let Some(key) = map_key(keycode) {
                        held.lock().unwrap().set(key, false);
                    }
                }
                _ => (),
            }
        }

        for _ in 0..KEY_SCANS_PER_FRAME {
            keyscan.scan();
        }
        sound.scan();

        while let Some(c) = keys.get_char() {
            screen.put_char(&ram, c);
            channel.play_melody(&sound::BEEP);
        }

        let elapsed = t0.elapsed();
        if elapsed < Duration::from_millis(FRAME_MS) {
            std::thread::sleep(Duration::from_millis(FRAME_MS) - elapsed);
        }
    }
}
