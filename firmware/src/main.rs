#![no_std]
#![no_main]

use panic_rtt_target as _;

mod dma;
mod gpio;
#[cfg(not(feature = "babypc"))]
mod keys;
#[cfg(feature = "lcd")]
mod lcd;
mod rcc;
mod spi;
mod stk;
mod tim;
#[cfg(feature = "babypc")]
mod uart;
#[cfg(not(feature = "lcd"))]
mod vga;

use ch32_metapac as pac;
use embedded_graphics::{
    mono_font::{ascii::FONT_6X10, MonoTextStyle},
    prelude::*,
    text::{Baseline, Text},
};
use qingke::riscv;
use rtt_target::{rprint, rprintln, rtt_init_print};

use babysdk::device::{self, Board};
use babysdk::handoff::Handoff;
#[cfg(feature = "babypc")]
use babysdk::keyboard::Key;
use babysdk::keyboard::{KeyConfig, KeyScan, Keys};
#[cfg(feature = "babypc")]
use babysdk::link::{self, LinkLock};
use babysdk::sound::{self, Sound, SoundChannel, TONE_TIMER_HZ};
use babysdk::video::{
    self, LineBuf, Mode, ModeError, Scanline, VideoRam, VideoState, FONT_8X8, LINE_BYTES,
};

use crate::{gpio::OutputPin, tim::{Tim, Tone}};

/// Video RAM size, enough for the largest predefined mode.
const VRAM_SIZE: usize = 20_992;
const KEYBUF_SIZE: usize = 16;

/// Key matrix scan rate, from SysTick.
const KEY_TICK_HZ: u32 = 100;
/// Melody step rate, from TIM4.
const SOUND_TICK_HZ: u32 = 50;
/// How long to wait for the second CPU to answer the link handshake.
#[cfg(feature = "babypc")]
const SYNC_TIMEOUT_MS: u32 = 500;

/// SysTick is a core interrupt and not part of the PAC enumeration.
const SYSTICK_IRQ: u8 = 12;

// Line interrupts must never wait, sound steps can wait a line,
// key scans can wait for anything.
const PRIO_VIDEO: u8 = 0x00;
const PRIO_SOUND: u8 = 0x80;
const PRIO_KEYS: u8 = 0xC0;

// Video mode. If several mode features are enabled the first of
// lcd, attr, mono wins, otherwise the 40x30 text mode is used.
#[cfg(feature = "lcd")]
static MODE: &Mode = &video::PALETTE_160X128;
#[cfg(all(feature = "attr", not(feature = "lcd")))]
static MODE: &Mode = &video::ATTR_256X192;
#[cfg(all(feature = "mono", not(any(feature = "lcd", feature = "attr"))))]
static MODE: &Mode = &video::MONO_320X240;
#[cfg(not(any(feature = "lcd", feature = "attr", feature = "mono")))]
static MODE: &Mode = &video::TEXT_40X30;

#[cfg(feature = "lcd")]
type Out = lcd::Lcd;
#[cfg(not(feature = "lcd"))]
type Out = vga::Vga;

/// Peripheral behind the key lines while the keyboard is stopped.
#[cfg(not(feature = "babypc"))]
type KeyHw = keys::KeyMatrix;
#[cfg(feature = "babypc")]
type KeyHw = uart::Uart;

#[cfg(not(feature = "babypc"))]
type Lines = keys::KeyMatrix;
#[cfg(feature = "babypc")]
type Lines = babysdk::link::LinkKeys<uart::Uart>;

static VRAM: VideoRam<VRAM_SIZE> = VideoRam::new();
static VSTATE: VideoState = VideoState::new();
static KEYS: Keys<KEYBUF_SIZE> = Keys::new();
static SOUND: SoundChannel = SoundChannel::new();

/// Line buffers. One is read by DMA while the line interrupt fills the other.
static mut LBUFS: [LineBuf; 2] = [[0; LINE_BYTES]; 2];

// State owned by each interrupt while its subsystem runs.
static VIDEO: Handoff<Scanline<'static, Out, VRAM_SIZE>> = Handoff::new();
static SOUNDER: Handoff<Sequencer> = Handoff::new();
static KEYSCAN: Handoff<Scanner> = Handoff::new();

/// Held by the application while it talks to the second CPU itself.
#[cfg(feature = "babypc")]
static LINK_LOCK: LinkLock = LinkLock::new();

/// Melody player and the timer stepping it.
struct Sequencer {
    tick: Tim,
    sound: Sound<'static, Tone>,
}

/// Key scanner and the SysTick stepping it.
struct Scanner {
    stk: stk::SysTick,
    scan: KeyScan<'static, Lines, KEYBUF_SIZE>,
}

#[derive(Copy, Clone, Debug)]
enum InitError {
    /// Subsystem already running.
    Busy,
    Mode(ModeError),
    #[cfg(feature = "babypc")]
    Link(link::LinkError),
}

/// Peripherals of each stopped subsystem. Each is moved into its
/// interrupt's state on init and handed back on term.
struct Hw {
    clocks: rcc::Clocks,
    keys: Option<(KeyHw, stk::SysTick)>,
    /// The application's own handle on the CPU link, used under [`LINK_LOCK`].
    #[cfg(feature = "babypc")]
    link: uart::Uart,
    /// Tone timer and melody tick timer.
    sound: Option<(Tim, Tim)>,
    display: Option<(Out, &'static mut [LineBuf; 2])>,
}

impl Board for Hw {
    type Error = InitError;

    fn keyboard_init(&mut self) -> Result<(), InitError> {
        let (hw, stk) = self.keys.take().ok_or(InitError::Busy)?;

        #[cfg(not(feature = "babypc"))]
        let lines = hw;

        #[cfg(feature = "babypc")]
        let lines = {
            let mut hw = hw;
            hw.setup_link(&self.clocks);
            let clock = stk::Counter(pac::SYSTICK);
            if let Err(e) = link::sync_init(&mut hw, &clock, self.sync_timeout()) {
                hw.shutdown();
                self.keys = Some((hw, stk));
                return Err(InitError::Link(e));
            }
            link::LinkKeys::new(hw)
        };

        let scan = KeyScan::new(lines, &KEYS, KeyConfig::DEFAULT);
        stk.listen();
        KEYSCAN.put(Scanner { stk, scan }).map_err(|_| InitError::Busy)?;
        enable_irq(SYSTICK_IRQ, PRIO_KEYS);
        Ok(())
    }

    fn keyboard_term(&mut self) {
        disable_irq(SYSTICK_IRQ);
        let Some(Scanner { stk, scan }) = KEYSCAN.take() else {
            return;
        };
        stk.unlisten();
        KEYS.flush();

        #[cfg(not(feature = "babypc"))]
        let hw = scan.release();

        #[cfg(feature = "babypc")]
        let hw = {
            let hw = scan.release().release();
            hw.shutdown();
            hw
        };

        self.keys = Some((hw, stk));
    }

    fn sound_init(&mut self) -> Result<(), InitError> {
        let (tone_tim, tick) = self.sound.take().ok_or(InitError::Busy)?;
        let tone = tone_tim.setup_tone(self.clocks.tim_ck / TONE_TIMER_HZ - 1);
        tick.setup_tick(self.clocks.tim_ck / 10_000 - 1, 10_000 / SOUND_TICK_HZ);
        tick.start();
        let seq = Sequencer { tick, sound: Sound::new(&SOUND, tone) };
        SOUNDER.put(seq).map_err(|_| InitError::Busy)?;
        enable_irq(pac::Interrupt::TIM4 as u8, PRIO_SOUND);
        Ok(())
    }

    fn sound_term(&mut self) {
        disable_irq(pac::Interrupt::TIM4 as u8);
        if let Some(seq) = SOUNDER.take() {
            seq.tick.stop();
            let tone_tim = seq.sound.release().release();
            self.sound = Some((tone_tim, seq.tick));
        }
    }

    fn display_init(&mut self) -> Result<(), InitError> {
        MODE.check(VRAM_SIZE).map_err(InitError::Mode)?;
        #[allow(unused_mut)]
        let (mut out, lbufs) = self.display.take().ok_or(InitError::Busy)?;

        #[cfg(not(feature = "lcd"))]
        out.setup(MODE);
        #[cfg(feature = "lcd")]
        out.start();

        let mut video = Scanline::new(out, MODE, &VRAM, &VSTATE, &FONT_8X8, lbufs)
            .map_err(InitError::Mode)?;
        video.start();

        // The first line interrupt stays pending until the handler is enabled.
        #[cfg(not(feature = "lcd"))]
        let irq = {
            video.out_mut().start();
            pac::Interrupt::TIM2
        };

        // Panel lines are paced by their own transfers, so the first
        // line is sent by hand.
        #[cfg(feature = "lcd")]
        let irq = {
            video.line_isr();
            pac::Interrupt::DMA1_CHANNEL3
        };

        VIDEO.put(video).map_err(|_| InitError::Busy)?;
        enable_irq(irq as u8, PRIO_VIDEO);
        Ok(())
    }

    fn display_term(&mut self) {
        #[cfg(not(feature = "lcd"))]
        disable_irq(pac::Interrupt::TIM2 as u8);
        #[cfg(feature = "lcd")]
        disable_irq(pac::Interrupt::DMA1_CHANNEL3 as u8);

        if let Some(video) = VIDEO.take() {
            #[allow(unused_mut)]
            let (mut out, lbufs) = video.release();
            out.stop();
            self.display = Some((out, lbufs));
        }
    }
}

#[cfg(feature = "babypc")]
impl Hw {
    fn sync_timeout(&self) -> u32 {
        self.clocks.hclk / 1000 * SYNC_TIMEOUT_MS
    }

    /// Repeat the link handshake, for when the second CPU was reset.
    ///
    /// The key scan interrupt keeps running but leaves the link alone until
    /// the handshake is over, so it cannot swallow the echoes.
    fn relink(&mut self) -> Result<(), link::LinkError> {
        let scanning = !KEYSCAN.is_empty();
        if scanning {
            LINK_LOCK.lock();
        }
        let clock = stk::Counter(pac::SYSTICK);
        let res = link::sync_init(&mut self.link, &clock, self.sync_timeout());
        if scanning {
            LINK_LOCK.unlock();
        }
        res
    }
}

fn enable_irq(irq: u8, priority: u8) {
    // NOTE(unsafe): Every handler reaches its state only through a Handoff
    // NOTE(unsafe): or atomics.
    unsafe {
        qingke::pfic::set_priority(irq, priority);
        qingke::pfic::enable_interrupt(irq);
    }
}

fn disable_irq(irq: u8) {
    // NOTE(unsafe): Masking an interrupt cannot break any invariant.
    unsafe { qingke::pfic::disable_interrupt(irq) }
}

/// Sink for typed characters on whichever canvas the mode provides.
trait Terminal {
    fn put_char(&mut self, c: char);

    fn print(&mut self, s: &str) {
        for c in s.chars() {
            self.put_char(c);
        }
    }
}

impl<const N: usize> Terminal for video::TextConsole<'_, N> {
    fn put_char(&mut self, c: char) {
        video::TextConsole::put_char(self, c);
    }
}

/// Text drawn with a 6x10 font on a pixel canvas. Clears the screen and
/// starts again at the top when the cursor runs off the bottom.
struct Gfx<D: DrawTarget> {
    canvas: D,
    ink: D::Color,
    paper: D::Color,
    cursor: Point,
}

impl<D: DrawTarget> Gfx<D> {
    fn new(canvas: D, ink: D::Color, paper: D::Color) -> Self {
        Gfx { canvas, ink, paper, cursor: Point::zero() }
    }

    fn newline(&mut self) {
        let cell = FONT_6X10.character_size;
        self.cursor = Point::new(0, self.cursor.y + cell.height as i32);
        if self.cursor.y + cell.height as i32 > self.canvas.bounding_box().size.height as i32 {
            self.cursor = Point::zero();
            let _ = self.canvas.clear(self.paper);
        }
    }
}

impl<D: DrawTarget> Terminal for Gfx<D> {
    fn put_char(&mut self, c: char) {
        let cell = FONT_6X10.character_size;
        if c == '\n' {
            self.newline();
            return;
        }
        if self.cursor.x + cell.width as i32 > self.canvas.bounding_box().size.width as i32 {
            self.newline();
        }
        let mut buf = [0u8; 4];
        let style = MonoTextStyle::new(&FONT_6X10, self.ink);
        let text = Text::with_baseline(c.encode_utf8(&mut buf), self.cursor, style, Baseline::Top);
        let _ = text.draw(&mut self.canvas);
        self.cursor.x += cell.width as i32;
    }
}

#[cfg(feature = "lcd")]
fn open_terminal() -> Result<impl Terminal, ModeError> {
    use video::{splash, Index, PaletteCanvas};
    let mut canvas = PaletteCanvas::new(MODE, &VRAM)?;
    canvas.load_default_palette();
    let _ = canvas.clear(Index(0));
    // Palette indices are RRRGGGBB.
    let _ = splash(&mut canvas, |c| Index((c.r() & 0xE0) | ((c.g() >> 3) & 0x1C) | (c.b() >> 6)));
    Ok(Gfx::new(canvas, Index(0xFF), Index(0)))
}

#[cfg(all(feature = "attr", not(feature = "lcd")))]
fn open_terminal() -> Result<impl Terminal, ModeError> {
    use video::{splash, AttrCanvas, Rgb3};
    let mut canvas = AttrCanvas::new(MODE, &VRAM)?;
    let _ = canvas.clear(Rgb3::BLACK);
    let _ = splash(&mut canvas, Rgb3::from);
    Ok(Gfx::new(canvas, Rgb3::WHITE, Rgb3::BLACK))
}

#[cfg(all(feature = "mono", not(any(feature = "lcd", feature = "attr"))))]
fn open_terminal() -> Result<impl Terminal, ModeError> {
    use embedded_graphics::pixelcolor::BinaryColor;
    use video::{splash, MonoCanvas};
    let mut canvas = MonoCanvas::new(MODE, &VRAM)?;
    let _ = canvas.clear(BinaryColor::Off);
    let _ = splash(&mut canvas, |c| {
        BinaryColor::from(c.r() as u16 + c.g() as u16 + c.b() as u16 > 384)
    });
    Ok(Gfx::new(canvas, BinaryColor::On, BinaryColor::Off))
}

#[cfg(not(any(feature = "lcd", feature = "attr", feature = "mono")))]
fn open_terminal() -> Result<impl Terminal, ModeError> {
    let mut console = video::TextConsole::new(MODE, &VRAM)?;
    console.clear();
    Ok(console)
}

/// Light the LED and stop.
fn halt(led: &OutputPin) -> ! {
    led.set_high();
    loop {
        riscv::asm::wfi();
    }
}

#[qingke_rt::entry]
fn main() -> ! {
    rtt_init_print!();
    rprintln!("BabySDK initialising...");

    rprint!("  RCC...      ");
    let clocks = rcc::setup();
    rprintln!("OK");

    rprint!("  GPIO...     ");
    let pins = gpio::setup();
    #[cfg(not(feature = "lcd"))]
    let rgb_odr = pins.rgb_odr();
    rprintln!("OK");

    rprint!("  SysTick...  ");
    let mut systick = stk::SysTick::new(pac::SYSTICK);
    systick.setup(clocks.hclk / KEY_TICK_HZ);
    rprintln!("OK");

    rprint!("  TIM...      ");
    // TIM1 paces pixel DMA to the RGB port in attribute modes.
    // TIM2 generates HSYNC on CH2 and the line interrupt on CC3.
    // TIM3 generates the tone on CH1, counting at 1MHz.
    // TIM4 generates the melody step ticks, prescaled to 10kHz.
    // NOTE(unsafe): TIM1 starts with the general purpose timer registers,
    // NOTE(unsafe): which are all this driver touches.
    #[cfg(not(feature = "lcd"))]
    let (tim1, tim2) = (
        Tim::new(unsafe { pac::timer::Gptm::from_ptr(pac::TIM1.as_ptr()) }),
        Tim::new(pac::TIM2),
    );
    let (tim3, tim4) = (Tim::new(pac::TIM3), Tim::new(pac::TIM4));
    rprintln!("OK");

    rprint!("  SPI...      ");
    let spi1 = spi::Spi::new(pac::SPI1);
    rprintln!("OK");

    rprint!("  DMA...      ");
    // SPI1_TX is fixed to DMA1 channel 3.
    // TIM1_UP is fixed to DMA1 channel 5.
    let dma1 = dma::Dma::new(pac::DMA1);
    rprintln!("OK");

    rprint!("  Display...  ");
    #[cfg(not(feature = "lcd"))]
    let out = vga::Vga::new(tim2, spi1, dma1.c3, tim1, dma1.c5, rgb_odr, pins.vsync);
    #[cfg(feature = "lcd")]
    let out = lcd::Lcd::new(
        spi1,
        pins.lcd_dc,
        pins.lcd_cs,
        pins.lcd_rst,
        pins.lcd_led,
        dma1.c3,
        clocks,
    );
    // NOTE(unsafe): Only reference to LBUFS, taken once here.
    let lbufs = unsafe { &mut *core::ptr::addr_of_mut!(LBUFS) };
    rprintln!("OK");

    rprint!("  Keys...     ");
    #[cfg(not(feature = "babypc"))]
    let keys = keys::KeyMatrix::new(pins.keys);
    #[cfg(feature = "babypc")]
    let keys = uart::Uart::new(pac::USART2);
    rprintln!("OK");

    let led = pins.led;
    let mut hw = Hw {
        clocks,
        keys: Some((keys, systick)),
        #[cfg(feature = "babypc")]
        link: keys,
        sound: Some((tim3, tim4)),
        display: Some((out, lbufs)),
    };

    rprint!("  Devices...  ");
    match device::init(&mut hw) {
        Ok(()) => rprintln!("OK"),
        #[cfg(feature = "babypc")]
        Err(device::DeviceError::Keyboard(InitError::Link(_))) => {
            rprintln!("CPU2 SYNC ERROR!");
            // Without keys there is nothing to run, but the screen can
            // still say why.
            if hw.display_init().is_ok() {
                if let Ok(mut term) = open_terminal() {
                    term.print("\nCPU2 SYNC ERROR!");
                }
            }
            halt(&led);
        }
        Err(e) => rprintln!("ERR {:?}", e),
    }

    rprintln!("Init complete, running.");
    SOUND.play_melody(&sound::STARTUP);

    let mut term = match open_terminal() {
        Ok(term) => term,
        Err(e) => {
            rprintln!("No terminal: {:?}", e);
            halt(&led);
        }
    };
    term.print("\nBabySDK ready.\n");

    loop {
        match KEYS.get_char() {
            // Ctrl+Enter redoes the handshake after the second CPU restarts.
            #[cfg(feature = "babypc")]
            Some('\n') if KEYS.pressed(Key::Ctrl) => match hw.relink() {
                Ok(()) => term.print("\nLink OK\n"),
                Err(_) => term.print("\nCPU2 SYNC ERROR!\n"),
            },
            Some(c) => {
                term.put_char(c);
                SOUND.play_melody(&sound::BEEP);
            }
            None => riscv::asm::wfi(),
        }
    }
}

#[cfg(not(feature = "lcd"))]
#[qingke_rt::interrupt]
fn TIM2() {
    VIDEO.with(|video| {
        video.out_mut().ack();
        video.line_isr();
    });
}

#[cfg(feature = "lcd")]
#[qingke_rt::interrupt]
fn DMA1_CHANNEL3() {
    VIDEO.with(|video| {
        video.out_mut().dma_isr();
        video.line_isr();
        // The vsync line sends no pixels, so no transfer will
        // complete to move on from it.
        if video.phase() == video::Phase::Blank {
            video.line_isr();
        }
    });
}

#[qingke_rt::interrupt]
fn TIM4() {
    SOUNDER.with(|seq| {
        seq.tick.clear_uif();
        seq.sound.scan();
    });
}

#[qingke_rt::interrupt(core)]
fn SysTick() {
    KEYSCAN.with(|Scanner { stk, scan }| {
        stk.tick();
        #[cfg(feature = "babypc")]
        if !LINK_LOCK.isr_enter() {
            return;
        }
        scan.scan();
    });
}
