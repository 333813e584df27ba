use babysdk::hal::ScanOut;
use qingke::riscv;
use crate::{spi::Spi, gpio::OutputPin, dma::DmaChannel, rcc::Clocks};

/// Panel size in landscape orientation.
const WIDTH: u16 = 160;
const HEIGHT: u16 = 128;

/// Driver for ST7735 LCD controller attached via 4-wire SPI.
///
/// Lines arrive one at a time from the scanline dispatcher as RGB565
/// big-endian and are sent by DMA. The controller's write pointer wraps
/// inside the window, which is re-opened on every vertical sync so a
/// dropped line never shifts the picture.
pub struct Lcd {
    spi: Spi,
    dcx: OutputPin,
    cs: OutputPin,
    rst: OutputPin,
    led: OutputPin,
    dma: DmaChannel,
    clocks: Clocks,
}

impl Lcd {
    pub fn new(
        spi: Spi,
        dcx: OutputPin,
        cs: OutputPin,
        rst: OutputPin,
        led: OutputPin,
        dma: DmaChannel,
        clocks: Clocks,
    ) -> Self {
        Self { spi, dcx, cs, rst, led, dma, clocks }
    }

    /// Reset and configure the LCD, leaving it ready for pixel data at
    /// the top left corner.
    pub fn start(&self) {
        self.spi.setup_lcd(&self.clocks);
        self.dma.setup_tx(self.spi.txdr());
        self.cs.set_low();
        self.setup();
        self.open_window();
        self.led.set_high();
    }

    /// Stop any transfer and turn the panel off.
    pub fn stop(&self) {
        self.dma.stop();
        self.spi.wait_idle();
        self.led.set_low();
        self.command(Command::DisplayOff, &[]);
        self.cs.set_high();
    }

    /// Call to handle the DMA transfer completion ISR.
    ///
    /// Returns once the line has fully left the SPI shift register, so
    /// the next line or command can follow straight away.
    pub fn dma_isr(&mut self) {
        self.dma.clear_tcif();
        self.spi.wait_idle();
    }

    /// Pulse the reset line and run the controller init sequence.
    fn setup(&self) {
        self.rst.set_low();
        self.delay_ms(10);
        self.rst.set_high();
        self.delay_ms(10);
        for &(command, data, wait_ms) in INIT.iter() {
            self.command(command, data);
            self.delay_ms(wait_ms);
        }
    }

    /// Set the full screen window and start a memory write at its origin.
    fn open_window(&self) {
        let [w0, w1] = (WIDTH - 1).to_be_bytes();
        let [h0, h1] = (HEIGHT - 1).to_be_bytes();
        self.command(Command::CaSet, &[0, 0, w0, w1]);
        self.command(Command::RaSet, &[0, 0, h0, h1]);
        self.command(Command::WriteRam, &[]);
    }

    /// Issue LCD command, with optional data. Leaves DCX high for data.
    fn command(&self, command: Command, data: &[u8]) {
        self.dcx.set_low();
        self.spi.write(&[command as u8]);
        self.dcx.set_high();
        if !data.is_empty() {
            self.spi.write(data);
        }
    }

    fn delay_ms(&self, ms: u32) {
        riscv::asm::delay(self.clocks.sys_ck / 1000 * ms);
    }
}

impl ScanOut for Lcd {
    fn send_line(&mut self, line: &[u8]) {
        self.dma.start_tx(line);
    }

    fn set_vsync(&mut self, active: bool) {
        if active {
            self.open_window();
        }
    }
}

/// Controller init sequence: command, parameters, then a delay in ms.
static INIT: [(Command, &[u8], u32); 12] = [
    (Command::SwReset, &[], 120),
    (Command::SleepOut, &[], 120),
    // ~60Hz frame rate and column inversion.
    (Command::FrameRateCtrl1, &[0x01, 0x2c, 0x2d], 0),
    (Command::FrameInversionCtrl, &[0x07], 0),
    // AVDD 5V, VGH/VGL from the charge pump, VCOM -0.775V.
    (Command::PwrCtrl1, &[0xa2, 0x02, 0x84], 0),
    (Command::PwrCtrl2, &[0xc5], 0),
    (Command::VcomCtrl, &[0x0e], 0),
    (Command::InversionOff, &[], 0),
    // 16 bits per pixel, matching the RGB565 big-endian lines.
    (Command::ColorMode, &[0b101], 0),
    // MX and MV for landscape, RGB order.
    (Command::MadCtl, &[0b0110_0000], 0),
    (Command::NormalMode, &[], 10),
    (Command::DisplayOn, &[], 10),
];

/// ST7735 commands used by this driver.
#[repr(u8)]
#[derive(Copy, Clone)]
enum Command {
    SwReset = 0x01,
    SleepOut = 0x11,
    NormalMode = 0x13,
    InversionOff = 0x20,
    DisplayOff = 0x28,
    DisplayOn = 0x29,
    CaSet = 0x2A,
    RaSet = 0x2B,
    WriteRam = 0x2C,
    MadCtl = 0x36,
    ColorMode = 0x3A,
    FrameRateCtrl1 = 0xB1,
    FrameInversionCtrl = 0xB4,
    PwrCtrl1 = 0xC0,
    PwrCtrl2 = 0xC1,
    VcomCtrl = 0xC5,
}
