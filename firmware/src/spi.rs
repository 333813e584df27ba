use ch32_metapac::spi::Spi as Regs;
use crate::rcc::Clocks;

/// Highest SCK an ST7735 accepts.
const LCD_MAX_HZ: u32 = 15_000_000;

/// SPI driver, transmit only.
pub struct Spi {
    spi: Regs,
}

/// BR field for the smallest power of two divider of at least `div`.
fn baud_div(div: u32) -> u8 {
    let div = div.clamp(2, 256).next_power_of_two();
    (div.trailing_zeros() - 1) as u8
}

impl Spi {
    pub fn new(spi: Regs) -> Self {
        Self { spi }
    }

    /// Configure as the pixel shifter for VGA video.
    ///
    /// One bit per pixel at `sys_ck / pixel_cycles`, MSB first, fed by DMA.
    pub fn setup_video(&self, pixel_cycles: u32) {
        self.setup(baud_div(pixel_cycles));
    }

    /// Configure for an ST7735 LCD at the fastest clock it accepts.
    pub fn setup_lcd(&self, clocks: &Clocks) {
        self.setup(baud_div(clocks.pclk2.div_ceil(LCD_MAX_HZ)));
    }

    fn setup(&self, br: u8) {
        // Ensure SPI is disabled and all CTLR1 settings at default.
        self.spi.ctlr1().write_value(Default::default());

        // Enable DMA requests on TX empty.
        self.spi.ctlr2().write(|w| w.set_txdmaen(true));

        // Single line transmit only, software NSS held high, master,
        // CPOL=0 CPHA=0, 8 bits MSB first.
        self.spi.ctlr1().write(|w| {
            w.set_bidimode(true);
            w.set_bidioe(true);
            w.set_ssm(true);
            w.set_ssi(true);
            w.set_mstr(true);
            w.set_br(br);
        });

        self.spi.ctlr1().modify(|w| w.set_spe(true));
    }

    /// Transmit one slice of bytes out SPI, blocking until transmission completes.
    ///
    /// The slice is transmitted byte-by-byte without DMA and so there are no restrictions
    /// on the data storage location.
    pub fn write(&self, data: &[u8]) {
        for &byte in data.iter() {
            while !self.spi.statr().read().txe() {}
            self.spi.datar().write(|w| w.set_datar(byte as u16));
        }
        self.wait_idle();
    }

    /// Wait until the last byte has left the shift register.
    pub fn wait_idle(&self) {
        while !self.spi.statr().read().txe() {}
        while self.spi.statr().read().bsy() {}
    }

    /// Get the address of this SPI's data register.
    pub fn txdr(&self) -> u32 {
        self.spi.datar().as_ptr() as u32
    }
}
