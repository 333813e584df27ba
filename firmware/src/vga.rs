//! VGA signal output.
//!
//! Horizontal sync comes from the line timer's PWM channel and needs no
//! attention once running. The line timer's compare interrupt drives the
//! [`Scanline`] dispatcher, which calls back into [`Vga`] to start the pixel
//! transfer for each visible line and to drive the vertical sync pin.
//!
//! Monochrome and text modes shift 1bpp lines out of SPI1 MOSI. Attribute
//! modes write one byte per pixel to the RGB port, paced by a pixel timer.
//!
//! [`Scanline`]: babysdk::video::Scanline

use babysdk::hal::ScanOut;
use babysdk::video::{timing::Polarity, Format, Mode};
use crate::{dma::DmaChannel, gpio::OutputPin, spi::Spi, tim::Tim};

pub struct Vga {
    /// Generates HSYNC and the line interrupt.
    line_tim: Tim,
    spi: Spi,
    /// SPI TX DMA channel.
    spi_dma: DmaChannel,
    /// Paces port output with one DMA request per pixel.
    pixel_tim: Tim,
    /// DMA channel triggered by `pixel_tim` updates.
    port_dma: DmaChannel,
    /// Address of the RGB port output register.
    rgb_odr: u32,
    vsync: OutputPin,
    vsync_polarity: Polarity,
    /// Lines go to the RGB port instead of SPI.
    port: bool,
}

impl Vga {
    pub fn new(
        line_tim: Tim,
        spi: Spi,
        spi_dma: DmaChannel,
        pixel_tim: Tim,
        port_dma: DmaChannel,
        rgb_odr: u32,
        vsync: OutputPin,
    ) -> Self {
        Vga {
            line_tim,
            spi,
            spi_dma,
            pixel_tim,
            port_dma,
            rgb_odr,
            vsync,
            vsync_polarity: Polarity::Negative,
            port: false,
        }
    }

    /// Configure timers, SPI and DMA for `mode`. Output stays stopped.
    pub fn setup(&mut self, mode: &Mode) {
        self.stop();
        self.line_tim.setup_line(mode.timing);
        self.vsync_polarity = mode.timing.vsync_polarity;
        self.port = mode.format == Format::Attr;
        if self.port {
            self.pixel_tim.setup_pixel_dma(mode.pixel_cycles as u32);
            self.port_dma.setup_tx_word(self.rgb_odr);
        } else {
            self.spi.setup_video(mode.pixel_cycles as u32);
            self.spi_dma.setup_tx(self.spi.txdr());
        }
        self.set_vsync(false);
    }

    /// Start HSYNC and the line interrupt.
    pub fn start(&self) {
        self.line_tim.start();
    }

    /// Stop all output, leaving sync inactive.
    pub fn stop(&mut self) {
        self.line_tim.stop();
        self.pixel_tim.stop();
        self.spi_dma.stop();
        self.port_dma.stop();
        self.set_vsync(false);
    }

    /// Acknowledge the line interrupt.
    pub fn ack(&self) {
        self.line_tim.clear_cc3if();
    }
}

impl ScanOut for Vga {
    fn send_line(&mut self, line: &[u8]) {
        if self.port {
            // Restart the pixel clock so the first pixel is a fixed
            // time after the line interrupt.
            self.pixel_tim.stop();
            self.port_dma.start_tx(line);
            self.pixel_tim.start();
        } else {
            self.spi_dma.start_tx(line);
        }
    }

    fn set_vsync(&mut self, active: bool) {
        let high = match self.vsync_polarity {
            Polarity::Positive => active,
            Polarity::Negative => !active,
        };
        self.vsync.set(high);
    }
}
