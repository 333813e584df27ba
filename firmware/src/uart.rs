use babysdk::hal::SerialLink;
use ch32_metapac::usart::Usart;
use crate::rcc::Clocks;

/// Baud rate of the link to the second CPU.
pub const LINK_BAUD: u32 = 115_200;

/// UART driver.
///
/// Copies share the one peripheral; whoever uses one must hold the link,
/// which [`babysdk::link::LinkLock`] arbitrates between the application and
/// the key scan interrupt.
#[derive(Copy, Clone)]
pub struct Uart {
    uart: Usart,
}

impl Uart {
    pub fn new(uart: Usart) -> Self {
        Self { uart }
    }

    /// Configure for the CPU link: 8N1 with no flow control, polled.
    pub fn setup_link(&self, clocks: &Clocks) {
        // Disable while configuring, 8 data bits, no parity, no interrupts.
        self.uart.ctlr1().write_value(Default::default());

        // Use all default settings for CTLR2 and CTLR3: one stop bit, no flow control.
        self.uart.ctlr2().write_value(Default::default());
        self.uart.ctlr3().write_value(Default::default());

        // Divider in sixteenths of a bit.
        let div = clocks.pclk1 / LINK_BAUD;
        self.uart.brr().write(|w| {
            w.set_div_mantissa((div >> 4) as u16);
            w.set_div_fraction((div & 0xF) as u8);
        });

        self.uart.ctlr1().write(|w| {
            w.set_ue(true);
            w.set_te(true);
            w.set_re(true);
        });
    }

    /// Read state of RXNE flag.
    ///
    /// This flag indicates new data is present in DATAR.
    pub fn rxne(&self) -> bool {
        self.uart.statr().read().rxne()
    }

    /// Read state of TXE flag.
    ///
    /// This flag indicates the data written to DATAR has been transferred to
    /// the transmission shift register, so new data may be written to DATAR
    /// but the original data has not necessarily finished transmitting.
    pub fn txe(&self) -> bool {
        self.uart.statr().read().txe()
    }

    /// Disable the USART.
    pub fn shutdown(&self) {
        self.uart.ctlr1().write_value(Default::default());
    }
}

impl SerialLink for Uart {
    fn write(&mut self, byte: u8) {
        while !self.txe() {}
        self.uart.datar().write(|w| w.set_dr(byte as u16));
    }

    /// Reading DATAR after STATR also clears any overrun, which is
    /// otherwise ignored: the next scan frame replaces the lost one.
    fn read(&mut self) -> Option<u8> {
        if self.rxne() {
            Some(self.uart.datar().read().dr() as u8)
        } else {
            None
        }
    }
}
