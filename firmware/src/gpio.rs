use ch32_metapac as pac;
use pac::gpio::Gpio;

/// Key matrix interface.
///
/// Rows are open-drain outputs driven low one at a time, columns are
/// pulled-up inputs which read low where a key in the driven row is down.
pub struct KeyPins {
    rows: Gpio,
    first_row: usize,
    cols: Gpio,
    first_col: usize,
}

impl KeyPins {
    pub const ROWS: usize = 8;
    pub const COLS: usize = 5;

    /// Drive row `row` low and release every other row.
    pub fn select_row(&self, row: usize) {
        self.rows.bshr().write(|w| {
            // Set takes priority over reset within one write.
            for r in (0..Self::ROWS).filter(|&r| r != row) {
                w.set_bs(self.first_row + r, true);
            }
            w.set_br(self.first_row + row, true);
        });
    }

    /// Release every row.
    pub fn release_rows(&self) {
        self.rows.bshr().write(|w| {
            for r in 0..Self::ROWS {
                w.set_bs(self.first_row + r, true);
            }
        });
    }

    /// Columns reading low, bit 0 for the first column.
    pub fn read_cols(&self) -> u32 {
        let indr = self.cols.indr().read();
        (0..Self::COLS)
            .filter(|&c| !indr.idr(self.first_col + c))
            .fold(0, |acc, c| acc | (1 << c))
    }
}

/// Pins container.
///
/// Contains the results of setting up the GPIOs,
/// including access to the key matrix and the video output ports.
#[allow(clippy::manual_non_exhaustive)]
pub struct Pins {
    pub keys: KeyPins,
    pub led: OutputPin,
    pub vsync: OutputPin,
    pub lcd_dc: OutputPin,
    pub lcd_cs: OutputPin,
    pub lcd_rst: OutputPin,
    pub lcd_led: OutputPin,
    rgb: Gpio,
    _private: (),
}

impl Pins {
    /// Get the address of the data register to DMA colour pixels into.
    pub fn rgb_odr(&self) -> u32 {
        self.rgb.outdr().as_ptr() as u32
    }
}

/// Pin function, as the CNF and MODE fields of the port configuration registers.
#[derive(Copy, Clone)]
enum Cfg {
    InFloating,
    InPull,
    Out2MHz,
    Out50MHz,
    OutOpenDrain2MHz,
    Alt50MHz,
}

impl Cfg {
    /// CNF and MODE field values.
    fn fields(self) -> (u8, u8) {
        match self {
            Cfg::InFloating => (0b01, 0b00),
            Cfg::InPull => (0b10, 0b00),
            Cfg::Out2MHz => (0b00, 0b10),
            Cfg::Out50MHz => (0b00, 0b11),
            Cfg::OutOpenDrain2MHz => (0b01, 0b10),
            Cfg::Alt50MHz => (0b10, 0b11),
        }
    }
}

fn configure(port: Gpio, pins: &[(usize, Cfg)]) {
    for &(pin, cfg) in pins {
        let (cnf, mode) = cfg.fields();
        if pin < 8 {
            port.cfglr().modify(|w| {
                w.set_cnf(pin, cnf);
                w.set_mode(pin, mode);
            });
        } else {
            port.cfghr().modify(|w| {
                w.set_cnf(pin - 8, cnf);
                w.set_mode(pin - 8, mode);
            });
        }
    }
}

// GPIOA
// PA0: Output, LED
// PA1: AF, TIM2_CH2, HSYNC
// PA2: AF, USART2_TX, CPU link TX
// PA3: Input, USART2_RX, CPU link RX
// PA4: Output, VSYNC
// PA5: AF, SPI1_SCK, LCD_SCL
// PA6: AF, TIM3_CH1, SOUND
// PA7: AF, SPI1_MOSI, VIDEO / LCD_SDA
// PA8-12: Input pulled up, KEY_COL0-4
// PA13-14: SWDIO, SWCLK
// PA15: Unused
#[rustfmt::skip]
const PORTA: [(usize, Cfg); 13] = [
    (0, Cfg::Out2MHz),  (1, Cfg::Alt50MHz), (2, Cfg::Alt50MHz), (3, Cfg::InFloating),
    (4, Cfg::Out50MHz), (5, Cfg::Alt50MHz), (6, Cfg::Alt50MHz), (7, Cfg::Alt50MHz),
    (8, Cfg::InPull),   (9, Cfg::InPull),   (10, Cfg::InPull),  (11, Cfg::InPull),
    (12, Cfg::InPull),
];

// GPIOB
// PB0-2: Unused
// PB3: Output, LCD_DC
// PB4: Output, LCD_CS
// PB5: Output, LCD_RST
// PB6: Output, LCD_LED
// PB7: Unused
// PB8-15: Open drain output, KEY_ROW0-7
#[rustfmt::skip]
const PORTB: [(usize, Cfg); 12] = [
    (3, Cfg::Out50MHz), (4, Cfg::Out50MHz), (5, Cfg::Out50MHz), (6, Cfg::Out2MHz),
    (8, Cfg::OutOpenDrain2MHz),  (9, Cfg::OutOpenDrain2MHz),
    (10, Cfg::OutOpenDrain2MHz), (11, Cfg::OutOpenDrain2MHz),
    (12, Cfg::OutOpenDrain2MHz), (13, Cfg::OutOpenDrain2MHz),
    (14, Cfg::OutOpenDrain2MHz), (15, Cfg::OutOpenDrain2MHz),
];

// GPIOC
// PC0: Output, VIDEO_R
// PC1: Output, VIDEO_G
// PC2: Output, VIDEO_B
// PC3-15: Unused
// The colour DMA writes the whole OUTDR, so nothing else may live on this port.
const PORTC: [(usize, Cfg); 3] = [(0, Cfg::Out50MHz), (1, Cfg::Out50MHz), (2, Cfg::Out50MHz)];

pub fn setup() -> Pins {
    let (gpioa, gpiob, gpioc) = (pac::GPIOA, pac::GPIOB, pac::GPIOC);

    // Set output levels before the pins become outputs.
    // VSYNC idles high for the negative polarity pulse, key columns pull up.
    gpioa.outdr().write(|w| {
        w.set_odr(4, true);
        for col in 8..13 {
            w.set_odr(col, true);
        }
    });
    // Rows start released, LCD_CS and LCD_RST inactive high.
    gpiob.outdr().write(|w| {
        w.set_odr(4, true);
        w.set_odr(5, true);
        for row in 8..16 {
            w.set_odr(row, true);
        }
    });
    gpioc.outdr().write_value(pac::gpio::regs::Outdr(0));

    configure(gpioa, &PORTA);
    configure(gpiob, &PORTB);
    configure(gpioc, &PORTC);

    let keys = KeyPins {
        rows: gpiob,
        first_row: 8,
        cols: gpioa,
        first_col: 8,
    };

    Pins {
        keys,
        led: OutputPin::new(gpioa, 0),
        vsync: OutputPin::new(gpioa, 4),
        lcd_dc: OutputPin::new(gpiob, 3),
        lcd_cs: OutputPin::new(gpiob, 4),
        lcd_rst: OutputPin::new(gpiob, 5),
        lcd_led: OutputPin::new(gpiob, 6),
        rgb: gpioc,
        _private: (),
    }
}

/// Pin for runtime control of outputs.
pub struct OutputPin {
    port: Gpio,
    pin: usize,
}

impl OutputPin {
    fn new(port: Gpio, pin: usize) -> OutputPin {
        OutputPin { port, pin }
    }

    /// Drive the pin high or low.
    pub fn set(&self, high: bool) {
        if high {
            self.port.bshr().write(|w| w.set_bs(self.pin, true));
        } else {
            self.port.bshr().write(|w| w.set_br(self.pin, true));
        }
    }

    /// Set pin high.
    pub fn set_high(&self) {
        self.set(true);
    }

    /// Set pin low.
    pub fn set_low(&self) {
        self.set(false);
    }
}
