use babysdk::hal::TonePwm;
use babysdk::video::timing::{Polarity, Timing};
use ch32_metapac::timer::{vals::Ocm, Gptm};

/// Generic timer driver.
///
/// Only uses the registers the general purpose and advanced timers share,
/// so TIM1 is driven through a [`Gptm`] view of its register block.
pub struct Tim {
    tim: Gptm,
}

impl Tim {
    pub fn new(tim: Gptm) -> Self {
        Tim { tim }
    }

    /// Start the timer running by setting the CEN bit.
    pub fn start(&self) {
        self.tim.ctlr1().modify(|w| w.set_cen(true));
    }

    /// Stop the timer running by clearing the CEN bit.
    pub fn stop(&self) {
        self.tim.ctlr1().modify(|w| w.set_cen(false));
        self.tim.cnt().write_value(0);
    }

    fn running(&self) -> bool {
        self.tim.ctlr1().read().cen()
    }

    /// Clear update flag.
    pub fn clear_uif(&self) {
        self.tim.intfr().modify(|w| w.set_uif(false));
    }

    /// Clear CC3 flag.
    pub fn clear_cc3if(&self) {
        self.tim.intfr().modify(|w| w.set_ccif(2, false));
    }

    /// Load the preloaded registers and clear the flags this raises.
    fn update(&self) {
        self.tim.swevgr().write(|w| w.set_ug(true));
        self.tim.intfr().write_value(Default::default());
    }

    /// Configure timer for scanline generation.
    ///
    /// One timer period is one line. CH2 outputs the horizontal sync pulse
    /// at the start of each line and CC3 raises the line interrupt at
    /// `timing.active_start()`. The timer is left stopped.
    pub fn setup_line(&self, timing: &Timing) {
        // Ensure timer is disabled and use defaults for CTLR2.
        self.tim.ctlr1().write(|w| w.set_arpe(true));
        self.tim.ctlr2().write_value(Default::default());

        // Enable interrupt on CC3 match.
        self.tim.dmaintenr().write(|w| w.set_ccie(2, true));

        // In PWM mode 1, CH2 is active while CNT<CH2CVR, so the sync pulse
        // starts with the line. CH3 stays frozen, only its flag is used.
        self.tim.chctlr_output(0).write(|w| {
            w.set_ocm(1, Ocm::PWMMODE1);
            w.set_ocpe(1, true);
        });
        self.tim.chctlr_output(1).write(|w| w.set_ocm(0, Ocm::FROZEN));

        // Enable CC2 output, active low for negative sync.
        self.tim.ccer().write(|w| {
            w.set_cce(1, true);
            w.set_ccp(1, timing.hsync_polarity == Polarity::Negative);
        });

        // Don't prescale, one count per system clock cycle.
        self.tim.psc().write_value(0);
        self.tim.atrlr().write_value((timing.line_cycles - 1) as u16);
        self.tim.chcvr(1).write_value(timing.hsync_cycles as u16);
        self.tim.chcvr(2).write_value(timing.active_start() as u16);
        self.update();
    }

    /// Configure timer as the pixel clock for port output.
    ///
    /// Generates a DMA request every `pixel_cycles` system clock cycles.
    /// The timer is left stopped.
    pub fn setup_pixel_dma(&self, pixel_cycles: u32) {
        self.tim.ctlr1().write_value(Default::default());
        self.tim.ctlr2().write_value(Default::default());

        // Enable DMA requests on update.
        self.tim.dmaintenr().write(|w| w.set_ude(true));

        self.tim.psc().write_value(0);
        self.tim.atrlr().write_value((pixel_cycles - 1) as u16);
        self.update();
    }

    /// Configure timer for periodic ticks.
    ///
    /// Enables interrupt generation.
    pub fn setup_tick(&self, psc: u32, period: u32) {
        self.tim.ctlr1().write_value(Default::default());
        self.tim.ctlr2().write_value(Default::default());

        // Enable interrupt on update.
        self.tim.dmaintenr().write(|w| w.set_uie(true));

        self.tim.psc().write_value(psc as u16);
        self.tim.atrlr().write_value((period - 1) as u16);
        self.update();
    }

    /// Configure timer for tone generation on CH1.
    ///
    /// Prescales the timer clock by `psc`; the output stays off until
    /// [`Tone::set_divider()`](TonePwm::set_divider) is called.
    pub fn setup_tone(self, psc: u32) -> Tone {
        // Ensure timer is disabled, with reload preloaded so a new pitch
        // starts on a period boundary.
        self.tim.ctlr1().write(|w| w.set_arpe(true));
        self.tim.ctlr2().write_value(Default::default());
        self.tim.dmaintenr().write_value(Default::default());

        // PWM mode 1 with preload on CH1, output not yet enabled.
        self.tim.chctlr_output(0).write(|w| {
            w.set_ocm(0, Ocm::PWMMODE1);
            w.set_ocpe(0, true);
        });
        self.tim.ccer().write_value(Default::default());

        self.tim.psc().write_value(psc as u16);
        self.tim.swevgr().write(|w| w.set_ug(true));
        Tone { tim: self }
    }
}

/// Square wave output on a timer CH1.
pub struct Tone {
    tim: Tim,
}

impl Tone {
    /// Silence the output and return the timer.
    pub fn release(mut self) -> Tim {
        self.off();
        self.tim
    }
}

impl TonePwm for Tone {
    fn set_divider(&mut self, div: u16) {
        let div = div.max(2);
        let regs = self.tim.tim;
        regs.atrlr().write_value(div - 1);
        regs.chcvr(0).write_value(div / 2);
        regs.ccer().modify(|w| w.set_cce(0, true));
        if !self.tim.running() {
            // Load the new period straight away when starting from silence.
            regs.swevgr().write(|w| w.set_ug(true));
            self.tim.start();
        }
    }

    fn off(&mut self) {
        self.tim.tim.ccer().modify(|w| w.set_cce(0, false));
        self.tim.stop();
    }
}
