use babysdk::hal::CycleCounter;
use ch32_metapac::systick::{vals::Stclk, Systick};

/// Core SysTick timer, free-running at HCLK.
///
/// The 64-bit counter is never reloaded, so its low word doubles as the
/// cycle counter. Periodic interrupts come from moving the compare value
/// forward by one period on every tick.
pub struct SysTick {
    stk: Systick,
    period: u64,
}

impl SysTick {
    pub fn new(stk: Systick) -> Self {
        SysTick { stk, period: 0 }
    }

    /// Start counting with a tick every `period` cycles. Interrupts stay
    /// off until [`SysTick::listen()`].
    pub fn setup(&mut self, period: u32) {
        self.period = period as u64;
        self.stk.ctlr().write_value(Default::default());
        self.stk.cnt().write_value(0);
        self.stk.cmp().write_value(self.period);
        self.stk.sr().write(|w| w.set_cntif(false));
        self.stk.ctlr().write(|w| {
            w.set_stclk(Stclk::HCLK);
            w.set_ste(true);
        });
    }

    /// Enable the tick interrupt.
    pub fn listen(&self) {
        self.stk.ctlr().modify(|w| w.set_stie(true));
    }

    /// Disable the tick interrupt. The counter keeps running.
    pub fn unlisten(&self) {
        self.stk.ctlr().modify(|w| w.set_stie(false));
    }

    /// Acknowledge a tick and schedule the next one.
    pub fn tick(&self) {
        self.stk.sr().write(|w| w.set_cntif(false));
        let cmp = self.stk.cmp().read();
        self.stk.cmp().write_value(cmp.wrapping_add(self.period));
    }
}

/// Reads the low word of a running SysTick counter. Never writes, so any
/// number of these may exist alongside the [`SysTick`] driver.
pub struct Counter(pub Systick);

impl CycleCounter for Counter {
    fn cycles(&self) -> u32 {
        self.0.cnt().read() as u32
    }
}
