use ch32_metapac as pac;
use pac::rcc::vals::{Hpre, Pllmul, Pllsrc, Ppre, Sw};

/// Frequencies for each clock in the system, in Hz.
#[derive(Copy, Clone, Debug)]
pub struct Clocks {
    pub sys_ck: u32,
    pub hclk: u32,
    pub pclk1: u32,
    pub pclk2: u32,
    pub tim_ck: u32,
}

/// Two flash wait states for 48MHz < HCLK <= 72MHz.
const FLASH_LATENCY_72MHZ: u8 = 2;

/// Configure device clocks.
///
/// Runs from the internal 8MHz HSI through the PLL at 64MHz, which the
/// VGA modes' timing table is measured against. No crystal is needed, at
/// the cost of a little line jitter.
pub fn setup() -> Clocks {
    let rcc = pac::RCC;

    // Ensure HSI is enabled, stable, and in use, with the PLL off.
    // This is the reset state, we just enforce it in case of a soft reset.
    rcc.ctlr().modify(|w| w.set_hsion(true));
    while !rcc.ctlr().read().hsirdy() {}
    rcc.cfgr0().modify(|w| w.set_sw(Sw::HSI));
    while rcc.cfgr0().read().sws() != Sw::HSI {}
    rcc.ctlr().modify(|w| w.set_pllon(false));
    while rcc.ctlr().read().pllrdy() {}

    // Disable and clear all clock interrupts.
    rcc.intr().write(|w| {
        w.set_lsirdyc(true);
        w.set_lserdyc(true);
        w.set_hsirdyc(true);
        w.set_hserdyc(true);
        w.set_pllrdyc(true);
        w.set_cssc(true);
    });

    pac::FLASH.actlr().modify(|w| w.set_latency(FLASH_LATENCY_72MHZ));

    // HSI/2 = 4MHz into the PLL, x16 for 64MHz, and every bus undivided.
    rcc.cfgr0().write(|w| {
        w.set_pllsrc(Pllsrc::HSI_DIV2);
        w.set_pllmul(Pllmul::MUL16);
        w.set_hpre(Hpre::DIV1);
        w.set_ppre1(Ppre::DIV1);
        w.set_ppre2(Ppre::DIV1);
    });
    rcc.ctlr().modify(|w| w.set_pllon(true));
    while !rcc.ctlr().read().pllrdy() {}

    // Swap system clock source to PLL.
    rcc.cfgr0().modify(|w| w.set_sw(Sw::PLL));
    while rcc.cfgr0().read().sws() != Sw::PLL {}

    rcc.ahbpcenr().write(|w| {
        w.set_dma1en(true);
        w.set_sramen(true);
    });
    rcc.apb2pcenr().write(|w| {
        w.set_afioen(true);
        w.set_iopaen(true);
        w.set_iopben(true);
        w.set_iopcen(true);
        w.set_tim1en(true);
        w.set_spi1en(true);
    });
    rcc.apb1pcenr().write(|w| {
        w.set_tim2en(true);
        w.set_tim3en(true);
        w.set_tim4en(true);
        w.set_usart2en(true);
    });

    // Return generated clock frequencies for easy reference elsewhere.
    Clocks {
        sys_ck: 64_000_000,
        hclk: 64_000_000,
        pclk1: 64_000_000,
        pclk2: 64_000_000,
        tim_ck: 64_000_000,
    }
}
