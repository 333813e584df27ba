//! Scanline timing tables.
//!
//! Every value here is measured in system clock cycles (horizontal) or
//! scanlines (vertical). The numbers are tied to a particular oscillator and
//! display standard, so they are kept as one table entry per configuration
//! rather than computed from a formula.

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Polarity {
    Positive,
    Negative,
}

/// Timing parameters for one video signal configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Timing {
    /// System clock the cycle counts below refer to.
    pub sysclk_hz: u32,

    /// Total cycles per line, including blanking. Zero for displays which
    /// pace lines themselves (SPI LCD controllers).
    pub line_cycles: u32,
    /// Length of horizontal sync pulse.
    pub hsync_cycles: u32,
    /// Cycles between end of sync and start of video.
    pub back_porch_cycles: u32,
    /// Nudges the line interrupt backwards in time to compensate for
    /// interrupt entry and the setup done before the first pixel.
    pub video_lead: u32,
    /// Polarity of horizontal sync pulse.
    pub hsync_polarity: Polarity,

    /// Scanlines per frame, including blanking.
    pub total_lines: u16,
    /// Scanline number of onset of vertical sync pulse.
    pub vsync_start: u16,
    /// Scanline number of end of vertical sync pulse.
    pub vsync_end: u16,
    /// Polarity of the vertical sync pulse.
    pub vsync_polarity: Polarity,
}

impl Timing {
    /// Compare value, in cycles after the start of a line, at which the
    /// line interrupt must fire so the first pixel leaves on time.
    pub const fn active_start(&self) -> u32 {
        (self.hsync_cycles + self.back_porch_cycles).saturating_sub(self.video_lead)
    }

    /// Line frequency in Hz, or 0 for controller-paced displays.
    pub const fn line_hz(&self) -> u32 {
        if self.line_cycles == 0 {
            0
        } else {
            self.sysclk_hz / self.line_cycles
        }
    }

    /// Returns true if `line` lies inside the vertical sync pulse.
    pub const fn in_vsync(&self, line: u16) -> bool {
        line >= self.vsync_start && line < self.vsync_end
    }
}

/// 640x480 VGA-like timing at 50MHz system clock.
///
/// One line is 1600 cycles (31.25kHz), 525 lines per frame (59.5Hz).
/// Visible lines are numbered from 0, so the frame counter advances on
/// the first visible line.
#[rustfmt::skip]
pub static VGA_50MHZ: Timing = Timing {
    sysclk_hz: 50_000_000,

    line_cycles      : 1600,
    hsync_cycles     : 192,
    back_porch_cycles: 96,
    video_lead       : 125,
    hsync_polarity   : Polarity::Negative,

    total_lines   : 525,
    vsync_start   : 490,
    vsync_end     : 492,
    vsync_polarity: Polarity::Negative,
};

/// 640x480 VGA-like timing at 48MHz system clock (HSI/2 x12 on CH32V2).
///
/// One line is 1525 cycles (31.48kHz), 525 lines per frame (59.9Hz).
/// Only about 1220 cycles of each line are visible, too few for 320
/// pixels at the 4 cycle SPI clock.
#[rustfmt::skip]
pub static VGA_48MHZ: Timing = Timing {
    sysclk_hz: 48_000_000,

    line_cycles      : 1525,
    hsync_cycles     : 183,
    back_porch_cycles: 92,
    video_lead       : 120,
    hsync_polarity   : Polarity::Negative,

    total_lines   : 525,
    vsync_start   : 490,
    vsync_end     : 492,
    vsync_polarity: Polarity::Negative,
};

/// 640x480 VGA-like timing at 64MHz system clock (HSI/2 x16 on CH32V2).
///
/// One line is 2034 cycles (31.47kHz), 525 lines per frame (59.9Hz), of
/// which about 1627 cycles are visible.
#[rustfmt::skip]
pub static VGA_64MHZ: Timing = Timing {
    sysclk_hz: 64_000_000,

    line_cycles      : 2034,
    hsync_cycles     : 244,
    back_porch_cycles: 122,
    video_lead       : 160,
    hsync_polarity   : Polarity::Negative,

    total_lines   : 525,
    vsync_start   : 490,
    vsync_end     : 492,
    vsync_polarity: Polarity::Negative,
};

/// ST7735 160x128 LCD driven over SPI.
///
/// The controller generates its own sync; one "line event" is raised per
/// completed line transfer. Line 0 carries no pixels: its "vsync" pulse
/// tells the output path to re-address the controller's RAM window before
/// the 128 visible lines that follow.
#[rustfmt::skip]
pub static LCD_160X128: Timing = Timing {
    sysclk_hz: 64_000_000,

    line_cycles      : 0,
    hsync_cycles     : 0,
    back_porch_cycles: 0,
    video_lead       : 0,
    hsync_polarity   : Polarity::Positive,

    total_lines   : 129,
    vsync_start   : 0,
    vsync_end     : 1,
    vsync_polarity: Polarity::Positive,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_start_includes_lead() {
        assert_eq!(VGA_50MHZ.active_start(), 288 - 125);
        assert_eq!(LCD_160X128.active_start(), 0);
    }

    #[test]
    fn line_rates() {
        assert_eq!(VGA_50MHZ.line_hz(), 31_250);
        assert_eq!(VGA_48MHZ.line_hz(), 31_475);
        assert_eq!(VGA_64MHZ.line_hz(), 31_465);
        assert_eq!(LCD_160X128.line_hz(), 0);
    }

    #[test]
    fn vsync_window() {
        assert!(!VGA_50MHZ.in_vsync(489));
        assert!(VGA_50MHZ.in_vsync(490));
        assert!(VGA_50MHZ.in_vsync(491));
        assert!(!VGA_50MHZ.in_vsync(492));
        assert!(LCD_160X128.in_vsync(0));
        assert!(!LCD_160X128.in_vsync(1));
    }
}
