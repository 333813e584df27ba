//! Peripheral seams between the board support code and the state machines.
//!
//! The firmware implements these traits on top of the real timer, SPI, DMA,
//! USART and GPIO registers. The simulator and the unit tests implement them
//! with plain memory so the same scanline, sound and keyboard logic can be
//! driven without hardware.

use crate::keyboard::KeySet;

/// Video output path for serialized scanlines.
pub trait ScanOut {
    /// Start shifting out one serialized scanline.
    ///
    /// Called from the line interrupt; must only kick off the transfer
    /// (SPI shift, DMA to a GPIO port, ...) and return. The slice stays
    /// untouched by the dispatcher until the next call.
    fn send_line(&mut self, line: &[u8]);

    /// Drive the vertical sync output, `true` while the pulse is active.
    fn set_vsync(&mut self, active: bool);
}

/// Single channel PWM tone output.
pub trait TonePwm {
    /// Output a square wave with the timer reload set to `div` ticks.
    fn set_divider(&mut self, div: u16);

    /// Disable the compare output.
    fn off(&mut self);
}

/// Raw key line sampler.
pub trait KeyLines {
    /// Sample all key lines, adding every key currently read as pressed.
    fn read(&mut self, pressed: &mut KeySet);
}

/// Byte-oriented serial link, used between the two CPUs of the BabyPC.
pub trait SerialLink {
    /// Queue one byte for transmission, blocking until there is room.
    fn write(&mut self, byte: u8);

    /// Return the next received byte, if any.
    fn read(&mut self) -> Option<u8>;
}

/// Free-running CPU cycle counter, wrapping at `u32::MAX`.
pub trait CycleCounter {
    fn cycles(&self) -> u32;
}
