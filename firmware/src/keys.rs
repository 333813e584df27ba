use babysdk::hal::KeyLines;
use babysdk::keyboard::{Key, KeySet};
use qingke::riscv;
use crate::gpio::KeyPins;

/// Cycles for a driven row to settle through the column pull-ups.
const SETTLE_CYCLES: u32 = 48;

/// Local 8x5 key matrix.
///
/// Row `r`, column `c` carries keycode `r * 5 + c + 1`, so each row covers
/// half of one printed key row.
pub struct KeyMatrix {
    pins: KeyPins,
}

impl KeyMatrix {
    pub fn new(pins: KeyPins) -> Self {
        pins.release_rows();
        KeyMatrix { pins }
    }
}

impl KeyLines for KeyMatrix {
    fn read(&mut self, pressed: &mut KeySet) {
        for row in 0..KeyPins::ROWS {
            self.pins.select_row(row);
            riscv::asm::delay(SETTLE_CYCLES);
            let cols = self.pins.read_cols();
            for col in (0..KeyPins::COLS).filter(|&c| cols & (1 << c) != 0) {
                let code = (row * KeyPins::COLS + col + 1) as u8;
                if let Some(key) = Key::from_code(code) {
                    pressed.press(key);
                }
            }
        }
        self.pins.release_rows();
    }
}
