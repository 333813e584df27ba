//! Board bring-up and shutdown order.

/// Per-subsystem setup and teardown of a board.
pub trait Board {
    type Error;

    fn keyboard_init(&mut self) -> Result<(), Self::Error>;
    fn keyboard_term(&mut self);
    fn sound_init(&mut self) -> Result<(), Self::Error>;
    fn sound_term(&mut self);
    fn display_init(&mut self) -> Result<(), Self::Error>;
    fn display_term(&mut self);
}

/// Subsystem that failed to start.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeviceError<E> {
    Keyboard(E),
    Sound(E),
    Display(E),
}

/// Start the keyboard, sound and display in that order.
///
/// Stops at the first failure. Subsystems started before it stay running,
/// so a board without a working display still has keyboard and sound.
pub fn init<B: Board>(board: &mut B) -> Result<(), DeviceError<B::Error>> {
    board.keyboard_init().map_err(DeviceError::Keyboard)?;
    board.sound_init().map_err(DeviceError::Sound)?;
    board.display_init().map_err(DeviceError::Display)?;
    Ok(())
}

/// Stop the display, sound and keyboard in that order.
pub fn term<B: Board>(board: &mut B) {
    board.display_term();
    board.sound_term();
    board.keyboard_term();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Log {
        calls: Vec<&'static str>,
        fail: Option<&'static str>,
    }

    impl Log {
        fn step(&mut self, name: &'static str) -> Result<(), &'static str> {
            self.calls.push(name);
            if self.fail == Some(name) { Err(name) } else { Ok(()) }
        }
    }

    impl Board for Log {
        type Error = &'static str;

        fn keyboard_init(&mut self) -> Result<(), Self::Error> { self.step("kbd") }
        fn keyboard_term(&mut self) { self.calls.push("~kbd"); }
        fn sound_init(&mut self) -> Result<(), Self::Error> { self.step("snd") }
        fn sound_term(&mut self) { self.calls.push("~snd"); }
        fn display_init(&mut self) -> Result<(), Self::Error> { self.step("disp") }
        fn display_term(&mut self) { self.calls.push("~disp"); }
    }

    #[test]
    fn init_and_term_order() {
        let mut board = Log::default();
        assert_eq!(init(&mut board), Ok(()));
        term(&mut board);
        assert_eq!(board.calls, ["kbd", "snd", "disp", "~disp", "~snd", "~kbd"]);
    }

    #[test]
    fn init_stops_at_first_failure() {
        let mut board = Log { fail: Some("snd"), ..Default::default() };
        assert_eq!(init(&mut board), Err(DeviceError::Sound("snd")));
        assert_eq!(board.calls, ["kbd", "snd"]);

        let mut board = Log { fail: Some("disp"), ..Default::default() };
        assert_eq!(init(&mut board), Err(DeviceError::Display("disp")));
    }
}
