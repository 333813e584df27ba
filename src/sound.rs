//! Single channel melody player.
//!
//! The application requests melodies through a shared [`SoundChannel`], and a
//! periodic timer interrupt advances the [`Sound`] sequencer which owns the
//! tone PWM. The handoff is a single atomic pointer: a request overwrites any
//! earlier one that has not been picked up yet, so only the latest melody is
//! ever started.

use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crate::hal::TonePwm;

/// Count rate of the tone timer assumed by the stock melodies.
pub const TONE_TIMER_HZ: u32 = 1_000_000;

/// One melody step.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Note {
    /// Duration in sequencer ticks. 0 ends the melody.
    pub len: u16,
    /// Tone timer divider. 0 is a rest.
    pub div: u16,
}

impl Note {
    pub const fn new(len: u16, div: u16) -> Self {
        Note { len, div }
    }

    pub const fn rest(len: u16) -> Self {
        Note { len, div: 0 }
    }

    pub const END: Note = Note { len: 0, div: 0 };
}

/// A note table. Playback stops at the first zero-length note or at the end
/// of the slice, whichever comes first.
#[derive(Debug)]
pub struct Melody {
    notes: &'static [Note],
}

impl Melody {
    pub const fn new(notes: &'static [Note]) -> Self {
        Melody { notes }
    }

    pub fn notes(&self) -> &'static [Note] {
        self.notes
    }
}

/// Convert a frequency in 0.01Hz units into a divider for a timer counting at `timer_hz`.
///
/// Returns 0 (a rest) for a 0Hz request and saturates at the divider range otherwise.
pub const fn divider(centihz: u32, timer_hz: u32) -> u16 {
    if centihz == 0 {
        return 0;
    }
    let div = timer_hz as u64 * 100 / centihz as u64;
    if div == 0 {
        1
    } else if div > u16::MAX as u64 {
        u16::MAX
    } else {
        div as u16
    }
}

/// Short key click.
pub static BEEP: Melody = Melody::new(&[
    Note::new(4, divider(200_000, TONE_TIMER_HZ)),
    Note::END,
]);

/// Rising arpeggio played at boot.
pub static STARTUP: Melody = Melody::new(&[
    Note::new(8, divider(52_325, TONE_TIMER_HZ)),
    Note::new(8, divider(65_926, TONE_TIMER_HZ)),
    Note::new(8, divider(78_399, TONE_TIMER_HZ)),
    Note::rest(4),
    Note::new(16, divider(104_650, TONE_TIMER_HZ)),
    Note::END,
]);

/// Requesting a melody with no notes stops playback at the next tick.
static SILENCE: Melody = Melody::new(&[]);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SoundState {
    Idle,
    Playing,
    /// A melody has been requested but the sequencer has not ticked since.
    RestartRequested,
}

/// Request side of the sound channel, shared between the application and
/// the sequencer interrupt.
pub struct SoundChannel {
    pending: AtomicPtr<Melody>,
    playing: AtomicBool,
}

impl SoundChannel {
    pub const fn new() -> Self {
        SoundChannel { pending: AtomicPtr::new(ptr::null_mut()), playing: AtomicBool::new(false) }
    }

    /// Start `melody` from its first note at the next tick, replacing whatever plays now.
    pub fn play_melody(&self, melody: &'static Melody) {
        self.pending.store(melody as *const Melody as *mut Melody, Ordering::Relaxed);
    }

    /// Stop playback at the next tick.
    pub fn stop(&self) {
        self.play_melody(&SILENCE);
    }

    pub fn state(&self) -> SoundState {
        if !self.pending.load(Ordering::Relaxed).is_null() {
            SoundState::RestartRequested
        } else if self.playing.load(Ordering::Relaxed) {
            SoundState::Playing
        } else {
            SoundState::Idle
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state() != SoundState::Idle
    }

    fn take(&self) -> Option<&'static Melody> {
        let p = self.pending.swap(ptr::null_mut(), Ordering::Relaxed);
        // NOTE(unsafe): Only `play_melody` stores non-null values, and it
        // NOTE(unsafe): only accepts `&'static Melody`.
        unsafe { p.cast_const().as_ref() }
    }
}

impl Default for SoundChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Melody sequencer, owned by the sound tick interrupt.
pub struct Sound<'a, P: TonePwm> {
    channel: &'a SoundChannel,
    pwm: P,
    notes: Option<&'static [Note]>,
    idx: usize,
    remaining: u16,
}

impl<'a, P: TonePwm> Sound<'a, P> {
    pub fn new(channel: &'a SoundChannel, mut pwm: P) -> Self {
        pwm.off();
        Sound { channel, pwm, notes: None, idx: 0, remaining: 0 }
    }

    /// Play a continuous tone immediately, cancelling any melody.
    pub fn play_tone(&mut self, div: u16) {
        self.channel.take();
        self.notes = None;
        self.remaining = 0;
        self.channel.playing.store(false, Ordering::Relaxed);
        if div == 0 {
            self.pwm.off();
        } else {
            self.pwm.set_divider(div);
        }
    }

    /// Stop immediately, dropping any pending request.
    pub fn stop(&mut self) {
        self.channel.take();
        self.finish();
    }

    /// Advance playback by one tick.
    pub fn scan(&mut self) {
        if let Some(melody) = self.channel.take() {
            self.notes = Some(melody.notes());
            self.idx = 0;
            self.load();
            return;
        }

        if self.notes.is_none() {
            return;
        }

        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.idx += 1;
            self.load();
        }
    }

    pub fn is_playing(&self) -> bool {
        self.notes.is_some()
    }

    /// Release the PWM, silencing it first.
    pub fn release(mut self) -> P {
        self.finish();
        self.pwm
    }

    /// Load the note at `idx`, or go idle on the terminator.
    fn load(&mut self) {
        let note = self.notes.and_then(|n| n.get(self.idx)).filter(|n| n.len > 0);
        match note {
            Some(note) => {
                self.remaining = note.len;
                if note.div == 0 {
                    self.pwm.off();
                } else {
                    self.pwm.set_divider(note.div);
                }
                self.channel.playing.store(true, Ordering::Relaxed);
            }
            None => self.finish(),
        }
    }

    fn finish(&mut self) {
        self.notes = None;
        self.remaining = 0;
        self.pwm.off();
        self.channel.playing.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Records the divider currently driven, None when off.
    #[derive(Default)]
    struct MockPwm<'a>(Option<&'a Cell<Option<u16>>>);

    impl TonePwm for MockPwm<'_> {
        fn set_divider(&mut self, div: u16) {
            if let Some(c) = self.0 {
                c.set(Some(div));
            }
        }

        fn off(&mut self) {
            if let Some(c) = self.0 {
                c.set(None);
            }
        }
    }

    static SCALE: Melody = Melody::new(&[Note::new(2, 1000), Note::new(1, 2000), Note::END]);
    static OTHER: Melody = Melody::new(&[Note::new(3, 3000), Note::END]);
    static REST: Melody = Melody::new(&[Note::new(1, 500), Note::rest(2), Note::new(1, 600)]);

    #[test]
    fn plays_table_in_order_then_idles() {
        let out = Cell::new(None);
        let channel = SoundChannel::new();
        let mut sound = Sound::new(&channel, MockPwm(Some(&out)));
        channel.play_melody(&SCALE);
        assert_eq!(channel.state(), SoundState::RestartRequested);

        let mut seen = Vec::new();
        for _ in 0..5 {
            sound.scan();
            seen.push(out.get());
        }
        assert_eq!(seen, vec![Some(1000), Some(1000), Some(2000), None, None]);
        assert_eq!(channel.state(), SoundState::Idle);
        assert!(!sound.is_playing());
    }

    #[test]
    fn latest_request_wins() {
        let out = Cell::new(None);
        let channel = SoundChannel::new();
        let mut sound = Sound::new(&channel, MockPwm(Some(&out)));
        channel.play_melody(&SCALE);
        channel.play_melody(&OTHER);

        let mut seen = Vec::new();
        for _ in 0..4 {
            sound.scan();
            seen.push(out.get());
        }
        assert_eq!(seen, vec![Some(3000), Some(3000), Some(3000), None]);
    }

    #[test]
    fn restart_mid_melody() {
        let out = Cell::new(None);
        let channel = SoundChannel::new();
        let mut sound = Sound::new(&channel, MockPwm(Some(&out)));
        channel.play_melody(&OTHER);
        sound.scan();
        sound.scan();
        channel.play_melody(&SCALE);
        sound.scan();
        assert_eq!(out.get(), Some(1000));
        assert_eq!(channel.state(), SoundState::Playing);
    }

    #[test]
    fn rest_silences_but_keeps_playing_and_slice_end_terminates() {
        let out = Cell::new(None);
        let channel = SoundChannel::new();
        let mut sound = Sound::new(&channel, MockPwm(Some(&out)));
        channel.play_melody(&REST);

        let mut seen = Vec::new();
        let mut playing = Vec::new();
        for _ in 0..6 {
            sound.scan();
            seen.push(out.get());
            playing.push(sound.is_playing());
        }
        assert_eq!(seen, vec![Some(500), None, None, Some(600), None, None]);
        assert_eq!(playing, vec![true, true, true, true, false, false]);
    }

    #[test]
    fn empty_first_note_is_mute() {
        static MUTE: Melody = Melody::new(&[Note::END, Note::new(5, 100)]);
        let out = Cell::new(Some(1));
        let channel = SoundChannel::new();
        let mut sound = Sound::new(&channel, MockPwm(Some(&out)));
        channel.play_melody(&MUTE);
        sound.scan();
        assert_eq!(out.get(), None);
        assert_eq!(channel.state(), SoundState::Idle);
    }

    #[test]
    fn tone_and_stop() {
        let out = Cell::new(None);
        let channel = SoundChannel::new();
        let mut sound = Sound::new(&channel, MockPwm(Some(&out)));
        channel.play_melody(&SCALE);
        sound.scan();
        sound.play_tone(1234);
        assert_eq!(out.get(), Some(1234));
        sound.scan();
        sound.scan();
        assert_eq!(out.get(), Some(1234));

        sound.stop();
        assert_eq!(out.get(), None);

        channel.play_melody(&SCALE);
        channel.stop();
        sound.scan();
        assert_eq!(out.get(), None);
        assert_eq!(channel.state(), SoundState::Idle);
    }

    #[test]
    fn divider_conversion() {
        assert_eq!(divider(100_000, 1_000_000), 1000);
        assert_eq!(divider(44_000, 1_000_000), 2272);
        assert_eq!(divider(0, 1_000_000), 0);
        assert_eq!(divider(1, 1_000_000), u16::MAX);
        assert_eq!(divider(u32::MAX, 1_000), 1);
    }

    #[test]
    fn stock_melodies_terminate() {
        let channel = SoundChannel::new();
        let mut sound = Sound::new(&channel, MockPwm::default());
        for melody in [&BEEP, &STARTUP] {
            channel.play_melody(melody);
            let total: u32 = melody.notes().iter().map(|n| n.len as u32).sum();
            for _ in 0..total {
                sound.scan();
            }
            assert!(sound.is_playing());
            sound.scan();
            assert!(!sound.is_playing());
        }
    }
}
