#![cfg_attr(not(test), no_std)]

pub mod bmp;
pub mod device;
pub mod hal;
pub mod handoff;
pub mod keyboard;
pub mod link;
pub mod sound;
pub mod video;

pub use keyboard::{Key, KeyScan, Keys};
pub use sound::{Melody, Note, Sound, SoundChannel};
pub use video::{Mode, Scanline, VideoRam, VideoState};
