// Per-codec decoder parameter sets and NAL/AVCC helpers

pub mod avcc;
mod audio;
mod video;

pub use audio::*;
pub use video::*;
