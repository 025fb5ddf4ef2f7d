//! Offline export sinks.

pub mod wav;

pub use wav::{export_to_wav, WavSink};
