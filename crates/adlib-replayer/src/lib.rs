//! AdLib music replayer.
//!
//! Decodes the classic AdLib sequence formats (DOSBox DRO register logs,
//! six AdLib-targeted MIDI dialects, AdLib Visual Composer ROL with BNK
//! instrument banks) and renders them through the [`opl2`] FM synthesizer
//! core, with optional wide-stereo output, seeking, WAV export, and
//! real-time streaming.
//!
//! # Example
//!
//! ```no_run
//! use adlib_replayer::{detect, BufferSink, Renderer};
//!
//! # fn main() -> adlib_replayer::Result<()> {
//! let data = std::fs::read("song.dro")?;
//! let sequencer = detect(&data, None)?;
//! let mut renderer = Renderer::new(sequencer, true);
//! let mut sink = BufferSink::new();
//! while renderer.render_step(&mut sink)? {}
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod error;
mod io;
pub mod player;
pub mod sequencer;

#[cfg(feature = "export-wav")]
pub mod export;
#[cfg(feature = "streaming")]
pub mod streaming;

pub use error::{ReplayerError, Result};
pub use player::{
    BufferSink, PcmSink, PlayerControl, RenderSession, RenderState, Renderer, Surround,
};
pub use sequencer::{
    detect, DroSequencer, InstrumentBank, MidiDialect, MidiSequencer, RolSequencer, Sequencer,
};

#[cfg(feature = "export-wav")]
pub use export::export_to_wav;
#[cfg(feature = "streaming")]
pub use streaming::AudioStream;
