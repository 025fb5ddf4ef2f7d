//! Sequence decoders: a uniform pull-based contract over the supported
//! AdLib music formats.
//!
//! Each decoder parses its source buffer once at load time, then hands out
//! timed batches of register writes through [`Sequencer::advance`]. Decoding
//! is monotonic; rewinding means [`Sequencer::init`] and replaying.

use opl2::Opl2;

use crate::Result;

pub mod bank;
pub mod dro;
pub mod gm;
pub mod midi;
pub mod rol;

/// Modulator slot register offset per melodic channel; the carrier slot of
/// the same channel is `+3`.
pub(crate) const MOD_OFFSET: [u8; 9] = [0x00, 0x01, 0x02, 0x08, 0x09, 0x0a, 0x10, 0x11, 0x12];

pub use bank::InstrumentBank;
pub use dro::DroSequencer;
pub use midi::{MidiDialect, MidiSequencer};
pub use rol::RolSequencer;

/// Pull-based decoder contract shared by every supported format.
///
/// `Send` because the renderer owns its decoder on a dedicated thread.
pub trait Sequencer: Send {
    /// Reset internal cursors to position zero and reset the chip.
    fn init(&mut self, chip: &mut Opl2);

    /// Apply the register writes due at the current position, then stop at
    /// the next timing boundary. Returns whether more data remains.
    fn advance(&mut self, chip: &mut Opl2) -> bool;

    /// Rate (steps per second) for interpreting the delay of the step that
    /// [`Sequencer::advance`] just produced. May change on every call.
    fn refresh_hz(&self) -> f64;

    /// Total number of steps, when the format declares a trustworthy count.
    fn total_steps_hint(&self) -> Option<usize> {
        None
    }

    /// Human-readable format name for status output.
    fn format_name(&self) -> &'static str;
}

/// Identify the format of `data` and build the matching decoder.
///
/// Probes run in priority order against the leading bytes, once. `companion`
/// carries the external instrument bank some formats need (ROL's BNK file,
/// the Sierra patch file); formats that require one fail with
/// [`ReplayerError::MissingBank`](crate::ReplayerError::MissingBank) when it
/// is absent.
pub fn detect(data: &[u8], companion: Option<&[u8]>) -> Result<Box<dyn Sequencer>> {
    if DroSequencer::probe(data) {
        return Ok(Box::new(DroSequencer::load(data)?));
    }
    if let Some(dialect) = MidiDialect::probe(data, companion.is_some()) {
        return Ok(Box::new(MidiSequencer::load(data, dialect, companion)?));
    }
    if RolSequencer::probe(data) {
        return Ok(Box::new(RolSequencer::load(data, companion)?));
    }
    Err(crate::ReplayerError::UnknownFormat)
}
