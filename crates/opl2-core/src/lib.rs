//! # opl2
//!
//! Register-accurate emulation of the Yamaha YM3812 (OPL2) FM sound chip,
//! the synthesizer of the original AdLib and Sound Blaster cards.
//!
//! The crate models the chip at the register level: nine two-operator FM
//! channels, the shared amplitude/vibrato LFOs, the noise generator, and
//! the rhythm-mode percussion network. It has no timing source and no I/O;
//! a caller applies register writes and pulls samples at the chip's native
//! rate (~49716 Hz).
//!
//! ## Example
//!
//! ```
//! use opl2::Opl2;
//!
//! let mut chip = Opl2::new();
//! chip.write_register(0x20, 0x21); // modulator settings for channel 0
//! chip.write_register(0xb0, 0x31); // key on
//! let (left, right) = chip.tick();
//! assert_eq!(left, right); // the YM3812 is mono
//! ```

#![warn(missing_docs)]

use thiserror::Error;

pub mod channel;
pub mod chip;
pub mod operator;
mod rhythm;
pub mod tables;

pub use chip::{Opl2, Rhythm, MASTER_CLOCK, NATIVE_SAMPLE_RATE};
pub use operator::{EnvelopePhase, Operator};

/// Errors for the crate API surface. Register writes and ticks are total
/// functions and never return one; only configuration entry points do.
#[derive(Error, Debug)]
pub enum Opl2Error {
    /// A caller asked for a sample rate the chip cannot synthesize at.
    /// The model runs at [`NATIVE_SAMPLE_RATE`] only; resample downstream.
    #[error("unsupported sample rate {0} Hz (chip runs at {NATIVE_SAMPLE_RATE} Hz)")]
    UnsupportedSampleRate(u32),
}

/// Convenience result type for opl2 operations.
pub type Result<T> = std::result::Result<T, Opl2Error>;

impl Opl2 {
    /// Create a chip validated against a requested output rate. Succeeds
    /// only for the native rate; exists so callers with a rate setting get
    /// a typed error instead of silently detuned audio.
    pub fn with_rate(rate: u32) -> Result<Self> {
        if rate != NATIVE_SAMPLE_RATE {
            return Err(Opl2Error::UnsupportedSampleRate(rate));
        }
        Ok(Opl2::new())
    }
}
