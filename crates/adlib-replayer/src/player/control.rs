//! Shared playback control surface.
//!
//! The render thread exclusively owns the chip, the decoder, and the audio
//! buffers; the only state it shares with the controlling side is this set
//! of atomics, polled between render steps.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use opl2::Opl2;

use crate::sequencer::Sequencer;

/// Sentinel for "no seek pending".
const NO_SEEK: u64 = u64::MAX;

/// Length probes stop after an hour of decoded time.
pub const MAX_LENGTH_MS: u64 = 3_600_000;

/// Atomic flag set shared between the render thread and its owner.
#[derive(Debug)]
pub struct PlayerControl {
    paused: AtomicBool,
    stop: AtomicBool,
    seek_target_ms: AtomicU64,
    position_ms: AtomicU64,
}

impl PlayerControl {
    /// Create a control surface in the playing state at position zero.
    pub fn new() -> Self {
        PlayerControl {
            paused: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            seek_target_ms: AtomicU64::new(NO_SEEK),
            position_ms: AtomicU64::new(0),
        }
    }

    /// Request a pause; the render thread idles until [`Self::resume`].
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    /// Resume from a pause.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    /// Whether a pause is in effect.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Ask the render thread to stop at the next step boundary.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Whether a stop has been requested.
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Request a seek to `target_ms`. A later request overwrites an earlier
    /// one that the render thread has not picked up yet.
    pub fn request_seek(&self, target_ms: u64) {
        self.seek_target_ms
            .store(target_ms.min(NO_SEEK - 1), Ordering::Relaxed);
    }

    /// Take the pending seek target, if any. Render-thread side.
    pub fn take_seek_target(&self) -> Option<u64> {
        match self.seek_target_ms.swap(NO_SEEK, Ordering::Relaxed) {
            NO_SEEK => None,
            target => Some(target),
        }
    }

    /// Seeking works for every supported format; it is implemented by
    /// replaying the decode from position zero.
    pub fn can_seek(&self) -> bool {
        true
    }

    /// Current playback position in milliseconds.
    pub fn position_ms(&self) -> u64 {
        self.position_ms.load(Ordering::Relaxed)
    }

    pub(crate) fn set_position_ms(&self, ms: u64) {
        self.position_ms.store(ms, Ordering::Relaxed);
    }
}

impl Default for PlayerControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Measure a sequence's length by dry-decoding it against a scratch chip,
/// summing each step's delay. Bounded by [`MAX_LENGTH_MS`] so a looping or
/// hostile stream cannot hang the caller.
///
/// The decoder is left mid-stream; re-`init` it before playback.
pub fn sequence_length_ms(sequencer: &mut dyn Sequencer) -> u64 {
    let mut chip = Opl2::new();
    sequencer.init(&mut chip);
    let mut total = 0.0f64;
    while sequencer.advance(&mut chip) {
        let hz = sequencer.refresh_hz();
        if hz > 0.0 {
            total += 1000.0 / hz;
        }
        if total >= MAX_LENGTH_MS as f64 {
            return MAX_LENGTH_MS;
        }
    }
    total.round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_target_is_taken_once() {
        let control = PlayerControl::new();
        assert_eq!(control.take_seek_target(), None);
        control.request_seek(1500);
        assert_eq!(control.take_seek_target(), Some(1500));
        assert_eq!(control.take_seek_target(), None);
    }

    #[test]
    fn later_seek_request_wins() {
        let control = PlayerControl::new();
        control.request_seek(1000);
        control.request_seek(250);
        assert_eq!(control.take_seek_target(), Some(250));
    }

    #[test]
    fn pause_and_stop_flags() {
        let control = PlayerControl::new();
        assert!(!control.is_paused());
        assert!(!control.stop_requested());
        assert!(control.can_seek());
        control.pause();
        assert!(control.is_paused());
        control.resume();
        assert!(!control.is_paused());
        control.request_stop();
        assert!(control.stop_requested());
    }

    #[test]
    fn length_of_a_register_log() {
        use crate::sequencer::DroSequencer;

        // DRO v1 with two 100 ms delays (byte 0x00 carries value + 1).
        let mut data = Vec::new();
        data.extend_from_slice(b"DBRAWOPL");
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&200u32.to_le_bytes()); // length ms
        data.extend_from_slice(&8u32.to_le_bytes()); // stream bytes
        data.extend_from_slice(&[0u8; 4]); // hardware type (u32 form)
        data.extend_from_slice(&[0x00, 99, 0x20, 0x01, 0x00, 99, 0xa0, 0x40]);

        let mut seq = DroSequencer::load(&data).unwrap();
        let ms = sequence_length_ms(&mut seq);
        assert_eq!(ms, 200);
    }
}
