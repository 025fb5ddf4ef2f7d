//! General-MIDI seed data for the MIDI-dialect decoder.
//!
//! The 128-entry FM bank below approximates the General MIDI program set on
//! two OPL2 operators. Each row is register-ready: modulator/carrier 0x20
//! images, 0x40 levels, 0x60 attack/decay, 0x80 sustain/release, 0xE0
//! waveforms and the 0xC0 feedback/connection byte. Dialects with their own
//! bank data (CMF blocks, Sierra patches, LucasArts sysex) override entries
//! or whole channels at load time.

use std::sync::LazyLock;

/// Register-ready 11-byte FM parameter set:
/// `[mod20, car20, mod40, car40, mod60, car60, mod80, car80, modE0, carE0, c0]`.
pub type FmPatch = [u8; 11];

/// Fnum per semitone within one octave, C through B.
pub static NOTE_FNUM: [u16; 12] = [
    0x16b, 0x181, 0x198, 0x1b0, 0x1ca, 0x1e5, 0x202, 0x220, 0x241, 0x263, 0x287, 0x2ae,
];

/// Logarithmic MIDI velocity to loudness curve (0..=127 in, 0..=127 out).
pub static VELOCITY_TABLE: LazyLock<[u8; 128]> = LazyLock::new(|| {
    let mut tab = [0u8; 128];
    for (vel, entry) in tab.iter_mut().enumerate().skip(1) {
        let v = 128.0 * (vel as f64).ln() / 127f64.ln();
        *entry = v.min(127.0) as u8;
    }
    tab
});

/// General MIDI programs 0..=127 as FM patches.
#[rustfmt::skip]
pub static GM_PATCHES: [FmPatch; 128] = [
    // Pianos
    [0x21, 0x21, 0x8f, 0x06, 0xf2, 0xf2, 0x45, 0x76, 0x00, 0x00, 0x08],
    [0x31, 0x21, 0x4b, 0x04, 0xf2, 0xf2, 0x54, 0x56, 0x00, 0x00, 0x08],
    [0x31, 0x21, 0x49, 0x04, 0xf2, 0xf2, 0x55, 0x76, 0x00, 0x00, 0x08],
    [0xb1, 0x61, 0x0e, 0x04, 0xf2, 0xf3, 0x3b, 0x0b, 0x00, 0x00, 0x06],
    [0x01, 0x21, 0x57, 0x00, 0xf1, 0xf1, 0x38, 0x28, 0x00, 0x00, 0x00],
    [0x01, 0x21, 0x93, 0x00, 0xf1, 0xf1, 0x38, 0x28, 0x00, 0x00, 0x00],
    [0x21, 0x36, 0x80, 0x0e, 0xf2, 0xf1, 0x01, 0xf5, 0x00, 0x00, 0x08],
    [0x01, 0x01, 0x92, 0x00, 0xf2, 0xf2, 0x55, 0x76, 0x00, 0x00, 0x0a],
    // Chromatic percussion
    [0x0c, 0x81, 0x5c, 0x00, 0xf6, 0xf3, 0x54, 0xb5, 0x00, 0x00, 0x00],
    [0x07, 0x11, 0x97, 0x80, 0xf9, 0xf5, 0x32, 0x15, 0x00, 0x00, 0x02],
    [0x17, 0x01, 0x21, 0x00, 0x56, 0xf6, 0x04, 0x04, 0x00, 0x00, 0x02],
    [0x18, 0x81, 0x62, 0x00, 0xf3, 0xf2, 0xe6, 0xf6, 0x00, 0x00, 0x00],
    [0x18, 0x21, 0x23, 0x00, 0xf7, 0xe5, 0x55, 0xd8, 0x00, 0x00, 0x00],
    [0x15, 0x01, 0x91, 0x00, 0xf6, 0xf6, 0xa6, 0xe6, 0x04, 0x00, 0x04],
    [0x45, 0x81, 0x59, 0x80, 0xd3, 0xa3, 0x82, 0xe3, 0x00, 0x00, 0x0c],
    [0x03, 0x81, 0x49, 0x80, 0x74, 0xb3, 0x55, 0x05, 0x01, 0x00, 0x04],
    // Organs
    [0x71, 0x31, 0x92, 0x00, 0xf6, 0xf1, 0x14, 0x07, 0x00, 0x00, 0x02],
    [0x72, 0x30, 0x14, 0x00, 0xc7, 0xc7, 0x58, 0x08, 0x00, 0x00, 0x02],
    [0x70, 0xb1, 0x44, 0x00, 0xaa, 0x8a, 0x18, 0x08, 0x00, 0x00, 0x04],
    [0x23, 0xb1, 0x93, 0x00, 0x97, 0x55, 0x23, 0x14, 0x01, 0x00, 0x04],
    [0x61, 0xb1, 0x13, 0x80, 0x97, 0x55, 0x04, 0x04, 0x01, 0x00, 0x00],
    [0x24, 0xb1, 0x48, 0x00, 0x98, 0x46, 0x2a, 0x1a, 0x01, 0x00, 0x0c],
    [0x61, 0x21, 0x13, 0x00, 0x91, 0x61, 0x06, 0x07, 0x01, 0x00, 0x0a],
    [0x21, 0xa1, 0x13, 0x89, 0x71, 0x61, 0x06, 0x07, 0x00, 0x00, 0x06],
    // Guitars
    [0x02, 0x41, 0x9c, 0x80, 0xf3, 0xf3, 0x94, 0xc8, 0x01, 0x00, 0x0c],
    [0x03, 0x11, 0x54, 0x00, 0xf3, 0xf1, 0x9a, 0xe7, 0x01, 0x00, 0x0c],
    [0x23, 0x21, 0x5f, 0x00, 0xf1, 0xf2, 0x3a, 0xf8, 0x00, 0x00, 0x00],
    [0x03, 0x21, 0x87, 0x80, 0xf6, 0xf3, 0x22, 0xf8, 0x01, 0x00, 0x06],
    [0x03, 0x21, 0x47, 0x00, 0xf9, 0xf6, 0x54, 0x3a, 0x00, 0x00, 0x00],
    [0x23, 0x21, 0x4a, 0x05, 0x91, 0x84, 0x41, 0x19, 0x01, 0x00, 0x08],
    [0x23, 0x21, 0x4a, 0x00, 0x95, 0x94, 0x19, 0x19, 0x01, 0x00, 0x08],
    [0x09, 0x84, 0xa1, 0x80, 0x20, 0xd1, 0x4f, 0xf8, 0x00, 0x00, 0x08],
    // Basses
    [0x21, 0xa2, 0x1e, 0x00, 0x94, 0xc3, 0x06, 0xa6, 0x00, 0x00, 0x02],
    [0x31, 0x31, 0x12, 0x00, 0xf1, 0xf1, 0x28, 0x18, 0x00, 0x00, 0x0a],
    [0x31, 0x31, 0x8d, 0x00, 0xf1, 0xf1, 0xe8, 0x78, 0x00, 0x00, 0x0a],
    [0x31, 0x32, 0x5b, 0x00, 0x51, 0x71, 0x28, 0x48, 0x00, 0x00, 0x0c],
    [0x01, 0x21, 0x8b, 0x40, 0xa1, 0xf2, 0x9a, 0xdf, 0x00, 0x00, 0x08],
    [0x21, 0x21, 0x8b, 0x08, 0xa1, 0xf2, 0x9a, 0xdf, 0x00, 0x00, 0x08],
    [0x31, 0x31, 0x8b, 0x00, 0xf4, 0xf1, 0xe8, 0x78, 0x00, 0x00, 0x0a],
    [0x31, 0x31, 0x12, 0x00, 0xf1, 0xf1, 0x28, 0x18, 0x00, 0x00, 0x0a],
    // Strings
    [0x31, 0x21, 0x15, 0x00, 0xdd, 0x56, 0x13, 0x26, 0x01, 0x00, 0x08],
    [0x31, 0x21, 0x16, 0x00, 0xdd, 0x66, 0x13, 0x06, 0x01, 0x00, 0x08],
    [0x71, 0x31, 0x49, 0x00, 0xd1, 0x61, 0x1c, 0x0c, 0x01, 0x00, 0x08],
    [0x21, 0x23, 0x4d, 0x80, 0x71, 0x72, 0x12, 0x06, 0x01, 0x00, 0x02],
    [0xf1, 0xe1, 0x40, 0x00, 0xf1, 0x6f, 0x21, 0x16, 0x01, 0x00, 0x02],
    [0x02, 0x01, 0x1a, 0x80, 0xf5, 0x85, 0x75, 0x35, 0x01, 0x00, 0x00],
    [0x02, 0x01, 0x1d, 0x80, 0xf5, 0xf3, 0x75, 0xf4, 0x01, 0x00, 0x00],
    [0x10, 0x11, 0x41, 0x00, 0xf5, 0xf2, 0x05, 0xc3, 0x01, 0x00, 0x02],
    // Ensemble
    [0x21, 0xa2, 0x9b, 0x01, 0x71, 0x81, 0xae, 0x9e, 0x01, 0x00, 0x02],
    [0xa1, 0x21, 0x98, 0x00, 0x7f, 0x41, 0x03, 0x07, 0x01, 0x01, 0x00],
    [0xa1, 0x61, 0x93, 0x00, 0xc1, 0x4f, 0x12, 0x05, 0x00, 0x00, 0x0a],
    [0x21, 0x61, 0x18, 0x00, 0xc1, 0x4f, 0x22, 0x05, 0x00, 0x00, 0x0c],
    [0x31, 0x72, 0x5b, 0x83, 0xf4, 0x8a, 0x15, 0x05, 0x00, 0x00, 0x00],
    [0xa1, 0x61, 0x90, 0x00, 0x74, 0x71, 0x39, 0x67, 0x00, 0x00, 0x00],
    [0x71, 0x72, 0x57, 0x00, 0x54, 0x7a, 0x05, 0x05, 0x00, 0x00, 0x0c],
    [0x90, 0x41, 0x00, 0x00, 0x54, 0xa5, 0x63, 0x45, 0x00, 0x00, 0x08],
    // Brass
    [0x21, 0x21, 0x92, 0x01, 0x85, 0x8f, 0x17, 0x09, 0x00, 0x00, 0x0c],
    [0x21, 0x21, 0x94, 0x05, 0x75, 0x8f, 0x17, 0x09, 0x00, 0x00, 0x0c],
    [0x21, 0x61, 0x94, 0x00, 0x76, 0x82, 0x15, 0x37, 0x00, 0x00, 0x0c],
    [0x31, 0x21, 0x43, 0x00, 0x9e, 0x62, 0x17, 0x2c, 0x01, 0x01, 0x02],
    [0x21, 0x21, 0x9b, 0x00, 0x61, 0x7f, 0x6a, 0x0a, 0x00, 0x00, 0x02],
    [0x61, 0x22, 0x8a, 0x06, 0x75, 0x74, 0x1f, 0x0f, 0x00, 0x00, 0x08],
    [0xa1, 0x21, 0x86, 0x0c, 0x72, 0x71, 0x55, 0x18, 0x01, 0x00, 0x00],
    [0x21, 0x21, 0x4d, 0x00, 0x54, 0xa6, 0x3c, 0x1c, 0x00, 0x00, 0x08],
    // Reeds
    [0x31, 0x61, 0x8f, 0x00, 0x93, 0x72, 0x02, 0x0b, 0x01, 0x00, 0x08],
    [0x31, 0x61, 0x8e, 0x00, 0x93, 0x72, 0x03, 0x09, 0x01, 0x00, 0x08],
    [0x31, 0x61, 0x91, 0x00, 0x93, 0x82, 0x03, 0x09, 0x01, 0x00, 0x0a],
    [0x31, 0x61, 0x8e, 0x00, 0x93, 0x72, 0x0f, 0x0f, 0x01, 0x00, 0x0a],
    [0x21, 0x21, 0x4b, 0x00, 0xaa, 0x8f, 0x16, 0x0a, 0x01, 0x00, 0x08],
    [0x31, 0x21, 0x90, 0x00, 0x7e, 0x8b, 0x17, 0x0c, 0x01, 0x01, 0x06],
    [0x31, 0x32, 0x81, 0x00, 0x75, 0x61, 0x19, 0x19, 0x01, 0x00, 0x00],
    [0x32, 0x21, 0x90, 0x00, 0x9b, 0x72, 0x21, 0x17, 0x00, 0x00, 0x04],
    // Pipes
    [0xe1, 0xe1, 0x1f, 0x00, 0x85, 0x65, 0x5f, 0x1a, 0x00, 0x00, 0x00],
    [0xe1, 0xe1, 0x46, 0x00, 0x88, 0x65, 0x5f, 0x1a, 0x00, 0x00, 0x00],
    [0xa1, 0x21, 0x9c, 0x00, 0x75, 0x75, 0x1f, 0x0a, 0x00, 0x00, 0x02],
    [0x31, 0x21, 0x8b, 0x00, 0x84, 0x65, 0x58, 0x1a, 0x00, 0x00, 0x00],
    [0xe1, 0xa1, 0x4c, 0x00, 0x66, 0x65, 0x56, 0x26, 0x00, 0x00, 0x00],
    [0x62, 0xa1, 0xcb, 0x00, 0x76, 0x55, 0x46, 0x36, 0x00, 0x00, 0x00],
    [0x62, 0xa1, 0xa2, 0x00, 0x57, 0x56, 0x07, 0x07, 0x00, 0x00, 0x0b],
    [0x62, 0xa1, 0x9c, 0x00, 0x77, 0x76, 0x07, 0x07, 0x00, 0x00, 0x0b],
    // Synth leads
    [0x22, 0x21, 0x59, 0x00, 0xff, 0xff, 0x03, 0x0f, 0x02, 0x00, 0x00],
    [0x21, 0x21, 0x0e, 0x00, 0xff, 0xff, 0x0f, 0x0f, 0x01, 0x01, 0x00],
    [0x22, 0x21, 0x46, 0x80, 0x86, 0x64, 0x55, 0x18, 0x00, 0x00, 0x00],
    [0x21, 0xa1, 0x45, 0x00, 0x66, 0x96, 0x12, 0x0a, 0x00, 0x00, 0x00],
    [0x21, 0x22, 0x8b, 0x00, 0x92, 0x91, 0x2a, 0x2a, 0x01, 0x00, 0x00],
    [0xa2, 0x61, 0x9e, 0x40, 0xdf, 0x6f, 0x05, 0x07, 0x00, 0x00, 0x02],
    [0x20, 0x60, 0x1a, 0x00, 0xef, 0x8f, 0x01, 0x06, 0x00, 0x02, 0x00],
    [0x21, 0x21, 0x8f, 0x80, 0xf1, 0xf4, 0x29, 0x09, 0x00, 0x00, 0x0a],
    // Synth pads
    [0x77, 0xa1, 0xa5, 0x00, 0x53, 0xa0, 0x94, 0x05, 0x00, 0x00, 0x02],
    [0x61, 0xb1, 0x1f, 0x80, 0xa8, 0x25, 0x11, 0x03, 0x00, 0x00, 0x0a],
    [0x61, 0x61, 0x17, 0x00, 0x91, 0x55, 0x34, 0x16, 0x00, 0x00, 0x0c],
    [0x71, 0x72, 0x5d, 0x00, 0x54, 0x6a, 0x01, 0x03, 0x00, 0x00, 0x00],
    [0x21, 0xa2, 0x97, 0x00, 0x21, 0x42, 0x43, 0x35, 0x00, 0x00, 0x08],
    [0xa1, 0x21, 0x1c, 0x00, 0xa1, 0x31, 0x77, 0x47, 0x01, 0x01, 0x00],
    [0x21, 0x61, 0x89, 0x03, 0x11, 0x42, 0x33, 0x25, 0x00, 0x00, 0x0a],
    [0xa1, 0x21, 0x15, 0x00, 0x11, 0xcf, 0x47, 0x07, 0x01, 0x00, 0x00],
    // Synth effects
    [0x3a, 0x51, 0x0e, 0x00, 0xf8, 0x86, 0x86, 0x71, 0x00, 0x00, 0x00],
    [0x21, 0x21, 0x15, 0x00, 0x21, 0x41, 0x23, 0x13, 0x01, 0x00, 0x00],
    [0x06, 0x01, 0x5b, 0x00, 0x74, 0xa5, 0x95, 0x72, 0x00, 0x00, 0x00],
    [0x22, 0x61, 0x92, 0x83, 0xb1, 0xf2, 0x81, 0x26, 0x00, 0x00, 0x0c],
    [0x41, 0x42, 0x4d, 0x00, 0xf1, 0xf2, 0x51, 0xf5, 0x01, 0x00, 0x00],
    [0x61, 0xa3, 0x94, 0x80, 0x11, 0x11, 0x51, 0x13, 0x01, 0x00, 0x06],
    [0x61, 0xa1, 0x8c, 0x80, 0x11, 0x1d, 0x31, 0x03, 0x00, 0x00, 0x06],
    [0xa4, 0x61, 0x4c, 0x00, 0xf3, 0x81, 0x73, 0x23, 0x01, 0x00, 0x04],
    // Ethnic
    [0x02, 0x07, 0x85, 0x03, 0xd2, 0xf2, 0x53, 0xf6, 0x00, 0x01, 0x00],
    [0x11, 0x13, 0x0c, 0x80, 0xa3, 0xa2, 0x11, 0xe5, 0x01, 0x00, 0x00],
    [0x11, 0x11, 0x06, 0x00, 0xf6, 0xf2, 0x41, 0xe6, 0x01, 0x02, 0x04],
    [0x93, 0x91, 0x91, 0x00, 0xd4, 0xeb, 0x32, 0x11, 0x00, 0x01, 0x08],
    [0x04, 0x01, 0x4f, 0x00, 0xfa, 0xc2, 0x56, 0x05, 0x00, 0x00, 0x0c],
    [0x21, 0x22, 0x49, 0x00, 0x7c, 0x6f, 0x20, 0x0c, 0x00, 0x01, 0x06],
    [0x31, 0x21, 0x85, 0x00, 0xdd, 0x56, 0x33, 0x16, 0x01, 0x00, 0x0a],
    [0x20, 0x21, 0x04, 0x81, 0xda, 0x8f, 0x05, 0x0b, 0x02, 0x00, 0x06],
    // Percussive
    [0x05, 0x03, 0x6a, 0x80, 0xf1, 0xc3, 0xe5, 0xe5, 0x00, 0x00, 0x06],
    [0x07, 0x02, 0x15, 0x00, 0xec, 0xf8, 0x26, 0x16, 0x00, 0x00, 0x0a],
    [0x05, 0x01, 0x9d, 0x00, 0x67, 0xdf, 0x35, 0x05, 0x00, 0x00, 0x08],
    [0x18, 0x12, 0x96, 0x00, 0xfa, 0xf8, 0x28, 0xe5, 0x00, 0x00, 0x0a],
    [0x10, 0x00, 0x86, 0x03, 0xa8, 0xfa, 0x07, 0x03, 0x00, 0x00, 0x06],
    [0x11, 0x10, 0x41, 0x03, 0xf8, 0xf3, 0x47, 0x03, 0x02, 0x00, 0x04],
    [0x01, 0x10, 0x8e, 0x00, 0xf1, 0xf3, 0x06, 0x02, 0x02, 0x00, 0x0e],
    [0x0e, 0xc0, 0x00, 0x00, 0x1f, 0x1f, 0x00, 0xff, 0x00, 0x03, 0x0e],
    // Sound effects
    [0x06, 0x03, 0x80, 0x00, 0xf8, 0x56, 0x24, 0x84, 0x02, 0x02, 0x0e],
    [0x0e, 0xd0, 0x00, 0x00, 0xf8, 0x34, 0x00, 0x04, 0x00, 0x03, 0x0e],
    [0x0e, 0xc0, 0x00, 0x00, 0xf6, 0x1f, 0x00, 0x02, 0x00, 0x03, 0x0e],
    [0xd5, 0xda, 0x95, 0x40, 0x37, 0x56, 0xa3, 0x37, 0x00, 0x00, 0x00],
    [0x35, 0x14, 0x5c, 0x08, 0xb2, 0xf4, 0x61, 0x15, 0x02, 0x00, 0x0a],
    [0x0e, 0xd0, 0x00, 0x05, 0xf8, 0x34, 0x00, 0x04, 0x00, 0x03, 0x0e],
    [0x26, 0xe4, 0x00, 0x00, 0xff, 0x12, 0x01, 0x16, 0x00, 0x01, 0x0e],
    [0x00, 0x00, 0x00, 0x00, 0xf3, 0xf6, 0xf0, 0xc9, 0x00, 0x02, 0x0e],
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_curve_is_monotonic_and_bounded() {
        let tab = &*VELOCITY_TABLE;
        assert_eq!(tab[0], 0);
        assert_eq!(tab[127], 127);
        for w in tab.windows(2) {
            assert!(w[0] <= w[1]);
        }
    }

    #[test]
    fn note_fnums_span_one_octave() {
        assert!(NOTE_FNUM[11] < 2 * NOTE_FNUM[0]);
        for w in NOTE_FNUM.windows(2) {
            assert!(w[0] < w[1]);
        }
    }
}
