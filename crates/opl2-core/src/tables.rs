//! Precomputed lookup tables shared by every chip instance.
//!
//! All tables are pure data, computed once on first use and then shared
//! read-only. The log-sine/exponent pair reproduces the attenuation
//! pipeline of the real YM3812: the sine ROM stores attenuation in units
//! of 1/256 of a power of two, the exponent ROM converts the summed
//! attenuation back to a linear 13-bit magnitude.

use std::sync::LazyLock;

/// Sine table resolution (entries per waveform period).
pub const SIN_BITS: u32 = 10;
/// Entries per waveform.
pub const SIN_LEN: usize = 1 << SIN_BITS;
/// Phase index mask.
pub const SIN_MASK: usize = SIN_LEN - 1;

/// Fixed-point fraction bits of the operator phase accumulator.
pub const FREQ_SH: u32 = 16;

/// Envelope attenuation range: 0 (loudest) ..= 511 (silent), 0.1875 dB/step.
pub const MAX_ATT_INDEX: i32 = 511;
/// Zero attenuation (full volume).
pub const MIN_ATT_INDEX: i32 = 0;

/// Attenuation level above which an operator output is treated as silence.
/// 384 steps = 72 dB; the exponent pipeline underflows to zero there anyway.
pub const ENV_QUIET: u32 = 384;

/// Entries in the amplitude-modulation (tremolo) triangle table.
pub const LFO_AM_LEN: usize = 210;
/// The AM LFO holds each table entry for this many chip ticks.
pub const LFO_AM_PERIOD: u32 = 64;
/// The vibrato LFO advances one step every this many chip ticks.
pub const LFO_PM_PERIOD: u32 = 1024;

/// Number of envelope increment patterns (rows of 8) in [`EG_INC`].
const EG_RATE_STEPS: usize = 8;

/// Envelope increment patterns. One row of 8 sub-steps per effective rate;
/// row 13 is the instant-attack row, row 14 never advances.
pub static EG_INC: [i32; 15 * EG_RATE_STEPS] = [
    // cycle:  0  1   2  3   4  5   6  7
    /* 0 */ 0, 1, 0, 1, 0, 1, 0, 1, // rates 00..12 0
    /* 1 */ 0, 1, 0, 1, 1, 1, 0, 1, // rates 00..12 1
    /* 2 */ 0, 1, 1, 1, 0, 1, 1, 1, // rates 00..12 2
    /* 3 */ 0, 1, 1, 1, 1, 1, 1, 1, // rates 00..12 3
    /* 4 */ 1, 1, 1, 1, 1, 1, 1, 1, // rate 13 0
    /* 5 */ 1, 1, 1, 2, 1, 1, 1, 2, // rate 13 1
    /* 6 */ 1, 2, 1, 2, 1, 2, 1, 2, // rate 13 2
    /* 7 */ 1, 2, 2, 2, 1, 2, 2, 2, // rate 13 3
    /* 8 */ 2, 2, 2, 2, 2, 2, 2, 2, // rate 14 0
    /* 9 */ 2, 2, 2, 4, 2, 2, 2, 4, // rate 14 1
    /* 10 */ 2, 4, 2, 4, 2, 4, 2, 4, // rate 14 2
    /* 11 */ 2, 4, 4, 4, 2, 4, 4, 4, // rate 14 3
    /* 12 */ 4, 4, 4, 4, 4, 4, 4, 4, // rates 15 0..3
    /* 13 */ 8, 8, 8, 8, 8, 8, 8, 8, // instant attack
    /* 14 */ 0, 0, 0, 0, 0, 0, 0, 0, // infinitely slow
];

/// Row offset into [`EG_INC`] for the instant-attack pattern.
pub const EG_SEL_INSTANT: usize = 13 * EG_RATE_STEPS;

/// Total entries of the rate tables: 16 zero rates, 64 real rates, 16
/// saturated rates (key-scaling can push the index past 16 + 63).
const EG_RATE_TABLE_LEN: usize = 16 + 64 + 16;

/// Per-rate row selector into [`EG_INC`] (premultiplied by 8).
pub static EG_RATE_SELECT: LazyLock<[usize; EG_RATE_TABLE_LEN]> = LazyLock::new(|| {
    let mut tab = [14 * EG_RATE_STEPS; EG_RATE_TABLE_LEN];
    for i in 0..64 {
        let rate = i / 4;
        let row = match rate {
            0..=12 => i % 4,
            13 => 4 + i % 4,
            14 => 8 + i % 4,
            _ => 12,
        };
        tab[16 + i] = row * EG_RATE_STEPS;
    }
    for entry in tab.iter_mut().skip(16 + 64) {
        *entry = 12 * EG_RATE_STEPS;
    }
    tab
});

/// Per-rate counter shift: the envelope only advances on ticks where
/// `eg_cnt & ((1 << shift) - 1) == 0`.
pub static EG_RATE_SHIFT: LazyLock<[u32; EG_RATE_TABLE_LEN]> = LazyLock::new(|| {
    let mut tab = [0u32; EG_RATE_TABLE_LEN];
    for i in 0..64 {
        let rate = i / 4;
        tab[16 + i] = if rate <= 12 { 12 - rate as u32 } else { 0 };
    }
    tab
});

/// Frequency multiplier table, doubled so that MULT=0 (x0.5) stays integral.
pub static MUL_TAB: [u32; 16] = [1, 2, 4, 6, 8, 10, 12, 14, 16, 18, 20, 20, 24, 24, 30, 30];

/// Subtraction base for the key-scale-level table, indexed by fnum bits 9..6.
static KSL_CREATE: [i32; 16] = [64, 32, 24, 19, 16, 12, 11, 10, 8, 6, 5, 4, 3, 2, 1, 0];

/// Key-scale-level base attenuation, indexed by `(block << 4) | fnum_msb`.
/// Values are envelope steps for the 6 dB/octave setting; the per-operator
/// KSL shift scales them down to 3 or 1.5 dB/octave.
pub static KSL_TAB: LazyLock<[u32; 8 * 16]> = LazyLock::new(|| {
    let mut tab = [0u32; 8 * 16];
    for block in 0..8i32 {
        for fnum in 0..16 {
            let base = (8 * block - KSL_CREATE[fnum]).max(0);
            tab[(block * 16) as usize + fnum] = (base * 4) as u32;
        }
    }
    tab
});

/// Right-shift applied to the KSL base per KSL register setting
/// (off, 3 dB/oct, 1.5 dB/oct, 6 dB/oct).
pub static KSL_SHIFT: [u32; 4] = [31, 1, 2, 0];

/// Attenuation value marking a muted sine-table entry (forces zero output).
const SIN_MUTE: u16 = 0x0fff;

/// Quarter-period log-sine ROM: 256 entries of attenuation in 1/256-of-a-
/// power-of-two units.
fn logsin_rom() -> [u16; 256] {
    let mut rom = [0u16; 256];
    for (n, entry) in rom.iter_mut().enumerate() {
        let x = (n as f64 + 0.5) * std::f64::consts::FRAC_PI_2 / 256.0;
        *entry = (-x.sin().log2() * 256.0).round() as u16;
    }
    rom
}

/// Exponent ROM: 256 entries of `2^(n/256) * 1024 - 1024`.
fn exp_rom() -> [u16; 256] {
    let mut rom = [0u16; 256];
    for (n, entry) in rom.iter_mut().enumerate() {
        let x = n as f64 / 256.0;
        *entry = (x.exp2() * 1024.0).round() as u16 - 1024;
    }
    rom
}

static EXP_TAB: LazyLock<[u16; 256]> = LazyLock::new(exp_rom);

/// Full sine tables for the four OPL2 waveforms. Each entry packs
/// `attenuation << 1 | sign`; muted half-periods carry [`SIN_MUTE`].
pub static SIN_TAB: LazyLock<[[u16; SIN_LEN]; 4]> = LazyLock::new(|| {
    let logsin = logsin_rom();
    let mut tab = [[0u16; SIN_LEN]; 4];

    // Waveform 0: full sine via quadrant mirroring.
    for i in 0..SIN_LEN {
        let quadrant = i >> 8;
        let idx = i & 0xff;
        let att = match quadrant {
            0 => logsin[idx],
            1 => logsin[255 - idx],
            2 => logsin[idx],
            _ => logsin[255 - idx],
        };
        let sign = (quadrant >= 2) as u16;
        tab[0][i] = (att << 1) | sign;
    }
    for i in 0..SIN_LEN {
        // Waveform 1: half sine, negative half muted.
        tab[1][i] = if i & 0x200 != 0 {
            SIN_MUTE << 1
        } else {
            tab[0][i]
        };
        // Waveform 2: absolute sine.
        tab[2][i] = tab[0][i & 0x1ff] & !1;
        // Waveform 3: quarter pulses, second and fourth quarters muted.
        tab[3][i] = if i & 0x100 != 0 {
            SIN_MUTE << 1
        } else {
            tab[0][i & 0xff] & !1
        };
    }
    tab
});

/// Convert a packed sine entry plus total envelope attenuation (0.1875 dB
/// steps) to a linear sample. Output range is roughly +-4084.
#[inline]
pub fn op_lookup(sin_entry: u16, env_att: u32) -> i32 {
    let att = (sin_entry >> 1) as u32 + (env_att << 3);
    let shift = att >> 8;
    if shift >= 16 {
        return 0;
    }
    let magnitude = (((EXP_TAB[(255 - (att & 0xff)) as usize] as i32) + 1024) << 1) >> shift;
    if sin_entry & 1 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Amplitude LFO triangle: 27 levels, 0..=26 envelope steps (4.875 dB deep),
/// laid out exactly as the hardware steps through them.
pub static LFO_AM_TAB: LazyLock<[u32; LFO_AM_LEN]> = LazyLock::new(|| {
    let mut tab = [0u32; LFO_AM_LEN];
    let mut pos = 0;
    for _ in 0..7 {
        tab[pos] = 0;
        pos += 1;
    }
    for level in 1..=25u32 {
        for _ in 0..4 {
            tab[pos] = level;
            pos += 1;
        }
    }
    for _ in 0..3 {
        tab[pos] = 26;
        pos += 1;
    }
    for level in (1..=25u32).rev() {
        for _ in 0..4 {
            tab[pos] = level;
            pos += 1;
        }
    }
    debug_assert_eq!(pos, LFO_AM_LEN);
    tab
});

/// Vibrato offsets added to the 13-bit block+fnum value. Eight rows indexed
/// by fnum bits 9..7, each row 8 LFO steps at normal depth followed by 8
/// steps at deep (DVB) depth.
#[rustfmt::skip]
pub static LFO_PM_TAB: [i32; 8 * 8 * 2] = [
    // fnum = 000xxxxxx
    0, 0, 0, 0, 0, 0, 0, 0,   0, 0, 0, 0, 0, 0, 0, 0,
    // fnum = 001xxxxxx
    0, 0, 0, 0, 0, 0, 0, 0,   1, 0, 0, 0, -1, 0, 0, 0,
    // fnum = 010xxxxxx
    1, 0, 0, 0, -1, 0, 0, 0,  2, 1, 0, -1, -2, -1, 0, 1,
    // fnum = 011xxxxxx
    1, 0, 0, 0, -1, 0, 0, 0,  3, 1, 0, -1, -3, -1, 0, 1,
    // fnum = 100xxxxxx
    2, 1, 0, -1, -2, -1, 0, 1,  4, 2, 0, -2, -4, -2, 0, 2,
    // fnum = 101xxxxxx
    2, 1, 0, -1, -2, -1, 0, 1,  5, 2, 0, -2, -5, -2, 0, 2,
    // fnum = 110xxxxxx
    3, 1, 0, -1, -3, -1, 0, 1,  6, 3, 0, -3, -6, -3, 0, 3,
    // fnum = 111xxxxxx
    3, 1, 0, -1, -3, -1, 0, 1,  7, 3, 0, -3, -7, -3, 0, 3,
];

/// Noise LFSR feedback taps (23-bit register, bit-0 feedback).
pub const NOISE_TAP_MASK: u32 = 0x0080_0302;

/// Slot index for each register offset in the 0x20..0x35 style operator
/// ranges; `None` marks the holes of the address map.
pub static SLOT_OFFSET: LazyLock<[Option<usize>; 32]> = LazyLock::new(|| {
    let mut tab = [None; 32];
    for (offset, slot) in [
        (0x00, 0), (0x01, 2), (0x02, 4), (0x03, 1), (0x04, 3), (0x05, 5),
        (0x08, 6), (0x09, 8), (0x0a, 10), (0x0b, 7), (0x0c, 9), (0x0d, 11),
        (0x10, 12), (0x11, 14), (0x12, 16), (0x13, 13), (0x14, 15), (0x15, 17),
    ] {
        tab[offset] = Some(slot);
    }
    tab
});
