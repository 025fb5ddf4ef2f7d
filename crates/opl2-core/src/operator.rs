//! Single FM operator: phase generator plus envelope generator.

use crate::tables::{
    EG_RATE_SELECT, EG_RATE_SHIFT, EG_SEL_INSTANT, EG_INC, KSL_SHIFT, MAX_ATT_INDEX,
    MIN_ATT_INDEX, MUL_TAB, SIN_TAB, op_lookup,
};

/// Envelope generator phase. Transitions are strictly monotonic for one
/// note instance; a new key-on restarts at [`EnvelopePhase::Attack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopePhase {
    /// Attenuation falling toward zero.
    Attack,
    /// Attenuation rising toward the sustain level.
    Decay,
    /// Held at the sustain level (sustaining mode) or still decaying
    /// toward silence (percussive mode).
    Sustain,
    /// Attenuation rising toward silence after key-off.
    Release,
    /// Idle at maximum attenuation.
    #[default]
    Off,
}

/// Key-on source bits: bit 0 is the channel key-on register, bit 1 the
/// rhythm-mode percussion key. Both must clear before release starts.
pub const KEY_MAIN: u8 = 0x01;
/// Rhythm-mode percussion key bit.
pub const KEY_RHYTHM: u8 = 0x02;

/// One of the chip's 18 operators (2 per channel).
#[derive(Debug, Clone)]
pub struct Operator {
    /// Current envelope phase.
    pub phase: EnvelopePhase,
    /// Envelope attenuation, 0 (loud) ..= 511 (silent).
    pub volume: i32,
    /// Phase accumulator (16.16 fixed point over the 10-bit sine index).
    pub phase_acc: u32,
    /// Per-tick phase increment without vibrato.
    pub phase_inc: u32,

    /// Total level + key-scale-level attenuation, envelope steps.
    pub tll: u32,
    /// Sustain level in envelope steps.
    pub sustain_level: i32,

    // Raw rate register values, pre-offset (16 + rate * 4, or 0 when the
    // register nibble is zero and the phase never advances).
    ar: u32,
    dr: u32,
    rr: u32,
    /// Effective key-scaling value added to the rate index.
    ksr_val: u32,

    // Resolved (shift, select) pairs per envelope phase.
    eg_sh_ar: u32,
    eg_sel_ar: usize,
    eg_sh_dr: u32,
    eg_sel_dr: usize,
    eg_sh_rr: u32,
    eg_sel_rr: usize,

    /// Feedback history: two prior outputs of this operator (slot 1 only).
    pub out: [i32; 2],
    /// Feedback shift (0 = feedback disabled), applied as `sum << fb_shift`.
    pub fb_shift: u32,

    /// Selected waveform 0..=3.
    pub waveform: usize,
    /// Key-on bit set (register 0x20 bit 5): hold at sustain level.
    pub sustaining: bool,
    /// KSR flag: key code feeds rates unshifted.
    pub ksr: bool,
    /// Vibrato enable.
    pub vibrato: bool,
    /// Tremolo (amplitude LFO) enable.
    pub tremolo: bool,
    /// Frequency multiplier (doubled, from [`MUL_TAB`]).
    pub mul: u32,
    /// KSL shift selecting 0/3/1.5/6 dB per octave.
    ksl_shift: u32,
    /// Total-level register contribution in envelope steps.
    total_level: u32,

    /// Active key-on source bits.
    key: u8,
}

impl Default for Operator {
    fn default() -> Self {
        Operator {
            phase: EnvelopePhase::Off,
            volume: MAX_ATT_INDEX,
            phase_acc: 0,
            phase_inc: 0,
            tll: 0,
            sustain_level: MAX_ATT_INDEX,
            ar: 0,
            dr: 0,
            rr: 0,
            ksr_val: 0,
            eg_sh_ar: 0,
            eg_sel_ar: 14 * 8,
            eg_sh_dr: 0,
            eg_sel_dr: 14 * 8,
            eg_sh_rr: 0,
            eg_sel_rr: 14 * 8,
            out: [0; 2],
            fb_shift: 0,
            waveform: 0,
            sustaining: false,
            ksr: false,
            vibrato: false,
            tremolo: false,
            mul: MUL_TAB[0],
            ksl_shift: KSL_SHIFT[0],
            total_level: 0,
            key: 0,
        }
    }
}

impl Operator {
    /// Reset to power-on state.
    pub fn reset(&mut self) {
        *self = Operator::default();
    }

    /// Key the operator on from the given source. The phase generator and
    /// envelope restart only on the first source bit.
    pub fn key_on(&mut self, mask: u8) {
        if self.key == 0 {
            self.phase_acc = 0;
            self.phase = EnvelopePhase::Attack;
        }
        self.key |= mask;
    }

    /// Release the given key source; enters Release once no source holds.
    pub fn key_off(&mut self, mask: u8) {
        self.key &= !mask;
        if self.key == 0 && self.phase != EnvelopePhase::Off {
            self.phase = EnvelopePhase::Release;
        }
    }

    /// Whether any key source currently holds this operator.
    pub fn keyed(&self) -> bool {
        self.key != 0
    }

    /// Apply register 0x20 family: AM/VIB/EGT/KSR/MULT.
    pub fn write_am_vib(&mut self, value: u8, kcode: u32) {
        self.tremolo = value & 0x80 != 0;
        self.vibrato = value & 0x40 != 0;
        self.sustaining = value & 0x20 != 0;
        self.ksr = value & 0x10 != 0;
        self.mul = MUL_TAB[(value & 0x0f) as usize];
        self.update_rates(kcode);
    }

    /// Apply register 0x40 family: KSL/TL.
    pub fn write_ksl_tl(&mut self, value: u8, ksl_base: u32) {
        self.ksl_shift = KSL_SHIFT[(value >> 6) as usize];
        self.total_level = ((value & 0x3f) as u32) << 2;
        self.update_total_level(ksl_base);
    }

    /// Apply register 0x60 family: AR/DR.
    pub fn write_ar_dr(&mut self, value: u8) {
        let ar = (value >> 4) as u32;
        self.ar = if ar != 0 { 16 + (ar << 2) } else { 0 };
        let dr = (value & 0x0f) as u32;
        self.dr = if dr != 0 { 16 + (dr << 2) } else { 0 };
        self.refresh_eg();
    }

    /// Apply register 0x80 family: SL/RR.
    pub fn write_sl_rr(&mut self, value: u8) {
        let mut sl = (value >> 4) as i32;
        if sl == 15 {
            sl = 31;
        }
        self.sustain_level = sl << 4;
        let rr = (value & 0x0f) as u32;
        self.rr = if rr != 0 { 16 + (rr << 2) } else { 0 };
        self.refresh_eg();
    }

    /// Apply register 0xE0 family: waveform select (already gated by the
    /// chip-wide enable latch).
    pub fn write_waveform(&mut self, value: u8) {
        self.waveform = (value & 0x03) as usize;
    }

    /// Recompute the key-scaling value and dependent rate pairs after a
    /// key-code change.
    pub fn update_rates(&mut self, kcode: u32) {
        let ksr_val = if self.ksr { kcode } else { kcode >> 2 };
        if ksr_val != self.ksr_val {
            self.ksr_val = ksr_val;
        }
        self.refresh_eg();
    }

    /// Recombine TL with the channel's key-scale-level base.
    pub fn update_total_level(&mut self, ksl_base: u32) {
        self.tll = self.total_level + (ksl_base >> self.ksl_shift);
    }

    /// Recompute phase increment from the channel frequency base.
    pub fn update_frequency(&mut self, freq_base: u32) {
        self.phase_inc = freq_base * self.mul;
    }

    fn refresh_eg(&mut self) {
        if self.ar + self.ksr_val < 16 + 62 {
            self.eg_sh_ar = EG_RATE_SHIFT[(self.ar + self.ksr_val) as usize];
            self.eg_sel_ar = EG_RATE_SELECT[(self.ar + self.ksr_val) as usize];
        } else {
            self.eg_sh_ar = 0;
            self.eg_sel_ar = EG_SEL_INSTANT;
        }
        self.eg_sh_dr = EG_RATE_SHIFT[(self.dr + self.ksr_val) as usize];
        self.eg_sel_dr = EG_RATE_SELECT[(self.dr + self.ksr_val) as usize];
        self.eg_sh_rr = EG_RATE_SHIFT[(self.rr + self.ksr_val) as usize];
        self.eg_sel_rr = EG_RATE_SELECT[(self.rr + self.ksr_val) as usize];
    }

    /// Advance the envelope by one tick of the shared envelope counter.
    pub fn advance_envelope(&mut self, eg_cnt: u32) {
        match self.phase {
            EnvelopePhase::Attack => {
                if eg_cnt & ((1 << self.eg_sh_ar) - 1) == 0 {
                    let inc = EG_INC[self.eg_sel_ar + ((eg_cnt >> self.eg_sh_ar) & 7) as usize];
                    self.volume += (!self.volume * inc) >> 3;
                    if self.volume <= MIN_ATT_INDEX {
                        self.volume = MIN_ATT_INDEX;
                        self.phase = EnvelopePhase::Decay;
                    }
                }
            }
            EnvelopePhase::Decay => {
                if eg_cnt & ((1 << self.eg_sh_dr) - 1) == 0 {
                    self.volume +=
                        EG_INC[self.eg_sel_dr + ((eg_cnt >> self.eg_sh_dr) & 7) as usize];
                    if self.volume >= self.sustain_level {
                        self.phase = EnvelopePhase::Sustain;
                    }
                }
            }
            EnvelopePhase::Sustain => {
                // Sustaining operators hold; percussive ones keep decaying
                // at the release rate toward the floor.
                if !self.sustaining && eg_cnt & ((1 << self.eg_sh_rr) - 1) == 0 {
                    self.volume +=
                        EG_INC[self.eg_sel_rr + ((eg_cnt >> self.eg_sh_rr) & 7) as usize];
                    if self.volume >= MAX_ATT_INDEX {
                        self.volume = MAX_ATT_INDEX;
                    }
                }
            }
            EnvelopePhase::Release => {
                if eg_cnt & ((1 << self.eg_sh_rr) - 1) == 0 {
                    self.volume +=
                        EG_INC[self.eg_sel_rr + ((eg_cnt >> self.eg_sh_rr) & 7) as usize];
                    if self.volume >= MAX_ATT_INDEX {
                        self.volume = MAX_ATT_INDEX;
                        self.phase = EnvelopePhase::Off;
                    }
                }
            }
            EnvelopePhase::Off => {}
        }
    }

    /// Total attenuation including tremolo, saturated to the silent range.
    #[inline]
    pub fn attenuation(&self, lfo_am: u32) -> u32 {
        let am = if self.tremolo { lfo_am } else { 0 };
        (self.volume as u32) + self.tll + am
    }

    /// Compute one sample with external phase modulation (sine-index units).
    #[inline]
    pub fn output(&self, env_att: u32, modulation: i32) -> i32 {
        let idx = ((self.phase_acc >> crate::tables::FREQ_SH) as i32 + modulation) as usize
            & crate::tables::SIN_MASK;
        op_lookup(SIN_TAB[self.waveform][idx], env_att)
    }

    /// Compute one sample at an explicit sine-table phase (rhythm voices).
    #[inline]
    pub fn output_at(&self, phase_index: u32, env_att: u32) -> i32 {
        op_lookup(
            SIN_TAB[self.waveform][phase_index as usize & crate::tables::SIN_MASK],
            env_att,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed_operator() -> Operator {
        let mut op = Operator::default();
        op.write_am_vib(0x21, 0); // sustaining, mult 1
        op.write_ar_dr(0xf4);
        op.write_sl_rr(0x7f);
        op.key_on(KEY_MAIN);
        op
    }

    #[test]
    fn key_on_restarts_attack_from_any_phase() {
        let mut op = keyed_operator();
        op.phase = EnvelopePhase::Release;
        op.key_off(KEY_MAIN);
        op.key_on(KEY_MAIN);
        assert_eq!(op.phase, EnvelopePhase::Attack);
        assert_eq!(op.phase_acc, 0);
    }

    #[test]
    fn second_key_source_does_not_restart_phase() {
        let mut op = keyed_operator();
        op.phase_acc = 0x1234;
        op.phase = EnvelopePhase::Decay;
        op.key_on(KEY_RHYTHM);
        assert_eq!(op.phase, EnvelopePhase::Decay);
        assert_eq!(op.phase_acc, 0x1234);
    }

    #[test]
    fn release_only_after_all_key_sources_clear() {
        let mut op = keyed_operator();
        op.key_on(KEY_RHYTHM);
        op.key_off(KEY_MAIN);
        assert_ne!(op.phase, EnvelopePhase::Release);
        op.key_off(KEY_RHYTHM);
        assert_eq!(op.phase, EnvelopePhase::Release);
    }

    #[test]
    fn envelope_progresses_monotonically() {
        let mut op = keyed_operator();
        let mut seen = vec![op.phase];
        for eg_cnt in 1..200_000u32 {
            op.advance_envelope(eg_cnt);
            if *seen.last().unwrap() != op.phase {
                seen.push(op.phase);
            }
            if op.phase == EnvelopePhase::Sustain {
                break;
            }
        }
        assert_eq!(
            seen,
            vec![
                EnvelopePhase::Attack,
                EnvelopePhase::Decay,
                EnvelopePhase::Sustain
            ]
        );
        op.key_off(KEY_MAIN);
        for eg_cnt in 0..4_000_000u32 {
            op.advance_envelope(eg_cnt);
            if op.phase == EnvelopePhase::Off {
                break;
            }
        }
        assert_eq!(op.phase, EnvelopePhase::Off);
        assert_eq!(op.volume, MAX_ATT_INDEX);
    }

    #[test]
    fn zero_rate_nibbles_freeze_the_envelope() {
        let mut op = Operator::default();
        op.write_ar_dr(0x00);
        op.key_on(KEY_MAIN);
        for eg_cnt in 0..100_000u32 {
            op.advance_envelope(eg_cnt);
        }
        // Attack rate 0 never leaves maximum attenuation.
        assert_eq!(op.phase, EnvelopePhase::Attack);
        assert_eq!(op.volume, MAX_ATT_INDEX);
    }
}
