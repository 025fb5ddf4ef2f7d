//! One of the nine two-operator channels.

use crate::operator::Operator;
use crate::tables::{ENV_QUIET, KSL_TAB, LFO_PM_TAB};

/// A melodic channel: modulator (slot 0) and carrier (slot 1) plus the
/// shared frequency state both operators derive their increments from.
#[derive(Debug, Clone, Default)]
pub struct Channel {
    /// The two operators; slot 0 carries the feedback loop.
    pub slots: [Operator; 2],
    /// Packed `(block << 10) | fnum`.
    pub block_fnum: u32,
    /// Phase increment base before the per-operator multiplier.
    freq_base: u32,
    /// Key-scale-level base attenuation for the current block/fnum.
    pub ksl_base: u32,
    /// Key code feeding rate key scaling.
    pub kcode: u32,
    /// CON bit: true = both operators feed the output directly.
    pub additive: bool,
}

impl Channel {
    /// Reset to power-on state.
    pub fn reset(&mut self) {
        *self = Channel::default();
    }

    /// Low 8 bits of fnum (register 0xA0 family).
    pub fn write_fnum_lo(&mut self, value: u8, note_select: bool) {
        self.block_fnum = (self.block_fnum & 0x1f00) | value as u32;
        self.recalc(note_select);
    }

    /// Block and fnum high bits (register 0xB0 family, key-on handled by
    /// the chip).
    pub fn write_block_fnum_hi(&mut self, value: u8, note_select: bool) {
        self.block_fnum = (self.block_fnum & 0x00ff) | (((value & 0x1f) as u32) << 8);
        self.recalc(note_select);
    }

    /// Feedback and connection (register 0xC0 family).
    pub fn write_fb_con(&mut self, value: u8) {
        let fb = ((value >> 1) & 7) as u32;
        self.slots[0].fb_shift = if fb != 0 { fb + 7 } else { 0 };
        self.additive = value & 0x01 != 0;
    }

    /// Recompute everything derived from block/fnum. The key code picks
    /// fnum bit 8 or 9 depending on the chip-wide note-select flag.
    pub fn recalc(&mut self, note_select: bool) {
        let block = (self.block_fnum >> 10) & 7;
        let fnum = self.block_fnum & 0x3ff;
        self.freq_base = (fnum << 11) >> (7 - block);
        self.ksl_base = KSL_TAB[(block * 16 + (fnum >> 6)) as usize];
        self.kcode = (self.block_fnum & 0x1c00) >> 9
            | if note_select {
                (self.block_fnum & 0x100) >> 8
            } else {
                (self.block_fnum & 0x200) >> 9
            };
        for slot in &mut self.slots {
            slot.update_frequency(self.freq_base);
            slot.update_total_level(self.ksl_base);
            slot.update_rates(self.kcode);
        }
    }

    /// Advance both phase accumulators for one tick. Vibrato re-derives the
    /// increment from the offset block/fnum instead of the cached one.
    pub fn advance_phases(&mut self, lfo_pm_step: usize, deep_vibrato: bool) {
        let row = ((self.block_fnum & 0x0380) >> 7) as usize * 16
            + if deep_vibrato { 8 } else { 0 };
        for slot in &mut self.slots {
            if slot.vibrato {
                let offset = LFO_PM_TAB[row + lfo_pm_step];
                if offset != 0 {
                    let bf = (self.block_fnum as i32 + offset) as u32;
                    let block = (bf >> 10) & 7;
                    let inc = (((bf & 0x3ff) << 11) >> (7 - block)) * slot.mul;
                    slot.phase_acc = slot.phase_acc.wrapping_add(inc);
                    continue;
                }
            }
            slot.phase_acc = slot.phase_acc.wrapping_add(slot.phase_inc);
        }
    }

    /// Compute the melodic output sample for this tick. Slot 0 runs its
    /// feedback loop; slot 1 is either phase-modulated by slot 0 or mixed
    /// with it, depending on the connection bit.
    pub fn tick_output(&mut self, lfo_am: u32) -> i32 {
        let fb_sum = self.slots[0].out[0] + self.slots[0].out[1];
        self.slots[0].out[0] = self.slots[0].out[1];

        let env0 = self.slots[0].attenuation(lfo_am);
        let out0 = if env0 < ENV_QUIET {
            let modulation = if self.slots[0].fb_shift != 0 {
                (fb_sum << self.slots[0].fb_shift) >> 16
            } else {
                0
            };
            self.slots[0].output(env0, modulation)
        } else {
            0
        };
        self.slots[0].out[1] = out0;

        let env1 = self.slots[1].attenuation(lfo_am);
        let carrier = if env1 < ENV_QUIET {
            let modulation = if self.additive { 0 } else { self.slots[0].out[0] };
            self.slots[1].output(env1, modulation)
        } else {
            0
        };
        if self.additive {
            carrier + self.slots[0].out[0]
        } else {
            carrier
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::KEY_MAIN;

    fn sounding_channel() -> Channel {
        let mut ch = Channel::default();
        for slot in &mut ch.slots {
            slot.write_am_vib(0x21, 0);
            slot.write_ar_dr(0xff);
            slot.write_sl_rr(0x0f);
            slot.write_ksl_tl(0x00, 0);
        }
        ch.write_fnum_lo(0x55, false);
        ch.write_block_fnum_hi(0x11, false); // block 4, fnum 0x155
        ch
    }

    #[test]
    fn raising_the_block_doubles_the_increment() {
        let mut ch = Channel::default();
        ch.slots[0].write_am_vib(0x01, 0); // mult 1
        ch.write_fnum_lo(0x00, false);
        ch.write_block_fnum_hi(0x09, false); // block 2, fnum 0x100
        let low = ch.slots[0].phase_inc;
        ch.write_block_fnum_hi(0x0d, false); // block 3, same fnum
        assert_eq!(ch.slots[0].phase_inc, low * 2);
    }

    #[test]
    fn key_code_follows_note_select() {
        let mut ch = Channel::default();
        ch.write_fnum_lo(0x00, false);
        ch.write_block_fnum_hi(0x12, false); // block 4, fnum bit 9 set
        assert_eq!(ch.kcode, (4 << 1) | 1);
        ch.recalc(true); // NTS looks at fnum bit 8 instead
        assert_eq!(ch.kcode, 4 << 1);
    }

    #[test]
    fn carrier_alone_is_silent_until_keyed() {
        let mut ch = sounding_channel();
        for _ in 0..64 {
            ch.advance_phases(0, false);
            assert_eq!(ch.tick_output(0), 0);
        }
        ch.slots[0].key_on(KEY_MAIN);
        ch.slots[1].key_on(KEY_MAIN);
        let mut heard = false;
        for eg_cnt in 0..4096u32 {
            ch.advance_phases(0, false);
            ch.slots[0].advance_envelope(eg_cnt);
            ch.slots[1].advance_envelope(eg_cnt);
            if ch.tick_output(0) != 0 {
                heard = true;
            }
        }
        assert!(heard);
    }

    #[test]
    fn additive_connection_mixes_both_operators() {
        let mut ch = sounding_channel();
        ch.write_fb_con(0x01);
        assert!(ch.additive);
        ch.write_fb_con(0x0e); // fb 7, FM connection
        assert!(!ch.additive);
        assert_eq!(ch.slots[0].fb_shift, 14);
        ch.write_fb_con(0x00);
        assert_eq!(ch.slots[0].fb_shift, 0);
    }
}
