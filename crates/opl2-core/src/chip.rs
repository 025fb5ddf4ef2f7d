//! The chip itself: register decode and the per-tick synthesis pipeline.

use bitflags::bitflags;

use crate::channel::Channel;
use crate::operator::{KEY_MAIN, KEY_RHYTHM};
use crate::tables::{
    LFO_AM_LEN, LFO_AM_PERIOD, LFO_AM_TAB, LFO_PM_PERIOD, NOISE_TAP_MASK, SLOT_OFFSET,
};

/// Master clock of the original sound cards, Hz.
pub const MASTER_CLOCK: u32 = 14_318_180;

/// Native synthesis rate: one sample per 288 master-clock cycles, ~49716 Hz.
pub const NATIVE_SAMPLE_RATE: u32 = 49_716;

bitflags! {
    /// Register 0xBD rhythm bits (depth bits live in the same register but
    /// are tracked separately).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Rhythm: u8 {
        /// Rhythm (percussion) mode enable.
        const ENABLED = 0x20;
        /// Bass drum key.
        const BASS_DRUM = 0x10;
        /// Snare drum key.
        const SNARE = 0x08;
        /// Tom-tom key.
        const TOM = 0x04;
        /// Top cymbal key.
        const CYMBAL = 0x02;
        /// Hi-hat key.
        const HI_HAT = 0x01;
    }
}

/// A Yamaha YM3812 (OPL2).
///
/// Pure numerical model: writes are applied with [`Opl2::write_register`]
/// and audio is pulled one sample at a time with [`Opl2::tick`]. Neither
/// operation can fail, and the same write/tick sequence from [`Opl2::reset`]
/// always produces bit-identical output.
#[derive(Debug, Clone)]
pub struct Opl2 {
    channels: [Channel; 9],

    rhythm: Rhythm,
    deep_tremolo: bool,
    deep_vibrato: bool,
    note_select: bool,
    /// CSM mode bit of register 0x08; stored for fidelity, never acted on.
    csm: bool,
    /// Waveform-select enable latch (register 0x01 bit 5).
    wavesel_enable: bool,

    eg_cnt: u32,
    lfo_am_pos: u32,
    lfo_am_timer: u32,
    lfo_pm_pos: u32,
    lfo_pm_timer: u32,
    noise_rng: u32,

    // Timer registers are bookkeeping only; no host timing source drives
    // them, so the status byte stays clear unless a caller models expiry.
    timer1: u8,
    timer2: u8,
    timer_ctrl: u8,
    status: u8,
}

impl Default for Opl2 {
    fn default() -> Self {
        Opl2 {
            channels: Default::default(),
            rhythm: Rhythm::empty(),
            deep_tremolo: false,
            deep_vibrato: false,
            note_select: false,
            csm: false,
            wavesel_enable: false,
            eg_cnt: 0,
            lfo_am_pos: 0,
            lfo_am_timer: 0,
            lfo_pm_pos: 0,
            lfo_pm_timer: 0,
            noise_rng: 1,
            timer1: 0,
            timer2: 0,
            timer_ctrl: 0,
            status: 0,
        }
    }
}

impl Opl2 {
    /// Create a chip in power-on state.
    pub fn new() -> Self {
        Opl2::default()
    }

    /// Return to power-on state.
    pub fn reset(&mut self) {
        *self = Opl2::default();
    }

    /// Status byte (IRQ and timer flags).
    pub fn read_status(&self) -> u8 {
        self.status
    }

    /// Whether rhythm (percussion) mode is active.
    pub fn rhythm_mode(&self) -> bool {
        self.rhythm.contains(Rhythm::ENABLED)
    }

    /// Apply one register write. Unknown or hole addresses are ignored.
    pub fn write_register(&mut self, reg: u8, value: u8) {
        match reg {
            0x01 => self.wavesel_enable = value & 0x20 != 0,
            0x02 => self.timer1 = value,
            0x03 => self.timer2 = value,
            0x04 => {
                if value & 0x80 != 0 {
                    self.status = 0;
                } else {
                    self.timer_ctrl = value;
                }
            }
            0x08 => {
                self.csm = value & 0x80 != 0;
                let nts = value & 0x40 != 0;
                if nts != self.note_select {
                    self.note_select = nts;
                    for ch in &mut self.channels {
                        ch.recalc(nts);
                    }
                }
            }
            0x20..=0x35 => {
                if let Some(slot) = SLOT_OFFSET[(reg - 0x20) as usize] {
                    let nts = self.note_select;
                    let ch = &mut self.channels[slot / 2];
                    let kcode = ch.kcode;
                    ch.slots[slot % 2].write_am_vib(value, kcode);
                    // The multiplier may have changed.
                    ch.recalc(nts);
                }
            }
            0x40..=0x55 => {
                if let Some(slot) = SLOT_OFFSET[(reg - 0x40) as usize] {
                    let ch = &mut self.channels[slot / 2];
                    let ksl_base = ch.ksl_base;
                    ch.slots[slot % 2].write_ksl_tl(value, ksl_base);
                }
            }
            0x60..=0x75 => {
                if let Some(slot) = SLOT_OFFSET[(reg - 0x60) as usize] {
                    self.channels[slot / 2].slots[slot % 2].write_ar_dr(value);
                }
            }
            0x80..=0x95 => {
                if let Some(slot) = SLOT_OFFSET[(reg - 0x80) as usize] {
                    self.channels[slot / 2].slots[slot % 2].write_sl_rr(value);
                }
            }
            0xa0..=0xa8 => {
                self.channels[(reg - 0xa0) as usize].write_fnum_lo(value, self.note_select);
            }
            0xb0..=0xb8 => {
                let ch = &mut self.channels[(reg - 0xb0) as usize];
                ch.write_block_fnum_hi(value, self.note_select);
                if value & 0x20 != 0 {
                    for slot in &mut ch.slots {
                        slot.key_on(KEY_MAIN);
                    }
                } else {
                    for slot in &mut ch.slots {
                        slot.key_off(KEY_MAIN);
                    }
                }
            }
            0xbd => self.write_rhythm(value),
            0xc0..=0xc8 => {
                self.channels[(reg - 0xc0) as usize].write_fb_con(value);
            }
            0xe0..=0xf5 => {
                // Silent no-op while the enable latch is clear.
                if self.wavesel_enable {
                    if let Some(slot) = SLOT_OFFSET[(reg - 0xe0) as usize] {
                        self.channels[slot / 2].slots[slot % 2].write_waveform(value);
                    }
                }
            }
            _ => {}
        }
    }

    fn write_rhythm(&mut self, value: u8) {
        self.deep_tremolo = value & 0x80 != 0;
        self.deep_vibrato = value & 0x40 != 0;
        let rhythm = Rhythm::from_bits_truncate(value & 0x3f);

        if rhythm.contains(Rhythm::ENABLED) {
            let keys = [
                (Rhythm::BASS_DRUM, 6, 0),
                (Rhythm::BASS_DRUM, 6, 1),
                (Rhythm::HI_HAT, 7, 0),
                (Rhythm::SNARE, 7, 1),
                (Rhythm::TOM, 8, 0),
                (Rhythm::CYMBAL, 8, 1),
            ];
            for (bit, ch, slot) in keys {
                if rhythm.contains(bit) {
                    self.channels[ch].slots[slot].key_on(KEY_RHYTHM);
                } else {
                    self.channels[ch].slots[slot].key_off(KEY_RHYTHM);
                }
            }
        } else {
            for ch in 6..9 {
                for slot in &mut self.channels[ch].slots {
                    slot.key_off(KEY_RHYTHM);
                }
            }
        }
        self.rhythm = rhythm;
    }

    fn advance_lfo(&mut self) {
        self.lfo_am_timer += 1;
        if self.lfo_am_timer >= LFO_AM_PERIOD {
            self.lfo_am_timer = 0;
            self.lfo_am_pos += 1;
            if self.lfo_am_pos >= LFO_AM_LEN as u32 {
                self.lfo_am_pos = 0;
            }
        }
        self.lfo_pm_timer += 1;
        if self.lfo_pm_timer >= LFO_PM_PERIOD {
            self.lfo_pm_timer = 0;
            self.lfo_pm_pos = (self.lfo_pm_pos + 1) & 7;
        }
    }

    fn advance_noise(&mut self) {
        if self.noise_rng & 1 != 0 {
            self.noise_rng ^= NOISE_TAP_MASK;
        }
        self.noise_rng >>= 1;
    }

    /// Advance the chip by one sample period and return the sample pair
    /// (the YM3812 is mono; both sides carry the same value).
    pub fn tick(&mut self) -> (i16, i16) {
        self.advance_lfo();

        let am = LFO_AM_TAB[self.lfo_am_pos as usize];
        let lfo_am = if self.deep_tremolo { am } else { am >> 2 };
        let lfo_pm_step = self.lfo_pm_pos as usize;
        let deep_vibrato = self.deep_vibrato;

        self.eg_cnt = self.eg_cnt.wrapping_add(1);
        for ch in &mut self.channels {
            for slot in &mut ch.slots {
                slot.advance_envelope(self.eg_cnt);
            }
            ch.advance_phases(lfo_pm_step, deep_vibrato);
        }

        let mut output: i32 = 0;
        let rhythm_on = self.rhythm.contains(Rhythm::ENABLED);
        let melodic = if rhythm_on { 6 } else { 9 };
        for ch in &mut self.channels[..melodic] {
            output += ch.tick_output(lfo_am);
        }
        if rhythm_on {
            let noise_bit = self.noise_rng & 1;
            output += crate::rhythm::rhythm_output(&mut self.channels, lfo_am, noise_bit);
        }
        self.advance_noise();

        let sample = output.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        (sample, sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::EnvelopePhase;

    /// Program channel 0 with a loud, fast-attack two-op voice and key it.
    fn setup_voice(chip: &mut Opl2) {
        for (reg, value) in [
            (0x20, 0x21), // modulator: sustaining, mult 1
            (0x23, 0x21), // carrier: sustaining, mult 1
            (0x40, 0x10),
            (0x43, 0x00), // full carrier volume
            (0x60, 0xf4),
            (0x63, 0xf4),
            (0x80, 0x7f),
            (0x83, 0x7f),
            (0xa0, 0x55),
            (0xb0, 0x31), // key on, block 4, fnum 0x155
        ] {
            chip.write_register(reg, value);
        }
    }

    fn render(chip: &mut Opl2, n: usize) -> Vec<i16> {
        (0..n).map(|_| chip.tick().0).collect()
    }

    #[test]
    fn fresh_chip_is_silent() {
        let mut chip = Opl2::new();
        assert!(render(&mut chip, 1024).iter().all(|&s| s == 0));
    }

    #[test]
    fn keyed_voice_produces_audio() {
        let mut chip = Opl2::new();
        setup_voice(&mut chip);
        assert!(render(&mut chip, 4096).iter().any(|&s| s != 0));
    }

    #[test]
    fn same_writes_produce_identical_samples() {
        let mut a = Opl2::new();
        let mut b = Opl2::new();
        setup_voice(&mut a);
        setup_voice(&mut b);
        assert_eq!(render(&mut a, 8192), render(&mut b, 8192));
    }

    #[test]
    fn reset_restores_power_on_output() {
        let mut chip = Opl2::new();
        setup_voice(&mut chip);
        render(&mut chip, 4096);
        chip.reset();
        let mut fresh = Opl2::new();
        setup_voice(&mut chip);
        setup_voice(&mut fresh);
        assert_eq!(render(&mut chip, 4096), render(&mut fresh, 4096));
    }

    #[test]
    fn waveform_select_requires_enable_latch() {
        let mut chip = Opl2::new();
        chip.write_register(0xe0, 0x02);
        assert_eq!(chip.channels[0].slots[0].waveform, 0);
        chip.write_register(0x01, 0x20);
        chip.write_register(0xe0, 0x02);
        assert_eq!(chip.channels[0].slots[0].waveform, 2);
        // Clearing the latch silences further writes but keeps the selection.
        chip.write_register(0x01, 0x00);
        chip.write_register(0xe0, 0x03);
        assert_eq!(chip.channels[0].slots[0].waveform, 2);
    }

    #[test]
    fn key_on_bit_drives_both_operators() {
        let mut chip = Opl2::new();
        setup_voice(&mut chip);
        assert_eq!(chip.channels[0].slots[0].phase, EnvelopePhase::Attack);
        assert_eq!(chip.channels[0].slots[1].phase, EnvelopePhase::Attack);
        chip.write_register(0xb0, 0x11); // same block/fnum, key off
        assert_eq!(chip.channels[0].slots[0].phase, EnvelopePhase::Release);
        assert_eq!(chip.channels[0].slots[1].phase, EnvelopePhase::Release);
    }

    #[test]
    fn rhythm_register_keys_percussion_slots() {
        let mut chip = Opl2::new();
        chip.write_register(0xbd, 0x3f);
        assert!(chip.rhythm_mode());
        for (ch, slot) in [(6, 0), (6, 1), (7, 0), (7, 1), (8, 0), (8, 1)] {
            assert!(chip.channels[ch].slots[slot].keyed(), "ch{ch} slot{slot}");
        }
        // Dropping individual key bits releases just those voices.
        chip.write_register(0xbd, 0x30); // rhythm on, only bass drum
        assert!(chip.channels[6].slots[0].keyed());
        assert!(!chip.channels[7].slots[0].keyed());
        // Disabling rhythm mode releases everything.
        chip.write_register(0xbd, 0x00);
        assert!(!chip.rhythm_mode());
        for ch in 6..9 {
            for slot in 0..2 {
                assert!(!chip.channels[ch].slots[slot].keyed());
            }
        }
    }

    #[test]
    fn melodic_key_on_survives_rhythm_toggle() {
        let mut chip = Opl2::new();
        setup_voice(&mut chip);
        chip.write_register(0xbd, 0x20);
        chip.write_register(0xbd, 0x00);
        assert!(chip.channels[0].slots[0].keyed());
    }

    #[test]
    fn timer_status_reset_clears_flags() {
        let mut chip = Opl2::new();
        chip.write_register(0x02, 0x40);
        chip.write_register(0x03, 0x80);
        chip.write_register(0x04, 0x03);
        chip.write_register(0x04, 0x80);
        assert_eq!(chip.read_status(), 0);
    }
}
