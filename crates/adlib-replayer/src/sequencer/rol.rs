//! AdLib Visual Composer (ROL) decoder.
//!
//! A ROL file carries eleven voices, each with four independently timed
//! event lists: notes, instrument (timbre) changes, volume multipliers and
//! pitch bends. Instruments live in an external BNK bank referenced by
//! name. Section counts in the file are not trustworthy, so the loader
//! re-scans for the next section's marker text instead of believing them
//! blindly.

use std::sync::LazyLock;

use opl2::Opl2;

use crate::io::ByteReader;
use crate::sequencer::bank::{BnkInstrument, InstrumentBank};
use crate::sequencer::Sequencer;
use crate::{ReplayerError, Result};

use crate::sequencer::MOD_OFFSET;

const VOICES: usize = 11;

/// Pitch resolution: 25 fnum steps per semitone, one octave per table row.
const STEPS_PER_SEMITONE: i32 = 25;
const STEPS_PER_OCTAVE: i32 = 12 * STEPS_PER_SEMITONE;

/// fnum for each 1/25th-of-a-semitone step across one octave, anchored at C.
static PITCH_FNUM: LazyLock<[u16; STEPS_PER_OCTAVE as usize]> = LazyLock::new(|| {
    let mut tab = [0u16; STEPS_PER_OCTAVE as usize];
    for (k, entry) in tab.iter_mut().enumerate() {
        let fnum = 342.0 * (k as f64 / STEPS_PER_OCTAVE as f64).exp2();
        *entry = fnum.round() as u16;
    }
    tab
});

#[derive(Debug, Clone, Copy)]
struct NoteEvent {
    /// 0 = rest, otherwise semitone number (12 = lowest C).
    note: u16,
    duration: u16,
}

#[derive(Debug, Clone)]
struct TimbreEvent {
    tick: u16,
    name: String,
}

#[derive(Debug, Clone, Copy)]
struct VolumeEvent {
    tick: u16,
    multiplier: f32,
}

#[derive(Debug, Clone, Copy)]
struct PitchEvent {
    tick: u16,
    variation: f32,
}

#[derive(Debug, Clone, Copy)]
struct TempoEvent {
    tick: u16,
    multiplier: f32,
}

#[derive(Debug, Clone, Default)]
struct VoiceTrack {
    notes: Vec<NoteEvent>,
    timbres: Vec<TimbreEvent>,
    volumes: Vec<VolumeEvent>,
    pitches: Vec<PitchEvent>,

    note_idx: usize,
    ticks_left: u16,
    current_note: u16,
    timbre_idx: usize,
    volume_idx: usize,
    pitch_idx: usize,
    volume: f32,
    bend_steps: i32,
    instrument: Option<BnkInstrument>,
}

impl VoiceTrack {
    fn reset_cursors(&mut self) {
        self.note_idx = 0;
        self.ticks_left = 0;
        self.current_note = 0;
        self.timbre_idx = 0;
        self.volume_idx = 0;
        self.pitch_idx = 0;
        self.volume = 1.0;
        self.bend_steps = 0;
        self.instrument = None;
    }
}

/// Event-track sequencer for ROL files with an external BNK bank.
#[derive(Debug)]
pub struct RolSequencer {
    voices: Vec<VoiceTrack>,
    bank: InstrumentBank,
    ticks_per_beat: u16,
    basic_tempo: f32,
    tempo_events: Vec<TempoEvent>,
    tempo_idx: usize,
    current_tempo: f32,
    /// Header mode byte 0: voices 6..=10 drive the five percussion voices.
    percussive: bool,
    tick: usize,
    total_ticks: usize,
    /// Cached register 0xBD image for percussion keying.
    bd_state: u8,
}

impl RolSequencer {
    /// Version probe: ROL files start with version 0.4.
    pub fn probe(data: &[u8]) -> bool {
        data.len() >= 4
            && u16::from_le_bytes([data[0], data[1]]) == 0
            && u16::from_le_bytes([data[2], data[3]]) == 4
    }

    /// Parse the file and resolve every referenced instrument against the
    /// companion bank, so resource errors surface at load time.
    pub fn load(data: &[u8], companion: Option<&[u8]>) -> Result<Self> {
        let bank_data = companion.ok_or(ReplayerError::MissingBank)?;
        let mut bank = InstrumentBank::load(bank_data)?;

        let mut r = ByteReader::new(data);
        let version_major = r.read_u16()?;
        let version_minor = r.read_u16()?;
        if version_major != 0 || version_minor != 4 {
            return Err(ReplayerError::Malformed(format!(
                "unsupported ROL version {version_major}.{version_minor}"
            )));
        }
        r.skip(40)?; // comment
        let ticks_per_beat = r.read_u16()?;
        let _beats_per_measure = r.read_u16()?;
        r.skip(4)?; // editor scale
        r.skip(1)?;
        let percussive = r.read_u8()? == 0;
        r.skip(90 + 38 + 15)?; // editor state, filler
        let basic_tempo = r.read_f32()?;
        if !(basic_tempo.is_finite() && basic_tempo > 0.0) {
            return Err(ReplayerError::Malformed("bad ROL tempo".into()));
        }

        let tempo_count = r.read_u16()? as usize;
        let mut tempo_events = Vec::with_capacity(tempo_count);
        for _ in 0..tempo_count {
            if marker_at(&r) {
                break;
            }
            let tick = r.read_u16()?;
            let multiplier = r.read_f32()?;
            tempo_events.push(TempoEvent { tick, multiplier });
        }

        let mut voices = Vec::with_capacity(VOICES);
        for _ in 0..VOICES {
            voices.push(load_voice(&mut r)?);
        }

        // Touch every referenced instrument now; the bank caches by record
        // index, so playback lookups never fail.
        for voice in &voices {
            for timbre in &voice.timbres {
                bank.lookup(&timbre.name)?;
            }
        }

        let total_ticks = voices
            .iter()
            .map(|v| v.notes.iter().map(|n| n.duration as usize).sum::<usize>())
            .max()
            .unwrap_or(0);

        Ok(RolSequencer {
            voices,
            bank,
            ticks_per_beat: ticks_per_beat.max(1),
            basic_tempo,
            tempo_events,
            tempo_idx: 0,
            current_tempo: basic_tempo,
            percussive,
            tick: 0,
            total_ticks,
            bd_state: 0,
        })
    }

    /// Channel driven by a voice index; percussion voices all live on
    /// channels 6..=8.
    fn voice_channel(&self, voice: usize) -> u8 {
        if self.percussive && voice >= 6 {
            match voice {
                6 => 6,         // bass drum
                7 | 10 => 7,    // snare, hi-hat
                _ => 8,         // tom, cymbal
            }
        } else {
            voice as u8
        }
    }

    /// Register 0xBD key bit for a percussive voice, if any.
    fn voice_bd_bit(&self, voice: usize) -> Option<u8> {
        if !self.percussive {
            return None;
        }
        match voice {
            6 => Some(0x10),
            7 => Some(0x08),
            8 => Some(0x04),
            9 => Some(0x02),
            10 => Some(0x01),
            _ => None,
        }
    }

    fn write_instrument(&self, chip: &mut Opl2, voice: usize, ins: &BnkInstrument) {
        let ch = self.voice_channel(voice) as usize;
        let m = MOD_OFFSET[ch];
        let c = m + 3;
        match (self.percussive, voice) {
            // Melodic voices and the two-operator bass drum take the full
            // parameter set.
            (false, _) | (true, 0..=6) => {
                chip.write_register(0x20 + m, ins.modulator.reg20());
                chip.write_register(0x40 + m, ins.modulator.reg40());
                chip.write_register(0x60 + m, ins.modulator.reg60());
                chip.write_register(0x80 + m, ins.modulator.reg80());
                chip.write_register(0xe0 + m, ins.mod_wave & 3);
                chip.write_register(0x20 + c, ins.carrier.reg20());
                chip.write_register(0x40 + c, ins.carrier.reg40());
                chip.write_register(0x60 + c, ins.carrier.reg60());
                chip.write_register(0x80 + c, ins.carrier.reg80());
                chip.write_register(0xe0 + c, ins.car_wave & 3);
                chip.write_register(0xc0 + ch as u8, ins.reg_c0());
            }
            // Single-operator percussion: snare and cymbal sound on the
            // carrier slot, tom and hi-hat on the modulator slot. The
            // instrument's first operator block supplies the parameters.
            (true, v) => {
                let slot = if v == 7 || v == 9 { c } else { m };
                chip.write_register(0x20 + slot, ins.modulator.reg20());
                chip.write_register(0x40 + slot, ins.modulator.reg40());
                chip.write_register(0x60 + slot, ins.modulator.reg60());
                chip.write_register(0x80 + slot, ins.modulator.reg80());
                chip.write_register(0xe0 + slot, ins.mod_wave & 3);
            }
        }
    }

    /// Rewrite the output operator's level from instrument base + volume.
    fn write_volume(&self, chip: &mut Opl2, voice: usize) {
        let track = &self.voices[voice];
        let Some(ins) = track.instrument.as_ref() else {
            return;
        };
        let ch = self.voice_channel(voice) as usize;
        let m = MOD_OFFSET[ch];
        // Single-operator percussion voices were programmed from the
        // modulator parameter block; scale the same block here.
        let (op, slot) = match (self.percussive, voice) {
            (true, 7) | (true, 9) => (&ins.modulator, m + 3),
            (true, 8) | (true, 10) => (&ins.modulator, m),
            _ => (&ins.carrier, m + 3),
        };
        let vol = track.volume.clamp(0.0, 1.0);
        let loudness = (63 - (op.total_level & 0x3f)) as f32 * vol;
        let tl = 63 - loudness.round() as u8;
        chip.write_register(0x40 + slot, (op.ksl & 3) << 6 | (tl & 0x3f));
    }

    fn write_frequency(&mut self, chip: &mut Opl2, voice: usize, key_on: bool) {
        let track = &self.voices[voice];
        let ch = self.voice_channel(voice);
        let note = track.current_note;
        if note == 0 || !key_on {
            // Rest or key-off: clear the key bit, keep the last frequency.
            if let Some(bit) = self.voice_bd_bit(voice) {
                self.bd_state &= !bit;
                chip.write_register(0xbd, self.bd_state);
            } else {
                chip.write_register(0xb0 + ch, 0);
            }
            return;
        }

        let steps = (note as i32 - 12) * STEPS_PER_SEMITONE + track.bend_steps;
        let octave = (steps.div_euclid(STEPS_PER_OCTAVE)).clamp(0, 7);
        let within = steps.rem_euclid(STEPS_PER_OCTAVE) as usize;
        let fnum = PITCH_FNUM[within];
        chip.write_register(0xa0 + ch, (fnum & 0xff) as u8);
        let hi = ((octave as u8) << 2) | ((fnum >> 8) as u8 & 3);
        if let Some(bit) = self.voice_bd_bit(voice) {
            chip.write_register(0xb0 + ch, hi);
            self.bd_state |= bit;
            chip.write_register(0xbd, self.bd_state);
        } else {
            chip.write_register(0xb0 + ch, hi | 0x20);
        }
    }

    fn step_voice(&mut self, chip: &mut Opl2, voice: usize) {
        let t = self.tick as u16;

        while self.voices[voice].timbre_idx < self.voices[voice].timbres.len()
            && self.voices[voice].timbres[self.voices[voice].timbre_idx].tick <= t
        {
            let idx = self.voices[voice].timbre_idx;
            let name = self.voices[voice].timbres[idx].name.clone();
            self.voices[voice].timbre_idx = idx + 1;
            // Names were validated at load; the cache cannot miss.
            if let Ok(ins) = self.bank.lookup(&name) {
                self.voices[voice].instrument = Some(ins);
                self.write_instrument(chip, voice, &ins);
                self.write_volume(chip, voice);
            }
        }

        while self.voices[voice].volume_idx < self.voices[voice].volumes.len()
            && self.voices[voice].volumes[self.voices[voice].volume_idx].tick <= t
        {
            let idx = self.voices[voice].volume_idx;
            self.voices[voice].volume = self.voices[voice].volumes[idx].multiplier;
            self.voices[voice].volume_idx = idx + 1;
            self.write_volume(chip, voice);
        }

        while self.voices[voice].pitch_idx < self.voices[voice].pitches.len()
            && self.voices[voice].pitches[self.voices[voice].pitch_idx].tick <= t
        {
            let idx = self.voices[voice].pitch_idx;
            let variation = self.voices[voice].pitches[idx].variation;
            self.voices[voice].pitch_idx = idx + 1;
            self.voices[voice].bend_steps =
                ((variation - 1.0) * STEPS_PER_SEMITONE as f32).round() as i32;
            if self.voices[voice].current_note != 0 {
                self.write_frequency(chip, voice, true);
            }
        }

        if self.voices[voice].ticks_left == 0 {
            if self.voices[voice].note_idx < self.voices[voice].notes.len() {
                let ev = self.voices[voice].notes[self.voices[voice].note_idx];
                self.voices[voice].note_idx += 1;
                // Release the previous note before starting the next.
                self.write_frequency(chip, voice, false);
                self.voices[voice].current_note = ev.note;
                self.voices[voice].ticks_left = ev.duration;
                if ev.note != 0 {
                    self.write_frequency(chip, voice, true);
                }
            }
        }
        self.voices[voice].ticks_left = self.voices[voice].ticks_left.saturating_sub(1);
    }
}

impl Sequencer for RolSequencer {
    fn init(&mut self, chip: &mut Opl2) {
        chip.reset();
        chip.write_register(0x01, 0x20); // enable waveform select
        self.bd_state = if self.percussive { 0x20 } else { 0x00 };
        chip.write_register(0xbd, self.bd_state);
        self.tick = 0;
        self.tempo_idx = 0;
        self.current_tempo = self.basic_tempo;
        for voice in &mut self.voices {
            voice.reset_cursors();
        }
    }

    fn advance(&mut self, chip: &mut Opl2) -> bool {
        if self.tick >= self.total_ticks {
            return false;
        }
        while self.tempo_idx < self.tempo_events.len()
            && self.tempo_events[self.tempo_idx].tick as usize <= self.tick
        {
            let mult = self.tempo_events[self.tempo_idx].multiplier;
            if mult.is_finite() && mult > 0.0 {
                self.current_tempo = self.basic_tempo * mult;
            }
            self.tempo_idx += 1;
        }
        for voice in 0..self.voices.len() {
            self.step_voice(chip, voice);
        }
        self.tick += 1;
        self.tick < self.total_ticks
    }

    fn refresh_hz(&self) -> f64 {
        f64::from(self.current_tempo) * f64::from(self.ticks_per_beat) / 60.0
    }

    fn total_steps_hint(&self) -> Option<usize> {
        Some(self.total_ticks)
    }

    fn format_name(&self) -> &'static str {
        "AdLib Visual Composer (ROL)"
    }
}

/// Section marker texts, in the order sections appear per voice.
const MARKERS: [&str; 4] = ["Voix", "Timbre", "Volume", "Pitch"];

/// Whether any section marker text sits at the cursor.
fn marker_at(r: &ByteReader<'_>) -> bool {
    let mut probe = r.clone();
    let Ok(head) = probe.read_bytes(7) else {
        return false;
    };
    MARKERS
        .iter()
        .any(|m| head.len() >= m.len() && &head[..m.len()] == m.as_bytes())
}

fn read_section_name(r: &mut ByteReader<'_>) -> Result<()> {
    r.skip(15)?;
    Ok(())
}

fn load_voice(r: &mut ByteReader<'_>) -> Result<VoiceTrack> {
    let mut track = VoiceTrack::default();

    // Note list: a total duration followed by (note, duration) pairs.
    read_section_name(r)?;
    let total = r.read_u16()? as u32;
    let mut accumulated: u32 = 0;
    while accumulated < total {
        if marker_at(r) {
            break;
        }
        let note = r.read_u16()?;
        let duration = r.read_u16()?;
        accumulated += duration as u32;
        track.notes.push(NoteEvent { note, duration });
        if duration == 0 {
            break; // zero-length events would loop forever
        }
    }

    read_section_name(r)?;
    let count = r.read_u16()? as usize;
    for _ in 0..count {
        if marker_at(r) {
            break;
        }
        let tick = r.read_u16()?;
        let raw = r.read_bytes(9)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let name = String::from_utf8_lossy(&raw[..end]).to_string();
        r.skip(3)?; // filler + unknown word
        track.timbres.push(TimbreEvent { tick, name });
    }

    read_section_name(r)?;
    let count = r.read_u16()? as usize;
    for _ in 0..count {
        if marker_at(r) {
            break;
        }
        let tick = r.read_u16()?;
        let multiplier = r.read_f32()?;
        track.volumes.push(VolumeEvent { tick, multiplier });
    }

    read_section_name(r)?;
    let count = r.read_u16()? as usize;
    for _ in 0..count {
        if marker_at(r) {
            break;
        }
        let tick = r.read_u16()?;
        let variation = r.read_f32()?;
        track.pitches.push(PitchEvent { tick, variation });
    }

    Ok(track)
}
