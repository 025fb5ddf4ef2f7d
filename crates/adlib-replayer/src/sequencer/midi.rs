//! MIDI-dialect decoder.
//!
//! Six historical AdLib-targeted MIDI flavors share one playback engine:
//! standard MIDI files, LucasArts ADL, Creative Music Format, two Sierra
//! On-Line variants (which need a companion patch file), and the
//! pre-General-MIDI LucasArts format. They differ in header layout, in how
//! instruments reach the 128-entry bank, and in delta-time encoding (the
//! Sierra variants use fixed single-byte deltas instead of variable-length
//! integers); everything downstream of that (channels, voice allocation,
//! velocity mapping) is common.

use opl2::Opl2;

use crate::io::ByteReader;
use crate::sequencer::gm::{FmPatch, GM_PATCHES, NOTE_FNUM, VELOCITY_TABLE};
use crate::sequencer::{Sequencer, MOD_OFFSET};
use crate::{ReplayerError, Result};

const MAX_TRACKS: usize = 16;
const MELODIC_VOICES: usize = 9;
const RHYTHM_MELODIC_VOICES: usize = 6;

/// The supported sub-dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiDialect {
    /// Standard MIDI file (`MThd`).
    Standard,
    /// LucasArts ADL: MIDI stream with instruments delivered in sysex.
    Lucas,
    /// Creative Music Format (`CTMF`): embedded instrument block, rhythm
    /// mode switched by a control change.
    Cmf,
    /// Sierra On-Line: fixed single-byte deltas, external patch bank.
    Sierra,
    /// Sierra multi-song variant; sections located by a sentinel scan.
    AdvancedSierra,
    /// Pre-GM LucasArts format with an embedded instrument block.
    OldLucas,
}

impl MidiDialect {
    /// Match the leading bytes against the known signatures. The `0x84 0x00`
    /// prefix is ambiguous between Sierra and old LucasArts; the presence of
    /// a companion patch bank decides, as the original players did.
    pub fn probe(data: &[u8], has_companion: bool) -> Option<MidiDialect> {
        if data.starts_with(b"MThd") {
            return Some(MidiDialect::Standard);
        }
        if data.starts_with(b"ADL") {
            return Some(MidiDialect::Lucas);
        }
        if data.starts_with(b"CTMF") {
            return Some(MidiDialect::Cmf);
        }
        if data.len() >= 2 && data[0] == 0x84 && data[1] == 0x00 {
            if data.get(2) == Some(&0xf0) {
                return Some(MidiDialect::AdvancedSierra);
            }
            if has_companion {
                return Some(MidiDialect::Sierra);
            }
            return Some(MidiDialect::OldLucas);
        }
        None
    }

    fn fixed_deltas(self) -> bool {
        matches!(self, MidiDialect::Sierra | MidiDialect::AdvancedSierra)
    }

    /// Note shift applied to every melodic note-on.
    fn note_shift(self) -> i16 {
        match self {
            MidiDialect::Sierra | MidiDialect::AdvancedSierra => -12,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Track {
    on: bool,
    start: usize,
    end: usize,
    pos: usize,
    /// Ticks until the next event is due.
    iwait: f64,
    running_status: u8,
}

#[derive(Debug, Clone, Copy)]
struct LogicalChannel {
    ins: FmPatch,
    vol: u8,
    nshift: i16,
}

#[derive(Debug, Clone, Copy, Default)]
struct VoiceSlot {
    /// Owning logical channel, -1 when free.
    channel: i16,
    note: u8,
    on: bool,
    /// Allocation age for oldest-note-wins stealing.
    age: u64,
    /// Last 0xB0 image, for key-off without recomputing the frequency.
    b0: u8,
}

/// Percussion wiring for the eight logical drum channels 8..=15 in rhythm
/// mode: (0xBD key bit, chip channel, carrier slot instead of modulator).
/// The lower three alias the bass drum, snare and tom-tom voices.
const PERCUSSION_MAP: [(u8, usize, bool); 8] = [
    (0x10, 6, true),  // 8: bass drum (two-op, keyed via carrier path)
    (0x08, 7, true),  // 9: snare
    (0x04, 8, false), // 10: tom-tom
    (0x10, 6, true),  // 11: bass drum
    (0x08, 7, true),  // 12: snare
    (0x04, 8, false), // 13: tom-tom
    (0x02, 8, true),  // 14: top cymbal
    (0x01, 7, false), // 15: hi-hat
];

/// MIDI-dialect sequencer over one OPL2.
pub struct MidiSequencer {
    data: Vec<u8>,
    dialect: MidiDialect,
    tracks: Vec<Track>,
    channels: [LogicalChannel; 16],
    voices: [VoiceSlot; MELODIC_VOICES],
    insbank: [FmPatch; 128],

    /// Ticks per quarter note.
    division: f64,
    /// Microseconds per quarter note (current tempo).
    msqtr: f64,
    initial_msqtr: f64,

    rhythm_mode: bool,
    bd_state: u8,
    age: u64,
    /// Ticks covered by the step `advance` just produced.
    wait_ticks: f64,

    /// Advanced-Sierra song section offsets (first one is played).
    sections: Vec<usize>,
}

impl MidiSequencer {
    /// Parse the header for the given dialect. Format errors surface here,
    /// before any chip state is touched.
    pub fn load(data: &[u8], dialect: MidiDialect, companion: Option<&[u8]>) -> Result<Self> {
        let mut seq = MidiSequencer {
            data: data.to_vec(),
            dialect,
            tracks: Vec::new(),
            channels: [LogicalChannel {
                ins: GM_PATCHES[0],
                vol: 127,
                nshift: dialect.note_shift(),
            }; 16],
            voices: [VoiceSlot {
                channel: -1,
                ..Default::default()
            }; MELODIC_VOICES],
            insbank: GM_PATCHES,
            division: 96.0,
            msqtr: 500_000.0,
            initial_msqtr: 500_000.0,
            rhythm_mode: false,
            bd_state: 0,
            age: 0,
            wait_ticks: 1.0,
            sections: Vec::new(),
        };

        match dialect {
            MidiDialect::Standard => seq.load_standard()?,
            MidiDialect::Lucas => seq.load_lucas()?,
            MidiDialect::Cmf => seq.load_cmf()?,
            MidiDialect::Sierra => seq.load_sierra(companion)?,
            MidiDialect::AdvancedSierra => seq.load_advanced_sierra(companion)?,
            MidiDialect::OldLucas => seq.load_old_lucas()?,
        }
        seq.initial_msqtr = seq.msqtr;
        Ok(seq)
    }

    /// Dialect chosen at load time.
    pub fn dialect(&self) -> MidiDialect {
        self.dialect
    }

    /// Song section offsets of an Advanced Sierra file (empty otherwise).
    pub fn sections(&self) -> &[usize] {
        &self.sections
    }

    fn push_track(&mut self, start: usize, end: usize) {
        if self.tracks.len() < MAX_TRACKS && start < end {
            self.tracks.push(Track {
                on: true,
                start,
                end,
                pos: start,
                iwait: 0.0,
                running_status: 0,
            });
        }
    }

    fn load_standard(&mut self) -> Result<()> {
        let mut r = ByteReader::new(&self.data);
        r.skip(4)?; // MThd
        let header_len = r.read_u32_be()? as usize;
        if header_len < 6 {
            return Err(ReplayerError::Malformed("short MThd header".into()));
        }
        let _format = r.read_u16_be()?;
        let _declared_tracks = r.read_u16_be()?;
        let division = r.read_u16_be()?;
        if division == 0 || division & 0x8000 != 0 {
            return Err(ReplayerError::Malformed(
                "unsupported SMPTE or zero MIDI division".into(),
            ));
        }
        self.division = f64::from(division);
        r.skip(header_len - 6)?;

        let mut tracks = Vec::new();
        while r.remaining() >= 8 {
            let id = r.read_bytes(4)?;
            let len = r.read_u32_be()? as usize;
            let start = r.pos();
            let end = start.checked_add(len).unwrap_or(self.data.len());
            if id == b"MTrk" {
                tracks.push((start, end.min(self.data.len())));
            }
            if r.seek(end.min(self.data.len())).is_err() {
                break;
            }
            if end > self.data.len() {
                break; // truncated final chunk: keep what we have
            }
        }
        if tracks.is_empty() {
            return Err(ReplayerError::Malformed("no MTrk chunks".into()));
        }
        for (start, end) in tracks {
            self.push_track(start, end);
        }
        Ok(())
    }

    fn load_lucas(&mut self) -> Result<()> {
        // "ADL" signature plus three bytes of version/flags, then a plain
        // MIDI event stream; instruments arrive in sysex messages.
        if self.data.len() <= 6 {
            return Err(ReplayerError::Truncated);
        }
        self.push_track(6, self.data.len());
        Ok(())
    }

    fn load_cmf(&mut self) -> Result<()> {
        let data_len = self.data.len();
        let mut r = ByteReader::new(&self.data);
        r.skip(4)?; // CTMF
        let _version = r.read_u16()?;
        let instrument_offset = r.read_u16()? as usize;
        let music_offset = r.read_u16()? as usize;
        let ticks_per_quarter = r.read_u16()?;
        let ticks_per_second = r.read_u16()?;
        r.skip(6)?; // title/author/remarks offsets
        r.skip(16)?; // channel-in-use map
        let num_instruments = r.read_u16()? as usize;
        let _basic_tempo = r.read_u16()?;

        if instrument_offset >= data_len || music_offset >= data_len {
            return Err(ReplayerError::Malformed(
                "CMF block offsets past end of file".into(),
            ));
        }
        let ins_end = instrument_offset
            .checked_add(num_instruments.saturating_mul(16))
            .ok_or_else(|| ReplayerError::Malformed("CMF instrument block overflow".into()))?;
        if ins_end > data_len {
            return Err(ReplayerError::Malformed(
                "CMF instrument block past end of file".into(),
            ));
        }
        if ticks_per_quarter == 0 || ticks_per_second == 0 {
            return Err(ReplayerError::Malformed("CMF zero tick rate".into()));
        }

        let mut ir = ByteReader::new(&self.data);
        ir.seek(instrument_offset)?;
        for i in 0..num_instruments.min(128) {
            let block = ir.read_bytes(16)?;
            let mut patch = [0u8; 11];
            patch.copy_from_slice(&block[..11]);
            self.insbank[i] = patch;
        }
        for ch in &mut self.channels {
            ch.ins = self.insbank[0];
        }

        self.division = f64::from(ticks_per_quarter);
        self.msqtr = 1_000_000.0 * f64::from(ticks_per_quarter) / f64::from(ticks_per_second);
        self.push_track(music_offset, data_len);
        Ok(())
    }

    fn load_patch_bank(&mut self, companion: Option<&[u8]>) -> Result<()> {
        let bank = companion.ok_or(ReplayerError::MissingBank)?;
        for (i, block) in bank.chunks_exact(16).take(128).enumerate() {
            let mut patch = [0u8; 11];
            patch.copy_from_slice(&block[..11]);
            self.insbank[i] = patch;
        }
        for ch in &mut self.channels {
            ch.ins = self.insbank[0];
        }
        Ok(())
    }

    fn load_sierra(&mut self, companion: Option<&[u8]>) -> Result<()> {
        self.load_patch_bank(companion)?;
        // Signature, then 16 two-byte channel activity records.
        let start = 2 + 32;
        if start >= self.data.len() {
            return Err(ReplayerError::Truncated);
        }
        self.division = 32.0;
        self.push_track(start, self.data.len());
        Ok(())
    }

    fn load_advanced_sierra(&mut self, companion: Option<&[u8]>) -> Result<()> {
        self.load_patch_bank(companion)?;
        // Three signature bytes and an 8-byte header precede the first
        // song section. Further sections are found by scanning for the
        // 0xFC stop byte followed by the 0x84 0x00 section marker; real
        // files diverging from this should be reported, not guessed at.
        let first = 11;
        if first >= self.data.len() {
            return Err(ReplayerError::Truncated);
        }
        self.sections.push(first);
        let mut i = first;
        while i + 2 < self.data.len() {
            if self.data[i] == 0xfc && self.data[i + 1] == 0x84 && self.data[i + 2] == 0x00 {
                self.sections.push(i + 3);
            }
            i += 1;
        }
        let end = self
            .sections
            .get(1)
            .map(|&next| next - 3)
            .unwrap_or(self.data.len());
        self.division = 32.0;
        self.push_track(first, end);
        Ok(())
    }

    fn load_old_lucas(&mut self) -> Result<()> {
        let mut r = ByteReader::new(&self.data);
        let _declared_len = r.read_u16()?;
        r.skip(4)?;
        let num_instruments = r.read_u8()? as usize;
        r.skip(1)?;
        for i in 0..num_instruments.min(128) {
            let block = r.read_bytes(16)?;
            let mut patch = [0u8; 11];
            patch.copy_from_slice(&block[..11]);
            self.insbank[i] = patch;
        }
        for ch in &mut self.channels {
            ch.ins = self.insbank[0];
        }
        self.msqtr = 250_000.0;
        self.push_track(r.pos(), self.data.len());
        Ok(())
    }

    // --- per-track byte cursor -------------------------------------------

    fn t_u8(&mut self, t: usize) -> Result<u8> {
        let track = &mut self.tracks[t];
        if track.pos >= track.end {
            return Err(ReplayerError::Truncated);
        }
        let b = self.data[track.pos];
        track.pos += 1;
        Ok(b)
    }

    fn t_skip(&mut self, t: usize, count: usize) {
        let track = &mut self.tracks[t];
        track.pos = track.pos.saturating_add(count).min(track.end);
    }

    fn t_varint(&mut self, t: usize) -> Result<u32> {
        let mut value: u32 = 0;
        for _ in 0..4 {
            let b = self.t_u8(t)?;
            value = (value << 7) | u32::from(b & 0x7f);
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ReplayerError::Malformed("oversized MIDI delta-time".into()))
    }

    fn t_delta(&mut self, t: usize) -> Result<f64> {
        if self.dialect.fixed_deltas() {
            Ok(f64::from(self.t_u8(t)?))
        } else {
            Ok(f64::from(self.t_varint(t)?))
        }
    }

    // --- event handling --------------------------------------------------

    fn process_event(&mut self, t: usize, chip: &mut Opl2) -> Result<()> {
        let mut status = self.t_u8(t)?;
        if status < 0x80 {
            self.tracks[t].pos -= 1;
            status = self.tracks[t].running_status;
            if status < 0x80 {
                return Err(ReplayerError::Malformed(
                    "data byte without running status".into(),
                ));
            }
        } else if status < 0xf0 {
            self.tracks[t].running_status = status;
        }

        let ch = (status & 0x0f) as usize;
        match status & 0xf0 {
            0x80 => {
                let note = self.t_u8(t)?;
                let _velocity = self.t_u8(t)?;
                self.note_off(chip, ch, note);
            }
            0x90 => {
                let note = self.t_u8(t)?;
                let velocity = self.t_u8(t)?;
                if velocity == 0 {
                    self.note_off(chip, ch, note);
                } else {
                    self.note_on(chip, ch, note, velocity);
                }
            }
            0xa0 | 0xe0 => {
                self.t_u8(t)?;
                self.t_u8(t)?;
            }
            0xb0 => {
                let controller = self.t_u8(t)?;
                let value = self.t_u8(t)?;
                self.control_change(chip, ch, controller, value);
            }
            0xc0 => {
                let program = (self.t_u8(t)? & 0x7f) as usize;
                self.channels[ch].ins = self.insbank[program];
            }
            0xd0 => {
                self.t_u8(t)?;
            }
            _ => match status {
                // Meta and sysex events cancel running status.
                0xff => {
                    self.tracks[t].running_status = 0;
                    self.meta_event(t)?;
                }
                0xf0 | 0xf7 => {
                    self.tracks[t].running_status = 0;
                    self.sysex_event(t)?;
                }
                0xfc => self.tracks[t].on = false, // Sierra stop byte
                _ => {}
            },
        }
        Ok(())
    }

    fn meta_event(&mut self, t: usize) -> Result<()> {
        let kind = self.t_u8(t)?;
        let len = self.t_varint(t)? as usize;
        match kind {
            0x2f => self.tracks[t].on = false,
            0x51 if len == 3 => {
                let hi = self.t_u8(t)?;
                let mid = self.t_u8(t)?;
                let lo = self.t_u8(t)?;
                let usec = (u32::from(hi) << 16) | (u32::from(mid) << 8) | u32::from(lo);
                if usec > 0 {
                    self.msqtr = f64::from(usec);
                }
            }
            _ => self.t_skip(t, len),
        }
        Ok(())
    }

    fn sysex_event(&mut self, t: usize) -> Result<()> {
        let len = self.t_varint(t)? as usize;
        let after = self.tracks[t].pos.saturating_add(len).min(self.tracks[t].end);
        if self.dialect == MidiDialect::Lucas && len >= 2 + 22 && self.t_u8(t)? == 0x7d {
            // LucasArts instrument sysex: channel number, then 11 FM
            // parameters as (high nibble, low nibble) byte pairs.
            let ch = (self.t_u8(t)? & 0x0f) as usize;
            let mut patch = [0u8; 11];
            for entry in &mut patch {
                let hi = self.t_u8(t)?;
                let lo = self.t_u8(t)?;
                *entry = (hi << 4) | (lo & 0x0f);
            }
            self.channels[ch].ins = patch;
        }
        self.tracks[t].pos = after;
        Ok(())
    }

    fn control_change(&mut self, chip: &mut Opl2, ch: usize, controller: u8, value: u8) {
        match controller {
            0x07 => self.channels[ch].vol = value & 0x7f,
            // CMF rhythm-mode switch.
            0x67 if self.dialect == MidiDialect::Cmf => {
                self.set_rhythm_mode(chip, value != 0);
            }
            _ => {}
        }
    }

    fn set_rhythm_mode(&mut self, chip: &mut Opl2, on: bool) {
        if on == self.rhythm_mode {
            return;
        }
        if on {
            // Channels 6..=8 become percussion carriers: release any
            // melodic notes still sounding there.
            for v in RHYTHM_MELODIC_VOICES..MELODIC_VOICES {
                if self.voices[v].on {
                    chip.write_register(0xb0 + v as u8, self.voices[v].b0 & !0x20);
                    self.voices[v].on = false;
                    self.voices[v].channel = -1;
                }
            }
        }
        self.rhythm_mode = on;
        self.bd_state = if on { 0x20 } else { 0x00 };
        chip.write_register(0xbd, self.bd_state);
    }

    /// Scale the carrier level register by velocity and channel volume.
    fn scaled_level(base40: u8, velocity: u8, channel_vol: u8) -> u8 {
        let v = u32::from(VELOCITY_TABLE[(velocity & 0x7f) as usize])
            * u32::from(channel_vol & 0x7f)
            / 127;
        let loudness = u32::from(63 - (base40 & 0x3f)) * v / 127;
        (base40 & 0xc0) | (63 - loudness as u8)
    }

    fn write_patch(
        chip: &mut Opl2,
        channel: usize,
        patch: &FmPatch,
        velocity: u8,
        channel_vol: u8,
    ) {
        let m = MOD_OFFSET[channel];
        let c = m + 3;
        chip.write_register(0x20 + m, patch[0]);
        chip.write_register(0x20 + c, patch[1]);
        chip.write_register(0x40 + m, patch[2]);
        chip.write_register(0x40 + c, Self::scaled_level(patch[3], velocity, channel_vol));
        chip.write_register(0x60 + m, patch[4]);
        chip.write_register(0x60 + c, patch[5]);
        chip.write_register(0x80 + m, patch[6]);
        chip.write_register(0x80 + c, patch[7]);
        chip.write_register(0xe0 + m, patch[8] & 3);
        chip.write_register(0xe0 + c, patch[9] & 3);
        chip.write_register(0xc0 + channel as u8, patch[10]);
    }

    fn note_frequency(&self, ch: usize, note: u8) -> (u8, u8) {
        let n = (i16::from(note) + self.channels[ch].nshift).clamp(0, 127) as i32;
        let octave = (n / 12 - 1).clamp(0, 7) as u8;
        let fnum = NOTE_FNUM[(n % 12) as usize];
        ((fnum & 0xff) as u8, (octave << 2) | ((fnum >> 8) as u8 & 3))
    }

    fn note_on(&mut self, chip: &mut Opl2, ch: usize, note: u8, velocity: u8) {
        if self.rhythm_mode && (8..=15).contains(&ch) {
            return self.percussion_on(chip, ch, note, velocity);
        }
        let limit = if self.rhythm_mode {
            RHYTHM_MELODIC_VOICES
        } else {
            MELODIC_VOICES
        };

        let voice = (0..limit)
            .find(|&v| !self.voices[v].on)
            .unwrap_or_else(|| {
                // All voices busy: steal the oldest note.
                (0..limit)
                    .min_by_key(|&v| self.voices[v].age)
                    .unwrap_or(0)
            });
        if self.voices[voice].on {
            chip.write_register(0xb0 + voice as u8, self.voices[voice].b0 & !0x20);
        }

        let patch = self.channels[ch].ins;
        Self::write_patch(chip, voice, &patch, velocity, self.channels[ch].vol);
        let (lo, hi) = self.note_frequency(ch, note);
        let b0 = hi | 0x20;
        chip.write_register(0xa0 + voice as u8, lo);
        chip.write_register(0xb0 + voice as u8, b0);

        self.age += 1;
        self.voices[voice] = VoiceSlot {
            channel: ch as i16,
            note,
            on: true,
            age: self.age,
            b0,
        };
    }

    fn note_off(&mut self, chip: &mut Opl2, ch: usize, note: u8) {
        if self.rhythm_mode && (8..=15).contains(&ch) {
            let (bit, _, _) = PERCUSSION_MAP[ch - 8];
            self.bd_state &= !bit;
            chip.write_register(0xbd, self.bd_state);
            return;
        }
        for (i, voice) in self.voices.iter_mut().enumerate() {
            if voice.on && voice.channel == ch as i16 && voice.note == note {
                chip.write_register(0xb0 + i as u8, voice.b0 & !0x20);
                voice.on = false;
                voice.channel = -1;
            }
        }
    }

    fn percussion_on(&mut self, chip: &mut Opl2, ch: usize, note: u8, velocity: u8) {
        let (bit, chip_ch, carrier_slot) = PERCUSSION_MAP[ch - 8];
        let patch = self.channels[ch].ins;
        if bit == 0x10 {
            // Bass drum keeps its full two-operator voice.
            Self::write_patch(chip, chip_ch, &patch, velocity, self.channels[ch].vol);
        } else {
            let m = MOD_OFFSET[chip_ch];
            let slot = if carrier_slot { m + 3 } else { m };
            chip.write_register(0x20 + slot, patch[0]);
            chip.write_register(
                0x40 + slot,
                Self::scaled_level(patch[2], velocity, self.channels[ch].vol),
            );
            chip.write_register(0x60 + slot, patch[4]);
            chip.write_register(0x80 + slot, patch[6]);
            chip.write_register(0xe0 + slot, patch[8] & 3);
        }
        let (lo, hi) = self.note_frequency(ch, note);
        chip.write_register(0xa0 + chip_ch as u8, lo);
        chip.write_register(0xb0 + chip_ch as u8, hi); // no melodic key bit
        self.bd_state |= bit;
        chip.write_register(0xbd, self.bd_state);
    }

    /// Current decode tick rate in ticks per second.
    fn tick_rate(&self) -> f64 {
        self.division * 1_000_000.0 / self.msqtr
    }

    fn release_all(&mut self) {
        for voice in &mut self.voices {
            voice.on = false;
            voice.channel = -1;
            voice.age = 0;
        }
    }
}

impl Sequencer for MidiSequencer {
    fn init(&mut self, chip: &mut Opl2) {
        chip.reset();
        chip.write_register(0x01, 0x20); // enable waveform select
        self.msqtr = self.initial_msqtr;
        self.rhythm_mode = false;
        self.bd_state = 0;
        self.age = 0;
        self.wait_ticks = 1.0;
        self.release_all();
        for ch in &mut self.channels {
            ch.ins = self.insbank[0];
            ch.vol = 127;
            ch.nshift = self.dialect.note_shift();
        }
        for t in 0..self.tracks.len() {
            self.tracks[t].pos = self.tracks[t].start;
            self.tracks[t].on = true;
            self.tracks[t].running_status = 0;
            self.tracks[t].iwait = 0.0;
            // Prime each cursor with its first delta.
            match self.t_delta(t) {
                Ok(delta) => self.tracks[t].iwait = delta,
                Err(_) => self.tracks[t].on = false,
            }
        }
    }

    fn advance(&mut self, chip: &mut Opl2) -> bool {
        if !self.tracks.iter().any(|t| t.on) {
            return false;
        }
        for t in 0..self.tracks.len() {
            while self.tracks[t].on && self.tracks[t].iwait <= 0.0 {
                if self.process_event(t, chip).is_err() {
                    // Truncated or corrupt tail: normal end of this track.
                    self.tracks[t].on = false;
                    break;
                }
                if !self.tracks[t].on {
                    break;
                }
                match self.t_delta(t) {
                    Ok(delta) => self.tracks[t].iwait += delta,
                    Err(_) => self.tracks[t].on = false,
                }
            }
        }

        let wait = self
            .tracks
            .iter()
            .filter(|t| t.on)
            .map(|t| t.iwait)
            .fold(f64::INFINITY, f64::min);
        if !wait.is_finite() {
            return false;
        }
        for track in &mut self.tracks {
            if track.on {
                track.iwait -= wait;
            }
        }
        self.wait_ticks = wait.max(f64::EPSILON);
        true
    }

    fn refresh_hz(&self) -> f64 {
        self.tick_rate() / self.wait_ticks
    }

    fn format_name(&self) -> &'static str {
        match self.dialect {
            MidiDialect::Standard => "standard MIDI",
            MidiDialect::Lucas => "LucasArts AdLib MIDI",
            MidiDialect::Cmf => "Creative Music Format (CMF)",
            MidiDialect::Sierra => "Sierra MIDI",
            MidiDialect::AdvancedSierra => "Sierra advanced MIDI",
            MidiDialect::OldLucas => "old LucasArts MIDI",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Minimal CMF: one instrument, and a music stream supplied by the test.
    fn cmf_bytes(music: &[u8], ins_offset: u16, mus_offset_override: Option<u16>) -> Vec<u8> {
        let header_len = 4 + 2 + 2 + 2 + 2 + 2 + 6 + 16 + 2 + 2; // 40
        let ins_off = if ins_offset != 0 {
            ins_offset
        } else {
            header_len as u16
        };
        let mus_off = mus_offset_override.unwrap_or(ins_off + 16);
        let mut f = Vec::new();
        f.extend_from_slice(b"CTMF");
        f.extend_from_slice(&0x0101u16.to_le_bytes());
        f.extend_from_slice(&ins_off.to_le_bytes());
        f.extend_from_slice(&mus_off.to_le_bytes());
        f.extend_from_slice(&96u16.to_le_bytes()); // ticks per quarter
        f.extend_from_slice(&96u16.to_le_bytes()); // ticks per second
        f.extend_from_slice(&[0u8; 6]); // title/author/remarks offsets
        f.extend_from_slice(&[0u8; 16]); // channel-in-use
        f.extend_from_slice(&1u16.to_le_bytes()); // one instrument
        f.extend_from_slice(&120u16.to_le_bytes()); // basic tempo
        // Instrument block: bright two-op patch.
        f.extend_from_slice(&[
            0x21, 0x21, 0x10, 0x00, 0xf4, 0xf4, 0x7f, 0x7f, 0x00, 0x00, 0x08, 0, 0, 0, 0, 0,
        ]);
        f.extend_from_slice(music);
        f
    }

    #[test]
    fn cmf_offsets_past_eof_fail_to_load() {
        let file = cmf_bytes(&[0x00, 0xff, 0x2f, 0x00], 0, Some(0x7fff));
        assert!(matches!(
            MidiSequencer::load(&file, MidiDialect::Cmf, None),
            Err(ReplayerError::Malformed(_))
        ));
        let file = cmf_bytes(&[0x00, 0xff, 0x2f, 0x00], 0x7fff, None);
        assert!(matches!(
            MidiSequencer::load(&file, MidiDialect::Cmf, None),
            Err(ReplayerError::Malformed(_))
        ));
    }

    #[test]
    fn cmf_note_on_produces_audio_and_timing() {
        // delta 0: program 0; delta 0: note on; delta 96: note off; end.
        let music = [
            0x00, 0xc0, 0x00, // program change
            0x00, 0x90, 60, 100, // note on, middle C
            96, 0x80, 60, 0, // note off after one quarter
            0x00, 0xff, 0x2f, 0x00, // end of track
        ];
        let file = cmf_bytes(&music, 0, None);
        let mut seq = MidiSequencer::load(&file, MidiDialect::Cmf, None).unwrap();
        let mut chip = Opl2::new();
        seq.init(&mut chip);
        assert!(seq.advance(&mut chip));
        // 96 ticks/s, 96-tick wait: one step per second.
        assert_abs_diff_eq!(seq.refresh_hz(), 1.0, epsilon = 1e-9);
        let heard = (0..8192).map(|_| chip.tick().0).any(|s| s != 0);
        assert!(heard);
        assert!(!seq.advance(&mut chip));
    }

    #[test]
    fn velocity_zero_note_on_is_a_note_off() {
        let music = [
            0x00, 0x90, 60, 100, // note on
            10, 0x90, 60, 0, // running-status note off
            0x00, 0xff, 0x2f, 0x00,
        ];
        let file = cmf_bytes(&music, 0, None);
        let mut seq = MidiSequencer::load(&file, MidiDialect::Cmf, None).unwrap();
        let mut chip = Opl2::new();
        seq.init(&mut chip);
        assert!(seq.advance(&mut chip));
        assert_eq!(seq.voices.iter().filter(|v| v.on).count(), 1);
        seq.advance(&mut chip);
        assert_eq!(seq.voices.iter().filter(|v| v.on).count(), 0);
    }

    #[test]
    fn oldest_note_wins_when_all_voices_busy() {
        let mut music = Vec::new();
        for note in 60..70u8 {
            music.extend_from_slice(&[0x00, 0x90, note, 100]);
        }
        music.extend_from_slice(&[1, 0xff, 0x2f, 0x00]);
        let file = cmf_bytes(&music, 0, None);
        let mut seq = MidiSequencer::load(&file, MidiDialect::Cmf, None).unwrap();
        let mut chip = Opl2::new();
        seq.init(&mut chip);
        seq.advance(&mut chip);
        // Ten notes on nine voices: note 60 (the oldest) was stolen.
        assert_eq!(seq.voices.iter().filter(|v| v.on).count(), 9);
        assert!(seq.voices.iter().all(|v| v.note != 60));
        assert!(seq.voices.iter().any(|v| v.note == 69));
    }

    #[test]
    fn rhythm_mode_limits_melodic_allocation() {
        let mut music = vec![
            0x00, 0xb0, 0x67, 0x01, // CMF rhythm mode on
        ];
        for note in 60..69u8 {
            music.extend_from_slice(&[0x00, 0x90, note, 100]);
        }
        music.extend_from_slice(&[1, 0xff, 0x2f, 0x00]);
        let file = cmf_bytes(&music, 0, None);
        let mut seq = MidiSequencer::load(&file, MidiDialect::Cmf, None).unwrap();
        let mut chip = Opl2::new();
        seq.init(&mut chip);
        seq.advance(&mut chip);
        assert!(seq.rhythm_mode);
        // Only the six melodic voices may sound; 6..=8 stay percussion.
        assert_eq!(seq.voices.iter().filter(|v| v.on).count(), 6);
        for v in RHYTHM_MELODIC_VOICES..MELODIC_VOICES {
            assert!(!seq.voices[v].on);
        }
    }

    #[test]
    fn drum_channels_share_the_rhythm_voices() {
        let music = [
            0x00, 0xb0, 0x67, 0x01, // rhythm mode on
            0x00, 0x98, 36, 100, // drum channel 8: bass drum
            0x00, 0x9f, 42, 100, // drum channel 15: hi-hat
            10, 0x88, 36, 0, // bass drum off
            0x00, 0xff, 0x2f, 0x00,
        ];
        let file = cmf_bytes(&music, 0, None);
        let mut seq = MidiSequencer::load(&file, MidiDialect::Cmf, None).unwrap();
        let mut chip = Opl2::new();
        seq.init(&mut chip);
        assert!(seq.advance(&mut chip));
        // Both drums keyed through 0xBD bits, no melodic voice consumed.
        assert_eq!(seq.bd_state & 0x1f, 0x10 | 0x01);
        assert_eq!(seq.voices.iter().filter(|v| v.on).count(), 0);
        seq.advance(&mut chip);
        assert_eq!(seq.bd_state & 0x1f, 0x01);
    }

    #[test]
    fn meta_event_cancels_running_status() {
        let music = [
            0x00, 0x90, 60, 100, // note on
            0x00, 0xff, 0x01, 0x00, // empty text meta
            0x00, 61, 100, // data bytes: running status no longer applies
            0x00, 0xff, 0x2f, 0x00,
        ];
        let file = cmf_bytes(&music, 0, None);
        let mut seq = MidiSequencer::load(&file, MidiDialect::Cmf, None).unwrap();
        let mut chip = Opl2::new();
        seq.init(&mut chip);
        // The stray data bytes end the track instead of reading as a
        // second note-on.
        assert!(!seq.advance(&mut chip));
        assert_eq!(seq.voices.iter().filter(|v| v.on).count(), 1);
        assert!(seq.voices.iter().all(|v| !v.on || v.note == 60));
    }

    #[test]
    fn standard_midi_header_and_tempo() {
        let mut f = Vec::new();
        f.extend_from_slice(b"MThd");
        f.extend_from_slice(&6u32.to_be_bytes());
        f.extend_from_slice(&0u16.to_be_bytes()); // format 0
        f.extend_from_slice(&1u16.to_be_bytes());
        f.extend_from_slice(&96u16.to_be_bytes());
        let track = [
            0x00, 0xff, 0x51, 0x03, 0x0f, 0x42, 0x40, // tempo 1s/quarter
            0x00, 0x90, 60, 100, //
            96, 0x80, 60, 0, //
            0x00, 0xff, 0x2f, 0x00,
        ];
        f.extend_from_slice(b"MTrk");
        f.extend_from_slice(&(track.len() as u32).to_be_bytes());
        f.extend_from_slice(&track);

        assert_eq!(MidiDialect::probe(&f, false), Some(MidiDialect::Standard));
        let mut seq = MidiSequencer::load(&f, MidiDialect::Standard, None).unwrap();
        let mut chip = Opl2::new();
        seq.init(&mut chip);
        assert!(seq.advance(&mut chip));
        // After the tempo meta: 96 ticks take 1 s, the 96-tick note wait
        // makes this a 1 Hz step.
        assert_abs_diff_eq!(seq.refresh_hz(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn sierra_needs_companion_bank() {
        let data = [0x84u8, 0x00, 0x01, 0x02];
        assert_eq!(MidiDialect::probe(&data, true), Some(MidiDialect::Sierra));
        assert_eq!(
            MidiDialect::probe(&data, false),
            Some(MidiDialect::OldLucas)
        );
        assert!(matches!(
            MidiSequencer::load(&data, MidiDialect::Sierra, None),
            Err(ReplayerError::MissingBank)
        ));
    }

    #[test]
    fn advanced_sierra_section_scan() {
        let mut data = vec![0x84, 0x00, 0xf0];
        data.extend_from_slice(&[0u8; 8]); // header
        data.extend_from_slice(&[0x00, 0x90, 60, 100, 0xfc]); // song 1
        data.extend_from_slice(&[0x84, 0x00]); // next section marker
        data.extend_from_slice(&[0x00, 0x90, 62, 100, 0xfc]); // song 2
        let bank = vec![0u8; 16 * 4];
        assert_eq!(
            MidiDialect::probe(&data, true),
            Some(MidiDialect::AdvancedSierra)
        );
        let seq =
            MidiSequencer::load(&data, MidiDialect::AdvancedSierra, Some(&bank)).unwrap();
        assert_eq!(seq.sections().len(), 2);
        assert_eq!(seq.sections()[0], 11);
    }
}
