//! AdLib instrument bank (BNK) files.
//!
//! A BNK file is a name table plus an array of 30-byte instrument
//! parameter records. Composer files reference instruments by name; the
//! name match is exact but case-insensitive, and parameter records are
//! decoded lazily on first use and cached by record index.

use std::collections::HashMap;

use crate::io::ByteReader;
use crate::{ReplayerError, Result};

const SIGNATURE: &[u8; 6] = b"ADLIB-";
const NAME_RECORD_SIZE: usize = 12;
const DATA_RECORD_SIZE: usize = 30;

/// One operator's worth of BNK parameters, in file order.
#[derive(Debug, Clone, Copy, Default)]
pub struct BnkOperator {
    /// Key scale level (0..=3).
    pub ksl: u8,
    /// Frequency multiplier (0..=15).
    pub multiple: u8,
    /// Feedback strength (meaningful on the modulator only).
    pub feedback: u8,
    /// Attack rate.
    pub attack: u8,
    /// Sustain level.
    pub sustain: u8,
    /// Sustaining envelope flag (EGT).
    pub eg: u8,
    /// Decay rate.
    pub decay: u8,
    /// Release rate.
    pub release: u8,
    /// Total level attenuation (0..=63).
    pub total_level: u8,
    /// Tremolo enable.
    pub am: u8,
    /// Vibrato enable.
    pub vib: u8,
    /// Key scaling of rates.
    pub ksr: u8,
    /// Connection bit (meaningful on the modulator only).
    pub con: u8,
}

/// A decoded BNK instrument.
#[derive(Debug, Clone, Copy, Default)]
pub struct BnkInstrument {
    /// Non-zero when the instrument targets a percussion voice.
    pub percussive: bool,
    /// Percussion voice number for percussive instruments.
    pub voice_num: u8,
    /// Modulator parameters.
    pub modulator: BnkOperator,
    /// Carrier parameters.
    pub carrier: BnkOperator,
    /// Modulator waveform select.
    pub mod_wave: u8,
    /// Carrier waveform select.
    pub car_wave: u8,
}

impl BnkOperator {
    fn parse(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(BnkOperator {
            ksl: r.read_u8()?,
            multiple: r.read_u8()?,
            feedback: r.read_u8()?,
            attack: r.read_u8()?,
            sustain: r.read_u8()?,
            eg: r.read_u8()?,
            decay: r.read_u8()?,
            release: r.read_u8()?,
            total_level: r.read_u8()?,
            am: r.read_u8()?,
            vib: r.read_u8()?,
            ksr: r.read_u8()?,
            con: r.read_u8()?,
        })
    }

    /// Register 0x20 image (AM/VIB/EGT/KSR/MULT).
    pub fn reg20(&self) -> u8 {
        (self.am & 1) << 7
            | (self.vib & 1) << 6
            | (self.eg & 1) << 5
            | (self.ksr & 1) << 4
            | (self.multiple & 0x0f)
    }

    /// Register 0x40 image (KSL/TL).
    pub fn reg40(&self) -> u8 {
        (self.ksl & 3) << 6 | (self.total_level & 0x3f)
    }

    /// Register 0x60 image (AR/DR).
    pub fn reg60(&self) -> u8 {
        (self.attack & 0x0f) << 4 | (self.decay & 0x0f)
    }

    /// Register 0x80 image (SL/RR).
    pub fn reg80(&self) -> u8 {
        (self.sustain & 0x0f) << 4 | (self.release & 0x0f)
    }
}

impl BnkInstrument {
    /// Register 0xC0 image (feedback/connection, from the modulator record).
    pub fn reg_c0(&self) -> u8 {
        (self.modulator.feedback & 7) << 1 | (self.modulator.con & 1)
    }
}

#[derive(Debug, Clone)]
struct NameRecord {
    /// Index into the data record array.
    index: u16,
    /// Lowercased instrument name.
    name: String,
}

/// A loaded BNK file with lazy instrument resolution.
#[derive(Debug)]
pub struct InstrumentBank {
    data: Vec<u8>,
    names: Vec<NameRecord>,
    data_offset: usize,
    /// Data records decoded so far, keyed by record index.
    cache: HashMap<u16, BnkInstrument>,
}

impl InstrumentBank {
    /// Parse the bank header and name table. Instrument parameter records
    /// are left untouched until first lookup.
    pub fn load(data: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(data);
        let _version_major = r.read_u8()?;
        let _version_minor = r.read_u8()?;
        if r.read_bytes(SIGNATURE.len())? != SIGNATURE {
            return Err(ReplayerError::Malformed("bad BNK signature".into()));
        }
        let _num_used = r.read_u16()?;
        let num_instruments = r.read_u16()? as usize;
        let name_offset = r.read_u32()? as usize;
        let data_offset = r.read_u32()? as usize;

        let name_table_len = num_instruments
            .checked_mul(NAME_RECORD_SIZE)
            .ok_or_else(|| ReplayerError::Malformed("BNK name table overflow".into()))?;
        if name_offset.checked_add(name_table_len).map_or(true, |end| end > data.len())
            || data_offset > data.len()
        {
            return Err(ReplayerError::Malformed(
                "BNK table offsets past end of file".into(),
            ));
        }

        r.seek(name_offset)?;
        let mut names = Vec::with_capacity(num_instruments);
        for _ in 0..num_instruments {
            let index = r.read_u16()?;
            let _flags = r.read_u8()?;
            let raw = r.read_bytes(9)?;
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            let name = String::from_utf8_lossy(&raw[..end]).to_lowercase();
            names.push(NameRecord { index, name });
        }

        Ok(InstrumentBank {
            data: data.to_vec(),
            names,
            data_offset,
            cache: HashMap::new(),
        })
    }

    /// Number of named instruments.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the bank carries no instruments.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Resolve an instrument by name (case-insensitive exact match).
    ///
    /// The same unknown name always produces the same
    /// [`ReplayerError::UnknownInstrument`]; there is no silent default.
    pub fn lookup(&mut self, name: &str) -> Result<BnkInstrument> {
        let wanted = name.to_lowercase();
        let index = self
            .names
            .iter()
            .find(|rec| rec.name == wanted)
            .map(|rec| rec.index)
            .ok_or_else(|| ReplayerError::UnknownInstrument(name.to_string()))?;

        if let Some(ins) = self.cache.get(&index) {
            return Ok(*ins);
        }
        let offset = self
            .data_offset
            .checked_add(index as usize * DATA_RECORD_SIZE)
            .ok_or_else(|| ReplayerError::Malformed("BNK data offset overflow".into()))?;
        let mut r = ByteReader::new(&self.data);
        r.seek(offset)?;
        let percussive = r.read_u8()? != 0;
        let voice_num = r.read_u8()?;
        let modulator = BnkOperator::parse(&mut r)?;
        let carrier = BnkOperator::parse(&mut r)?;
        let mod_wave = r.read_u8()?;
        let car_wave = r.read_u8()?;
        let ins = BnkInstrument {
            percussive,
            voice_num,
            modulator,
            carrier,
            mod_wave,
            car_wave,
        };
        self.cache.insert(index, ins);
        Ok(ins)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a minimal valid BNK with the given (name, total_level) pairs.
    pub(crate) fn bank_bytes(instruments: &[(&str, u8)]) -> Vec<u8> {
        let header_len = 2 + 6 + 2 + 2 + 4 + 4;
        let name_offset = header_len;
        let data_offset = name_offset + instruments.len() * NAME_RECORD_SIZE;

        let mut f = Vec::new();
        f.push(1); // version major
        f.push(0); // version minor
        f.extend_from_slice(SIGNATURE);
        f.extend_from_slice(&(instruments.len() as u16).to_le_bytes());
        f.extend_from_slice(&(instruments.len() as u16).to_le_bytes());
        f.extend_from_slice(&(name_offset as u32).to_le_bytes());
        f.extend_from_slice(&(data_offset as u32).to_le_bytes());
        for (i, (name, _)) in instruments.iter().enumerate() {
            f.extend_from_slice(&(i as u16).to_le_bytes());
            f.push(1); // flags: in use
            let mut bytes = [0u8; 9];
            let n = name.len().min(9);
            bytes[..n].copy_from_slice(&name.as_bytes()[..n]);
            f.extend_from_slice(&bytes);
        }
        for (_, level) in instruments {
            let mut rec = [0u8; DATA_RECORD_SIZE];
            rec[0] = 0; // melodic
            rec[2 + 8] = *level; // modulator total level
            rec[2 + 3] = 0x0f; // modulator attack
            rec[2 + 13 + 3] = 0x0f; // carrier attack
            rec[2 + 13 + 8] = 0; // carrier full volume
            f.extend_from_slice(&rec);
        }
        f
    }

    #[test]
    fn lookup_is_case_insensitive_and_cached() {
        let data = bank_bytes(&[("PIANO1", 0x12), ("flute", 0x34)]);
        let mut bank = InstrumentBank::load(&data).unwrap();
        assert_eq!(bank.len(), 2);
        let a = bank.lookup("piano1").unwrap();
        assert_eq!(a.modulator.total_level, 0x12);
        let b = bank.lookup("Piano1").unwrap();
        assert_eq!(b.modulator.total_level, 0x12);
        assert_eq!(bank.cache.len(), 1);
        assert_eq!(bank.lookup("FLUTE").unwrap().modulator.total_level, 0x34);
    }

    #[test]
    fn unknown_name_fails_deterministically() {
        let data = bank_bytes(&[("piano1", 0)]);
        let mut bank = InstrumentBank::load(&data).unwrap();
        for _ in 0..3 {
            match bank.lookup("missing") {
                Err(ReplayerError::UnknownInstrument(name)) => assert_eq!(name, "missing"),
                other => panic!("expected UnknownInstrument, got {other:?}"),
            }
        }
    }

    #[test]
    fn offsets_past_eof_are_rejected() {
        let mut data = bank_bytes(&[("piano1", 0)]);
        // Point the name table past the end of the buffer.
        let past_eof = data.len() as u32 + 100;
        data[12..16].copy_from_slice(&past_eof.to_le_bytes());
        assert!(matches!(
            InstrumentBank::load(&data),
            Err(ReplayerError::Malformed(_))
        ));
    }

    #[test]
    fn register_images_pack_fields() {
        let op = BnkOperator {
            ksl: 2,
            multiple: 3,
            feedback: 5,
            attack: 0xf,
            sustain: 7,
            eg: 1,
            decay: 2,
            release: 4,
            total_level: 0x15,
            am: 1,
            vib: 0,
            ksr: 1,
            con: 1,
        };
        assert_eq!(op.reg20(), 0x80 | 0x20 | 0x10 | 3);
        assert_eq!(op.reg40(), (2 << 6) | 0x15);
        assert_eq!(op.reg60(), 0xf2);
        assert_eq!(op.reg80(), 0x74);
        let ins = BnkInstrument {
            modulator: op,
            ..Default::default()
        };
        assert_eq!(ins.reg_c0(), (5 << 1) | 1);
    }
}
