//! DOSBox raw OPL capture (DRO) decoder.
//!
//! DRO files are literal register-write logs recorded from a running
//! emulator, so decoding is a straight replay: apply `(index, value)` pairs
//! until a delay command, then hand control back to the renderer. Two header
//! generations exist with different layouts; both carry the `DBRAWOPL`
//! magic.

use opl2::Opl2;

use crate::io::ByteReader;
use crate::sequencer::Sequencer;
use crate::{ReplayerError, Result};

/// File magic shared by both header generations.
const MAGIC: &[u8; 8] = b"DBRAWOPL";

/// Hardware the capture was recorded from. Informational; playback always
/// drives a single OPL2 and drops writes addressed to a second chip or the
/// OPL3 high register bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DroHardware {
    /// Single OPL2.
    Opl2,
    /// Two OPL2s (early dual-chip SoundBlaster Pro).
    DualOpl2,
    /// OPL3.
    Opl3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Version {
    /// DOSBox up to 0.62: reserved command bytes inline in the stream.
    V1,
    /// DOSBox 0.73+: codemap-compressed register indices, explicit delay
    /// codes in the header.
    V2,
}

/// Register-dump sequencer for DRO captures.
pub struct DroSequencer {
    data: Vec<u8>,
    version: Version,
    hardware: DroHardware,
    /// Declared song length in milliseconds (v1 files often misreport it).
    length_ms: u32,
    /// Offset of the first command byte.
    stream_start: usize,
    /// v2 only: end of the declared command-pair region, clamped to the
    /// bytes actually present.
    stream_end: usize,
    /// v2 codemap: stream code -> register index.
    codemap: Vec<u8>,
    short_delay_code: u8,
    long_delay_code: u8,

    pos: usize,
    /// Which chip the v1 select commands last addressed.
    chip_select: u8,
    /// Delay of the step `advance` just finished, milliseconds.
    delay_ms: u32,
}

impl DroSequencer {
    /// Cheap magic check used by format detection.
    pub fn probe(data: &[u8]) -> bool {
        data.len() >= MAGIC.len() && &data[..MAGIC.len()] == MAGIC
    }

    /// Parse the header. Fails before any chip state is touched.
    pub fn load(data: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(data);
        if r.read_bytes(MAGIC.len())? != MAGIC {
            return Err(ReplayerError::Malformed("bad DRO magic".into()));
        }
        let version_major = r.read_u16()?;
        let version_minor = r.read_u16()?;

        if version_major == 2 {
            Self::load_v2(data, &mut r)
        } else if version_major <= 1 && version_minor <= 1 {
            Self::load_v1(data, &mut r)
        } else {
            Err(ReplayerError::Malformed(format!(
                "unsupported DRO version {version_major}.{version_minor}"
            )))
        }
    }

    fn load_v1(data: &[u8], r: &mut ByteReader<'_>) -> Result<Self> {
        let length_ms = r.read_u32()?;
        let _length_bytes = r.read_u32()?;
        let hardware = hardware_type(r.read_u8()?)?;
        // Early writers stored the hardware type as a single byte, so the
        // remaining 3 bytes of the 32-bit field may already be commands.
        // If any of them is non-zero, rewind.
        let mark = r.pos();
        let pad = r.read_bytes(3).unwrap_or(&[1, 1, 1]);
        if pad.iter().any(|&b| b != 0) {
            r.seek(mark)?;
        }
        let stream_start = r.pos();
        Ok(DroSequencer {
            data: data.to_vec(),
            version: Version::V1,
            hardware,
            length_ms,
            stream_start,
            stream_end: data.len(),
            codemap: Vec::new(),
            short_delay_code: 0,
            long_delay_code: 0,
            pos: stream_start,
            chip_select: 0,
            delay_ms: 0,
        })
    }

    fn load_v2(data: &[u8], r: &mut ByteReader<'_>) -> Result<Self> {
        let length_pairs = r.read_u32()? as usize;
        let length_ms = r.read_u32()?;
        let hardware = hardware_type(r.read_u8()?)?;
        let format = r.read_u8()?;
        if format != 0 {
            return Err(ReplayerError::Malformed(format!(
                "unsupported DRO v2 format {format}"
            )));
        }
        let compression = r.read_u8()?;
        if compression != 0 {
            return Err(ReplayerError::Malformed(format!(
                "unsupported DRO v2 compression {compression}"
            )));
        }
        let short_delay_code = r.read_u8()?;
        let long_delay_code = r.read_u8()?;
        let codemap_len = r.read_u8()? as usize;
        let codemap = r.read_bytes(codemap_len)?.to_vec();

        let stream_start = r.pos();
        // Clamp the declared pair count against the bytes actually present;
        // truncated captures are common.
        let declared_end = length_pairs
            .checked_mul(2)
            .and_then(|n| n.checked_add(stream_start))
            .unwrap_or(data.len());
        let stream_end = declared_end.min(data.len());

        Ok(DroSequencer {
            data: data.to_vec(),
            version: Version::V2,
            hardware,
            length_ms,
            stream_start,
            stream_end,
            codemap,
            short_delay_code,
            long_delay_code,
            pos: stream_start,
            chip_select: 0,
            delay_ms: 0,
        })
    }

    /// Hardware type declared in the header.
    pub fn hardware(&self) -> DroHardware {
        self.hardware
    }

    /// Declared length in milliseconds.
    pub fn declared_length_ms(&self) -> u32 {
        self.length_ms
    }

    fn advance_v1(&mut self, chip: &mut Opl2) -> Result<bool> {
        let mut r = ByteReader::new(&self.data);
        r.seek(self.pos)?;
        loop {
            let code = r.read_u8()?;
            match code {
                0x00 => {
                    self.delay_ms = r.read_u8()? as u32 + 1;
                    self.pos = r.pos();
                    return Ok(true);
                }
                0x01 => {
                    self.delay_ms = r.read_u16()? as u32 + 1;
                    self.pos = r.pos();
                    return Ok(true);
                }
                0x02 => self.chip_select = 0,
                0x03 => self.chip_select = 1,
                0x04 => {
                    // Escape: next byte is a literal register index that
                    // would otherwise collide with a reserved command.
                    let reg = r.read_u8()?;
                    let value = r.read_u8()?;
                    if self.chip_select == 0 {
                        chip.write_register(reg, value);
                    }
                }
                reg => {
                    let value = r.read_u8()?;
                    if self.chip_select == 0 {
                        chip.write_register(reg, value);
                    }
                }
            }
            self.pos = r.pos();
        }
    }

    fn advance_v2(&mut self, chip: &mut Opl2) -> Result<bool> {
        let mut r = ByteReader::new(&self.data[..self.stream_end]);
        r.seek(self.pos)?;
        loop {
            let code = r.read_u8()?;
            let value = r.read_u8()?;
            self.pos = r.pos();
            if code == self.short_delay_code {
                self.delay_ms = value as u32;
                return Ok(true);
            }
            if code == self.long_delay_code {
                self.delay_ms = value as u32 * 256;
                return Ok(true);
            }
            // High bit selects the second register bank (OPL3 captures);
            // a single OPL2 only has bank 0.
            let bank = code >> 7;
            if let Some(&reg) = self.codemap.get((code & 0x7f) as usize) {
                if bank == 0 {
                    chip.write_register(reg, value);
                }
            }
        }
    }
}

impl Sequencer for DroSequencer {
    fn init(&mut self, chip: &mut Opl2) {
        chip.reset();
        self.pos = self.stream_start;
        self.chip_select = 0;
        self.delay_ms = 0;
    }

    fn advance(&mut self, chip: &mut Opl2) -> bool {
        let result = match self.version {
            Version::V1 => self.advance_v1(chip),
            Version::V2 => self.advance_v2(chip),
        };
        // Truncated streams end the sequence; they never error.
        result.unwrap_or(false)
    }

    fn refresh_hz(&self) -> f64 {
        if self.delay_ms == 0 {
            1000.0
        } else {
            1000.0 / self.delay_ms as f64
        }
    }

    fn format_name(&self) -> &'static str {
        match self.version {
            Version::V1 => "DOSBox register log (DRO v1)",
            Version::V2 => "DOSBox register log (DRO v2)",
        }
    }
}

fn hardware_type(raw: u8) -> Result<DroHardware> {
    match raw {
        0 => Ok(DroHardware::Opl2),
        1 => Ok(DroHardware::DualOpl2),
        2 => Ok(DroHardware::Opl3),
        other => Err(ReplayerError::Malformed(format!(
            "unknown DRO hardware type {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn v2_file(stream: &[u8], codemap: &[u8]) -> Vec<u8> {
        let mut f = Vec::new();
        f.extend_from_slice(MAGIC);
        f.extend_from_slice(&2u16.to_le_bytes()); // version major
        f.extend_from_slice(&0u16.to_le_bytes()); // version minor
        f.extend_from_slice(&((stream.len() / 2) as u32).to_le_bytes());
        f.extend_from_slice(&1000u32.to_le_bytes()); // length ms
        f.push(0); // hardware: OPL2
        f.push(0); // format
        f.push(0); // compression
        f.push(0x00); // short delay code
        f.push(0x01); // long delay code
        f.push(codemap.len() as u8);
        f.extend_from_slice(codemap);
        f.extend_from_slice(stream);
        f
    }

    fn v1_file(stream: &[u8]) -> Vec<u8> {
        let mut f = Vec::new();
        f.extend_from_slice(MAGIC);
        f.extend_from_slice(&0u16.to_le_bytes());
        f.extend_from_slice(&1u16.to_le_bytes());
        f.extend_from_slice(&1000u32.to_le_bytes());
        f.extend_from_slice(&(stream.len() as u32).to_le_bytes());
        f.extend_from_slice(&0u32.to_le_bytes()); // hardware type, padded form
        f.extend_from_slice(stream);
        f
    }

    #[test]
    fn v2_short_delay_sets_refresh_rate() {
        // codemap entry 0x02 -> register 0xb0, then a 5 ms short delay.
        let file = v2_file(&[0x02, 0x31, 0x00, 0x05], &[0x20, 0xa0, 0xb0]);
        let mut seq = DroSequencer::load(&file).unwrap();
        let mut chip = Opl2::new();
        seq.init(&mut chip);
        assert!(seq.advance(&mut chip));
        assert_abs_diff_eq!(seq.refresh_hz(), 1000.0 / 5.0);
        // Nothing left: the next advance reports exhaustion.
        assert!(!seq.advance(&mut chip));
    }

    #[test]
    fn v2_long_delay_is_scaled() {
        let file = v2_file(&[0x01, 0x02], &[]);
        let mut seq = DroSequencer::load(&file).unwrap();
        let mut chip = Opl2::new();
        seq.init(&mut chip);
        assert!(seq.advance(&mut chip));
        assert_abs_diff_eq!(seq.refresh_hz(), 1000.0 / 512.0, epsilon = 1e-12);
    }

    #[test]
    fn v2_pair_count_is_clamped_to_stream() {
        let mut file = v2_file(&[0x00, 0x05], &[]);
        // Declare far more pairs than are present.
        let count_at = MAGIC.len() + 4;
        file[count_at..count_at + 4].copy_from_slice(&1_000_000u32.to_le_bytes());
        let mut seq = DroSequencer::load(&file).unwrap();
        let mut chip = Opl2::new();
        seq.init(&mut chip);
        assert!(seq.advance(&mut chip));
        assert!(!seq.advance(&mut chip));
    }

    #[test]
    fn v1_delays_add_one() {
        let file = v1_file(&[0xb0, 0x31, 0x00, 0x04, 0x01, 0xff, 0x01]);
        let mut seq = DroSequencer::load(&file).unwrap();
        let mut chip = Opl2::new();
        seq.init(&mut chip);
        assert!(seq.advance(&mut chip));
        assert_abs_diff_eq!(seq.refresh_hz(), 1000.0 / 5.0);
        assert!(seq.advance(&mut chip));
        assert_abs_diff_eq!(seq.refresh_hz(), 1000.0 / 512.0, epsilon = 1e-12);
        assert!(!seq.advance(&mut chip));
    }

    #[test]
    fn v1_detects_byte_sized_hardware_field() {
        // Hand-build a v1 header whose hardware field is a single byte
        // immediately followed by command data.
        let mut f = Vec::new();
        f.extend_from_slice(MAGIC);
        f.extend_from_slice(&0u16.to_le_bytes());
        f.extend_from_slice(&1u16.to_le_bytes());
        f.extend_from_slice(&1000u32.to_le_bytes());
        f.extend_from_slice(&4u32.to_le_bytes());
        f.push(0); // hardware type, no padding
        f.extend_from_slice(&[0xb0, 0x31, 0x00, 0x04]);
        let mut seq = DroSequencer::load(&f).unwrap();
        let mut chip = Opl2::new();
        seq.init(&mut chip);
        assert!(seq.advance(&mut chip));
        assert_abs_diff_eq!(seq.refresh_hz(), 1000.0 / 5.0);
    }

    #[test]
    fn second_chip_writes_are_dropped() {
        // Program a loud voice on chip 0, but send the key-on to chip 1
        // via the 0x03 select; it must be dropped and chip 0 stay silent.
        let file = v1_file(&[
            0x20, 0x21, 0x23, 0x21, 0x40, 0x10, 0x43, 0x00, 0x60, 0xf4, 0x63, 0xf4, 0x80,
            0x7f, 0x83, 0x7f, 0xa0, 0x55, // voice setup on chip 0
            0x03, 0xb0, 0x31, // key-on addressed to chip 1
            0x02, 0x00, 0x00, // back to chip 0, 1 ms delay
        ]);
        let mut seq = DroSequencer::load(&file).unwrap();
        let mut chip = Opl2::new();
        seq.init(&mut chip);
        while seq.advance(&mut chip) {}
        let silent: Vec<i16> = (0..1024).map(|_| chip.tick().0).collect();
        assert!(silent.iter().all(|&s| s == 0));
    }

    #[test]
    fn reinit_replays_identically() {
        let file = v2_file(
            &[0x00_u8, 0x20, 0x01, 0x55, 0x02, 0x31, 0x00, 0x05],
            &[0x20, 0xa0, 0xb0],
        );
        let mut seq = DroSequencer::load(&file).unwrap();
        let mut a = Opl2::new();
        seq.init(&mut a);
        while seq.advance(&mut a) {}
        let mut b = Opl2::new();
        seq.init(&mut b);
        while seq.advance(&mut b) {}
        let sa: Vec<i16> = (0..2048).map(|_| a.tick().0).collect();
        let sb: Vec<i16> = (0..2048).map(|_| b.tick().0).collect();
        assert_eq!(sa, sb);
    }
}
