//! WAV file export.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::player::{PcmSink, Renderer};
use crate::{ReplayerError, Result};

/// PCM sink writing a 16-bit interleaved stereo WAV file.
pub struct WavSink {
    writer: hound::WavWriter<BufWriter<File>>,
}

impl WavSink {
    /// Create the output file.
    pub fn create<P: AsRef<Path>>(path: P, sample_rate: u32) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)
            .map_err(|e| ReplayerError::Audio(format!("failed to create WAV file: {e}")))?;
        Ok(WavSink { writer })
    }

    /// Flush and close the file, fixing up the header.
    pub fn finalize(self) -> Result<()> {
        self.writer
            .finalize()
            .map_err(|e| ReplayerError::Audio(format!("failed to finalize WAV file: {e}")))
    }
}

impl PcmSink for WavSink {
    fn write(&mut self, frames: &[i16]) -> Result<()> {
        for &sample in frames {
            self.writer
                .write_sample(sample)
                .map_err(|e| ReplayerError::Audio(format!("failed to write sample: {e}")))?;
        }
        Ok(())
    }
}

/// Render the whole sequence to `path` at the renderer's sample rate.
pub fn export_to_wav<P: AsRef<Path>>(renderer: &mut Renderer, path: P) -> Result<()> {
    let mut sink = WavSink::create(path, renderer.sample_rate())?;
    while renderer.render_step(&mut sink)? {}
    sink.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::DroSequencer;

    #[test]
    fn exported_file_has_stereo_spec_and_samples() {
        // Minimal DRO v1: one register write and a 50 ms delay.
        let mut data = Vec::new();
        data.extend_from_slice(b"DBRAWOPL");
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&50u32.to_le_bytes());
        data.extend_from_slice(&4u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&[0x20, 0x21, 0x00, 49]);

        let seq = DroSequencer::load(&data).unwrap();
        let mut renderer = Renderer::new(Box::new(seq), false);
        let path = std::env::temp_dir().join("adlib_export_test.wav");
        export_to_wav(&mut renderer, &path).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 49_716);
        assert_eq!(spec.bits_per_sample, 16);
        assert!(reader.len() > 0);
        drop(reader);
        let _ = std::fs::remove_file(&path);
    }
}
