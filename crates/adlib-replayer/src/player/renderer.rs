//! PCM renderer driving one chip from one sequence decoder.

use std::thread;
use std::time::Duration;

use opl2::{Opl2, NATIVE_SAMPLE_RATE};

use crate::player::control::{sequence_length_ms, PlayerControl};
use crate::player::surround::Surround;
use crate::sequencer::Sequencer;
use crate::Result;

/// Length of the linear fade applied after the sequence ends.
pub const FADE_SAMPLES: usize = 16384;

/// Sleep granularity while paused.
const PAUSE_POLL: Duration = Duration::from_millis(10);

/// Renderer lifecycle. `Finished` is terminal and only reached by natural
/// exhaustion of the sequence; an external stop lands in `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    /// Created or reset; the decoder has not been initialized yet.
    Initializing,
    /// Producing samples.
    Playing,
    /// Replaying the decode to reach a seek target.
    Seeking,
    /// Idling on a pause flag.
    Pausing,
    /// A stop request was observed.
    Stopping,
    /// Stopped on request.
    Stopped,
    /// The sequence ran out and the end fade has been written.
    Finished,
}

/// Destination for rendered PCM.
///
/// `frames` is interleaved stereo, left sample first. A blocking
/// implementation (such as a bounded ring buffer) paces the render loop to
/// real time; a non-blocking one renders as fast as the decode allows.
pub trait PcmSink {
    /// Write a batch of interleaved stereo samples.
    fn write(&mut self, frames: &[i16]) -> Result<()>;
}

/// Sink collecting everything in memory.
#[derive(Debug, Default)]
pub struct BufferSink {
    /// Interleaved stereo samples written so far.
    pub frames: Vec<i16>,
}

impl BufferSink {
    /// Create an empty collecting sink.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PcmSink for BufferSink {
    fn write(&mut self, frames: &[i16]) -> Result<()> {
        self.frames.extend_from_slice(frames);
        Ok(())
    }
}

/// Owns one chip and one decoder; turns decode steps into PCM.
pub struct Renderer {
    chip: Opl2,
    sequencer: Box<dyn Sequencer>,
    surround: Option<Surround>,
    state: RenderState,
    sample_rate: u32,
    elapsed_ms: f64,
    scratch: Vec<i16>,
}

impl Renderer {
    /// Build a renderer at the chip's native rate.
    pub fn new(sequencer: Box<dyn Sequencer>, surround: bool) -> Self {
        Renderer {
            chip: Opl2::new(),
            sequencer,
            surround: surround.then(Surround::new),
            state: RenderState::Initializing,
            sample_rate: NATIVE_SAMPLE_RATE,
            elapsed_ms: 0.0,
            scratch: Vec::with_capacity(8192),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RenderState {
        self.state
    }

    /// Output sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Rendered position in milliseconds.
    pub fn position_ms(&self) -> u64 {
        self.elapsed_ms as u64
    }

    /// Format name of the loaded sequence.
    pub fn format_name(&self) -> &'static str {
        self.sequencer.format_name()
    }

    /// Sequence length by bounded dry decode. Leaves the renderer needing
    /// re-initialization, which the next render or seek performs.
    pub fn length_ms(&mut self) -> u64 {
        let ms = sequence_length_ms(self.sequencer.as_mut());
        self.state = RenderState::Initializing;
        ms
    }

    fn begin(&mut self) {
        self.sequencer.init(&mut self.chip);
        if let Some(s) = self.surround.as_mut() {
            s.reset();
        }
        self.elapsed_ms = 0.0;
        self.state = RenderState::Playing;
    }

    /// Samples covered by the step the decoder just produced.
    fn step_samples(&self) -> usize {
        let hz = self.sequencer.refresh_hz();
        if hz <= 0.0 {
            return 1;
        }
        (f64::from(self.sample_rate) / hz).round().max(1.0) as usize
    }

    fn push_frame(&mut self, left: i16, right: i16) {
        let (left, right) = match self.surround.as_mut() {
            Some(s) => s.process(left, right),
            None => (left, right),
        };
        self.scratch.push(left);
        self.scratch.push(right);
    }

    /// Decode one step and render its samples into `sink`. Returns whether
    /// more steps remain; on the last step the end fade is rendered too.
    pub fn render_step(&mut self, sink: &mut dyn PcmSink) -> Result<bool> {
        if self.state == RenderState::Initializing {
            self.begin();
        }
        let more = self.sequencer.advance(&mut self.chip);
        if more {
            let count = self.step_samples();
            self.scratch.clear();
            for _ in 0..count {
                let (l, r) = self.chip.tick();
                self.push_frame(l, r);
            }
            sink.write(&self.scratch)?;
            self.elapsed_ms += count as f64 * 1000.0 / f64::from(self.sample_rate);
        } else {
            self.render_fade(sink)?;
            self.state = RenderState::Finished;
        }
        Ok(more)
    }

    /// Linear ramp to silence over the final [`FADE_SAMPLES`] chip ticks,
    /// letting held notes ring down instead of cutting.
    fn render_fade(&mut self, sink: &mut dyn PcmSink) -> Result<()> {
        self.scratch.clear();
        for i in 0..FADE_SAMPLES {
            let (l, r) = self.chip.tick();
            let gain = (FADE_SAMPLES - i) as i32;
            let l = (i32::from(l) * gain / FADE_SAMPLES as i32) as i16;
            let r = (i32::from(r) * gain / FADE_SAMPLES as i32) as i16;
            self.push_frame(l, r);
            if self.scratch.len() >= 8192 {
                sink.write(&self.scratch)?;
                self.scratch.clear();
            }
        }
        if !self.scratch.is_empty() {
            sink.write(&self.scratch)?;
            self.scratch.clear();
        }
        self.elapsed_ms += FADE_SAMPLES as f64 * 1000.0 / f64::from(self.sample_rate);
        Ok(())
    }

    /// Seek by replaying the decode from position zero, ticking the chip
    /// without producing output, until `target_ms` is covered or the
    /// sequence ends. The chip state afterwards matches linear playback to
    /// the same step boundary exactly.
    pub fn seek(&mut self, target_ms: u64) {
        self.state = RenderState::Seeking;
        self.sequencer.init(&mut self.chip);
        if let Some(s) = self.surround.as_mut() {
            s.reset();
        }
        self.elapsed_ms = 0.0;
        let target = target_ms as f64;
        while self.elapsed_ms < target {
            if !self.sequencer.advance(&mut self.chip) {
                break;
            }
            let count = self.step_samples();
            for _ in 0..count {
                self.chip.tick();
            }
            self.elapsed_ms += count as f64 * 1000.0 / f64::from(self.sample_rate);
        }
        self.state = RenderState::Playing;
    }

    /// Drive the full render loop, polling `control` between steps.
    /// Returns when the sequence finishes or a stop is requested.
    pub fn run(&mut self, sink: &mut dyn PcmSink, control: &PlayerControl) -> Result<()> {
        if self.state == RenderState::Initializing {
            self.begin();
        }
        loop {
            if control.stop_requested() {
                self.state = RenderState::Stopping;
                break;
            }
            if let Some(target) = control.take_seek_target() {
                self.seek(target);
                control.set_position_ms(self.position_ms());
                continue;
            }
            if control.is_paused() {
                self.state = RenderState::Pausing;
                thread::sleep(PAUSE_POLL);
                continue;
            }
            self.state = RenderState::Playing;
            let more = self.render_step(sink)?;
            control.set_position_ms(self.position_ms());
            if !more {
                return Ok(());
            }
        }
        self.state = RenderState::Stopped;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::DroSequencer;

    /// DRO v2 programming one loud voice, keyed on across `delays_ms`.
    fn tone_file(delays_ms: &[u8]) -> Vec<u8> {
        let codemap = [0x20u8, 0x23, 0x40, 0x43, 0x60, 0x63, 0x80, 0x83, 0xa0, 0xb0];
        let mut stream = vec![
            0x02, 0x21, 0x03, 0x21, // multipliers
            0x04, 0x10, 0x05, 0x00, // levels
            0x06, 0xf4, 0x07, 0xf4, // attack/decay
            0x08, 0x7f, 0x09, 0x7f, // sustain/release
            0x0a, 0x57, 0x0b, 0x31, // frequency + key on
        ];
        for &d in delays_ms {
            stream.extend_from_slice(&[0x00, d]);
        }
        let mut f = Vec::new();
        f.extend_from_slice(b"DBRAWOPL");
        f.extend_from_slice(&2u16.to_le_bytes());
        f.extend_from_slice(&0u16.to_le_bytes());
        f.extend_from_slice(&((stream.len() / 2) as u32).to_le_bytes());
        f.extend_from_slice(&0u32.to_le_bytes());
        f.push(0); // hardware
        f.push(0); // format
        f.push(0); // compression
        f.push(0x00); // short delay code
        f.push(0x01); // long delay code
        f.push(codemap.len() as u8);
        f.extend_from_slice(&codemap);
        f.extend_from_slice(&stream);
        f
    }

    fn tone_renderer(delays_ms: &[u8], surround: bool) -> Renderer {
        let seq = DroSequencer::load(&tone_file(delays_ms)).unwrap();
        Renderer::new(Box::new(seq), surround)
    }

    #[test]
    fn renders_steps_then_fades_to_silence() {
        let mut renderer = tone_renderer(&[100, 100], false);
        let mut sink = BufferSink::new();
        while renderer.render_step(&mut sink).unwrap() {}
        assert_eq!(renderer.state(), RenderState::Finished);

        // One 100 ms step per delay plus the fade tail.
        let step = (49_716f64 / 10.0).round() as usize;
        assert_eq!(sink.frames.len(), (2 * step + FADE_SAMPLES) * 2);
        // The keyed-on voice is audible in the body.
        assert!(sink.frames[..step].iter().any(|&s| s != 0));
        // The fade lands at silence.
        let tail = &sink.frames[sink.frames.len() - 8..];
        assert!(tail.iter().all(|&s| s.abs() <= 1));
    }

    #[test]
    fn seek_matches_linear_playback() {
        let mut linear = tone_renderer(&[100, 100, 100, 100], false);
        let mut full = BufferSink::new();
        while linear.render_step(&mut full).unwrap() {}

        let mut seeked = tone_renderer(&[100, 100, 100, 100], false);
        seeked.seek(200);
        let mut rest = BufferSink::new();
        while seeked.render_step(&mut rest).unwrap() {}

        // 200 ms is two whole steps in.
        let step = (49_716f64 / 10.0).round() as usize;
        assert_eq!(full.frames[2 * step * 2..], rest.frames[..]);
    }

    #[test]
    fn run_honors_stop_request() {
        let mut renderer = tone_renderer(&[100; 50], false);
        let control = PlayerControl::new();
        control.request_stop();
        let mut sink = BufferSink::new();
        renderer.run(&mut sink, &control).unwrap();
        assert_eq!(renderer.state(), RenderState::Stopped);
        assert!(sink.frames.is_empty());
    }

    #[test]
    fn run_honors_seek_request_and_reports_position() {
        let mut renderer = tone_renderer(&[100, 100, 100], false);
        let control = PlayerControl::new();
        control.request_seek(200);
        let mut sink = BufferSink::new();
        renderer.run(&mut sink, &control).unwrap();
        assert_eq!(renderer.state(), RenderState::Finished);
        // Only the final step plus the fade was rendered.
        let step = (49_716f64 / 10.0).round() as usize;
        assert_eq!(sink.frames.len(), (step + FADE_SAMPLES) * 2);
        assert!(control.position_ms() >= 300);
    }

    #[test]
    fn surround_widens_the_channels() {
        let mut mono = tone_renderer(&[100], false);
        let mut plain = BufferSink::new();
        while mono.render_step(&mut plain).unwrap() {}

        let mut wide = tone_renderer(&[100], true);
        let mut widened = BufferSink::new();
        while wide.render_step(&mut widened).unwrap() {}

        assert_eq!(plain.frames.len(), widened.frames.len());
        assert_ne!(plain.frames, widened.frames);
    }

    #[test]
    fn length_query_then_render_still_works() {
        let mut renderer = tone_renderer(&[100, 100], false);
        let length = renderer.length_ms();
        assert_eq!(length, 200);
        let mut sink = BufferSink::new();
        while renderer.render_step(&mut sink).unwrap() {}
        assert_eq!(renderer.state(), RenderState::Finished);
    }
}
