//! Wide-stereo post-processing.
//!
//! The chip itself is mono played on both channels. The widener feeds a
//! delayed, attenuated copy of each channel into the opposite one, which
//! pulls the image apart without changing overall loudness much.

/// Delay length in samples, roughly 10 ms at the chip rate.
const DELAY_SAMPLES: usize = 512;

struct DelayLine {
    buf: Vec<i16>,
    pos: usize,
}

impl DelayLine {
    fn new() -> Self {
        DelayLine {
            buf: vec![0; DELAY_SAMPLES],
            pos: 0,
        }
    }

    fn reset(&mut self) {
        self.buf.fill(0);
        self.pos = 0;
    }

    /// Push one sample, returning the one delayed by the line length.
    fn push(&mut self, sample: i16) -> i16 {
        let out = self.buf[self.pos];
        self.buf[self.pos] = sample;
        self.pos = (self.pos + 1) % DELAY_SAMPLES;
        out
    }
}

/// Stereo widener with one delay line per channel.
pub struct Surround {
    left: DelayLine,
    right: DelayLine,
}

impl Surround {
    /// Create a widener with silent delay lines.
    pub fn new() -> Self {
        Surround {
            left: DelayLine::new(),
            right: DelayLine::new(),
        }
    }

    /// Clear both delay lines.
    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }

    /// Process one stereo frame.
    pub fn process(&mut self, left: i16, right: i16) -> (i16, i16) {
        let delayed_left = self.left.push(left);
        let delayed_right = self.right.push(right);
        let out_left = i32::from(left) + i32::from(delayed_right) / 2;
        let out_right = i32::from(right) + i32::from(delayed_left) / 2;
        (
            out_left.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16,
            out_right.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16,
        )
    }
}

impl Default for Surround {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_stays_silent() {
        let mut s = Surround::new();
        for _ in 0..DELAY_SAMPLES * 2 {
            assert_eq!(s.process(0, 0), (0, 0));
        }
    }

    #[test]
    fn impulse_crosses_to_opposite_channel_after_delay() {
        let mut s = Surround::new();
        let (l, r) = s.process(1000, 0);
        assert_eq!((l, r), (1000, 0));
        for _ in 0..DELAY_SAMPLES - 1 {
            s.process(0, 0);
        }
        let (l, r) = s.process(0, 0);
        assert_eq!(l, 0);
        assert_eq!(r, 500);
    }

    #[test]
    fn reset_clears_the_lines() {
        let mut s = Surround::new();
        s.process(i16::MAX, i16::MAX);
        s.reset();
        for _ in 0..DELAY_SAMPLES * 2 {
            assert_eq!(s.process(0, 0), (0, 0));
        }
    }
}
