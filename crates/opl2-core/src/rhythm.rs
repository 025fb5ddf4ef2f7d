//! Rhythm-mode percussion voices.
//!
//! In rhythm mode channels 6 to 8 stop producing melodic output and their
//! six operators are cross-wired into five percussion voices. The phase-bit
//! network below is carried over from the real chip and must not be
//! "simplified": hi-hat and top cymbal share a pseudo-random bit derived
//! from operator phase bits, snare mixes a phase bit with the noise
//! generator, and every percussion output is doubled.

use crate::channel::Channel;
use crate::tables::{ENV_QUIET, FREQ_SH};

/// Compute the summed output of the five percussion voices for this tick.
/// `channels` is the full 9-channel array; only 6..=8 are consulted.
pub(crate) fn rhythm_output(channels: &mut [Channel; 9], lfo_am: u32, noise_bit: u32) -> i32 {
    let mut output = 0i32;

    // Bass drum: channel 6 runs its normal modulator feedback loop, but
    // with the additive connection only the carrier reaches the output.
    {
        let ch = &mut channels[6];
        let fb_sum = ch.slots[0].out[0] + ch.slots[0].out[1];
        ch.slots[0].out[0] = ch.slots[0].out[1];
        let env0 = ch.slots[0].attenuation(lfo_am);
        let out0 = if env0 < ENV_QUIET {
            let modulation = if ch.slots[0].fb_shift != 0 {
                (fb_sum << ch.slots[0].fb_shift) >> 16
            } else {
                0
            };
            ch.slots[0].output(env0, modulation)
        } else {
            0
        };
        ch.slots[0].out[1] = out0;

        let env1 = ch.slots[1].attenuation(lfo_am);
        if env1 < ENV_QUIET {
            let modulation = if ch.additive { 0 } else { ch.slots[0].out[0] };
            output += ch.slots[1].output(env1, modulation) * 2;
        }
    }

    // Shared pseudo-random bit: hi-hat phase bits 2/3/7 of channel 7's
    // modulator, OR'd with bits 3/5 of channel 8's carrier.
    let hh_bits = {
        let cnt = channels[7].slots[0].phase_acc >> FREQ_SH;
        let bit7 = (cnt >> 7) & 1;
        let bit3 = (cnt >> 3) & 1;
        let bit2 = (cnt >> 2) & 1;
        ((bit2 ^ bit7) | bit3) != 0
    };
    let cym_bits = {
        let cnt = channels[8].slots[1].phase_acc >> FREQ_SH;
        let bit5 = (cnt >> 5) & 1;
        let bit3 = (cnt >> 3) & 1;
        (bit5 ^ bit3) != 0
    };

    // Hi-hat: channel 7 modulator at a forced phase, noise-perturbed.
    let env = channels[7].slots[0].attenuation(lfo_am);
    if env < ENV_QUIET {
        let mut phase: u32 = if hh_bits || cym_bits { 0x234 } else { 0xd0 };
        if noise_bit != 0 {
            phase = if phase & 0x200 != 0 { 0x2d0 } else { 0x34 };
        }
        output += channels[7].slots[0].output_at(phase, env) * 2;
    }

    // Snare drum: channel 7 carrier keyed off phase bit 8 of the hi-hat
    // operator, with the noise bit flipping the half-period.
    let env = channels[7].slots[1].attenuation(lfo_am);
    if env < ENV_QUIET {
        let bit8 = (channels[7].slots[0].phase_acc >> FREQ_SH >> 8) & 1;
        let mut phase: u32 = if bit8 != 0 { 0x200 } else { 0x100 };
        if noise_bit != 0 {
            phase ^= 0x100;
        }
        output += channels[7].slots[1].output_at(phase, env) * 2;
    }

    // Tom-tom: channel 8 modulator, plain phase generator.
    let env = channels[8].slots[0].attenuation(lfo_am);
    if env < ENV_QUIET {
        output += channels[8].slots[0].output(env, 0) * 2;
    }

    // Top cymbal: channel 8 carrier on the same bit network as the hi-hat,
    // without the noise perturbation.
    let env = channels[8].slots[1].attenuation(lfo_am);
    if env < ENV_QUIET {
        let phase: u32 = if hh_bits || cym_bits { 0x300 } else { 0x100 };
        output += channels[8].slots[1].output_at(phase, env) * 2;
    }

    output
}
