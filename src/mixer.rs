//! The per-channel routing primitive every mixing path reduces to.
//!
//! One call moves a single source channel into a single destination channel of two
//! interleaved canonical buffers, applying volume, a signed power-of-two shift, polarity and
//! optional dither. Gain, polarity, mute and channel mapping decisions all end up here.

/// Gain and mode parameters for one [`mix_channel`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MixParams {
    /// Integer multiplier applied before the shift.
    pub volume: i64,
    /// Power-of-two gain; negative values shift right.
    pub shift: i32,
    /// Negate the contribution.
    pub invert: bool,
    /// Add gain-tracking dither before a right shift.
    pub dither: bool,
    /// Overwrite the destination instead of accumulating.
    pub assign: bool,
}

impl Default for MixParams {
    fn default() -> Self {
        Self {
            volume: 1,
            shift: 0,
            invert: false,
            dither: false,
            assign: false,
        }
    }
}

impl MixParams {
    /// Unity gain, overwriting the destination.
    pub fn assign() -> Self {
        Self {
            assign: true,
            ..Self::default()
        }
    }

    /// Unity gain, accumulating into the destination.
    pub fn accumulate() -> Self {
        Self::default()
    }

    /// Builder style shift setter.
    pub fn with_shift(mut self, shift: i32) -> Self {
        self.shift = shift;
        self
    }

    /// Builder style polarity setter.
    pub fn with_invert(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }
}

/// Galois LFSR used for dither. Never reaches the all-zero state.
#[derive(Clone, Debug)]
pub struct Dither {
    state: u32,
}

impl Default for Dither {
    fn default() -> Self {
        Self::new(0x1bad_5eed)
    }
}

impl Dither {
    /// Seeded generator. A zero seed is replaced with a fixed non-zero one.
    pub fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { 0xace1 } else { seed },
        }
    }

    /// Next raw 32-bit value.
    pub fn next_u32(&mut self) -> u32 {
        let lsb = self.state & 1;
        self.state >>= 1;
        if lsb != 0 {
            self.state ^= 0xd000_0001;
        }
        self.state
    }

    /// Dither term for a right shift of `bits`, centred on zero and scaled by `volume`.
    fn term(&mut self, bits: u32, volume: i64) -> i64 {
        if bits == 0 {
            return 0;
        }
        let span = 1i64 << bits.min(31);
        let raw = i64::from(self.next_u32()) & (span - 1);
        (raw - span / 2).saturating_mul(volume)
    }
}

/// Route `frames` samples of one source channel into one destination channel.
///
/// `dst[i] = (assign ? 0 : dst[i]) ± ((src[i] * volume [+ dither]) << shift)`
///
/// Both buffers are interleaved; `*_channel` selects the lane and `*_stride` is the channel
/// count of that buffer.
pub fn mix_channel(
    dst: &mut [i64],
    dst_channel: usize,
    dst_stride: usize,
    src: &[i64],
    src_channel: usize,
    src_stride: usize,
    frames: usize,
    params: MixParams,
    dither: &mut Dither,
) {
    if dst_channel >= dst_stride || src_channel >= src_stride {
        return;
    }
    let right = if params.shift < 0 {
        params.shift.unsigned_abs().min(63)
    } else {
        0
    };
    let left = if params.shift > 0 {
        params.shift.unsigned_abs().min(62)
    } else {
        0
    };

    let dst_samples = dst.iter_mut().skip(dst_channel).step_by(dst_stride);
    let src_samples = src.iter().skip(src_channel).step_by(src_stride);
    for (out, input) in dst_samples.zip(src_samples).take(frames) {
        let mut value = input.saturating_mul(params.volume);
        if right > 0 {
            if params.dither {
                value = value.saturating_add(dither.term(right, params.volume));
            }
            value >>= right;
        } else if left > 0 {
            value = value.saturating_mul(1i64 << left);
        }
        if params.invert {
            value = value.saturating_neg();
        }
        *out = if params.assign {
            value
        } else {
            out.saturating_add(value)
        };
    }
}

/// Zero one channel of an interleaved buffer.
pub fn clear_channel(dst: &mut [i64], channel: usize, stride: usize, frames: usize) {
    if channel >= stride {
        return;
    }
    for out in dst.iter_mut().skip(channel).step_by(stride).take(frames) {
        *out = 0;
    }
}

/// Raise `peaks[ch]` to the largest magnitude seen in each channel of `buffer`.
pub fn update_peaks(buffer: &[i64], channels: usize, frames: usize, peaks: &mut [i64]) {
    if channels == 0 {
        return;
    }
    for frame in buffer.chunks_exact(channels).take(frames) {
        for (peak, sample) in peaks.iter_mut().zip(frame) {
            let magnitude = sample.saturating_abs();
            if magnitude > *peak {
                *peak = magnitude;
            }
        }
    }
}
