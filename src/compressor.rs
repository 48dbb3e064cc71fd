//! Lookahead-free soft limiter working on canonical samples.

use crate::error::ConfigError;
use crate::MAX_CHANNELS;

/// Largest knee setting; a knee of `KNEE_MAX` puts the threshold at full scale.
pub const KNEE_MAX: u8 = 255;
/// Largest attack exponent.
pub const ATTACK_MAX: u8 = 62;
/// Largest decay exponent.
pub const DECAY_MAX: u8 = 62;

/// User facing compressor parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompressorSettings {
    /// Bypass when `false`.
    pub enabled: bool,
    /// Threshold as a fraction of full scale, `knee / KNEE_MAX`.
    pub knee: u8,
    /// Gain moves toward its target by `1 / 2^attack` per sample.
    pub attack: u8,
    /// Gain relaxes toward unity by `1 / 2^decay` per sample.
    pub decay: u8,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            knee: 85,
            attack: 3,
            decay: 20,
        }
    }
}

impl CompressorSettings {
    /// Enabled compressor with the given parameters, range checked.
    pub fn new(knee: u8, attack: u8, decay: u8) -> Result<Self, ConfigError> {
        let settings = Self {
            enabled: true,
            knee,
            attack,
            decay,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check attack and decay against their maxima.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.attack > ATTACK_MAX {
            return Err(ConfigError::InvalidCompressor(format!(
                "attack {} > {ATTACK_MAX}",
                self.attack
            )));
        }
        if self.decay > DECAY_MAX {
            return Err(ConfigError::InvalidCompressor(format!(
                "decay {} > {DECAY_MAX}",
                self.decay
            )));
        }
        Ok(())
    }

    /// Threshold magnitude for a given full scale value.
    pub fn threshold(&self, full_scale: i64) -> f64 {
        full_scale as f64 * f64::from(self.knee) / f64::from(KNEE_MAX)
    }
}

/// Per-channel smoothed gain, starting at unity.
#[derive(Clone, Debug)]
pub struct CompressorState {
    gain: [f64; MAX_CHANNELS],
}

impl Default for CompressorState {
    fn default() -> Self {
        Self {
            gain: [1.0; MAX_CHANNELS],
        }
    }
}

impl CompressorState {
    /// Current smoothed gain of a channel.
    pub fn gain(&self, channel: usize) -> f64 {
        self.gain.get(channel).copied().unwrap_or(1.0)
    }

    /// Return every channel to unity gain.
    pub fn reset(&mut self) {
        self.gain.fill(1.0);
    }

    /// Compress `frames` interleaved frames of `channels` channels in place.
    pub fn process(
        &mut self,
        settings: &CompressorSettings,
        buffer: &mut [i64],
        channels: usize,
        frames: usize,
        full_scale: i64,
    ) {
        if !settings.enabled || channels == 0 {
            return;
        }
        let channels = channels.min(MAX_CHANNELS);
        let threshold = settings.threshold(full_scale);
        let attack = 1.0 / (1u64 << settings.attack) as f64;
        let decay = 1.0 / (1u64 << settings.decay) as f64;

        for frame in buffer.chunks_exact_mut(channels).take(frames) {
            for (sample, gain) in frame.iter_mut().zip(self.gain.iter_mut()) {
                let magnitude = (*sample as f64).abs();
                if magnitude > threshold {
                    let target = (threshold / magnitude).min(*gain);
                    *gain += (target - *gain) * attack;
                }
                *sample = (*sample as f64 * *gain).round() as i64;
                *gain += (1.0 - *gain) * decay;
            }
        }
    }
}
