//! Sample-rate conversion of canonical frame streams through `rubato`.
//!
//! The adapter owns the resampler and its planar `f64` staging buffers; canonical samples are
//! converted to and from floating point only here. Input is staged until a full chunk is
//! available, and converted output is held until the caller has room for it, so every call
//! reports exactly how many frames it consumed and produced.

use rubato::{
    FastFixedIn, PolynomialDegree, Resampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::error::ResampleError;

/// Frames fed to the resampler per chunk.
pub const CHUNK_FRAMES: usize = 256;

/// Conversion quality, traded against CPU time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ResampleQuality {
    /// Cubic polynomial interpolation.
    Fast,
    /// Short sinc kernel.
    #[default]
    Medium,
    /// Long sinc kernel.
    High,
}

impl ResampleQuality {
    /// Map the numeric quality option (0, 1, 2); larger values saturate to `High`.
    pub fn from_level(level: u32) -> Self {
        match level {
            0 => ResampleQuality::Fast,
            1 => ResampleQuality::Medium,
            _ => ResampleQuality::High,
        }
    }

    /// Numeric level of this quality.
    pub fn level(self) -> u32 {
        match self {
            ResampleQuality::Fast => 0,
            ResampleQuality::Medium => 1,
            ResampleQuality::High => 2,
        }
    }
}

enum Stage {
    Fast(FastFixedIn<f64>),
    Sinc(SincFixedIn<f64>),
}

impl Stage {
    fn output_frames_max(&self) -> usize {
        match self {
            Stage::Fast(r) => r.output_frames_max(),
            Stage::Sinc(r) => r.output_frames_max(),
        }
    }

    fn run(
        &mut self,
        input: &[Vec<f64>],
        output: &mut [Vec<f64>],
    ) -> Result<(usize, usize), ResampleError> {
        let result = match self {
            Stage::Fast(r) => r.process_into_buffer(input, output, None),
            Stage::Sinc(r) => r.process_into_buffer(input, output, None),
        };
        result.map_err(|err| ResampleError::Process(err.to_string()))
    }
}

/// Frames moved by one [`RateConverter::process`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Converted {
    /// Input frames taken from the caller.
    pub consumed: usize,
    /// Output frames written for the caller.
    pub produced: usize,
}

/// Streaming canonical-format rate converter.
pub struct RateConverter {
    stage: Stage,
    channels: usize,
    from_rate: u32,
    to_rate: u32,
    staged_in: Vec<Vec<f64>>,
    staged_in_frames: usize,
    staged_out: Vec<Vec<f64>>,
    out_ready: usize,
    out_pos: usize,
}

impl std::fmt::Debug for RateConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateConverter")
            .field("channels", &self.channels)
            .field("from_rate", &self.from_rate)
            .field("to_rate", &self.to_rate)
            .field("staged_in_frames", &self.staged_in_frames)
            .field("pending_out", &(self.out_ready - self.out_pos))
            .finish()
    }
}

impl RateConverter {
    /// Build a converter from `from_rate` to `to_rate` for `channels` interleaved channels.
    pub fn new(
        from_rate: u32,
        to_rate: u32,
        channels: usize,
        quality: ResampleQuality,
    ) -> Result<Self, ResampleError> {
        let construction = |reason: String| ResampleError::Construction {
            from: from_rate,
            to: to_rate,
            reason,
        };
        if from_rate == 0 || to_rate == 0 || channels == 0 {
            return Err(construction("zero rate or channel count".into()));
        }
        let ratio = f64::from(to_rate) / f64::from(from_rate);
        let stage = match quality {
            ResampleQuality::Fast => FastFixedIn::new(
                ratio,
                1.0,
                PolynomialDegree::Cubic,
                CHUNK_FRAMES,
                channels,
            )
            .map(Stage::Fast),
            ResampleQuality::Medium | ResampleQuality::High => {
                let (sinc_len, oversampling_factor) = if quality == ResampleQuality::High {
                    (256, 256)
                } else {
                    (64, 128)
                };
                let params = SincInterpolationParameters {
                    sinc_len,
                    f_cutoff: 0.95,
                    interpolation: SincInterpolationType::Linear,
                    oversampling_factor,
                    window: WindowFunction::BlackmanHarris2,
                };
                SincFixedIn::new(ratio, 1.0, params, CHUNK_FRAMES, channels).map(Stage::Sinc)
            }
        }
        .map_err(|err| construction(err.to_string()))?;

        let max_out = stage.output_frames_max();
        Ok(Self {
            stage,
            channels,
            from_rate,
            to_rate,
            staged_in: vec![vec![0.0; CHUNK_FRAMES]; channels],
            staged_in_frames: 0,
            staged_out: vec![vec![0.0; max_out]; channels],
            out_ready: 0,
            out_pos: 0,
        })
    }

    /// Input rate in Hz.
    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    /// Output rate in Hz.
    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Upper bound on output frames produced for `input_frames` input frames, including
    /// anything already staged.
    pub fn max_output_for(&self, input_frames: usize) -> usize {
        let staged = self.staged_in_frames + input_frames;
        let chunks = staged / CHUNK_FRAMES + 1;
        chunks * self.stage.output_frames_max() + (self.out_ready - self.out_pos)
    }

    /// Drop staged input and output.
    pub fn reset(&mut self) {
        self.staged_in_frames = 0;
        self.out_ready = 0;
        self.out_pos = 0;
    }

    /// Convert interleaved `input` into interleaved `output`.
    ///
    /// Consumes input only while converted output can still be delivered, so nothing is
    /// dropped when `output` is smaller than the conversion would produce.
    pub fn process(
        &mut self,
        input: &[i64],
        output: &mut [i64],
    ) -> Result<Converted, ResampleError> {
        let channels = self.channels;
        let in_frames = input.len() / channels;
        let out_frames = output.len() / channels;
        let mut done = Converted::default();

        loop {
            let room = &mut output[done.produced * channels..out_frames * channels];
            done.produced += self.drain(room);
            if self.out_pos < self.out_ready || done.consumed == in_frames {
                break;
            }

            let take = (CHUNK_FRAMES - self.staged_in_frames).min(in_frames - done.consumed);
            for frame in 0..take {
                let base = (done.consumed + frame) * channels;
                for (ch, lane) in self.staged_in.iter_mut().enumerate() {
                    lane[self.staged_in_frames + frame] = input[base + ch] as f64;
                }
            }
            self.staged_in_frames += take;
            done.consumed += take;

            if self.staged_in_frames == CHUNK_FRAMES {
                let (_, produced) = self.stage.run(&self.staged_in, &mut self.staged_out)?;
                self.staged_in_frames = 0;
                self.out_ready = produced;
                self.out_pos = 0;
            }
        }
        Ok(done)
    }

    fn drain(&mut self, output: &mut [i64]) -> usize {
        let channels = self.channels;
        let frames = (output.len() / channels).min(self.out_ready - self.out_pos);
        for frame in 0..frames {
            for (ch, lane) in self.staged_out.iter().enumerate() {
                let value = lane[self.out_pos + frame].round();
                output[frame * channels + ch] =
                    value.clamp(i64::MIN as f64, i64::MAX as f64) as i64;
            }
        }
        self.out_pos += frames;
        frames
    }
}
