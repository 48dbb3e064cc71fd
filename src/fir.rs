//! Block FIR equalizer built on a Karatsuba polynomial multiply.
//!
//! Each channel runs an overlap-add convolution: `N` input samples are gathered, multiplied
//! against the `N` tap kernel into a `2N` product, and the product is folded into a `2N`
//! output history whose front `N` samples are emitted while the next block is gathered.
//! The emitted stream is the direct convolution delayed by `N` samples.

use crate::error::ConfigError;

/// Below this length the multiply falls back to the schoolbook product.
pub const KARATSUBA_CUTOFF: usize = 16;
/// Longest supported kernel.
pub const MAX_TAPS: usize = 65_536;

/// Schoolbook product, accumulated: `out[i + j] += a[i] * b[j]`.
pub fn convolve_direct(a: &[f64], b: &[f64], out: &mut [f64]) {
    debug_assert!(out.len() + 1 >= a.len() + b.len());
    for (i, x) in a.iter().enumerate() {
        if *x == 0.0 {
            continue;
        }
        for (j, y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
}

/// Scratch length [`multiply_with_scratch`] needs for operands of length `n`.
pub fn scratch_len(n: usize) -> usize {
    4 * n
}

/// Polynomial product of two equal-length operands, accumulated into `out` (`len >= 2n`).
pub fn multiply(a: &[f64], b: &[f64], out: &mut [f64]) {
    let mut scratch = vec![0.0; scratch_len(a.len())];
    multiply_with_scratch(a, b, out, &mut scratch);
}

/// Allocation-free form of [`multiply`]. `scratch` must hold [`scratch_len`] values.
pub fn multiply_with_scratch(a: &[f64], b: &[f64], out: &mut [f64], scratch: &mut [f64]) {
    assert_eq!(a.len(), b.len(), "operands must have equal length");
    let n = a.len();
    if n <= KARATSUBA_CUTOFF || n % 2 != 0 {
        convolve_direct(a, b, out);
        return;
    }

    let half = n / 2;
    let (a_lo, a_hi) = a.split_at(half);
    let (b_lo, b_hi) = b.split_at(half);
    let (a_sum, rest) = scratch.split_at_mut(half);
    let (b_sum, rest) = rest.split_at_mut(half);
    let (product, rest) = rest.split_at_mut(n);

    for i in 0..half {
        a_sum[i] = a_lo[i] + a_hi[i];
        b_sum[i] = b_lo[i] + b_hi[i];
    }

    // z0 = lo * lo lands at 0 and is removed from the middle term
    product.fill(0.0);
    multiply_with_scratch(a_lo, b_lo, product, rest);
    for (i, p) in product.iter().enumerate() {
        out[i] += p;
        out[i + half] -= p;
    }

    // z2 = hi * hi lands at n and is removed from the middle term
    product.fill(0.0);
    multiply_with_scratch(a_hi, b_hi, product, rest);
    for (i, p) in product.iter().enumerate() {
        out[i + n] += p;
        out[i + half] -= p;
    }

    product.fill(0.0);
    multiply_with_scratch(a_sum, b_sum, product, rest);
    for (i, p) in product.iter().enumerate() {
        out[i + half] += p;
    }
}

/// Streaming overlap-add filter for one channel.
#[derive(Clone, Debug)]
pub struct FirFilter {
    kernel: Vec<f64>,
    input: Vec<f64>,
    output: Vec<f64>,
    scratch: Vec<f64>,
    offset: usize,
}

impl FirFilter {
    /// Build a filter from `taps`, zero padding to the next power of two.
    pub fn new(taps: &[f64]) -> Result<Self, ConfigError> {
        if taps.is_empty() {
            return Err(ConfigError::InvalidFilter("empty kernel".into()));
        }
        if taps.len() > MAX_TAPS {
            return Err(ConfigError::InvalidFilter(format!(
                "{} taps exceeds {MAX_TAPS}",
                taps.len()
            )));
        }
        if taps.iter().any(|t| !t.is_finite()) {
            return Err(ConfigError::InvalidFilter("non-finite coefficient".into()));
        }
        let n = taps.len().next_power_of_two();
        let mut kernel = vec![0.0; n];
        kernel[..taps.len()].copy_from_slice(taps);
        Ok(Self {
            kernel,
            input: vec![0.0; n],
            output: vec![0.0; 2 * n],
            scratch: vec![0.0; scratch_len(n)],
            offset: 0,
        })
    }

    /// Block length `N`, which is also the filter's latency in samples.
    pub fn block_len(&self) -> usize {
        self.kernel.len()
    }

    /// Clear history, keeping the kernel.
    pub fn reset(&mut self) {
        self.input.fill(0.0);
        self.output.fill(0.0);
        self.offset = 0;
    }

    /// Filter one sample, returning the sample emitted for this position.
    pub fn process_sample(&mut self, sample: i64) -> i64 {
        let n = self.kernel.len();
        let emitted = self.output[self.offset];
        self.input[self.offset] = sample as f64;
        self.offset += 1;
        if self.offset == n {
            self.output.copy_within(n.., 0);
            self.output[n..].fill(0.0);
            multiply_with_scratch(&self.input, &self.kernel, &mut self.output, &mut self.scratch);
            self.offset = 0;
        }
        emitted.round() as i64
    }

    /// Filter one channel of an interleaved buffer in place.
    pub fn process(&mut self, buffer: &mut [i64], channel: usize, channels: usize, frames: usize) {
        if channel >= channels {
            return;
        }
        for sample in buffer.iter_mut().skip(channel).step_by(channels).take(frames) {
            *sample = self.process_sample(*sample);
        }
    }
}

/// Optional per-channel filters; `None` channels pass through untouched.
#[derive(Clone, Debug, Default)]
pub struct FirBank {
    filters: Vec<Option<FirFilter>>,
}

impl FirBank {
    /// Bank with one fresh filter state per configured kernel.
    pub fn from_kernels(
        kernels: &[Option<Vec<f64>>],
        channels: usize,
    ) -> Result<Self, ConfigError> {
        let filters = (0..channels)
            .map(|ch| match kernels.get(ch) {
                Some(Some(taps)) => FirFilter::new(taps).map(Some),
                _ => Ok(None),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { filters })
    }

    /// True when no channel has a filter.
    pub fn is_bypass(&self) -> bool {
        self.filters.iter().all(Option::is_none)
    }

    /// Run every configured channel filter over the interleaved buffer.
    pub fn process(&mut self, buffer: &mut [i64], channels: usize, frames: usize) {
        for (channel, filter) in self.filters.iter_mut().enumerate().take(channels) {
            if let Some(filter) = filter {
                filter.process(buffer, channel, channels, frames);
            }
        }
    }

    /// Clear the history of every channel.
    pub fn reset(&mut self) {
        for filter in self.filters.iter_mut().flatten() {
            filter.reset();
        }
    }
}
