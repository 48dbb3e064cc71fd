//! Round-trip delay locator: injects a reference burst on one output mix channel and finds it
//! again on one input mix channel.
//!
//! The correlation search over a finished capture period is spread over the following
//! iterations, at most one candidate offset per processed frame, so a long period never
//! stalls a single iteration.

use dasp_signal::{self as signal, Signal};

use crate::ring::monotonic_timestamp_ns;

/// Longest accepted capture period.
pub const MAX_PERIOD_SECONDS: usize = 10;

/// Latency measurement report capturing the best-fit offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyReport {
    /// Estimated offset in frames between injection and capture.
    pub offset_frames: usize,
    /// Offset converted to seconds.
    pub offset_seconds: f32,
    /// Normalized cross-correlation score (0.0 - 1.0).
    pub correlation: f32,
    /// Timestamp captured when the report was generated.
    pub measured_at_ns: u64,
}

/// Delay locator parameters, settable through the control interface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocatorSettings {
    /// Inject and measure when `true`.
    pub enabled: bool,
    /// Output mix channel the burst is added to.
    pub tx_channel: usize,
    /// Input mix channel the burst is searched on.
    pub rx_channel: usize,
    /// Frames between burst starts; also the longest measurable delay plus the burst length.
    pub period_frames: usize,
    /// Burst length in frames.
    pub burst_frames: usize,
    /// Burst carrier frequency.
    pub frequency_hz: f32,
    /// Burst peak as a fraction of full scale.
    pub amplitude: f32,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            tx_channel: 0,
            rx_channel: 0,
            period_frames: 24_000,
            burst_frames: 480,
            frequency_hz: 1_000.0,
            amplitude: 0.25,
        }
    }
}

/// Injection and capture state for one delay locator.
pub struct DelayLocator {
    sample_rate: u32,
    settings: LocatorSettings,
    reference: Vec<f64>,
    reference_norm: f64,
    capture: Vec<f64>,
    pending: Vec<f64>,
    search: Option<Search>,
    position: usize,
    last: Option<LatencyReport>,
}

impl DelayLocator {
    /// Create a locator, building its reference burst.
    pub fn new(sample_rate: u32, settings: LocatorSettings) -> Self {
        let mut locator = Self {
            sample_rate,
            settings,
            reference: Vec::new(),
            reference_norm: 0.0,
            capture: Vec::new(),
            pending: Vec::new(),
            search: None,
            position: 0,
            last: None,
        };
        locator.configure(settings);
        locator
    }

    /// Longest period this locator accepts at its rate.
    pub fn max_period_frames(&self) -> usize {
        MAX_PERIOD_SECONDS * self.sample_rate as usize
    }

    /// Replace the settings, restarting capture. The period is clamped to
    /// [`max_period_frames`](Self::max_period_frames).
    pub fn configure(&mut self, settings: LocatorSettings) {
        let period = settings.period_frames.clamp(1, self.max_period_frames().max(1));
        let burst = settings.burst_frames.clamp(1, period);
        self.settings = LocatorSettings {
            period_frames: period,
            burst_frames: burst,
            ..settings
        };
        self.reference = build_reference_burst(self.sample_rate, settings.frequency_hz, burst);
        self.reference_norm = energy(&self.reference);
        self.capture = vec![0.0; period];
        self.pending = vec![0.0; period];
        self.search = None;
        self.position = 0;
    }

    /// Rate the reference burst was built for.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current settings.
    pub fn settings(&self) -> LocatorSettings {
        self.settings
    }

    /// Most recent completed measurement.
    pub fn last_report(&self) -> Option<LatencyReport> {
        self.last
    }

    /// Inject into `output` and capture from `input`, both interleaved with `channels`
    /// channels. Channel indices are validated against `channels` first.
    pub fn process(
        &mut self,
        output: &mut [i64],
        input: &[i64],
        channels: usize,
        frames: usize,
        full_scale: i64,
    ) {
        let settings = self.settings;
        if !settings.enabled || settings.tx_channel >= channels || settings.rx_channel >= channels {
            return;
        }
        let scale = full_scale as f64 * f64::from(settings.amplitude.clamp(0.0, 1.0));
        for frame in 0..frames {
            let base = frame * channels;
            if let Some(reference) = self.reference.get(self.position) {
                let injected = (reference * scale).round() as i64;
                let slot = &mut output[base + settings.tx_channel];
                *slot = slot.saturating_add(injected);
            }
            self.capture[self.position] = input[base + settings.rx_channel] as f64;
            self.position += 1;
            if self.position == self.capture.len() {
                self.step_search(usize::MAX);
                std::mem::swap(&mut self.capture, &mut self.pending);
                self.search = Some(Search::new(&self.pending, self.reference.len()));
                self.position = 0;
            }
        }
        self.step_search(frames);
    }

    /// Correlate a captured period against the reference burst in one go.
    pub fn measure(&self, recorded: &[f64]) -> LatencyReport {
        let window = self.reference.len();
        if window == 0 || recorded.len() < window {
            return self.report((0, 0.0));
        }
        let mut search = Search::new(recorded, window);
        search.advance(&self.reference, self.reference_norm, recorded, usize::MAX);
        self.report(search.best)
    }

    fn step_search(&mut self, budget: usize) {
        let Some(search) = self.search.as_mut() else {
            return;
        };
        if !search.advance(&self.reference, self.reference_norm, &self.pending, budget) {
            return;
        }
        let best = search.best;
        self.search = None;
        self.last = Some(self.report(best));
    }

    fn report(&self, (offset, correlation): (usize, f64)) -> LatencyReport {
        LatencyReport {
            offset_frames: offset,
            offset_seconds: offset as f32 / self.sample_rate as f32,
            correlation: correlation as f32,
            measured_at_ns: monotonic_timestamp_ns(),
        }
    }
}

/// Progress of the correlation search over one captured period.
struct Search {
    offset: usize,
    window_energy: f64,
    best: (usize, f64),
}

impl Search {
    fn new(recorded: &[f64], window: usize) -> Self {
        Self {
            offset: 0,
            window_energy: recorded.get(..window).map_or(0.0, sum_squares),
            best: (0, 0.0),
        }
    }

    /// Try up to `budget` more offsets. Returns `true` once every offset has been tried.
    fn advance(
        &mut self,
        reference: &[f64],
        reference_norm: f64,
        recorded: &[f64],
        budget: usize,
    ) -> bool {
        let window = reference.len();
        if window == 0 || recorded.len() < window {
            return true;
        }
        let last = recorded.len() - window;
        for _ in 0..budget {
            if self.offset > last {
                break;
            }
            let norm = self.window_energy.max(0.0).sqrt();
            if reference_norm > 0.0 && norm > 0.0 {
                let slice = &recorded[self.offset..self.offset + window];
                let corr = dot(reference, slice) / (reference_norm * norm);
                if corr > self.best.1 {
                    self.best = (self.offset, corr);
                }
            }
            self.offset += 1;
            if self.offset > last {
                break;
            }
            // running sum, re-summed once per window to bound drift
            if self.offset % window == 0 {
                self.window_energy = sum_squares(&recorded[self.offset..self.offset + window]);
            } else {
                let leaving = recorded[self.offset - 1];
                let entering = recorded[self.offset + window - 1];
                self.window_energy += entering * entering - leaving * leaving;
            }
        }
        self.offset > last
    }
}

fn build_reference_burst(sample_rate: u32, frequency: f32, frames: usize) -> Vec<f64> {
    let mut sine = signal::rate(f64::from(sample_rate)).const_hz(f64::from(frequency)).sine();
    (0..frames)
        .map(|n| sine.next() * hann(n, frames))
        .collect()
}

fn hann(n: usize, len: usize) -> f64 {
    if len < 2 {
        return 1.0;
    }
    let x = n as f64 / (len - 1) as f64;
    0.5 - 0.5 * (std::f64::consts::TAU * x).cos()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn sum_squares(buf: &[f64]) -> f64 {
    buf.iter().map(|x| x * x).sum()
}

fn energy(buf: &[f64]) -> f64 {
    sum_squares(buf).sqrt()
}
