//! The real-time mixing loop.
//!
//! One [`MixLoop::step`] performs one state-machine action: an open attempt, one mixing
//! iteration, or a teardown. The loop holds the engine lock for an iteration's bookkeeping
//! only; both backend transfers happen with the lock released.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::MAX_CHANNELS;
use crate::backend::{Backend, OpenParams, Transfer};
use crate::client::{Client, Geometry};
use crate::config::Settings;
use crate::engine::{EngineState, HardwareInfo};
use crate::error::BackendError;
use crate::format::{self, SampleFormat};
use crate::mixer::{self, Dither, MixParams};
use crate::profile::{MonitorTap, Profile, ProfileKind, TapPoint};
use crate::remix::remix;
use crate::sync::Shared;

/// Skip the playback write once the backend holds this many iterations.
pub const JITTER_SKIP_ITERATIONS: usize = 3;

/// Loop state, one per hardware-open session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    /// Opening the backends.
    Opening,
    /// Mixing one iteration per step.
    Running,
    /// Tearing down before reopening with new settings.
    Refreshing,
    /// Terminal.
    Exiting,
}

/// Buffers of one open hardware session.
struct Session {
    frames: usize,
    rx_format: SampleFormat,
    tx_format: SampleFormat,
    rx_channels: usize,
    tx_channels: usize,
    mix_channels: usize,
    mix_bits: u32,
    rx_bytes: Vec<u8>,
    tx_bytes: Vec<u8>,
    mix_in: Vec<i64>,
    mix_out: Vec<i64>,
    hw_out: Vec<i64>,
    lane: Vec<i64>,
    profile_block: Vec<i64>,
}

impl Session {
    fn new(frames: usize, mix_channels: usize, rx: &OpenParams, tx: &OpenParams) -> Self {
        Self {
            frames,
            rx_format: rx.format,
            tx_format: tx.format,
            rx_channels: rx.channels,
            tx_channels: tx.channels,
            mix_channels,
            mix_bits: tx.format.bits(),
            rx_bytes: vec![0; frames * rx.channels * rx.format.bytes()],
            tx_bytes: vec![0; frames * tx.channels * tx.format.bytes()],
            mix_in: vec![0; frames * rx.channels.max(mix_channels)],
            mix_out: vec![0; frames * mix_channels],
            hw_out: vec![0; frames * tx.channels.max(mix_channels)],
            lane: vec![0; frames],
            profile_block: vec![0; frames * MAX_CHANNELS],
        }
    }

    /// Decode the capture block into the input mix.
    fn capture(&mut self, state: &mut EngineState) {
        let samples = self.frames * self.rx_channels;
        format::import(self.rx_format, &self.rx_bytes, &mut self.mix_in[..samples]);
        mixer::update_peaks(
            &self.mix_in,
            self.rx_channels,
            self.frames,
            &mut state.master_in_peaks,
        );

        let align = self.mix_bits as i32 - self.rx_format.bits() as i32;
        if align > 0 {
            for sample in &mut self.mix_in[..samples] {
                *sample = sample.saturating_mul(1i64 << align);
            }
        } else if align < 0 {
            for sample in &mut self.mix_in[..samples] {
                *sample >>= -align;
            }
        }
        remix(&mut self.mix_in, self.rx_channels, self.mix_channels, self.frames);
    }

    fn run_taps(&mut self, taps: &mut [MonitorTap], point: TapPoint, dither: &mut Dither) {
        let (ch, frames) = (self.mix_channels, self.frames);
        for tap in taps.iter_mut().filter(|t| t.point == point) {
            if tap.src >= ch || tap.dst >= ch {
                continue;
            }
            let src = match point {
                TapPoint::PreMix | TapPoint::Input => &self.mix_in,
                TapPoint::Local | TapPoint::Output => &self.mix_out,
            };
            let source = src.iter().skip(tap.src).step_by(ch);
            for (slot, sample) in self.lane.iter_mut().zip(source).take(frames) {
                *slot = *sample;
                tap.peak = tap.peak.max(sample.saturating_abs());
            }
            if tap.mute {
                continue;
            }
            let dst = match point {
                TapPoint::PreMix | TapPoint::Local => &mut self.mix_in,
                TapPoint::Input | TapPoint::Output => &mut self.mix_out,
            };
            let params = MixParams::accumulate().with_shift(tap.shift).with_invert(tap.invert);
            mixer::mix_channel(dst, tap.dst, ch, &self.lane, 0, 1, frames, params, dither);
        }
    }

    /// Render each profile of `kind` once, then hand its block to the profile's clients.
    fn fan_out(
        &mut self,
        profiles: &mut [Profile],
        clients: &mut [Client],
        kind: ProfileKind,
        dither: &mut Dither,
    ) {
        let source = match kind {
            ProfileKind::Dsp => &self.mix_in,
            ProfileKind::Loopback => &self.mix_out,
        };
        for (index, profile) in profiles.iter_mut().enumerate() {
            if profile.kind != kind {
                continue;
            }
            let width = clients
                .iter()
                .filter(|c| c.profile == index && c.rx.enabled)
                .map(|c| c.layout.channels)
                .max();
            if let Some(width) = width {
                profile.render_rx(
                    source,
                    self.mix_channels,
                    self.frames,
                    self.mix_bits,
                    width,
                    &mut self.profile_block,
                    dither,
                );
            }
            let width = width.unwrap_or(0);
            let block = &self.profile_block[..self.frames * width];

            for client in clients.iter_mut().filter(|c| c.profile == index) {
                let delivered = client.fan_out(block, width, profile.bits, self.frames, dither);
                if !delivered && client.rx.xruns.is_power_of_two() {
                    debug!(
                        client = %client.id,
                        overruns = client.rx.xruns,
                        "client receive overrun"
                    );
                }
                if let Err(err) = client.pump_rx() {
                    warn!(client = %client.id, %err, "receive conversion failed");
                }
            }
        }
    }

    /// Collect one block from every regular client into the output mix.
    fn fan_in(&mut self, profiles: &[Profile], clients: &mut [Client], dither: &mut Dither) {
        self.mix_out.fill(0);
        for client in clients.iter_mut() {
            let Some(profile) = profiles.get(client.profile) else {
                continue;
            };
            if profile.kind != ProfileKind::Dsp {
                continue;
            }
            if let Err(err) = client.pump_tx() {
                warn!(client = %client.id, %err, "transmit conversion failed");
            }
            let collected = client.fan_in(
                &profile.tx.routes,
                &mut self.mix_out,
                self.mix_channels,
                self.frames,
                self.mix_bits,
                dither,
            );
            if !collected && client.tx.xruns.is_power_of_two() {
                debug!(
                    client = %client.id,
                    underruns = client.tx.xruns,
                    "client transmit underrun"
                );
            }
        }
    }

    /// Remix, meter, compress and encode the output mix into the playback block.
    fn render(&mut self, state: &mut EngineState) {
        let mix_samples = self.frames * self.mix_channels;
        let hw_samples = self.frames * self.tx_channels;
        self.hw_out[..mix_samples].copy_from_slice(&self.mix_out[..mix_samples]);
        remix(&mut self.hw_out, self.mix_channels, self.tx_channels, self.frames);
        mixer::update_peaks(
            &self.hw_out,
            self.tx_channels,
            self.frames,
            &mut state.master_out_peaks,
        );
        state.master_state.process(
            &state.master_compressor,
            &mut self.hw_out[..hw_samples],
            self.tx_channels,
            self.frames,
            format::max_for_bits(self.mix_bits),
        );
        format::export(self.tx_format, &self.hw_out[..hw_samples], &mut self.tx_bytes);
    }
}

/// The mixing loop bound to one capture and one playback backend.
pub struct MixLoop {
    shared: Arc<Shared>,
    rx: Box<dyn Backend>,
    tx: Box<dyn Backend>,
    state: LoopState,
    session: Option<Session>,
    dither: Dither,
}

impl MixLoop {
    pub(crate) fn new(shared: Arc<Shared>, rx: Box<dyn Backend>, tx: Box<dyn Backend>) -> Self {
        Self {
            shared,
            rx,
            tx,
            state: LoopState::Opening,
            session: None,
            dither: Dither::default(),
        }
    }

    /// Current state.
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Perform one state-machine action and return the resulting state.
    pub fn step(&mut self) -> LoopState {
        let next = match self.state {
            LoopState::Opening => self.open(),
            LoopState::Running => self.run_once(),
            LoopState::Refreshing => {
                self.close_backends();
                LoopState::Opening
            }
            LoopState::Exiting => LoopState::Exiting,
        };
        if next != self.state {
            info!(from = ?self.state, to = ?next, "mix loop state");
            crate::push_log(format!("loop {:?} -> {:?}", self.state, next));
            self.state = next;
            let mut cs = self.shared.enter();
            cs.loop_state = next;
            cs.wake_all();
        }
        next
    }

    /// Step until the engine shuts down.
    pub fn run(mut self) {
        while self.step() != LoopState::Exiting {}
    }

    fn close_backends(&mut self) {
        self.rx.close();
        self.tx.close();
        self.session = None;
    }

    fn cooldown(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        let mut cs = self.shared.enter();
        while !cs.exit {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            cs.wait_for(deadline - now);
        }
    }

    fn open(&mut self) -> LoopState {
        let (settings, exit) = {
            let cs = self.shared.enter();
            (cs.settings.clone(), cs.exit)
        };
        if exit {
            self.close_backends();
            return LoopState::Exiting;
        }
        match self.open_backends(&settings) {
            Ok(session) => {
                let hardware = HardwareInfo {
                    rx_format: session.rx_format,
                    tx_format: session.tx_format,
                    rx_channels: session.rx_channels,
                    tx_channels: session.tx_channels,
                };
                info!(?hardware, frames = session.frames, "backends open");
                crate::push_log(format!(
                    "open rx {:?}x{} tx {:?}x{}",
                    hardware.rx_format,
                    hardware.rx_channels,
                    hardware.tx_format,
                    hardware.tx_channels
                ));
                let mut cs = self.shared.enter();
                cs.apply_geometry(Geometry {
                    mix_rate: settings.sample_rate,
                    block_frames: settings.samples,
                    quality: settings.quality,
                });
                cs.hardware = Some(hardware);
                cs.mix_bits = session.mix_bits;
                cs.master_in_peaks = vec![0; hardware.rx_channels];
                cs.master_out_peaks = vec![0; hardware.tx_channels];
                cs.refresh = false;
                drop(cs);
                self.session = Some(session);
                LoopState::Running
            }
            Err(err) => {
                warn!(%err, "backend open failed");
                crate::push_log(format!("open failed: {err}"));
                self.close_backends();
                self.cooldown(settings.reopen_delay);
                LoopState::Opening
            }
        }
    }

    fn open_backends(&mut self, settings: &Settings) -> Result<Session, BackendError> {
        let request = |device: &str| OpenParams {
            device: device.to_string(),
            sample_rate: settings.sample_rate,
            samples: settings.samples,
            channels: settings.mix_channels,
            formats: settings.format_preferences(),
            format: settings.hw_format,
        };
        let mut rx = request(&settings.rx_device);
        self.rx.open(&mut rx)?;
        let mut tx = request(&settings.tx_device);
        self.tx.open(&mut tx)?;
        for params in [&rx, &tx] {
            if params.channels == 0 || params.channels > MAX_CHANNELS {
                return Err(BackendError::Format(params.device.clone()));
            }
        }
        Ok(Session::new(settings.samples, settings.mix_channels, &rx, &tx))
    }

    fn run_once(&mut self) -> LoopState {
        {
            let mut cs = self.shared.enter();
            if cs.exit {
                drop(cs);
                self.close_backends();
                return LoopState::Exiting;
            }
            if cs.refresh {
                cs.refresh = false;
                return LoopState::Refreshing;
            }
        }
        match self.iterate() {
            Ok(()) => LoopState::Running,
            Err(err) => {
                warn!(%err, "backend transfer failed");
                crate::push_log(format!("transfer failed: {err}"));
                let delay = self.shared.enter().settings.reopen_delay;
                self.close_backends();
                self.cooldown(delay);
                LoopState::Opening
            }
        }
    }

    /// One mixing iteration.
    fn iterate(&mut self) -> Result<(), BackendError> {
        let Self {
            shared,
            rx,
            tx,
            session,
            dither,
            ..
        } = self;
        let session = session.as_mut().ok_or(BackendError::NotOpen)?;

        let read = rx.transfer(Transfer::Read(&mut session.rx_bytes))?;
        if read < session.rx_bytes.len() {
            format::silence(session.rx_format, &mut session.rx_bytes[read..]);
        }

        let mut cs = shared.enter();
        let state = &mut *cs;
        state.iterations += 1;

        session.capture(state);
        session.run_taps(&mut state.taps, TapPoint::Local, dither);
        session.run_taps(&mut state.taps, TapPoint::PreMix, dither);
        session.fan_out(&mut state.profiles, &mut state.clients, ProfileKind::Dsp, dither);
        session.fan_in(&state.profiles, &mut state.clients, dither);

        let full_scale = format::max_for_bits(session.mix_bits);
        state.locator.process(
            &mut session.mix_out,
            &session.mix_in,
            session.mix_channels,
            session.frames,
            full_scale,
        );
        session.run_taps(&mut state.taps, TapPoint::Input, dither);
        session.run_taps(&mut state.taps, TapPoint::Output, dither);
        if state.recording {
            session.fan_out(&mut state.profiles, &mut state.clients, ProfileKind::Loopback, dither);
        }
        session.render(state);

        for client in &state.clients {
            if let Some(link) = &client.sync {
                link.tick();
            }
        }
        cs.wake_all();
        drop(cs);

        let iteration_bytes = session.tx_bytes.len();
        let pending = tx.delay()?;
        let writes = if pending < iteration_bytes {
            2
        } else if pending >= JITTER_SKIP_ITERATIONS * iteration_bytes {
            0
        } else {
            1
        };
        for _ in 0..writes {
            write_all(tx.as_mut(), &session.tx_bytes)?;
        }
        Ok(())
    }
}

fn write_all(backend: &mut dyn Backend, mut buf: &[u8]) -> Result<(), BackendError> {
    while !buf.is_empty() {
        let n = backend.transfer(Transfer::Write(buf))?;
        if n == 0 {
            return Err(BackendError::Transfer("playback accepted no data".into()));
        }
        buf = &buf[n.min(buf.len())..];
    }
    Ok(())
}
