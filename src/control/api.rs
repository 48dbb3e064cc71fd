use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::info;

use crate::client::ClientStatus;
use crate::compressor::CompressorSettings;
use crate::config::parse_directives;
use crate::engine::{HardwareInfo, validate_tap};
use crate::error::ConfigError;
use crate::fir::FirFilter;
use crate::latency::{LatencyReport, LocatorSettings};
use crate::mixloop::LoopState;
use crate::profile::{ChannelRoute, Direction, MonitorTap, ProfileKind};
use crate::sync::Shared;

static ACTIVE: Lazy<RwLock<Option<Control>>> = Lazy::new(|| RwLock::new(None));

/// Aggregated engine status snapshot used by control surfaces.
#[derive(Clone, Debug)]
pub struct EngineStatus {
    /// Mixing sample rate in Hertz.
    pub sample_rate: u32,
    /// Frames per mixing iteration.
    pub samples: usize,
    /// Channels of the mix buffers.
    pub mix_channels: usize,
    /// Negotiated hardware formats, once open.
    pub hardware: Option<HardwareInfo>,
    /// Mixing loop state.
    pub loop_state: LoopState,
    /// Iterations completed since start.
    pub iterations: u64,
    /// Loopback recording enabled.
    pub recording: bool,
    /// Input peak per hardware channel, mixing scale.
    pub master_in_peaks: Vec<i64>,
    /// Output peak per hardware channel, mixing scale.
    pub master_out_peaks: Vec<i64>,
    /// Full scale of the mixing domain, for converting peaks to levels.
    pub full_scale: i64,
    /// Last delay locator measurement.
    pub latency: Option<LatencyReport>,
    /// Profile names and kinds.
    pub profiles: Vec<(String, ProfileKind)>,
    /// Monitor taps.
    pub taps: Vec<MonitorTap>,
    /// Per-client diagnostics.
    pub clients: Vec<ClientStatus>,
}

/// Process-wide control surface of one engine.
#[derive(Clone)]
pub struct Control {
    shared: Arc<Shared>,
}

impl Control {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Snapshot the engine. Peaks are reported without clearing them.
    pub fn status(&self) -> EngineStatus {
        let cs = self.shared.enter();
        let clients = cs
            .clients
            .iter()
            .map(|client| {
                let name = cs
                    .profiles
                    .get(client.profile)
                    .map(|p| p.name.as_str())
                    .unwrap_or_default();
                client.status(name)
            })
            .collect();
        EngineStatus {
            sample_rate: cs.settings.sample_rate,
            samples: cs.settings.samples,
            mix_channels: cs.settings.mix_channels,
            hardware: cs.hardware,
            loop_state: cs.loop_state,
            iterations: cs.iterations,
            recording: cs.recording,
            master_in_peaks: cs.master_in_peaks.clone(),
            master_out_peaks: cs.master_out_peaks.clone(),
            full_scale: crate::format::max_for_bits(cs.mix_bits),
            latency: cs.locator.last_report(),
            profiles: cs.profiles.iter().map(|p| (p.name.clone(), p.kind)).collect(),
            taps: cs.taps.clone(),
            clients,
        }
    }

    /// Read and clear the master input and output peaks, in that order.
    pub fn take_master_peaks(&self) -> (Vec<i64>, Vec<i64>) {
        let mut cs = self.shared.enter();
        let input = cs.master_in_peaks.clone();
        let output = cs.master_out_peaks.clone();
        cs.master_in_peaks.fill(0);
        cs.master_out_peaks.fill(0);
        (input, output)
    }

    /// Snapshot the engine like [`status`](Self::status), then clear the master peaks so
    /// the next snapshot meters only what was mixed since.
    pub fn take_status(&self) -> EngineStatus {
        let mut status = self.status();
        (status.master_in_peaks, status.master_out_peaks) = self.take_master_peaks();
        status
    }

    /// Route of one channel of a profile.
    pub fn route(
        &self,
        profile: &str,
        dir: Direction,
        channel: usize,
    ) -> Result<ChannelRoute, ConfigError> {
        self.shared.enter().profile_mut(profile)?.route(dir, channel)
    }

    /// Replace the route of one channel of a profile.
    pub fn set_route(
        &self,
        profile: &str,
        dir: Direction,
        channel: usize,
        route: ChannelRoute,
    ) -> Result<(), ConfigError> {
        self.shared.enter().profile_mut(profile)?.set_route(dir, channel, route)
    }

    /// Equalizer kernel of one channel of a profile.
    pub fn filter(
        &self,
        profile: &str,
        dir: Direction,
        channel: usize,
    ) -> Result<Option<Vec<f64>>, ConfigError> {
        let mut cs = self.shared.enter();
        let profile = cs.profile_mut(profile)?;
        profile
            .direction(dir)
            .filters
            .get(channel)
            .cloned()
            .ok_or(ConfigError::ChannelOutOfRange {
                index: channel,
                channels: crate::MAX_CHANNELS,
            })
    }

    /// Install or clear an equalizer kernel. Every client of the profile restarts its filter.
    pub fn set_filter(
        &self,
        profile: &str,
        dir: Direction,
        channel: usize,
        taps: Option<Vec<f64>>,
    ) -> Result<(), ConfigError> {
        if let Some(taps) = &taps {
            FirFilter::new(taps)?;
        }
        let mut cs = self.shared.enter();
        let index = cs
            .profile_index(profile)
            .ok_or_else(|| ConfigError::UnknownProfile(profile.to_string()))?;
        let state = &mut *cs;
        state.profiles[index].set_filter(dir, channel, taps)?;
        let profile = &state.profiles[index];
        for client in state.clients.iter_mut().filter(|c| c.profile == index) {
            client.rebuild_filters(profile)?;
        }
        Ok(())
    }

    /// Compressor settings of a profile.
    pub fn compressor(&self, profile: &str) -> Result<CompressorSettings, ConfigError> {
        Ok(self.shared.enter().profile_mut(profile)?.compressor)
    }

    /// Replace a profile's compressor settings.
    pub fn set_compressor(
        &self,
        profile: &str,
        settings: CompressorSettings,
    ) -> Result<(), ConfigError> {
        self.shared.enter().profile_mut(profile)?.set_compressor(settings)
    }

    /// Master output compressor settings.
    pub fn master_compressor(&self) -> CompressorSettings {
        self.shared.enter().master_compressor
    }

    /// Replace the master output compressor settings.
    pub fn set_master_compressor(&self, settings: CompressorSettings) -> Result<(), ConfigError> {
        settings.validate()?;
        self.shared.enter().master_compressor = settings;
        Ok(())
    }

    /// Monitor taps in application order.
    pub fn taps(&self) -> Vec<MonitorTap> {
        self.shared.enter().taps.clone()
    }

    /// Append a monitor tap, returning its index.
    pub fn add_tap(&self, tap: MonitorTap) -> Result<usize, ConfigError> {
        let tap = validate_tap(tap)?;
        let mut cs = self.shared.enter();
        cs.taps.push(tap);
        Ok(cs.taps.len() - 1)
    }

    /// Replace a monitor tap, keeping its running peak.
    pub fn set_tap(&self, index: usize, tap: MonitorTap) -> Result<(), ConfigError> {
        let tap = validate_tap(tap)?;
        let mut cs = self.shared.enter();
        let slot = cs.taps.get_mut(index).ok_or(ConfigError::UnknownTap(index))?;
        *slot = MonitorTap { peak: slot.peak, ..tap };
        Ok(())
    }

    /// Remove a monitor tap. Later taps shift down by one.
    pub fn remove_tap(&self, index: usize) -> Result<MonitorTap, ConfigError> {
        let mut cs = self.shared.enter();
        if index >= cs.taps.len() {
            return Err(ConfigError::UnknownTap(index));
        }
        Ok(cs.taps.remove(index))
    }

    /// Read and clear a tap's peak.
    pub fn take_tap_peak(&self, index: usize) -> Result<i64, ConfigError> {
        let mut cs = self.shared.enter();
        let tap = cs.taps.get_mut(index).ok_or(ConfigError::UnknownTap(index))?;
        Ok(std::mem::take(&mut tap.peak))
    }

    /// Delay locator settings.
    pub fn locator(&self) -> LocatorSettings {
        self.shared.enter().locator.settings()
    }

    /// Replace the delay locator settings, restarting its capture.
    pub fn set_locator(&self, settings: LocatorSettings) -> Result<(), ConfigError> {
        for index in [settings.tx_channel, settings.rx_channel] {
            if index >= crate::MAX_CHANNELS {
                return Err(ConfigError::ChannelOutOfRange {
                    index,
                    channels: crate::MAX_CHANNELS,
                });
            }
        }
        let mut cs = self.shared.enter();
        let max_period = cs.locator.max_period_frames();
        if settings.period_frames == 0 || settings.period_frames > max_period {
            return Err(ConfigError::InvalidLocator(format!(
                "period {} frames, limit {max_period}",
                settings.period_frames
            )));
        }
        if settings.burst_frames == 0 || settings.burst_frames > settings.period_frames {
            return Err(ConfigError::InvalidLocator(format!(
                "burst {} frames for a {} frame period",
                settings.burst_frames, settings.period_frames
            )));
        }
        cs.locator.configure(settings);
        Ok(())
    }

    /// Last completed delay measurement.
    pub fn locator_report(&self) -> Option<LatencyReport> {
        self.shared.enter().locator.last_report()
    }

    /// Whether loopback clients receive the output mix.
    pub fn recording(&self) -> bool {
        self.shared.enter().recording
    }

    /// Enable or disable loopback recording globally.
    pub fn set_recording(&self, enabled: bool) {
        self.shared.enter().recording = enabled;
        info!(enabled, "recording");
        crate::push_log(format!("recording {}", if enabled { "on" } else { "off" }));
    }

    /// Apply a directive line. Either every directive applies or none does.
    pub fn apply_directives(&self, line: &str) -> Result<(), ConfigError> {
        let directives = parse_directives(line)?;
        let mut cs = self.shared.enter();
        let refresh = cs.apply(directives)?;
        if refresh {
            cs.wake_all();
        }
        crate::push_log(format!("applied '{line}'"));
        Ok(())
    }

    /// Close and reopen the backends at the next iteration boundary.
    pub fn refresh(&self) {
        self.shared.enter().refresh = true;
        crate::push_log("refresh requested");
    }
}

/// Publish `control` as the engine process-wide tooling talks to.
pub fn register(control: Control) {
    *ACTIVE.write() = Some(control);
}

/// Forget the published engine.
pub fn unregister() {
    *ACTIVE.write() = None;
}

/// The published engine's control surface, if any.
pub fn active() -> Option<Control> {
    ACTIVE.read().clone()
}

/// Fetch the current engine status snapshot if an engine is published.
pub fn get_status() -> Option<EngineStatus> {
    active().map(|control| control.status())
}

/// Like [`get_status`], clearing the master peaks it reports.
pub fn take_status() -> Option<EngineStatus> {
    active().map(|control| control.take_status())
}

/// Toggle the transmit mute of every channel of a profile. Returns the new state.
pub fn toggle_profile_mute(profile: &str) -> Result<bool, ConfigError> {
    let control = active().ok_or_else(|| ConfigError::UnknownProfile(profile.to_string()))?;
    let muted = !control.route(profile, Direction::Tx, 0)?.mute;
    for channel in 0..crate::MAX_CHANNELS {
        let route = control.route(profile, Direction::Tx, channel)?;
        control.set_route(profile, Direction::Tx, channel, ChannelRoute { mute: muted, ..route })?;
    }
    Ok(muted)
}

/// Set the transmit shift of every channel of a profile.
pub fn set_profile_shift(profile: &str, shift: i32) -> Result<(), ConfigError> {
    let control = active().ok_or_else(|| ConfigError::UnknownProfile(profile.to_string()))?;
    for channel in 0..crate::MAX_CHANNELS {
        let route = control.route(profile, Direction::Tx, channel)?;
        control.set_route(profile, Direction::Tx, channel, ChannelRoute { shift, ..route })?;
    }
    Ok(())
}
