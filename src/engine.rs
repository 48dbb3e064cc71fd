//! Engine root: the shared state, profile registration and client open.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{info, warn};

use crate::MAX_CHANNELS;
use crate::backend::Backend;
use crate::client::{Client, ClientHandle, ClientId, Geometry, OpenOptions};
use crate::compressor::{CompressorSettings, CompressorState};
use crate::config::{Directive, Settings};
use crate::control::api::{self, Control};
use crate::error::ConfigError;
use crate::format::SampleFormat;
use crate::latency::{DelayLocator, LocatorSettings};
use crate::mixloop::{LoopState, MixLoop};
use crate::profile::{MonitorTap, Profile};
use crate::sync::{Shared, SyncLink};

/// Formats and channel counts the backends accepted at the last open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HardwareInfo {
    /// Capture format.
    pub rx_format: SampleFormat,
    /// Playback format.
    pub tx_format: SampleFormat,
    /// Capture channels.
    pub rx_channels: usize,
    /// Playback channels.
    pub tx_channels: usize,
}

/// Everything guarded by the engine lock.
pub struct EngineState {
    pub(crate) settings: Settings,
    pub(crate) geometry: Geometry,
    pub(crate) mix_bits: u32,
    pub(crate) hardware: Option<HardwareInfo>,
    pub(crate) profiles: Vec<Profile>,
    pub(crate) clients: Vec<Client>,
    pub(crate) taps: Vec<MonitorTap>,
    pub(crate) master_compressor: CompressorSettings,
    pub(crate) master_state: CompressorState,
    pub(crate) locator: DelayLocator,
    pub(crate) recording: bool,
    pub(crate) sync_client: Option<ClientId>,
    pub(crate) exit: bool,
    pub(crate) refresh: bool,
    pub(crate) loop_state: LoopState,
    pub(crate) master_in_peaks: Vec<i64>,
    pub(crate) master_out_peaks: Vec<i64>,
    pub(crate) iterations: u64,
    next_client: u64,
}

impl EngineState {
    fn new(settings: Settings) -> Self {
        let geometry = Geometry {
            mix_rate: settings.sample_rate,
            block_frames: settings.samples,
            quality: settings.quality,
        };
        Self {
            mix_bits: settings.hw_format.bits(),
            locator: DelayLocator::new(settings.sample_rate, LocatorSettings::default()),
            settings,
            geometry,
            hardware: None,
            profiles: Vec::new(),
            clients: Vec::new(),
            taps: Vec::new(),
            master_compressor: CompressorSettings::default(),
            master_state: CompressorState::default(),
            recording: true,
            sync_client: None,
            exit: false,
            refresh: false,
            loop_state: LoopState::Opening,
            master_in_peaks: Vec::new(),
            master_out_peaks: Vec::new(),
            iterations: 0,
            next_client: 1,
        }
    }

    /// Index of the profile called `name`.
    pub fn profile_index(&self, name: &str) -> Option<usize> {
        self.profiles.iter().position(|p| p.name == name)
    }

    pub(crate) fn profile_mut(&mut self, name: &str) -> Result<&mut Profile, ConfigError> {
        self.profiles
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
    }

    pub(crate) fn client_mut(&mut self, id: ClientId) -> Option<&mut Client> {
        self.clients.iter_mut().find(|c| c.id == id)
    }

    pub(crate) fn client_and_profile(
        &mut self,
        id: ClientId,
    ) -> Option<(&mut Client, &mut Profile)> {
        let client = self.clients.iter_mut().find(|c| c.id == id)?;
        let profile = self.profiles.get_mut(client.profile)?;
        Some((client, profile))
    }

    /// Detach a client from routing. Its buffers are freed when the returned value drops.
    pub(crate) fn remove_client(&mut self, id: ClientId) -> Option<Client> {
        let index = self.clients.iter().position(|c| c.id == id)?;
        if self.sync_client == Some(id) {
            self.sync_client = None;
        }
        Some(self.clients.remove(index))
    }

    fn add_profile(&mut self, profile: Profile) -> Result<(), ConfigError> {
        if self.profile_index(&profile.name).is_some() {
            return Err(ConfigError::DuplicateProfile(profile.name));
        }
        info!(
            profile = %profile.name,
            kind = ?profile.kind,
            channels = profile.channels,
            "profile added"
        );
        crate::push_log(format!("profile '{}' added", profile.name));
        self.profiles.push(profile);
        Ok(())
    }

    /// Apply parsed directives as one unit. Returns whether the backends must reopen.
    pub(crate) fn apply(&mut self, directives: Vec<Directive>) -> Result<bool, ConfigError> {
        let mut settings = self.settings.clone();
        let mut master = self.master_compressor;
        let mut profiles: Vec<Profile> = Vec::new();
        let mut taps = Vec::new();
        let mut refresh = false;

        for directive in directives {
            refresh |= directive.needs_refresh();
            match directive {
                Directive::Rate(rate) => settings.sample_rate = rate,
                Directive::MixChannels(channels) => settings.mix_channels = channels,
                Directive::Samples(samples) => settings.samples = samples,
                Directive::Device { rx, tx } => {
                    if let Some(rx) = rx {
                        settings.rx_device = rx;
                    }
                    if let Some(tx) = tx {
                        settings.tx_device = tx;
                    }
                }
                Directive::Quality(quality) => settings.quality = quality,
                Directive::MasterCompressor(compressor) => master = compressor,
                Directive::Profile(profile) => {
                    let taken = self.profile_index(&profile.name).is_some()
                        || profiles.iter().any(|p| p.name == profile.name);
                    if taken {
                        return Err(ConfigError::DuplicateProfile(profile.name));
                    }
                    profiles.push(*profile);
                }
                Directive::Tap(tap) => taps.push(validate_tap(tap)?),
            }
        }

        self.settings = settings.validated()?;
        self.master_compressor = master;
        for profile in profiles {
            self.add_profile(profile)?;
        }
        self.taps.extend(taps);
        if refresh {
            self.refresh = true;
        }
        Ok(refresh)
    }

    /// Resize every client for a new mixing geometry after the backends reopened.
    pub(crate) fn apply_geometry(&mut self, geometry: Geometry) {
        if geometry == self.geometry {
            return;
        }
        self.geometry = geometry;
        if self.locator.sample_rate() != geometry.mix_rate {
            self.locator = DelayLocator::new(geometry.mix_rate, self.locator.settings());
        }
        let EngineState { profiles, clients, .. } = self;
        for client in clients.iter_mut() {
            let Some(profile) = profiles.get(client.profile) else {
                continue;
            };
            let layout = client.layout;
            if let Err(err) = client.relayout(layout, profile, &geometry) {
                warn!(client = %client.id, %err, "client could not follow the new geometry");
            }
        }
    }
}

pub(crate) fn validate_tap(tap: MonitorTap) -> Result<MonitorTap, ConfigError> {
    for index in [tap.src, tap.dst] {
        if index >= MAX_CHANNELS {
            return Err(ConfigError::ChannelOutOfRange {
                index,
                channels: MAX_CHANNELS,
            });
        }
    }
    Ok(tap)
}

/// Cloneable handle to a running engine.
#[derive(Clone)]
pub struct Engine {
    pub(crate) shared: Arc<Shared>,
}

impl Engine {
    /// Create an engine with no profiles and no running loop.
    pub fn new(settings: Settings) -> Result<Self, ConfigError> {
        crate::init_tracing();
        let settings = settings.validated()?;
        info!(
            rate = settings.sample_rate,
            samples = settings.samples,
            mix_channels = settings.mix_channels,
            "engine created"
        );
        Ok(Self {
            shared: Arc::new(Shared::new(EngineState::new(settings))),
        })
    }

    /// Create an engine and apply a start-up directive line.
    pub fn with_directives(settings: Settings, line: &str) -> Result<Self, ConfigError> {
        let engine = Self::new(settings)?;
        engine.control().apply_directives(line)?;
        // nothing is open yet, so the first open already sees the new settings
        engine.shared.enter().refresh = false;
        Ok(engine)
    }

    /// Register a profile.
    pub fn add_profile(&self, profile: Profile) -> Result<(), ConfigError> {
        self.shared.enter().add_profile(profile)
    }

    /// Open a client against the named profile.
    pub fn open_client(
        &self,
        profile: &str,
        options: OpenOptions,
    ) -> Result<ClientHandle, ConfigError> {
        let mut cs = self.shared.enter();
        let index = cs
            .profile_index(profile)
            .ok_or_else(|| ConfigError::UnknownProfile(profile.to_string()))?;
        if options.synchronized && cs.sync_client.is_some() {
            return Err(ConfigError::SyncBusy);
        }
        let id = ClientId(cs.next_client);
        let mut client = Client::new(id, index, &cs.profiles[index], &cs.geometry, &options)?;
        cs.next_client += 1;

        let link = if options.synchronized {
            let (link, rx) = SyncLink::new();
            client.sync = Some(link);
            cs.sync_client = Some(id);
            Some(rx)
        } else {
            None
        };
        info!(
            client = %id,
            profile,
            layout = ?client.layout(),
            synchronized = options.synchronized,
            "client opened"
        );
        crate::push_log(format!("client {id} opened on '{profile}'"));
        cs.clients.push(client);
        Ok(ClientHandle::new(self.shared.clone(), id, link))
    }

    /// Control surface for this engine.
    pub fn control(&self) -> Control {
        Control::new(self.shared.clone())
    }

    /// Make this engine the one process-wide tooling talks to.
    pub fn publish(&self) {
        api::register(self.control());
    }

    /// Build the mixing loop without starting a thread. Drive it with [`MixLoop::step`].
    pub fn mix_loop(&self, rx: Box<dyn Backend>, tx: Box<dyn Backend>) -> MixLoop {
        MixLoop::new(self.shared.clone(), rx, tx)
    }

    /// Run the mixing loop on a dedicated thread until [`shutdown`](Self::shutdown).
    pub fn spawn(
        &self,
        rx: Box<dyn Backend>,
        tx: Box<dyn Backend>,
    ) -> std::io::Result<JoinHandle<()>> {
        let mix_loop = self.mix_loop(rx, tx);
        std::thread::Builder::new()
            .name("vmix-loop".into())
            .spawn(move || mix_loop.run())
    }

    /// Ask the loop to exit and wake every blocked client.
    pub fn shutdown(&self) {
        let mut cs = self.shared.enter();
        cs.exit = true;
        for client in cs.clients.iter_mut() {
            client.sync = None;
        }
        cs.wake_all();
        info!("engine shutdown requested");
        crate::push_log("engine shutdown requested");
    }
}
