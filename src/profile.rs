//! Named routing configurations shared by clients, and monitor taps.

use crate::MAX_CHANNELS;
use crate::compressor::{CompressorSettings, CompressorState};
use crate::error::ConfigError;
use crate::fir::MAX_TAPS;
use crate::format;
use crate::mixer::{self, Dither, MixParams};

/// How a profile's clients are fed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileKind {
    /// Regular device: receives hardware input, contributes to the output mix.
    Dsp,
    /// Recording loopback: receives the final output mix, contributes nothing.
    Loopback,
}

/// Routing of one client channel in one direction.
///
/// On the receive side `channel` is the mix channel feeding this client channel; on the
/// transmit side it is the mix channel this client channel is added to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelRoute {
    /// Mix channel index.
    pub channel: usize,
    /// Gain in power-of-two steps.
    pub shift: i32,
    /// Invert polarity.
    pub invert: bool,
    /// Silence this channel.
    pub mute: bool,
}

impl ChannelRoute {
    /// Unity route to `channel`.
    pub fn to_channel(channel: usize) -> Self {
        Self {
            channel,
            shift: 0,
            invert: false,
            mute: false,
        }
    }
}

/// Transfer direction as seen from the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Engine to client (recording).
    Rx,
    /// Client to engine (playback).
    Tx,
}

/// Routing parameters for one direction of a profile.
#[derive(Clone, Debug)]
pub struct DirectionConfig {
    /// Per-channel routes, sized to `MAX_CHANNELS`.
    pub routes: Vec<ChannelRoute>,
    /// Equalizer kernel per channel; `None` passes the channel through.
    pub filters: Vec<Option<Vec<f64>>>,
}

impl DirectionConfig {
    fn identity() -> Self {
        Self {
            routes: (0..MAX_CHANNELS).map(ChannelRoute::to_channel).collect(),
            filters: vec![None; MAX_CHANNELS],
        }
    }
}

/// A named routing configuration shared by every client opened against it.
#[derive(Clone, Debug)]
pub struct Profile {
    /// Unique name clients open by.
    pub name: String,
    /// Regular device or recording loopback.
    pub kind: ProfileKind,
    /// Default client channel count.
    pub channels: usize,
    /// Default client wire bit depth.
    pub bits: u32,
    /// Receive routing.
    pub rx: DirectionConfig,
    /// Transmit routing.
    pub tx: DirectionConfig,
    /// Compressor applied to the receive block before it reaches any client.
    pub compressor: CompressorSettings,
    /// Smoothed compressor gain, advanced once per iteration.
    pub compressor_state: CompressorState,
}

impl Profile {
    /// Profile with identity routing.
    pub fn new(
        name: impl Into<String>,
        kind: ProfileKind,
        channels: usize,
        bits: u32,
    ) -> Result<Self, ConfigError> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(ConfigError::InvalidChannels(channels));
        }
        if !matches!(bits, 8 | 16 | 24 | 32) {
            return Err(ConfigError::InvalidBits(bits));
        }
        Ok(Self {
            name: name.into(),
            kind,
            channels,
            bits,
            rx: DirectionConfig::identity(),
            tx: DirectionConfig::identity(),
            compressor: CompressorSettings::default(),
            compressor_state: CompressorState::default(),
        })
    }

    /// Routing for one direction.
    pub fn direction(&self, dir: Direction) -> &DirectionConfig {
        match dir {
            Direction::Rx => &self.rx,
            Direction::Tx => &self.tx,
        }
    }

    /// Mutable routing for one direction.
    pub fn direction_mut(&mut self, dir: Direction) -> &mut DirectionConfig {
        match dir {
            Direction::Rx => &mut self.rx,
            Direction::Tx => &mut self.tx,
        }
    }

    /// Route of a client channel, validated against `MAX_CHANNELS`.
    pub fn route(&self, dir: Direction, channel: usize) -> Result<ChannelRoute, ConfigError> {
        self.direction(dir)
            .routes
            .get(channel)
            .copied()
            .ok_or(ConfigError::ChannelOutOfRange {
                index: channel,
                channels: MAX_CHANNELS,
            })
    }

    /// Replace the route of a client channel.
    pub fn set_route(
        &mut self,
        dir: Direction,
        channel: usize,
        route: ChannelRoute,
    ) -> Result<(), ConfigError> {
        if route.channel >= MAX_CHANNELS {
            return Err(ConfigError::ChannelOutOfRange {
                index: route.channel,
                channels: MAX_CHANNELS,
            });
        }
        let slot = self
            .direction_mut(dir)
            .routes
            .get_mut(channel)
            .ok_or(ConfigError::ChannelOutOfRange {
                index: channel,
                channels: MAX_CHANNELS,
            })?;
        *slot = route;
        Ok(())
    }

    /// Install or clear the equalizer kernel of a client channel.
    pub fn set_filter(
        &mut self,
        dir: Direction,
        channel: usize,
        taps: Option<Vec<f64>>,
    ) -> Result<(), ConfigError> {
        if let Some(taps) = &taps {
            if taps.is_empty() || taps.len() > MAX_TAPS {
                return Err(ConfigError::InvalidFilter(format!("{} taps", taps.len())));
            }
        }
        let slot = self
            .direction_mut(dir)
            .filters
            .get_mut(channel)
            .ok_or(ConfigError::ChannelOutOfRange {
                index: channel,
                channels: MAX_CHANNELS,
            })?;
        *slot = taps;
        Ok(())
    }

    /// Route one mixing block into `block`, `channels` wide at this profile's bit depth,
    /// and compress it. Every receiving client of the profile is fed from this one block.
    pub(crate) fn render_rx(
        &mut self,
        mix: &[i64],
        mix_channels: usize,
        frames: usize,
        mix_bits: u32,
        channels: usize,
        block: &mut [i64],
        dither: &mut Dither,
    ) {
        let Some(block) = block.get_mut(..frames * channels) else {
            return;
        };
        for (channel, route) in self.rx.routes.iter().enumerate().take(channels) {
            if route.mute || route.channel >= mix_channels {
                mixer::clear_channel(block, channel, channels, frames);
                continue;
            }
            let shift = self.bits as i32 - mix_bits as i32 + route.shift;
            let params = MixParams {
                dither: shift < 0,
                ..MixParams::assign().with_shift(shift).with_invert(route.invert)
            };
            mixer::mix_channel(
                block,
                channel,
                channels,
                mix,
                route.channel,
                mix_channels,
                frames,
                params,
                dither,
            );
        }
        self.compressor_state.process(
            &self.compressor,
            block,
            channels,
            frames,
            format::max_for_bits(self.bits),
        );
    }

    /// Replace the compressor settings, keeping the smoothed gain state.
    pub fn set_compressor(&mut self, settings: CompressorSettings) -> Result<(), ConfigError> {
        settings.validate()?;
        self.compressor = settings;
        Ok(())
    }
}

/// Where a monitor tap is applied inside one mixing iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TapPoint {
    /// Input mix to input mix, before clients receive it.
    PreMix,
    /// Previous output mix to input mix, before clients receive it.
    Local,
    /// Input mix to output mix, after client output is collected.
    Input,
    /// Output mix to output mix, after client output is collected.
    Output,
}

impl TapPoint {
    /// Parse the single-letter directive form (`p`, `l`, `i`, `o`).
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "p" => Some(TapPoint::PreMix),
            "l" => Some(TapPoint::Local),
            "i" => Some(TapPoint::Input),
            "o" => Some(TapPoint::Output),
            _ => None,
        }
    }
}

/// An auxiliary routing and level meter independent of clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonitorTap {
    /// Injection point.
    pub point: TapPoint,
    /// Source mix channel.
    pub src: usize,
    /// Destination mix channel.
    pub dst: usize,
    /// Invert polarity.
    pub invert: bool,
    /// Meter only, inject nothing.
    pub mute: bool,
    /// Gain in power-of-two steps.
    pub shift: i32,
    /// Largest source magnitude since last read.
    pub peak: i64,
}

impl MonitorTap {
    /// Unity tap from `src` to `dst`.
    pub fn new(point: TapPoint, src: usize, dst: usize) -> Self {
        Self {
            point,
            src,
            dst,
            invert: false,
            mute: false,
            shift: 0,
            peak: 0,
        }
    }
}
