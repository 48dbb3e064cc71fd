//! Engine settings and the directive grammar shared by start-up and the control interface.
//!
//! A directive line is a whitespace separated list of options. Options that shape profiles
//! (`-c`, `-b`, `-a`, `-m`, `-p`, `-e`, `-x`, `-F`) apply to every profile declared after
//! them on the same line with `-d` or `-l`.

use std::time::Duration;

use crate::MAX_CHANNELS;
use crate::compressor::CompressorSettings;
use crate::error::ConfigError;
use crate::format::SampleFormat;
use crate::profile::{ChannelRoute, MonitorTap, Profile, ProfileKind, TapPoint};
use crate::resample::ResampleQuality;

/// Lowest accepted sample rate.
pub const MIN_RATE: u32 = 8_000;
/// Highest accepted sample rate.
pub const MAX_RATE: u32 = 384_000;
/// Rates reported by the capability query.
pub const RATE_LIST: [u32; 9] = [
    8_000, 11_025, 16_000, 22_050, 32_000, 44_100, 48_000, 96_000, 192_000,
];

/// Process-wide engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Hardware and mixing sample rate.
    pub sample_rate: u32,
    /// Channels of the internal mix buffers.
    pub mix_channels: usize,
    /// Frames per mixing iteration.
    pub samples: usize,
    /// Capture device name.
    pub rx_device: String,
    /// Playback device name.
    pub tx_device: String,
    /// Preferred hardware format, tried before the fallbacks.
    pub hw_format: SampleFormat,
    /// Resampling quality for clients at a different rate.
    pub quality: ResampleQuality,
    /// Cooldown before reopening failed backends.
    pub reopen_delay: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            mix_channels: 2,
            samples: 1_024,
            rx_device: "null".into(),
            tx_device: "null".into(),
            hw_format: SampleFormat::S16Le,
            quality: ResampleQuality::Medium,
            reopen_delay: Duration::from_secs(1),
        }
    }
}

impl Settings {
    /// Check ranges, returning the settings unchanged when valid.
    pub fn validated(self) -> Result<Self, ConfigError> {
        validate_rate(self.sample_rate)?;
        if self.mix_channels == 0 || self.mix_channels > MAX_CHANNELS {
            return Err(ConfigError::InvalidChannels(self.mix_channels));
        }
        if self.samples == 0 || self.samples > 65_536 {
            return Err(ConfigError::InvalidBufferSize(self.samples));
        }
        Ok(self)
    }

    /// Hardware format preference list, preferred format first.
    pub fn format_preferences(&self) -> Vec<SampleFormat> {
        let mut list = vec![self.hw_format];
        for fmt in [SampleFormat::S32Le, SampleFormat::S24Le, SampleFormat::S16Le] {
            if !list.contains(&fmt) {
                list.push(fmt);
            }
        }
        list
    }

    /// Length of one iteration.
    pub fn iteration_period(&self) -> Duration {
        Duration::from_secs_f64(self.samples as f64 / f64::from(self.sample_rate))
    }
}

/// Check a sample rate against the accepted range.
pub fn validate_rate(rate: u32) -> Result<u32, ConfigError> {
    if (MIN_RATE..=MAX_RATE).contains(&rate) {
        Ok(rate)
    } else {
        Err(ConfigError::InvalidRate(rate))
    }
}

/// One parsed action of a directive line.
#[derive(Debug, Clone)]
pub enum Directive {
    /// `-r`
    Rate(u32),
    /// `-C`
    MixChannels(usize),
    /// `-s`
    Samples(usize),
    /// `-f`, `-R`, `-P`
    Device {
        /// New capture device, if named.
        rx: Option<String>,
        /// New playback device, if named.
        tx: Option<String>,
    },
    /// `-Q`
    Quality(ResampleQuality),
    /// `-g`
    MasterCompressor(CompressorSettings),
    /// `-d` or `-l`, carrying the accumulated profile options.
    Profile(Box<Profile>),
    /// `-M`
    Tap(MonitorTap),
}

impl Directive {
    /// True when applying this directive requires reopening the backends.
    pub fn needs_refresh(&self) -> bool {
        matches!(
            self,
            Directive::Rate(_)
                | Directive::MixChannels(_)
                | Directive::Samples(_)
                | Directive::Device { .. }
        )
    }
}

#[derive(Clone)]
struct Template {
    channels: usize,
    bits: u32,
    shift: i32,
    map: Option<Vec<(usize, usize)>>,
    invert: bool,
    rx_mute: bool,
    tx_mute: bool,
    compressor: CompressorSettings,
    filter_taps: usize,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            channels: 2,
            bits: 16,
            shift: 0,
            map: None,
            invert: false,
            rx_mute: false,
            tx_mute: false,
            compressor: CompressorSettings::default(),
            filter_taps: 0,
        }
    }
}

impl Template {
    fn build(&self, name: &str, kind: ProfileKind) -> Result<Profile, ConfigError> {
        let mut profile = Profile::new(name, kind, self.channels, self.bits)?;
        for ch in 0..self.channels {
            let (rx_src, tx_dst) = self
                .map
                .as_ref()
                .and_then(|pairs| pairs.get(ch).copied())
                .unwrap_or((ch, ch));
            let rx = ChannelRoute {
                channel: rx_src,
                shift: self.shift,
                invert: self.invert,
                mute: self.rx_mute,
            };
            let tx = ChannelRoute {
                channel: tx_dst,
                mute: self.tx_mute,
                ..rx
            };
            profile.set_route(crate::profile::Direction::Rx, ch, rx)?;
            profile.set_route(crate::profile::Direction::Tx, ch, tx)?;
            if self.filter_taps > 0 {
                let mut taps = vec![0.0; self.filter_taps];
                taps[0] = 1.0;
                profile.set_filter(crate::profile::Direction::Rx, ch, Some(taps.clone()))?;
                profile.set_filter(crate::profile::Direction::Tx, ch, Some(taps))?;
            }
        }
        profile.set_compressor(self.compressor)?;
        Ok(profile)
    }
}

/// Parse a directive line into actions. Nothing is applied here.
pub fn parse_directives(line: &str) -> Result<Vec<Directive>, ConfigError> {
    let mut tokens = line.split_whitespace();
    let mut template = Template::default();
    let mut out = Vec::new();

    while let Some(option) = tokens.next() {
        let mut value = || {
            tokens.next().ok_or_else(|| ConfigError::Directive {
                directive: option.to_string(),
                reason: "missing value".into(),
            })
        };
        match option {
            "-r" => out.push(Directive::Rate(validate_rate(number(option, value()?)?)?)),
            "-C" => {
                let channels: usize = number(option, value()?)?;
                if channels == 0 || channels > MAX_CHANNELS {
                    return Err(ConfigError::InvalidChannels(channels));
                }
                out.push(Directive::MixChannels(channels));
            }
            "-s" => {
                let samples: usize = number(option, value()?)?;
                if samples == 0 {
                    return Err(ConfigError::InvalidBufferSize(samples));
                }
                out.push(Directive::Samples(samples));
            }
            "-f" => {
                let device = value()?.to_string();
                out.push(Directive::Device {
                    rx: Some(device.clone()),
                    tx: Some(device),
                });
            }
            "-R" => out.push(Directive::Device {
                rx: Some(value()?.to_string()),
                tx: None,
            }),
            "-P" => out.push(Directive::Device {
                rx: None,
                tx: Some(value()?.to_string()),
            }),
            "-Q" => {
                let level = number(option, value()?)?;
                out.push(Directive::Quality(ResampleQuality::from_level(level)));
            }
            "-c" => {
                let channels: usize = number(option, value()?)?;
                if channels == 0 || channels > MAX_CHANNELS {
                    return Err(ConfigError::InvalidChannels(channels));
                }
                template.channels = channels;
            }
            "-b" => {
                let bits: u32 = number(option, value()?)?;
                if !matches!(bits, 8 | 16 | 24 | 32) {
                    return Err(ConfigError::InvalidBits(bits));
                }
                template.bits = bits;
            }
            "-a" => template.shift = number(option, value()?)?,
            "-m" => {
                let values: Vec<usize> = list(option, value()?)?;
                if values.len() % 2 != 0 {
                    return Err(bad(option, "channel map needs rx,tx pairs"));
                }
                if let Some(ch) = values.iter().find(|ch| **ch >= MAX_CHANNELS) {
                    return Err(ConfigError::ChannelOutOfRange {
                        index: *ch,
                        channels: MAX_CHANNELS,
                    });
                }
                template.map = Some(values.chunks_exact(2).map(|p| (p[0], p[1])).collect());
            }
            "-p" => template.invert = true,
            "-e" => {
                let values: Vec<u8> = list(option, value()?)?;
                let [rx, tx] = values[..] else {
                    return Err(bad(option, "expected rx_mute,tx_mute"));
                };
                template.rx_mute = rx != 0;
                template.tx_mute = tx != 0;
            }
            "-x" => template.compressor = compressor(option, value()?)?,
            "-g" => out.push(Directive::MasterCompressor(compressor(option, value()?)?)),
            "-F" => {
                let taps: usize = number(option, value()?)?;
                if taps > crate::fir::MAX_TAPS {
                    return Err(ConfigError::InvalidFilter(format!("{taps} taps")));
                }
                template.filter_taps = taps;
            }
            "-M" => out.push(Directive::Tap(tap(option, value()?)?)),
            "-d" => {
                let profile = template.build(value()?, ProfileKind::Dsp)?;
                out.push(Directive::Profile(Box::new(profile)));
            }
            "-l" => {
                let profile = template.build(value()?, ProfileKind::Loopback)?;
                out.push(Directive::Profile(Box::new(profile)));
            }
            other => return Err(bad(other, "unknown option")),
        }
    }
    Ok(out)
}

fn bad(option: &str, reason: &str) -> ConfigError {
    ConfigError::Directive {
        directive: option.to_string(),
        reason: reason.to_string(),
    }
}

fn number<T: std::str::FromStr>(option: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse()
        .map_err(|_| bad(option, &format!("'{raw}' is not a number")))
}

fn list<T: std::str::FromStr>(option: &str, raw: &str) -> Result<Vec<T>, ConfigError> {
    raw.split(',').map(|item| number(option, item)).collect()
}

fn compressor(option: &str, raw: &str) -> Result<CompressorSettings, ConfigError> {
    let values: Vec<u8> = list(option, raw)?;
    let [knee, attack, decay] = values[..] else {
        return Err(bad(option, "expected knee,attack,decay"));
    };
    CompressorSettings::new(knee, attack, decay)
}

fn tap(option: &str, raw: &str) -> Result<MonitorTap, ConfigError> {
    let fields: Vec<&str> = raw.split(',').collect();
    let [kind, src, dst, invert, mute, shift] = fields[..] else {
        return Err(bad(option, "expected type,src,dst,pol,mute,shift"));
    };
    let point =
        TapPoint::from_code(kind).ok_or_else(|| bad(option, "tap type must be p, l, i or o"))?;
    let mut tap = MonitorTap::new(point, number(option, src)?, number(option, dst)?);
    tap.invert = number::<u8>(option, invert)? != 0;
    tap.mute = number::<u8>(option, mute)? != 0;
    tap.shift = number(option, shift)?;
    Ok(tap)
}
