//! Client endpoints: per-client buffers, format and rate conversion, and the handle a
//! device front end drives with read, write, poll and ioctl calls.
//!
//! Each direction of a client owns two rings. The wire ring holds bytes in the client's own
//! format and rate; the canonical ring holds 64-bit samples at the mixing rate, scaled to the
//! client's bit depth. The engine moves data between the two (the "pump") both from client
//! calls and from the mixing loop, so a client that never calls still gets serviced up to the
//! capacity of its buffers.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::{debug, info};

use crate::MAX_CHANNELS;
use crate::config::{RATE_LIST, validate_rate};
use crate::error::{ClientError, ConfigError, ResampleError};
use crate::fir::FirBank;
use crate::format::{self, SampleFormat};
use crate::mixer::{self, Dither, MixParams};
use crate::profile::{ChannelRoute, Direction, Profile};
use crate::resample::{RateConverter, ResampleQuality};
use crate::ring::{RingBuffer, monotonic_timestamp_ns};
use crate::sync::{CriticalSection, Shared, SyncEvent, SyncLink, WAIT_SLICE, Wake};

/// Mixing blocks of canonical audio a client buffers per direction.
pub const CANONICAL_BLOCKS: usize = 4;
/// Fragments per wire ring unless the client asks otherwise.
pub const DEFAULT_FRAGMENTS: usize = 4;
/// Largest accepted fragment.
pub const MAX_FRAGMENT_BYTES: usize = 1 << 20;
/// Longest accepted recording delay, in seconds of audio.
pub const MAX_RECORDING_DELAY_SECS: usize = 10;

const SAMPLE_BYTES: usize = std::mem::size_of::<i64>();

/// Engine-assigned client identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Options for opening a client against a profile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Return [`ClientError::WouldBlock`] instead of waiting.
    pub nonblocking: bool,
    /// Run in lock-step with the mixing loop. At most one such client exists.
    pub synchronized: bool,
    /// Wire format; defaults to signed little endian at the profile's bit depth.
    pub format: Option<SampleFormat>,
    /// Channel count; defaults to the profile's.
    pub channels: Option<usize>,
    /// Sample rate; defaults to the mixing rate.
    pub rate: Option<u32>,
}

/// Timing of the running mix that client buffers are sized against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    /// Mixing sample rate.
    pub mix_rate: u32,
    /// Frames per mixing iteration.
    pub block_frames: usize,
    /// Rate conversion quality.
    pub quality: ResampleQuality,
}

impl Geometry {
    /// Client-rate frames covering one mixing block at `rate`.
    pub fn client_frames(&self, rate: u32) -> usize {
        let scaled = self.block_frames as u64 * u64::from(rate);
        scaled.div_ceil(u64::from(self.mix_rate.max(1))).max(1) as usize
    }
}

/// Client-selected format and buffering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    /// Wire format.
    pub format: SampleFormat,
    /// Interleaved channels.
    pub channels: usize,
    /// Client sample rate.
    pub rate: u32,
    /// Requested fragment size in bytes, `None` for one mixing block.
    pub fragment_size: Option<usize>,
    /// Fragments per wire ring.
    pub fragment_count: usize,
    /// Frames of silence queued ahead of live input when receiving starts.
    pub rx_delay: usize,
}

impl Layout {
    /// Bytes in one wire frame.
    pub fn frame_bytes(&self) -> usize {
        self.format.bytes() * self.channels
    }

    /// Effective fragment size in bytes, always a whole number of frames.
    pub fn fragment_bytes(&self, geometry: &Geometry) -> usize {
        let frame = self.frame_bytes();
        let requested = self
            .fragment_size
            .unwrap_or(geometry.client_frames(self.rate) * frame);
        requested.div_ceil(frame).max(1) * frame
    }
}

/// One direction of a client.
pub struct Lane {
    pub(crate) wire: RingBuffer,
    pub(crate) canonical: RingBuffer,
    pub(crate) enabled: bool,
    pub(crate) converter: Option<RateConverter>,
    pub(crate) filters: FirBank,
    pub(crate) peaks: Vec<i64>,
    pub(crate) xruns: u64,
    pub(crate) delay_pending: bool,
    pub(crate) bytes_moved: u64,
    pub(crate) last_transfer_ns: u64,
    pub(crate) block: Vec<i64>,
    io_in: Vec<i64>,
    io_out: Vec<i64>,
    io_bytes: Vec<u8>,
}

impl Lane {
    fn build(
        dir: Direction,
        layout: &Layout,
        geometry: &Geometry,
        kernels: &[Option<Vec<f64>>],
    ) -> Result<Self, ConfigError> {
        let ch = layout.channels;
        let frame_bytes = layout.frame_bytes();
        let wire_bytes = layout.fragment_bytes(geometry) * layout.fragment_count;
        let delay = if dir == Direction::Rx { layout.rx_delay } else { 0 };
        let canonical_frames = CANONICAL_BLOCKS * geometry.block_frames + delay;

        let converter = if layout.rate == geometry.mix_rate {
            None
        } else {
            let (from, to) = match dir {
                Direction::Rx => (geometry.mix_rate, layout.rate),
                Direction::Tx => (layout.rate, geometry.mix_rate),
            };
            Some(RateConverter::new(from, to, ch, geometry.quality)?)
        };

        let io_frames = geometry.client_frames(layout.rate).max(geometry.block_frames);
        Ok(Self {
            wire: RingBuffer::new(wire_bytes),
            canonical: RingBuffer::new(canonical_frames * ch * SAMPLE_BYTES),
            enabled: false,
            converter,
            filters: FirBank::from_kernels(kernels, ch)?,
            peaks: vec![0; ch],
            xruns: 0,
            delay_pending: false,
            bytes_moved: 0,
            last_transfer_ns: 0,
            block: vec![0; geometry.block_frames * ch],
            io_in: vec![0; io_frames * ch],
            io_out: vec![0; io_frames * ch],
            io_bytes: vec![0; io_frames * frame_bytes],
        })
    }

    fn reset(&mut self) {
        self.wire.reset();
        self.canonical.reset();
        if let Some(converter) = self.converter.as_mut() {
            converter.reset();
        }
        self.filters.reset();
        self.delay_pending = true;
    }

    fn queued_bytes(&self, frame_bytes: usize, channels: usize) -> usize {
        self.wire.total_unread() + self.canonical.unread_samples() / channels * frame_bytes
    }
}

/// Engine-side state of one open client.
pub struct Client {
    pub(crate) id: ClientId,
    pub(crate) profile: usize,
    pub(crate) layout: Layout,
    pub(crate) nonblocking: bool,
    pub(crate) low_water: usize,
    pub(crate) sync: Option<SyncLink>,
    pub(crate) rx: Lane,
    pub(crate) tx: Lane,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("profile", &self.profile)
            .field("layout", &self.layout)
            .field("synchronized", &self.sync.is_some())
            .finish()
    }
}

impl Client {
    /// Allocate a client and its buffers against `profile`.
    pub fn new(
        id: ClientId,
        profile_index: usize,
        profile: &Profile,
        geometry: &Geometry,
        options: &OpenOptions,
    ) -> Result<Self, ConfigError> {
        let format = match options.format {
            Some(fmt) => fmt,
            None => SampleFormat::signed_le(profile.bits)?,
        };
        let channels = options.channels.unwrap_or(profile.channels);
        check_channels(channels)?;
        let rate = match options.rate {
            Some(rate) => validate_rate(rate)?,
            None => geometry.mix_rate,
        };
        let layout = Layout {
            format,
            channels,
            rate,
            fragment_size: None,
            fragment_count: DEFAULT_FRAGMENTS,
            rx_delay: 0,
        };
        Ok(Self {
            id,
            profile: profile_index,
            layout,
            nonblocking: options.nonblocking,
            low_water: layout.frame_bytes(),
            sync: None,
            rx: Lane::build(Direction::Rx, &layout, geometry, &profile.rx.filters)?,
            tx: Lane::build(Direction::Tx, &layout, geometry, &profile.tx.filters)?,
        })
    }

    /// Client identifier.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Current format and buffering.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Bit depth canonical samples of this client are scaled to.
    pub fn bits(&self) -> u32 {
        self.layout.format.bits()
    }

    pub(crate) fn lane(&self, dir: Direction) -> &Lane {
        match dir {
            Direction::Rx => &self.rx,
            Direction::Tx => &self.tx,
        }
    }

    pub(crate) fn lane_mut(&mut self, dir: Direction) -> &mut Lane {
        match dir {
            Direction::Rx => &mut self.rx,
            Direction::Tx => &mut self.tx,
        }
    }

    /// Replace the layout, reallocating every buffer. Nothing changes on error.
    pub(crate) fn relayout(
        &mut self,
        layout: Layout,
        profile: &Profile,
        geometry: &Geometry,
    ) -> Result<(), ConfigError> {
        let mut rx = Lane::build(Direction::Rx, &layout, geometry, &profile.rx.filters)?;
        let mut tx = Lane::build(Direction::Tx, &layout, geometry, &profile.tx.filters)?;
        rx.enabled = self.rx.enabled;
        rx.delay_pending = self.rx.enabled;
        rx.xruns = self.rx.xruns;
        rx.bytes_moved = self.rx.bytes_moved;
        rx.last_transfer_ns = self.rx.last_transfer_ns;
        tx.enabled = self.tx.enabled;
        tx.xruns = self.tx.xruns;
        tx.bytes_moved = self.tx.bytes_moved;
        tx.last_transfer_ns = self.tx.last_transfer_ns;
        self.rx = rx;
        self.tx = tx;
        self.layout = layout;
        self.low_water = self.low_water.max(layout.frame_bytes());
        debug!(client = %self.id, ?layout, "client buffers reallocated");
        Ok(())
    }

    /// Rebuild equalizer state after the profile's kernels changed.
    pub(crate) fn rebuild_filters(&mut self, profile: &Profile) -> Result<(), ConfigError> {
        let rx = FirBank::from_kernels(&profile.rx.filters, self.layout.channels)?;
        let tx = FirBank::from_kernels(&profile.tx.filters, self.layout.channels)?;
        self.rx.filters = rx;
        self.tx.filters = tx;
        Ok(())
    }

    /// Enable or disable one direction. Enabling the receive side queues the recording delay.
    pub(crate) fn set_enabled(&mut self, dir: Direction, enabled: bool) {
        let lane = self.lane_mut(dir);
        if lane.enabled == enabled {
            return;
        }
        lane.enabled = enabled;
        if enabled {
            lane.delay_pending = dir == Direction::Rx;
        } else {
            lane.reset();
            lane.delay_pending = false;
        }
    }

    /// Drop all buffered audio and stop both directions.
    pub(crate) fn reset(&mut self) {
        for dir in [Direction::Rx, Direction::Tx] {
            let lane = self.lane_mut(dir);
            lane.reset();
            lane.enabled = false;
            lane.delay_pending = false;
        }
    }

    /// Bytes buffered in one direction, counting canonical audio at the wire frame size.
    pub fn queue_depth(&self, dir: Direction) -> usize {
        self.lane(dir)
            .queued_bytes(self.layout.frame_bytes(), self.layout.channels)
    }

    /// Read and clear the peak of one channel.
    pub(crate) fn take_peak(&mut self, dir: Direction, channel: usize) -> Result<i64, ConfigError> {
        let channels = self.layout.channels;
        let peak = self
            .lane_mut(dir)
            .peaks
            .get_mut(channel)
            .ok_or(ConfigError::ChannelOutOfRange { index: channel, channels })?;
        Ok(std::mem::take(peak))
    }

    /// Move receive audio from the canonical ring to the wire ring, converting format and rate.
    pub(crate) fn pump_rx(&mut self) -> Result<(), ResampleError> {
        let fmt = self.layout.format;
        let ch = self.layout.channels;
        let frame_bytes = self.layout.frame_bytes();
        let Lane {
            wire,
            canonical,
            converter,
            io_in,
            io_out,
            io_bytes,
            ..
        } = &mut self.rx;
        let chunk = io_in.len() / ch;

        loop {
            let wire_frames = wire.total_free() / frame_bytes;
            if wire_frames == 0 {
                break;
            }
            let frames = match converter {
                None => {
                    let frames = wire_frames.min(canonical.unread_samples() / ch).min(chunk);
                    if frames == 0 {
                        break;
                    }
                    canonical.read_samples(&mut io_in[..frames * ch]);
                    format::export(
                        fmt,
                        &io_in[..frames * ch],
                        &mut io_bytes[..frames * frame_bytes],
                    );
                    frames
                }
                Some(converter) => {
                    let available = (canonical.unread_samples() / ch).min(chunk);
                    canonical.peek_samples(&mut io_in[..available * ch]);
                    let out_frames = wire_frames.min(io_out.len() / ch);
                    let done = converter.process(
                        &io_in[..available * ch],
                        &mut io_out[..out_frames * ch],
                    )?;
                    canonical.discard(done.consumed * ch * SAMPLE_BYTES);
                    if done.consumed == 0 && done.produced == 0 {
                        break;
                    }
                    format::export(
                        fmt,
                        &io_out[..done.produced * ch],
                        &mut io_bytes[..done.produced * frame_bytes],
                    );
                    done.produced
                }
            };
            wire.write_linear(&io_bytes[..frames * frame_bytes]);
        }
        Ok(())
    }

    /// Move transmit audio from the wire ring to the canonical ring.
    pub(crate) fn pump_tx(&mut self) -> Result<(), ResampleError> {
        let fmt = self.layout.format;
        let ch = self.layout.channels;
        let frame_bytes = self.layout.frame_bytes();
        let Lane {
            wire,
            canonical,
            converter,
            io_in,
            io_out,
            io_bytes,
            ..
        } = &mut self.tx;
        let chunk = io_in.len() / ch;

        loop {
            let canonical_frames = canonical.free_samples() / ch;
            if canonical_frames == 0 {
                break;
            }
            match converter {
                None => {
                    let frames = (wire.total_unread() / frame_bytes)
                        .min(canonical_frames)
                        .min(chunk);
                    if frames == 0 {
                        break;
                    }
                    wire.read_linear(&mut io_bytes[..frames * frame_bytes]);
                    format::import(
                        fmt,
                        &io_bytes[..frames * frame_bytes],
                        &mut io_in[..frames * ch],
                    );
                    canonical.write_samples(&io_in[..frames * ch]);
                }
                Some(converter) => {
                    let available = (wire.total_unread() / frame_bytes).min(chunk);
                    wire.peek_linear(&mut io_bytes[..available * frame_bytes]);
                    format::import(
                        fmt,
                        &io_bytes[..available * frame_bytes],
                        &mut io_in[..available * ch],
                    );
                    let out_frames = canonical_frames.min(io_out.len() / ch);
                    let done = converter.process(
                        &io_in[..available * ch],
                        &mut io_out[..out_frames * ch],
                    )?;
                    wire.discard(done.consumed * frame_bytes);
                    if done.consumed == 0 && done.produced == 0 {
                        break;
                    }
                    canonical.write_samples(&io_out[..done.produced * ch]);
                }
            }
        }
        Ok(())
    }

    /// Copy the profile's receive block into this client's receive side, rescaled from
    /// `shared_bits` to the client's depth. Client channels past `shared_channels` are silent.
    ///
    /// Returns `false` when the block was dropped because the client is not keeping up.
    pub(crate) fn fan_out(
        &mut self,
        shared: &[i64],
        shared_channels: usize,
        shared_bits: u32,
        frames: usize,
        dither: &mut Dither,
    ) -> bool {
        if !self.rx.enabled {
            return true;
        }
        let ch = self.layout.channels;
        let delay = if self.rx.delay_pending {
            self.layout.rx_delay * ch
        } else {
            0
        };
        if self.rx.canonical.free_samples() < frames * ch + delay {
            self.rx.xruns += 1;
            return false;
        }

        let shift = self.bits() as i32 - shared_bits as i32;
        let params = MixParams {
            dither: shift < 0,
            ..MixParams::assign().with_shift(shift)
        };
        let lane = &mut self.rx;
        if lane.block.len() < frames * ch {
            lane.block.resize(frames * ch, 0);
        }
        let block = &mut lane.block[..frames * ch];
        for channel in 0..ch {
            if channel < shared_channels {
                mixer::mix_channel(
                    block,
                    channel,
                    ch,
                    shared,
                    channel,
                    shared_channels,
                    frames,
                    params,
                    dither,
                );
            } else {
                mixer::clear_channel(block, channel, ch, frames);
            }
        }
        lane.filters.process(block, ch, frames);
        mixer::update_peaks(block, ch, frames, &mut lane.peaks);

        if lane.delay_pending {
            lane.canonical.write_zero(delay * SAMPLE_BYTES);
            lane.delay_pending = false;
        }
        lane.canonical.write_samples(block);
        true
    }

    /// Accumulate one block of this client's transmit audio into `mix`.
    ///
    /// Returns `false` on underrun, when less than a block was available.
    pub(crate) fn fan_in(
        &mut self,
        routes: &[ChannelRoute],
        mix: &mut [i64],
        mix_channels: usize,
        frames: usize,
        mix_bits: u32,
        dither: &mut Dither,
    ) -> bool {
        if !self.tx.enabled {
            return true;
        }
        let ch = self.layout.channels;
        let bits = self.bits();
        let lane = &mut self.tx;
        if lane.canonical.unread_samples() < frames * ch {
            lane.xruns += 1;
            return false;
        }
        if lane.block.len() < frames * ch {
            lane.block.resize(frames * ch, 0);
        }
        let block = &mut lane.block[..frames * ch];
        lane.canonical.read_samples(block);
        lane.filters.process(block, ch, frames);
        mixer::update_peaks(block, ch, frames, &mut lane.peaks);

        for (channel, route) in routes.iter().enumerate().take(ch) {
            if route.mute || route.channel >= mix_channels {
                continue;
            }
            let shift = mix_bits as i32 - bits as i32 + route.shift;
            let params = MixParams {
                dither: shift < 0,
                ..MixParams::accumulate().with_shift(shift).with_invert(route.invert)
            };
            mixer::mix_channel(
                mix,
                route.channel,
                mix_channels,
                block,
                channel,
                ch,
                frames,
                params,
                dither,
            );
        }
        true
    }

    /// Snapshot for status displays.
    pub fn status(&self, profile: &str) -> ClientStatus {
        ClientStatus {
            id: self.id,
            profile: profile.to_string(),
            format: self.layout.format,
            channels: self.layout.channels,
            rate: self.layout.rate,
            synchronized: self.sync.is_some(),
            rx_enabled: self.rx.enabled,
            tx_enabled: self.tx.enabled,
            rx_peaks: self.rx.peaks.clone(),
            tx_peaks: self.tx.peaks.clone(),
            rx_queued: self.queue_depth(Direction::Rx),
            tx_queued: self.queue_depth(Direction::Tx),
            overruns: self.rx.xruns,
            underruns: self.tx.xruns,
            rx_bytes: self.rx.bytes_moved,
            tx_bytes: self.tx.bytes_moved,
            rx_last_ns: self.rx.last_transfer_ns,
            tx_last_ns: self.tx.last_transfer_ns,
        }
    }
}

/// Bytes already committed win over a later failure.
pub(crate) fn partial_or(done: usize, err: ClientError) -> Result<usize, ClientError> {
    if done > 0 { Ok(done) } else { Err(err) }
}

fn check_channels(channels: usize) -> Result<usize, ConfigError> {
    if channels == 0 || channels > MAX_CHANNELS {
        Err(ConfigError::InvalidChannels(channels))
    } else {
        Ok(channels)
    }
}

/// Per-client diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientStatus {
    /// Client identifier.
    pub id: ClientId,
    /// Profile the client was opened against.
    pub profile: String,
    /// Wire format.
    pub format: SampleFormat,
    /// Channel count.
    pub channels: usize,
    /// Sample rate.
    pub rate: u32,
    /// Whether this is the synchronized client.
    pub synchronized: bool,
    /// Receive direction running.
    pub rx_enabled: bool,
    /// Transmit direction running.
    pub tx_enabled: bool,
    /// Receive peak per channel since last read.
    pub rx_peaks: Vec<i64>,
    /// Transmit peak per channel since last read.
    pub tx_peaks: Vec<i64>,
    /// Receive bytes buffered.
    pub rx_queued: usize,
    /// Transmit bytes buffered.
    pub tx_queued: usize,
    /// Mixing blocks dropped because the receive buffer was full.
    pub overruns: u64,
    /// Mixing blocks the client had no transmit audio for.
    pub underruns: u64,
    /// Bytes read by the client since open.
    pub rx_bytes: u64,
    /// Bytes written by the client since open.
    pub tx_bytes: u64,
    /// Monotonic time of the last read that moved data, 0 if none.
    pub rx_last_ns: u64,
    /// Monotonic time of the last write that moved data, 0 if none.
    pub tx_last_ns: u64,
}

/// Readiness reported by [`ClientHandle::poll`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollFlags {
    /// At least the low-water mark can be read.
    pub readable: bool,
    /// At least the low-water mark can be written.
    pub writable: bool,
}

impl PollFlags {
    /// Interest in reading only.
    pub const READ: Self = Self {
        readable: true,
        writable: false,
    };
    /// Interest in writing only.
    pub const WRITE: Self = Self {
        readable: false,
        writable: true,
    };
    /// Interest in both directions.
    pub const BOTH: Self = Self {
        readable: true,
        writable: true,
    };

    /// Neither direction set.
    pub fn is_empty(self) -> bool {
        !self.readable && !self.writable
    }
}

/// Device capabilities.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Accepted wire formats.
    pub formats: Vec<SampleFormat>,
    /// Advertised sample rates.
    pub rates: Vec<u32>,
    /// Largest channel count.
    pub max_channels: usize,
    /// Both directions can run at once.
    pub duplex: bool,
}

impl Capabilities {
    /// Capabilities every client shares.
    pub fn current() -> Self {
        Self {
            formats: SampleFormat::ALL.to_vec(),
            rates: RATE_LIST.to_vec(),
            max_channels: MAX_CHANNELS,
            duplex: true,
        }
    }
}

/// Control requests a client can issue.
#[derive(Clone, Debug, PartialEq)]
pub enum Ioctl {
    /// Fragment size in bytes and fragment count.
    GetFragments,
    /// Request a fragment size and count; buffers are reallocated.
    SetFragments {
        /// Bytes per fragment, rounded up to whole frames.
        size: usize,
        /// Fragments per ring.
        count: usize,
    },
    /// Current wire format.
    GetFormat,
    /// Select a wire format.
    SetFormat(SampleFormat),
    /// Current channel count.
    GetChannels,
    /// Select a channel count.
    SetChannels(usize),
    /// Current sample rate.
    GetRate,
    /// Select a sample rate.
    SetRate(u32),
    /// Route of one client channel in the profile.
    GetRoute(Direction, usize),
    /// Replace the route of one client channel in the profile.
    SetRoute(Direction, usize, ChannelRoute),
    /// Frames of silence queued before live input.
    GetRecordingDelay,
    /// Set the recording delay in frames.
    SetRecordingDelay(usize),
    /// Bytes buffered in one direction.
    GetQueueDepth(Direction),
    /// Read and clear the peak of one channel.
    GetPeak(Direction, usize),
    /// Which directions are running.
    GetTrigger,
    /// Start or stop directions.
    SetTrigger {
        /// Receive running.
        rx: bool,
        /// Transmit running.
        tx: bool,
    },
    /// Device capabilities.
    GetCaps,
    /// Drop buffered audio and stop both directions.
    Reset,
    /// Switch between blocking and non-blocking transfers.
    SetNonBlocking(bool),
    /// Bytes that must be transferable before poll reports readiness.
    SetLowWater(usize),
}

/// Replies to [`Ioctl`] requests.
#[derive(Clone, Debug, PartialEq)]
pub enum IoctlReply {
    /// Request applied, nothing to report.
    Done,
    /// Effective fragment geometry.
    Fragments {
        /// Bytes per fragment.
        size: usize,
        /// Fragments per ring.
        count: usize,
    },
    /// Effective format.
    Format(SampleFormat),
    /// Effective channel count.
    Channels(usize),
    /// Effective rate.
    Rate(u32),
    /// A channel route.
    Route(ChannelRoute),
    /// Recording delay in frames.
    RecordingDelay(usize),
    /// Buffered bytes.
    QueueDepth(usize),
    /// Peak magnitude in the client's canonical scale.
    Peak(i64),
    /// Running directions.
    Trigger {
        /// Receive running.
        rx: bool,
        /// Transmit running.
        tx: bool,
    },
    /// Device capabilities.
    Caps(Capabilities),
}

/// Opaque handle a device front end holds for one open client. Dropping it closes the client.
pub struct ClientHandle {
    shared: Arc<Shared>,
    id: ClientId,
    link: Option<Receiver<SyncEvent>>,
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("synchronized", &self.link.is_some())
            .finish()
    }
}

impl ClientHandle {
    pub(crate) fn new(
        shared: Arc<Shared>,
        id: ClientId,
        link: Option<Receiver<SyncEvent>>,
    ) -> Self {
        Self { shared, id, link }
    }

    /// Identifier of the underlying client.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Read whole frames of received audio.
    ///
    /// Blocking clients wait until `buf` is full; non-blocking clients return what is
    /// available, or [`ClientError::WouldBlock`] when nothing is.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, ClientError> {
        let mut cs = self.shared.enter();
        let mut done = 0;
        loop {
            let client = live_client(&mut cs, self.id)?;
            let frame = client.layout.frame_bytes();
            if buf.len() < frame {
                return Err(ClientError::Unaligned(buf.len()));
            }
            let want = buf.len() - buf.len() % frame;
            client.set_enabled(Direction::Rx, true);
            loop {
                if let Err(err) = client.pump_rx() {
                    return partial_or(done, ConfigError::from(err).into());
                }
                let n = client.rx.wire.read_linear(&mut buf[done..want]);
                if n == 0 {
                    break;
                }
                done += n;
                client.rx.bytes_moved += n as u64;
                client.rx.last_transfer_ns = monotonic_timestamp_ns();
                if done == want {
                    return Ok(done);
                }
            }
            if client.nonblocking {
                return partial_or(done, ClientError::WouldBlock);
            }
            if let Err(err) = self.wait(&mut cs) {
                return partial_or(done, err);
            }
        }
    }

    /// Write whole frames of audio to be mixed.
    ///
    /// Blocking clients wait until all of `buf` is accepted; non-blocking clients take what
    /// fits, or get [`ClientError::WouldBlock`] when nothing does.
    pub fn write(&self, buf: &[u8]) -> Result<usize, ClientError> {
        let mut cs = self.shared.enter();
        let mut done = 0;
        loop {
            let client = live_client(&mut cs, self.id)?;
            let frame = client.layout.frame_bytes();
            if buf.len() < frame {
                return Err(ClientError::Unaligned(buf.len()));
            }
            let want = buf.len() - buf.len() % frame;
            client.set_enabled(Direction::Tx, true);
            loop {
                let n = client.tx.wire.write_linear(&buf[done..want]);
                if n > 0 {
                    done += n;
                    client.tx.bytes_moved += n as u64;
                    client.tx.last_transfer_ns = monotonic_timestamp_ns();
                }
                if let Err(err) = client.pump_tx() {
                    return partial_or(done, ConfigError::from(err).into());
                }
                if n == 0 {
                    break;
                }
                if done == want {
                    return Ok(done);
                }
            }
            if client.nonblocking {
                return partial_or(done, ClientError::WouldBlock);
            }
            if let Err(err) = self.wait(&mut cs) {
                return partial_or(done, err);
            }
        }
    }

    /// Report readiness for the directions in `events`, starting them if stopped.
    pub fn poll(&self, events: PollFlags) -> Result<PollFlags, ClientError> {
        let mut cs = self.shared.enter();
        let client = live_client(&mut cs, self.id)?;
        let mut ready = PollFlags::default();
        if events.readable {
            client.set_enabled(Direction::Rx, true);
            client.pump_rx().map_err(ConfigError::from)?;
            ready.readable = client.rx.wire.total_unread() >= client.low_water;
        }
        if events.writable {
            client.set_enabled(Direction::Tx, true);
            client.pump_tx().map_err(ConfigError::from)?;
            let mark = client.low_water.min(client.tx.wire.capacity());
            ready.writable = client.tx.wire.total_free() >= mark;
        }
        Ok(ready)
    }

    /// Apply a control request.
    pub fn ioctl(&self, request: Ioctl) -> Result<IoctlReply, ClientError> {
        let mut cs = self.shared.enter();
        if cs.exit {
            return Err(ClientError::Closed);
        }
        let geometry = cs.geometry;
        let (client, profile) = cs.client_and_profile(self.id).ok_or(ClientError::Closed)?;
        let layout = client.layout;
        let reply = match request {
            Ioctl::GetFragments => IoctlReply::Fragments {
                size: layout.fragment_bytes(&geometry),
                count: layout.fragment_count,
            },
            Ioctl::SetFragments { size, count } => {
                if size == 0 || size > MAX_FRAGMENT_BYTES {
                    return Err(ConfigError::InvalidBufferSize(size).into());
                }
                if !(2..=256).contains(&count) {
                    return Err(ConfigError::InvalidBufferSize(count).into());
                }
                let next = Layout {
                    fragment_size: Some(size),
                    fragment_count: count,
                    ..layout
                };
                client.relayout(next, profile, &geometry)?;
                IoctlReply::Fragments {
                    size: next.fragment_bytes(&geometry),
                    count,
                }
            }
            Ioctl::GetFormat => IoctlReply::Format(layout.format),
            Ioctl::SetFormat(format) => {
                client.relayout(Layout { format, ..layout }, profile, &geometry)?;
                IoctlReply::Format(format)
            }
            Ioctl::GetChannels => IoctlReply::Channels(layout.channels),
            Ioctl::SetChannels(channels) => {
                check_channels(channels)?;
                client.relayout(Layout { channels, ..layout }, profile, &geometry)?;
                IoctlReply::Channels(channels)
            }
            Ioctl::GetRate => IoctlReply::Rate(layout.rate),
            Ioctl::SetRate(rate) => {
                let rate = validate_rate(rate)?;
                client.relayout(Layout { rate, ..layout }, profile, &geometry)?;
                IoctlReply::Rate(rate)
            }
            Ioctl::GetRoute(dir, channel) => {
                check_client_channel(channel, layout.channels)?;
                IoctlReply::Route(profile.route(dir, channel)?)
            }
            Ioctl::SetRoute(dir, channel, route) => {
                check_client_channel(channel, layout.channels)?;
                profile.set_route(dir, channel, route)?;
                IoctlReply::Route(route)
            }
            Ioctl::GetRecordingDelay => IoctlReply::RecordingDelay(layout.rx_delay),
            Ioctl::SetRecordingDelay(frames) => {
                if frames > geometry.mix_rate as usize * MAX_RECORDING_DELAY_SECS {
                    return Err(ConfigError::InvalidBufferSize(frames).into());
                }
                client.relayout(Layout { rx_delay: frames, ..layout }, profile, &geometry)?;
                IoctlReply::RecordingDelay(frames)
            }
            Ioctl::GetQueueDepth(dir) => {
                let pumped = match dir {
                    Direction::Rx => client.pump_rx(),
                    Direction::Tx => client.pump_tx(),
                };
                pumped.map_err(ConfigError::from)?;
                IoctlReply::QueueDepth(client.queue_depth(dir))
            }
            Ioctl::GetPeak(dir, channel) => IoctlReply::Peak(client.take_peak(dir, channel)?),
            Ioctl::GetTrigger => IoctlReply::Trigger {
                rx: client.rx.enabled,
                tx: client.tx.enabled,
            },
            Ioctl::SetTrigger { rx, tx } => {
                client.set_enabled(Direction::Rx, rx);
                client.set_enabled(Direction::Tx, tx);
                IoctlReply::Trigger { rx, tx }
            }
            Ioctl::GetCaps => IoctlReply::Caps(Capabilities::current()),
            Ioctl::Reset => {
                client.reset();
                IoctlReply::Done
            }
            Ioctl::SetNonBlocking(nonblocking) => {
                client.nonblocking = nonblocking;
                IoctlReply::Done
            }
            Ioctl::SetLowWater(bytes) => {
                client.low_water = bytes.max(1);
                IoctlReply::Done
            }
        };
        Ok(reply)
    }

    /// Close the client, waking any call blocked on it. Idempotent.
    pub fn close(&self) {
        let mut cs = self.shared.enter();
        if let Some(client) = cs.remove_client(self.id) {
            info!(client = %client.id, "client closed");
            crate::push_log(format!("client {} closed", client.id));
        }
        cs.wake_all();
    }

    fn wait(&self, cs: &mut CriticalSection<'_>) -> Result<(), ClientError> {
        let wake = match &self.link {
            Some(link) => cs.wait_link(link, WAIT_SLICE),
            None => cs.wait_for(WAIT_SLICE),
        };
        if wake == Wake::Cancelled || cs.exit {
            return Err(ClientError::Closed);
        }
        Ok(())
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn live_client<'a>(
    cs: &'a mut CriticalSection<'_>,
    id: ClientId,
) -> Result<&'a mut Client, ClientError> {
    if cs.exit {
        return Err(ClientError::Closed);
    }
    cs.client_mut(id).ok_or(ClientError::Closed)
}

fn check_client_channel(channel: usize, channels: usize) -> Result<(), ConfigError> {
    if channel < channels {
        Ok(())
    } else {
        Err(ConfigError::ChannelOutOfRange { index: channel, channels })
    }
}
