//! Error types surfaced by the engine.

use thiserror::Error;

/// Rejected configuration requests. Engine state is unchanged when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Channel count outside `1..=MAX_CHANNELS`.
    #[error("invalid channel count {0}")]
    InvalidChannels(usize),
    /// Sample rate outside the supported range.
    #[error("invalid sample rate {0}")]
    InvalidRate(u32),
    /// Bit depth not in {8, 16, 24, 32}.
    #[error("invalid bit depth {0}")]
    InvalidBits(u32),
    /// Format mask does not name a supported sample format.
    #[error("unsupported sample format mask {0:#x}")]
    InvalidFormat(u32),
    /// Buffer geometry could not be satisfied.
    #[error("invalid buffer size {0}")]
    InvalidBufferSize(usize),
    /// A second synchronized client was requested.
    #[error("a synchronized client is already open")]
    SyncBusy,
    /// No profile with that name.
    #[error("unknown profile '{0}'")]
    UnknownProfile(String),
    /// A profile with that name already exists.
    #[error("profile '{0}' already exists")]
    DuplicateProfile(String),
    /// Channel index outside the indexed structure.
    #[error("channel index {index} out of range for {channels} channels")]
    ChannelOutOfRange {
        /// Offending index.
        index: usize,
        /// Channel count of the structure being indexed.
        channels: usize,
    },
    /// Compressor parameter out of range.
    #[error("compressor parameter out of range: {0}")]
    InvalidCompressor(String),
    /// Equalizer length or coefficients rejected.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    /// Delay locator period or burst length rejected.
    #[error("invalid locator setting: {0}")]
    InvalidLocator(String),
    /// Monitor tap index does not exist.
    #[error("unknown monitor tap {0}")]
    UnknownTap(usize),
    /// Directive line could not be parsed.
    #[error("bad directive '{directive}': {reason}")]
    Directive {
        /// Option token that failed.
        directive: String,
        /// Human readable reason.
        reason: String,
    },
    /// Rate converter could not be constructed.
    #[error(transparent)]
    Resample(#[from] ResampleError),
}

/// Errors returned to a client's read, write and ioctl calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Non-blocking transfer could make no progress.
    #[error("operation would block")]
    WouldBlock,
    /// The client was closed, or the engine shut down, while the call was pending.
    #[error("client closed")]
    Closed,
    /// Transfer length is not a whole number of frames.
    #[error("transfer of {0} bytes is not frame aligned")]
    Unaligned(usize),
    /// The request was rejected as a configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Physical backend transport failures. Recovered by the mixing loop, never seen by clients.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The named device could not be opened.
    #[error("failed to open device '{0}'")]
    Open(String),
    /// No acceptable format among the preference list.
    #[error("no supported format for device '{0}'")]
    Format(String),
    /// Transfer failed.
    #[error("transfer failed: {0}")]
    Transfer(String),
    /// Backend used before a successful open.
    #[error("device not open")]
    NotOpen,
}

/// Rate converter construction or processing failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResampleError {
    /// Resampler could not be built for the given rates.
    #[error("cannot convert {from} Hz to {to} Hz: {reason}")]
    Construction {
        /// Input rate.
        from: u32,
        /// Output rate.
        to: u32,
        /// Library message.
        reason: String,
    },
    /// Processing a block failed.
    #[error("resampling failed: {0}")]
    Process(String),
}
