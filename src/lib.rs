#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! Real-time software audio router and mixer.
//!
//! An [`Engine`] sits between one capture/playback device pair and any number of virtual
//! clients. Each client picks its own channel count, sample format and rate; the mixing
//! loop pulls hardware audio in, distributes it to every client through its profile's
//! routing, gain, compressor and equalizer, collects what clients play, remixes it to the
//! hardware layout and writes it back, once per fixed-size iteration.
//!
//! Audio inside the engine is always a [canonical](format) stream of interleaved `i64`
//! samples; the [`format`] codec is the only place wire bytes are interpreted.

use std::collections::VecDeque;
use std::sync::Once;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

pub mod backend;
pub mod client;
pub mod compressor;
pub mod config;
/// Developer-facing control and TUI support.
pub mod control;
pub mod engine;
pub mod error;
pub mod fir;
pub mod format;
pub mod latency;
pub mod mixer;
pub mod mixloop;
pub mod profile;
pub mod remix;
pub mod resample;
pub mod ring;
pub mod sync;

#[cfg(test)]
mod tests;

pub use backend::{Backend, LoopbackBackend, NullBackend};
pub use client::{ClientHandle, ClientId, Ioctl, IoctlReply, OpenOptions, PollFlags};
pub use config::Settings;
pub use engine::Engine;
pub use error::{BackendError, ClientError, ConfigError};
pub use format::SampleFormat;
pub use mixloop::{LoopState, MixLoop};
pub use profile::{ChannelRoute, Direction, Profile, ProfileKind};

/// Upper bound on channels of any client, profile or mix buffer.
pub const MAX_CHANNELS: usize = 64;

const LOG_CAPACITY: usize = 256;

static LOG_BUFFER: Lazy<Mutex<VecDeque<String>>> =
    Lazy::new(|| Mutex::new(VecDeque::with_capacity(64)));
static TRACING_INIT: Once = Once::new();

/// Install the fmt subscriber once per process. Later calls, or an already installed
/// subscriber, are left alone.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

fn push_log(line: impl Into<String>) {
    let mut guard = LOG_BUFFER.lock();
    guard.push_back(line.into());
    while guard.len() > LOG_CAPACITY {
        guard.pop_front();
    }
}

/// Take every buffered event line, oldest first.
pub fn drain_log() -> Vec<String> {
    LOG_BUFFER.lock().drain(..).collect()
}

/// Copy the buffered event lines without consuming them.
pub fn recent_log() -> Vec<String> {
    LOG_BUFFER.lock().iter().cloned().collect()
}
