//! Physical device boundary consumed by the mixing loop.
//!
//! A backend negotiates a format from the caller's preference list at open time, then moves
//! raw interleaved bytes. Two implementations ship with the crate: [`NullBackend`], which paces
//! the loop in real time while producing silence and discarding output, and
//! [`LoopbackBackend`], an in-memory pair whose output feeds its input.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::BackendError;
use crate::format::{self, SampleFormat};

/// Parameters negotiated when a backend opens. `channels` and `format` are written back with
/// what the device actually accepted.
#[derive(Clone, Debug, PartialEq)]
pub struct OpenParams {
    /// Device name from the settings.
    pub device: String,
    /// Requested sample rate.
    pub sample_rate: u32,
    /// Frames per transfer the loop intends to use.
    pub samples: usize,
    /// Requested channel count, replaced by the accepted one.
    pub channels: usize,
    /// Acceptable formats, most preferred first.
    pub formats: Vec<SampleFormat>,
    /// Accepted format.
    pub format: SampleFormat,
}

impl OpenParams {
    /// Bytes in one transfer of `samples` frames at the accepted format.
    pub fn iteration_bytes(&self) -> usize {
        self.samples * self.channels * self.format.bytes()
    }
}

/// One data movement.
pub enum Transfer<'a> {
    /// Fill the buffer from the device.
    Read(&'a mut [u8]),
    /// Hand the buffer to the device.
    Write(&'a [u8]),
}

/// A physical or virtual audio device used in one direction.
pub trait Backend: Send {
    /// Open the device, negotiating channels and format through `params`.
    fn open(&mut self, params: &mut OpenParams) -> Result<(), BackendError>;
    /// Close the device. Closing a closed backend is a no-op.
    fn close(&mut self);
    /// Move bytes, returning how many were moved.
    fn transfer(&mut self, transfer: Transfer<'_>) -> Result<usize, BackendError>;
    /// Bytes queued inside the device and not yet played.
    fn delay(&mut self) -> Result<usize, BackendError>;
}

/// Silent device paced by the wall clock.
#[derive(Debug, Default)]
pub struct NullBackend {
    open: Option<NullSession>,
}

#[derive(Debug)]
struct NullSession {
    period: Duration,
    deadline: Instant,
    iteration_bytes: usize,
}

impl NullBackend {
    /// Closed null device.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for NullBackend {
    fn open(&mut self, params: &mut OpenParams) -> Result<(), BackendError> {
        params.format = params
            .formats
            .first()
            .copied()
            .ok_or_else(|| BackendError::Format(params.device.clone()))?;
        let seconds = params.samples as f64 / f64::from(params.sample_rate.max(1));
        let period = Duration::from_secs_f64(seconds);
        self.open = Some(NullSession {
            period,
            deadline: Instant::now(),
            iteration_bytes: params.iteration_bytes(),
        });
        debug!(device = %params.device, ?period, "null backend open");
        Ok(())
    }

    fn close(&mut self) {
        self.open = None;
    }

    fn transfer(&mut self, transfer: Transfer<'_>) -> Result<usize, BackendError> {
        let session = self.open.as_mut().ok_or(BackendError::NotOpen)?;
        match transfer {
            Transfer::Read(buf) => {
                session.deadline += session.period;
                let now = Instant::now();
                if session.deadline > now {
                    std::thread::sleep(session.deadline - now);
                } else {
                    session.deadline = now;
                }
                buf.fill(0);
                Ok(buf.len())
            }
            Transfer::Write(buf) => Ok(buf.len()),
        }
    }

    fn delay(&mut self) -> Result<usize, BackendError> {
        let session = self.open.as_ref().ok_or(BackendError::NotOpen)?;
        Ok(session.iteration_bytes)
    }
}

#[derive(Debug, Default)]
struct LoopbackWire {
    queue: VecDeque<u8>,
    capture: Option<Vec<u8>>,
    format: Option<SampleFormat>,
    channels: Option<usize>,
    fail_opens: usize,
    fail_transfers: usize,
    opens: usize,
}

/// In-memory device: bytes written to the playback side are read back on the capture side.
///
/// Reads never wait; a short queue is padded with silence. Both sides share one wire, so
/// test code can keep a clone to force failures or inspect what was played.
#[derive(Clone, Debug, Default)]
pub struct LoopbackBackend {
    wire: Arc<Mutex<LoopbackWire>>,
    format: Option<SampleFormat>,
}

impl LoopbackBackend {
    /// A capture/playback pair sharing one wire.
    pub fn pair() -> (Self, Self) {
        let side = Self::default();
        (side.clone(), side)
    }

    /// Accept only `format` on open.
    pub fn require_format(&self, format: SampleFormat) {
        self.wire.lock().format = Some(format);
    }

    /// Answer every open with `channels`, whatever was requested.
    pub fn force_channels(&self, channels: usize) {
        self.wire.lock().channels = Some(channels);
    }

    /// Make the next `count` opens fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.wire.lock().fail_opens = count;
    }

    /// Make the next `count` transfers fail.
    pub fn fail_next_transfers(&self, count: usize) {
        self.wire.lock().fail_transfers = count;
    }

    /// Successful opens so far, across both sides.
    pub fn opens(&self) -> usize {
        self.wire.lock().opens
    }

    /// Keep a copy of everything written from now on.
    pub fn start_capture(&self) {
        self.wire.lock().capture = Some(Vec::new());
    }

    /// Take the captured bytes, leaving capture running.
    pub fn take_capture(&self) -> Vec<u8> {
        self.wire
            .lock()
            .capture
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }
}

impl Backend for LoopbackBackend {
    fn open(&mut self, params: &mut OpenParams) -> Result<(), BackendError> {
        let mut wire = self.wire.lock();
        if wire.fail_opens > 0 {
            wire.fail_opens -= 1;
            return Err(BackendError::Open(params.device.clone()));
        }
        let accepted = match wire.format {
            Some(required) => params.formats.iter().copied().find(|fmt| *fmt == required),
            None => params.formats.first().copied(),
        };
        params.format = accepted.ok_or_else(|| BackendError::Format(params.device.clone()))?;
        if let Some(channels) = wire.channels {
            params.channels = channels;
        }
        wire.opens += 1;
        self.format = Some(params.format);
        Ok(())
    }

    fn close(&mut self) {
        self.format = None;
        self.wire.lock().queue.clear();
    }

    fn transfer(&mut self, transfer: Transfer<'_>) -> Result<usize, BackendError> {
        let fmt = self.format.ok_or(BackendError::NotOpen)?;
        let mut wire = self.wire.lock();
        if wire.fail_transfers > 0 {
            wire.fail_transfers -= 1;
            return Err(BackendError::Transfer("injected failure".into()));
        }
        match transfer {
            Transfer::Read(buf) => {
                let available = wire.queue.len().min(buf.len());
                for (dst, src) in buf.iter_mut().zip(wire.queue.drain(..available)) {
                    *dst = src;
                }
                format::silence(fmt, &mut buf[available..]);
                Ok(buf.len())
            }
            Transfer::Write(buf) => {
                wire.queue.extend(buf.iter().copied());
                if let Some(capture) = wire.capture.as_mut() {
                    capture.extend_from_slice(buf);
                }
                Ok(buf.len())
            }
        }
    }

    fn delay(&mut self) -> Result<usize, BackendError> {
        if self.format.is_none() {
            return Err(BackendError::NotOpen);
        }
        Ok(self.wire.lock().queue.len())
    }
}
