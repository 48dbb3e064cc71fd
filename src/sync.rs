//! The single lock guarding every piece of engine state, and the wait protocol built on it.
//!
//! All shared mutable state lives in one [`EngineState`] behind one mutex and one condition
//! variable. Code touching it holds a [`CriticalSection`] for exactly as long as it needs the
//! state. Ordinary blocking clients wait on the condition variable, which the mixing loop
//! broadcasts once per iteration and on every close or shutdown. The synchronized client
//! instead owns the receiving end of a one-slot channel that the loop ticks every iteration;
//! closing the client drops the sender, which wakes that waiter with a disconnect.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::engine::EngineState;

/// Longest single wait before a blocked client rechecks its state.
pub const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Notification delivered to the synchronized client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncEvent {
    /// One mixing iteration completed.
    Tick,
}

/// Outcome of one bounded wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wake {
    /// Woken by the loop, or the wait slice elapsed; recheck and possibly wait again.
    Recheck,
    /// The waiter's channel was torn down by close or shutdown.
    Cancelled,
}

/// Loop side of a synchronized client's channel.
#[derive(Debug)]
pub struct SyncLink {
    tx: Sender<SyncEvent>,
}

impl SyncLink {
    /// Create a link and the receiver handed to the client.
    pub fn new() -> (Self, Receiver<SyncEvent>) {
        let (tx, rx) = bounded(1);
        (Self { tx }, rx)
    }

    /// Post a tick without blocking. A tick already pending is enough.
    pub fn tick(&self) {
        match self.tx.try_send(SyncEvent::Tick) {
            Ok(()) | Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// The engine's shared state, its lock, and its condition variable.
pub struct Shared {
    state: Mutex<EngineState>,
    cond: Condvar,
}

impl Shared {
    /// Wrap an initial state.
    pub fn new(state: EngineState) -> Self {
        Self {
            state: Mutex::new(state),
            cond: Condvar::new(),
        }
    }

    /// Take the lock.
    pub fn enter(&self) -> CriticalSection<'_> {
        CriticalSection {
            guard: self.state.lock(),
            cond: &self.cond,
        }
    }
}

/// Scope holding the engine lock. Dereferences to the state.
pub struct CriticalSection<'a> {
    guard: MutexGuard<'a, EngineState>,
    cond: &'a Condvar,
}

impl CriticalSection<'_> {
    /// Wake every waiter on the condition variable.
    pub fn wake_all(&self) {
        self.cond.notify_all();
    }

    /// Wait on the condition variable for at most `timeout`, releasing the lock meanwhile.
    pub fn wait_for(&mut self, timeout: Duration) -> Wake {
        self.cond.wait_for(&mut self.guard, timeout);
        Wake::Recheck
    }

    /// Wait for a tick on `link`, releasing the lock meanwhile.
    pub fn wait_link(&mut self, link: &Receiver<SyncEvent>, timeout: Duration) -> Wake {
        match MutexGuard::unlocked(&mut self.guard, || link.recv_timeout(timeout)) {
            Ok(SyncEvent::Tick) | Err(RecvTimeoutError::Timeout) => Wake::Recheck,
            Err(RecvTimeoutError::Disconnected) => Wake::Cancelled,
        }
    }

    /// Run `f` with the lock released.
    pub fn unlocked<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        MutexGuard::unlocked(&mut self.guard, f)
    }
}

impl Deref for CriticalSection<'_> {
    type Target = EngineState;

    fn deref(&self) -> &EngineState {
        &self.guard
    }
}

impl DerefMut for CriticalSection<'_> {
    fn deref_mut(&mut self) -> &mut EngineState {
        &mut self.guard
    }
}
