mod client_lanes;
mod codec;
mod console;
mod directives;
mod ring;

use std::time::Duration;

use crate::backend::LoopbackBackend;
use crate::config::Settings;
use crate::engine::Engine;
use crate::mixloop::{LoopState, MixLoop};

pub(crate) const BLOCK: usize = 64;

pub(crate) fn test_settings() -> Settings {
    Settings {
        samples: BLOCK,
        reopen_delay: Duration::ZERO,
        ..Settings::default()
    }
}

/// Engine driven by hand over a loopback pair, already past its first open.
pub(crate) fn running_engine(line: &str) -> (Engine, MixLoop, LoopbackBackend) {
    let engine = Engine::with_directives(test_settings(), line).expect("engine");
    let (rx, tx) = LoopbackBackend::pair();
    let hw = rx.clone();
    let mut mix = engine.mix_loop(Box::new(rx), Box::new(tx));
    assert_eq!(mix.step(), LoopState::Running);
    (engine, mix, hw)
}
