//! Control layer exposing engine state to external tooling.

/// Process-wide control API for the engine.
pub mod api;
/// Ratatui-based developer console.
pub mod ui;

pub use api::{Control, EngineStatus};
