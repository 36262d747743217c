//! Control state module - last known value of every physical control
//!
//! The store is the single source of truth for where each knob and fader is.
//! MIDI input and remote-application feedback both write into it; the values
//! and per-control settings are persisted to `controls.json`.

mod persistence;
mod store;
mod types;

pub use persistence::ControlsDocument;
pub use store::{ControlListener, ControlStore};
pub use types::{CcMethod, ControlSettings, SettingsEntry, ValueEntry};
