//! LR MIDI GW - bridge a MIDI control surface to a photo-editing host
//!
//! Hardware controls are mapped through a profile to host commands sent over
//! a line-based TCP link; host updates come back over a second connection and
//! drive motorized faders and LEDs.

pub mod app;
pub mod catalog;
pub mod config;
pub mod error;
pub mod link;
pub mod midi;
pub mod paths;
pub mod profile;
pub mod router;
pub mod state;
pub mod subscription;

pub use app::{Bridge, RunningBridge};
pub use error::{BridgeError, BridgeResult};
