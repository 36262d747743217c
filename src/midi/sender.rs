//! MIDI sender - writes feedback to the control surface
//!
//! Each output sits behind its own mutex, so concurrent sends to one device are
//! serialized while different devices never wait on each other.

use anyhow::{anyhow, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::{format_hex, DeviceId, DeviceInfo, MidiMessage};
use crate::error::{BridgeError, BridgeResult};

/// Something that accepts complete MIDI messages
pub trait MidiSink: Send {
    fn send(&mut self, data: &[u8]) -> Result<()>;
}

impl MidiSink for midir::MidiOutputConnection {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        midir::MidiOutputConnection::send(self, data).map_err(|e| anyhow!("MIDI send failed: {}", e))
    }
}

type SharedSink = Arc<Mutex<Box<dyn MidiSink>>>;

/// Writes MIDI messages to open output ports
pub struct MidiSender {
    outputs: RwLock<HashMap<DeviceId, SharedSink>>,
}

impl MidiSender {
    pub fn new() -> Self {
        Self {
            outputs: RwLock::new(HashMap::new()),
        }
    }

    /// Open the output port described by `device`
    pub fn open(&self, device: &DeviceInfo) -> BridgeResult<()> {
        if self.is_open(device.id) {
            return Ok(());
        }
        let unavailable = |reason: String| {
            BridgeError::DeviceUnavailable(format!("{} ({})", device.name, reason))
        };

        let midi_out =
            midir::MidiOutput::new("LR-MIDI-GW-Out").map_err(|e| unavailable(e.to_string()))?;
        let port = midi_out
            .ports()
            .into_iter()
            .find(|p| midi_out.port_name(p).map(|n| n == device.name).unwrap_or(false))
            .ok_or_else(|| unavailable("port not found".into()))?;
        let connection = midi_out
            .connect(&port, "lr-midi-gw")
            .map_err(|e| unavailable(e.to_string()))?;

        self.attach(device.id, Box::new(connection));
        info!("MIDI output opened: '{}' as {}", device.name, device.id);
        Ok(())
    }

    /// Install an already-open sink for `device`, replacing any previous one
    pub fn attach(&self, device: DeviceId, sink: Box<dyn MidiSink>) {
        self.outputs
            .write()
            .insert(device, Arc::new(Mutex::new(sink)));
    }

    pub fn close(&self, device: DeviceId) {
        if self.outputs.write().remove(&device).is_some() {
            info!("MIDI output closed: {}", device);
        }
    }

    pub fn close_all(&self) {
        self.outputs.write().clear();
    }

    pub fn is_open(&self, device: DeviceId) -> bool {
        self.outputs.read().contains_key(&device)
    }

    /// Fire-and-forget send
    ///
    /// A failed write drops the output; it comes back on the next hot-plug
    /// event for that port.
    pub fn send(&self, device: DeviceId, message: &MidiMessage) {
        let sink = match self.outputs.read().get(&device) {
            Some(sink) => Arc::clone(sink),
            None => {
                trace!("MIDI TX skipped ({} not open): {}", device, message);
                return;
            }
        };

        let data = message.encode();
        let result = sink.lock().send(&data);
        match result {
            Ok(()) => debug!("MIDI TX {} | {} | {}", device, format_hex(&data), message),
            Err(e) => {
                warn!("MIDI send to {} failed, closing output: {}", device, e);
                let mut outputs = self.outputs.write();
                // Only remove the sink that failed, not a replacement opened meanwhile
                if outputs.get(&device).is_some_and(|current| Arc::ptr_eq(current, &sink)) {
                    outputs.remove(&device);
                }
            }
        }
    }
}

impl Default for MidiSender {
    fn default() -> Self {
        Self::new()
    }
}
