//! MIDI receiver - parses inbound MIDI and fans it out to subscribers
//!
//! midir delivers raw bytes on its own per-port threads. Those callbacks only
//! push onto a crossbeam channel; a single dispatch thread parses each message
//! and invokes every subscriber in subscription order. `stop()` joins that
//! thread, so once it returns no subscriber is ever called again.

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use super::{format_hex, DeviceId, DeviceInfo, MidiMessage};
use crate::error::{BridgeError, BridgeResult};
use crate::subscription::{Registry, Subscription};

/// A parsed MIDI message together with where it came from
#[derive(Debug, Clone)]
pub struct MidiEvent {
    pub device: DeviceId,
    pub message: MidiMessage,
    pub raw: Vec<u8>,
    pub timestamp: Instant,
}

/// Subscriber callback. Runs on the dispatch thread and must not block.
pub type MidiCallback = dyn Fn(&MidiEvent) + Send + Sync;

enum Dispatch {
    Raw { device: DeviceId, data: Vec<u8> },
    Stop,
}

/// Receives MIDI from every open input port and dispatches parsed events
pub struct MidiReceiver {
    subscribers: Registry<MidiCallback>,
    tx: Sender<Dispatch>,
    rx: Receiver<Dispatch>,
    running: AtomicBool,
    /// Serializes start/stop against each other
    lifecycle: Mutex<Option<JoinHandle<()>>>,
    connections: Mutex<HashMap<DeviceId, midir::MidiInputConnection<()>>>,
}

impl MidiReceiver {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            subscribers: Registry::new(),
            tx,
            rx,
            running: AtomicBool::new(false),
            lifecycle: Mutex::new(None),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Register a callback for every parsed event
    pub fn subscribe(&self, callback: Arc<MidiCallback>) -> Subscription {
        self.subscribers.subscribe(callback)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the dispatch thread. Calling it again while running does nothing.
    pub fn start(&self) {
        let mut worker = self.lifecycle.lock();
        if worker.is_some() {
            return;
        }

        // Anything left over from a previous run is stale
        while self.rx.try_recv().is_ok() {}

        let rx = self.rx.clone();
        let subscribers = self.subscribers.clone();
        let handle = std::thread::Builder::new()
            .name("midi-dispatch".into())
            .spawn(move || dispatch_loop(rx, subscribers));

        match handle {
            Ok(handle) => {
                *worker = Some(handle);
                self.running.store(true, Ordering::SeqCst);
                info!("MIDI receiver started");
            }
            Err(e) => warn!("Failed to spawn MIDI dispatch thread: {}", e),
        }
    }

    /// Close every input and join the dispatch thread
    ///
    /// Blocks the caller until the callback in flight (if any) has returned.
    /// Safe to call repeatedly.
    pub fn stop(&self) {
        let mut worker = self.lifecycle.lock();
        let Some(handle) = worker.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);

        // Dropping a midir connection joins its port thread, so nothing new
        // can be queued past this point
        let closed: Vec<_> = self.connections.lock().drain().collect();
        for (device, connection) in closed {
            let _ = connection.close();
            debug!("Closed MIDI input {}", device);
        }

        let _ = self.tx.send(Dispatch::Stop);
        if handle.join().is_err() {
            warn!("MIDI dispatch thread panicked");
        }
        info!("MIDI receiver stopped");
    }

    /// Open an input port and route its bytes into the dispatcher
    pub fn open(&self, device: &DeviceInfo) -> BridgeResult<()> {
        if self.connections.lock().contains_key(&device.id) {
            return Ok(());
        }

        let unavailable = |reason: String| {
            BridgeError::DeviceUnavailable(format!("{} ({})", device.name, reason))
        };

        let mut midi_in =
            midir::MidiInput::new("LR-MIDI-GW-In").map_err(|e| unavailable(e.to_string()))?;
        midi_in.ignore(midir::Ignore::All);

        let port = midi_in
            .ports()
            .into_iter()
            .find(|p| midi_in.port_name(p).map(|n| n == device.name).unwrap_or(false))
            .ok_or_else(|| unavailable("port not found".into()))?;

        let tx = self.tx.clone();
        let id = device.id;
        let connection = midi_in
            .connect(
                &port,
                "lr-midi-gw",
                move |_timestamp, data, _| {
                    let _ = tx.send(Dispatch::Raw {
                        device: id,
                        data: data.to_vec(),
                    });
                },
                (),
            )
            .map_err(|e| unavailable(e.to_string()))?;

        self.connections.lock().insert(device.id, connection);
        info!("MIDI input opened: '{}' as {}", device.name, device.id);
        Ok(())
    }

    /// Close an input port (e.g. after it was unplugged)
    pub fn close(&self, device: DeviceId) {
        if let Some(connection) = self.connections.lock().remove(&device) {
            let _ = connection.close();
            info!("MIDI input closed: {}", device);
        }
    }

    /// Queue raw bytes as if they had arrived from `device`
    ///
    /// Used for virtual sources. Ignored while the receiver is stopped.
    pub fn inject(&self, device: DeviceId, data: &[u8]) {
        if !self.is_running() {
            trace!("Dropping injected MIDI while stopped: {}", format_hex(data));
            return;
        }
        let _ = self.tx.send(Dispatch::Raw {
            device,
            data: data.to_vec(),
        });
    }
}

impl Default for MidiReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MidiReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch_loop(rx: Receiver<Dispatch>, subscribers: Registry<MidiCallback>) {
    while let Ok(item) = rx.recv() {
        let (device, data) = match item {
            Dispatch::Raw { device, data } => (device, data),
            Dispatch::Stop => break,
        };

        let Some(message) = MidiMessage::parse(&data) else {
            trace!("Ignoring unsupported MIDI from {}: {}", device, format_hex(&data));
            continue;
        };
        debug!("MIDI RX {} | {}", device, message);

        let event = MidiEvent {
            device,
            message,
            raw: data,
            timestamp: Instant::now(),
        };
        for callback in subscribers.snapshot() {
            callback(&event);
        }
    }
}
