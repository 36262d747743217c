//! MIDI device enumeration and hot-plug tracking
//!
//! The manager polls the platform's MIDI ports, assigns each port name a stable
//! [`DeviceId`] for the lifetime of the process, and broadcasts [`DeviceChange`]
//! events as ports appear and disappear.

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use super::{port_matches, DeviceId};

/// Which side of the hardware a port is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PortDirection {
    Input,
    Output,
}

/// One MIDI port known to the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub direction: PortDirection,
}

/// Hot-plug notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceChange {
    Added(DeviceInfo),
    Removed(DeviceInfo),
}

/// Source of port names (the platform MIDI API, or a fake in tests)
pub trait PortScanner: Send + Sync {
    fn input_ports(&self) -> Result<Vec<String>>;
    fn output_ports(&self) -> Result<Vec<String>>;
}

/// [`PortScanner`] backed by midir
pub struct MidirScanner;

impl PortScanner for MidirScanner {
    fn input_ports(&self) -> Result<Vec<String>> {
        let midi_in = midir::MidiInput::new("LR-MIDI-GW-Scanner")?;
        Ok(midi_in
            .ports()
            .iter()
            .filter_map(|port| midi_in.port_name(port).ok())
            .collect())
    }

    fn output_ports(&self) -> Result<Vec<String>> {
        let midi_out = midir::MidiOutput::new("LR-MIDI-GW-Scanner")?;
        Ok(midi_out
            .ports()
            .iter()
            .filter_map(|port| midi_out.port_name(port).ok())
            .collect())
    }
}

/// Port-name pattern pinned to a fixed device id
#[derive(Debug, Clone)]
pub struct PinnedDevice {
    pub pattern: String,
    pub id: u16,
}

struct DeviceTable {
    ids: HashMap<String, DeviceId>,
    next_id: u16,
    pinned: Vec<PinnedDevice>,
    present: BTreeMap<(PortDirection, String), DeviceInfo>,
}

impl DeviceTable {
    /// Input and output ports with the same name share an id so feedback
    /// reaches the surface that produced the event.
    fn id_for(&mut self, name: &str) -> DeviceId {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = match self.pinned.iter().find(|p| port_matches(name, &p.pattern)) {
            Some(pin) => DeviceId(pin.id),
            None => {
                let id = DeviceId(self.next_id);
                self.next_id = self.next_id.saturating_add(1);
                id
            }
        };
        self.ids.insert(name.to_string(), id);
        id
    }
}

/// Tracks available MIDI hardware and notifies dependents on changes
pub struct DeviceManager {
    scanner: Box<dyn PortScanner>,
    table: Mutex<DeviceTable>,
    changes: broadcast::Sender<DeviceChange>,
}

impl DeviceManager {
    pub fn new(scanner: Box<dyn PortScanner>, pinned: Vec<PinnedDevice>) -> Self {
        let first_free = pinned
            .iter()
            .map(|p| p.id)
            .max()
            .map_or(1, |max| max.saturating_add(1));
        let (changes, _) = broadcast::channel(64);
        Self {
            scanner,
            table: Mutex::new(DeviceTable {
                ids: HashMap::new(),
                next_id: first_free,
                pinned,
                present: BTreeMap::new(),
            }),
            changes,
        }
    }

    /// Devices currently present, inputs first
    pub fn list_devices(&self) -> Vec<DeviceInfo> {
        self.table.lock().present.values().cloned().collect()
    }

    /// Look up a present port by id and direction
    pub fn find(&self, id: DeviceId, direction: PortDirection) -> Option<DeviceInfo> {
        self.table
            .lock()
            .present
            .values()
            .find(|info| info.id == id && info.direction == direction)
            .cloned()
    }

    /// Hot-plug events from now on
    ///
    /// The stream never ends on its own. Each call starts a fresh stream that
    /// only sees changes made after it was created.
    pub fn changes(&self) -> impl Stream<Item = DeviceChange> + Send + 'static {
        BroadcastStream::new(self.changes.subscribe()).filter_map(|item| match item {
            Ok(change) => Some(change),
            Err(e) => {
                warn!("Device change stream lagged: {}", e);
                None
            }
        })
    }

    /// Rescan ports, publish and return the differences
    ///
    /// A scanner failure leaves the known device set untouched.
    pub fn refresh(&self) -> Vec<DeviceChange> {
        let inputs = self.scan(PortDirection::Input);
        let outputs = self.scan(PortDirection::Output);

        let mut table = self.table.lock();
        let mut seen = BTreeMap::new();
        for (direction, names) in [(PortDirection::Input, inputs), (PortDirection::Output, outputs)] {
            let Some(names) = names else {
                // Keep the previous view of this direction
                for (key, info) in table.present.iter().filter(|((d, _), _)| *d == direction) {
                    seen.insert(key.clone(), info.clone());
                }
                continue;
            };
            for name in names {
                let id = table.id_for(&name);
                seen.insert(
                    (direction, name.clone()),
                    DeviceInfo {
                        id,
                        name,
                        direction,
                    },
                );
            }
        }

        let mut changes = Vec::new();
        for (key, info) in &table.present {
            if !seen.contains_key(key) {
                changes.push(DeviceChange::Removed(info.clone()));
            }
        }
        for (key, info) in &seen {
            if !table.present.contains_key(key) {
                changes.push(DeviceChange::Added(info.clone()));
            }
        }
        table.present = seen;
        drop(table);

        for change in &changes {
            match change {
                DeviceChange::Added(info) => {
                    info!("🔌 MIDI {:?} port added: '{}' ({})", info.direction, info.name, info.id)
                }
                DeviceChange::Removed(info) => {
                    info!("MIDI {:?} port removed: '{}' ({})", info.direction, info.name, info.id)
                }
            }
            // No receivers is fine; nobody is listening yet
            let _ = self.changes.send(change.clone());
        }
        changes
    }

    fn scan(&self, direction: PortDirection) -> Option<Vec<String>> {
        let result = match direction {
            PortDirection::Input => self.scanner.input_ports(),
            PortDirection::Output => self.scanner.output_ports(),
        };
        match result {
            Ok(names) => Some(names),
            Err(e) => {
                warn!("Failed to enumerate MIDI {:?} ports: {}", direction, e);
                None
            }
        }
    }

    /// Poll for hot-plug changes every `interval`
    pub fn spawn_watch(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let changes = manager.refresh();
                if !changes.is_empty() {
                    debug!("Device poll found {} change(s)", changes.len());
                }
            }
        })
    }
}
