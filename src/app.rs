//! Bridge lifecycle
//!
//! Two phases, enforced by types: [`Bridge::build`] constructs every component
//! and restores persisted state but starts nothing. [`Bridge::start`] wires the
//! routing callbacks and only then starts the producers (MIDI input, links,
//! hot-plug polling). [`RunningBridge::shutdown`] stops the producers first,
//! then persists state, so no callback can reach a component being torn down.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::catalog::CommandCatalog;
use crate::config::{AppConfig, MidiConfig};
use crate::error::BridgeError;
use crate::link::{InboundLink, LinkState, OutboundLink};
use crate::midi::devices::{MidirScanner, PortScanner};
use crate::midi::{DeviceChange, DeviceManager, MidiReceiver, MidiSender, PortDirection};
use crate::paths::AppPaths;
use crate::profile::{Profile, ProfileWatcher};
use crate::router::ProfileManager;
use crate::state::ControlStore;
use crate::subscription::Subscription;

/// Fully constructed, not yet running
pub struct Bridge {
    config: AppConfig,
    controls_path: PathBuf,
    profiles_dir: PathBuf,
    devices: Arc<DeviceManager>,
    receiver: Arc<MidiReceiver>,
    sender: Arc<MidiSender>,
    outbound: Arc<OutboundLink>,
    inbound: Arc<InboundLink>,
    manager: Arc<ProfileManager>,
}

impl Bridge {
    /// Build against the platform MIDI backend
    ///
    /// `profile` overrides the configured default profile file name.
    pub async fn build(config: AppConfig, paths: &AppPaths, profile: Option<String>) -> Result<Self> {
        Self::build_with(config, paths, profile, Box::new(MidirScanner)).await
    }

    pub async fn build_with(
        config: AppConfig,
        paths: &AppPaths,
        profile: Option<String>,
        scanner: Box<dyn PortScanner>,
    ) -> Result<Self> {
        let catalog = Arc::new(CommandCatalog::new(config.locale()));
        info!(
            "Command catalog: {} commands ({})",
            catalog.all().len(),
            catalog.locale()
        );

        let controls = ControlStore::new();
        match controls.load_file(&paths.controls).await {
            Ok(0) => debug!("No control values restored"),
            Ok(count) => info!("Restored {} control values", count),
            Err(e) => warn!("Starting with empty control state: {}", e),
        }

        let profiles_dir = paths.resolve_profiles_dir(config.profiles.directory.as_deref());
        tokio::fs::create_dir_all(&profiles_dir)
            .await
            .with_context(|| format!("Failed to create profile directory: {}", profiles_dir.display()))?;
        let name = profile.unwrap_or_else(|| config.profiles.default.clone());
        let initial = match Profile::load_file(&profiles_dir.join(&name)).await {
            Ok(profile) => profile,
            Err(BridgeError::ProfileNotFound(_)) => {
                info!("Profile '{}' does not exist yet, starting empty", name);
                Profile::new(name)
            }
            Err(e) => {
                warn!("Starting with an empty profile: {}", e);
                Profile::new(name)
            }
        };

        let outbound = Arc::new(OutboundLink::new(&config.link));
        let inbound = Arc::new(InboundLink::new(&config.link));
        let sender = Arc::new(MidiSender::new());
        let receiver = Arc::new(MidiReceiver::new());
        let devices = Arc::new(DeviceManager::new(scanner, config.midi.pinned_devices()));

        let manager = Arc::new(ProfileManager::new(
            Arc::new(initial),
            catalog,
            controls,
            outbound.clone(),
            sender.clone(),
            Some(profiles_dir.clone()),
        ));

        Ok(Self {
            config,
            controls_path: paths.controls.clone(),
            profiles_dir,
            devices,
            receiver,
            sender,
            outbound,
            inbound,
            manager,
        })
    }

    pub fn manager(&self) -> &Arc<ProfileManager> {
        &self.manager
    }

    /// Subscribe the routing callbacks, then start every producer
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(self) -> RunningBridge {
        let subscriptions = self.manager.attach(&self.receiver, &self.inbound);
        let mut tasks = Vec::new();
        if let Some(worker) = self.manager.spawn_request_worker() {
            tasks.push(worker);
        }

        self.receiver.start();

        // Subscribe before the first scan so its additions are seen
        tasks.push(tokio::spawn(follow_devices(
            self.devices.changes(),
            self.config.midi.clone(),
            self.receiver.clone(),
            self.sender.clone(),
        )));
        self.devices.refresh();
        tasks.push(self.devices.spawn_watch(self.config.midi.poll_interval()));

        self.outbound.start();
        self.inbound.start();

        if self.config.profiles.watch {
            match ProfileWatcher::new(&self.profiles_dir) {
                Ok(mut watcher) => {
                    let manager = self.manager.clone();
                    tasks.push(tokio::spawn(async move {
                        while let Some(name) = watcher.next_change().await {
                            match manager.reload_if_active(&name).await {
                                Ok(true) => info!("Profile '{}' reloaded from disk", name),
                                Ok(false) => {}
                                Err(e) => warn!("Failed to reload profile '{}': {}", name, e),
                            }
                        }
                    }));
                }
                Err(e) => warn!("Profile hot-reload disabled: {:#}", e),
            }
        }

        info!("✅ Bridge running (profile '{}')", self.manager.current().name());
        RunningBridge {
            bridge: self,
            subscriptions,
            tasks,
        }
    }
}

/// Open or close device handles as hardware comes and goes
///
/// Runs until the change stream ends. A port that fails to open is logged and
/// picked up again on its next hot-plug event.
async fn follow_devices(
    changes: impl Stream<Item = DeviceChange> + Send + 'static,
    midi: MidiConfig,
    receiver: Arc<MidiReceiver>,
    sender: Arc<MidiSender>,
) {
    tokio::pin!(changes);
    while let Some(change) = changes.next().await {
        apply_device_change(&change, &midi, &receiver, &sender);
    }
}

/// What a hot-plug event did to the device handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceAction {
    Opened,
    Closed,
    Ignored,
    Failed,
}

fn apply_device_change(
    change: &DeviceChange,
    midi: &MidiConfig,
    receiver: &MidiReceiver,
    sender: &MidiSender,
) -> DeviceAction {
    let (info, result) = match change {
        DeviceChange::Added(info) => {
            let result = match info.direction {
                PortDirection::Input if midi.wants_input(&info.name) => receiver.open(info),
                PortDirection::Output if midi.wants_output(&info.name) => sender.open(info),
                _ => {
                    debug!("Ignoring MIDI port '{}' (not selected)", info.name);
                    return DeviceAction::Ignored;
                }
            };
            (info, result)
        }
        DeviceChange::Removed(info) => {
            match info.direction {
                PortDirection::Input => receiver.close(info.id),
                PortDirection::Output => sender.close(info.id),
            }
            return DeviceAction::Closed;
        }
    };
    match result {
        Ok(()) => DeviceAction::Opened,
        Err(e) => {
            warn!("MIDI {:?} port '{}' not opened: {}", info.direction, info.name, e);
            DeviceAction::Failed
        }
    }
}

/// A started bridge; the only way back is [`RunningBridge::shutdown`]
pub struct RunningBridge {
    bridge: Bridge,
    subscriptions: Vec<Subscription>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningBridge {
    pub fn manager(&self) -> &Arc<ProfileManager> {
        &self.bridge.manager
    }

    pub fn outbound_state(&self) -> LinkState {
        self.bridge.outbound.state()
    }

    pub fn inbound_state(&self) -> LinkState {
        self.bridge.inbound.state()
    }

    /// Resolves when the remote application asks the bridge to exit
    pub async fn terminated(&self) {
        self.bridge.manager.terminated().await
    }

    /// Stop producers, detach routing, then persist profile and control state
    ///
    /// Both saves are attempted; the first failure is returned.
    pub async fn shutdown(self) -> Result<()> {
        let RunningBridge {
            bridge,
            subscriptions,
            tasks,
        } = self;
        info!("Shutting down bridge...");

        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }

        // Joins the dispatch thread; keep it off the runtime workers
        let receiver = bridge.receiver.clone();
        tokio::task::spawn_blocking(move || receiver.stop())
            .await
            .context("MIDI receiver shutdown panicked")?;
        bridge.inbound.stop().await;
        bridge.outbound.stop().await;

        drop(subscriptions);
        bridge.sender.close_all();

        let profile_result = bridge.manager.save_active().await;
        if let Err(e) = &profile_result {
            error!("Failed to save profile: {}", e);
        }
        let controls_result = bridge.manager.controls().save_file(&bridge.controls_path).await;
        if let Err(e) = &controls_result {
            error!("Failed to save control state: {}", e);
        }

        profile_result.context("Saving profile on shutdown")?;
        controls_result.context("Saving control state on shutdown")?;
        info!("Bridge shutdown complete");
        Ok(())
    }
}
