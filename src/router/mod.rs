//! Router module - the profile manager and both routing directions
//!
//! Hardware events are matched against the active profile and become
//! outbound commands; remote-application updates are matched back to a
//! control, written into the control state and, when the binding asks for
//! it, echoed to the hardware.
//!
//! Dispatch closures are registered once for the life of the bridge. The
//! active profile sits behind a lock that every routed event holds (shared)
//! from lookup to enqueue, and that a switch holds exclusively for the swap,
//! so each event is routed by exactly one profile generation.

#[cfg(test)]
mod tests;

use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::catalog::{CommandCatalog, ValueSemantics};
use crate::error::{BridgeError, BridgeResult};
use crate::link::{InboundLink, InboundMessage, LinkEvent, OutboundLink};
use crate::midi::{MidiEvent, MidiMessage, MidiReceiver, MidiSender};
use crate::profile::watcher::is_profile_file;
use crate::profile::Profile;
use crate::state::ControlStore;
use crate::subscription::Subscription;

/// Inbound command asking the bridge to switch profile
pub const CMD_SWITCH_PROFILE: &str = "SwitchProfile";
/// Inbound command whose parameter is written to the log
pub const CMD_LOG: &str = "Log";
/// Inbound command asking the bridge to shut down
pub const CMD_TERMINATE: &str = "TerminateApplication";

/// Save-then-swap rounds before a switch gives up on a busy profile
const SWITCH_SAVE_ATTEMPTS: usize = 3;

/// Profile change requested from a routing callback, applied off the hot path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileRequest {
    Next,
    Previous,
    Named(String),
}

/// Owns the active profile and routes events in both directions
pub struct ProfileManager {
    active: RwLock<Arc<Profile>>,
    generation: AtomicU64,
    profiles_dir: Option<PathBuf>,
    catalog: Arc<CommandCatalog>,
    controls: ControlStore,
    outbound: Arc<OutboundLink>,
    sender: Arc<MidiSender>,
    requests: mpsc::UnboundedSender<ProfileRequest>,
    request_rx: Mutex<Option<mpsc::UnboundedReceiver<ProfileRequest>>>,
    terminate: Notify,
}

impl ProfileManager {
    pub fn new(
        initial: Arc<Profile>,
        catalog: Arc<CommandCatalog>,
        controls: ControlStore,
        outbound: Arc<OutboundLink>,
        sender: Arc<MidiSender>,
        profiles_dir: Option<PathBuf>,
    ) -> Self {
        let (requests, request_rx) = mpsc::unbounded_channel();
        Self {
            active: RwLock::new(initial),
            generation: AtomicU64::new(0),
            profiles_dir,
            catalog,
            controls,
            outbound,
            sender,
            requests,
            request_rx: Mutex::new(Some(request_rx)),
            terminate: Notify::new(),
        }
    }

    /// The active profile. Always present.
    pub fn current(&self) -> Arc<Profile> {
        Arc::clone(&self.active.read())
    }

    /// Incremented by every switch
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn controls(&self) -> &ControlStore {
        &self.controls
    }

    pub fn catalog(&self) -> &CommandCatalog {
        &self.catalog
    }

    pub fn profiles_dir(&self) -> Option<&Path> {
        self.profiles_dir.as_deref()
    }

    /// Install `profile` as active and return the one it replaced
    ///
    /// Waits for events already being routed to finish; events after the swap
    /// see only the new profile.
    pub fn switch_to(&self, profile: Arc<Profile>) -> Arc<Profile> {
        let mut active = self.active.write();
        self.install(&mut active, profile)
    }

    /// Swap in `profile` only if `expected` is still active and has no unsaved edits
    ///
    /// Edits to `expected` are held off until the swap is done.
    fn replace_if_clean(&self, expected: &Arc<Profile>, profile: Arc<Profile>) -> bool {
        let mut active = self.active.write();
        if !Arc::ptr_eq(&*active, expected) {
            return false;
        }
        let outgoing = Arc::clone(&*active);
        let Some(_edits) = outgoing.lock_if_clean() else {
            return false;
        };
        self.install(&mut active, profile);
        true
    }

    fn install(&self, active: &mut Arc<Profile>, profile: Arc<Profile>) -> Arc<Profile> {
        let previous = std::mem::replace(active, profile);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "🔄 Profile switched: '{}' → '{}' (generation {})",
            previous.name(),
            active.name(),
            generation
        );
        previous
    }

    /// Register the routing callbacks on the event producers
    ///
    /// Must be called before the producers are started. Dropping the returned
    /// handles detaches routing again.
    pub fn attach(self: &Arc<Self>, receiver: &MidiReceiver, inbound: &InboundLink) -> Vec<Subscription> {
        let midi = {
            let manager = Arc::clone(self);
            receiver.subscribe(Arc::new(move |event: &MidiEvent| manager.route_midi(event)))
        };
        let link = {
            let manager = Arc::clone(self);
            inbound.subscribe(Arc::new(move |event: &LinkEvent| manager.handle_inbound(event)))
        };
        vec![midi, link]
    }

    /// Hardware → remote application
    pub fn route_midi(&self, event: &MidiEvent) {
        let Some((control, raw)) = event.message.control(event.device) else {
            trace!("No control for {}", event.message);
            return;
        };

        let profile = self.active.read();
        let value = self.controls.apply_midi(control, raw);
        let Some(binding) = profile.resolve_control(&control) else {
            trace!("{} is not bound in '{}'", control, profile.name());
            return;
        };

        let pressed = match event.message {
            MidiMessage::NoteOn { .. } => Some(true),
            MidiMessage::NoteOff { .. } => Some(false),
            _ => None,
        };
        let semantics = self.catalog.lookup(&binding.command).map(|info| info.semantics);

        if semantics == Some(ValueSemantics::ProfileSwitch) {
            if pressed.unwrap_or(value > 0) {
                let request = if binding.command == "PrevPro" {
                    ProfileRequest::Previous
                } else {
                    ProfileRequest::Next
                };
                self.request(request);
            }
            return;
        }

        let result = match pressed {
            Some(true) => self.outbound.enqueue(&binding.command, 1),
            Some(false) => return,
            None => self.outbound.enqueue(&binding.command, value),
        };
        if let Err(e) = result {
            warn!("Binding {} → {} not sent: {}", control, binding.command, e);
        }
    }

    /// Remote application → control state and hardware
    pub fn handle_inbound(&self, event: &LinkEvent) {
        match event {
            LinkEvent::Connected => info!("Remote application connected"),
            LinkEvent::Disconnected => warn!("Remote application disconnected"),
            LinkEvent::Message(message) => self.handle_message(message),
        }
    }

    fn handle_message(&self, message: &InboundMessage) {
        match message.command.as_str() {
            CMD_SWITCH_PROFILE => match message.param.as_deref() {
                Some(name) => self.request(ProfileRequest::Named(name.trim().to_string())),
                None => warn!("{} without a profile name", CMD_SWITCH_PROFILE),
            },
            CMD_LOG => info!(target: "remote", "{}", message.param.as_deref().unwrap_or("")),
            CMD_TERMINATE => {
                info!("Remote application requested shutdown");
                self.terminate.notify_one();
            }
            command => {
                let profile = self.active.read();
                let Some((control, binding)) = profile.resolve_command_binding(command) else {
                    trace!("{} is not bound in '{}'", command, profile.name());
                    return;
                };
                let Some(value) = message.value() else {
                    debug!("Ignoring non-numeric value for {}: {:?}", command, message.param);
                    return;
                };

                let stored = self.controls.apply_feedback(control, value);
                let relative = self.controls.settings(&control).method.is_relative();
                if binding.params.feedback && !relative {
                    self.sender
                        .send(control.device, &MidiMessage::for_control(&control, stored));
                }
            }
        }
    }

    /// Queue a profile change for the request worker
    pub fn request(&self, request: ProfileRequest) {
        debug!("Profile request: {:?}", request);
        if self.requests.send(request).is_err() {
            warn!("Profile request dropped: worker has stopped");
        }
    }

    /// Resolves once the remote application has asked the bridge to exit
    pub async fn terminated(&self) {
        self.terminate.notified().await
    }

    /// Apply queued profile requests until the task is aborted
    ///
    /// Only the first call gets a worker; later calls return `None`.
    pub fn spawn_request_worker(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut rx = self.request_rx.lock().take()?;
        let manager = Arc::clone(self);
        Some(tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let result = match request {
                    ProfileRequest::Next => manager.cycle(1).await,
                    ProfileRequest::Previous => manager.cycle(-1).await,
                    ProfileRequest::Named(name) => manager.switch_to_named(&name).await,
                };
                if let Err(e) = result {
                    warn!("Profile switch failed: {}", e);
                }
            }
        }))
    }

    /// Profile file names in the profile directory, sorted
    pub async fn list_profiles(&self) -> BridgeResult<Vec<String>> {
        let Some(dir) = &self.profiles_dir else {
            return Ok(Vec::new());
        };
        let read_failed = |e: std::io::Error| BridgeError::PersistenceReadFailed {
            path: dir.clone(),
            reason: e.to_string(),
        };

        let mut entries = tokio::fs::read_dir(dir).await.map_err(read_failed)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_failed)? {
            let path = entry.path();
            if is_profile_file(&path) {
                if let Some(name) = path.file_name() {
                    names.push(name.to_string_lossy().into_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Load `name` from the profile directory and make it active
    ///
    /// A dirty outgoing profile is saved first. Edits that land after the save
    /// send it round again; only a failed save lets unsaved edits go.
    pub async fn switch_to_named(&self, name: &str) -> BridgeResult<()> {
        let path = self.profile_path(name)?;
        if self.current().name() == name {
            debug!("Profile '{}' already active", name);
            return Ok(());
        }
        let profile = Arc::new(Profile::load_file(&path).await?);

        for _ in 0..SWITCH_SAVE_ATTEMPTS {
            let outgoing = self.current();
            if outgoing.name() == name {
                return Ok(());
            }
            if let Err(e) = self.save_profile(&outgoing).await {
                warn!("Could not save outgoing profile: {}", e);
                self.switch_to(profile);
                return Ok(());
            }
            if self.replace_if_clean(&outgoing, Arc::clone(&profile)) {
                return Ok(());
            }
            debug!("Profile '{}' changed while switching, saving again", outgoing.name());
        }
        Err(BridgeError::ProfileBusy(self.current().name().to_string()))
    }

    /// Step through the profile directory, wrapping at either end
    async fn cycle(&self, step: isize) -> BridgeResult<()> {
        let names = self.list_profiles().await?;
        if names.is_empty() {
            warn!("No profiles to cycle through");
            return Ok(());
        }
        let current = self.current();
        let next = match names.iter().position(|n| n == current.name()) {
            Some(index) => {
                let len = names.len() as isize;
                ((index as isize + step).rem_euclid(len)) as usize
            }
            None => 0,
        };
        self.switch_to_named(&names[next]).await
    }

    /// Reload the active profile after an external edit
    ///
    /// Returns whether a reload happened. Unsaved in-memory edits win over
    /// the file.
    pub async fn reload_if_active(&self, name: &str) -> BridgeResult<bool> {
        let current = self.current();
        if current.name() != name {
            return Ok(false);
        }
        let bytes = Profile::read_document(&self.profile_path(name)?).await?;
        if current.matches_disk(&bytes) {
            debug!("Profile '{}' on disk is what we last loaded or saved", name);
            return Ok(false);
        }
        if current.is_dirty() {
            warn!("Profile '{}' changed on disk but has unsaved edits; not reloading", name);
            return Ok(false);
        }
        let profile = Arc::new(Profile::from_bytes(name, &bytes)?);
        if !self.replace_if_clean(&current, profile) {
            warn!("Profile '{}' was edited during reload; keeping the in-memory version", name);
            return Ok(false);
        }
        Ok(true)
    }

    /// Save the active profile to the profile directory if it is dirty
    pub async fn save_active(&self) -> BridgeResult<()> {
        self.save_profile(&self.current()).await
    }

    async fn save_profile(&self, profile: &Profile) -> BridgeResult<()> {
        if !profile.is_dirty() {
            return Ok(());
        }
        let path = self.profile_path(profile.name())?;
        profile.save_file(&path).await
    }

    /// Path of a profile in the directory; names with path parts are refused
    fn profile_path(&self, name: &str) -> BridgeResult<PathBuf> {
        let plain = !name.is_empty()
            && Path::new(name).file_name().map(|f| f == name).unwrap_or(false)
            && is_profile_file(Path::new(name));
        match &self.profiles_dir {
            Some(dir) if plain => Ok(dir.join(name)),
            _ => Err(BridgeError::ProfileNotFound(name.to_string())),
        }
    }
}
