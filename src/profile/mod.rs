//! Profile - bidirectional mapping between controls and remote commands
//!
//! A control maps to at most one command and a command to at most one control.
//! When a bind (or a loaded document) breaks either rule, the latest binding
//! wins and the one it displaced is dropped with a warning.

pub mod document;
pub mod watcher;

use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::midi::ControlId;

pub use document::{BindingParams, MappingEntry};
pub use watcher::ProfileWatcher;

/// Bounded undo history
const UNDO_DEPTH: usize = 100;

/// Command bound to a control, with its parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub command: String,
    pub params: BindingParams,
}

#[derive(Debug, Clone, Default)]
struct Table {
    order: Vec<ControlId>,
    by_control: HashMap<ControlId, Binding>,
    by_command: HashMap<String, ControlId>,
}

impl Table {
    fn from_entries(entries: Vec<MappingEntry>) -> Self {
        let mut table = Table::default();
        for entry in entries {
            table.bind(entry.control, entry.command, entry.params);
        }
        table
    }

    fn bind(&mut self, control: ControlId, command: String, params: BindingParams) {
        if let Some(previous) = self.by_control.get(&control) {
            if previous.command != command {
                debug!("{} rebound from {} to {}", control, previous.command, command);
            }
            self.by_command.remove(&previous.command);
        }
        if let Some(other) = self.by_command.get(&command).copied() {
            if other != control {
                warn!(
                    "Command {} moved from {} to {}; {} is now unbound",
                    command, other, control, other
                );
                self.remove(&other);
            }
        }

        if !self.by_control.contains_key(&control) {
            self.order.push(control);
        }
        self.by_command.insert(command.clone(), control);
        self.by_control.insert(control, Binding { command, params });
    }

    fn remove(&mut self, control: &ControlId) -> Option<Binding> {
        let binding = self.by_control.remove(control)?;
        self.order.retain(|c| c != control);
        if self.by_command.get(&binding.command) == Some(control) {
            self.by_command.remove(&binding.command);
        }
        Some(binding)
    }

    fn entries(&self) -> Vec<MappingEntry> {
        self.order
            .iter()
            .filter_map(|control| {
                self.by_control.get(control).map(|b| MappingEntry {
                    control: *control,
                    command: b.command.clone(),
                    params: b.params.clone(),
                })
            })
            .collect()
    }
}

struct ProfileInner {
    table: Table,
    undo: Vec<Table>,
    revision: u64,
    saved_revision: u64,
    /// Document last read from or written to disk
    synced: Option<Vec<u8>>,
}

impl ProfileInner {
    fn checkpoint(&mut self) {
        if self.undo.len() == UNDO_DEPTH {
            self.undo.remove(0);
        }
        self.undo.push(self.table.clone());
        self.revision += 1;
    }
}

/// A named, editable mapping table
///
/// Lookups take a shared lock; edits and loads take it exclusively, so a
/// reader never observes a half-applied change.
pub struct Profile {
    name: String,
    inner: RwLock<ProfileInner>,
}

impl Profile {
    /// Empty profile
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(ProfileInner {
                table: Table::default(),
                undo: Vec::new(),
                revision: 0,
                saved_revision: 0,
                synced: None,
            }),
        }
    }

    /// Profile built from a serialized document
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> BridgeResult<Self> {
        let profile = Self::new(name);
        profile.load_from(bytes)?;
        Ok(profile)
    }

    /// Profile file name (e.g. `default.yaml`)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bind(&self, control: ControlId, command: impl Into<String>, params: BindingParams) {
        let command = command.into();
        let mut inner = self.inner.write();
        inner.checkpoint();
        inner.table.bind(control, command, params);
    }

    /// Remove the binding for `control`, returning it if there was one
    pub fn unbind(&self, control: &ControlId) -> Option<Binding> {
        let mut inner = self.inner.write();
        if !inner.table.by_control.contains_key(control) {
            return None;
        }
        inner.checkpoint();
        inner.table.remove(control)
    }

    pub fn resolve_control(&self, control: &ControlId) -> Option<Binding> {
        self.inner.read().table.by_control.get(control).cloned()
    }

    pub fn resolve_command(&self, command: &str) -> Option<ControlId> {
        self.inner.read().table.by_command.get(command).copied()
    }

    /// Control and binding for `command`, read under one lock
    pub fn resolve_command_binding(&self, command: &str) -> Option<(ControlId, Binding)> {
        let inner = self.inner.read();
        let control = *inner.table.by_command.get(command)?;
        let binding = inner.table.by_control.get(&control)?.clone();
        Some((control, binding))
    }

    /// Bindings in insertion order
    pub fn mappings(&self) -> Vec<MappingEntry> {
        self.inner.read().table.entries()
    }

    pub fn len(&self) -> usize {
        self.inner.read().table.by_control.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace every binding with the document's
    ///
    /// The document is parsed completely before anything is swapped in, so a
    /// failure leaves the current bindings untouched. Clears dirty and undo.
    pub fn load_from(&self, bytes: &[u8]) -> BridgeResult<()> {
        let table = Table::from_entries(document::parse(bytes)?);
        let mut inner = self.inner.write();
        inner.table = table;
        inner.undo.clear();
        inner.revision += 1;
        inner.saved_revision = inner.revision;
        inner.synced = Some(bytes.to_vec());
        Ok(())
    }

    /// Serialize the current bindings
    pub fn save_to(&self) -> BridgeResult<Vec<u8>> {
        document::serialize(&self.mappings())
    }

    pub fn is_dirty(&self) -> bool {
        let inner = self.inner.read();
        inner.revision != inner.saved_revision
    }

    /// Whether `bytes` is exactly the document this profile last loaded or saved
    pub fn matches_disk(&self, bytes: &[u8]) -> bool {
        self.inner.read().synced.as_deref() == Some(bytes)
    }

    /// Hold off edits while the caller acts on a profile with nothing unsaved
    ///
    /// Returns `None` when the profile is dirty.
    pub fn lock_if_clean(&self) -> Option<EditLock<'_>> {
        let inner = self.inner.read();
        (inner.revision == inner.saved_revision).then(|| EditLock { _inner: inner })
    }

    /// Mark everything up to now as saved
    pub fn mark_saved(&self) {
        let mut inner = self.inner.write();
        inner.saved_revision = inner.revision;
    }

    /// Revert the most recent bind or unbind. Returns false if there is nothing to undo.
    pub fn undo(&self) -> bool {
        let mut inner = self.inner.write();
        match inner.undo.pop() {
            Some(previous) => {
                inner.table = previous;
                inner.revision += 1;
                true
            }
            None => false,
        }
    }

    /// Load `path`, naming the profile after its file name
    pub async fn load_file(path: &Path) -> BridgeResult<Self> {
        let bytes = Self::read_document(path).await?;
        let profile = Self::from_bytes(file_name(path), &bytes)?;
        info!("📋 Profile '{}' loaded ({} mappings)", profile.name, profile.len());
        Ok(profile)
    }

    /// Raw document at `path`, without parsing it
    pub async fn read_document(path: &Path) -> BridgeResult<Vec<u8>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BridgeError::ProfileNotFound(file_name(path)))
            }
            Err(e) => Err(BridgeError::PersistenceReadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }

    /// Write the profile to `path` and clear dirty on success
    pub async fn save_file(&self, path: &Path) -> BridgeResult<()> {
        let (bytes, revision) = {
            let inner = self.inner.read();
            (document::serialize(&inner.table.entries())?, inner.revision)
        };

        let write_failed = |source: std::io::Error| BridgeError::PersistenceWriteFailed {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(write_failed)?;
        }
        let tmp = path.with_extension("yaml.tmp");
        fs::write(&tmp, &bytes).await.map_err(write_failed)?;
        fs::rename(&tmp, path).await.map_err(write_failed)?;

        // Edits made while writing stay dirty
        let mut inner = self.inner.write();
        inner.saved_revision = inner.saved_revision.max(revision);
        inner.synced = Some(bytes);
        info!("💾 Profile '{}' saved to {}", self.name, path.display());
        Ok(())
    }
}

/// Shared hold on a profile's bindings; edits wait until it is dropped
pub struct EditLock<'a> {
    _inner: RwLockReadGuard<'a, ProfileInner>,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profile")
            .field("name", &self.name)
            .field("mappings", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn knob(n: u8) -> ControlId {
        ControlId::cc(1, 1, n)
    }

    #[test]
    fn test_bind_resolves_both_directions() {
        let profile = Profile::new("test.yaml");
        profile.bind(knob(7), "Exposure", BindingParams::default());

        assert_eq!(profile.resolve_control(&knob(7)).unwrap().command, "Exposure");
        assert_eq!(profile.resolve_command("Exposure"), Some(knob(7)));
        assert!(profile.resolve_control(&knob(8)).is_none());
        assert!(profile.resolve_command("Contrast").is_none());
        assert!(profile.is_dirty());
    }

    #[test]
    fn test_rebinding_a_control_frees_its_old_command() {
        let profile = Profile::new("test.yaml");
        profile.bind(knob(7), "Exposure", BindingParams::default());
        profile.bind(knob(7), "Contrast", BindingParams::default());

        assert!(profile.resolve_command("Exposure").is_none());
        assert_eq!(profile.resolve_command("Contrast"), Some(knob(7)));
        assert_eq!(profile.len(), 1);
    }

    #[test]
    fn test_command_moves_to_latest_control() {
        let profile = Profile::new("test.yaml");
        profile.bind(knob(7), "Exposure", BindingParams::default());
        profile.bind(knob(8), "Exposure", BindingParams::default());

        assert_eq!(profile.resolve_command("Exposure"), Some(knob(8)));
        assert!(profile.resolve_control(&knob(7)).is_none());
        assert_eq!(profile.len(), 1);
    }

    #[test]
    fn test_duplicates_in_document_are_last_write_wins() {
        let yaml = r#"
mappings:
  - { control: { device: 1, channel: 1, number: 7, kind: cc }, command: Exposure }
  - { control: { device: 1, channel: 1, number: 7, kind: cc }, command: Contrast }
  - { control: { device: 1, channel: 1, number: 9, kind: cc }, command: Shadows }
  - { control: { device: 1, channel: 1, number: 10, kind: cc }, command: Shadows }
"#;
        let profile = Profile::from_bytes("dup.yaml", yaml.as_bytes()).unwrap();
        assert_eq!(profile.resolve_control(&knob(7)).unwrap().command, "Contrast");
        assert!(profile.resolve_command("Exposure").is_none());
        assert_eq!(profile.resolve_command("Shadows"), Some(knob(10)));
        assert!(profile.resolve_control(&knob(9)).is_none());
        assert!(!profile.is_dirty());
    }

    #[test]
    fn test_save_load_roundtrip_preserves_resolution() {
        let profile = Profile::new("a.yaml");
        profile.bind(knob(7), "Exposure", BindingParams::default());
        profile.bind(ControlId::pitch_bend(2, 3), "Contrast", BindingParams::without_feedback());
        profile.bind(ControlId::note(1, 1, 16), "Pick", BindingParams::default());

        let bytes = profile.save_to().unwrap();
        let reloaded = Profile::from_bytes("b.yaml", &bytes).unwrap();

        assert_eq!(reloaded.mappings(), profile.mappings());
        for entry in profile.mappings() {
            assert_eq!(reloaded.resolve_control(&entry.control), profile.resolve_control(&entry.control));
            assert_eq!(reloaded.resolve_command(&entry.command), Some(entry.control));
        }
    }

    #[test]
    fn test_failed_load_keeps_previous_bindings() {
        let profile = Profile::new("keep.yaml");
        profile.bind(knob(7), "Exposure", BindingParams::default());

        let err = profile.load_from(b"mappings: {{{").unwrap_err();
        assert!(matches!(err, BridgeError::MalformedProfile(_)));
        assert_eq!(profile.resolve_command("Exposure"), Some(knob(7)));
        assert!(profile.is_dirty());
    }

    #[test]
    fn test_unbind_and_undo() {
        let profile = Profile::new("undo.yaml");
        assert!(!profile.undo());

        profile.bind(knob(7), "Exposure", BindingParams::default());
        profile.bind(knob(8), "Exposure", BindingParams::default());
        assert_eq!(profile.unbind(&knob(8)).unwrap().command, "Exposure");
        assert!(profile.unbind(&knob(8)).is_none());

        assert!(profile.undo());
        assert_eq!(profile.resolve_command("Exposure"), Some(knob(8)));
        assert!(profile.undo());
        assert_eq!(profile.resolve_command("Exposure"), Some(knob(7)));
        assert!(profile.undo());
        assert!(profile.is_empty());
    }

    #[tokio::test]
    async fn test_save_file_clears_dirty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profiles").join("default.yaml");

        let profile = Profile::new("default.yaml");
        profile.bind(knob(7), "Exposure", BindingParams::default());
        profile.save_file(&path).await.unwrap();
        assert!(!profile.is_dirty());

        let loaded = Profile::load_file(&path).await.unwrap();
        assert_eq!(loaded.name(), "default.yaml");
        assert_eq!(loaded.resolve_command("Exposure"), Some(knob(7)));
    }

    #[tokio::test]
    async fn test_missing_profile_file() {
        let dir = TempDir::new().unwrap();
        let err = Profile::load_file(&dir.path().join("nope.yaml")).await.unwrap_err();
        assert!(matches!(err, BridgeError::ProfileNotFound(name) if name == "nope.yaml"));
    }

    #[tokio::test]
    async fn test_saved_document_is_recognized_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("default.yaml");

        let profile = Profile::new("default.yaml");
        profile.bind(knob(7), "Exposure", BindingParams::default());
        profile.save_file(&path).await.unwrap();
        let on_disk = Profile::read_document(&path).await.unwrap();
        assert!(profile.matches_disk(&on_disk));

        let loaded = Profile::load_file(&path).await.unwrap();
        assert!(loaded.matches_disk(&on_disk));

        let edited = Profile::new("default.yaml");
        edited.bind(knob(7), "Contrast", BindingParams::default());
        assert!(!profile.matches_disk(&edited.save_to().unwrap()));
    }

    #[test]
    fn test_edit_lock_only_for_clean_profile() {
        let profile = Profile::new("p.yaml");
        assert!(profile.lock_if_clean().is_some());

        profile.bind(knob(1), "Exposure", BindingParams::default());
        assert!(profile.lock_if_clean().is_none());

        profile.mark_saved();
        let lock = profile.lock_if_clean();
        assert!(lock.is_some());
        assert!(!profile.is_dirty());
    }
}
