//! Control state persistence to a JSON document
//!
//! Saved at shutdown and on explicit save, restored at startup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

use super::store::ControlStore;
use super::types::{SettingsEntry, ValueEntry};
use crate::error::{BridgeError, BridgeResult};

/// On-disk shape of the control state model
#[derive(Debug, Serialize, Deserialize)]
pub struct ControlsDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub values: Vec<ValueEntry>,
    #[serde(default)]
    pub settings: Vec<SettingsEntry>,
}

fn default_version() -> u32 {
    ControlsDocument::VERSION
}

impl ControlsDocument {
    pub const VERSION: u32 = 1;

    pub fn from_store(store: &ControlStore) -> Self {
        Self {
            version: Self::VERSION,
            saved_at: Some(Utc::now()),
            values: store
                .values()
                .into_iter()
                .map(|(control, value)| ValueEntry { control, value })
                .collect(),
            settings: store
                .all_settings()
                .into_iter()
                .map(|(control, settings)| SettingsEntry { control, settings })
                .collect(),
        }
    }

    pub fn load_into(self, store: &ControlStore) {
        for entry in self.settings {
            store.set_settings(entry.control, entry.settings);
        }
        store.hydrate(self.values.into_iter().map(|e| (e.control, e.value)));
    }

    /// Write the document; the file is replaced only once fully written
    pub async fn save_to_file(&self, path: &Path) -> BridgeResult<()> {
        let write_failed = |source: std::io::Error| BridgeError::PersistenceWriteFailed {
            path: path.to_path_buf(),
            source,
        };

        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| write_failed(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(write_failed)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).await.map_err(write_failed)?;
        fs::rename(&tmp, path).await.map_err(write_failed)?;
        Ok(())
    }

    /// Read the document, `None` when the file does not exist yet
    pub async fn load_from_file(path: &Path) -> BridgeResult<Option<Self>> {
        let read_failed = |reason: String| BridgeError::PersistenceReadFailed {
            path: path.to_path_buf(),
            reason,
        };

        let json = match fs::read(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(read_failed(e.to_string())),
        };
        let document: ControlsDocument =
            serde_json::from_slice(&json).map_err(|e| read_failed(e.to_string()))?;

        debug!(
            "Controls document loaded (version: {}, saved: {:?})",
            document.version, document.saved_at
        );
        Ok(Some(document))
    }
}

impl ControlStore {
    /// Save current values and settings
    pub async fn save_file(&self, path: &Path) -> BridgeResult<()> {
        let document = ControlsDocument::from_store(self);
        let count = document.values.len();
        document.save_to_file(path).await?;
        info!("💾 Saved {} control values to {}", count, path.display());
        Ok(())
    }

    /// Restore values and settings; returns how many values were restored
    pub async fn load_file(&self, path: &Path) -> BridgeResult<usize> {
        let Some(document) = ControlsDocument::load_from_file(path).await? else {
            debug!("No controls document at {}", path.display());
            return Ok(0);
        };
        let count = document.values.len();
        document.load_into(self);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::ControlId;
    use crate::state::types::{CcMethod, ControlSettings};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("controls.json");

        let store = ControlStore::new();
        let encoder = ControlId::cc(1, 2, 16);
        store.set(ControlId::cc(1, 1, 7), 100);
        store.set(ControlId::pitch_bend(2, 1), 12000);
        store.set_settings(
            encoder,
            ControlSettings {
                method: CcMethod::BinaryOffset,
                low: 0,
                high: 64,
            },
        );
        store.save_file(&path).await.unwrap();

        let restored = ControlStore::new();
        assert_eq!(restored.load_file(&path).await.unwrap(), 2);
        assert_eq!(restored.get(&ControlId::cc(1, 1, 7)), 100);
        assert_eq!(restored.get(&ControlId::pitch_bend(2, 1)), 12000);
        assert_eq!(restored.settings(&encoder).method, CcMethod::BinaryOffset);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_state() {
        let dir = TempDir::new().unwrap();
        let store = ControlStore::new();
        let count = store.load_file(&dir.path().join("absent.json")).await.unwrap();
        assert_eq!(count, 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_read_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("controls.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let store = ControlStore::new();
        let err = store.load_file(&path).await.unwrap_err();
        assert!(matches!(err, BridgeError::PersistenceReadFailed { .. }));
    }

    #[tokio::test]
    async fn test_unwritable_path_leaves_memory_intact() {
        let dir = TempDir::new().unwrap();
        // A file where a directory is expected
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();

        let store = ControlStore::new();
        store.set(ControlId::cc(1, 1, 1), 9);
        let err = store.save_file(&blocker.join("controls.json")).await.unwrap_err();
        assert!(matches!(err, BridgeError::PersistenceWriteFailed { .. }));
        assert_eq!(store.get(&ControlId::cc(1, 1, 1)), 9);
    }

    #[test]
    fn test_tolerates_missing_and_unknown_fields() {
        let json = r#"{"values":[{"control":{"device":1,"channel":1,"number":7,"kind":"cc"},"value":5}],"extra":true}"#;
        let document: ControlsDocument = serde_json::from_str(json).unwrap();
        assert_eq!(document.version, ControlsDocument::VERSION);
        assert_eq!(document.values.len(), 1);
        assert!(document.settings.is_empty());
    }
}
