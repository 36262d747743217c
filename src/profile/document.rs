//! Serialized profile layout
//!
//! ```yaml
//! version: 1
//! mappings:
//!   - control: { device: 1, channel: 1, number: 7, kind: cc }
//!     command: Exposure
//!     feedback: true
//! ```
//!
//! Every field defaults when missing. Unknown keys on a mapping are kept as
//! extra parameters and written back on save; unknown top-level keys are
//! ignored. A single mapping that cannot be understood is skipped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::{BridgeError, BridgeResult};
use crate::midi::ControlId;

/// Per-binding parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingParams {
    /// Write remote-application values back to the hardware
    #[serde(default = "default_true")]
    pub feedback: bool,
    /// Anything else found on the mapping, preserved verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Default for BindingParams {
    fn default() -> Self {
        Self {
            feedback: true,
            extra: BTreeMap::new(),
        }
    }
}

impl BindingParams {
    pub fn without_feedback() -> Self {
        Self {
            feedback: false,
            ..Self::default()
        }
    }
}

fn default_true() -> bool {
    true
}

/// One control-to-command mapping as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub control: ControlId,
    pub command: String,
    #[serde(flatten)]
    pub params: BindingParams,
}

#[derive(Debug, Serialize)]
struct ProfileDocumentOut<'a> {
    version: u32,
    mappings: &'a [MappingEntry],
}

#[derive(Debug, Deserialize)]
struct ProfileDocumentIn {
    #[serde(default)]
    version: Option<u32>,
    #[serde(default)]
    mappings: Vec<serde_yaml::Value>,
}

pub const DOCUMENT_VERSION: u32 = 1;

/// Parse a profile document into its mapping entries, in file order
pub fn parse(bytes: &[u8]) -> BridgeResult<Vec<MappingEntry>> {
    let text =
        std::str::from_utf8(bytes).map_err(|e| BridgeError::MalformedProfile(e.to_string()))?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let document: ProfileDocumentIn =
        serde_yaml::from_str(text).map_err(|e| BridgeError::MalformedProfile(e.to_string()))?;
    if let Some(version) = document.version.filter(|v| *v > DOCUMENT_VERSION) {
        warn!(
            "Profile document version {} is newer than {}; reading what is understood",
            version, DOCUMENT_VERSION
        );
    }

    let mut entries = Vec::with_capacity(document.mappings.len());
    for (index, raw) in document.mappings.into_iter().enumerate() {
        match serde_yaml::from_value::<MappingEntry>(raw) {
            Ok(entry) if entry.command.trim().is_empty() => {
                warn!("Skipping mapping #{}: empty command", index + 1);
            }
            Ok(entry) => entries.push(entry),
            Err(e) => warn!("Skipping mapping #{}: {}", index + 1, e),
        }
    }
    Ok(entries)
}

/// Serialize mapping entries as a profile document
pub fn serialize(mappings: &[MappingEntry]) -> BridgeResult<Vec<u8>> {
    let document = ProfileDocumentOut {
        version: DOCUMENT_VERSION,
        mappings,
    };
    serde_yaml::to_string(&document)
        .map(String::into_bytes)
        .map_err(|e| BridgeError::MalformedProfile(e.to_string()))
}
