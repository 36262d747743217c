//! Control state type definitions
//!
//! Per-control settings (how raw MIDI becomes a value, and the value's limits)
//! plus the entry shapes used in the persisted document.

use serde::{Deserialize, Serialize};

use crate::midi::{ControlId, ControlKind};

/// How a Control Change value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CcMethod {
    /// The raw value is the position
    #[default]
    Absolute,
    /// Relative encoder: 1..63 up, 127..64 down (two's complement)
    TwosComplement,
    /// Relative encoder: 64 is no change, above is up, below is down
    BinaryOffset,
    /// Relative encoder: bit 6 is the sign, bits 0-5 the magnitude
    SignMagnitude,
}

impl CcMethod {
    pub fn is_relative(self) -> bool {
        self != CcMethod::Absolute
    }

    /// Signed step encoded by a relative encoder's raw byte
    pub fn delta(self, raw: u16) -> i32 {
        let raw = (raw & 0x7F) as i32;
        match self {
            CcMethod::Absolute => 0,
            CcMethod::TwosComplement => {
                if raw > 63 {
                    raw - 128
                } else {
                    raw
                }
            }
            CcMethod::BinaryOffset => raw - 64,
            CcMethod::SignMagnitude => {
                if raw & 0x40 != 0 {
                    -(raw & 0x3F)
                } else {
                    raw & 0x3F
                }
            }
        }
    }
}

/// Interpretation and limits for one control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlSettings {
    #[serde(default)]
    pub method: CcMethod,
    pub low: u16,
    pub high: u16,
}

impl ControlSettings {
    /// Full range of the control kind, absolute
    pub fn for_kind(kind: ControlKind) -> Self {
        Self {
            method: CcMethod::Absolute,
            low: 0,
            high: kind.max_value(),
        }
    }

    /// Clamp into `[low, high]`, tolerating a swapped pair
    pub fn clamp(&self, value: i64) -> u16 {
        let (low, high) = if self.low <= self.high {
            (self.low, self.high)
        } else {
            (self.high, self.low)
        };
        value.clamp(low as i64, high as i64) as u16
    }
}

/// One remembered value, as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueEntry {
    pub control: ControlId,
    pub value: u16,
}

/// One non-default settings record, as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsEntry {
    pub control: ControlId,
    pub settings: ControlSettings,
}
