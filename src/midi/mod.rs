//! MIDI message types, control identifiers, and device I/O
//!
//! Provides MIDI message parsing and encoding, the [`ControlId`] key used by the
//! profile and the control state model, and the receiver/sender/device services.

pub mod devices;
pub mod receiver;
pub mod sender;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use devices::{DeviceChange, DeviceInfo, DeviceManager, PortDirection};
pub use receiver::{MidiEvent, MidiReceiver};
pub use sender::{MidiSender, MidiSink};

/// Numeric device handle assigned by the [`DeviceManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u16);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// Channel-voice MIDI messages the bridge understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff { channel: u8, note: u8, velocity: u8 },

    /// Note On: channel (0-15), note (0-127), velocity (0-127)
    NoteOn { channel: u8, note: u8, velocity: u8 },

    /// Control Change: channel (0-15), cc (0-127), value (0-127)
    ControlChange { channel: u8, cc: u8, value: u8 },

    /// Program Change: channel (0-15), program (0-127)
    ProgramChange { channel: u8, program: u8 },

    /// Channel Pressure: channel (0-15), pressure (0-127)
    ChannelPressure { channel: u8, pressure: u8 },

    /// Pitch Bend: channel (0-15), value (0-16383, 14-bit)
    PitchBend { channel: u8, value: u16 },
}

impl MidiMessage {
    /// Parse a MIDI message from raw bytes
    ///
    /// System messages and running status are not used by control surfaces
    /// in this bridge and yield `None`.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let status = *data.first()?;
        if !(0x80..0xF0).contains(&status) {
            return None;
        }

        let channel = status & 0x0F;
        let data1 = || data.get(1).map(|b| b & 0x7F);
        let data2 = || data.get(2).map(|b| b & 0x7F);

        match status & 0xF0 {
            0x80 => Some(MidiMessage::NoteOff {
                channel,
                note: data1()?,
                velocity: data2()?,
            }),
            0x90 => {
                let note = data1()?;
                let velocity = data2()?;
                // Note On with velocity 0 is a Note Off
                if velocity == 0 {
                    Some(MidiMessage::NoteOff { channel, note, velocity: 0 })
                } else {
                    Some(MidiMessage::NoteOn { channel, note, velocity })
                }
            }
            0xB0 => Some(MidiMessage::ControlChange {
                channel,
                cc: data1()?,
                value: data2()?,
            }),
            0xC0 => Some(MidiMessage::ProgramChange {
                channel,
                program: data1()?,
            }),
            0xD0 => Some(MidiMessage::ChannelPressure {
                channel,
                pressure: data1()?,
            }),
            0xE0 => {
                let lsb = data1()? as u16;
                let msb = data2()? as u16;
                Some(MidiMessage::PitchBend {
                    channel,
                    value: (msb << 7) | lsb,
                })
            }
            _ => None,
        }
    }

    /// Encode the message to MIDI bytes
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                vec![0x80 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                vec![0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                vec![0xB0 | (channel & 0x0F), cc & 0x7F, value & 0x7F]
            }
            MidiMessage::ProgramChange { channel, program } => {
                vec![0xC0 | (channel & 0x0F), program & 0x7F]
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                vec![0xD0 | (channel & 0x0F), pressure & 0x7F]
            }
            MidiMessage::PitchBend { channel, value } => {
                let lsb = (value & 0x7F) as u8;
                let msb = ((value >> 7) & 0x7F) as u8;
                vec![0xE0 | (channel & 0x0F), lsb, msb]
            }
        }
    }

    /// The control this message addresses plus its raw value, if it is one of
    /// the kinds a profile can bind
    pub fn control(&self, device: DeviceId) -> Option<(ControlId, u16)> {
        let (kind, channel, number, value) = match *self {
            MidiMessage::ControlChange { channel, cc, value } => {
                (ControlKind::ControlChange, channel, cc, value as u16)
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                (ControlKind::Note, channel, note, velocity as u16)
            }
            // Release velocity is not a button state
            MidiMessage::NoteOff { channel, note, .. } => (ControlKind::Note, channel, note, 0),
            MidiMessage::PitchBend { channel, value } => (ControlKind::PitchBend, channel, 0, value),
            _ => return None,
        };
        Some((
            ControlId {
                device,
                channel: channel + 1,
                number,
                kind,
            },
            value,
        ))
    }

    /// Build the message that drives `control` to `value` on the hardware
    pub fn for_control(control: &ControlId, value: u16) -> Self {
        let channel = control.channel.saturating_sub(1) & 0x0F;
        match control.kind {
            ControlKind::ControlChange => MidiMessage::ControlChange {
                channel,
                cc: control.number,
                value: value.min(127) as u8,
            },
            ControlKind::Note => MidiMessage::NoteOn {
                channel,
                note: control.number,
                velocity: value.min(127) as u8,
            },
            ControlKind::PitchBend => MidiMessage::PitchBend {
                channel,
                value: value.min(16383),
            },
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                write!(f, "NoteOff ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                write!(f, "NoteOn ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                write!(f, "CC ch:{} cc:{} v:{}", channel + 1, cc, value)
            }
            MidiMessage::ProgramChange { channel, program } => {
                write!(f, "ProgramChange ch:{} p:{}", channel + 1, program)
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                write!(f, "ChannelPressure ch:{} p:{}", channel + 1, pressure)
            }
            MidiMessage::PitchBend { channel, value } => {
                write!(f, "PitchBend ch:{} v:{}", channel + 1, value)
            }
        }
    }
}

/// Kind of physical control a binding refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    /// Control Change (knobs, encoders, CC faders)
    #[serde(alias = "cc")]
    ControlChange,
    /// Note On/Off (buttons)
    Note,
    /// Pitch Bend (motorized faders in MCU mode)
    #[serde(alias = "pb")]
    PitchBend,
}

impl ControlKind {
    /// Largest raw value a message of this kind carries
    pub fn max_value(self) -> u16 {
        match self {
            ControlKind::PitchBend => 16383,
            _ => 127,
        }
    }

    /// Value reported for a control that has never been seen
    pub fn neutral(self) -> u16 {
        match self {
            ControlKind::PitchBend => 8192,
            _ => 0,
        }
    }
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlKind::ControlChange => write!(f, "cc"),
            ControlKind::Note => write!(f, "note"),
            ControlKind::PitchBend => write!(f, "pb"),
        }
    }
}

/// Key naming one physical control: device, 1-based channel, number, kind
///
/// Pitch bend has no data byte, so its `number` is always 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ControlId {
    pub device: DeviceId,
    pub channel: u8,
    #[serde(default)]
    pub number: u8,
    pub kind: ControlKind,
}

impl ControlId {
    pub fn cc(device: u16, channel: u8, cc: u8) -> Self {
        Self {
            device: DeviceId(device),
            channel,
            number: cc,
            kind: ControlKind::ControlChange,
        }
    }

    pub fn note(device: u16, channel: u8, note: u8) -> Self {
        Self {
            device: DeviceId(device),
            channel,
            number: note,
            kind: ControlKind::Note,
        }
    }

    pub fn pitch_bend(device: u16, channel: u8) -> Self {
        Self {
            device: DeviceId(device),
            channel,
            number: 0,
            kind: ControlKind::PitchBend,
        }
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|ch{}|{}{}",
            self.device, self.channel, self.kind, self.number
        )
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Case-insensitive substring match used for port patterns
pub fn port_matches(name: &str, pattern: &str) -> bool {
    name.to_lowercase().contains(&pattern.to_lowercase())
}
