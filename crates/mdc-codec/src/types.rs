use std::fmt;
use std::str::FromStr;

use crate::error::MdcError;

/// Leading byte of every frame in both directions.
pub const HEADER: u8 = 0xAA;

/// Command byte the display uses for every reply frame.
pub const REPLY_MARKER: u8 = 0xFF;

/// Acknowledgement byte for a successful command.
pub const ACK: u8 = b'A';

/// Acknowledgement byte for a rejected command.
pub const NAK: u8 = b'N';

/// MDC commands used by the controller.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Status = 0x00,
    Power = 0x11,
    InputSource = 0x14,
}

impl From<Command> for u8 {
    fn from(c: Command) -> Self {
        c as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Command::Status),
            0x11 => Ok(Command::Power),
            0x14 => Ok(Command::InputSource),
            _ => Err(()),
        }
    }
}

/// Raw power values understood by the power command.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerValue {
    Off = 0x00,
    On = 0x01,
    Reboot = 0x02,
}

/// A request frame sent to the display.
///
/// An empty `data` payload is a "get" request; a non-empty one is a "set".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdcRequest {
    pub command: u8,
    pub display_id: u8,
    pub data: Vec<u8>,
}

impl MdcRequest {
    pub fn get(command: Command, display_id: u8) -> Self {
        Self {
            command: command.into(),
            display_id,
            data: Vec::new(),
        }
    }

    pub fn set(command: Command, display_id: u8, data: Vec<u8>) -> Self {
        Self {
            command: command.into(),
            display_id,
            data,
        }
    }

    pub fn get_power(display_id: u8) -> Self {
        Self::get(Command::Power, display_id)
    }

    pub fn set_power(display_id: u8, on: bool) -> Self {
        let value = if on { PowerValue::On } else { PowerValue::Off };
        Self::set(Command::Power, display_id, vec![value as u8])
    }

    pub fn set_input_source(display_id: u8, source: InputSource) -> Self {
        Self::set(Command::InputSource, display_id, vec![source.code()])
    }
}

/// A reply frame received from the display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdcReply {
    pub display_id: u8,
    pub acknowledged: bool,
    /// Command the reply answers.
    pub command: u8,
    pub values: Vec<u8>,
}

impl MdcReply {
    /// Turn a NAK into an error, yielding the reply values otherwise.
    pub fn into_values(self) -> Result<Vec<u8>, MdcError> {
        if self.acknowledged {
            Ok(self.values)
        } else {
            Err(MdcError::Rejected {
                command: self.command,
                code: self.values.first().copied().unwrap_or(0),
            })
        }
    }
}

/// Input sources addressable by name in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputSource {
    Pc,
    Dvi,
    MagicInfo,
    Hdmi1,
    Hdmi1Pc,
    Hdmi2,
    Hdmi2Pc,
    DisplayPort,
    DisplayPort2,
    Hdmi3,
    Hdmi4,
    UrlLauncher,
}

impl InputSource {
    pub const ALL: [InputSource; 12] = [
        InputSource::Pc,
        InputSource::Dvi,
        InputSource::MagicInfo,
        InputSource::Hdmi1,
        InputSource::Hdmi1Pc,
        InputSource::Hdmi2,
        InputSource::Hdmi2Pc,
        InputSource::DisplayPort,
        InputSource::DisplayPort2,
        InputSource::Hdmi3,
        InputSource::Hdmi4,
        InputSource::UrlLauncher,
    ];

    pub const fn code(self) -> u8 {
        match self {
            InputSource::Pc => 0x14,
            InputSource::Dvi => 0x18,
            InputSource::MagicInfo => 0x20,
            InputSource::Hdmi1 => 0x21,
            InputSource::Hdmi1Pc => 0x22,
            InputSource::Hdmi2 => 0x23,
            InputSource::Hdmi2Pc => 0x24,
            InputSource::DisplayPort => 0x25,
            InputSource::DisplayPort2 => 0x26,
            InputSource::Hdmi3 => 0x31,
            InputSource::Hdmi4 => 0x33,
            InputSource::UrlLauncher => 0x63,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            InputSource::Pc => "pc",
            InputSource::Dvi => "dvi",
            InputSource::MagicInfo => "magicinfo",
            InputSource::Hdmi1 => "hdmi1",
            InputSource::Hdmi1Pc => "hdmi1_pc",
            InputSource::Hdmi2 => "hdmi2",
            InputSource::Hdmi2Pc => "hdmi2_pc",
            InputSource::DisplayPort => "displayport",
            InputSource::DisplayPort2 => "displayport2",
            InputSource::Hdmi3 => "hdmi3",
            InputSource::Hdmi4 => "hdmi4",
            InputSource::UrlLauncher => "url_launcher",
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }
}

impl FromStr for InputSource {
    type Err = MdcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let normalized = match normalized.as_str() {
            "display_port" | "dp" => "displayport",
            "display_port2" | "dp2" => "displayport2",
            other => other,
        };
        Self::ALL
            .into_iter()
            .find(|source| source.name() == normalized)
            .ok_or_else(|| MdcError::UnknownInputSource(s.to_string()))
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Low byte of the sum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}
