//! Common types for the LaneGate environment abstraction.

use serde::{Deserialize, Serialize};

/// Desired state of a lane lamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LampState {
    On,
    Off,
}

impl LampState {
    /// Wire token for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            LampState::On => "ON",
            LampState::Off => "OFF",
        }
    }
}

impl std::fmt::Display for LampState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single command addressed to a physical actuator channel.
///
/// Lanes are mapped to channels by the controller configuration; the
/// transport only ever sees channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorFrame {
    /// Output channel on the signal head controller
    pub channel: u8,

    /// Requested lamp state
    pub state: LampState,
}

impl ActuatorFrame {
    /// Creates a new frame.
    pub fn new(channel: u8, state: LampState) -> Self {
        Self { channel, state }
    }

    /// Encodes the frame as `"{channel}:{ON|OFF}"`.
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl std::fmt::Display for ActuatorFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.channel, self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_encoding() {
        assert_eq!(ActuatorFrame::new(3, LampState::On).encode(), b"3:ON".to_vec());
        assert_eq!(ActuatorFrame::new(12, LampState::Off).encode(), b"12:OFF".to_vec());
    }

    #[test]
    fn test_lamp_state_serde_uppercase() {
        assert_eq!(LampState::On.as_str(), "ON");
        assert_eq!(format!("{}", LampState::Off), "OFF");
    }
}
