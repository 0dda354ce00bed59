//! MQTT protocol version handling.

use core::fmt;

use crate::reason::ReasonCode;

/// MQTT protocol version negotiated for a session.
///
/// The wire layout of most packets depends on it: MQTT 5.0 adds a property
/// block after the packet specific fixed fields and reason codes on
/// acknowledgements.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum ProtocolVersion {
    /// MQTT 3.1.1 - Protocol name "MQTT", level 4
    V3_1_1 = 4,
    /// MQTT 5.0 - Protocol name "MQTT", level 5
    #[default]
    V5 = 5,
}

impl ProtocolVersion {
    pub const PROTOCOL_NAME: &'static str = "MQTT";

    /// Returns the protocol level byte for this version.
    pub fn protocol_level(&self) -> u8 {
        *self as u8
    }

    /// Returns true if this version carries property blocks and reason codes.
    pub fn supports_properties(&self) -> bool {
        matches!(self, ProtocolVersion::V5)
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = ReasonCode;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            4 => Ok(ProtocolVersion::V3_1_1),
            5 => Ok(ProtocolVersion::V5),
            _ => Err(ReasonCode::UnsupportedProtocolVersion),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V3_1_1 => write!(f, "MQTT 3.1.1"),
            ProtocolVersion::V5 => write!(f, "MQTT 5.0"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version_from_level() {
        assert_eq!(ProtocolVersion::try_from(4), Ok(ProtocolVersion::V3_1_1));
        assert_eq!(ProtocolVersion::try_from(5), Ok(ProtocolVersion::V5));
        assert_eq!(
            ProtocolVersion::try_from(3),
            Err(ReasonCode::UnsupportedProtocolVersion)
        );
    }

    #[test]
    fn test_supports_properties() {
        assert!(!ProtocolVersion::V3_1_1.supports_properties());
        assert!(ProtocolVersion::V5.supports_properties());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", ProtocolVersion::V3_1_1), "MQTT 3.1.1");
        assert_eq!(format!("{}", ProtocolVersion::V5), "MQTT 5.0");
    }
}
