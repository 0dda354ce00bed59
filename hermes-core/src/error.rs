use thiserror::Error;

use crate::{
    properties::{DataType, PropertyContext, PropertyType},
    reason::ReasonCode,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Packet is not complete")]
    PacketIncomplete,

    #[error("Malformed variable byte integer")]
    MalformedLength,

    #[error("MQTT Error: {0}")]
    MQTTReasonCode(#[from] ReasonCode),

    #[error("Unknown packet type: {0:#x}")]
    UnknownPacketType(u8),

    #[error("Packet identifier must not be zero")]
    InvalidPacketId,

    #[error("{0} bytes do not fit a length prefixed field")]
    FieldTooLong(usize),

    #[error("Unknown property identifier: {0:#04x}")]
    UnknownProperty(u32),

    #[error("Property {property:?} is not allowed in {context:?}")]
    PropertyNotAllowed {
        property: PropertyType,
        context: PropertyContext,
    },

    #[error("Property {property:?} holds a {expected:?} value")]
    PropertyValue {
        property: PropertyType,
        expected: DataType,
    },
}

impl Error {
    /// Returns true for errors raised while validating MQTT v5 properties.
    pub fn is_property_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownProperty(_)
                | Error::PropertyNotAllowed { .. }
                | Error::PropertyValue { .. }
        )
    }
}
