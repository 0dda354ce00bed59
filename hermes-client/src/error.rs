use hermes_core::{
    error::Error as PacketError, packet_type::PacketType, properties::PropertyType,
    reason::ReasonCode,
};
use thiserror::Error;

use crate::network::NetError;
use crate::return_code::ReturnCode;

/// Errors that can occur in the MQTT client engine.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed by peer")]
    Closed,

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("Unexpected {0} packet")]
    UnexpectedPacket(PacketType),

    #[error("Server sent an invalid {0:?}")]
    ServerProperty(PropertyType),

    #[error("Bad argument: {0}")]
    BadArgument(String),

    #[error("Packet does not fit the buffer or the maximum packet size")]
    OutOfBuffer,

    #[error("Timeout")]
    Timeout,

    #[error("No PINGRESP within the command timeout")]
    PingTimeout,

    #[error("Connection refused: {0}")]
    ConnectionRefused(ReasonCode),

    #[error("Server disconnected: {0}")]
    ServerDisconnect(ReasonCode),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Another operation is in progress")]
    BadState,

    #[error("Message callback failed: {0}")]
    Callback(String),

    #[error("Property callback failed: {0}")]
    PropertyCallback(String),

    #[error("Message fragment out of order: {0}")]
    Reassembly(String),

    #[error("Every packet identifier is in use")]
    PacketIdExhausted,

    #[error("Acknowledgement for unknown packet identifier {0}")]
    UnknownPacketId(u16),

    #[error("Woken up by an auxiliary input")]
    Wake,
}

impl ClientError {
    pub fn code(&self) -> ReturnCode {
        match self {
            ClientError::Io(_)
            | ClientError::Closed
            | ClientError::PingTimeout
            | ClientError::ConnectionRefused(_)
            | ClientError::ServerDisconnect(_) => ReturnCode::Network,
            ClientError::Packet(e) => match e {
                PacketError::UnknownPacketType(_) => ReturnCode::BadPacketType,
                PacketError::InvalidPacketId => ReturnCode::BadPacketId,
                PacketError::FieldTooLong(_) => ReturnCode::BadArgument,
                e if e.is_property_error() => ReturnCode::Property,
                _ => ReturnCode::MalformedData,
            },
            ClientError::UnexpectedPacket(_) => ReturnCode::BadPacketType,
            ClientError::ServerProperty(_) => ReturnCode::ServerProperty,
            ClientError::BadArgument(_) => ReturnCode::BadArgument,
            ClientError::OutOfBuffer => ReturnCode::OutOfBuffer,
            ClientError::Timeout => ReturnCode::Timeout,
            ClientError::Tls(_) => ReturnCode::TlsConnect,
            ClientError::BadState => ReturnCode::BadState,
            ClientError::Callback(_) => ReturnCode::Callback,
            ClientError::PropertyCallback(_) => ReturnCode::Property,
            ClientError::Reassembly(_) => ReturnCode::MalformedData,
            ClientError::PacketIdExhausted => ReturnCode::OutOfMemory,
            ClientError::UnknownPacketId(_) => ReturnCode::BadPacketId,
            ClientError::Wake => ReturnCode::StdinWake,
        }
    }

    /// Errors after which the transport can no longer be trusted.
    pub fn is_network(&self) -> bool {
        self.code() == ReturnCode::Network
    }
}

impl From<ReasonCode> for ClientError {
    fn from(reason: ReasonCode) -> Self {
        ClientError::Packet(reason.into())
    }
}

impl From<NetError> for ClientError {
    fn from(e: NetError) -> Self {
        match e {
            NetError::Io(e) => ClientError::Io(e),
            NetError::Closed => ClientError::Closed,
            NetError::Timeout | NetError::WouldBlock => ClientError::Timeout,
            NetError::Tls(msg) => ClientError::Tls(msg),
            NetError::Wake => ClientError::Wake,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_errors_map_to_codes() {
        let cases = [
            (PacketError::MalformedLength, ReturnCode::MalformedData),
            (PacketError::UnknownPacketType(0), ReturnCode::BadPacketType),
            (PacketError::InvalidPacketId, ReturnCode::BadPacketId),
            (PacketError::UnknownProperty(0x7f), ReturnCode::Property),
            (PacketError::FieldTooLong(70_000), ReturnCode::BadArgument),
            (ReasonCode::MalformedPacket.into(), ReturnCode::MalformedData),
        ];

        for (error, code) in cases {
            assert_eq!(ClientError::Packet(error).code(), code);
        }
    }

    #[test]
    fn test_engine_errors_map_to_codes() {
        assert_eq!(ClientError::PacketIdExhausted.code(), ReturnCode::OutOfMemory);
        assert_eq!(ClientError::UnknownPacketId(3).code(), ReturnCode::BadPacketId);
        assert_eq!(
            ClientError::ConnectionRefused(ReasonCode::NotAuthorized).code(),
            ReturnCode::Network
        );
        assert_eq!(ClientError::Reassembly("x".into()).code(), ReturnCode::MalformedData);
        assert_eq!(ClientError::from(NetError::Wake).code(), ReturnCode::StdinWake);
        assert!(ClientError::PingTimeout.is_network());
        assert!(!ClientError::Timeout.is_network());
    }
}
