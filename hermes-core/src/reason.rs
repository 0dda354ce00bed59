//! MQTT reason codes as defined in the MQTT specification.

use bytes::Buf;
use core::fmt;

use crate::codec::{Decoder, Encoder};

macro_rules! reason_codes {
    ($($name:ident = $code:literal => $text:literal,)*) => {
        /// MQTT reason code used in various packets to indicate success or failure.
        ///
        /// Several codes share the value `0x00`; decoding a bare byte yields
        /// the first listed variant, packets that need another reading map it
        /// themselves.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub enum ReasonCode {
            #[default]
            $($name,)*
        }

        impl ReasonCode {
            pub fn get_code(&self) -> u8 {
                match *self {
                    $(ReasonCode::$name => $code,)*
                }
            }

            pub fn from_code(code: u8) -> Option<ReasonCode> {
                $(if code == $code {
                    return Some(ReasonCode::$name);
                })*
                None
            }
        }

        impl fmt::Display for ReasonCode {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let msg = match self {
                    $(ReasonCode::$name => $text,)*
                };
                write!(f, "{}", msg)
            }
        }
    };
}

reason_codes! {
    Success = 0x00 => "Success",
    NormalDisconnection = 0x00 => "Normal disconnection",
    GrantedQoS0 = 0x00 => "Granted QoS 0",
    GrantedQoS1 = 0x01 => "Granted QoS 1",
    GrantedQoS2 = 0x02 => "Granted QoS 2",
    DisconnectWithWillMessage = 0x04 => "Disconnect with will message",
    NoMatchingSubscribers = 0x10 => "No matching subscribers",
    NoSubscriptionExisted = 0x11 => "No subscription existed",
    ContinueAuthentication = 0x18 => "Continue authentication",
    ReAuthenticate = 0x19 => "Re-authenticate",
    UnspecifiedError = 0x80 => "Unspecified error",
    MalformedPacket = 0x81 => "Malformed packet",
    ProtocolError = 0x82 => "Protocol error",
    ImplementationSpecificError = 0x83 => "Implementation specific error",
    UnsupportedProtocolVersion = 0x84 => "Unsupported protocol version",
    ClientIdentifierNotValid = 0x85 => "Client identifier not valid",
    BadUserNameOrPassword = 0x86 => "Bad user name or password",
    NotAuthorized = 0x87 => "Not authorized",
    ServerUnavailable = 0x88 => "Server unavailable",
    ServerBusy = 0x89 => "Server busy",
    Banned = 0x8a => "Banned",
    ServerShuttingDown = 0x8b => "Server shutting down",
    BadAuthenticationMethod = 0x8c => "Bad authentication method",
    KeepAliveTimeout = 0x8d => "Keep alive timeout",
    SessionTakenOver = 0x8e => "Session taken over",
    TopicFilterInvalid = 0x8f => "Topic filter invalid",
    TopicNameInvalid = 0x90 => "Topic name invalid",
    PacketIdentifierInUse = 0x91 => "Packet identifier in use",
    PacketIdentifierNotFound = 0x92 => "Packet identifier not found",
    ReceiveMaximumExceeded = 0x93 => "Receive maximum exceeded",
    TopicAliasInvalid = 0x94 => "Topic alias invalid",
    PacketTooLarge = 0x95 => "Packet too large",
    MessageRateTooHigh = 0x96 => "Message rate too high",
    QuotaExceeded = 0x97 => "Quota exceeded",
    AdministrativeAction = 0x98 => "Administrative action",
    PayloadFormatInvalid = 0x99 => "Payload format invalid",
    RetainNotSupported = 0x9a => "Retain not supported",
    QoSNotSupported = 0x9b => "QoS not supported",
    UseAnotherServer = 0x9c => "Use another server",
    ServerMoved = 0x9d => "Server moved",
    SharedSubscriptionsNotSupported = 0x9e => "Shared subscriptions not supported",
    ConnectionRateExceeded = 0x9f => "Connection rate exceeded",
    MaximumConnectTime = 0xa0 => "Maximum connect time",
    SubscriptionIdentifiersNotSupported = 0xa1 => "Subscription identifiers not supported",
    WildcardSubscriptionsNotSupported = 0xa2 => "Wildcard subscriptions not supported",
}

impl std::error::Error for ReasonCode {}

impl ReasonCode {
    /// Codes of 0x80 and above report a failure.
    pub fn is_error(&self) -> bool {
        self.get_code() >= 0x80
    }
}

impl Encoder for ReasonCode {
    fn encode(&self, buffer: &mut bytes::BytesMut) {
        self.get_code().encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.get_code().encoded_size()
    }
}

impl Decoder for ReasonCode {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let code = u8::decode(buffer)?;

        ReasonCode::from_code(code).ok_or_else(|| ReasonCode::MalformedPacket.into())
    }
}
