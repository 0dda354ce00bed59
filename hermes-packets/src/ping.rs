use bytes::{Buf, BytesMut};

use hermes_core::{codec::Encoder, packet_type::PacketType, protocol::ProtocolVersion};

use crate::{FixedHeader, PacketDecoder};

macro_rules! empty_packet {
    ($(#[$doc:meta])* $name:ident, $packet_type:ident) => {
        $(#[$doc])*
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
        pub struct $name;

        impl Encoder for $name {
            fn encode(&self, buffer: &mut BytesMut) {
                FixedHeader::new(PacketType::$packet_type, 0, 0).encode(buffer);
            }

            fn encoded_size(&self) -> usize {
                2
            }
        }

        impl PacketDecoder for $name {
            fn decode_body<T: Buf>(
                _header: &FixedHeader,
                _body: &mut T,
                _version: ProtocolVersion,
            ) -> hermes_core::Result<Self> {
                Ok($name)
            }
        }
    };
}

empty_packet!(
    /// Keep-alive probe sent by the client.
    PingReqPacket,
    PingReq
);
empty_packet!(PingRespPacket, PingResp);
