//! PUBACK, PUBREC, PUBREL and PUBCOMP share one layout: a packet identifier,
//! then in MQTT 5.0 an optional reason code and property block.

use bytes::{Buf, BytesMut};

use hermes_core::{
    codec::{Decoder, Encoder},
    packet_type::PacketType,
    properties::{PropertyContext, PropertyList},
    protocol::ProtocolVersion,
    reason::ReasonCode,
};

use crate::{decode_packet_id, FixedHeader, PacketDecoder};

macro_rules! ack_packet {
    ($(#[$doc:meta])* $name:ident, $packet_type:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            pub protocol_version: ProtocolVersion,
            pub packet_id: u16,
            pub reason_code: ReasonCode,
            pub properties: PropertyList,
        }

        impl $name {
            pub fn new(protocol_version: ProtocolVersion, packet_id: u16) -> Self {
                $name {
                    protocol_version,
                    packet_id,
                    reason_code: ReasonCode::Success,
                    properties: PropertyList::new(),
                }
            }

            fn fixed_header(&self) -> FixedHeader {
                let flags = PacketType::$packet_type.required_flags().unwrap_or_default();
                FixedHeader::new(PacketType::$packet_type, flags, self.remaining_length())
            }

            fn remaining_length(&self) -> usize {
                if !self.protocol_version.supports_properties() {
                    return 2;
                }

                match (self.reason_code, self.properties.is_empty()) {
                    (ReasonCode::Success, true) => 2,
                    (_, true) => 3,
                    _ => 3 + self.properties.block_size(),
                }
            }
        }

        impl Encoder for $name {
            fn encode(&self, buffer: &mut BytesMut) {
                self.fixed_header().encode(buffer);
                self.packet_id.encode(buffer);

                let remaining = self.remaining_length();
                if remaining > 2 {
                    self.reason_code.encode(buffer);
                }
                if remaining > 3 {
                    self.properties.encode_block(buffer);
                }
            }

            fn encoded_size(&self) -> usize {
                self.fixed_header().frame_len()
            }
        }

        impl PacketDecoder for $name {
            fn decode_body<T: Buf>(
                header: &FixedHeader,
                body: &mut T,
                version: ProtocolVersion,
            ) -> hermes_core::Result<Self> {
                let mut packet = $name::new(version, decode_packet_id(body)?);

                if version.supports_properties() && header.remaining_length > 2 {
                    packet.reason_code = ReasonCode::decode(body)?;

                    if header.remaining_length > 3 {
                        packet.properties =
                            PropertyList::decode_block(body, PropertyContext::$packet_type)?;
                    }
                }

                Ok(packet)
            }
        }
    };
}

ack_packet!(
    /// Acknowledges a QoS 1 PUBLISH.
    PubAckPacket,
    PubAck
);
ack_packet!(
    /// First reply in the QoS 2 exchange.
    PubRecPacket,
    PubRec
);
ack_packet!(
    /// Releases a QoS 2 message once PUBREC was seen.
    PubRelPacket,
    PubRel
);
ack_packet!(
    /// Completes the QoS 2 exchange.
    PubCompPacket,
    PubComp
);

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use hermes_core::properties::PropertyType;

    use super::*;
    use crate::ControlPacket;

    #[test]
    fn test_puback_short_form() {
        let packet = PubAckPacket::new(ProtocolVersion::V5, 1);

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);

        assert_eq!(encoded.to_vec(), vec![0x40, 0x02, 0x00, 0x01]);
    }

    #[test]
    fn test_puback_with_reason_and_properties() -> hermes_core::Result<()> {
        let expected = vec![
            0x40, 0x08, 0x00, 0x01, 0x10, 0x04, 0x1f, 0x00, 0x01, b'x',
        ];

        let mut packet = PubAckPacket::new(ProtocolVersion::V5, 1);
        packet.reason_code = ReasonCode::NoMatchingSubscribers;
        packet.properties.push(PropertyType::ReasonString, "x")?;

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), expected);

        let mut src = BytesMut::from(&expected[..]);
        let decoded = ControlPacket::parse_with_version(&mut src, ProtocolVersion::V5)?;
        assert_eq!(decoded, ControlPacket::PubAck(packet));

        Ok(())
    }

    #[test]
    fn test_puback_reason_without_properties() -> hermes_core::Result<()> {
        let mut src = BytesMut::from(&[0x40, 0x03, 0x00, 0x01, 0x10][..]);

        match ControlPacket::parse_with_version(&mut src, ProtocolVersion::V5)? {
            ControlPacket::PubAck(p) => {
                assert_eq!(p.reason_code, ReasonCode::NoMatchingSubscribers);
                assert!(p.properties.is_empty());
            }
            other => panic!("unexpected packet {:?}", other),
        }

        Ok(())
    }

    #[test]
    fn test_pubrel_carries_required_flags() {
        let packet = PubRelPacket::new(ProtocolVersion::V3_1_1, 0x1234);

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);

        assert_eq!(encoded.to_vec(), vec![0x62, 0x02, 0x12, 0x34]);
    }

    #[test]
    fn test_zero_packet_id_rejected() {
        let header = FixedHeader::new(PacketType::PubComp, 0, 2);
        let mut body = Bytes::from_static(&[0x00, 0x00]);

        assert_eq!(
            PubCompPacket::decode_body(&header, &mut body, ProtocolVersion::V5),
            Err(hermes_core::error::Error::InvalidPacketId)
        );
    }
}
