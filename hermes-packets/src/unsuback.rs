use bytes::{Buf, BytesMut};

use hermes_core::{
    codec::{Decoder, Encoder},
    packet_type::PacketType,
    properties::{PropertyContext, PropertyList},
    protocol::ProtocolVersion,
    reason::ReasonCode,
};

use crate::{decode_packet_id, FixedHeader, PacketDecoder};

/// In MQTT 3.1.1 an UNSUBACK is just the packet identifier; reason codes and
/// properties only exist in 5.0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubAckPacket {
    pub protocol_version: ProtocolVersion,
    pub packet_id: u16,
    pub properties: PropertyList,
    pub reason_codes: Vec<ReasonCode>,
}

impl UnsubAckPacket {
    pub fn new(
        protocol_version: ProtocolVersion,
        packet_id: u16,
        reason_codes: Vec<ReasonCode>,
    ) -> Self {
        UnsubAckPacket {
            protocol_version,
            packet_id,
            properties: PropertyList::new(),
            reason_codes,
        }
    }

    fn fixed_header(&self) -> FixedHeader {
        let mut len = self.packet_id.encoded_size();

        if self.protocol_version.supports_properties() {
            len += self.properties.block_size() + self.reason_codes.len();
        }

        FixedHeader::new(PacketType::UnsubAck, 0, len)
    }
}

impl Encoder for UnsubAckPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        self.fixed_header().encode(buffer);
        self.packet_id.encode(buffer);

        if self.protocol_version.supports_properties() {
            self.properties.encode_block(buffer);
            self.reason_codes.encode(buffer);
        }
    }

    fn encoded_size(&self) -> usize {
        self.fixed_header().frame_len()
    }
}

impl PacketDecoder for UnsubAckPacket {
    fn decode_body<T: Buf>(
        _header: &FixedHeader,
        body: &mut T,
        version: ProtocolVersion,
    ) -> hermes_core::Result<Self> {
        let mut packet = UnsubAckPacket::new(version, decode_packet_id(body)?, Vec::new());

        if version.supports_properties() {
            packet.properties = PropertyList::decode_block(body, PropertyContext::UnsubAck)?;

            while body.has_remaining() {
                packet.reason_codes.push(ReasonCode::decode(body)?);
            }
        }

        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ControlPacket;

    #[test]
    fn test_unsuback_v5_reason_codes() -> hermes_core::Result<()> {
        let mut src = BytesMut::from(&[0xb0, 0x05, 0x00, 0x03, 0x00, 0x00, 0x11][..]);

        match ControlPacket::parse_with_version(&mut src, ProtocolVersion::V5)? {
            ControlPacket::UnsubAck(p) => {
                assert_eq!(p.packet_id, 3);
                assert_eq!(
                    p.reason_codes,
                    vec![ReasonCode::Success, ReasonCode::NoSubscriptionExisted]
                );
            }
            other => panic!("unexpected packet {:?}", other),
        }

        Ok(())
    }

    #[test]
    fn test_unsuback_v3_1_1_has_no_payload() {
        let mut src = BytesMut::from(&[0xb0, 0x03, 0x00, 0x03, 0x00][..]);

        assert_eq!(
            ControlPacket::parse_with_version(&mut src, ProtocolVersion::V3_1_1),
            Err(ReasonCode::MalformedPacket.into())
        );
    }
}
