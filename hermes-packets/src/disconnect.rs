use bytes::{Buf, BytesMut};

use hermes_core::{
    codec::{Decoder, Encoder},
    packet_type::PacketType,
    properties::{PropertyContext, PropertyList},
    protocol::ProtocolVersion,
    reason::ReasonCode,
};

use crate::{FixedHeader, PacketDecoder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectPacket {
    pub protocol_version: ProtocolVersion,
    pub reason_code: ReasonCode,
    pub properties: PropertyList,
}

impl DisconnectPacket {
    pub fn new(protocol_version: ProtocolVersion) -> Self {
        DisconnectPacket {
            protocol_version,
            reason_code: ReasonCode::NormalDisconnection,
            properties: PropertyList::new(),
        }
    }

    fn remaining_length(&self) -> usize {
        if !self.protocol_version.supports_properties() {
            return 0;
        }

        match (self.reason_code, self.properties.is_empty()) {
            (ReasonCode::NormalDisconnection, true) => 0,
            (_, true) => 1,
            _ => 1 + self.properties.block_size(),
        }
    }
}

impl Encoder for DisconnectPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        let remaining = self.remaining_length();
        FixedHeader::new(PacketType::Disconnect, 0, remaining).encode(buffer);

        if remaining > 0 {
            self.reason_code.encode(buffer);
        }
        if remaining > 1 {
            self.properties.encode_block(buffer);
        }
    }

    fn encoded_size(&self) -> usize {
        FixedHeader::new(PacketType::Disconnect, 0, self.remaining_length()).frame_len()
    }
}

impl PacketDecoder for DisconnectPacket {
    fn decode_body<T: Buf>(
        header: &FixedHeader,
        body: &mut T,
        version: ProtocolVersion,
    ) -> hermes_core::Result<Self> {
        let mut packet = DisconnectPacket::new(version);

        if !version.supports_properties() || header.remaining_length == 0 {
            return Ok(packet);
        }

        packet.reason_code = match ReasonCode::decode(body)? {
            ReasonCode::Success => ReasonCode::NormalDisconnection,
            reason => reason,
        };

        if header.remaining_length > 1 {
            packet.properties = PropertyList::decode_block(body, PropertyContext::Disconnect)?;
        }

        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use hermes_core::properties::PropertyType;

    use super::*;
    use crate::ControlPacket;

    #[test]
    fn test_disconnect_with_session_expiry() -> hermes_core::Result<()> {
        let expected = vec![0xe0, 0x07, 0x00, 0x05, 0x11, 0x00, 0x00, 0x00, 0x00];

        let mut packet = DisconnectPacket::new(ProtocolVersion::V5);
        packet.properties.push(PropertyType::SessionExpiryInterval, 0u32)?;

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), expected);

        let decoded = ControlPacket::parse_with_version(&mut encoded, ProtocolVersion::V5)?;
        assert_eq!(decoded, ControlPacket::Disconnect(packet));

        Ok(())
    }

    #[test]
    fn test_server_disconnect_reason() -> hermes_core::Result<()> {
        let mut src = BytesMut::from(&[0xe0, 0x01, 0x8e][..]);

        match ControlPacket::parse_with_version(&mut src, ProtocolVersion::V5)? {
            ControlPacket::Disconnect(p) => assert_eq!(p.reason_code, ReasonCode::SessionTakenOver),
            other => panic!("unexpected packet {:?}", other),
        }

        Ok(())
    }

    #[test]
    fn test_disconnect_v3_1_1_is_empty() {
        let mut encoded = BytesMut::new();
        DisconnectPacket::new(ProtocolVersion::V3_1_1).encode(&mut encoded);

        assert_eq!(encoded.to_vec(), vec![0xe0, 0x00]);
    }
}
