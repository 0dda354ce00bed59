use bytes::{Buf, BufMut, BytesMut};

use hermes_core::{
    codec::{Decoder, Encoder},
    packet_type::PacketType,
    properties::{PropertyContext, PropertyList},
    protocol::ProtocolVersion,
    reason::ReasonCode,
};

use crate::{FixedHeader, PacketDecoder};

/// MQTT 3.1.1 connect return codes, mapped onto reason codes.
fn reason_from_v3(return_code: u8) -> hermes_core::Result<ReasonCode> {
    let reason = match return_code {
        0x00 => ReasonCode::Success,
        0x01 => ReasonCode::UnsupportedProtocolVersion,
        0x02 => ReasonCode::ClientIdentifierNotValid,
        0x03 => ReasonCode::ServerUnavailable,
        0x04 => ReasonCode::BadUserNameOrPassword,
        0x05 => ReasonCode::NotAuthorized,
        _ => return Err(ReasonCode::MalformedPacket.into()),
    };

    Ok(reason)
}

fn reason_to_v3(reason: ReasonCode) -> u8 {
    match reason {
        ReasonCode::Success => 0x00,
        ReasonCode::UnsupportedProtocolVersion => 0x01,
        ReasonCode::ClientIdentifierNotValid => 0x02,
        ReasonCode::BadUserNameOrPassword => 0x04,
        ReasonCode::NotAuthorized => 0x05,
        _ => 0x03,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnAckPacket {
    pub protocol_version: ProtocolVersion,
    pub session_present: bool,
    pub reason_code: ReasonCode,
    pub properties: PropertyList,
}

impl ConnAckPacket {
    pub fn new(protocol_version: ProtocolVersion, reason_code: ReasonCode) -> Self {
        ConnAckPacket {
            protocol_version,
            session_present: false,
            reason_code,
            properties: PropertyList::new(),
        }
    }

    fn fixed_header(&self) -> FixedHeader {
        let mut remaining_len = 2;

        if self.protocol_version.supports_properties() {
            remaining_len += self.properties.block_size();
        }

        FixedHeader::new(PacketType::ConnAck, 0, remaining_len)
    }
}

impl Encoder for ConnAckPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        self.fixed_header().encode(buffer);
        buffer.put_u8(self.session_present as u8);

        if self.protocol_version.supports_properties() {
            self.reason_code.encode(buffer);
            self.properties.encode_block(buffer);
        } else {
            buffer.put_u8(reason_to_v3(self.reason_code));
        }
    }

    fn encoded_size(&self) -> usize {
        self.fixed_header().frame_len()
    }
}

impl PacketDecoder for ConnAckPacket {
    fn decode_body<T: Buf>(
        _header: &FixedHeader,
        body: &mut T,
        version: ProtocolVersion,
    ) -> hermes_core::Result<Self> {
        let flags = u8::decode(body)?;
        if (0b1111_1110 & flags) != 0 {
            return Err(ReasonCode::MalformedPacket.into());
        }

        let mut packet = ConnAckPacket::new(version, ReasonCode::Success);
        packet.session_present = (flags & 0b0000_0001) != 0;

        if version.supports_properties() {
            packet.reason_code = ReasonCode::decode(body)?;
            packet.properties = PropertyList::decode_block(body, PropertyContext::ConnAck)?;
        } else {
            packet.reason_code = reason_from_v3(u8::decode(body)?)?;
        }

        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use hermes_core::properties::{PropertyType, PropertyValue};

    use super::*;
    use crate::ControlPacket;

    fn parse(bytes: &[u8], version: ProtocolVersion) -> hermes_core::Result<ConnAckPacket> {
        let mut src = BytesMut::from(bytes);
        match ControlPacket::parse_with_version(&mut src, version)? {
            ControlPacket::ConnAck(p) => Ok(p),
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_connack_from_broker() -> hermes_core::Result<()> {
        let bytes = vec![
            0x20, 0x45, 0x0, 0x0, 0x42, 0x25, 0x1, 0x27, 0x0, 0x10, 0x0, 0x0, 0x12, 0x0, 0x2f,
            0x4d, 0x7a, 0x41, 0x77, 0x4e, 0x7a, 0x45, 0x7a, 0x4e, 0x54, 0x55, 0x32, 0x4d, 0x6a,
            0x4d, 0x7a, 0x4d, 0x6a, 0x4d, 0x34, 0x4f, 0x44, 0x45, 0x32, 0x4d, 0x7a, 0x41, 0x77,
            0x4f, 0x54, 0x63, 0x7a, 0x4e, 0x54, 0x49, 0x34, 0x4e, 0x54, 0x41, 0x35, 0x4f, 0x54,
            0x63, 0x79, 0x4e, 0x44, 0x49, 0x22, 0xff, 0xff, 0x28, 0x1, 0x29, 0x1, 0x2a, 0x1,
        ];

        let packet = parse(&bytes, ProtocolVersion::V5)?;

        assert!(!packet.session_present);
        assert_eq!(packet.reason_code, ReasonCode::Success);
        assert_eq!(packet.properties.len(), 7);
        assert_eq!(
            packet.properties.get(PropertyType::MaximumPacketSize),
            Some(&PropertyValue::FourByteInteger(1048576))
        );
        assert_eq!(
            packet
                .properties
                .get(PropertyType::AssignedClientIdentifier)
                .and_then(PropertyValue::as_str),
            Some("MzAwNzEzNTU2MjMzMjM4ODE2MzAwOTczNTI4NTA5OTcyNDI")
        );
        assert_eq!(
            packet.properties.get(PropertyType::TopicAliasMaximum),
            Some(&PropertyValue::TwoByteInteger(65535))
        );

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), bytes);

        Ok(())
    }

    #[test]
    fn test_connack_v3_1_1() -> hermes_core::Result<()> {
        let accepted = parse(&[0x20, 0x02, 0x00, 0x00], ProtocolVersion::V3_1_1)?;
        assert_eq!(accepted.reason_code, ReasonCode::Success);
        assert!(accepted.properties.is_empty());

        let refused = parse(&[0x20, 0x02, 0x01, 0x05], ProtocolVersion::V3_1_1)?;
        assert!(refused.session_present);
        assert_eq!(refused.reason_code, ReasonCode::NotAuthorized);

        let mut encoded = BytesMut::new();
        refused.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), vec![0x20, 0x02, 0x01, 0x05]);

        Ok(())
    }

    #[test]
    fn test_connack_reserved_flags() {
        assert_eq!(
            parse(&[0x20, 0x02, 0x02, 0x00], ProtocolVersion::V3_1_1),
            Err(ReasonCode::MalformedPacket.into())
        );
        assert_eq!(
            parse(&[0x20, 0x02, 0x00, 0x06], ProtocolVersion::V3_1_1),
            Err(ReasonCode::MalformedPacket.into())
        );
    }

    #[test]
    fn test_connack_rejects_connect_only_property() {
        // request problem information in a CONNACK
        assert_eq!(
            parse(&[0x20, 0x05, 0x00, 0x00, 0x02, 0x17, 0x01], ProtocolVersion::V5),
            Err(hermes_core::error::Error::PropertyNotAllowed {
                property: PropertyType::RequestProblemInformation,
                context: PropertyContext::ConnAck,
            })
        );
    }
}
