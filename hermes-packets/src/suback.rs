use bytes::{Buf, BufMut, BytesMut};

use hermes_core::{
    codec::{Decoder, Encoder},
    packet_type::PacketType,
    properties::{PropertyContext, PropertyList},
    protocol::ProtocolVersion,
    qos::QoS,
    reason::ReasonCode,
};

use crate::{decode_packet_id, FixedHeader, PacketDecoder};

fn decode_reason<T: Buf>(body: &mut T, version: ProtocolVersion) -> hermes_core::Result<ReasonCode> {
    if version.supports_properties() {
        return match ReasonCode::decode(body)? {
            ReasonCode::Success => Ok(ReasonCode::GrantedQoS0),
            reason => Ok(reason),
        };
    }

    match u8::decode(body)? {
        0x00 => Ok(ReasonCode::GrantedQoS0),
        0x01 => Ok(ReasonCode::GrantedQoS1),
        0x02 => Ok(ReasonCode::GrantedQoS2),
        0x80 => Ok(ReasonCode::UnspecifiedError),
        _ => Err(ReasonCode::MalformedPacket.into()),
    }
}

fn encode_reason(reason: ReasonCode, version: ProtocolVersion) -> u8 {
    if version.supports_properties() || !reason.is_error() {
        reason.get_code()
    } else {
        0x80
    }
}

/// The QoS a SUBACK reason code grants, `None` for a refused filter.
pub fn granted_qos(reason: ReasonCode) -> Option<QoS> {
    match reason {
        ReasonCode::GrantedQoS0 | ReasonCode::Success => Some(QoS::AtMostOnce),
        ReasonCode::GrantedQoS1 => Some(QoS::AtLeastOnce),
        ReasonCode::GrantedQoS2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAckPacket {
    pub protocol_version: ProtocolVersion,
    pub packet_id: u16,
    pub properties: PropertyList,
    /// One entry per filter of the matching SUBSCRIBE, in order.
    pub reason_codes: Vec<ReasonCode>,
}

impl SubAckPacket {
    pub fn new(
        protocol_version: ProtocolVersion,
        packet_id: u16,
        reason_codes: Vec<ReasonCode>,
    ) -> Self {
        SubAckPacket {
            protocol_version,
            packet_id,
            properties: PropertyList::new(),
            reason_codes,
        }
    }

    fn fixed_header(&self) -> FixedHeader {
        let mut len = self.packet_id.encoded_size() + self.reason_codes.len();

        if self.protocol_version.supports_properties() {
            len += self.properties.block_size();
        }

        FixedHeader::new(PacketType::SubAck, 0, len)
    }
}

impl Encoder for SubAckPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        self.fixed_header().encode(buffer);
        self.packet_id.encode(buffer);

        if self.protocol_version.supports_properties() {
            self.properties.encode_block(buffer);
        }

        for reason in &self.reason_codes {
            buffer.put_u8(encode_reason(*reason, self.protocol_version));
        }
    }

    fn encoded_size(&self) -> usize {
        self.fixed_header().frame_len()
    }
}

impl PacketDecoder for SubAckPacket {
    fn decode_body<T: Buf>(
        _header: &FixedHeader,
        body: &mut T,
        version: ProtocolVersion,
    ) -> hermes_core::Result<Self> {
        let mut packet = SubAckPacket::new(version, decode_packet_id(body)?, Vec::new());

        if version.supports_properties() {
            packet.properties = PropertyList::decode_block(body, PropertyContext::SubAck)?;
        }

        while body.has_remaining() {
            packet.reason_codes.push(decode_reason(body, version)?);
        }

        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ControlPacket;

    fn parse(bytes: &[u8], version: ProtocolVersion) -> hermes_core::Result<SubAckPacket> {
        let mut src = BytesMut::from(bytes);
        match ControlPacket::parse_with_version(&mut src, version)? {
            ControlPacket::SubAck(p) => Ok(p),
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_suback_v5() -> hermes_core::Result<()> {
        let packet = parse(&[0x90, 0x06, 0x00, 0x01, 0x00, 0x00, 0x02, 0x97], ProtocolVersion::V5)?;

        assert_eq!(
            packet.reason_codes,
            vec![
                ReasonCode::GrantedQoS0,
                ReasonCode::GrantedQoS2,
                ReasonCode::QuotaExceeded
            ]
        );
        assert_eq!(granted_qos(packet.reason_codes[1]), Some(QoS::ExactlyOnce));
        assert_eq!(granted_qos(packet.reason_codes[2]), None);

        Ok(())
    }

    #[test]
    fn test_suback_v3_1_1_failure() -> hermes_core::Result<()> {
        let bytes = [0x90, 0x04, 0x00, 0x05, 0x01, 0x80];
        let packet = parse(&bytes, ProtocolVersion::V3_1_1)?;

        assert_eq!(packet.packet_id, 5);
        assert_eq!(
            packet.reason_codes,
            vec![ReasonCode::GrantedQoS1, ReasonCode::UnspecifiedError]
        );

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), bytes.to_vec());

        Ok(())
    }

    #[test]
    fn test_suback_v3_1_1_unknown_code() {
        assert_eq!(
            parse(&[0x90, 0x03, 0x00, 0x05, 0x03], ProtocolVersion::V3_1_1),
            Err(ReasonCode::MalformedPacket.into())
        );
    }
}
