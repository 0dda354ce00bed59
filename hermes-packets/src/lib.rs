pub mod ack;
pub mod connack;
pub mod connect;
pub mod disconnect;
pub mod ping;
pub mod publish;
pub mod suback;
pub mod subscribe;
pub mod unsuback;
pub mod unsubscribe;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use hermes_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    error::Error,
    packet_type::PacketType,
    protocol::ProtocolVersion,
    reason::ReasonCode,
    Result,
};

use crate::{
    ack::{PubAckPacket, PubCompPacket, PubRecPacket, PubRelPacket},
    connack::ConnAckPacket,
    connect::ConnectPacket,
    disconnect::DisconnectPacket,
    ping::{PingReqPacket, PingRespPacket},
    publish::PublishPacket,
    suback::SubAckPacket,
    subscribe::SubscribePacket,
    unsuback::UnsubAckPacket,
    unsubscribe::UnsubscribePacket,
};

/// First byte and remaining length of every control packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    pub remaining_length: u32,
}

impl FixedHeader {
    pub fn new(packet_type: PacketType, flags: u8, remaining_length: usize) -> Self {
        FixedHeader {
            packet_type,
            flags,
            remaining_length: remaining_length as u32,
        }
    }

    /// Bytes taken by the whole packet, header included.
    pub fn frame_len(&self) -> usize {
        self.encoded_size() + self.remaining_length as usize
    }
}

impl Encoder for FixedHeader {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(((self.packet_type as u8) << 4) | (self.flags & 0x0f));
        VariableByteInteger(self.remaining_length).encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        1 + VariableByteInteger(self.remaining_length).encoded_size()
    }
}

impl Decoder for FixedHeader {
    fn decode<T: Buf>(buffer: &mut T) -> Result<Self> {
        let first = u8::decode(buffer)?;
        let packet_type = PacketType::try_from(first >> 4)?;
        let flags = first & 0x0f;

        if let Some(required) = packet_type.required_flags() {
            if flags != required {
                return Err(ReasonCode::MalformedPacket.into());
            }
        }

        let remaining_length = VariableByteInteger::decode(buffer)?.0;

        Ok(FixedHeader {
            packet_type,
            flags,
            remaining_length,
        })
    }
}

/// Packets whose body layout is selected by the negotiated protocol version.
pub trait PacketDecoder: Sized {
    /// Decodes the bytes following the fixed header. `body` holds exactly
    /// `header.remaining_length` bytes.
    fn decode_body<T: Buf>(header: &FixedHeader, body: &mut T, version: ProtocolVersion)
        -> Result<Self>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPacket {
    Connect(ConnectPacket),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PubAck(PubAckPacket),
    PubRec(PubRecPacket),
    PubRel(PubRelPacket),
    PubComp(PubCompPacket),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubAck(UnsubAckPacket),
    PingReq(PingReqPacket),
    PingResp(PingRespPacket),
    Disconnect(DisconnectPacket),
}

impl ControlPacket {
    pub fn packet_type(&self) -> PacketType {
        use ControlPacket::*;

        match self {
            Connect(_) => PacketType::Connect,
            ConnAck(_) => PacketType::ConnAck,
            Publish(_) => PacketType::Publish,
            PubAck(_) => PacketType::PubAck,
            PubRec(_) => PacketType::PubRec,
            PubRel(_) => PacketType::PubRel,
            PubComp(_) => PacketType::PubComp,
            Subscribe(_) => PacketType::Subscribe,
            SubAck(_) => PacketType::SubAck,
            Unsubscribe(_) => PacketType::Unsubscribe,
            UnsubAck(_) => PacketType::UnsubAck,
            PingReq(_) => PacketType::PingReq,
            PingResp(_) => PacketType::PingResp,
            Disconnect(_) => PacketType::Disconnect,
        }
    }

    /// Returns the length of the first frame in `src` once it is fully
    /// buffered, `Error::PacketIncomplete` before that.
    pub fn check(src: &[u8]) -> Result<usize> {
        let mut peeker = src;
        let header = FixedHeader::decode(&mut peeker)?;

        if src.len() >= header.frame_len() {
            return Ok(header.frame_len());
        }

        Err(Error::PacketIncomplete)
    }

    /// Splits one complete packet off the front of `src` and decodes it.
    pub fn parse_with_version(src: &mut BytesMut, version: ProtocolVersion) -> Result<ControlPacket> {
        let frame_len = Self::check(src)?;
        let mut frame = src.split_to(frame_len).freeze();
        let header = FixedHeader::decode(&mut frame)?;

        Self::decode_body(&header, frame, version)
    }

    /// Decodes the body of a packet whose fixed header was already read.
    ///
    /// The body must be consumed exactly: trailing bytes and fields running
    /// past the declared remaining length are both malformed.
    pub fn decode_body(
        header: &FixedHeader,
        mut body: Bytes,
        version: ProtocolVersion,
    ) -> Result<ControlPacket> {
        use ControlPacket::*;

        if body.len() != header.remaining_length as usize {
            return Err(ReasonCode::MalformedPacket.into());
        }

        let body = &mut body;
        let decoded = match header.packet_type {
            PacketType::Connect => ConnectPacket::decode_body(header, body, version).map(Connect),
            PacketType::ConnAck => ConnAckPacket::decode_body(header, body, version).map(ConnAck),
            PacketType::Publish => PublishPacket::decode_body(header, body, version).map(Publish),
            PacketType::PubAck => PubAckPacket::decode_body(header, body, version).map(PubAck),
            PacketType::PubRec => PubRecPacket::decode_body(header, body, version).map(PubRec),
            PacketType::PubRel => PubRelPacket::decode_body(header, body, version).map(PubRel),
            PacketType::PubComp => PubCompPacket::decode_body(header, body, version).map(PubComp),
            PacketType::Subscribe => {
                SubscribePacket::decode_body(header, body, version).map(Subscribe)
            }
            PacketType::SubAck => SubAckPacket::decode_body(header, body, version).map(SubAck),
            PacketType::Unsubscribe => {
                UnsubscribePacket::decode_body(header, body, version).map(Unsubscribe)
            }
            PacketType::UnsubAck => {
                UnsubAckPacket::decode_body(header, body, version).map(UnsubAck)
            }
            PacketType::PingReq => PingReqPacket::decode_body(header, body, version).map(PingReq),
            PacketType::PingResp => {
                PingRespPacket::decode_body(header, body, version).map(PingResp)
            }
            PacketType::Disconnect => {
                DisconnectPacket::decode_body(header, body, version).map(Disconnect)
            }
        };

        let packet = match decoded {
            Err(Error::PacketIncomplete) => return Err(ReasonCode::MalformedPacket.into()),
            other => other?,
        };

        if body.has_remaining() {
            return Err(ReasonCode::MalformedPacket.into());
        }

        Ok(packet)
    }
}

impl Encoder for ControlPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        use ControlPacket::*;

        match self {
            Connect(p) => p.encode(buffer),
            ConnAck(p) => p.encode(buffer),
            Publish(p) => p.encode(buffer),
            PubAck(p) => p.encode(buffer),
            PubRec(p) => p.encode(buffer),
            PubRel(p) => p.encode(buffer),
            PubComp(p) => p.encode(buffer),
            Subscribe(p) => p.encode(buffer),
            SubAck(p) => p.encode(buffer),
            Unsubscribe(p) => p.encode(buffer),
            UnsubAck(p) => p.encode(buffer),
            PingReq(p) => p.encode(buffer),
            PingResp(p) => p.encode(buffer),
            Disconnect(p) => p.encode(buffer),
        }
    }

    fn encoded_size(&self) -> usize {
        use ControlPacket::*;

        match self {
            Connect(p) => p.encoded_size(),
            ConnAck(p) => p.encoded_size(),
            Publish(p) => p.encoded_size(),
            PubAck(p) => p.encoded_size(),
            PubRec(p) => p.encoded_size(),
            PubRel(p) => p.encoded_size(),
            PubComp(p) => p.encoded_size(),
            Subscribe(p) => p.encoded_size(),
            SubAck(p) => p.encoded_size(),
            Unsubscribe(p) => p.encoded_size(),
            UnsubAck(p) => p.encoded_size(),
            PingReq(p) => p.encoded_size(),
            PingResp(p) => p.encoded_size(),
            Disconnect(p) => p.encoded_size(),
        }
    }
}

/// Reads a non-zero packet identifier.
pub(crate) fn decode_packet_id<T: Buf>(buffer: &mut T) -> Result<u16> {
    match u16::decode(buffer)? {
        0 => Err(Error::InvalidPacketId),
        id => Ok(id),
    }
}

#[cfg(test)]
mod tests {
    use hermes_core::qos::QoS;

    use super::*;

    fn round_trip(packet: ControlPacket, version: ProtocolVersion) -> Result<()> {
        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.len(), packet.encoded_size());

        let decoded = ControlPacket::parse_with_version(&mut encoded, version)?;
        assert_eq!(decoded, packet);
        assert!(encoded.is_empty());

        Ok(())
    }

    #[test]
    fn test_round_trip_every_packet_type() -> Result<()> {
        for version in [ProtocolVersion::V3_1_1, ProtocolVersion::V5] {
            let packets = vec![
                ControlPacket::Connect(ConnectPacket::new(version, "test1", 60)),
                ControlPacket::ConnAck(ConnAckPacket::new(version, ReasonCode::Success)),
                ControlPacket::Publish(PublishPacket::new(
                    version,
                    "a/b",
                    QoS::AtLeastOnce,
                    Some(7),
                    Bytes::from_static(b"hello"),
                )),
                ControlPacket::PubAck(PubAckPacket::new(version, 7)),
                ControlPacket::PubRec(PubRecPacket::new(version, 8)),
                ControlPacket::PubRel(PubRelPacket::new(version, 8)),
                ControlPacket::PubComp(PubCompPacket::new(version, 8)),
                ControlPacket::Subscribe(SubscribePacket::new(
                    version,
                    9,
                    vec![subscribe::Subscription::new("a/b", QoS::AtLeastOnce)],
                )),
                ControlPacket::SubAck(SubAckPacket::new(
                    version,
                    9,
                    vec![ReasonCode::GrantedQoS1],
                )),
                ControlPacket::Unsubscribe(UnsubscribePacket::new(
                    version,
                    10,
                    vec!["a/b".to_string()],
                )),
                ControlPacket::UnsubAck(UnsubAckPacket::new(version, 10, vec![])),
                ControlPacket::PingReq(PingReqPacket),
                ControlPacket::PingResp(PingRespPacket),
                ControlPacket::Disconnect(DisconnectPacket::new(version)),
            ];

            for packet in packets {
                round_trip(packet, version)?;
            }
        }

        Ok(())
    }

    #[test]
    fn test_check_waits_for_complete_frame() {
        assert_eq!(ControlPacket::check(&[]), Err(Error::PacketIncomplete));
        assert_eq!(ControlPacket::check(&[0x30]), Err(Error::PacketIncomplete));
        assert_eq!(
            ControlPacket::check(&[0x30, 0x05, 0x00, 0x01]),
            Err(Error::PacketIncomplete)
        );
        assert_eq!(ControlPacket::check(&[0xd0, 0x00, 0xc0]), Ok(2));
    }

    #[test]
    fn test_malformed_remaining_length() {
        assert_eq!(
            ControlPacket::check(&[0x30, 0xff, 0xff, 0xff, 0xff, 0x01]),
            Err(Error::MalformedLength)
        );
    }

    #[test]
    fn test_reject_trailing_bytes() {
        // PINGRESP declaring one body byte
        let mut src = BytesMut::from(&[0xd0, 0x01, 0x00][..]);

        assert_eq!(
            ControlPacket::parse_with_version(&mut src, ProtocolVersion::V5),
            Err(ReasonCode::MalformedPacket.into())
        );
    }

    #[test]
    fn test_reject_short_remaining_length() {
        // PUBACK declaring one byte, packet id needs two
        let mut src = BytesMut::from(&[0x40, 0x01, 0x00][..]);

        assert_eq!(
            ControlPacket::parse_with_version(&mut src, ProtocolVersion::V3_1_1),
            Err(ReasonCode::MalformedPacket.into())
        );
    }

    #[test]
    fn test_string_length_cannot_escape_frame() {
        // SUBSCRIBE whose topic claims 0x10 bytes but the frame holds three;
        // a following packet in the buffer must not be read into it.
        let mut src = BytesMut::from(
            &[
                0x82, 0x06, 0x00, 0x01, 0x00, 0x10, b'a', b'/', 0xc0, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            ][..],
        );

        assert_eq!(
            ControlPacket::parse_with_version(&mut src, ProtocolVersion::V3_1_1),
            Err(ReasonCode::MalformedPacket.into())
        );
    }

    #[test]
    fn test_reject_bad_fixed_header_flags() {
        // PUBREL must carry 0b0010
        let mut src = BytesMut::from(&[0x60, 0x02, 0x00, 0x01][..]);
        assert_eq!(
            ControlPacket::parse_with_version(&mut src, ProtocolVersion::V3_1_1),
            Err(ReasonCode::MalformedPacket.into())
        );

        let mut src = BytesMut::from(&[0xf0, 0x00][..]);
        assert_eq!(
            ControlPacket::parse_with_version(&mut src, ProtocolVersion::V5),
            Err(Error::UnknownPacketType(0x0f))
        );
    }
}
