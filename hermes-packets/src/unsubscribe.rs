use bytes::{Buf, BytesMut};

use hermes_core::{
    codec::{Decoder, Encoder},
    packet_type::PacketType,
    properties::{PropertyContext, PropertyList},
    protocol::ProtocolVersion,
    reason::ReasonCode,
};

use crate::{decode_packet_id, FixedHeader, PacketDecoder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribePacket {
    pub protocol_version: ProtocolVersion,
    pub packet_id: u16,
    pub properties: PropertyList,
    pub filters: Vec<String>,
}

impl UnsubscribePacket {
    pub fn new(protocol_version: ProtocolVersion, packet_id: u16, filters: Vec<String>) -> Self {
        UnsubscribePacket {
            protocol_version,
            packet_id,
            properties: PropertyList::new(),
            filters,
        }
    }

    fn fixed_header(&self) -> FixedHeader {
        let mut len = self.packet_id.encoded_size() + self.filters.encoded_size();

        if self.protocol_version.supports_properties() {
            len += self.properties.block_size();
        }

        FixedHeader::new(PacketType::Unsubscribe, 0b0010, len)
    }
}

impl Encoder for UnsubscribePacket {
    fn encode(&self, buffer: &mut BytesMut) {
        self.fixed_header().encode(buffer);
        self.packet_id.encode(buffer);

        if self.protocol_version.supports_properties() {
            self.properties.encode_block(buffer);
        }

        self.filters.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.fixed_header().frame_len()
    }
}

impl PacketDecoder for UnsubscribePacket {
    fn decode_body<T: Buf>(
        _header: &FixedHeader,
        body: &mut T,
        version: ProtocolVersion,
    ) -> hermes_core::Result<Self> {
        let mut packet = UnsubscribePacket::new(version, decode_packet_id(body)?, Vec::new());

        if version.supports_properties() {
            packet.properties = PropertyList::decode_block(body, PropertyContext::Unsubscribe)?;
        }

        while body.has_remaining() {
            packet.filters.push(String::decode(body)?);
        }

        if packet.filters.is_empty() {
            return Err(ReasonCode::ProtocolError.into());
        }

        Ok(packet)
    }
}
