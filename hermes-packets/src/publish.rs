use bytes::{Buf, Bytes, BytesMut};

use hermes_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    error::Error,
    packet_type::PacketType,
    properties::{PropertyContext, PropertyList},
    protocol::ProtocolVersion,
    qos::QoS,
    reason::ReasonCode,
};

use crate::{decode_packet_id, FixedHeader, PacketDecoder};

const DUP: u8 = 0b0000_1000;
const RETAIN: u8 = 0b0000_0001;

fn qos_from_flags(flags: u8) -> hermes_core::Result<QoS> {
    let qos = QoS::try_from((flags >> 1) & 0b0000_0011)?;

    if qos == QoS::AtMostOnce && (flags & DUP) != 0 {
        return Err(ReasonCode::MalformedPacket.into());
    }

    Ok(qos)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPacket {
    pub protocol_version: ProtocolVersion,
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    /// Present iff `qos` is above at-most-once.
    pub packet_id: Option<u16>,
    pub properties: PropertyList,
    pub payload: Bytes,
}

impl PublishPacket {
    pub fn new(
        protocol_version: ProtocolVersion,
        topic: impl Into<String>,
        qos: QoS,
        packet_id: Option<u16>,
        payload: Bytes,
    ) -> Self {
        PublishPacket {
            protocol_version,
            dup: false,
            qos,
            retain: false,
            topic: topic.into(),
            packet_id,
            properties: PropertyList::new(),
            payload,
        }
    }

    fn flags(&self) -> u8 {
        let mut flags = (self.qos as u8) << 1;

        if self.dup {
            flags |= DUP;
        }

        if self.retain {
            flags |= RETAIN;
        }

        flags
    }

    fn variable_header_size(&self) -> usize {
        let mut len = self.topic.encoded_size();

        if self.qos.needs_packet_id() {
            len += 2;
        }

        if self.protocol_version.supports_properties() {
            len += self.properties.block_size();
        }

        len
    }

    pub fn fixed_header(&self) -> FixedHeader {
        FixedHeader::new(
            PacketType::Publish,
            self.flags(),
            self.variable_header_size() + self.payload.len(),
        )
    }

    /// Size of everything in front of the payload.
    pub fn header_size(&self) -> usize {
        self.fixed_header().encoded_size() + self.variable_header_size()
    }

    /// Writes the fixed and variable headers only. The remaining length
    /// still covers the payload, which the caller sends separately.
    pub fn encode_header(&self, buffer: &mut BytesMut) {
        self.fixed_header().encode(buffer);
        self.topic.encode(buffer);

        if self.qos.needs_packet_id() {
            self.packet_id.unwrap_or_default().encode(buffer);
        }

        if self.protocol_version.supports_properties() {
            self.properties.encode_block(buffer);
        }
    }

    /// Works out how many body bytes the variable header of an incoming
    /// PUBLISH occupies, looking only at the bytes buffered so far.
    ///
    /// Returns `Ok(None)` while `buf` is too short to tell.
    pub fn variable_header_len(
        header: &FixedHeader,
        buf: &[u8],
        version: ProtocolVersion,
    ) -> hermes_core::Result<Option<usize>> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let mut len = 2 + u16::from_be_bytes([buf[0], buf[1]]) as usize;

        if qos_from_flags(header.flags)?.needs_packet_id() {
            len += 2;
        }

        if version.supports_properties() {
            let mut block = match buf.get(len..) {
                Some(rest) if !rest.is_empty() => rest,
                _ => return Ok(None),
            };

            match VariableByteInteger::decode(&mut block) {
                Ok(block_len) => len += block_len.encoded_size() + block_len.0 as usize,
                Err(Error::PacketIncomplete) => return Ok(None),
                Err(e) => return Err(e),
            }
        }

        if len > header.remaining_length as usize {
            return Err(ReasonCode::MalformedPacket.into());
        }

        Ok(Some(len))
    }

    /// Decodes topic, packet identifier and properties, leaving the payload
    /// empty.
    pub fn decode_variable_header<T: Buf>(
        header: &FixedHeader,
        body: &mut T,
        version: ProtocolVersion,
    ) -> hermes_core::Result<Self> {
        let qos = qos_from_flags(header.flags)?;
        let topic = String::decode(body)?;

        let packet_id = if qos.needs_packet_id() {
            Some(decode_packet_id(body)?)
        } else {
            None
        };

        let properties = if version.supports_properties() {
            PropertyList::decode_block(body, PropertyContext::Publish)?
        } else {
            PropertyList::new()
        };

        Ok(PublishPacket {
            protocol_version: version,
            dup: (header.flags & DUP) != 0,
            qos,
            retain: (header.flags & RETAIN) != 0,
            topic,
            packet_id,
            properties,
            payload: Bytes::new(),
        })
    }
}

impl Encoder for PublishPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        self.encode_header(buffer);
        buffer.extend_from_slice(&self.payload);
    }

    fn encoded_size(&self) -> usize {
        self.fixed_header().frame_len()
    }
}

impl PacketDecoder for PublishPacket {
    fn decode_body<T: Buf>(
        header: &FixedHeader,
        body: &mut T,
        version: ProtocolVersion,
    ) -> hermes_core::Result<Self> {
        let mut packet = Self::decode_variable_header(header, body, version)?;
        packet.payload = body.copy_to_bytes(body.remaining());

        Ok(packet)
    }
}
