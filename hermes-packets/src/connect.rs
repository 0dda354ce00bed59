use std::mem;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use hermes_core::{
    codec::{Decoder, Encoder},
    packet_type::PacketType,
    properties::{PropertyContext, PropertyList},
    protocol::ProtocolVersion,
    qos::QoS,
    reason::ReasonCode,
};

use crate::{FixedHeader, PacketDecoder};

#[derive(Default, Debug, PartialEq, Eq)]
struct ConnectFlags {
    user_name: bool,
    password: bool,
    will_retain: bool,
    will_qos: QoS,
    will_flag: bool,
    clean_start: bool,
}

impl Encoder for ConnectFlags {
    fn encode(&self, buffer: &mut BytesMut) {
        let mut flags: u8 = 0;

        if self.user_name {
            flags = 0b1000_0000;
        }

        if self.password {
            flags |= 0b0100_0000;
        }

        if self.will_retain {
            flags |= 0b0010_0000;
        }

        if self.will_flag {
            flags |= 0b0000_0100;
            flags |= (self.will_qos as u8) << 3;
        }

        if self.clean_start {
            flags |= 0b0000_0010;
        }

        buffer.put_u8(flags);
    }

    fn encoded_size(&self) -> usize {
        mem::size_of::<u8>()
    }
}

impl Decoder for ConnectFlags {
    fn decode<T: Buf>(buffer: &mut T) -> hermes_core::Result<Self> {
        let byte = u8::decode(buffer)?;
        if (byte & 0b0000_0001) != 0 {
            return Err(ReasonCode::MalformedPacket.into());
        }

        let will_flag = (byte & 0b0000_0100) != 0;
        let will_qos = QoS::try_from((byte >> 3) & 0b0000_0011)?;

        // Will QoS and retain are only meaningful with a will.
        if !will_flag && (will_qos != QoS::AtMostOnce || (byte & 0b0010_0000) != 0) {
            return Err(ReasonCode::MalformedPacket.into());
        }

        Ok(ConnectFlags {
            user_name: (byte & 0b1000_0000) != 0,
            password: (byte & 0b0100_0000) != 0,
            will_retain: (byte & 0b0010_0000) != 0,
            will_qos,
            will_flag,
            clean_start: (byte & 0b0000_0010) != 0,
        })
    }
}

/// Last will and testament published by the server when the client vanishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    pub payload: Bytes,
    /// Will properties, MQTT 5.0 only.
    pub properties: PropertyList,
}

impl LastWill {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        LastWill {
            qos: QoS::AtMostOnce,
            retain: false,
            topic: topic.into(),
            payload: payload.into(),
            properties: PropertyList::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    pub protocol_version: ProtocolVersion,
    pub clean_start: bool,
    pub keepalive: u16,
    pub properties: PropertyList,
    pub client_id: String,
    pub will: Option<LastWill>,
    pub user_name: Option<String>,
    pub password: Option<Bytes>,
}

impl ConnectPacket {
    pub fn new(protocol_version: ProtocolVersion, client_id: impl Into<String>, keepalive: u16) -> Self {
        ConnectPacket {
            protocol_version,
            clean_start: true,
            keepalive,
            properties: PropertyList::new(),
            client_id: client_id.into(),
            will: None,
            user_name: None,
            password: None,
        }
    }

    fn flags(&self) -> ConnectFlags {
        ConnectFlags {
            user_name: self.user_name.is_some(),
            password: self.password.is_some(),
            will_retain: self.will.as_ref().map_or(false, |w| w.retain),
            will_qos: self.will.as_ref().map_or(QoS::AtMostOnce, |w| w.qos),
            will_flag: self.will.is_some(),
            clean_start: self.clean_start,
        }
    }

    fn remaining_length(&self) -> usize {
        let v5 = self.protocol_version.supports_properties();
        let mut len = 0;

        len += ProtocolVersion::PROTOCOL_NAME.encoded_size();
        len += self.protocol_version.protocol_level().encoded_size();
        len += mem::size_of::<u8>();
        len += self.keepalive.encoded_size();

        if v5 {
            len += self.properties.block_size();
        }

        len += self.client_id.encoded_size();

        if let Some(will) = &self.will {
            if v5 {
                len += will.properties.block_size();
            }
            len += will.topic.encoded_size();
            len += will.payload.encoded_size();
        }

        len += self.user_name.encoded_size();
        len += self.password.encoded_size();

        len
    }

    fn fixed_header(&self) -> FixedHeader {
        FixedHeader::new(PacketType::Connect, 0, self.remaining_length())
    }
}

impl Encoder for ConnectPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        let v5 = self.protocol_version.supports_properties();

        self.fixed_header().encode(buffer);

        // Variable header
        ProtocolVersion::PROTOCOL_NAME.encode(buffer);
        self.protocol_version.protocol_level().encode(buffer);
        self.flags().encode(buffer);
        self.keepalive.encode(buffer);

        if v5 {
            self.properties.encode_block(buffer);
        }

        // Payload
        self.client_id.encode(buffer);

        if let Some(will) = &self.will {
            if v5 {
                will.properties.encode_block(buffer);
            }
            will.topic.encode(buffer);
            will.payload.encode(buffer);
        }

        self.user_name.encode(buffer);
        self.password.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.fixed_header().frame_len()
    }
}

impl PacketDecoder for ConnectPacket {
    fn decode_body<T: Buf>(
        _header: &FixedHeader,
        body: &mut T,
        _version: ProtocolVersion,
    ) -> hermes_core::Result<Self> {
        // CONNECT announces its own version.
        if String::decode(body)? != ProtocolVersion::PROTOCOL_NAME {
            return Err(ReasonCode::UnsupportedProtocolVersion.into());
        }
        let protocol_version = ProtocolVersion::try_from(u8::decode(body)?)?;
        let v5 = protocol_version.supports_properties();

        let flags = ConnectFlags::decode(body)?;
        let keepalive = u16::decode(body)?;

        let properties = if v5 {
            PropertyList::decode_block(body, PropertyContext::Connect)?
        } else {
            PropertyList::new()
        };

        let client_id = String::decode(body)?;

        let will = if flags.will_flag {
            let properties = if v5 {
                PropertyList::decode_block(body, PropertyContext::Will)?
            } else {
                PropertyList::new()
            };

            Some(LastWill {
                qos: flags.will_qos,
                retain: flags.will_retain,
                topic: String::decode(body)?,
                payload: Bytes::decode(body)?,
                properties,
            })
        } else {
            None
        };

        let user_name = if flags.user_name {
            Some(String::decode(body)?)
        } else {
            None
        };

        let password = if flags.password {
            Some(Bytes::decode(body)?)
        } else {
            None
        };

        Ok(ConnectPacket {
            protocol_version,
            clean_start: flags.clean_start,
            keepalive,
            properties,
            client_id,
            will,
            user_name,
            password,
        })
    }
}

#[cfg(test)]
mod tests {
    use hermes_core::properties::PropertyType;

    use super::*;
    use crate::ControlPacket;

    fn encode(packet: &ConnectPacket) -> Vec<u8> {
        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        encoded.to_vec()
    }

    fn decode(bytes: &[u8]) -> hermes_core::Result<ConnectPacket> {
        let mut src = BytesMut::from(bytes);
        match ControlPacket::parse_with_version(&mut src, ProtocolVersion::V5)? {
            ControlPacket::Connect(p) => Ok(p),
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_connect_v5_with_receive_maximum() -> hermes_core::Result<()> {
        let expected = vec![
            0x10, 0x10, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x05, 0x02, 0x00, 0x3c, 0x03, 0x21,
            0x00, 0x14, 0x00, 0x00,
        ];

        let mut packet = ConnectPacket::new(ProtocolVersion::V5, "", 60);
        packet.properties.push(PropertyType::ReceiveMaximum, 20u16)?;

        assert_eq!(encode(&packet), expected);
        assert_eq!(decode(&expected)?, packet);

        Ok(())
    }

    #[test]
    fn test_connect_v5_with_will_and_credentials() -> hermes_core::Result<()> {
        let expected = vec![
            0x10, 0x52, 0x00, 0x04, 0x4d, 0x51, 0x54, 0x54, 0x05, 0xee, 0x00, 0x3c, 0x08, 0x11,
            0x00, 0x00, 0x00, 0x1e, 0x21, 0x00, 0x14, 0x00, 0x00, 0x0d, 0x08, 0x00, 0x0a, 0x74,
            0x65, 0x73, 0x74, 0x5f, 0x74, 0x6f, 0x70, 0x69, 0x63, 0x00, 0x0a, 0x74, 0x65, 0x73,
            0x74, 0x5f, 0x74, 0x6f, 0x70, 0x69, 0x63, 0x00, 0x0c, 0x74, 0x65, 0x73, 0x74, 0x5f,
            0x70, 0x61, 0x79, 0x6c, 0x6f, 0x61, 0x64, 0x00, 0x09, 0x74, 0x65, 0x73, 0x74, 0x5f,
            0x75, 0x73, 0x65, 0x72, 0x00, 0x08, 0x74, 0x65, 0x73, 0x74, 0x5f, 0x70, 0x77, 0x64,
        ];

        let mut will = LastWill::new("test_topic", "test_payload");
        will.qos = QoS::AtLeastOnce;
        will.retain = true;
        will.properties.push(PropertyType::ResponseTopic, "test_topic")?;

        let mut packet = ConnectPacket::new(ProtocolVersion::V5, "", 60);
        packet.properties = PropertyList::new()
            .with(PropertyType::SessionExpiryInterval, 30u32)?
            .with(PropertyType::ReceiveMaximum, 20u16)?;
        packet.will = Some(will);
        packet.user_name = Some("test_user".to_string());
        packet.password = Some(Bytes::from_static(b"test_pwd"));

        assert_eq!(encode(&packet), expected);
        assert_eq!(decode(&expected)?, packet);

        Ok(())
    }

    #[test]
    fn test_connect_v3_1_1() -> hermes_core::Result<()> {
        let expected = vec![
            0x10, // CONNECT
            0x11, // remaining length
            0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
            0x04, // level 4
            0x02, // clean session
            0x00, 0x3c, // keep alive 60
            0x00, 0x05, b't', b'e', b's', b't', b'1', // client id
        ];

        let packet = ConnectPacket::new(ProtocolVersion::V3_1_1, "test1", 60);

        assert_eq!(encode(&packet), expected);
        assert_eq!(decode(&expected)?, packet);

        Ok(())
    }

    #[test]
    fn test_will_properties_are_checked_in_will_context() {
        // will block carrying a topic alias, which is publish only
        let bytes = vec![
            0x10, 0x16, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x05, 0x06, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x03, 0x23, 0x00, 0x01, 0x00, 0x01, b't', 0x00, 0x00,
        ];

        assert_eq!(
            decode(&bytes),
            Err(hermes_core::error::Error::PropertyNotAllowed {
                property: PropertyType::TopicAlias,
                context: PropertyContext::Will,
            })
        );
    }

    #[test]
    fn test_reserved_flag_is_malformed() {
        let bytes = vec![
            0x10, 0x0c, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x03, 0x00, 0x3c, 0x00, 0x00,
        ];

        assert_eq!(decode(&bytes), Err(ReasonCode::MalformedPacket.into()));
    }
}
