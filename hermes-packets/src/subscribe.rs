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

#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RetainHandling {
    #[default]
    SendAtSubscribe = 0,
    SendAtSubscribeIfNew = 1,
    DoNotSend = 2,
}

impl TryFrom<u8> for RetainHandling {
    type Error = ReasonCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RetainHandling::SendAtSubscribe),
            1 => Ok(RetainHandling::SendAtSubscribeIfNew),
            2 => Ok(RetainHandling::DoNotSend),
            _ => Err(ReasonCode::ProtocolError),
        }
    }
}

/// The options byte following each topic filter. Everything but `qos` is
/// MQTT 5.0 only and is dropped when talking 3.1.1.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionOptions {
    pub qos: QoS,
    pub no_local: bool,
    pub retain_as_published: bool,
    pub retain_handling: RetainHandling,
}

impl SubscriptionOptions {
    fn to_byte(self, version: ProtocolVersion) -> u8 {
        let mut byte = self.qos as u8;

        if version.supports_properties() {
            if self.no_local {
                byte |= 0b0000_0100;
            }
            if self.retain_as_published {
                byte |= 0b0000_1000;
            }
            byte |= (self.retain_handling as u8) << 4;
        }

        byte
    }

    fn from_byte(byte: u8, version: ProtocolVersion) -> hermes_core::Result<Self> {
        let reserved = if version.supports_properties() {
            0b1100_0000
        } else {
            0b1111_1100
        };

        if (byte & reserved) != 0 {
            return Err(ReasonCode::MalformedPacket.into());
        }

        Ok(SubscriptionOptions {
            qos: QoS::try_from(byte & 0b0000_0011)?,
            no_local: (byte & 0b0000_0100) != 0,
            retain_as_published: (byte & 0b0000_1000) != 0,
            retain_handling: RetainHandling::try_from((byte >> 4) & 0b0000_0011)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub filter: String,
    pub options: SubscriptionOptions,
}

impl Subscription {
    pub fn new(filter: impl Into<String>, qos: QoS) -> Self {
        Subscription {
            filter: filter.into(),
            options: SubscriptionOptions {
                qos,
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribePacket {
    pub protocol_version: ProtocolVersion,
    pub packet_id: u16,
    pub properties: PropertyList,
    pub subscriptions: Vec<Subscription>,
}

impl SubscribePacket {
    pub fn new(
        protocol_version: ProtocolVersion,
        packet_id: u16,
        subscriptions: Vec<Subscription>,
    ) -> Self {
        SubscribePacket {
            protocol_version,
            packet_id,
            properties: PropertyList::new(),
            subscriptions,
        }
    }

    fn fixed_header(&self) -> FixedHeader {
        let mut len = self.packet_id.encoded_size();

        if self.protocol_version.supports_properties() {
            len += self.properties.block_size();
        }

        len += self
            .subscriptions
            .iter()
            .map(|s| s.filter.encoded_size() + 1)
            .sum::<usize>();

        FixedHeader::new(PacketType::Subscribe, 0b0010, len)
    }
}

impl Encoder for SubscribePacket {
    fn encode(&self, buffer: &mut BytesMut) {
        self.fixed_header().encode(buffer);
        self.packet_id.encode(buffer);

        if self.protocol_version.supports_properties() {
            self.properties.encode_block(buffer);
        }

        for subscription in &self.subscriptions {
            subscription.filter.encode(buffer);
            buffer.put_u8(subscription.options.to_byte(self.protocol_version));
        }
    }

    fn encoded_size(&self) -> usize {
        self.fixed_header().frame_len()
    }
}

impl PacketDecoder for SubscribePacket {
    fn decode_body<T: Buf>(
        _header: &FixedHeader,
        body: &mut T,
        version: ProtocolVersion,
    ) -> hermes_core::Result<Self> {
        let packet_id = decode_packet_id(body)?;

        let properties = if version.supports_properties() {
            PropertyList::decode_block(body, PropertyContext::Subscribe)?
        } else {
            PropertyList::new()
        };

        let mut subscriptions = Vec::new();
        while body.has_remaining() {
            let filter = String::decode(body)?;
            let options = SubscriptionOptions::from_byte(u8::decode(body)?, version)?;

            subscriptions.push(Subscription { filter, options });
        }

        if subscriptions.is_empty() {
            return Err(ReasonCode::ProtocolError.into());
        }

        Ok(SubscribePacket {
            protocol_version: version,
            packet_id,
            properties,
            subscriptions,
        })
    }
}

#[cfg(test)]
mod tests {
    use hermes_core::properties::PropertyType;

    use super::*;
    use crate::ControlPacket;

    fn encode(packet: &SubscribePacket) -> Vec<u8> {
        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        encoded.to_vec()
    }

    #[test]
    fn test_subscribe_v5_options() -> hermes_core::Result<()> {
        let expected = vec![
            0x82, 0x0b, 0x00, 0x02, 0x02, 0x0b, 0x05, 0x00, 0x03, b'a', b'/', b'#', 0x2e,
        ];

        let mut subscription = Subscription::new("a/#", QoS::ExactlyOnce);
        subscription.options.no_local = true;
        subscription.options.retain_as_published = true;
        subscription.options.retain_handling = RetainHandling::DoNotSend;

        let mut packet = SubscribePacket::new(ProtocolVersion::V5, 2, vec![subscription]);
        packet.properties.push(PropertyType::SubscriptionIdentifier, 5u32)?;

        assert_eq!(encode(&packet), expected);

        let mut src = BytesMut::from(&expected[..]);
        let decoded = ControlPacket::parse_with_version(&mut src, ProtocolVersion::V5)?;
        assert_eq!(decoded, ControlPacket::Subscribe(packet));

        Ok(())
    }

    #[test]
    fn test_subscribe_v3_1_1_drops_v5_options() {
        let mut subscription = Subscription::new("a/b", QoS::AtLeastOnce);
        subscription.options.no_local = true;

        let packet = SubscribePacket::new(ProtocolVersion::V3_1_1, 1, vec![subscription]);

        assert_eq!(
            encode(&packet),
            vec![0x82, 0x08, 0x00, 0x01, 0x00, 0x03, b'a', b'/', b'b', 0x01]
        );
    }

    #[test]
    fn test_subscribe_without_filters() {
        let mut src = BytesMut::from(&[0x82, 0x02, 0x00, 0x01][..]);

        assert_eq!(
            ControlPacket::parse_with_version(&mut src, ProtocolVersion::V3_1_1),
            Err(ReasonCode::ProtocolError.into())
        );
    }

    #[test]
    fn test_subscribe_reserved_option_bits() {
        let mut src = BytesMut::from(&[0x82, 0x06, 0x00, 0x01, 0x00, 0x01, b'a', 0x04][..]);

        assert_eq!(
            ControlPacket::parse_with_version(&mut src, ProtocolVersion::V3_1_1),
            Err(ReasonCode::MalformedPacket.into())
        );
    }
}
