//! MQTT v5 properties.
//!
//! Every property identifier is registered once below together with the
//! kind of value it carries and the packets it may appear in. A
//! [`PropertyList`] is the ordered, owned sequence of properties attached to
//! a single packet; decoding validates every entry against the registry.

use bytes::{Buf, Bytes, BytesMut};

use crate::{
    codec::{check_field_length, Decoder, Encoder, VariableByteInteger},
    error::Error,
    reason::ReasonCode,
};

/// Wire representation of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Byte,
    TwoByteInteger,
    FourByteInteger,
    VariableByteInteger,
    Utf8String,
    BinaryData,
    Utf8StringPair,
}

/// Where a property block is found.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyContext {
    Connect = 1,
    ConnAck,
    Publish,
    PubAck,
    PubRec,
    PubRel,
    PubComp,
    Subscribe,
    SubAck,
    Unsubscribe,
    UnsubAck,
    Disconnect = 14,
    /// The will properties inside the CONNECT payload.
    Will,
}

impl PropertyContext {
    const fn mask(self) -> u16 {
        1 << (self as u8)
    }
}

macro_rules! property_types {
    ($($name:ident = $id:literal, $kind:ident, [$($ctx:ident),+];)*) => {
        /// Property identifiers from the MQTT v5 registry.
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum PropertyType {
            $($name = $id,)*
        }

        impl PropertyType {
            pub fn id(self) -> u8 {
                self as u8
            }

            pub fn data_type(self) -> DataType {
                match self {
                    $(PropertyType::$name => DataType::$kind,)*
                }
            }

            /// Returns true if the property may appear in the given context.
            pub fn allowed_in(self, context: PropertyContext) -> bool {
                let allowed = match self {
                    $(PropertyType::$name => 0 $(| PropertyContext::$ctx.mask())+,)*
                };

                allowed & context.mask() != 0
            }
        }

        impl TryFrom<u32> for PropertyType {
            type Error = Error;

            fn try_from(id: u32) -> Result<Self, Self::Error> {
                match id {
                    $($id => Ok(PropertyType::$name),)*
                    _ => Err(Error::UnknownProperty(id)),
                }
            }
        }
    };
}

property_types! {
    PayloadFormatIndicator = 0x01, Byte, [Publish, Will];
    MessageExpiryInterval = 0x02, FourByteInteger, [Publish, Will];
    ContentType = 0x03, Utf8String, [Publish, Will];
    ResponseTopic = 0x08, Utf8String, [Publish, Will];
    CorrelationData = 0x09, BinaryData, [Publish, Will];
    SubscriptionIdentifier = 0x0b, VariableByteInteger, [Publish, Subscribe];
    SessionExpiryInterval = 0x11, FourByteInteger, [Connect, ConnAck, Disconnect];
    AssignedClientIdentifier = 0x12, Utf8String, [ConnAck];
    ServerKeepAlive = 0x13, TwoByteInteger, [ConnAck];
    AuthenticationMethod = 0x15, Utf8String, [Connect, ConnAck];
    AuthenticationData = 0x16, BinaryData, [Connect, ConnAck];
    RequestProblemInformation = 0x17, Byte, [Connect];
    WillDelayInterval = 0x18, FourByteInteger, [Will];
    RequestResponseInformation = 0x19, Byte, [Connect];
    ResponseInformation = 0x1a, Utf8String, [ConnAck];
    ServerReference = 0x1c, Utf8String, [ConnAck, Disconnect];
    ReasonString = 0x1f, Utf8String,
        [ConnAck, PubAck, PubRec, PubRel, PubComp, SubAck, UnsubAck, Disconnect];
    ReceiveMaximum = 0x21, TwoByteInteger, [Connect, ConnAck];
    TopicAliasMaximum = 0x22, TwoByteInteger, [Connect, ConnAck];
    TopicAlias = 0x23, TwoByteInteger, [Publish];
    MaximumQoS = 0x24, Byte, [ConnAck];
    RetainAvailable = 0x25, Byte, [ConnAck];
    UserProperty = 0x26, Utf8StringPair,
        [Connect, ConnAck, Publish, Will, PubAck, PubRec, PubRel, PubComp, Subscribe,
         SubAck, Unsubscribe, UnsubAck, Disconnect];
    MaximumPacketSize = 0x27, FourByteInteger, [Connect, ConnAck];
    WildcardSubscriptionAvailable = 0x28, Byte, [ConnAck];
    SubscriptionIdentifierAvailable = 0x29, Byte, [ConnAck];
    SharedSubscriptionAvailable = 0x2a, Byte, [ConnAck];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Byte(u8),
    TwoByteInteger(u16),
    FourByteInteger(u32),
    VariableByteInteger(u32),
    Utf8String(String),
    BinaryData(Bytes),
    Utf8StringPair(String, String),
}

impl PropertyValue {
    /// The zero value for a data type, used when appending a fresh node.
    pub fn default_for(data_type: DataType) -> Self {
        match data_type {
            DataType::Byte => PropertyValue::Byte(0),
            DataType::TwoByteInteger => PropertyValue::TwoByteInteger(0),
            DataType::FourByteInteger => PropertyValue::FourByteInteger(0),
            DataType::VariableByteInteger => PropertyValue::VariableByteInteger(0),
            DataType::Utf8String => PropertyValue::Utf8String(String::new()),
            DataType::BinaryData => PropertyValue::BinaryData(Bytes::new()),
            DataType::Utf8StringPair => PropertyValue::Utf8StringPair(String::new(), String::new()),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            PropertyValue::Byte(_) => DataType::Byte,
            PropertyValue::TwoByteInteger(_) => DataType::TwoByteInteger,
            PropertyValue::FourByteInteger(_) => DataType::FourByteInteger,
            PropertyValue::VariableByteInteger(_) => DataType::VariableByteInteger,
            PropertyValue::Utf8String(_) => DataType::Utf8String,
            PropertyValue::BinaryData(_) => DataType::BinaryData,
            PropertyValue::Utf8StringPair(_, _) => DataType::Utf8StringPair,
        }
    }

    /// Any integer value, widened.
    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            PropertyValue::Byte(v) => Some(v.into()),
            PropertyValue::TwoByteInteger(v) => Some(v.into()),
            PropertyValue::FourByteInteger(v) | PropertyValue::VariableByteInteger(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Utf8String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            PropertyValue::BinaryData(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_pair(&self) -> Option<(&str, &str)> {
        match self {
            PropertyValue::Utf8StringPair(k, v) => Some((k, v)),
            _ => None,
        }
    }

    /// Converts integers between widths when the value fits the target.
    fn coerce(self, expected: DataType) -> Option<Self> {
        if self.data_type() == expected {
            return Some(self);
        }

        let n = self.as_u32()?;
        match expected {
            DataType::Byte => u8::try_from(n).ok().map(PropertyValue::Byte),
            DataType::TwoByteInteger => u16::try_from(n).ok().map(PropertyValue::TwoByteInteger),
            DataType::FourByteInteger => Some(PropertyValue::FourByteInteger(n)),
            DataType::VariableByteInteger => {
                (n <= VariableByteInteger::MAX).then_some(PropertyValue::VariableByteInteger(n))
            }
            _ => None,
        }
    }

    fn decode_as<T: Buf>(data_type: DataType, buffer: &mut T) -> crate::Result<Self> {
        let value = match data_type {
            DataType::Byte => PropertyValue::Byte(u8::decode(buffer)?),
            DataType::TwoByteInteger => PropertyValue::TwoByteInteger(u16::decode(buffer)?),
            DataType::FourByteInteger => PropertyValue::FourByteInteger(u32::decode(buffer)?),
            DataType::VariableByteInteger => {
                PropertyValue::VariableByteInteger(VariableByteInteger::decode(buffer)?.0)
            }
            DataType::Utf8String => PropertyValue::Utf8String(String::decode(buffer)?),
            DataType::BinaryData => PropertyValue::BinaryData(Bytes::decode(buffer)?),
            DataType::Utf8StringPair => {
                PropertyValue::Utf8StringPair(String::decode(buffer)?, String::decode(buffer)?)
            }
        };

        Ok(value)
    }
}

impl From<u8> for PropertyValue {
    fn from(v: u8) -> Self {
        PropertyValue::Byte(v)
    }
}

impl From<u16> for PropertyValue {
    fn from(v: u16) -> Self {
        PropertyValue::TwoByteInteger(v)
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        PropertyValue::FourByteInteger(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Utf8String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Utf8String(v)
    }
}

impl From<Bytes> for PropertyValue {
    fn from(v: Bytes) -> Self {
        PropertyValue::BinaryData(v)
    }
}

impl<K: Into<String>, V: Into<String>> From<(K, V)> for PropertyValue {
    fn from((k, v): (K, V)) -> Self {
        PropertyValue::Utf8StringPair(k.into(), v.into())
    }
}

impl Encoder for PropertyValue {
    fn encode(&self, buffer: &mut BytesMut) {
        match self {
            PropertyValue::Byte(v) => v.encode(buffer),
            PropertyValue::TwoByteInteger(v) => v.encode(buffer),
            PropertyValue::FourByteInteger(v) => v.encode(buffer),
            PropertyValue::VariableByteInteger(v) => VariableByteInteger(*v).encode(buffer),
            PropertyValue::Utf8String(s) => s.encode(buffer),
            PropertyValue::BinaryData(b) => b.encode(buffer),
            PropertyValue::Utf8StringPair(k, v) => {
                k.encode(buffer);
                v.encode(buffer);
            }
        }
    }

    fn encoded_size(&self) -> usize {
        match self {
            PropertyValue::Byte(_) => 1,
            PropertyValue::TwoByteInteger(_) => 2,
            PropertyValue::FourByteInteger(_) => 4,
            PropertyValue::VariableByteInteger(v) => VariableByteInteger(*v).encoded_size(),
            PropertyValue::Utf8String(s) => s.encoded_size(),
            PropertyValue::BinaryData(b) => b.encoded_size(),
            PropertyValue::Utf8StringPair(k, v) => k.encoded_size() + v.encoded_size(),
        }
    }
}

/// One property node: identifier plus a value of the identifier's data type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    kind: PropertyType,
    value: PropertyValue,
}

impl Property {
    pub fn new(kind: PropertyType, value: impl Into<PropertyValue>) -> crate::Result<Self> {
        let expected = kind.data_type();
        let value = value
            .into()
            .coerce(expected)
            .ok_or(Error::PropertyValue {
                property: kind,
                expected,
            })?;

        match &value {
            PropertyValue::Utf8String(s) => check_field_length(s.len())?,
            PropertyValue::BinaryData(b) => check_field_length(b.len())?,
            PropertyValue::Utf8StringPair(k, v) => {
                check_field_length(k.len())?;
                check_field_length(v.len())?;
            }
            _ => {}
        }

        Ok(Property { kind, value })
    }

    pub fn kind(&self) -> PropertyType {
        self.kind
    }

    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    pub fn set(&mut self, value: impl Into<PropertyValue>) -> crate::Result<()> {
        *self = Property::new(self.kind, value)?;
        Ok(())
    }
}

impl Encoder for Property {
    fn encode(&self, buffer: &mut BytesMut) {
        VariableByteInteger(self.kind.id().into()).encode(buffer);
        self.value.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        VariableByteInteger(self.kind.id().into()).encoded_size() + self.value.encoded_size()
    }
}

impl Decoder for Property {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let id = VariableByteInteger::decode(buffer)?;
        let kind = PropertyType::try_from(id.0)?;
        let value = PropertyValue::decode_as(kind.data_type(), buffer)?;

        Ok(Property { kind, value })
    }
}

/// Ordered properties attached to one packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyList {
    properties: Vec<Property>,
}

impl PropertyList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a node holding the zero value of the property's data type
    /// and hands it back for filling in.
    pub fn append(&mut self, kind: PropertyType) -> &mut Property {
        let index = self.properties.len();
        self.properties.push(Property {
            kind,
            value: PropertyValue::default_for(kind.data_type()),
        });
        &mut self.properties[index]
    }

    pub fn push(&mut self, kind: PropertyType, value: impl Into<PropertyValue>) -> crate::Result<()> {
        self.properties.push(Property::new(kind, value)?);
        Ok(())
    }

    /// Builder form of [`PropertyList::push`].
    pub fn with(mut self, kind: PropertyType, value: impl Into<PropertyValue>) -> crate::Result<Self> {
        self.push(kind, value)?;
        Ok(self)
    }

    /// First value registered for `kind`.
    pub fn get(&self, kind: PropertyType) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|p| p.kind == kind)
            .map(Property::value)
    }

    pub fn contains(&self, kind: PropertyType) -> bool {
        self.get(kind).is_some()
    }

    pub fn user_properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .filter(|p| p.kind == PropertyType::UserProperty)
            .filter_map(|p| p.value.as_pair())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Property> {
        self.properties.iter()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn clear(&mut self) {
        self.properties.clear();
    }

    /// Size of the block including its length prefix.
    pub fn block_size(&self) -> usize {
        let len = self.encoded_size();
        VariableByteInteger(len as u32).encoded_size() + len
    }

    /// Writes the length prefix followed by every property.
    pub fn encode_block(&self, buffer: &mut BytesMut) {
        VariableByteInteger(self.encoded_size() as u32).encode(buffer);
        self.encode(buffer);
    }

    /// Reads a length prefixed property block, checking each identifier
    /// against the registry and the context it was found in.
    pub fn decode_block<T: Buf>(buffer: &mut T, context: PropertyContext) -> crate::Result<Self> {
        let len = VariableByteInteger::decode(buffer)?.0 as usize;
        if buffer.remaining() < len {
            return Err(ReasonCode::MalformedPacket.into());
        }

        let mut list = PropertyList::new();
        let mut block = buffer.take(len);

        while block.has_remaining() {
            let property = match Property::decode(&mut block) {
                Ok(p) => p,
                Err(Error::PacketIncomplete) => return Err(ReasonCode::MalformedPacket.into()),
                Err(e) => return Err(e),
            };

            if !property.kind.allowed_in(context) {
                return Err(Error::PropertyNotAllowed {
                    property: property.kind,
                    context,
                });
            }

            list.properties.push(property);
        }

        Ok(list)
    }
}

impl Encoder for PropertyList {
    fn encode(&self, buffer: &mut BytesMut) {
        for property in &self.properties {
            property.encode(buffer);
        }
    }

    fn encoded_size(&self) -> usize {
        self.properties.iter().map(Encoder::encoded_size).sum()
    }
}

impl<'a> IntoIterator for &'a PropertyList {
    type Item = &'a Property;
    type IntoIter = std::slice::Iter<'a, Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.properties.iter()
    }
}
