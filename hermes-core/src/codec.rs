use std::mem;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{error::Error, reason::ReasonCode};

pub trait Decoder {
    fn decode<T>(buffer: &mut T) -> crate::Result<Self>
    where
        Self: Sized,
        T: Buf;
}

pub trait Encoder {
    fn encode(&self, buffer: &mut BytesMut);
    fn encoded_size(&self) -> usize {
        mem::size_of_val(self)
    }
}

fn encode_var_byte_integer(value: u32, encoded: &mut BytesMut) {
    let mut x = value;

    loop {
        let mut encoded_byte: u8 = (x % 128) as u8;
        x /= 128;

        if x > 0 {
            encoded_byte |= 0b1000_0000;
        }

        encoded.put_u8(encoded_byte);

        if x == 0 {
            break;
        }
    }
}

fn decode_var_byte_integer<T: Buf>(encoded: &mut T) -> crate::Result<VariableByteInteger> {
    let mut value: u32 = 0;

    for shift in [0, 7, 14, 21] {
        if !encoded.has_remaining() {
            return Err(Error::PacketIncomplete);
        }

        let encoded_byte = encoded.get_u8();
        value |= ((encoded_byte & 0b0111_1111) as u32) << shift;

        if (encoded_byte & 0b1000_0000) == 0 {
            return Ok(VariableByteInteger(value));
        }
    }

    // A fifth continuation byte can never be valid.
    Err(Error::MalformedLength)
}

/// Longest string or binary field a u16 length prefix can describe.
pub const MAX_FIELD_LENGTH: usize = u16::MAX as usize;

/// Rejects a string or binary field too long for its u16 length prefix.
pub fn check_field_length(len: usize) -> crate::Result<()> {
    if len > MAX_FIELD_LENGTH {
        return Err(Error::FieldTooLong(len));
    }

    Ok(())
}

#[derive(PartialEq, Eq, Debug, Default, Clone, Copy)]
pub struct VariableByteInteger(pub u32);

impl VariableByteInteger {
    /// Largest value representable in four bytes.
    pub const MAX: u32 = 268_435_455;
}

impl Encoder for VariableByteInteger {
    fn encode(&self, buffer: &mut BytesMut) {
        encode_var_byte_integer(self.0, buffer);
    }

    fn encoded_size(&self) -> usize {
        match self.0 {
            0..=127 => 1,
            128..=16383 => 2,
            16384..=2097151 => 3,
            2097152..=268435455 => 4,
            _ => 5,
        }
    }
}

impl Decoder for VariableByteInteger {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        decode_var_byte_integer(buffer)
    }
}

impl Encoder for String {
    fn encode(&self, buffer: &mut BytesMut) {
        self.as_str().encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.len() + mem::size_of::<u16>()
    }
}

impl Decoder for String {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let bytes = Bytes::decode(buffer)?;

        match String::from_utf8(bytes.to_vec()) {
            Err(_) => Err(ReasonCode::MalformedPacket.into()),
            Ok(s) => Ok(s),
        }
    }
}

impl Encoder for &str {
    fn encode(&self, buffer: &mut BytesMut) {
        debug_assert!(self.len() <= MAX_FIELD_LENGTH);
        buffer.put_u16(self.len() as u16);
        buffer.put(self.as_bytes());
    }

    fn encoded_size(&self) -> usize {
        self.len() + mem::size_of::<u16>()
    }
}

impl Encoder for u8 {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(*self);
    }
}

impl Decoder for u8 {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        if !buffer.has_remaining() {
            return Err(Error::PacketIncomplete);
        }

        Ok(buffer.get_u8())
    }
}

impl Encoder for u16 {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u16(*self);
    }
}

impl Decoder for u16 {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        if buffer.remaining() < 2 {
            return Err(Error::PacketIncomplete);
        }

        Ok(buffer.get_u16())
    }
}

impl Encoder for u32 {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u32(*self);
    }
}

impl Decoder for u32 {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        if buffer.remaining() < 4 {
            return Err(Error::PacketIncomplete);
        }

        Ok(buffer.get_u32())
    }
}

impl Encoder for Bytes {
    fn encode(&self, buffer: &mut BytesMut) {
        debug_assert!(self.len() <= MAX_FIELD_LENGTH);
        buffer.put_u16(self.len() as u16);
        buffer.extend_from_slice(self);
    }

    fn encoded_size(&self) -> usize {
        mem::size_of::<u16>() + self.len()
    }
}

impl Decoder for Bytes {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        if buffer.remaining() < 2 {
            return Err(Error::PacketIncomplete);
        }

        let length = buffer.get_u16();
        if buffer.remaining() < length as usize {
            return Err(ReasonCode::MalformedPacket.into());
        }

        Ok(buffer.copy_to_bytes(length.into()))
    }
}

impl<T> Encoder for Option<T>
where
    T: Encoder,
{
    fn encode(&self, buffer: &mut BytesMut) {
        if let Some(v) = self {
            v.encode(buffer);
        }
    }

    fn encoded_size(&self) -> usize {
        match self {
            Some(v) => v.encoded_size(),
            None => 0,
        }
    }
}

impl<T> Encoder for Vec<T>
where
    T: Encoder,
{
    fn encode(&self, buffer: &mut BytesMut) {
        for e in self {
            e.encode(buffer);
        }
    }

    fn encoded_size(&self) -> usize {
        self.iter().map(Encoder::encoded_size).sum()
    }
}

#[cfg(test)]
mod tests {
    use crate::{codec::*, error::Error};

    #[test]
    fn test_codec_encode_decode() -> crate::Result<()> {
        let value: u16 = 325;
        let mut encoded = BytesMut::new();

        VariableByteInteger(value as u32).encode(&mut encoded);
        assert_eq!(encoded, Bytes::from(vec![0xc5, 0x02]));

        let decoded = VariableByteInteger::decode(&mut encoded)?;
        assert_eq!(decoded.0 as u16, value);

        Ok(())
    }

    #[test]
    fn test_var_byte_integer_boundaries() -> crate::Result<()> {
        let cases: [(u32, &[u8]); 8] = [
            (0, &[0x00]),
            (127, &[0x7f]),
            (128, &[0x80, 0x01]),
            (16383, &[0xff, 0x7f]),
            (16384, &[0x80, 0x80, 0x01]),
            (2097151, &[0xff, 0xff, 0x7f]),
            (2097152, &[0x80, 0x80, 0x80, 0x01]),
            (268435455, &[0xff, 0xff, 0xff, 0x7f]),
        ];

        for (value, wire) in cases {
            let mut encoded = BytesMut::new();
            let vbi = VariableByteInteger(value);
            vbi.encode(&mut encoded);

            assert_eq!(&encoded[..], wire, "encoding {}", value);
            assert_eq!(vbi.encoded_size(), wire.len());
            assert_eq!(VariableByteInteger::decode(&mut encoded)?.0, value);
        }

        Ok(())
    }

    #[test]
    fn test_decoder_malformed_integer() {
        let mut encoded = Bytes::from(vec![0xc5, 0xc5, 0xc5, 0xc5, 0x02]);

        assert_eq!(
            VariableByteInteger::decode(&mut encoded),
            Err(Error::MalformedLength)
        );
    }

    #[test]
    fn test_decoder_unterminated_integer() {
        let mut encoded = Bytes::from_static(&[0x80, 0x80]);

        assert_eq!(
            VariableByteInteger::decode(&mut encoded),
            Err(Error::PacketIncomplete)
        );
    }

    #[test]
    fn test_string_length_past_buffer() {
        let mut encoded = Bytes::from_static(&[0x00, 0x05, b'a', b'b']);

        assert_eq!(
            String::decode(&mut encoded),
            Err(Error::MQTTReasonCode(ReasonCode::MalformedPacket))
        );
    }

    #[test]
    fn test_string_invalid_utf8() {
        let mut encoded = Bytes::from_static(&[0x00, 0x02, 0xc3, 0x28]);

        assert!(String::decode(&mut encoded).is_err());
    }

    #[test]
    fn test_field_length_limit() {
        assert!(check_field_length(0).is_ok());
        assert!(check_field_length(MAX_FIELD_LENGTH).is_ok());
        assert_eq!(
            check_field_length(MAX_FIELD_LENGTH + 1),
            Err(Error::FieldTooLong(65536))
        );
    }
}
