// ABOUTME: Builtin scalar/string encode-decode and the TypeKind tag attached to
// ABOUTME: every framed value. Message payloads travel as opaque JSON bytes.

use crate::error::RequestError;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Tag carried in every frame header, identifying how the payload that
/// follows should be interpreted. See spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum TypeKind {
    Normal = 0,
    Stream = 1,
    Message = 2,
    Error = 3,
    NoReturn = 4,
}

/// The three stream directions, named by the `TypeName` carried alongside a
/// `Stream`-kind frame. See spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Inbound to the server: client writes, server reads.
    IStream,
    /// Outbound from the server: server writes, client reads.
    OStream,
    /// Full duplex: both ends read and write independently.
    Stream,
}

impl StreamKind {
    pub fn type_name(self) -> &'static str {
        match self {
            StreamKind::IStream => "istream",
            StreamKind::OStream => "ostream",
            StreamKind::Stream => "stream",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "istream" => Some(StreamKind::IStream),
            "ostream" => Some(StreamKind::OStream),
            "stream" => Some(StreamKind::Stream),
            _ => None,
        }
    }
}

/// A decoded/to-be-encoded builtin scalar or string value — the payload of
/// a `Normal`-kind frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Float32(f32),
    Float64(f64),
    Bool(bool),
    Str(String),
}

impl Value {
    /// The ASCII `TypeName` this value is tagged with on the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int8(_) => "int8",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Uint8(_) => "uint8",
            Value::Uint16(_) => "uint16",
            Value::Uint32(_) => "uint32",
            Value::Uint64(_) => "uint64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
        }
    }

    /// Encode the natural little-endian byte representation described in
    /// spec §4.1. Floats are encoded by their IEEE-754 bit pattern — see
    /// SPEC_FULL.md's resolution of the float-marshalling Open Question.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Value::Int8(v) => vec![*v as u8],
            Value::Int16(v) => v.to_le_bytes().to_vec(),
            Value::Int32(v) => v.to_le_bytes().to_vec(),
            Value::Int64(v) => v.to_le_bytes().to_vec(),
            Value::Uint8(v) => vec![*v],
            Value::Uint16(v) => v.to_le_bytes().to_vec(),
            Value::Uint32(v) => v.to_le_bytes().to_vec(),
            Value::Uint64(v) => v.to_le_bytes().to_vec(),
            Value::Float32(v) => v.to_bits().to_le_bytes().to_vec(),
            Value::Float64(v) => v.to_bits().to_le_bytes().to_vec(),
            Value::Bool(v) => vec![if *v { 1 } else { 0 }],
            Value::Str(v) => v.as_bytes().to_vec(),
        }
    }

    /// Decode a payload given its declared `TypeName`. Unrecognized names
    /// fail with `UnknownBuiltinType` (client: `BadRequestType`, server:
    /// same error surfaced as a non-fatal request error).
    pub fn decode(type_name: &str, data: &[u8]) -> Result<Self, RequestError> {
        fn need(data: &[u8], n: usize, type_name: &str) -> Result<(), RequestError> {
            if data.len() < n {
                Err(RequestError::UnknownBuiltinType(format!(
                    "expected argument type {type_name} to be {n} bytes, got {}",
                    data.len()
                )))
            } else {
                Ok(())
            }
        }

        Ok(match type_name {
            "int8" => {
                need(data, 1, type_name)?;
                Value::Int8(data[0] as i8)
            }
            "int16" => {
                need(data, 2, type_name)?;
                Value::Int16(i16::from_le_bytes(data[..2].try_into().unwrap()))
            }
            "int32" => {
                need(data, 4, type_name)?;
                Value::Int32(i32::from_le_bytes(data[..4].try_into().unwrap()))
            }
            "int64" => {
                need(data, 8, type_name)?;
                Value::Int64(i64::from_le_bytes(data[..8].try_into().unwrap()))
            }
            "uint8" => {
                need(data, 1, type_name)?;
                Value::Uint8(data[0])
            }
            "uint16" => {
                need(data, 2, type_name)?;
                Value::Uint16(u16::from_le_bytes(data[..2].try_into().unwrap()))
            }
            "uint32" => {
                need(data, 4, type_name)?;
                Value::Uint32(u32::from_le_bytes(data[..4].try_into().unwrap()))
            }
            "uint64" => {
                need(data, 8, type_name)?;
                Value::Uint64(u64::from_le_bytes(data[..8].try_into().unwrap()))
            }
            "float32" => {
                need(data, 4, type_name)?;
                Value::Float32(f32::from_bits(u32::from_le_bytes(data[..4].try_into().unwrap())))
            }
            "float64" => {
                need(data, 8, type_name)?;
                Value::Float64(f64::from_bits(u64::from_le_bytes(data[..8].try_into().unwrap())))
            }
            "bool" => {
                need(data, 1, type_name)?;
                Value::Bool(data[0] == 1)
            }
            "string" => Value::Str(String::from_utf8_lossy(data).into_owned()),
            other => return Err(RequestError::UnknownBuiltinType(other.to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_round_trip() {
        let values = [
            Value::Int8(-12),
            Value::Int16(-1234),
            Value::Int32(-123_456),
            Value::Int64(-123_456_789_012),
            Value::Uint8(250),
            Value::Uint16(65000),
            Value::Uint32(4_000_000_000),
            Value::Uint64(18_000_000_000_000_000_000),
            Value::Float32(3.5),
            Value::Float64(-2.25),
            Value::Bool(true),
            Value::Bool(false),
            Value::Str("hello, rpc".to_string()),
        ];
        for v in values {
            let encoded = v.encode();
            let decoded = Value::decode(v.type_name(), &encoded).unwrap();
            assert_eq!(v, decoded);
        }
    }

    #[test]
    fn float_uses_bit_pattern_not_integer_cast() {
        let v = Value::Float32(1.5);
        let encoded = v.encode();
        // Bit pattern of 1.5f32, not the 4-byte LE encoding of (1.5 as u32) == 1.
        assert_eq!(encoded, 1.5f32.to_bits().to_le_bytes());
    }

    #[test]
    fn unknown_builtin_type_rejected() {
        let err = Value::decode("int128", &[0; 16]).unwrap_err();
        assert!(matches!(err, RequestError::UnknownBuiltinType(_)));
    }

    #[test]
    fn short_payload_rejected() {
        let err = Value::decode("uint32", &[1, 2]).unwrap_err();
        assert!(matches!(err, RequestError::UnknownBuiltinType(_)));
    }

    #[test]
    fn stream_kind_name_round_trip() {
        for kind in [StreamKind::IStream, StreamKind::OStream, StreamKind::Stream] {
            assert_eq!(StreamKind::parse(kind.type_name()), Some(kind));
        }
        assert_eq!(StreamKind::parse("bogus"), None);
    }
}
