//! Scalar field encodings.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Number, Value};

use crate::error::DecodeError;

/// A value that occupies a single pblite position.
pub trait Field: Sized {
    fn encode_field(&self) -> Value;
    fn decode_field(value: &Value) -> Result<Self, DecodeError>;
}

/// Binary payload carried as base64 text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bytes(pub Vec<u8>);

impl From<Vec<u8>> for Bytes {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes(bytes)
    }
}

impl Field for Bytes {
    fn encode_field(&self) -> Value {
        Value::String(STANDARD.encode(&self.0))
    }

    fn decode_field(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::String(text) => Ok(Bytes(STANDARD.decode(text)?)),
            other => Err(DecodeError::type_mismatch("base64 string", other)),
        }
    }
}

impl Field for String {
    fn encode_field(&self) -> Value {
        Value::String(self.clone())
    }

    fn decode_field(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::String(text) => Ok(text.clone()),
            other => Err(DecodeError::type_mismatch("string", other)),
        }
    }
}

impl Field for bool {
    fn encode_field(&self) -> Value {
        Value::Bool(*self)
    }

    fn decode_field(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Bool(flag) => Ok(*flag),
            Value::Number(number) => match number.as_i64() {
                Some(0) => Ok(false),
                Some(1) => Ok(true),
                _ => Err(DecodeError::OutOfRange {
                    value: number.to_string(),
                    target: "bool",
                }),
            },
            other => Err(DecodeError::type_mismatch("bool", other)),
        }
    }
}

impl Field for f64 {
    fn encode_field(&self) -> Value {
        Number::from_f64(*self).map_or(Value::Null, Value::Number)
    }

    fn decode_field(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Number(number) => number
                .as_f64()
                .ok_or_else(|| DecodeError::type_mismatch("float", value)),
            Value::String(text) => text
                .parse()
                .map_err(|_| DecodeError::type_mismatch("float", value)),
            other => Err(DecodeError::type_mismatch("float", other)),
        }
    }
}

/// Parses an integer that may arrive as a JSON number or a decimal string.
fn integer(value: &Value, target: &'static str) -> Result<i128, DecodeError> {
    match value {
        Value::Number(number) => {
            if let Some(signed) = number.as_i64() {
                Ok(signed as i128)
            } else if let Some(unsigned) = number.as_u64() {
                Ok(unsigned as i128)
            } else {
                match number.as_f64() {
                    Some(float) if float.fract() == 0.0 && float.is_finite() => Ok(float as i128),
                    _ => Err(DecodeError::OutOfRange {
                        value: number.to_string(),
                        target,
                    }),
                }
            }
        }
        Value::String(text) => text
            .trim()
            .parse::<i128>()
            .map_err(|_| DecodeError::type_mismatch("integer", value)),
        other => Err(DecodeError::type_mismatch("integer", other)),
    }
}

macro_rules! narrow_int {
    ($ty:ty, $name:literal, $encode:expr) => {
        impl Field for $ty {
            fn encode_field(&self) -> Value {
                $encode(*self)
            }

            fn decode_field(value: &Value) -> Result<Self, DecodeError> {
                let wide = integer(value, $name)?;
                <$ty>::try_from(wide).map_err(|_| DecodeError::OutOfRange {
                    value: wide.to_string(),
                    target: $name,
                })
            }
        }
    };
}

// 32-bit values travel as JSON numbers, 64-bit values as strings so that
// JavaScript peers never lose precision.
narrow_int!(i32, "int32", |v: i32| Value::from(v));
narrow_int!(u32, "uint32", |v: u32| Value::from(v));
narrow_int!(i64, "int64", |v: i64| Value::String(v.to_string()));
narrow_int!(u64, "uint64", |v: u64| Value::String(v.to_string()));

/// Opaque passthrough for sub-messages the caller does not interpret.
impl Field for Value {
    fn encode_field(&self) -> Value {
        self.clone()
    }

    fn decode_field(value: &Value) -> Result<Self, DecodeError> {
        Ok(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::timeout]
    fn int64_accepts_numbers_and_strings() {
        assert_eq!(i64::decode_field(&json!("5285528534243897")).unwrap(), 5285528534243897);
        assert_eq!(i64::decode_field(&json!(42)).unwrap(), 42);
        assert_eq!(i64::decode_field(&json!(-7.0)).unwrap(), -7);
        assert_eq!(42i64.encode_field(), json!("42"));
    }

    #[test_timeout::timeout]
    fn int32_rejects_overflow() {
        let err = i32::decode_field(&json!(4_294_967_296u64)).unwrap_err();
        assert!(matches!(err, DecodeError::OutOfRange { target: "int32", .. }));
        assert!(u32::decode_field(&json!(-1)).is_err());
    }

    #[test_timeout::timeout]
    fn bool_accepts_zero_and_one() {
        assert!(bool::decode_field(&json!(1)).unwrap());
        assert!(!bool::decode_field(&json!(0)).unwrap());
        assert!(bool::decode_field(&json!(true)).unwrap());
        assert!(bool::decode_field(&json!(2)).is_err());
        assert!(bool::decode_field(&json!("true")).is_err());
    }

    #[test_timeout::timeout]
    fn bytes_are_base64() {
        let bytes = Bytes(b"hi\x00".to_vec());
        assert_eq!(bytes.encode_field(), json!("aGkA"));
        assert_eq!(Bytes::decode_field(&json!("aGkA")).unwrap(), bytes);
        assert!(matches!(
            Bytes::decode_field(&json!("***")),
            Err(DecodeError::Base64(_))
        ));
    }

    #[test_timeout::timeout]
    fn string_mismatch_reports_kind() {
        let err = String::decode_field(&json!([1])).unwrap_err();
        assert_eq!(err.to_string(), "expected string, found array");
    }
}
