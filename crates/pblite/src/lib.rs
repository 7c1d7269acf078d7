//! pblite: protobuf messages written as array-positional JSON.
//!
//! Field number `n` lives at index `n - 1`. Absent fields are `null` and
//! trailing nulls are dropped. Enums travel as their integer value, 64-bit
//! integers as decimal strings, `bytes` as base64. A decoder also honours a
//! trailing JSON object that holds sparse high-numbered fields, e.g.
//! `["a", null, {"100": 7}]`.
//!
//! Messages are declared with [`pblite_message!`]:
//!
//! ```
//! pblite::pblite_message! {
//!     pub struct Greeting {
//!         1 => text: Option<String>,
//!         3 => recipients: Vec<String>,
//!     }
//! }
//!
//! let greeting = Greeting { text: Some("hi".into()), recipients: vec![] };
//! assert_eq!(pblite::encode_string(&greeting), r#"["hi"]"#);
//! ```

mod error;
mod field;
mod message;

pub use error::DecodeError;
pub use field::{Bytes, Field};
pub use message::{FieldReader, FieldWriter, Message, Slot};

use serde_json::Value;

#[doc(hidden)]
pub mod __private {
    pub use serde_json::Value;
}

pub fn to_value<M: Message>(message: &M) -> Value {
    message.to_pblite()
}

pub fn encode_string<M: Message>(message: &M) -> String {
    message.to_pblite().to_string()
}

pub fn encode<M: Message>(message: &M) -> Vec<u8> {
    encode_string(message).into_bytes()
}

pub fn from_value<M: Message>(value: &Value) -> Result<M, DecodeError> {
    M::from_pblite(value)
}

pub fn decode<M: Message>(bytes: &[u8]) -> Result<M, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)?;
    M::from_pblite(&value)
}

/// Declares a struct and its pblite encoding. Each member is written as
/// `<field number> => <name>: Option<T>` or `Vec<T>` where `T` implements
/// [`Field`] (scalars, [`Bytes`], `serde_json::Value`, other messages, enums).
#[macro_export]
macro_rules! pblite_message {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $number:literal => $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field: $ty,
            )*
        }

        impl $crate::Message for $name {
            const NAME: &'static str = stringify!($name);

            fn write_fields(&self, writer: &mut $crate::FieldWriter) {
                let _ = &writer;
                $( $crate::Slot::write_slot(&self.$field, writer, $number); )*
            }

            fn read_fields(
                reader: &$crate::FieldReader<'_>,
            ) -> ::core::result::Result<Self, $crate::DecodeError> {
                let _ = reader;
                ::core::result::Result::Ok(Self {
                    $( $field: <$ty as $crate::Slot>::read_slot(reader, $number)?, )*
                })
            }
        }

        impl $crate::Field for $name {
            fn encode_field(&self) -> $crate::__private::Value {
                $crate::Message::to_pblite(self)
            }

            fn decode_field(
                value: &$crate::__private::Value,
            ) -> ::core::result::Result<Self, $crate::DecodeError> {
                <Self as $crate::Message>::from_pblite(value)
            }
        }
    };
}

/// Declares an open enum: values without a named variant decode to
/// `Unrecognized(n)` and encode back to `n`.
#[macro_export]
macro_rules! pblite_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident = $value:literal
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant,
            )*
            Unrecognized(i32),
        }

        impl $name {
            pub fn from_i32(value: i32) -> Self {
                match value {
                    $( $value => Self::$variant, )*
                    other => Self::Unrecognized(other),
                }
            }

            pub fn as_i32(self) -> i32 {
                match self {
                    $( Self::$variant => $value, )*
                    Self::Unrecognized(other) => other,
                }
            }
        }

        impl ::core::default::Default for $name {
            fn default() -> Self {
                Self::from_i32(0)
            }
        }

        impl $crate::Field for $name {
            fn encode_field(&self) -> $crate::__private::Value {
                $crate::__private::Value::from(self.as_i32())
            }

            fn decode_field(
                value: &$crate::__private::Value,
            ) -> ::core::result::Result<Self, $crate::DecodeError> {
                <i32 as $crate::Field>::decode_field(value).map(Self::from_i32)
            }
        }
    };
}
