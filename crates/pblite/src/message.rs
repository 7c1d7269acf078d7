use serde_json::{Map, Value};

use crate::error::{kind_of, DecodeError};
use crate::field::Field;

/// A protobuf-shaped message with a pblite (array-positional) encoding.
pub trait Message: Sized {
    const NAME: &'static str;

    fn write_fields(&self, writer: &mut FieldWriter);
    fn read_fields(reader: &FieldReader<'_>) -> Result<Self, DecodeError>;

    fn to_pblite(&self) -> Value {
        let mut writer = FieldWriter::new();
        self.write_fields(&mut writer);
        writer.finish()
    }

    fn from_pblite(value: &Value) -> Result<Self, DecodeError> {
        let reader = FieldReader::new(value, Self::NAME)?;
        Self::read_fields(&reader)
    }
}

/// How a struct member maps onto its position: `Option<T>` for singular
/// fields, `Vec<T>` for repeated ones.
pub trait Slot: Sized {
    fn write_slot(&self, writer: &mut FieldWriter, number: u32);
    fn read_slot(reader: &FieldReader<'_>, number: u32) -> Result<Self, DecodeError>;
}

impl<T: Field> Slot for Option<T> {
    fn write_slot(&self, writer: &mut FieldWriter, number: u32) {
        if let Some(value) = self {
            writer.set(number, value.encode_field());
        }
    }

    fn read_slot(reader: &FieldReader<'_>, number: u32) -> Result<Self, DecodeError> {
        reader.optional(number)
    }
}

impl<T: Field> Slot for Vec<T> {
    fn write_slot(&self, writer: &mut FieldWriter, number: u32) {
        if !self.is_empty() {
            writer.set(
                number,
                Value::Array(self.iter().map(Field::encode_field).collect()),
            );
        }
    }

    fn read_slot(reader: &FieldReader<'_>, number: u32) -> Result<Self, DecodeError> {
        reader.repeated(number)
    }
}

#[derive(Debug, Default)]
pub struct FieldWriter {
    slots: Vec<Value>,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places `value` at index `number - 1`, padding earlier gaps with null.
    pub fn set(&mut self, number: u32, value: Value) {
        let Some(index) = (number as usize).checked_sub(1) else {
            return;
        };
        if self.slots.len() <= index {
            self.slots.resize(index + 1, Value::Null);
        }
        self.slots[index] = value;
    }

    pub fn finish(mut self) -> Value {
        while matches!(self.slots.last(), Some(Value::Null)) {
            self.slots.pop();
        }
        Value::Array(self.slots)
    }
}

/// Positional view over an encoded message.
///
/// A trailing JSON object is the sparse block for high-numbered fields; its
/// keys are decimal field numbers. Positions past the end are absent.
#[derive(Debug)]
pub struct FieldReader<'a> {
    message: &'static str,
    positional: &'a [Value],
    sparse: Option<&'a Map<String, Value>>,
}

impl<'a> FieldReader<'a> {
    pub fn new(value: &'a Value, message: &'static str) -> Result<Self, DecodeError> {
        let items = match value {
            Value::Array(items) => items.as_slice(),
            other => {
                return Err(DecodeError::NotAMessage {
                    message,
                    found: kind_of(other),
                })
            }
        };
        let (positional, sparse) = match items.split_last() {
            Some((Value::Object(map), rest)) => (rest, Some(map)),
            _ => (items, None),
        };
        Ok(Self {
            message,
            positional,
            sparse,
        })
    }

    /// Raw value at `number`, with JSON null treated as absent.
    pub fn raw(&self, number: u32) -> Option<&'a Value> {
        let positional = (number as usize)
            .checked_sub(1)
            .and_then(|index| self.positional.get(index));
        let value = match positional {
            Some(value) if !value.is_null() => Some(value),
            _ => self
                .sparse
                .and_then(|map| map.get(number.to_string().as_str())),
        };
        value.filter(|value| !value.is_null())
    }

    pub fn optional<T: Field>(&self, number: u32) -> Result<Option<T>, DecodeError> {
        self.raw(number)
            .map(|value| T::decode_field(value).map_err(|err| err.in_field(self.message, number)))
            .transpose()
    }

    pub fn repeated<T: Field>(&self, number: u32) -> Result<Vec<T>, DecodeError> {
        match self.raw(number) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| T::decode_field(item).map_err(|err| err.in_field(self.message, number)))
                .collect(),
            Some(other) => {
                Err(DecodeError::type_mismatch("repeated array", other).in_field(self.message, number))
            }
        }
    }
}
