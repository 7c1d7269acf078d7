use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{message}: expected a positional array, found {found}")]
    NotAMessage {
        message: &'static str,
        found: &'static str,
    },
    #[error("expected {expected}, found {found}")]
    Type {
        expected: &'static str,
        found: &'static str,
    },
    #[error("integer {value} out of range for {target}")]
    OutOfRange { value: String, target: &'static str },
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("{message} field {number}: {source}")]
    Field {
        message: &'static str,
        number: u32,
        #[source]
        source: Box<DecodeError>,
    },
}

impl DecodeError {
    pub(crate) fn type_mismatch(expected: &'static str, found: &Value) -> Self {
        DecodeError::Type {
            expected,
            found: kind_of(found),
        }
    }

    pub(crate) fn in_field(self, message: &'static str, number: u32) -> Self {
        DecodeError::Field {
            message,
            number,
            source: Box::new(self),
        }
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
