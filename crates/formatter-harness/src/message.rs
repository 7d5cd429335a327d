//! Classification of framed messages.

use serde_json::{json, Value};

use crate::error::Result;
use crate::payload::ModuleImage;

/// A decoded message from the input stream.
#[derive(Debug, Clone)]
pub enum Message {
    /// `result.value.code` carried a compiled formatter module.
    Executable(ModuleImage),
    /// Anything else; echoed back unchanged.
    Diagnostic(Value),
}

impl Message {
    /// Classify a JSON message, decoding the embedded module if present.
    ///
    /// A `code` field that is present but not valid base64 is an error.
    pub fn from_value(value: Value) -> Result<Self> {
        match value.pointer("/result/value/code").and_then(Value::as_str) {
            Some(code) => Ok(Message::Executable(ModuleImage::from_base64(code)?)),
            None => Ok(Message::Diagnostic(value)),
        }
    }

    /// The JSON form of this message, as a plugin would send it.
    pub fn to_value(&self) -> Value {
        match self {
            Message::Executable(image) => {
                json!({ "result": { "value": { "code": image.to_base64() } } })
            }
            Message::Diagnostic(value) => value.clone(),
        }
    }

    /// Whether this message carries a module.
    pub fn is_executable(&self) -> bool {
        matches!(self, Message::Executable(_))
    }
}
