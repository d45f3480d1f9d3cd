use crate::error::FlowError;
use crate::jsonpointer::JsonPointer;
use crate::schema;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Data offered to a reactor.
///
/// A synthetic input is built by the server to replay an earlier submission against a
/// different flow or subtree; it bypasses schema validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    value: Value,
    #[serde(default)]
    synthetic: bool,
}

impl Input {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            synthetic: false,
        }
    }

    pub fn synthetic(value: Value) -> Self {
        Self {
            value,
            synthetic: true,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Decode the input into the shape a reactor expects.
    ///
    /// `None` means the input does not fit; reactors usually answer that with
    /// [`Outcome::Incompatible`](crate::outcome::Outcome::Incompatible).
    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_value(self.value.clone()).ok()
    }
}

/// The validation contract of a pending step, addressed by the configuration branch it
/// was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSchema {
    json_pointer: JsonPointer,
    document: Value,
}

impl InputSchema {
    pub fn new(json_pointer: JsonPointer, document: Value) -> Self {
        Self {
            json_pointer,
            document,
        }
    }

    /// Schema derived from a fixed-shape input type.
    pub fn for_type<T: JsonSchema>(json_pointer: JsonPointer) -> Self {
        let document = serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Bool(true));
        Self::new(json_pointer, document)
    }

    pub fn json_pointer(&self) -> &JsonPointer {
        &self.json_pointer
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn make_input(&self, raw: &Value) -> Result<Input, FlowError> {
        schema::validate(&self.document, raw)?;
        Ok(Input::new(raw.clone()))
    }
}
