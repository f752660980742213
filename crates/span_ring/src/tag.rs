//! Attribute → Jaeger tag coercion.
//!
//! [`TagTransformer::transform`] maps every [`AttributeValue`] onto exactly one
//! [`TagValue`] kind. Precedence:
//!
//! | Attribute | Tag kind |
//! |-----------|----------|
//! | string, char | `string` (truncated to the configured limit) |
//! | bool | `bool` |
//! | integral | `long` (`u64` above `i64::MAX` falls back to `string`) |
//! | floating point | `double` (NaN and infinities fall back to `string`) |
//! | bytes | `binary` |
//! | array | `string` holding the JSON-encoded array |
//! | anything else | `string` via its `Display` impl |
//!
//! A value that fails to render (a `Display` impl returning an error, or any
//! element of a display array doing so) produces no tag at all.

use crate::span::{AttributeArray, AttributeValue};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// A typed key/value pair attached to a span, log, or process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JaegerTag {
    pub key: String,
    #[serde(flatten)]
    pub value: TagValue,
}

/// The value of a tag. Serializes as `"type": <kind>, "value": <typed>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum TagValue {
    String(String),
    Double(f64),
    Bool(bool),
    Long(i64),
    Binary(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl TagValue {
    /// Lower-cased Jaeger kind name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Double(_) => "double",
            Self::Bool(_) => "bool",
            Self::Long(_) => "long",
            Self::Binary(_) => "binary",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl JaegerTag {
    pub fn new(key: impl Into<String>, value: TagValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, TagValue::String(value.into()))
    }

    pub fn bool(key: impl Into<String>, value: bool) -> Self {
        Self::new(key, TagValue::Bool(value))
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Converts attribute values into Jaeger tags.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagTransformer {
    max_value_length: Option<usize>,
}

impl TagTransformer {
    /// Creates a transformer; string values longer than `max_value_length`
    /// characters are truncated.
    pub fn new(max_value_length: Option<usize>) -> Self {
        Self { max_value_length }
    }

    pub fn max_value_length(&self) -> Option<usize> {
        self.max_value_length
    }

    /// Converts one attribute into a tag, or `None` if the value cannot be
    /// rendered.
    pub fn transform(&self, key: &str, value: &AttributeValue) -> Option<JaegerTag> {
        let value = match value {
            AttributeValue::String(s) => TagValue::String(self.truncate(s).into_owned()),
            AttributeValue::Char(c) => TagValue::String(self.truncate(&c.to_string()).into_owned()),
            AttributeValue::Bool(b) => TagValue::Bool(*b),
            AttributeValue::Int(i) => TagValue::Long(*i),
            AttributeValue::UInt(u) => match i64::try_from(*u) {
                Ok(i) => TagValue::Long(i),
                Err(_) => TagValue::String(u.to_string()),
            },
            AttributeValue::Float(f) if f.is_finite() => TagValue::Double(*f),
            AttributeValue::Float(f) => TagValue::String(f.to_string()),
            AttributeValue::Bytes(bytes) => TagValue::Binary(bytes.clone()),
            AttributeValue::Array(array) => TagValue::String(self.transform_array(array)?),
            AttributeValue::Display(display) => {
                TagValue::String(self.truncate(&display.render()?).into_owned())
            }
        };
        Some(JaegerTag::new(key, value))
    }

    /// Converts a set of attributes, skipping any that fail to render.
    pub fn transform_all<'a, I>(&self, attributes: I) -> Vec<JaegerTag>
    where
        I: IntoIterator<Item = (&'a String, &'a AttributeValue)>,
    {
        attributes
            .into_iter()
            .filter_map(|(key, value)| {
                let tag = self.transform(key, value);
                if tag.is_none() {
                    tracing::trace!(key = %key, "dropped attribute that failed to render");
                }
                tag
            })
            .collect()
    }

    fn transform_array(&self, array: &AttributeArray) -> Option<String> {
        let encoded = match array {
            AttributeArray::Char(chars) => serde_json::to_string(chars),
            AttributeArray::Bool(bools) => serde_json::to_string(bools),
            AttributeArray::Int(ints) => serde_json::to_string(ints),
            AttributeArray::Float(floats) => {
                // JSON has no NaN or infinity; those elements become strings
                let elements: Vec<serde_json::Value> = floats
                    .iter()
                    .map(|f| match serde_json::Number::from_f64(*f) {
                        Some(n) => serde_json::Value::Number(n),
                        None => serde_json::Value::String(f.to_string()),
                    })
                    .collect();
                serde_json::to_string(&elements)
            }
            AttributeArray::String(strings) => {
                let truncated: Vec<Cow<'_, str>> =
                    strings.iter().map(|s| self.truncate(s)).collect();
                serde_json::to_string(&truncated)
            }
            AttributeArray::Display(values) => {
                let rendered = values
                    .iter()
                    .map(|v| v.render().map(|s| self.truncate(&s).into_owned()))
                    .collect::<Option<Vec<String>>>()?;
                serde_json::to_string(&rendered)
            }
        };
        encoded.ok()
    }

    fn truncate<'a>(&self, value: &'a str) -> Cow<'a, str> {
        match self.max_value_length {
            Some(max) => match value.char_indices().nth(max) {
                Some((byte_idx, _)) => Cow::Owned(value[..byte_idx].to_string()),
                None => Cow::Borrowed(value),
            },
            None => Cow::Borrowed(value),
        }
    }
}
