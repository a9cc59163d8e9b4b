//! JSON codec that survives round-tripping byte arrays embedded in structured data.
//!
//! Byte arrays are represented on the wire as `{"type": "Buffer", "data": "<base64>"}`.
//! The legacy form with `data` as an array of integers is accepted on decode.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::*;

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;

const BUFFER_TYPE_TAG: &str = "Buffer";

/// An owned byte array that serializes to the tagged-object wire form.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Buffer(pub Vec<u8>);

impl Buffer {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Buffer(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Buffer({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(bytes: Vec<u8>) -> Self {
        Buffer(bytes)
    }
}

impl Serialize for Buffer {
    fn serialize<S: Serializer>(&self, serializer: S) -> StdResult<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct(BUFFER_TYPE_TAG, 2)?;
        s.serialize_field("type", BUFFER_TYPE_TAG)?;
        s.serialize_field("data", &BASE64.encode(&self.0))?;
        s.end()
    }
}

#[derive(Deserialize)]
struct RawBuffer {
    #[serde(rename = "type")]
    tpe: String,
    data: RawBufferData,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBufferData {
    Base64(String),
    Bytes(Vec<u8>),
}

impl<'de> Deserialize<'de> for Buffer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> StdResult<Self, D::Error> {
        let raw = RawBuffer::deserialize(deserializer)?;
        if raw.tpe != BUFFER_TYPE_TAG {
            return Err(de::Error::custom(format!("Expected type '{BUFFER_TYPE_TAG}', got '{}'", raw.tpe)));
        }
        match raw.data {
            RawBufferData::Base64(s) =>
                BASE64.decode(s.as_bytes())
                    .map(Buffer)
                    .map_err(|e| de::Error::custom(format!("Malformed base64 buffer data: {e}"))),
            RawBufferData::Bytes(bytes) => Ok(Buffer(bytes)),
        }
    }
}

pub fn to_json_string<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub fn from_json_str<T: serde::de::DeserializeOwned>(s: &str) -> Result<T> {
    Ok(serde_json::from_str(s)?)
}

pub fn base64_encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Rewrites every buffer-shaped object inside an untyped value tree into the canonical
/// base64 form, traversing nested arrays and objects. Anything else passes through.
pub fn normalize_buffers(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            if let Some(bytes) = buffer_bytes_of(&map) {
                return buffer_value(&bytes);
            }
            Value::Object(map.into_iter().map(|(k, v)| (k, normalize_buffers(v))).collect())
        }
        Value::Array(values) =>
            Value::Array(values.into_iter().map(normalize_buffers).collect()),
        other => other,
    }
}

/// The canonical serialized form of a byte array, as an untyped value.
fn buffer_value(bytes: &[u8]) -> Value {
    let mut map = serde_json::Map::with_capacity(2);
    map.insert("type".to_owned(), Value::String(BUFFER_TYPE_TAG.to_owned()));
    map.insert("data".to_owned(), Value::String(BASE64.encode(bytes)));
    Value::Object(map)
}

/// If the map is shaped like a serialized buffer (either data form), its bytes.
fn buffer_bytes_of(map: &serde_json::Map<String, Value>) -> Option<Vec<u8>> {
    if map.len() != 2 || map.get("type").and_then(Value::as_str) != Some(BUFFER_TYPE_TAG) {
        return None;
    }
    match map.get("data")? {
        Value::String(s) => BASE64.decode(s.as_bytes()).ok(),
        Value::Array(values) => values.iter()
            .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
            .collect::<Option<Vec<u8>>>(),
        _ => None,
    }
}
