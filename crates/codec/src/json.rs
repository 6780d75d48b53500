//! Plain JSON codec, the default for every client configuration.

use serde_json::Value;

use crate::{Codec, CodecError, Result};

const CONTENT_TYPE: &str = "application/json";

/// Encodes payloads as compact JSON; decodes JSON bodies.
#[derive(Debug, Clone, Default)]
pub struct JsonCodec {
    content_type: Option<String>,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different media type (e.g. `application/json-rpc`) while keeping
    /// JSON framing.
    pub fn with_content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
        }
    }
}

impl Codec for JsonCodec {
    fn id(&self) -> &str {
        "json"
    }

    fn content_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or(CONTENT_TYPE)
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            codec: self.id().to_string(),
            reason: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            codec: self.id().to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_content_type_is_json() {
        assert_eq!(JsonCodec::new().content_type(), "application/json");
    }

    #[test]
    fn custom_content_type_is_reported() {
        let codec = JsonCodec::with_content_type("application/json-rpc");
        assert_eq!(codec.content_type(), "application/json-rpc");
        assert_eq!(codec.id(), "json");
    }

    #[test]
    fn encodes_compact_json() {
        let bytes = JsonCodec::new()
            .encode(&json!({"method": "add", "params": [1, 2]}))
            .unwrap();
        assert_eq!(bytes, br#"{"method":"add","params":[1,2]}"#);
    }

    #[test]
    fn empty_body_decodes_to_null() {
        let codec = JsonCodec::new();
        assert_eq!(codec.decode(b"").unwrap(), Value::Null);
        assert_eq!(codec.decode(b"  \n").unwrap(), Value::Null);
    }

    #[test]
    fn malformed_body_is_decode_error() {
        let err = JsonCodec::new().decode(b"{not json").unwrap_err();
        assert!(matches!(err, CodecError::Decode { .. }));
        assert!(err.to_string().starts_with("decode failed (json)"), "got: {err}");
    }
}
