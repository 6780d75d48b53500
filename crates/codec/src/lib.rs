//! Request/response body codec contract
//!
//! A client proxy hands its outgoing payload to a `Codec` before the request
//! leaves through the pooled transport handler, and hands the response body
//! back to the same codec afterwards. Envelope formats (JSON-RPC, MessagePack,
//! Protobuf) plug in here; this crate only ships the plain JSON default.
//!
//! Payloads cross the boundary as `serde_json::Value` so codecs stay
//! dyn-compatible (`Arc<dyn Codec>` lives in every client configuration).

pub mod json;

pub use json::JsonCodec;

use serde_json::Value;

/// Errors raised while encoding a request body or decoding a response body.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode failed ({codec}): {reason}")]
    Encode { codec: String, reason: String },

    #[error("decode failed ({codec}): {reason}")]
    Decode { codec: String, reason: String },
}

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Body transformation applied around each outbound call.
pub trait Codec: Send + Sync {
    /// Identifier for logging (e.g. "json").
    fn id(&self) -> &str;

    /// Value sent as `Content-Type` and `Accept`.
    fn content_type(&self) -> &str;

    /// Serialize an outgoing payload.
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    /// Deserialize a response body. Implementations map an empty body to
    /// `Value::Null` so bodiless responses (204) decode cleanly.
    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}
