//! Error types for pool and client operations

/// Boxed error returned by handler factories and handler disposal.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from factory configuration, handler borrowing and client calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("handler creation failed: {0}")]
    HandlerCreation(#[source] BoxError),

    /// Only ever delivered to the disposal hook and logs.
    #[error("disposal of generation {generation} failed: {source}")]
    Disposal {
        generation: u64,
        #[source]
        source: BoxError,
    },

    #[error("invalid request url: {0}")]
    InvalidUrl(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Codec(#[from] codec::CodecError),

    #[error("client factory has been shut down")]
    ShutDown,
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn handler_creation_keeps_source() {
        let err = Error::HandlerCreation("too many open files".into());
        assert_eq!(
            err.to_string(),
            "handler creation failed: too many open files"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn disposal_names_generation() {
        let err = Error::Disposal {
            generation: 7,
            source: "close failed".into(),
        };
        assert_eq!(
            err.to_string(),
            "disposal of generation 7 failed: close failed"
        );
    }

    #[test]
    fn codec_error_is_transparent() {
        let err: Error = codec::CodecError::Decode {
            codec: "json".into(),
            reason: "eof".into(),
        }
        .into();
        assert_eq!(err.to_string(), "decode failed (json): eof");
    }
}
