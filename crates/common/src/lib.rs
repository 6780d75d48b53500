//! Shared types for the handler pool workspace
//!
//! Configuration loading errors used by the gateway and a redacting wrapper
//! for credentials that end up in per-client headers.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
