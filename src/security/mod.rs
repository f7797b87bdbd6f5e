// src/security/mod.rs
//! Envelope integrity stamping and error-message sanitizing.

pub mod envelope;
pub mod error_sanitizer;

pub use envelope::SecureMessageSigner;
pub use error_sanitizer::{sanitize_for_logging, sanitize_relay_message};
