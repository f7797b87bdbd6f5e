#![allow(clippy::new_without_default)]
// src/lib.rs
//! Injected EIP-1193 / EIP-6963 wallet provider and the message bridge to the
//! privileged wallet relay.
//!
//! The provider runs in an untrusted page. Keys, unlock state and signing stay
//! behind the relay; the page only ever sees request results, state pushes and
//! `{code, message}` errors.

pub mod bridge;
pub mod core;
pub mod discovery;
pub mod inject;
pub mod monitor;
pub mod network;
pub mod provider;
pub mod security;

pub use crate::core::config::ProviderConfig;
pub use crate::core::errors::{ProviderError, ProviderResult, RpcError};
pub use inject::{inject, HostEnvironment, Injection};
pub use provider::{PageProvider, RequestArguments};
