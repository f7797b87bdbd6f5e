// src/bridge/mod.rs
//! Page <-> relay message bridge: channel abstraction, wire format,
//! request correlation and an in-process relay for tests and simulation.

pub mod channel;
pub mod client;
pub mod messages;
pub mod mock;

pub use channel::{ChannelError, InboundEvent, MessageChannel, MessageSource};
pub use client::{BridgeClient, BridgeSettings, RelayTransport};
