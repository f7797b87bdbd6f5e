// src/provider/mod.rs
//! The EIP-1193 provider exposed to the page.

pub mod events;
pub mod methods;
pub mod page_provider;
pub mod rpc;
pub mod unlock;

pub use events::{listener, EventEmitter, EventKind, Listener, ListenerId, ProviderEvent};
pub use page_provider::{PageProvider, WalletFlags};
pub use rpc::{JsonRpcRequest, JsonRpcResponse, RequestArguments};
pub use unlock::{UnlockCoordinator, UnlockOutcome};
