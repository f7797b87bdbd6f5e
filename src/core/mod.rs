pub mod config;
pub mod errors;
pub mod state;

pub use config::{IdentityConfig, ProviderConfig};
pub use errors::{ProviderError, ProviderResult, RpcError};
pub use state::{ConnectionState, ProviderState};
