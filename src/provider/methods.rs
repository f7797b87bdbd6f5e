//! Method routing for `request()`.
//!
//! A lookup table maps method names to the strategy that serves them; any
//! name not in the table is delegated to the relay unchanged.

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::core::errors::{ProviderError, ProviderResult};
use crate::core::state::is_hex_chain_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodStrategy {
    /// Connect flow: unlock if needed, then ask the relay for approval.
    RequestAccounts,
    /// Cached accounts, no prompt.
    Accounts,
    /// Cached chain id, no round trip.
    ChainId,
    /// Cached decimal chain id.
    NetVersion,
    /// Validate, delegate, then adopt the new chain.
    SwitchChain,
    AddChain,
    /// Delegate, unlocking first when the wallet is locked.
    AccountGated,
    Delegate,
}

#[derive(Debug, Clone)]
pub struct MethodTable {
    strategies: HashMap<String, MethodStrategy>,
}

impl MethodTable {
    pub fn standard() -> Self {
        let mut table = Self { strategies: HashMap::new() };
        table.register("eth_requestAccounts", MethodStrategy::RequestAccounts);
        table.register("eth_accounts", MethodStrategy::Accounts);
        table.register("eth_chainId", MethodStrategy::ChainId);
        table.register("net_version", MethodStrategy::NetVersion);
        table.register("wallet_switchEthereumChain", MethodStrategy::SwitchChain);
        table.register("wallet_addEthereumChain", MethodStrategy::AddChain);
        for method in [
            "eth_sendTransaction",
            "eth_signTransaction",
            "eth_sign",
            "personal_sign",
            "eth_signTypedData",
            "eth_signTypedData_v3",
            "eth_signTypedData_v4",
        ] {
            table.register(method, MethodStrategy::AccountGated);
        }
        table
    }

    /// Adds or replaces the strategy for `method`.
    pub fn register(&mut self, method: impl Into<String>, strategy: MethodStrategy) {
        self.strategies.insert(method.into(), strategy);
    }

    pub fn resolve(&self, method: &str) -> MethodStrategy {
        self.strategies.get(method).copied().unwrap_or(MethodStrategy::Delegate)
    }
}

impl Default for MethodTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// First positional parameter as an object.
fn first_object<'a>(params: &'a Value, method: &str) -> ProviderResult<&'a Map<String, Value>> {
    params
        .as_array()
        .and_then(|items| items.first())
        .and_then(Value::as_object)
        .ok_or_else(|| ProviderError::InvalidParams(format!("{method} expects [{{ chainId }}]")))
}

fn chain_id_field(object: &Map<String, Value>) -> ProviderResult<String> {
    match object.get("chainId").and_then(Value::as_str) {
        Some(chain_id) if is_hex_chain_id(chain_id) => Ok(chain_id.to_string()),
        Some(chain_id) => Err(ProviderError::InvalidParams(format!(
            "chainId must be a 0x-prefixed hex string without leading zeros, got {chain_id}"
        ))),
        None => Err(ProviderError::InvalidParams("missing chainId".to_string())),
    }
}

fn string_list(object: &Map<String, Value>, field: &str) -> ProviderResult<()> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(()),
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => Ok(()),
        Some(_) => Err(ProviderError::InvalidParams(format!("{field} must be an array of strings"))),
    }
}

/// Validates `wallet_switchEthereumChain` params, returning the target chain.
pub fn validate_switch_chain(params: &Value) -> ProviderResult<String> {
    let object = first_object(params, "wallet_switchEthereumChain")?;
    chain_id_field(object)
}

/// Validates `wallet_addEthereumChain` params, returning the chain being added.
pub fn validate_add_chain(params: &Value) -> ProviderResult<String> {
    let object = first_object(params, "wallet_addEthereumChain")?;
    let chain_id = chain_id_field(object)?;

    if let Some(name) = object.get("chainName") {
        if !name.is_string() {
            return Err(ProviderError::InvalidParams("chainName must be a string".to_string()));
        }
    }
    string_list(object, "rpcUrls")?;
    string_list(object, "blockExplorerUrls")?;
    string_list(object, "iconUrls")?;

    if let Some(currency) = object.get("nativeCurrency") {
        let valid = currency.as_object().is_some_and(|c| {
            c.get("name").is_some_and(Value::is_string)
                && c.get("symbol").is_some_and(Value::is_string)
                && c.get("decimals").is_some_and(Value::is_u64)
        });
        if !valid {
            return Err(ProviderError::InvalidParams(
                "nativeCurrency must be { name, symbol, decimals }".to_string(),
            ));
        }
    }
    Ok(chain_id)
}
