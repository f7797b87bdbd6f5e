//! tests/config_tests.rs
//!
//! Environment overrides for `ProviderConfig`. Serialized because they touch
//! process-wide environment variables.

use injected_provider::core::config::ENV_PREFIX;
use injected_provider::{ProviderConfig, ProviderError};
use serial_test::serial;
use std::time::Duration;

const KEYS: [&str; 4] = ["REQUEST_TIMEOUT_MS", "DEFAULT_CHAIN_ID", "NAME", "MAX_PENDING_REQUESTS"];

fn clear_env() {
    for key in KEYS {
        std::env::remove_var(format!("{ENV_PREFIX}{key}"));
    }
}

#[test]
#[serial]
fn test_from_env_defaults() {
    clear_env();
    let config = ProviderConfig::from_env().unwrap();
    assert_eq!(config, ProviderConfig::default());
}

#[test]
#[serial]
fn test_from_env_overrides() {
    clear_env();
    std::env::set_var(format!("{ENV_PREFIX}REQUEST_TIMEOUT_MS"), "1500");
    std::env::set_var(format!("{ENV_PREFIX}DEFAULT_CHAIN_ID"), "0xaa36a7");
    std::env::set_var(format!("{ENV_PREFIX}NAME"), "Sim Wallet");

    let config = ProviderConfig::from_env().unwrap();
    assert_eq!(config.request_timeout(), Duration::from_millis(1500));
    assert_eq!(config.default_chain_id, "0xaa36a7");
    assert_eq!(config.identity.name, "Sim Wallet");
    clear_env();
}

#[test]
#[serial]
fn test_from_env_rejects_bad_values() {
    clear_env();
    std::env::set_var(format!("{ENV_PREFIX}MAX_PENDING_REQUESTS"), "many");
    assert!(matches!(ProviderConfig::from_env(), Err(ProviderError::InvalidParams(_))));

    clear_env();
    std::env::set_var(format!("{ENV_PREFIX}DEFAULT_CHAIN_ID"), "1");
    assert!(matches!(ProviderConfig::from_env(), Err(ProviderError::InvalidParams(_))));
    clear_env();
}
