use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::core::errors::{ProviderError, ProviderResult};
use crate::core::state::is_hex_chain_id;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "INJECTED_PROVIDER_";

/// Identity published through EIP-6963.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityConfig {
    #[serde(default = "IdentityConfig::default_name")]
    pub name: String,

    /// Reverse-DNS identifier, e.g. `com.example.wallet`.
    #[serde(default = "IdentityConfig::default_rdns")]
    pub rdns: String,

    /// Icon as a `data:image/...` URI.
    #[serde(default = "IdentityConfig::default_icon")]
    pub icon: String,

    /// Set `isMetaMask` on the provider for dApps that only probe that flag.
    #[serde(default)]
    pub metamask_compatible: bool,
}

impl IdentityConfig {
    fn default_name() -> String { "Injected Wallet".to_string() }
    fn default_rdns() -> String { "io.injected.wallet".to_string() }
    fn default_icon() -> String {
        "data:image/svg+xml,%3Csvg xmlns='http://www.w3.org/2000/svg' viewBox='0 0 32 32'%3E%3Ccircle cx='16' cy='16' r='16'/%3E%3C/svg%3E".to_string()
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            rdns: Self::default_rdns(),
            icon: Self::default_icon(),
            metamask_compatible: false,
        }
    }
}

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Per-request window for relay round trips (milliseconds)
    #[serde(default = "ProviderConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Unlock status polling interval (milliseconds)
    #[serde(default = "ProviderConfig::default_unlock_poll_interval_ms")]
    pub unlock_poll_interval_ms: u64,

    /// Hard ceiling for one unlock attempt (milliseconds)
    #[serde(default = "ProviderConfig::default_unlock_ceiling_ms")]
    pub unlock_ceiling_ms: u64,

    /// Extension liveness probe interval (milliseconds)
    #[serde(default = "ProviderConfig::default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    /// Timeout of a single liveness probe (milliseconds)
    #[serde(default = "ProviderConfig::default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// How long an on-page notice stays visible (milliseconds)
    #[serde(default = "ProviderConfig::default_notice_ttl_ms")]
    pub notice_ttl_ms: u64,

    /// Minimum spacing between recovery re-announcements (milliseconds)
    #[serde(default = "ProviderConfig::default_recovery_min_interval_ms")]
    pub recovery_min_interval_ms: u64,

    /// Pending request table capacity
    #[serde(default = "ProviderConfig::default_max_pending_requests")]
    pub max_pending_requests: usize,

    /// Chain reported before the relay tells us otherwise
    #[serde(default = "ProviderConfig::default_chain_id")]
    pub default_chain_id: String,

    #[serde(default)]
    pub identity: IdentityConfig,
}

impl ProviderConfig {
    fn default_request_timeout_ms() -> u64 { 30_000 }
    fn default_unlock_poll_interval_ms() -> u64 { 1_000 }
    fn default_unlock_ceiling_ms() -> u64 { 60_000 }
    fn default_monitor_interval_ms() -> u64 { 30_000 }
    fn default_probe_timeout_ms() -> u64 { 5_000 }
    fn default_notice_ttl_ms() -> u64 { 6_000 }
    fn default_recovery_min_interval_ms() -> u64 { 10_000 }
    fn default_max_pending_requests() -> usize { 1_024 }
    fn default_chain_id() -> String { "0x1".to_string() }

    pub fn request_timeout(&self) -> Duration { Duration::from_millis(self.request_timeout_ms) }
    pub fn unlock_poll_interval(&self) -> Duration { Duration::from_millis(self.unlock_poll_interval_ms) }
    pub fn unlock_ceiling(&self) -> Duration { Duration::from_millis(self.unlock_ceiling_ms) }
    pub fn monitor_interval(&self) -> Duration { Duration::from_millis(self.monitor_interval_ms) }
    pub fn probe_timeout(&self) -> Duration { Duration::from_millis(self.probe_timeout_ms) }
    pub fn notice_ttl(&self) -> Duration { Duration::from_millis(self.notice_ttl_ms) }
    pub fn recovery_min_interval(&self) -> Duration { Duration::from_millis(self.recovery_min_interval_ms) }

    /// Parses a TOML document; missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> ProviderResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ProviderError::InvalidParams(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `INJECTED_PROVIDER_*` environment variables.
    pub fn from_env() -> ProviderResult<Self> {
        let mut config = Self::default();

        fn read_u64(key: &str) -> ProviderResult<Option<u64>> {
            match env::var(format!("{ENV_PREFIX}{key}")) {
                Ok(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| ProviderError::InvalidParams(format!("{ENV_PREFIX}{key}: not a number"))),
                Err(_) => Ok(None),
            }
        }

        if let Some(v) = read_u64("REQUEST_TIMEOUT_MS")? { config.request_timeout_ms = v; }
        if let Some(v) = read_u64("UNLOCK_POLL_INTERVAL_MS")? { config.unlock_poll_interval_ms = v; }
        if let Some(v) = read_u64("UNLOCK_CEILING_MS")? { config.unlock_ceiling_ms = v; }
        if let Some(v) = read_u64("MONITOR_INTERVAL_MS")? { config.monitor_interval_ms = v; }
        if let Some(v) = read_u64("PROBE_TIMEOUT_MS")? { config.probe_timeout_ms = v; }
        if let Some(v) = read_u64("NOTICE_TTL_MS")? { config.notice_ttl_ms = v; }
        if let Some(v) = read_u64("RECOVERY_MIN_INTERVAL_MS")? { config.recovery_min_interval_ms = v; }
        if let Some(v) = read_u64("MAX_PENDING_REQUESTS")? { config.max_pending_requests = v as usize; }
        if let Ok(chain_id) = env::var(format!("{ENV_PREFIX}DEFAULT_CHAIN_ID")) {
            config.default_chain_id = chain_id.trim().to_string();
        }
        if let Ok(name) = env::var(format!("{ENV_PREFIX}NAME")) {
            config.identity.name = name;
        }
        if let Ok(rdns) = env::var(format!("{ENV_PREFIX}RDNS")) {
            config.identity.rdns = rdns;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ProviderResult<()> {
        if self.request_timeout_ms == 0 {
            return Err(ProviderError::InvalidParams("request_timeout_ms must be > 0".into()));
        }
        if self.unlock_poll_interval_ms == 0 || self.unlock_poll_interval_ms > self.unlock_ceiling_ms {
            return Err(ProviderError::InvalidParams(
                "unlock_poll_interval_ms must be > 0 and <= unlock_ceiling_ms".into(),
            ));
        }
        if self.monitor_interval_ms == 0 || self.probe_timeout_ms == 0 {
            return Err(ProviderError::InvalidParams("monitor intervals must be > 0".into()));
        }
        if self.max_pending_requests == 0 {
            return Err(ProviderError::InvalidParams("max_pending_requests must be > 0".into()));
        }
        if !is_hex_chain_id(&self.default_chain_id) {
            return Err(ProviderError::InvalidParams(format!(
                "default_chain_id {} is not a 0x-prefixed hex string",
                self.default_chain_id
            )));
        }
        if !self.identity.icon.starts_with("data:image/") {
            return Err(ProviderError::InvalidParams("identity.icon must be a data:image URI".into()));
        }
        if self.identity.rdns.split('.').filter(|s| !s.is_empty()).count() < 2 {
            return Err(ProviderError::InvalidParams("identity.rdns must be reverse-DNS".into()));
        }
        Ok(())
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: Self::default_request_timeout_ms(),
            unlock_poll_interval_ms: Self::default_unlock_poll_interval_ms(),
            unlock_ceiling_ms: Self::default_unlock_ceiling_ms(),
            monitor_interval_ms: Self::default_monitor_interval_ms(),
            probe_timeout_ms: Self::default_probe_timeout_ms(),
            notice_ttl_ms: Self::default_notice_ttl_ms(),
            recovery_min_interval_ms: Self::default_recovery_min_interval_ms(),
            max_pending_requests: Self::default_max_pending_requests(),
            default_chain_id: Self::default_chain_id(),
            identity: IdentityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ProviderConfig::default();
        config.validate().unwrap();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.unlock_ceiling(), Duration::from_secs(60));
        assert_eq!(config.default_chain_id, "0x1");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ProviderConfig::from_toml_str(
            r#"
            request_timeout_ms = 5000
            default_chain_id = "0x89"

            [identity]
            name = "Test Wallet"
            "#,
        )
        .unwrap();
        assert_eq!(config.request_timeout_ms, 5000);
        assert_eq!(config.default_chain_id, "0x89");
        assert_eq!(config.identity.name, "Test Wallet");
        assert_eq!(config.identity.rdns, "io.injected.wallet");
        assert_eq!(config.unlock_poll_interval_ms, 1000);
    }

    #[test]
    fn test_rejects_decimal_chain_id() {
        let err = ProviderConfig::from_toml_str("default_chain_id = \"137\"").unwrap_err();
        assert!(matches!(err, ProviderError::InvalidParams(_)));
    }

    #[test]
    fn test_rejects_poll_longer_than_ceiling() {
        let config = ProviderConfig {
            unlock_poll_interval_ms: 120_000,
            ..ProviderConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
