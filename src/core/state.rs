//! Provider connection state and its transitions.
//!
//! Every mutator returns the EIP-1193 events the transition produces, in
//! emission order; the caller dispatches them after releasing its lock.

use serde::Serialize;
use tracing::{debug, info};

use crate::provider::events::ProviderEvent;

/// Connection lifecycle of one provider instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Locked,
}

/// Parses a `0x`-prefixed chain id without leading zeros.
pub fn parse_chain_id(chain_id: &str) -> Option<u64> {
    let digits = chain_id.strip_prefix("0x")?;
    if digits.is_empty() || digits.starts_with('0') {
        return None;
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(digits, 16).ok().filter(|id| *id > 0)
}

pub fn is_hex_chain_id(chain_id: &str) -> bool {
    parse_chain_id(chain_id).is_some()
}

/// Canonical lowercase form of a chain id, e.g. `0xA` -> `0xa`.
pub fn normalize_chain_id(chain_id: &str) -> Option<String> {
    parse_chain_id(chain_id).map(|id| format!("{id:#x}"))
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderState {
    connection: ConnectionState,
    chain_id: String,
    accounts: Vec<String>,
    is_unlocked: bool,
}

impl ProviderState {
    /// Fresh state at injection. `default_chain_id` must already be validated.
    pub fn new(default_chain_id: &str) -> Self {
        let chain_id = normalize_chain_id(default_chain_id).unwrap_or_else(|| "0x1".to_string());
        Self { connection: ConnectionState::Disconnected, chain_id, accounts: Vec::new(), is_unlocked: false }
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.connection, ConnectionState::Connected | ConnectionState::Locked)
    }

    pub fn is_unlocked(&self) -> bool {
        self.is_unlocked
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Decimal form of the chain id (`net_version`).
    pub fn network_version(&self) -> String {
        parse_chain_id(&self.chain_id).map(|id| id.to_string()).unwrap_or_default()
    }

    pub fn accounts(&self) -> &[String] {
        &self.accounts
    }

    pub fn selected_address(&self) -> Option<&str> {
        self.accounts.first().map(String::as_str)
    }

    /// `Disconnected -> Connecting`. Returns the state to restore if the attempt fails.
    pub fn begin_connecting(&mut self) -> ConnectionState {
        let previous = self.connection;
        if previous == ConnectionState::Disconnected {
            self.transition(ConnectionState::Connecting);
        }
        previous
    }

    /// Reverts a failed connection attempt.
    pub fn abort_connecting(&mut self, previous: ConnectionState) {
        if self.connection == ConnectionState::Connecting {
            self.transition(previous);
            if !self.is_connected() {
                self.accounts.clear();
            }
        }
    }

    /// Records the relay's lock report without touching the connection.
    pub fn set_unlocked(&mut self, unlocked: bool) {
        self.is_unlocked = unlocked;
    }

    /// A successful `eth_requestAccounts`; `accounts` is non-empty.
    pub fn complete_connect(&mut self, accounts: Vec<String>) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        self.is_unlocked = true;
        match self.connection {
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                self.transition(ConnectionState::Connected);
                events.push(ProviderEvent::Connect { chain_id: self.chain_id.clone() });
                self.accounts = accounts;
                events.push(ProviderEvent::AccountsChanged(self.accounts.clone()));
            }
            ConnectionState::Locked | ConnectionState::Connected => {
                self.transition(ConnectionState::Connected);
                if self.accounts != accounts {
                    self.accounts = accounts;
                    events.push(ProviderEvent::AccountsChanged(self.accounts.clone()));
                }
            }
        }
        events
    }

    /// `ACCOUNTS_CHANGED` push.
    pub fn apply_accounts(&mut self, accounts: Vec<String>) -> Vec<ProviderEvent> {
        if !self.is_connected() {
            debug!("ignoring accounts push while {:?}", self.connection);
            return Vec::new();
        }
        if self.accounts == accounts {
            return Vec::new();
        }
        self.accounts = accounts;
        vec![ProviderEvent::AccountsChanged(self.accounts.clone())]
    }

    /// `CHAIN_CHANGED` push or a successful chain switch; `chain_id` is validated.
    pub fn apply_chain(&mut self, chain_id: &str) -> Vec<ProviderEvent> {
        let Some(chain_id) = normalize_chain_id(chain_id) else {
            return Vec::new();
        };
        if self.chain_id == chain_id {
            return Vec::new();
        }
        info!(from = %self.chain_id, to = %chain_id, "chain changed");
        self.chain_id = chain_id;
        vec![ProviderEvent::ChainChanged(self.chain_id.clone())]
    }

    /// `CONNECT` push.
    pub fn apply_connect(&mut self, chain_id: Option<&str>, accounts: Option<Vec<String>>) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        if let Some(chain_id) = chain_id.and_then(normalize_chain_id) {
            self.chain_id = chain_id;
        }
        if !self.is_connected() {
            self.transition(ConnectionState::Connected);
            events.push(ProviderEvent::Connect { chain_id: self.chain_id.clone() });
        }
        if let Some(accounts) = accounts {
            if !accounts.is_empty() {
                self.is_unlocked = true;
            }
            if self.accounts != accounts {
                self.accounts = accounts;
                events.push(ProviderEvent::AccountsChanged(self.accounts.clone()));
            }
        }
        events
    }

    /// `DISCONNECT` push.
    pub fn apply_disconnect(&mut self, code: i64, message: String) -> Vec<ProviderEvent> {
        if !self.is_connected() {
            return Vec::new();
        }
        self.transition(ConnectionState::Disconnected);
        self.accounts.clear();
        vec![ProviderEvent::Disconnect { code, message }]
    }

    /// Lock push: `Connected -> Locked`.
    pub fn apply_lock(&mut self) -> Vec<ProviderEvent> {
        self.is_unlocked = false;
        if self.connection == ConnectionState::Connected {
            self.transition(ConnectionState::Locked);
        }
        Vec::new()
    }

    /// Unlock push: `Locked -> Connected`, reporting account changes.
    pub fn apply_unlock(&mut self, accounts: Option<Vec<String>>) -> Vec<ProviderEvent> {
        self.is_unlocked = true;
        if self.connection != ConnectionState::Locked {
            return Vec::new();
        }
        self.transition(ConnectionState::Connected);
        match accounts {
            Some(accounts) if accounts != self.accounts => {
                self.accounts = accounts;
                vec![ProviderEvent::AccountsChanged(self.accounts.clone())]
            }
            _ => Vec::new(),
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.connection != next {
            info!(from = ?self.connection, to = ?next, "provider state transition");
            self.connection = next;
        }
    }
}
