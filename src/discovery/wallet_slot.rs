//! The page's global wallet slot (`window.ethereum`) and its `providers` list.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

/// A provider object that can occupy the global slot.
pub trait InjectedWallet: Send + Sync {
    fn wallet_name(&self) -> &str;

    fn is_metamask(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// The slot was empty; the wallet now occupies it.
    Installed,
    /// Another wallet occupies the slot; this one joined its `providers` list.
    Appended,
    /// The wallet was already registered.
    AlreadyPresent,
}

fn same_wallet(a: &Arc<dyn InjectedWallet>, b: &Arc<dyn InjectedWallet>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Wallet slot shared by every wallet injected into one page.
#[derive(Default)]
pub struct GlobalWalletSlot {
    current: RwLock<Option<Arc<dyn InjectedWallet>>>,
    providers: RwLock<Vec<Arc<dyn InjectedWallet>>>,
}

impl GlobalWalletSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot already occupied by another wallet's provider.
    pub fn with_existing(existing: Arc<dyn InjectedWallet>) -> Self {
        Self { current: RwLock::new(Some(existing)), providers: RwLock::new(Vec::new()) }
    }

    /// Registers `wallet` without displacing a provider already in the slot.
    ///
    /// Lock order is `providers` then `current`; `current` is never held while
    /// taking `providers`.
    pub fn register(&self, wallet: Arc<dyn InjectedWallet>) -> RegistrationOutcome {
        let mut providers = self.providers.write();
        let current = self.current.read().clone();

        let Some(existing) = current else {
            *self.current.write() = Some(Arc::clone(&wallet));
            providers.push(wallet);
            return RegistrationOutcome::Installed;
        };

        if same_wallet(&existing, &wallet) || providers.iter().any(|p| same_wallet(p, &wallet)) {
            return RegistrationOutcome::AlreadyPresent;
        }

        if !providers.iter().any(|p| same_wallet(p, &existing)) {
            providers.insert(0, existing.clone());
        }
        info!(existing = existing.wallet_name(), joined = wallet.wallet_name(), "wallet slot shared");
        providers.push(wallet);
        RegistrationOutcome::Appended
    }

    /// Provider currently in the slot.
    pub fn current(&self) -> Option<Arc<dyn InjectedWallet>> {
        self.current.read().clone()
    }

    pub fn providers(&self) -> Vec<Arc<dyn InjectedWallet>> {
        self.providers.read().clone()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.read().iter().map(|p| p.wallet_name().to_string()).collect()
    }
}

impl std::fmt::Debug for GlobalWalletSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.current().map(|w| w.wallet_name().to_string());
        f.debug_struct("GlobalWalletSlot")
            .field("current", &current)
            .field("providers", &self.provider_names())
            .finish()
    }
}
