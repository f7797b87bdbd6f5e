// src/discovery/mod.rs
//! EIP-6963 discovery and coexistence with other injected wallets.

pub mod announce;
pub mod wallet_slot;

pub use announce::{AnnounceDetail, AnnouncementBroadcaster, DiscoveryBus, ProviderAnnouncement};
pub use wallet_slot::{GlobalWalletSlot, InjectedWallet, RegistrationOutcome};
