//! EIP-1193 events and the listener registry.
//!
//! Dispatch isolates listeners: a listener returning an error or panicking is
//! logged and skipped, and delivery continues with the remaining listeners.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// The fixed EIP-1193 event set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    AccountsChanged,
    ChainChanged,
    Message,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Connect,
        EventKind::Disconnect,
        EventKind::AccountsChanged,
        EventKind::ChainChanged,
        EventKind::Message,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::AccountsChanged => "accountsChanged",
            EventKind::ChainChanged => "chainChanged",
            EventKind::Message => "message",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Connect { chain_id: String },
    Disconnect { code: i64, message: String },
    AccountsChanged(Vec<String>),
    ChainChanged(String),
    Message { kind: String, data: Value },
}

impl ProviderEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ProviderEvent::Connect { .. } => EventKind::Connect,
            ProviderEvent::Disconnect { .. } => EventKind::Disconnect,
            ProviderEvent::AccountsChanged(_) => EventKind::AccountsChanged,
            ProviderEvent::ChainChanged(_) => EventKind::ChainChanged,
            ProviderEvent::Message { .. } => EventKind::Message,
        }
    }

    /// JSON payload as seen by page listeners.
    pub fn payload(&self) -> Value {
        match self {
            ProviderEvent::Connect { chain_id } => json!({ "chainId": chain_id }),
            ProviderEvent::Disconnect { code, message } => json!({ "code": code, "message": message }),
            ProviderEvent::AccountsChanged(accounts) => json!(accounts),
            ProviderEvent::ChainChanged(chain_id) => json!(chain_id),
            ProviderEvent::Message { kind, data } => json!({ "type": kind, "data": data }),
        }
    }
}

/// Page listener. Errors and panics are contained by the emitter.
pub type Listener = Arc<dyn Fn(&ProviderEvent) -> anyhow::Result<()> + Send + Sync>;

/// Boxes a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&ProviderEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Handle returned by [`EventEmitter::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    listener: Listener,
    once: bool,
}

/// Listener registry owned by one provider.
#[derive(Default)]
pub struct EventEmitter {
    listeners: Mutex<HashMap<EventKind, Vec<Registration>>>,
    next_id: AtomicU64,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, kind: EventKind, listener: Listener) -> ListenerId {
        self.register(kind, listener, false)
    }

    /// Listener removed after its first delivery.
    pub fn once(&self, kind: EventKind, listener: Listener) -> ListenerId {
        self.register(kind, listener, true)
    }

    fn register(&self, kind: EventKind, listener: Listener, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().entry(kind).or_default().push(Registration { id, listener, once });
        id
    }

    /// Returns whether a listener was removed.
    pub fn remove_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(list) = listeners.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| r.id != id);
        before != list.len()
    }

    pub fn remove_all_listeners(&self, kind: Option<EventKind>) {
        let mut listeners = self.listeners.lock();
        match kind {
            Some(kind) => {
                listeners.remove(&kind);
            }
            None => listeners.clear(),
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.lock().get(&kind).map(Vec::len).unwrap_or(0)
    }

    /// Delivers `event` to every listener registered for its kind.
    ///
    /// Returns the number of listeners that failed. Listeners run outside the
    /// registry lock, so they may register or remove listeners themselves.
    pub fn emit(&self, event: &ProviderEvent) -> usize {
        let kind = event.kind();
        let snapshot: Vec<(ListenerId, Listener)> = {
            let mut listeners = self.listeners.lock();
            let Some(list) = listeners.get_mut(&kind) else {
                return 0;
            };
            let snapshot = list.iter().map(|r| (r.id, Arc::clone(&r.listener))).collect();
            list.retain(|r| !r.once);
            snapshot
        };

        let mut failures = 0;
        for (id, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failures += 1;
                    warn!(event = %kind, listener = id.0, error = %err, "provider listener failed");
                }
                Err(_) => {
                    failures += 1;
                    warn!(event = %kind, listener = id.0, "provider listener panicked");
                }
            }
        }
        failures
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.lock();
        let counts: HashMap<&'static str, usize> =
            listeners.iter().map(|(kind, list)| (kind.as_str(), list.len())).collect();
        f.debug_struct("EventEmitter").field("listeners", &counts).finish()
    }
}
