//! The EIP-1193 provider object handed to the page.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bridge::channel::InboundEvent;
use crate::bridge::client::{BridgeClient, RelayTransport};
use crate::bridge::messages::{relay_methods, StatePush};
use crate::core::config::ProviderConfig;
use crate::core::errors::{ProviderError, ProviderResult, RpcError};
use crate::core::state::{ConnectionState, ProviderState};
use crate::discovery::wallet_slot::InjectedWallet;
use crate::monitor::notice::NoticeController;
use crate::provider::events::{EventEmitter, EventKind, Listener, ListenerId, ProviderEvent};
use crate::provider::methods::{validate_add_chain, validate_switch_chain, MethodStrategy, MethodTable};
use crate::provider::rpc::{JsonRpcRequest, JsonRpcResponse, RequestArguments};
use crate::provider::unlock::{UnlockCoordinator, UnlockSettings};

const REQUEST_ACCOUNTS: &str = "eth_requestAccounts";

/// Identity flags published on the provider object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletFlags {
    pub is_injected_wallet: bool,
    pub is_meta_mask: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderSnapshot {
    chain_id: String,
    #[serde(default)]
    accounts: Vec<String>,
    #[serde(default)]
    is_unlocked: bool,
}

pub struct PageProvider {
    bridge: Arc<BridgeClient>,
    unlock: UnlockCoordinator,
    state: Mutex<ProviderState>,
    events: EventEmitter,
    methods: MethodTable,
    name: String,
    flags: WalletFlags,
    notices: Option<Arc<NoticeController>>,
}

impl PageProvider {
    pub fn new(bridge: Arc<BridgeClient>, config: &ProviderConfig, notices: Option<Arc<NoticeController>>) -> Self {
        let transport: Arc<dyn RelayTransport> = bridge.clone();
        Self {
            unlock: UnlockCoordinator::new(transport, UnlockSettings::from(config)),
            bridge,
            state: Mutex::new(ProviderState::new(&config.default_chain_id)),
            events: EventEmitter::new(),
            methods: MethodTable::standard(),
            name: config.identity.name.clone(),
            flags: WalletFlags { is_injected_wallet: true, is_meta_mask: config.identity.metamask_compatible },
            notices,
        }
    }

    /// Replaces the method routing table.
    pub fn with_methods(mut self, methods: MethodTable) -> Self {
        self.methods = methods;
        self
    }

    pub fn flags(&self) -> WalletFlags {
        self.flags
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock().connection()
    }

    pub fn is_unlocked(&self) -> bool {
        self.state.lock().is_unlocked()
    }

    pub fn chain_id(&self) -> String {
        self.state.lock().chain_id().to_string()
    }

    pub fn network_version(&self) -> String {
        self.state.lock().network_version()
    }

    pub fn selected_address(&self) -> Option<String> {
        self.state.lock().selected_address().map(str::to_string)
    }

    pub fn accounts(&self) -> Vec<String> {
        self.state.lock().accounts().to_vec()
    }

    /// EIP-1193 `request`.
    pub async fn request(&self, args: RequestArguments) -> Result<Value, RpcError> {
        let params = args.params_or_default();
        self.route(&args.method, params).await.map_err(|err| self.reject(&args.method, err))
    }

    /// Legacy `enable()`, same as `eth_requestAccounts`.
    pub async fn enable(&self) -> Result<Vec<String>, RpcError> {
        let accounts = self.request(RequestArguments::method(REQUEST_ACCOUNTS)).await?;
        serde_json::from_value(accounts).map_err(|e| ProviderError::from(e).to_rpc_error())
    }

    /// Legacy `send(payload)`.
    pub async fn send(&self, payload: JsonRpcRequest) -> JsonRpcResponse {
        let outcome = self.request(RequestArguments::from(&payload)).await;
        JsonRpcResponse::for_request(&payload, outcome)
    }

    /// Legacy `sendAsync(payload, callback)`. The callback always receives the
    /// response; the error slot is set when the request failed.
    pub async fn send_async<F>(&self, payload: JsonRpcRequest, callback: F)
    where
        F: FnOnce(Option<RpcError>, Option<JsonRpcResponse>) + Send,
    {
        let response = self.send(payload).await;
        callback(response.error.clone(), Some(response));
    }

    pub fn on(&self, kind: EventKind, listener: Listener) -> ListenerId {
        self.events.on(kind, listener)
    }

    pub fn once(&self, kind: EventKind, listener: Listener) -> ListenerId {
        self.events.once(kind, listener)
    }

    pub fn remove_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        self.events.remove_listener(kind, id)
    }

    pub fn remove_all_listeners(&self, kind: Option<EventKind>) {
        self.events.remove_all_listeners(kind)
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.events.listener_count(kind)
    }

    /// Entry point for every window `message` event.
    pub fn handle_message(&self, event: &InboundEvent) {
        if let Some(push) = self.bridge.handle_inbound(event) {
            self.apply_push(push);
        }
    }

    /// Pulls the relay's current chain, accounts and lock state.
    pub async fn sync_state(&self) -> ProviderResult<()> {
        let raw = self.bridge.send_request(relay_methods::PROVIDER_STATE, json!([])).await?;
        let snapshot: ProviderSnapshot = serde_json::from_value(raw)
            .map_err(|e| ProviderError::MalformedResponse(format!("provider state: {e}")))?;

        let events = {
            let mut state = self.state.lock();
            let mut events = state.apply_chain(&snapshot.chain_id);
            state.set_unlocked(snapshot.is_unlocked);
            if !snapshot.accounts.is_empty() {
                events.extend(state.apply_connect(None, Some(snapshot.accounts)));
            }
            events
        };
        info!(chain_id = %self.chain_id(), connected = self.is_connected(), "provider state synced");
        self.dispatch(events);
        Ok(())
    }

    async fn route(&self, method: &str, params: Value) -> ProviderResult<Value> {
        if method.is_empty() {
            return Err(ProviderError::InvalidParams("method must be a non-empty string".to_string()));
        }
        if !params.is_array() && !params.is_object() {
            return Err(ProviderError::InvalidParams("params must be an array or an object".to_string()));
        }

        match self.methods.resolve(method) {
            MethodStrategy::RequestAccounts => self.request_accounts().await.map(|accounts| json!(accounts)),
            MethodStrategy::Accounts => Ok(json!(self.accounts())),
            MethodStrategy::ChainId => Ok(json!(self.chain_id())),
            MethodStrategy::NetVersion => Ok(json!(self.network_version())),
            MethodStrategy::SwitchChain => {
                let chain_id = validate_switch_chain(&params)?;
                self.change_chain(method, params, &chain_id).await
            }
            MethodStrategy::AddChain => {
                let chain_id = validate_add_chain(&params)?;
                self.change_chain(method, params, &chain_id).await
            }
            MethodStrategy::AccountGated => {
                if !self.is_unlocked() {
                    self.unlock_wallet().await?;
                }
                self.bridge.send_request(method, params).await
            }
            MethodStrategy::Delegate => self.bridge.send_request(method, params).await,
        }
    }

    fn reject(&self, method: &str, err: ProviderError) -> RpcError {
        if err == ProviderError::ExtensionContextInvalidated {
            if let Some(notices) = &self.notices {
                notices.report_invalidated();
            }
        }
        if err.is_user_decision() {
            debug!(method, error = %err, "request declined");
        } else {
            warn!(method, error = %err, "request failed");
        }
        err.to_rpc_error()
    }

    async fn request_accounts(&self) -> ProviderResult<Vec<String>> {
        let previous = {
            let mut state = self.state.lock();
            if state.connection() == ConnectionState::Connected && state.is_unlocked() && !state.accounts().is_empty() {
                return Ok(state.accounts().to_vec());
            }
            state.begin_connecting()
        };

        match self.connect().await {
            Ok(accounts) => {
                let events = self.state.lock().complete_connect(accounts.clone());
                self.dispatch(events);
                Ok(accounts)
            }
            Err(err) => {
                self.state.lock().abort_connecting(previous);
                Err(err)
            }
        }
    }

    async fn connect(&self) -> ProviderResult<Vec<String>> {
        let unlocked_here = !self.is_unlocked();
        if unlocked_here {
            self.unlock_wallet().await?;
        }

        let raw = match self.bridge.send_request(REQUEST_ACCOUNTS, json!([])).await {
            // Cached lock state was stale.
            Err(ProviderError::Unauthorized) if !unlocked_here => {
                self.state.lock().set_unlocked(false);
                self.unlock_wallet().await?;
                self.bridge.send_request(REQUEST_ACCOUNTS, json!([])).await
            }
            other => other,
        }?;

        let accounts: Vec<String> = serde_json::from_value(raw)
            .map_err(|e| ProviderError::MalformedResponse(format!("accounts: {e}")))?;
        if accounts.is_empty() {
            return Err(ProviderError::UserRejected);
        }
        Ok(accounts)
    }

    async fn unlock_wallet(&self) -> ProviderResult<()> {
        let outcome = self.unlock.request_unlock().await?;
        debug!(?outcome, "unlock finished");
        let events = self.state.lock().apply_unlock(None);
        self.dispatch(events);
        Ok(())
    }

    async fn change_chain(&self, method: &str, params: Value, chain_id: &str) -> ProviderResult<Value> {
        let result = self.bridge.send_request(method, params).await.map_err(|err| {
            if err.is_unsupported_chain() {
                ProviderError::UnsupportedChain(chain_id.to_string())
            } else {
                err
            }
        })?;
        let events = self.state.lock().apply_chain(chain_id);
        self.dispatch(events);
        Ok(result)
    }

    fn apply_push(&self, push: StatePush) {
        let events = match push {
            StatePush::Message { kind, data } => vec![ProviderEvent::Message { kind, data }],
            push => {
                let mut state = self.state.lock();
                match push {
                    StatePush::AccountsChanged(accounts) => state.apply_accounts(accounts),
                    StatePush::ChainChanged(chain_id) => state.apply_chain(&chain_id),
                    StatePush::Connect { chain_id, accounts } => state.apply_connect(chain_id.as_deref(), accounts),
                    StatePush::Disconnect { code, message } => state.apply_disconnect(code, message),
                    StatePush::LockState { is_unlocked: false, .. } => state.apply_lock(),
                    StatePush::LockState { is_unlocked: true, accounts } => state.apply_unlock(accounts),
                    StatePush::Message { .. } => Vec::new(),
                }
            }
        };
        self.dispatch(events);
    }

    fn dispatch(&self, events: Vec<ProviderEvent>) {
        for event in &events {
            debug!(event = %event.kind(), "emitting provider event");
            self.events.emit(event);
        }
    }
}

impl InjectedWallet for PageProvider {
    fn wallet_name(&self) -> &str {
        &self.name
    }

    fn is_metamask(&self) -> bool {
        self.flags.is_meta_mask
    }
}

impl std::fmt::Debug for PageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageProvider")
            .field("name", &self.name)
            .field("state", &*self.state.lock())
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}
