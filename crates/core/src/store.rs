//! Application state shared between the pipeline and its consumers.
//!
//! Every write replaces fields of [`AppState`] inside a single
//! `watch::Sender::send_modify`, so readers only ever see whole updates.

use std::{fmt, sync::Arc};

use alloy::primitives::{Address, TxHash, U256};
use tokio::sync::watch;

use crate::{
    collection::{CollectionItem, CollectionSnapshot},
    wallet::Connection,
};

/// Where a submitted transaction currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Dispatched to the wallet for signing.
    Pending { method: String },
    HashObserved { method: String, hash: TxHash },
    Confirmed { method: String, hash: TxHash },
    Rejected { method: String, reason: String },
}

impl TxStatus {
    pub fn method(&self) -> &str {
        match self {
            Self::Pending { method }
            | Self::HashObserved { method, .. }
            | Self::Confirmed { method, .. }
            | Self::Rejected { method, .. } => method,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed { .. } | Self::Rejected { .. })
    }
}

/// Which item is selected after each synchronization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// Keep the current selection while it still exists.
    #[default]
    Keep,
    /// Select the highest id.
    Latest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppState {
    pub account: Option<Address>,
    pub chain_id: Option<u64>,
    pub contract: Option<Address>,
    /// True from startup until the first sync or a terminal failure, and
    /// while a mutating transaction awaits its hash.
    pub loading: bool,
    pub collection: CollectionSnapshot,
    pub selected: Option<u64>,
    pub balance: Option<U256>,
    pub tx: Option<TxStatus>,
    /// Last user-visible failure.
    pub error: Option<String>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            account: None,
            chain_id: None,
            contract: None,
            loading: true,
            collection: CollectionSnapshot::default(),
            selected: None,
            balance: None,
            tx: None,
            error: None,
        }
    }
}

impl AppState {
    pub fn selected_item(&self) -> Option<&CollectionItem> {
        self.selected.and_then(|id| self.collection.get(id))
    }
}

#[derive(Clone, Debug)]
pub struct StateStore {
    tx: Arc<watch::Sender<AppState>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AppState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> AppState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.tx.subscribe()
    }

    pub fn set_connection(&self, connection: &Connection, contract: Address) {
        self.tx.send_modify(|state| {
            state.account = Some(connection.account);
            state.chain_id = Some(connection.chain_id);
            state.contract = Some(contract);
            state.error = None;
        });
    }

    /// Publishes a completed pass and clears the loading flag.
    pub fn replace_collection(&self, snapshot: CollectionSnapshot, policy: SelectionPolicy) {
        self.tx.send_modify(|state| {
            state.selected = match policy {
                SelectionPolicy::Latest => snapshot.latest().map(|item| item.id),
                SelectionPolicy::Keep => state.selected.filter(|id| snapshot.get(*id).is_some()),
            };
            state.collection = snapshot;
            state.loading = false;
        });
    }

    pub fn set_loading(&self, loading: bool) {
        self.tx.send_if_modified(|state| {
            let changed = state.loading != loading;
            state.loading = loading;
            changed
        });
    }

    /// Returns false when `id` is not in the current collection.
    pub fn select(&self, id: u64) -> bool {
        self.tx.send_if_modified(|state| {
            if state.collection.get(id).is_none() {
                return false;
            }
            state.selected = Some(id);
            true
        })
    }

    pub fn set_balance(&self, balance: U256) {
        self.tx.send_modify(|state| state.balance = Some(balance));
    }

    /// Records a transaction transition. Dispatch raises the loading flag;
    /// every later transition lowers it.
    pub fn record_transaction(&self, status: TxStatus) {
        self.tx.send_modify(|state| {
            state.loading = matches!(status, TxStatus::Pending { .. });
            if let TxStatus::Rejected { reason, .. } = &status {
                state.error = Some(reason.clone());
            }
            state.tx = Some(status);
        });
    }

    /// Records a user-visible failure that leaves the loading flag alone.
    pub fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|state| state.error = Some(message));
    }

    /// Records a failure that ends the session and clears the loading flag.
    pub fn record_failure(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|state| {
            state.error = Some(message);
            state.loading = false;
        });
    }

    /// Passes `result` through, recording an error as a session-ending failure.
    pub fn surface<T, E: fmt::Display>(&self, result: Result<T, E>) -> Result<T, E> {
        if let Err(err) = &result {
            self.record_failure(err.to_string());
        }
        result
    }
}
