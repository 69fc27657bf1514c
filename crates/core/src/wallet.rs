//! Detection of the ledger connection and account authorization.

use std::{sync::Arc, time::Duration};

use alloy::primitives::Address;
use dapp_common::{ProviderArgs, ProviderResult};
use thiserror::Error;

use crate::ledger::{Ledger, LedgerError, RpcLedger};

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("no ledger provider detected")]
    NoProviderDetected,
    #[error("account authorization denied: {0}")]
    AuthorizationDenied(String),
    #[error("failed to query the connected provider: {0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Accounts exposed only after an explicit authorization request.
    Modern,
    /// Accounts exposed without authorization.
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub account: Address,
    pub chain_id: u64,
}

/// The provider bound for the rest of the session.
pub struct ConnectedProvider<L> {
    pub ledger: Arc<L>,
    pub connection: Connection,
    pub kind: ProviderKind,
}

pub struct ProviderAdapter<L> {
    modern: Option<Arc<L>>,
    legacy: Option<Arc<L>>,
    authorization_timeout: Duration,
}

impl ProviderAdapter<RpcLedger> {
    /// `wallet` becomes the modern provider, `http` the legacy one.
    pub fn from_args(args: &ProviderArgs, authorization_timeout: Duration) -> ProviderResult<Self> {
        Ok(Self {
            modern: args.wallet_provider()?.map(|p| Arc::new(RpcLedger::new(p))),
            legacy: args.legacy_provider()?.map(|p| Arc::new(RpcLedger::new(p))),
            authorization_timeout,
        })
    }
}

impl<L: Ledger> ProviderAdapter<L> {
    pub fn new(modern: Option<L>, legacy: Option<L>, authorization_timeout: Duration) -> Self {
        Self {
            modern: modern.map(Arc::new),
            legacy: legacy.map(Arc::new),
            authorization_timeout,
        }
    }

    /// Tries the modern provider first. An authorization failure there is
    /// final; the legacy provider is only used when no modern one exists.
    pub async fn connect(&self) -> Result<ConnectedProvider<L>, ConnectError> {
        if let Some(ledger) = &self.modern {
            let accounts =
                match tokio::time::timeout(self.authorization_timeout, ledger.request_accounts())
                    .await
                {
                    Ok(Ok(accounts)) => accounts,
                    Ok(Err(err)) => {
                        tracing::warn!(%err, "wallet refused account authorization");
                        return Err(ConnectError::AuthorizationDenied(err.to_string()));
                    }
                    Err(_) => {
                        tracing::warn!(
                            timeout_secs = self.authorization_timeout.as_secs(),
                            "wallet did not answer the authorization request"
                        );
                        return Err(ConnectError::AuthorizationDenied(
                            "authorization request timed out".to_string(),
                        ));
                    }
                };
            return Self::bind(Arc::clone(ledger), accounts, ProviderKind::Modern).await;
        }

        if let Some(ledger) = &self.legacy {
            let accounts = ledger.accounts().await?;
            return Self::bind(Arc::clone(ledger), accounts, ProviderKind::Legacy).await;
        }

        tracing::error!("no wallet or RPC endpoint available");
        Err(ConnectError::NoProviderDetected)
    }

    async fn bind(
        ledger: Arc<L>,
        accounts: Vec<Address>,
        kind: ProviderKind,
    ) -> Result<ConnectedProvider<L>, ConnectError> {
        let Some(&account) = accounts.first() else {
            return Err(ConnectError::AuthorizationDenied(
                "provider exposes no accounts".to_string(),
            ));
        };
        let chain_id = ledger.chain_id().await?;

        tracing::info!(%account, chain_id, ?kind, "connected");
        Ok(ConnectedProvider {
            ledger,
            connection: Connection { account, chain_id },
            kind,
        })
    }
}
