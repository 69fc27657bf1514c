use std::{sync::Arc, time::Duration};

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, TxHash, U256},
    rpc::types::TransactionRequest,
};
use thiserror::Error;

use crate::{
    artifact::{AbiError, ContractHandle},
    ledger::{Ledger, LedgerError},
    store::{StateStore, TxStatus},
};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("{method} was rejected: {reason}")]
    Rejected { method: String, reason: String },
    #[error("{method} reverted in transaction {tx_hash}")]
    Reverted { method: String, tx_hash: TxHash },
    #[error("rpc error while submitting: {0}")]
    Rpc(#[source] LedgerError),
    #[error("no receipt for {tx_hash} within {timeout:?}")]
    ConfirmationTimeout { tx_hash: TxHash, timeout: Duration },
    #[error(transparent)]
    Abi(#[from] AbiError),
}

/// A mutating contract call, alive for one submit-to-confirm cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub method: String,
    pub args: Vec<DynSolValue>,
    /// Value attached in the ledger's base unit.
    pub value: U256,
}

impl TransactionRecord {
    pub fn new(method: impl Into<String>, args: Vec<DynSolValue>) -> Self {
        Self {
            method: method.into(),
            args,
            value: U256::ZERO,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

/// Dispatches transactions and follows them to a terminal state, publishing
/// every transition to the [`StateStore`].
pub struct TransactionSubmitter<L> {
    ledger: Arc<L>,
    store: StateStore,
    poll_interval: Duration,
    confirmation_timeout: Duration,
}

impl<L: Ledger> TransactionSubmitter<L> {
    pub fn new(
        ledger: Arc<L>,
        store: StateStore,
        poll_interval: Duration,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            store,
            poll_interval,
            confirmation_timeout,
        }
    }

    /// Submits `record` from `from` and waits for its receipt.
    ///
    /// The loading flag is raised when the transaction is handed to the wallet
    /// and lowered as soon as a hash is observed, before confirmation.
    pub async fn submit(
        &self,
        handle: &ContractHandle,
        record: TransactionRecord,
        from: Address,
    ) -> Result<TxHash, SubmitError> {
        let input = handle.encode_call(&record.method, &record.args)?;
        let tx = TransactionRequest::default()
            .from(from)
            .to(handle.address())
            .input(input.into())
            .value(record.value);
        let method = record.method;

        self.store.record_transaction(TxStatus::Pending {
            method: method.clone(),
        });
        tracing::info!(contract = handle.name(), %method, value = %record.value, "dispatching transaction");

        let tx_hash = match self.ledger.send_transaction(tx).await {
            Ok(hash) => hash,
            Err(err) => {
                tracing::warn!(%method, %err, "transaction not accepted");
                self.store.record_transaction(TxStatus::Rejected {
                    method: method.clone(),
                    reason: err.to_string(),
                });
                return Err(match err {
                    LedgerError::UserRejected(reason) | LedgerError::NodeRejected(reason) => {
                        SubmitError::Rejected { method, reason }
                    }
                    other => SubmitError::Rpc(other),
                });
            }
        };

        self.store.record_transaction(TxStatus::HashObserved {
            method: method.clone(),
            hash: tx_hash,
        });
        tracing::info!(%method, %tx_hash, "transaction hash observed");

        match self.await_receipt(tx_hash, &method).await {
            Ok(()) => {
                tracing::info!(%method, %tx_hash, "transaction confirmed");
                self.store.record_transaction(TxStatus::Confirmed {
                    method,
                    hash: tx_hash,
                });
                Ok(tx_hash)
            }
            Err(err) => {
                tracing::error!(%method, %tx_hash, %err, "transaction did not confirm");
                self.store.record_transaction(TxStatus::Rejected {
                    method,
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn await_receipt(&self, tx_hash: TxHash, method: &str) -> Result<(), SubmitError> {
        let poll = async {
            loop {
                match self.ledger.transaction_receipt(tx_hash).await {
                    Ok(Some(true)) => return Ok(()),
                    Ok(Some(false)) => {
                        return Err(SubmitError::Reverted {
                            method: method.to_string(),
                            tx_hash,
                        });
                    }
                    Ok(None) => {}
                    Err(err) if err.is_transient() => {
                        tracing::debug!(%tx_hash, %err, "receipt poll failed");
                    }
                    Err(err) => return Err(SubmitError::Rpc(err)),
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        tokio::time::timeout(self.confirmation_timeout, poll)
            .await
            .map_err(|_| SubmitError::ConfirmationTimeout {
                tx_hash,
                timeout: self.confirmation_timeout,
            })?
    }
}
