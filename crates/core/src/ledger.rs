//! The client-side surface the pipeline needs from a ledger RPC provider.

use std::future::Future;

use alloy::{
    network::ReceiptResponse,
    primitives::{Address, Bytes, TxHash, U256},
    providers::{DynProvider, Provider},
    rpc::types::TransactionRequest,
    transports::{RpcError, TransportError, TransportErrorKind},
};
use thiserror::Error;

/// EIP-1193 "user rejected the request".
const USER_REJECTED_CODE: i64 = 4001;
/// Geth's code for `execution reverted`.
const EXECUTION_REVERTED_CODE: i64 = 3;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("request rejected by the user: {0}")]
    UserRejected(String),
    #[error("request rejected by the node: {0}")]
    NodeRejected(String),
    #[error("rpc error: {0}")]
    Rpc(#[source] TransportError),
    #[error("rpc request timed out")]
    Timeout,
}

impl LedgerError {
    /// Transient errors may succeed when the same read is issued again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Timeout)
    }
}

impl From<TransportError> for LedgerError {
    fn from(err: TransportError) -> Self {
        if is_http_timeout(&err) {
            return Self::Timeout;
        }
        if let Some(payload) = err.as_error_resp() {
            if payload.code == USER_REJECTED_CODE {
                return Self::UserRejected(payload.message.to_string());
            }
            if payload.code == EXECUTION_REVERTED_CODE || payload.message.contains("revert") {
                return Self::NodeRejected(payload.message.to_string());
            }
        }
        Self::Rpc(err)
    }
}

/// The HTTP transport boxes client errors as custom transport errors.
fn is_http_timeout(err: &TransportError) -> bool {
    match err {
        RpcError::Transport(TransportErrorKind::Custom(source)) => source
            .downcast_ref::<reqwest::Error>()
            .is_some_and(reqwest::Error::is_timeout),
        _ => false,
    }
}

/// Ledger RPC operations used by the pipeline.
pub trait Ledger: Send + Sync + 'static {
    /// Ask the wallet to expose its accounts (`eth_requestAccounts`).
    fn request_accounts(&self) -> impl Future<Output = LedgerResult<Vec<Address>>> + Send;

    /// Accounts already exposed without an authorization step (`eth_accounts`).
    fn accounts(&self) -> impl Future<Output = LedgerResult<Vec<Address>>> + Send;

    fn chain_id(&self) -> impl Future<Output = LedgerResult<u64>> + Send;

    fn balance(&self, account: Address) -> impl Future<Output = LedgerResult<U256>> + Send;

    /// Read-only contract call, returning the raw ABI-encoded result.
    fn call(&self, to: Address, input: Bytes)
    -> impl Future<Output = LedgerResult<Bytes>> + Send;

    /// Hands the transaction to the wallet for signing and returns its hash as
    /// soon as the provider reports one.
    fn send_transaction(
        &self,
        tx: TransactionRequest,
    ) -> impl Future<Output = LedgerResult<TxHash>> + Send;

    /// `None` while unmined, otherwise the receipt's success flag.
    fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> impl Future<Output = LedgerResult<Option<bool>>> + Send;
}

/// [`Ledger`] over an alloy provider.
#[derive(Clone, Debug)]
pub struct RpcLedger {
    provider: DynProvider,
}

impl RpcLedger {
    pub fn new(provider: DynProvider) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }
}

impl Ledger for RpcLedger {
    async fn request_accounts(&self) -> LedgerResult<Vec<Address>> {
        Ok(self
            .provider
            .client()
            .request_noparams("eth_requestAccounts")
            .await?)
    }

    async fn accounts(&self) -> LedgerResult<Vec<Address>> {
        Ok(self.provider.get_accounts().await?)
    }

    async fn chain_id(&self) -> LedgerResult<u64> {
        Ok(self.provider.get_chain_id().await?)
    }

    async fn balance(&self, account: Address) -> LedgerResult<U256> {
        Ok(self.provider.get_balance(account).await?)
    }

    async fn call(&self, to: Address, input: Bytes) -> LedgerResult<Bytes> {
        let tx = TransactionRequest::default().to(to).input(input.into());
        Ok(self.provider.call(tx).await?)
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> LedgerResult<TxHash> {
        let pending = self.provider.send_transaction(tx).await?;
        Ok(*pending.tx_hash())
    }

    async fn transaction_receipt(&self, hash: TxHash) -> LedgerResult<Option<bool>> {
        let receipt = self.provider.get_transaction_receipt(hash).await?;
        Ok(receipt.map(|r| r.status()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::rpc::json_rpc::ErrorPayload;

    fn error_resp(code: i64, message: &'static str) -> TransportError {
        TransportError::ErrorResp(ErrorPayload {
            code,
            message: message.into(),
            data: None,
        })
    }

    #[test]
    fn user_rejection_is_classified() {
        let err = LedgerError::from(error_resp(4001, "User denied transaction signature."));
        assert!(matches!(err, LedgerError::UserRejected(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn revert_is_a_node_rejection() {
        let err = LedgerError::from(error_resp(3, "execution reverted"));
        assert!(matches!(err, LedgerError::NodeRejected(_)));

        let err = LedgerError::from(error_resp(-32000, "VM Exception: revert"));
        assert!(matches!(err, LedgerError::NodeRejected(_)));
    }

    #[tokio::test]
    async fn http_timeout_is_reported_as_timeout() {
        // Accepts connections but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(50))
            .build()
            .unwrap();
        let http_err = client
            .post(format!("http://{addr}"))
            .send()
            .await
            .unwrap_err();
        assert!(http_err.is_timeout());

        let err = LedgerError::from(TransportErrorKind::custom(http_err));
        assert!(matches!(err, LedgerError::Timeout));
        assert!(err.is_transient());
    }

    #[test]
    fn other_errors_are_transient() {
        let err = LedgerError::from(error_resp(-32603, "internal error"));
        assert!(err.is_transient());
        assert!(LedgerError::Timeout.is_transient());
    }
}
