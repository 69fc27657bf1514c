use std::sync::Arc;

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{TxHash, U256},
};

use crate::{
    amount::ether_to_wei,
    artifact::{ContractArtifact, ContractHandle},
    config::SessionArgs,
    error::{PipelineError, PipelineResult},
    inflight::{InflightGuard, InflightTracker},
    ledger::Ledger,
    resolver::ContractResolver,
    store::StateStore,
    submit::{TransactionRecord, TransactionSubmitter},
    wallet::{Connection, ProviderAdapter},
};

const BANK_METHODS: &[&str] = &["deposit", "withdraw", "borrow", "payOff", "collateralEther"];
const TOKEN_METHODS: &[&str] = &["approve"];

/// Session over a collateralised lending contract and its token.
pub struct LendingDesk<L> {
    connection: Connection,
    bank: ContractHandle,
    token: ContractHandle,
    ledger: Arc<L>,
    submitter: TransactionSubmitter<L>,
    inflight: InflightTracker,
    store: StateStore,
}

impl<L: Ledger> LendingDesk<L> {
    pub async fn establish(
        adapter: &ProviderAdapter<L>,
        bank: &ContractArtifact,
        token: &ContractArtifact,
        store: StateStore,
        args: &SessionArgs,
    ) -> PipelineResult<Self> {
        let connected = store.surface(adapter.connect().await)?;
        let connection = connected.connection;

        let mut resolver = ContractResolver::new();
        let bank = store.surface(resolver.resolve(connection.chain_id, bank))?;
        let token = store.surface(resolver.resolve(connection.chain_id, token))?;
        store.surface(ContractResolver::ensure_methods(&bank, BANK_METHODS))?;
        store.surface(ContractResolver::ensure_methods(&token, TOKEN_METHODS))?;
        store.set_connection(&connection, bank.address());

        let ledger = connected.ledger;
        let desk = Self {
            connection,
            bank,
            token,
            submitter: TransactionSubmitter::new(
                Arc::clone(&ledger),
                store.clone(),
                args.receipt_poll_interval(),
                args.confirmation_timeout(),
            ),
            ledger,
            inflight: InflightTracker::new(args.inflight_ttl()),
            store,
        };

        // The first read is part of setup, so its failure ends the session.
        if let Err(err) = desk.refresh_balance().await {
            desk.store.record_failure(err.to_string());
            return Err(err);
        }
        desk.store.set_loading(false);
        Ok(desk)
    }

    pub fn connection(&self) -> Connection {
        self.connection
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub async fn refresh_balance(&self) -> PipelineResult<U256> {
        match self.ledger.balance(self.connection.account).await {
            Ok(balance) => {
                self.store.set_balance(balance);
                Ok(balance)
            }
            Err(err) => {
                tracing::error!(account = %self.connection.account, %err, "balance read failed");
                self.store.record_error(err.to_string());
                Err(err.into())
            }
        }
    }

    /// Deposits `amount` ether.
    pub async fn deposit(&self, amount: &str) -> PipelineResult<TxHash> {
        let value = ether_to_wei(amount)?;
        let guard = self.claim().await?;
        let result = self
            .send(&self.bank, TransactionRecord::new("deposit", vec![]).with_value(value))
            .await;
        self.finish(guard, result).await
    }

    pub async fn withdraw(&self) -> PipelineResult<TxHash> {
        let guard = self.claim().await?;
        let result = self
            .send(&self.bank, TransactionRecord::new("withdraw", vec![]))
            .await;
        self.finish(guard, result).await
    }

    /// Locks `amount` ether as collateral and borrows tokens against it.
    pub async fn borrow(&self, amount: &str) -> PipelineResult<TxHash> {
        let value = ether_to_wei(amount)?;
        let guard = self.claim().await?;
        let result = self
            .send(&self.bank, TransactionRecord::new("borrow", vec![]).with_value(value))
            .await;
        self.finish(guard, result).await
    }

    /// Approves the bank to take back half the collateral in tokens, then
    /// pays the loan off. Pay-off is never sent if the approval fails.
    pub async fn pay_off(&self) -> PipelineResult<TxHash> {
        let guard = self.claim().await?;
        let result = self.approve_and_pay_off().await;
        self.finish(guard, result).await
    }

    async fn approve_and_pay_off(&self) -> PipelineResult<TxHash> {
        let owed = self.collateral().await? / U256::from(2);
        tracing::info!(account = %self.connection.account, %owed, "paying off loan");

        self.send(
            &self.token,
            TransactionRecord::new(
                "approve",
                vec![
                    DynSolValue::Address(self.bank.address()),
                    DynSolValue::Uint(owed, 256),
                ],
            ),
        )
        .await?;
        self.send(&self.bank, TransactionRecord::new("payOff", vec![]))
            .await
    }

    async fn collateral(&self) -> PipelineResult<U256> {
        let account = self.connection.account;
        let input = self
            .bank
            .encode_call("collateralEther", &[DynSolValue::Address(account)])?;
        let raw = self.ledger.call(self.bank.address(), input).await?;
        let values = self.bank.decode_output("collateralEther", &raw)?;
        values
            .first()
            .and_then(DynSolValue::as_uint)
            .map(|(v, _)| v)
            .ok_or_else(|| PipelineError::UnexpectedOutput("collateralEther".to_string()))
    }

    async fn send(&self, handle: &ContractHandle, record: TransactionRecord) -> PipelineResult<TxHash> {
        Ok(self
            .submitter
            .submit(handle, record, self.connection.account)
            .await?)
    }

    async fn claim(&self) -> PipelineResult<InflightGuard> {
        self.inflight
            .acquire(self.connection.account)
            .await
            .ok_or(PipelineError::ActionInFlight(self.connection.account))
    }

    /// Releases the account and refreshes the balance after a confirmed action.
    async fn finish(
        &self,
        guard: InflightGuard,
        result: PipelineResult<TxHash>,
    ) -> PipelineResult<TxHash> {
        guard.release().await;
        if result.is_ok() {
            if let Err(err) = self.refresh_balance().await {
                tracing::warn!(%err, "balance refresh after confirmation failed");
            }
        }
        result
    }
}
