use std::{sync::Arc, time::Duration};

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Bytes, U256},
};
use backon::{ExponentialBuilder, Retryable};
use thiserror::Error;

use crate::{
    artifact::{AbiError, ContractHandle},
    collection::{CollectionSnapshot, CollectionSpec, RecordError},
    ledger::{Ledger, LedgerError},
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to read the collection count: {0}")]
    ReadCount(#[source] LedgerError),
    #[error("failed to read item {id}: {source}")]
    ReadItem {
        id: u64,
        #[source]
        source: LedgerError,
    },
    #[error("item {id} does not match the expected record shape: {reason}")]
    InvalidRecord { id: u64, reason: RecordError },
    #[error("count getter returned no uint")]
    MalformedCount,
    #[error("collection count {0} does not fit in u64")]
    CountOverflow(U256),
    #[error(transparent)]
    Abi(#[from] AbiError),
}

impl SyncError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ReadCount(source) | Self::ReadItem { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

/// Reads a whole indexed collection into a [`CollectionSnapshot`].
///
/// A pass reads the count once and then each id in the configured order.
/// Every read is retried while the ledger reports a transient error; any
/// failure that survives the retries aborts the pass so no partial snapshot
/// is ever produced.
pub struct CollectionSynchronizer<L> {
    ledger: Arc<L>,
    spec: CollectionSpec,
    backoff: ExponentialBuilder,
}

impl<L: Ledger> CollectionSynchronizer<L> {
    pub fn new(ledger: Arc<L>, spec: CollectionSpec, backoff: ExponentialBuilder) -> Self {
        Self {
            ledger,
            spec,
            backoff,
        }
    }

    pub fn spec(&self) -> &CollectionSpec {
        &self.spec
    }

    pub async fn sync_all(&self, handle: &ContractHandle) -> Result<CollectionSnapshot, SyncError> {
        let count = self.read_count(handle).await?;
        tracing::debug!(contract = handle.name(), count, "collection count");

        let mut items = Vec::with_capacity(count.min(1024) as usize);
        for id in self.spec.order.ids(count) {
            let input = handle.encode_call(
                &self.spec.item_method,
                &[DynSolValue::Uint(U256::from(id), 256)],
            )?;
            let raw = self
                .read(handle, input)
                .await
                .map_err(|source| SyncError::ReadItem { id, source })?;

            let function = handle.function(&self.spec.item_method)?;
            let values = handle.decode_output(&self.spec.item_method, &raw)?;
            let item = self
                .spec
                .fields
                .decode(id, function, &values)
                .map_err(|reason| {
                    tracing::warn!(contract = handle.name(), id, %reason, "rejecting malformed record");
                    SyncError::InvalidRecord { id, reason }
                })?;
            items.push(item);
        }

        if let Some(sort) = &self.spec.sort {
            sort.apply(&mut items);
        }

        tracing::info!(contract = handle.name(), count, "collection synchronized");
        Ok(CollectionSnapshot::new(items, count))
    }

    async fn read_count(&self, handle: &ContractHandle) -> Result<u64, SyncError> {
        let input = handle.encode_call(&self.spec.count_method, &[])?;
        let raw = self
            .read(handle, input)
            .await
            .map_err(SyncError::ReadCount)?;
        let values = handle.decode_output(&self.spec.count_method, &raw)?;

        let count = values
            .first()
            .and_then(DynSolValue::as_uint)
            .map(|(v, _)| v)
            .ok_or(SyncError::MalformedCount)?;
        u64::try_from(count).map_err(|_| SyncError::CountOverflow(count))
    }

    async fn read(&self, handle: &ContractHandle, input: Bytes) -> Result<Bytes, LedgerError> {
        let to = handle.address();
        (|| self.ledger.call(to, input.clone()))
            .retry(self.backoff)
            .when(LedgerError::is_transient)
            .notify(|err: &LedgerError, delay: Duration| {
                tracing::warn!(
                    contract = handle.name(),
                    delay_ms = delay.as_millis() as u64,
                    %err,
                    "retrying collection read"
                );
            })
            .await
    }
}
