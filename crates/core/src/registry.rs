//! Session over a content registry contract (image or video registry).
//!
//! The session is built by [`RegistrySession::establish`] (connect, resolve,
//! method surface check) and becomes usable for mutating actions after the
//! first successful [`RegistrySession::refresh`].

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{TxHash, U256},
};
use tokio::sync::Mutex;

use crate::{
    amount::ether_to_wei,
    artifact::{AbiError, ContractArtifact, ContractHandle},
    collection::{CollectionSnapshot, CollectionSpec},
    config::SessionArgs,
    content::{ContentStore, ContentUploader, PendingUpload},
    error::{PipelineError, PipelineResult},
    inflight::InflightTracker,
    ledger::Ledger,
    resolver::ContractResolver,
    store::{SelectionPolicy, StateStore},
    submit::{TransactionRecord, TransactionSubmitter},
    sync::CollectionSynchronizer,
    wallet::{Connection, ProviderAdapter},
};

/// What a registry contract looks like and how its session behaves.
#[derive(Debug, Clone)]
pub struct RegistryProfile {
    pub collection: CollectionSpec,
    /// `upload(contentId, metadata)`
    pub upload_method: String,
    /// Payable `tip(id)`, when the registry supports tipping.
    pub tip_method: Option<String>,
    pub selection: SelectionPolicy,
}

impl RegistryProfile {
    pub fn media() -> Self {
        Self {
            collection: CollectionSpec::media_registry(),
            upload_method: "uploadImage".into(),
            tip_method: Some("tipImageOwner".into()),
            selection: SelectionPolicy::Keep,
        }
    }

    pub fn video() -> Self {
        Self {
            collection: CollectionSpec::video_registry(),
            upload_method: "uploadVideo".into(),
            tip_method: None,
            selection: SelectionPolicy::Latest,
        }
    }

    fn required_methods(&self) -> Vec<&str> {
        let mut methods = vec![
            self.collection.count_method.as_str(),
            self.collection.item_method.as_str(),
            self.upload_method.as_str(),
        ];
        methods.extend(self.tip_method.as_deref());
        methods
    }
}

pub struct RegistrySession<L, S> {
    connection: Connection,
    handle: ContractHandle,
    profile: RegistryProfile,
    synchronizer: CollectionSynchronizer<L>,
    uploader: ContentUploader<S>,
    submitter: TransactionSubmitter<L>,
    inflight: InflightTracker,
    store: StateStore,
    synced: AtomicBool,
    /// Held for a whole pass so passes publish in the order they started.
    pass: Mutex<()>,
}

impl<L: Ledger, S: ContentStore> RegistrySession<L, S> {
    /// Connects and resolves the registry. Failures here end the session and
    /// are recorded in `store`.
    pub async fn establish(
        adapter: &ProviderAdapter<L>,
        artifact: &ContractArtifact,
        profile: RegistryProfile,
        content: S,
        store: StateStore,
        args: &SessionArgs,
    ) -> PipelineResult<Self> {
        let connected = store.surface(adapter.connect().await)?;
        let connection = connected.connection;

        let mut resolver = ContractResolver::new();
        let handle = store.surface(resolver.resolve(connection.chain_id, artifact))?;
        store.surface(ContractResolver::ensure_methods(
            &handle,
            &profile.required_methods(),
        ))?;
        store.set_connection(&connection, handle.address());

        let ledger = connected.ledger;
        Ok(Self {
            connection,
            synchronizer: CollectionSynchronizer::new(
                Arc::clone(&ledger),
                profile.collection.clone(),
                args.sync_backoff(),
            ),
            submitter: TransactionSubmitter::new(
                ledger,
                store.clone(),
                args.receipt_poll_interval(),
                args.confirmation_timeout(),
            ),
            uploader: ContentUploader::new(content),
            inflight: InflightTracker::new(args.inflight_ttl()),
            handle,
            profile,
            store,
            synced: AtomicBool::new(false),
            pass: Mutex::new(()),
        })
    }

    pub fn connection(&self) -> Connection {
        self.connection
    }

    pub fn handle(&self) -> &ContractHandle {
        &self.handle
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Runs one synchronization pass and publishes it. A failed pass leaves
    /// the previous snapshot in place.
    pub async fn refresh(&self) -> PipelineResult<CollectionSnapshot> {
        let _pass = self.pass.lock().await;
        match self.synchronizer.sync_all(&self.handle).await {
            Ok(snapshot) => {
                self.store
                    .replace_collection(snapshot.clone(), self.profile.selection);
                self.synced.store(true, Ordering::Release);
                Ok(snapshot)
            }
            Err(err) => {
                tracing::error!(contract = self.handle.name(), %err, "synchronization failed");
                self.store.record_error(err.to_string());
                Err(err.into())
            }
        }
    }

    /// Stores the payload, then records its identifier on-chain with the
    /// upload's metadata. Nothing is submitted when the upload fails.
    pub async fn upload(&self, pending: PendingUpload) -> PipelineResult<TxHash> {
        self.ensure_synced()?;
        let guard = self
            .inflight
            .acquire(self.connection.account)
            .await
            .ok_or(PipelineError::ActionInFlight(self.connection.account))?;

        let result = self.upload_and_submit(pending).await;
        guard.release().await;
        result
    }

    /// Sends `amount` ether to the owner of item `id`.
    pub async fn tip(&self, id: u64, amount: &str) -> PipelineResult<TxHash> {
        self.ensure_synced()?;
        let method = self.profile.tip_method.clone().ok_or_else(|| AbiError::UnknownMethod {
            contract: self.handle.name().to_string(),
            method: "tip".to_string(),
        })?;
        let value = ether_to_wei(amount)?;

        let guard = self
            .inflight
            .acquire(self.connection.account)
            .await
            .ok_or(PipelineError::ActionInFlight(self.connection.account))?;

        let record =
            TransactionRecord::new(method, vec![DynSolValue::Uint(U256::from(id), 256)])
                .with_value(value);
        let result = self.submit(record).await;

        guard.release().await;
        result
    }

    /// Changes the selected item. Returns false for ids not in the collection.
    pub fn select(&self, id: u64) -> bool {
        self.store.select(id)
    }

    async fn upload_and_submit(&self, pending: PendingUpload) -> PipelineResult<TxHash> {
        let content_id = match self.uploader.upload(pending.bytes).await {
            Ok(id) => id,
            Err(err) => {
                self.store.record_error(err.to_string());
                return Err(err.into());
            }
        };

        let record = TransactionRecord::new(
            self.profile.upload_method.clone(),
            vec![
                DynSolValue::String(content_id.to_string()),
                DynSolValue::String(pending.metadata),
            ],
        );
        self.submit(record).await
    }

    async fn submit(&self, record: TransactionRecord) -> PipelineResult<TxHash> {
        let hash = self
            .submitter
            .submit(&self.handle, record, self.connection.account)
            .await?;

        // The collection is only ever refreshed by a new pass. A failed pass
        // here is reported but the transaction itself stays confirmed.
        if let Err(err) = self.refresh().await {
            tracing::warn!(%hash, %err, "resync after confirmation failed");
        }
        Ok(hash)
    }

    fn ensure_synced(&self) -> PipelineResult<()> {
        if self.synced.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(PipelineError::NotSynced)
        }
    }
}
