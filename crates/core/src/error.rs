use alloy::primitives::Address;
use dapp_common::ProviderError;
use thiserror::Error;

use crate::{
    amount::AmountError,
    artifact::{AbiError, ArtifactError},
    content::UploadError,
    ledger::LedgerError,
    resolver::ResolveError,
    submit::SubmitError,
    sync::SyncError,
    wallet::ConnectError,
};

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Transport(#[from] ProviderError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Abi(#[from] AbiError),
    #[error("synchronization failed: {0}")]
    Sync(#[from] SyncError),
    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),
    #[error("transaction failed: {0}")]
    Submit(#[from] SubmitError),
    #[error("invalid amount: {0}")]
    Amount(#[from] AmountError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("an action for {0} is already in flight")]
    ActionInFlight(Address),
    #[error("collection has not been synchronized yet")]
    NotSynced,
    #[error("`{0}` returned an unexpected value")]
    UnexpectedOutput(String),
}

impl PipelineError {
    /// Failures that end the session: nothing further can succeed without
    /// reconnecting or redeploying.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Artifact(_)
                | Self::Connect(ConnectError::NoProviderDetected)
                | Self::Connect(ConnectError::AuthorizationDenied(_))
                | Self::Resolve(_)
        )
    }

    /// Failures worth retrying by re-running the same step.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Sync(err) => err.is_transient(),
            Self::Submit(SubmitError::Rpc(err)) | Self::Ledger(err) => err.is_transient(),
            Self::Submit(SubmitError::ConfirmationTimeout { .. }) => true,
            Self::Connect(ConnectError::Ledger(err)) => err.is_transient(),
            Self::ActionInFlight(_) | Self::NotSynced => true,
            _ => false,
        }
    }
}
