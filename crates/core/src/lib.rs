//! Client pipeline for ledger-backed registries.
//!
//! A session authorizes against a wallet ([`wallet`]), resolves the contract
//! deployed on the connected chain ([`resolver`]), reads its indexed
//! collection into an immutable snapshot ([`sync`]) and drives mutating
//! actions: uploads to a content-addressed store followed by a contract call
//! ([`content`], [`submit`]). All results are published to a [`StateStore`].

pub mod amount;
pub mod artifact;
pub mod collection;
pub mod config;
pub mod content;
pub mod error;
pub mod inflight;
pub mod ledger;
pub mod lending;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod submit;
pub mod sync;
pub mod wallet;

pub use artifact::{ContractArtifact, ContractHandle};
pub use collection::{CollectionItem, CollectionSnapshot, CollectionSpec};
pub use config::ClientConfig;
pub use content::{ContentId, ContentStore, IpfsStore, PendingUpload};
pub use error::{PipelineError, PipelineResult};
pub use ledger::{Ledger, LedgerError, RpcLedger};
pub use lending::LendingDesk;
pub use registry::{RegistryProfile, RegistrySession};
pub use store::{AppState, StateStore, TxStatus};
pub use wallet::{Connection, ProviderAdapter};
