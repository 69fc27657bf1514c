use std::{collections::HashMap, sync::Arc};

use thiserror::Error;

use crate::artifact::{ContractArtifact, ContractHandle};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{contract} is not deployed on chain {chain_id}")]
    ContractNotDeployed { contract: String, chain_id: u64 },
    #[error("{contract} does not expose `{method}`")]
    MissingMethod { contract: String, method: String },
}

/// Resolves artifacts to handles for the connected chain, caching each
/// `(chain id, contract name)` for the rest of the session.
#[derive(Debug, Default)]
pub struct ContractResolver {
    handles: HashMap<(u64, String), ContractHandle>,
}

impl ContractResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(
        &mut self,
        chain_id: u64,
        artifact: &ContractArtifact,
    ) -> Result<ContractHandle, ResolveError> {
        let key = (chain_id, artifact.contract_name.clone());
        if let Some(handle) = self.handles.get(&key) {
            return Ok(handle.clone());
        }

        let Some(deployment) = artifact.deployment(chain_id) else {
            tracing::error!(
                contract = %artifact.contract_name,
                chain_id,
                "contract not deployed on connected network"
            );
            return Err(ResolveError::ContractNotDeployed {
                contract: artifact.contract_name.clone(),
                chain_id,
            });
        };

        let handle = ContractHandle::new(
            artifact.contract_name.clone(),
            deployment.address,
            chain_id,
            Arc::new(artifact.abi.clone()),
        );
        tracing::info!(
            contract = %artifact.contract_name,
            chain_id,
            address = %deployment.address,
            "resolved contract"
        );
        self.handles.insert(key, handle.clone());
        Ok(handle)
    }

    /// Fails on the first method in `methods` the contract does not expose.
    pub fn ensure_methods(handle: &ContractHandle, methods: &[&str]) -> Result<(), ResolveError> {
        match methods.iter().find(|m| !handle.has_method(m)) {
            Some(missing) => Err(ResolveError::MissingMethod {
                contract: handle.name().to_string(),
                method: missing.to_string(),
            }),
            None => Ok(()),
        }
    }
}
