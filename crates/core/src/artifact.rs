//! Compiled contract artifacts and the callable handles resolved from them.
//!
//! Artifacts use the truffle build layout: the contract's JSON ABI plus a
//! `networks` table keyed by the decimal chain id, each entry carrying the
//! deployment address.

use std::{collections::HashMap, path::Path, sync::Arc};

use alloy::{
    dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt},
    json_abi::{Function, JsonAbi},
    primitives::{Address, B256, Bytes},
};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read artifact {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed artifact: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum AbiError {
    #[error("contract {contract} has no method `{method}`")]
    UnknownMethod { contract: String, method: String },
    #[error("failed to encode arguments for `{method}`: {source}")]
    Encode {
        method: String,
        #[source]
        source: alloy::dyn_abi::Error,
    },
    #[error("failed to decode return data of `{method}`: {source}")]
    Decode {
        method: String,
        #[source]
        source: alloy::dyn_abi::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDeployment {
    pub address: Address,
    #[serde(default)]
    pub transaction_hash: Option<B256>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractArtifact {
    pub contract_name: String,
    pub abi: JsonAbi,
    #[serde(default)]
    pub networks: HashMap<String, NetworkDeployment>,
}

impl ContractArtifact {
    pub fn from_json(json: &str) -> Result<Self, ArtifactError> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ArtifactError::Io {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_json(&json)
    }

    pub fn deployment(&self, chain_id: u64) -> Option<&NetworkDeployment> {
        self.networks.get(&chain_id.to_string())
    }
}

/// A contract deployed on a specific chain, callable by method name.
#[derive(Debug, Clone)]
pub struct ContractHandle {
    name: String,
    address: Address,
    chain_id: u64,
    abi: Arc<JsonAbi>,
}

impl ContractHandle {
    pub fn new(name: impl Into<String>, address: Address, chain_id: u64, abi: Arc<JsonAbi>) -> Self {
        Self {
            name: name.into(),
            address,
            chain_id,
            abi,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.abi.function(method).is_some_and(|f| !f.is_empty())
    }

    /// First overload of `method`. The contracts driven here do not overload.
    pub fn function(&self, method: &str) -> Result<&Function, AbiError> {
        self.abi
            .function(method)
            .and_then(|overloads| overloads.first())
            .ok_or_else(|| AbiError::UnknownMethod {
                contract: self.name.clone(),
                method: method.to_string(),
            })
    }

    /// Selector-prefixed calldata for `method(args)`.
    pub fn encode_call(&self, method: &str, args: &[DynSolValue]) -> Result<Bytes, AbiError> {
        let function = self.function(method)?;
        function
            .abi_encode_input(args)
            .map(Bytes::from)
            .map_err(|source| AbiError::Encode {
                method: method.to_string(),
                source,
            })
    }

    pub fn decode_output(&self, method: &str, data: &[u8]) -> Result<Vec<DynSolValue>, AbiError> {
        let function = self.function(method)?;
        function
            .abi_decode_output(data)
            .map_err(|source| AbiError::Decode {
                method: method.to_string(),
                source,
            })
    }
}
