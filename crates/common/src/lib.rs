//! Transport plumbing shared by the dapp pipeline crates.
//!
//! Builds alloy providers for the wallet-controlled and legacy RPC endpoints,
//! wraps them in retry/throttle layers and installs the tracing subscriber.

mod provider;
mod provider_layers;
pub mod tracing;

pub use provider::{ProviderArgs, ProviderError, ProviderResult};
pub use provider_layers::{RetryConfig, ThrottleConfig};
